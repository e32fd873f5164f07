//! On-disk formats for the embedded store.
//!
//! Two files live in the data directory:
//!
//! ```text
//! state.bin — full-state snapshot, replaced atomically on compaction
//! ┌─────────────────────────────────────────────┐
//! │ magic: [u8; 4] = b"MSUP"                    │
//! │ version: u16 LE = 1                         │
//! │ zstd(postcard(Tables))                      │
//! └─────────────────────────────────────────────┘
//!
//! wal.log — mutations since the snapshot, append-only
//! ┌─────────────────────────────────────────────┐
//! │ per entry:                                  │
//! │   length: u32 LE   (payload bytes)          │
//! │   crc32:  u32 LE   (of the payload)         │
//! │   payload: postcard(Mutation)               │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Recovery reads entries until the first short/corrupt frame, truncates
//! the garbage, and replays the rest. Interrupted snapshot writes leave a
//! `.tmp` file that startup removes.

use super::StoreError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

const SNAPSHOT_MAGIC: [u8; 4] = *b"MSUP";
const SNAPSHOT_VERSION: u16 = 1;
const FRAME_HEADER_LEN: usize = 8;
const ZSTD_LEVEL: i32 = 3;

// ============================================================
// Snapshot file
// ============================================================

pub(crate) fn write_snapshot<T: Serialize>(path: &Path, state: &T) -> Result<(), StoreError> {
    let encoded = postcard::to_allocvec(state)
        .map_err(|e| StoreError::Corrupt(format!("snapshot encode: {}", e)))?;
    let compressed = zstd::bulk::compress(&encoded, ZSTD_LEVEL)
        .map_err(|e| StoreError::Io(format!("snapshot compress: {}", e)))?;

    let mut data = Vec::with_capacity(6 + compressed.len());
    data.extend_from_slice(&SNAPSHOT_MAGIC);
    data.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    data.extend_from_slice(&compressed);

    // Write-then-rename so a crash never leaves a half-written snapshot.
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &data).map_err(|e| StoreError::Io(e.to_string()))?;
    std::fs::rename(&tmp, path).map_err(|e| StoreError::Io(e.to_string()))?;
    Ok(())
}

pub(crate) fn read_snapshot<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let data = match std::fs::read(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::Io(e.to_string())),
    };

    if data.len() < 6 || data[0..4] != SNAPSHOT_MAGIC {
        return Err(StoreError::Corrupt("bad snapshot magic".into()));
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != SNAPSHOT_VERSION {
        return Err(StoreError::Corrupt(format!(
            "unsupported snapshot version {}",
            version
        )));
    }

    let decompressed = zstd::stream::decode_all(&data[6..])
        .map_err(|e| StoreError::Corrupt(format!("snapshot decompress: {}", e)))?;
    let state = postcard::from_bytes(&decompressed)
        .map_err(|e| StoreError::Corrupt(format!("snapshot decode: {}", e)))?;
    Ok(Some(state))
}

// ============================================================
// WAL file
// ============================================================

pub(crate) struct WalFile {
    path: PathBuf,
    file: File,
    entries: usize,
}

impl WalFile {
    /// Opens the WAL for appending; `entries` must come from `replay`.
    pub(crate) fn open(path: &Path, entries: usize) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            entries,
        })
    }

    pub(crate) fn entries(&self) -> usize {
        self.entries
    }

    /// Appends one frame. The batch variant below is preferred where the
    /// caller already holds several mutations.
    pub(crate) fn append<T: Serialize>(&mut self, entry: &T) -> Result<(), StoreError> {
        self.append_all(std::slice::from_ref(entry))
    }

    /// Appends several frames with a single write syscall.
    pub(crate) fn append_all<T: Serialize>(&mut self, entries: &[T]) -> Result<(), StoreError> {
        let mut buf = Vec::new();
        for entry in entries {
            let payload = postcard::to_allocvec(entry)
                .map_err(|e| StoreError::Corrupt(format!("wal encode: {}", e)))?;
            buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
            buf.extend_from_slice(&payload);
        }
        self.file
            .write_all(&buf)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        self.entries += entries.len();
        Ok(())
    }

    /// Empties the WAL after a successful compaction.
    pub(crate) fn truncate(&mut self) -> Result<(), StoreError> {
        self.file
            .set_len(0)
            .map_err(|e| StoreError::Io(e.to_string()))?;
        self.entries = 0;
        Ok(())
    }

    pub(crate) fn sync(&mut self) -> Result<(), StoreError> {
        self.file
            .sync_data()
            .map_err(|e| StoreError::Io(e.to_string()))
    }
}

/// Reads all valid WAL entries. Trailing corruption (a torn write from a
/// crash) is truncated off with a warning; anything before it survives.
pub(crate) fn replay<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let data = match std::fs::read(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::Io(e.to_string())),
    };

    let mut entries = Vec::new();
    let mut pos = 0usize;
    let mut valid_end = 0usize;

    while pos + FRAME_HEADER_LEN <= data.len() {
        let len = u32::from_le_bytes(data[pos..pos + 4].try_into().unwrap()) as usize;
        let crc = u32::from_le_bytes(data[pos + 4..pos + 8].try_into().unwrap());
        let start = pos + FRAME_HEADER_LEN;
        let Some(end) = start.checked_add(len).filter(|e| *e <= data.len()) else {
            break;
        };
        let payload = &data[start..end];
        if crc32fast::hash(payload) != crc {
            break;
        }
        match postcard::from_bytes(payload) {
            Ok(entry) => entries.push(entry),
            Err(_) => break,
        }
        pos = end;
        valid_end = end;
    }

    if valid_end < data.len() {
        warn!(
            "WAL corruption: {} garbage bytes after {} valid entries, truncating",
            data.len() - valid_end,
            entries.len()
        );
        OpenOptions::new()
            .write(true)
            .open(path)
            .and_then(|f| f.set_len(valid_end as u64))
            .map_err(|e| StoreError::Io(format!("wal truncate: {}", e)))?;
    }

    Ok(entries)
}

/// Removes `.tmp` leftovers from interrupted snapshot writes.
pub(crate) fn remove_stale_tmp(dir: &Path) {
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            if entry.path().extension().is_some_and(|ext| ext == "tmp") {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }
}
