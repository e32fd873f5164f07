//! History sampling — per-tag throttle over the poll stream.
//!
//! Called once per poll tick with the batch of tags that were just read.
//! Growth per tag is bounded by `history_retention / history_interval`
//! (cleanup enforces the retention side).

use crate::model::{HistoryEntry, Tag, TagId};
use crate::store::{Store, StoreError};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Appends a history entry for every tag that is due one, as a single
/// bulk insert. Returns the number of entries written.
pub fn sample_batch(
    store: &Store,
    tags: &[Tag],
    now: DateTime<Utc>,
) -> Result<usize, StoreError> {
    let mut samples: Vec<(TagId, HistoryEntry)> = Vec::new();

    for tag in tags {
        if tag.history_retention.is_zero() {
            continue;
        }
        let Some(value) = &tag.current_value else {
            continue;
        };

        if let Some(last) = tag.last_history_at {
            let Ok(interval) = chrono::Duration::from_std(tag.history_interval) else {
                continue;
            };
            if now - last < interval {
                continue;
            }
        }

        samples.push((
            tag.id,
            HistoryEntry {
                timestamp: now,
                value: value.clone(),
            },
        ));
    }

    let count = samples.len();
    if count > 0 {
        store.record_history(samples)?;
        debug!("Recorded {} history entries", count);
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Channel, DataType, Protocol, Value, WordOrder};
    use crate::store::{NewDevice, NewTag};
    use std::time::Duration;

    fn store_with_tag(retention: Duration, interval: Duration) -> (tempfile::TempDir, Store, Tag) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let device = store
            .create_device(NewDevice {
                alias: "plc-1".into(),
                host: "127.0.0.1".into(),
                port: 502,
                protocol: Protocol::Tcp,
                word_order: WordOrder::Big,
                active: true,
            })
            .unwrap();
        let tag = store
            .create_tag(NewTag {
                device_id: device.id,
                alias: "level".into(),
                description: String::new(),
                channel: Channel::HoldingRegister,
                data_type: DataType::Int16,
                address: 0,
                unit_id: 1,
                read_amount: 1,
                history_interval: interval,
                history_retention: retention,
                active: true,
            })
            .unwrap();
        (dir, store, tag)
    }

    #[test]
    fn zero_retention_disables_history() {
        let (_dir, store, tag) = store_with_tag(Duration::ZERO, Duration::from_secs(1));
        let now = Utc::now();
        let tag = store.commit_poll(tag.id, Value::I64(1), now).unwrap();
        assert_eq!(sample_batch(&store, &[tag.clone()], now).unwrap(), 0);
        assert_eq!(store.history_len(tag.id), 0);
    }

    #[test]
    fn interval_throttles_consecutive_samples() {
        let (_dir, store, tag) =
            store_with_tag(Duration::from_secs(60), Duration::from_secs(5));
        let t0 = Utc::now();

        let tag = store.commit_poll(tag.id, Value::I64(1), t0).unwrap();
        assert_eq!(sample_batch(&store, &[tag.clone()], t0).unwrap(), 1);

        // Too soon — throttled.
        let t1 = t0 + chrono::Duration::seconds(2);
        let tag = store.commit_poll(tag.id, Value::I64(2), t1).unwrap();
        assert_eq!(sample_batch(&store, &[tag.clone()], t1).unwrap(), 0);

        // Past the interval — sampled again.
        let t2 = t0 + chrono::Duration::seconds(5);
        let tag = store.commit_poll(tag.id, Value::I64(3), t2).unwrap();
        assert_eq!(sample_batch(&store, &[tag.clone()], t2).unwrap(), 1);

        let entries = store.history_window(tag.id, t0 - chrono::Duration::seconds(1));
        assert_eq!(entries.len(), 2);
        // Consecutive entries are at least one interval apart.
        let gap = entries[1].timestamp - entries[0].timestamp;
        assert!(gap >= chrono::Duration::seconds(5));
    }

    #[test]
    fn unread_tags_are_skipped() {
        let (_dir, store, tag) =
            store_with_tag(Duration::from_secs(60), Duration::from_secs(1));
        // No current value yet — nothing to sample.
        assert_eq!(sample_batch(&store, &[tag], Utc::now()).unwrap(), 0);
    }
}
