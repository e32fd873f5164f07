//! Periodic pruning of expired history, processed writes, and inactive
//! alarm activations.

use crate::store::{Store, StoreError};
use chrono::{DateTime, Utc};
use tracing::info;

/// Processed write requests linger this long for inspection.
const PROCESSED_WRITE_RETENTION_SECS: i64 = 3600;

/// Cleared activations linger this long as an alarm log.
const INACTIVE_ALARM_RETENTION_SECS: i64 = 24 * 3600;

#[derive(Debug, Default, Clone, Copy)]
pub struct CleanupStats {
    pub history_entries: usize,
    pub processed_writes: usize,
    pub inactive_alarms: usize,
}

impl CleanupStats {
    pub fn total(&self) -> usize {
        self.history_entries + self.processed_writes + self.inactive_alarms
    }
}

/// One cleanup pass over the store.
pub fn run_cleanup(store: &Store, now: DateTime<Utc>) -> Result<CleanupStats, StoreError> {
    let stats = CleanupStats {
        history_entries: store.prune_history(now)?,
        processed_writes: store.delete_processed_writes(Some(
            now - chrono::Duration::seconds(PROCESSED_WRITE_RETENTION_SECS),
        ))?,
        inactive_alarms: store.delete_inactive_alarms(Some(
            now - chrono::Duration::seconds(INACTIVE_ALARM_RETENTION_SECS),
        ))?,
    };

    if stats.total() > 0 {
        info!(
            "Cleanup: {} history entries, {} processed writes, {} inactive alarms",
            stats.history_entries, stats.processed_writes, stats.inactive_alarms
        );
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Channel, DataType, HistoryEntry, Protocol, Value, WordOrder};
    use crate::store::{NewDevice, NewTag};
    use std::time::Duration;

    #[test]
    fn cleanup_touches_all_three_tables() {
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
                alias: "t".into(),
                description: String::new(),
                channel: Channel::HoldingRegister,
                data_type: DataType::Int16,
                address: 0,
                unit_id: 1,
                read_amount: 1,
                history_interval: Duration::from_secs(5),
                history_retention: Duration::from_secs(30),
                active: true,
            })
            .unwrap();

        let now = Utc::now();
        store
            .record_history(vec![(
                tag.id,
                HistoryEntry {
                    timestamp: now - chrono::Duration::seconds(45),
                    value: Value::I64(1),
                },
            )])
            .unwrap();

        let request = store
            .enqueue_write(tag.id, Value::I64(2), now - chrono::Duration::hours(2))
            .unwrap();
        store.mark_write_processed(request.id, None).unwrap();

        let stats = run_cleanup(&store, now).unwrap();
        assert_eq!(stats.history_entries, 1);
        assert_eq!(stats.processed_writes, 1);
        assert_eq!(stats.inactive_alarms, 0);
        assert_eq!(store.history_len(tag.id), 0);
        assert!(store.write_requests().is_empty());
    }

    #[test]
    fn recent_processed_writes_survive() {
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
                alias: "t".into(),
                description: String::new(),
                channel: Channel::Coil,
                data_type: DataType::Bool,
                address: 0,
                unit_id: 1,
                read_amount: 1,
                history_interval: Duration::from_secs(5),
                history_retention: Duration::ZERO,
                active: true,
            })
            .unwrap();

        let now = Utc::now();
        let request = store.enqueue_write(tag.id, Value::Bool(true), now).unwrap();
        store.mark_write_processed(request.id, None).unwrap();

        let stats = run_cleanup(&store, now).unwrap();
        assert_eq!(stats.processed_writes, 0);
        assert_eq!(store.write_requests().len(), 1);
    }
}
