//! Schedule runner — injects write requests at due time-of-day slots.
//!
//! A schedule fires at most once per `(date, time)` slot on its enabled
//! weekdays. Slot times are interpreted in the server's local timezone;
//! a slot that does not exist on a given day (DST gap) is skipped.

use crate::store::{Store, StoreError};
use chrono::{DateTime, Datelike, Local, TimeZone, Utc};
use tracing::{error, info};

/// One pass over the enabled schedules. Returns how many fired.
pub fn process_schedules(store: &Store, now: DateTime<Local>) -> Result<usize, StoreError> {
    let weekday = now.weekday().num_days_from_monday() as usize;
    let now_utc = now.with_timezone(&Utc);
    let mut fired = 0usize;

    for schedule in store.enabled_schedules() {
        if !schedule.days[weekday] {
            continue;
        }

        let Some(target_naive) = now
            .date_naive()
            .and_hms_opt(schedule.hour as u32, schedule.minute as u32, 0)
        else {
            error!("Schedule {}: bad time of day", schedule.alias);
            continue;
        };
        let Some(target) = Local.from_local_datetime(&target_naive).earliest() else {
            // The slot fell into a DST gap today.
            continue;
        };
        let target_utc = target.with_timezone(&Utc);

        // Not due yet, or the schedule didn't exist for this slot.
        if schedule.created_at > target_utc || target_utc > now_utc {
            continue;
        }
        // Already fired for this slot.
        if schedule.last_run.is_some_and(|last| last >= target_utc) {
            continue;
        }

        match store.enqueue_write(schedule.tag_id, schedule.write_value.clone(), now_utc) {
            Ok(_) => {
                info!("Schedule fired: {}", schedule.alias);
                fired += 1;
            }
            Err(e) => {
                error!("Schedule {}: {}", schedule.alias, e);
            }
        }
        // Mark the slot consumed either way so a misconfigured schedule
        // does not retry every pass.
        store.set_schedule_last_run(schedule.id, now_utc)?;
    }

    Ok(fired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Channel, DataType, Protocol, Tag, Value, WordOrder};
    use crate::store::{NewDevice, NewSchedule, NewTag};
    use std::time::Duration;

    fn fixture() -> (tempfile::TempDir, Store, Tag) {
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
                alias: "pump".into(),
                description: String::new(),
                channel: Channel::Coil,
                data_type: DataType::Bool,
                address: 0,
                unit_id: 1,
                read_amount: 1,
                history_interval: Duration::from_secs(1),
                history_retention: Duration::ZERO,
                active: true,
            })
            .unwrap();
        (dir, store, tag)
    }

    /// A fixed Wednesday at noon, far from any DST transition.
    fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap()
    }

    fn add_schedule(store: &Store, tag: &Tag, hour: u8, minute: u8, days: [bool; 7]) -> u32 {
        let schedule = store
            .create_schedule(NewSchedule {
                alias: format!("s-{:02}{:02}", hour, minute),
                tag_id: tag.id,
                write_value: Value::Bool(true),
                hour,
                minute,
                days,
                enabled: true,
            })
            .unwrap();
        // Schedules in these tests have always existed.
        store
            .backdate_schedule(schedule.id, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
            .unwrap();
        schedule.id
    }

    #[test]
    fn due_schedule_fires_once() {
        let (_dir, store, tag) = fixture();
        add_schedule(&store, &tag, 11, 30, [true; 7]);

        assert_eq!(process_schedules(&store, noon()).unwrap(), 1);
        assert_eq!(store.pending_writes_for_device(tag.device_id).len(), 1);

        // Same slot, later the same day: idempotent.
        let later = noon() + chrono::Duration::minutes(5);
        assert_eq!(process_schedules(&store, later).unwrap(), 0);
        assert_eq!(store.pending_writes_for_device(tag.device_id).len(), 1);

        // Next enabled day, the slot fires again.
        let tomorrow = noon() + chrono::Duration::days(1);
        assert_eq!(process_schedules(&store, tomorrow).unwrap(), 1);
    }

    #[test]
    fn disabled_weekday_is_skipped() {
        let (_dir, store, tag) = fixture();
        // noon() is a Wednesday (weekday index 2).
        let mut days = [true; 7];
        days[2] = false;
        add_schedule(&store, &tag, 11, 0, days);

        assert_eq!(process_schedules(&store, noon()).unwrap(), 0);
        let thursday = noon() + chrono::Duration::days(1);
        assert_eq!(process_schedules(&store, thursday).unwrap(), 1);
    }

    #[test]
    fn future_slot_is_not_due() {
        let (_dir, store, tag) = fixture();
        add_schedule(&store, &tag, 13, 0, [true; 7]);
        assert_eq!(process_schedules(&store, noon()).unwrap(), 0);
        assert!(store.pending_writes_for_device(tag.device_id).is_empty());
    }

    #[test]
    fn slot_before_creation_is_skipped() {
        let (_dir, store, tag) = fixture();
        let schedule = store
            .create_schedule(NewSchedule {
                alias: "new".into(),
                tag_id: tag.id,
                write_value: Value::Bool(true),
                hour: 11,
                minute: 0,
                days: [true; 7],
                enabled: true,
            })
            .unwrap();
        // Created after today's slot has passed.
        store
            .backdate_schedule(schedule.id, noon().with_timezone(&Utc) - chrono::Duration::minutes(10))
            .unwrap();
        assert_eq!(process_schedules(&store, noon()).unwrap(), 0);
    }

    #[test]
    fn read_only_target_consumes_the_slot() {
        let (_dir, store, tag) = fixture();
        let ro = store
            .create_tag(NewTag {
                device_id: tag.device_id,
                alias: "sensor".into(),
                description: String::new(),
                channel: Channel::InputRegister,
                data_type: DataType::Int16,
                address: 5,
                unit_id: 1,
                read_amount: 1,
                history_interval: Duration::from_secs(1),
                history_retention: Duration::ZERO,
                active: true,
            })
            .unwrap();
        add_schedule(&store, &ro, 11, 0, [true; 7]);

        assert_eq!(process_schedules(&store, noon()).unwrap(), 0);
        assert!(store.pending_writes_for_device(tag.device_id).is_empty());
        // The bad slot is not retried on the next pass.
        assert_eq!(process_schedules(&store, noon()).unwrap(), 0);
        let schedules = store.schedules();
        assert!(schedules.iter().all(|s| s.last_run.is_some()));
    }
}
