//! Alarm evaluation — predicate matching, the single-active-activation
//! state machine, and notification intents with per-config cool-down.
//!
//! Runs against the batch of tags each poll tick produced. For every tag
//! the winning config is the highest threat level among those triggered
//! (ties go to the lowest config id); the store then holds at most one
//! active activation per tag.

use crate::model::{NotificationIntent, Tag};
use crate::store::{Store, StoreError};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Reconciles alarms for the given tags. Returned intents have already
/// been persisted to the outbox; delivery is someone else's job.
pub fn evaluate_batch(
    store: &Store,
    tags: &[Tag],
    now: DateTime<Utc>,
) -> Result<Vec<NotificationIntent>, StoreError> {
    let mut intents = Vec::new();

    for tag in tags {
        let configs = store.enabled_configs_for_tag(tag.id);

        let winner = tag.current_value.as_ref().and_then(|value| {
            configs
                .iter()
                .filter(|c| c.is_activation(value))
                // Highest threat level wins; lowest id breaks ties.
                .min_by_key(|c| (std::cmp::Reverse(c.threat_level.priority()), c.id))
        });

        let current = store.active_alarm_for_tag(tag.id);

        if let Some((activation, config)) = &current {
            if winner.is_none_or(|w| w.id != config.id) {
                store.deactivate_alarm(activation.id)?;
                debug!("Alarm cleared for {}: {}", tag, config.alias);
            }
        }

        let Some(winner) = winner else {
            continue;
        };
        let already_active = current
            .as_ref()
            .is_some_and(|(_, config)| config.id == winner.id);
        if already_active {
            continue;
        }

        store.activate_alarm(winner.id, now)?;
        info!(
            "Alarm activated for {}: {} ({})",
            tag,
            winner.alias,
            winner.threat_level.as_str()
        );

        // Cool-down lives on the config, so a threat-level edit mid-flight
        // still throttles per config identity.
        let due = match winner.last_notified {
            None => true,
            Some(last) => match chrono::Duration::from_std(winner.notification_cooldown) {
                Ok(cooldown) => now - last > cooldown,
                Err(_) => false,
            },
        };
        if !due {
            continue;
        }

        let recipients: Vec<String> = store
            .subscriptions_for_config(winner.id)
            .into_iter()
            .filter(|s| s.email_enabled && !s.email.is_empty())
            .map(|s| s.email)
            .collect();

        let intent = NotificationIntent {
            config_id: winner.id,
            tag_id: tag.id,
            message: winner.message.clone(),
            threat_level: winner.threat_level,
            recipients,
            created_at: now,
        };
        store.push_intent(intent.clone())?;
        store.set_last_notified(winner.id, now)?;
        info!(
            "Notification intent for {}: {:?} -> {} recipients",
            tag,
            winner.message,
            intent.recipients.len()
        );
        intents.push(intent);
    }

    Ok(intents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Channel, DataType, Operator, Protocol, ThreatLevel, Value, WordOrder,
    };
    use crate::store::{NewAlarmConfig, NewDevice, NewSubscription, NewTag};
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
                alias: "pressure".into(),
                description: String::new(),
                channel: Channel::HoldingRegister,
                data_type: DataType::Int16,
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

    fn add_config(
        store: &Store,
        tag: &Tag,
        alias: &str,
        trigger: i64,
        level: ThreatLevel,
    ) -> crate::model::AlarmConfig {
        store
            .create_alarm_config(NewAlarmConfig {
                tag_id: tag.id,
                alias: alias.into(),
                trigger_value: Value::I64(trigger),
                operator: Operator::Equals,
                threat_level: level,
                message: format!("{} tripped", alias),
                enabled: true,
                notification_cooldown: Duration::from_secs(60),
            })
            .unwrap()
    }

    fn active_count(store: &Store) -> usize {
        store.activations().iter().filter(|a| a.active).count()
    }

    #[test]
    fn highest_threat_level_wins_and_transitions() {
        let (_dir, store, tag) = fixture();
        add_config(&store, &tag, "low-8", 8, ThreatLevel::Low);
        let high = add_config(&store, &tag, "high-9", 9, ThreatLevel::High);
        let critical = add_config(&store, &tag, "crit-10", 10, ThreatLevel::Critical);

        let now = Utc::now();

        // value = 10 → exactly one activation, the critical config.
        let tag = store.commit_poll(tag.id, Value::I64(10), now).unwrap();
        evaluate_batch(&store, &[tag.clone()], now).unwrap();
        assert_eq!(active_count(&store), 1);
        let (_, config) = store.active_alarm_for_tag(tag.id).unwrap();
        assert_eq!(config.id, critical.id);

        // value = 9 → previous deactivated, one new activation (high).
        let tag = store.commit_poll(tag.id, Value::I64(9), now).unwrap();
        evaluate_batch(&store, &[tag.clone()], now).unwrap();
        assert_eq!(active_count(&store), 1);
        let (_, config) = store.active_alarm_for_tag(tag.id).unwrap();
        assert_eq!(config.id, high.id);
        // The old activation is still on record, just inactive.
        assert_eq!(store.activations().len(), 2);

        // value = 0 → nothing active.
        let tag = store.commit_poll(tag.id, Value::I64(0), now).unwrap();
        evaluate_batch(&store, &[tag.clone()], now).unwrap();
        assert_eq!(active_count(&store), 0);
    }

    #[test]
    fn steady_state_does_not_reactivate() {
        let (_dir, store, tag) = fixture();
        add_config(&store, &tag, "low-5", 5, ThreatLevel::Low);
        let now = Utc::now();

        let tag = store.commit_poll(tag.id, Value::I64(5), now).unwrap();
        evaluate_batch(&store, &[tag.clone()], now).unwrap();
        evaluate_batch(&store, &[tag.clone()], now).unwrap();
        evaluate_batch(&store, &[tag.clone()], now).unwrap();

        assert_eq!(store.activations().len(), 1);
        assert_eq!(active_count(&store), 1);
    }

    #[test]
    fn tie_on_threat_level_breaks_by_config_id() {
        let (_dir, store, tag) = fixture();
        let first = add_config(&store, &tag, "a", 5, ThreatLevel::High);
        add_config(&store, &tag, "b", 5, ThreatLevel::High);
        let now = Utc::now();

        let tag = store.commit_poll(tag.id, Value::I64(5), now).unwrap();
        evaluate_batch(&store, &[tag.clone()], now).unwrap();
        let (_, config) = store.active_alarm_for_tag(tag.id).unwrap();
        assert_eq!(config.id, first.id);
    }

    #[test]
    fn cooldown_throttles_notifications() {
        let (_dir, store, tag) = fixture();
        let config = add_config(&store, &tag, "crit", 1, ThreatLevel::Critical);
        store
            .create_subscription(NewSubscription {
                config_id: config.id,
                email: "ops@example.com".into(),
                email_enabled: true,
                sms_enabled: false,
            })
            .unwrap();

        let t0 = Utc::now();

        // Activation at t0 notifies.
        let tag = store.commit_poll(tag.id, Value::I64(1), t0).unwrap();
        let intents = evaluate_batch(&store, &[tag.clone()], t0).unwrap();
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].recipients, vec!["ops@example.com".to_string()]);
        assert_eq!(store.alarm_config(config.id).unwrap().last_notified, Some(t0));

        // Clear, then re-activate 10 s later: inside the cool-down.
        let tag = store.commit_poll(tag.id, Value::I64(0), t0).unwrap();
        evaluate_batch(&store, &[tag.clone()], t0).unwrap();
        let t1 = t0 + chrono::Duration::seconds(10);
        let tag = store.commit_poll(tag.id, Value::I64(1), t1).unwrap();
        let intents = evaluate_batch(&store, &[tag.clone()], t1).unwrap();
        assert!(intents.is_empty());

        // Clear and re-activate past the cool-down.
        let tag = store.commit_poll(tag.id, Value::I64(0), t1).unwrap();
        evaluate_batch(&store, &[tag.clone()], t1).unwrap();
        let t2 = t0 + chrono::Duration::seconds(61);
        let tag = store.commit_poll(tag.id, Value::I64(1), t2).unwrap();
        let intents = evaluate_batch(&store, &[tag.clone()], t2).unwrap();
        assert_eq!(intents.len(), 1);
        assert_eq!(
            store.alarm_config(config.id).unwrap().last_notified,
            Some(t2)
        );
    }

    #[test]
    fn cross_type_values_never_activate() {
        let (_dir, store, tag) = fixture();
        add_config(&store, &tag, "eq-1", 1, ThreatLevel::Low);
        let now = Utc::now();

        let tag = store
            .commit_poll(tag.id, Value::Str("1".into()), now)
            .unwrap();
        evaluate_batch(&store, &[tag.clone()], now).unwrap();
        assert_eq!(active_count(&store), 0);
    }

    #[test]
    fn disabled_configs_are_ignored_and_alarm_clears() {
        let (_dir, store, tag) = fixture();
        let config = add_config(&store, &tag, "eq-1", 1, ThreatLevel::Low);
        let now = Utc::now();

        let tag = store.commit_poll(tag.id, Value::I64(1), now).unwrap();
        evaluate_batch(&store, &[tag.clone()], now).unwrap();
        assert_eq!(active_count(&store), 1);

        store
            .update_alarm_config(
                config.id,
                crate::store::AlarmConfigUpdate {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        evaluate_batch(&store, &[tag.clone()], now).unwrap();
        assert_eq!(active_count(&store), 0);
    }
}
