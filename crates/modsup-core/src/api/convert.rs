//! Dynamic value ↔ JSON conversion and the value/history payload builders.

use super::schema::{AlarmPayload, HistoryPayload, HistoryPoint, TagValuePayload};
use super::ApiError;
use crate::cache::TagCache;
use crate::model::{Tag, Value};
use crate::store::Store;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Maps a tag value onto plain JSON.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::I64(v) => serde_json::Value::from(*v),
        Value::U64(v) => serde_json::Value::from(*v),
        Value::F64(v) => serde_json::Number::from_f64(*v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::List(items) => {
            serde_json::Value::Array(items.iter().map(value_to_json).collect())
        }
    }
}

/// Maps client JSON onto a tag value. Integers stay integers (signed
/// preferred), everything else follows the JSON type. Objects and nulls
/// have no tag-value shape.
pub fn value_from_json(json: &serde_json::Value) -> Result<Value, ApiError> {
    match json {
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Ok(Value::I64(v))
            } else if let Some(v) = n.as_u64() {
                Ok(Value::U64(v))
            } else if let Some(v) = n.as_f64() {
                Ok(Value::F64(v))
            } else {
                Err(ApiError::BadRequest(format!("bad number: {}", n)))
            }
        }
        serde_json::Value::String(s) => Ok(Value::Str(s.clone())),
        serde_json::Value::Array(items) => items
            .iter()
            .map(value_from_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        serde_json::Value::Null => Err(ApiError::BadRequest("No value supplied".into())),
        serde_json::Value::Object(_) => {
            Err(ApiError::BadRequest("objects are not valid tag values".into()))
        }
    }
}

/// Builds the value payload for one tag: current value from the cache
/// (falling back to the persisted field), plus the active alarm, if any.
pub fn tag_value_payload(
    store: &Store,
    cache: &TagCache,
    tag: &Tag,
    now: DateTime<Utc>,
) -> TagValuePayload {
    let (value, time) = match cache.get(tag.id) {
        Some(cached) => (Some(cached.value), Some(cached.updated_at)),
        None => (tag.current_value.clone(), tag.last_updated),
    };

    let age_ms = match time {
        Some(t) => {
            let millis = (now - t).num_milliseconds().max(0);
            serde_json::Value::from(millis)
        }
        None => serde_json::Value::String("Infinity".into()),
    };

    let alarm = store
        .active_alarm_for_tag(tag.id)
        .map(|(_, config)| AlarmPayload {
            message: config.message,
            threat_level: config.threat_level.as_str().to_string(),
        });

    TagValuePayload {
        id: tag.external_id,
        value: value.as_ref().map_or(serde_json::Value::Null, value_to_json),
        time,
        age_ms,
        alarm,
    }
}

/// Builds the batch-values map. Unknown ids are skipped; an entirely
/// unknown batch is a 404, matching the single-tag route.
pub fn batch_value_payloads(
    store: &Store,
    cache: &TagCache,
    external_ids: &[Uuid],
    now: DateTime<Utc>,
) -> Result<BTreeMap<String, TagValuePayload>, ApiError> {
    if external_ids.is_empty() {
        return Err(ApiError::BadRequest("No tags specified".into()));
    }

    let mut results = BTreeMap::new();
    for external_id in external_ids {
        if let Some(tag) = store.tag_by_external(*external_id) {
            results.insert(
                external_id.to_string(),
                tag_value_payload(store, cache, &tag, now),
            );
        }
    }

    if results.is_empty() {
        return Err(ApiError::NotFound("Requested tags not found".into()));
    }
    Ok(results)
}

/// Builds the history window payload, oldest entry first.
pub fn history_payload(
    store: &Store,
    tag: &Tag,
    seconds: i64,
    now: DateTime<Utc>,
) -> HistoryPayload {
    let since = now - chrono::Duration::seconds(seconds.max(0));
    let history = store
        .history_window(tag.id, since)
        .into_iter()
        .map(|entry| HistoryPoint {
            timestamp: entry.timestamp,
            value: value_to_json(&entry.value),
        })
        .collect();
    HistoryPayload { history }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Channel, DataType, HistoryEntry, Protocol, WordOrder};
    use crate::store::{NewDevice, NewTag};
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
                alias: "level".into(),
                description: String::new(),
                channel: Channel::HoldingRegister,
                data_type: DataType::Int16,
                address: 0,
                unit_id: 1,
                read_amount: 1,
                history_interval: Duration::from_secs(1),
                history_retention: Duration::from_secs(3600),
                active: true,
            })
            .unwrap();
        (dir, store, tag)
    }

    #[test]
    fn json_value_roundtrip() {
        for json in [
            serde_json::json!(true),
            serde_json::json!(-5),
            serde_json::json!(3.5),
            serde_json::json!("text"),
            serde_json::json!([1, 2, 3]),
        ] {
            let value = value_from_json(&json).unwrap();
            assert_eq!(value_to_json(&value), json);
        }
        assert!(value_from_json(&serde_json::json!(null)).is_err());
        assert!(value_from_json(&serde_json::json!({"a": 1})).is_err());
    }

    #[test]
    fn value_payload_reports_age_and_alarm() {
        let (_dir, store, tag) = fixture();
        let cache = TagCache::new();
        let t0 = Utc::now();

        // Never read: value null, age "Infinity".
        let payload = tag_value_payload(&store, &cache, &tag, t0);
        assert_eq!(payload.value, serde_json::Value::Null);
        assert_eq!(payload.age_ms, serde_json::json!("Infinity"));
        assert!(payload.alarm.is_none());

        let tag = store.commit_poll(tag.id, Value::I64(42), t0).unwrap();
        cache.set(tag.id, Value::I64(42), t0);
        let now = t0 + chrono::Duration::milliseconds(120);
        let payload = tag_value_payload(&store, &cache, &tag, now);
        assert_eq!(payload.value, serde_json::json!(42));
        assert_eq!(payload.time, Some(t0));
        assert_eq!(payload.age_ms, serde_json::json!(120));
    }

    #[test]
    fn batch_payload_skips_unknown_but_404s_when_all_unknown() {
        let (_dir, store, tag) = fixture();
        let cache = TagCache::new();
        let now = Utc::now();

        let result =
            batch_value_payloads(&store, &cache, &[tag.external_id, Uuid::new_v4()], now)
                .unwrap();
        assert_eq!(result.len(), 1);

        let err = batch_value_payloads(&store, &cache, &[Uuid::new_v4()], now).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        let err = batch_value_payloads(&store, &cache, &[], now).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn history_is_windowed_and_ordered() {
        let (_dir, store, tag) = fixture();
        let now = Utc::now();
        let samples = vec![
            (
                tag.id,
                HistoryEntry {
                    timestamp: now - chrono::Duration::seconds(90),
                    value: Value::I64(1),
                },
            ),
            (
                tag.id,
                HistoryEntry {
                    timestamp: now - chrono::Duration::seconds(30),
                    value: Value::I64(2),
                },
            ),
            (
                tag.id,
                HistoryEntry {
                    timestamp: now - chrono::Duration::seconds(5),
                    value: Value::I64(3),
                },
            ),
        ];
        store.record_history(samples).unwrap();

        let payload = history_payload(&store, &tag, 60, now);
        assert_eq!(payload.history.len(), 2);
        assert!(payload.history[0].timestamp < payload.history[1].timestamp);
        assert_eq!(payload.history[1].value, serde_json::json!(3));
    }
}
