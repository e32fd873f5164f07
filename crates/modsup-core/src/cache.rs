//! Process-wide current-value cache.
//!
//! A read-biased projection of `Tag.current_value` / `last_updated`: the
//! poll engine is the single writer for any given tag, HTTP handlers and
//! other readers take the read lock. The value/timestamp pair is stored as
//! one entry, so readers never observe a torn pair. Stale reads are fine.

use crate::model::{Tag, TagId, Value};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct TagCache {
    inner: RwLock<HashMap<TagId, CachedValue>>,
}

impl TagCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Warms the cache from persisted tags on startup.
    pub fn load<'a>(&self, tags: impl IntoIterator<Item = &'a Tag>) {
        let mut map = self.inner.write().unwrap();
        for tag in tags {
            if let (Some(value), Some(at)) = (&tag.current_value, tag.last_updated) {
                map.insert(
                    tag.id,
                    CachedValue {
                        value: value.clone(),
                        updated_at: at,
                    },
                );
            }
        }
    }

    pub fn get(&self, tag_id: TagId) -> Option<CachedValue> {
        self.inner.read().unwrap().get(&tag_id).cloned()
    }

    pub fn set(&self, tag_id: TagId, value: Value, updated_at: DateTime<Utc>) {
        self.inner
            .write()
            .unwrap()
            .insert(tag_id, CachedValue { value, updated_at });
    }

    /// Drops a tag's entry (tag deleted or deactivated).
    pub fn remove(&self, tag_id: TagId) {
        self.inner.write().unwrap().remove(&tag_id);
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_returns_coherent_pair() {
        let cache = TagCache::new();
        let at = Utc::now();
        cache.set(7, Value::I64(42), at);

        let cached = cache.get(7).unwrap();
        assert_eq!(cached.value, Value::I64(42));
        assert_eq!(cached.updated_at, at);
        assert!(cache.get(8).is_none());

        cache.remove(7);
        assert!(cache.is_empty());
    }
}
