//! Local store: the in-memory mirror of the watched collection.
//!
//! # Access pattern
//!
//! Exactly one writer (the reflector) and any number of readers. The handle
//! is cheap to clone; every clone shares the same map. Reads hand out owned
//! copies so a reader never observes a half-applied change.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::{ChangeEvent, ObjectKey, ObjectRecord};

/// Thread-safe keyed cache of the last known state of every live object.
#[derive(Debug, Clone, Default)]
pub struct Store {
    entries: Arc<RwLock<HashMap<ObjectKey, ObjectRecord>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store by folding `events` over an empty one.
    pub fn replay<'a>(events: impl IntoIterator<Item = &'a ChangeEvent>) -> Self {
        let store = Self::new();
        for event in events {
            store.apply(event);
        }
        store
    }

    /// Insert or replace the record for `key`, returning the prior record.
    pub fn upsert(&self, key: ObjectKey, record: ObjectRecord) -> Option<ObjectRecord> {
        self.write().insert(key, record)
    }

    /// Remove the record for `key`, returning it if present.
    pub fn remove(&self, key: &ObjectKey) -> Option<ObjectRecord> {
        self.write().remove(key)
    }

    pub fn get(&self, key: &ObjectKey) -> Option<ObjectRecord> {
        self.read().get(key).cloned()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<ObjectKey> {
        let mut keys: Vec<ObjectKey> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Point-in-time copy of every entry, sorted by key.
    pub fn snapshot(&self) -> Vec<(ObjectKey, ObjectRecord)> {
        let mut entries: Vec<(ObjectKey, ObjectRecord)> = self
            .read()
            .iter()
            .map(|(key, record)| (key.clone(), record.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Apply one change event: upsert on add/update, remove on delete.
    pub fn apply(&self, event: &ChangeEvent) {
        match event {
            ChangeEvent::Added(record) | ChangeEvent::Modified { new: record, .. } => {
                self.upsert(record.key().clone(), record.clone());
            }
            ChangeEvent::Deleted(record) => {
                self.remove(record.key());
            }
        }
    }

    // A panicking writer cannot leave the map half-updated: every mutation is
    // a single HashMap call, so a poisoned lock is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<ObjectKey, ObjectRecord>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ObjectKey, ObjectRecord>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(ns: &str, name: &str, rv: &str) -> ObjectRecord {
        ObjectRecord::from_value(json!({
            "metadata": {"namespace": ns, "name": name, "resourceVersion": rv}
        }))
        .expect("record")
    }

    #[test]
    fn upsert_returns_prior() {
        let store = Store::new();
        let a1 = record("default", "a", "1");
        let a2 = record("default", "a", "2");
        assert!(store.upsert(a1.key().clone(), a1.clone()).is_none());
        assert_eq!(store.upsert(a2.key().clone(), a2.clone()), Some(a1));
        assert_eq!(store.get(a2.key()), Some(a2));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_missing_is_none() {
        let store = Store::new();
        assert!(store.remove(&ObjectKey::new("default", "ghost")).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn snapshot_is_sorted_and_detached() {
        let store = Store::new();
        for (ns, name) in [("kube-system", "dns"), ("default", "b"), ("default", "a")] {
            let r = record(ns, name, "1");
            store.upsert(r.key().clone(), r);
        }
        let snapshot = store.snapshot();
        let keys: Vec<String> = snapshot.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, vec!["default/a", "default/b", "kube-system/dns"]);

        store.remove(&ObjectKey::new("default", "a"));
        assert_eq!(snapshot.len(), 3, "snapshot must not track later writes");
        assert_eq!(store.keys().len(), 2);
    }

    #[test]
    fn clones_share_state() {
        let writer = Store::new();
        let reader = writer.clone();
        let r = record("default", "a", "1");
        writer.upsert(r.key().clone(), r.clone());
        assert!(reader.contains(r.key()));
    }

    #[test]
    fn apply_follows_event_kind() {
        let store = Store::new();
        let v1 = record("default", "a", "1");
        let v2 = record("default", "a", "2");
        store.apply(&ChangeEvent::Added(v1.clone()));
        store.apply(&ChangeEvent::Modified { old: v1, new: v2.clone() });
        assert_eq!(store.get(v2.key()), Some(v2.clone()));
        store.apply(&ChangeEvent::Deleted(v2));
        assert!(store.is_empty());
    }
}
