// Copyright (c) 2025 - Cowboy AI, Inc.

//! Derived-state cache
//!
//! A process-local projection of state owned by another service, learned
//! only through its events. One instance is built at process start and
//! handed to both the consumer (writer) and the request handlers (readers).
//!
//! Values are stored behind `Arc` and replaced wholesale on every write, so
//! a reader either sees the previous value or the new one, never a mix.
//! Writes are last-write-wins per key; there is no expiry.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::events::IntegrationEvent;

/// Concurrent last-write-wins map
pub struct DerivedStateCache<K, V>
where
    K: Eq + Hash,
{
    entries: Arc<DashMap<K, Arc<V>>>,
}

impl<K, V> DerivedStateCache<K, V>
where
    K: Eq + Hash,
{
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Replace the value stored under `key`
    pub fn set(&self, key: K, value: V) {
        self.entries.insert(key, Arc::new(value));
    }

    /// Most recent value for `key`, or `None` if nothing was observed
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Drop the value for `key`, returning it
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl<K, V> Clone for DerivedStateCache<K, V>
where
    K: Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K, V> Default for DerivedStateCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for DerivedStateCache<K, V>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedStateCache")
            .field("len", &self.entries.len())
            .finish()
    }
}

/// Key under which an event-derived value is cached
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Latest event of this type, whatever entity it concerned
    Latest(String),
    /// Latest event of this type for one entity
    Entity { event_type: String, id: Uuid },
}

impl CacheKey {
    pub fn latest(event_type: impl Into<String>) -> Self {
        CacheKey::Latest(event_type.into())
    }

    pub fn entity(event_type: impl Into<String>, id: Uuid) -> Self {
        CacheKey::Entity {
            event_type: event_type.into(),
            id,
        }
    }
}

/// Cache of the latest events observed, keyed by type and by entity
pub type EventCache<E> = DerivedStateCache<CacheKey, E>;

impl<E> DerivedStateCache<CacheKey, E>
where
    E: IntegrationEvent,
{
    /// Upsert `event` as both the latest of its type and the latest for its entity
    ///
    /// Applying the same event twice leaves the cache unchanged.
    pub fn record(&self, event: E) {
        let event_type = event.event_type().to_string();
        let id = event.entity_id();
        let event = Arc::new(event);
        self.entries
            .insert(CacheKey::entity(event_type.clone(), id), Arc::clone(&event));
        self.entries.insert(CacheKey::Latest(event_type), event);
    }

    /// Latest event of `event_type`
    pub fn latest(&self, event_type: &str) -> Option<Arc<E>> {
        self.get(&CacheKey::latest(event_type))
    }

    /// Latest event of `event_type` for entity `id`
    pub fn entity(&self, event_type: &str, id: Uuid) -> Option<Arc<E>> {
        self.get(&CacheKey::entity(event_type, id))
    }

    /// Entity id carried by the latest event of `event_type`
    pub fn latest_id(&self, event_type: &str) -> Option<Uuid> {
        self.latest(event_type).map(|event| event.entity_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{event_types, ParentEvent};

    #[test]
    fn test_empty_cache_reports_absence() {
        let cache: DerivedStateCache<&str, u32> = DerivedStateCache::new();
        assert!(cache.get(&"missing").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_set_overwrites() {
        let cache = DerivedStateCache::new();
        cache.set("parent", 1);
        cache.set("parent", 2);
        assert_eq!(cache.get(&"parent").as_deref(), Some(&2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clones_share_entries() {
        let cache = DerivedStateCache::new();
        let reader = cache.clone();
        cache.set(1u8, "x".to_string());
        assert_eq!(reader.get(&1).as_deref().map(String::as_str), Some("x"));
        assert_eq!(reader.remove(&1).as_deref().map(String::as_str), Some("x"));
        assert!(!cache.contains(&1));
    }

    #[test]
    fn test_reader_keeps_old_value_after_swap() {
        let cache = DerivedStateCache::new();
        cache.set("k", vec![1, 2, 3]);
        let held = cache.get(&"k").unwrap();
        cache.set("k", vec![9]);
        assert_eq!(*held, vec![1, 2, 3]);
        assert_eq!(*cache.get(&"k").unwrap(), vec![9]);
    }

    #[test]
    fn test_record_is_idempotent() {
        let cache: EventCache<ParentEvent> = EventCache::new();
        let event = ParentEvent::created(Uuid::now_v7(), "Jane Doe");
        cache.record(event.clone());
        cache.record(event.clone());

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.latest_id(event_types::PARENT_CREATED), Some(event.parent_id));
        assert_eq!(
            cache.entity(event_types::PARENT_CREATED, event.parent_id).as_deref(),
            Some(&event)
        );
    }

    #[test]
    fn test_concurrent_writers_and_readers() {
        let cache: DerivedStateCache<u8, (u64, u64)> = DerivedStateCache::new();
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..1_000u64 {
                        cache.set(0, (t * 10_000 + i, t * 10_000 + i));
                        if let Some(pair) = cache.get(&0) {
                            assert_eq!(pair.0, pair.1);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 1);
    }
}
