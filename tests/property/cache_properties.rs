// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for the Derived-State Cache
//!
//! The cache is last-write-wins per key: after any sequence of writes,
//! each key holds the value written to it last.

use std::collections::HashMap;

use growth_tracking_events::{event_types, DerivedStateCache, EventCache, ParentEvent};
use proptest::prelude::*;
use uuid::Uuid;

fn writes() -> impl Strategy<Value = Vec<(u8, u32)>> {
    prop::collection::vec((0u8..8, any::<u32>()), 0..64)
}

fn parent_events() -> impl Strategy<Value = Vec<ParentEvent>> {
    let event = (any::<u128>(), "[A-Z][a-z]{1,8} [A-Z][a-z]{1,8}", any::<bool>()).prop_map(
        |(id, name, created)| {
            let id = Uuid::from_u128(id);
            if created {
                ParentEvent::created(id, name)
            } else {
                ParentEvent::updated(id, name)
            }
        },
    );
    prop::collection::vec(event, 1..32)
}

proptest! {
    /// Property: the cache agrees with a map fed the same writes
    #[test]
    fn prop_last_write_wins_per_key(writes in writes()) {
        let cache = DerivedStateCache::new();
        let mut model = HashMap::new();

        for (key, value) in &writes {
            cache.set(*key, *value);
            model.insert(*key, *value);
        }

        prop_assert_eq!(cache.len(), model.len());
        for (key, value) in &model {
            prop_assert_eq!(cache.get(key).map(|v| *v), Some(*value));
        }
    }

    /// Property: `latest` for a type is the last event of that type recorded
    #[test]
    fn prop_latest_tracks_last_event_per_type(events in parent_events()) {
        let cache = EventCache::new();
        for event in &events {
            cache.record(event.clone());
        }

        for event_type in [event_types::PARENT_CREATED, event_types::PARENT_UPDATED] {
            let expected = events.iter().rev().find(|e| e.event_type == event_type);
            prop_assert_eq!(
                cache.latest(event_type).map(|e| (*e).clone()),
                expected.cloned()
            );
        }
    }

    /// Property: every recorded entity is retrievable with its last state
    #[test]
    fn prop_entity_lookup_returns_last_recorded(events in parent_events()) {
        let cache = EventCache::new();
        for event in &events {
            cache.record(event.clone());
        }

        for event in &events {
            let last = events
                .iter()
                .rev()
                .find(|e| e.event_type == event.event_type && e.parent_id == event.parent_id);
            prop_assert_eq!(
                cache.entity(&event.event_type, event.parent_id).map(|e| (*e).clone()),
                last.cloned()
            );
        }
    }
}
