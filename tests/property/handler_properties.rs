// Copyright (c) 2025 - Cowboy AI, Inc.
//! Property-Based Tests for the Caching Event Handler
//!
//! Whatever arrives on the wire, the handler returns a result instead of
//! panicking, and only a recognized event changes the cache.

use futures::executor::block_on;
use growth_tracking_events::{
    event_types, CachingEventHandler, EventCache, EventHandler, HandleOutcome, IntegrationEvent,
    ParentEvent,
};
use proptest::prelude::*;
use uuid::Uuid;

fn booking_handler() -> CachingEventHandler<ParentEvent> {
    CachingEventHandler::new(EventCache::new(), [event_types::PARENT_CREATED])
}

proptest! {
    /// Property: arbitrary bytes never panic the handler
    #[test]
    fn prop_arbitrary_bytes_are_handled(payload in prop::collection::vec(any::<u8>(), 0..256)) {
        let handler = booking_handler();

        match block_on(handler.handle(&payload)) {
            Ok(HandleOutcome::Applied) => prop_assert_eq!(handler.cache().len(), 2),
            Ok(HandleOutcome::Ignored) => prop_assert!(handler.cache().is_empty()),
            Err(e) => {
                prop_assert!(e.is_poison(), "unexpected error kind: {}", e);
                prop_assert!(handler.cache().is_empty());
            }
        }
    }

    /// Property: only accepted event types reach the cache
    #[test]
    fn prop_only_accepted_types_are_cached(
        event_type in prop_oneof![
            Just(event_types::PARENT_CREATED.to_string()),
            Just(event_types::PARENT_UPDATED.to_string()),
            "[A-Za-z]{1,16}",
        ],
        id in any::<u128>(),
    ) {
        let handler = booking_handler();
        let event = ParentEvent {
            event_type: event_type.clone(),
            parent_id: Uuid::from_u128(id),
            full_name: Some("Jane Doe".to_string()),
        };

        let outcome = block_on(handler.handle(&event.to_payload().unwrap())).unwrap();

        if event_type == event_types::PARENT_CREATED {
            prop_assert_eq!(outcome, HandleOutcome::Applied);
            prop_assert_eq!(handler.cache().latest_id(&event_type), Some(event.parent_id));
        } else {
            prop_assert_eq!(outcome, HandleOutcome::Ignored);
            prop_assert!(handler.cache().is_empty());
        }
    }
}
