// Copyright (c) 2025 - Cowboy AI, Inc.
//! Test Fixtures for growth-tracking-events
//!
//! Deterministic identifiers and wiring helpers shared by the integration
//! suites. All identifiers are fixed constants so failures are reproducible.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use growth_tracking_events::{
    event_types, CachingEventHandler, ConsumerConfig, EventCache, EventConsumer, EventPublisher,
    InMemoryBroker, ParentEvent, QueueSpec, PARENT_EVENTS,
};
use uuid::Uuid;

pub const JANE_PARENT_ID: &str = "11111111-1111-1111-1111-111111111111";
pub const JOHN_PARENT_ID: &str = "22222222-2222-2222-2222-222222222222";
pub const SAM_CHILD_ID: &str = "33333333-3333-3333-3333-333333333333";

/// Parse a fixed UUID from a constant string
pub fn parse_uuid(s: &str) -> Uuid {
    Uuid::parse_str(s).expect("Invalid UUID in test fixture")
}

/// Raw ParentCreated payload exactly as the Parent service sends it
pub fn parent_created_payload(parent_id: &str, full_name: &str) -> String {
    format!(r#"{{"EventType":"ParentCreated","ParentId":"{parent_id}","FullName":"{full_name}"}}"#)
}

/// Consumer config on parent.events with a booking-side consumer name
pub fn booking_config() -> ConsumerConfig {
    ConsumerConfig::new(QueueSpec::new(PARENT_EVENTS), "booking-service")
}

/// Booking-side consumer recording ParentCreated events into a fresh cache
pub fn booking_consumer(
    broker: &InMemoryBroker,
    config: ConsumerConfig,
) -> (EventConsumer, EventCache<ParentEvent>) {
    let cache = EventCache::new();
    let handler = CachingEventHandler::new(cache.clone(), [event_types::PARENT_CREATED]);
    let consumer = EventConsumer::new(Arc::new(broker.clone()), config, Arc::new(handler));
    (consumer, cache)
}

/// Parent-side publisher on parent.events
pub fn parent_publisher(broker: &InMemoryBroker) -> EventPublisher {
    EventPublisher::new(Arc::new(broker.clone()), QueueSpec::new(PARENT_EVENTS))
}

/// Poll `check` until it holds, panicking after a generous bound
pub async fn eventually<F>(what: &str, check: F)
where
    F: Fn() -> bool,
{
    for _ in 0..3_000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held: {what}");
}
