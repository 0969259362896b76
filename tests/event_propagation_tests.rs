// Copyright (c) 2025 - Cowboy AI, Inc.
//! Cross-service event propagation over the in-memory broker
//!
//! User Story: As the Booking service, I need to learn about parents created
//! in the Parent service without calling it.
//!
//! ```mermaid
//! graph LR
//!     Parent[Parent service] -->|publish ParentCreated| Q[parent.events]
//!     Q -->|deliver| Consumer[Booking consumer]
//!     Consumer -->|record| Cache[Derived-state cache]
//!     Handlers[Booking request handlers] -->|read| Cache
//! ```

mod fixtures;

use std::sync::Arc;

use fixtures::*;
use growth_tracking_events::{
    event_types, CachingEventHandler, ChildEvent, ConsumerConfig, ConsumerState, EventCache,
    EventConsumer, EventPublisher, InMemoryBroker, ParentEvent, QueueSpec, CHILD_EVENTS,
    PARENT_EVENTS,
};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_parent_created_reaches_booking_cache() {
    // Given a booking consumer subscribed to parent.events
    let broker = InMemoryBroker::new();
    let (consumer, cache) = booking_consumer(&broker, booking_config());
    let consumer = consumer.spawn();
    consumer.wait_for(ConsumerState::Subscribed).await.unwrap();

    // When the Parent service publishes ParentCreated for Jane Doe
    let publisher = parent_publisher(&broker);
    publisher
        .publish_parent_created(parse_uuid(JANE_PARENT_ID), "Jane Doe")
        .await
        .unwrap();

    // Then the latest known parent id is Jane's
    eventually("parent cached", || {
        cache.latest_id(event_types::PARENT_CREATED).is_some()
    })
    .await;
    assert_eq!(
        cache
            .latest_id(event_types::PARENT_CREATED)
            .map(|id| id.to_string()),
        Some(JANE_PARENT_ID.to_string())
    );

    consumer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_round_trip_entity_entry_matches_payload() {
    let broker = InMemoryBroker::new();
    let (consumer, cache) = booking_consumer(&broker, booking_config());
    let consumer = consumer.spawn();
    consumer.wait_for(ConsumerState::Subscribed).await.unwrap();

    let event = ParentEvent::created(parse_uuid(JANE_PARENT_ID), "Jane Doe");
    parent_publisher(&broker)
        .publish(PARENT_EVENTS, &event)
        .await
        .unwrap();

    eventually("entity cached", || {
        cache
            .entity(event_types::PARENT_CREATED, event.parent_id)
            .is_some()
    })
    .await;

    let cached = cache
        .entity(event_types::PARENT_CREATED, event.parent_id)
        .unwrap();
    assert_eq!(*cached, event);

    consumer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_last_write_wins() {
    let broker = InMemoryBroker::new();
    let (consumer, cache) = booking_consumer(&broker, booking_config());
    let consumer = consumer.spawn();
    consumer.wait_for(ConsumerState::Subscribed).await.unwrap();

    let publisher = parent_publisher(&broker);
    publisher
        .publish_parent_created(parse_uuid(JANE_PARENT_ID), "Jane Doe")
        .await
        .unwrap();
    publisher
        .publish_parent_created(parse_uuid(JOHN_PARENT_ID), "John Doe")
        .await
        .unwrap();

    eventually("both applied", || consumer.stats().applied == 2).await;

    let latest = cache.latest(event_types::PARENT_CREATED).unwrap();
    assert_eq!(latest.parent_id, parse_uuid(JOHN_PARENT_ID));
    assert_eq!(latest.full_name.as_deref(), Some("John Doe"));

    consumer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unrecognized_event_type_leaves_cache_unchanged() {
    let broker = InMemoryBroker::new();
    let (consumer, cache) = booking_consumer(&broker, booking_config());
    let consumer = consumer.spawn();
    consumer.wait_for(ConsumerState::Subscribed).await.unwrap();

    let updated = ParentEvent::updated(parse_uuid(JANE_PARENT_ID), "Jane Smith");
    parent_publisher(&broker)
        .publish(PARENT_EVENTS, &updated)
        .await
        .unwrap();

    eventually("event ignored", || consumer.stats().ignored == 1).await;
    assert!(cache.is_empty());
    assert_eq!(consumer.stats().failed, 0);
    assert_eq!(consumer.state(), ConsumerState::Subscribed);

    consumer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_payload_with_extra_fields_is_applied() {
    let broker = InMemoryBroker::new();
    let (consumer, cache) = booking_consumer(&broker, booking_config());
    let consumer = consumer.spawn();
    consumer.wait_for(ConsumerState::Subscribed).await.unwrap();

    let payload = format!(
        r#"{{"EventType":"ParentCreated","ParentId":"{JANE_PARENT_ID}","FullName":"Jane Doe","PhoneNumber":"555-0100"}}"#
    );
    broker.inject(PARENT_EVENTS, payload).unwrap();

    eventually("applied", || consumer.stats().applied == 1).await;
    assert_eq!(
        cache.latest_id(event_types::PARENT_CREATED),
        Some(parse_uuid(JANE_PARENT_ID))
    );

    consumer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_child_created_reaches_doctor_cache() {
    // Given a doctor-side consumer on child.events
    let broker = InMemoryBroker::new();
    let children: EventCache<ChildEvent> = EventCache::new();
    let handler = CachingEventHandler::new(children.clone(), [event_types::CHILD_CREATED]);
    let consumer = EventConsumer::new(
        Arc::new(broker.clone()),
        ConsumerConfig::new(QueueSpec::new(CHILD_EVENTS), "doctor-service"),
        Arc::new(handler),
    )
    .spawn();
    consumer.wait_for(ConsumerState::Subscribed).await.unwrap();

    // When the Child service announces Sam under Jane
    let publisher = EventPublisher::new(Arc::new(broker.clone()), QueueSpec::new(CHILD_EVENTS));
    publisher
        .publish_child_created(parse_uuid(SAM_CHILD_ID), parse_uuid(JANE_PARENT_ID), "Sam Doe")
        .await
        .unwrap();

    // Then the child is known with its parent
    eventually("child cached", || !children.is_empty()).await;
    let child = children
        .entity(event_types::CHILD_CREATED, parse_uuid(SAM_CHILD_ID))
        .unwrap();
    assert_eq!(child.parent_id, parse_uuid(JANE_PARENT_ID));

    consumer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_events_published_before_subscription_are_delivered() {
    let broker = InMemoryBroker::new();

    // The publisher declares the queue, so the message waits for a consumer
    parent_publisher(&broker)
        .publish_parent_created(parse_uuid(JANE_PARENT_ID), "Jane Doe")
        .await
        .unwrap();

    let (consumer, cache) = booking_consumer(&broker, booking_config());
    let consumer = consumer.spawn();

    eventually("backlog applied", || !cache.is_empty()).await;
    consumer.shutdown().await.unwrap();
}
