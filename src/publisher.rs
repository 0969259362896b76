// Copyright (c) 2025 - Cowboy AI, Inc.

//! Event publisher
//!
//! Serializes a domain event and hands it to the broker. `publish` is
//! fire-and-forget: it returns once the message is sent, without waiting for
//! the broker to store it or for any consumer. `publish_confirmed` waits for
//! the broker's storage acknowledgment when a caller wants that guarantee.
//!
//! Nothing is retried. A failure is returned to the caller, which decides
//! whether its own request fails or proceeds without the event.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::ConnectionManager;
use crate::errors::MessagingResult;
use crate::events::{ChildEvent, IntegrationEvent, ParentEvent};
use crate::queues::{QueueSpec, CHILD_EVENTS, PARENT_EVENTS};
use crate::transport::Broker;

/// Publishes integration events over its own broker connection
pub struct EventPublisher {
    connections: ConnectionManager,
}

impl EventPublisher {
    /// Publisher whose connection declares `queue` on every (re)connect
    pub fn new(broker: Arc<dyn Broker>, queue: QueueSpec) -> Self {
        Self {
            connections: ConnectionManager::new(broker, queue),
        }
    }

    /// Send `event` to `queue` without waiting for confirmation
    pub async fn publish<E>(&self, queue: &str, event: &E) -> MessagingResult<()>
    where
        E: IntegrationEvent,
    {
        let payload = event.to_payload()?;
        let channel = self.connections.ensure_connected().await?;

        channel.publish(queue, payload).await.inspect_err(|e| {
            warn!(queue = %queue, event_type = %event.event_type(), error = %e, "Publish failed");
        })?;

        debug!(
            queue = %queue,
            event_type = %event.event_type(),
            entity_id = %event.entity_id(),
            "Published event"
        );
        Ok(())
    }

    /// Send `event` to `queue` and wait until the broker has stored it
    pub async fn publish_confirmed<E>(&self, queue: &str, event: &E) -> MessagingResult<()>
    where
        E: IntegrationEvent,
    {
        let payload = event.to_payload()?;
        let channel = self.connections.ensure_connected().await?;

        channel.publish_confirmed(queue, payload).await?;

        debug!(
            queue = %queue,
            event_type = %event.event_type(),
            entity_id = %event.entity_id(),
            "Published event with confirmation"
        );
        Ok(())
    }

    /// Announce a new parent on `parent.events`
    pub async fn publish_parent_created(
        &self,
        parent_id: Uuid,
        full_name: &str,
    ) -> MessagingResult<()> {
        self.publish(PARENT_EVENTS, &ParentEvent::created(parent_id, full_name))
            .await
    }

    /// Announce a new child on `child.events`
    pub async fn publish_child_created(
        &self,
        child_id: Uuid,
        parent_id: Uuid,
        full_name: &str,
    ) -> MessagingResult<()> {
        self.publish(
            CHILD_EVENTS,
            &ChildEvent::created(child_id, parent_id, full_name),
        )
        .await
    }

    /// Close the publisher's connection
    pub async fn close(&self) {
        self.connections.close().await;
    }
}
