//! Inter-service event propagation for the growth tracking services
//!
//! The Parent, Child, Doctor and Booking services never call each other
//! synchronously. When an entity changes in one service it publishes a
//! domain event to a named queue; interested services consume the queue in
//! a background worker and keep a local derived-state cache of what they
//! learned.
//!
//! ```text
//! Parent service ── EventPublisher ──> parent.events ──> EventConsumer ── Booking service
//!                                                             │
//!                                                             v
//!                                                   DerivedStateCache <── request handlers
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use growth_tracking_events::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = Arc::new(NatsBroker::new(BrokerConfig::from_env()?));
//!     let parents: EventCache<ParentEvent> = EventCache::new();
//!
//!     let handler = CachingEventHandler::new(parents.clone(), [event_types::PARENT_CREATED]);
//!     let config = ConsumerConfig::new(QueueSpec::new(PARENT_EVENTS), "booking-service");
//!     let consumer = EventConsumer::new(broker, config, Arc::new(handler)).spawn();
//!
//!     // request handlers read `parents.latest_id(event_types::PARENT_CREATED)`
//!
//!     consumer.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod connection;
pub mod consumer;
pub mod errors;
pub mod events;
pub mod memory;
pub mod nats;
pub mod publisher;
pub mod queues;
pub mod transport;

// Re-export commonly used types
pub use cache::{CacheKey, DerivedStateCache, EventCache};
pub use config::{BrokerConfig, ConsumerConfig, FailurePolicy};
pub use connection::ConnectionManager;
pub use consumer::{
    CachingEventHandler, ConsumerHandle, ConsumerState, ConsumerStats, EventConsumer,
    EventHandler, HandleOutcome,
};
pub use errors::{MessagingError, MessagingResult};
pub use events::{event_types, ChildEvent, IntegrationEvent, ParentEvent};
pub use memory::InMemoryBroker;
pub use nats::NatsBroker;
pub use publisher::EventPublisher;
pub use queues::{QueueSpec, CHILD_EVENTS, PARENT_EVENTS};
pub use transport::{Broker, Channel, Delivery};

/// Prelude module with commonly used imports
pub mod prelude {
    pub use crate::cache::{CacheKey, DerivedStateCache, EventCache};
    pub use crate::config::{BrokerConfig, ConsumerConfig, FailurePolicy};
    pub use crate::consumer::{CachingEventHandler, ConsumerState, EventConsumer, EventHandler};
    pub use crate::errors::{MessagingError, MessagingResult};
    pub use crate::events::{event_types, ChildEvent, IntegrationEvent, ParentEvent};
    pub use crate::memory::InMemoryBroker;
    pub use crate::nats::NatsBroker;
    pub use crate::publisher::EventPublisher;
    pub use crate::queues::{QueueSpec, CHILD_EVENTS, PARENT_EVENTS};
}
