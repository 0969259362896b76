// Copyright (c) 2025 - Cowboy AI, Inc.

//! Broker transport seams
//!
//! `Broker` opens channels; `Channel` is one live transport to the broker.
//! The connection manager, publisher and consumer only speak to these
//! traits, so the NATS binding and the in-memory broker are interchangeable.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;

use crate::errors::MessagingResult;
use crate::queues::QueueSpec;

/// Stream of inbound messages for one subscription
///
/// The stream ends when the underlying channel is closed.
pub type DeliveryStream = BoxStream<'static, MessagingResult<Delivery>>;

/// Opens channels to the broker
#[async_trait::async_trait]
pub trait Broker: Send + Sync {
    /// Open a new channel, failing with `MessagingError::Connection`
    async fn connect(&self) -> MessagingResult<Arc<dyn Channel>>;
}

/// A live transport to the broker
#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    /// Declare `queue`; repeating a declaration with the same parameters is a no-op
    async fn declare_queue(&self, queue: &QueueSpec) -> MessagingResult<()>;

    /// Hand a payload to the broker without waiting for it to be stored
    async fn publish(&self, queue: &str, payload: Bytes) -> MessagingResult<()>;

    /// Hand a payload to the broker and wait for its storage acknowledgment
    async fn publish_confirmed(&self, queue: &str, payload: Bytes) -> MessagingResult<()>;

    /// Register a subscription on a declared queue
    ///
    /// With `explicit_ack` unset every message counts as acknowledged on receipt.
    async fn consume(
        &self,
        queue: &QueueSpec,
        consumer_name: &str,
        explicit_ack: bool,
    ) -> MessagingResult<DeliveryStream>;

    /// Whether the channel can still be used
    fn is_open(&self) -> bool;

    /// Retire the channel; afterwards `is_open` is false and further use fails
    async fn close(&self) -> MessagingResult<()>;
}

/// Settles one delivery with the broker
#[async_trait::async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self) -> MessagingResult<()>;

    /// Ask for redelivery
    async fn nak(&self) -> MessagingResult<()>;

    /// Never redeliver
    async fn term(&self) -> MessagingResult<()>;
}

/// One inbound message
pub struct Delivery {
    payload: Bytes,
    acker: Option<Box<dyn Acker>>,
}

impl Delivery {
    /// A message already acknowledged on receipt
    pub fn new(payload: Bytes) -> Self {
        Self {
            payload,
            acker: None,
        }
    }

    /// A message awaiting an explicit acknowledgment
    pub fn with_acker(payload: Bytes, acker: Box<dyn Acker>) -> Self {
        Self {
            payload,
            acker: Some(acker),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Raw payload, for forwarding
    pub fn bytes(&self) -> Bytes {
        self.payload.clone()
    }

    pub fn needs_ack(&self) -> bool {
        self.acker.is_some()
    }

    /// Acknowledge; a no-op once settled or when auto-acknowledged
    pub async fn ack(&mut self) -> MessagingResult<()> {
        match self.acker.take() {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }

    pub async fn nak(&mut self) -> MessagingResult<()> {
        match self.acker.take() {
            Some(acker) => acker.nak().await,
            None => Ok(()),
        }
    }

    pub async fn term(&mut self) -> MessagingResult<()> {
        match self.acker.take() {
            Some(acker) => acker.term().await,
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("payload_size", &self.payload.len())
            .field("needs_ack", &self.acker.is_some())
            .finish()
    }
}
