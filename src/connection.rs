// Copyright (c) 2025 - Cowboy AI, Inc.

//! Broker connection manager
//!
//! Owns the channel to the broker for one publisher or consumer. Callers
//! borrow the channel per operation through [`ConnectionManager::ensure_connected`],
//! which reuses the current channel while it is open and otherwise opens a
//! new one and declares the bound queue on it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::MessagingResult;
use crate::queues::QueueSpec;
use crate::transport::{Broker, Channel};

pub struct ConnectionManager {
    broker: Arc<dyn Broker>,
    queue: QueueSpec,
    channel: Mutex<Option<Arc<dyn Channel>>>,
    connects: AtomicU64,
}

impl ConnectionManager {
    /// Manager bound to `queue`; nothing is opened until first use
    pub fn new(broker: Arc<dyn Broker>, queue: QueueSpec) -> Self {
        Self {
            broker,
            queue,
            channel: Mutex::new(None),
            connects: AtomicU64::new(0),
        }
    }

    pub fn queue(&self) -> &QueueSpec {
        &self.queue
    }

    /// A usable channel with the bound queue declared
    ///
    /// Connection and declaration failures are returned to the caller;
    /// backoff is the caller's concern.
    pub async fn ensure_connected(&self) -> MessagingResult<Arc<dyn Channel>> {
        let mut current = self.channel.lock().await;

        if let Some(channel) = current.as_ref() {
            if channel.is_open() {
                return Ok(Arc::clone(channel));
            }
            warn!(queue = %self.queue, "Broker channel no longer open, reconnecting");
            if let Err(e) = channel.close().await {
                debug!(error = %e, "Ignoring error while discarding stale channel");
            }
            *current = None;
        }

        let channel = self.broker.connect().await?;
        channel.declare_queue(&self.queue).await?;

        let connects = self.connects.fetch_add(1, Ordering::SeqCst) + 1;
        info!(queue = %self.queue, connects, "Broker channel ready");

        *current = Some(Arc::clone(&channel));
        Ok(channel)
    }

    /// Whether a channel is held and still open
    pub async fn is_connected(&self) -> bool {
        self.channel
            .lock()
            .await
            .as_ref()
            .is_some_and(|channel| channel.is_open())
    }

    /// Number of channels opened so far
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Close the held channel; errors are logged, not returned
    pub async fn close(&self) {
        if let Some(channel) = self.channel.lock().await.take() {
            match channel.close().await {
                Ok(()) => debug!(queue = %self.queue, "Broker channel closed"),
                Err(e) => debug!(queue = %self.queue, error = %e, "Ignoring error on close"),
            }
        }
    }
}
