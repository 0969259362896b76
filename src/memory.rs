// Copyright (c) 2025 - Cowboy AI, Inc.

//! In-process broker
//!
//! Queues live in memory and are shared by every channel opened from the
//! same [`InMemoryBroker`]. Suitable for tests and single-process
//! development; separate processes need the NATS binding.
//!
//! Failure injection:
//! - [`InMemoryBroker::set_reachable`] makes connects fail until restored
//! - [`InMemoryBroker::refuse_next_connects`] fails the next N connects
//! - [`InMemoryBroker::sever`] closes every open channel, ending their subscriptions

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::{MessagingError, MessagingResult};
use crate::queues::QueueSpec;
use crate::transport::{Acker, Broker, Channel, Delivery, DeliveryStream};

/// Acknowledgment counters across all channels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckCounts {
    pub acked: u64,
    pub nacked: u64,
    pub termed: u64,
}

struct MemoryQueue {
    spec: QueueSpec,
    sender: mpsc::UnboundedSender<Bytes>,
    receiver: Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

impl MemoryQueue {
    fn new(spec: QueueSpec) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            spec,
            sender,
            receiver: Mutex::new(receiver),
        }
    }
}

#[derive(Default)]
struct BrokerState {
    queues: DashMap<String, Arc<MemoryQueue>>,
    channels: Mutex<Vec<Weak<MemoryChannel>>>,
    connect_attempts: Mutex<Vec<Instant>>,
    unreachable: AtomicBool,
    refuse_next: AtomicUsize,
    unroutable: AtomicU64,
    acked: AtomicU64,
    nacked: AtomicU64,
    termed: AtomicU64,
}

/// Process-local broker
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// When unreachable every connect fails with a connection error
    pub fn set_reachable(&self, reachable: bool) {
        self.state.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Fail the next `count` connects
    pub fn refuse_next_connects(&self, count: usize) {
        self.state.refuse_next.store(count, Ordering::SeqCst);
    }

    /// Close every open channel, as a broker restart would
    pub async fn sever(&self) {
        let mut channels = self.state.channels.lock().await;
        for channel in channels.drain(..).filter_map(|weak| weak.upgrade()) {
            channel.open.send_replace(false);
        }
        warn!("In-memory broker severed all channels");
    }

    /// Times at which connects were attempted, successful or not
    pub async fn connect_attempts(&self) -> Vec<Instant> {
        self.state.connect_attempts.lock().await.clone()
    }

    /// Number of channels currently open
    pub async fn open_channels(&self) -> usize {
        self.state
            .channels
            .lock()
            .await
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|channel| channel.is_open())
            .count()
    }

    pub fn is_declared(&self, queue: &str) -> bool {
        self.state.queues.contains_key(queue)
    }

    /// Messages published to queues nobody declared
    pub fn unroutable(&self) -> u64 {
        self.state.unroutable.load(Ordering::SeqCst)
    }

    pub fn ack_counts(&self) -> AckCounts {
        AckCounts {
            acked: self.state.acked.load(Ordering::SeqCst),
            nacked: self.state.nacked.load(Ordering::SeqCst),
            termed: self.state.termed.load(Ordering::SeqCst),
        }
    }

    /// Remove and return every message waiting on `queue`
    ///
    /// Waits for a subscription currently holding the queue to yield it.
    pub async fn drain(&self, queue: &str) -> Vec<Bytes> {
        let Some(queue) = self.queue(queue) else {
            return Vec::new();
        };
        let mut receiver = queue.receiver.lock().await;
        let mut drained = Vec::new();
        while let Ok(payload) = receiver.try_recv() {
            drained.push(payload);
        }
        drained
    }

    /// Put a raw payload on a queue, bypassing any channel
    pub fn inject(&self, queue: &str, payload: impl Into<Bytes>) -> MessagingResult<()> {
        let target = self.queue(queue).ok_or_else(|| MessagingError::Publish {
            queue: queue.to_string(),
            reason: "queue not declared".to_string(),
        })?;
        target
            .sender
            .send(payload.into())
            .map_err(|e| MessagingError::Publish {
                queue: queue.to_string(),
                reason: e.to_string(),
            })
    }

    fn queue(&self, name: &str) -> Option<Arc<MemoryQueue>> {
        self.state.queues.get(name).map(|entry| Arc::clone(entry.value()))
    }
}

#[async_trait::async_trait]
impl Broker for InMemoryBroker {
    async fn connect(&self) -> MessagingResult<Arc<dyn Channel>> {
        self.state.connect_attempts.lock().await.push(Instant::now());

        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(MessagingError::Connection(
                "in-memory broker unreachable".to_string(),
            ));
        }

        let refused = self
            .state
            .refuse_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(MessagingError::Connection(
                "in-memory broker refused connection".to_string(),
            ));
        }

        let (open, _) = watch::channel(true);
        let channel = Arc::new(MemoryChannel {
            broker: self.clone(),
            open,
        });

        let mut channels = self.state.channels.lock().await;
        channels.retain(|weak| weak.strong_count() > 0);
        channels.push(Arc::downgrade(&channel));

        debug!("In-memory channel opened");
        Ok(channel)
    }
}

/// Channel opened from an [`InMemoryBroker`]
pub struct MemoryChannel {
    broker: InMemoryBroker,
    open: watch::Sender<bool>,
}

impl MemoryChannel {
    fn ensure_open(&self) -> MessagingResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(MessagingError::ChannelClosed)
        }
    }
}

#[async_trait::async_trait]
impl Channel for MemoryChannel {
    async fn declare_queue(&self, queue: &QueueSpec) -> MessagingResult<()> {
        self.ensure_open()?;

        let existing = self
            .broker
            .state
            .queues
            .entry(queue.name.clone())
            .or_insert_with(|| Arc::new(MemoryQueue::new(queue.clone())))
            .clone();

        if existing.spec != *queue {
            return Err(MessagingError::Declare {
                queue: queue.name.clone(),
                reason: "queue already declared with different parameters".to_string(),
            });
        }
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: Bytes) -> MessagingResult<()> {
        self.ensure_open()?;

        match self.broker.queue(queue) {
            Some(target) => target.sender.send(payload).map_err(|e| MessagingError::Publish {
                queue: queue.to_string(),
                reason: e.to_string(),
            }),
            None => {
                self.broker.state.unroutable.fetch_add(1, Ordering::SeqCst);
                debug!(queue = %queue, "Dropped message for undeclared queue");
                Ok(())
            }
        }
    }

    async fn publish_confirmed(&self, queue: &str, payload: Bytes) -> MessagingResult<()> {
        self.ensure_open()?;

        if self.broker.queue(queue).is_none() {
            return Err(MessagingError::Publish {
                queue: queue.to_string(),
                reason: "no queue captures this name".to_string(),
            });
        }
        self.publish(queue, payload).await
    }

    async fn consume(
        &self,
        queue: &QueueSpec,
        consumer_name: &str,
        explicit_ack: bool,
    ) -> MessagingResult<DeliveryStream> {
        self.ensure_open()?;

        let target = self
            .broker
            .queue(&queue.name)
            .ok_or_else(|| MessagingError::Subscribe(format!("queue {} not declared", queue.name)))?;

        debug!(queue = %queue, consumer = %consumer_name, "In-memory subscription registered");

        let state = (target, self.open.subscribe(), self.broker.clone());
        let deliveries = futures::stream::unfold(state, move |(target, mut open, broker)| async move {
            if !*open.borrow() {
                return None;
            }

            let payload = {
                let mut receiver = target.receiver.lock().await;
                tokio::select! {
                    payload = receiver.recv() => payload?,
                    _ = open.wait_for(|is_open| !*is_open) => return None,
                }
            };

            let delivery = if explicit_ack {
                let acker = MemoryAcker {
                    queue: Arc::clone(&target),
                    payload: payload.clone(),
                    broker: broker.clone(),
                };
                Delivery::with_acker(payload, Box::new(acker))
            } else {
                broker.state.acked.fetch_add(1, Ordering::SeqCst);
                Delivery::new(payload)
            };

            Some((Ok(delivery), (target, open, broker)))
        });

        Ok(deliveries.boxed())
    }

    fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    async fn close(&self) -> MessagingResult<()> {
        self.open.send_replace(false);
        Ok(())
    }
}

struct MemoryAcker {
    queue: Arc<MemoryQueue>,
    payload: Bytes,
    broker: InMemoryBroker,
}

#[async_trait::async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self) -> MessagingResult<()> {
        self.broker.state.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn nak(&self) -> MessagingResult<()> {
        self.broker.state.nacked.fetch_add(1, Ordering::SeqCst);
        self.queue
            .sender
            .send(self.payload.clone())
            .map_err(|e| MessagingError::Acknowledge(e.to_string()))
    }

    async fn term(&self) -> MessagingResult<()> {
        self.broker.state.termed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
