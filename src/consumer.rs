// Copyright (c) 2025 - Cowboy AI, Inc.

//! Background event consumer
//!
//! Subscribes to one queue and feeds every message to an [`EventHandler`].
//!
//! ```text
//!                 ┌──────────── subscription ended ────────────┐
//!                 v                                            │
//! Disconnected ─> Connecting ──── ok ────> Subscribed ─────────┘
//!                 ^    │
//!                 │   err
//!                 │    v
//!                 └─ FailedRetry (sleep retry_interval)
//!
//! any state ── shutdown ──> Stopped
//! ```
//!
//! A dropped subscription re-enters `Connecting`, so the worker heals after
//! broker restarts. So does one that fails `MAX_CONSECUTIVE_STREAM_ERRORS`
//! times in a row. Only the first of several short-lived subscriptions in a
//! row reconnects at once; later ones wait `retry_interval` first.
//!
//! Failures of a single message never stop the worker; what happens to the
//! message is decided by the [`FailurePolicy`].

use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::cache::EventCache;
use crate::config::{ConsumerConfig, FailurePolicy};
use crate::connection::ConnectionManager;
use crate::errors::{MessagingError, MessagingResult};
use crate::events::IntegrationEvent;
use crate::transport::{Broker, Channel, Delivery, DeliveryStream};

/// Result of handling one well-formed message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    /// The event was recognized and its side effects performed
    Applied,
    /// The event type is not one this handler cares about
    Ignored,
}

/// Processes raw message payloads
///
/// Invoked for every delivery; implementations must tolerate concurrent
/// readers of whatever state they write.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> MessagingResult<HandleOutcome>;
}

/// Upserts recognized events into an [`EventCache`]
pub struct CachingEventHandler<E>
where
    E: IntegrationEvent,
{
    cache: EventCache<E>,
    accepted: HashSet<String>,
}

impl<E> CachingEventHandler<E>
where
    E: IntegrationEvent,
{
    /// Handler recording events whose type is in `accepted`
    pub fn new<I, S>(cache: EventCache<E>, accepted: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            cache,
            accepted: accepted.into_iter().map(Into::into).collect(),
        }
    }

    pub fn cache(&self) -> &EventCache<E> {
        &self.cache
    }

    pub fn accepts(&self, event_type: &str) -> bool {
        self.accepted.contains(event_type)
    }
}

#[async_trait::async_trait]
impl<E> EventHandler for CachingEventHandler<E>
where
    E: IntegrationEvent,
{
    async fn handle(&self, payload: &[u8]) -> MessagingResult<HandleOutcome> {
        let event = E::from_payload(payload)?;

        if !self.accepts(event.event_type()) {
            debug!(event_type = %event.event_type(), "Ignoring unrecognized event type");
            return Ok(HandleOutcome::Ignored);
        }

        info!(
            event_type = %event.event_type(),
            entity_id = %event.entity_id(),
            "Received event"
        );
        self.cache.record(event);
        Ok(HandleOutcome::Applied)
    }
}

/// Lifecycle state of an [`EventConsumer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connecting,
    Subscribed,
    FailedRetry,
    Stopped,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsumerState::Disconnected => write!(f, "disconnected"),
            ConsumerState::Connecting => write!(f, "connecting"),
            ConsumerState::Subscribed => write!(f, "subscribed"),
            ConsumerState::FailedRetry => write!(f, "failed-retry"),
            ConsumerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Snapshot of consumer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub applied: u64,
    pub ignored: u64,
    pub failed: u64,
    pub connect_failures: u64,
    pub subscriptions: u64,
    pub last_applied_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Counters {
    applied: AtomicU64,
    ignored: AtomicU64,
    failed: AtomicU64,
    connect_failures: AtomicU64,
    subscriptions: AtomicU64,
    last_applied_millis: AtomicI64,
}

impl Counters {
    fn snapshot(&self) -> ConsumerStats {
        let millis = self.last_applied_millis.load(Ordering::Relaxed);
        ConsumerStats {
            applied: self.applied.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            subscriptions: self.subscriptions.load(Ordering::Relaxed),
            last_applied_at: (millis > 0)
                .then(|| DateTime::from_timestamp_millis(millis))
                .flatten(),
        }
    }
}

/// Delivery errors in a row after which the subscription is rebuilt
pub const MAX_CONSECUTIVE_STREAM_ERRORS: u32 = 3;

const STREAM_ERROR_PAUSE: Duration = Duration::from_secs(1);

enum PumpExit {
    Cancelled,
    StreamEnded,
}

/// Resolves once shutdown is requested or the signal's sender is gone
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Long-lived worker subscribed to one queue
pub struct EventConsumer {
    config: ConsumerConfig,
    connections: ConnectionManager,
    handler: Arc<dyn EventHandler>,
    state: watch::Sender<ConsumerState>,
    counters: Arc<Counters>,
}

impl EventConsumer {
    pub fn new(
        broker: Arc<dyn Broker>,
        config: ConsumerConfig,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        let connections = ConnectionManager::new(broker, config.queue.clone());
        let (state, _) = watch::channel(ConsumerState::Disconnected);
        Self {
            config,
            connections,
            handler,
            state,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Receiver following state transitions
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> ConsumerStats {
        self.counters.snapshot()
    }

    /// Run the worker on its own task
    pub fn spawn(self) -> ConsumerHandle {
        let (shutdown, signal) = watch::channel(false);
        let state = self.state();
        let counters = Arc::clone(&self.counters);
        let task = tokio::spawn(async move { self.run(signal).await });

        ConsumerHandle {
            shutdown,
            state,
            counters,
            task,
        }
    }

    /// Drive the state machine until `shutdown` turns true
    ///
    /// Messages already being handled complete before the worker stops.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let queue = self.config.queue.name.clone();
        info!(queue = %queue, consumer = %self.config.consumer_name, "Event consumer starting");

        let mut quick_ends: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.transition(ConsumerState::Connecting);
            let subscription = tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => break,
                result = self.subscribe() => result,
            };

            match subscription {
                Ok((channel, deliveries)) => {
                    self.counters.subscriptions.fetch_add(1, Ordering::Relaxed);
                    self.transition(ConsumerState::Subscribed);
                    let subscribed_at = Instant::now();

                    match self.pump(&channel, deliveries, &mut shutdown).await {
                        PumpExit::Cancelled => break,
                        PumpExit::StreamEnded => {
                            self.connections.close().await;
                            self.transition(ConsumerState::Disconnected);

                            if subscribed_at.elapsed() < self.config.retry_interval {
                                quick_ends += 1;
                            } else {
                                quick_ends = 0;
                            }

                            // Only the first short-lived subscription in a row reconnects at once.
                            if quick_ends <= 1 {
                                warn!(queue = %queue, "Subscription ended, reconnecting");
                                continue;
                            }

                            warn!(
                                queue = %queue,
                                quick_ends,
                                retry_in = ?self.config.retry_interval,
                                "Subscription keeps ending, backing off"
                            );
                            tokio::select! {
                                biased;
                                _ = cancelled(&mut shutdown) => break,
                                _ = tokio::time::sleep(self.config.retry_interval) => {}
                            }
                        }
                    }
                }
                Err(e) => {
                    self.counters.connect_failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        queue = %queue,
                        error = %e,
                        retry_in = ?self.config.retry_interval,
                        "Failed to subscribe"
                    );
                    self.transition(ConsumerState::FailedRetry);

                    tokio::select! {
                        biased;
                        _ = cancelled(&mut shutdown) => break,
                        _ = tokio::time::sleep(self.config.retry_interval) => {}
                    }
                }
            }
        }

        self.connections.close().await;
        self.transition(ConsumerState::Stopped);
        info!(queue = %queue, "Event consumer stopped");
    }

    fn transition(&self, next: ConsumerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(queue = %self.config.queue, from = %previous, to = %next, "Consumer state changed");
        }
    }

    async fn subscribe(&self) -> MessagingResult<(Arc<dyn Channel>, DeliveryStream)> {
        let channel = self.connections.ensure_connected().await?;
        let deliveries = channel
            .consume(
                &self.config.queue,
                &self.config.consumer_name,
                self.config.failure_policy.requires_explicit_ack(),
            )
            .await?;
        Ok((channel, deliveries))
    }

    async fn pump(
        &self,
        channel: &Arc<dyn Channel>,
        mut deliveries: DeliveryStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> PumpExit {
        let mut consecutive_errors: u32 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancelled(shutdown) => return PumpExit::Cancelled,
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    consecutive_errors = 0;
                    self.process(channel, delivery).await;
                }
                Some(Err(MessagingError::ChannelClosed)) => {
                    warn!(queue = %self.config.queue, "Channel closed under subscription");
                    return PumpExit::StreamEnded;
                }
                Some(Err(e)) => {
                    consecutive_errors += 1;
                    error!(
                        queue = %self.config.queue,
                        error = %e,
                        consecutive_errors,
                        "Error receiving message"
                    );
                    if consecutive_errors >= MAX_CONSECUTIVE_STREAM_ERRORS {
                        warn!(queue = %self.config.queue, "Subscription unhealthy, resubscribing");
                        return PumpExit::StreamEnded;
                    }
                    tokio::select! {
                        biased;
                        _ = cancelled(shutdown) => return PumpExit::Cancelled,
                        _ = tokio::time::sleep(STREAM_ERROR_PAUSE) => {}
                    }
                }
                None => return PumpExit::StreamEnded,
            }
        }
    }

    async fn process(&self, channel: &Arc<dyn Channel>, mut delivery: Delivery) {
        let outcome = AssertUnwindSafe(self.handler.handle(delivery.payload()))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(MessagingError::Handler("handler panicked".to_string())));

        let settled = match outcome {
            Ok(HandleOutcome::Applied) => {
                self.counters.applied.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .last_applied_millis
                    .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
                delivery.ack().await
            }
            Ok(HandleOutcome::Ignored) => {
                self.counters.ignored.fetch_add(1, Ordering::Relaxed);
                delivery.ack().await
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.settle_failure(channel, &mut delivery, e).await
            }
        };

        if let Err(e) = settled {
            error!(queue = %self.config.queue, error = %e, "Failed to settle message");
        }
    }

    async fn settle_failure(
        &self,
        channel: &Arc<dyn Channel>,
        delivery: &mut Delivery,
        failure: MessagingError,
    ) -> MessagingResult<()> {
        let queue = &self.config.queue;

        match &self.config.failure_policy {
            FailurePolicy::Drop => {
                error!(queue = %queue, error = %failure, "Dropping message that failed processing");
                Ok(())
            }
            FailurePolicy::Redeliver if failure.is_poison() => {
                error!(queue = %queue, error = %failure, "Terminating malformed message");
                delivery.term().await
            }
            FailurePolicy::Redeliver => {
                warn!(queue = %queue, error = %failure, "Message failed, requesting redelivery");
                delivery.nak().await
            }
            FailurePolicy::DeadLetter(dead) => {
                let forwarded = match channel.declare_queue(dead).await {
                    Ok(()) => channel.publish(&dead.name, delivery.bytes()).await,
                    Err(e) => Err(e),
                };
                match forwarded {
                    Ok(()) => {
                        warn!(queue = %queue, dead_letter = %dead, error = %failure, "Message dead-lettered");
                        delivery.ack().await
                    }
                    Err(e) => {
                        error!(queue = %queue, error = %e, "Dead-letter forward failed, requesting redelivery");
                        delivery.nak().await
                    }
                }
            }
        }
    }
}

/// Handle to a consumer running on its own task
pub struct ConsumerHandle {
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ConsumerState>,
    counters: Arc<Counters>,
    task: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Receiver following state transitions
    pub fn state_changes(&self) -> watch::Receiver<ConsumerState> {
        self.state.clone()
    }

    pub fn stats(&self) -> ConsumerStats {
        self.counters.snapshot()
    }

    /// Wait until the consumer reaches `target`
    pub async fn wait_for(&self, target: ConsumerState) -> MessagingResult<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|e| MessagingError::Worker(e.to_string()))
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Request shutdown and wait for the worker to release its connection
    pub async fn shutdown(self) -> MessagingResult<()> {
        self.shutdown.send_replace(true);
        self.task
            .await
            .map_err(|e| MessagingError::Worker(e.to_string()))
    }
}
