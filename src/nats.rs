// Copyright (c) 2025 - Cowboy AI, Inc.

//! NATS JetStream binding for the broker transport
//!
//! Each queue is a JetStream stream capturing the single subject named
//! after the queue. Consumers are durable pull consumers on that stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_nats::connection::State;
use async_nats::jetstream::{self, consumer::pull, consumer::AckPolicy, stream};
use async_nats::{Client, ConnectOptions};
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info};

use crate::config::BrokerConfig;
use crate::errors::{MessagingError, MessagingResult};
use crate::queues::QueueSpec;
use crate::transport::{Acker, Broker, Channel, Delivery, DeliveryStream};

/// Opens NATS connections from a [`BrokerConfig`]
#[derive(Debug, Clone)]
pub struct NatsBroker {
    config: BrokerConfig,
}

impl NatsBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    fn connect_options(&self) -> ConnectOptions {
        let options = match (&self.config.username, &self.config.password) {
            (Some(user), Some(password)) => {
                ConnectOptions::with_user_and_password(user.clone(), password.clone())
            }
            (Some(user), None) => ConnectOptions::with_user_and_password(user.clone(), String::new()),
            _ => ConnectOptions::new(),
        };

        options
            .name(&self.config.client_name)
            .connection_timeout(self.config.connect_timeout)
    }
}

#[async_trait::async_trait]
impl Broker for NatsBroker {
    async fn connect(&self) -> MessagingResult<Arc<dyn Channel>> {
        let url = self.config.server_url();
        let client = async_nats::connect_with_options(url.as_str(), self.connect_options())
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))?;

        info!(server = %url, client = %self.config.client_name, "Connected to NATS");

        Ok(Arc::new(NatsChannel::new(client)))
    }
}

/// One NATS connection with its JetStream context
///
/// Once closed the channel refuses further use, even while other clones of
/// the client keep the socket alive.
#[derive(Clone)]
pub struct NatsChannel {
    client: Client,
    jetstream: jetstream::Context,
    closed: Arc<AtomicBool>,
}

impl NatsChannel {
    pub fn new(client: Client) -> Self {
        let jetstream = jetstream::new(client.clone());
        Self {
            client,
            jetstream,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn ensure_open(&self) -> MessagingResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(MessagingError::ChannelClosed)
        }
    }

    /// Underlying client for advanced operations
    pub fn inner(&self) -> &Client {
        &self.client
    }

    fn ack_policy(explicit_ack: bool) -> AckPolicy {
        if explicit_ack {
            AckPolicy::Explicit
        } else {
            AckPolicy::None
        }
    }

    fn stream_config(queue: &QueueSpec) -> stream::Config {
        stream::Config {
            name: queue.stream_name(),
            subjects: vec![queue.name.clone()],
            storage: if queue.durable {
                stream::StorageType::File
            } else {
                stream::StorageType::Memory
            },
            retention: if queue.auto_delete {
                stream::RetentionPolicy::Interest
            } else {
                stream::RetentionPolicy::Limits
            },
            max_consumers: if queue.exclusive { 1 } else { -1 },
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl Channel for NatsChannel {
    async fn declare_queue(&self, queue: &QueueSpec) -> MessagingResult<()> {
        self.ensure_open()?;
        self.jetstream
            .get_or_create_stream(Self::stream_config(queue))
            .await
            .map_err(|e| MessagingError::Declare {
                queue: queue.name.clone(),
                reason: e.to_string(),
            })?;

        debug!(queue = %queue, stream = %queue.stream_name(), "Queue declared");
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: Bytes) -> MessagingResult<()> {
        self.ensure_open()?;
        // The returned ack future is dropped: the message is on the wire.
        self.jetstream
            .publish(queue.to_string(), payload)
            .await
            .map_err(|e| MessagingError::Publish {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn publish_confirmed(&self, queue: &str, payload: Bytes) -> MessagingResult<()> {
        self.ensure_open()?;
        let publish_error = |reason: String| MessagingError::Publish {
            queue: queue.to_string(),
            reason,
        };

        let ack = self
            .jetstream
            .publish(queue.to_string(), payload)
            .await
            .map_err(|e| publish_error(e.to_string()))?
            .await
            .map_err(|e| publish_error(e.to_string()))?;

        debug!(queue = %queue, sequence = ack.sequence, "Publish confirmed");
        Ok(())
    }

    async fn consume(
        &self,
        queue: &QueueSpec,
        consumer_name: &str,
        explicit_ack: bool,
    ) -> MessagingResult<DeliveryStream> {
        self.ensure_open()?;
        let stream = self
            .jetstream
            .get_stream(queue.stream_name())
            .await
            .map_err(|e| MessagingError::Subscribe(e.to_string()))?;

        let ack_policy = Self::ack_policy(explicit_ack);

        let consumer: jetstream::consumer::Consumer<pull::Config> = stream
            .get_or_create_consumer(
                consumer_name,
                pull::Config {
                    durable_name: Some(consumer_name.to_string()),
                    filter_subject: queue.name.clone(),
                    ack_policy,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| MessagingError::Subscribe(e.to_string()))?;

        // An existing durable consumer keeps the ack policy it was created with.
        check_ack_policy(consumer_name, consumer.cached_info().config.ack_policy, ack_policy)?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| MessagingError::Subscribe(e.to_string()))?;

        info!(queue = %queue, consumer = %consumer_name, "Subscribed to queue");

        let deliveries = messages.map(move |message| {
            let message = message.map_err(|e| MessagingError::Subscribe(e.to_string()))?;
            let payload = message.payload.clone();
            if explicit_ack {
                Ok(Delivery::with_acker(payload, Box::new(NatsAcker { message })))
            } else {
                Ok(Delivery::new(payload))
            }
        });

        Ok(deliveries.boxed())
    }

    fn is_open(&self) -> bool {
        is_usable(
            self.closed.load(Ordering::SeqCst),
            &self.client.connection_state(),
        )
    }

    /// Flush pending publishes and retire the channel
    ///
    /// The socket itself is released when the last clone of the client drops.
    async fn close(&self) -> MessagingResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.client
            .flush()
            .await
            .map_err(|e| MessagingError::Connection(e.to_string()))
    }
}

fn is_usable(closed: bool, state: &State) -> bool {
    !closed && *state == State::Connected
}

fn check_ack_policy(
    consumer_name: &str,
    existing: AckPolicy,
    requested: AckPolicy,
) -> MessagingResult<()> {
    if existing == requested {
        return Ok(());
    }
    Err(MessagingError::Subscribe(format!(
        "durable consumer {consumer_name} has ack policy {existing:?}, \
         failure policy needs {requested:?}; delete the consumer to change it"
    )))
}

struct NatsAcker {
    message: jetstream::Message,
}

#[async_trait::async_trait]
impl Acker for NatsAcker {
    async fn ack(&self) -> MessagingResult<()> {
        self.message
            .ack()
            .await
            .map_err(|e| MessagingError::Acknowledge(e.to_string()))
    }

    async fn nak(&self) -> MessagingResult<()> {
        self.message
            .ack_with(jetstream::AckKind::Nak(None))
            .await
            .map_err(|e| MessagingError::Acknowledge(e.to_string()))
    }

    async fn term(&self) -> MessagingResult<()> {
        self.message
            .ack_with(jetstream::AckKind::Term)
            .await
            .map_err(|e| MessagingError::Acknowledge(e.to_string()))
    }
}
