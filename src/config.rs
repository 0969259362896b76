// Copyright (c) 2025 - Cowboy AI, Inc.

//! Broker and consumer configuration

use std::time::Duration;

use crate::errors::{MessagingError, MessagingResult};
use crate::queues::QueueSpec;

/// Host used when `BROKER_HOST` is absent
pub const DEFAULT_HOST: &str = "localhost";

/// Port used when `BROKER_PORT` is absent
pub const DEFAULT_PORT: u16 = 4222;

/// Fixed delay between failed connection attempts
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Connection settings for the message broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Broker host name
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Optional user name
    pub username: Option<String>,
    /// Optional password, only sent together with a user name
    pub password: Option<String>,
    /// Client name reported to the broker
    pub client_name: String,
    /// Connection timeout
    pub connect_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            client_name: "growth-tracking".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl BrokerConfig {
    /// Load configuration from `BROKER_*` environment variables
    pub fn from_env() -> MessagingResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    ///
    /// Missing or empty values fall back to the local development defaults.
    pub fn from_lookup<F>(lookup: F) -> MessagingResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let port = match get("BROKER_PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| {
                MessagingError::Configuration(format!("BROKER_PORT must be a valid port: {e}"))
            })?,
            None => defaults.port,
        };

        Ok(Self {
            host: get("BROKER_HOST").unwrap_or(defaults.host),
            port,
            username: get("BROKER_USERNAME"),
            password: get("BROKER_PASSWORD"),
            client_name: get("BROKER_CLIENT_NAME").unwrap_or(defaults.client_name),
            connect_timeout: defaults.connect_timeout,
        })
    }

    /// Server address in `nats://host:port` form
    pub fn server_url(&self) -> String {
        format!("nats://{}:{}", self.host, self.port)
    }
}

/// What happens to a message whose processing failed
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Messages are acknowledged on receipt; failures are logged and dropped
    #[default]
    Drop,
    /// Failed messages are negatively acknowledged and redelivered.
    /// Malformed payloads are terminated instead.
    Redeliver,
    /// Failed payloads are forwarded to the given queue, then acknowledged
    DeadLetter(QueueSpec),
}

impl FailurePolicy {
    /// Whether the broker should expect explicit acknowledgments
    pub fn requires_explicit_ack(&self) -> bool {
        !matches!(self, FailurePolicy::Drop)
    }
}

/// Settings for one background consumer
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Queue to subscribe to
    pub queue: QueueSpec,
    /// Durable consumer name, one per consuming service
    pub consumer_name: String,
    /// Delay between failed connection attempts
    pub retry_interval: Duration,
    /// Handling of failed messages
    pub failure_policy: FailurePolicy,
}

impl ConsumerConfig {
    /// Consumer on `queue` with the default 5 second retry and drop policy
    pub fn new(queue: QueueSpec, consumer_name: impl Into<String>) -> Self {
        Self {
            queue,
            consumer_name: consumer_name.into(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            failure_policy: FailurePolicy::Drop,
        }
    }

    /// Override the retry interval
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Override the failure policy
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}
