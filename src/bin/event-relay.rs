// Copyright (c) 2025 - Cowboy AI, Inc.
//! Event Relay Service
//!
//! Hosts the background consumers a booking-side service runs: it listens to
//! `parent.events` and `child.events`, keeps the derived-state caches current
//! and logs what it learns.
//!
//! Run with: cargo run --bin event-relay
//!
//! Environment:
//! - BROKER_HOST / BROKER_PORT (default: localhost:4222)
//! - BROKER_USERNAME / BROKER_PASSWORD (optional)
//! - RELAY_CONSUMER (default: booking-service)
//! - RELAY_RETRY_SECS (default: 5)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use growth_tracking_events::{
    event_types, BrokerConfig, CachingEventHandler, ChildEvent, ConsumerConfig, EventCache,
    EventConsumer, NatsBroker, ParentEvent, QueueSpec, CHILD_EVENTS, PARENT_EVENTS,
};
use tracing::info;

/// Configuration for the relay service
#[derive(Debug, Clone)]
struct RelayConfig {
    broker: BrokerConfig,
    consumer_name: String,
    retry_interval: Duration,
}

impl RelayConfig {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let broker = BrokerConfig::from_env().context("Invalid broker configuration")?;

        let consumer_name =
            std::env::var("RELAY_CONSUMER").unwrap_or_else(|_| "booking-service".to_string());

        let retry_secs = match std::env::var("RELAY_RETRY_SECS") {
            Ok(raw) => raw
                .parse::<u64>()
                .context("RELAY_RETRY_SECS must be a whole number of seconds")?,
            Err(_) => 5,
        };

        Ok(Self {
            broker,
            consumer_name,
            retry_interval: Duration::from_secs(retry_secs),
        })
    }

    fn consumer(&self, queue: &str) -> ConsumerConfig {
        ConsumerConfig::new(QueueSpec::new(queue), self.consumer_name.clone())
            .with_retry_interval(self.retry_interval)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("🚀 Starting Event Relay Service");

    let config = RelayConfig::from_env()?;
    info!("📋 Configuration loaded:");
    info!("  - Broker: {}", config.broker.server_url());
    info!("  - Consumer: {}", config.consumer_name);
    info!("  - Retry interval: {:?}", config.retry_interval);

    let broker = Arc::new(NatsBroker::new(config.broker.clone()));

    // One cache per upstream service, built once and shared with readers
    let parents: EventCache<ParentEvent> = EventCache::new();
    let children: EventCache<ChildEvent> = EventCache::new();

    let parent_consumer = EventConsumer::new(
        broker.clone(),
        config.consumer(PARENT_EVENTS),
        Arc::new(CachingEventHandler::new(
            parents.clone(),
            [event_types::PARENT_CREATED, event_types::PARENT_UPDATED],
        )),
    )
    .spawn();

    let child_consumer = EventConsumer::new(
        broker,
        config.consumer(CHILD_EVENTS),
        Arc::new(CachingEventHandler::new(
            children.clone(),
            [event_types::CHILD_CREATED],
        )),
    )
    .spawn();

    info!("🎧 Consumers started, press Ctrl-C to stop");

    let mut report = tokio::time::interval(Duration::from_secs(60));
    report.tick().await;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl-C")?;
                break;
            }
            _ = report.tick() => {
                info!(
                    "📊 parent.events: {:?} ({}), child.events: {:?} ({})",
                    parent_consumer.stats(),
                    parent_consumer.state(),
                    child_consumer.stats(),
                    child_consumer.state(),
                );
                if let Some(latest) = parents.latest_id(event_types::PARENT_CREATED) {
                    info!("  - Latest known parent: {}", latest);
                }
                info!("  - Cached entries: {} parent, {} child", parents.len(), children.len());
            }
        }
    }

    info!("🛑 Shutting down consumers");
    parent_consumer.shutdown().await?;
    child_consumer.shutdown().await?;
    info!("✅ Event Relay Service stopped");

    Ok(())
}
