// Copyright (c) 2025 - Cowboy AI, Inc.

//! Queue naming contract shared between services
//!
//! Producers and consumers agree on a queue out of band: its name, its
//! declaration parameters and the payload schema travelling on it.
//!
//! ```text
//! parent.events   Parent service  -> Booking, Child
//! child.events    Child service   -> Booking, Doctor
//! ```
//!
//! On NATS each queue is a JetStream stream that captures exactly one
//! subject, the queue name itself.
//!
//! ```rust
//! use growth_tracking_events::queues::{QueueSpec, PARENT_EVENTS};
//!
//! let queue = QueueSpec::new(PARENT_EVENTS);
//! assert_eq!(queue.stream_name(), "PARENT_EVENTS");
//! assert!(!queue.durable);
//! ```

use std::fmt;

/// Queue carrying parent lifecycle events
pub const PARENT_EVENTS: &str = "parent.events";

/// Queue carrying child lifecycle events
pub const CHILD_EVENTS: &str = "child.events";

/// Suffix appended to a queue name to form its dead-letter queue
pub const DEAD_LETTER_SUFFIX: &str = ".dead";

/// Declaration parameters of a named queue
///
/// Declaring the same spec twice is a no-op on the broker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueueSpec {
    /// Queue name, also the subject messages are published on
    pub name: String,
    /// Survives a broker restart
    pub durable: bool,
    /// Only one consumer may attach
    pub exclusive: bool,
    /// Messages are discarded once every attached consumer has seen them
    pub auto_delete: bool,
}

impl QueueSpec {
    /// Non-durable, non-exclusive, no auto-delete
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: false,
            exclusive: false,
            auto_delete: false,
        }
    }

    /// Mark the queue durable
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Mark the queue exclusive to one consumer
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Discard messages once consumed
    pub fn auto_delete(mut self) -> Self {
        self.auto_delete = true;
        self
    }

    /// JetStream stream name for this queue
    ///
    /// Stream names may not contain `.`, `*`, `>` or whitespace.
    pub fn stream_name(&self) -> String {
        self.name
            .chars()
            .map(|c| match c {
                '.' | '*' | '>' | ' ' | '\t' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect()
    }

    /// Companion queue receiving payloads that failed processing
    pub fn dead_letter(&self) -> QueueSpec {
        QueueSpec {
            name: format!("{}{}", self.name, DEAD_LETTER_SUFFIX),
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }
}

impl fmt::Display for QueueSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
