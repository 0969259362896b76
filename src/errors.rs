// Copyright (c) 2025 - Cowboy AI, Inc.

//! Error types for event propagation

use thiserror::Error;

/// Errors raised while talking to the broker or processing events
#[derive(Debug, Error)]
pub enum MessagingError {
    /// Broker unreachable, authentication refused, or handshake failed
    #[error("Broker connection error: {0}")]
    Connection(String),

    /// Queue declaration rejected by the broker
    #[error("Queue declaration error for {queue}: {reason}")]
    Declare { queue: String, reason: String },

    /// Message could not be handed to the broker
    #[error("Publish error on {queue}: {reason}")]
    Publish { queue: String, reason: String },

    /// Subscription could not be registered or the delivery stream failed
    #[error("Subscribe error: {0}")]
    Subscribe(String),

    /// Acknowledgment could not be sent back to the broker
    #[error("Acknowledge error: {0}")]
    Acknowledge(String),

    /// Event could not be encoded to its wire payload
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Payload is not a valid event of the expected shape
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Payload is not valid UTF-8
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Event handler failed while applying a well-formed event
    #[error("Handler error: {0}")]
    Handler(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Background worker could not be joined
    #[error("Worker error: {0}")]
    Worker(String),

    /// Channel was used after the broker closed it
    #[error("Channel closed")]
    ChannelClosed,
}

impl MessagingError {
    /// True when the payload itself is at fault and redelivery cannot help
    pub fn is_poison(&self) -> bool {
        matches!(
            self,
            MessagingError::Encoding(_) | MessagingError::Deserialization(_)
        )
    }
}

/// Result type for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        MessagingError::Deserialization(err.to_string())
    }
}

impl From<std::str::Utf8Error> for MessagingError {
    fn from(err: std::str::Utf8Error) -> Self {
        MessagingError::Encoding(err.to_string())
    }
}
