// Copyright (c) 2025 - Cowboy AI, Inc.

//! Domain events exchanged between services
//!
//! Events travel as UTF-8 JSON with PascalCase keys, for example:
//!
//! ```json
//! {"EventType":"ParentCreated","ParentId":"11111111-1111-1111-1111-111111111111","FullName":"Jane Doe"}
//! ```
//!
//! Unknown fields are ignored on the way in, so producers may add fields
//! without breaking older consumers. There is no schema registry; the queue
//! name decides which shape a consumer expects.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{MessagingError, MessagingResult};

/// Event type names as they appear in the `EventType` field
pub mod event_types {
    pub const PARENT_CREATED: &str = "ParentCreated";
    pub const PARENT_UPDATED: &str = "ParentUpdated";
    pub const CHILD_CREATED: &str = "ChildCreated";
}

/// A versionless event describing a state change in one service
pub trait IntegrationEvent:
    Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    /// Discriminator carried in the `EventType` field
    fn event_type(&self) -> &str;

    /// Identifier of the entity the event is about
    fn entity_id(&self) -> Uuid;

    /// Encode to the wire payload
    fn to_payload(&self) -> MessagingResult<Bytes> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| MessagingError::Serialization(e.to_string()))
    }

    /// Decode a raw payload: UTF-8 first, then the JSON shape
    fn from_payload(payload: &[u8]) -> MessagingResult<Self> {
        let text = std::str::from_utf8(payload)?;
        Ok(serde_json::from_str(text)?)
    }
}

/// Event published by the Parent service on `parent.events`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParentEvent {
    pub event_type: String,
    pub parent_id: Uuid,
    #[serde(default)]
    pub full_name: Option<String>,
}

impl ParentEvent {
    /// A `ParentCreated` event
    pub fn created(parent_id: Uuid, full_name: impl Into<String>) -> Self {
        Self {
            event_type: event_types::PARENT_CREATED.to_string(),
            parent_id,
            full_name: Some(full_name.into()),
        }
    }

    /// A `ParentUpdated` event
    pub fn updated(parent_id: Uuid, full_name: impl Into<String>) -> Self {
        Self {
            event_type: event_types::PARENT_UPDATED.to_string(),
            parent_id,
            full_name: Some(full_name.into()),
        }
    }
}

impl IntegrationEvent for ParentEvent {
    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn entity_id(&self) -> Uuid {
        self.parent_id
    }
}

/// Event published by the Child service on `child.events`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChildEvent {
    pub event_type: String,
    pub child_id: Uuid,
    pub parent_id: Uuid,
    #[serde(default)]
    pub full_name: Option<String>,
}

impl ChildEvent {
    /// A `ChildCreated` event
    pub fn created(child_id: Uuid, parent_id: Uuid, full_name: impl Into<String>) -> Self {
        Self {
            event_type: event_types::CHILD_CREATED.to_string(),
            child_id,
            parent_id,
            full_name: Some(full_name.into()),
        }
    }
}

impl IntegrationEvent for ChildEvent {
    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn entity_id(&self) -> Uuid {
        self.child_id
    }
}
