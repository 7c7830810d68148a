//! Notification types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::{Error, Result};

/// Real-time room an event is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Room {
    /// `company-{id}`
    Company(String),
    /// `driver-{id}`
    Driver(String),
}

impl Room {
    /// Room name as seen by subscribers
    pub fn name(&self) -> String {
        match self {
            Room::Company(id) => format!("company-{}", id),
            Room::Driver(id) => format!("driver-{}", id),
        }
    }

    /// Parse a room name
    pub fn parse(name: &str) -> Result<Self> {
        if let Some(id) = name.strip_prefix("company-") {
            if !id.is_empty() {
                return Ok(Room::Company(id.to_string()));
            }
        }
        if let Some(id) = name.strip_prefix("driver-") {
            if !id.is_empty() {
                return Ok(Room::Driver(id.to_string()));
            }
        }
        Err(Error::InvalidRoom(name.to_string()))
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Real-time event names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    /// Pending allocation expired without a driver
    #[serde(rename = "allocation-expired")]
    AllocationExpired,
    /// Accepted allocation reached its start time
    #[serde(rename = "allocation-started")]
    AllocationStarted,
    /// Allocation window closed
    #[serde(rename = "allocation-completed")]
    AllocationCompleted,
    /// Allocation offered to a driver
    #[serde(rename = "allocation-offered")]
    AllocationOffered,
    /// A driver accepted the allocation
    #[serde(rename = "allocation-accepted")]
    AllocationAccepted,
}

impl EventName {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::AllocationExpired => "allocation-expired",
            EventName::AllocationStarted => "allocation-started",
            EventName::AllocationCompleted => "allocation-completed",
            EventName::AllocationOffered => "allocation-offered",
            EventName::AllocationAccepted => "allocation-accepted",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event emitted on the real-time channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    /// Event name
    pub name: EventName,

    /// JSON payload, always carrying `allocationId`
    pub payload: serde_json::Value,

    /// Emission timestamp
    pub emitted_at: DateTime<Utc>,
}

impl RealtimeEvent {
    /// Create a new event stamped with the current time
    pub fn new(name: EventName, payload: serde_json::Value) -> Self {
        Self {
            name,
            payload,
            emitted_at: Utc::now(),
        }
    }

    /// `allocationId` carried by the payload, if any
    pub fn allocation_id(&self) -> Option<&str> {
        self.payload.get("allocationId").and_then(|v| v.as_str())
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Push notification addressed to one device token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    /// Device token
    pub token: String,

    /// Title
    pub title: String,

    /// Body
    pub body: String,

    /// String key/value data
    #[serde(default)]
    pub data: HashMap<String, String>,
}

impl PushMessage {
    /// Create a push message without data
    pub fn new(
        token: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            token: token.into(),
            title: title.into(),
            body: body.into(),
            data: HashMap::new(),
        }
    }

    /// Attach a data entry
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Outcome of a push send that reached the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushDelivery {
    /// Accepted by the gateway
    Delivered {
        /// Gateway message id
        message_id: String,
    },
    /// Token is unregistered; the caller should purge it
    InvalidToken,
}
