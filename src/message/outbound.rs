//! OutboundMessage - payload plus routing metadata for a producer send

use crate::OrchestratorResult;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Message handed to a declared producer
///
/// The payload is typed data; the producer encodes it with its schema before sending.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// The message payload (typed data, not bytes)
    pub payload: Value,
    /// Optional message properties
    pub properties: HashMap<String, String>,
    pub key: Option<String>,
    /// Event time in milliseconds since epoch
    pub event_time: Option<u64>,
}

impl OutboundMessage {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            properties: HashMap::new(),
            key: None,
            event_time: None,
        }
    }

    /// Create a message from a string payload
    pub fn from_string(payload: impl Into<String>) -> Self {
        Self::new(json!(payload.into()))
    }

    /// Create a message from any JSON-serializable object
    ///
    /// # Example
    /// ```ignore
    /// #[derive(Serialize)]
    /// struct OrderEvent {
    ///     order_id: String,
    ///     amount: f64,
    /// }
    ///
    /// let message = OutboundMessage::from_json(&OrderEvent { order_id: "ORD-1".into(), amount: 9.5 })?
    ///     .with_key("ORD-1");
    /// ```
    pub fn from_json<T: Serialize>(data: T) -> OrchestratorResult<Self> {
        Ok(Self::new(serde_json::to_value(data)?))
    }

    /// Add a property
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Add multiple properties
    pub fn with_properties(mut self, properties: HashMap<String, String>) -> Self {
        self.properties.extend(properties);
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_event_time(mut self, event_time: u64) -> Self {
        self.event_time = Some(event_time);
        self
    }

    /// Get the payload as a reference
    pub fn payload(&self) -> &Value {
        &self.payload
    }
}
