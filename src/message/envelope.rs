//! Envelope - a delivered message with its metadata

use crate::broker::{BrokerMessage, MessageId};
use crate::{OrchestratorError, OrchestratorResult};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;

/// Delivered message passed to wrapped handlers
///
/// The value is already decoded with the consumer's schema. Access fields through
/// the provided accessor methods.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Decoded payload
    pub(crate) value: Value,
    /// Encoded payload as delivered
    pub(crate) raw: Vec<u8>,
    pub(crate) message_id: MessageId,
    pub(crate) sequence_id: u64,
    /// User-defined properties from producer
    pub(crate) properties: HashMap<String, String>,
    pub(crate) topic: String,
    pub(crate) key: Option<String>,
    pub(crate) event_time: u64,
    pub(crate) publish_time: u64,
    pub(crate) producer_name: String,
    pub(crate) redelivery_count: u32,
}

impl Envelope {
    /// Wrap a delivered message and its decoded value
    pub fn from_message(message: &BrokerMessage, value: Value) -> Self {
        Self {
            value,
            raw: message.payload.clone(),
            message_id: message.message_id.clone(),
            sequence_id: message.sequence_id,
            properties: message.properties.clone(),
            topic: message.topic.clone(),
            key: message.key.clone(),
            event_time: message.event_time,
            publish_time: message.publish_time,
            producer_name: message.producer_name.clone(),
            redelivery_count: message.redelivery_count,
        }
    }

    /// Get the decoded payload
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Deserialize the payload to a specific type
    ///
    /// # Example
    ///
    /// ```ignore
    /// #[derive(Deserialize)]
    /// struct Order {
    ///     order_id: String,
    ///     amount: f64,
    /// }
    ///
    /// let order: Order = envelope.as_type()?;
    /// ```
    pub fn as_type<T: DeserializeOwned>(&self) -> OrchestratorResult<T> {
        serde_json::from_value(self.value.clone()).map_err(|e| {
            OrchestratorError::Serialization(format!(
                "Failed to deserialize message {} to target type: {}",
                self.message_id, e
            ))
        })
    }

    /// Encoded payload bytes as delivered by the broker
    pub fn raw_payload(&self) -> &[u8] {
        &self.raw
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    /// Access message properties (user-defined)
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    /// Get a specific property value
    pub fn get_property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(|s| s.as_str())
    }

    /// Get the topic the message was read from
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Producer event time (0 if the producer set none)
    pub fn event_time(&self) -> u64 {
        self.event_time
    }

    /// Broker publish time
    pub fn publish_time(&self) -> u64 {
        self.publish_time
    }

    pub fn producer_name(&self) -> &str {
        &self.producer_name
    }

    /// How often this message was redelivered
    pub fn redelivery_count(&self) -> u32 {
        self.redelivery_count
    }
}
