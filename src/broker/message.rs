//! Raw messages exchanged with the broker client.

use std::collections::HashMap;
use std::fmt;

/// Broker-assigned message identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A message delivered by the broker, payload still encoded
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    pub message_id: MessageId,
    pub sequence_id: u64,
    pub payload: Vec<u8>,
    /// User-defined properties set by the producer
    pub properties: HashMap<String, String>,
    /// Topic the message was read from
    pub topic: String,
    pub key: Option<String>,
    /// Producer-assigned event time (milliseconds since epoch, 0 if unset)
    pub event_time: u64,
    /// Broker publish time
    pub publish_time: u64,
    pub producer_name: String,
    /// Number of times this message was redelivered after a negative acknowledgement
    pub redelivery_count: u32,
}

impl BrokerMessage {
    /// Message with the given id, topic and payload; every other field empty
    pub fn new(message_id: impl Into<MessageId>, topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            message_id: message_id.into(),
            sequence_id: 0,
            payload,
            properties: HashMap::new(),
            topic: topic.into(),
            key: None,
            event_time: 0,
            publish_time: 0,
            producer_name: String::new(),
            redelivery_count: 0,
        }
    }
}

/// An encoded message handed to a broker producer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutboundFrame {
    pub payload: Vec<u8>,
    pub key: Option<String>,
    pub properties: HashMap<String, String>,
    pub event_time: Option<u64>,
}
