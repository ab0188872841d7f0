//! Producer and consumer interceptors.
//!
//! Interceptors observe sends and deliveries on clusters that set
//! `allow_interceptor`. Every hook has a no-op default.

use crate::broker::{BrokerMessage, MessageId, OutboundFrame};
use crate::OrchestratorResult;
use tracing::debug;

/// Hook around producer sends
pub trait ProducerInterceptor: Send + Sync {
    /// Called before the frame is handed to the broker; may modify it
    fn before_send(&self, topic: &str, frame: &mut OutboundFrame) {
        let _ = (topic, frame);
    }

    /// Called with the broker's answer to a send
    fn on_send_acknowledgement(&self, topic: &str, result: &OrchestratorResult<MessageId>) {
        let _ = (topic, result);
    }
}

/// Hook around consumer deliveries
pub trait ConsumerInterceptor: Send + Sync {
    /// Called before the handler sees the message
    fn before_consume(&self, topic: &str, message: &BrokerMessage) {
        let _ = (topic, message);
    }

    fn on_acknowledge(&self, topic: &str, message_id: &MessageId) {
        let _ = (topic, message_id);
    }

    fn on_negative_acknowledge(&self, topic: &str, message_id: &MessageId) {
        let _ = (topic, message_id);
    }
}

/// Default interceptor: logs every hook at debug level
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingInterceptor;

impl ProducerInterceptor for LoggingInterceptor {
    fn before_send(&self, topic: &str, frame: &mut OutboundFrame) {
        debug!(
            "[{}] sending {} byte(s), key={:?}",
            topic,
            frame.payload.len(),
            frame.key
        );
    }

    fn on_send_acknowledgement(&self, topic: &str, result: &OrchestratorResult<MessageId>) {
        match result {
            Ok(id) => debug!("[{}] send acknowledged: {}", topic, id),
            Err(e) => debug!("[{}] send failed: {}", topic, e),
        }
    }
}

impl ConsumerInterceptor for LoggingInterceptor {
    fn before_consume(&self, topic: &str, message: &BrokerMessage) {
        debug!(
            "[{}] consuming {} (redelivery {})",
            topic, message.message_id, message.redelivery_count
        );
    }

    fn on_acknowledge(&self, topic: &str, message_id: &MessageId) {
        debug!("[{}] acknowledged {}", topic, message_id);
    }

    fn on_negative_acknowledge(&self, topic: &str, message_id: &MessageId) {
        debug!("[{}] negatively acknowledged {}", topic, message_id);
    }
}
