//! Broker client seam.
//!
//! The orchestrator never talks to a broker directly. It drives these traits:
//! - `BrokerClientFactory`: builds one client per configured cluster
//! - `BrokerClient`: creates producers and subscribes consumers
//! - `BrokerProducer` / `BrokerConsumer`: live handles owned by the registries
//! - `MessageListener`: per-message delivery callback installed on each consumer
//!
//! `DanubeClientFactory` is the production implementation; tests substitute in-process fakes.

mod danube;
mod message;
mod options;

pub use danube::DanubeClientFactory;
pub use message::{BrokerMessage, MessageId, OutboundFrame};
pub use options::{ClientOptions, ConsumerOptions, DeadLetterPolicy, ProducerOptions};

use crate::OrchestratorResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Builds broker clients from connection options
#[async_trait]
pub trait BrokerClientFactory: Send + Sync {
    /// Connect a client, or fail with a connection-construction error
    async fn connect(&self, options: ClientOptions) -> OrchestratorResult<Arc<dyn BrokerClient>>;
}

/// A live connection to one cluster
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Create a producer
    async fn create_producer(
        &self,
        options: ProducerOptions,
    ) -> OrchestratorResult<Arc<dyn BrokerProducer>>;

    /// Build a consumer and subscribe it, installing `listener` as its delivery callback
    ///
    /// The client invokes the listener from its own delivery tasks, possibly
    /// concurrently for different messages.
    async fn subscribe(
        &self,
        options: ConsumerOptions,
        listener: Arc<dyn MessageListener>,
    ) -> OrchestratorResult<Arc<dyn BrokerConsumer>>;

    /// Close the client and every producer/consumer it created
    async fn close(&self) -> OrchestratorResult<()>;
}

/// A created producer
#[async_trait]
pub trait BrokerProducer: Send + Sync {
    /// Fully qualified topic
    fn topic(&self) -> &str;

    async fn send(&self, frame: OutboundFrame) -> OrchestratorResult<MessageId>;
}

/// A subscribed consumer
#[async_trait]
pub trait BrokerConsumer: Send + Sync {
    /// Fully qualified topic
    fn topic(&self) -> &str;

    fn subscription(&self) -> &str;

    fn consumer_name(&self) -> &str;

    async fn acknowledge(&self, message: &BrokerMessage) -> OrchestratorResult<()>;

    /// Signal that the message was not processed, triggering redelivery
    async fn negative_acknowledge(&self, message: &BrokerMessage) -> OrchestratorResult<()>;
}

/// Per-message delivery callback
#[async_trait]
pub trait MessageListener: Send + Sync {
    /// Handle one delivery
    ///
    /// An `Err` is an unhandled failure of the callback itself (for example a failed
    /// acknowledgement); the client reports it and moves on.
    async fn received(
        &self,
        consumer: Arc<dyn BrokerConsumer>,
        message: BrokerMessage,
    ) -> OrchestratorResult<()>;
}

impl std::fmt::Debug for dyn BrokerConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConsumer")
            .field("topic", &self.topic())
            .field("subscription", &self.subscription())
            .field("consumer_name", &self.consumer_name())
            .finish()
    }
}

impl std::fmt::Debug for dyn BrokerProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerProducer")
            .field("topic", &self.topic())
            .finish()
    }
}
