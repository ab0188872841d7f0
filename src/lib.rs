//! # Danube Orchestrator
//!
//! Declarative producers and consumers over Danube Messaging.
//!
//! Instead of building clients, producers and consumers imperatively, application code
//! declares them by metadata (topic, cluster, subscription, schema, dead-letter policy)
//! and the orchestrator owns the lifecycle of the broker connections across any number
//! of named clusters.
//!
//! ## Overview
//!
//! - **ClusterClientRegistry**: one broker client per configured cluster, closed together
//! - **ProducerRegistry**: declared producers keyed by resolved topic
//! - **ConsumerDispatchEngine**: subscribes declared consumers and invokes their handlers,
//!   acknowledging on success and negatively acknowledging on failure
//! - **ReactiveConsumerFactory**: consumers that emit deliveries into a `Stream`
//! - **FailureChannel**: hot broadcast of failed deliveries
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use danube_orchestrator::{
//!     ConsumerSpec, Handler, Orchestrator, OrchestratorConfig, OrchestratorResult,
//!     ProducerSpec, SubscriptionSpec,
//! };
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Order {
//!     order_id: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> OrchestratorResult<()> {
//!     let config = OrchestratorConfig::from_env()?;
//!
//!     let orchestrator = Orchestrator::builder(config)
//!         .producer(ProducerSpec::json::<Order>("orders"))
//!         .consumer(ConsumerSpec::new(
//!             "order-audit",
//!             SubscriptionSpec::json::<Order>("orders").with_max_redeliver_count(3),
//!             Handler::typed(|order: Order| async move {
//!                 println!("Got order {}", order.order_id);
//!                 Ok(())
//!             }),
//!         ))
//!         .start()
//!         .await?;
//!
//!     let _failures = orchestrator.on_failure(|failed| {
//!         eprintln!("Delivery failed: {}", failed.cause());
//!     });
//!
//!     orchestrator.run_until_shutdown().await
//! }
//! ```
//!
//! ## Features
//!
//! - **Multi-cluster**: every declaration names its cluster, `default` otherwise
//! - **Placeholders**: `${key}` and `${key:default}` in topics, clusters and names
//! - **Dead-letter routing**: after a configured number of negative acknowledgements
//! - **Interceptors**: hooks around sends and deliveries, per cluster
//! - **Observability**: metrics and structured logging for every lifecycle step

mod broker;
mod config;
mod consumer;
mod error;
mod failure;
mod interceptor;
mod message;
mod metrics;
mod naming;
mod placeholder;
mod registry;
mod retry;
mod runtime;
mod schema;

// Re-export public API
pub use broker::{
    BrokerClient, BrokerClientFactory, BrokerConsumer, BrokerMessage, BrokerProducer,
    ClientOptions, ConsumerOptions, DanubeClientFactory, DeadLetterPolicy, MessageId,
    MessageListener, OutboundFrame, ProducerOptions,
};
pub use config::{
    AuthSettings, Authentication, ClusterProperties, ConsumerDefaults, InitialPosition,
    OrchestratorConfig, RuntimeSettings, SubscriptionType, TlsSettings, DEFAULT_CLUSTER,
};
pub use consumer::{
    ConsumerDispatchEngine, ConsumerSpec, Handler, HandlerResult, IdleConsumer,
    ReactiveConsumerFactory, ReactiveDelivery, ReactiveStream, SubscriptionSpec,
};
pub use error::{BoxError, CloseError, HandlerError, OrchestratorError, OrchestratorResult};
pub use failure::{FailedMessage, FailureChannel, FailureSubscription, DEFAULT_FAILURE_BUFFER};
pub use interceptor::{ConsumerInterceptor, LoggingInterceptor, ProducerInterceptor};
pub use message::{Envelope, OutboundMessage};
pub use metrics::DispatchMetrics;
pub use placeholder::{LiteralResolver, PlaceholderResolver, PropertyResolver};
pub use registry::{ClusterClientRegistry, ProducerHandle, ProducerRegistry, ProducerSpec};
pub use runtime::{Orchestrator, OrchestratorBuilder};
pub use schema::{Schema, SchemaType};

// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
