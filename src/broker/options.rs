//! Options handed to the broker client when building clients, producers and consumers.

use crate::config::{Authentication, ClusterProperties, InitialPosition, SubscriptionType, TlsSettings};
use crate::schema::Schema;
use crate::OrchestratorResult;
use std::time::Duration;

/// Connection options for one broker client
#[derive(Debug, Clone, PartialEq)]
pub struct ClientOptions {
    /// Cluster the client is built for
    pub cluster: String,
    pub service_url: String,
    pub io_threads: u32,
    pub listener_threads: u32,
    pub enable_tcp_no_delay: bool,
    pub keep_alive_interval: Duration,
    pub connection_timeout: Duration,
    pub operation_timeout: Duration,
    pub starting_backoff_interval: Duration,
    pub max_backoff_interval: Duration,
    pub tls: TlsSettings,
    pub authentication: Authentication,
    pub listener_name: Option<String>,
}

impl ClientOptions {
    /// Translate cluster properties into client options
    ///
    /// Fails with `ClientInit` when more than one authentication method is set.
    pub fn from_properties(cluster: &str, props: &ClusterProperties) -> OrchestratorResult<Self> {
        let authentication = props.auth.resolve()?;

        Ok(Self {
            cluster: cluster.to_string(),
            service_url: props.service_url.clone(),
            io_threads: props.io_threads,
            listener_threads: props.listener_threads,
            enable_tcp_no_delay: props.enable_tcp_no_delay,
            keep_alive_interval: props.keep_alive_interval(),
            connection_timeout: props.connection_timeout(),
            operation_timeout: props.operation_timeout(),
            starting_backoff_interval: props.starting_backoff_interval(),
            max_backoff_interval: props.max_backoff_interval(),
            tls: props.tls.clone(),
            authentication,
            listener_name: props.listener_name.clone().filter(|n| !n.is_empty()),
        })
    }
}

/// Options for creating a producer
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerOptions {
    /// Fully qualified topic
    pub topic: String,
    pub producer_name: String,
    pub schema: Schema,
}

/// Options for building and subscribing a consumer
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerOptions {
    /// Fully qualified topic
    pub topic: String,
    pub consumer_name: String,
    pub subscription: String,
    pub subscription_type: SubscriptionType,
    pub initial_position: InitialPosition,
    pub schema: Schema,
    pub ack_timeout: Option<Duration>,
    pub dead_letter: Option<DeadLetterPolicy>,
}

/// Where messages go after too many negative acknowledgements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterPolicy {
    pub max_redeliver_count: u32,
    /// Explicit dead-letter topic, broker default when `None`
    pub dead_letter_topic: Option<String>,
}

impl DeadLetterPolicy {
    /// Policy for a max redeliver count, `None` unless the count is positive
    pub fn new(max_redeliver_count: Option<u32>, dead_letter_topic: Option<String>) -> Option<Self> {
        match max_redeliver_count {
            Some(count) if count > 0 => Some(Self {
                max_redeliver_count: count,
                dead_letter_topic: dead_letter_topic.filter(|t| !t.is_empty()),
            }),
            _ => None,
        }
    }

    /// Dead-letter topic for a subscription: explicit topic or `{topic}-{subscription}-DLQ`
    pub fn topic_for(&self, topic: &str, subscription: &str) -> String {
        self.dead_letter_topic
            .clone()
            .unwrap_or_else(|| format!("{}-{}-DLQ", topic, subscription))
    }

    /// True once a message has been negatively acknowledged `max_redeliver_count` times
    pub fn is_exhausted(&self, negative_acks: u32) -> bool {
        negative_acks >= self.max_redeliver_count
    }
}
