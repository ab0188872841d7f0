//! ProducerRegistry - declared producers keyed by resolved topic

use super::ClusterClientRegistry;
use crate::broker::{BrokerProducer, MessageId, OutboundFrame, ProducerOptions};
use crate::config::DEFAULT_CLUSTER;
use crate::interceptor::ProducerInterceptor;
use crate::message::OutboundMessage;
use crate::metrics::DispatchMetrics;
use crate::naming;
use crate::placeholder::{resolve_opt, PlaceholderResolver};
use crate::schema::{Schema, SchemaType};
use crate::{OrchestratorError, OrchestratorResult};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Declaration of a producer
///
/// The topic may contain `${...}` placeholders; they are resolved when the
/// registry is built.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerSpec {
    pub topic: String,
    pub schema: Schema,
    /// Owning cluster, `default` if unset
    pub cluster: Option<String>,
    /// Producer name, derived from cluster and topic if unset
    pub producer_name: Option<String>,
}

impl ProducerSpec {
    pub fn new(topic: impl Into<String>, schema: Schema) -> Self {
        Self {
            topic: topic.into(),
            schema,
            cluster: None,
            producer_name: None,
        }
    }

    /// Producer of JSON-encoded `T`
    pub fn json<T: ?Sized>(topic: impl Into<String>) -> Self {
        Self::new(topic, Schema::json::<T>())
    }

    /// Producer of UTF-8 strings
    pub fn string(topic: impl Into<String>) -> Self {
        Self::new(topic, Schema::string())
    }

    /// Producer of raw bytes
    pub fn bytes(topic: impl Into<String>) -> Self {
        Self::new(topic, Schema::bytes())
    }

    /// Producer of big-endian `i64`
    pub fn int64(topic: impl Into<String>) -> Self {
        Self::new(topic, Schema::of::<i64>(SchemaType::Int64))
    }

    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    pub fn with_producer_name(mut self, name: impl Into<String>) -> Self {
        self.producer_name = Some(name.into());
        self
    }
}

/// A created producer, cheap to clone
#[derive(Clone)]
pub struct ProducerHandle {
    inner: Arc<ProducerInner>,
}

struct ProducerInner {
    cluster: String,
    topic: String,
    schema: Schema,
    producer: Arc<dyn BrokerProducer>,
    interceptor: Option<Arc<dyn ProducerInterceptor>>,
    metrics: DispatchMetrics,
}

impl ProducerHandle {
    /// Fully qualified topic the producer writes to
    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    pub fn cluster(&self) -> &str {
        &self.inner.cluster
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// The underlying broker producer
    pub fn broker_producer(&self) -> &Arc<dyn BrokerProducer> {
        &self.inner.producer
    }

    /// Encode `value` with the producer's schema and send it
    pub async fn send<T: Serialize + ?Sized>(&self, value: &T) -> OrchestratorResult<MessageId> {
        self.send_message(OutboundMessage::new(serde_json::to_value(value)?))
            .await
    }

    /// Send a message with key, properties and event time
    pub async fn send_message(&self, message: OutboundMessage) -> OrchestratorResult<MessageId> {
        let inner = &self.inner;
        let payload = inner.schema.encode(&message.payload)?;
        let mut frame = OutboundFrame {
            payload,
            key: message.key,
            properties: message.properties,
            event_time: message.event_time,
        };

        if let Some(interceptor) = &inner.interceptor {
            interceptor.before_send(&inner.topic, &mut frame);
        }

        let result = inner.producer.send(frame).await;

        if let Some(interceptor) = &inner.interceptor {
            interceptor.on_send_acknowledgement(&inner.topic, &result);
        }
        inner.metrics.record_sent(result.is_ok());

        match &result {
            Ok(id) => debug!("Sent message {} to {}", id, inner.topic),
            Err(e) => warn!("Failed to send message to {}: {}", inner.topic, e),
        }
        result
    }
}

impl std::fmt::Debug for ProducerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("cluster", &self.inner.cluster)
            .field("topic", &self.inner.topic)
            .field("schema", &self.inner.schema)
            .field("intercepted", &self.inner.interceptor.is_some())
            .finish()
    }
}

/// Every declared producer, keyed by its resolved topic
///
/// Built once; no producer is created on lookup.
pub struct ProducerRegistry {
    producers: HashMap<String, ProducerHandle>,
    resolver: Arc<dyn PlaceholderResolver>,
}

impl ProducerRegistry {
    /// Create a producer for every declaration
    ///
    /// Fails on the first producer that cannot be created. When two declarations
    /// resolve to the same topic, the later one replaces the earlier.
    pub async fn build(
        clients: &ClusterClientRegistry,
        specs: Vec<ProducerSpec>,
        resolver: Arc<dyn PlaceholderResolver>,
        interceptor: Option<Arc<dyn ProducerInterceptor>>,
    ) -> OrchestratorResult<Self> {
        let mut producers = HashMap::with_capacity(specs.len());

        for spec in specs {
            let topic = resolver.resolve(&spec.topic)?;
            let cluster = resolve_opt(resolver.as_ref(), spec.cluster.as_deref())?
                .unwrap_or_else(|| DEFAULT_CLUSTER.to_string());

            let props = clients.get_properties(&cluster)?;
            let client = clients.get_client(&cluster)?;
            let topic_url = naming::topic_url(&topic, None, props);
            let producer_name = resolve_opt(resolver.as_ref(), spec.producer_name.as_deref())?
                .unwrap_or_else(|| naming::producer_name(&cluster, &topic_url));

            let producer = client
                .create_producer(ProducerOptions {
                    topic: topic_url.clone(),
                    producer_name: producer_name.clone(),
                    schema: spec.schema.clone(),
                })
                .await
                .map_err(|e| {
                    OrchestratorError::producer_init_with_source(
                        format!("Failed to init producer for topic {}", topic_url),
                        e,
                    )
                })?;

            let metrics = DispatchMetrics::new(&cluster, &topic_url);
            metrics.producer_created();
            info!(
                "Producer '{}' created on cluster [{}] for topic {} ({})",
                producer_name, cluster, topic_url, spec.schema
            );

            let handle = ProducerHandle {
                inner: Arc::new(ProducerInner {
                    interceptor: props
                        .allow_interceptor
                        .then(|| interceptor.clone())
                        .flatten(),
                    cluster,
                    topic: topic_url,
                    schema: spec.schema,
                    producer,
                    metrics,
                }),
            };

            if let Some(previous) = producers.insert(topic.clone(), handle) {
                warn!(
                    "Topic '{}' declared by more than one producer, replacing producer on cluster [{}]",
                    topic,
                    previous.cluster()
                );
            }
        }

        Ok(Self {
            producers,
            resolver,
        })
    }

    /// Producer for `topic`, resolving placeholders in the lookup key
    pub fn get(&self, topic: &str) -> Option<&ProducerHandle> {
        match self.resolver.resolve(topic) {
            Ok(key) => self.producers.get(&key),
            Err(e) => {
                debug!("Producer lookup for '{}' failed: {}", topic, e);
                None
            }
        }
    }

    /// Resolved topics with a producer
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.producers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }
}

impl std::fmt::Debug for ProducerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerRegistry")
            .field("producers", &self.producers)
            .finish()
    }
}
