//! ReactiveConsumerFactory - consumers that emit into a stream

use super::builder;
use super::SubscriptionSpec;
use crate::broker::{BrokerConsumer, BrokerMessage, MessageListener};
use crate::interceptor::ConsumerInterceptor;
use crate::message::Envelope;
use crate::metrics::DispatchMetrics;
use crate::placeholder::PlaceholderResolver;
use crate::registry::ClusterClientRegistry;
use crate::schema::Schema;
use crate::{OrchestratorError, OrchestratorResult};
use async_trait::async_trait;
use futures::Stream;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

/// Items buffered per reactive stream before deliveries wait
pub const DEFAULT_STREAM_BUFFER: usize = 256;

/// Subscribes consumers on demand and hands deliveries to a stream
///
/// Uses the same subscription builder as the dispatch engine, but ignores auto start:
/// every call subscribes immediately.
pub struct ReactiveConsumerFactory {
    clients: Arc<ClusterClientRegistry>,
    resolver: Arc<dyn PlaceholderResolver>,
    interceptor: Option<Arc<dyn ConsumerInterceptor>>,
    buffer: usize,
    consumers: RwLock<Vec<Arc<dyn BrokerConsumer>>>,
}

impl ReactiveConsumerFactory {
    pub fn new(
        clients: Arc<ClusterClientRegistry>,
        resolver: Arc<dyn PlaceholderResolver>,
        interceptor: Option<Arc<dyn ConsumerInterceptor>>,
    ) -> Self {
        Self {
            clients,
            resolver,
            interceptor,
            buffer: DEFAULT_STREAM_BUFFER,
            consumers: RwLock::new(Vec::new()),
        }
    }

    /// Set the per-stream buffer size
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Subscribe and emit each decoded payload
    ///
    /// A message is acknowledged once its value was emitted. A payload that cannot be
    /// decoded into `T` is negatively acknowledged and emitted as an `Err` item.
    pub async fn new_simple<T>(
        &self,
        spec: SubscriptionSpec,
    ) -> OrchestratorResult<ReactiveStream<OrchestratorResult<T>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let consumer = self
            .subscribe(spec, |schema, interceptor, metrics| {
                Arc::new(SimpleListener {
                    sender,
                    schema,
                    interceptor,
                    metrics,
                    _marker: PhantomData,
                })
            })
            .await?;

        Ok(ReactiveStream { receiver, consumer })
    }

    /// Subscribe and emit every delivery for the subscriber to acknowledge
    ///
    /// Nothing is acknowledged automatically; a delivery that cannot be emitted
    /// because the stream was dropped is negatively acknowledged.
    pub async fn new_consumer(
        &self,
        spec: SubscriptionSpec,
    ) -> OrchestratorResult<ReactiveStream<ReactiveDelivery>> {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let consumer = self
            .subscribe(spec, |schema, interceptor, metrics| {
                Arc::new(DeliveryListener {
                    sender,
                    schema,
                    interceptor,
                    metrics,
                })
            })
            .await?;

        Ok(ReactiveStream { receiver, consumer })
    }

    /// Every consumer subscribed through this factory
    pub async fn consumers(&self) -> Vec<Arc<dyn BrokerConsumer>> {
        self.consumers.read().await.clone()
    }

    async fn subscribe<L>(
        &self,
        spec: SubscriptionSpec,
        listener: impl FnOnce(Schema, Option<Arc<dyn ConsumerInterceptor>>, DispatchMetrics) -> Arc<L>,
    ) -> OrchestratorResult<Arc<dyn BrokerConsumer>>
    where
        L: MessageListener + 'static,
    {
        let id = self.resolver.resolve(&spec.topic)?;
        let plan = builder::plan(
            &self.clients,
            self.resolver.as_ref(),
            &spec,
            &id,
            self.interceptor.as_ref(),
        )?;

        let topic = plan.options.topic.clone();
        let metrics = DispatchMetrics::new(&plan.cluster, &topic);
        let listener = listener(plan.options.schema.clone(), plan.interceptor, metrics.clone());

        info!(
            "Subscribing reactive consumer '{}' to {} on cluster [{}]",
            plan.options.consumer_name, topic, plan.cluster
        );

        let consumer = plan
            .client
            .subscribe(plan.options, listener)
            .await
            .map_err(|e| {
                OrchestratorError::consumer_init_with_source(
                    format!("Failed to init reactive consumer for topic {}", topic),
                    e,
                )
            })?;

        metrics.consumer_subscribed();
        self.consumers.write().await.push(consumer.clone());
        Ok(consumer)
    }
}

/// Stream of items emitted by a reactive consumer
pub struct ReactiveStream<T> {
    receiver: mpsc::Receiver<T>,
    consumer: Arc<dyn BrokerConsumer>,
}

impl<T> ReactiveStream<T> {
    /// Next item, `None` once the consumer stopped delivering
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Consumer feeding this stream
    pub fn consumer(&self) -> &Arc<dyn BrokerConsumer> {
        &self.consumer
    }
}

impl<T> Stream for ReactiveStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl<T> std::fmt::Debug for ReactiveStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveStream")
            .field("consumer", &self.consumer)
            .finish()
    }
}

/// A delivery handed to the subscriber, who acknowledges it
pub struct ReactiveDelivery {
    consumer: Arc<dyn BrokerConsumer>,
    message: BrokerMessage,
    schema: Schema,
    interceptor: Option<Arc<dyn ConsumerInterceptor>>,
    metrics: DispatchMetrics,
}

impl ReactiveDelivery {
    pub fn consumer(&self) -> &Arc<dyn BrokerConsumer> {
        &self.consumer
    }

    pub fn message(&self) -> &BrokerMessage {
        &self.message
    }

    /// Payload decoded with the consumer's schema into `T`
    pub fn value<T: DeserializeOwned>(&self) -> OrchestratorResult<T> {
        let value = self.schema.decode(&self.message.payload)?;
        Ok(serde_json::from_value(value)?)
    }

    /// The message wrapped with its metadata
    pub fn envelope(&self) -> OrchestratorResult<Envelope> {
        let value = self.schema.decode(&self.message.payload)?;
        Ok(Envelope::from_message(&self.message, value))
    }

    pub async fn ack(&self) -> OrchestratorResult<()> {
        self.consumer.acknowledge(&self.message).await?;
        self.metrics.record_ack();
        if let Some(interceptor) = &self.interceptor {
            interceptor.on_acknowledge(self.consumer.topic(), &self.message.message_id);
        }
        Ok(())
    }

    pub async fn nack(&self) -> OrchestratorResult<()> {
        self.consumer.negative_acknowledge(&self.message).await?;
        self.metrics.record_nack("subscriber");
        if let Some(interceptor) = &self.interceptor {
            interceptor.on_negative_acknowledge(self.consumer.topic(), &self.message.message_id);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ReactiveDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveDelivery")
            .field("topic", &self.consumer.topic())
            .field("message_id", &self.message.message_id)
            .finish()
    }
}

struct SimpleListener<T> {
    sender: mpsc::Sender<OrchestratorResult<T>>,
    schema: Schema,
    interceptor: Option<Arc<dyn ConsumerInterceptor>>,
    metrics: DispatchMetrics,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> SimpleListener<T> {
    fn decode(&self, message: &BrokerMessage) -> OrchestratorResult<T> {
        let value = self.schema.decode(&message.payload)?;
        Ok(serde_json::from_value(value)?)
    }

    async fn nack(
        &self,
        consumer: &Arc<dyn BrokerConsumer>,
        message: &BrokerMessage,
        reason: &str,
    ) -> OrchestratorResult<()> {
        consumer.negative_acknowledge(message).await?;
        self.metrics.record_nack(reason);
        if let Some(interceptor) = &self.interceptor {
            interceptor.on_negative_acknowledge(consumer.topic(), &message.message_id);
        }
        Ok(())
    }
}

#[async_trait]
impl<T> MessageListener for SimpleListener<T>
where
    T: DeserializeOwned + Send + 'static,
{
    async fn received(
        &self,
        consumer: Arc<dyn BrokerConsumer>,
        message: BrokerMessage,
    ) -> OrchestratorResult<()> {
        self.metrics.record_received();
        if let Some(interceptor) = &self.interceptor {
            interceptor.before_consume(consumer.topic(), &message);
        }

        match self.decode(&message) {
            Ok(value) => {
                if self.sender.send(Ok(value)).await.is_err() {
                    self.nack(&consumer, &message, "stream_closed").await?;
                    return Err(OrchestratorError::Emission(format!(
                        "reactive stream for {} was dropped",
                        consumer.topic()
                    )));
                }

                consumer.acknowledge(&message).await?;
                self.metrics.record_ack();
                if let Some(interceptor) = &self.interceptor {
                    interceptor.on_acknowledge(consumer.topic(), &message.message_id);
                }
            }
            Err(e) => {
                warn!(
                    "Failed to decode message {} on {}: {}",
                    message.message_id,
                    consumer.topic(),
                    e
                );
                self.nack(&consumer, &message, "decode").await?;
                if self.sender.send(Err(e)).await.is_err() {
                    warn!("Reactive stream for {} was dropped", consumer.topic());
                }
            }
        }

        Ok(())
    }
}

struct DeliveryListener {
    sender: mpsc::Sender<ReactiveDelivery>,
    schema: Schema,
    interceptor: Option<Arc<dyn ConsumerInterceptor>>,
    metrics: DispatchMetrics,
}

#[async_trait]
impl MessageListener for DeliveryListener {
    async fn received(
        &self,
        consumer: Arc<dyn BrokerConsumer>,
        message: BrokerMessage,
    ) -> OrchestratorResult<()> {
        self.metrics.record_received();
        if let Some(interceptor) = &self.interceptor {
            interceptor.before_consume(consumer.topic(), &message);
        }

        let delivery = ReactiveDelivery {
            consumer,
            message,
            schema: self.schema.clone(),
            interceptor: self.interceptor.clone(),
            metrics: self.metrics.clone(),
        };

        if let Err(mpsc::error::SendError(delivery)) = self.sender.send(delivery).await {
            delivery.nack().await?;
            return Err(OrchestratorError::Emission(format!(
                "reactive stream for {} was dropped",
                delivery.consumer.topic()
            )));
        }

        Ok(())
    }
}
