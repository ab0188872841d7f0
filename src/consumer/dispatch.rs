//! ConsumerDispatchEngine - subscribes declared consumers and drives their handlers

use super::builder;
use super::{ConsumerSpec, Handler};
use crate::broker::{BrokerConsumer, BrokerMessage, ConsumerOptions, MessageListener};
use crate::failure::{FailedMessage, FailureChannel, FailureSubscription};
use crate::interceptor::ConsumerInterceptor;
use crate::message::Envelope;
use crate::metrics::{DispatchMetrics, HandlerTimer};
use crate::placeholder::PlaceholderResolver;
use crate::registry::ClusterClientRegistry;
use crate::schema::Schema;
use crate::{OrchestratorError, OrchestratorResult};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A declared consumer that was prepared but not subscribed
///
/// Either its cluster or its own declaration disabled auto start.
#[derive(Debug, Clone)]
pub struct IdleConsumer {
    pub id: String,
    pub cluster: String,
    pub options: ConsumerOptions,
}

/// Subscribed consumers of every declaration plus the failure channel they report to
pub struct ConsumerDispatchEngine {
    consumers: Vec<Arc<dyn BrokerConsumer>>,
    idle: Vec<IdleConsumer>,
    failures: FailureChannel,
}

impl ConsumerDispatchEngine {
    /// Prepare every declaration and subscribe those whose cluster and declaration
    /// both enable auto start
    ///
    /// Consumers are subscribed one after another; the first failure aborts startup.
    pub async fn start(
        clients: &ClusterClientRegistry,
        specs: Vec<ConsumerSpec>,
        resolver: Arc<dyn PlaceholderResolver>,
        interceptor: Option<Arc<dyn ConsumerInterceptor>>,
        failures: FailureChannel,
    ) -> OrchestratorResult<Self> {
        let mut consumers = Vec::new();
        let mut idle = Vec::new();

        for spec in specs {
            let plan = builder::plan(
                clients,
                resolver.as_ref(),
                &spec.subscription,
                &spec.id,
                interceptor.as_ref(),
            )?;

            if !(plan.cluster_auto_start && spec.auto_start) {
                info!(
                    "Consumer '{}' for topic {} left unsubscribed (auto start disabled)",
                    spec.id, plan.options.topic
                );
                idle.push(IdleConsumer {
                    id: spec.id,
                    cluster: plan.cluster,
                    options: plan.options,
                });
                continue;
            }

            let topic = plan.options.topic.clone();
            let metrics = DispatchMetrics::new(&plan.cluster, &topic);
            let listener = Arc::new(DispatchListener {
                handler: spec.handler,
                schema: plan.options.schema.clone(),
                interceptor: plan.interceptor,
                failures: failures.clone(),
                metrics: metrics.clone(),
            });

            info!(
                "Subscribing consumer '{}' to {} on cluster [{}] (subscription '{}', {:?})",
                plan.options.consumer_name,
                topic,
                plan.cluster,
                plan.options.subscription,
                plan.options.subscription_type
            );

            let consumer = plan
                .client
                .subscribe(plan.options, listener)
                .await
                .map_err(|e| {
                    OrchestratorError::consumer_init_with_source(
                        format!("Failed to init consumer '{}' for topic {}", spec.id, topic),
                        e,
                    )
                })?;

            metrics.consumer_subscribed();
            consumers.push(consumer);
        }

        info!(
            "Dispatch engine started: {} subscribed, {} idle",
            consumers.len(),
            idle.len()
        );

        Ok(Self {
            consumers,
            idle,
            failures,
        })
    }

    /// Subscribed consumers
    pub fn consumers(&self) -> &[Arc<dyn BrokerConsumer>] {
        &self.consumers
    }

    /// Prepared consumers left unsubscribed
    pub fn idle(&self) -> &[IdleConsumer] {
        &self.idle
    }

    pub fn failures(&self) -> &FailureChannel {
        &self.failures
    }

    /// Observe failed deliveries from now on
    pub fn on_failure<F>(&self, observer: F) -> FailureSubscription
    where
        F: Fn(FailedMessage) + Send + 'static,
    {
        self.failures.on_failure(observer)
    }
}

impl std::fmt::Debug for ConsumerDispatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerDispatchEngine")
            .field("consumers", &self.consumers)
            .field("idle", &self.idle)
            .finish()
    }
}

/// Delivery callback installed on every dispatched consumer
struct DispatchListener {
    handler: Handler,
    schema: Schema,
    interceptor: Option<Arc<dyn ConsumerInterceptor>>,
    failures: FailureChannel,
    metrics: DispatchMetrics,
}

#[async_trait]
impl MessageListener for DispatchListener {
    async fn received(
        &self,
        consumer: Arc<dyn BrokerConsumer>,
        message: BrokerMessage,
    ) -> OrchestratorResult<()> {
        self.metrics.record_received();
        if let Some(interceptor) = &self.interceptor {
            interceptor.before_consume(consumer.topic(), &message);
        }

        let timer = HandlerTimer::start(&self.metrics);
        let outcome = match self.schema.decode(&message.payload) {
            Ok(value) => {
                self.handler
                    .invoke(Envelope::from_message(&message, value))
                    .await
            }
            Err(e) => Err(e.into()),
        };
        let elapsed = timer.stop();

        match outcome {
            Ok(()) => {
                consumer.acknowledge(&message).await?;
                self.metrics.record_ack();
                if let Some(interceptor) = &self.interceptor {
                    interceptor.on_acknowledge(consumer.topic(), &message.message_id);
                }
                debug!(
                    "Message {} on {} handled in {:?}",
                    message.message_id,
                    consumer.topic(),
                    elapsed
                );
            }
            Err(cause) => {
                warn!(
                    "Handler failed for message {} on {}: {}",
                    message.message_id,
                    consumer.topic(),
                    cause
                );

                consumer.negative_acknowledge(&message).await?;
                self.metrics.record_nack("handler");
                if let Some(interceptor) = &self.interceptor {
                    interceptor.on_negative_acknowledge(consumer.topic(), &message.message_id);
                }

                self.failures
                    .publish(FailedMessage::new(Arc::from(cause), consumer, message));
                self.metrics.record_failure_published();
            }
        }

        Ok(())
    }
}
