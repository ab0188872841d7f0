//! Orchestrator - builds every registry from configuration and declarations

use crate::broker::{BrokerClientFactory, BrokerConsumer, DanubeClientFactory};
use crate::config::OrchestratorConfig;
use crate::consumer::{ConsumerDispatchEngine, ConsumerSpec, ReactiveConsumerFactory};
use crate::failure::{FailedMessage, FailureChannel, FailureSubscription};
use crate::interceptor::{ConsumerInterceptor, LoggingInterceptor, ProducerInterceptor};
use crate::placeholder::{PlaceholderResolver, PropertyResolver};
use crate::registry::{ClusterClientRegistry, ProducerHandle, ProducerRegistry, ProducerSpec};
use crate::OrchestratorResult;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Collects collaborators and declarations before startup
///
/// Unset collaborators default to the Danube client, a [`PropertyResolver`] over the
/// configured properties and the [`LoggingInterceptor`].
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    factory: Option<Arc<dyn BrokerClientFactory>>,
    resolver: Option<Arc<dyn PlaceholderResolver>>,
    producer_interceptor: Arc<dyn ProducerInterceptor>,
    consumer_interceptor: Arc<dyn ConsumerInterceptor>,
    producers: Vec<ProducerSpec>,
    consumers: Vec<ConsumerSpec>,
}

impl OrchestratorBuilder {
    /// Broker client factory used for every cluster
    pub fn factory(mut self, factory: Arc<dyn BrokerClientFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn PlaceholderResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Interceptor attached to producers of clusters that allow interceptors
    pub fn producer_interceptor(mut self, interceptor: Arc<dyn ProducerInterceptor>) -> Self {
        self.producer_interceptor = interceptor;
        self
    }

    /// Interceptor attached to consumers of clusters that allow interceptors
    pub fn consumer_interceptor(mut self, interceptor: Arc<dyn ConsumerInterceptor>) -> Self {
        self.consumer_interceptor = interceptor;
        self
    }

    pub fn producer(mut self, spec: ProducerSpec) -> Self {
        self.producers.push(spec);
        self
    }

    pub fn producers(mut self, specs: impl IntoIterator<Item = ProducerSpec>) -> Self {
        self.producers.extend(specs);
        self
    }

    pub fn consumer(mut self, spec: ConsumerSpec) -> Self {
        self.consumers.push(spec);
        self
    }

    pub fn consumers(mut self, specs: impl IntoIterator<Item = ConsumerSpec>) -> Self {
        self.consumers.extend(specs);
        self
    }

    /// Connect every cluster, create producers and subscribe consumers
    ///
    /// If producers or consumers fail to start, the clients already connected are
    /// closed before the error is returned.
    pub async fn start(self) -> OrchestratorResult<Orchestrator> {
        let OrchestratorBuilder {
            config,
            factory,
            resolver,
            producer_interceptor,
            consumer_interceptor,
            producers,
            consumers,
        } = self;

        config.validate()?;
        init_tracing(&config.runtime.log_level);

        info!(
            "Starting orchestrator: {} cluster(s), {} producer(s), {} consumer(s)",
            config.clusters.len(),
            producers.len(),
            consumers.len()
        );

        let factory = factory.unwrap_or_else(|| Arc::new(DanubeClientFactory));
        let resolver =
            resolver.unwrap_or_else(|| Arc::new(PropertyResolver::new(config.properties.clone())));

        let clients =
            Arc::new(ClusterClientRegistry::connect(config.clusters, factory.as_ref()).await?);
        let failures = FailureChannel::new(config.runtime.failure_buffer);

        let started = async {
            let producers = ProducerRegistry::build(
                &clients,
                producers,
                resolver.clone(),
                Some(producer_interceptor),
            )
            .await?;
            let dispatch = ConsumerDispatchEngine::start(
                &clients,
                consumers,
                resolver.clone(),
                Some(consumer_interceptor.clone()),
                failures,
            )
            .await?;
            OrchestratorResult::Ok((producers, dispatch))
        }
        .await;

        let (producers, dispatch) = match started {
            Ok(started) => started,
            Err(e) => {
                error!("Orchestrator startup failed: {}", e);
                if let Err(close_err) = clients.close().await {
                    warn!("Failed to close clients after startup failure: {}", close_err);
                }
                return Err(e);
            }
        };

        let reactive =
            ReactiveConsumerFactory::new(clients.clone(), resolver, Some(consumer_interceptor));

        info!("Orchestrator started");
        Ok(Orchestrator {
            clients,
            producers,
            dispatch,
            reactive,
        })
    }
}

/// Running set of clients, producers and consumers
pub struct Orchestrator {
    clients: Arc<ClusterClientRegistry>,
    producers: ProducerRegistry,
    dispatch: ConsumerDispatchEngine,
    reactive: ReactiveConsumerFactory,
}

impl Orchestrator {
    pub fn builder(config: OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            factory: None,
            resolver: None,
            producer_interceptor: Arc::new(LoggingInterceptor),
            consumer_interceptor: Arc::new(LoggingInterceptor),
            producers: Vec::new(),
            consumers: Vec::new(),
        }
    }

    pub fn clients(&self) -> &Arc<ClusterClientRegistry> {
        &self.clients
    }

    pub fn producers(&self) -> &ProducerRegistry {
        &self.producers
    }

    /// Declared producer for `topic`
    pub fn producer(&self, topic: &str) -> Option<&ProducerHandle> {
        self.producers.get(topic)
    }

    /// Consumers subscribed at startup
    pub fn consumers(&self) -> &[Arc<dyn BrokerConsumer>] {
        self.dispatch.consumers()
    }

    pub fn dispatch(&self) -> &ConsumerDispatchEngine {
        &self.dispatch
    }

    pub fn reactive(&self) -> &ReactiveConsumerFactory {
        &self.reactive
    }

    pub fn failures(&self) -> &FailureChannel {
        self.dispatch.failures()
    }

    /// Observe failed deliveries from now on
    pub fn on_failure<F>(&self, observer: F) -> FailureSubscription
    where
        F: Fn(FailedMessage) + Send + 'static,
    {
        self.dispatch.on_failure(observer)
    }

    /// Close every broker client
    pub async fn close(&self) -> OrchestratorResult<()> {
        info!("Shutting down orchestrator");
        self.clients.close().await?;
        info!("Orchestrator stopped");
        Ok(())
    }

    /// Wait for Ctrl-C, then close
    pub async fn run_until_shutdown(self) -> OrchestratorResult<()> {
        tokio::signal::ctrl_c().await?;
        info!("Received shutdown signal");
        self.close().await
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .ok(); // Ignore if already initialized
}
