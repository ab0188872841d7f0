//! Turns a subscription declaration into consumer options

use super::SubscriptionSpec;
use crate::broker::{BrokerClient, ConsumerOptions, DeadLetterPolicy};
use crate::config::{ClusterProperties, SubscriptionType, DEFAULT_CLUSTER};
use crate::interceptor::ConsumerInterceptor;
use crate::naming;
use crate::placeholder::{resolve_opt, PlaceholderResolver};
use crate::registry::ClusterClientRegistry;
use crate::{OrchestratorError, OrchestratorResult};
use std::sync::Arc;

/// A resolved subscription, ready to subscribe
pub(crate) struct ConsumerPlan {
    pub cluster: String,
    pub client: Arc<dyn BrokerClient>,
    pub options: ConsumerOptions,
    /// Set when the cluster allows interceptors
    pub interceptor: Option<Arc<dyn ConsumerInterceptor>>,
    /// Cluster-level auto start
    pub cluster_auto_start: bool,
}

/// Resolve placeholders, names, subscription type, ack timeout and dead-letter policy
///
/// `id` seeds the generated consumer and subscription names.
pub(crate) fn plan(
    clients: &ClusterClientRegistry,
    resolver: &dyn PlaceholderResolver,
    spec: &SubscriptionSpec,
    id: &str,
    interceptor: Option<&Arc<dyn ConsumerInterceptor>>,
) -> OrchestratorResult<ConsumerPlan> {
    let cluster = match resolve_opt(resolver, spec.cluster.as_deref())? {
        Some(cluster) => cluster,
        None => DEFAULT_CLUSTER.to_string(),
    };
    let props = clients.get_properties(&cluster)?;
    let client = clients.get_client(&cluster)?.clone();

    let consumer_name = resolve_opt(resolver, spec.consumer_name.as_deref())?;
    let subscription_name = resolve_opt(resolver, spec.subscription_name.as_deref())?;
    let topic = resolver.resolve(&spec.topic)?;
    let namespace = resolve_opt(resolver, spec.namespace.as_deref())?;
    let dead_letter_topic = resolve_opt(resolver, spec.dead_letter_topic.as_deref())?;

    let options = ConsumerOptions {
        topic: naming::topic_url(&topic, namespace.as_deref(), props),
        consumer_name: naming::generated_name(consumer_name.as_deref(), "consumer", id, props),
        subscription: naming::generated_name(
            subscription_name.as_deref(),
            "subscription",
            id,
            props,
        ),
        subscription_type: subscription_type(spec, props)?,
        initial_position: spec.initial_position,
        schema: spec.schema.clone(),
        ack_timeout: props.consumer.ack_timeout(),
        dead_letter: DeadLetterPolicy::new(
            spec.max_redeliver_count
                .or(props.consumer.dead_letter_max_redeliver_count),
            dead_letter_topic,
        ),
    };

    Ok(ConsumerPlan {
        interceptor: props.allow_interceptor.then(|| interceptor.cloned()).flatten(),
        cluster_auto_start: props.auto_start,
        cluster,
        client,
        options,
    })
}

/// Explicit type, else the cluster default, else exclusive
fn subscription_type(
    spec: &SubscriptionSpec,
    props: &ClusterProperties,
) -> OrchestratorResult<SubscriptionType> {
    if let Some(explicit) = spec.subscription_type {
        return Ok(explicit);
    }

    match props.consumer.subscription_type.as_deref() {
        Some(default) if !default.trim().is_empty() => default.parse().map_err(|e: String| {
            OrchestratorError::consumer_init(format!(
                "Invalid default subscription type for topic {}: {}",
                spec.topic, e
            ))
        }),
        _ => Ok(SubscriptionType::default()),
    }
}
