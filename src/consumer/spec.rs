//! Consumer declarations and handlers

use crate::config::{InitialPosition, SubscriptionType};
use crate::error::HandlerError;
use crate::message::Envelope;
use crate::schema::Schema;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Outcome of a handler invocation
pub type HandlerResult = Result<(), HandlerError>;

type PayloadFn = dyn Fn(Value) -> BoxFuture<'static, HandlerResult> + Send + Sync;
type EnvelopeFn = dyn Fn(Envelope) -> BoxFuture<'static, HandlerResult> + Send + Sync;

/// Subscription settings shared by dispatched and reactive consumers
///
/// Topic, namespace, cluster and names may contain `${...}` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSpec {
    pub topic: String,
    /// Namespace for a topic that is not fully qualified, cluster default if unset
    pub namespace: Option<String>,
    /// Owning cluster, `default` if unset
    pub cluster: Option<String>,
    pub consumer_name: Option<String>,
    pub subscription_name: Option<String>,
    /// Explicit type, else the cluster default, else exclusive
    pub subscription_type: Option<SubscriptionType>,
    pub initial_position: InitialPosition,
    /// Negative acknowledgements before dead-lettering, cluster default if unset
    pub max_redeliver_count: Option<u32>,
    pub dead_letter_topic: Option<String>,
    pub schema: Schema,
}

impl SubscriptionSpec {
    pub fn new(topic: impl Into<String>, schema: Schema) -> Self {
        Self {
            topic: topic.into(),
            namespace: None,
            cluster: None,
            consumer_name: None,
            subscription_name: None,
            subscription_type: None,
            initial_position: InitialPosition::default(),
            max_redeliver_count: None,
            dead_letter_topic: None,
            schema,
        }
    }

    /// Subscription to JSON-encoded `T`
    pub fn json<T: ?Sized>(topic: impl Into<String>) -> Self {
        Self::new(topic, Schema::json::<T>())
    }

    /// Subscription to UTF-8 strings
    pub fn string(topic: impl Into<String>) -> Self {
        Self::new(topic, Schema::string())
    }

    /// Subscription to raw bytes
    pub fn bytes(topic: impl Into<String>) -> Self {
        Self::new(topic, Schema::bytes())
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = Some(name.into());
        self
    }

    pub fn with_subscription_name(mut self, name: impl Into<String>) -> Self {
        self.subscription_name = Some(name.into());
        self
    }

    pub fn with_subscription_type(mut self, subscription_type: SubscriptionType) -> Self {
        self.subscription_type = Some(subscription_type);
        self
    }

    pub fn with_initial_position(mut self, position: InitialPosition) -> Self {
        self.initial_position = position;
        self
    }

    pub fn with_max_redeliver_count(mut self, count: u32) -> Self {
        self.max_redeliver_count = Some(count);
        self
    }

    pub fn with_dead_letter_topic(mut self, topic: impl Into<String>) -> Self {
        self.dead_letter_topic = Some(topic.into());
        self
    }
}

/// Callback bound to a declared consumer
///
/// A handler either takes the decoded payload or a wrapped [`Envelope`] with the
/// message metadata. Returning an error, or panicking, counts as a failed delivery.
#[derive(Clone)]
pub enum Handler {
    Payload(Arc<PayloadFn>),
    Envelope(Arc<EnvelopeFn>),
}

impl Handler {
    /// Handler receiving the decoded payload value
    pub fn payload<F, Fut>(handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Handler::Payload(Arc::new(move |value| handler(value).boxed()))
    }

    /// Handler receiving the payload deserialized into `T`
    ///
    /// A payload that does not deserialize fails the delivery.
    pub fn typed<T, F, Fut>(handler: F) -> Self
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Handler::Payload(Arc::new(move |value| {
            let call = serde_json::from_value::<T>(value).map(|typed| handler(typed));
            async move { call?.await }.boxed()
        }))
    }

    /// Handler receiving the wrapped message
    pub fn envelope<F, Fut>(handler: F) -> Self
    where
        F: Fn(Envelope) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Handler::Envelope(Arc::new(move |envelope| handler(envelope).boxed()))
    }

    /// True when the handler receives the wrapped message
    pub fn wrapped(&self) -> bool {
        matches!(self, Handler::Envelope(_))
    }

    /// Run the handler, turning a panic into a handler error
    pub(crate) async fn invoke(&self, envelope: Envelope) -> HandlerResult {
        let call = std::panic::catch_unwind(AssertUnwindSafe(|| match self {
            Handler::Payload(handler) => handler(envelope.value),
            Handler::Envelope(handler) => handler(envelope),
        }))
        .map_err(panic_error)?;

        AssertUnwindSafe(call)
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(panic_error(panic)))
    }
}

fn panic_error(panic: Box<dyn Any + Send>) -> HandlerError {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("handler panicked: {}", detail).into()
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::Payload(_) => f.write_str("Handler::Payload"),
            Handler::Envelope(_) => f.write_str("Handler::Envelope"),
        }
    }
}

/// Declaration of a consumer dispatched to a handler
#[derive(Debug, Clone)]
pub struct ConsumerSpec {
    /// Unique id, used to generate consumer and subscription names
    pub id: String,
    pub subscription: SubscriptionSpec,
    pub handler: Handler,
    /// Subscribe at startup (the cluster must allow it too)
    pub auto_start: bool,
}

impl ConsumerSpec {
    pub fn new(id: impl Into<String>, subscription: SubscriptionSpec, handler: Handler) -> Self {
        Self {
            id: id.into(),
            subscription,
            handler,
            auto_start: true,
        }
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }
}
