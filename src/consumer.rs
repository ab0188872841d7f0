//! Declared consumers.
//!
//! Two registration paths share one subscription builder:
//! - `ConsumerDispatchEngine`: subscribes declared consumers at startup and invokes
//!   their handlers, acknowledging on success and publishing failures otherwise
//! - `ReactiveConsumerFactory`: subscribes on demand and emits deliveries into a stream

mod builder;
mod dispatch;
mod reactive;
mod spec;

pub use dispatch::{ConsumerDispatchEngine, IdleConsumer};
pub use reactive::{ReactiveConsumerFactory, ReactiveDelivery, ReactiveStream};
pub use spec::{ConsumerSpec, Handler, HandlerResult, SubscriptionSpec};
