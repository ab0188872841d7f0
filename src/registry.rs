//! Registries of broker clients and declared producers.
//!
//! `ClusterClientRegistry` is built first; `ProducerRegistry` and the consumer side
//! borrow client handles from it.

mod clients;
mod producers;

pub use clients::ClusterClientRegistry;
pub use producers::{ProducerHandle, ProducerRegistry, ProducerSpec};
