//! Runtime wiring for declared producers and consumers.
//!
//! `Orchestrator` owns the lifecycle:
//! - Configuration validation and logging setup
//! - One broker client per configured cluster
//! - Producer creation and consumer subscription at startup
//! - Graceful shutdown, closing every client

mod orchestrator;

pub use orchestrator::{Orchestrator, OrchestratorBuilder};
