//! Reactive consumer example
//!
//! Reads sensor readings as a stream. The simple stream acknowledges every reading it
//! emits; the full stream hands out deliveries and the loop decides per message.
//!
//! Usage:
//!   DANUBE_SERVICE_URL=http://localhost:6650 \
//!   cargo run --example reactive_consumer

use danube_orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorResult, SubscriptionSpec};
use futures::StreamExt;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Reading {
    sensor: String,
    celsius: f64,
}

#[tokio::main]
async fn main() -> OrchestratorResult<()> {
    let config = OrchestratorConfig::from_env()?;
    let orchestrator = Orchestrator::builder(config).start().await?;
    let reactive = orchestrator.reactive();

    let mut readings = reactive
        .new_simple::<Reading>(SubscriptionSpec::json::<Reading>("readings"))
        .await?;

    let mut alerts = reactive
        .new_consumer(
            SubscriptionSpec::json::<Reading>("readings").with_subscription_name("alerting"),
        )
        .await?;

    let simple = tokio::spawn(async move {
        while let Some(item) = readings.next().await {
            match item {
                Ok(reading) => println!("{}: {:.1}°C", reading.sensor, reading.celsius),
                Err(e) => eprintln!("Skipped reading: {}", e),
            }
        }
    });

    let full = tokio::spawn(async move {
        while let Some(delivery) = alerts.next().await {
            let outcome = match delivery.value::<Reading>() {
                Ok(reading) if reading.celsius > 80.0 => {
                    println!("ALERT {} at {:.1}°C", reading.sensor, reading.celsius);
                    delivery.ack().await
                }
                Ok(_) => delivery.ack().await,
                Err(e) => {
                    eprintln!("Rejecting {}: {}", delivery.message().message_id, e);
                    delivery.nack().await
                }
            };
            if let Err(e) = outcome {
                eprintln!("Acknowledgement failed: {}", e);
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    simple.abort();
    full.abort();
    orchestrator.close().await
}
