//! Declarative producer/consumer example
//!
//! Declares one producer and two consumers on the `default` cluster, publishes a few
//! orders and prints every delivery failure.
//!
//! Usage:
//!   DANUBE_SERVICE_URL=http://localhost:6650 \
//!   ORDERS_TOPIC=orders \
//!   cargo run --example declarative_consumer

use danube_orchestrator::{
    ConsumerSpec, Envelope, Handler, HandlerError, Orchestrator, OrchestratorConfig,
    OrchestratorResult, OutboundMessage, ProducerSpec, SubscriptionSpec, SubscriptionType,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Order {
    order_id: String,
    amount: f64,
}

#[tokio::main]
async fn main() -> OrchestratorResult<()> {
    let mut config = OrchestratorConfig::from_env()?;
    config
        .properties
        .insert("app".to_string(), "order-demo".to_string());

    let orchestrator = Orchestrator::builder(config)
        .producer(ProducerSpec::json::<Order>("${ORDERS_TOPIC:orders}"))
        // Payload handler: fails every order above 1000 so it ends up in the DLQ
        .consumer(ConsumerSpec::new(
            "order-audit",
            SubscriptionSpec::json::<Order>("${ORDERS_TOPIC:orders}")
                .with_subscription_type(SubscriptionType::Shared)
                .with_max_redeliver_count(3),
            Handler::typed(|order: Order| async move {
                if order.amount > 1000.0 {
                    return Err(HandlerError::from(format!(
                        "order {} needs manual review",
                        order.order_id
                    )));
                }
                println!("Audited order {} ({:.2})", order.order_id, order.amount);
                Ok(())
            }),
        ))
        // Envelope handler: sees keys and properties
        .consumer(ConsumerSpec::new(
            "order-tracker",
            SubscriptionSpec::json::<Order>("${ORDERS_TOPIC:orders}")
                .with_subscription_name("${app}-tracker"),
            Handler::envelope(|envelope: Envelope| async move {
                println!(
                    "Order {} from {:?} (key={:?}, redelivery={})",
                    envelope.message_id(),
                    envelope.get_property("source"),
                    envelope.key(),
                    envelope.redelivery_count()
                );
                Ok(())
            }),
        ))
        .start()
        .await?;

    let _failures = orchestrator.on_failure(|failed| {
        eprintln!(
            "Delivery of {} on {} failed: {}",
            failed.message().message_id,
            failed.consumer().topic(),
            failed.cause()
        );
    });

    if let Some(producer) = orchestrator.producer("${ORDERS_TOPIC:orders}") {
        for (i, amount) in [42.0, 1250.0, 99.5].into_iter().enumerate() {
            let order = Order {
                order_id: format!("ORD-{}", i + 1),
                amount,
            };
            let message = OutboundMessage::from_json(&order)?
                .with_key(order.order_id.clone())
                .with_property("source", "demo");
            let id = producer.send_message(message).await?;
            println!("Published {} as {}", order.order_id, id);
        }
    }

    println!("Press Ctrl-C to stop");
    orchestrator.run_until_shutdown().await
}
