//! Dispatch engine and orchestrator startup against the in-process broker

mod common;

use common::{config, message, FakeBroker};
use danube_orchestrator::{
    BrokerMessage, ClusterClientRegistry, ClusterProperties, ConsumerDefaults,
    ConsumerDispatchEngine, ConsumerInterceptor, ConsumerSpec, Envelope, FailureChannel, Handler,
    HandlerResult, LiteralResolver, MessageId, Orchestrator, ProducerSpec, SubscriptionSpec,
    SubscriptionType,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct Order {
    order_id: String,
}

async fn clients(broker: &Arc<FakeBroker>, clusters: &[&str]) -> ClusterClientRegistry {
    ClusterClientRegistry::connect(config(clusters).clusters, broker.as_ref())
        .await
        .unwrap()
}

async fn start(
    clients: &ClusterClientRegistry,
    specs: Vec<ConsumerSpec>,
    failures: FailureChannel,
) -> ConsumerDispatchEngine {
    ConsumerDispatchEngine::start(clients, specs, Arc::new(LiteralResolver), None, failures)
        .await
        .unwrap()
}

fn counting_handler(calls: Arc<AtomicUsize>, fail: bool) -> Handler {
    Handler::payload(move |_value| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            let result: HandlerResult = if fail {
                Err("handler rejected the message".into())
            } else {
                Ok(())
            };
            result
        }
    })
}

#[tokio::test]
async fn test_successful_handler_acks_once() {
    let broker = FakeBroker::new();
    let clients = clients(&broker, &["default"]).await;
    let failures = FailureChannel::new(16);
    let mut failed = failures.subscribe();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler = Handler::typed(move |order: Order| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(order.order_id);
            Ok(())
        }
    });

    let engine = start(
        &clients,
        vec![ConsumerSpec::new(
            "audit",
            SubscriptionSpec::json::<Order>("orders"),
            handler,
        )],
        failures,
    )
    .await;
    assert_eq!(engine.consumers().len(), 1);

    let consumer = broker.client("default").consumer("/default/orders");
    consumer
        .deliver(message("m1", "/default/orders", br#"{"order_id":"ORD-1"}"#))
        .await
        .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["ORD-1".to_string()]);
    assert_eq!(consumer.acks(), vec![MessageId::from("m1")]);
    assert!(consumer.nacks().is_empty());
    assert!(failed.try_recv().is_err());
}

#[tokio::test]
async fn test_wrapped_handler_receives_metadata() {
    let broker = FakeBroker::new();
    let clients = clients(&broker, &["default"]).await;

    let received: Arc<Mutex<Option<Envelope>>> = Arc::new(Mutex::new(None));
    let slot = received.clone();
    let handler = Handler::envelope(move |envelope: Envelope| {
        let slot = slot.clone();
        async move {
            *slot.lock().unwrap() = Some(envelope);
            Ok(())
        }
    });
    assert!(handler.wrapped());

    start(
        &clients,
        vec![ConsumerSpec::new("audit", SubscriptionSpec::string("greetings"), handler)],
        FailureChannel::default(),
    )
    .await;

    let mut delivered = message("m7", "/default/greetings", b"hello");
    delivered.sequence_id = 42;
    delivered.key = Some("k1".into());
    delivered.event_time = 1_699_999_999_000;
    delivered.publish_time = 1_700_000_000_500;
    delivered.properties.insert("origin".into(), "test".into());
    delivered.properties.insert("trace".into(), "abc".into());

    broker
        .client("default")
        .consumer("/default/greetings")
        .deliver(delivered)
        .await
        .unwrap();

    let envelope = received.lock().unwrap().take().unwrap();
    assert_eq!(envelope.value(), &json!("hello"));
    assert_eq!(envelope.message_id().as_str(), "m7");
    assert_eq!(envelope.sequence_id(), 42);
    assert_eq!(envelope.key(), Some("k1"));
    assert_eq!(envelope.get_property("origin"), Some("test"));
    assert_eq!(
        envelope.properties(),
        &HashMap::from([
            ("origin".to_string(), "test".to_string()),
            ("trace".to_string(), "abc".to_string()),
        ])
    );
    assert_eq!(envelope.topic(), "/default/greetings");
    assert_eq!(envelope.event_time(), 1_699_999_999_000);
    assert_eq!(envelope.publish_time(), 1_700_000_000_500);
    assert_eq!(envelope.producer_name(), "test-producer");
    assert_eq!(envelope.redelivery_count(), 0);
    assert_eq!(envelope.raw_payload(), b"hello");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deliveries_settle_each_message_once() {
    let broker = FakeBroker::new();
    let clients = clients(&broker, &["default"]).await;
    let failures = FailureChannel::new(64);
    let mut failed = failures.subscribe();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let handler = Handler::payload(move |value| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            let result: HandlerResult = match value.as_str() {
                Some(text) if text.starts_with("bad") => Err(format!("rejected {}", text).into()),
                _ => Ok(()),
            };
            result
        }
    });

    start(
        &clients,
        vec![ConsumerSpec::new("audit", SubscriptionSpec::string("orders"), handler)],
        failures,
    )
    .await;
    let consumer = broker.client("default").consumer("/default/orders");

    let deliveries: Vec<_> = (0..40)
        .map(|i| {
            let consumer = consumer.clone();
            let payload = if i % 4 == 0 {
                format!("bad-{}", i)
            } else {
                format!("good-{}", i)
            };
            tokio::spawn(async move {
                consumer
                    .deliver(message(&format!("m{}", i), "/default/orders", payload.as_bytes()))
                    .await
            })
        })
        .collect();
    for delivery in deliveries {
        delivery.await.unwrap().unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 40);

    let mut acked: Vec<String> = consumer.acks().iter().map(|id| id.to_string()).collect();
    let mut nacked: Vec<String> = consumer.nacks().iter().map(|id| id.to_string()).collect();
    acked.sort();
    nacked.sort();
    let mut expected_failures: Vec<String> = (0..40).step_by(4).map(|i| format!("m{}", i)).collect();
    expected_failures.sort();
    assert_eq!(acked.len(), 30);
    acked.dedup();
    assert_eq!(acked.len(), 30);
    assert_eq!(nacked, expected_failures);

    let mut published = Vec::new();
    while let Ok(event) = failed.try_recv() {
        published.push(event.message().message_id.to_string());
    }
    published.sort();
    assert_eq!(published, expected_failures);
}

#[tokio::test]
async fn test_failing_handler_nacks_and_publishes_one_failure() {
    let broker = FakeBroker::new();
    let clients = clients(&broker, &["default"]).await;
    let failures = FailureChannel::new(16);
    let mut failed = failures.subscribe();
    let calls = Arc::new(AtomicUsize::new(0));

    start(
        &clients,
        vec![ConsumerSpec::new(
            "audit",
            SubscriptionSpec::string("orders"),
            counting_handler(calls.clone(), true),
        )],
        failures,
    )
    .await;

    let consumer = broker.client("default").consumer("/default/orders");
    consumer
        .deliver(message("m1", "/default/orders", b"boom"))
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(consumer.acks().is_empty());
    assert_eq!(consumer.nacks(), vec![MessageId::from("m1")]);

    let event = failed.try_recv().unwrap();
    assert_eq!(event.cause().to_string(), "handler rejected the message");
    assert_eq!(event.message().message_id.as_str(), "m1");
    assert_eq!(event.consumer().topic(), "/default/orders");
    assert!(failed.try_recv().is_err());
}

#[tokio::test]
async fn test_panicking_handler_counts_as_failure() {
    let broker = FakeBroker::new();
    let clients = clients(&broker, &["default"]).await;
    let failures = FailureChannel::new(4);
    let mut failed = failures.subscribe();

    async fn explode(_value: serde_json::Value) -> HandlerResult {
        panic!("kaboom")
    }

    start(
        &clients,
        vec![ConsumerSpec::new(
            "audit",
            SubscriptionSpec::string("orders"),
            Handler::payload(explode),
        )],
        failures,
    )
    .await;

    let consumer = broker.client("default").consumer("/default/orders");
    consumer
        .deliver(message("m1", "/default/orders", b"x"))
        .await
        .unwrap();

    assert_eq!(consumer.nacks().len(), 1);
    assert!(failed.try_recv().unwrap().cause().to_string().contains("kaboom"));
}

#[tokio::test]
async fn test_undecodable_payload_is_a_failure() {
    let broker = FakeBroker::new();
    let clients = clients(&broker, &["default"]).await;
    let failures = FailureChannel::new(4);
    let mut failed = failures.subscribe();
    let calls = Arc::new(AtomicUsize::new(0));

    start(
        &clients,
        vec![ConsumerSpec::new(
            "audit",
            SubscriptionSpec::json::<Order>("orders"),
            counting_handler(calls.clone(), false),
        )],
        failures,
    )
    .await;

    let consumer = broker.client("default").consumer("/default/orders");
    consumer
        .deliver(message("m1", "/default/orders", b"{not json"))
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(consumer.nacks().len(), 1);
    assert!(failed.try_recv().is_ok());
}

#[tokio::test]
async fn test_exhausted_redelivery_routes_to_default_dead_letter_topic() {
    let broker = FakeBroker::new();
    let mut cfg = config(&[]);
    cfg.clusters.insert(
        "eu".into(),
        ClusterProperties::new("http://eu-broker:6650")
            .with_token("secret")
            .with_auto_start(true),
    );
    let clients = ClusterClientRegistry::connect(cfg.clusters, broker.as_ref())
        .await
        .unwrap();

    let failures = FailureChannel::new(16);
    let mut failed = failures.subscribe();
    let calls = Arc::new(AtomicUsize::new(0));

    let engine = start(
        &clients,
        vec![ConsumerSpec::new(
            "order-audit",
            SubscriptionSpec::string("orders")
                .with_cluster("eu")
                .with_max_redeliver_count(3),
            counting_handler(calls.clone(), true),
        )],
        failures,
    )
    .await;

    assert_eq!(engine.consumers().len(), 1);
    assert_eq!(engine.consumers()[0].topic(), "/default/orders");

    let consumer = broker.client("eu").consumer("/default/orders");
    let policy = consumer.options.dead_letter.clone().unwrap();
    assert_eq!(policy.max_redeliver_count, 3);
    assert!(policy.dead_letter_topic.is_none());

    consumer
        .deliver(message("m1", "/default/orders", b"bad order"))
        .await
        .unwrap();
    assert_eq!(consumer.drain_redeliveries().await, 2);

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(consumer.nacks().len(), 3);
    assert!(consumer.acks().is_empty());
    assert_eq!(consumer.pending_redeliveries(), 0);

    let dead = consumer.dead_lettered();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].0, "/default/orders-subscriptionorder-audit-DLQ");
    assert_eq!(dead[0].1.message_id.as_str(), "m1");
    assert_eq!(dead[0].1.redelivery_count, 2);

    let mut published = 0;
    while failed.try_recv().is_ok() {
        published += 1;
    }
    assert_eq!(published, 3);
}

#[tokio::test]
async fn test_auto_start_needs_cluster_and_declaration() {
    let broker = FakeBroker::new();
    let mut cfg = config(&["default"]);
    cfg.clusters.insert(
        "paused".into(),
        ClusterProperties::new("http://paused-broker:6650").with_auto_start(false),
    );
    let clients = ClusterClientRegistry::connect(cfg.clusters, broker.as_ref())
        .await
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let engine = start(
        &clients,
        vec![
            ConsumerSpec::new(
                "live",
                SubscriptionSpec::string("a"),
                counting_handler(calls.clone(), false),
            ),
            ConsumerSpec::new(
                "manual",
                SubscriptionSpec::string("b"),
                counting_handler(calls.clone(), false),
            )
            .with_auto_start(false),
            ConsumerSpec::new(
                "cluster-paused",
                SubscriptionSpec::string("c").with_cluster("paused"),
                counting_handler(calls.clone(), false),
            ),
        ],
        FailureChannel::default(),
    )
    .await;

    assert_eq!(engine.consumers().len(), 1);
    assert_eq!(engine.consumers()[0].topic(), "/default/a");

    let idle: Vec<_> = engine.idle().iter().map(|c| c.id.as_str()).collect();
    assert_eq!(idle, vec!["manual", "cluster-paused"]);
    assert_eq!(engine.idle()[1].cluster, "paused");
    assert_eq!(engine.idle()[1].options.topic, "/default/c");

    assert_eq!(broker.client("default").consumers().len(), 1);
    assert!(broker.client("paused").consumers().is_empty());
}

#[tokio::test]
async fn test_names_and_defaults_come_from_the_cluster() {
    let broker = FakeBroker::new();
    let mut cfg = config(&["default"]);
    let mut tuned = ClusterProperties::new("http://tuned-broker:6650").with_consumer_defaults(
        ConsumerDefaults {
            ack_timeout_ms: 1500,
            dead_letter_max_redeliver_count: Some(5),
            subscription_type: Some("shared".into()),
        },
    );
    tuned.consumer_name_delimiter = "-".into();
    tuned.tenant = Some("acme".into());
    tuned.namespace = "billing".into();
    cfg.clusters.insert("tuned".into(), tuned);
    let clients = ClusterClientRegistry::connect(cfg.clusters, broker.as_ref())
        .await
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    start(
        &clients,
        vec![
            ConsumerSpec::new(
                "invoices",
                SubscriptionSpec::string("invoices").with_cluster("tuned"),
                counting_handler(calls.clone(), false),
            ),
            ConsumerSpec::new(
                "refunds",
                SubscriptionSpec::string("refunds")
                    .with_cluster("tuned")
                    .with_namespace("payments")
                    .with_consumer_name("refund-reader")
                    .with_subscription_name("refund-sub")
                    .with_subscription_type(SubscriptionType::FailOver)
                    .with_max_redeliver_count(2)
                    .with_dead_letter_topic("/acme/payments/refunds-dead"),
                counting_handler(calls.clone(), false),
            ),
            ConsumerSpec::new(
                "plain",
                SubscriptionSpec::string("persistent://acme/raw/plain"),
                counting_handler(calls.clone(), false),
            ),
        ],
        FailureChannel::default(),
    )
    .await;

    let tuned = broker.client("tuned");
    let invoices = tuned.consumer("/acme/billing/invoices");
    assert_eq!(invoices.options.consumer_name, "consumer-invoices");
    assert_eq!(invoices.options.subscription, "subscription-invoices");
    assert_eq!(invoices.options.subscription_type, SubscriptionType::Shared);
    assert_eq!(invoices.options.ack_timeout, Some(Duration::from_millis(1500)));
    assert_eq!(invoices.options.dead_letter.as_ref().unwrap().max_redeliver_count, 5);

    let refunds = tuned.consumer("/acme/payments/refunds");
    assert_eq!(refunds.options.consumer_name, "refund-reader");
    assert_eq!(refunds.options.subscription, "refund-sub");
    assert_eq!(refunds.options.subscription_type, SubscriptionType::FailOver);
    let policy = refunds.options.dead_letter.as_ref().unwrap();
    assert_eq!(policy.max_redeliver_count, 2);
    assert_eq!(
        policy.topic_for(&refunds.options.topic, &refunds.options.subscription),
        "/acme/payments/refunds-dead"
    );

    let plain = broker.client("default").consumer("persistent://acme/raw/plain");
    assert_eq!(plain.options.consumer_name, "consumerplain");
    assert_eq!(plain.options.subscription_type, SubscriptionType::Exclusive);
    assert!(plain.options.ack_timeout.is_none());
    assert!(plain.options.dead_letter.is_none());
}

#[tokio::test]
async fn test_invalid_default_subscription_type_fails_startup() {
    let broker = FakeBroker::new();
    let mut cfg = config(&[]);
    cfg.clusters.insert(
        "default".into(),
        ClusterProperties::default().with_consumer_defaults(ConsumerDefaults {
            subscription_type: Some("round-robin".into()),
            ..ConsumerDefaults::default()
        }),
    );
    let clients = ClusterClientRegistry::connect(cfg.clusters, broker.as_ref())
        .await
        .unwrap();

    let err = ConsumerDispatchEngine::start(
        &clients,
        vec![ConsumerSpec::new(
            "audit",
            SubscriptionSpec::string("orders"),
            counting_handler(Arc::new(AtomicUsize::new(0)), false),
        )],
        Arc::new(LiteralResolver),
        None,
        FailureChannel::default(),
    )
    .await
    .unwrap_err();

    assert!(err.is_consumer_init());
}

#[derive(Default)]
struct RecordingInterceptor {
    consumed: AtomicUsize,
    acked: AtomicUsize,
    nacked: AtomicUsize,
}

impl ConsumerInterceptor for RecordingInterceptor {
    fn before_consume(&self, _topic: &str, _message: &BrokerMessage) {
        self.consumed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_acknowledge(&self, _topic: &str, _message_id: &MessageId) {
        self.acked.fetch_add(1, Ordering::SeqCst);
    }

    fn on_negative_acknowledge(&self, _topic: &str, _message_id: &MessageId) {
        self.nacked.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_interceptor_hooks_follow_the_outcome() {
    let broker = FakeBroker::new();
    let mut cfg = config(&["default"]);
    cfg.clusters.insert(
        "traced".into(),
        ClusterProperties::new("http://traced-broker:6650").with_interceptors(true),
    );
    let clients = ClusterClientRegistry::connect(cfg.clusters, broker.as_ref())
        .await
        .unwrap();
    let interceptor = Arc::new(RecordingInterceptor::default());
    let calls = Arc::new(AtomicUsize::new(0));

    ConsumerDispatchEngine::start(
        &clients,
        vec![
            ConsumerSpec::new(
                "ok",
                SubscriptionSpec::string("ok").with_cluster("traced"),
                counting_handler(calls.clone(), false),
            ),
            ConsumerSpec::new(
                "bad",
                SubscriptionSpec::string("bad").with_cluster("traced"),
                counting_handler(calls.clone(), true),
            ),
            ConsumerSpec::new(
                "untraced",
                SubscriptionSpec::string("untraced"),
                counting_handler(calls.clone(), false),
            ),
        ],
        Arc::new(LiteralResolver),
        Some(interceptor.clone() as Arc<dyn ConsumerInterceptor>),
        FailureChannel::default(),
    )
    .await
    .unwrap();

    let traced = broker.client("traced");
    traced
        .consumer("/default/ok")
        .deliver(message("m1", "/default/ok", b"a"))
        .await
        .unwrap();
    traced
        .consumer("/default/bad")
        .deliver(message("m2", "/default/bad", b"b"))
        .await
        .unwrap();
    broker
        .client("default")
        .consumer("/default/untraced")
        .deliver(message("m3", "/default/untraced", b"c"))
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(interceptor.consumed.load(Ordering::SeqCst), 2);
    assert_eq!(interceptor.acked.load(Ordering::SeqCst), 1);
    assert_eq!(interceptor.nacked.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_orchestrator_wires_producers_and_consumers() {
    let broker = FakeBroker::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let orchestrator = Orchestrator::builder(config(&["default"]))
        .factory(broker.clone())
        .resolver(Arc::new(LiteralResolver))
        .producer(ProducerSpec::string("greetings"))
        .consumer(ConsumerSpec::new(
            "greeter",
            SubscriptionSpec::string("greetings"),
            counting_handler(calls.clone(), true),
        ))
        .start()
        .await
        .unwrap();

    let failures = Arc::new(AtomicUsize::new(0));
    let observed = failures.clone();
    let subscription = orchestrator.on_failure(move |_failed| {
        observed.fetch_add(1, Ordering::SeqCst);
    });

    orchestrator
        .producer("greetings")
        .unwrap()
        .send("hi")
        .await
        .unwrap();
    assert_eq!(orchestrator.consumers().len(), 1);

    let consumer = broker.client("default").consumer("/default/greetings");
    consumer
        .deliver(message("m1", "/default/greetings", b"hi"))
        .await
        .unwrap();

    for _ in 0..100 {
        if failures.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(failures.load(Ordering::SeqCst), 1);
    subscription.dispose();

    orchestrator.close().await.unwrap();
    assert_eq!(broker.client("default").close_calls(), 1);
}

#[tokio::test]
async fn test_failed_startup_closes_connected_clients() {
    let broker = FakeBroker::failing_subscriptions();

    let err = Orchestrator::builder(config(&["default", "eu"]))
        .factory(broker.clone())
        .resolver(Arc::new(LiteralResolver))
        .producer(ProducerSpec::string("orders"))
        .consumer(ConsumerSpec::new(
            "audit",
            SubscriptionSpec::string("orders").with_cluster("eu"),
            counting_handler(Arc::new(AtomicUsize::new(0)), false),
        ))
        .start()
        .await
        .err()
        .unwrap();

    assert!(err.is_consumer_init());
    for client in broker.clients() {
        assert_eq!(client.close_calls(), 1, "cluster {}", client.options.cluster);
    }
}
