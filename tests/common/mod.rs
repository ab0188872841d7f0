//! In-process broker used by the integration tests
//!
//! Records every option it is handed, counts acknowledgements and routes a message
//! to its dead-letter topic once the consumer's policy is exhausted.

#![allow(dead_code)]

use async_trait::async_trait;
use danube_orchestrator::{
    BrokerClient, BrokerClientFactory, BrokerConsumer, BrokerMessage, BrokerProducer,
    ClientOptions, ClusterProperties, ConsumerOptions, MessageId, MessageListener,
    OrchestratorConfig, OrchestratorError, OrchestratorResult, OutboundFrame, ProducerOptions,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Fake broker client factory
#[derive(Default)]
pub struct FakeBroker {
    clients: Mutex<Vec<Arc<FakeClient>>>,
    fail_connect: HashSet<String>,
    fail_close: HashSet<String>,
    fail_producer: bool,
    fail_subscribe: bool,
    connects: AtomicUsize,
}

impl FakeBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Clients of these clusters fail to close
    pub fn failing_close(clusters: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            fail_close: clusters.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        })
    }

    /// Connecting these clusters fails
    pub fn failing_connect(clusters: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            fail_connect: clusters.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        })
    }

    /// Every producer creation fails
    pub fn failing_producers() -> Arc<Self> {
        Arc::new(Self {
            fail_producer: true,
            ..Self::default()
        })
    }

    /// Every subscription fails
    pub fn failing_subscriptions() -> Arc<Self> {
        Arc::new(Self {
            fail_subscribe: true,
            ..Self::default()
        })
    }

    pub fn client(&self, cluster: &str) -> Arc<FakeClient> {
        self.clients
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.options.cluster == cluster)
            .cloned()
            .unwrap_or_else(|| panic!("no client for cluster {}", cluster))
    }

    pub fn clients(&self) -> Vec<Arc<FakeClient>> {
        self.clients.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerClientFactory for FakeBroker {
    async fn connect(&self, options: ClientOptions) -> OrchestratorResult<Arc<dyn BrokerClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.contains(&options.cluster) {
            return Err(OrchestratorError::client(format!(
                "connection refused: {}",
                options.service_url
            )));
        }

        let client = Arc::new(FakeClient {
            fail_close: self.fail_close.contains(&options.cluster),
            fail_producer: self.fail_producer,
            fail_subscribe: self.fail_subscribe,
            options,
            producers: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
        });
        self.clients.lock().unwrap().push(client.clone());
        Ok(client)
    }
}

pub struct FakeClient {
    pub options: ClientOptions,
    fail_close: bool,
    fail_producer: bool,
    fail_subscribe: bool,
    producers: Mutex<Vec<Arc<FakeProducer>>>,
    consumers: Mutex<Vec<Arc<FakeConsumer>>>,
    close_calls: AtomicUsize,
}

impl FakeClient {
    pub fn producers(&self) -> Vec<Arc<FakeProducer>> {
        self.producers.lock().unwrap().clone()
    }

    pub fn consumers(&self) -> Vec<Arc<FakeConsumer>> {
        self.consumers.lock().unwrap().clone()
    }

    pub fn consumer(&self, topic: &str) -> Arc<FakeConsumer> {
        self.consumers()
            .into_iter()
            .find(|c| c.options.topic == topic)
            .unwrap_or_else(|| panic!("no consumer for topic {}", topic))
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerClient for FakeClient {
    async fn create_producer(
        &self,
        options: ProducerOptions,
    ) -> OrchestratorResult<Arc<dyn BrokerProducer>> {
        if self.fail_producer {
            return Err(OrchestratorError::client("producer rejected by broker"));
        }
        let producer = Arc::new(FakeProducer {
            options,
            sent: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        });
        self.producers.lock().unwrap().push(producer.clone());
        Ok(producer)
    }

    async fn subscribe(
        &self,
        options: ConsumerOptions,
        listener: Arc<dyn MessageListener>,
    ) -> OrchestratorResult<Arc<dyn BrokerConsumer>> {
        if self.fail_subscribe {
            return Err(OrchestratorError::client("subscription rejected by broker"));
        }
        let consumer = Arc::new(FakeConsumer {
            options,
            listener,
            acks: Mutex::new(Vec::new()),
            nacks: Mutex::new(Vec::new()),
            negative_counts: Mutex::new(HashMap::new()),
            redeliveries: Mutex::new(VecDeque::new()),
            dead_lettered: Mutex::new(Vec::new()),
        });
        self.consumers.lock().unwrap().push(consumer.clone());
        Ok(consumer)
    }

    async fn close(&self) -> OrchestratorResult<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(OrchestratorError::client(format!(
                "failed to close client for {}",
                self.options.cluster
            )));
        }
        Ok(())
    }
}

pub struct FakeProducer {
    pub options: ProducerOptions,
    sent: Mutex<Vec<OutboundFrame>>,
    next_id: AtomicU64,
}

impl FakeProducer {
    pub fn sent(&self) -> Vec<OutboundFrame> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrokerProducer for FakeProducer {
    fn topic(&self) -> &str {
        &self.options.topic
    }

    async fn send(&self, frame: OutboundFrame) -> OrchestratorResult<MessageId> {
        self.sent.lock().unwrap().push(frame);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(MessageId::new(format!("{}:{}", self.options.topic, id)))
    }
}

pub struct FakeConsumer {
    pub options: ConsumerOptions,
    listener: Arc<dyn MessageListener>,
    acks: Mutex<Vec<MessageId>>,
    nacks: Mutex<Vec<MessageId>>,
    negative_counts: Mutex<HashMap<MessageId, u32>>,
    redeliveries: Mutex<VecDeque<BrokerMessage>>,
    dead_lettered: Mutex<Vec<(String, BrokerMessage)>>,
}

impl FakeConsumer {
    /// Hand a message to the installed listener
    pub async fn deliver(self: &Arc<Self>, message: BrokerMessage) -> OrchestratorResult<()> {
        let consumer: Arc<dyn BrokerConsumer> = self.clone();
        self.listener.received(consumer, message).await
    }

    /// Deliver queued redeliveries until none are left
    pub async fn drain_redeliveries(self: &Arc<Self>) -> usize {
        let mut delivered = 0;
        loop {
            let next = self.redeliveries.lock().unwrap().pop_front();
            match next {
                Some(message) => {
                    let _ = self.deliver(message).await;
                    delivered += 1;
                }
                None => return delivered,
            }
        }
    }

    pub fn acks(&self) -> Vec<MessageId> {
        self.acks.lock().unwrap().clone()
    }

    pub fn nacks(&self) -> Vec<MessageId> {
        self.nacks.lock().unwrap().clone()
    }

    pub fn pending_redeliveries(&self) -> usize {
        self.redeliveries.lock().unwrap().len()
    }

    /// Dead-lettered messages with the topic they were routed to
    pub fn dead_lettered(&self) -> Vec<(String, BrokerMessage)> {
        self.dead_lettered.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrokerConsumer for FakeConsumer {
    fn topic(&self) -> &str {
        &self.options.topic
    }

    fn subscription(&self) -> &str {
        &self.options.subscription
    }

    fn consumer_name(&self) -> &str {
        &self.options.consumer_name
    }

    async fn acknowledge(&self, message: &BrokerMessage) -> OrchestratorResult<()> {
        self.acks.lock().unwrap().push(message.message_id.clone());
        Ok(())
    }

    async fn negative_acknowledge(&self, message: &BrokerMessage) -> OrchestratorResult<()> {
        self.nacks.lock().unwrap().push(message.message_id.clone());

        let attempts = {
            let mut counts = self.negative_counts.lock().unwrap();
            let count = counts.entry(message.message_id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        match &self.options.dead_letter {
            Some(policy) if policy.is_exhausted(attempts) => {
                let topic = policy.topic_for(&self.options.topic, &self.options.subscription);
                self.dead_lettered
                    .lock()
                    .unwrap()
                    .push((topic, message.clone()));
            }
            _ => {
                let mut redelivery = message.clone();
                redelivery.redelivery_count = attempts;
                self.redeliveries.lock().unwrap().push_back(redelivery);
            }
        }
        Ok(())
    }
}

/// Configuration with the given clusters, all using default properties
pub fn config(clusters: &[&str]) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    for cluster in clusters {
        config.clusters.insert(
            cluster.to_string(),
            ClusterProperties::new(format!("http://{}-broker:6650", cluster)),
        );
    }
    config
}

/// A broker message as the fake broker would deliver it
pub fn message(id: &str, topic: &str, payload: &[u8]) -> BrokerMessage {
    let mut message = BrokerMessage::new(id, topic, payload.to_vec());
    message.sequence_id = 1;
    message.publish_time = 1_700_000_000_000;
    message.producer_name = "test-producer".to_string();
    message
}
