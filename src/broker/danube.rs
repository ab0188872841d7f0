//! Broker client implementation on top of `danube-client`.
//!
//! Each subscribed consumer gets a delivery task that drains its message stream and
//! invokes the listener. Deliveries across all consumers of one client are bounded by
//! the cluster's `listener_threads`.
//!
//! Danube has no broker-side negative acknowledgement, so it is emulated here: the
//! message is fed back into the consumer's delivery task after a backoff, and once a
//! dead-letter policy is exhausted it is published to the dead-letter topic and acked.

use super::{
    BrokerClient, BrokerClientFactory, BrokerConsumer, BrokerMessage, BrokerProducer,
    ClientOptions, ConsumerOptions, DeadLetterPolicy, MessageId, MessageListener, OutboundFrame,
    ProducerOptions,
};
use crate::config::{Authentication, SubscriptionType};
use crate::retry::RedeliveryBackoff;
use crate::{OrchestratorError, OrchestratorResult};
use async_trait::async_trait;
use danube_client::{Consumer, DanubeClient, Producer, SubType};
use danube_core::message::StreamMessage;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Attribute carrying the message key across Danube
const KEY_ATTRIBUTE: &str = "danube.orchestrator.key";
/// Attribute carrying the producer event time across Danube
const EVENT_TIME_ATTRIBUTE: &str = "danube.orchestrator.event_time";

/// Factory for Danube-backed broker clients
#[derive(Debug, Clone, Copy, Default)]
pub struct DanubeClientFactory;

#[async_trait]
impl BrokerClientFactory for DanubeClientFactory {
    async fn connect(&self, options: ClientOptions) -> OrchestratorResult<Arc<dyn BrokerClient>> {
        check_supported(&options)?;

        info!(
            "Connecting Danube client for cluster [{}] at {}",
            options.cluster, options.service_url
        );

        let client = DanubeClient::builder()
            .service_url(&options.service_url)
            .build()
            .await
            .map_err(|e| {
                OrchestratorError::client_init_with_source(
                    format!("Failed to create Danube client for cluster [{}]", options.cluster),
                    e,
                )
            })?;

        Ok(Arc::new(DanubeBrokerClient {
            cluster: options.cluster.clone(),
            client,
            deliveries: Arc::new(Semaphore::new(options.listener_threads.max(1) as usize)),
            backoff: RedeliveryBackoff::new(
                options.starting_backoff_interval,
                options.max_backoff_interval,
            ),
            tasks: TaskSet::default(),
            consumers: Mutex::new(Vec::new()),
            producers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

fn check_supported(options: &ClientOptions) -> OrchestratorResult<()> {
    let method = match &options.authentication {
        Authentication::None => None,
        Authentication::Certificate { .. } => Some("certificate"),
        Authentication::Token(_) => Some("token"),
        Authentication::OAuth2 { .. } => Some("OAuth2"),
    };
    if let Some(method) = method {
        return Err(OrchestratorError::client_init(format!(
            "cluster [{}]: {} authentication is not supported by the Danube client",
            options.cluster, method
        )));
    }

    if options.tls.is_configured() {
        return Err(OrchestratorError::client_init(format!(
            "cluster [{}]: TLS trust settings are not supported by the Danube client",
            options.cluster
        )));
    }

    if let Some(listener) = &options.listener_name {
        debug!(
            "cluster [{}]: listener name '{}' is not used by the Danube client",
            options.cluster, listener
        );
    }

    Ok(())
}

struct DanubeBrokerClient {
    cluster: String,
    client: DanubeClient,
    /// Bounds concurrent deliveries across this client's consumers
    deliveries: Arc<Semaphore>,
    backoff: RedeliveryBackoff,
    /// Delivery task of every consumer
    tasks: TaskSet,
    consumers: Mutex<Vec<Arc<DanubeConsumer>>>,
    producers: Mutex<Vec<Arc<DanubeProducer>>>,
    closed: AtomicBool,
}

impl DanubeBrokerClient {
    fn ensure_open(&self) -> OrchestratorResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(OrchestratorError::client(format!(
                "client for cluster [{}] is closed",
                self.cluster
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerClient for DanubeBrokerClient {
    async fn create_producer(
        &self,
        options: ProducerOptions,
    ) -> OrchestratorResult<Arc<dyn BrokerProducer>> {
        self.ensure_open()?;

        let mut producer = self
            .client
            .new_producer()
            .with_topic(&options.topic)
            .with_name(&options.producer_name)
            .build();

        producer.create().await.map_err(|e| {
            OrchestratorError::client_with_source(
                format!("Failed to create producer for topic {}", options.topic),
                e,
            )
        })?;

        debug!(
            "Danube producer '{}' created for topic {} ({})",
            options.producer_name, options.topic, options.schema
        );

        let producer = Arc::new(DanubeProducer {
            topic: options.topic,
            inner: AsyncMutex::new(Some(producer)),
        });
        if let Ok(mut producers) = self.producers.lock() {
            producers.push(producer.clone());
        }
        Ok(producer)
    }

    async fn subscribe(
        &self,
        options: ConsumerOptions,
        listener: Arc<dyn MessageListener>,
    ) -> OrchestratorResult<Arc<dyn BrokerConsumer>> {
        self.ensure_open()?;

        let sub_type = match options.subscription_type {
            SubscriptionType::Exclusive => SubType::Exclusive,
            SubscriptionType::Shared => SubType::Shared,
            SubscriptionType::FailOver => SubType::FailOver,
            SubscriptionType::KeyShared => {
                return Err(OrchestratorError::client(format!(
                    "Key-shared subscriptions are not supported by Danube (topic {})",
                    options.topic
                )));
            }
        };

        if let Some(timeout) = options.ack_timeout {
            debug!(
                "Ack timeout {:?} for topic {} is left to the broker's reliable dispatch",
                timeout, options.topic
            );
        }

        let mut consumer = self
            .client
            .new_consumer()
            .with_topic(&options.topic)
            .with_consumer_name(&options.consumer_name)
            .with_subscription(&options.subscription)
            .with_subscription_type(sub_type)
            .build();

        consumer.subscribe().await.map_err(|e| {
            OrchestratorError::client_with_source(
                format!("Failed to subscribe to topic {}", options.topic),
                e,
            )
        })?;

        let stream = consumer.receive().await.map_err(|e| {
            OrchestratorError::client_with_source(
                format!("Failed to start message stream for topic {}", options.topic),
                e,
            )
        })?;

        let (redeliver_tx, redeliver_rx) = mpsc::unbounded_channel();
        let consumer = Arc::new(DanubeConsumer {
            topic: options.topic,
            subscription: options.subscription,
            consumer_name: options.consumer_name,
            inner: AsyncMutex::new(Some(consumer)),
            pending: Mutex::new(HashMap::new()),
            negative_acks: Mutex::new(HashMap::new()),
            redeliver: redeliver_tx,
            dead_letter: options.dead_letter,
            dead_letter_producer: AsyncMutex::new(None),
            client: self.client.clone(),
            backoff: self.backoff.clone(),
            redeliveries: TaskSet::default(),
        });

        let task = tokio::spawn(deliver(
            consumer.clone(),
            listener,
            stream,
            redeliver_rx,
            self.deliveries.clone(),
        ));
        self.tasks.push(task);
        if let Ok(mut consumers) = self.consumers.lock() {
            consumers.push(consumer.clone());
        }

        Ok(consumer)
    }

    async fn close(&self) -> OrchestratorResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let consumers = take_all(&self.consumers);
        let producers = take_all(&self.producers);
        info!(
            "Closing Danube client for cluster [{}] ({} consumer(s), {} producer(s))",
            self.cluster,
            consumers.len(),
            producers.len()
        );

        let mut failures = Vec::new();
        if let Err(e) = self.tasks.abort_all() {
            failures.push(e.to_string());
        }
        for consumer in consumers {
            if let Err(e) = consumer.release().await {
                failures.push(e.to_string());
            }
        }
        for producer in producers {
            producer.release().await;
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::client(format!(
                "client for cluster [{}] did not close cleanly: {}",
                self.cluster,
                failures.join("; ")
            )))
        }
    }
}

/// Spawned tasks owned by a client or consumer, aborted on close
#[derive(Default)]
struct TaskSet {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskSet {
    fn push(&self, handle: JoinHandle<()>) {
        match self.handles.lock() {
            Ok(mut handles) => {
                handles.retain(|h| !h.is_finished());
                handles.push(handle);
            }
            Err(_) => handle.abort(),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.handles.lock().map(|h| h.len()).unwrap_or(0)
    }

    fn abort_all(&self) -> OrchestratorResult<usize> {
        let handles = self
            .handles
            .lock()
            .map(|mut handles| std::mem::take(&mut *handles))
            .map_err(|_| OrchestratorError::client("task registry poisoned"))?;
        let count = handles.len();
        for handle in handles {
            handle.abort();
        }
        Ok(count)
    }
}

fn take_all<T>(items: &Mutex<Vec<T>>) -> Vec<T> {
    items
        .lock()
        .map(|mut items| std::mem::take(&mut *items))
        .unwrap_or_default()
}

/// Delivery task of one consumer
async fn deliver(
    consumer: Arc<DanubeConsumer>,
    listener: Arc<dyn MessageListener>,
    mut stream: mpsc::Receiver<StreamMessage>,
    mut redelivered: mpsc::UnboundedReceiver<StreamMessage>,
    deliveries: Arc<Semaphore>,
) {
    loop {
        let message = tokio::select! {
            received = stream.recv() => match received {
                Some(message) => message,
                None => {
                    info!("Message stream for topic {} closed", consumer.topic);
                    break;
                }
            },
            Some(message) = redelivered.recv() => message,
        };

        let Ok(_permit) = deliveries.acquire().await else {
            break;
        };

        let message = consumer.track(message);
        let handle: Arc<dyn BrokerConsumer> = consumer.clone();
        if let Err(e) = listener.received(handle, message).await {
            error!("Delivery callback failed on topic {}: {}", consumer.topic, e);
        }
    }
}

struct DanubeProducer {
    topic: String,
    /// Dropped on close, which ends the producer's broker stream
    inner: AsyncMutex<Option<Producer>>,
}

impl DanubeProducer {
    async fn release(&self) {
        if self.inner.lock().await.take().is_some() {
            debug!("Danube producer for topic {} released", self.topic);
        }
    }
}

#[async_trait]
impl BrokerProducer for DanubeProducer {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn send(&self, frame: OutboundFrame) -> OrchestratorResult<MessageId> {
        let mut attributes = frame.properties;
        if let Some(key) = frame.key {
            attributes.insert(KEY_ATTRIBUTE.to_string(), key);
        }
        if let Some(event_time) = frame.event_time {
            attributes.insert(EVENT_TIME_ATTRIBUTE.to_string(), event_time.to_string());
        }

        let mut producer = self.inner.lock().await;
        let producer = producer.as_mut().ok_or_else(|| {
            OrchestratorError::client(format!("producer for topic {} is closed", self.topic))
        })?;
        let id = producer.send(frame.payload, Some(attributes)).await?;
        Ok(MessageId::new(id.to_string()))
    }
}

struct DanubeConsumer {
    topic: String,
    subscription: String,
    consumer_name: String,
    /// Dropped on close, which ends the subscription stream
    inner: AsyncMutex<Option<Consumer>>,
    /// Delivered but not yet acknowledged
    pending: Mutex<HashMap<MessageId, StreamMessage>>,
    negative_acks: Mutex<HashMap<MessageId, u32>>,
    redeliver: mpsc::UnboundedSender<StreamMessage>,
    dead_letter: Option<DeadLetterPolicy>,
    dead_letter_producer: AsyncMutex<Option<Producer>>,
    client: DanubeClient,
    backoff: RedeliveryBackoff,
    /// Pending backoff timers of negatively acknowledged messages
    redeliveries: TaskSet,
}

impl DanubeConsumer {
    /// Stop redeliveries and drop the subscription and its dead-letter producer
    async fn release(&self) -> OrchestratorResult<()> {
        let timers = self.redeliveries.abort_all()?;
        self.inner.lock().await.take();
        self.dead_letter_producer.lock().await.take();
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
        debug!(
            "Danube consumer '{}' on topic {} released ({} redelivery timer(s) aborted)",
            self.consumer_name, self.topic, timers
        );
        Ok(())
    }

    /// Register a delivery and convert it for the listener
    fn track(&self, message: StreamMessage) -> BrokerMessage {
        let id = message_id(&message);
        let redelivery_count = self
            .negative_acks
            .lock()
            .map(|counts| counts.get(&id).copied().unwrap_or(0))
            .unwrap_or(0);
        let converted = to_broker_message(&message, id.clone(), redelivery_count);
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, message);
        }
        converted
    }

    fn pending(&self, id: &MessageId) -> OrchestratorResult<StreamMessage> {
        self.pending
            .lock()
            .ok()
            .and_then(|pending| pending.get(id).cloned())
            .ok_or_else(|| {
                OrchestratorError::client(format!(
                    "message {} is not pending on topic {}",
                    id, self.topic
                ))
            })
    }

    fn forget(&self, id: &MessageId) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(id);
        }
        if let Ok(mut counts) = self.negative_acks.lock() {
            counts.remove(id);
        }
    }

    async fn publish_dead_letter(
        &self,
        policy: &DeadLetterPolicy,
        message: &StreamMessage,
    ) -> OrchestratorResult<()> {
        if self.inner.lock().await.is_none() {
            return Err(OrchestratorError::client(format!(
                "consumer for topic {} is closed",
                self.topic
            )));
        }

        let topic = policy.topic_for(&self.topic, &self.subscription);
        let mut slot = self.dead_letter_producer.lock().await;

        if slot.is_none() {
            let mut producer = self
                .client
                .new_producer()
                .with_topic(&topic)
                .with_name(&format!("{}-dlq", self.consumer_name))
                .build();
            producer.create().await.map_err(|e| {
                OrchestratorError::client_with_source(
                    format!("Failed to create dead-letter producer for topic {}", topic),
                    e,
                )
            })?;
            *slot = Some(producer);
        }

        if let Some(producer) = slot.as_mut() {
            producer
                .send(message.payload.clone(), Some(message.attributes.clone()))
                .await?;
        }

        warn!(
            "Message {} exceeded {} redelivery attempt(s), routed to {}",
            message_id(message),
            policy.max_redeliver_count,
            topic
        );
        Ok(())
    }
}

#[async_trait]
impl BrokerConsumer for DanubeConsumer {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn subscription(&self) -> &str {
        &self.subscription
    }

    fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    async fn acknowledge(&self, message: &BrokerMessage) -> OrchestratorResult<()> {
        let pending = self.pending(&message.message_id)?;
        let mut consumer = self.inner.lock().await;
        let consumer = consumer.as_mut().ok_or_else(|| {
            OrchestratorError::client(format!("consumer for topic {} is closed", self.topic))
        })?;
        consumer.ack(&pending).await?;
        self.forget(&message.message_id);
        Ok(())
    }

    async fn negative_acknowledge(&self, message: &BrokerMessage) -> OrchestratorResult<()> {
        let pending = self.pending(&message.message_id)?;
        let attempts = self
            .negative_acks
            .lock()
            .map(|mut counts| {
                let count = counts.entry(message.message_id.clone()).or_insert(0);
                *count += 1;
                *count
            })
            .unwrap_or(1);

        if let Some(policy) = &self.dead_letter {
            if policy.is_exhausted(attempts) {
                self.publish_dead_letter(policy, &pending).await?;
                return self.acknowledge(message).await;
            }
        }

        let delay = self.backoff.delay(attempts);
        let redeliver = self.redeliver.clone();
        self.redeliveries.push(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // The receiver is gone once the consumer's delivery task stops
            let _ = redeliver.send(pending);
        }));

        Ok(())
    }
}

fn message_id(message: &StreamMessage) -> MessageId {
    MessageId::new(format!(
        "{}:{}:{}",
        message.msg_id.topic_name, message.msg_id.producer_id, message.msg_id.topic_offset
    ))
}

fn to_broker_message(message: &StreamMessage, id: MessageId, redelivery_count: u32) -> BrokerMessage {
    let mut properties = message.attributes.clone();
    let key = properties.remove(KEY_ATTRIBUTE);
    let event_time = properties
        .remove(EVENT_TIME_ATTRIBUTE)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    BrokerMessage {
        message_id: id,
        sequence_id: message.request_id as u64,
        payload: message.payload.clone(),
        properties,
        topic: message.msg_id.topic_name.clone(),
        key,
        event_time,
        publish_time: message.publish_time,
        producer_name: message.producer_name.clone(),
        redelivery_count,
    }
}
