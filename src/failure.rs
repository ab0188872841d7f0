//! Failure channel - hot broadcast of failed deliveries.
//!
//! Every handler failure is published here after the message was negatively
//! acknowledged. Publishing never waits on subscribers: with nobody listening the
//! event is discarded, and a subscriber that falls more than the buffer size behind
//! skips the oldest events it missed.

use crate::broker::{BrokerConsumer, BrokerMessage};
use std::error::Error;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default buffer size of the failure channel
pub const DEFAULT_FAILURE_BUFFER: usize = 256;

/// A delivery whose handler failed
#[derive(Clone)]
pub struct FailedMessage {
    cause: Arc<dyn Error + Send + Sync>,
    consumer: Arc<dyn BrokerConsumer>,
    message: BrokerMessage,
}

impl FailedMessage {
    pub fn new(
        cause: Arc<dyn Error + Send + Sync>,
        consumer: Arc<dyn BrokerConsumer>,
        message: BrokerMessage,
    ) -> Self {
        Self {
            cause,
            consumer,
            message,
        }
    }

    /// The error raised by the handler
    pub fn cause(&self) -> &(dyn Error + Send + Sync) {
        self.cause.as_ref()
    }

    /// Consumer the message was delivered to
    pub fn consumer(&self) -> &Arc<dyn BrokerConsumer> {
        &self.consumer
    }

    /// The original message
    pub fn message(&self) -> &BrokerMessage {
        &self.message
    }
}

impl std::fmt::Debug for FailedMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailedMessage")
            .field("cause", &self.cause.to_string())
            .field("topic", &self.consumer.topic())
            .field("subscription", &self.consumer.subscription())
            .field("message_id", &self.message.message_id)
            .finish()
    }
}

/// Multicast channel of [`FailedMessage`]s
#[derive(Clone)]
pub struct FailureChannel {
    sender: broadcast::Sender<FailedMessage>,
}

impl FailureChannel {
    /// Channel buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish a failure without blocking
    ///
    /// Returns the number of subscribers that will see it.
    pub fn publish(&self, failed: FailedMessage) -> usize {
        match self.sender.send(failed) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("No failure subscribers, dropping failed message");
                0
            }
        }
    }

    /// Receiver for failures published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<FailedMessage> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Run `observer` for every failure published from now on
    ///
    /// Must be called within a Tokio runtime. The observer runs until the returned
    /// subscription is disposed or dropped.
    pub fn on_failure<F>(&self, observer: F) -> FailureSubscription
    where
        F: Fn(FailedMessage) + Send + 'static,
    {
        let mut receiver = self.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(failed) => observer(failed),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Failure subscriber lagged, {} failure(s) skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        FailureSubscription { task }
    }
}

impl Default for FailureChannel {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_BUFFER)
    }
}

impl std::fmt::Debug for FailureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureChannel")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Handle of an observer registered with [`FailureChannel::on_failure`]
///
/// Dropping the handle disposes the observer.
#[must_use = "dropping the subscription stops the observer"]
#[derive(Debug)]
pub struct FailureSubscription {
    task: JoinHandle<()>,
}

impl FailureSubscription {
    /// Stop observing failures
    pub fn dispose(self) {
        self.task.abort();
    }

    pub fn is_disposed(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for FailureSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
