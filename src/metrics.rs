//! Metrics for message dispatch, producers and consumers.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::Once;
use std::time::{Duration, Instant};

static DESCRIBE: Once = Once::new();

/// Metrics collector for one cluster/topic pair
#[derive(Debug, Clone)]
pub struct DispatchMetrics {
    /// Cluster name for labeling
    cluster: String,
    /// Topic name for labeling
    topic: String,
}

impl DispatchMetrics {
    /// Create a new metrics collector
    pub fn new(cluster: impl Into<String>, topic: impl Into<String>) -> Self {
        DESCRIBE.call_once(Self::register_metrics);

        Self {
            cluster: cluster.into(),
            topic: topic.into(),
        }
    }

    /// Register metric descriptions
    fn register_metrics() {
        // Counters
        describe_counter!(
            "danube_orchestrator_messages_received_total",
            "Total number of messages delivered to consumers"
        );
        describe_counter!(
            "danube_orchestrator_messages_acked_total",
            "Total number of messages acknowledged after successful handling"
        );
        describe_counter!(
            "danube_orchestrator_messages_nacked_total",
            "Total number of messages negatively acknowledged"
        );
        describe_counter!(
            "danube_orchestrator_failures_published_total",
            "Total number of failed deliveries published to the failure channel"
        );
        describe_counter!(
            "danube_orchestrator_messages_sent_total",
            "Total number of messages sent by declared producers"
        );

        // Histograms
        describe_histogram!(
            "danube_orchestrator_handler_duration_seconds",
            "Time spent in the consumer handler for each message"
        );

        // Gauges
        describe_gauge!(
            "danube_orchestrator_inflight_messages",
            "Current number of messages being handled"
        );
        describe_gauge!(
            "danube_orchestrator_active_consumers",
            "Number of subscribed consumers"
        );
        describe_gauge!(
            "danube_orchestrator_active_producers",
            "Number of created producers"
        );
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Record a delivered message
    pub fn record_received(&self) {
        counter!(
            "danube_orchestrator_messages_received_total",
            "cluster" => self.cluster.clone(),
            "topic" => self.topic.clone(),
        )
        .increment(1);
    }

    /// Record a message acknowledged
    pub fn record_ack(&self) {
        counter!(
            "danube_orchestrator_messages_acked_total",
            "cluster" => self.cluster.clone(),
            "topic" => self.topic.clone(),
        )
        .increment(1);
    }

    /// Record a negative acknowledgement
    pub fn record_nack(&self, reason: &str) {
        counter!(
            "danube_orchestrator_messages_nacked_total",
            "cluster" => self.cluster.clone(),
            "topic" => self.topic.clone(),
            "reason" => reason.to_string(),
        )
        .increment(1);
    }

    /// Record a failure handed to the failure channel
    pub fn record_failure_published(&self) {
        counter!(
            "danube_orchestrator_failures_published_total",
            "cluster" => self.cluster.clone(),
            "topic" => self.topic.clone(),
        )
        .increment(1);
    }

    /// Record a producer send
    pub fn record_sent(&self, ok: bool) {
        counter!(
            "danube_orchestrator_messages_sent_total",
            "cluster" => self.cluster.clone(),
            "topic" => self.topic.clone(),
            "status" => if ok { "ok" } else { "error" },
        )
        .increment(1);
    }

    /// Record handler duration
    pub fn record_handler_time(&self, duration: Duration) {
        histogram!(
            "danube_orchestrator_handler_duration_seconds",
            "cluster" => self.cluster.clone(),
            "topic" => self.topic.clone(),
        )
        .record(duration.as_secs_f64());
    }

    fn increment_inflight(&self) {
        gauge!(
            "danube_orchestrator_inflight_messages",
            "cluster" => self.cluster.clone(),
            "topic" => self.topic.clone(),
        )
        .increment(1.0);
    }

    fn decrement_inflight(&self) {
        gauge!(
            "danube_orchestrator_inflight_messages",
            "cluster" => self.cluster.clone(),
            "topic" => self.topic.clone(),
        )
        .decrement(1.0);
    }

    /// Count a consumer as subscribed
    pub fn consumer_subscribed(&self) {
        gauge!(
            "danube_orchestrator_active_consumers",
            "cluster" => self.cluster.clone(),
        )
        .increment(1.0);
    }

    /// Count a producer as created
    pub fn producer_created(&self) {
        gauge!(
            "danube_orchestrator_active_producers",
            "cluster" => self.cluster.clone(),
        )
        .increment(1.0);
    }

    /// Reset the active consumer and producer gauges of a closed cluster
    pub fn cluster_closed(cluster: &str) {
        gauge!(
            "danube_orchestrator_active_consumers",
            "cluster" => cluster.to_string(),
        )
        .set(0.0);
        gauge!(
            "danube_orchestrator_active_producers",
            "cluster" => cluster.to_string(),
        )
        .set(0.0);
    }
}

/// Tracks one handler invocation
///
/// Holds the message as inflight until dropped.
pub struct HandlerTimer {
    start: Instant,
    metrics: DispatchMetrics,
}

impl HandlerTimer {
    pub fn start(metrics: &DispatchMetrics) -> Self {
        metrics.increment_inflight();
        Self {
            start: Instant::now(),
            metrics: metrics.clone(),
        }
    }

    /// Stop the timer and record the duration
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();
        self.metrics.record_handler_time(elapsed);
        elapsed
    }
}

impl Drop for HandlerTimer {
    fn drop(&mut self) {
        self.metrics.decrement_inflight();
    }
}
