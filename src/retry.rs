//! Backoff used when redelivering negatively acknowledged messages.

use std::time::Duration;

/// Exponential backoff between redeliveries
///
/// Internal type - configured through the cluster's `starting_backoff_interval_ms`
/// and `max_backoff_interval_sec`.
#[derive(Debug, Clone)]
pub(crate) struct RedeliveryBackoff {
    /// Delay before the first redelivery
    initial: Duration,
    /// Upper bound for any delay
    max: Duration,
    multiplier: f64,
    /// Spread delays to avoid redelivery storms
    jitter: bool,
}

impl RedeliveryBackoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Disable jitter
    #[cfg(test)]
    pub(crate) fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay before redelivery number `attempt` (1-indexed)
    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let max_ms = self.max.as_millis() as f64;
        let mut delay_ms =
            self.initial.as_millis() as f64 * self.multiplier.powi((attempt - 1) as i32);
        delay_ms = delay_ms.min(max_ms);

        if self.jitter {
            use rand::Rng;
            let jitter_factor = rand::rng().random_range(0.5..1.5);
            delay_ms = (delay_ms * jitter_factor).min(max_ms);
        }

        Duration::from_millis(delay_ms as u64)
    }
}

impl Default for RedeliveryBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(10))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth() {
        let backoff =
            RedeliveryBackoff::new(Duration::from_millis(100), Duration::from_secs(10)).without_jitter();

        assert_eq!(backoff.delay(0), Duration::ZERO);
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_capped_at_max() {
        let backoff =
            RedeliveryBackoff::new(Duration::from_millis(1000), Duration::from_secs(5)).without_jitter();
        assert_eq!(backoff.delay(10), Duration::from_secs(5));
    }

    #[test]
    fn test_max_never_below_initial() {
        let backoff =
            RedeliveryBackoff::new(Duration::from_secs(2), Duration::from_secs(1)).without_jitter();
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
    }

    #[test]
    fn test_jitter_range() {
        let backoff = RedeliveryBackoff::default();
        for _ in 0..20 {
            let delay = backoff.delay(2);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(300));
        }
    }
}
