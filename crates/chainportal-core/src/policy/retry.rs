//! Retry policy: exponential backoff, or an explicit delay schedule.

use std::time::Duration;

use crate::transport::RequestOptions;

/// Configuration for the retry policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try).
    pub max_retries: u32,
    /// Initial backoff delay.
    pub initial_backoff: Duration,
    /// Maximum backoff delay (caps exponential growth).
    pub max_backoff: Duration,
    /// Multiplier applied to backoff on each retry.
    pub multiplier: f64,
    /// Add `jitter_fraction * backoff / 2` on top of each delay (0.0 = none).
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

/// Stateless retry policy: computes the next delay given the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
    schedule: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            schedule: Vec::new(),
        }
    }

    /// Use fixed delays instead of exponential backoff.
    /// Entries are used in order; the last one repeats.
    pub fn with_schedule(mut self, schedule: Vec<Duration>) -> Self {
        self.schedule = schedule;
        self
    }

    /// This policy with the per-request overrides from `options` applied.
    pub fn for_request(&self, options: &RequestOptions) -> Self {
        let mut policy = self.clone();
        if let Some(attempts) = options.retry_attempts {
            policy.config.max_retries = attempts;
        }
        if let Some(schedule) = &options.retry_schedule {
            policy.schedule = schedule.clone();
        }
        policy
    }

    /// Returns the delay before the `attempt`-th retry (1-based).
    /// Returns `None` if `attempt` exceeds `max_retries`.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_retries {
            return None;
        }
        if let Some(last) = self.schedule.last() {
            let idx = (attempt as usize - 1).min(self.schedule.len() - 1);
            return Some(self.schedule.get(idx).copied().unwrap_or(*last));
        }

        let base_ms = self.config.initial_backoff.as_millis() as f64
            * self.config.multiplier.powi((attempt - 1) as i32);
        let cap_ms = self.config.max_backoff.as_millis() as f64;
        let capped = base_ms.min(cap_ms);

        let jitter_ms = capped * self.config.jitter_fraction * 0.5;
        let total_ms = (capped + jitter_ms) as u64;

        Some(Duration::from_millis(total_ms))
    }

    /// Returns `true` if any retries remain after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.config.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter_fraction: 0.0,
        }
    }

    #[test]
    fn first_retry_delay() {
        let policy = RetryPolicy::new(no_jitter(3));
        assert_eq!(policy.next_delay(1).unwrap().as_millis(), 100);
        assert_eq!(policy.next_delay(2).unwrap().as_millis(), 200);
        assert_eq!(policy.next_delay(3).unwrap().as_millis(), 400);
        assert!(policy.next_delay(4).is_none());
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            multiplier: 10.0,
            jitter_fraction: 0.0,
        });
        let d5 = policy.next_delay(5).unwrap();
        assert!(d5 <= Duration::from_millis(500), "d5={d5:?} exceeds max");
    }

    #[test]
    fn schedule_repeats_last_entry() {
        let policy = RetryPolicy::new(no_jitter(5))
            .with_schedule(vec![Duration::from_millis(10), Duration::from_millis(50)]);
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(10)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(50)));
        assert_eq!(policy.next_delay(5), Some(Duration::from_millis(50)));
        assert_eq!(policy.next_delay(6), None);
    }

    #[test]
    fn request_overrides() {
        let base = RetryPolicy::new(no_jitter(5));
        let opts = RequestOptions {
            retry_attempts: Some(1),
            retry_schedule: Some(vec![Duration::from_secs(2)]),
            ..Default::default()
        };
        let policy = base.for_request(&opts);
        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(2)));
        assert_eq!(policy.next_delay(2), None);
        assert_eq!(base.next_delay(2).unwrap().as_millis(), 200);
    }

    #[test]
    fn should_retry_boundary() {
        let policy = RetryPolicy::new(RetryConfig {
            max_retries: 2,
            ..Default::default()
        });
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
