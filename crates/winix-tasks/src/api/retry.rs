//! ============================================================================
//! Backend Retry Policy
//! ============================================================================
//! Only transient failures are retried: transport errors, HTTP 408, 429 and
//! 5xx. A 4xx answer is the backend's verdict on the task and is final.
//! Delays double per retry up to a cap, with up to 50% random spread.
//! ============================================================================

use rand::Rng;
use std::time::Duration;

/// How verification requests are retried
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay
    pub max_backoff_ms: u64,
    /// Spread delays so clients do not retry in lockstep
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 300,
            max_backoff_ms: 3000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let doubled = self
            .initial_backoff_ms
            .saturating_mul(1u64 << retry.min(32));
        let ms = doubled.min(self.max_backoff_ms);

        if !self.jitter || ms == 0 {
            return Duration::from_millis(ms);
        }
        let spread = rand::thread_rng().gen_range(0..=ms / 2);
        Duration::from_millis(ms + spread)
    }

    /// Wait after a 429 before trying again
    pub fn rate_limit_wait(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// What a failed request means for the retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Final,
    RateLimited,
}

/// Classify a transport error by its message
pub fn classify_transport_error(message: &str) -> FailureKind {
    let message = message.to_lowercase();
    let mentions = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

    if mentions(&["429", "too many requests", "rate limit"]) {
        FailureKind::RateLimited
    } else if mentions(&["builder error", "relative url", "invalid url", "unsupported"]) {
        // the request itself is broken; sending it again will not help
        FailureKind::Final
    } else {
        FailureKind::Transient
    }
}

/// Classify an HTTP status returned by the backend
pub fn classify_status(status: u16) -> FailureKind {
    match status {
        429 => FailureKind::RateLimited,
        408 | 500..=599 => FailureKind::Transient,
        _ => FailureKind::Final,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steady() -> RetryPolicy {
        RetryPolicy {
            jitter: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_transport_errors() {
        assert_eq!(
            classify_transport_error("error sending request: connection refused"),
            FailureKind::Transient
        );
        assert_eq!(classify_transport_error("operation timed out"), FailureKind::Transient);
        assert_eq!(classify_transport_error("dns error: no record"), FailureKind::Transient);
        assert_eq!(classify_transport_error("HTTP 429 Too Many Requests"), FailureKind::RateLimited);
        assert_eq!(
            classify_transport_error("builder error: relative URL without a base"),
            FailureKind::Final
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(classify_status(400), FailureKind::Final);
        assert_eq!(classify_status(404), FailureKind::Final);
        assert_eq!(classify_status(408), FailureKind::Transient);
        assert_eq!(classify_status(429), FailureKind::RateLimited);
        assert_eq!(classify_status(503), FailureKind::Transient);
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let policy = steady();
        let delays: Vec<u64> = (0..5).map(|r| policy.backoff(r).as_millis() as u64).collect();
        assert_eq!(delays, vec![300, 600, 1200, 2400, 3000]);
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(3000));
    }

    #[test]
    fn test_jitter_stays_within_half() {
        let policy = RetryPolicy {
            initial_backoff_ms: 800,
            ..Default::default()
        };
        for _ in 0..20 {
            let ms = policy.backoff(0).as_millis();
            assert!((800..=1200).contains(&ms), "delay {} out of range", ms);
        }
    }
}
