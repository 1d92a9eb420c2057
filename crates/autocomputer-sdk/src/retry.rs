use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::TransportError;

/// How a failure affects the run session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Connection-level failure; another attempt may succeed.
    Recoverable,
    /// Protocol or application failure; the run ends.
    Fatal,
}

/// Growth of the delay between connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Backoff {
    /// `base_delay × attempt`.
    Linear,
    /// `base_delay × factor^(attempt - 1)`.
    Exponential { factor: f64 },
}

/// Retry budget and backoff used by a run session for recoverable failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional connection attempts after the first one.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay unit for the first retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff")]
    pub backoff: Backoff,
    /// Upper bound for computed delays.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_base_delay_ms() -> u64 {
    1_000
}

const fn default_backoff() -> Backoff {
    Backoff::Linear
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear(default_max_retries(), default_base_delay_ms())
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: default_base_delay_ms(),
            backoff: default_backoff(),
            max_delay_ms: default_max_delay_ms(),
        }
    }

    pub const fn linear(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            backoff: Backoff::Linear,
            max_delay_ms: default_max_delay_ms(),
        }
    }

    pub fn exponential(max_retries: u32, base_delay_ms: u64, factor: f64) -> Self {
        let factor = if factor.is_finite() && factor > 0.0 { factor } else { 2.0 };
        Self {
            max_retries,
            base_delay_ms,
            backoff: Backoff::Exponential { factor },
            max_delay_ms: default_max_delay_ms(),
        }
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Classifies a transport failure.
    pub fn classify(&self, err: &TransportError) -> Disposition {
        match err {
            TransportError::Connect { .. } | TransportError::Interrupted { .. } => {
                Disposition::Recoverable
            }
            TransportError::Rejected { .. } | TransportError::Protocol { .. } => {
                Disposition::Fatal
            }
        }
    }

    pub fn can_retry(&self, retries_done: u32) -> bool {
        retries_done < self.max_retries
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let raw = match self.backoff {
            Backoff::Linear => self.base_delay_ms.saturating_mul(u64::from(attempt)),
            Backoff::Exponential { factor } => {
                let exp = factor.powi(attempt.saturating_sub(1) as i32);
                (self.base_delay_ms as f64 * exp).round() as u64
            }
        };
        Duration::from_millis(raw.min(self.max_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_allows_three_linear_retries() {
        let p = RetryPolicy::default();
        assert!(p.can_retry(2));
        assert!(!p.can_retry(3));
        assert_eq!(p.backoff_duration(1), Duration::from_secs(1));
        assert_eq!(p.backoff_duration(3), Duration::from_secs(3));
    }

    #[test]
    fn none_policy_has_zero_retries() {
        assert!(!RetryPolicy::none().can_retry(0));
    }

    #[test]
    fn exponential_policy_grows_with_cap() {
        let p = RetryPolicy::exponential(3, 100, 2.0).with_max_delay_ms(250);
        assert_eq!(p.backoff_duration(1).as_millis(), 100);
        assert_eq!(p.backoff_duration(2).as_millis(), 200);
        assert_eq!(p.backoff_duration(3).as_millis(), 250);
    }

    #[test]
    fn non_finite_or_non_positive_factor_falls_back_to_doubling() {
        for factor in [f64::NAN, f64::INFINITY, 0.0, -1.5] {
            let p = RetryPolicy::exponential(3, 100, factor);
            assert_eq!(p.backoff, Backoff::Exponential { factor: 2.0 }, "{factor}");
            assert_eq!(p.backoff_duration(2).as_millis(), 200);
        }
    }

    #[test]
    fn connection_failures_are_recoverable_and_rejections_fatal() {
        let p = RetryPolicy::default();
        assert_eq!(
            p.classify(&TransportError::connect("refused")),
            Disposition::Recoverable
        );
        assert_eq!(
            p.classify(&TransportError::interrupted("reset")),
            Disposition::Recoverable
        );
        assert_eq!(
            p.classify(&TransportError::rejected(500, "boom")),
            Disposition::Fatal
        );
        assert_eq!(
            p.classify(&TransportError::protocol("no ack")),
            Disposition::Fatal
        );
    }

    #[test]
    fn deserializes_with_defaults() {
        let p: RetryPolicy = serde_json::from_str(r#"{"max_retries": 5}"#).expect("policy");
        assert_eq!(p.max_retries, 5);
        assert_eq!(p.base_delay_ms, 1_000);
        assert_eq!(p.backoff, Backoff::Linear);
    }
}
