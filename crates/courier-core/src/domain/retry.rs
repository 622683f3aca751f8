//! Retry policy: decides backoff delays.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff, capped at `max_delay`.
///
/// delay = base_delay * multiplier^(attempts - 1), where `attempts` is the
/// attempt count *after* the failure being retried (1-indexed).
///
/// Example with base_delay=1s, multiplier=2.0:
/// - 1st retry: 1s
/// - 2nd retry: 2s
/// - 3rd retry: 4s
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base_delay_ms: base_delay.as_millis() as u64,
            multiplier,
            max_delay_ms: max_delay.as_millis() as u64,
        }
    }

    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        // multiplier < 1 would shrink delays; clamp so retries never get sooner
        let multiplier = self.multiplier.max(1.0);
        let delay_ms = self.base_delay_ms as f64 * multiplier.powi(exponent);
        let capped = if delay_ms.is_finite() {
            delay_ms.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        Duration::from_millis(capped as u64)
    }
}
