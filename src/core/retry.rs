//! Retry policy configuration for tasks.
//!
//! Supports exponential backoff with configurable max attempts, base delay,
//! and multiplier.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for a task.
///
/// `max_attempts` counts total attempts, including the initial one, and is
/// never less than 1. The delay before retry `n` (after failed attempt `n`)
/// is `base_delay * multiplier^(n-1)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts (1 = no retries).
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(with = "serde_duration")]
    pub base_delay: Duration,

    /// Multiplier applied to the delay for each subsequent retry.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Create a policy with a fixed delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: delay,
            multiplier: 1.0,
        }
    }

    /// Create a policy with exponential backoff.
    ///
    /// # Arguments
    /// * `max_attempts` - Total attempts, including the initial one (min 1)
    /// * `base_delay` - Delay before the first retry
    /// * `multiplier` - Growth factor per retry (1.0 = fixed delay)
    pub fn exponential(max_attempts: u32, base_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            multiplier,
        }
    }

    /// Check if retries are enabled.
    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 1
    }

    /// Check if another attempt is allowed given the attempts already made.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the retry that follows failed attempt `attempt` (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.base_delay.mul_f64(self.multiplier.powi(exponent as i32))
    }
}

impl Default for RetryPolicy {
    /// Default policy: single attempt, no retries.
    fn default() -> Self {
        Self::none()
    }
}

/// Serde helper for Duration serialization.
///
/// Serializes Duration as milliseconds.
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
