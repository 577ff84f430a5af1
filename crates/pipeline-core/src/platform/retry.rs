//! Retry policy for asynchronous deliveries.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound for a single redelivery delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug, Error, PartialEq)]
pub enum RetryPolicyError {
    #[error("delivery.max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("delivery.multiplier must be a finite number >= 1.0 (got {0})")]
    Multiplier(f64),
}

/// How often and how fast the notification facility re-delivers an event
/// whose invocation did not succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total deliveries including the first one. `1` disables redelivery.
    pub max_attempts: u32,

    #[serde(rename = "base_delay_ms", with = "millis")]
    pub base_delay: Duration,

    pub multiplier: f64,
}

impl RetryPolicy {
    /// Asynchronous invocation default: the first try plus two retries,
    /// one and two minutes apart.
    pub fn default_async() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default_async()
        }
    }

    pub fn validate(&self) -> Result<(), RetryPolicyError> {
        if self.max_attempts == 0 {
            return Err(RetryPolicyError::ZeroAttempts);
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(RetryPolicyError::Multiplier(self.multiplier));
        }
        Ok(())
    }

    /// Delay before the next delivery after `attempts` failed ones.
    ///
    /// delay = min(base_delay * multiplier^(attempts - 1), MAX_RETRY_DELAY)
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(delay_secs)
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY)
    }

    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::default_async()
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
