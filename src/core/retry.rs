//! Retry budget and backoff policies for transient export failures.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries allowed after the first failed attempt (0 disables retry)
    pub max_retries: u32,
    /// Initial backoff duration
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Backoff multiplier (e.g., 2.0 for exponential backoff)
    pub multiplier: f64,
    /// Add jitter to prevent thundering herd
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            multiplier: 1.5,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Retry configuration that never retries
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Decides how long to wait before a retry.
pub trait Backoff: Send + Sync {
    /// Delay before retry number `retry` (1-based).
    fn delay(&self, retry: u32) -> Duration;
}

/// Exponential backoff capped at a maximum, with optional jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    jitter: bool,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration, multiplier: f64, jitter: bool) -> Self {
        Self {
            initial,
            max,
            multiplier: multiplier.max(1.0),
            jitter,
        }
    }

    /// Backoff without jitter, so delays are exact
    fn base_delay(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max.as_secs_f64() {
            return self.max;
        }
        Duration::from_secs_f64(secs)
    }
}

impl From<&RetryConfig> for ExponentialBackoff {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.initial_backoff,
            config.max_backoff,
            config.multiplier,
            config.jitter,
        )
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, retry: u32) -> Duration {
        let backoff = self.base_delay(retry);
        if !self.jitter {
            return backoff;
        }

        // Up to 10% extra to spread out simultaneous retries
        let jitter = backoff.mul_f64(rand::random::<f64>() * 0.1);
        (backoff + jitter).min(self.max)
    }
}

/// Same delay before every retry
#[derive(Debug, Clone, Copy)]
pub struct ConstantBackoff(pub Duration);

impl Backoff for ConstantBackoff {
    fn delay(&self, _retry: u32) -> Duration {
        self.0
    }
}
