//! Backoff policy for retrying transient lookup failures

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default delay before the first retry in milliseconds
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
/// Default delay growth factor between retries
pub const DEFAULT_MULTIPLIER: f64 = 2.0;
/// Default upper bound for a single delay in milliseconds
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Exponential backoff applied to transient failures
///
/// A source that keeps failing transiently is called `1 + max_retries`
/// times before the caller moves on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds
    pub base_delay_ms: u64,
    /// Growth factor applied per retry
    pub multiplier: f64,
    /// Upper bound for a single delay in milliseconds
    pub max_delay_ms: u64,
    /// Randomize each delay within [delay / 2, delay]
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            multiplier: DEFAULT_MULTIPLIER,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay to wait before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let raw = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        let millis = if self.jitter && capped >= 2.0 {
            rand::rng().random_range(capped / 2.0..=capped)
        } else {
            capped
        };
        Duration::from_millis(millis as u64)
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<(), String> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err("retry multiplier must be a finite number >= 1.0".to_string());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err("retry max_delay_ms must be >= base_delay_ms".to_string());
        }
        Ok(())
    }
}
