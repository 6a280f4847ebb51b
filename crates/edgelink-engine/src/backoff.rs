/*!
 * Retry delay policy.
 *
 * The n-th consecutive failure waits `min(initial * multiplier^(n-1), max)`,
 * optionally spread by a uniform jitter of `± jitter_fraction`. The policy is
 * stateless; callers supply the attempt count.
 */
use rand::Rng;
use serde::{Deserialize, Serialize};

use edgelink_core::config::BackoffConfig;

use crate::error::{Error, Result};

/// Exponential backoff with a ceiling and optional jitter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    initial_delay_ms: u64,
    multiplier: f64,
    max_delay_ms: u64,
    jitter_fraction: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
            jitter_fraction: 0.0,
        }
    }
}

impl BackoffPolicy {
    /// Build a policy from the `[adapter.backoff]` configuration section
    pub fn from_config(config: &BackoffConfig) -> Result<Self> {
        config.validate().map_err(|e| Error::config(e.to_string()))?;
        Ok(Self {
            initial_delay_ms: config.initial_delay_ms,
            multiplier: config.multiplier,
            max_delay_ms: config.max_delay_ms,
            jitter_fraction: config.jitter_fraction,
        })
    }

    /// Policy without jitter
    pub fn new(initial_delay_ms: u64, multiplier: f64, max_delay_ms: u64) -> Result<Self> {
        Self::from_config(&BackoffConfig {
            initial_delay_ms,
            multiplier,
            max_delay_ms,
            jitter_fraction: 0.0,
        })
    }

    /// Same policy with jitter enabled
    pub fn with_jitter(self, jitter_fraction: f64) -> Result<Self> {
        Self::from_config(&BackoffConfig {
            initial_delay_ms: self.initial_delay_ms,
            multiplier: self.multiplier,
            max_delay_ms: self.max_delay_ms,
            jitter_fraction,
        })
    }

    /// Delay the counters reset to after a success
    pub fn initial_delay_ms(&self) -> u64 {
        self.initial_delay_ms
    }

    /// Ceiling for the un-jittered delay
    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    /// Jitter fraction, 0 when disabled
    pub fn jitter_fraction(&self) -> f64 {
        self.jitter_fraction
    }

    /// Un-jittered delay for the given consecutive failure count.
    ///
    /// Attempt 0 (no failures) maps to the initial delay.
    pub fn nominal_delay_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.initial_delay_ms as f64 * self.multiplier.powi(exponent);
        if !delay.is_finite() || delay >= self.max_delay_ms as f64 {
            self.max_delay_ms
        } else {
            delay.round() as u64
        }
    }

    /// Delay to actually wait, jitter applied
    pub fn delay_ms<R: Rng>(&self, attempt: u32, rng: &mut R) -> u64 {
        let nominal = self.nominal_delay_ms(attempt);
        if self.jitter_fraction <= 0.0 {
            return nominal;
        }
        let spread = rng.gen_range(-self.jitter_fraction..=self.jitter_fraction);
        (nominal as f64 * (1.0 + spread)).round().max(0.0) as u64
    }
}
