//! Backoff settings for re-establishing a lost subscription.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How a subscription recovers when its delivery stream ends without being
/// cancelled (channel closed by the broker, connection dropped, ...).
///
/// Attempt `n` waits `initial_backoff_ms * multiplier^(n-1)`, capped at
/// `max_backoff_ms`, plus up to `jitter_ms` of random delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResubscribeConfig {
    /// Off by default: a subscription whose stream ends just stops.
    pub enabled: bool,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Growth factor between attempts. Clamped to at least `1.0`.
    pub multiplier: f64,
    /// Give up after this many failed attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
    pub jitter_ms: u64,
}

impl Default for ResubscribeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
            max_attempts: None,
            jitter_ms: 250,
        }
    }
}

impl ResubscribeConfig {
    /// Enabled with default timings.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Returns a copy with out-of-range values clamped.
    pub fn validated(mut self) -> Self {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            warn!(multiplier = self.multiplier, "backoff multiplier below 1.0, clamping");
            self.multiplier = 1.0;
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            warn!(
                initial = self.initial_backoff_ms,
                max = self.max_backoff_ms,
                "max_backoff_ms below initial_backoff_ms, raising"
            );
            self.max_backoff_ms = self.initial_backoff_ms;
        }
        if self.max_attempts == Some(0) {
            self.max_attempts = Some(1);
        }
        self
    }

    /// Delay before attempt `attempt` (1-based), without jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let max = Duration::from_millis(self.max_backoff_ms);
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        if !millis.is_finite() || millis >= self.max_backoff_ms as f64 {
            max
        } else {
            Duration::from_millis(millis as u64)
        }
    }

    /// Delay before attempt `attempt` (1-based), with jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            Duration::from_millis(rand::rng().random_range(0..self.jitter_ms))
        } else {
            Duration::ZERO
        };
        self.base_delay(attempt) + jitter
    }

    /// `true` once `attempt` exceeds the configured cap.
    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempt > max)
    }
}
