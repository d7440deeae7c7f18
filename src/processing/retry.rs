//! Exponential backoff with jitter for transient pipeline failures.

use std::time::Duration;

use crate::core::config::ProcessingSettings;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn from_settings(settings: &ProcessingSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: settings.backoff_base,
            max_delay: settings.backoff_max,
            jitter: true,
        }
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Delay before attempt `attempt + 1`, after `attempt` failures (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let base_ms = self.base_delay.as_millis() as u64;
        let delay_ms = base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay.as_millis() as u64);

        // ±25% random variation
        let final_ms = if self.jitter && delay_ms > 0 {
            let jitter = (delay_ms / 4) as f64;
            let offset = (rand::random::<f64>() * 2.0 - 1.0) * jitter;
            ((delay_ms as f64) + offset).max(0.0) as u64
        } else {
            delay_ms
        };

        Duration::from_millis(final_ms)
    }
}
