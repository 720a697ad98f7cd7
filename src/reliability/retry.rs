use clap::ValueEnum;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay grows between send attempts of one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
pub enum RetryStrategy {
    /// base, 2x base, 4x base, ... (default)
    #[default]
    #[value(name = "exponential")]
    #[serde(rename = "exponential")]
    ExponentialBackoff,
    /// base, 2x base, 3x base, ...
    #[value(name = "linear")]
    #[serde(rename = "linear")]
    LinearBackoff,
    /// base every time
    #[value(name = "fixed")]
    #[serde(rename = "fixed")]
    FixedDelay,
}

/// Bounded per-message retry policy used by the delivery worker.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total send attempts per message, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: RetryStrategy,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            strategy: RetryStrategy::ExponentialBackoff,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Whether a message that has failed `attempts` times should be dropped.
    pub fn should_give_up(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Delay before retry number `attempt` (0-based: the first retry is 0).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_millis = self.base_delay.as_millis() as u64;
        let delay = match self.strategy {
            RetryStrategy::ExponentialBackoff => {
                let multiplier = 2_u64.saturating_pow(attempt);
                Duration::from_millis(base_millis.saturating_mul(multiplier))
            }
            RetryStrategy::LinearBackoff => {
                Duration::from_millis(base_millis.saturating_mul(attempt as u64 + 1))
            }
            RetryStrategy::FixedDelay => self.base_delay,
        };

        let capped_delay = std::cmp::min(delay, self.max_delay);

        if self.jitter {
            apply_jitter(capped_delay)
        } else {
            capped_delay
        }
    }
}

fn apply_jitter(delay: Duration) -> Duration {
    let mut rng = rand::rng();
    let jitter_factor = rng.random_range(0.5..1.5); // ±50% jitter
    Duration::from_millis((delay.as_millis() as f64 * jitter_factor) as u64)
}
