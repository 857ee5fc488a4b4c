//! # Retry Logic and Backoff Strategies
//!
//! Backoff is a pure function of the attempt count, so it can be tested without
//! timers. [`BackoffPolicy::delay`] takes the jitter sample as an argument and
//! [`BackoffPolicy::next_delay`] draws it from `rand`.
//!
//! ## Usage
//!
//! ```rust
//! use garage_sync::client::offline::retry::BackoffPolicy;
//! use std::time::Duration;
//!
//! let policy = BackoffPolicy::default();
//! assert_eq!(policy.delay(1, 0.0), Duration::from_secs(1));
//! assert_eq!(policy.delay(10, 0.0), Duration::from_secs(30));
//! ```

use std::time::Duration;

use rand::Rng;

use crate::shared::config::AppConfig;
use crate::shared::error::SyncError;

/// Exponential backoff with symmetric jitter and a hard cap
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failure
    pub base: Duration,
    /// No delay ever exceeds this
    pub cap: Duration,
    /// Relative jitter, 0.2 means ±20%
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            base: Duration::from_millis(config.backoff_base_ms),
            cap: Duration::from_millis(config.backoff_cap_ms),
            jitter: config.backoff_jitter,
        }
    }

    /// Delay before retry number `attempt` (1-based), with `jitter_sample` in `[-1, 1]`
    pub fn delay(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let raw = self.base.saturating_mul(1u32 << exponent).min(self.cap);

        let factor = (1.0 + self.jitter * jitter_sample.clamp(-1.0, 1.0)).max(0.0);
        let millis = (raw.as_millis() as f64 * factor).round() as u64;
        Duration::from_millis(millis).min(self.cap)
    }

    /// Delay before retry number `attempt`, jittered randomly
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let sample = rand::thread_rng().gen_range(-1.0..=1.0);
        self.delay(attempt, sample)
    }
}

/// What the sync manager does with a failed remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Keep queued and try again after a backoff delay
    Backoff,
    /// Keep queued but stop retrying until a human intervenes
    Park,
}

impl RetryDisposition {
    pub fn for_error(error: &SyncError) -> Self {
        if error.is_transient() {
            Self::Backoff
        } else {
            Self::Park
        }
    }
}
