//! # Retry Scheduling
//!
//! Tracks when each failed mutation becomes eligible for another attempt. Delays come
//! from [`BackoffPolicy`]; the schedule only remembers the resulting deadline and keeps
//! the delays of one mutation non-decreasing, since jitter alone could make attempt
//! `n + 1` wait less than attempt `n` once the cap is reached.
//!
//! Deadlines use [`tokio::time::Instant`], so tests can drive them with paused time.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use crate::client::offline::retry::BackoffPolicy;
use crate::shared::mutation::MutationId;

#[derive(Debug, Clone, Copy)]
struct RetryEntry {
    next_at: Instant,
    last_delay: Duration,
}

/// Per-mutation retry deadlines
#[derive(Debug, Default)]
pub struct RetrySchedule {
    policy: BackoffPolicy,
    entries: Mutex<HashMap<MutationId, RetryEntry>>,
}

impl RetrySchedule {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Record failed attempt number `attempts` and return how long the mutation waits
    pub fn schedule(&self, id: MutationId, attempts: u32) -> Duration {
        let mut entries = self.entries();
        let sampled = self.policy.next_delay(attempts);
        let delay = match entries.get(&id) {
            Some(previous) => sampled.max(previous.last_delay).min(self.policy.cap),
            None => sampled,
        };

        entries.insert(
            id,
            RetryEntry {
                next_at: Instant::now() + delay,
                last_delay: delay,
            },
        );
        delay
    }

    /// Whether a scheduled drain may send the mutation now
    pub fn is_due(&self, id: &MutationId) -> bool {
        self.entries()
            .get(id)
            .map_or(true, |entry| Instant::now() >= entry.next_at)
    }

    /// Time left before the mutation is due, zero when it already is
    pub fn time_until_due(&self, id: &MutationId) -> Duration {
        self.entries()
            .get(id)
            .map(|entry| entry.next_at.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
    }

    pub fn last_delay(&self, id: &MutationId) -> Option<Duration> {
        self.entries().get(id).map(|entry| entry.last_delay)
    }

    /// Forget a mutation, after it synced or left the queue
    pub fn clear(&self, id: &MutationId) {
        self.entries().remove(id);
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<MutationId, RetryEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
