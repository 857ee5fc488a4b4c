//! In-memory queue store
//!
//! Keeps the queue as a serialized JSON document, the same shape a browser
//! `localStorage` entry would have, so corruption can be simulated by seeding
//! the raw text.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::QueueStore;
use crate::shared::error::{Result, SyncError};
use crate::shared::mutation::QueuedMutation;

#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    raw: Mutex<Option<String>>,
    fail_saves: AtomicBool,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an arbitrary stored document
    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            raw: Mutex::new(Some(raw.into())),
            fail_saves: AtomicBool::new(false),
        }
    }

    /// The stored document, if anything was ever saved
    pub fn raw(&self) -> Option<String> {
        self.lock().clone()
    }

    /// Make subsequent saves fail with a storage error
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        // The guarded value is a plain string; a poisoned lock still holds a usable one.
        self.raw.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn load(&self) -> Result<Vec<QueuedMutation>> {
        match self.lock().as_deref() {
            None => Ok(Vec::new()),
            Some(raw) => serde_json::from_str(raw).map_err(|e| SyncError::corruption(e.to_string())),
        }
    }

    async fn save(&self, mutations: &[QueuedMutation]) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(SyncError::storage("memory store is refusing writes"));
        }
        let raw = serde_json::to_string(mutations)?;
        *self.lock() = Some(raw);
        Ok(())
    }
}
