//! # Sync State
//!
//! The snapshot the UI binds to, published through a `watch` channel so readers
//! always see the latest value without polling the queue.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

/// What the UI knows about synchronization
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub is_online: bool,
    /// Mutations still in the queue, whatever their state
    pub pending_count: usize,
    /// Mutations waiting for a conflict decision
    pub conflicted_count: usize,
    pub is_syncing: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            is_online: true,
            pending_count: 0,
            conflicted_count: 0,
            is_syncing: false,
            last_sync_at: None,
            last_error: None,
        }
    }
}

/// Writer side of the published [`SyncState`]
#[derive(Debug, Clone)]
pub struct SyncStateHandle {
    tx: Arc<watch::Sender<SyncState>>,
}

impl Default for SyncStateHandle {
    fn default() -> Self {
        Self::new(SyncState::default())
    }
}

impl SyncStateHandle {
    pub fn new(initial: SyncState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> SyncState {
        self.tx.borrow().clone()
    }

    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|state| {
            let changed = state.is_online != online;
            state.is_online = online;
            changed
        });
    }

    pub fn set_counts(&self, pending: usize, conflicted: usize) {
        self.tx.send_if_modified(|state| {
            let changed = state.pending_count != pending || state.conflicted_count != conflicted;
            state.pending_count = pending;
            state.conflicted_count = conflicted;
            changed
        });
    }

    pub(crate) fn begin_drain(&self) {
        self.tx.send_modify(|state| state.is_syncing = true);
    }

    pub(crate) fn finish_drain(&self, pending: usize, conflicted: usize, last_error: Option<String>) {
        self.tx.send_modify(|state| {
            state.is_syncing = false;
            state.pending_count = pending;
            state.conflicted_count = conflicted;
            state.last_sync_at = Some(Utc::now());
            state.last_error = last_error;
        });
    }
}
