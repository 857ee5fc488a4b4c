//! # Conflict Reconciliation
//!
//! Owns the conflicts of suspended mutations while the user decides what to keep.
//! A mutation moves through `pending → conflicted → {resolved → pending | discarded}`;
//! this module holds the `conflicted` part of that lifecycle. Sessions live in memory
//! only: after a restart the mutation is pending again and its conflicts are detected
//! afresh on the next sync.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use garage_sync::client::offline::{MutationQueue, ReconciliationManager};
//! use garage_sync::client::sync::conflict_resolver::resolve_with_server;
//!
//! # async fn example(queue: &MutationQueue, reconciler: &ReconciliationManager) -> garage_sync::shared::Result<()> {
//! for session in reconciler.sessions().await {
//!     let choices: HashMap<_, _> = session
//!         .conflicts
//!         .iter()
//!         .map(|c| (c.field.clone(), resolve_with_server(c)))
//!         .collect();
//!     reconciler.resolve(queue, &session.mutation_id, choices).await?;
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::client::offline::queue::MutationQueue;
use crate::shared::entity::EntityKey;
use crate::shared::error::{Result, SyncError};
use crate::shared::mutation::{Conflict, ConflictResolution, MutationId, QueuedMutation};

/// Unresolved conflicts of one suspended mutation
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictSession {
    pub mutation_id: MutationId,
    pub entity: EntityKey,
    pub conflicts: Vec<Conflict>,
    pub opened_at: DateTime<Utc>,
}

/// What happened to a mutation once its conflicts were resolved
#[derive(Debug, Clone, PartialEq)]
pub enum ReconciliationResult {
    /// Back in the queue with the chosen values
    Requeued(QueuedMutation),
    /// Every field resolved to the server value; nothing left to send
    Completed,
}

/// Resolution sessions for suspended mutations
#[derive(Debug, Default)]
pub struct ReconciliationManager {
    sessions: RwLock<HashMap<MutationId, ConflictSession>>,
}

impl ReconciliationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) a session for the mutation the conflicts belong to
    pub async fn open(&self, entity: EntityKey, mutation_id: MutationId, conflicts: Vec<Conflict>) {
        tracing::info!(
            %entity,
            mutation = %mutation_id,
            fields = ?conflicts.iter().map(|c| c.field.as_str()).collect::<Vec<_>>(),
            "mutation suspended until conflicts are resolved"
        );

        let session = ConflictSession {
            mutation_id,
            entity,
            conflicts,
            opened_at: Utc::now(),
        };
        self.sessions.write().await.insert(mutation_id, session);
    }

    pub async fn session(&self, mutation_id: &MutationId) -> Option<ConflictSession> {
        self.sessions.read().await.get(mutation_id).cloned()
    }

    /// Open sessions, oldest first
    pub async fn sessions(&self) -> Vec<ConflictSession> {
        let mut sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by_key(|s| s.opened_at);
        sessions
    }

    /// Every conflict still waiting for a decision
    pub async fn pending_conflicts(&self) -> Vec<Conflict> {
        self.sessions()
            .await
            .into_iter()
            .flat_map(|session| session.conflicts)
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Apply the user's choices and put the mutation back in line
    ///
    /// `choices` maps each conflicting field to its resolution; every conflicting
    /// field must be covered. The session closes only when the queue accepted the
    /// resolution.
    pub async fn resolve(
        &self,
        queue: &MutationQueue,
        mutation_id: &MutationId,
        choices: HashMap<String, ConflictResolution>,
    ) -> Result<ReconciliationResult> {
        let session = self
            .session(mutation_id)
            .await
            .ok_or(SyncError::NotConflicted(*mutation_id))?;

        let outcome = match queue.apply_resolution(mutation_id, &session.conflicts, &choices).await? {
            Some(mutation) => ReconciliationResult::Requeued(mutation),
            None => ReconciliationResult::Completed,
        };

        self.close(mutation_id).await;
        tracing::info!(mutation = %mutation_id, entity = %session.entity, "conflicts resolved");
        Ok(outcome)
    }

    /// Forget a session, e.g. when the mutation is discarded
    pub async fn close(&self, mutation_id: &MutationId) -> bool {
        self.sessions.write().await.remove(mutation_id).is_some()
    }
}
