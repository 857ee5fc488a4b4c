//! # Mutation Queue
//!
//! Durable, ordered record of local edits that the remote system has not confirmed
//! yet. The queue is the single writer of [`QueuedMutation`] records: every change
//! goes through one of its methods, each of which persists the whole queue before
//! committing it in memory, under one async lock.
//!
//! ## Features
//!
//! - **Persistent Queue**: mutations survive restarts through a [`QueueStore`]
//! - **Edit Collapsing**: successive edits to one entity merge into one mutation
//! - **Insertion Order**: [`MutationQueue::list_pending`] returns oldest first
//! - **Corruption Recovery**: unreadable storage is logged and reset to empty
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use garage_sync::client::local_db::MemoryQueueStore;
//! use garage_sync::client::offline::queue::MutationQueue;
//! use garage_sync::shared::{FieldMap, SchemaRegistry};
//!
//! # async fn example() -> garage_sync::shared::Result<()> {
//! let queue = MutationQueue::open(
//!     Arc::new(MemoryQueueStore::new()),
//!     Arc::new(SchemaRegistry::workshop()),
//! )
//! .await?;
//!
//! let mut changes = FieldMap::new();
//! changes.insert("memo".into(), "oil leak on rear seal".into());
//! let id = queue.enqueue("job", "J-1024", FieldMap::new(), changes).await?;
//!
//! // ... after the remote confirmed the write
//! queue.remove(&id).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::client::local_db::QueueStore;
use crate::shared::entity::{FieldMap, SchemaRegistry};
use crate::shared::error::{Result, SyncError};
use crate::shared::mutation::{Conflict, ConflictResolution, MutationId, MutationState, QueuedMutation};

/// Durable queue of unsynced mutations
pub struct MutationQueue {
    inner: Mutex<QueueInner>,
    store: Arc<dyn QueueStore>,
    schema: Arc<SchemaRegistry>,
}

#[derive(Debug, Default)]
struct QueueInner {
    mutations: Vec<QueuedMutation>,
    /// Mutations currently being sent; new edits never merge into these
    in_flight: HashSet<MutationId>,
}

impl std::fmt::Debug for MutationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationQueue").finish_non_exhaustive()
    }
}

impl MutationQueue {
    /// Load the queue from `store`
    ///
    /// Corrupt storage is reset to an empty queue. Mutations that were waiting for a
    /// conflict decision come back as pending: conflicts are not persisted and are
    /// detected again on the next sync.
    pub async fn open(store: Arc<dyn QueueStore>, schema: Arc<SchemaRegistry>) -> Result<Self> {
        let mut mutations = match store.load().await {
            Ok(mutations) => mutations,
            Err(SyncError::Corruption { message }) => {
                tracing::error!(%message, "mutation queue storage is unreadable, resetting to an empty queue");
                store.save(&[]).await?;
                Vec::new()
            }
            Err(other) => return Err(other),
        };

        for mutation in mutations.iter_mut().filter(|m| m.state == MutationState::Conflicted) {
            mutation.state = MutationState::Pending;
        }

        if !mutations.is_empty() {
            tracing::info!(count = mutations.len(), "restored mutation queue");
        }

        Ok(Self {
            inner: Mutex::new(QueueInner {
                mutations,
                in_flight: HashSet::new(),
            }),
            store,
            schema,
        })
    }

    /// Record a local edit, collapsing it into an existing pending mutation for the
    /// same entity when there is one
    pub async fn enqueue(
        &self,
        entity_type: &str,
        entity_id: &str,
        base_snapshot: FieldMap,
        changes: FieldMap,
    ) -> Result<MutationId> {
        if changes.is_empty() {
            return Err(SyncError::EmptyChanges {
                entity_type: entity_type.to_string(),
                entity_id: entity_id.to_string(),
            });
        }
        self.schema.validate_changes(entity_type, &changes)?;

        let mut inner = self.inner.lock().await;
        let mut next = inner.mutations.clone();

        let mergeable = next
            .iter_mut()
            .find(|m| m.targets(entity_type, entity_id) && m.is_pending() && !inner.in_flight.contains(&m.id));

        let id = match mergeable {
            Some(existing) => {
                // Earliest known base wins so conflict detection compares against
                // what the user actually saw before the first edit.
                for (field, value) in base_snapshot {
                    existing.base_snapshot.entry(field).or_insert(value);
                }
                existing.changes.extend(changes);
                tracing::debug!(mutation = %existing.id, entity_type, entity_id, "collapsed edit into queued mutation");
                existing.id
            }
            None => {
                let mutation = QueuedMutation::new(entity_type, entity_id, base_snapshot, changes);
                let id = mutation.id;
                next.push(mutation);
                tracing::debug!(mutation = %id, entity_type, entity_id, "queued mutation");
                id
            }
        };

        self.commit(&mut inner, next).await?;
        Ok(id)
    }

    /// All queued mutations, oldest first
    pub async fn list_pending(&self) -> Vec<QueuedMutation> {
        self.inner.lock().await.mutations.clone()
    }

    pub async fn get(&self, id: &MutationId) -> Option<QueuedMutation> {
        self.inner.lock().await.mutations.iter().find(|m| m.id == *id).cloned()
    }

    /// Number of queued mutations in any state
    pub async fn len(&self) -> usize {
        self.inner.lock().await.mutations.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn count_by_state(&self, state: MutationState) -> usize {
        self.inner.lock().await.mutations.iter().filter(|m| m.state == state).count()
    }

    /// Delete a mutation after confirmed sync or explicit discard
    ///
    /// Returns whether anything was removed.
    pub async fn remove(&self, id: &MutationId) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        inner.in_flight.remove(id);

        let mut next = inner.mutations.clone();
        let before = next.len();
        next.retain(|m| m.id != *id);
        if next.len() == before {
            return Ok(false);
        }

        self.commit(&mut inner, next).await?;
        Ok(true)
    }

    /// Count a failed attempt; the mutation stays queued. Returns the new attempt count.
    pub async fn mark_failed(&self, id: &MutationId, error: &SyncError) -> Result<u32> {
        self.update(id, |mutation| {
            mutation.attempts += 1;
            mutation.last_error = Some(error.to_string());
        })
        .await
        .map(|m| m.attempts)
    }

    /// Count a failed attempt and stop retrying automatically
    pub async fn mark_rejected(&self, id: &MutationId, error: &SyncError) -> Result<u32> {
        self.update(id, |mutation| {
            mutation.attempts += 1;
            mutation.last_error = Some(error.to_string());
            mutation.state = MutationState::Rejected;
        })
        .await
        .map(|m| m.attempts)
    }

    /// Suspend a mutation until its conflicts are resolved
    pub async fn mark_conflicted(&self, id: &MutationId) -> Result<()> {
        self.update(id, |mutation| mutation.state = MutationState::Conflicted)
            .await
            .map(|_| ())
    }

    /// Put a rejected or conflicted mutation back in line
    pub async fn requeue(&self, id: &MutationId) -> Result<QueuedMutation> {
        self.update(id, |mutation| {
            mutation.state = MutationState::Pending;
            mutation.last_error = None;
        })
        .await
    }

    /// Apply the user's decisions to a conflicted mutation
    ///
    /// Each resolved field's base becomes the server value the conflict was detected
    /// against. `keep-server` drops the field from the changes. Returns the requeued
    /// mutation, or `None` when no change is left and the mutation was removed.
    pub async fn apply_resolution(
        &self,
        id: &MutationId,
        conflicts: &[Conflict],
        choices: &HashMap<String, ConflictResolution>,
    ) -> Result<Option<QueuedMutation>> {
        let mut inner = self.inner.lock().await;
        let mut next = inner.mutations.clone();

        let position = next
            .iter()
            .position(|m| m.id == *id)
            .ok_or(SyncError::MutationNotFound(*id))?;
        if next[position].state != MutationState::Conflicted {
            return Err(SyncError::NotConflicted(*id));
        }

        let missing: Vec<String> = conflicts
            .iter()
            .filter(|c| !choices.contains_key(&c.field))
            .map(|c| c.field.clone())
            .collect();
        if !missing.is_empty() {
            return Err(SyncError::IncompleteResolution {
                mutation_id: *id,
                missing,
            });
        }

        let mutation = &mut next[position];
        for conflict in conflicts {
            let choice = &choices[&conflict.field];
            mutation
                .base_snapshot
                .insert(conflict.field.clone(), conflict.server_value.clone());
            match choice {
                ConflictResolution::KeepServer { .. } => {
                    mutation.changes.remove(&conflict.field);
                }
                other => {
                    mutation
                        .changes
                        .insert(conflict.field.clone(), other.resolved_value().clone());
                }
            }
        }
        mutation.state = MutationState::Pending;
        mutation.last_error = None;

        let outcome = if mutation.changes.is_empty() {
            next.remove(position);
            None
        } else {
            Some(mutation.clone())
        };

        self.commit(&mut inner, next).await?;
        Ok(outcome)
    }

    /// Mark a mutation as being sent. Returns false if it is no longer queued.
    pub async fn begin_send(&self, id: &MutationId) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.mutations.iter().any(|m| m.id == *id) {
            inner.in_flight.insert(*id);
            true
        } else {
            false
        }
    }

    pub async fn end_send(&self, id: &MutationId) {
        self.inner.lock().await.in_flight.remove(id);
    }

    async fn update<F>(&self, id: &MutationId, apply: F) -> Result<QueuedMutation>
    where
        F: FnOnce(&mut QueuedMutation),
    {
        let mut inner = self.inner.lock().await;
        let mut next = inner.mutations.clone();

        let mutation = next
            .iter_mut()
            .find(|m| m.id == *id)
            .ok_or(SyncError::MutationNotFound(*id))?;
        apply(mutation);
        let updated = mutation.clone();

        self.commit(&mut inner, next).await?;
        Ok(updated)
    }

    /// Persist `next`, then make it the in-memory queue
    async fn commit(&self, inner: &mut QueueInner, next: Vec<QueuedMutation>) -> Result<()> {
        if let Err(e) = self.store.save(&next).await {
            tracing::error!(error = %e, "failed to persist mutation queue");
            return Err(e);
        }
        inner.mutations = next;
        Ok(())
    }
}
