//! # Offline Editing
//!
//! Lets mechanics keep editing jobs and work orders without a connection. Edits are
//! shown immediately, queued durably and reconciled with the remote system once it
//! is reachable again.
//!
//! ## Architecture
//!
//! The offline system consists of:
//! - **Optimistic View**: edits are layered over the last confirmed server state
//! - **Mutation Queue**: edits persist until the remote confirms them
//! - **Reconciliation**: conflicts that need a human wait in resolution sessions
//! - **Retry Logic**: failed calls back off exponentially
//!
//! [`OfflineManager`] owns all of them together with the sync manager and the
//! network monitor. It is constructed explicitly, handed to the UI layer, and shut
//! down with [`OfflineManager::dispose`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use garage_sync::client::entity_client::HttpEntityApi;
//! use garage_sync::client::local_db::LocalDatabase;
//! use garage_sync::client::offline::OfflineManager;
//! use garage_sync::shared::{AppConfig, FieldMap};
//!
//! # async fn example() -> garage_sync::shared::Result<()> {
//! let config = AppConfig::default();
//! let store = Arc::new(LocalDatabase::open("queue.db").await?);
//! let remote = Arc::new(HttpEntityApi::new("http://127.0.0.1:8080/api", None));
//! let manager = OfflineManager::open(config, store, remote, None).await?;
//!
//! let mut base = FieldMap::new();
//! base.insert("field5".into(), "入庫済み".into());
//! let mut changes = FieldMap::new();
//! changes.insert("field5".into(), "見積提示済み".into());
//! manager.enqueue("job", "J-1024", base, changes).await?;
//!
//! let result = manager.manual_sync().await;
//! for conflict in manager.pending_conflicts().await {
//!     println!("{} needs a decision", conflict.field);
//! }
//! # let _ = result;
//! manager.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod optimistic;
pub mod queue;
pub mod reconciliation;
pub mod retry;

pub use optimistic::OptimisticManager;
pub use queue::MutationQueue;
pub use reconciliation::{ConflictSession, ReconciliationManager, ReconciliationResult};
pub use retry::{BackoffPolicy, RetryDisposition};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::client::entity_client::RemoteEntityApi;
use crate::client::local_db::QueueStore;
use crate::client::sync::{
    NetworkMonitor, ReachabilityProbe, SyncComponents, SyncManager, SyncResult, SyncState, SyncStateHandle,
};
use crate::shared::config::AppConfig;
use crate::shared::entity::{EntityKey, FieldMap, SchemaRegistry};
use crate::shared::error::{Result, SyncError};
use crate::shared::mutation::{Conflict, ConflictResolution, MutationId, MutationState, QueuedMutation};

/// Context object owning the whole offline sync core
#[derive(Debug)]
pub struct OfflineManager {
    config: AppConfig,
    schema: Arc<SchemaRegistry>,
    queue: Arc<MutationQueue>,
    optimistic: Arc<OptimisticManager>,
    reconciliation: Arc<ReconciliationManager>,
    network: NetworkMonitor,
    sync: SyncManager,
}

impl OfflineManager {
    /// Open with the workshop's entity schemas
    pub async fn open(
        config: AppConfig,
        store: Arc<dyn QueueStore>,
        remote: Arc<dyn RemoteEntityApi>,
        probe: Option<Arc<dyn ReachabilityProbe>>,
    ) -> Result<Self> {
        Self::open_with_schema(config, SchemaRegistry::workshop(), store, remote, probe).await
    }

    /// Restore the queue from `store` and wire every component together
    pub async fn open_with_schema(
        config: AppConfig,
        schema: SchemaRegistry,
        store: Arc<dyn QueueStore>,
        remote: Arc<dyn RemoteEntityApi>,
        probe: Option<Arc<dyn ReachabilityProbe>>,
    ) -> Result<Self> {
        let schema = Arc::new(schema);
        let queue = Arc::new(MutationQueue::open(store, Arc::clone(&schema)).await?);
        let optimistic = Arc::new(OptimisticManager::new());
        let reconciliation = Arc::new(ReconciliationManager::new());
        let network = match probe {
            Some(probe) => NetworkMonitor::with_probe(probe, config.probe_failure_threshold),
            None => NetworkMonitor::new(config.probe_failure_threshold),
        };

        // Restored edits are visible again before anything syncs.
        for mutation in queue.list_pending().await {
            if mutation.state != MutationState::Rejected {
                optimistic.apply(&mutation.key(), mutation.id, mutation.changes).await;
            }
        }

        let sync = SyncManager::new(
            SyncComponents {
                queue: Arc::clone(&queue),
                remote,
                schema: Arc::clone(&schema),
                reconciliation: Arc::clone(&reconciliation),
                optimistic: Arc::clone(&optimistic),
                network: network.clone(),
                state: SyncStateHandle::default(),
            },
            &config,
        );
        sync.refresh_state().await;

        Ok(Self {
            config,
            schema,
            queue,
            optimistic,
            reconciliation,
            network,
            sync,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub fn sync_manager(&self) -> &SyncManager {
        &self.sync
    }

    /// Record a local edit and show it right away
    pub async fn enqueue(
        &self,
        entity_type: &str,
        entity_id: &str,
        base_snapshot: FieldMap,
        changes: FieldMap,
    ) -> Result<MutationId> {
        let id = self
            .queue
            .enqueue(entity_type, entity_id, base_snapshot, changes.clone())
            .await?;
        let key = EntityKey::new(entity_type, entity_id);
        self.optimistic.apply(&key, id, changes).await;
        self.drop_overlay_if_settled(&key, &id).await;
        self.sync.refresh_state().await;
        Ok(id)
    }

    /// Roll back an overlay whose mutation a drain confirmed or rejected before the
    /// overlay landed
    ///
    /// Drains remove (or reject) the mutation before touching the optimistic view, so
    /// any settle that happens after this check also drops the overlay itself.
    async fn drop_overlay_if_settled(&self, key: &EntityKey, id: &MutationId) {
        let settled = self
            .queue
            .get(id)
            .await
            .map_or(true, |mutation| mutation.state == MutationState::Rejected);
        if settled && self.optimistic.rollback(key, id).await {
            tracing::debug!(mutation = %id, entity = %key, "mutation settled before its overlay was applied");
        }
    }

    /// Receiver for the UI's sync indicator
    pub fn sync_state(&self) -> watch::Receiver<SyncState> {
        self.sync.state().subscribe()
    }

    /// What the UI should render for an entity
    pub async fn view(&self, entity_type: &str, entity_id: &str) -> FieldMap {
        self.optimistic.view(&EntityKey::new(entity_type, entity_id)).await
    }

    /// Record server state fetched outside of a sync
    pub async fn seed(&self, entity_type: &str, entity_id: &str, snapshot: FieldMap) {
        self.optimistic
            .seed(&EntityKey::new(entity_type, entity_id), snapshot)
            .await;
    }

    pub async fn pending_conflicts(&self) -> Vec<Conflict> {
        self.reconciliation.pending_conflicts().await
    }

    pub async fn conflict_sessions(&self) -> Vec<ConflictSession> {
        self.reconciliation.sessions().await
    }

    /// Apply the user's per-field decisions to a suspended mutation
    pub async fn resolve_conflicts(
        &self,
        mutation_id: &MutationId,
        choices: HashMap<String, ConflictResolution>,
    ) -> Result<ReconciliationResult> {
        let session = self
            .reconciliation
            .session(mutation_id)
            .await
            .ok_or(SyncError::NotConflicted(*mutation_id))?;

        let outcome = self.reconciliation.resolve(&self.queue, mutation_id, choices).await?;

        let server_values: FieldMap = session
            .conflicts
            .iter()
            .map(|c| (c.field.clone(), c.server_value.clone()))
            .collect();
        self.optimistic.merge_confirmed(&session.entity, server_values).await;

        match &outcome {
            ReconciliationResult::Requeued(mutation) => {
                self.optimistic
                    .replace(&session.entity, mutation.id, mutation.changes.clone())
                    .await;
            }
            ReconciliationResult::Completed => {
                self.optimistic.rollback(&session.entity, mutation_id).await;
            }
        }

        self.sync.refresh_state().await;
        Ok(outcome)
    }

    /// Drop a queued mutation for good. Returns whether it was still queued.
    pub async fn discard(&self, mutation_id: &MutationId) -> Result<bool> {
        let Some(mutation) = self.queue.get(mutation_id).await else {
            return Ok(false);
        };

        let removed = self.queue.remove(mutation_id).await?;
        self.reconciliation.close(mutation_id).await;
        self.sync.schedule().clear(mutation_id);
        self.optimistic.rollback(&mutation.key(), mutation_id).await;
        self.sync.refresh_state().await;

        tracing::info!(mutation = %mutation_id, entity = %mutation.key(), "mutation discarded");
        Ok(removed)
    }

    /// Put a mutation the remote rejected back in line, e.g. after the data was fixed upstream
    pub async fn retry_rejected(&self, mutation_id: &MutationId) -> Result<QueuedMutation> {
        let mutation = self
            .queue
            .get(mutation_id)
            .await
            .ok_or(SyncError::MutationNotFound(*mutation_id))?;
        if mutation.state != MutationState::Rejected {
            return Err(SyncError::NotRejected(*mutation_id));
        }

        let mutation = self.queue.requeue(mutation_id).await?;
        self.optimistic
            .apply(&mutation.key(), mutation.id, mutation.changes.clone())
            .await;
        self.sync.refresh_state().await;
        Ok(mutation)
    }

    /// Feed the platform's connectivity signal
    pub fn set_native_status(&self, online: bool) {
        self.network.set_native_status(online);
    }

    pub async fn manual_sync(&self) -> SyncResult {
        self.sync.manual_sync().await
    }

    pub fn start_auto_sync(&self, interval: Duration) -> bool {
        self.sync.start_auto_sync(interval)
    }

    pub async fn stop_auto_sync(&self) {
        self.sync.stop_auto_sync().await;
    }

    /// Poll the reachability probe at the configured interval
    pub fn start_probing(&self) -> bool {
        self.network.start_probing(self.config.probe_interval())
    }

    /// Stop background work, letting an in-flight drain finish
    pub async fn dispose(self) {
        self.sync.stop_auto_sync().await;
        self.network.stop_probing().await;
        tracing::info!(pending = self.queue.len().await, "offline manager disposed");
    }
}
