//! # Sync Manager
//!
//! Drains the mutation queue against the remote entity API.
//!
//! ## Architecture
//!
//! The sync manager coordinates several components:
//! - **Mutation Queue**: the durable source of work
//! - **Conflict Resolver**: field-level detection and automatic merging
//! - **Reconciliation**: sessions for conflicts that need a human
//! - **Retry Schedule**: per-mutation backoff deadlines
//! - **Network Monitor**: drains only run while online
//! - **Sync State**: the snapshot published to the UI
//!
//! ## Ordering
//!
//! Mutations are grouped per entity in queue order. A group is processed strictly
//! sequentially, and a mutation that is conflicted, rejected, not yet due or that
//! just failed holds back the rest of its group. Groups run concurrently, up to
//! `max_concurrency` at a time.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use garage_sync::client::sync::SyncManager;
//!
//! # async fn example(manager: SyncManager) {
//! manager.start_auto_sync(Duration::from_secs(30));
//!
//! let result = manager.manual_sync().await;
//! println!("{} synced, {} failed", result.succeeded.len(), result.failed.len());
//!
//! manager.stop_auto_sync().await;
//! # }
//! ```

pub mod conflict_resolver;
pub mod network_monitor;
pub mod scheduler;
pub mod sync_state;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::client::entity_client::RemoteEntityApi;
use crate::client::offline::optimistic::OptimisticManager;
use crate::client::offline::queue::MutationQueue;
use crate::client::offline::reconciliation::ReconciliationManager;
use crate::client::offline::retry::{BackoffPolicy, RetryDisposition};
use crate::shared::config::AppConfig;
use crate::shared::entity::{EntityKey, SchemaRegistry};
use crate::shared::error::{Result, SyncError};
use crate::shared::mutation::{Conflict, MutationId, MutationState, QueuedMutation};

pub use conflict_resolver::{detect_conflicts, AutoMerge, ConflictResolver, MergeStrategy};
pub use network_monitor::{ConnectivityEvent, HttpProbe, NetworkMonitor, ReachabilityProbe, Subscription};
pub use scheduler::RetrySchedule;
pub use sync_state::{SyncState, SyncStateHandle};

/// A mutation whose remote call failed during a drain
#[derive(Debug, Clone, PartialEq)]
pub struct FailedMutation {
    pub mutation_id: MutationId,
    pub error: SyncError,
}

/// Outcome of one drain
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncResult {
    /// Confirmed by the remote and removed from the queue
    pub succeeded: Vec<MutationId>,
    /// Transient failures (still queued) and validation rejections
    pub failed: Vec<FailedMutation>,
    /// Suspended until the user resolves their conflicts
    pub conflicted: Vec<MutationId>,
    /// Not attempted: waiting on backoff, suspended, or behind a blocked mutation
    pub deferred: Vec<MutationId>,
    /// Automatically merged values that should be double-checked
    pub flagged: Vec<Conflict>,
}

impl SyncResult {
    /// Nothing failed and nothing needs the user's attention
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.conflicted.is_empty()
    }

    fn absorb(&mut self, other: SyncResult) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
        self.conflicted.extend(other.conflicted);
        self.deferred.extend(other.deferred);
        self.flagged.extend(other.flagged);
    }
}

/// Whether a drain honors retry deadlines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainMode {
    Manual,
    Scheduled,
}

enum MutationOutcome {
    Synced { flagged: Vec<Conflict> },
    Conflicted,
    Failed(SyncError),
    /// Removed or suspended between listing and sending
    Skipped,
}

/// Collaborators the sync manager works with
pub struct SyncComponents {
    pub queue: Arc<MutationQueue>,
    pub remote: Arc<dyn RemoteEntityApi>,
    pub schema: Arc<SchemaRegistry>,
    pub reconciliation: Arc<ReconciliationManager>,
    pub optimistic: Arc<OptimisticManager>,
    pub network: NetworkMonitor,
    pub state: SyncStateHandle,
}

struct AutoSyncTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct SyncInner {
    queue: Arc<MutationQueue>,
    remote: Arc<dyn RemoteEntityApi>,
    resolver: ConflictResolver,
    reconciliation: Arc<ReconciliationManager>,
    optimistic: Arc<OptimisticManager>,
    network: NetworkMonitor,
    schedule: RetrySchedule,
    state: SyncStateHandle,
    max_concurrency: usize,
    request_timeout: Duration,
    drain_lock: tokio::sync::Mutex<()>,
    auto_sync: Mutex<Option<AutoSyncTask>>,
    _connectivity: Subscription,
}

/// Queue drainer with manual and automatic modes
#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<SyncInner>,
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("max_concurrency", &self.inner.max_concurrency)
            .field("request_timeout", &self.inner.request_timeout)
            .field("auto_sync", &self.is_auto_syncing())
            .finish_non_exhaustive()
    }
}

impl SyncManager {
    pub fn new(components: SyncComponents, config: &AppConfig) -> Self {
        let SyncComponents {
            queue,
            remote,
            schema,
            reconciliation,
            optimistic,
            network,
            state,
        } = components;

        state.set_online(network.is_online());
        let publish = state.clone();
        let connectivity = network.subscribe(move |event| publish.set_online(event.is_online()));

        Self {
            inner: Arc::new(SyncInner {
                queue,
                remote,
                resolver: ConflictResolver::new(schema, MergeStrategy::from_config(config)),
                reconciliation,
                optimistic,
                network,
                schedule: RetrySchedule::new(BackoffPolicy::from_config(config)),
                state,
                max_concurrency: config.max_concurrency.max(1),
                request_timeout: config.request_timeout(),
                drain_lock: tokio::sync::Mutex::new(()),
                auto_sync: Mutex::new(None),
                _connectivity: connectivity,
            }),
        }
    }

    pub fn state(&self) -> &SyncStateHandle {
        &self.inner.state
    }

    pub fn schedule(&self) -> &RetrySchedule {
        &self.inner.schedule
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.inner.network
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.inner.resolver
    }

    /// Drain the queue once, ignoring backoff deadlines
    pub async fn manual_sync(&self) -> SyncResult {
        self.drain(DrainMode::Manual).await
    }

    /// Drain every `interval` while online, and right after coming back online
    ///
    /// Returns false when auto sync is already running.
    pub fn start_auto_sync(&self, interval: Duration) -> bool {
        let mut slot = lock(&self.inner.auto_sync);
        if slot.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            tracing::debug!("auto sync already running");
            return false;
        }

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(auto_sync_loop(
            Arc::downgrade(&self.inner),
            interval,
            self.inner.network.watch(),
            stop_rx,
        ));
        *slot = Some(AutoSyncTask { stop, handle });

        tracing::info!(interval_secs = interval.as_secs(), "auto sync started");
        true
    }

    /// Stop auto sync after the drain in progress, if any, has finished
    pub async fn stop_auto_sync(&self) {
        let task = lock(&self.inner.auto_sync).take();
        let Some(task) = task else { return };

        let _ = task.stop.send(true);
        if let Err(e) = task.handle.await {
            tracing::error!(error = %e, "auto sync task ended abnormally");
        }
        tracing::info!("auto sync stopped");
    }

    pub fn is_auto_syncing(&self) -> bool {
        lock(&self.inner.auto_sync)
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Publish the queue's current counts
    pub async fn refresh_state(&self) {
        let (pending, conflicted) = self.counts().await;
        self.inner.state.set_counts(pending, conflicted);
    }

    async fn counts(&self) -> (usize, usize) {
        let queue = &self.inner.queue;
        (queue.len().await, queue.count_by_state(MutationState::Conflicted).await)
    }

    async fn drain(&self, mode: DrainMode) -> SyncResult {
        let _drain = self.inner.drain_lock.lock().await;

        if !self.inner.network.is_online() {
            tracing::debug!(?mode, "offline, skipping drain");
            self.refresh_state().await;
            return SyncResult::default();
        }

        self.inner.state.begin_drain();
        let groups = group_by_entity(self.inner.queue.list_pending().await);
        let group_count = groups.len();

        let results: Vec<SyncResult> = stream::iter(groups)
            .map(|group| self.sync_group(group, mode))
            .buffer_unordered(self.inner.max_concurrency)
            .collect()
            .await;

        let mut result = SyncResult::default();
        for group in results {
            result.absorb(group);
        }

        let (pending, conflicted) = self.counts().await;
        let last_error = result.failed.last().map(|failure| failure.error.to_string());
        self.inner.state.finish_drain(pending, conflicted, last_error);

        if group_count > 0 {
            tracing::info!(
                ?mode,
                entities = group_count,
                succeeded = result.succeeded.len(),
                failed = result.failed.len(),
                conflicted = result.conflicted.len(),
                deferred = result.deferred.len(),
                pending,
                "drain finished"
            );
        }
        result
    }

    async fn sync_group(&self, group: Vec<QueuedMutation>, mode: DrainMode) -> SyncResult {
        let mut result = SyncResult::default();
        let mut blocked = false;

        for mutation in group {
            let id = mutation.id;
            let waiting = mode == DrainMode::Scheduled && !self.inner.schedule.is_due(&id);
            if blocked || !mutation.is_pending() || waiting {
                blocked = true;
                result.deferred.push(id);
                continue;
            }

            match self.sync_one(&id).await {
                MutationOutcome::Synced { flagged } => {
                    result.succeeded.push(id);
                    result.flagged.extend(flagged);
                }
                MutationOutcome::Conflicted => {
                    result.conflicted.push(id);
                    blocked = true;
                }
                MutationOutcome::Failed(error) => {
                    result.failed.push(FailedMutation { mutation_id: id, error });
                    blocked = true;
                }
                MutationOutcome::Skipped => {
                    result.deferred.push(id);
                    blocked = true;
                }
            }
        }
        result
    }

    async fn sync_one(&self, id: &MutationId) -> MutationOutcome {
        let queue = &self.inner.queue;
        if !queue.begin_send(id).await {
            return MutationOutcome::Skipped;
        }

        // Re-read after marking in flight: edits made since listing were merged in.
        let outcome = match queue.get(id).await {
            Some(mutation) if mutation.is_pending() => self.send(&mutation).await,
            _ => MutationOutcome::Skipped,
        };

        queue.end_send(id).await;
        outcome
    }

    async fn send(&self, mutation: &QueuedMutation) -> MutationOutcome {
        let inner = &self.inner;
        let key = mutation.key();
        tracing::debug!(mutation = %mutation.id, entity = %key, attempts = mutation.attempts, "sending mutation");

        let remote_state = match self
            .call(inner.remote.get_entity(&mutation.entity_type, &mutation.entity_id))
            .await
        {
            Ok(state) => state,
            Err(error) => return self.fail(mutation, &key, error).await,
        };

        let mut changes = mutation.changes.clone();
        let mut flagged = Vec::new();
        let conflicts = detect_conflicts(mutation, &remote_state);
        if !conflicts.is_empty() {
            let merge = inner.resolver.auto_merge(conflicts);
            if !merge.is_complete() {
                return self.suspend(mutation, key, merge.unresolved).await;
            }

            for conflict in merge.flagged() {
                tracing::warn!(
                    mutation = %mutation.id,
                    entity = %key,
                    field = %conflict.field,
                    local = %conflict.local_value,
                    server = %conflict.server_value,
                    "merged value needs review"
                );
                flagged.push(conflict.clone());
            }
            changes = merge.apply_to(&changes);
        }

        match self
            .call(inner.remote.update_entity(&mutation.entity_type, &mutation.entity_id, &changes))
            .await
        {
            Ok(snapshot) => {
                if let Err(error) = inner.queue.remove(&mutation.id).await {
                    tracing::error!(mutation = %mutation.id, error = %error, "synced mutation could not be removed");
                    return MutationOutcome::Failed(error);
                }
                inner.schedule.clear(&mutation.id);
                inner.optimistic.confirm(&key, &mutation.id, snapshot).await;
                tracing::debug!(mutation = %mutation.id, entity = %key, "mutation synced");
                MutationOutcome::Synced { flagged }
            }
            Err(error) => self.fail(mutation, &key, error).await,
        }
    }

    async fn suspend(&self, mutation: &QueuedMutation, key: EntityKey, unresolved: Vec<Conflict>) -> MutationOutcome {
        if let Err(error) = self.inner.queue.mark_conflicted(&mutation.id).await {
            tracing::error!(mutation = %mutation.id, error = %error, "could not suspend conflicted mutation");
            return MutationOutcome::Failed(error);
        }
        self.inner.schedule.clear(&mutation.id);
        self.inner.reconciliation.open(key, mutation.id, unresolved).await;
        MutationOutcome::Conflicted
    }

    async fn fail(&self, mutation: &QueuedMutation, key: &EntityKey, error: SyncError) -> MutationOutcome {
        let inner = &self.inner;
        match RetryDisposition::for_error(&error) {
            RetryDisposition::Backoff => match inner.queue.mark_failed(&mutation.id, &error).await {
                Ok(attempts) => {
                    let delay = inner.schedule.schedule(mutation.id, attempts);
                    tracing::warn!(
                        mutation = %mutation.id,
                        entity = %key,
                        attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %error,
                        "transient sync failure"
                    );
                }
                Err(store) => {
                    tracing::error!(mutation = %mutation.id, error = %store, "could not record failed attempt");
                }
            },
            RetryDisposition::Park => {
                if let Err(store) = inner.queue.mark_rejected(&mutation.id, &error).await {
                    tracing::error!(mutation = %mutation.id, error = %store, "could not record rejection");
                }
                inner.schedule.clear(&mutation.id);
                inner.optimistic.rollback(key, &mutation.id).await;
                tracing::error!(mutation = %mutation.id, entity = %key, error = %error, "mutation rejected by remote");
            }
        }
        MutationOutcome::Failed(error)
    }

    async fn call<T>(&self, request: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.inner.request_timeout;
        tokio::time::timeout(timeout, request)
            .await
            .unwrap_or(Err(SyncError::Timeout(timeout)))
    }
}

async fn auto_sync_loop(
    inner: Weak<SyncInner>,
    interval: Duration,
    mut online: watch::Receiver<bool>,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    online.borrow_and_update();

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            changed = online.changed() => {
                if changed.is_err() {
                    break;
                }
                if !*online.borrow_and_update() {
                    continue;
                }
                tracing::info!("connectivity restored, draining queue");
            }
            _ = ticker.tick() => {}
        }

        let Some(inner) = inner.upgrade() else { break };
        SyncManager { inner }.drain(DrainMode::Scheduled).await;
    }
}

/// Split a batch into per-entity groups, keeping queue order inside and across groups
fn group_by_entity(batch: Vec<QueuedMutation>) -> Vec<Vec<QueuedMutation>> {
    let mut index: HashMap<EntityKey, usize> = HashMap::new();
    let mut groups: Vec<Vec<QueuedMutation>> = Vec::new();

    for mutation in batch {
        let slot = *index.entry(mutation.key()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(mutation);
    }
    groups
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
