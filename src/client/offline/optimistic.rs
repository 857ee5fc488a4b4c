//! # Optimistic Updates
//!
//! Keeps the view the UI renders: the last confirmed server snapshot of each entity
//! with the changes of its unsynced mutations layered on top, in enqueue order.
//!
//! ## Features
//!
//! - **Immediate Updates**: an edit is visible as soon as it is queued
//! - **Confirmation**: a synced mutation's overlay is replaced by the server snapshot
//! - **Rollback**: a rejected or discarded mutation's overlay is dropped
//!
//! ## Usage
//!
//! ```rust
//! use garage_sync::client::offline::OptimisticManager;
//! use garage_sync::shared::{EntityKey, FieldMap, MutationId};
//!
//! # async fn example() {
//! let manager = OptimisticManager::new();
//! let key = EntityKey::new("job", "J-1");
//! let mutation = MutationId::new();
//!
//! let mut changes = FieldMap::new();
//! changes.insert("field5".into(), "見積提示済み".into());
//! manager.apply(&key, mutation, changes).await;
//!
//! assert_eq!(manager.view(&key).await["field5"], "見積提示済み");
//! manager.rollback(&key, &mutation).await;
//! # }
//! ```

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::shared::entity::{EntityKey, FieldMap};
use crate::shared::mutation::MutationId;

/// Optimistic view of every entity touched by the sync core
#[derive(Debug, Default)]
pub struct OptimisticManager {
    entities: RwLock<HashMap<EntityKey, CachedEntity>>,
}

#[derive(Debug, Default, Clone)]
struct CachedEntity {
    confirmed: FieldMap,
    /// Unconfirmed changes per mutation, oldest first
    overlays: Vec<(MutationId, FieldMap)>,
}

impl CachedEntity {
    fn render(&self) -> FieldMap {
        let mut view = self.confirmed.clone();
        for (_, changes) in &self.overlays {
            view.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        view
    }

    fn drop_overlay(&mut self, mutation: &MutationId) -> bool {
        let before = self.overlays.len();
        self.overlays.retain(|(id, _)| id != mutation);
        self.overlays.len() != before
    }
}

impl OptimisticManager {
    /// Create a new optimistic manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Record server state fetched outside of a sync
    pub async fn seed(&self, key: &EntityKey, snapshot: FieldMap) {
        let mut entities = self.entities.write().await;
        entities.entry(key.clone()).or_default().confirmed = snapshot;
    }

    /// Layer `changes` over the entity, merging into the mutation's existing overlay
    pub async fn apply(&self, key: &EntityKey, mutation: MutationId, changes: FieldMap) {
        let mut entities = self.entities.write().await;
        let entity = entities.entry(key.clone()).or_default();

        match entity.overlays.iter_mut().find(|(id, _)| *id == mutation) {
            Some((_, overlay)) => overlay.extend(changes),
            None => entity.overlays.push((mutation, changes)),
        }
    }

    /// Update individual confirmed fields, e.g. server values learned from a conflict
    pub async fn merge_confirmed(&self, key: &EntityKey, fields: FieldMap) {
        let mut entities = self.entities.write().await;
        entities.entry(key.clone()).or_default().confirmed.extend(fields);
    }

    /// Swap a mutation's overlay wholesale, e.g. after a manual conflict resolution
    pub async fn replace(&self, key: &EntityKey, mutation: MutationId, changes: FieldMap) {
        let mut entities = self.entities.write().await;
        let entity = entities.entry(key.clone()).or_default();

        match entity.overlays.iter_mut().find(|(id, _)| *id == mutation) {
            Some((_, overlay)) => *overlay = changes,
            None => entity.overlays.push((mutation, changes)),
        }
    }

    /// The remote accepted the mutation and answered with `snapshot`
    pub async fn confirm(&self, key: &EntityKey, mutation: &MutationId, snapshot: FieldMap) {
        let mut entities = self.entities.write().await;
        let entity = entities.entry(key.clone()).or_default();
        entity.drop_overlay(mutation);
        entity.confirmed = snapshot;
    }

    /// Undo a mutation's overlay. Returns whether there was one.
    pub async fn rollback(&self, key: &EntityKey, mutation: &MutationId) -> bool {
        let mut entities = self.entities.write().await;
        let rolled_back = entities
            .get_mut(key)
            .map(|entity| entity.drop_overlay(mutation))
            .unwrap_or(false);

        if rolled_back {
            tracing::debug!(%key, %mutation, "rolled back optimistic update");
        }
        rolled_back
    }

    /// What the UI should render for the entity
    pub async fn view(&self, key: &EntityKey) -> FieldMap {
        self.entities
            .read()
            .await
            .get(key)
            .map(CachedEntity::render)
            .unwrap_or_default()
    }

    /// Whether any unconfirmed change is layered over the entity
    pub async fn has_pending(&self, key: &EntityKey) -> bool {
        self.entities
            .read()
            .await
            .get(key)
            .is_some_and(|entity| !entity.overlays.is_empty())
    }

    /// Get the count of pending optimistic overlays
    pub async fn count_pending(&self) -> usize {
        self.entities.read().await.values().map(|e| e.overlays.len()).sum()
    }
}
