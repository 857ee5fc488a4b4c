//! Mutation and conflict data types
//!
//! These are the records that cross module boundaries: the queue persists
//! [`QueuedMutation`], the conflict resolver produces [`Conflict`] and
//! [`ConflictResolution`], and the UI receives both.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::entity::{EntityKey, FieldMap};

/// Identifier of a queued mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MutationId(Uuid);

impl MutationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MutationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where a queued mutation stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationState {
    /// Waiting to be sent, possibly after a backoff delay
    Pending,
    /// Suspended until the user resolves its conflicts
    Conflicted,
    /// Rejected by the remote system, not retried automatically
    Rejected,
}

/// A pending local change to one entity's fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    pub id: MutationId,
    pub entity_type: String,
    pub entity_id: String,
    /// Remote values the edit was based on
    pub base_snapshot: FieldMap,
    /// Field values to write
    pub changes: FieldMap,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
    #[serde(default = "default_state")]
    pub state: MutationState,
}

fn default_state() -> MutationState {
    MutationState::Pending
}

impl QueuedMutation {
    pub fn new(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        base_snapshot: FieldMap,
        changes: FieldMap,
    ) -> Self {
        Self {
            id: MutationId::new(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            base_snapshot,
            changes,
            created_at: Utc::now(),
            attempts: 0,
            last_error: None,
            state: MutationState::Pending,
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(&self.entity_type, &self.entity_id)
    }

    pub fn targets(&self, entity_type: &str, entity_id: &str) -> bool {
        self.entity_type == entity_type && self.entity_id == entity_id
    }

    pub fn is_pending(&self) -> bool {
        self.state == MutationState::Pending
    }
}

/// A field whose server value moved since the local edit was based
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub mutation_id: MutationId,
    pub entity_type: String,
    pub entity_id: String,
    pub field: String,
    pub local_value: serde_json::Value,
    pub server_value: serde_json::Value,
    pub base_value: serde_json::Value,
}

/// Decision for one conflicting field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ConflictResolution {
    KeepLocal {
        resolved_value: serde_json::Value,
    },
    KeepServer {
        resolved_value: serde_json::Value,
    },
    Merge {
        resolved_value: serde_json::Value,
        /// Set when the merge kept a value a human should double-check
        #[serde(default)]
        needs_review: bool,
    },
}

impl ConflictResolution {
    pub fn resolved_value(&self) -> &serde_json::Value {
        match self {
            Self::KeepLocal { resolved_value }
            | Self::KeepServer { resolved_value }
            | Self::Merge { resolved_value, .. } => resolved_value,
        }
    }

    pub fn needs_review(&self) -> bool {
        matches!(self, Self::Merge { needs_review: true, .. })
    }
}
