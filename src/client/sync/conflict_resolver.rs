//! # Conflict Resolution System
//!
//! Field-level three-way comparison between the base snapshot a local edit was made
//! against, the edit itself, and the server state at sync time.
//!
//! ## Detection
//!
//! Only fields present in the edit are compared. A field conflicts when the server
//! value differs from the base value; missing values compare as `null` and numbers
//! compare numerically.
//!
//! ## Default merge policy
//!
//! | field kind | merged value |
//! |------------|--------------|
//! | numeric    | local value, flagged for review when the server drifted past the threshold |
//! | text       | server text, a timestamped separator, then the local addition |
//! | status     | whichever value is further along the workflow |
//! | opaque     | not mergeable, needs a human |

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::shared::config::AppConfig;
use crate::shared::entity::{FieldKind, FieldMap, SchemaRegistry};
use crate::shared::mutation::{Conflict, ConflictResolution, QueuedMutation};

/// Compare two field values, treating numbers by magnitude so `1000 == 1000.0`
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Conflicts between a mutation and the current remote state
pub fn detect_conflicts(mutation: &QueuedMutation, remote: &FieldMap) -> Vec<Conflict> {
    mutation
        .changes
        .iter()
        .filter_map(|(field, local)| {
            let base = mutation.base_snapshot.get(field).unwrap_or(&Value::Null);
            let server = remote.get(field).unwrap_or(&Value::Null);

            (!values_equal(server, base)).then(|| Conflict {
                mutation_id: mutation.id,
                entity_type: mutation.entity_type.clone(),
                entity_id: mutation.entity_id.clone(),
                field: field.clone(),
                local_value: local.clone(),
                server_value: server.clone(),
                base_value: base.clone(),
            })
        })
        .collect()
}

pub fn resolve_with_local(conflict: &Conflict) -> ConflictResolution {
    ConflictResolution::KeepLocal {
        resolved_value: conflict.local_value.clone(),
    }
}

pub fn resolve_with_server(conflict: &Conflict) -> ConflictResolution {
    ConflictResolution::KeepServer {
        resolved_value: conflict.server_value.clone(),
    }
}

/// Tunables of the default merge policy
#[derive(Debug, Clone, PartialEq)]
pub struct MergeStrategy {
    /// Server-side numeric drift beyond which a kept local number is flagged
    pub numeric_review_threshold: f64,
    /// Marker framing the timestamp between concatenated texts
    pub text_marker: String,
}

impl Default for MergeStrategy {
    fn default() -> Self {
        Self {
            numeric_review_threshold: 0.0,
            text_marker: "---".to_string(),
        }
    }
}

impl MergeStrategy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            numeric_review_threshold: config.numeric_review_threshold,
            ..Self::default()
        }
    }
}

/// Outcome of running the default policy over a mutation's conflicts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutoMerge {
    pub resolved: Vec<(Conflict, ConflictResolution)>,
    pub unresolved: Vec<Conflict>,
}

impl AutoMerge {
    /// Every conflicting field received a value
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }

    /// Merged values that a human should double-check
    pub fn flagged(&self) -> impl Iterator<Item = &Conflict> {
        self.resolved
            .iter()
            .filter(|(_, resolution)| resolution.needs_review())
            .map(|(conflict, _)| conflict)
    }

    /// `changes` with every resolved field replaced by its merged value
    pub fn apply_to(&self, changes: &FieldMap) -> FieldMap {
        let mut merged = changes.clone();
        for (conflict, resolution) in &self.resolved {
            merged.insert(conflict.field.clone(), resolution.resolved_value().clone());
        }
        merged
    }
}

/// Field-type-aware conflict resolver
#[derive(Debug, Clone)]
pub struct ConflictResolver {
    schema: Arc<SchemaRegistry>,
    strategy: MergeStrategy,
}

impl ConflictResolver {
    pub fn new(schema: Arc<SchemaRegistry>, strategy: MergeStrategy) -> Self {
        Self { schema, strategy }
    }

    pub fn strategy(&self) -> &MergeStrategy {
        &self.strategy
    }

    /// Merge one conflict with the default policy, `None` when it needs a human
    pub fn resolve_with_merge(&self, conflict: &Conflict) -> Option<ConflictResolution> {
        self.merge_at(conflict, Utc::now())
    }

    /// Same as [`Self::resolve_with_merge`] with an explicit clock for text separators
    pub fn merge_at(&self, conflict: &Conflict, now: DateTime<Utc>) -> Option<ConflictResolution> {
        if values_equal(&conflict.local_value, &conflict.server_value) {
            return Some(ConflictResolution::Merge {
                resolved_value: conflict.server_value.clone(),
                needs_review: false,
            });
        }

        match self.schema.kind_of(&conflict.entity_type, &conflict.field)? {
            FieldKind::Numeric => self.merge_numeric(conflict),
            FieldKind::Text => self.merge_text(conflict, now),
            FieldKind::Status => self.merge_status(conflict),
            FieldKind::Opaque => None,
        }
    }

    /// Run the default policy over every conflict of one mutation
    pub fn auto_merge(&self, conflicts: Vec<Conflict>) -> AutoMerge {
        let now = Utc::now();
        let mut outcome = AutoMerge::default();
        for conflict in conflicts {
            match self.merge_at(&conflict, now) {
                Some(resolution) => outcome.resolved.push((conflict, resolution)),
                None => outcome.unresolved.push(conflict),
            }
        }
        outcome
    }

    fn merge_numeric(&self, conflict: &Conflict) -> Option<ConflictResolution> {
        conflict.local_value.as_f64()?;
        let server = conflict.server_value.as_f64()?;

        let needs_review = match conflict.base_value.as_f64() {
            Some(base) => (server - base).abs() > self.strategy.numeric_review_threshold,
            None => true,
        };

        Some(ConflictResolution::Merge {
            resolved_value: conflict.local_value.clone(),
            needs_review,
        })
    }

    fn merge_text(&self, conflict: &Conflict, now: DateTime<Utc>) -> Option<ConflictResolution> {
        let local = conflict.local_value.as_str()?;
        let server = match &conflict.server_value {
            Value::Null => "",
            Value::String(text) => text.as_str(),
            _ => return None,
        };
        let base = conflict.base_value.as_str().unwrap_or("");

        // When both sides appended to the same base, only the local addition is new.
        let addition = if local.starts_with(base) && server.starts_with(base) {
            local[base.len()..].trim_start_matches('\n')
        } else {
            local
        };

        let merged = if server.is_empty() {
            local.to_string()
        } else if addition.is_empty() {
            server.to_string()
        } else {
            let marker = &self.strategy.text_marker;
            format!(
                "{server}\n{marker} {} {marker}\n{addition}",
                now.format("%Y-%m-%d %H:%M UTC")
            )
        };

        Some(ConflictResolution::Merge {
            resolved_value: Value::String(merged),
            needs_review: false,
        })
    }

    fn merge_status(&self, conflict: &Conflict) -> Option<ConflictResolution> {
        let workflow = self.schema.workflow();
        let local = workflow.rank(&conflict.local_value)?;
        let server = workflow.rank(&conflict.server_value)?;

        let winner = if local > server {
            &conflict.local_value
        } else {
            &conflict.server_value
        };

        Some(ConflictResolution::Merge {
            resolved_value: winner.clone(),
            needs_review: false,
        })
    }
}
