//! Entity schema registry
//!
//! Declares which entity types the shop synchronizes, the fields each type carries,
//! and how each field merges when the server moved underneath a local edit. The
//! registry also owns the workflow stage ordering used to decide which of two job
//! statuses is "further along".

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::shared::error::{Result, SyncError};

/// Field name to JSON value, ordered so snapshots serialize deterministically
pub type FieldMap = BTreeMap<String, serde_json::Value>;

/// Identifies one remote record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    /// Entity type, e.g. `job`
    pub entity_type: String,
    /// Remote record id
    pub entity_id: String,
}

impl EntityKey {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// How a field behaves under a concurrent edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Prices, mileage, hours
    Numeric,
    /// Free text and append-only logs such as the job memo
    Text,
    /// Workflow status, ordered by [`Workflow`]
    Status,
    /// Anything without a safe automatic merge (dates, references)
    Opaque,
}

/// Field declarations for one entity type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    name: String,
    fields: BTreeMap<String, FieldKind>,
}

impl EntitySchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Declare a field
    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.insert(name.into(), kind);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind_of(&self, field: &str) -> Option<FieldKind> {
        self.fields.get(field).copied()
    }
}

/// Ordered workflow stages of a repair job, earliest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workflow {
    stages: Vec<String>,
}

impl Workflow {
    pub fn new<I, S>(stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stages: stages.into_iter().map(Into::into).collect(),
        }
    }

    /// Position of a status value in the workflow, `None` for unknown values
    pub fn rank(&self, status: &serde_json::Value) -> Option<usize> {
        let status = status.as_str()?;
        self.stages.iter().position(|stage| stage == status)
    }

    pub fn stages(&self) -> &[String] {
        &self.stages
    }
}

impl Default for Workflow {
    fn default() -> Self {
        Self::new([
            "入庫済み",
            "診断中",
            "見積提示済み",
            "見積承認済み",
            "作業中",
            "作業完了",
            "納車済み",
        ])
    }
}

/// All entity types known to the sync core
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    entities: HashMap<String, EntitySchema>,
    workflow: Workflow,
}

impl SchemaRegistry {
    pub fn new(workflow: Workflow) -> Self {
        Self {
            entities: HashMap::new(),
            workflow,
        }
    }

    /// Register an entity type, replacing any previous declaration of the same name
    pub fn register(mut self, schema: EntitySchema) -> Self {
        self.entities.insert(schema.name.clone(), schema);
        self
    }

    /// Jobs and work orders as the shop's CRM exposes them
    pub fn workshop() -> Self {
        Self::new(Workflow::default())
            .register(
                EntitySchema::new("job")
                    .field("field5", FieldKind::Status)
                    .field("price", FieldKind::Numeric)
                    .field("estimate_amount", FieldKind::Numeric)
                    .field("mileage", FieldKind::Numeric)
                    .field("memo", FieldKind::Text)
                    .field("diagnosis", FieldKind::Text)
                    .field("assigned_mechanic", FieldKind::Opaque)
                    .field("delivery_date", FieldKind::Opaque),
            )
            .register(
                EntitySchema::new("work_order")
                    .field("status", FieldKind::Status)
                    .field("labor_hours", FieldKind::Numeric)
                    .field("parts_cost", FieldKind::Numeric)
                    .field("notes", FieldKind::Text)
                    .field("job_id", FieldKind::Opaque),
            )
    }

    pub fn schema(&self, entity_type: &str) -> Result<&EntitySchema> {
        self.entities
            .get(entity_type)
            .ok_or_else(|| SyncError::UnknownEntityType(entity_type.to_string()))
    }

    pub fn kind_of(&self, entity_type: &str, field: &str) -> Option<FieldKind> {
        self.entities.get(entity_type)?.kind_of(field)
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Check that every changed field is declared for the entity type
    pub fn validate_changes(&self, entity_type: &str, changes: &FieldMap) -> Result<()> {
        let schema = self.schema(entity_type)?;
        match changes.keys().find(|field| schema.kind_of(field).is_none()) {
            Some(field) => Err(SyncError::UnknownField {
                entity_type: entity_type.to_string(),
                field: field.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::workshop()
    }
}
