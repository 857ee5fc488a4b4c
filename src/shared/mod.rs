//! Shared Module
//!
//! Types that every layer of the sync core agrees on: entity schemas, the
//! mutation and conflict records, the error taxonomy and configuration.

/// Entity types, field kinds and workflow ordering
pub mod entity;

/// Queued mutations, conflicts and resolutions
pub mod mutation;

/// Shared error types
pub mod error;

/// Application configuration
pub mod config;

/// Re-export commonly used types for convenience
pub use config::{AppConfig, AppConfigBuilder, ConfigError};
pub use entity::{EntityKey, EntitySchema, FieldKind, FieldMap, SchemaRegistry, Workflow};
pub use error::{Result, SyncError};
pub use mutation::{Conflict, ConflictResolution, MutationId, MutationState, QueuedMutation};
