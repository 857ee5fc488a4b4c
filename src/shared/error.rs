//! Shared Error Types
//!
//! This module defines the error taxonomy used across the sync core. Every fallible
//! operation in the crate returns [`SyncError`], and the sync manager uses
//! [`SyncError::is_transient`] to decide between retrying and parking a mutation.
//!
//! # Error Categories
//!
//! - **Transient** - network unreachable, timeouts, 5xx. Retried with backoff.
//! - **Validation** - 4xx from the remote API or a malformed local edit. Not retried.
//! - **Corruption** - unreadable queue storage. Logged and reset to empty.
//! - **Storage** - the queue store failed to read or write.
//!
//! Conflicts are not errors: they are routed to the reconciliation flow.
//!
//! # Usage
//!
//! ```rust
//! use garage_sync::shared::error::SyncError;
//!
//! let error = SyncError::validation(Some("price"), "price must be positive");
//! assert!(!error.is_transient());
//! ```
use std::time::Duration;

use thiserror::Error;

use crate::shared::mutation::MutationId;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors produced by the queue, the remote API adapters and the sync manager
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// Network unreachable, 5xx, or any other failure worth retrying
    #[error("Transient failure: {message}")]
    Transient {
        /// Human-readable error message
        message: String,
    },

    /// A remote call exceeded its time budget
    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    /// The remote system (or local validation) rejected the data
    #[error("Validation error{}: {message}", .field.as_ref().map(|f| format!(" in field '{f}'")).unwrap_or_default())]
    Validation {
        /// The offending field, when the rejection names one
        field: Option<String>,
        /// Human-readable error message
        message: String,
    },

    /// The entity type is not declared in the schema registry
    #[error("Unknown entity type '{0}'")]
    UnknownEntityType(String),

    /// A change targets a field the entity type does not declare
    #[error("Unknown field '{field}' for entity type '{entity_type}'")]
    UnknownField {
        /// Entity type the mutation targets
        entity_type: String,
        /// Field that is not part of the entity type
        field: String,
    },

    /// A mutation was enqueued without any change
    #[error("Mutation for {entity_type}/{entity_id} has no changes")]
    EmptyChanges {
        /// Entity type the mutation targets
        entity_type: String,
        /// Entity identifier
        entity_id: String,
    },

    /// Queue storage could not be parsed
    #[error("Queue storage is corrupted: {message}")]
    Corruption {
        /// Human-readable error message
        message: String,
    },

    /// Queue storage failed to read or write
    #[error("Storage error: {message}")]
    Storage {
        /// Human-readable error message
        message: String,
    },

    /// No queued mutation carries this id
    #[error("Mutation {0} not found")]
    MutationNotFound(MutationId),

    /// A resolution was submitted for a mutation that is not awaiting one
    #[error("Mutation {0} is not awaiting conflict resolution")]
    NotConflicted(MutationId),

    /// A retry was requested for a mutation the remote did not reject
    #[error("Mutation {0} was not rejected")]
    NotRejected(MutationId),

    /// A resolution left some conflicting fields undecided
    #[error("Resolution for mutation {mutation_id} is missing fields: {}", .missing.join(", "))]
    IncompleteResolution {
        /// Mutation being resolved
        mutation_id: MutationId,
        /// Conflicting fields that received no decision
        missing: Vec<String>,
    },

    /// JSON serialization or deserialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Human-readable error message
        message: String,
    },
}

impl SyncError {
    /// Create a new transient error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation(field: Option<&str>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.map(str::to_string),
            message: message.into(),
        }
    }

    /// Create a new corruption error
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Create a new storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Whether the sync manager should retry the failed call with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Timeout(_))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: format!("JSON error: {}", err),
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.is_client_error() && status.as_u16() != 408 && status.as_u16() != 429 => {
                Self::validation(None, format!("HTTP {}: {}", status, err))
            }
            _ => Self::transient(err.to_string()),
        }
    }
}
