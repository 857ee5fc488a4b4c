//! garage-sync - Offline Sync Core
//!
//! garage-sync keeps an auto repair shop's job and work order edits safe while the
//! shop floor has no connection, and reconciles them with the shop's system of
//! record once it is reachable again.
//!
//! # Overview
//!
//! This library provides:
//! - A durable mutation queue that collapses repeated edits to one entity
//! - Optimistic views so edits show up before they are synced
//! - Online/offline detection from the platform signal and a reachability probe
//! - A sync manager with per-entity ordering, bounded concurrency and backoff
//! - Field-level conflict detection with type-aware automatic merging
//!
//! # Module Structure
//!
//! - **`shared`** - Types every layer agrees on
//!   - Entity schemas and workflow stages
//!   - Mutations, conflicts and resolutions
//!   - Error types and configuration
//!
//! - **`client`** - The offline sync core
//!   - Mutation queue and its SQLite store
//!   - Sync manager, conflict resolver, network monitor
//!   - `OfflineManager`, the context object handed to the UI
//!
//! # Feature Flags
//!
//! - **`agent`** (default) - builds the `garage-sync-agent` binary, which adds
//!   `tracing-subscriber` and `dotenv`
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use garage_sync::client::{HttpEntityApi, MemoryQueueStore, OfflineManager};
//! use garage_sync::shared::{AppConfig, FieldMap};
//!
//! # async fn example() -> garage_sync::shared::Result<()> {
//! let manager = OfflineManager::open(
//!     AppConfig::default(),
//!     Arc::new(MemoryQueueStore::new()),
//!     Arc::new(HttpEntityApi::new("http://127.0.0.1:8080/api", None)),
//!     None,
//! )
//! .await?;
//!
//! let mut changes = FieldMap::new();
//! changes.insert("memo".into(), "customer reports squeal when braking".into());
//! manager.enqueue("job", "J-1024", FieldMap::new(), changes).await?;
//! manager.manual_sync().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Every fallible operation returns [`shared::Result`], whose error type
//! [`shared::SyncError`] separates transient failures (retried) from validation
//! failures (parked until the user acts).

/// Shared types and data structures
pub mod shared;

/// Offline queue, sync manager and their collaborators
pub mod client;
