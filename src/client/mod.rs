//! Client Module
//!
//! The offline-aware side of the sync core: everything that runs on a mechanic's
//! device or in the headless sync agent.
//!
//! # Architecture
//!
//! The client module is organized into focused submodules:
//!
//! - **`config`** - Environment and file configuration for the agent
//! - **`entity_client`** - Remote entity API trait and its HTTP adapter
//! - **`local_db`** - Durable queue storage (SQLite and in-memory)
//! - **`offline`** - Mutation queue, optimistic view, reconciliation, retry policy
//! - **`sync`** - Sync manager, conflict resolver, network monitor, sync state
//!
//! # Module Structure
//!
//! ```text
//! client/
//! ├── mod.rs           - Module exports and documentation
//! ├── config.rs        - Environment over TOML configuration
//! ├── entity_client.rs - RemoteEntityApi and HttpEntityApi
//! ├── local_db/        - QueueStore, LocalDatabase, MemoryQueueStore
//! ├── offline/         - OfflineManager and its components
//! └── sync/            - SyncManager and its components
//! ```

pub mod config;
pub mod entity_client;
pub mod local_db;
pub mod offline;
pub mod sync;

// Re-export commonly used types
pub use config::Config;
pub use entity_client::{HttpEntityApi, RemoteEntityApi};
pub use local_db::{LocalDatabase, MemoryQueueStore, QueueStore};
pub use offline::{OfflineManager, ReconciliationResult};
pub use sync::{ConnectivityEvent, HttpProbe, NetworkMonitor, SyncManager, SyncResult, SyncState};
