//! # Local Database Module
//!
//! Durable storage for the mutation queue. The queue only needs two operations from
//! its store, [`QueueStore::load`] and [`QueueStore::save`], so the store is a trait:
//! [`LocalDatabase`] keeps the queue in SQLite for the agent, and
//! [`MemoryQueueStore`] keeps it in memory for tests and embedders.
//!
//! ## Failure semantics
//!
//! A row that cannot be parsed, or a queue table that is missing or damaged, makes
//! [`QueueStore::load`] return [`SyncError::Corruption`]. The queue treats that as
//! "start empty": it logs the error and overwrites the store with an empty queue.
//! A file SQLite refuses to open at all is moved aside by [`LocalDatabase::open`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use garage_sync::client::local_db::{LocalDatabase, QueueStore};
//!
//! # async fn example() -> garage_sync::shared::Result<()> {
//! let db = LocalDatabase::open("/var/lib/garage-sync/queue.db").await?;
//! let pending = db.load().await?;
//! db.save(&pending).await?;
//! # Ok(())
//! # }
//! ```

pub mod memory;
pub mod schema;

pub use memory::MemoryQueueStore;

use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Executor, Row, SqlitePool};

use crate::shared::error::{Result, SyncError};
use crate::shared::mutation::QueuedMutation;

/// Durable key-value persistence for the mutation queue
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Load the queue in insertion order
    async fn load(&self) -> Result<Vec<QueuedMutation>>;

    /// Replace the stored queue with `mutations`
    async fn save(&self, mutations: &[QueuedMutation]) -> Result<()>;
}

/// SQLite-backed queue store
///
/// Uses WAL mode so a crash between writes never leaves a half-written queue.
#[derive(Debug, Clone)]
pub struct LocalDatabase {
    pool: SqlitePool,
}

impl LocalDatabase {
    /// Open or create the database file and bring its schema up to date
    ///
    /// A file SQLite cannot read (not a database, or corrupt) is moved aside as
    /// `<name>.corrupt-<timestamp>` and replaced by a fresh database.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::storage(format!("cannot create {}: {}", parent.display(), e)))?;
        }

        let db = match Self::connect(path).await {
            Ok(db) => db,
            Err(e) if is_unreadable(&e) => {
                let moved_to = quarantine(path)?;
                tracing::error!(
                    path = %path.display(),
                    moved_to = %moved_to.display(),
                    error = %e,
                    "queue database is unreadable, starting with an empty one"
                );
                Self::connect(path).await?
            }
            Err(e) => return Err(e.into()),
        };

        tracing::debug!(path = %path.display(), "opened local queue database");
        Ok(db)
    }

    async fn connect(path: &Path) -> sqlx::Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        if let Err(e) = db.init_schema().await {
            db.pool.close().await;
            return Err(e);
        }
        Ok(db)
    }

    /// Private in-memory database, mostly for tests
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // A single connection that never idles out: closing it would drop the data.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Get connection pool reference
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Number of stored mutations
    pub async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM mutation_queue")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn init_schema(&self) -> sqlx::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        let (current_version,): (i32,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_one(&self.pool)
                .await?;

        if !schema::needs_migration(current_version) {
            return Ok(());
        }

        for (version, ddl) in schema::pending_migrations(current_version) {
            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(ddl).execute(&mut *tx).await?;
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(chrono::Utc::now().to_rfc3339())
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            tracing::info!(version, "applied queue database migration");
        }

        Ok(())
    }

    /// Replace the queue table with an empty one
    async fn recreate_queue_table(&self) -> sqlx::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DROP TABLE IF EXISTS mutation_queue").execute(&mut *tx).await?;
        (&mut *tx).execute(sqlx::raw_sql(schema::QUEUE_TABLE_SQL)).await?;
        tx.commit().await
    }
}

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_CORRUPT: i32 = 11;
const SQLITE_NOTADB: i32 = 26;

/// Primary SQLite result code of a database error
fn sqlite_code(error: &sqlx::Error) -> Option<i32> {
    match error {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| code & 0xff),
        _ => None,
    }
}

fn is_unreadable(error: &sqlx::Error) -> bool {
    matches!(sqlite_code(error), Some(SQLITE_CORRUPT | SQLITE_NOTADB))
}

/// Move an unreadable database file and its WAL files aside
///
/// Returns where the main file went.
fn quarantine(path: &Path) -> Result<PathBuf> {
    let moved_to = with_suffix(path, &format!(".corrupt-{}", chrono::Utc::now().format("%Y%m%dT%H%M%S")));
    std::fs::rename(path, &moved_to)
        .map_err(|e| SyncError::storage(format!("cannot move {} aside: {}", path.display(), e)))?;

    for sidecar in ["-wal", "-shm"] {
        let from = with_suffix(path, sidecar);
        if !from.exists() {
            continue;
        }
        if let Err(e) = std::fs::rename(&from, with_suffix(&moved_to, sidecar)) {
            tracing::warn!(path = %from.display(), error = %e, "could not move stale journal aside");
        }
    }
    Ok(moved_to)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

#[async_trait]
impl QueueStore for LocalDatabase {
    async fn load(&self) -> Result<Vec<QueuedMutation>> {
        let rows = match sqlx::query("SELECT id, payload FROM mutation_queue ORDER BY position")
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => rows,
            Err(e) => match sqlite_code(&e) {
                None | Some(SQLITE_BUSY | SQLITE_LOCKED) => return Err(e.into()),
                Some(_) => {
                    // Missing or damaged table: start over so the queue can reset.
                    if let Err(repair) = self.recreate_queue_table().await {
                        tracing::error!(error = %repair, "could not recreate the mutation queue table");
                    }
                    return Err(SyncError::corruption(format!("cannot read mutation queue: {e}")));
                }
            },
        };

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(|e| SyncError::corruption(e.to_string()))?;
                let payload: String = row
                    .try_get("payload")
                    .map_err(|e| SyncError::corruption(format!("row {id}: {e}")))?;
                serde_json::from_str(&payload).map_err(|e| SyncError::corruption(format!("row {id}: {e}")))
            })
            .collect()
    }

    async fn save(&self, mutations: &[QueuedMutation]) -> Result<()> {
        let saved_at = chrono::Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM mutation_queue").execute(&mut *tx).await?;

        for (position, mutation) in mutations.iter().enumerate() {
            let payload = serde_json::to_string(mutation)?;
            sqlx::query(
                "INSERT INTO mutation_queue (position, id, entity_type, entity_id, payload, saved_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(position as i64)
            .bind(mutation.id.to_string())
            .bind(&mutation.entity_type)
            .bind(&mutation.entity_id)
            .bind(payload)
            .bind(&saved_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
