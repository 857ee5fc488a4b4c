//! Database Schema Definitions
//!
//! Versioned DDL for the local queue database.

/// Current database schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// DDL of the queue table and its index
pub const QUEUE_TABLE_SQL: &str = include_str!("schema.sql");

/// Migrations in application order, as `(version, sql)`
pub const MIGRATIONS: &[(i32, &str)] = &[(1, QUEUE_TABLE_SQL)];

/// Check if database needs migration
pub fn needs_migration(current_version: i32) -> bool {
    current_version < CURRENT_SCHEMA_VERSION
}

/// Get pending migrations
pub fn pending_migrations(current_version: i32) -> impl Iterator<Item = &'static (i32, &'static str)> {
    MIGRATIONS.iter().filter(move |(version, _)| *version > current_version)
}
