//! Migration runner
//!
//! Applies migrations with checksums and idempotency

#![allow(clippy::result_large_err)]

use crate::errors::{from_rusqlite, migration_error, Result};
use crate::migrations::checksums::compute_checksum;
use crate::migrations::embedded::get_migrations;
use rusqlite::Connection;

/// Apply all pending migrations to the database
pub fn apply_migrations(conn: &mut Connection) -> Result<()> {
    create_schema_version_table(conn)?;

    for migration in get_migrations() {
        apply_migration(conn, migration.id, migration.sql)?;
    }

    Ok(())
}

/// Create the schema_version table if it doesn't exist
fn create_schema_version_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY,
            migration_id TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL,
            checksum TEXT
        )",
        [],
    )
    .map_err(from_rusqlite)?;

    Ok(())
}

/// Apply a single migration if not already applied
fn apply_migration(conn: &mut Connection, migration_id: &str, sql: &str) -> Result<()> {
    let already_applied: bool = conn
        .query_row(
            "SELECT 1 FROM schema_version WHERE migration_id = ?",
            [migration_id],
            |_| Ok(true),
        )
        .unwrap_or(false);

    if already_applied {
        // Idempotent: already applied
        return Ok(());
    }

    let checksum = compute_checksum(sql);

    let tx = conn.transaction().map_err(from_rusqlite)?;

    tx.execute_batch(sql)
        .map_err(|e| migration_error(migration_id, &e.to_string()))?;

    let now = chrono::Utc::now().timestamp();
    tx.execute(
        "INSERT INTO schema_version (migration_id, applied_at, checksum) VALUES (?, ?, ?)",
        rusqlite::params![migration_id, now, checksum],
    )
    .map_err(from_rusqlite)?;

    tx.commit().map_err(from_rusqlite)?;

    Ok(())
}
