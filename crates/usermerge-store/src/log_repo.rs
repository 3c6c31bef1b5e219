//! SQLite-backed audit log for merge attempts.
//!
//! Records land in the `merge_log` table created by the migrations. The
//! engine writes through the `MergeLogStore` trait after the merge
//! transaction resolves, so the record survives a rollback.

#![allow(clippy::result_large_err)]

use rusqlite::Connection;
use usermerge_core::db::MergeLogStore;
use usermerge_core::errors::Result;

use crate::errors::from_rusqlite;

/// One persisted merge attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeLogRecord {
    pub id: i64,
    pub target_id: i64,
    pub source_id: i64,
    pub success: bool,
    /// Unix timestamp of when the attempt resolved
    pub timemodified: i64,
    /// Action entries (success) or error entries (failure), in order
    pub entries: Vec<String>,
}

/// Append-only merge log over a SQLite connection.
pub struct SqliteMergeLog<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteMergeLog<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Fetch one record by id.
    pub fn get(&self, id: i64) -> Result<Option<MergeLogRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, target_id, source_id, success, timemodified, log
                 FROM merge_log WHERE id = ?",
            )
            .map_err(from_rusqlite)?;
        let mut rows = stmt
            .query_map([id], row_to_record)
            .map_err(from_rusqlite)?;
        match rows.next() {
            Some(row) => Ok(Some(row.map_err(from_rusqlite)?)),
            None => Ok(None),
        }
    }

    /// All records, oldest first.
    pub fn list(&self) -> Result<Vec<MergeLogRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, target_id, source_id, success, timemodified, log
                 FROM merge_log ORDER BY id",
            )
            .map_err(from_rusqlite)?;
        let records = stmt
            .query_map([], row_to_record)
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(from_rusqlite)?;
        Ok(records)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<MergeLogRecord> {
    let log: String = row.get(5)?;
    Ok(MergeLogRecord {
        id: row.get(0)?,
        target_id: row.get(1)?,
        source_id: row.get(2)?,
        success: row.get::<_, i64>(3)? != 0,
        timemodified: row.get(4)?,
        entries: if log.is_empty() {
            Vec::new()
        } else {
            log.lines().map(String::from).collect()
        },
    })
}

impl MergeLogStore for SqliteMergeLog<'_> {
    fn record(
        &self,
        target_id: i64,
        source_id: i64,
        success: bool,
        entries: &[String],
    ) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        self.conn
            .execute(
                "INSERT INTO merge_log (target_id, source_id, success, timemodified, log)
                 VALUES (?, ?, ?, ?, ?)",
                rusqlite::params![target_id, source_id, success as i64, now, entries.join("\n")],
            )
            .map_err(from_rusqlite)?;
        Ok(self.conn.last_insert_rowid())
    }
}
