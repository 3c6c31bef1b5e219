//! SQLite implementation of the `MergeDatabase` collaborator.
//!
//! Wraps a rusqlite connection behind the schema-agnostic contract the merge
//! engine talks to: introspection, parameterized statements, and explicit
//! transaction control.

#![allow(clippy::result_large_err)]

use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::Connection;
use usermerge_core::config::MergeConfig;
use usermerge_core::db::{MergeDatabase, SqlRow, SqlValue};
use usermerge_core::errors::Result;

use crate::errors::from_rusqlite;

/// SQLite-backed merge database.
///
/// Holds a borrowed connection; the merge engine drives exactly one
/// transaction on it at a time (single-threaded by design).
pub struct SqliteDatabase<'c> {
    conn: &'c Connection,
    debug_sql: bool,
}

impl<'c> SqliteDatabase<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            debug_sql: false,
        }
    }

    /// Adapter honoring the merge configuration's flags, currently just
    /// `debug_sql`.
    pub fn from_config(conn: &'c Connection, config: &MergeConfig) -> Self {
        Self::new(conn).with_debug_sql(config.debug_sql)
    }

    /// Trace every statement before executing it (test flag).
    pub fn with_debug_sql(mut self, debug_sql: bool) -> Self {
        self.debug_sql = debug_sql;
        self
    }

    fn trace(&self, sql: &str, params: &[SqlValue]) {
        if self.debug_sql {
            let rendered: Vec<String> = params.iter().map(|p| p.to_string()).collect();
            tracing::debug!(target: "usermerge::sql", sql, params = %rendered.join(", "));
        }
    }
}

/// Adapter so core `SqlValue` params can be bound without rusqlite leaking
/// into the core crate.
struct Param<'a>(&'a SqlValue);

impl rusqlite::ToSql for Param<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            SqlValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Real(r) => ToSqlOutput::Owned(Value::Real(*r)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
        })
    }
}

fn to_sql_value(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(r) => SqlValue::Real(r),
        ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
        // Blobs never hold identity keys; carried as lossy text for logging.
        ValueRef::Blob(b) => SqlValue::Text(String::from_utf8_lossy(b).into_owned()),
    }
}

impl MergeDatabase for SqliteDatabase<'_> {
    fn supports_transactions(&self) -> bool {
        true
    }

    fn begin(&self) -> Result<()> {
        self.trace("BEGIN IMMEDIATE", &[]);
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(from_rusqlite)
    }

    fn commit(&self) -> Result<()> {
        self.trace("COMMIT", &[]);
        self.conn.execute_batch("COMMIT").map_err(from_rusqlite)
    }

    fn rollback(&self) -> Result<()> {
        self.trace("ROLLBACK", &[]);
        self.conn.execute_batch("ROLLBACK").map_err(from_rusqlite)
    }

    fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                 ORDER BY name",
            )
            .map_err(from_rusqlite)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(from_rusqlite)?;
        Ok(names)
    }

    fn column_names(&self, table: &str) -> Result<Vec<String>> {
        // PRAGMA arguments cannot be bound; the table name is quoted instead.
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info(\"{}\")", table.replace('"', "")))
            .map_err(from_rusqlite)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(from_rusqlite)?;
        Ok(names)
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        self.trace(sql, params);
        let mut stmt = self.conn.prepare(sql).map_err(from_rusqlite)?;
        let column_count = stmt.column_count();
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter().map(Param)))
            .map_err(from_rusqlite)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(from_rusqlite)? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(to_sql_value(row.get_ref(i).map_err(from_rusqlite)?));
            }
            out.push(values);
        }
        Ok(out)
    }

    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        self.trace(sql, params);
        self.conn
            .execute(sql, rusqlite::params_from_iter(params.iter().map(Param)))
            .map_err(from_rusqlite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use usermerge_core::errors::MergeErrorKind;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE posts (id INTEGER PRIMARY KEY, userid INTEGER, body TEXT);
             INSERT INTO posts (userid, body) VALUES (1, 'a'), (2, 'b');",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_table_and_column_introspection() {
        let conn = setup();
        let db = SqliteDatabase::new(&conn);
        assert_eq!(db.table_names().unwrap(), vec!["posts".to_string()]);
        assert_eq!(
            db.column_names("posts").unwrap(),
            vec!["id".to_string(), "userid".to_string(), "body".to_string()]
        );
    }

    #[test]
    fn test_query_and_execute_round_trip() {
        let conn = setup();
        let db = SqliteDatabase::new(&conn);

        let changed = db
            .execute(
                "UPDATE posts SET userid = ? WHERE userid = ?",
                &[SqlValue::Integer(9), SqlValue::Integer(1)],
            )
            .unwrap();
        assert_eq!(changed, 1);

        let rows = db
            .query(
                "SELECT id, body FROM posts WHERE userid = ?",
                &[SqlValue::Integer(9)],
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][1], SqlValue::Text("a".to_string()));
    }

    #[test]
    fn test_from_config_carries_the_debug_flag() {
        let conn = setup();
        let mut config = MergeConfig::default();
        config.debug_sql = true;
        let db = SqliteDatabase::from_config(&conn, &config);
        assert!(db.debug_sql);

        // Tracing is best-effort; statements still run normally.
        let rows = db.query("SELECT id FROM posts", &[]).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_rollback_discards_changes() {
        let conn = setup();
        let db = SqliteDatabase::new(&conn);
        assert!(db.supports_transactions());

        db.begin().unwrap();
        db.execute("DELETE FROM posts", &[]).unwrap();
        db.rollback().unwrap();

        let rows = db.query("SELECT id FROM posts", &[]).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_unique_violation_has_constraint_kind() {
        let conn = setup();
        conn.execute_batch("CREATE UNIQUE INDEX uq_posts_user ON posts (userid)")
            .unwrap();
        let db = SqliteDatabase::new(&conn);
        let err = db
            .execute(
                "UPDATE posts SET userid = ? WHERE userid = ?",
                &[SqlValue::Integer(2), SqlValue::Integer(1)],
            )
            .unwrap_err();
        assert_eq!(err.kind(), MergeErrorKind::ConstraintViolation);
    }
}
