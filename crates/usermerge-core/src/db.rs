//! Database collaborator contracts.
//!
//! The merge engine is schema-agnostic: it talks to the live database only
//! through these traits. The store crate supplies the SQLite implementation;
//! tests supply spies and failure injectors.

use thiserror::Error;

use crate::errors::{MergeError, MergeErrorKind, Result};

/// A dynamically typed SQL parameter or result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Integer(i64),
    Real(f64),
    Text(String),
    Null,
}

/// Mismatch between the expected and actual type of a result cell.
#[derive(Debug, Error)]
#[error("expected {expected} value, got {actual}")]
pub struct ValueTypeError {
    pub expected: &'static str,
    pub actual: &'static str,
}

impl SqlValue {
    fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Integer(_) => "integer",
            SqlValue::Real(_) => "real",
            SqlValue::Text(_) => "text",
            SqlValue::Null => "null",
        }
    }

    pub fn as_i64(&self) -> std::result::Result<i64, ValueTypeError> {
        match self {
            SqlValue::Integer(i) => Ok(*i),
            other => Err(ValueTypeError {
                expected: "integer",
                actual: other.type_name(),
            }),
        }
    }

    pub fn as_str(&self) -> std::result::Result<&str, ValueTypeError> {
        match self {
            SqlValue::Text(s) => Ok(s),
            other => Err(ValueTypeError {
                expected: "text",
                actual: other.type_name(),
            }),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlValue::Integer(i) => write!(f, "{}", i),
            SqlValue::Real(r) => write!(f, "{}", r),
            SqlValue::Text(s) => write!(f, "{}", s),
            SqlValue::Null => write!(f, "NULL"),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<ValueTypeError> for MergeError {
    fn from(e: ValueTypeError) -> Self {
        MergeError::new(MergeErrorKind::Serialization)
            .with_op("row_decode")
            .with_message(e.to_string())
    }
}

/// One result row.
pub type SqlRow = Vec<SqlValue>;

/// The SQL-executing and schema-introspecting collaborator.
///
/// Errors raised by `execute` must carry
/// `MergeErrorKind::ConstraintViolation` when a uniqueness constraint was
/// hit, so the caller can apply its conflict fallback. A thrown error must
/// never auto-commit.
///
/// Transaction support is a first-class capability query; callers decide
/// before `begin` whether the backend is acceptable.
pub trait MergeDatabase {
    /// Whether the backend supports transactional begin/commit/rollback.
    fn supports_transactions(&self) -> bool;

    fn begin(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;

    /// List live table names.
    fn table_names(&self) -> Result<Vec<String>>;

    /// List live column names for a table.
    fn column_names(&self, table: &str) -> Result<Vec<String>>;

    /// Parameterized SELECT returning all rows.
    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>>;

    /// Parameterized UPDATE/DELETE/INSERT returning the affected row count.
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize>;
}

/// Append-only audit store for merge attempts.
///
/// Called after the merge transaction resolves, success or failure, so a
/// record survives a rollback.
pub trait MergeLogStore {
    /// Persist one attempt and return the generated log id.
    fn record(
        &self,
        target_id: i64,
        source_id: i64,
        success: bool,
        entries: &[String],
    ) -> Result<i64>;
}

/// Produce a `?, ?, …` placeholder list for an IN clause of `n` values.
pub fn placeholders(n: usize) -> String {
    let mut s = String::with_capacity(n * 3);
    for i in 0..n {
        if i > 0 {
            s.push_str(", ");
        }
        s.push('?');
    }
    s
}
