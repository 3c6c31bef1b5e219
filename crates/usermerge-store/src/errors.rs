//! Error handling for usermerge-store
//!
//! Wraps usermerge-core MergeError with store-specific helpers

use usermerge_core::errors::{MergeError, MergeErrorKind};

/// Result type alias using MergeError
pub type Result<T> = std::result::Result<T, MergeError>;

/// Create a database error from rusqlite::Error
///
/// Uniqueness and other constraint failures keep their own kind so the
/// merge engine can apply its conflict fallback; everything else is a
/// persistence error.
pub fn from_rusqlite(err: rusqlite::Error) -> MergeError {
    let kind = match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            MergeErrorKind::ConstraintViolation
        }
        _ => MergeErrorKind::Persistence,
    };
    MergeError::new(kind)
        .with_op("sqlite")
        .with_message(err.to_string())
}

/// Create a migration error
pub fn migration_error(migration_id: &str, reason: &str) -> MergeError {
    MergeError::new(MergeErrorKind::Persistence)
        .with_op("migration")
        .with_message(format!("Migration {} failed: {}", migration_id, reason))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_constraint_violation_maps_to_its_own_kind() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id INTEGER PRIMARY KEY, v INTEGER UNIQUE);
             INSERT INTO t (v) VALUES (1);",
        )
        .unwrap();
        let err = conn
            .execute("INSERT INTO t (v) VALUES (1)", [])
            .unwrap_err();
        assert_eq!(
            from_rusqlite(err).kind(),
            MergeErrorKind::ConstraintViolation
        );
    }

    #[test]
    fn test_other_errors_map_to_persistence() {
        let conn = Connection::open_in_memory().unwrap();
        let err = conn.execute("SELECT * FROM missing", []).unwrap_err();
        assert_eq!(from_rusqlite(err).kind(), MergeErrorKind::Persistence);
    }
}
