//! End-to-end merge runs against an in-memory SQLite store.

use std::cell::RefCell;
use std::rc::Rc;

use rusqlite::Connection;
use usermerge_core::config::MergeConfig;
use usermerge_core::db::{MergeDatabase, SqlRow, SqlValue};
use usermerge_core::errors::{MergeError, MergeErrorKind, Result};
use usermerge_core::model::{MergeOutcome, MergeRequest};
use usermerge_engine::{MergeEngine, MergeObserver};
use usermerge_store::{apply_migrations, open_in_memory, SqliteDatabase, SqliteMergeLog};

const SOURCE: i64 = 7;
const TARGET: i64 = 2;

fn setup_conn() -> Connection {
    let mut conn = open_in_memory().unwrap();
    apply_migrations(&mut conn).unwrap();
    conn.execute_batch(
        "CREATE TABLE users (
             id INTEGER PRIMARY KEY, username TEXT NOT NULL, idnumber TEXT,
             email TEXT, firstname TEXT, lastname TEXT
         );
         CREATE TABLE posts (id INTEGER PRIMARY KEY, userid INTEGER NOT NULL, body TEXT);
         CREATE TABLE groups_members (
             id INTEGER PRIMARY KEY, groupid INTEGER NOT NULL, userid INTEGER NOT NULL,
             UNIQUE (groupid, userid)
         );
         CREATE TABLE sessions (id INTEGER PRIMARY KEY, userid INTEGER NOT NULL, sid TEXT);
         CREATE TABLE quiz_attempts (
             id INTEGER PRIMARY KEY, userid INTEGER NOT NULL, quiz INTEGER NOT NULL,
             attempt INTEGER NOT NULL, timestart INTEGER NOT NULL, sumgrades REAL,
             UNIQUE (userid, quiz, attempt)
         );
         CREATE TABLE quiz_grades (
             id INTEGER PRIMARY KEY, quiz INTEGER NOT NULL, userid INTEGER NOT NULL,
             grade REAL, UNIQUE (userid, quiz)
         );
         CREATE TABLE quiz_grades_history (
             id INTEGER PRIMARY KEY, quiz INTEGER NOT NULL, userid INTEGER NOT NULL, grade REAL
         );
         CREATE TABLE assign_submission (
             id INTEGER PRIMARY KEY, assignment INTEGER NOT NULL, userid INTEGER NOT NULL,
             groupid INTEGER NOT NULL DEFAULT 0, attemptnumber INTEGER NOT NULL DEFAULT 0,
             status TEXT NOT NULL, timemodified INTEGER NOT NULL,
             UNIQUE (assignment, userid, groupid, attemptnumber)
         );

         INSERT INTO users (id, username) VALUES (2, 'keeper'), (7, 'duplicate');
         INSERT INTO posts (userid, body) VALUES (7, 'a'), (7, 'b'), (2, 'c');
         INSERT INTO groups_members (groupid, userid) VALUES (10, 7), (10, 2), (11, 7);
         INSERT INTO sessions (userid, sid) VALUES (7, 'stale-session');
         INSERT INTO quiz_attempts (userid, quiz, attempt, timestart, sumgrades)
             VALUES (7, 1, 1, 100, 4.0), (2, 1, 1, 200, 6.0);
         INSERT INTO quiz_grades (quiz, userid, grade) VALUES (1, 7, 4.0), (1, 2, 6.0);
         INSERT INTO assign_submission (assignment, userid, status, timemodified)
             VALUES (1, 7, 'submitted', 100), (1, 2, 'new', 200);",
    )
    .unwrap();
    conn
}

fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

fn run_merge(conn: &Connection, config: MergeConfig) -> MergeOutcome {
    let db = SqliteDatabase::from_config(conn, &config);
    let log = SqliteMergeLog::new(conn);
    let engine = MergeEngine::new(config).unwrap();
    engine
        .merge(&db, &log, MergeRequest::new(TARGET, SOURCE))
        .unwrap()
}

#[test]
fn test_full_merge_reassigns_everything() {
    let conn = setup_conn();
    let outcome = run_merge(&conn, MergeConfig::default());

    assert!(outcome.success);
    assert!(outcome.log_id > 0);

    // Plain table: all source rows reassigned.
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM posts WHERE userid = 7"), 0);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM posts WHERE userid = 2"), 3);

    // Compound index: colliding group-10 row deleted, group-11 row moved.
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM groups_members"), 2);
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM groups_members WHERE userid = 2"),
        2
    );

    // Attempt table: union renumbered by timestamp under the target.
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM quiz_attempts WHERE userid = 2"),
        2
    );
    assert_eq!(
        count(
            &conn,
            "SELECT attempt FROM quiz_attempts WHERE timestart = 100"
        ),
        1
    );
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM quiz_grades"), 1);

    // Submission table: source content supersedes the target's empty record.
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM assign_submission"), 1);
    assert_eq!(
        count(
            &conn,
            "SELECT userid FROM assign_submission WHERE status = 'submitted'"
        ),
        2
    );

    // The identity table itself is never touched.
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM users"), 2);
}

#[test]
fn test_missing_index_columns_disable_the_descriptor_for_the_run() {
    // The default configuration describes user_lastaccess as (userid,
    // courseid) unique, but this deployment's table has no courseid column.
    // The descriptor is dropped for the run and the rows are reassigned
    // through the plain path.
    let mut conn = open_in_memory().unwrap();
    apply_migrations(&mut conn).unwrap();
    conn.execute_batch(
        "CREATE TABLE user_lastaccess (id INTEGER PRIMARY KEY, userid INTEGER NOT NULL);
         INSERT INTO user_lastaccess (userid) VALUES (7), (7), (7);",
    )
    .unwrap();

    let outcome = run_merge(&conn, MergeConfig::default());

    assert!(outcome.success);
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM user_lastaccess WHERE userid = 7"),
        0
    );
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM user_lastaccess WHERE userid = 2"),
        3
    );
}

#[test]
fn test_excluded_tables_are_skipped_and_reported() {
    let conn = setup_conn();
    let outcome = run_merge(&conn, MergeConfig::default());

    assert!(outcome.success);
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM sessions WHERE userid = 7"),
        1
    );
    assert!(outcome.entries[0].starts_with("skipped tables:"));
    assert!(outcome.entries[0].contains("sessions"));
}

#[test]
fn test_outcome_is_persisted_in_the_audit_log() {
    let conn = setup_conn();
    let outcome = run_merge(&conn, MergeConfig::default());

    let log = SqliteMergeLog::new(&conn);
    let record = log.get(outcome.log_id).unwrap().unwrap();
    assert_eq!(record.target_id, TARGET);
    assert_eq!(record.source_id, SOURCE);
    assert!(record.success);
    assert_eq!(record.entries, outcome.entries);
}

#[test]
fn test_same_identity_resolves_as_logged_failure() {
    let conn = setup_conn();
    let db = SqliteDatabase::new(&conn);
    let log = SqliteMergeLog::new(&conn);
    let engine = MergeEngine::new(MergeConfig::default()).unwrap();

    let outcome = engine
        .merge(&db, &log, MergeRequest::new(TARGET, TARGET))
        .unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.entries.len(), 1);
    assert!(outcome.entries[0].contains("ERR_SAME_IDENTITY"));

    // Nothing mutated, exactly one audit record.
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM posts WHERE userid = 7"), 2);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM merge_log"), 1);
}

#[test]
fn test_always_rollback_reports_success_but_keeps_data() {
    let conn = setup_conn();
    let mut config = MergeConfig::default();
    config.always_rollback = true;
    let outcome = run_merge(&conn, config);

    assert!(outcome.success);
    assert!(outcome
        .entries
        .iter()
        .any(|e| e.contains("transaction rolled back")));

    assert_eq!(count(&conn, "SELECT COUNT(*) FROM posts WHERE userid = 7"), 2);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM groups_members"), 3);

    // The audit record still exists and is marked successful.
    let log = SqliteMergeLog::new(&conn);
    assert!(log.get(outcome.log_id).unwrap().unwrap().success);
}

/// Delegating wrapper that reports no transaction support.
struct NoTransactionDb<'c>(SqliteDatabase<'c>);

impl MergeDatabase for NoTransactionDb<'_> {
    fn supports_transactions(&self) -> bool {
        false
    }
    fn begin(&self) -> Result<()> {
        self.0.begin()
    }
    fn commit(&self) -> Result<()> {
        self.0.commit()
    }
    fn rollback(&self) -> Result<()> {
        self.0.rollback()
    }
    fn table_names(&self) -> Result<Vec<String>> {
        self.0.table_names()
    }
    fn column_names(&self, table: &str) -> Result<Vec<String>> {
        self.0.column_names(table)
    }
    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        self.0.query(sql, params)
    }
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        self.0.execute(sql, params)
    }
}

#[test]
fn test_transactionless_backend_is_refused_without_logging() {
    let conn = setup_conn();
    let db = NoTransactionDb(SqliteDatabase::new(&conn));
    let log = SqliteMergeLog::new(&conn);
    let engine = MergeEngine::new(MergeConfig::default()).unwrap();

    let err = engine
        .merge(&db, &log, MergeRequest::new(TARGET, SOURCE))
        .unwrap_err();

    assert_eq!(err.kind(), MergeErrorKind::TransactionUnsupported);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM merge_log"), 0);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM posts WHERE userid = 7"), 2);
}

#[test]
fn test_transactionless_backend_accepted_when_not_required() {
    let conn = setup_conn();
    let db = NoTransactionDb(SqliteDatabase::new(&conn));
    let log = SqliteMergeLog::new(&conn);
    let mut config = MergeConfig::default();
    config.transactions_required = false;
    let engine = MergeEngine::new(config).unwrap();

    let outcome = engine
        .merge(&db, &log, MergeRequest::new(TARGET, SOURCE))
        .unwrap();
    assert!(outcome.success);
}

/// Delegating wrapper that fails every mutation against one table.
struct FailingDb<'c> {
    inner: SqliteDatabase<'c>,
    fail_on: &'static str,
}

impl MergeDatabase for FailingDb<'_> {
    fn supports_transactions(&self) -> bool {
        true
    }
    fn begin(&self) -> Result<()> {
        self.inner.begin()
    }
    fn commit(&self) -> Result<()> {
        self.inner.commit()
    }
    fn rollback(&self) -> Result<()> {
        self.inner.rollback()
    }
    fn table_names(&self) -> Result<Vec<String>> {
        self.inner.table_names()
    }
    fn column_names(&self, table: &str) -> Result<Vec<String>> {
        self.inner.column_names(table)
    }
    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        self.inner.query(sql, params)
    }
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        if sql.contains(self.fail_on) {
            return Err(MergeError::new(MergeErrorKind::Persistence)
                .with_op("execute")
                .with_table(self.fail_on)
                .with_message("injected failure"));
        }
        self.inner.execute(sql, params)
    }
}

#[test]
fn test_statement_failure_rolls_back_the_whole_merge() {
    let conn = setup_conn();
    let db = FailingDb {
        inner: SqliteDatabase::new(&conn),
        fail_on: "groups_members",
    };
    let log = SqliteMergeLog::new(&conn);
    let engine = MergeEngine::new(MergeConfig::default()).unwrap();

    let outcome = engine
        .merge(&db, &log, MergeRequest::new(TARGET, SOURCE))
        .unwrap();

    assert!(!outcome.success);
    assert!(outcome.entries.iter().any(|e| e.contains("injected failure")));

    // Tables processed before the failing one are rolled back too.
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM posts WHERE userid = 7"), 2);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM groups_members"), 3);
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM quiz_attempts WHERE userid = 7"),
        1
    );

    // The failed attempt still leaves its audit record.
    let record = SqliteMergeLog::new(&conn)
        .get(outcome.log_id)
        .unwrap()
        .unwrap();
    assert!(!record.success);
}

#[test]
fn test_config_overrides_steer_the_run() {
    let conn = setup_conn();
    // Exclude posts entirely and keep attempts untouched.
    let config = MergeConfig::from_json_overrides(
        r#"{"excluded_tables": ["posts"], "attempt_policy": "remain"}"#,
    )
    .unwrap();
    let outcome = run_merge(&conn, config);

    assert!(outcome.success);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM posts WHERE userid = 7"), 2);
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM quiz_attempts WHERE userid = 7"),
        1
    );
    assert!(outcome.entries[0].contains("posts"));
}

#[test]
fn test_unknown_strategy_id_fails_engine_construction() {
    let mut config = MergeConfig::default();
    config.default_strategy = "clever".to_string();
    let err = MergeEngine::new(config).unwrap_err();
    assert_eq!(err.kind(), MergeErrorKind::Configuration);
}

/// Delegating wrapper recording every statement the engine issues.
struct SpyDb<'c> {
    inner: SqliteDatabase<'c>,
    statements: RefCell<Vec<String>>,
}

impl MergeDatabase for SpyDb<'_> {
    fn supports_transactions(&self) -> bool {
        true
    }
    fn begin(&self) -> Result<()> {
        self.inner.begin()
    }
    fn commit(&self) -> Result<()> {
        self.inner.commit()
    }
    fn rollback(&self) -> Result<()> {
        self.inner.rollback()
    }
    fn table_names(&self) -> Result<Vec<String>> {
        self.inner.table_names()
    }
    fn column_names(&self, table: &str) -> Result<Vec<String>> {
        self.inner.column_names(table)
    }
    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<SqlRow>> {
        self.statements.borrow_mut().push(sql.to_string());
        self.inner.query(sql, params)
    }
    fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        self.statements.borrow_mut().push(sql.to_string());
        self.inner.execute(sql, params)
    }
}

#[test]
fn test_no_statement_ever_targets_an_excluded_table() {
    let conn = setup_conn();
    let db = SpyDb {
        inner: SqliteDatabase::new(&conn),
        statements: RefCell::new(Vec::new()),
    };
    let log = SqliteMergeLog::new(&conn);
    let engine = MergeEngine::new(MergeConfig::default()).unwrap();

    let outcome = engine
        .merge(&db, &log, MergeRequest::new(TARGET, SOURCE))
        .unwrap();
    assert!(outcome.success);

    let statements = db.statements.borrow();
    assert!(!statements.is_empty());
    assert!(
        !statements.iter().any(|sql| sql.contains("sessions")),
        "excluded table was queried or mutated"
    );
}

#[derive(Clone, Default)]
struct RecordingObserver {
    seen: Rc<RefCell<Vec<(i64, i64, bool)>>>,
}

impl MergeObserver for RecordingObserver {
    fn merge_completed(&self, request: &MergeRequest, outcome: &MergeOutcome) {
        self.seen
            .borrow_mut()
            .push((request.target_id, request.source_id, outcome.success));
    }
}

#[test]
fn test_observer_sees_every_resolved_attempt() {
    let conn = setup_conn();
    let db = SqliteDatabase::new(&conn);
    let log = SqliteMergeLog::new(&conn);

    let observer = RecordingObserver::default();
    let engine = MergeEngine::new(MergeConfig::default())
        .unwrap()
        .with_observer(Box::new(observer.clone()));

    engine
        .merge(&db, &log, MergeRequest::new(TARGET, SOURCE))
        .unwrap();
    engine
        .merge(&db, &log, MergeRequest::new(TARGET, TARGET))
        .unwrap();

    let seen = observer.seen.borrow();
    assert_eq!(seen.as_slice(), &[(2, 7, true), (2, 2, false)]);
}
