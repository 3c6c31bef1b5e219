//! SQLite persistence layer for the identity merge engine.
//!
//! Provides:
//! - Connection setup with sane pragmas
//! - Embedded, checksummed migrations
//! - The `MergeDatabase` implementation the engine mutates through
//! - Identity lookup and the append-only merge audit log

pub mod db;
pub mod errors;
pub mod executor;
pub mod identity;
pub mod log_repo;
pub mod migrations;

pub use db::{open, open_in_memory};
pub use executor::SqliteDatabase;
pub use identity::{IdentityResolver, SearchField};
pub use log_repo::{MergeLogRecord, SqliteMergeLog};
pub use migrations::apply_migrations;
