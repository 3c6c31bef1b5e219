//! usermerge-core - Domain model and collaborator contracts
//!
//! This crate provides the database-independent parts of the identity merge
//! engine:
//! - Structured error facility with a stable code taxonomy
//! - Merge configuration with deterministic override semantics
//! - Domain value objects (identities, merge contexts, outcomes)
//! - The `MergeDatabase` / `MergeLogStore` collaborator traits
//! - Content-aware duplicate resolution policy

pub mod config;
pub mod db;
pub mod duplicated;
pub mod errors;
pub mod logging;
pub mod model;

// Re-export commonly used types
pub use config::{AttemptPolicy, ConfigOverrides, MergeConfig};
pub use db::{MergeDatabase, MergeLogStore, SqlRow, SqlValue};
pub use duplicated::{resolve_duplicate, DuplicateResolution, SubmissionVersion};
pub use errors::{MergeError, MergeErrorKind, Result};
pub use model::{
    CompoundIndex, Identity, MergeOutcome, MergeRequest, MergeSelection, TableMergeContext,
};
