//! Schema-agnostic identity merge engine.
//!
//! Reassigns every record owned by a source identity to a target identity
//! across all identity-bearing tables of a relational store, resolving
//! uniqueness conflicts per table, inside one transaction, with a durable
//! audit record per attempt.
//!
//! The engine talks to the store only through the `MergeDatabase` and
//! `MergeLogStore` traits from `usermerge-core`.

pub mod aggregates;
pub mod events;
pub mod merger;
pub mod strategy;

pub use aggregates::{DerivedAggregates, NoopAggregates};
pub use events::{MergeObserver, NoopObserver};
pub use merger::MergeEngine;
pub use strategy::{
    AttemptStrategy, AttemptTables, GenericStrategy, StrategyRegistry, SubmissionStrategy,
    SubmissionTables, TableMergeStrategy, CHUNK_SIZE,
};
