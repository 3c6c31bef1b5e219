//! Post-merge derived-data recomputation.
//!
//! After every table has been migrated, some stores carry aggregates derived
//! from the migrated rows (gradebooks, completion summaries). This hook runs
//! inside the merge transaction, so a failed recomputation rolls the whole
//! merge back.

#![allow(clippy::result_large_err)]

use usermerge_core::db::MergeDatabase;
use usermerge_core::errors::Result;

/// Recomputes derived data once all tables are migrated.
pub trait DerivedAggregates {
    fn recompute(
        &self,
        db: &dyn MergeDatabase,
        target_id: i64,
        source_id: i64,
        action_log: &mut Vec<String>,
    ) -> Result<()>;
}

/// Aggregate hook that does nothing.
pub struct NoopAggregates;

impl DerivedAggregates for NoopAggregates {
    fn recompute(
        &self,
        _db: &dyn MergeDatabase,
        _target_id: i64,
        _source_id: i64,
        _action_log: &mut Vec<String>,
    ) -> Result<()> {
        Ok(())
    }
}
