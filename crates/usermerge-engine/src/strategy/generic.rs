//! The schema-agnostic default strategy.
//!
//! Applied to every table without a specialized strategy. It may be wrong
//! for tables with cross-table side effects; that is a documented
//! limitation, not a bug.

#![allow(clippy::result_large_err)]

use usermerge_core::db::MergeDatabase;
use usermerge_core::errors::Result;
use usermerge_core::model::TableMergeContext;

use super::{merge_rows, ConflictLoser, TableMergeStrategy};

/// Reassigns all of the source identity's rows to the target, resolving
/// compound-index collisions by deleting the source's row.
pub struct GenericStrategy {
    keep_target_on_conflict: bool,
}

impl GenericStrategy {
    pub fn new(keep_target_on_conflict: bool) -> Self {
        Self {
            keep_target_on_conflict,
        }
    }
}

impl TableMergeStrategy for GenericStrategy {
    fn merge(
        &self,
        db: &dyn MergeDatabase,
        ctx: &TableMergeContext,
        action_log: &mut Vec<String>,
        error_log: &mut Vec<String>,
    ) -> Result<()> {
        merge_rows(
            db,
            ctx,
            ConflictLoser::Source,
            self.keep_target_on_conflict,
            action_log,
            error_log,
        )
    }
}
