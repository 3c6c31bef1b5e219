//! Strategy for per-parent submission tables.
//!
//! Submission tables are meant to hold one logical child record per
//! (parent entity, owner), possibly with several attempt rows behind it.
//! When both identities submitted for the same parent, the content-aware
//! duplicate policy decides which side survives.

#![allow(clippy::result_large_err)]

use usermerge_core::db::{MergeDatabase, SqlValue};
use usermerge_core::duplicated::{resolve_duplicate, DuplicateResolution, SubmissionVersion};
use usermerge_core::errors::Result;
use usermerge_core::model::TableMergeContext;

use super::{delete_rows_by_id, reassign_rows_by_id, TableMergeStrategy};

/// Column names for one submission table family.
#[derive(Debug, Clone)]
pub struct SubmissionTables {
    /// Column referencing the parent entity (assignment, exercise, ...)
    pub parent_column: String,
    /// Content state tag of a submission row
    pub status_column: String,
    /// Last-modified timestamp deciding which content version is older
    pub time_column: String,
}

impl Default for SubmissionTables {
    fn default() -> Self {
        Self {
            parent_column: "assignment".to_string(),
            status_column: "status".to_string(),
            time_column: "timemodified".to_string(),
        }
    }
}

/// Migrates submission rows parent by parent through the duplicate policy.
pub struct SubmissionStrategy {
    tables: SubmissionTables,
    keep_target_on_conflict: bool,
}

impl SubmissionStrategy {
    pub fn new(tables: SubmissionTables, keep_target_on_conflict: bool) -> Self {
        Self {
            tables,
            keep_target_on_conflict,
        }
    }

    /// One identity's submission rows for a parent: all row ids plus the
    /// state of the latest version.
    fn load_version(
        &self,
        db: &dyn MergeDatabase,
        ctx: &TableMergeContext,
        parent: i64,
        owner: i64,
    ) -> Result<Option<SubmissionVersion>> {
        let t = &self.tables;
        let sql = format!(
            "SELECT id, {}, {} FROM {} WHERE {} = ? AND {} = ? ORDER BY {} DESC, id DESC",
            t.status_column,
            t.time_column,
            ctx.table,
            t.parent_column,
            ctx.identity_column,
            t.time_column,
        );
        let rows = db.query(&sql, &[SqlValue::Integer(parent), SqlValue::Integer(owner)])?;
        let Some(latest) = rows.first() else {
            return Ok(None);
        };
        let status = latest[1].as_str()?.to_string();
        let timemodified = latest[2].as_i64()?;
        let ids = rows
            .iter()
            .map(|row| row[0].as_i64().map_err(Into::into))
            .collect::<Result<Vec<i64>>>()?;
        Ok(Some(SubmissionVersion {
            ids,
            status,
            timemodified,
        }))
    }
}

impl TableMergeStrategy for SubmissionStrategy {
    fn merge(
        &self,
        db: &dyn MergeDatabase,
        ctx: &TableMergeContext,
        action_log: &mut Vec<String>,
        error_log: &mut Vec<String>,
    ) -> Result<()> {
        let parents_sql = format!(
            "SELECT DISTINCT {} FROM {} WHERE {} = ?",
            self.tables.parent_column, ctx.table, ctx.identity_column
        );
        let parents = db.query(&parents_sql, &[SqlValue::Integer(ctx.source_id)])?;

        let mut resolution = DuplicateResolution::empty();
        for row in &parents {
            let parent = row[0].as_i64()?;
            let source = match self.load_version(db, ctx, parent, ctx.source_id)? {
                Some(version) => version,
                None => continue,
            };
            match self.load_version(db, ctx, parent, ctx.target_id)? {
                Some(target) => resolution.absorb(resolve_duplicate(&source, &target)),
                // Target never submitted for this parent; plain reassignment.
                None => resolution.absorb(DuplicateResolution::remove_and_modify(
                    std::iter::empty(),
                    source.ids.iter().copied(),
                )),
            }
        }

        let to_remove: Vec<i64> = resolution.to_remove().iter().copied().collect();
        delete_rows_by_id(db, &ctx.table, &to_remove, action_log, error_log);

        let to_modify: Vec<i64> = resolution.to_modify().iter().copied().collect();
        reassign_rows_by_id(
            db,
            ctx,
            &to_modify,
            self.keep_target_on_conflict,
            action_log,
            error_log,
        );
        Ok(())
    }
}
