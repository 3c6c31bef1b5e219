//! Per-table merge strategies.
//!
//! A strategy knows how to migrate one table's rows from the source identity
//! to the target identity, including any conflict handling specific to that
//! table. The orchestrator picks the strategy per table from the registry
//! and calls it once per identity-bearing column.

#![allow(clippy::result_large_err)]

use std::collections::{BTreeMap, BTreeSet};

use usermerge_core::config::{
    MergeConfig, STRATEGY_ATTEMPTS, STRATEGY_GENERIC, STRATEGY_SUBMISSIONS,
};
use usermerge_core::db::{placeholders, MergeDatabase, SqlValue};
use usermerge_core::errors::{configuration_error, MergeError, MergeErrorKind, Result};
use usermerge_core::model::{CompoundIndex, TableMergeContext};

mod attempts;
mod generic;
mod submissions;

pub use attempts::{AttemptStrategy, AttemptTables};
pub use generic::GenericStrategy;
pub use submissions::{SubmissionStrategy, SubmissionTables};

/// Bulk mutations are issued in id-list chunks of this size.
pub const CHUNK_SIZE: usize = 500;

/// Which identity's rows are deleted when both own a row under the same
/// conflict key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictLoser {
    Source,
    Target,
}

/// Migrates one table's rows for one identity-bearing column.
///
/// Statement-level mutation failures are appended to `error_log` and the
/// strategy continues; a returned `Err` aborts the whole merge run. Either
/// way the surrounding transaction decides atomicity.
pub trait TableMergeStrategy {
    /// Tables this strategy mutates on its own. The orchestrator removes
    /// them from the generic analysis.
    fn tables_to_skip(&self) -> Vec<String> {
        Vec::new()
    }

    fn merge(
        &self,
        db: &dyn MergeDatabase,
        ctx: &TableMergeContext,
        action_log: &mut Vec<String>,
        error_log: &mut Vec<String>,
    ) -> Result<()>;
}

/// Row ids currently owned by the source identity.
pub(crate) fn source_row_ids(db: &dyn MergeDatabase, ctx: &TableMergeContext) -> Result<Vec<i64>> {
    let sql = format!(
        "SELECT id FROM {} WHERE {} = ?",
        ctx.table, ctx.identity_column
    );
    let rows = db.query(&sql, &[SqlValue::Integer(ctx.source_id)])?;
    rows.iter()
        .map(|row| row[0].as_i64().map_err(MergeError::from))
        .collect()
}

/// Resolve a compound uniqueness index before reassigning the identity
/// column.
///
/// Groups the rows of both identities by the co-indexed column values.
/// Groups holding only a source row are safe to reassign and are added to
/// `to_update`; groups holding a row from each side would collide, so the
/// losing side's row id is returned for deletion.
pub(crate) fn resolve_compound_index(
    db: &dyn MergeDatabase,
    ctx: &TableMergeContext,
    index: &CompoundIndex,
    loser: ConflictLoser,
    to_update: &mut BTreeSet<i64>,
) -> Result<Vec<i64>> {
    let conflict_columns = index.conflict_columns(&ctx.identity_column);

    let mut select_list = vec!["id".to_string(), ctx.identity_column.clone()];
    select_list.extend(conflict_columns.iter().cloned());
    let sql = format!(
        "SELECT {} FROM {} WHERE {} IN (?, ?)",
        select_list.join(", "),
        ctx.table,
        ctx.identity_column
    );
    let rows = db.query(
        &sql,
        &[
            SqlValue::Integer(ctx.source_id),
            SqlValue::Integer(ctx.target_id),
        ],
    )?;

    // conflict key (value tuple) -> owner identity -> row id. A joined
    // string key could alias when text values contain the separator.
    let mut groups: BTreeMap<Vec<String>, BTreeMap<i64, i64>> = BTreeMap::new();
    for row in &rows {
        let id = row[0].as_i64()?;
        let owner = row[1].as_i64()?;
        let key: Vec<String> = row[2..].iter().map(ToString::to_string).collect();
        groups.entry(key).or_default().insert(owner, id);
    }

    let mut to_delete = Vec::new();
    for owners in groups.values() {
        if owners.len() == 1 {
            if let Some(id) = owners.get(&ctx.source_id) {
                to_update.insert(*id);
            }
            continue;
        }
        // Both identities own a row under this key; only act when both
        // really exist, guarding against inconsistent data.
        if let (Some(source_row), Some(target_row)) =
            (owners.get(&ctx.source_id), owners.get(&ctx.target_id))
        {
            match loser {
                ConflictLoser::Source => to_delete.push(*source_row),
                ConflictLoser::Target => {
                    to_delete.push(*target_row);
                    to_update.insert(*source_row);
                }
            }
        }
    }
    Ok(to_delete)
}

/// Chunked `DELETE ... WHERE id IN (...)`. Statement failures are recorded
/// and the remaining chunks still run.
pub(crate) fn delete_rows_by_id(
    db: &dyn MergeDatabase,
    table: &str,
    ids: &[i64],
    action_log: &mut Vec<String>,
    error_log: &mut Vec<String>,
) {
    for chunk in ids.chunks(CHUNK_SIZE) {
        let sql = format!(
            "DELETE FROM {} WHERE id IN ({})",
            table,
            placeholders(chunk.len())
        );
        let params: Vec<SqlValue> = chunk.iter().map(|id| SqlValue::Integer(*id)).collect();
        match db.execute(&sql, &params) {
            Ok(n) => action_log.push(format!("{}: deleted {} conflicting records", table, n)),
            Err(e) => error_log.push(format!("table {}: {}", table, e)),
        }
    }
}

/// Chunked `UPDATE ... SET column = target WHERE id IN (...)`.
///
/// A uniqueness violation here means a per-column unique index exists that
/// the compound-index metadata did not capture. The fallback deletes the
/// losing identity's rows for the column outright; there is no retry.
pub(crate) fn reassign_rows_by_id(
    db: &dyn MergeDatabase,
    ctx: &TableMergeContext,
    ids: &[i64],
    keep_target_on_conflict: bool,
    action_log: &mut Vec<String>,
    error_log: &mut Vec<String>,
) {
    for chunk in ids.chunks(CHUNK_SIZE) {
        let sql = format!(
            "UPDATE {} SET {} = ? WHERE id IN ({})",
            ctx.table,
            ctx.identity_column,
            placeholders(chunk.len())
        );
        let mut params = Vec::with_capacity(chunk.len() + 1);
        params.push(SqlValue::Integer(ctx.target_id));
        params.extend(chunk.iter().map(|id| SqlValue::Integer(*id)));

        match db.execute(&sql, &params) {
            Ok(n) => action_log.push(format!(
                "{}: reassigned {} records on column {}",
                ctx.table, n, ctx.identity_column
            )),
            Err(e) if e.kind() == MergeErrorKind::ConstraintViolation => {
                let loser_id = if keep_target_on_conflict {
                    ctx.source_id
                } else {
                    ctx.target_id
                };
                let delete = format!(
                    "DELETE FROM {} WHERE {} = ?",
                    ctx.table, ctx.identity_column
                );
                match db.execute(&delete, &[SqlValue::Integer(loser_id)]) {
                    Ok(n) => action_log.push(format!(
                        "{}: unique index on column {}, deleted {} records of identity {}",
                        ctx.table, ctx.identity_column, n, loser_id
                    )),
                    Err(e) => error_log.push(format!("table {}: {}", ctx.table, e)),
                }
            }
            Err(e) => error_log.push(format!("table {}: {}", ctx.table, e)),
        }
    }
}

/// The full generic migration of one (table, column) pair: compound-index
/// resolution, chunked delete of the losers, chunked reassignment.
pub(crate) fn merge_rows(
    db: &dyn MergeDatabase,
    ctx: &TableMergeContext,
    loser: ConflictLoser,
    keep_target_on_conflict: bool,
    action_log: &mut Vec<String>,
    error_log: &mut Vec<String>,
) -> Result<()> {
    let mut to_update: BTreeSet<i64> = source_row_ids(db, ctx)?.into_iter().collect();
    if to_update.is_empty() {
        return Ok(());
    }

    if let Some(index) = &ctx.compound_index {
        let to_delete = resolve_compound_index(db, ctx, index, loser, &mut to_update)?;
        for id in &to_delete {
            to_update.remove(id);
        }
        delete_rows_by_id(db, &ctx.table, &to_delete, action_log, error_log);
    }

    let ids: Vec<i64> = to_update.into_iter().collect();
    reassign_rows_by_id(db, ctx, &ids, keep_target_on_conflict, action_log, error_log);
    Ok(())
}

/// Strategy registry: one instance per strategy id, shared across tables.
pub struct StrategyRegistry {
    default: Box<dyn TableMergeStrategy>,
    by_table: BTreeMap<String, Box<dyn TableMergeStrategy>>,
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("by_table", &self.by_table.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl StrategyRegistry {
    /// Build the registry from configuration. An unknown strategy id is a
    /// configuration error; guessing a default could mutate the wrong rows.
    pub fn from_config(config: &MergeConfig) -> Result<Self> {
        let default = build_strategy(&config.default_strategy, config)?;
        let mut by_table = BTreeMap::new();
        for (table, id) in &config.strategies {
            by_table.insert(table.clone(), build_strategy(id, config)?);
        }
        Ok(Self { default, by_table })
    }

    pub fn strategy_for(&self, table: &str) -> &dyn TableMergeStrategy {
        self.by_table
            .get(table)
            .map(|s| &**s)
            .unwrap_or(&*self.default)
    }

    /// Union of every registered strategy's self-managed tables.
    pub fn tables_to_skip(&self) -> BTreeSet<String> {
        let mut skip: BTreeSet<String> = self.default.tables_to_skip().into_iter().collect();
        for strategy in self.by_table.values() {
            skip.extend(strategy.tables_to_skip());
        }
        skip
    }
}

fn build_strategy(id: &str, config: &MergeConfig) -> Result<Box<dyn TableMergeStrategy>> {
    match id {
        STRATEGY_GENERIC => Ok(Box::new(GenericStrategy::new(
            config.keep_target_on_conflict,
        ))),
        STRATEGY_ATTEMPTS => Ok(Box::new(AttemptStrategy::new(
            config.attempt_policy,
            AttemptTables::default(),
            config.keep_target_on_conflict,
        ))),
        STRATEGY_SUBMISSIONS => Ok(Box::new(SubmissionStrategy::new(
            SubmissionTables::default(),
            config.keep_target_on_conflict,
        ))),
        other => Err(configuration_error(format!(
            "unknown strategy id '{}'",
            other
        ))),
    }
}
