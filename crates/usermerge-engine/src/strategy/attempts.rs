//! Strategy for attempt-numbered record tables.
//!
//! Attempt tables carry a uniqueness constraint over
//! (identity, grouping key, attempt number) plus derived best-score rows in
//! a side table. When both identities attempted the same grouping key, the
//! configured policy decides what happens; either way the side tables are
//! kept consistent here, so the orchestrator must not touch them.

#![allow(clippy::result_large_err)]

use std::collections::BTreeMap;

use usermerge_core::config::AttemptPolicy;
use usermerge_core::db::{MergeDatabase, SqlValue};
use usermerge_core::errors::Result;
use usermerge_core::model::TableMergeContext;

use super::{merge_rows, ConflictLoser, TableMergeStrategy};

/// Column and side-table names for one attempt-numbered table family.
#[derive(Debug, Clone)]
pub struct AttemptTables {
    /// Column grouping attempts into series (one series per quiz, exam, ...)
    pub grouping_column: String,
    /// 1-based attempt number, unique within (identity, grouping key)
    pub number_column: String,
    /// Timestamp ordering attempts within a series
    pub time_column: String,
    /// Per-attempt score used to derive the best grade
    pub score_column: String,
    /// Side table holding one best-grade row per (identity, grouping key)
    pub grade_table: String,
    /// Append-only history of grade changes; no uniqueness constraint
    pub grade_history_table: String,
    /// Grade value column of the side table
    pub grade_column: String,
}

impl Default for AttemptTables {
    fn default() -> Self {
        Self {
            grouping_column: "quiz".to_string(),
            number_column: "attempt".to_string(),
            time_column: "timestart".to_string(),
            score_column: "sumgrades".to_string(),
            grade_table: "quiz_grades".to_string(),
            grade_history_table: "quiz_grades_history".to_string(),
            grade_column: "grade".to_string(),
        }
    }
}

/// Migrates attempt records according to the configured policy and
/// recomputes the derived grade rows for every affected grouping key.
pub struct AttemptStrategy {
    policy: AttemptPolicy,
    tables: AttemptTables,
    keep_target_on_conflict: bool,
}

impl AttemptStrategy {
    pub fn new(policy: AttemptPolicy, tables: AttemptTables, keep_target_on_conflict: bool) -> Self {
        Self {
            policy,
            tables,
            keep_target_on_conflict,
        }
    }

    /// Grouping keys whose attempt set will change: those where the source
    /// identity currently has attempts.
    fn affected_grouping_keys(
        &self,
        db: &dyn MergeDatabase,
        ctx: &TableMergeContext,
    ) -> Result<Vec<i64>> {
        let sql = format!(
            "SELECT DISTINCT {} FROM {} WHERE {} = ?",
            self.tables.grouping_column, ctx.table, ctx.identity_column
        );
        let rows = db.query(&sql, &[SqlValue::Integer(ctx.source_id)])?;
        rows.iter()
            .map(|row| row[0].as_i64().map_err(Into::into))
            .collect()
    }

    fn merge_with_loser(
        &self,
        db: &dyn MergeDatabase,
        ctx: &TableMergeContext,
        loser: ConflictLoser,
        action_log: &mut Vec<String>,
        error_log: &mut Vec<String>,
    ) -> Result<()> {
        let affected = self.affected_grouping_keys(db, ctx)?;
        if affected.is_empty() {
            return Ok(());
        }
        merge_rows(
            db,
            ctx,
            loser,
            self.keep_target_on_conflict,
            action_log,
            error_log,
        )?;
        self.recompute_grades(db, ctx, &affected, action_log, error_log)
    }

    /// Union both identities' attempts per grouping key and renumber them by
    /// their start timestamp.
    ///
    /// Renumbering happens in two phases to stay clear of the
    /// (identity, grouping key, attempt number) uniqueness constraint:
    /// first every attempt is reassigned and numbered with an offset of the
    /// series length, then the offset is subtracted in one statement.
    fn renumber(
        &self,
        db: &dyn MergeDatabase,
        ctx: &TableMergeContext,
        action_log: &mut Vec<String>,
        error_log: &mut Vec<String>,
    ) -> Result<()> {
        let t = &self.tables;
        let sql = format!(
            "SELECT id, {g}, {u} FROM {table} WHERE {u} IN (?, ?) ORDER BY {g} ASC, {ts} ASC, id ASC",
            g = t.grouping_column,
            u = ctx.identity_column,
            table = ctx.table,
            ts = t.time_column,
        );
        let rows = db.query(
            &sql,
            &[
                SqlValue::Integer(ctx.source_id),
                SqlValue::Integer(ctx.target_id),
            ],
        )?;
        if rows.is_empty() {
            return Ok(());
        }

        // grouping key -> (row id, owner), ordered by timestamp
        let mut series: BTreeMap<i64, Vec<(i64, i64)>> = BTreeMap::new();
        for row in &rows {
            let id = row[0].as_i64()?;
            let group = row[1].as_i64()?;
            let owner = row[2].as_i64()?;
            series.entry(group).or_default().push((id, owner));
        }

        let mut affected = Vec::new();
        for (group, attempts) in &series {
            if attempts.iter().all(|(_, owner)| *owner == ctx.target_id) {
                // Target-only series stay exactly as they are.
                continue;
            }
            affected.push(*group);

            let offset = attempts.len() as i64;
            for (n, (row_id, owner)) in attempts.iter().enumerate() {
                let numbered = offset + n as i64 + 1;
                let (sql, params) = if *owner == ctx.target_id {
                    (
                        format!(
                            "UPDATE {} SET {} = ? WHERE id = ?",
                            ctx.table, t.number_column
                        ),
                        vec![SqlValue::Integer(numbered), SqlValue::Integer(*row_id)],
                    )
                } else {
                    (
                        format!(
                            "UPDATE {} SET {} = ?, {} = ? WHERE id = ?",
                            ctx.table, ctx.identity_column, t.number_column
                        ),
                        vec![
                            SqlValue::Integer(ctx.target_id),
                            SqlValue::Integer(numbered),
                            SqlValue::Integer(*row_id),
                        ],
                    )
                };
                if let Err(e) = db.execute(&sql, &params) {
                    error_log.push(format!("table {}: {}", ctx.table, e));
                }
            }

            let subtract = format!(
                "UPDATE {} SET {n} = {n} - ? WHERE {} = ? AND {} = ?",
                ctx.table,
                t.grouping_column,
                ctx.identity_column,
                n = t.number_column,
            );
            match db.execute(
                &subtract,
                &[
                    SqlValue::Integer(offset),
                    SqlValue::Integer(*group),
                    SqlValue::Integer(ctx.target_id),
                ],
            ) {
                Ok(n) => action_log.push(format!(
                    "{}: renumbered {} attempts for {} {}",
                    ctx.table, n, t.grouping_column, group
                )),
                Err(e) => error_log.push(format!("table {}: {}", ctx.table, e)),
            }
        }

        self.recompute_grades(db, ctx, &affected, action_log, error_log)
    }

    /// Rebuild the derived grade rows for the affected grouping keys.
    ///
    /// The source's grade rows are stale once its attempts moved or were
    /// deleted; the target's row is recomputed from its attempts' best
    /// score, inserted when missing. History rows carry no uniqueness, so
    /// they are reassigned as-is.
    fn recompute_grades(
        &self,
        db: &dyn MergeDatabase,
        ctx: &TableMergeContext,
        groups: &[i64],
        action_log: &mut Vec<String>,
        error_log: &mut Vec<String>,
    ) -> Result<()> {
        if groups.is_empty() {
            return Ok(());
        }
        let t = &self.tables;

        for group in groups {
            let delete_stale = format!(
                "DELETE FROM {} WHERE {} = ? AND {} = ?",
                t.grade_table, t.grouping_column, ctx.identity_column
            );
            if let Err(e) = db.execute(
                &delete_stale,
                &[SqlValue::Integer(*group), SqlValue::Integer(ctx.source_id)],
            ) {
                error_log.push(format!("table {}: {}", t.grade_table, e));
                continue;
            }

            let best_sql = format!(
                "SELECT MAX({}) FROM {} WHERE {} = ? AND {} = ?",
                t.score_column, ctx.table, t.grouping_column, ctx.identity_column
            );
            let best = db.query(
                &best_sql,
                &[SqlValue::Integer(*group), SqlValue::Integer(ctx.target_id)],
            )?;
            let best_value = match best.first() {
                Some(row) if !row[0].is_null() => row[0].clone(),
                _ => continue,
            };

            let update = format!(
                "UPDATE {} SET {} = ? WHERE {} = ? AND {} = ?",
                t.grade_table, t.grade_column, t.grouping_column, ctx.identity_column
            );
            let updated = match db.execute(
                &update,
                &[
                    best_value.clone(),
                    SqlValue::Integer(*group),
                    SqlValue::Integer(ctx.target_id),
                ],
            ) {
                Ok(n) => n,
                Err(e) => {
                    error_log.push(format!("table {}: {}", t.grade_table, e));
                    continue;
                }
            };
            if updated == 0 {
                let insert = format!(
                    "INSERT INTO {} ({}, {}, {}) VALUES (?, ?, ?)",
                    t.grade_table, t.grouping_column, ctx.identity_column, t.grade_column
                );
                if let Err(e) = db.execute(
                    &insert,
                    &[
                        SqlValue::Integer(*group),
                        SqlValue::Integer(ctx.target_id),
                        best_value,
                    ],
                ) {
                    error_log.push(format!("table {}: {}", t.grade_table, e));
                    continue;
                }
            }
            action_log.push(format!(
                "{}: recomputed grade for {} {}",
                t.grade_table, t.grouping_column, group
            ));
        }

        let history = format!(
            "UPDATE {} SET {} = ? WHERE {} = ?",
            t.grade_history_table, ctx.identity_column, ctx.identity_column
        );
        match db.execute(
            &history,
            &[
                SqlValue::Integer(ctx.target_id),
                SqlValue::Integer(ctx.source_id),
            ],
        ) {
            Ok(0) => {}
            Ok(n) => action_log.push(format!(
                "{}: reassigned {} history records",
                t.grade_history_table, n
            )),
            Err(e) => error_log.push(format!("table {}: {}", t.grade_history_table, e)),
        }
        Ok(())
    }
}

impl TableMergeStrategy for AttemptStrategy {
    fn tables_to_skip(&self) -> Vec<String> {
        vec![
            self.tables.grade_table.clone(),
            self.tables.grade_history_table.clone(),
        ]
    }

    fn merge(
        &self,
        db: &dyn MergeDatabase,
        ctx: &TableMergeContext,
        action_log: &mut Vec<String>,
        error_log: &mut Vec<String>,
    ) -> Result<()> {
        match self.policy {
            AttemptPolicy::Remain => {
                action_log.push(format!(
                    "{}, {}, {}: attempts left related to each identity",
                    ctx.table, self.tables.grade_table, self.tables.grade_history_table
                ));
                Ok(())
            }
            AttemptPolicy::DeleteFromSource => {
                self.merge_with_loser(db, ctx, ConflictLoser::Source, action_log, error_log)
            }
            AttemptPolicy::DeleteFromTarget => {
                self.merge_with_loser(db, ctx, ConflictLoser::Target, action_log, error_log)
            }
            AttemptPolicy::Renumber => self.renumber(db, ctx, action_log, error_log),
        }
    }
}
