//! The merge orchestrator.
//!
//! Discovers the tables to process from the live schema, dispatches the
//! per-table strategies inside a single transaction, and records the
//! outcome in the audit log after the transaction resolves.

#![allow(clippy::result_large_err)]

use std::collections::BTreeSet;

use usermerge_core::config::MergeConfig;
use usermerge_core::db::{MergeDatabase, MergeLogStore};
use usermerge_core::errors::{MergeError, MergeErrorKind, Result};
use usermerge_core::model::{CompoundIndex, MergeOutcome, MergeRequest, TableMergeContext};

use crate::aggregates::{DerivedAggregates, NoopAggregates};
use crate::events::{MergeObserver, NoopObserver};
use crate::strategy::StrategyRegistry;

/// One table's processing plan for a single run.
struct TablePlan {
    table: String,
    /// Identity-bearing columns present in the live schema, candidate order
    columns: Vec<String>,
    compound_index: Option<CompoundIndex>,
}

/// Merges one identity into another across every discovered table.
///
/// Construct once, call [`MergeEngine::merge`] any number of times.
pub struct MergeEngine {
    config: MergeConfig,
    registry: StrategyRegistry,
    observer: Box<dyn MergeObserver>,
    aggregates: Box<dyn DerivedAggregates>,
}

impl std::fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MergeEngine {
    pub fn new(config: MergeConfig) -> Result<Self> {
        let registry = StrategyRegistry::from_config(&config)?;
        Ok(Self {
            config,
            registry,
            observer: Box::new(NoopObserver),
            aggregates: Box::new(NoopAggregates),
        })
    }

    pub fn with_observer(mut self, observer: Box<dyn MergeObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_aggregates(mut self, aggregates: Box<dyn DerivedAggregates>) -> Self {
        self.aggregates = aggregates;
        self
    }

    /// Merge all records of the source identity into the target identity.
    ///
    /// Returns `Ok` with the recorded outcome whenever the attempt resolved,
    /// even when it resolved as a failure; every resolved attempt leaves
    /// exactly one audit record. `Err` is reserved for conditions where no
    /// merge was attempted at all, such as a backend without transaction
    /// support.
    pub fn merge(
        &self,
        db: &dyn MergeDatabase,
        log_store: &dyn MergeLogStore,
        request: MergeRequest,
    ) -> Result<MergeOutcome> {
        if let Err(e) = request.validate() {
            tracing::warn!(target_id = request.target_id, "rejected self-merge");
            return self.resolve(log_store, &request, false, vec![e.to_string()]);
        }

        if self.config.transactions_required && !db.supports_transactions() {
            return Err(MergeError::new(MergeErrorKind::TransactionUnsupported)
                .with_op("merge")
                .with_message("backend reports no transaction support"));
        }

        let started_at = chrono::Utc::now();
        let start_entry = format!(
            "merge of identity {} into {} started at {}",
            request.source_id,
            request.target_id,
            started_at.to_rfc3339()
        );
        tracing::info!(
            source_id = request.source_id,
            target_id = request.target_id,
            "merge started"
        );

        let mut action_log = vec![start_entry.clone()];
        let mut error_log: Vec<String> = Vec::new();

        db.begin()?;

        let skipped = match self.run_tables(db, &request, &mut action_log, &mut error_log) {
            Ok(skipped) => skipped,
            Err(e) => {
                error_log.push(format!("merge aborted: {}", e));
                Vec::new()
            }
        };

        let success = if self.config.always_rollback {
            self.try_rollback(db);
            action_log.push("always_rollback is set; transaction rolled back".to_string());
            error_log.is_empty()
        } else if error_log.is_empty() {
            match db.commit() {
                Ok(()) => true,
                Err(e) => {
                    error_log.push(format!("commit failed: {}", e));
                    self.try_rollback(db);
                    false
                }
            }
        } else {
            self.try_rollback(db);
            false
        };

        let finished_at = chrono::Utc::now();
        let elapsed = (finished_at - started_at).num_seconds();

        let entries = if success {
            let mut entries = Vec::with_capacity(action_log.len() + 3);
            if !skipped.is_empty() {
                entries.push(format!("skipped tables: {}", skipped.join(", ")));
            }
            entries.extend(action_log);
            entries.push(format!("merge finished at {}", finished_at.to_rfc3339()));
            entries.push(format!("time taken: {} seconds", elapsed));
            entries
        } else {
            let mut entries = error_log;
            entries.push(start_entry);
            entries.push(format!("time taken: {} seconds", elapsed));
            entries
        };

        tracing::info!(
            source_id = request.source_id,
            target_id = request.target_id,
            success,
            "merge resolved"
        );
        self.resolve(log_store, &request, success, entries)
    }

    /// Record the resolved attempt and notify the observer. Runs after the
    /// transaction, so the record survives a rollback.
    fn resolve(
        &self,
        log_store: &dyn MergeLogStore,
        request: &MergeRequest,
        success: bool,
        entries: Vec<String>,
    ) -> Result<MergeOutcome> {
        let log_id = log_store.record(request.target_id, request.source_id, success, &entries)?;
        let outcome = MergeOutcome {
            success,
            entries,
            log_id,
        };
        self.observer.merge_completed(request, &outcome);
        Ok(outcome)
    }

    fn try_rollback(&self, db: &dyn MergeDatabase) {
        if let Err(e) = db.rollback() {
            // The failure outcome stands either way.
            tracing::warn!(error = %e, "rollback failed");
        }
    }

    fn run_tables(
        &self,
        db: &dyn MergeDatabase,
        request: &MergeRequest,
        action_log: &mut Vec<String>,
        error_log: &mut Vec<String>,
    ) -> Result<Vec<String>> {
        let (plans, skipped) = self.plan_tables(db)?;

        for plan in &plans {
            let strategy = self.registry.strategy_for(&plan.table);
            for column in &plan.columns {
                let ctx = TableMergeContext {
                    table: plan.table.clone(),
                    identity_column: column.clone(),
                    compound_index: plan.compound_index.clone(),
                    source_id: request.source_id,
                    target_id: request.target_id,
                };
                strategy.merge(db, &ctx, action_log, error_log)?;
            }
        }

        self.aggregates
            .recompute(db, request.target_id, request.source_id, action_log)?;
        Ok(skipped)
    }

    /// Discover what to process from the live schema, fresh on every run.
    ///
    /// Excluded tables are skipped and reported; strategy-owned side tables
    /// are skipped silently; tables without any configured identity column
    /// are not identity-bearing. A compound-index descriptor whose columns
    /// are not all present in the live table is dropped for the run.
    fn plan_tables(&self, db: &dyn MergeDatabase) -> Result<(Vec<TablePlan>, Vec<String>)> {
        let strategy_owned = self.registry.tables_to_skip();
        let mut plans = Vec::new();
        let mut skipped = Vec::new();

        for table in db.table_names()? {
            if self.config.excluded_tables.contains(&table) {
                skipped.push(table);
                continue;
            }
            if strategy_owned.contains(&table) {
                continue;
            }

            let live_columns: BTreeSet<String> = db.column_names(&table)?.into_iter().collect();
            let columns: Vec<String> = self
                .config
                .identity_columns_for(&table)
                .iter()
                .filter(|c| live_columns.contains(*c))
                .cloned()
                .collect();
            if columns.is_empty() {
                continue;
            }

            let compound_index = match self.config.compound_indexes.get(&table) {
                Some(index) if index.all_columns().all(|c| live_columns.contains(c)) => {
                    Some(index.clone())
                }
                Some(_) => {
                    tracing::debug!(table = %table, "compound index columns missing, dropped for this run");
                    None
                }
                None => None,
            };

            plans.push(TablePlan {
                table,
                columns,
                compound_index,
            });
        }
        Ok((plans, skipped))
    }
}
