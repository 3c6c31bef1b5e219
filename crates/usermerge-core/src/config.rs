//! Merge configuration.
//!
//! Compiled-in defaults capture the known special cases of the reference
//! schema; a deployment extends them with a JSON override document. Override
//! semantics are deterministic deep-merge-by-key: list-valued keys are
//! set-unioned, map-valued keys are merged key-wise with the override
//! winning, scalar flags replace.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

use crate::errors::{configuration_error, MergeError, MergeErrorKind, Result};
use crate::model::CompoundIndex;

/// Strategy id for the schema-agnostic default strategy.
pub const STRATEGY_GENERIC: &str = "generic";
/// Strategy id for attempt-numbered record tables.
pub const STRATEGY_ATTEMPTS: &str = "attempts";
/// Strategy id for per-parent submission tables.
pub const STRATEGY_SUBMISSIONS: &str = "submissions";

/// What to do when both identities have attempt records under the same
/// grouping key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptPolicy {
    /// Leave both identities' records untouched; log the decision.
    Remain,
    /// Delete the source identity's records for the grouping key.
    DeleteFromSource,
    /// Delete the target identity's records for the grouping key.
    DeleteFromTarget,
    /// Union both identities' records and renumber them by timestamp.
    Renumber,
}

impl AttemptPolicy {
    /// Parse a configured policy value. Unknown values are a configuration
    /// error: silently picking a default could delete the wrong rows.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "remain" => Ok(AttemptPolicy::Remain),
            "delete_from_source" => Ok(AttemptPolicy::DeleteFromSource),
            "delete_from_target" => Ok(AttemptPolicy::DeleteFromTarget),
            "renumber" => Ok(AttemptPolicy::Renumber),
            other => Err(MergeError::new(MergeErrorKind::Configuration)
                .with_op("attempt_policy")
                .with_message(format!("Unknown attempt policy '{}'", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptPolicy::Remain => "remain",
            AttemptPolicy::DeleteFromSource => "delete_from_source",
            AttemptPolicy::DeleteFromTarget => "delete_from_target",
            AttemptPolicy::Renumber => "renumber",
        }
    }
}

/// Process-wide merge configuration, loaded once per merge run.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Tables never analyzed or mutated (logging and security reasons)
    pub excluded_tables: BTreeSet<String>,
    /// Compound uniqueness indexes per table. Descriptors whose columns do
    /// not all exist in the live schema are dropped for the run.
    pub compound_indexes: BTreeMap<String, CompoundIndex>,
    /// Per-table identity-bearing column candidates
    pub identity_columns: BTreeMap<String, Vec<String>>,
    /// Candidates applied to any table without a specific entry
    pub default_identity_columns: Vec<String>,
    /// Per-table strategy ids
    pub strategies: BTreeMap<String, String>,
    /// Strategy id applied to any table without a specific entry
    pub default_strategy: String,
    /// On an unanticipated unique-key violation, keep the target's rows and
    /// delete the source's (true), or the inverse (false)
    pub keep_target_on_conflict: bool,
    /// Policy for attempt-numbered tables when both identities collide
    pub attempt_policy: AttemptPolicy,
    /// Refuse to run against a backend without transaction support
    pub transactions_required: bool,
    /// Test flag: run the whole merge, report success, but roll back
    pub always_rollback: bool,
    /// Test flag: trace every SQL statement. Honored by database adapters
    /// built with their `from_config` constructor.
    pub debug_sql: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        let excluded_tables: BTreeSet<String> = [
            "user_preferences",
            "user_private_key",
            "user_info_data",
            "my_pages",
            "sessions",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        let mut compound_indexes = BTreeMap::new();
        compound_indexes.insert(
            "grade_grades".to_string(),
            CompoundIndex::new(["userid"], ["itemid"]),
        );
        compound_indexes.insert(
            "groups_members".to_string(),
            CompoundIndex::new(["userid"], ["groupid"]),
        );
        compound_indexes.insert(
            "course_completions".to_string(),
            CompoundIndex::new(["userid"], ["course"]),
        );
        // Both columns hold identity keys.
        compound_indexes.insert(
            "message_contacts".to_string(),
            CompoundIndex::new(["userid", "contactid"], Vec::<String>::new()),
        );
        compound_indexes.insert(
            "role_assignments".to_string(),
            CompoundIndex::new(["userid"], ["contextid", "roleid"]),
        );
        compound_indexes.insert(
            "user_lastaccess".to_string(),
            CompoundIndex::new(["userid"], ["courseid"]),
        );
        compound_indexes.insert(
            "quiz_attempts".to_string(),
            CompoundIndex::new(["userid"], ["quiz", "attempt"]),
        );
        compound_indexes.insert(
            "cohort_members".to_string(),
            CompoundIndex::new(["userid"], ["cohortid"]),
        );
        compound_indexes.insert(
            "course_modules_completion".to_string(),
            CompoundIndex::new(["userid"], ["coursemoduleid"]),
        );
        compound_indexes.insert(
            "assign_grades".to_string(),
            CompoundIndex::new(["userid"], ["assignment", "attemptnumber"]),
        );
        compound_indexes.insert(
            "badge_issued".to_string(),
            CompoundIndex::new(["userid"], ["badgeid"]),
        );
        compound_indexes.insert(
            "assign_submission".to_string(),
            CompoundIndex::new(["userid"], ["assignment", "groupid", "attemptnumber"]),
        );
        compound_indexes.insert(
            "user_enrolments".to_string(),
            CompoundIndex::new(["userid"], ["enrolid"]),
        );

        let mut identity_columns = BTreeMap::new();
        identity_columns.insert(
            "logstore_standard_log".to_string(),
            vec!["userid".to_string(), "relateduserid".to_string()],
        );
        identity_columns.insert(
            "message_contacts".to_string(),
            vec!["userid".to_string(), "contactid".to_string()],
        );
        identity_columns.insert(
            "message".to_string(),
            vec!["useridfrom".to_string(), "useridto".to_string()],
        );
        identity_columns.insert(
            "question".to_string(),
            vec!["createdby".to_string(), "modifiedby".to_string()],
        );

        let mut strategies = BTreeMap::new();
        strategies.insert("quiz_attempts".to_string(), STRATEGY_ATTEMPTS.to_string());
        strategies.insert(
            "assign_submission".to_string(),
            STRATEGY_SUBMISSIONS.to_string(),
        );

        Self {
            excluded_tables,
            compound_indexes,
            identity_columns,
            default_identity_columns: [
                "authorid",
                "reviewerid",
                "userid",
                "user_id",
                "id_user",
                "user",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            strategies,
            default_strategy: STRATEGY_GENERIC.to_string(),
            keep_target_on_conflict: true,
            attempt_policy: AttemptPolicy::Renumber,
            transactions_required: true,
            always_rollback: false,
            debug_sql: false,
        }
    }
}

impl MergeConfig {
    /// The identity-bearing column candidates for a table.
    pub fn identity_columns_for(&self, table: &str) -> &[String] {
        self.identity_columns
            .get(table)
            .map(Vec::as_slice)
            .unwrap_or(&self.default_identity_columns)
    }

    /// The strategy id registered for a table.
    pub fn strategy_for(&self, table: &str) -> &str {
        self.strategies
            .get(table)
            .map(String::as_str)
            .unwrap_or(&self.default_strategy)
    }

    /// Apply a deployment override document on top of the defaults.
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) -> Result<()> {
        if let Some(tables) = overrides.excluded_tables {
            self.excluded_tables.extend(tables);
        }
        if let Some(indexes) = overrides.compound_indexes {
            for (table, descriptor) in indexes {
                self.compound_indexes.insert(table, descriptor);
            }
        }
        if let Some(columns) = overrides.identity_columns {
            for (table, cols) in columns {
                self.identity_columns.insert(table, cols);
            }
        }
        if let Some(defaults) = overrides.default_identity_columns {
            for col in defaults {
                if !self.default_identity_columns.contains(&col) {
                    self.default_identity_columns.push(col);
                }
            }
        }
        if let Some(strategies) = overrides.strategies {
            for (table, id) in strategies {
                self.strategies.insert(table, id);
            }
        }
        if let Some(id) = overrides.default_strategy {
            self.default_strategy = id;
        }
        if let Some(keep) = overrides.keep_target_on_conflict {
            self.keep_target_on_conflict = keep;
        }
        if let Some(policy) = overrides.attempt_policy {
            self.attempt_policy = AttemptPolicy::parse(&policy)?;
        }
        if let Some(required) = overrides.transactions_required {
            self.transactions_required = required;
        }
        if let Some(rollback) = overrides.always_rollback {
            self.always_rollback = rollback;
        }
        if let Some(debug) = overrides.debug_sql {
            self.debug_sql = debug;
        }
        Ok(())
    }

    /// Defaults plus a JSON override document.
    pub fn from_json_overrides(json: &str) -> Result<Self> {
        let overrides: ConfigOverrides = serde_json::from_str(json)
            .map_err(|e| configuration_error(format!("Invalid override document: {}", e)))?;
        let mut config = Self::default();
        config.apply_overrides(overrides)?;
        Ok(config)
    }
}

/// Deployment override document. Every field is optional; absent fields
/// leave the defaults untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    pub excluded_tables: Option<BTreeSet<String>>,
    pub compound_indexes: Option<BTreeMap<String, CompoundIndex>>,
    pub identity_columns: Option<BTreeMap<String, Vec<String>>>,
    pub default_identity_columns: Option<Vec<String>>,
    pub strategies: Option<BTreeMap<String, String>>,
    pub default_strategy: Option<String>,
    pub keep_target_on_conflict: Option<bool>,
    pub attempt_policy: Option<String>,
    pub transactions_required: Option<bool>,
    pub always_rollback: Option<bool>,
    pub debug_sql: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_have_generic_default_strategy() {
        let config = MergeConfig::default();
        assert_eq!(config.default_strategy, STRATEGY_GENERIC);
        assert_eq!(config.strategy_for("some_random_table"), STRATEGY_GENERIC);
        assert_eq!(config.strategy_for("quiz_attempts"), STRATEGY_ATTEMPTS);
    }

    #[test]
    fn test_identity_columns_fallback() {
        let config = MergeConfig::default();
        assert!(config
            .identity_columns_for("unknown_table")
            .contains(&"userid".to_string()));
        assert_eq!(
            config.identity_columns_for("message"),
            &["useridfrom".to_string(), "useridto".to_string()]
        );
    }

    #[test]
    fn test_overrides_union_lists_and_merge_maps() {
        let json = r#"{
            "excluded_tables": ["plagiarism_users"],
            "identity_columns": {"message": ["useridfrom"]},
            "default_identity_columns": ["ownerid", "userid"],
            "strategies": {"custom_attempts": "attempts"},
            "attempt_policy": "remain"
        }"#;
        let config = MergeConfig::from_json_overrides(json).unwrap();

        // Lists union: defaults stay, new entries added, no duplicates.
        assert!(config.excluded_tables.contains("user_preferences"));
        assert!(config.excluded_tables.contains("plagiarism_users"));
        assert_eq!(
            config
                .default_identity_columns
                .iter()
                .filter(|c| *c == "userid")
                .count(),
            1
        );
        assert!(config
            .default_identity_columns
            .contains(&"ownerid".to_string()));

        // Maps merge key-wise: the override wins per key, other keys stay.
        assert_eq!(
            config.identity_columns_for("message"),
            &["useridfrom".to_string()]
        );
        assert_eq!(config.strategy_for("custom_attempts"), STRATEGY_ATTEMPTS);
        assert_eq!(config.strategy_for("quiz_attempts"), STRATEGY_ATTEMPTS);

        assert_eq!(config.attempt_policy, AttemptPolicy::Remain);
    }

    #[test]
    fn test_unknown_attempt_policy_is_configuration_error() {
        let err = AttemptPolicy::parse("merge_everything").unwrap_err();
        assert_eq!(err.kind(), crate::errors::MergeErrorKind::Configuration);

        let json = r#"{"attempt_policy": "bogus"}"#;
        assert!(MergeConfig::from_json_overrides(json).is_err());
    }

    #[test]
    fn test_attempt_policy_round_trip() {
        for policy in [
            AttemptPolicy::Remain,
            AttemptPolicy::DeleteFromSource,
            AttemptPolicy::DeleteFromTarget,
            AttemptPolicy::Renumber,
        ] {
            assert_eq!(AttemptPolicy::parse(policy.as_str()).unwrap(), policy);
        }
    }
}
