//! Domain model for identity merging.
//!
//! Value objects shared between the orchestrator, the strategies, and the
//! persistence layer. None of these types touch the database directly.

use serde::{Deserialize, Serialize};

use crate::errors::{MergeError, MergeErrorKind, Result};

/// A user identity, read-only for the duration of a merge.
///
/// Only the lookup attributes are carried; the merge engine never creates
/// or destroys identities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque numeric key referenced from identity-bearing columns
    pub id: i64,
    pub username: String,
    /// External institutional id, when present
    pub external_id: Option<String>,
    pub email: Option<String>,
    pub firstname: Option<String>,
    pub lastname: Option<String>,
}

/// A request to reassign all records from `source_id` to `target_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeRequest {
    /// The identity inheriting the data
    pub target_id: i64,
    /// The identity being emptied of activity
    pub source_id: i64,
}

impl MergeRequest {
    pub fn new(target_id: i64, source_id: i64) -> Self {
        Self {
            target_id,
            source_id,
        }
    }

    /// Reject requests where both keys are the same identity.
    pub fn validate(&self) -> Result<()> {
        if self.target_id == self.source_id {
            return Err(MergeError::new(MergeErrorKind::SameIdentity)
                .with_op("merge")
                .with_message(format!(
                    "Cannot merge identity {} into itself",
                    self.target_id
                )));
        }
        Ok(())
    }
}

/// Client-held staging of a two-step selection before merging.
///
/// Callers pick the target and the source across separate interactions; the
/// selection travels with the caller instead of living in shared mutable
/// session state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSelection {
    pub target_id: Option<i64>,
    pub source_id: Option<i64>,
}

impl MergeSelection {
    pub fn with_target(mut self, id: i64) -> Self {
        self.target_id = Some(id);
        self
    }

    pub fn with_source(mut self, id: i64) -> Self {
        self.source_id = Some(id);
        self
    }

    pub fn is_complete(&self) -> bool {
        self.target_id.is_some() && self.source_id.is_some()
    }

    /// Turn a complete, valid selection into a merge request.
    pub fn into_request(self) -> Result<MergeRequest> {
        match (self.target_id, self.source_id) {
            (Some(target_id), Some(source_id)) => {
                let request = MergeRequest::new(target_id, source_id);
                request.validate()?;
                Ok(request)
            }
            _ => Err(MergeError::new(MergeErrorKind::InvalidInput)
                .with_op("merge_selection")
                .with_message("both identities must be selected before merging")),
        }
    }
}

/// A uniqueness constraint spanning an identity column plus other columns.
///
/// Reassigning the identity column risks a collision when both identities
/// already own a row under the same co-indexed values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundIndex {
    /// Column names whose content is an identity key
    pub identity_columns: Vec<String>,
    /// The remaining columns of the index
    pub other_columns: Vec<String>,
}

impl CompoundIndex {
    pub fn new(
        identity_columns: impl IntoIterator<Item = impl Into<String>>,
        other_columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            identity_columns: identity_columns.into_iter().map(Into::into).collect(),
            other_columns: other_columns.into_iter().map(Into::into).collect(),
        }
    }

    /// All column names taking part in the index.
    pub fn all_columns(&self) -> impl Iterator<Item = &str> {
        self.identity_columns
            .iter()
            .chain(self.other_columns.iter())
            .map(String::as_str)
    }

    /// The columns a conflict is keyed on, relative to `identity_column`.
    ///
    /// When the index spans more than one identity-bearing column (e.g. a
    /// contacts table where both sides are identities), every other column
    /// of the index participates in the conflict key. Otherwise it is just
    /// the non-identity columns.
    pub fn conflict_columns(&self, identity_column: &str) -> Vec<String> {
        if self.identity_columns.len() > 1 {
            self.all_columns()
                .filter(|c| *c != identity_column)
                .map(String::from)
                .collect()
        } else {
            self.other_columns.clone()
        }
    }
}

/// Per-table, per-run merge context handed to a strategy.
///
/// Created fresh for every (table, identity column) pair; never persisted.
#[derive(Debug, Clone)]
pub struct TableMergeContext {
    pub table: String,
    /// The identity-bearing column currently being migrated
    pub identity_column: String,
    /// Compound-index descriptor covering this table, when configured
    pub compound_index: Option<CompoundIndex>,
    pub source_id: i64,
    pub target_id: i64,
}

/// The structured result of one merge attempt.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub success: bool,
    /// Ordered human-readable action entries (success) or error entries
    /// (failure), including bookkeeping entries
    pub entries: Vec<String>,
    /// Id of the persisted audit log record
    pub log_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_identity_rejected() {
        let req = MergeRequest::new(5, 5);
        let err = req.validate().unwrap_err();
        assert_eq!(err.kind(), MergeErrorKind::SameIdentity);
    }

    #[test]
    fn test_distinct_identities_accepted() {
        assert!(MergeRequest::new(2, 7).validate().is_ok());
    }

    #[test]
    fn test_incomplete_selection_rejected() {
        let selection = MergeSelection::default().with_target(2);
        let err = selection.into_request().unwrap_err();
        assert_eq!(err.kind(), MergeErrorKind::InvalidInput);
    }

    #[test]
    fn test_complete_selection_becomes_request() {
        let request = MergeSelection::default()
            .with_target(2)
            .with_source(7)
            .into_request()
            .unwrap();
        assert_eq!(request, MergeRequest::new(2, 7));

        let same = MergeSelection::default().with_target(5).with_source(5);
        assert_eq!(
            same.into_request().unwrap_err().kind(),
            MergeErrorKind::SameIdentity
        );
    }

    #[test]
    fn test_conflict_columns_single_identity_column() {
        let ci = CompoundIndex::new(["userid"], ["courseid"]);
        assert_eq!(ci.conflict_columns("userid"), vec!["courseid".to_string()]);
    }

    #[test]
    fn test_conflict_columns_two_identity_columns() {
        // Both sides of a contacts pair are identity-bearing.
        let ci = CompoundIndex::new(["userid", "contactid"], Vec::<String>::new());
        assert_eq!(
            ci.conflict_columns("userid"),
            vec!["contactid".to_string()]
        );
        assert_eq!(
            ci.conflict_columns("contactid"),
            vec!["userid".to_string()]
        );
    }
}
