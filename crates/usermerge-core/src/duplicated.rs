//! Content-aware duplicate resolution.
//!
//! When a table is supposed to hold one logical child record per
//! (parent, owner) pair and both identities own one, something has to give.
//! This module decides which side survives, based on the records' content
//! state and last-modified timestamps. Pure decision logic; no database
//! access.

use std::collections::BTreeSet;

/// Content states that mean "the owner actually produced something".
const STATES_WITH_CONTENT: [&str; 3] = ["submitted", "draft", "reopened"];

/// Content state of a record the owner never touched.
const STATE_EMPTY: &str = "new";

/// Whether a status tag counts as real content.
pub fn has_content(status: &str) -> bool {
    STATES_WITH_CONTENT.contains(&status)
}

/// One identity's view of the duplicated child record: every row id that
/// side owns for the parent, plus the content state and timestamp of its
/// latest version.
#[derive(Debug, Clone)]
pub struct SubmissionVersion {
    pub ids: Vec<i64>,
    pub status: String,
    pub timemodified: i64,
}

impl SubmissionVersion {
    pub fn has_content(&self) -> bool {
        has_content(&self.status)
    }

    pub fn is_empty_state(&self) -> bool {
        self.status == STATE_EMPTY
    }
}

/// The decision: which row ids to hard-delete and which to reassign to the
/// target identity. The two sets are disjoint by construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuplicateResolution {
    to_remove: BTreeSet<i64>,
    to_modify: BTreeSet<i64>,
}

impl DuplicateResolution {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn remove(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            to_remove: ids.into_iter().collect(),
            to_modify: BTreeSet::new(),
        }
    }

    pub fn remove_and_modify(
        remove: impl IntoIterator<Item = i64>,
        modify: impl IntoIterator<Item = i64>,
    ) -> Self {
        let to_remove: BTreeSet<i64> = remove.into_iter().collect();
        // Removal always wins over modification.
        let to_modify = modify
            .into_iter()
            .filter(|id| !to_remove.contains(id))
            .collect();
        Self {
            to_remove,
            to_modify,
        }
    }

    pub fn to_remove(&self) -> &BTreeSet<i64> {
        &self.to_remove
    }

    pub fn to_modify(&self) -> &BTreeSet<i64> {
        &self.to_modify
    }

    /// Accumulate another resolution, preserving disjointness.
    pub fn absorb(&mut self, other: DuplicateResolution) {
        self.to_remove.extend(other.to_remove);
        self.to_modify.extend(other.to_modify);
        let removed = &self.to_remove;
        self.to_modify.retain(|id| !removed.contains(id));
    }
}

/// Decide which side of a duplicated (parent, owner) child record survives.
///
/// - Source has content, target has none: target's records are superseded —
///   remove them, reassign source's records.
/// - Both have content: the older version (by last-modified; ties keep the
///   source) survives and is reassigned, the newer side is removed.
/// - Source has no content: drop source's records, touch nothing else.
pub fn resolve_duplicate(
    source: &SubmissionVersion,
    target: &SubmissionVersion,
) -> DuplicateResolution {
    if source.has_content() && target.is_empty_state() {
        return DuplicateResolution::remove_and_modify(
            target.ids.iter().copied(),
            source.ids.iter().copied(),
        );
    }

    if source.has_content() && target.has_content() {
        let source_is_older = source.timemodified <= target.timemodified;
        let (survivor, loser) = if source_is_older {
            (source, target)
        } else {
            (target, source)
        };
        return DuplicateResolution::remove_and_modify(
            loser.ids.iter().copied(),
            survivor.ids.iter().copied(),
        );
    }

    DuplicateResolution::remove(source.ids.iter().copied())
}
