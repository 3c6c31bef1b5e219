//! Merge lifecycle notifications.
//!
//! The engine announces every resolved merge attempt, success or failure,
//! after the audit record has been written. Deployments hook caches,
//! notifications, or session invalidation here.

use usermerge_core::model::{MergeOutcome, MergeRequest};

/// Receives one callback per resolved merge attempt.
pub trait MergeObserver {
    fn merge_completed(&self, request: &MergeRequest, outcome: &MergeOutcome);
}

/// Observer that does nothing.
pub struct NoopObserver;

impl MergeObserver for NoopObserver {
    fn merge_completed(&self, _request: &MergeRequest, _outcome: &MergeOutcome) {}
}
