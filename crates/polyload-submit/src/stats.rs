//! Atomic submission counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Thread-safe counters shared by every submission of a run.
#[derive(Debug, Default)]
pub struct SubmissionStats {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    dispatch_failed: AtomicU64,
    dropped: AtomicU64,
    outcome_unknown: AtomicU64,
    submission_errors: AtomicU64,
}

/// Point-in-time copy of [`SubmissionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub succeeded: u64,
    pub dispatch_failed: u64,
    pub dropped: u64,
    /// Included, but block or events could not be read.
    pub outcome_unknown: u64,
    pub submission_errors: u64,
}

impl StatsSnapshot {
    /// Every broadcast transaction succeeded and nothing failed client-side.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.dispatch_failed == 0
            && self.dropped == 0
            && self.outcome_unknown == 0
            && self.submission_errors == 0
    }
}

impl SubmissionStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The node accepted the extrinsic into its pool.
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch_failed(&self) {
        self.dispatch_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// The extrinsic landed in a block whose contents we could not read.
    pub fn record_outcome_unknown(&self) {
        self.outcome_unknown.fetch_add(1, Ordering::Relaxed);
    }

    /// Anything that went wrong before or during broadcast.
    pub fn record_submission_error(&self) {
        self.submission_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            dispatch_failed: self.dispatch_failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            outcome_unknown: self.outcome_unknown.load(Ordering::Relaxed),
            submission_errors: self.submission_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = SubmissionStats::new();
        stats.record_submitted();
        stats.record_submitted();
        stats.record_succeeded();
        stats.record_dispatch_failed();
        let snap = stats.snapshot();
        assert_eq!(snap.submitted, 2);
        assert_eq!(snap.succeeded, 1);
        assert_eq!(snap.dispatch_failed, 1);
        assert!(!snap.all_succeeded());
    }

    #[test]
    fn unknown_outcome_is_not_a_success() {
        let stats = SubmissionStats::new();
        stats.record_submitted();
        stats.record_outcome_unknown();
        let snap = stats.snapshot();
        assert_eq!(snap.outcome_unknown, 1);
        assert_eq!(snap.submission_errors, 0);
        assert!(!snap.all_succeeded());
    }

    #[test]
    fn empty_run_counts_as_success() {
        assert!(SubmissionStats::new().snapshot().all_succeeded());
    }
}
