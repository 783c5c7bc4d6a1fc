//! Aggregate pass/fail report for a run.
//!
//! Every counted operation lands in a named step as a pass or a failure.
//! Failures are bucketed by error code so a run of thousands of
//! transactions summarises to a few lines. The run passes only if no step
//! recorded a failure.

use std::collections::BTreeMap;
use std::fmt;

use polyload_submit::{DrainReport, StatsSnapshot};
use polyload_types::{PolyloadError, Result};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub name: String,
    pub passed: u64,
    pub failed: u64,
    /// Failure count per error code (or per check description).
    pub failures: BTreeMap<String, u64>,
}

/// Block-level figures gathered by drain waits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BlockSummary {
    pub blocks: usize,
    pub signed_extrinsics: usize,
    pub max_signed_per_block: usize,
    pub max_block_time_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
    pub submissions: StatsSnapshot,
    pub blocks: BlockSummary,
}

impl RunReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn step(&mut self, name: &str) -> &mut StepReport {
        if let Some(i) = self.steps.iter().position(|s| s.name == name) {
            return &mut self.steps[i];
        }
        self.steps.push(StepReport {
            name: name.to_string(),
            ..StepReport::default()
        });
        let last = self.steps.len() - 1;
        &mut self.steps[last]
    }

    pub fn pass(&mut self, step: &str) {
        self.step(step).passed += 1;
    }

    pub fn fail(&mut self, step: &str, reason: &str) {
        let entry = self.step(step);
        entry.failed += 1;
        *entry.failures.entry(reason.to_string()).or_insert(0) += 1;
    }

    pub fn error(&mut self, step: &str, error: &PolyloadError) {
        warn!(step, code = error.code(), %error, "operation failed");
        self.fail(step, error.code());
    }

    /// Count `result` under `step` and hand it back.
    pub fn record<T>(&mut self, step: &str, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.pass(step),
            Err(e) => self.error(step, e),
        }
        result
    }

    /// Count `result` and turn a failure into `None`.
    pub fn keep<T>(&mut self, step: &str, result: Result<T>) -> Option<T> {
        self.record(step, result).ok()
    }

    /// Count a protocol expectation.
    pub fn check(&mut self, step: &str, ok: bool, expectation: &str) {
        if ok {
            self.pass(step);
        } else {
            warn!(step, expectation, "check failed");
            self.fail(step, expectation);
        }
    }

    pub fn add_blocks(&mut self, drain: &DrainReport) {
        let b = &mut self.blocks;
        b.blocks += drain.blocks.len();
        b.signed_extrinsics += drain.signed_extrinsics();
        for sample in &drain.blocks {
            b.max_signed_per_block = b.max_signed_per_block.max(sample.signed_extrinsics);
            b.max_block_time_ms = b.max_block_time_ms.max(sample.block_time_ms);
        }
    }

    pub fn set_submissions(&mut self, stats: StatsSnapshot) {
        self.submissions = stats;
    }

    /// True when at least one operation ran and none failed.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.steps.iter().any(|s| s.passed > 0) && self.steps.iter().all(|s| s.failed == 0)
    }

    #[must_use]
    pub fn failed_count(&self) -> u64 {
        self.steps.iter().map(|s| s.failed).sum()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<28} {:>8} {:>8}", "step", "passed", "failed")?;
        for step in &self.steps {
            writeln!(f, "{:<28} {:>8} {:>8}", step.name, step.passed, step.failed)?;
            for (reason, count) in &step.failures {
                writeln!(f, "    {count:>6} x {reason}")?;
            }
        }
        let s = &self.submissions;
        writeln!(
            f,
            "submitted {} / succeeded {} / dispatch failed {} / dropped {} / outcome unknown {} / errors {}",
            s.submitted,
            s.succeeded,
            s.dispatch_failed,
            s.dropped,
            s.outcome_unknown,
            s.submission_errors
        )?;
        if self.blocks.blocks > 0 {
            writeln!(
                f,
                "blocks {} / signed extrinsics {} / max per block {} / max block time {}",
                self.blocks.blocks,
                self.blocks.signed_extrinsics,
                self.blocks.max_signed_per_block,
                self.blocks
                    .max_block_time_ms
                    .map_or_else(|| "-".to_string(), |ms| format!("{ms} ms")),
            )?;
        }
        write!(f, "{}", if self.passed() { "PASS" } else { "FAIL" })
    }
}

#[cfg(test)]
mod tests {
    use polyload_submit::BlockSample;

    use super::*;

    #[test]
    fn failures_are_bucketed_by_code() {
        let mut report = RunReport::new();
        report.pass("transfer");
        let _ = report.record::<()>("transfer", Err(PolyloadError::BlockNotFound(3)));
        let _ = report.record::<()>("transfer", Err(PolyloadError::BlockNotFound(4)));
        report.check("settle", false, "instruction executed");

        assert!(!report.passed());
        assert_eq!(report.failed_count(), 3);
        assert_eq!(report.steps[0].failures.get("PL_ERR_501"), Some(&2));
        assert!(report.to_string().ends_with("FAIL"));
    }

    #[test]
    fn unknown_outcomes_are_shown_apart_from_errors() {
        let mut report = RunReport::new();
        report.pass("transfer");
        report.set_submissions(StatsSnapshot {
            submitted: 2,
            succeeded: 1,
            outcome_unknown: 1,
            ..StatsSnapshot::default()
        });
        let text = report.to_string();
        assert!(text.contains("outcome unknown 1 / errors 0"), "{text}");
    }

    #[test]
    fn empty_run_does_not_pass() {
        assert!(!RunReport::new().passed());
        let mut report = RunReport::new();
        report.check("settle", true, "instruction executed");
        assert!(report.passed());
    }

    #[test]
    fn block_figures_accumulate() {
        let mut report = RunReport::new();
        let sample = |number, signed, block_time_ms| BlockSample {
            number,
            extrinsics: signed + 1,
            signed_extrinsics: signed,
            block_time_ms,
        };
        report.add_blocks(&DrainReport {
            blocks: vec![sample(1, 0, None), sample(2, 7, Some(6_000))],
            elapsed_ms: 10,
        });
        report.add_blocks(&DrainReport {
            blocks: vec![sample(3, 2, Some(6_100))],
            elapsed_ms: 10,
        });
        assert_eq!(report.blocks.blocks, 3);
        assert_eq!(report.blocks.signed_extrinsics, 9);
        assert_eq!(report.blocks.max_signed_per_block, 7);
        assert_eq!(report.blocks.max_block_time_ms, Some(6_100));
    }
}
