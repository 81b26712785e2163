// Copyright (c) The testpool Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Execution results and the order-independent suite aggregate.
//!
//! Per-test results are produced inside a worker, handed off to the
//! coordinator, and merged here into one [`AggregateSuiteResult`]. The merge
//! is commutative: its output does not depend on the order in which workers
//! finish and report, because results are re-sorted by test id before totals
//! and percentiles are derived.

use crate::test_list::TestId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Terminal status of a test within one run.
///
/// The per-test state machine is `Pending → Running → {Passed | Failed |
/// Errored}`. `Skipped` is a pre-run terminal state, assigned before
/// `Running` is ever entered (e.g. by tag filtering), and is never reached
/// from `Running`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStatus {
    /// The test body returned normally.
    Passed,
    /// The test body raised an assertion-style failure.
    Failed,
    /// The test body hit any other fault, e.g. a network error.
    Errored,
    /// The test was excluded before any worker saw it.
    Skipped,
}

impl ExecutionStatus {
    /// Returns true if this status counts as a success.
    pub fn is_success(self) -> bool {
        matches!(self, ExecutionStatus::Passed | ExecutionStatus::Skipped)
    }
}

/// The outcome of one test unit.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExecutionResult {
    /// The id of the test this result belongs to.
    pub test_id: TestId,

    /// Terminal status.
    pub status: ExecutionStatus,

    /// Measured wall-clock duration in milliseconds.
    pub duration_ms: u64,

    /// Error message. Always present for `Failed` and `Errored`; carries the
    /// skip reason for `Skipped`.
    pub message: Option<String>,

    /// Structured diagnostic context, e.g. the last attempted call and
    /// response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<serde_json::Value>,

    /// When the result was produced.
    pub completed_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Creates a passing result.
    pub fn pass(test_id: impl Into<TestId>, duration_ms: u64) -> Self {
        Self {
            test_id: test_id.into(),
            status: ExecutionStatus::Passed,
            duration_ms,
            message: None,
            debug: None,
            completed_at: Utc::now(),
        }
    }

    /// Creates a failed result. The message is never empty.
    pub fn failed(test_id: impl Into<TestId>, duration_ms: u64, message: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            status: ExecutionStatus::Failed,
            duration_ms,
            message: Some(non_empty(message.into())),
            debug: None,
            completed_at: Utc::now(),
        }
    }

    /// Creates an errored result. The message is never empty.
    pub fn errored(
        test_id: impl Into<TestId>,
        duration_ms: u64,
        message: impl Into<String>,
        debug: Option<serde_json::Value>,
    ) -> Self {
        Self {
            test_id: test_id.into(),
            status: ExecutionStatus::Errored,
            duration_ms,
            message: Some(non_empty(message.into())),
            debug,
            completed_at: Utc::now(),
        }
    }

    /// Creates a pre-run skipped result.
    pub fn skipped(test_id: impl Into<TestId>, reason: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            status: ExecutionStatus::Skipped,
            duration_ms: 0,
            message: Some(reason.into()),
            debug: None,
            completed_at: Utc::now(),
        }
    }
}

fn non_empty(message: String) -> String {
    if message.trim().is_empty() {
        "(no message provided)".to_owned()
    } else {
        message
    }
}

/// The results one worker produced for its assignment.
///
/// A worker that hit a fatal fault mid-batch carries its already-completed
/// results plus the fault note; its unattempted tests are absent.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkerResultBatch {
    /// Index of the worker that produced this batch.
    pub worker_index: usize,

    /// Completed results, in execution order.
    pub results: Vec<ExecutionResult>,

    /// A worker-fatal fault captured by the coordinator, if any. Never
    /// propagated as an error to the caller.
    pub fatal: Option<String>,
}

impl WorkerResultBatch {
    /// Creates an empty batch for the given worker.
    pub fn new(worker_index: usize) -> Self {
        Self {
            worker_index,
            ..Self::default()
        }
    }
}

/// Totals by status for a run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunStats {
    /// Total number of results in the aggregate.
    pub total: usize,
    /// Number of passed tests.
    pub passed: usize,
    /// Number of failed tests.
    pub failed: usize,
    /// Number of errored tests.
    pub errored: usize,
    /// Number of skipped tests.
    pub skipped: usize,
}

impl RunStats {
    /// Returns true if this run is considered a success: no failures and no
    /// errors. Skipped tests are not failures.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.errored == 0
    }
}

/// Latency percentiles over non-skipped results, in milliseconds.
///
/// Computed over the sorted duration array with index `ceil(n × p)` clamped
/// to `[1, n]`. Zero when the run produced no non-skipped results.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct LatencyPercentiles {
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

/// The merged, order-independent outcome of one run.
///
/// Created fresh per run and owned by the caller; never mutated
/// concurrently. This is the sole contract between the scheduler and
/// downstream reporting layers.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AggregateSuiteResult {
    results: Vec<ExecutionResult>,
    stats: RunStats,
    latency: LatencyPercentiles,
    worker_faults: BTreeMap<usize, String>,
}

impl AggregateSuiteResult {
    /// All results, deterministically sorted by test id so report diffs are
    /// not an artifact of completion timing.
    pub fn results(&self) -> &[ExecutionResult] {
        &self.results
    }

    /// Totals by status.
    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Total number of results.
    pub fn total(&self) -> usize {
        self.stats.total
    }

    /// Latency percentiles.
    pub fn latency(&self) -> LatencyPercentiles {
        self.latency
    }

    /// Worker-fatal faults captured during the run, keyed by worker index.
    pub fn worker_faults(&self) -> &BTreeMap<usize, String> {
        &self.worker_faults
    }
}

/// Merges per-worker batches into one aggregate.
///
/// Commutative: `merge([a, b, c])` equals `merge([c, a, b])` for all totals
/// and percentile statistics.
pub fn merge(batches: impl IntoIterator<Item = WorkerResultBatch>) -> AggregateSuiteResult {
    let mut results = Vec::new();
    let mut worker_faults = BTreeMap::new();

    for batch in batches {
        results.extend(batch.results);
        if let Some(fatal) = batch.fatal {
            worker_faults.insert(batch.worker_index, fatal);
        }
    }

    results.sort_by(|a, b| a.test_id.cmp(&b.test_id));

    let mut stats = RunStats {
        total: results.len(),
        ..RunStats::default()
    };
    for result in &results {
        match result.status {
            ExecutionStatus::Passed => stats.passed += 1,
            ExecutionStatus::Failed => stats.failed += 1,
            ExecutionStatus::Errored => stats.errored += 1,
            ExecutionStatus::Skipped => stats.skipped += 1,
        }
    }

    let mut durations: Vec<u64> = results
        .iter()
        .filter(|result| result.status != ExecutionStatus::Skipped)
        .map(|result| result.duration_ms)
        .collect();
    durations.sort_unstable();

    let latency = LatencyPercentiles {
        p50_ms: percentile(&durations, 0.50),
        p95_ms: percentile(&durations, 0.95),
        p99_ms: percentile(&durations, 0.99),
    };

    AggregateSuiteResult {
        results,
        stats,
        latency,
        worker_faults,
    }
}

fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let n = sorted.len();
    let rank = ((n as f64 * p).ceil() as usize).clamp(1, n);
    sorted[rank - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn batch(worker_index: usize, results: Vec<ExecutionResult>) -> WorkerResultBatch {
        WorkerResultBatch {
            worker_index,
            results,
            fatal: None,
        }
    }

    #[test]
    fn merge_is_commutative() {
        let a = batch(0, vec![ExecutionResult::pass("t1", 100)]);
        let b = batch(
            1,
            vec![
                ExecutionResult::failed("t2", 50, "expected 200, got 500"),
                ExecutionResult::pass("t3", 75),
            ],
        );
        let c = batch(2, vec![ExecutionResult::errored("t4", 10, "connection refused", None)]);

        let forward = merge([a.clone(), b.clone(), c.clone()]);
        let reversed = merge([c, a, b]);

        assert_eq!(forward.stats(), reversed.stats());
        assert_eq!(forward.latency(), reversed.latency());
        assert_eq!(forward.results(), reversed.results());
    }

    #[test]
    fn totals_are_tallied_by_status() {
        let merged = merge([batch(
            0,
            vec![
                ExecutionResult::pass("t1", 10),
                ExecutionResult::failed("t2", 20, "boom"),
                ExecutionResult::errored("t3", 30, "io error", None),
                ExecutionResult::skipped("t4", "excluded by tag `slow`"),
            ],
        )]);

        assert_eq!(
            merged.stats(),
            RunStats {
                total: 4,
                passed: 1,
                failed: 1,
                errored: 1,
                skipped: 1,
            }
        );
        assert!(!merged.stats().is_success());
    }

    #[test]
    fn results_are_sorted_by_test_id() {
        let merged = merge([
            batch(0, vec![ExecutionResult::pass("t3", 1)]),
            batch(1, vec![ExecutionResult::pass("t1", 1)]),
            batch(2, vec![ExecutionResult::pass("t2", 1)]),
        ]);
        let order: Vec<_> = merged
            .results()
            .iter()
            .map(|result| result.test_id.as_str())
            .collect();
        assert_eq!(order, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn percentiles_ignore_skipped_results() {
        let merged = merge([batch(
            0,
            (1..=100u64)
                .map(|i| ExecutionResult::pass(format!("t{i:03}"), i))
                .chain([ExecutionResult::skipped("zzz", "excluded")])
                .collect(),
        )]);

        assert_eq!(
            merged.latency(),
            LatencyPercentiles {
                p50_ms: 50,
                p95_ms: 95,
                p99_ms: 99,
            }
        );
    }

    #[test]
    fn percentile_edge_cases() {
        assert_eq!(percentile(&[], 0.5), 0, "empty run");
        assert_eq!(percentile(&[42], 0.5), 42);
        assert_eq!(percentile(&[42], 0.99), 42);
        assert_eq!(percentile(&[1, 2], 0.5), 1);
        assert_eq!(percentile(&[1, 2], 0.99), 2);
    }

    #[test]
    fn empty_message_is_normalized() {
        let result = ExecutionResult::failed("t1", 5, "  ");
        assert_eq!(result.message.as_deref(), Some("(no message provided)"));
    }

    #[test]
    fn worker_faults_are_keyed_by_worker() {
        let mut faulted = WorkerResultBatch::new(2);
        faulted.results.push(ExecutionResult::pass("t1", 5));
        faulted.fatal = Some("worker process exited abnormally".to_owned());

        let merged = merge([WorkerResultBatch::new(0), faulted]);
        assert_eq!(merged.worker_faults().len(), 1);
        assert!(merged.worker_faults()[&2].contains("abnormally"));
        // The partial result is still present.
        assert_eq!(merged.total(), 1);
    }

    #[test]
    fn empty_merge_is_a_valid_empty_aggregate() {
        let merged = merge(Vec::<WorkerResultBatch>::new());
        assert_eq!(merged.total(), 0);
        assert!(merged.stats().is_success());
        assert_eq!(merged.latency(), LatencyPercentiles::default());
    }
}
