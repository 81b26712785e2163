// Copyright (c) The testpool Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-test run history feeding the risk and duration heuristics.
//!
//! Duration estimates use an exponential moving average so recent runs
//! dominate stale ones. The store is serializable; persisting it between
//! runs is the embedding framework's concern.

use crate::{
    aggregate::{AggregateSuiteResult, ExecutionStatus},
    test_list::{TestId, TestUnit},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Smoothing factor for the duration EMA. Higher values weight recent runs
/// more heavily.
const EMA_ALPHA: f64 = 0.3;

/// Accumulated observations for one test.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestHistory {
    /// Number of non-skipped observations.
    pub runs: u64,

    /// Number of observations that failed or errored.
    pub failures: u64,

    /// EMA of measured duration in milliseconds.
    ema_duration_ms: f64,

    /// Completion time of the most recent observation.
    pub last_run_at: Option<DateTime<Utc>>,
}

impl TestHistory {
    /// Returns the failure rate over all observations.
    pub fn failure_rate(&self) -> f64 {
        if self.runs == 0 {
            0.0
        } else {
            self.failures as f64 / self.runs as f64
        }
    }

    fn observe(&mut self, failed: bool, duration_ms: u64, completed_at: DateTime<Utc>) {
        if self.runs == 0 {
            self.ema_duration_ms = duration_ms as f64;
        } else {
            self.ema_duration_ms =
                EMA_ALPHA * duration_ms as f64 + (1.0 - EMA_ALPHA) * self.ema_duration_ms;
        }
        self.runs += 1;
        if failed {
            self.failures += 1;
        }
        self.last_run_at = Some(completed_at);
    }
}

/// Historical run statistics, keyed by test id.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RunHistory {
    tests: BTreeMap<TestId, TestHistory>,
}

impl RunHistory {
    /// Creates an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a run's aggregate into the history. Skipped results are not
    /// observations.
    pub fn record(&mut self, aggregate: &AggregateSuiteResult) {
        for result in aggregate.results() {
            let failed = match result.status {
                ExecutionStatus::Passed => false,
                ExecutionStatus::Failed | ExecutionStatus::Errored => true,
                ExecutionStatus::Skipped => continue,
            };
            self.tests.entry(result.test_id.clone()).or_default().observe(
                failed,
                result.duration_ms,
                result.completed_at,
            );
        }
    }

    /// Returns the failure rate for a test, 0.0 if unknown.
    pub fn failure_rate(&self, id: &TestId) -> f64 {
        self.tests
            .get(id)
            .map(TestHistory::failure_rate)
            .unwrap_or(0.0)
    }

    /// Returns the EMA duration estimate, `None` if the test has never run.
    pub fn estimated_duration_ms(&self, id: &TestId) -> Option<u64> {
        self.tests
            .get(id)
            .filter(|history| history.runs > 0)
            .map(|history| history.ema_duration_ms.round() as u64)
    }

    /// Returns failure rates for every known test, for
    /// [`prioritize::by_risk`](crate::prioritize::by_risk).
    pub fn failure_rates(&self) -> BTreeMap<TestId, f64> {
        self.tests
            .iter()
            .map(|(id, history)| (id.clone(), history.failure_rate()))
            .collect()
    }

    /// Refreshes duration estimates on the given units from history.
    /// Unknown tests keep their static estimate.
    pub fn apply_estimates(&self, tests: &mut [TestUnit]) {
        for unit in tests {
            if let Some(estimate) = self.estimated_duration_ms(&unit.id) {
                unit.estimated_duration_ms = estimate;
            }
        }
    }
}
