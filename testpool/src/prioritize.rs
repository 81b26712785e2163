// Copyright (c) The testpool Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Orderings over test collections.
//!
//! All sorts are stable: ties preserve the input (registration) order, so
//! repeated runs over the same registry produce identical schedules.

use crate::test_list::{TestId, TestUnit};
use std::collections::BTreeMap;

/// Returns the risk score for a unit: historical failure rate scaled by the
/// declared-priority weight.
pub fn risk_score(unit: &TestUnit, failure_rate: f64) -> f64 {
    failure_rate * unit.priority.weight()
}

/// Sorts descending by risk score.
///
/// Tests absent from `failure_rates` score 0.0 and sink to the end in their
/// original relative order.
pub fn by_risk(tests: &mut [TestUnit], failure_rates: &BTreeMap<TestId, f64>) {
    tests.sort_by(|a, b| {
        let score_a = risk_score(a, failure_rates.get(&a.id).copied().unwrap_or(0.0));
        let score_b = risk_score(b, failure_rates.get(&b.id).copied().unwrap_or(0.0));
        score_b.total_cmp(&score_a)
    });
}

/// Sorts ascending by estimated duration (fail-fast-first heuristic).
pub fn by_duration(tests: &mut [TestUnit]) {
    tests.sort_by_key(|unit| unit.estimated_duration_ms);
}

/// Sorts by declared priority, critical first.
pub fn by_declared_priority(tests: &mut [TestUnit]) {
    tests.sort_by_key(|unit| unit.priority);
}
