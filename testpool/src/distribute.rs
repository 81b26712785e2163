// Copyright (c) The testpool Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Partitioning an ordered test collection into disjoint worker assignments.
//!
//! Every strategy satisfies the partition property exactly: across the
//! assignments produced by one call, each input test appears in exactly one
//! assignment, exactly once.
//!
//! Randomness is never hidden global state: the `random` strategy shuffles
//! with an explicitly injected, seedable source, so distributions are
//! reproducible under test.

use crate::{
    config::ParallelMode,
    errors::{DistributeError, StrategyParseError},
    test_list::{TestPriority, TestUnit},
};
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    str::FromStr,
};

/// How tests are partitioned across workers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum DistributionStrategy {
    /// `test[i]` goes to `worker[i mod worker_count]`. Fully deterministic
    /// given the input order.
    RoundRobin,

    /// Shuffle with the injected random source, then round-robin.
    Random,

    /// Stable-sort by declared priority, then round-robin, spreading
    /// priority classes evenly across workers instead of clustering all
    /// critical tests on one worker.
    ByPriority,

    /// Greedy LPT: sort descending by estimated duration and repeatedly
    /// assign to the least-loaded worker. The classical bound — makespan no
    /// worse than 4/3 of the optimal partition — is the design rationale.
    ByDuration,
}

impl FromStr for DistributionStrategy {
    type Err = StrategyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(DistributionStrategy::RoundRobin),
            "random" => Ok(DistributionStrategy::Random),
            "by-priority" => Ok(DistributionStrategy::ByPriority),
            "by-duration" => Ok(DistributionStrategy::ByDuration),
            other => Err(StrategyParseError {
                input: other.to_owned(),
            }),
        }
    }
}

/// The ordered subset of tests one worker will execute.
///
/// Created per distribution call and consumed once by the coordinator.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkerAssignment {
    /// Index of the worker, in `0..worker_count`.
    pub worker_index: usize,

    /// Tests in execution order.
    pub tests: Vec<TestUnit>,
}

impl WorkerAssignment {
    /// Returns the number of assigned tests.
    pub fn test_count(&self) -> usize {
        self.tests.len()
    }

    /// Returns the summed duration estimate for this assignment.
    pub fn estimated_duration_ms(&self) -> u64 {
        self.tests.iter().map(|t| t.estimated_duration_ms).sum()
    }
}

/// The atom of distribution: a single test, or all tests of one service when
/// running with by-service granularity.
struct DistributionUnit {
    tests: Vec<TestUnit>,
}

impl DistributionUnit {
    fn duration_ms(&self) -> u64 {
        self.tests.iter().map(|t| t.estimated_duration_ms).sum()
    }

    fn top_priority(&self) -> TestPriority {
        self.tests
            .iter()
            .map(|t| t.priority)
            .min()
            .unwrap_or(TestPriority::Low)
    }
}

/// Partitions `tests` into `worker_count` disjoint assignments.
///
/// With [`ParallelMode::ByService`], tests sharing a target are distributed
/// atomically so each service lands on exactly one worker; with
/// [`ParallelMode::ByTest`] every test is its own distribution unit. The
/// partition property over individual tests holds either way.
pub fn distribute<R: Rng + ?Sized>(
    tests: Vec<TestUnit>,
    worker_count: usize,
    strategy: DistributionStrategy,
    mode: ParallelMode,
    rng: &mut R,
) -> Result<Vec<WorkerAssignment>, DistributeError> {
    if worker_count == 0 {
        return Err(DistributeError::NoWorkers);
    }

    let mut units = into_units(tests, mode);
    let mut assignments: Vec<WorkerAssignment> = (0..worker_count)
        .map(|worker_index| WorkerAssignment {
            worker_index,
            tests: Vec::new(),
        })
        .collect();

    match strategy {
        DistributionStrategy::RoundRobin => round_robin(units, &mut assignments),
        DistributionStrategy::Random => {
            units.shuffle(rng);
            round_robin(units, &mut assignments);
        }
        DistributionStrategy::ByPriority => {
            units.sort_by_key(DistributionUnit::top_priority);
            round_robin(units, &mut assignments);
        }
        DistributionStrategy::ByDuration => longest_processing_time(units, &mut assignments),
    }

    Ok(assignments)
}

fn into_units(tests: Vec<TestUnit>, mode: ParallelMode) -> Vec<DistributionUnit> {
    match mode {
        ParallelMode::ByTest => tests
            .into_iter()
            .map(|test| DistributionUnit { tests: vec![test] })
            .collect(),
        ParallelMode::ByService => {
            // Group by target in first-appearance order.
            let mut units: Vec<DistributionUnit> = Vec::new();
            let mut by_target: HashMap<String, usize> = HashMap::new();
            for test in tests {
                match by_target.get(&test.target) {
                    Some(&idx) => units[idx].tests.push(test),
                    None => {
                        by_target.insert(test.target.clone(), units.len());
                        units.push(DistributionUnit { tests: vec![test] });
                    }
                }
            }
            units
        }
    }
}

fn round_robin(units: Vec<DistributionUnit>, assignments: &mut [WorkerAssignment]) {
    let worker_count = assignments.len();
    for (i, unit) in units.into_iter().enumerate() {
        assignments[i % worker_count].tests.extend(unit.tests);
    }
}

fn longest_processing_time(mut units: Vec<DistributionUnit>, assignments: &mut [WorkerAssignment]) {
    units.sort_by_key(|unit| Reverse(unit.duration_ms()));

    // Min-heap of (accumulated load, worker index); ties go to the lowest
    // worker index for determinism.
    let mut loads: BinaryHeap<Reverse<(u64, usize)>> = (0..assignments.len())
        .map(|worker_index| Reverse((0, worker_index)))
        .collect();

    for unit in units {
        let Reverse((load, worker_index)) = loads.pop().expect("heap has one entry per worker");
        let duration = unit.duration_ms();
        assignments[worker_index].tests.extend(unit.tests);
        loads.push(Reverse((load + duration, worker_index)));
    }
}
