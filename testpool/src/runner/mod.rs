// Copyright (c) The testpool Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The parallel execution coordinator.
//!
//! The coordinator owns a pool of isolated workers, dispatches one
//! [`WorkerAssignment`] to each, and drains streamed per-test results over a
//! channel until every worker reports or the deadline elapses. Workers never
//! synchronize with each other except at assignment handoff and at the final
//! drain; no operation in one worker blocks on another worker's progress.
//!
//! Worker-fatal faults are bulkheaded: they are captured on the worker's
//! partial batch and never raised to the caller, and sibling workers
//! continue unaffected.

pub mod process;
mod task;

use crate::{
    aggregate::{self, AggregateSuiteResult, ExecutionResult, WorkerResultBatch},
    config::{IsolationLevel, RunnerConfig},
    distribute::WorkerAssignment,
    errors::TestRunnerBuildError,
    execute::ExecutorFactory,
    test_list::{TestId, TestUnit},
};
use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::Arc,
};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, warn};

/// Events flowing from workers to the coordinator's dispatcher loop.
#[derive(Debug)]
pub(crate) enum InternalRunnerEvent {
    /// A worker produced a result for one of its assigned tests.
    TestFinished {
        worker_index: usize,
        result: ExecutionResult,
    },

    /// A worker finished its batch, normally or fatally.
    WorkerDone {
        worker_index: usize,
        fatal: Option<String>,
    },
}

/// Returns the reason the given test is excluded before the run, if any.
pub(crate) fn skip_reason(test: &TestUnit, exclude_tags: &BTreeSet<String>) -> Option<String> {
    test.tags
        .intersection(exclude_tags)
        .next()
        .map(|tag| format!("excluded by tag `{tag}`"))
}

/// Executes worker assignments against a pool of isolated workers.
pub struct TestRunner {
    config: RunnerConfig,
    runtime: tokio::runtime::Runtime,
}

impl TestRunner {
    /// Creates a runner from a validated configuration.
    pub fn new(config: RunnerConfig) -> Result<Self, TestRunnerBuildError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("testpool-runner-worker")
            .build()
            .map_err(TestRunnerBuildError::TokioRuntimeCreate)?;
        Ok(Self { config, runtime })
    }

    /// The configuration this runner was built with.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Runs all assignments to completion and merges the per-worker batches.
    ///
    /// Blocks until every worker finishes or the configured deadline
    /// elapses. Never returns an error: worker-fatal faults are recorded on
    /// the affected worker's partial batch, and an empty assignment set
    /// yields a valid empty aggregate.
    ///
    /// With process isolation the factory runs inside the worker binary (see
    /// [`process::run_worker`]); the one passed here is unused.
    pub fn execute(
        &self,
        assignments: Vec<WorkerAssignment>,
        factory: Arc<dyn ExecutorFactory>,
    ) -> AggregateSuiteResult {
        self.runtime.block_on(self.execute_inner(assignments, factory))
    }

    async fn execute_inner(
        &self,
        assignments: Vec<WorkerAssignment>,
        factory: Arc<dyn ExecutorFactory>,
    ) -> AggregateSuiteResult {
        let total: usize = assignments.iter().map(WorkerAssignment::test_count).sum();
        debug!(
            workers = assignments.len(),
            tests = total,
            "starting test run"
        );

        let mut state = DispatcherState::new(&assignments);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut handles = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let events = events_tx.clone();
            let exclude_tags = self.config.exclude_tags().clone();
            let handle = match self.config.isolation() {
                IsolationLevel::Process { command } => {
                    process::spawn_worker(command.clone(), assignment, exclude_tags, events)
                }
                IsolationLevel::Task | IsolationLevel::None => {
                    task::spawn_worker(assignment, Arc::clone(&factory), exclude_tags, events)
                }
            };
            handles.push(handle);
        }
        // Workers hold the remaining senders; the receiver completes once
        // they all finish.
        drop(events_tx);

        let timed_out = self.drain_events(events_rx, &mut state).await;

        if timed_out {
            warn!("deadline elapsed, abandoning unreported workers");
            for handle in &handles {
                handle.abort();
            }
            state.record_timeouts();
        } else {
            futures::future::join_all(handles).await;
        }

        aggregate::merge(state.into_batches())
    }

    /// Drains worker events until completion or deadline. Returns true if
    /// the deadline elapsed first.
    async fn drain_events(
        &self,
        mut events_rx: UnboundedReceiver<InternalRunnerEvent>,
        state: &mut DispatcherState,
    ) -> bool {
        match self.config.deadline() {
            Some(deadline) => {
                let sleep = tokio::time::sleep(deadline);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        _ = &mut sleep => return true,
                        event = events_rx.recv() => match event {
                            Some(event) => {
                                state.handle_event(event);
                                if state.all_done() {
                                    return false;
                                }
                            }
                            None => return false,
                        },
                    }
                }
            }
            None => {
                while let Some(event) = events_rx.recv().await {
                    state.handle_event(event);
                    if state.all_done() {
                        break;
                    }
                }
                false
            }
        }
    }
}

impl std::fmt::Debug for TestRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRunner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Per-run bookkeeping for the dispatcher loop.
struct DispatcherState {
    batches: BTreeMap<usize, WorkerResultBatch>,
    /// Tests each worker has not yet reported, in assignment order.
    remaining: BTreeMap<usize, VecDeque<TestId>>,
    pending_workers: usize,
}

impl DispatcherState {
    fn new(assignments: &[WorkerAssignment]) -> Self {
        let batches = assignments
            .iter()
            .map(|a| (a.worker_index, WorkerResultBatch::new(a.worker_index)))
            .collect();
        let remaining = assignments
            .iter()
            .map(|a| {
                let ids = a.tests.iter().map(|t| t.id.clone()).collect();
                (a.worker_index, ids)
            })
            .collect();
        Self {
            batches,
            remaining,
            pending_workers: assignments.len(),
        }
    }

    fn handle_event(&mut self, event: InternalRunnerEvent) {
        match event {
            InternalRunnerEvent::TestFinished {
                worker_index,
                result,
            } => {
                if let Some(remaining) = self.remaining.get_mut(&worker_index) {
                    if let Some(pos) = remaining.iter().position(|id| *id == result.test_id) {
                        remaining.remove(pos);
                    }
                }
                if let Some(batch) = self.batches.get_mut(&worker_index) {
                    batch.results.push(result);
                }
            }
            InternalRunnerEvent::WorkerDone {
                worker_index,
                fatal,
            } => {
                if let Some(fatal) = &fatal {
                    warn!(worker_index, fatal = %fatal, "worker reported a fatal fault");
                }
                // A finished worker has nothing left to report: whatever it
                // did not attempt stays absent from its batch rather than
                // being marked errored.
                self.remaining.remove(&worker_index);
                if let Some(batch) = self.batches.get_mut(&worker_index) {
                    batch.fatal = fatal;
                }
                self.pending_workers = self.pending_workers.saturating_sub(1);
                debug!(worker_index, "worker done");
            }
        }
    }

    fn all_done(&self) -> bool {
        self.pending_workers == 0
    }

    /// Records every unreported test of every unfinished worker as
    /// `Errored("timeout")`, so deadline expiry never silently drops tests.
    fn record_timeouts(&mut self) {
        for (worker_index, remaining) in std::mem::take(&mut self.remaining) {
            if remaining.is_empty() {
                continue;
            }
            let batch = self
                .batches
                .entry(worker_index)
                .or_insert_with(|| WorkerResultBatch::new(worker_index));
            for test_id in remaining {
                batch
                    .results
                    .push(ExecutionResult::errored(test_id, 0, "timeout", None));
            }
            if batch.fatal.is_none() {
                batch.fatal = Some("worker did not report before the deadline".to_owned());
            }
        }
    }

    fn into_batches(self) -> Vec<WorkerResultBatch> {
        self.batches.into_values().collect()
    }
}
