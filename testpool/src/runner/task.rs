// Copyright (c) The testpool Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Task-isolated workers: concurrent blocking tasks within this process.

use crate::{
    aggregate::ExecutionResult,
    distribute::WorkerAssignment,
    execute::{run_test_body, BodyOutcome, ExecutorFactory},
    runner::{skip_reason, InternalRunnerEvent},
};
use std::{collections::BTreeSet, sync::Arc};
use tokio::{sync::mpsc::UnboundedSender, task::JoinHandle};
use tracing::debug;

/// Spawns one worker task that executes its whole assignment in order.
pub(crate) fn spawn_worker(
    assignment: WorkerAssignment,
    factory: Arc<dyn ExecutorFactory>,
    exclude_tags: BTreeSet<String>,
    events: UnboundedSender<InternalRunnerEvent>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || run_assignment(assignment, factory, exclude_tags, events))
}

fn run_assignment(
    assignment: WorkerAssignment,
    factory: Arc<dyn ExecutorFactory>,
    exclude_tags: BTreeSet<String>,
    events: UnboundedSender<InternalRunnerEvent>,
) {
    let worker_index = assignment.worker_index;
    debug!(worker_index, tests = assignment.test_count(), "worker starting");

    // One executor handle per worker, never shared: it may carry per-session
    // state set by a previous test.
    let mut executor = match factory.create(worker_index) {
        Ok(executor) => executor,
        Err(err) => {
            let _ = events.send(InternalRunnerEvent::WorkerDone {
                worker_index,
                fatal: Some(err.to_string()),
            });
            return;
        }
    };

    let mut fatal = None;
    for test in &assignment.tests {
        if let Some(reason) = skip_reason(test, &exclude_tags) {
            let skipped = ExecutionResult::skipped(test.id.clone(), reason);
            if send_result(&events, worker_index, skipped).is_err() {
                break;
            }
            continue;
        }

        match run_test_body(executor.as_mut(), test) {
            BodyOutcome::Completed(result) => {
                // No short-circuiting on an individual test's outcome.
                if send_result(&events, worker_index, result).is_err() {
                    // The coordinator stopped listening (deadline elapsed).
                    break;
                }
            }
            BodyOutcome::WorkerFatal(message) => {
                fatal = Some(message);
                break;
            }
        }
    }

    // Release the worker-scoped handle exactly once, then emit the batch
    // terminator.
    drop(executor);
    let _ = events.send(InternalRunnerEvent::WorkerDone {
        worker_index,
        fatal,
    });
}

fn send_result(
    events: &UnboundedSender<InternalRunnerEvent>,
    worker_index: usize,
    result: ExecutionResult,
) -> Result<(), ()> {
    events
        .send(InternalRunnerEvent::TestFinished {
            worker_index,
            result,
        })
        .map_err(|_| ())
}
