// Copyright (c) The testpool Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The boundary to the external test executor collaborator.
//!
//! The scheduler has no knowledge of transport details: it obtains one
//! executor handle per worker from an [`ExecutorFactory`], invokes test
//! bodies through it, and classifies the three outcome classes. A handle is
//! never shared between workers because it may carry per-session state set
//! by a previous test.

use crate::{
    aggregate::ExecutionResult,
    errors::FactoryError,
    test_list::TestUnit,
};
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    time::Instant,
};

/// A fault raised by a test body.
///
/// Anything the body does not classify — including a caught panic — is
/// treated by the worker as a runtime fault or assertion failure per
/// [`run_test_body`].
#[derive(Clone, Debug)]
pub enum TestFault {
    /// An expected-vs-actual mismatch inside the test body.
    Assertion {
        /// Description of the mismatch.
        message: String,
    },

    /// Any other fault, e.g. a network error, with optional structured
    /// diagnostic context (such as the last attempted call and response).
    Runtime {
        /// Description of the fault.
        message: String,
        /// Structured diagnostic context.
        debug: Option<serde_json::Value>,
    },

    /// The worker itself can no longer make progress (e.g. its session is
    /// irrecoverably broken). The worker stops mid-batch: completed results
    /// are kept, the remaining tests are left unattempted, and sibling
    /// workers continue unaffected.
    WorkerFatal {
        /// Description of the fault.
        message: String,
    },
}

impl TestFault {
    /// Creates an assertion failure.
    pub fn assertion(message: impl Into<String>) -> Self {
        TestFault::Assertion {
            message: message.into(),
        }
    }

    /// Creates a runtime fault.
    pub fn runtime(message: impl Into<String>) -> Self {
        TestFault::Runtime {
            message: message.into(),
            debug: None,
        }
    }

    /// Creates a runtime fault with structured diagnostic context.
    pub fn runtime_with_debug(message: impl Into<String>, debug: serde_json::Value) -> Self {
        TestFault::Runtime {
            message: message.into(),
            debug: Some(debug),
        }
    }

    /// Creates a worker-fatal fault.
    pub fn worker_fatal(message: impl Into<String>) -> Self {
        TestFault::WorkerFatal {
            message: message.into(),
        }
    }
}

/// A worker-scoped executor handle, produced once per worker and used for
/// that worker's entire assignment.
pub trait TestExecutor: Send {
    /// Runs one test body. A normal return means the test passed.
    fn run_test(&mut self, test: &TestUnit) -> Result<(), TestFault>;
}

/// Produces executor handles scoped to a worker's target.
pub trait ExecutorFactory: Send + Sync {
    /// Creates the handle for the given worker. A failure here is a
    /// worker-fatal fault: the worker's batch stays empty and the fault is
    /// recorded on it.
    fn create(&self, worker_index: usize) -> Result<Box<dyn TestExecutor>, FactoryError>;
}

/// The outcome of invoking one test body, as seen by a worker.
#[derive(Debug)]
pub(crate) enum BodyOutcome {
    /// The test completed with a terminal status.
    Completed(ExecutionResult),
    /// The worker must stop; no result is recorded for this test.
    WorkerFatal(String),
}

/// Invokes a test body and classifies its outcome.
///
/// Normal return → `Passed`; assertion failure → `Failed` with the
/// failure's message; runtime fault → `Errored` with message and optional
/// diagnostic context. A panic is caught and recorded as `Failed` with the
/// panic message — panicking assertion macros are the native assertion
/// mechanism — and the worker continues with its next test either way.
pub(crate) fn run_test_body(executor: &mut dyn TestExecutor, test: &TestUnit) -> BodyOutcome {
    let start = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| executor.run_test(test)));
    let duration_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(())) => BodyOutcome::Completed(ExecutionResult::pass(test.id.clone(), duration_ms)),
        Ok(Err(TestFault::Assertion { message })) => {
            BodyOutcome::Completed(ExecutionResult::failed(test.id.clone(), duration_ms, message))
        }
        Ok(Err(TestFault::Runtime { message, debug })) => BodyOutcome::Completed(
            ExecutionResult::errored(test.id.clone(), duration_ms, message, debug),
        ),
        Ok(Err(TestFault::WorkerFatal { message })) => BodyOutcome::WorkerFatal(message),
        Err(payload) => BodyOutcome::Completed(ExecutionResult::failed(
            test.id.clone(),
            duration_ms,
            panic_message(payload.as_ref()),
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "test body panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::ExecutionStatus;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct ScriptedExecutor;

    impl TestExecutor for ScriptedExecutor {
        fn run_test(&mut self, test: &TestUnit) -> Result<(), TestFault> {
            match test.target.as_str() {
                "pass" => Ok(()),
                "assert" => Err(TestFault::assertion("expected 200, got 500")),
                "fault" => Err(TestFault::runtime_with_debug(
                    "connection refused",
                    json!({ "last-call": "GET /health" }),
                )),
                "panic" => panic!("index out of bounds"),
                other => Err(TestFault::worker_fatal(format!("unknown target {other}"))),
            }
        }
    }

    fn outcome_for(target: &str) -> BodyOutcome {
        let mut executor = ScriptedExecutor;
        run_test_body(&mut executor, &TestUnit::new("t", "t", target))
    }

    #[test]
    fn classification_covers_the_three_outcome_classes() {
        match outcome_for("pass") {
            BodyOutcome::Completed(result) => assert_eq!(result.status, ExecutionStatus::Passed),
            other => panic!("expected completion, got {other:?}"),
        }

        match outcome_for("assert") {
            BodyOutcome::Completed(result) => {
                assert_eq!(result.status, ExecutionStatus::Failed);
                assert_eq!(result.message.as_deref(), Some("expected 200, got 500"));
            }
            other => panic!("expected completion, got {other:?}"),
        }

        match outcome_for("fault") {
            BodyOutcome::Completed(result) => {
                assert_eq!(result.status, ExecutionStatus::Errored);
                assert_eq!(result.message.as_deref(), Some("connection refused"));
                assert_eq!(result.debug, Some(json!({ "last-call": "GET /health" })));
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn a_panicking_body_is_a_failure_with_the_panic_message() {
        match outcome_for("panic") {
            BodyOutcome::Completed(result) => {
                assert_eq!(result.status, ExecutionStatus::Failed);
                assert_eq!(result.message.as_deref(), Some("index out of bounds"));
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn worker_fatal_produces_no_result() {
        match outcome_for("die") {
            BodyOutcome::WorkerFatal(message) => assert!(message.contains("unknown target")),
            other => panic!("expected worker-fatal, got {other:?}"),
        }
    }
}
