// Copyright (c) The testpool Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by testpool.

use crate::test_list::TestId;
use std::io;
use thiserror::Error;

/// An error that occurred while building a test registry.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum RegistryError {
    /// The same test id was registered more than once.
    #[error("duplicate test id `{id}` in registry")]
    DuplicateTestId {
        /// The offending id.
        id: TestId,
    },
}

/// An error that occurred while validating a runner configuration.
///
/// Configuration errors are always reported eagerly, at build time, before
/// any worker is spawned.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum ConfigBuildError {
    /// A fixed worker count of zero was requested. Serial execution is
    /// expressed as `WorkerCount::Serial`, not as a zero count.
    #[error("fixed worker count must be nonzero (use WorkerCount::Serial for serial runs)")]
    ZeroWorkerCount,

    /// Process isolation was requested without a worker command program.
    #[error("process isolation requires a non-empty worker command program")]
    EmptyWorkerCommand,

    /// A zero deadline would expire before any worker could report.
    #[error("deadline must be nonzero")]
    ZeroDeadline,
}

/// An error that occurred while distributing tests across workers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[non_exhaustive]
pub enum DistributeError {
    /// Distribution requires at least one worker.
    #[error("cannot distribute tests across zero workers")]
    NoWorkers,
}

/// An error that occurred while parsing a distribution strategy name.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error(
    "unrecognized distribution strategy `{input}` \
     (expected one of: round-robin, random, by-priority, by-duration)"
)]
pub struct StrategyParseError {
    pub(crate) input: String,
}

/// An error that occurred while building a test runner.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TestRunnerBuildError {
    /// An error occurred while creating the Tokio runtime.
    #[error("error creating Tokio runtime")]
    TokioRuntimeCreate(#[source] io::Error),
}

/// An error returned by an [`ExecutorFactory`](crate::execute::ExecutorFactory)
/// when a worker-scoped executor handle cannot be created.
///
/// The coordinator treats this as a worker-fatal fault: the worker's batch is
/// recorded as empty with the fault attached, and sibling workers continue
/// unaffected.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("failed to create test executor: {message}")]
pub struct FactoryError {
    message: String,
}

impl FactoryError {
    /// Creates a new `FactoryError` with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An error that occurred on the wire between the coordinator and a
/// process-isolated worker.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WorkerProtocolError {
    /// The worker process could not be spawned.
    #[error("failed to spawn worker process")]
    Spawn(#[source] io::Error),

    /// An i/o error occurred on the worker channel.
    #[error("i/o error on worker channel")]
    Io(#[from] io::Error),

    /// A message could not be encoded or decoded.
    #[error("malformed worker message")]
    Codec(#[from] serde_json::Error),
}
