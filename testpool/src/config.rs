// Copyright (c) The testpool Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Coordinator configuration.
//!
//! All validation happens eagerly in [`RunnerConfigBuilder::build`], before
//! any worker is spawned.

use crate::errors::ConfigBuildError;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, time::Duration};

/// Upper bound on the auto-detected worker count.
pub const MAX_AUTO_WORKERS: usize = 8;

/// Number of workers to run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerCount {
    /// min(logical CPU count, [`MAX_AUTO_WORKERS`]).
    Auto,
    /// Run everything on one worker, in registration order.
    Serial,
    /// A fixed, nonzero worker count.
    Count(usize),
}

impl WorkerCount {
    /// Maps the external configuration surface onto a worker count:
    /// unset = auto-detect, 0 = serial, N = fixed.
    pub fn from_flag(flag: Option<usize>) -> Self {
        match flag {
            None => WorkerCount::Auto,
            Some(0) => WorkerCount::Serial,
            Some(n) => WorkerCount::Count(n),
        }
    }

    /// Resolves to a concrete worker count, always ≥ 1.
    pub fn effective(self) -> usize {
        match self {
            WorkerCount::Auto => num_cpus::get().clamp(1, MAX_AUTO_WORKERS),
            WorkerCount::Serial => 1,
            WorkerCount::Count(n) => n,
        }
    }
}

impl Default for WorkerCount {
    fn default() -> Self {
        WorkerCount::Auto
    }
}

/// Granularity of parallelism.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParallelMode {
    /// Each test is distributed individually.
    #[default]
    ByTest,
    /// All tests sharing a target (a "service") stay on one worker and share
    /// one executor handle. Grouping is applied before distribution; it is
    /// not a separate execution path.
    ByService,
}

/// The command used to launch one process-isolated worker.
///
/// The spawned process receives its assignment as JSON on stdin and streams
/// results back as JSON Lines on stdout; embedding binaries drive this via
/// [`run_worker`](crate::runner::process::run_worker).
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkerCommand {
    /// The program to execute.
    pub program: Utf8PathBuf,

    /// Arguments passed before the worker protocol takes over.
    #[serde(default)]
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// Creates a command with no extra arguments.
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }
}

/// How workers are isolated from each other.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum IsolationLevel {
    /// Each worker runs in its own OS process. A worker crash cannot corrupt
    /// sibling workers or the coordinator; results cross the boundary as
    /// serialized messages.
    Process {
        /// Command used to launch each worker process.
        command: WorkerCommand,
    },
    /// Workers are concurrent tasks within this process. Cheaper; used when
    /// full state isolation between tests is unnecessary.
    #[default]
    Task,
    /// No isolation: everything runs in-line on a single worker.
    None,
}

/// Validated coordinator configuration.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    worker_count: WorkerCount,
    parallel_mode: ParallelMode,
    isolation: IsolationLevel,
    deadline: Option<Duration>,
    exclude_tags: BTreeSet<String>,
}

impl RunnerConfig {
    /// Starts building a configuration.
    pub fn builder() -> RunnerConfigBuilder {
        RunnerConfigBuilder::default()
    }

    /// The configured worker count.
    pub fn worker_count(&self) -> WorkerCount {
        self.worker_count
    }

    /// The concrete number of workers this run will use. `None` isolation
    /// always collapses to one worker.
    pub fn effective_worker_count(&self) -> usize {
        match self.isolation {
            IsolationLevel::None => 1,
            _ => self.worker_count.effective(),
        }
    }

    /// The parallel granularity.
    pub fn parallel_mode(&self) -> ParallelMode {
        self.parallel_mode
    }

    /// The isolation backend.
    pub fn isolation(&self) -> &IsolationLevel {
        &self.isolation
    }

    /// The overall run deadline, if any.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Tags excluded before the run starts. Matching tests are recorded as
    /// skipped without ever entering the running state.
    pub fn exclude_tags(&self) -> &BTreeSet<String> {
        &self.exclude_tags
    }
}

/// Builder for [`RunnerConfig`].
#[derive(Clone, Debug, Default)]
pub struct RunnerConfigBuilder {
    worker_count: WorkerCount,
    parallel_mode: ParallelMode,
    isolation: IsolationLevel,
    deadline: Option<Duration>,
    exclude_tags: BTreeSet<String>,
}

impl RunnerConfigBuilder {
    /// Sets the worker count.
    pub fn worker_count(mut self, worker_count: WorkerCount) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Sets the parallel granularity.
    pub fn parallel_mode(mut self, parallel_mode: ParallelMode) -> Self {
        self.parallel_mode = parallel_mode;
        self
    }

    /// Sets the isolation backend.
    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    /// Sets the overall run deadline.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Excludes tests carrying the given tag.
    pub fn exclude_tag(mut self, tag: impl Into<String>) -> Self {
        self.exclude_tags.insert(tag.into());
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<RunnerConfig, ConfigBuildError> {
        if self.worker_count == WorkerCount::Count(0) {
            return Err(ConfigBuildError::ZeroWorkerCount);
        }
        if let IsolationLevel::Process { command } = &self.isolation {
            if command.program.as_str().is_empty() {
                return Err(ConfigBuildError::EmptyWorkerCommand);
            }
        }
        if self.deadline == Some(Duration::ZERO) {
            return Err(ConfigBuildError::ZeroDeadline);
        }
        Ok(RunnerConfig {
            worker_count: self.worker_count,
            parallel_mode: self.parallel_mode,
            isolation: self.isolation,
            deadline: self.deadline,
            exclude_tags: self.exclude_tags,
        })
    }
}
