// Copyright (c) The testpool Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-isolated workers.
//!
//! Each worker runs inside its own OS process, so a crash cannot corrupt
//! sibling workers or the coordinator's state. The coordinator writes the
//! worker's assignment to the child's stdin as one JSON document and reads
//! per-test results back as JSON Lines — an incrementally streaming
//! transport, so a worker that dies mid-batch still leaves its completed
//! results behind.
//!
//! The child side of the protocol is [`run_worker`]: a worker binary
//! deserializes its input, runs the assignment against its own
//! [`ExecutorFactory`], and streams messages back.

use crate::{
    aggregate::ExecutionResult,
    config::WorkerCommand,
    distribute::WorkerAssignment,
    errors::WorkerProtocolError,
    execute::{run_test_body, BodyOutcome, ExecutorFactory},
    runner::{skip_reason, InternalRunnerEvent},
    test_list::TestUnit,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    io::{BufRead, Write},
    process::Stdio,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::Command,
    sync::mpsc::UnboundedSender,
    task::JoinHandle,
};
use tracing::{debug, warn};

/// The assignment handed to a worker process on stdin.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkerInput {
    /// Index of this worker, in `0..worker_count`.
    pub worker_index: usize,

    /// Tests in execution order.
    pub tests: Vec<TestUnit>,

    /// Tags whose tests are skipped before running.
    #[serde(default)]
    pub exclude_tags: BTreeSet<String>,
}

/// A message streamed from a worker process on stdout, one per line.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum WorkerMessage {
    /// One test completed.
    Result {
        /// The test's outcome.
        result: ExecutionResult,
    },

    /// The batch completed normally.
    Done,

    /// The worker can no longer make progress; completed results already
    /// streamed remain valid.
    Fatal {
        /// Description of the fault.
        message: String,
    },
}

/// Child-side worker loop, for embedding in a worker binary.
///
/// Reads a [`WorkerInput`] from `input` until EOF, obtains one executor
/// handle from the factory, runs the assignment in order without
/// short-circuiting on individual failures, and streams one
/// [`WorkerMessage`] per line to `output`.
///
/// Worker-fatal faults (executor creation failure, a
/// [`TestFault::WorkerFatal`](crate::execute::TestFault::WorkerFatal) body
/// outcome) are reported as a `Fatal` message, not as an `Err`: the protocol
/// carried them successfully. `Err` is reserved for transport problems.
pub fn run_worker(
    factory: &dyn ExecutorFactory,
    input: impl std::io::Read,
    mut output: impl Write,
) -> Result<(), WorkerProtocolError> {
    let input: WorkerInput = serde_json::from_reader(input)?;

    let mut executor = match factory.create(input.worker_index) {
        Ok(executor) => executor,
        Err(err) => {
            write_message(&mut output, &WorkerMessage::Fatal {
                message: err.to_string(),
            })?;
            return Ok(());
        }
    };

    let mut fatal = None;
    for test in &input.tests {
        if let Some(reason) = skip_reason(test, &input.exclude_tags) {
            let result = ExecutionResult::skipped(test.id.clone(), reason);
            write_message(&mut output, &WorkerMessage::Result { result })?;
            continue;
        }

        match run_test_body(executor.as_mut(), test) {
            BodyOutcome::Completed(result) => {
                write_message(&mut output, &WorkerMessage::Result { result })?;
            }
            BodyOutcome::WorkerFatal(message) => {
                fatal = Some(message);
                break;
            }
        }
    }

    drop(executor);
    match fatal {
        Some(message) => write_message(&mut output, &WorkerMessage::Fatal { message }),
        None => write_message(&mut output, &WorkerMessage::Done),
    }
}

fn write_message(
    output: &mut impl Write,
    message: &WorkerMessage,
) -> Result<(), WorkerProtocolError> {
    serde_json::to_writer(&mut *output, message)?;
    output.write_all(b"\n")?;
    // Flush per message: the coordinator consumes results incrementally.
    output.flush()?;
    Ok(())
}

/// Parses one stdout line into a message. Exposed for custom worker
/// transports.
pub fn parse_message(line: &str) -> Result<WorkerMessage, WorkerProtocolError> {
    Ok(serde_json::from_str(line)?)
}

/// Spawns one worker process and forwards its streamed messages to the
/// dispatcher.
pub(crate) fn spawn_worker(
    command: WorkerCommand,
    assignment: WorkerAssignment,
    exclude_tags: BTreeSet<String>,
    events: UnboundedSender<InternalRunnerEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let worker_index = assignment.worker_index;
        let fatal = match drive_child(command, assignment, exclude_tags, &events).await {
            Ok(fatal) => fatal,
            Err(err) => Some(err.to_string()),
        };
        let _ = events.send(InternalRunnerEvent::WorkerDone {
            worker_index,
            fatal,
        });
    })
}

/// Runs one child to completion. Returns the worker-fatal fault, if any.
async fn drive_child(
    command: WorkerCommand,
    assignment: WorkerAssignment,
    exclude_tags: BTreeSet<String>,
    events: &UnboundedSender<InternalRunnerEvent>,
) -> Result<Option<String>, WorkerProtocolError> {
    let worker_index = assignment.worker_index;
    debug!(worker_index, program = %command.program, "spawning worker process");

    let mut child = Command::new(command.program.as_std_path())
        .args(&command.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(WorkerProtocolError::Spawn)?;

    let input = WorkerInput {
        worker_index,
        tests: assignment.tests,
        exclude_tags,
    };
    let payload = serde_json::to_vec(&input)?;
    {
        let mut stdin = child.stdin.take().expect("stdin is piped");
        stdin.write_all(&payload).await?;
        stdin.shutdown().await?;
        // Dropping stdin closes the pipe; the child sees EOF on its input.
    }

    let stdout = child.stdout.take().expect("stdout is piped");
    let mut lines = BufReader::new(stdout).lines();

    let mut fatal = None;
    let mut done = false;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match parse_message(&line) {
            Ok(WorkerMessage::Result { result }) => {
                let _ = events.send(InternalRunnerEvent::TestFinished {
                    worker_index,
                    result,
                });
            }
            Ok(WorkerMessage::Done) => {
                done = true;
                break;
            }
            Ok(WorkerMessage::Fatal { message }) => {
                fatal = Some(message);
                done = true;
                break;
            }
            Err(err) => {
                warn!(worker_index, %err, "malformed worker message");
                fatal = Some(format!("malformed worker message: {err}"));
                done = true;
                break;
            }
        }
    }

    let status = child.wait().await?;
    if !done && fatal.is_none() {
        // Stdout closed without a terminator: the worker crashed mid-batch.
        fatal = Some(match status.code() {
            Some(code) => format!("worker process exited abnormally with code {code}"),
            None => "worker process was killed by a signal".to_owned(),
        });
    }
    Ok(fatal)
}

/// Reads worker messages from a synchronous reader, for callers that manage
/// their own child processes.
pub fn read_messages(
    reader: impl BufRead,
) -> impl Iterator<Item = Result<WorkerMessage, WorkerProtocolError>> {
    reader.lines().filter_map(|line| match line {
        Ok(line) if line.trim().is_empty() => None,
        Ok(line) => Some(parse_message(&line)),
        Err(err) => Some(Err(WorkerProtocolError::Io(err))),
    })
}
