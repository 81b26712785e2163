// Copyright (c) The testpool Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests driving the scheduler through the public API.

use pretty_assertions::assert_eq;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use testpool::{
    aggregate::ExecutionStatus,
    config::{IsolationLevel, ParallelMode, RunnerConfig, WorkerCount},
    distribute::{distribute, DistributionStrategy, WorkerAssignment},
    errors::FactoryError,
    execute::{ExecutorFactory, TestExecutor, TestFault},
    history::RunHistory,
    impact::ImpactAnalyzer,
    prioritize,
    runner::TestRunner,
    test_list::{TestList, TestPriority, TestUnit},
};

/// Test executor scripted through the unit's target string.
struct ScriptedExecutor {
    order: Arc<Mutex<Vec<String>>>,
}

impl TestExecutor for ScriptedExecutor {
    fn run_test(&mut self, test: &TestUnit) -> Result<(), TestFault> {
        self.order.lock().unwrap().push(test.id.as_str().to_owned());
        match test.target.as_str() {
            "assert" => Err(TestFault::assertion("expected 200, got 500")),
            "fault" => Err(TestFault::runtime("connection refused")),
            "die" => Err(TestFault::worker_fatal("session lost")),
            "hang" => {
                std::thread::sleep(Duration::from_millis(600));
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

#[derive(Default)]
struct ScriptedFactory {
    creates: AtomicUsize,
    order: Arc<Mutex<Vec<String>>>,
}

impl ExecutorFactory for ScriptedFactory {
    fn create(&self, _worker_index: usize) -> Result<Box<dyn TestExecutor>, FactoryError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedExecutor {
            order: Arc::clone(&self.order),
        }))
    }
}

fn task_runner(worker_count: WorkerCount) -> TestRunner {
    let config = RunnerConfig::builder()
        .worker_count(worker_count)
        .isolation(IsolationLevel::Task)
        .build()
        .expect("valid config");
    TestRunner::new(config).expect("runner built")
}

fn assignment(worker_index: usize, tests: Vec<TestUnit>) -> WorkerAssignment {
    WorkerAssignment {
        worker_index,
        tests,
    }
}

#[test]
fn end_to_end_by_priority_over_four_task_workers() {
    let priorities = [
        TestPriority::Critical,
        TestPriority::High,
        TestPriority::Medium,
        TestPriority::Low,
    ];
    let tests: Vec<_> = (0..10)
        .map(|i| {
            TestUnit::new(format!("t{i}"), format!("test {i}"), "pass")
                .with_priority(priorities[i % 4])
        })
        .collect();

    let config = RunnerConfig::builder()
        .worker_count(WorkerCount::Count(4))
        .isolation(IsolationLevel::Task)
        .build()
        .expect("valid config");

    let assignments = distribute(
        tests,
        config.effective_worker_count(),
        DistributionStrategy::ByPriority,
        ParallelMode::ByTest,
        &mut rand::rng(),
    )
    .expect("nonzero workers");
    assert_eq!(assignments.len(), 4);

    let factory = Arc::new(ScriptedFactory::default());
    let runner = TestRunner::new(config).expect("runner built");
    let aggregate = runner.execute(assignments, Arc::clone(&factory) as _);

    assert_eq!(aggregate.total(), 10);
    assert_eq!(aggregate.stats().passed, 10);
    assert!(aggregate.stats().is_success());
    // One executor handle per worker, created once, never shared.
    assert_eq!(factory.creates.load(Ordering::SeqCst), 4);
}

#[test]
fn individual_failures_do_not_short_circuit_a_worker() {
    let runner = task_runner(WorkerCount::Serial);
    let factory = Arc::new(ScriptedFactory::default());

    let aggregate = runner.execute(
        vec![assignment(
            0,
            vec![
                TestUnit::new("t1", "a", "pass"),
                TestUnit::new("t2", "b", "assert"),
                TestUnit::new("t3", "c", "fault"),
                TestUnit::new("t4", "d", "pass"),
            ],
        )],
        factory as _,
    );

    assert_eq!(aggregate.total(), 4);
    assert_eq!(aggregate.stats().passed, 2);
    assert_eq!(aggregate.stats().failed, 1);
    assert_eq!(aggregate.stats().errored, 1);

    let failed = &aggregate.results()[1];
    assert_eq!(failed.test_id.as_str(), "t2");
    assert_eq!(failed.message.as_deref(), Some("expected 200, got 500"));
}

#[test]
fn worker_fatal_fault_is_bulkheaded_from_siblings() {
    // Nine tests round-robined over three workers; worker 2 gets t3, t6, t9
    // and dies on t6.
    let tests: Vec<_> = (1..=9)
        .map(|i| {
            let target = if i == 6 { "die" } else { "pass" };
            TestUnit::new(format!("t{i}"), format!("test {i}"), target)
        })
        .collect();

    let assignments = distribute(
        tests,
        3,
        DistributionStrategy::RoundRobin,
        ParallelMode::ByTest,
        &mut rand::rng(),
    )
    .expect("nonzero workers");

    let runner = task_runner(WorkerCount::Count(3));
    let aggregate = runner.execute(assignments, Arc::new(ScriptedFactory::default()) as _);

    // Workers 0 and 1 return full results; worker 2's completed t3 is
    // present and its unattempted t9 is absent, not errored.
    assert_eq!(aggregate.total(), 7);
    assert_eq!(aggregate.stats().passed, 7);
    let ids: Vec<_> = aggregate
        .results()
        .iter()
        .map(|r| r.test_id.as_str())
        .collect();
    assert_eq!(ids, vec!["t1", "t2", "t3", "t4", "t5", "t7", "t8"]);
    assert_eq!(aggregate.worker_faults()[&2], "session lost");
}

#[test]
fn deadline_records_unreported_tests_as_timeout_errors() {
    let config = RunnerConfig::builder()
        .worker_count(WorkerCount::Count(2))
        .isolation(IsolationLevel::Task)
        .deadline(Duration::from_millis(150))
        .build()
        .expect("valid config");
    let runner = TestRunner::new(config).expect("runner built");

    let aggregate = runner.execute(
        vec![
            assignment(
                0,
                vec![
                    TestUnit::new("fast1", "a", "pass"),
                    TestUnit::new("fast2", "b", "pass"),
                ],
            ),
            assignment(
                1,
                vec![
                    TestUnit::new("slow1", "c", "hang"),
                    TestUnit::new("slow2", "d", "pass"),
                ],
            ),
        ],
        Arc::new(ScriptedFactory::default()) as _,
    );

    // The fast worker is unaffected; the slow worker's unreported tests are
    // recorded as timeouts rather than silently omitted.
    assert_eq!(aggregate.total(), 4);
    assert_eq!(aggregate.stats().passed, 2);
    assert_eq!(aggregate.stats().errored, 2);
    for id in ["slow1", "slow2"] {
        let result = aggregate
            .results()
            .iter()
            .find(|r| r.test_id.as_str() == id)
            .expect("timeout entry present");
        assert_eq!(result.status, ExecutionStatus::Errored);
        assert_eq!(result.message.as_deref(), Some("timeout"));
    }
    assert!(aggregate.worker_faults().contains_key(&1));
}

#[test]
fn serial_mode_runs_in_order_with_a_single_executor() {
    let config = RunnerConfig::builder()
        .worker_count(WorkerCount::Count(8))
        .isolation(IsolationLevel::None)
        .build()
        .expect("valid config");
    assert_eq!(config.effective_worker_count(), 1);
    let runner = TestRunner::new(config).expect("runner built");

    let factory = Arc::new(ScriptedFactory::default());
    let tests: Vec<_> = (0..5)
        .map(|i| TestUnit::new(format!("t{i}"), "t", "pass"))
        .collect();
    let aggregate = runner.execute(vec![assignment(0, tests)], Arc::clone(&factory) as _);

    assert_eq!(aggregate.total(), 5);
    assert_eq!(factory.creates.load(Ordering::SeqCst), 1);
    let order = factory.order.lock().unwrap().clone();
    assert_eq!(order, vec!["t0", "t1", "t2", "t3", "t4"]);
}

#[test]
fn excluded_tags_are_skipped_before_running() {
    let config = RunnerConfig::builder()
        .worker_count(WorkerCount::Serial)
        .exclude_tag("slow")
        .build()
        .expect("valid config");
    let runner = TestRunner::new(config).expect("runner built");

    let factory = Arc::new(ScriptedFactory::default());
    let aggregate = runner.execute(
        vec![assignment(
            0,
            vec![
                TestUnit::new("kept", "a", "pass"),
                TestUnit::new("skipped", "b", "pass").with_tag("slow"),
            ],
        )],
        Arc::clone(&factory) as _,
    );

    assert_eq!(aggregate.stats().passed, 1);
    assert_eq!(aggregate.stats().skipped, 1);
    // The skipped test never reached the executor.
    assert_eq!(factory.order.lock().unwrap().clone(), vec!["kept"]);
}

#[test]
fn empty_assignments_yield_a_valid_empty_aggregate() {
    let runner = task_runner(WorkerCount::Serial);
    let aggregate = runner.execute(Vec::new(), Arc::new(ScriptedFactory::default()) as _);
    assert_eq!(aggregate.total(), 0);
    assert!(aggregate.stats().is_success());
}

#[test]
fn impact_selection_feeds_the_full_pipeline() {
    let list = TestList::new(vec![
        TestUnit::new("t1", "auth smoke", "pass").with_artifacts(["src/auth.rs"]),
        TestUnit::new("t2", "billing smoke", "pass").with_artifacts(["src/billing.rs"]),
        TestUnit::new("t3", "auth deep", "pass").with_artifacts(["src/auth.rs", "src/db.rs"]),
        TestUnit::new("t4", "catalog smoke", "pass").with_artifacts(["src/catalog.rs"]),
    ])
    .expect("unique ids");

    let mut analyzer = ImpactAnalyzer::new();
    for unit in list.iter() {
        analyzer.register_unit(unit);
    }

    // Nothing changed: the analyzer reports an empty impact set and the
    // caller makes the fallback decision explicitly.
    let untouched = analyzer.analyze_impact(Vec::<String>::new());
    assert!(untouched.is_empty());
    let fallback: Vec<TestUnit> = list.iter().cloned().collect();
    assert_eq!(fallback.len(), 4);

    // Only auth changed: exactly t1 and t3 are selected.
    let impact = analyzer.analyze_impact(["src/auth.rs"]);
    let mut selected: Vec<TestUnit> = analyzer
        .resolve(&impact, &list)
        .into_iter()
        .cloned()
        .collect();
    assert_eq!(selected.len(), 2);

    let history = RunHistory::new();
    prioritize::by_risk(&mut selected, &history.failure_rates());

    let assignments = distribute(
        selected,
        2,
        DistributionStrategy::ByDuration,
        ParallelMode::ByTest,
        &mut rand::rng(),
    )
    .expect("nonzero workers");

    let runner = task_runner(WorkerCount::Count(2));
    let aggregate = runner.execute(assignments, Arc::new(ScriptedFactory::default()) as _);

    assert_eq!(aggregate.total(), 2);
    let ids: Vec<_> = aggregate
        .results()
        .iter()
        .map(|r| r.test_id.as_str())
        .collect();
    assert_eq!(ids, vec!["t1", "t3"]);
}

#[cfg(unix)]
mod process_isolation {
    use super::*;
    use pretty_assertions::assert_eq;
    use testpool::config::WorkerCommand;

    fn process_runner(script: &str, deadline: Option<Duration>) -> TestRunner {
        let mut command = WorkerCommand::new("/bin/sh");
        command.args = vec!["-c".to_owned(), script.to_owned()];
        let mut builder = RunnerConfig::builder()
            .worker_count(WorkerCount::Count(1))
            .isolation(IsolationLevel::Process { command });
        if let Some(deadline) = deadline {
            builder = builder.deadline(deadline);
        }
        TestRunner::new(builder.build().expect("valid config")).expect("runner built")
    }

    #[test]
    fn worker_process_streams_results_back() {
        // A stand-in worker that drains its assignment and reports two
        // passing results.
        let script = r#"cat >/dev/null
printf '%s\n' '{"kind":"result","result":{"test-id":"t0","status":"passed","duration-ms":5,"message":null,"completed-at":"2026-01-01T00:00:00Z"}}'
printf '%s\n' '{"kind":"result","result":{"test-id":"t1","status":"passed","duration-ms":7,"message":null,"completed-at":"2026-01-01T00:00:01Z"}}'
printf '%s\n' '{"kind":"done"}'"#;
        let runner = process_runner(script, None);

        let aggregate = runner.execute(
            vec![assignment(
                0,
                vec![
                    TestUnit::new("t0", "a", "pass"),
                    TestUnit::new("t1", "b", "pass"),
                ],
            )],
            Arc::new(ScriptedFactory::default()) as _,
        );

        assert_eq!(aggregate.total(), 2);
        assert_eq!(aggregate.stats().passed, 2);
        assert!(aggregate.worker_faults().is_empty());
    }

    #[test]
    fn crashed_worker_process_is_captured_not_raised() {
        let runner = process_runner("exit 3", None);
        let aggregate = runner.execute(
            vec![assignment(0, vec![TestUnit::new("t0", "a", "pass")])],
            Arc::new(ScriptedFactory::default()) as _,
        );

        // The run completes with a well-formed aggregate; the crash is
        // attached to the worker's batch.
        assert_eq!(aggregate.stats().passed, 0);
        assert!(aggregate.worker_faults().contains_key(&0));
    }

    #[test]
    fn timed_out_worker_process_is_killed_and_reported() {
        let runner = process_runner("cat >/dev/null; sleep 5", Some(Duration::from_millis(200)));
        let aggregate = runner.execute(
            vec![assignment(
                0,
                vec![
                    TestUnit::new("t0", "a", "pass"),
                    TestUnit::new("t1", "b", "pass"),
                ],
            )],
            Arc::new(ScriptedFactory::default()) as _,
        );

        assert_eq!(aggregate.total(), 2);
        assert_eq!(aggregate.stats().errored, 2);
        for result in aggregate.results() {
            assert_eq!(result.message.as_deref(), Some("timeout"));
        }
    }
}
