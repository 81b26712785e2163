// Copyright (c) The testpool Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Impact-aware scheduler that partitions test suites across isolated
//! workers.
//!
//! Given a registry of independently runnable test units, testpool selects
//! the ones affected by a set of changed source artifacts
//! ([`impact::ImpactAnalyzer`]), orders them by risk, duration, or declared
//! priority ([`prioritize`]), partitions them across workers with a
//! selectable strategy ([`distribute`]), runs them concurrently with
//! bulkhead fault isolation ([`runner::TestRunner`]), and merges per-worker
//! outcomes into one deterministic [`aggregate::AggregateSuiteResult`].
//!
//! Test discovery, CLI parsing, and report rendering are external
//! collaborators: descriptors come in through [`test_list::TestList`], test
//! bodies run through an [`execute::ExecutorFactory`], and the aggregate is
//! the sole hand-off to downstream reporting.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use testpool::{
//!     config::{ParallelMode, RunnerConfig, WorkerCount},
//!     distribute::{distribute, DistributionStrategy},
//!     errors::FactoryError,
//!     execute::{ExecutorFactory, TestExecutor, TestFault},
//!     runner::TestRunner,
//!     test_list::{TestList, TestUnit},
//! };
//!
//! struct NoopExecutor;
//! impl TestExecutor for NoopExecutor {
//!     fn run_test(&mut self, _test: &TestUnit) -> Result<(), TestFault> {
//!         Ok(())
//!     }
//! }
//!
//! struct NoopFactory;
//! impl ExecutorFactory for NoopFactory {
//!     fn create(&self, _worker_index: usize) -> Result<Box<dyn TestExecutor>, FactoryError> {
//!         Ok(Box::new(NoopExecutor))
//!     }
//! }
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let test_list = TestList::new(vec![
//!     TestUnit::new("auth::login", "login works", "auth-service"),
//!     TestUnit::new("auth::logout", "logout works", "auth-service"),
//! ])?;
//!
//! let config = RunnerConfig::builder()
//!     .worker_count(WorkerCount::Count(2))
//!     .build()?;
//! let assignments = distribute(
//!     test_list.iter().cloned().collect(),
//!     config.effective_worker_count(),
//!     DistributionStrategy::RoundRobin,
//!     ParallelMode::ByTest,
//!     &mut rand::rng(),
//! )?;
//!
//! let runner = TestRunner::new(config)?;
//! let aggregate = runner.execute(assignments, Arc::new(NoopFactory));
//! assert_eq!(aggregate.total(), 2);
//! assert!(aggregate.stats().is_success());
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod config;
pub mod distribute;
pub mod errors;
pub mod execute;
pub mod history;
pub mod impact;
pub mod prioritize;
pub mod runner;
pub mod test_list;
