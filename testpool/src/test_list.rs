// Copyright (c) The testpool Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The test unit model and the immutable per-run registry.
//!
//! A [`TestList`] is built once, before a run starts, from descriptors
//! supplied by an external discovery collaborator. It is read-only afterward
//! and safe for unsynchronized concurrent reads.

use crate::errors::RegistryError;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashMap},
    fmt,
};

/// Default duration estimate for tests with no recorded history, in
/// milliseconds.
pub const DEFAULT_ESTIMATED_DURATION_MS: u64 = 1000;

/// Unique identifier for a test unit within one run.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TestId(String);

impl TestId {
    /// Creates a new test id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for TestId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for TestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Declared priority of a test unit.
///
/// The derived ordering puts `Critical` first, so an ascending stable sort
/// produces the declared-priority ordering.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl TestPriority {
    /// Returns the weight used by risk scoring.
    pub fn weight(self) -> f64 {
        match self {
            TestPriority::Critical => 1.0,
            TestPriority::High => 0.75,
            TestPriority::Medium => 0.5,
            TestPriority::Low => 0.25,
        }
    }
}

/// A single independently runnable test unit.
///
/// Immutable once registered in a [`TestList`].
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestUnit {
    /// Unique id within a run.
    pub id: TestId,

    /// Human-readable display name.
    pub name: String,

    /// Opaque target reference, resolved later by the external test
    /// executor. Units sharing a target form a "service" for by-service
    /// distribution.
    pub target: String,

    /// Declared priority.
    pub priority: TestPriority,

    /// Estimated duration in milliseconds, from history or a static default.
    pub estimated_duration_ms: u64,

    /// Tags used for pre-run filtering.
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Identifiers of the source artifacts this test depends on.
    #[serde(default)]
    pub artifacts: Vec<String>,
}

impl TestUnit {
    /// Creates a new test unit with medium priority, the default duration
    /// estimate, and no tags or artifacts.
    pub fn new(id: impl Into<TestId>, name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            target: target.into(),
            priority: TestPriority::Medium,
            estimated_duration_ms: DEFAULT_ESTIMATED_DURATION_MS,
            tags: BTreeSet::new(),
            artifacts: Vec::new(),
        }
    }

    /// Sets the declared priority.
    pub fn with_priority(mut self, priority: TestPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the estimated duration in milliseconds.
    pub fn with_estimated_duration_ms(mut self, ms: u64) -> Self {
        self.estimated_duration_ms = ms;
        self
    }

    /// Adds a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Sets the depended-on artifact identifiers.
    pub fn with_artifacts(mut self, artifacts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.artifacts = artifacts.into_iter().map(Into::into).collect();
        self
    }
}

/// Immutable catalog of the test units known to one run.
///
/// Preserves registration order, which downstream orderings use as the
/// deterministic tie-breaker.
#[derive(Clone, Debug, Default)]
pub struct TestList {
    units: Vec<TestUnit>,
    by_id: HashMap<TestId, usize>,
}

impl TestList {
    /// Creates a new test list from an ordered collection of descriptors.
    ///
    /// Fails if two descriptors share an id.
    pub fn new(units: impl IntoIterator<Item = TestUnit>) -> Result<Self, RegistryError> {
        let units: Vec<_> = units.into_iter().collect();
        let mut by_id = HashMap::with_capacity(units.len());
        for (idx, unit) in units.iter().enumerate() {
            if by_id.insert(unit.id.clone(), idx).is_some() {
                return Err(RegistryError::DuplicateTestId {
                    id: unit.id.clone(),
                });
            }
        }
        Ok(Self { units, by_id })
    }

    /// Returns the number of registered test units.
    pub fn test_count(&self) -> usize {
        self.units.len()
    }

    /// Returns true if no tests are registered.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Looks up a unit by id.
    pub fn get(&self, id: &TestId) -> Option<&TestUnit> {
        self.by_id.get(id).map(|&idx| &self.units[idx])
    }

    /// Returns true if the given id is registered.
    pub fn contains(&self, id: &TestId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Iterates over units in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &TestUnit> + '_ {
        self.units.iter()
    }
}
