// Copyright (c) The testpool Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Impact analysis: mapping changed source artifacts to affected tests.
//!
//! The analyzer maintains a precomputed reverse index from artifact
//! identifiers to the ids of the tests depending on them. It never decides
//! what an empty impact set means: "run nothing" vs. "fall back to running
//! everything" is an explicit caller-level decision.

use crate::test_list::{TestId, TestList, TestUnit};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The set of test ids transitively affected by a set of changed artifacts.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ImpactSet(BTreeSet<TestId>);

impl ImpactSet {
    /// Returns true if no tracked test is affected.
    ///
    /// This is a distinct signal from "no tests exist": the caller decides
    /// whether to run nothing or fall back to the full registry.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of affected tests.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the given id is affected.
    pub fn contains(&self, id: &TestId) -> bool {
        self.0.contains(id)
    }

    /// Iterates over affected ids in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &TestId> + '_ {
        self.0.iter()
    }
}

impl FromIterator<TestId> for ImpactSet {
    fn from_iter<I: IntoIterator<Item = TestId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Reverse index from artifact identifiers to dependent tests.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ImpactAnalyzer {
    index: BTreeMap<String, BTreeSet<TestId>>,
}

impl ImpactAnalyzer {
    /// Creates an empty analyzer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that the given test depends on each listed artifact.
    ///
    /// O(1) amortized per artifact.
    pub fn register(
        &mut self,
        test_id: &TestId,
        artifacts: impl IntoIterator<Item = impl Into<String>>,
    ) {
        for artifact in artifacts {
            self.index
                .entry(artifact.into())
                .or_default()
                .insert(test_id.clone());
        }
    }

    /// Records a test unit's declared artifact dependencies.
    pub fn register_unit(&mut self, unit: &TestUnit) {
        self.register(&unit.id, unit.artifacts.iter().cloned());
    }

    /// Returns the union of tests affected by the changed artifacts.
    ///
    /// Untracked artifacts contribute nothing; if no changed artifact is
    /// tracked the result is empty.
    pub fn analyze_impact(
        &self,
        changed_artifacts: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> ImpactSet {
        let mut affected = BTreeSet::new();
        for artifact in changed_artifacts {
            if let Some(tests) = self.index.get(artifact.as_ref()) {
                affected.extend(tests.iter().cloned());
            }
        }
        ImpactSet(affected)
    }

    /// Resolves an impact set against the registry.
    ///
    /// Ids no longer present in the registry are silently dropped. The
    /// output preserves registration order.
    pub fn resolve<'list>(
        &self,
        impact: &ImpactSet,
        test_list: &'list TestList,
    ) -> Vec<&'list TestUnit> {
        test_list
            .iter()
            .filter(|unit| impact.contains(&unit.id))
            .collect()
    }

    /// Returns the number of tracked artifacts.
    pub fn tracked_artifact_count(&self) -> usize {
        self.index.len()
    }
}
