// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{TestId, TestSuiteInfo};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error};
use std::time::Duration;

/// An event emitted while loading the test tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum LoadEvent {
    /// Loading started.
    Started,

    /// Loading finished, either with a tree or with an error.
    Finished {
        /// The root suite of the loaded tree, if loading succeeded.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suite: Option<TestSuiteInfo>,

        /// The reason loading failed, if it did.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
}

impl LoadEvent {
    /// Creates a `Finished` event carrying a loaded tree.
    pub fn loaded(suite: TestSuiteInfo) -> Self {
        Self::Finished {
            suite: Some(suite),
            error_message: None,
        }
    }

    /// Creates a `Finished` event carrying an error.
    pub fn failed(error_message: impl Into<String>) -> Self {
        Self::Finished {
            suite: None,
            error_message: Some(error_message.into()),
        }
    }
}

/// An event emitted during a run.
///
/// Every run produces exactly one [`RunEvent::RunStarted`] first and exactly one
/// [`RunEvent::RunFinished`] last. In between, a suite is always reported `running` before any
/// of its descendants, and `completed` after them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum RunEvent {
    /// The run started.
    RunStarted {
        /// The tests requested for this run.
        tests: RunTarget,
    },

    /// A suite changed state.
    Suite {
        /// The identifier of the suite.
        suite: TestId,

        /// The new state.
        state: SuiteState,
    },

    /// A test changed state.
    Test {
        /// The identifier of the test.
        test: TestId,

        /// The new state.
        state: TestState,

        /// Failure output, or the reason for a synthesized state.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// The run finished.
    RunFinished {
        /// Statistics for the run.
        stats: RunStats,

        /// The time at which the run started.
        start_time: DateTime<FixedOffset>,

        /// The amount of time the run took.
        #[serde(with = "humantime_serde")]
        elapsed: Duration,
    },
}

impl RunEvent {
    /// Creates a test event without a message.
    pub fn test(test: TestId, state: TestState) -> Self {
        Self::Test {
            test,
            state,
            message: None,
        }
    }

    /// Returns the node this event is about, if any.
    pub fn node_id(&self) -> Option<&TestId> {
        match self {
            Self::Suite { suite, .. } => Some(suite),
            Self::Test { test, .. } => Some(test),
            Self::RunStarted { .. } | Self::RunFinished { .. } => None,
        }
    }
}

/// The set of tests requested for a run.
///
/// Serialized as the string `"all"` or as a list of ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunTarget {
    /// Every test in the tree.
    All,

    /// The given nodes and everything nested inside them.
    Ids(Vec<TestId>),
}

impl RunTarget {
    /// Creates a target from host-provided ids. An id of `root` means every test.
    pub fn from_ids<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = TestId>,
    {
        let ids: Vec<_> = ids.into_iter().collect();
        if ids.is_empty() || ids.iter().any(TestId::is_root) {
            Self::All
        } else {
            Self::Ids(ids)
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RunTargetRepr {
    Keyword(String),
    Ids(Vec<TestId>),
}

impl Serialize for RunTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::All => serializer.serialize_str("all"),
            Self::Ids(ids) => ids.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for RunTarget {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RunTargetRepr::deserialize(deserializer)? {
            RunTargetRepr::Keyword(keyword) if keyword == "all" => Ok(Self::All),
            RunTargetRepr::Keyword(other) => Err(D::Error::custom(format!(
                "expected \"all\" or a list of test ids, found {other:?}"
            ))),
            RunTargetRepr::Ids(ids) => Ok(Self::Ids(ids)),
        }
    }
}

/// The state of a suite within a run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuiteState {
    /// The first test nested in the suite is about to run.
    Running,

    /// Every requested test nested in the suite has reached a terminal state.
    Completed,
}

/// The state of a test within a run.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestState {
    /// The test started.
    Running,

    /// The test passed.
    Passed,

    /// The test failed an assertion or timed out.
    Failed,

    /// The test was not run, either because it is pending or because the run was cancelled.
    Skipped,

    /// The test threw outside an assertion, or its file could not be run.
    Errored,
}

impl TestState {
    /// Returns true if no further events follow this state for the same invocation.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Statistics for a run.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStats {
    /// The number of tests the run was expected to report.
    pub initial_run_count: usize,

    /// The number of tests that reached a terminal state.
    pub finished_count: usize,

    /// The number of tests that passed.
    pub passed: usize,

    /// The number of tests that failed, including timeouts.
    pub failed: usize,

    /// The number of tests that timed out. Also counted in `failed`.
    pub timed_out: usize,

    /// The number of tests that errored.
    pub errored: usize,

    /// The number of tests that were skipped.
    pub skipped: usize,

    /// The total number of attempts made, counting every retry.
    pub attempts: usize,

    /// True if the run was cancelled or aborted before it completed.
    pub cancelled: bool,
}

impl RunStats {
    /// Records a terminal state for one test.
    pub fn record(&mut self, state: TestState) {
        match state {
            TestState::Running => return,
            TestState::Passed => self.passed += 1,
            TestState::Failed => self.failed += 1,
            TestState::Skipped => self.skipped += 1,
            TestState::Errored => self.errored += 1,
        }
        self.finished_count += 1;
    }

    /// Returns true if any test failed or errored.
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.errored > 0
    }
}
