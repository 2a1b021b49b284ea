// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The protocol spoken between testadapter and a worker process that drives the underlying test
//! framework.
//!
//! A worker is started once per file and per operation. It reads a single [`WorkerRequest`] as
//! one line of JSON on standard input, then writes [`WorkerMessage`]s to standard output, one
//! JSON object per line. After every [`WorkerMessage::TestFailed`] the worker blocks until it
//! reads a [`WorkerVerdict`] line telling it whether to run the test again. Anything the worker
//! writes to standard error is treated as diagnostic output.

use crate::NamePath;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// A request sent to a worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum WorkerRequest {
    /// Declare every suite and test in `file` without running any of them.
    Enumerate {
        /// The absolute path of the test file.
        file: Utf8PathBuf,

        /// Options for the framework.
        options: WorkerOptions,
    },

    /// Run the tests in `file` selected by `filter`.
    Run {
        /// The absolute path of the test file.
        file: Utf8PathBuf,

        /// The tests to run.
        filter: WorkerTestFilter,

        /// Options for the framework.
        options: WorkerOptions,
    },
}

/// Framework options forwarded to a worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerOptions {
    /// The interface tests are declared with.
    pub ui: TestUi,

    /// The per-test timeout the framework enforces, in milliseconds.
    pub timeout_ms: u64,

    /// Modules to load before the test file.
    #[serde(default)]
    pub requires: Vec<String>,

    /// Whether the framework should force the process to exit once tests are done.
    #[serde(default)]
    pub exit: bool,

    /// Whether the worker should patch the module loader to locate declarations.
    #[serde(default)]
    pub monkey_patch: bool,
}

/// The interface a test file uses to declare suites and tests.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestUi {
    /// `describe` and `it`.
    #[default]
    Bdd,

    /// `suite` and `test`.
    Tdd,

    /// Flat `suite` markers followed by `test`s.
    Qunit,

    /// Nested object exports.
    Exports,
}

impl TestUi {
    /// Returns the name of this UI as written in configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bdd => "bdd",
            Self::Tdd => "tdd",
            Self::Qunit => "qunit",
            Self::Exports => "exports",
        }
    }
}

impl fmt::Display for TestUi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestUi {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bdd" => Ok(Self::Bdd),
            "tdd" => Ok(Self::Tdd),
            "qunit" => Ok(Self::Qunit),
            "exports" => Ok(Self::Exports),
            other => Err(format!(
                "unknown UI `{other}` (expected one of bdd, tdd, qunit, exports)"
            )),
        }
    }
}

/// Selects the tests a worker runs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "tests", rename_all = "kebab-case")]
pub enum WorkerTestFilter {
    /// Run every test in the file.
    All,

    /// Run only the tests with these name paths.
    Only(Vec<NamePath>),
}

impl WorkerTestFilter {
    /// Returns true if the test at `name_path` should run. Tests are matched by name: every
    /// declaration with a listed name runs.
    pub fn matches(&self, name_path: &NamePath) -> bool {
        match self {
            Self::All => true,
            Self::Only(tests) => tests.iter().any(|test| test.same_names(name_path)),
        }
    }
}

/// The kind of a discovered node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    /// A suite.
    Suite,

    /// A test.
    Test,
}

/// How a test failed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// An assertion did not hold.
    Assertion,

    /// The test threw something other than an assertion error.
    Exception,

    /// The framework's own per-test timeout elapsed.
    Timeout,
}

/// A message written by a worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum WorkerMessage {
    /// A suite or test was declared. Sent while enumerating, in declaration order.
    Discovered {
        /// Whether the node is a suite or a test.
        kind: NodeKind,

        /// The names leading to the node.
        name_path: NamePath,

        /// The zero-based line of the declaration, if known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line: Option<u32>,
    },

    /// The file could not be enumerated, for example because it has a syntax error.
    EnumerationFailed {
        /// A description of the failure.
        message: String,
    },

    /// The framework or a required module could not be loaded.
    LoadFailed {
        /// A description of the failure.
        message: String,
    },

    /// A suite started.
    SuiteStarted {
        /// The names leading to the suite.
        name_path: NamePath,
    },

    /// A suite finished.
    SuiteFinished {
        /// The names leading to the suite.
        name_path: NamePath,
    },

    /// A test attempt started.
    TestStarted {
        /// The names leading to the test.
        name_path: NamePath,
    },

    /// A test attempt passed.
    TestPassed {
        /// The names leading to the test.
        name_path: NamePath,
    },

    /// A test is pending and will not be run.
    TestPending {
        /// The names leading to the test.
        name_path: NamePath,
    },

    /// A test attempt failed. The worker waits for a [`WorkerVerdict`] before continuing.
    TestFailed {
        /// The names leading to the test.
        name_path: NamePath,

        /// How the test failed.
        kind: FailureKind,

        /// The failure message.
        message: String,

        /// The stack trace, if any.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },

    /// The worker has finished the request and is about to exit.
    Done,
}

/// The reply to a [`WorkerMessage::TestFailed`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "kebab-case")]
pub enum WorkerVerdict {
    /// Run the failed test again right away.
    Retry,

    /// Keep the failure and move on.
    Accept,
}
