// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The boundary to the underlying test framework.
//!
//! Everything testadapter knows about a framework goes through the [`Framework`] trait. All the
//! state a framework would otherwise pick up from its environment (working directory,
//! environment variables, required modules, options) is passed explicitly in a
//! [`FrameworkContext`].

mod process;

pub use process::*;

use crate::{
    config::AdapterConfig,
    errors::{EnumerateFileError, ExecuteError, LoadError},
};
use camino::{Utf8Path, Utf8PathBuf};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use testadapter_metadata::{
    NamePath,
    worker::{FailureKind, NodeKind, WorkerOptions, WorkerTestFilter},
};
use tokio::sync::{mpsc, oneshot};

/// A file-based test framework.
pub trait Framework: Send + Sync {
    /// Checks that the framework and every required module can be loaded.
    fn prepare<'a>(&'a self, cx: &'a FrameworkContext) -> BoxFuture<'a, Result<(), LoadError>>;

    /// Declares the suites and tests in `file`, in declaration order, without running them.
    fn enumerate<'a>(
        &'a self,
        cx: &'a FrameworkContext,
        file: &'a Utf8Path,
    ) -> BoxFuture<'a, Result<Vec<DiscoveredNode>, EnumerateFileError>>;

    /// Runs the tests in a file, reporting progress on `events`.
    ///
    /// The returned future completes once the framework is done with the file. Dropping it must
    /// stop the framework. After every [`FrameworkEvent::TestFailed`], the framework waits for
    /// the verdict before going on; if the verdict sender is dropped, the failure is accepted.
    fn execute<'a>(
        &'a self,
        cx: &'a FrameworkContext,
        request: FileRunRequest,
        events: mpsc::Sender<FrameworkEvent>,
    ) -> BoxFuture<'a, Result<(), ExecuteError>>;
}

/// Everything a framework needs to know to enumerate or run a file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameworkContext {
    /// The working directory.
    pub cwd: Utf8PathBuf,

    /// Extra environment variables.
    pub env: IndexMap<String, String>,

    /// The worker driving the framework, absolute.
    pub framework_path: Utf8PathBuf,

    /// The runtime the worker is started with.
    pub runtime_path: Option<Utf8PathBuf>,

    /// Options for the framework.
    pub options: WorkerOptions,

    /// Set while running under a debugger.
    pub debug: Option<DebugAttachment>,
}

impl FrameworkContext {
    /// Creates a context from a configuration snapshot.
    pub fn from_config(config: &AdapterConfig) -> Self {
        Self {
            cwd: config.cwd.clone(),
            env: config.env.clone(),
            framework_path: config.resolve(&config.framework_path),
            runtime_path: config.runtime_path.clone(),
            options: config
                .framework_options
                .to_worker_options(config.monkey_patch),
            debug: None,
        }
    }

    /// Returns a copy of this context set up to run under a debugger.
    pub fn with_debug(&self, config: &AdapterConfig) -> Self {
        Self {
            debug: Some(DebugAttachment {
                port: config.debug.port,
                runtime_args: config.debug.resolved_runtime_args(),
            }),
            ..self.clone()
        }
    }

    /// Resolves a path-like module name against the working directory. Returns `None` for bare
    /// package names, which are resolved by the runtime.
    pub fn resolve_module(&self, module: &str) -> Option<Utf8PathBuf> {
        let path = Utf8Path::new(module);
        if path.is_absolute() {
            Some(path.to_owned())
        } else if module.starts_with("./") || module.starts_with("../") {
            Some(self.cwd.join(path))
        } else {
            None
        }
    }
}

/// How the framework is attached to a debugger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebugAttachment {
    /// The debugger port.
    pub port: u16,

    /// Extra runtime arguments, with the port substituted.
    pub runtime_args: Vec<String>,
}

/// A suite or test declared in a file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredNode {
    /// Whether this is a suite or a test.
    pub kind: NodeKind,

    /// The names leading to the node.
    pub name_path: NamePath,

    /// The zero-based line of the declaration.
    pub line: Option<u32>,
}

impl DiscoveredNode {
    /// Creates a discovered suite.
    pub fn suite(name_path: NamePath) -> Self {
        Self {
            kind: NodeKind::Suite,
            name_path,
            line: None,
        }
    }

    /// Creates a discovered test.
    pub fn test(name_path: NamePath) -> Self {
        Self {
            kind: NodeKind::Test,
            name_path,
            line: None,
        }
    }
}

/// A request to run some of the tests in a file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRunRequest {
    /// The file.
    pub file: Utf8PathBuf,

    /// The tests to run. Frameworks may run more than asked for.
    pub filter: WorkerTestFilter,
}

/// Progress reported by a framework while running a file.
#[derive(Debug)]
pub enum FrameworkEvent {
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

    /// An attempt of a test started.
    TestStarted {
        /// The names leading to the test.
        name_path: NamePath,
    },

    /// An attempt of a test passed.
    TestPassed {
        /// The names leading to the test.
        name_path: NamePath,
    },

    /// A test is pending and won't run.
    TestPending {
        /// The names leading to the test.
        name_path: NamePath,
    },

    /// An attempt of a test failed.
    TestFailed {
        /// The names leading to the test.
        name_path: NamePath,

        /// How it failed.
        failure: TestFailure,

        /// Where to send the verdict. `None` if the framework can't retry.
        verdict: Option<oneshot::Sender<RetryVerdict>>,
    },
}

/// Details of a failed attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestFailure {
    /// How the attempt failed.
    pub kind: FailureKind,

    /// The failure message.
    pub message: String,

    /// The stack trace, if any.
    pub stack: Option<String>,
}

impl TestFailure {
    /// Returns the text reported to the host: the stack trace if it already includes the
    /// message, otherwise both.
    pub fn display_message(&self) -> String {
        match &self.stack {
            Some(stack) if stack.contains(&self.message) => stack.clone(),
            Some(stack) => format!("{}\n{stack}", self.message),
            None => self.message.clone(),
        }
    }
}

/// The orchestrator's answer to a failed attempt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RetryVerdict {
    /// Run the test again right away.
    Retry,

    /// Keep the failure.
    Accept,
}
