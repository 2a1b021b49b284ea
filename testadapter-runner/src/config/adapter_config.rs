// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::ConfigError;
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::time::Duration;
use testadapter_metadata::worker::{TestUi, WorkerOptions};

/// A resolved configuration snapshot, taken once per load or run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdapterConfig {
    /// The label of the root suite.
    pub label: String,

    /// The test files, absolute, in order. May contain duplicates.
    pub files: Vec<Utf8PathBuf>,

    /// The globs the files were expanded from, relative to `cwd` unless absolute.
    pub globs: Vec<String>,

    /// The options file, if one is configured.
    pub opts_file: Option<Utf8PathBuf>,

    /// The settings file the snapshot was read from, if any.
    pub settings_file: Option<Utf8PathBuf>,

    /// Options for the test framework.
    pub framework_options: FrameworkOptions,

    /// Extra environment variables for the framework.
    pub env: IndexMap<String, String>,

    /// The directory tests are enumerated and run in. Must be absolute.
    pub cwd: Utf8PathBuf,

    /// The worker that drives the test framework, relative to `cwd` unless absolute.
    pub framework_path: Utf8PathBuf,

    /// The runtime the worker is started with.
    pub runtime_path: Option<Utf8PathBuf>,

    /// Debugger settings.
    pub debug: DebugConfig,

    /// Whether the worker patches the module loader to locate declarations.
    pub monkey_patch: bool,

    /// Whether files without declarations for the configured UI are skipped.
    pub prune_files: bool,

    /// Slack added to the watchdog bound.
    pub watchdog_overhead: Duration,

    /// The number of files enumerated at once.
    pub enumeration_jobs: usize,
}

impl AdapterConfig {
    /// The default glob used when neither the settings nor the options file provide one.
    pub const DEFAULT_GLOB: &'static str = "test/*.{js,cjs,mjs}";

    /// Creates a snapshot for the given working directory and files, with every other value at
    /// its default.
    pub fn new(cwd: impl Into<Utf8PathBuf>, files: Vec<Utf8PathBuf>) -> Self {
        Self {
            label: "Tests".to_owned(),
            files,
            globs: Vec::new(),
            opts_file: None,
            settings_file: None,
            framework_options: FrameworkOptions::default(),
            env: IndexMap::new(),
            cwd: cwd.into(),
            framework_path: Utf8PathBuf::from("node_modules/.bin/testadapter-worker"),
            runtime_path: None,
            debug: DebugConfig::default(),
            monkey_patch: true,
            prune_files: false,
            watchdog_overhead: Duration::from_secs(5),
            enumeration_jobs: 4,
        }
    }

    /// Checks the invariants every consumer of a snapshot relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.cwd.is_absolute() {
            return Err(ConfigError::RelativeCwd {
                cwd: self.cwd.clone(),
            });
        }
        if self.framework_path.as_str().is_empty() {
            return Err(ConfigError::MissingFrameworkPath);
        }
        if let Some(file) = self.files.iter().find(|file| !file.is_absolute()) {
            return Err(ConfigError::RelativeFile { file: file.clone() });
        }
        if self.enumeration_jobs == 0 {
            return Err(ConfigError::ZeroEnumerationJobs);
        }
        Ok(())
    }

    /// The longest time to wait on the framework to enumerate one file.
    ///
    /// Unlike [`Self::watchdog_bound`] this is always set: no test runs during enumeration, so a
    /// disabled test timeout says nothing about how long loading a file may take.
    pub fn enumeration_bound(&self) -> Duration {
        self.framework_options
            .timeout
            .saturating_add(self.watchdog_overhead)
    }

    /// Resolves `path` against the working directory.
    pub fn resolve(&self, path: &Utf8Path) -> Utf8PathBuf {
        self.cwd.join(path)
    }

    /// The longest time to wait on the framework before synthesizing a result.
    ///
    /// Returns `None` if the framework's own timeout is disabled, in which case there is nothing
    /// to derive a bound from.
    pub fn watchdog_bound(&self) -> Option<Duration> {
        let options = &self.framework_options;
        if options.timeout.is_zero() {
            return None;
        }
        let attempts = u32::try_from(options.retries.saturating_add(1)).unwrap_or(u32::MAX);
        Some(
            options
                .timeout
                .saturating_mul(attempts)
                .saturating_add(self.watchdog_overhead),
        )
    }
}

/// Options for the test framework.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameworkOptions {
    /// The interface tests are declared with.
    pub ui: TestUi,

    /// The per-test timeout the framework enforces. Zero disables it.
    pub timeout: Duration,

    /// How many times a failing test is retried.
    pub retries: usize,

    /// Modules loaded before each test file.
    pub requires: Vec<String>,

    /// Whether the framework forces the process to exit when done.
    pub exit: bool,
}

impl FrameworkOptions {
    /// Converts these options to the form sent to a worker.
    pub fn to_worker_options(&self, monkey_patch: bool) -> WorkerOptions {
        WorkerOptions {
            ui: self.ui,
            timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            requires: self.requires.clone(),
            exit: self.exit,
            monkey_patch,
        }
    }
}

impl Default for FrameworkOptions {
    fn default() -> Self {
        Self {
            ui: TestUi::Bdd,
            timeout: Duration::from_secs(2),
            retries: 0,
            requires: Vec::new(),
            exit: false,
        }
    }
}

/// Debugger settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebugConfig {
    /// The debugger port.
    pub port: u16,

    /// The launch configuration to ask the debugger for.
    pub launch_config: Option<String>,

    /// How long to wait after the debugger started before running tests.
    pub attach_delay: Duration,

    /// Extra arguments for the runtime while debugging. `{port}` is replaced by the port.
    pub runtime_args: Vec<String>,

    /// A command that starts a debugger. `{port}` is replaced by the port.
    pub command: Option<Vec<String>>,
}

impl DebugConfig {
    /// Returns the runtime arguments with the port substituted.
    pub fn resolved_runtime_args(&self) -> Vec<String> {
        substitute_port(&self.runtime_args, self.port)
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            port: 9229,
            launch_config: None,
            attach_delay: Duration::from_secs(1),
            runtime_args: vec!["--inspect-brk={port}".to_owned()],
            command: None,
        }
    }
}

pub(crate) fn substitute_port(args: &[String], port: u16) -> Vec<String> {
    let port = port.to_string();
    args.iter().map(|arg| arg.replace("{port}", &port)).collect()
}
