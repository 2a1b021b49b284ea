// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by testadapter.

use camino::Utf8PathBuf;
use std::{error::Error as StdError, fmt, process::ExitStatus};
use thiserror::Error;

/// An error that occurred while parsing the adapter settings file.
#[derive(Debug, Error)]
#[error("failed to parse testadapter settings at `{settings_file}`")]
#[non_exhaustive]
pub struct SettingsParseError {
    settings_file: Utf8PathBuf,
    #[source]
    kind: SettingsParseErrorKind,
}

impl SettingsParseError {
    pub(crate) fn new(settings_file: impl Into<Utf8PathBuf>, kind: SettingsParseErrorKind) -> Self {
        Self {
            settings_file: settings_file.into(),
            kind,
        }
    }

    /// Returns the settings file that failed to parse.
    pub fn settings_file(&self) -> &Utf8PathBuf {
        &self.settings_file
    }
}

/// The kind of settings parse error that occurred.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SettingsParseErrorKind {
    /// An error occurred while combining the settings file with the defaults.
    #[error(transparent)]
    Build(Box<config::ConfigError>),

    /// An error occurred while deserializing the combined settings.
    #[error(transparent)]
    Deserialize(Box<serde_path_to_error::Error<config::ConfigError>>),
}

/// An error that occurred while reading an options file.
#[derive(Debug, Error)]
#[error("failed to read options file at `{path}`")]
#[non_exhaustive]
pub struct OptsFileError {
    path: Utf8PathBuf,
    #[source]
    kind: OptsFileErrorKind,
}

impl OptsFileError {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, kind: OptsFileErrorKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> &OptsFileErrorKind {
        &self.kind
    }
}

/// The kind of options file error that occurred.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OptsFileErrorKind {
    /// The file exists but could not be read.
    #[error("error reading file")]
    Read(#[source] std::io::Error),

    /// The contents could not be split into arguments.
    #[error("error splitting contents into arguments")]
    Split(#[source] shell_words::ParseError),

    /// A flag that takes a value was the last argument.
    #[error("flag `{flag}` requires a value")]
    MissingValue {
        /// The flag.
        flag: String,
    },

    /// A flag's value could not be parsed.
    #[error("invalid value `{value}` for `{flag}`: {message}")]
    InvalidValue {
        /// The flag.
        flag: String,

        /// The value that was provided.
        value: String,

        /// Why the value is invalid.
        message: String,
    },
}

/// An error that occurred while compiling a test file glob.
#[derive(Debug, Error)]
#[error("invalid test file glob `{glob}`")]
#[non_exhaustive]
pub struct GlobError {
    glob: String,
    #[source]
    err: globset::Error,
}

impl GlobError {
    pub(crate) fn new(glob: impl Into<String>, err: globset::Error) -> Self {
        Self {
            glob: glob.into(),
            err,
        }
    }
}

/// The configuration snapshot could not be produced or is invalid.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The settings file could not be parsed.
    #[error(transparent)]
    Settings(#[from] SettingsParseError),

    /// The options file could not be read.
    #[error(transparent)]
    OptsFile(#[from] OptsFileError),

    /// A glob was invalid.
    #[error(transparent)]
    Glob(#[from] GlobError),

    /// The working directory is not absolute.
    #[error("working directory `{cwd}` is not an absolute path")]
    RelativeCwd {
        /// The working directory.
        cwd: Utf8PathBuf,
    },

    /// No framework path was configured.
    #[error("no framework path configured")]
    MissingFrameworkPath,

    /// A test file is not absolute.
    #[error("test file `{file}` is not an absolute path")]
    RelativeFile {
        /// The test file.
        file: Utf8PathBuf,
    },

    /// Zero enumeration jobs were configured.
    #[error("enumeration-jobs must be at least 1")]
    ZeroEnumerationJobs,
}

/// The framework or a required module could not be loaded. Fails the whole load.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadError {
    /// The framework could not be found.
    #[error("test framework not found at `{path}`")]
    FrameworkNotFound {
        /// The path that was tried.
        path: Utf8PathBuf,
    },

    /// The runtime could not be found.
    #[error("runtime not found at `{path}`")]
    RuntimeNotFound {
        /// The path that was tried.
        path: Utf8PathBuf,
    },

    /// A required module could not be found.
    #[error("required module `{module}` not found at `{path}`")]
    RequireNotFound {
        /// The module as configured.
        module: String,

        /// The path it resolved to.
        path: Utf8PathBuf,
    },

    /// The framework reported that it or a required module failed to load.
    #[error("test framework failed to load while enumerating `{file}`: {message}")]
    Framework {
        /// The file being enumerated.
        file: Utf8PathBuf,

        /// The reported failure.
        message: String,
    },
}

/// A single file could not be enumerated. Isolated to that file.
#[derive(Debug, Error)]
#[error("failed to enumerate tests in `{file}`")]
#[non_exhaustive]
pub struct EnumerationError {
    file: Utf8PathBuf,
    #[source]
    kind: EnumerationErrorKind,
}

impl EnumerationError {
    /// Creates a new enumeration error.
    pub fn new(file: impl Into<Utf8PathBuf>, kind: EnumerationErrorKind) -> Self {
        Self {
            file: file.into(),
            kind,
        }
    }

    /// Returns the message to show on the synthetic error node.
    pub fn node_message(&self) -> String {
        match &self.kind {
            EnumerationErrorKind::Reported { message } => message.clone(),
            EnumerationErrorKind::Session(error) => DisplayErrorChain::new(error).to_string(),
            EnumerationErrorKind::TimedOut { .. } => self.kind.to_string(),
        }
    }
}

/// The kind of enumeration error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EnumerationErrorKind {
    /// The framework reported the failure, for example a syntax error in the file.
    #[error("{message}")]
    Reported {
        /// The reported failure.
        message: String,
    },

    /// The framework session failed.
    #[error("framework session failed")]
    Session(#[source] ExecuteError),

    /// The framework did not finish enumerating the file in time, for example because the file
    /// never returns from its top level.
    #[error("Timeout: no tests enumerated after {waited:?}")]
    TimedOut {
        /// How long enumeration was waited on.
        waited: std::time::Duration,
    },
}

/// The result of [`Framework::enumerate`](crate::framework::Framework::enumerate) failing.
#[derive(Debug, Error)]
pub enum EnumerateFileError {
    /// The whole load must fail.
    #[error(transparent)]
    Fatal(#[from] LoadError),

    /// Only this file failed.
    #[error(transparent)]
    File(#[from] EnumerationError),
}

/// A framework session for one file failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecuteError {
    /// The worker process could not be spawned.
    #[error("failed to spawn `{command}`")]
    Spawn {
        /// The command line.
        command: String,

        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// Communicating with the worker failed.
    #[error("failed to communicate with the test framework")]
    Io(#[source] std::io::Error),

    /// The worker wrote a line that isn't a valid message.
    #[error("invalid message from the test framework: `{line}`")]
    Protocol {
        /// The line.
        line: String,

        /// The parse error.
        #[source]
        error: serde_json::Error,
    },

    /// The worker exited before reporting that it was done.
    #[error("test framework exited unexpectedly ({status})")]
    ExitedEarly {
        /// The exit status of the worker.
        status: ExitStatus,
    },

    /// The worker reported that it could not load.
    #[error("test framework failed to load: {message}")]
    LoadFailed {
        /// The reported failure.
        message: String,
    },

    /// The worker stopped responding.
    #[error("test framework did not respond for {waited:?}")]
    Unresponsive {
        /// How long the orchestrator waited.
        waited: std::time::Duration,
    },

    /// Any other failure, used by in-process frameworks.
    #[error("{message}")]
    Other {
        /// A description of the failure.
        message: String,
    },
}

/// The debugging subsystem declined to start a session.
#[derive(Clone, Debug, Error)]
#[error(
    "debugger did not start on port {port}{}",
    .launch_config.as_ref().map(|name| format!(" (launch configuration `{name}`)")).unwrap_or_default()
)]
pub struct DebugStartError {
    port: u16,
    launch_config: Option<String>,
}

impl DebugStartError {
    pub(crate) fn new(port: u16, launch_config: Option<String>) -> Self {
        Self {
            port,
            launch_config,
        }
    }
}

/// Another load or run is in progress.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("another load or run is already in progress")]
pub struct BusyError;

/// An error returned by the run entry points of [`TestAdapter`](crate::adapter::TestAdapter).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunError {
    /// Another load or run is in progress.
    #[error(transparent)]
    Busy(#[from] BusyError),

    /// The configuration snapshot was invalid. No events were emitted.
    #[error("invalid configuration")]
    Config(#[from] ConfigError),

    /// No test tree has been loaded yet. No events were emitted.
    #[error("no test tree loaded: call load() first")]
    NotLoaded,

    /// The debugger could not be started. `RunStarted` and `RunFinished` were emitted.
    #[error(transparent)]
    DebugStart(#[from] DebugStartError),
}

/// Displays an error along with its chain of sources.
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: StdError> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E> fmt::Display for DisplayErrorChain<E>
where
    E: StdError,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        let mut source = self.error.source();
        if source.is_some() {
            write!(f, "\n  caused by:")?;
        }
        while let Some(err) = source {
            write!(f, "\n  - {err}")?;
            source = err.source();
        }

        Ok(())
    }
}

impl<E: StdError> fmt::Debug for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
