// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING_TARGET, StderrStyles};
use camino::Utf8PathBuf;
use owo_colors::OwoColorize;
use std::error::Error;
use testadapter_metadata::TestAdapterExitCode;
use testadapter_runner::errors::{ConfigError, DebugStartError, RunError};
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are placeholders: errors are meant to be printed with
// display_to_stderr, which adds context and colors.

/// An error that testadapter knows how to report, with a documented exit code.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine the current directory")]
    CurrentDirFailed {
        #[source]
        err: std::io::Error,
    },
    #[error("current directory is not valid UTF-8")]
    CurrentDirInvalidUtf8 { path: std::path::PathBuf },
    #[error("workspace `{workspace}` is not a directory")]
    WorkspaceNotFound { workspace: Utf8PathBuf },
    #[error("failed to start the async runtime")]
    RuntimeBuildError {
        #[source]
        err: std::io::Error,
    },
    #[error("configuration error")]
    ConfigError {
        #[from]
        err: ConfigError,
    },
    #[error("loading tests failed")]
    LoadFailed { message: String },
    #[error("run could not start")]
    RunSetupFailed {
        #[source]
        err: RunError,
    },
    #[error("debugger could not be started")]
    DebugStartFailed {
        #[from]
        err: DebugStartError,
    },
    #[error("no tests to run")]
    NoTestsRun,
    #[error("test run failed")]
    TestRunFailed { cancelled: bool },
    #[error("error writing output")]
    WriteOutputError {
        #[source]
        err: std::io::Error,
    },
    #[error("error serializing event")]
    WriteEventError {
        #[source]
        err: serde_json::Error,
    },
}

impl From<RunError> for ExpectedError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::Config(err) => Self::ConfigError { err },
            RunError::DebugStart(err) => Self::DebugStartFailed { err },
            err => Self::RunSetupFailed { err },
        }
    }
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::CurrentDirInvalidUtf8 { .. }
            | Self::WorkspaceNotFound { .. }
            | Self::RuntimeBuildError { .. }
            | Self::ConfigError { .. }
            | Self::RunSetupFailed { .. } => TestAdapterExitCode::SETUP_ERROR,
            Self::LoadFailed { .. } => TestAdapterExitCode::LOAD_FAILED,
            Self::DebugStartFailed { .. } => TestAdapterExitCode::DEBUG_START_FAILED,
            Self::NoTestsRun => TestAdapterExitCode::NO_TESTS_RUN,
            Self::TestRunFailed { .. } => TestAdapterExitCode::TEST_RUN_FAILED,
            Self::WriteOutputError { .. } | Self::WriteEventError { .. } => {
                TestAdapterExitCode::WRITE_OUTPUT_ERROR
            }
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::CurrentDirFailed { err } => {
                error!("could not determine the current directory");
                Some(err as &dyn Error)
            }
            Self::CurrentDirInvalidUtf8 { path } => {
                error!(
                    "current directory `{}` is not valid UTF-8",
                    path.display().style(styles.bold)
                );
                None
            }
            Self::WorkspaceNotFound { workspace } => {
                error!("workspace `{}` is not a directory", workspace.style(styles.bold));
                None
            }
            Self::RuntimeBuildError { err } => {
                error!("failed to start the async runtime");
                Some(err as &dyn Error)
            }
            Self::ConfigError { err } => {
                error!("failed to read configuration");
                Some(err as &dyn Error)
            }
            Self::LoadFailed { message } => {
                // The message already carries the full chain.
                error!("loading tests failed: {message}");
                None
            }
            Self::RunSetupFailed { err } => {
                error!("{err}");
                err.source()
            }
            Self::DebugStartFailed { err } => {
                error!("{err}");
                None
            }
            Self::NoTestsRun => {
                error!("no tests to run");
                None
            }
            Self::TestRunFailed { cancelled } => {
                if *cancelled {
                    error!("test run {}", "cancelled".style(styles.warning_text));
                } else {
                    error!("test run failed");
                }
                None
            }
            Self::WriteOutputError { err } => {
                error!("error writing output");
                Some(err as &dyn Error)
            }
            Self::WriteEventError { err } => {
                error!("error serializing event");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
