// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::{OptsFileError, OptsFileErrorKind};
use camino::Utf8Path;
use std::{io, time::Duration};
use testadapter_metadata::worker::TestUi;
use tracing::debug;

/// The contents of a `mocha.opts`-style options file.
///
/// The file holds command-line arguments for the test framework, split like a shell would split
/// them. Lines starting with `#` are comments.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OptsFile {
    /// `--ui`/`-u`.
    pub ui: Option<TestUi>,

    /// `--timeout`/`-t`, in milliseconds or as a duration like `2s`.
    pub timeout: Option<Duration>,

    /// `--retries`.
    pub retries: Option<usize>,

    /// Every `--require`/`-r`, in order.
    pub requires: Vec<String>,

    /// `--exit` or `--no-exit`.
    pub exit: Option<bool>,

    /// Positional arguments and `--spec` values.
    pub globs: Vec<String>,
}

// Flags that take a value this adapter doesn't use. Their values must not be taken for globs.
const IGNORED_VALUE_FLAGS: &[&str] = &[
    "--reporter",
    "-R",
    "--reporter-options",
    "-O",
    "--grep",
    "-g",
    "--fgrep",
    "-f",
    "--slow",
    "-s",
    "--globals",
    "--compilers",
    "--extension",
    "--config",
    "--package",
    "--ignore",
];

impl OptsFile {
    /// Reads and parses the options file at `path`. A missing file is not an error and returns
    /// `None`.
    pub async fn read(path: &Utf8Path) -> Result<Option<Self>, OptsFileError> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Self::parse(path, &contents).map(Some),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!("options file `{path}` not found, using defaults");
                Ok(None)
            }
            Err(error) => Err(OptsFileError::new(path, OptsFileErrorKind::Read(error))),
        }
    }

    /// Parses the contents of an options file. `path` is only used for error reporting.
    pub fn parse(path: &Utf8Path, contents: &str) -> Result<Self, OptsFileError> {
        let uncommented: String = contents
            .lines()
            .filter(|line| !line.trim_start().starts_with('#'))
            .map(|line| format!("{line}\n"))
            .collect();
        let args = shell_words::split(&uncommented)
            .map_err(|error| OptsFileError::new(path, OptsFileErrorKind::Split(error)))?;

        let mut opts = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            let (flag, inline_value) = match arg.split_once('=') {
                Some((flag, value)) if flag.starts_with("--") => {
                    (flag.to_owned(), Some(value.to_owned()))
                }
                _ => (arg, None),
            };
            let mut value = || {
                inline_value.clone().or_else(|| args.next()).ok_or_else(|| {
                    OptsFileError::new(
                        path,
                        OptsFileErrorKind::MissingValue { flag: flag.clone() },
                    )
                })
            };

            match flag.as_str() {
                "--ui" | "-u" => {
                    let value = value()?;
                    let ui = value
                        .parse()
                        .map_err(|message| invalid_value(path, &flag, &value, message))?;
                    opts.ui = Some(ui);
                }
                "--timeout" | "-t" => {
                    let value = value()?;
                    let timeout = parse_timeout(&value)
                        .map_err(|message| invalid_value(path, &flag, &value, message))?;
                    opts.timeout = Some(timeout);
                }
                "--retries" => {
                    let value = value()?;
                    let retries = value
                        .parse()
                        .map_err(|error| invalid_value(path, &flag, &value, format!("{error}")))?;
                    opts.retries = Some(retries);
                }
                "--require" | "-r" => opts.requires.push(value()?),
                "--spec" => opts.globs.push(value()?),
                "--exit" => opts.exit = Some(true),
                "--no-exit" => opts.exit = Some(false),
                flag if IGNORED_VALUE_FLAGS.contains(&flag) => {
                    let ignored = value()?;
                    debug!("ignoring `{flag} {ignored}` in options file");
                }
                flag if flag.starts_with('-') => {
                    debug!("ignoring `{flag}` in options file");
                }
                glob => opts.globs.push(glob.to_owned()),
            }
        }

        Ok(opts)
    }
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    match value.parse::<u64>() {
        Ok(millis) => Ok(Duration::from_millis(millis)),
        Err(_) => humantime::parse_duration(value).map_err(|error| error.to_string()),
    }
}

fn invalid_value(path: &Utf8Path, flag: &str, value: &str, message: String) -> OptsFileError {
    OptsFileError::new(
        path,
        OptsFileErrorKind::InvalidValue {
            flag: flag.to_owned(),
            value: value.to_owned(),
            message,
        },
    )
}
