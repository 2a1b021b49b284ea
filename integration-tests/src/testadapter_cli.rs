// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use color_eyre::{Result, eyre::Context};
use serde::de::DeserializeOwned;
use std::{
    borrow::Cow,
    collections::HashMap,
    ffi::OsString,
    fmt,
    process::{Command, ExitStatus},
};

/// Builds and runs a testadapter command line.
#[derive(Clone, Debug)]
pub struct TestAdapterCli {
    bin: Utf8PathBuf,
    args: Vec<String>,
    envs: HashMap<OsString, OsString>,
    unchecked: bool,
}

impl TestAdapterCli {
    /// Creates a command line for the binary at `bin`, running in `workspace`.
    ///
    /// Color and the outer environment's log settings are turned off.
    pub fn new(bin: impl Into<Utf8PathBuf>, workspace: &Utf8Path) -> Self {
        let mut envs = HashMap::new();
        envs.insert("TESTADAPTER_COLOR".into(), "never".into());
        envs.insert("TESTADAPTER_WORKSPACE".into(), workspace.as_str().into());
        Self {
            bin: bin.into(),
            args: Vec::new(),
            envs,
            unchecked: false,
        }
    }

    pub fn args(&mut self, args: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(&mut self, k: impl Into<OsString>, v: impl Into<OsString>) -> &mut Self {
        self.envs.insert(k.into(), v.into());
        self
    }

    /// If true, a non-zero exit status doesn't panic.
    pub fn unchecked(&mut self, unchecked: bool) -> &mut Self {
        self.unchecked = unchecked;
        self
    }

    pub fn output(&self) -> TestAdapterOutput {
        let mut command = Command::new(&self.bin);
        command
            .args(&self.args)
            .env_remove("TESTADAPTER_LOG")
            .env_remove("TESTADAPTER_VERBOSE")
            .envs(&self.envs);
        let output = command.output().expect("failed to execute");

        let ret = TestAdapterOutput {
            command,
            exit_status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        };

        if !self.unchecked && !output.status.success() {
            panic!("command failed:\n\n{ret}");
        }

        ret
    }
}

pub struct TestAdapterOutput {
    pub command: Command,
    pub exit_status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl TestAdapterOutput {
    pub fn stdout_as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    /// Parses stdout as one JSON value per line.
    pub fn json_lines<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.stdout_as_str()
            .lines()
            .map(|line| {
                serde_json::from_str(line).wrap_err_with(|| format!("invalid JSON line: {line}"))
            })
            .collect()
    }
}

impl fmt::Display for TestAdapterOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "command: {:?}\nexit code: {:?}\n\
                   --- stdout ---\n{}\n\n--- stderr ---\n{}\n\n",
            self.command,
            self.exit_status.code(),
            String::from_utf8_lossy(&self.stdout),
            String::from_utf8_lossy(&self.stderr)
        )
    }
}

// Make Debug output the same as Display output, so `.unwrap()` and `.expect()` are nicer.
impl fmt::Debug for TestAdapterOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
