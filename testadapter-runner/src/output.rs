// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The output channel: a human-readable log of what a run did, such as every attempt of a
//! retried test.

use std::{
    io::Write,
    sync::{Mutex, PoisonError},
};

/// A fire-and-forget sink for human-readable output lines.
pub trait OutputChannel: Send + Sync {
    /// Appends a line. Must not block for long.
    fn append(&self, line: &str);
}

/// Discards all output.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullOutput;

impl OutputChannel for NullOutput {
    fn append(&self, _line: &str) {}
}

/// Writes output lines to standard error.
#[derive(Clone, Copy, Debug, Default)]
pub struct StderrOutput;

impl OutputChannel for StderrOutput {
    fn append(&self, line: &str) {
        // Output is best-effort: a closed stderr must not fail the run.
        let _ = writeln!(std::io::stderr().lock(), "{line}");
    }
}

/// Keeps output lines in memory.
#[derive(Debug, Default)]
pub struct BufferedOutput {
    lines: Mutex<Vec<String>>,
}

impl BufferedOutput {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lines appended so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl OutputChannel for BufferedOutput {
    fn append(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_owned());
    }
}
