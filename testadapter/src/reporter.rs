// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prints load and run events.

use crate::errors::{ExpectedError, Result};
use clap::ValueEnum;
use owo_colors::{OwoColorize, Style, style};
use serde::Serialize;
use std::{collections::HashMap, io::Write};
use swrite::{SWrite, swrite};
use testadapter_metadata::{
    LoadEvent, RunEvent, RunStats, RunTarget, SuiteState, TestId, TestNode, TestState, TestSuiteInfo,
};

/// The format events are printed in.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum MessageFormat {
    /// Human-readable output.
    #[default]
    Human,

    /// One JSON object per line.
    Json,
}

#[derive(Debug, Default)]
struct Styles {
    pass: Style,
    fail: Style,
    skip: Style,
    error: Style,
    suite: Style,
    count: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.pass = style().green().bold();
        self.fail = style().red().bold();
        self.skip = style().yellow().bold();
        self.error = style().magenta().bold();
        self.suite = style().cyan();
        self.count = style().bold();
    }
}

/// Writes events to a writer, usually stdout.
pub(crate) struct Reporter<W> {
    writer: W,
    format: MessageFormat,
    verbose: bool,
    styles: Styles,
    // Display names of the nodes of the loaded tree, by id.
    names: HashMap<TestId, String>,
}

impl<W: Write> Reporter<W> {
    pub(crate) fn new(writer: W, format: MessageFormat, verbose: bool) -> Self {
        Self {
            writer,
            format,
            verbose,
            styles: Styles::default(),
            names: HashMap::new(),
        }
    }

    pub(crate) fn colorize(&mut self) {
        self.styles.colorize();
    }

    pub(crate) fn format(&self) -> MessageFormat {
        self.format
    }

    /// Remembers the names of the nodes in `root`, used to print human-readable event lines.
    pub(crate) fn set_tree(&mut self, root: &TestSuiteInfo) {
        self.names.clear();
        for child in &root.children {
            collect_names(child, None, &mut self.names);
        }
    }

    /// Prints a loaded tree.
    pub(crate) fn write_tree(&mut self, root: &TestSuiteInfo) -> Result<()> {
        match self.format {
            MessageFormat::Human => {
                for child in &root.children {
                    self.write_node(child, 0)?;
                }
                let (mut tests, mut errors) = (0, 0);
                for node in root.descendants() {
                    match node {
                        TestNode::Test(test) if test.errored => errors += 1,
                        TestNode::Test(_) => tests += 1,
                        TestNode::Suite(_) => {}
                    }
                }
                let files = root.children.len();
                let mut summary = format!(
                    "{} {} in {} {}",
                    tests.style(self.styles.count),
                    plural(tests, "test", "tests"),
                    files.style(self.styles.count),
                    plural(files, "file", "files"),
                );
                if errors > 0 {
                    swrite!(
                        summary,
                        " ({} failed to load)",
                        errors.style(self.styles.error)
                    );
                }
                self.write_line(&summary)
            }
            MessageFormat::Json => self.write_json(root),
        }
    }

    fn write_node(&mut self, node: &TestNode, depth: usize) -> Result<()> {
        let indent = "    ".repeat(depth);
        match node {
            TestNode::Suite(suite) => {
                self.write_line(&format!("{indent}{}", suite.label.style(self.styles.suite)))?;
                for child in &suite.children {
                    self.write_node(child, depth + 1)?;
                }
                Ok(())
            }
            TestNode::Test(test) if test.errored => {
                let mut line = format!("{indent}{}", test.label.style(self.styles.error));
                if let Some(message) = &test.message {
                    swrite!(line, ": {}", first_line(message));
                }
                self.write_line(&line)
            }
            TestNode::Test(test) => self.write_line(&format!("{indent}{}", test.label)),
        }
    }

    /// Prints one load event. Only used for JSON output: human output prints the tree instead.
    pub(crate) fn write_load_event(&mut self, event: &LoadEvent) -> Result<()> {
        self.write_json(event)
    }

    /// Prints one run event.
    pub(crate) fn write_run_event(&mut self, event: &RunEvent) -> Result<()> {
        match self.format {
            MessageFormat::Human => self.write_human_event(event),
            MessageFormat::Json => self.write_json(event),
        }
    }

    fn write_human_event(&mut self, event: &RunEvent) -> Result<()> {
        match event {
            RunEvent::RunStarted { tests } => {
                let what = match tests {
                    RunTarget::All => "all tests".to_owned(),
                    RunTarget::Ids(ids) => format!(
                        "{} selected {}",
                        ids.len(),
                        plural(ids.len(), "node", "nodes")
                    ),
                };
                self.write_status("Starting", self.styles.pass, &what)
            }
            RunEvent::Suite { suite, state } => {
                if !self.verbose {
                    return Ok(());
                }
                let status = match state {
                    SuiteState::Running => "SUITE",
                    SuiteState::Completed => "DONE",
                };
                let name = self.name(suite);
                self.write_status(status, self.styles.suite, &name)
            }
            RunEvent::Test {
                test,
                state,
                message,
            } => {
                let (status, style) = match state {
                    TestState::Running if self.verbose => ("START", self.styles.count),
                    TestState::Running => return Ok(()),
                    TestState::Passed => ("PASS", self.styles.pass),
                    TestState::Failed => ("FAIL", self.styles.fail),
                    TestState::Errored => ("ERROR", self.styles.error),
                    TestState::Skipped => ("SKIP", self.styles.skip),
                };
                let name = self.name(test);
                self.write_status(status, style, &name)?;
                let show_message = matches!(state, TestState::Failed | TestState::Errored)
                    || (self.verbose && *state == TestState::Skipped);
                if let Some(message) = message.as_deref().filter(|_| show_message) {
                    for line in message.lines() {
                        self.write_line(&format!("{:>13}{line}", ""))?;
                    }
                }
                Ok(())
            }
            RunEvent::RunFinished { stats, elapsed, .. } => {
                let summary = format!(
                    "[{:>8.3}s] {}",
                    elapsed.as_secs_f64(),
                    self.summary(stats)
                );
                let style = if stats.has_failures() || stats.cancelled {
                    self.styles.fail
                } else {
                    self.styles.pass
                };
                self.write_status("Summary", style, &summary)
            }
        }
    }

    fn summary(&self, stats: &RunStats) -> String {
        let mut out = format!(
            "{} {} run: {} passed",
            stats.finished_count.style(self.styles.count),
            plural(stats.finished_count, "test", "tests"),
            stats.passed.style(self.styles.pass),
        );
        if stats.failed > 0 {
            swrite!(out, ", {} failed", stats.failed.style(self.styles.fail));
            if stats.timed_out > 0 {
                swrite!(out, " ({} timed out)", stats.timed_out);
            }
        }
        if stats.errored > 0 {
            swrite!(out, ", {} errored", stats.errored.style(self.styles.error));
        }
        if stats.skipped > 0 {
            swrite!(out, ", {} skipped", stats.skipped.style(self.styles.skip));
        }
        if stats.cancelled {
            swrite!(out, " ({})", "cancelled".style(self.styles.skip));
        }
        out
    }

    fn name(&self, id: &TestId) -> String {
        self.names
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.as_str().to_owned())
    }

    fn write_status(&mut self, status: &str, style: Style, rest: &str) -> Result<()> {
        self.write_line(&format!("{:>12} {rest}", status.style(style)))
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.writer, "{line}").map_err(|err| ExpectedError::WriteOutputError { err })
    }

    fn write_json(&mut self, value: &impl Serialize) -> Result<()> {
        serde_json::to_writer(&mut self.writer, value)
            .map_err(|err| ExpectedError::WriteEventError { err })?;
        writeln!(self.writer).map_err(|err| ExpectedError::WriteOutputError { err })
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|err| ExpectedError::WriteOutputError { err })
    }
}

fn collect_names(node: &TestNode, parent: Option<&str>, names: &mut HashMap<TestId, String>) {
    let name = match parent {
        Some(parent) => format!("{parent} > {}", node.label()),
        None => node.label().to_owned(),
    };
    for child in node.children() {
        collect_names(child, Some(&name), names);
    }
    names.insert(node.id().clone(), name);
}

fn first_line(message: &str) -> &str {
    message.lines().next().unwrap_or_default()
}

fn plural(count: usize, singular: &'static str, plural: &'static str) -> &'static str {
    if count == 1 { singular } else { plural }
}
