// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A fake worker for testing the process framework.
//!
//! Speaks the worker protocol, but instead of loading a test framework it treats each test file
//! as a JSON script listing the suites and tests it declares and how each test behaves. Runs play
//! the script back the way mocha reports a run: suites open around the selected tests, every
//! attempt starts with `test-started`, and every failure waits for a verdict.

use camino::Utf8Path;
use serde::Deserialize;
use std::{
    io::{self, BufRead, Write},
    process::exit,
};
use testadapter_metadata::{
    NamePath,
    worker::{
        FailureKind, NodeKind, WorkerMessage, WorkerRequest, WorkerTestFilter, WorkerVerdict,
    },
};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Script {
    /// If set, enumerating the file fails with this message.
    #[serde(default)]
    enumeration_error: Option<String>,

    #[serde(default)]
    nodes: Vec<ScriptNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ScriptNode {
    kind: NodeKind,
    name_path: NamePath,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    result: ScriptResult,
}

#[derive(Copy, Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ScriptResult {
    #[default]
    Pass,
    Fail,
    /// Fails on the first attempt and passes on the second.
    Flaky,
    Pending,
    /// The worker exits right after the test starts.
    Crash,
}

fn main() {
    let stdin = io::stdin();
    let mut stdin = stdin.lock();
    let mut line = String::new();
    if let Err(error) = stdin.read_line(&mut line) {
        eprintln!("[fake-worker] failed to read request: {error}");
        exit(2);
    }
    let request: WorkerRequest = match serde_json::from_str(&line) {
        Ok(request) => request,
        Err(error) => {
            eprintln!("[fake-worker] invalid request {line:?}: {error}");
            exit(2);
        }
    };

    let mut worker = Worker {
        stdin,
        stdout: io::stdout().lock(),
    };
    match request {
        WorkerRequest::Enumerate { file, .. } => {
            let script = read_script(&file);
            worker.enumerate(script);
        }
        WorkerRequest::Run { file, filter, .. } => {
            let script = read_script(&file);
            worker.run(script, &filter);
        }
    }
    worker.send(&WorkerMessage::Done);
}

fn read_script(file: &Utf8Path) -> Script {
    let contents = match std::fs::read_to_string(file) {
        Ok(contents) => contents,
        Err(error) => {
            eprintln!("[fake-worker] failed to read `{file}`: {error}");
            exit(2);
        }
    };
    match serde_json::from_str(&contents) {
        Ok(script) => script,
        Err(error) => Script {
            enumeration_error: Some(format!("SyntaxError: {error}")),
            ..Script::default()
        },
    }
}

struct Worker<R, W> {
    stdin: R,
    stdout: W,
}

impl<R: BufRead, W: Write> Worker<R, W> {
    fn enumerate(&mut self, script: Script) {
        if let Some(message) = script.enumeration_error {
            self.send(&WorkerMessage::EnumerationFailed { message });
            return;
        }
        for node in script.nodes {
            self.send(&WorkerMessage::Discovered {
                kind: node.kind,
                name_path: node.name_path,
                line: node.line,
            });
        }
    }

    fn run(&mut self, script: Script, filter: &WorkerTestFilter) {
        if let Some(message) = script.enumeration_error {
            self.send(&WorkerMessage::LoadFailed { message });
            return;
        }

        // Suites opened so far, outermost first.
        let mut open: Vec<NamePath> = Vec::new();
        for node in &script.nodes {
            if node.kind != NodeKind::Test || !filter.matches(&node.name_path) {
                continue;
            }
            while let Some(suite) = open.last() {
                if node.name_path.starts_with(suite) {
                    break;
                }
                let name_path = suite.clone();
                open.pop();
                self.send(&WorkerMessage::SuiteFinished { name_path });
            }
            for ancestor in node.name_path.ancestors().skip(open.len()) {
                self.send(&WorkerMessage::SuiteStarted {
                    name_path: ancestor.clone(),
                });
                open.push(ancestor);
            }
            self.run_test(&node.name_path, node.result);
        }
        while let Some(name_path) = open.pop() {
            self.send(&WorkerMessage::SuiteFinished { name_path });
        }
    }

    fn run_test(&mut self, name_path: &NamePath, result: ScriptResult) {
        if let ScriptResult::Pending = result {
            self.send(&WorkerMessage::TestPending {
                name_path: name_path.clone(),
            });
            return;
        }

        let mut attempt = 1;
        loop {
            self.send(&WorkerMessage::TestStarted {
                name_path: name_path.clone(),
            });
            let passed = match result {
                ScriptResult::Pass => true,
                ScriptResult::Flaky => attempt > 1,
                ScriptResult::Fail | ScriptResult::Pending => false,
                ScriptResult::Crash => {
                    eprintln!("[fake-worker] crashing in `{name_path}`");
                    exit(3);
                }
            };
            if passed {
                self.send(&WorkerMessage::TestPassed {
                    name_path: name_path.clone(),
                });
                return;
            }

            self.send(&WorkerMessage::TestFailed {
                name_path: name_path.clone(),
                kind: FailureKind::Assertion,
                message: format!("AssertionError: attempt {attempt} failed"),
                stack: None,
            });
            match self.read_verdict() {
                WorkerVerdict::Retry => attempt += 1,
                WorkerVerdict::Accept => return,
            }
        }
    }

    fn read_verdict(&mut self) -> WorkerVerdict {
        let mut line = String::new();
        match self.stdin.read_line(&mut line) {
            Ok(0) => {
                eprintln!("[fake-worker] stdin closed while waiting for a verdict");
                exit(0);
            }
            Ok(_) => serde_json::from_str(&line).unwrap_or_else(|error| {
                eprintln!("[fake-worker] invalid verdict {line:?}: {error}");
                exit(2);
            }),
            Err(error) => {
                eprintln!("[fake-worker] failed to read verdict: {error}");
                exit(2);
            }
        }
    }

    fn send(&mut self, message: &WorkerMessage) {
        let result = serde_json::to_writer(&mut self.stdout, message)
            .map_err(io::Error::from)
            .and_then(|()| writeln!(self.stdout))
            .and_then(|()| self.stdout.flush());
        if let Err(error) = result {
            eprintln!("[fake-worker] failed to write message: {error}");
            exit(2);
        }
    }
}
