// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    DiscoveredNode, FileRunRequest, Framework, FrameworkContext, FrameworkEvent, RetryVerdict,
    TestFailure,
};
use crate::errors::{
    EnumerateFileError, EnumerationError, EnumerationErrorKind, ExecuteError, LoadError,
};
use camino::{Utf8Path, Utf8PathBuf};
use futures::future::BoxFuture;
use std::process::{ExitStatus, Stdio};
use testadapter_metadata::worker::{WorkerMessage, WorkerRequest, WorkerVerdict};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::{mpsc, oneshot},
};
use tracing::{debug, info};

/// A [`Framework`] that drives a worker process per file.
///
/// The worker is started as `[runtime [debug args]] framework_path` in the configured working
/// directory and speaks the protocol in [`testadapter_metadata::worker`]. The worker is killed if
/// its session is dropped, for example when a run is cancelled.
#[derive(Clone, Debug, Default)]
pub struct ProcessFramework {
    _private: (),
}

impl ProcessFramework {
    /// Creates a new process framework.
    pub fn new() -> Self {
        Self::default()
    }

    fn command(&self, cx: &FrameworkContext) -> (Command, String) {
        let mut argv: Vec<String> = Vec::new();
        match &cx.runtime_path {
            Some(runtime) => {
                argv.push(runtime.to_string());
                if let Some(debug) = &cx.debug {
                    argv.extend(debug.runtime_args.iter().cloned());
                }
                argv.push(cx.framework_path.to_string());
            }
            None => {
                if cx.debug.is_some() {
                    debug!("no runtime configured: debug runtime arguments are not passed");
                }
                argv.push(cx.framework_path.to_string());
            }
        }

        let command_line = shell_words::join(&argv);
        let mut command = Command::new(&argv[0]);
        command
            .args(&argv[1..])
            .current_dir(&cx.cwd)
            .envs(&cx.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        (command, command_line)
    }

    async fn spawn(
        &self,
        cx: &FrameworkContext,
        file: &Utf8Path,
        request: &WorkerRequest,
    ) -> Result<WorkerSession, ExecuteError> {
        let (mut command, command_line) = self.command(cx);
        debug!("spawning `{command_line}` for `{file}`");
        let mut child = command.spawn().map_err(|error| ExecuteError::Spawn {
            command: command_line.clone(),
            error,
        })?;

        let (Some(mut stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(ExecuteError::Io(std::io::Error::other(
                "worker stdio was not captured",
            )));
        };

        let file = file.to_owned();
        tokio::spawn({
            let file = file.clone();
            async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(target: "testadapter::worker", "[{file}] {line}");
                }
            }
        });

        let mut line = serde_json::to_string(request).map_err(|error| {
            ExecuteError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, error))
        })?;
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(ExecuteError::Io)?;
        stdin.flush().await.map_err(ExecuteError::Io)?;

        Ok(WorkerSession {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
            file,
        })
    }

    async fn enumerate_impl(
        &self,
        cx: &FrameworkContext,
        file: &Utf8Path,
    ) -> Result<Vec<DiscoveredNode>, EnumerateFileError> {
        let session_error =
            |error| EnumerationError::new(file, EnumerationErrorKind::Session(error));
        let request = WorkerRequest::Enumerate {
            file: file.to_owned(),
            options: cx.options.clone(),
        };
        let mut session = self
            .spawn(cx, file, &request)
            .await
            .map_err(session_error)?;

        let mut nodes = Vec::new();
        while let Some(message) = session.next_message().await.map_err(session_error)? {
            match message {
                WorkerMessage::Discovered {
                    kind,
                    name_path,
                    line,
                } => nodes.push(DiscoveredNode {
                    kind,
                    name_path,
                    line,
                }),
                WorkerMessage::EnumerationFailed { message } => {
                    return Err(EnumerationError::new(
                        file,
                        EnumerationErrorKind::Reported { message },
                    )
                    .into());
                }
                WorkerMessage::LoadFailed { message } => {
                    return Err(LoadError::Framework {
                        file: file.to_owned(),
                        message,
                    }
                    .into());
                }
                WorkerMessage::Done => return Ok(nodes),
                other => debug!("ignoring {other:?} while enumerating `{file}`"),
            }
        }

        let status = session.wait().await.map_err(session_error)?;
        Err(session_error(ExecuteError::ExitedEarly { status }).into())
    }

    async fn execute_impl(
        &self,
        cx: &FrameworkContext,
        request: FileRunRequest,
        events: mpsc::Sender<FrameworkEvent>,
    ) -> Result<(), ExecuteError> {
        let FileRunRequest { file, filter } = request;
        let worker_request = WorkerRequest::Run {
            file: file.clone(),
            filter,
            options: cx.options.clone(),
        };
        let mut session = self.spawn(cx, &file, &worker_request).await?;

        while let Some(message) = session.next_message().await? {
            let event = match message {
                WorkerMessage::SuiteStarted { name_path } => {
                    FrameworkEvent::SuiteStarted { name_path }
                }
                WorkerMessage::SuiteFinished { name_path } => {
                    FrameworkEvent::SuiteFinished { name_path }
                }
                WorkerMessage::TestStarted { name_path } => FrameworkEvent::TestStarted { name_path },
                WorkerMessage::TestPassed { name_path } => FrameworkEvent::TestPassed { name_path },
                WorkerMessage::TestPending { name_path } => FrameworkEvent::TestPending { name_path },
                WorkerMessage::TestFailed {
                    name_path,
                    kind,
                    message,
                    stack,
                } => {
                    let (tx, rx) = oneshot::channel();
                    let event = FrameworkEvent::TestFailed {
                        name_path,
                        failure: TestFailure {
                            kind,
                            message,
                            stack,
                        },
                        verdict: Some(tx),
                    };
                    if events.send(event).await.is_err() {
                        // Nobody is listening anymore.
                        return Ok(());
                    }
                    let verdict = match rx.await.unwrap_or(RetryVerdict::Accept) {
                        RetryVerdict::Retry => WorkerVerdict::Retry,
                        RetryVerdict::Accept => WorkerVerdict::Accept,
                    };
                    session.send_verdict(verdict).await?;
                    continue;
                }
                WorkerMessage::LoadFailed { message }
                | WorkerMessage::EnumerationFailed { message } => {
                    return Err(ExecuteError::LoadFailed { message });
                }
                WorkerMessage::Discovered { .. } => {
                    debug!("ignoring discovered node while running `{file}`");
                    continue;
                }
                WorkerMessage::Done => return Ok(()),
            };
            if events.send(event).await.is_err() {
                return Ok(());
            }
        }

        let status = session.wait().await?;
        Err(ExecuteError::ExitedEarly { status })
    }

    async fn prepare_impl(&self, cx: &FrameworkContext) -> Result<(), LoadError> {
        if !exists(&cx.framework_path).await {
            return Err(LoadError::FrameworkNotFound {
                path: cx.framework_path.clone(),
            });
        }
        if let Some(runtime) = &cx.runtime_path {
            // Bare names like `node` are looked up on PATH at spawn time.
            if runtime.components().count() > 1 && !exists(&cx.cwd.join(runtime)).await {
                return Err(LoadError::RuntimeNotFound {
                    path: cx.cwd.join(runtime),
                });
            }
        }
        for module in &cx.options.requires {
            let Some(path) = cx.resolve_module(module) else {
                continue;
            };
            if !module_exists(&path).await {
                return Err(LoadError::RequireNotFound {
                    module: module.clone(),
                    path,
                });
            }
        }
        Ok(())
    }
}

impl Framework for ProcessFramework {
    fn prepare<'a>(&'a self, cx: &'a FrameworkContext) -> BoxFuture<'a, Result<(), LoadError>> {
        Box::pin(self.prepare_impl(cx))
    }

    fn enumerate<'a>(
        &'a self,
        cx: &'a FrameworkContext,
        file: &'a Utf8Path,
    ) -> BoxFuture<'a, Result<Vec<DiscoveredNode>, EnumerateFileError>> {
        Box::pin(self.enumerate_impl(cx, file))
    }

    fn execute<'a>(
        &'a self,
        cx: &'a FrameworkContext,
        request: FileRunRequest,
        events: mpsc::Sender<FrameworkEvent>,
    ) -> BoxFuture<'a, Result<(), ExecuteError>> {
        Box::pin(self.execute_impl(cx, request, events))
    }
}

/// A running worker process.
struct WorkerSession {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
    file: Utf8PathBuf,
}

impl WorkerSession {
    /// Returns the next protocol message, or `None` once the worker closed its stdout.
    ///
    /// Lines that don't start with `{` are output of the tests themselves and are logged.
    async fn next_message(&mut self) -> Result<Option<WorkerMessage>, ExecuteError> {
        loop {
            let Some(line) = self.lines.next_line().await.map_err(ExecuteError::Io)? else {
                return Ok(None);
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if !trimmed.starts_with('{') {
                info!(target: "testadapter::worker", "[{}] {trimmed}", self.file);
                continue;
            }
            return serde_json::from_str(trimmed)
                .map(Some)
                .map_err(|error| ExecuteError::Protocol {
                    line: trimmed.to_owned(),
                    error,
                });
        }
    }

    async fn send_verdict(&mut self, verdict: WorkerVerdict) -> Result<(), ExecuteError> {
        let mut line = serde_json::to_string(&verdict).map_err(|error| {
            ExecuteError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, error))
        })?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(ExecuteError::Io)?;
        self.stdin.flush().await.map_err(ExecuteError::Io)
    }

    async fn wait(mut self) -> Result<ExitStatus, ExecuteError> {
        drop(self.stdin);
        self.child.wait().await.map_err(ExecuteError::Io)
    }
}

async fn exists(path: &Utf8Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Module paths may leave out the extension, the way the runtime resolves them.
async fn module_exists(path: &Utf8Path) -> bool {
    if exists(path).await {
        return true;
    }
    for extension in ["js", "cjs", "mjs", "ts"] {
        if exists(&path.with_extension(extension)).await {
            return true;
        }
    }
    false
}
