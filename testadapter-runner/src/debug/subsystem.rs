// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::config::substitute_port;
use camino::Utf8PathBuf;
use futures::future::BoxFuture;
use std::{
    fmt,
    process::Stdio,
    sync::atomic::{AtomicU64, Ordering},
};
use tokio::{
    process::Command,
    sync::broadcast::{self, error::RecvError},
};
use tracing::{debug, info, warn};

/// Identifies a debug session started by a [`DebugSubsystem`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DebugSessionId(pub u64);

impl fmt::Display for DebugSessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "debug session {}", self.0)
    }
}

/// What to start a debugger for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebugLaunch {
    /// The port the runtime listens on for the debugger.
    pub port: u16,

    /// The launch configuration to use, if any.
    pub launch_config: Option<String>,

    /// The working directory of the run.
    pub cwd: Utf8PathBuf,
}

/// Starts debuggers and reports when their sessions end.
pub trait DebugSubsystem: Send + Sync {
    /// Asks for a debugger to be started. Resolves to the new session once acknowledged, or to
    /// `None` if the request was declined.
    fn start_debugging<'a>(&'a self, launch: &'a DebugLaunch) -> BoxFuture<'a, Option<DebugSessionId>>;

    /// Registers for session termination notifications. The registration lasts until the
    /// returned listener is dropped.
    fn on_session_terminated(&self) -> TerminationListener;
}

/// The sending side of termination notifications, kept by a [`DebugSubsystem`].
#[derive(Clone, Debug)]
pub struct TerminationNotifier {
    tx: broadcast::Sender<DebugSessionId>,
}

impl TerminationNotifier {
    /// Creates a notifier without listeners.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Registers a new listener.
    pub fn listen(&self) -> TerminationListener {
        TerminationListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Notifies every listener that `session` terminated.
    pub fn notify(&self, session: DebugSessionId) {
        debug!("{session} terminated, notifying {} listeners", self.listener_count());
        // No listeners is fine.
        let _ = self.tx.send(session);
    }

    /// Returns the number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for TerminationNotifier {
    fn default() -> Self {
        Self::new()
    }
}

/// A registration for session termination notifications. Dropping it unregisters.
#[derive(Debug)]
pub struct TerminationListener {
    rx: broadcast::Receiver<DebugSessionId>,
}

impl TerminationListener {
    /// Completes once `session` terminated.
    ///
    /// Also completes if the subsystem went away, since no notification can arrive after that.
    /// Cancel-safe.
    pub async fn terminated(&mut self, session: DebugSessionId) {
        loop {
            match self.rx.recv().await {
                Ok(terminated) if terminated == session => return,
                Ok(other) => debug!("ignoring termination of unrelated {other}"),
                Err(RecvError::Lagged(missed)) => {
                    debug!("missed {missed} termination notifications");
                }
                Err(RecvError::Closed) => return,
            }
        }
    }
}

/// A subsystem that declines every request.
#[derive(Debug, Default)]
pub struct NoDebugSubsystem {
    notifier: TerminationNotifier,
}

impl NoDebugSubsystem {
    /// Creates a new subsystem.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DebugSubsystem for NoDebugSubsystem {
    fn start_debugging<'a>(&'a self, launch: &'a DebugLaunch) -> BoxFuture<'a, Option<DebugSessionId>> {
        Box::pin(async move {
            info!(
                "declining to debug on port {}: no debugger command configured",
                launch.port
            );
            None
        })
    }

    fn on_session_terminated(&self) -> TerminationListener {
        self.notifier.listen()
    }
}

/// Starts a debugger by running a command.
///
/// `{port}` in the command is replaced by the debug port. The request is acknowledged once the
/// command has been spawned, and the session terminates when the command exits.
#[derive(Debug)]
pub struct CommandDebugSubsystem {
    command: Vec<String>,
    notifier: TerminationNotifier,
    next_id: AtomicU64,
}

impl CommandDebugSubsystem {
    /// Creates a subsystem running `command`.
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            notifier: TerminationNotifier::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns the notifier sessions report termination through.
    pub fn notifier(&self) -> &TerminationNotifier {
        &self.notifier
    }

    async fn start(&self, launch: &DebugLaunch) -> Option<DebugSessionId> {
        let argv = substitute_port(&self.command, launch.port);
        let Some((program, args)) = argv.split_first() else {
            warn!("declining to debug: the debugger command is empty");
            return None;
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .current_dir(&launch.cwd)
            .stdin(Stdio::null());
        if let Some(launch_config) = &launch.launch_config {
            command.env("TESTADAPTER_LAUNCH_CONFIG", launch_config);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(error) => {
                warn!(
                    "failed to start debugger `{}`: {error}",
                    shell_words::join(&argv)
                );
                return None;
            }
        };

        let session = DebugSessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        info!("started {session}: `{}`", shell_words::join(&argv));
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("debugger for {session} exited with {status}"),
                Err(error) => warn!("failed to wait for debugger of {session}: {error}"),
            }
            notifier.notify(session);
        });
        Some(session)
    }
}

impl DebugSubsystem for CommandDebugSubsystem {
    fn start_debugging<'a>(&'a self, launch: &'a DebugLaunch) -> BoxFuture<'a, Option<DebugSessionId>> {
        Box::pin(self.start(launch))
    }

    fn on_session_terminated(&self) -> TerminationListener {
        self.notifier.listen()
    }
}
