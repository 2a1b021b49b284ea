// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{DebugLaunch, DebugSubsystem};
use crate::{
    config::AdapterConfig, errors::DebugStartError, framework::FrameworkContext, list::TestTree,
    runner::RunOrchestrator,
};
use std::pin::pin;
use testadapter_metadata::{RunStats, RunTarget};
use tracing::{debug, info, warn};

/// The state of a debug run.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DebugState {
    /// Nothing happened yet.
    Idle,

    /// Waiting for the debug subsystem to acknowledge the request.
    Requesting,

    /// The debugger was started; waiting for it to attach.
    Attached,

    /// Tests are running under the debugger, or have finished and the session is still open.
    Running {
        /// True once the orchestrator is done.
        tests_done: bool,
    },

    /// The tests finished and the session terminated.
    Finished,

    /// The run ended early: the request was declined, the session terminated before the tests
    /// finished, or the host cancelled.
    Aborted,
}

/// An input to [`DebugState::on`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DebugInput {
    /// A debug run was requested.
    Start,

    /// The subsystem declined to start a debugger.
    Declined,

    /// The subsystem started a debugger.
    Acknowledged,

    /// The debugger had time to attach.
    Ready,

    /// The orchestrator finished.
    TestsFinished,

    /// The debug session terminated.
    SessionTerminated,

    /// The host cancelled the run.
    Cancel,
}

impl DebugState {
    /// Returns the state after `input`. Inputs that don't apply to a state leave it unchanged.
    pub fn on(self, input: DebugInput) -> Self {
        use DebugInput::*;

        match (self, input) {
            (Self::Finished | Self::Aborted, _) => self,
            (Self::Idle, Start) => Self::Requesting,
            (Self::Requesting, Declined) => Self::Aborted,
            (Self::Requesting, Acknowledged) => Self::Attached,
            (Self::Attached, Ready) => Self::Running { tests_done: false },
            (Self::Running { tests_done: false }, TestsFinished) => Self::Running { tests_done: true },
            (Self::Running { tests_done: true }, SessionTerminated) => Self::Finished,
            (
                Self::Requesting | Self::Attached | Self::Running { .. },
                SessionTerminated | Cancel,
            ) => Self::Aborted,
            (state, _) => state,
        }
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Aborted)
    }
}

/// Runs tests under a debugger.
///
/// The run is only declared finished once both the tests finished and the debug session
/// terminated. If the session terminates first, the run is cancelled.
pub struct DebugCoordinator<'a> {
    orchestrator: RunOrchestrator<'a>,
    subsystem: &'a dyn DebugSubsystem,
}

impl<'a> DebugCoordinator<'a> {
    /// Creates a new coordinator. Cancellation goes through the orchestrator's token.
    pub fn new(orchestrator: RunOrchestrator<'a>, subsystem: &'a dyn DebugSubsystem) -> Self {
        Self {
            orchestrator,
            subsystem,
        }
    }

    /// Runs `target` under a debugger.
    ///
    /// Returns [`DebugStartError`] if the subsystem declined, in which case only
    /// `RunStarted` and `RunFinished` were emitted.
    pub async fn run(
        &self,
        tree: &TestTree,
        target: RunTarget,
        config: &AdapterConfig,
    ) -> Result<(RunStats, DebugState), DebugStartError> {
        let cancel = self.orchestrator.cancel_token();
        // Registered before anything is started, so that no termination can be missed.
        let mut listener = self.subsystem.on_session_terminated();
        let mut state = transition(DebugState::Idle, DebugInput::Start);

        let mut run = self.orchestrator.begin(tree, target, config);
        let launch = DebugLaunch {
            port: config.debug.port,
            launch_config: config.debug.launch_config.clone(),
            cwd: config.cwd.clone(),
        };
        let Some(session) = self.subsystem.start_debugging(&launch).await else {
            transition(state, DebugInput::Declined);
            self.orchestrator.finish(run);
            return Err(DebugStartError::new(
                launch.port,
                launch.launch_config,
            ));
        };
        state = transition(state, DebugInput::Acknowledged);

        let readiness = tokio::select! {
            biased;

            () = cancel.cancelled() => DebugInput::Cancel,
            () = listener.terminated(session) => DebugInput::SessionTerminated,
            () = tokio::time::sleep(config.debug.attach_delay) => DebugInput::Ready,
        };
        state = transition(state, readiness);
        if state.is_terminal() {
            // Report every test as skipped through the usual cancellation path.
            cancel.cancel();
        }

        let cx = FrameworkContext::from_config(config).with_debug(config);
        {
            // The watchdog would fire while paused at a breakpoint.
            let mut execute = pin!(self.orchestrator.execute(&mut run, &cx, None));
            let terminated_early = tokio::select! {
                biased;

                () = &mut execute => false,
                () = listener.terminated(session), if !state.is_terminal() => true,
            };
            if terminated_early {
                warn!("{session} terminated before the tests finished, cancelling the run");
                state = transition(state, DebugInput::SessionTerminated);
                cancel.cancel();
                execute.await;
            } else {
                state = transition(state, DebugInput::TestsFinished);
            }
        }

        if state == (DebugState::Running { tests_done: true }) {
            info!("tests finished, waiting for {session} to terminate");
            let input = tokio::select! {
                biased;

                () = listener.terminated(session) => DebugInput::SessionTerminated,
                () = cancel.cancelled() => DebugInput::Cancel,
            };
            state = transition(state, input);
        }
        drop(listener);

        if state == DebugState::Aborted {
            run.mark_cancelled();
        }
        let stats = self.orchestrator.finish(run);
        Ok((stats, state))
    }
}

fn transition(state: DebugState, input: DebugInput) -> DebugState {
    let next = state.on(input);
    debug!("debug run: {state:?} --{input:?}--> {next:?}");
    next
}
