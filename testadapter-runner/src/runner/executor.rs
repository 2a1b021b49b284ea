// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Runs files through the framework, one session at a time.
//!
//! Each session races the framework's events against cancellation and the watchdog. When the
//! session future is dropped, the framework is stopped with it.

use super::{
    dispatcher::{FileState, RunDispatcher},
    plan::FilePlan,
};
use crate::{
    cancel::CancelToken,
    errors::ExecuteError,
    framework::{FileRunRequest, Framework, FrameworkContext},
};
use std::time::Duration;
use tokio::{
    sync::mpsc,
    time::{Instant, sleep_until},
};
use tracing::{debug, info};

/// The capacity of the queue between a framework and the dispatcher.
pub(super) const EVENT_QUEUE_CAPACITY: usize = 64;

/// The message attached to tests skipped because the run was cancelled.
pub(super) const CANCELLED_MESSAGE: &str = "Run cancelled";

pub(super) struct FileExecutor<'a> {
    framework: &'a dyn Framework,
    cx: &'a FrameworkContext,
    cancel: &'a CancelToken,
    watchdog: Option<Duration>,
}

#[derive(Debug)]
enum SessionOutcome {
    Finished,
    Failed(ExecuteError),
    TimedOut { waited: Duration },
    Cancelled,
}

impl<'a> FileExecutor<'a> {
    pub(super) fn new(
        framework: &'a dyn Framework,
        cx: &'a FrameworkContext,
        cancel: &'a CancelToken,
        watchdog: Option<Duration>,
    ) -> Self {
        Self {
            framework,
            cx,
            cancel,
            watchdog,
        }
    }

    /// Runs one file to completion, relaunching it after the watchdog fires as long as tests
    /// remain.
    pub(super) async fn run_file(&self, dispatcher: &mut RunDispatcher<'_>, plan: &FilePlan) {
        let mut file = FileState::new(plan);
        let mut remaining: Vec<_> = plan.tests().cloned().collect();

        loop {
            info!("running {} tests in `{}`", remaining.len(), plan.file());
            let request = FileRunRequest {
                file: plan.file().to_owned(),
                filter: plan.filter_for(&remaining),
            };

            match self.run_session(dispatcher, &mut file, request).await {
                SessionOutcome::Finished => {
                    dispatcher.session_finished(&mut file);
                    return;
                }
                SessionOutcome::Failed(error) => {
                    dispatcher.session_failed(&mut file, &error);
                    return;
                }
                SessionOutcome::TimedOut { waited } => {
                    dispatcher.session_timed_out(&mut file, waited);
                    remaining = file.relaunchable();
                    if remaining.is_empty() {
                        dispatcher.session_finished(&mut file);
                        return;
                    }
                    info!(
                        "relaunching `{}` for {} remaining tests",
                        plan.file(),
                        remaining.len()
                    );
                }
                SessionOutcome::Cancelled => {
                    dispatcher.skip_remaining(&mut file, CANCELLED_MESSAGE);
                    dispatcher.mark_cancelled();
                    return;
                }
            }
        }
    }

    async fn run_session(
        &self,
        dispatcher: &mut RunDispatcher<'_>,
        file: &mut FileState<'_>,
        request: FileRunRequest,
    ) -> SessionOutcome {
        file.session_started();
        let (tx, mut rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let mut exec = self.framework.execute(self.cx, request, tx);
        let mut last_event = Instant::now();
        let mut rx_closed = false;

        loop {
            let deadline = self
                .watchdog
                .map(|bound| file.running_since().unwrap_or(last_event) + bound);

            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    debug!("cancelling session for `{}`", file.plan().file());
                    return SessionOutcome::Cancelled;
                }
                event = rx.recv(), if !rx_closed => match event {
                    Some(event) => {
                        last_event = Instant::now();
                        dispatcher.handle(file, event);
                    }
                    None => rx_closed = true,
                },
                result = &mut exec => {
                    // Everything the framework sent before finishing is already queued.
                    while let Ok(event) = rx.try_recv() {
                        dispatcher.handle(file, event);
                    }
                    return match result {
                        Ok(()) => SessionOutcome::Finished,
                        Err(error) => SessionOutcome::Failed(error),
                    };
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let since = file.running_since().unwrap_or(last_event);
                    let waited = Instant::now().saturating_duration_since(since);
                    return if file.is_running_test() {
                        SessionOutcome::TimedOut { waited }
                    } else {
                        SessionOutcome::Failed(ExecuteError::Unresponsive { waited })
                    };
                }
            }
        }
    }
}
