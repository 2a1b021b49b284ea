// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    dispatcher::{FileState, RunDispatcher},
    executor::{CANCELLED_MESSAGE, FileExecutor},
    plan::RunPlan,
};
use crate::{
    cancel::CancelToken,
    channel::EventChannel,
    config::AdapterConfig,
    framework::{Framework, FrameworkContext},
    list::TestTree,
    output::OutputChannel,
    time::{StopwatchStart, stopwatch},
};
use std::time::Duration;
use testadapter_metadata::{RunEvent, RunStats, RunTarget};
use tracing::info;

/// Runs parts of a [`TestTree`] and reports on them through an [`EventChannel`].
///
/// Files run one after the other. Every run emits exactly one [`RunEvent::RunStarted`] first
/// and one [`RunEvent::RunFinished`] last, whatever happens in between.
pub struct RunOrchestrator<'a> {
    framework: &'a dyn Framework,
    events: &'a EventChannel<RunEvent>,
    output: &'a dyn OutputChannel,
    cancel: CancelToken,
}

impl<'a> RunOrchestrator<'a> {
    /// Creates a new orchestrator. Cancelling `cancel` stops the run at the next event.
    pub fn new(
        framework: &'a dyn Framework,
        events: &'a EventChannel<RunEvent>,
        output: &'a dyn OutputChannel,
        cancel: CancelToken,
    ) -> Self {
        Self {
            framework,
            events,
            output,
            cancel,
        }
    }

    /// Returns the token that cancels runs of this orchestrator.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Runs `target` and returns statistics once [`RunEvent::RunFinished`] was emitted.
    pub async fn run(&self, tree: &TestTree, target: RunTarget, config: &AdapterConfig) -> RunStats {
        let mut run = self.begin(tree, target, config);
        let cx = FrameworkContext::from_config(config);
        self.execute(&mut run, &cx, config.watchdog_bound()).await;
        self.finish(run)
    }

    /// Plans the run and emits [`RunEvent::RunStarted`].
    pub(crate) fn begin(
        &self,
        tree: &TestTree,
        target: RunTarget,
        config: &AdapterConfig,
    ) -> ActiveRun<'a> {
        let plan = RunPlan::new(tree, &target);
        info!(
            "starting run of {} tests in {} files",
            plan.test_count(),
            plan.files().len()
        );
        let dispatcher = RunDispatcher::new(
            self.events,
            self.output,
            config.framework_options.retries,
            plan.test_count(),
        );
        self.events.fire(RunEvent::RunStarted { tests: target });
        ActiveRun {
            plan,
            dispatcher,
            stopwatch: stopwatch(),
        }
    }

    /// Runs every planned file. If the run was cancelled, the remaining tests are skipped.
    pub(crate) async fn execute(
        &self,
        run: &mut ActiveRun<'a>,
        cx: &FrameworkContext,
        watchdog: Option<Duration>,
    ) {
        let executor = FileExecutor::new(self.framework, cx, &self.cancel, watchdog);
        for plan in run.plan.files() {
            if self.cancel.is_cancelled() {
                let mut file = FileState::new(plan);
                run.dispatcher.skip_remaining(&mut file, CANCELLED_MESSAGE);
                run.dispatcher.mark_cancelled();
                continue;
            }
            executor.run_file(&mut run.dispatcher, plan).await;
        }
    }

    /// Emits [`RunEvent::RunFinished`] and returns the final statistics.
    pub(crate) fn finish(&self, run: ActiveRun<'a>) -> RunStats {
        let snapshot = run.stopwatch.snapshot();
        let stats = run.dispatcher.stats();
        info!(
            "run finished in {:.3}s: {} passed, {} failed, {} errored, {} skipped{}",
            snapshot.duration.as_secs_f64(),
            stats.passed,
            stats.failed,
            stats.errored,
            stats.skipped,
            if stats.cancelled { " (cancelled)" } else { "" },
        );
        self.events.fire(RunEvent::RunFinished {
            stats,
            start_time: snapshot.start_time,
            elapsed: snapshot.duration,
        });
        stats
    }
}

/// A run between [`RunEvent::RunStarted`] and [`RunEvent::RunFinished`].
pub(crate) struct ActiveRun<'a> {
    plan: RunPlan,
    dispatcher: RunDispatcher<'a>,
    stopwatch: StopwatchStart,
}

impl ActiveRun<'_> {
    /// Marks the run as aborted.
    pub(crate) fn mark_cancelled(&mut self) {
        self.dispatcher.mark_cancelled();
    }
}
