// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns framework events into the host-facing event stream.
//!
//! Frameworks report in their own terms: suites may not be announced, a test may report a
//! result without having started, and a subset run may report tests nobody asked for. The
//! dispatcher is the one place that reconciles this with the guarantees of [`RunEvent`]:
//! suites are running before their tests, every `running` gets exactly one terminal state and
//! only requested nodes are reported.

use super::plan::FilePlan;
use crate::{
    channel::EventChannel,
    errors::{DisplayErrorChain, ExecuteError},
    framework::{FrameworkEvent, RetryVerdict, TestFailure},
    output::OutputChannel,
};
use indexmap::IndexSet;
use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};
use testadapter_metadata::{
    NamePath, RunEvent, RunStats, SuiteState, TestId, TestState,
    worker::{FailureKind, NodeKind},
};
use swrite::{SWrite, swrite};
use tokio::{sync::oneshot, time::Instant};
use tracing::{debug, info, warn};

/// Run-wide bookkeeping: statistics and retry records.
pub(super) struct RunDispatcher<'a> {
    events: &'a EventChannel<RunEvent>,
    output: &'a dyn OutputChannel,
    retries: usize,
    stats: RunStats,
    records: HashMap<TestId, RetryRecord>,
}

/// What is known about a test's attempts within one run.
#[derive(Debug, Default)]
struct RetryRecord {
    attempts: usize,
    // Set between a retry verdict and the next attempt starting.
    awaiting_retry: bool,
    last_failure: Option<RecordedFailure>,
}

#[derive(Clone, Debug)]
struct RecordedFailure {
    state: TestState,
    message: String,
    timed_out: bool,
}

/// The state of one file in a run. Outlives individual framework sessions, since a file is
/// relaunched after the watchdog fires.
pub(super) struct FileState<'p> {
    plan: &'p FilePlan,
    pending: IndexSet<NamePath>,
    open_suites: Vec<NamePath>,
    completed_suites: HashSet<NamePath>,
    running: Option<RunningTest>,
    // Reset for every framework session.
    reported: HashMap<NamePath, ReportedDeclaration>,
}

/// Which of the tests declared under one name a framework is currently reporting on.
#[derive(Copy, Clone, Debug)]
struct ReportedDeclaration {
    repeat: usize,
    open: bool,
}

struct RunningTest {
    name_path: NamePath,
    since: Instant,
}

impl<'p> FileState<'p> {
    pub(super) fn new(plan: &'p FilePlan) -> Self {
        Self {
            plan,
            pending: plan.tests().cloned().collect(),
            open_suites: Vec::new(),
            completed_suites: HashSet::new(),
            running: None,
            reported: HashMap::new(),
        }
    }

    /// Called before every framework session over the file.
    pub(super) fn session_started(&mut self) {
        self.reported.clear();
    }

    /// Frameworks name tests only by their names. Maps a reported name path to the
    /// declaration it stands for: the one reported on last, until its result is in, and the
    /// next one with the same names after that.
    fn resolve(&mut self, reported: &NamePath) -> NamePath {
        let declaration = self
            .reported
            .entry(reported.first_declaration())
            .and_modify(|declaration| {
                if !declaration.open {
                    declaration.repeat += 1;
                    declaration.open = true;
                }
            })
            .or_insert(ReportedDeclaration {
                repeat: 0,
                open: true,
            });
        reported.with_repeat(declaration.repeat)
    }

    /// The framework is done with the declaration `name_path` stands for.
    fn close_declaration(&mut self, name_path: &NamePath) {
        if let Some(declaration) = self.reported.get_mut(&name_path.first_declaration()) {
            declaration.open = false;
        }
    }

    pub(super) fn plan(&self) -> &'p FilePlan {
        self.plan
    }

    /// Returns when the currently running test first started.
    pub(super) fn running_since(&self) -> Option<Instant> {
        self.running.as_ref().map(|running| running.since)
    }

    pub(super) fn is_running_test(&self) -> bool {
        self.running.is_some()
    }

    fn is_running(&self, name_path: &NamePath) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| &running.name_path == name_path)
    }

    /// Returns the tests that a relaunched session should still run: those without a result,
    /// except those in suites that already completed.
    pub(super) fn relaunchable(&self) -> Vec<NamePath> {
        self.pending
            .iter()
            .filter(|test| {
                !test
                    .ancestors()
                    .any(|suite| self.completed_suites.contains(&suite))
            })
            .cloned()
            .collect()
    }
}

impl<'a> RunDispatcher<'a> {
    pub(super) fn new(
        events: &'a EventChannel<RunEvent>,
        output: &'a dyn OutputChannel,
        retries: usize,
        initial_run_count: usize,
    ) -> Self {
        Self {
            events,
            output,
            retries,
            stats: RunStats {
                initial_run_count,
                ..RunStats::default()
            },
            records: HashMap::new(),
        }
    }

    pub(super) fn stats(&self) -> RunStats {
        self.stats
    }

    pub(super) fn mark_cancelled(&mut self) {
        self.stats.cancelled = true;
    }

    /// Handles one event from the framework.
    pub(super) fn handle(&mut self, file: &mut FileState<'_>, event: FrameworkEvent) {
        match event {
            FrameworkEvent::SuiteStarted { name_path } => {
                if file.plan.accepts(NodeKind::Suite, &name_path) {
                    debug!("suite `{name_path}` started");
                } else {
                    debug!("ignoring extraneous suite `{name_path}`");
                }
            }
            FrameworkEvent::SuiteFinished { name_path } => {
                if file.plan.accepts(NodeKind::Suite, &name_path) {
                    self.close_suite(file, &name_path);
                }
            }
            FrameworkEvent::TestStarted { name_path } => {
                let name_path = file.resolve(&name_path);
                if self.accepts_test(file, &name_path) {
                    self.test_started(file, &name_path);
                }
            }
            FrameworkEvent::TestPassed { name_path } => {
                let name_path = file.resolve(&name_path);
                if self.accepts_test(file, &name_path) && self.ensure_running(file, &name_path) {
                    self.output.append(&format!("{name_path}: passed"));
                    self.finish_test(file, &name_path, TestState::Passed, None);
                }
                file.close_declaration(&name_path);
            }
            FrameworkEvent::TestPending { name_path } => {
                let name_path = file.resolve(&name_path);
                if self.accepts_test(file, &name_path) {
                    if file.is_running(&name_path) {
                        self.finish_test(file, &name_path, TestState::Skipped, None);
                    } else if file.pending.contains(&name_path) {
                        self.open_suites_for(file, &name_path);
                        self.finish_test(file, &name_path, TestState::Skipped, None);
                    } else {
                        debug!("ignoring pending report for finished test `{name_path}`");
                    }
                }
                file.close_declaration(&name_path);
            }
            FrameworkEvent::TestFailed {
                name_path,
                failure,
                verdict,
            } => {
                let name_path = file.resolve(&name_path);
                if self.accepts_test(file, &name_path) {
                    self.test_failed(file, &name_path, failure, verdict);
                } else {
                    answer(verdict, RetryVerdict::Accept);
                }
                if !self.awaiting_retry(file, &name_path) {
                    file.close_declaration(&name_path);
                }
            }
        }
    }

    fn awaiting_retry(&self, file: &FileState<'_>, name_path: &NamePath) -> bool {
        file.is_running(name_path)
            && self
                .records
                .get(&file.plan.node_id(name_path))
                .is_some_and(|record| record.awaiting_retry)
    }

    fn accepts_test(&self, file: &FileState<'_>, name_path: &NamePath) -> bool {
        let accepted = file.plan.accepts(NodeKind::Test, name_path);
        if !accepted {
            debug!("ignoring extraneous test `{name_path}`");
        }
        accepted
    }

    fn test_started(&mut self, file: &mut FileState<'_>, name_path: &NamePath) {
        if file.is_running(name_path) {
            let id = file.plan.node_id(name_path);
            let record = self.records.entry(id).or_default();
            if record.awaiting_retry {
                record.awaiting_retry = false;
                record.attempts += 1;
                self.stats.attempts += 1;
                let attempt = record.attempts;
                self.log_attempt(name_path, attempt);
            } else {
                debug!("ignoring repeated start of `{name_path}`");
            }
            return;
        }

        if !file.pending.contains(name_path) {
            debug!("ignoring start of finished test `{name_path}`");
            return;
        }
        if file.running.is_some() {
            self.finish_interrupted(file, "the test framework moved on without reporting a result");
        }

        self.open_suites_for(file, name_path);
        let id = file.plan.node_id(name_path);
        self.events
            .fire(RunEvent::test(id.clone(), TestState::Running));
        file.running = Some(RunningTest {
            name_path: name_path.clone(),
            since: Instant::now(),
        });
        self.records.insert(
            id,
            RetryRecord {
                attempts: 1,
                ..RetryRecord::default()
            },
        );
        self.stats.attempts += 1;
        self.log_attempt(name_path, 1);
    }

    /// Makes sure `name_path` is the running test before reporting a result for it. Returns
    /// false if the result should be dropped.
    fn ensure_running(&mut self, file: &mut FileState<'_>, name_path: &NamePath) -> bool {
        if file.is_running(name_path) {
            let id = file.plan.node_id(name_path);
            if let Some(record) = self.records.get_mut(&id) {
                if record.awaiting_retry {
                    // The framework retried without announcing it.
                    record.awaiting_retry = false;
                    record.attempts += 1;
                    self.stats.attempts += 1;
                    let attempt = record.attempts;
                    self.log_attempt(name_path, attempt);
                }
            }
            return true;
        }
        if !file.pending.contains(name_path) {
            debug!("ignoring result for finished test `{name_path}`");
            return false;
        }
        self.test_started(file, name_path);
        true
    }

    fn test_failed(
        &mut self,
        file: &mut FileState<'_>,
        name_path: &NamePath,
        failure: TestFailure,
        verdict: Option<oneshot::Sender<RetryVerdict>>,
    ) {
        if !self.ensure_running(file, name_path) {
            answer(verdict, RetryVerdict::Accept);
            return;
        }

        let id = file.plan.node_id(name_path);
        let state = match failure.kind {
            FailureKind::Exception => TestState::Errored,
            FailureKind::Assertion | FailureKind::Timeout => TestState::Failed,
        };
        let timed_out = failure.kind == FailureKind::Timeout;
        let message = failure.display_message();

        let record = self.records.entry(id).or_default();
        let attempt = record.attempts;
        let max = self.retries.saturating_add(1);
        self.output.append(&format!(
            "{name_path}: attempt {attempt}/{max} failed: {}",
            failure.message
        ));

        if attempt <= self.retries {
            if let Some(verdict) = verdict {
                if verdict.send(RetryVerdict::Retry).is_ok() {
                    info!("retrying `{name_path}` after attempt {attempt}/{max}");
                    record.awaiting_retry = true;
                    record.last_failure = Some(RecordedFailure {
                        state,
                        message,
                        timed_out,
                    });
                    return;
                }
            }
            debug!("`{name_path}` can't be retried, keeping the failure");
        } else {
            answer(verdict, RetryVerdict::Accept);
        }

        if timed_out {
            self.stats.timed_out += 1;
        }
        self.finish_test(file, name_path, state, Some(message));
    }

    /// The framework finished the file.
    pub(super) fn session_finished(&mut self, file: &mut FileState<'_>) {
        if file.running.is_some() {
            self.finish_interrupted(file, "the test framework finished without reporting a result");
        }
        if !file.pending.is_empty() {
            let mut names = String::new();
            for (index, test) in file.pending.iter().enumerate() {
                if index > 0 {
                    names.push_str(", ");
                }
                swrite!(names, "`{test}`");
            }
            warn!(
                "{} requested tests in `{}` were never reported: {names}",
                file.pending.len(),
                file.plan.file(),
            );
            file.pending.clear();
        }
        self.close_all_suites(file);
    }

    /// The framework session failed: the file's remaining tests are errored.
    pub(super) fn session_failed(&mut self, file: &mut FileState<'_>, error: &ExecuteError) {
        let message = DisplayErrorChain::new(error).to_string();
        warn!("running `{}` failed: {message}", file.plan.file());
        if let Some(running) = file.running.take() {
            self.finish_test(file, &running.name_path, TestState::Errored, Some(message.clone()));
        }
        for test in std::mem::take(&mut file.pending) {
            self.finish_test(file, &test, TestState::Errored, Some(message.clone()));
        }
        self.close_all_suites(file);
    }

    /// The watchdog fired while a test was running. The session is abandoned; the caller may
    /// relaunch the file for [`FileState::relaunchable`].
    pub(super) fn session_timed_out(&mut self, file: &mut FileState<'_>, waited: Duration) {
        let Some(running) = file.running.take() else {
            return;
        };
        let message = format!(
            "Timeout: no result after {}",
            humantime::format_duration(waited)
        );
        warn!("`{}` in `{}`: {message}", running.name_path, file.plan.file());
        self.output
            .append(&format!("{}: {message}", running.name_path));
        self.stats.timed_out += 1;
        self.finish_test(file, &running.name_path, TestState::Failed, Some(message));
    }

    /// The run was cancelled: the file's remaining tests are skipped.
    pub(super) fn skip_remaining(&mut self, file: &mut FileState<'_>, reason: &str) {
        if let Some(running) = file.running.take() {
            self.finish_test(
                file,
                &running.name_path,
                TestState::Skipped,
                Some(reason.to_owned()),
            );
        }
        for test in std::mem::take(&mut file.pending) {
            self.finish_test(file, &test, TestState::Skipped, Some(reason.to_owned()));
        }
        self.close_all_suites(file);
    }

    /// Reports the running test with its last failure if it was waiting for a retry, and as
    /// errored otherwise.
    fn finish_interrupted(&mut self, file: &mut FileState<'_>, fallback: &str) {
        let Some(running) = file.running.take() else {
            return;
        };
        let id = file.plan.node_id(&running.name_path);
        let last_failure = self
            .records
            .get(&id)
            .and_then(|record| record.last_failure.clone());
        match last_failure {
            Some(failure) => {
                if failure.timed_out {
                    self.stats.timed_out += 1;
                }
                self.finish_test(
                    file,
                    &running.name_path,
                    failure.state,
                    Some(failure.message),
                );
            }
            None => self.finish_test(
                file,
                &running.name_path,
                TestState::Errored,
                Some(fallback.to_owned()),
            ),
        }
    }

    fn finish_test(
        &mut self,
        file: &mut FileState<'_>,
        name_path: &NamePath,
        state: TestState,
        message: Option<String>,
    ) {
        if file.is_running(name_path) {
            file.running = None;
        }
        file.pending.shift_remove(name_path);
        debug!("`{name_path}` in `{}`: {state:?}", file.plan.file());
        self.events.fire(RunEvent::Test {
            test: file.plan.node_id(name_path),
            state,
            message,
        });
        self.stats.record(state);
    }

    /// Completes open suites that don't contain `name_path` and starts its ancestors.
    fn open_suites_for(&mut self, file: &mut FileState<'_>, name_path: &NamePath) {
        while file
            .open_suites
            .last()
            .is_some_and(|top| !name_path.starts_with(top))
        {
            if let Some(suite) = file.open_suites.pop() {
                self.suite_completed(file, suite);
            }
        }

        for ancestor in name_path.ancestors() {
            if !file.plan.accepts(NodeKind::Suite, &ancestor) || file.open_suites.contains(&ancestor)
            {
                continue;
            }
            if file.completed_suites.contains(&ancestor) {
                debug!("not reopening completed suite `{ancestor}`");
                continue;
            }
            self.events.fire(RunEvent::Suite {
                suite: file.plan.node_id(&ancestor),
                state: SuiteState::Running,
            });
            file.open_suites.push(ancestor);
        }
    }

    fn close_suite(&mut self, file: &mut FileState<'_>, name_path: &NamePath) {
        let Some(position) = file.open_suites.iter().position(|suite| suite == name_path) else {
            debug!("suite `{name_path}` finished without being open");
            return;
        };
        // Nested suites still open are completed first.
        for suite in file.open_suites.split_off(position).into_iter().rev() {
            self.suite_completed(file, suite);
        }
    }

    fn close_all_suites(&mut self, file: &mut FileState<'_>) {
        for suite in std::mem::take(&mut file.open_suites).into_iter().rev() {
            self.suite_completed(file, suite);
        }
    }

    fn suite_completed(&mut self, file: &mut FileState<'_>, suite: NamePath) {
        self.events.fire(RunEvent::Suite {
            suite: file.plan.node_id(&suite),
            state: SuiteState::Completed,
        });
        file.completed_suites.insert(suite);
    }

    fn log_attempt(&self, name_path: &NamePath, attempt: usize) {
        let max = self.retries.saturating_add(1);
        debug!("`{name_path}`: attempt {attempt}/{max}");
        self.output
            .append(&format!("{name_path}: attempt {attempt}/{max}"));
    }
}

fn answer(verdict: Option<oneshot::Sender<RetryVerdict>>, reply: RetryVerdict) {
    if let Some(verdict) = verdict {
        // The framework may have stopped waiting, which is fine.
        let _ = verdict.send(reply);
    }
}
