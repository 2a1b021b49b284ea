// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
};
use testadapter_metadata::{
    NamePath, RunEvent, RunStats, RunTarget, SuiteState, TestId, TestState,
    worker::{FailureKind, WorkerTestFilter},
};
use testadapter_runner::{
    cancel::CancelToken,
    channel::EventChannel,
    config::AdapterConfig,
    debug::{DebugLaunch, DebugSessionId, DebugSubsystem, TerminationListener, TerminationNotifier},
    errors::{EnumerateFileError, EnumerationError, EnumerationErrorKind, ExecuteError, LoadError},
    framework::{
        DebugAttachment, DiscoveredNode, FileRunRequest, Framework, FrameworkContext,
        FrameworkEvent, RetryVerdict, TestFailure,
    },
    list::{TestTree, TestTreeBuilder},
    output::BufferedOutput,
    runner::RunOrchestrator,
};
use tokio::sync::{mpsc, oneshot};

pub(crate) const CWD: &str = "/w";

pub(crate) fn test_init() {
    // Installing twice fails, which is fine.
    let _ = color_eyre::install();
}

/// How a scripted test behaves each time it is run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum FixtureStatus {
    Pass,
    Fail,
    Flaky { pass_attempt: usize },
    Error,
    Timeout,
    Pending,
    Hang,
    Crash,
}

#[derive(Clone, Debug)]
pub(crate) enum ScriptedNode {
    Suite(NamePath),
    Test(NamePath, FixtureStatus),
}

pub(crate) fn suite(names: &[&str]) -> ScriptedNode {
    ScriptedNode::Suite(NamePath::new(names.iter().copied()))
}

pub(crate) fn test(names: &[&str], status: FixtureStatus) -> ScriptedNode {
    ScriptedNode::Test(NamePath::new(names.iter().copied()), status)
}

pub(crate) fn name_path(names: &[&str]) -> NamePath {
    NamePath::new(names.iter().copied())
}

pub(crate) fn file_path(name: &str) -> Utf8PathBuf {
    Utf8Path::new(CWD).join("test").join(name)
}

pub(crate) fn node_id(file: &str, names: &[&str]) -> TestId {
    TestId::node(&file_path(file), &name_path(names))
}

#[derive(Clone, Debug, Default)]
struct ScriptedFile {
    nodes: Vec<ScriptedNode>,
    enumeration_error: Option<String>,
    enumeration_hangs: bool,
    stalled: bool,
}

/// A call to [`Framework::execute`] as seen by a [`ScriptedFramework`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ExecuteCall {
    pub(crate) file: Utf8PathBuf,
    pub(crate) filter: WorkerTestFilter,
    pub(crate) debug: Option<DebugAttachment>,
}

/// An in-process framework that plays back scripted files, the way a mocha worker would.
#[derive(Debug, Default)]
pub(crate) struct ScriptedFramework {
    files: IndexMap<Utf8PathBuf, ScriptedFile>,
    ignore_filter: bool,
    fail_prepare: AtomicBool,
    execute_calls: Mutex<Vec<ExecuteCall>>,
}

impl ScriptedFramework {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn file(mut self, name: &str, nodes: Vec<ScriptedNode>) -> Self {
        self.files.insert(
            file_path(name),
            ScriptedFile {
                nodes,
                ..ScriptedFile::default()
            },
        );
        self
    }

    pub(crate) fn broken_file(mut self, name: &str, message: &str) -> Self {
        self.files.insert(
            file_path(name),
            ScriptedFile {
                enumeration_error: Some(message.to_owned()),
                ..ScriptedFile::default()
            },
        );
        self
    }

    /// A file that enumerates fine but never reports anything when run.
    pub(crate) fn stalled_file(mut self, name: &str, nodes: Vec<ScriptedNode>) -> Self {
        self.files.insert(
            file_path(name),
            ScriptedFile {
                nodes,
                stalled: true,
                ..ScriptedFile::default()
            },
        );
        self
    }

    /// A file whose top level never returns, so enumerating it never finishes.
    pub(crate) fn hanging_file(mut self, name: &str) -> Self {
        self.files.insert(
            file_path(name),
            ScriptedFile {
                enumeration_hangs: true,
                ..ScriptedFile::default()
            },
        );
        self
    }

    /// Runs every test of a file, whatever the requested filter says.
    pub(crate) fn ignoring_filter(mut self) -> Self {
        self.ignore_filter = true;
        self
    }

    pub(crate) fn set_fail_prepare(&self, fail: bool) {
        self.fail_prepare.store(fail, Ordering::SeqCst);
    }

    /// A configuration listing every scripted file.
    pub(crate) fn config(&self) -> AdapterConfig {
        AdapterConfig::new(CWD, self.files.keys().cloned().collect())
    }

    pub(crate) fn execute_calls(&self) -> Vec<ExecuteCall> {
        self.execute_calls.lock().unwrap().clone()
    }

    async fn play(
        &self,
        file: &ScriptedFile,
        filter: &WorkerTestFilter,
        events: &mpsc::Sender<FrameworkEvent>,
    ) -> Result<(), ExecuteError> {
        if file.stalled {
            return std::future::pending().await;
        }

        let mut open: Vec<NamePath> = Vec::new();
        for node in &file.nodes {
            let ScriptedNode::Test(name_path, status) = node else {
                continue;
            };
            if !self.ignore_filter && !filter.matches(name_path) {
                continue;
            }

            while open.last().is_some_and(|top| !name_path.starts_with(top)) {
                let finished = open.pop().unwrap();
                send(events, FrameworkEvent::SuiteFinished { name_path: finished }).await;
            }
            for ancestor in name_path.ancestors() {
                if !open.contains(&ancestor) {
                    send(
                        events,
                        FrameworkEvent::SuiteStarted {
                            name_path: ancestor.clone(),
                        },
                    )
                    .await;
                    open.push(ancestor);
                }
            }

            play_test(events, name_path, *status).await?;
        }

        for finished in open.into_iter().rev() {
            send(events, FrameworkEvent::SuiteFinished { name_path: finished }).await;
        }
        Ok(())
    }
}

async fn send(events: &mpsc::Sender<FrameworkEvent>, event: FrameworkEvent) {
    // The orchestrator stopped listening: the session is being torn down.
    let _ = events.send(event).await;
}

async fn play_test(
    events: &mpsc::Sender<FrameworkEvent>,
    name_path: &NamePath,
    status: FixtureStatus,
) -> Result<(), ExecuteError> {
    if status == FixtureStatus::Pending {
        send(
            events,
            FrameworkEvent::TestPending {
                name_path: name_path.clone(),
            },
        )
        .await;
        return Ok(());
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        send(
            events,
            FrameworkEvent::TestStarted {
                name_path: name_path.clone(),
            },
        )
        .await;

        let (kind, message) = match status {
            FixtureStatus::Pass => {
                send(
                    events,
                    FrameworkEvent::TestPassed {
                        name_path: name_path.clone(),
                    },
                )
                .await;
                return Ok(());
            }
            FixtureStatus::Flaky { pass_attempt } if attempt >= pass_attempt => {
                send(
                    events,
                    FrameworkEvent::TestPassed {
                        name_path: name_path.clone(),
                    },
                )
                .await;
                return Ok(());
            }
            FixtureStatus::Fail | FixtureStatus::Flaky { .. } => (
                FailureKind::Assertion,
                format!("AssertionError: attempt {attempt} failed"),
            ),
            FixtureStatus::Error => (
                FailureKind::Exception,
                "TypeError: undefined is not a function".to_owned(),
            ),
            FixtureStatus::Timeout => (
                FailureKind::Timeout,
                "Timeout of 2000ms exceeded".to_owned(),
            ),
            FixtureStatus::Hang => return std::future::pending().await,
            FixtureStatus::Crash => {
                return Err(ExecuteError::Other {
                    message: "worker crashed".to_owned(),
                });
            }
            FixtureStatus::Pending => unreachable!("handled above"),
        };

        let (tx, rx) = oneshot::channel();
        send(
            events,
            FrameworkEvent::TestFailed {
                name_path: name_path.clone(),
                failure: TestFailure {
                    kind,
                    message,
                    stack: None,
                },
                verdict: Some(tx),
            },
        )
        .await;
        if rx.await.unwrap_or(RetryVerdict::Accept) == RetryVerdict::Accept {
            return Ok(());
        }
    }
}

impl Framework for ScriptedFramework {
    fn prepare<'a>(&'a self, cx: &'a FrameworkContext) -> BoxFuture<'a, Result<(), LoadError>> {
        Box::pin(async move {
            if self.fail_prepare.load(Ordering::SeqCst) {
                return Err(LoadError::FrameworkNotFound {
                    path: cx.framework_path.clone(),
                });
            }
            Ok(())
        })
    }

    fn enumerate<'a>(
        &'a self,
        _cx: &'a FrameworkContext,
        file: &'a Utf8Path,
    ) -> BoxFuture<'a, Result<Vec<DiscoveredNode>, EnumerateFileError>> {
        Box::pin(async move {
            let Some(scripted) = self.files.get(file) else {
                return Err(EnumerateFileError::File(EnumerationError::new(
                    file,
                    EnumerationErrorKind::Reported {
                        message: "no such file".to_owned(),
                    },
                )));
            };
            if scripted.enumeration_hangs {
                return std::future::pending().await;
            }
            if let Some(message) = &scripted.enumeration_error {
                return Err(EnumerateFileError::File(EnumerationError::new(
                    file,
                    EnumerationErrorKind::Reported {
                        message: message.clone(),
                    },
                )));
            }
            Ok(scripted
                .nodes
                .iter()
                .enumerate()
                .map(|(index, node)| {
                    let mut discovered = match node {
                        ScriptedNode::Suite(name_path) => DiscoveredNode::suite(name_path.clone()),
                        ScriptedNode::Test(name_path, _) => DiscoveredNode::test(name_path.clone()),
                    };
                    discovered.line = u32::try_from(index + 1).ok();
                    discovered
                })
                .collect())
        })
    }

    fn execute<'a>(
        &'a self,
        cx: &'a FrameworkContext,
        request: FileRunRequest,
        events: mpsc::Sender<FrameworkEvent>,
    ) -> BoxFuture<'a, Result<(), ExecuteError>> {
        Box::pin(async move {
            self.execute_calls.lock().unwrap().push(ExecuteCall {
                file: request.file.clone(),
                filter: request.filter.clone(),
                debug: cx.debug.clone(),
            });
            let file = self
                .files
                .get(&request.file)
                .ok_or_else(|| ExecuteError::Other {
                    message: format!("unknown file `{}`", request.file),
                })?;
            self.play(file, &request.filter, &events).await
        })
    }
}

/// A debug subsystem driven by the test: sessions only terminate when told to.
#[derive(Debug)]
pub(crate) struct ScriptedDebug {
    accept: bool,
    terminate_on_start: bool,
    notifier: TerminationNotifier,
    launches: Mutex<Vec<DebugLaunch>>,
}

impl ScriptedDebug {
    pub(crate) const SESSION: DebugSessionId = DebugSessionId(1);

    pub(crate) fn accepting() -> Self {
        Self {
            accept: true,
            terminate_on_start: false,
            notifier: TerminationNotifier::new(),
            launches: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn declining() -> Self {
        Self {
            accept: false,
            ..Self::accepting()
        }
    }

    /// Acknowledges, but the session is over before the debugger could attach.
    pub(crate) fn terminating_on_start() -> Self {
        Self {
            terminate_on_start: true,
            ..Self::accepting()
        }
    }

    pub(crate) fn terminate(&self) {
        self.notifier.notify(Self::SESSION);
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.notifier.listener_count()
    }

    pub(crate) fn launches(&self) -> Vec<DebugLaunch> {
        self.launches.lock().unwrap().clone()
    }
}

impl DebugSubsystem for ScriptedDebug {
    fn start_debugging<'a>(
        &'a self,
        launch: &'a DebugLaunch,
    ) -> BoxFuture<'a, Option<DebugSessionId>> {
        Box::pin(async move {
            self.launches.lock().unwrap().push(launch.clone());
            if self.accept && self.terminate_on_start {
                self.terminate();
            }
            self.accept.then_some(Self::SESSION)
        })
    }

    fn on_session_terminated(&self) -> TerminationListener {
        self.notifier.listen()
    }
}

/// Everything needed to drive a [`RunOrchestrator`] over a [`ScriptedFramework`].
pub(crate) struct RunHarness {
    pub(crate) framework: ScriptedFramework,
    pub(crate) config: AdapterConfig,
    pub(crate) events: EventChannel<RunEvent>,
    pub(crate) output: BufferedOutput,
}

impl RunHarness {
    pub(crate) fn new(framework: ScriptedFramework) -> Self {
        test_init();
        let config = framework.config();
        Self {
            framework,
            config,
            events: EventChannel::new(),
            output: BufferedOutput::new(),
        }
    }

    pub(crate) fn configure(mut self, f: impl FnOnce(&mut AdapterConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub(crate) async fn tree(&self) -> TestTree {
        TestTreeBuilder::new(&self.framework)
            .build(&self.config)
            .await
            .expect("scripted tree loads")
    }

    pub(crate) fn orchestrator(&self, cancel: CancelToken) -> RunOrchestrator<'_> {
        RunOrchestrator::new(&self.framework, &self.events, &self.output, cancel)
    }

    /// Runs `target` to completion and returns the statistics with every event emitted.
    pub(crate) async fn run(&self, target: RunTarget) -> (RunStats, Vec<RunEvent>) {
        let tree = self.tree().await;
        let mut rx = self.events.subscribe();
        let stats = self
            .orchestrator(CancelToken::new())
            .run(&tree, target, &self.config)
            .await;
        let events = rx.drain();
        assert_well_formed(&events);
        (stats, events)
    }
}

/// Renders events compactly, with ids relative to the test directory.
pub(crate) fn summarize(events: &[RunEvent]) -> Vec<String> {
    let prefix = format!("{}/", file_path("").as_str().trim_end_matches('/'));
    let short = |id: &TestId| {
        id.as_str()
            .strip_prefix(&prefix)
            .unwrap_or(id.as_str())
            .to_owned()
    };
    events
        .iter()
        .map(|event| match event {
            RunEvent::RunStarted { .. } => "run started".to_owned(),
            RunEvent::Suite { suite, state } => format!("suite {} {state:?}", short(suite)),
            RunEvent::Test { test, state, .. } => format!("test {} {state:?}", short(test)),
            RunEvent::RunFinished { .. } => "run finished".to_owned(),
        })
        .collect()
}

/// Returns the message of the last event for `id`.
pub(crate) fn message_for(events: &[RunEvent], id: &TestId) -> Option<String> {
    events.iter().rev().find_map(|event| match event {
        RunEvent::Test { test, message, .. } if test == id => message.clone(),
        _ => None,
    })
}

/// Checks the ordering guarantees every run makes.
pub(crate) fn assert_well_formed(events: &[RunEvent]) {
    assert!(
        matches!(events.first(), Some(RunEvent::RunStarted { .. })),
        "first event is RunStarted: {events:?}"
    );
    assert!(
        matches!(events.last(), Some(RunEvent::RunFinished { .. })),
        "last event is RunFinished: {events:?}"
    );
    let inner = &events[1..events.len() - 1];
    assert!(
        !inner
            .iter()
            .any(|event| matches!(event, RunEvent::RunStarted { .. } | RunEvent::RunFinished { .. })),
        "exactly one RunStarted and RunFinished"
    );

    let mut tests: HashMap<&TestId, Vec<_>> = HashMap::new();
    let mut open_suites: Vec<&TestId> = Vec::new();
    for event in inner {
        match event {
            RunEvent::Test { test, state, .. } => {
                let states = tests.entry(test).or_default();
                assert!(
                    !states.last().is_some_and(|state: &TestState| state.is_terminal()),
                    "`{test}` reported after reaching a terminal state"
                );
                states.push(*state);
            }
            RunEvent::Suite { suite, state } => match state {
                SuiteState::Running => {
                    assert!(!open_suites.contains(&suite), "`{suite}` opened twice");
                    open_suites.push(suite);
                }
                SuiteState::Completed => {
                    assert_eq!(
                        open_suites.pop(),
                        Some(suite),
                        "suites complete innermost first"
                    );
                }
            },
            RunEvent::RunStarted { .. } | RunEvent::RunFinished { .. } => {}
        }
    }
    assert!(open_suites.is_empty(), "unclosed suites: {open_suites:?}");
    for (test, states) in tests {
        assert!(
            states.last().is_some_and(|state| state.is_terminal()),
            "`{test}` ended in {states:?}"
        );
    }
}
