// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use pretty_assertions::assert_eq;
use std::time::Duration;
use testadapter_metadata::{RunEvent, RunTarget, TestState};
use testadapter_runner::{
    cancel::CancelToken,
    debug::{DebugCoordinator, DebugState},
    framework::DebugAttachment,
};

fn two_tests() -> ScriptedFramework {
    ScriptedFramework::new().file(
        "a.js",
        vec![
            suite(&["A"]),
            test(&["A", "t1"], FixtureStatus::Pass),
            test(&["A", "t2"], FixtureStatus::Fail),
        ],
    )
}

fn is_terminal_for(event: &RunEvent, names: &[&str]) -> bool {
    let id = node_id("a.js", names);
    matches!(event, RunEvent::Test { test, state, .. } if *test == id && state.is_terminal())
}

#[tokio::test(start_paused = true)]
async fn declined() {
    let harness = RunHarness::new(two_tests());
    let debug = ScriptedDebug::declining();
    let tree = harness.tree().await;
    let mut rx = harness.events.subscribe();

    let coordinator = DebugCoordinator::new(harness.orchestrator(CancelToken::new()), &debug);
    let error = coordinator
        .run(&tree, RunTarget::All, &harness.config)
        .await
        .expect_err("the debugger was declined");
    assert_eq!(error.to_string(), "debugger did not start on port 9229");

    assert_eq!(summarize(&rx.drain()), ["run started", "run finished"]);
    assert!(harness.framework.execute_calls().is_empty());
    assert_eq!(debug.listener_count(), 0, "listener disposed");
}

#[tokio::test(start_paused = true)]
async fn finishes_only_after_termination() {
    let harness = RunHarness::new(two_tests());
    let debug = ScriptedDebug::accepting();
    let tree = harness.tree().await;
    let mut rx = harness.events.subscribe();
    let coordinator = DebugCoordinator::new(harness.orchestrator(CancelToken::new()), &debug);

    let mut events = Vec::new();
    let (result, ()) = tokio::join!(coordinator.run(&tree, RunTarget::All, &harness.config), async {
        while let Some(event) = rx.recv().await {
            let done = is_terminal_for(&event, &["A", "t2"]);
            events.push(event);
            if done {
                break;
            }
        }
        // The session is still open, so the run must not finish however long it stays open.
        tokio::time::sleep(Duration::from_secs(600)).await;
        events.extend(rx.drain());
        assert!(
            !events
                .iter()
                .any(|event| matches!(event, RunEvent::RunFinished { .. })),
            "RunFinished before the session terminated"
        );
        assert_eq!(debug.listener_count(), 1);
        debug.terminate();
    });
    events.extend(rx.drain());
    assert_well_formed(&events);

    let (stats, state) = result.expect("debugger started");
    assert_eq!(state, DebugState::Finished);
    assert!(!stats.cancelled);
    assert_eq!((stats.passed, stats.failed), (1, 1));
    assert_eq!(debug.listener_count(), 0, "listener disposed");

    let launches = debug.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].port, 9229);
    assert_eq!(launches[0].cwd, CWD);
    assert_eq!(
        harness.framework.execute_calls()[0].debug,
        Some(DebugAttachment {
            port: 9229,
            runtime_args: vec!["--inspect-brk=9229".to_owned()],
        })
    );
}

#[tokio::test(start_paused = true)]
async fn termination_while_running_aborts() {
    let framework = ScriptedFramework::new().file(
        "a.js",
        vec![
            test(&["t1"], FixtureStatus::Pass),
            test(&["t2"], FixtureStatus::Hang),
            test(&["t3"], FixtureStatus::Pass),
        ],
    );
    // A timeout is configured, but the watchdog stays off under a debugger.
    let harness = RunHarness::new(framework).configure(|config| {
        config.framework_options.timeout = Duration::from_millis(100);
        config.watchdog_overhead = Duration::from_secs(1);
    });
    let debug = ScriptedDebug::accepting();
    let tree = harness.tree().await;
    let mut rx = harness.events.subscribe();
    let coordinator = DebugCoordinator::new(harness.orchestrator(CancelToken::new()), &debug);

    let t2 = node_id("a.js", &["t2"]);
    let mut events = Vec::new();
    let (result, ()) = tokio::join!(coordinator.run(&tree, RunTarget::All, &harness.config), async {
        while let Some(event) = rx.recv().await {
            let started = event == RunEvent::test(t2.clone(), TestState::Running);
            events.push(event);
            if started {
                break;
            }
        }
        tokio::time::sleep(Duration::from_secs(60)).await;
        debug.terminate();
    });
    events.extend(rx.drain());
    assert_well_formed(&events);

    assert_eq!(
        summarize(&events),
        [
            "run started",
            "test a.js:t1 Running",
            "test a.js:t1 Passed",
            "test a.js:t2 Running",
            "test a.js:t2 Skipped",
            "test a.js:t3 Skipped",
            "run finished",
        ]
    );
    let (stats, state) = result.expect("debugger started");
    assert_eq!(state, DebugState::Aborted);
    assert!(stats.cancelled);
    assert_eq!(stats.timed_out, 0);
    assert_eq!(debug.listener_count(), 0, "listener disposed");
}

#[tokio::test(start_paused = true)]
async fn termination_before_attach_skips_everything() {
    let harness = RunHarness::new(two_tests());
    let debug = ScriptedDebug::terminating_on_start();
    let tree = harness.tree().await;
    let mut rx = harness.events.subscribe();
    let coordinator = DebugCoordinator::new(harness.orchestrator(CancelToken::new()), &debug);

    let (stats, state) = coordinator
        .run(&tree, RunTarget::All, &harness.config)
        .await
        .expect("debugger started");
    assert_eq!(state, DebugState::Aborted);
    assert!(stats.cancelled);
    assert_eq!(stats.skipped, 2);
    assert_eq!(
        summarize(&rx.drain()),
        [
            "run started",
            "test a.js:A/t1 Skipped",
            "test a.js:A/t2 Skipped",
            "run finished",
        ]
    );
    assert!(harness.framework.execute_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancel_while_waiting_for_termination() {
    let harness = RunHarness::new(two_tests());
    let debug = ScriptedDebug::accepting();
    let tree = harness.tree().await;
    let cancel = CancelToken::new();
    let mut rx = harness.events.subscribe();
    let coordinator = DebugCoordinator::new(harness.orchestrator(cancel.clone()), &debug);

    let (result, ()) = tokio::join!(coordinator.run(&tree, RunTarget::All, &harness.config), async {
        while let Some(event) = rx.recv().await {
            if is_terminal_for(&event, &["A", "t2"]) {
                break;
            }
        }
        cancel.cancel();
    });

    let (stats, state) = result.expect("debugger started");
    assert_eq!(state, DebugState::Aborted);
    assert!(stats.cancelled);
    assert_eq!((stats.passed, stats.failed), (1, 1), "results are kept");
    assert!(matches!(
        rx.drain().last(),
        Some(RunEvent::RunFinished { .. })
    ));
    assert_eq!(debug.listener_count(), 0, "listener disposed");
}
