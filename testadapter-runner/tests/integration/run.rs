// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use pretty_assertions::assert_eq;
use std::time::Duration;
use testadapter_metadata::{RunEvent, RunStats, RunTarget, TestId, TestState, worker::WorkerTestFilter};
use testadapter_runner::cancel::CancelToken;

fn basic() -> ScriptedFramework {
    ScriptedFramework::new().file(
        "a.js",
        vec![
            suite(&["A"]),
            test(&["A", "t1"], FixtureStatus::Pass),
            test(&["A", "t2"], FixtureStatus::Fail),
        ],
    )
}

#[tokio::test]
async fn pass_and_fail() {
    let harness = RunHarness::new(basic());
    let (stats, events) = harness.run(RunTarget::All).await;

    assert_eq!(
        summarize(&events),
        [
            "run started",
            "suite a.js:A Running",
            "test a.js:A/t1 Running",
            "test a.js:A/t1 Passed",
            "test a.js:A/t2 Running",
            "test a.js:A/t2 Failed",
            "suite a.js:A Completed",
            "run finished",
        ]
    );
    assert_eq!(
        message_for(&events, &node_id("a.js", &["A", "t2"])).as_deref(),
        Some("AssertionError: attempt 1 failed")
    );
    assert_eq!(
        stats,
        RunStats {
            initial_run_count: 2,
            finished_count: 2,
            passed: 1,
            failed: 1,
            attempts: 2,
            ..RunStats::default()
        }
    );
    assert_eq!(
        harness.framework.execute_calls()[0].filter,
        WorkerTestFilter::All
    );
}

#[tokio::test]
async fn run_finished_carries_stats() {
    let harness = RunHarness::new(basic());
    let (stats, events) = harness.run(RunTarget::All).await;
    match events.last() {
        Some(RunEvent::RunFinished {
            stats: reported, ..
        }) => assert_eq!(*reported, stats),
        other => panic!("expected RunFinished, found {other:?}"),
    }
    match events.first() {
        Some(RunEvent::RunStarted { tests }) => assert_eq!(*tests, RunTarget::All),
        other => panic!("expected RunStarted, found {other:?}"),
    }
}

#[tokio::test]
async fn retries_report_one_terminal_state() {
    let harness = RunHarness::new(basic()).configure(|config| config.framework_options.retries = 2);
    let (stats, events) = harness.run(RunTarget::All).await;

    let t2 = node_id("a.js", &["A", "t2"]);
    let states: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            RunEvent::Test { test, state, .. } if *test == t2 => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(states, [TestState::Running, TestState::Failed]);
    assert_eq!(
        message_for(&events, &t2).as_deref(),
        Some("AssertionError: attempt 3 failed")
    );
    assert_eq!(stats.attempts, 4, "1 for t1, 3 for t2");
    assert_eq!(stats.failed, 1);

    let attempts: Vec<_> = harness
        .output
        .lines()
        .into_iter()
        .filter(|line| line.starts_with("A t2: attempt"))
        .collect();
    assert_eq!(
        attempts,
        [
            "A t2: attempt 1/3",
            "A t2: attempt 1/3 failed: AssertionError: attempt 1 failed",
            "A t2: attempt 2/3",
            "A t2: attempt 2/3 failed: AssertionError: attempt 2 failed",
            "A t2: attempt 3/3",
            "A t2: attempt 3/3 failed: AssertionError: attempt 3 failed",
        ]
    );
}

fn repeated_names() -> ScriptedFramework {
    ScriptedFramework::new().file(
        "a.js",
        vec![
            suite(&["A"]),
            test(&["A", "same"], FixtureStatus::Pass),
            test(&["A", "same"], FixtureStatus::Fail),
        ],
    )
}

#[tokio::test]
async fn repeated_test_names_are_reported_separately() {
    let harness = RunHarness::new(repeated_names())
        .configure(|config| config.framework_options.retries = 1);
    let (stats, events) = harness.run(RunTarget::All).await;

    assert_eq!(
        summarize(&events),
        [
            "run started",
            "suite a.js:A Running",
            "test a.js:A/same Running",
            "test a.js:A/same Passed",
            r"test a.js:A/same\!2 Running",
            r"test a.js:A/same\!2 Failed",
            "suite a.js:A Completed",
            "run finished",
        ]
    );
    let second = TestId::node(&file_path("a.js"), &name_path(&["A", "same"]).with_repeat(1));
    assert_eq!(
        message_for(&events, &second).as_deref(),
        Some("AssertionError: attempt 2 failed")
    );
    assert_eq!((stats.passed, stats.failed, stats.attempts), (1, 1, 3));
    assert!(
        harness
            .output
            .lines()
            .contains(&"A same (#2): attempt 2/2".to_owned()),
        "{:?}",
        harness.output.lines()
    );
}

#[tokio::test]
async fn repeated_test_name_target() {
    let harness = RunHarness::new(repeated_names());
    let second = TestId::node(&file_path("a.js"), &name_path(&["A", "same"]).with_repeat(1));
    let (stats, events) = harness.run(RunTarget::from_ids([second])).await;

    // The framework runs both tests named `same`; only the requested one is reported.
    assert_eq!(
        summarize(&events),
        [
            "run started",
            "suite a.js:A Running",
            r"test a.js:A/same\!2 Running",
            r"test a.js:A/same\!2 Failed",
            "suite a.js:A Completed",
            "run finished",
        ]
    );
    assert_eq!((stats.initial_run_count, stats.failed), (1, 1));
    assert_eq!(
        harness.framework.execute_calls()[0].filter,
        WorkerTestFilter::Only(vec![name_path(&["A", "same"])])
    );
}

#[tokio::test]
async fn flaky_test_passes_on_retry() {
    let framework = ScriptedFramework::new().file(
        "a.js",
        vec![test(&["flaky"], FixtureStatus::Flaky { pass_attempt: 2 })],
    );
    let harness = RunHarness::new(framework).configure(|config| config.framework_options.retries = 1);
    let (stats, events) = harness.run(RunTarget::All).await;

    assert_eq!(
        summarize(&events),
        [
            "run started",
            "test a.js:flaky Running",
            "test a.js:flaky Passed",
            "run finished",
        ]
    );
    assert_eq!(stats.passed, 1);
    assert_eq!(stats.attempts, 2);
    assert!(
        harness
            .output
            .lines()
            .contains(&"flaky: passed".to_owned())
    );
}

#[tokio::test]
async fn failure_kinds() {
    let framework = ScriptedFramework::new().file(
        "a.js",
        vec![
            test(&["throws"], FixtureStatus::Error),
            test(&["slow"], FixtureStatus::Timeout),
            test(&["todo"], FixtureStatus::Pending),
        ],
    );
    let harness = RunHarness::new(framework);
    let (stats, events) = harness.run(RunTarget::All).await;

    assert_eq!(
        summarize(&events),
        [
            "run started",
            "test a.js:throws Running",
            "test a.js:throws Errored",
            "test a.js:slow Running",
            "test a.js:slow Failed",
            "test a.js:todo Skipped",
            "run finished",
        ]
    );
    assert_eq!(
        message_for(&events, &node_id("a.js", &["throws"])).as_deref(),
        Some("TypeError: undefined is not a function")
    );
    assert_eq!(
        (stats.errored, stats.failed, stats.timed_out, stats.skipped),
        (1, 1, 1, 1)
    );
}

#[tokio::test]
async fn pending_test_opens_its_suite() {
    let framework = ScriptedFramework::new().file(
        "a.js",
        vec![
            suite(&["A"]),
            test(&["A", "todo"], FixtureStatus::Pending),
            test(&["A", "t2"], FixtureStatus::Pass),
        ],
    );
    let (_, events) = RunHarness::new(framework).run(RunTarget::All).await;
    assert_eq!(
        summarize(&events),
        [
            "run started",
            "suite a.js:A Running",
            "test a.js:A/todo Skipped",
            "test a.js:A/t2 Running",
            "test a.js:A/t2 Passed",
            "suite a.js:A Completed",
            "run finished",
        ]
    );
}

#[tokio::test]
async fn nested_suite_target() {
    let framework = ScriptedFramework::new().file(
        "a.js",
        vec![
            suite(&["A"]),
            suite(&["A", "B"]),
            test(&["A", "B", "t1"], FixtureStatus::Pass),
            test(&["A", "t2"], FixtureStatus::Pass),
            test(&["t3"], FixtureStatus::Pass),
        ],
    );
    let harness = RunHarness::new(framework);
    let (stats, events) = harness
        .run(RunTarget::Ids(vec![node_id("a.js", &["A"])]))
        .await;

    assert_eq!(
        summarize(&events),
        [
            "run started",
            "suite a.js:A Running",
            "suite a.js:A/B Running",
            "test a.js:A/B/t1 Running",
            "test a.js:A/B/t1 Passed",
            "suite a.js:A/B Completed",
            "test a.js:A/t2 Running",
            "test a.js:A/t2 Passed",
            "suite a.js:A Completed",
            "run finished",
        ]
    );
    assert_eq!(stats.initial_run_count, 2);
    assert_eq!(
        harness.framework.execute_calls()[0].filter,
        WorkerTestFilter::Only(vec![name_path(&["A", "B", "t1"]), name_path(&["A", "t2"])])
    );
}

#[tokio::test]
async fn extraneous_results_are_ignored() {
    let framework = ScriptedFramework::new()
        .file(
            "a.js",
            vec![
                suite(&["A"]),
                test(&["A", "t1"], FixtureStatus::Pass),
                test(&["A", "t2"], FixtureStatus::Fail),
                test(&["A", "t3"], FixtureStatus::Fail),
            ],
        )
        .ignoring_filter();
    let harness = RunHarness::new(framework).configure(|config| config.framework_options.retries = 3);
    let (stats, events) = harness
        .run(RunTarget::Ids(vec![node_id("a.js", &["A", "t2"])]))
        .await;

    assert_eq!(
        summarize(&events),
        [
            "run started",
            "suite a.js:A Running",
            "test a.js:A/t2 Running",
            "test a.js:A/t2 Failed",
            "suite a.js:A Completed",
            "run finished",
        ]
    );
    // t3 is not retried: its failure was accepted right away.
    assert_eq!(stats.attempts, 4);
    assert_eq!(
        harness.framework.execute_calls()[0].filter,
        WorkerTestFilter::Only(vec![name_path(&["A", "t2"])])
    );
}

#[tokio::test]
async fn targets_without_tests() {
    let framework = basic().broken_file("broken.js", "SyntaxError: Unexpected token");
    let harness = RunHarness::new(framework);

    for target in [
        RunTarget::Ids(vec![TestId::load_error(&file_path("broken.js"))]),
        RunTarget::Ids(vec![TestId::new("/w/test/missing.js:A/t9")]),
    ] {
        let (stats, events) = harness.run(target).await;
        assert_eq!(summarize(&events), ["run started", "run finished"]);
        assert_eq!(stats, RunStats::default());
    }
    assert!(harness.framework.execute_calls().is_empty());
}

#[tokio::test]
async fn broken_files_are_not_run() {
    let framework = basic().broken_file("broken.js", "SyntaxError: Unexpected token");
    let harness = RunHarness::new(framework);
    let (stats, _) = harness.run(RunTarget::All).await;

    assert_eq!(stats.initial_run_count, 2);
    let files: Vec<_> = harness
        .framework
        .execute_calls()
        .into_iter()
        .map(|call| call.file)
        .collect();
    assert_eq!(files, [file_path("a.js")]);
}

#[tokio::test]
async fn crash_errors_remaining_tests() {
    let framework = ScriptedFramework::new()
        .file(
            "a.js",
            vec![
                suite(&["A"]),
                test(&["A", "t1"], FixtureStatus::Pass),
                test(&["A", "t2"], FixtureStatus::Crash),
                test(&["A", "t3"], FixtureStatus::Pass),
            ],
        )
        .file("b.js", vec![test(&["t4"], FixtureStatus::Pass)]);
    let (stats, events) = RunHarness::new(framework).run(RunTarget::All).await;

    assert_eq!(
        summarize(&events),
        [
            "run started",
            "suite a.js:A Running",
            "test a.js:A/t1 Running",
            "test a.js:A/t1 Passed",
            "test a.js:A/t2 Running",
            "test a.js:A/t2 Errored",
            "test a.js:A/t3 Errored",
            "suite a.js:A Completed",
            "test b.js:t4 Running",
            "test b.js:t4 Passed",
            "run finished",
        ]
    );
    assert_eq!(
        message_for(&events, &node_id("a.js", &["A", "t3"])).as_deref(),
        Some("worker crashed")
    );
    assert_eq!((stats.passed, stats.errored), (2, 2));
}

#[tokio::test(start_paused = true)]
async fn watchdog_relaunches_remaining_tests() {
    let framework = ScriptedFramework::new().file(
        "a.js",
        vec![
            suite(&["A"]),
            test(&["A", "t1"], FixtureStatus::Pass),
            test(&["A", "t2"], FixtureStatus::Hang),
            test(&["A", "t3"], FixtureStatus::Pass),
        ],
    );
    let harness = RunHarness::new(framework).configure(|config| {
        config.framework_options.timeout = Duration::from_millis(100);
        config.watchdog_overhead = Duration::from_secs(1);
    });
    let (stats, events) = harness.run(RunTarget::All).await;

    assert_eq!(
        summarize(&events),
        [
            "run started",
            "suite a.js:A Running",
            "test a.js:A/t1 Running",
            "test a.js:A/t1 Passed",
            "test a.js:A/t2 Running",
            "test a.js:A/t2 Failed",
            "test a.js:A/t3 Running",
            "test a.js:A/t3 Passed",
            "suite a.js:A Completed",
            "run finished",
        ]
    );
    let message = message_for(&events, &node_id("a.js", &["A", "t2"])).unwrap_or_default();
    assert!(
        message.starts_with("Timeout: no result after"),
        "unexpected message {message:?}"
    );
    assert_eq!((stats.passed, stats.failed, stats.timed_out), (2, 1, 1));

    let filters: Vec<_> = harness
        .framework
        .execute_calls()
        .into_iter()
        .map(|call| call.filter)
        .collect();
    assert_eq!(
        filters,
        [
            WorkerTestFilter::All,
            WorkerTestFilter::Only(vec![name_path(&["A", "t3"])]),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn unresponsive_framework_errors_the_file() {
    let framework = ScriptedFramework::new()
        .stalled_file("a.js", vec![test(&["t1"], FixtureStatus::Pass)])
        .file("b.js", vec![test(&["t2"], FixtureStatus::Pass)]);
    let harness = RunHarness::new(framework).configure(|config| {
        config.framework_options.timeout = Duration::from_millis(100);
        config.watchdog_overhead = Duration::from_secs(1);
    });
    let (stats, events) = harness.run(RunTarget::All).await;

    assert_eq!(
        summarize(&events),
        [
            "run started",
            "test a.js:t1 Errored",
            "test b.js:t2 Running",
            "test b.js:t2 Passed",
            "run finished",
        ]
    );
    let message = message_for(&events, &node_id("a.js", &["t1"])).unwrap_or_default();
    assert!(message.contains("did not respond"), "unexpected message {message:?}");
    assert_eq!((stats.passed, stats.errored), (1, 1));
}

#[tokio::test]
async fn cancel_skips_remaining_tests() {
    let framework = ScriptedFramework::new()
        .file(
            "a.js",
            vec![
                suite(&["A"]),
                test(&["A", "t1"], FixtureStatus::Pass),
                test(&["A", "t2"], FixtureStatus::Hang),
            ],
        )
        .file("b.js", vec![test(&["t3"], FixtureStatus::Pass)]);
    // Without a timeout there is no watchdog: only cancellation ends the hang.
    let harness = RunHarness::new(framework)
        .configure(|config| config.framework_options.timeout = Duration::ZERO);
    let tree = harness.tree().await;
    let cancel = CancelToken::new();
    let orchestrator = harness.orchestrator(cancel.clone());
    let mut rx = harness.events.subscribe();

    let t2 = node_id("a.js", &["A", "t2"]);
    let mut events = Vec::new();
    let (stats, ()) = tokio::join!(orchestrator.run(&tree, RunTarget::All, &harness.config), async {
        while let Some(event) = rx.recv().await {
            let started = matches!(
                &event,
                RunEvent::Test { test, state: TestState::Running, .. } if *test == t2
            );
            events.push(event);
            if started {
                cancel.cancel();
                break;
            }
        }
    });
    events.extend(rx.drain());
    assert_well_formed(&events);

    assert_eq!(
        summarize(&events),
        [
            "run started",
            "suite a.js:A Running",
            "test a.js:A/t1 Running",
            "test a.js:A/t1 Passed",
            "test a.js:A/t2 Running",
            "test a.js:A/t2 Skipped",
            "suite a.js:A Completed",
            "test b.js:t3 Skipped",
            "run finished",
        ]
    );
    assert_eq!(message_for(&events, &t2).as_deref(), Some("Run cancelled"));
    assert!(stats.cancelled);
    assert_eq!((stats.passed, stats.skipped), (1, 2));
    assert_eq!(harness.framework.execute_calls().len(), 1, "b.js never started");
}
