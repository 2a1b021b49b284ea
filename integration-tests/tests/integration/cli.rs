// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::Result;
use pretty_assertions::assert_eq;
use testadapter_metadata::{LoadEvent, RunEvent, TestAdapterExitCode, TestState};

#[test]
fn list_human() {
    let workspace = sample_workspace();
    let output = testadapter_cli(&workspace).args(["list"]).output();

    let stdout = output.stdout_as_str();
    let lines: Vec<_> = stdout.lines().collect();
    assert_eq!(
        lines,
        [
            "test/broken.js",
            "    Error loading tests: SyntaxError: Unexpected token '}' (3:4)",
            "test/math.js",
            "    math",
            "        adds",
            "        subtracts",
            "        division",
            "            divides",
            "test/network.js",
            "    network",
            "        reconnects",
            "        streams",
            "5 tests in 3 files (1 failed to load)",
        ],
        "{output}"
    );
}

#[test]
fn list_json() -> Result<()> {
    let workspace = sample_workspace();
    let output = testadapter_cli(&workspace)
        .args(["list", "--message-format", "json"])
        .output();

    let events: Vec<LoadEvent> = output.json_lines()?;
    assert_eq!(events.len(), 2, "{output}");
    assert_eq!(events[0], LoadEvent::Started);
    let LoadEvent::Finished {
        suite: Some(root), ..
    } = &events[1]
    else {
        panic!("load failed: {output}");
    };
    assert_eq!(root.label, "Tests");
    assert_eq!(root.children.len(), 3);
    Ok(())
}

#[test]
fn run_all_reports_failures() -> Result<()> {
    let workspace = sample_workspace();
    let output = testadapter_cli(&workspace)
        .args(["run", "--message-format", "json"])
        .unchecked(true)
        .output();
    assert_eq!(
        output.exit_status.code(),
        Some(TestAdapterExitCode::TEST_RUN_FAILED),
        "{output}"
    );

    let events: Vec<RunEvent> = output.json_lines()?;
    let Some(RunEvent::RunFinished { stats, .. }) = events.last() else {
        panic!("run did not finish: {output}");
    };
    assert_eq!(
        (stats.passed, stats.failed, stats.skipped),
        (3, 1, 1),
        "{output}"
    );

    // Every attempt is logged to stderr.
    let stderr = output.stderr_as_str();
    assert!(
        stderr.contains("math subtracts: attempt 2/2 failed: AssertionError: attempt 2 failed"),
        "{output}"
    );
    Ok(())
}

#[test]
fn run_selected_tests() -> Result<()> {
    let workspace = sample_workspace();
    let math = workspace.test_file("math.js");
    let adds = node_id(&math, &["math", "adds"]);
    let divides = node_id(&math, &["math", "division", "divides"]);
    let output = testadapter_cli(&workspace)
        .args(["run", "--message-format", "json", adds.as_str(), divides.as_str()])
        .output();

    let events: Vec<RunEvent> = output.json_lines()?;
    let finished: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            RunEvent::Test { test, state, .. } if state.is_terminal() => Some((test, *state)),
            _ => None,
        })
        .collect();
    assert_eq!(
        finished,
        [(&adds, TestState::Passed), (&divides, TestState::Passed)],
        "{output}"
    );
    Ok(())
}

#[test]
fn run_human_output() {
    let workspace = sample_workspace();
    let math = workspace.test_file("math.js");
    let subtracts = node_id(&math, &["math", "subtracts"]);
    let output = testadapter_cli(&workspace)
        .args(["run", subtracts.as_str()])
        .unchecked(true)
        .output();

    let stdout = output.stdout_as_str();
    let lines: Vec<_> = stdout.lines().collect();
    assert_eq!(lines[0], "    Starting 1 selected node", "{output}");
    assert_eq!(lines[1], "        FAIL test/math.js > math > subtracts", "{output}");
    assert_eq!(lines[2], "             AssertionError: attempt 2 failed", "{output}");
    assert!(
        lines[3].starts_with("     Summary [") && lines[3].ends_with("1 test run: 0 passed, 1 failed"),
        "{output}"
    );
}

#[test]
fn no_tests_to_run() {
    let workspace = sample_workspace();
    let output = testadapter_cli(&workspace)
        .args(["run", "/nowhere/test/missing.js:nothing"])
        .unchecked(true)
        .output();
    assert_eq!(
        output.exit_status.code(),
        Some(TestAdapterExitCode::NO_TESTS_RUN),
        "{output}"
    );
}

#[test]
fn debug_without_debugger() {
    let workspace = sample_workspace();
    let output = testadapter_cli(&workspace)
        .args(["run", "--debug"])
        .unchecked(true)
        .output();
    assert_eq!(
        output.exit_status.code(),
        Some(TestAdapterExitCode::DEBUG_START_FAILED),
        "{output}"
    );
    assert!(
        output
            .stderr_as_str()
            .contains("debugger did not start on port 9229"),
        "{output}"
    );
}

#[test]
fn missing_worker_fails_load() {
    let workspace = integration_tests::temp_workspace::TempWorkspace::new("missing-worker")
        .expect("created workspace");
    let output = testadapter_cli(&workspace)
        .args(["list"])
        .unchecked(true)
        .output();
    assert_eq!(
        output.exit_status.code(),
        Some(TestAdapterExitCode::LOAD_FAILED),
        "{output}"
    );
    assert!(
        output.stderr_as_str().contains("test framework not found"),
        "{output}"
    );
}

#[test]
fn invalid_settings() {
    let workspace = sample_workspace()
        .with_settings("[debug]\nport = \"many\"")
        .expect("wrote settings");
    let output = testadapter_cli(&workspace)
        .args(["list"])
        .unchecked(true)
        .output();
    assert_eq!(
        output.exit_status.code(),
        Some(TestAdapterExitCode::SETUP_ERROR),
        "{output}"
    );
}

#[test]
fn missing_workspace() {
    let workspace = sample_workspace();
    let output = testadapter_cli(&workspace)
        .env("TESTADAPTER_WORKSPACE", workspace.root().join("nonexistent").as_str())
        .args(["list"])
        .unchecked(true)
        .output();
    assert_eq!(
        output.exit_status.code(),
        Some(TestAdapterExitCode::SETUP_ERROR),
        "{output}"
    );
    assert!(output.stderr_as_str().contains("is not a directory"), "{output}");
}
