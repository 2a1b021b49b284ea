// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, eyre};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use testadapter_metadata::{LoadEvent, TestId, TestNode, TestSuiteInfo};
use testadapter_runner::{
    adapter::TestAdapter,
    config::StaticConfigProvider,
    list::LOAD_ERROR_LABEL,
};

fn adapter(framework: ScriptedFramework) -> (TestAdapter, Arc<ScriptedFramework>) {
    test_init();
    let framework = Arc::new(framework);
    let config = Arc::new(StaticConfigProvider::new(framework.config()));
    (TestAdapter::new(config, framework.clone()), framework)
}

fn loaded_suite(events: &[LoadEvent]) -> Result<&TestSuiteInfo> {
    match events {
        [
            LoadEvent::Started,
            LoadEvent::Finished {
                suite: Some(suite),
                error_message: None,
            },
        ] => Ok(suite),
        other => Err(eyre!("unexpected load events: {other:?}")),
    }
}

fn labels(nodes: &[TestNode]) -> Vec<&str> {
    nodes.iter().map(TestNode::label).collect()
}

#[tokio::test]
async fn load_builds_tree() -> Result<()> {
    let (adapter, _) = adapter(
        ScriptedFramework::new()
            .file(
                "a.js",
                vec![
                    suite(&["A"]),
                    test(&["A", "t1"], FixtureStatus::Pass),
                    suite(&["A", "B"]),
                    test(&["A", "B", "t2"], FixtureStatus::Pass),
                ],
            )
            .file("b.js", vec![test(&["t3"], FixtureStatus::Pass)]),
    );
    let mut rx = adapter.load_events().subscribe();
    adapter.load().await?;

    let events = rx.drain();
    let root = loaded_suite(&events)?;
    assert_eq!(root.id, TestId::root());
    assert_eq!(labels(&root.children), ["test/a.js", "test/b.js"]);

    let a = &root.children[0];
    assert_eq!(a.id(), &TestId::file(&file_path("a.js")));
    assert_eq!(labels(a.children()), ["A"]);
    assert_eq!(labels(a.children()[0].children()), ["t1", "B"]);
    assert_eq!(root.test_count(), 3);

    let tree = adapter.tree().ok_or_else(|| eyre!("tree is cached"))?;
    assert_eq!(tree.root(), root);
    Ok(())
}

#[tokio::test]
async fn reload_is_identical() -> Result<()> {
    let (adapter, _) = adapter(
        ScriptedFramework::new().file(
            "a.js",
            vec![suite(&["A"]), test(&["A", "t1"], FixtureStatus::Pass)],
        ),
    );
    let mut rx = adapter.load_events().subscribe();
    adapter.load().await?;
    let first = loaded_suite(&rx.drain())?.clone();
    adapter.load().await?;
    let second = loaded_suite(&rx.drain())?.clone();
    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn broken_file_gets_error_node() -> Result<()> {
    let (adapter, _) = adapter(
        ScriptedFramework::new()
            .file("a.js", vec![test(&["t1"], FixtureStatus::Pass)])
            .broken_file("broken.js", "SyntaxError: Unexpected token"),
    );
    let mut rx = adapter.load_events().subscribe();
    adapter.load().await?;

    let events = rx.drain();
    let root = loaded_suite(&events)?;
    assert_eq!(labels(&root.children), ["test/a.js", "test/broken.js"]);

    let TestNode::Test(error) = &root.children[1].children()[0] else {
        return Err(eyre!("expected an error node"));
    };
    assert_eq!(error.id, TestId::load_error(&file_path("broken.js")));
    assert_eq!(error.label, LOAD_ERROR_LABEL);
    assert!(error.errored);
    assert_eq!(
        error.message.as_deref(),
        Some("SyntaxError: Unexpected token")
    );
    Ok(())
}

#[tokio::test]
async fn repeated_test_names_are_kept() -> Result<()> {
    let (adapter, _) = adapter(ScriptedFramework::new().file(
        "a.js",
        vec![
            suite(&["A"]),
            test(&["A", "same"], FixtureStatus::Pass),
            test(&["A", "same"], FixtureStatus::Fail),
        ],
    ));
    let mut rx = adapter.load_events().subscribe();
    adapter.load().await?;

    let events = rx.drain();
    let root = loaded_suite(&events)?;
    assert_eq!(root.test_count(), 2);
    let suite = &root.children[0].children()[0];
    assert_eq!(labels(suite.children()), ["same", "same"]);
    let ids: Vec<_> = suite.children().iter().map(TestNode::id).collect();
    assert_eq!(
        ids,
        [
            &node_id("a.js", &["A", "same"]),
            &TestId::node(&file_path("a.js"), &name_path(&["A", "same"]).with_repeat(1)),
        ]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn hung_enumeration_is_isolated() -> Result<()> {
    let (adapter, _) = adapter(
        ScriptedFramework::new()
            .hanging_file("hang.js")
            .file("a.js", vec![test(&["t1"], FixtureStatus::Pass)]),
    );
    let mut rx = adapter.load_events().subscribe();
    adapter.load().await?;

    let events = rx.drain();
    let root = loaded_suite(&events)?;
    assert_eq!(labels(&root.children), ["test/hang.js", "test/a.js"]);
    let TestNode::Test(error) = &root.children[0].children()[0] else {
        return Err(eyre!("expected an error node"));
    };
    assert_eq!(error.id, TestId::load_error(&file_path("hang.js")));
    let message = error.message.as_deref().unwrap_or_default();
    assert!(
        message.starts_with("Timeout: no tests enumerated after"),
        "unexpected message {message:?}"
    );

    // The adapter isn't left busy.
    adapter.load().await?;
    assert_eq!(loaded_suite(&rx.drain())?.test_count(), 2);
    Ok(())
}

#[tokio::test]
async fn fatal_error_clears_tree() -> Result<()> {
    let (adapter, framework) = adapter(
        ScriptedFramework::new().file("a.js", vec![test(&["t1"], FixtureStatus::Pass)]),
    );
    adapter.load().await?;
    assert!(adapter.tree().is_some());

    framework.set_fail_prepare(true);
    let mut rx = adapter.load_events().subscribe();
    adapter.load().await?;
    assert_eq!(
        rx.drain(),
        [
            LoadEvent::Started,
            LoadEvent::failed(
                "test framework not found at `/w/node_modules/.bin/testadapter-worker`"
            ),
        ]
    );
    assert!(adapter.tree().is_none(), "failed load clears the tree");

    framework.set_fail_prepare(false);
    adapter.load().await?;
    assert!(adapter.tree().is_some(), "next load recovers");
    Ok(())
}

#[tokio::test]
async fn invalid_config_fails_load() -> Result<()> {
    test_init();
    let framework = Arc::new(ScriptedFramework::new());
    let mut config = framework.config();
    config.cwd = "relative".into();
    let adapter = TestAdapter::new(Arc::new(StaticConfigProvider::new(config)), framework);

    let mut rx = adapter.load_events().subscribe();
    adapter.load().await?;
    assert_eq!(
        rx.drain(),
        [
            LoadEvent::Started,
            LoadEvent::failed("working directory `relative` is not an absolute path"),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn empty_file_list_loads_empty_tree() -> Result<()> {
    let (adapter, _) = adapter(ScriptedFramework::new());
    let mut rx = adapter.load_events().subscribe();
    adapter.load().await?;
    let events = rx.drain();
    let root = loaded_suite(&events)?;
    assert!(root.children.is_empty());
    Ok(())
}
