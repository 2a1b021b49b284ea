// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::TestId;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// A node in a test tree: either a suite or a test.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TestNode {
    /// A named group of tests and nested suites.
    Suite(TestSuiteInfo),

    /// A single test.
    Test(TestInfo),
}

impl TestNode {
    /// Returns the identifier of this node.
    pub fn id(&self) -> &TestId {
        match self {
            Self::Suite(suite) => &suite.id,
            Self::Test(test) => &test.id,
        }
    }

    /// Returns the human-readable name of this node.
    pub fn label(&self) -> &str {
        match self {
            Self::Suite(suite) => &suite.label,
            Self::Test(test) => &test.label,
        }
    }

    /// Returns the children of this node. Tests never have children.
    pub fn children(&self) -> &[TestNode] {
        match self {
            Self::Suite(suite) => &suite.children,
            Self::Test(_) => &[],
        }
    }

    /// Returns true if this node is a suite.
    pub fn is_suite(&self) -> bool {
        matches!(self, Self::Suite(_))
    }

    /// Iterates over this node and all its descendants in declaration order.
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }
}

/// Information about a suite.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSuiteInfo {
    /// The identifier of the suite.
    pub id: TestId,

    /// The human-readable name of the suite.
    pub label: String,

    /// The file the suite was declared in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<Utf8PathBuf>,

    /// The zero-based line the suite was declared on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,

    /// Nested suites and tests, in declaration order.
    pub children: Vec<TestNode>,
}

impl TestSuiteInfo {
    /// Creates a new, empty suite.
    pub fn new(id: TestId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            file: None,
            line: None,
            children: Vec::new(),
        }
    }

    /// Iterates over the descendants of this suite (not including the suite itself) in
    /// declaration order.
    pub fn descendants(&self) -> Walk<'_> {
        Walk {
            stack: self.children.iter().rev().collect(),
        }
    }

    /// Returns the number of tests in this suite, at any depth.
    pub fn test_count(&self) -> usize {
        self.descendants().filter(|node| !node.is_suite()).count()
    }

    /// Returns the number of suites nested in this suite, at any depth.
    pub fn suite_count(&self) -> usize {
        self.descendants().filter(|node| node.is_suite()).count()
    }

    /// Looks up a descendant by identifier.
    pub fn find(&self, id: &TestId) -> Option<&TestNode> {
        self.descendants().find(|node| node.id() == id)
    }
}

/// Information about a test.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestInfo {
    /// The identifier of the test.
    pub id: TestId,

    /// The human-readable name of the test.
    pub label: String,

    /// The file the test was declared in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<Utf8PathBuf>,

    /// The zero-based line the test was declared on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,

    /// True if this node stands for an error rather than a runnable test.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub errored: bool,

    /// A message to show alongside the node, typically the error for errored nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TestInfo {
    /// Creates a new test.
    pub fn new(id: TestId, label: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            file: None,
            line: None,
            errored: false,
            message: None,
        }
    }
}

/// A pre-order iterator over a test tree, returned by [`TestNode::walk`] and
/// [`TestSuiteInfo::descendants`].
#[derive(Clone, Debug)]
pub struct Walk<'a> {
    stack: Vec<&'a TestNode>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a TestNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children().iter().rev());
        Some(node)
    }
}
