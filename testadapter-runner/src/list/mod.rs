// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test trees: building them from a framework, and looking things up in them.

mod prune;
mod tree_builder;

pub use tree_builder::*;

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use testadapter_metadata::{NamePath, TestId, TestSuiteInfo};

/// A loaded test tree, along with the indexes needed to run parts of it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestTree {
    root: TestSuiteInfo,
    files: Vec<TestFile>,
    index: HashMap<TestId, NodeRef>,
}

impl TestTree {
    /// Returns the root suite, as sent to hosts.
    pub fn root(&self) -> &TestSuiteInfo {
        &self.root
    }

    /// Returns the files in the tree, in load order, each at most once.
    pub fn files(&self) -> &[TestFile] {
        &self.files
    }

    /// Looks up a file by path.
    pub fn file(&self, path: &Utf8Path) -> Option<&TestFile> {
        self.files.iter().find(|file| file.path == path)
    }

    /// Returns true if `path` is one of the loaded files.
    pub fn contains_file(&self, path: &Utf8Path) -> bool {
        self.file(path).is_some()
    }

    /// Looks up what an identifier refers to.
    pub fn lookup(&self, id: &TestId) -> Option<&NodeRef> {
        self.index.get(id)
    }

    /// Returns the number of runnable tests in the tree.
    pub fn test_count(&self) -> usize {
        self.files.iter().map(|file| file.tests.len()).sum()
    }

    /// Returns true if the tree has no files.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// A file in a [`TestTree`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestFile {
    /// The absolute path of the file.
    pub path: Utf8PathBuf,

    /// The suites declared in the file, in declaration order.
    pub suites: Vec<NamePath>,

    /// The tests declared in the file, in declaration order.
    pub tests: Vec<NamePath>,

    /// Set if enumerating the file failed. Such files are never run.
    pub error: Option<String>,
}

impl TestFile {
    /// Returns the identifier of the suite standing for the whole file.
    pub fn id(&self) -> TestId {
        TestId::file(&self.path)
    }

    /// Returns the identifier of a node declared in this file.
    pub fn node_id(&self, name_path: &NamePath) -> TestId {
        TestId::node(&self.path, name_path)
    }

    /// Returns true if the file can be run.
    pub fn is_runnable(&self) -> bool {
        self.error.is_none()
    }
}

/// What a [`TestId`] refers to within a [`TestTree`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeRef {
    /// The root suite.
    Root,

    /// The suite for a whole file. Holds an index into [`TestTree::files`].
    File(usize),

    /// A declared suite.
    Suite(usize, NamePath),

    /// A declared test.
    Test(usize, NamePath),

    /// The synthetic node for a file that failed to enumerate.
    LoadError(usize),
}

impl NodeRef {
    /// Returns the index of the file this node belongs to, if any.
    pub fn file_index(&self) -> Option<usize> {
        match self {
            Self::Root => None,
            Self::File(index)
            | Self::Suite(index, _)
            | Self::Test(index, _)
            | Self::LoadError(index) => Some(*index),
        }
    }
}
