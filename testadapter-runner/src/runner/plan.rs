// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::list::{NodeRef, TestFile, TestTree};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexSet;
use std::collections::{BTreeMap, HashSet};
use testadapter_metadata::{
    NamePath, RunTarget, TestId,
    worker::{NodeKind, WorkerTestFilter},
};
use tracing::{debug, warn};

/// The files a run executes, and what to report for each of them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunPlan {
    files: Vec<FilePlan>,
}

impl RunPlan {
    /// Resolves `target` against `tree`.
    ///
    /// Unknown identifiers are ignored with a warning. Files that failed to enumerate are never
    /// part of a plan.
    pub fn new(tree: &TestTree, target: &RunTarget) -> Self {
        let ids = match target {
            RunTarget::All => return Self::whole_tree(tree),
            RunTarget::Ids(ids) => ids,
        };

        // Keyed by index into the tree's files, so that plans follow load order.
        let mut selections: BTreeMap<usize, Selection> = BTreeMap::new();
        for id in ids {
            let Some(node) = tree.lookup(id) else {
                warn!("ignoring unknown test id `{id}`");
                continue;
            };
            match node {
                NodeRef::Root => return Self::whole_tree(tree),
                NodeRef::File(index) => {
                    *selections.entry(*index).or_default() = Selection::Whole;
                }
                NodeRef::Suite(index, name_path) | NodeRef::Test(index, name_path) => {
                    match selections.entry(*index).or_default() {
                        Selection::Whole => {}
                        Selection::Nodes(nodes) => {
                            nodes.insert(name_path.clone());
                        }
                    }
                }
                NodeRef::LoadError(_) => {
                    debug!("ignoring `{id}`: the file failed to load and can't be run");
                }
            }
        }

        let files = selections
            .into_iter()
            .filter_map(|(index, selection)| {
                let file = &tree.files()[index];
                if !file.is_runnable() {
                    debug!("not running `{}`: the file failed to load", file.path);
                    return None;
                }
                Some(match selection {
                    Selection::Whole => FilePlan::whole(file),
                    Selection::Nodes(nodes) => FilePlan::subset(file, &nodes),
                })
            })
            .filter(|plan| !plan.tests.is_empty())
            .collect();
        Self { files }
    }

    fn whole_tree(tree: &TestTree) -> Self {
        let files = tree
            .files()
            .iter()
            .filter(|file| file.is_runnable() && !file.tests.is_empty())
            .map(FilePlan::whole)
            .collect();
        Self { files }
    }

    /// Returns the files to run, in order.
    pub fn files(&self) -> &[FilePlan] {
        &self.files
    }

    /// Returns the number of tests the run is expected to report.
    pub fn test_count(&self) -> usize {
        self.files.iter().map(|file| file.tests.len()).sum()
    }
}

#[derive(Debug)]
enum Selection {
    Whole,
    Nodes(HashSet<NamePath>),
}

impl Default for Selection {
    fn default() -> Self {
        Self::Nodes(HashSet::new())
    }
}

/// How much of a file a run asked for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileScope {
    /// The whole file, because the root or the file's suite was requested.
    Whole,

    /// Some suites or tests in the file.
    Subset,
}

/// One file in a [`RunPlan`].
///
/// Frameworks may report more than what was asked for, so every reported suite and test goes
/// through [`FilePlan::accepts`] first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilePlan {
    file: Utf8PathBuf,
    scope: FileScope,
    tests: IndexSet<NamePath>,
    suites: HashSet<NamePath>,
}

impl FilePlan {
    fn whole(file: &TestFile) -> Self {
        Self {
            file: file.path.clone(),
            scope: FileScope::Whole,
            tests: file.tests.iter().cloned().collect(),
            suites: file.suites.iter().cloned().collect(),
        }
    }

    fn subset(file: &TestFile, requested: &HashSet<NamePath>) -> Self {
        let covered = |name_path: &NamePath| {
            requested.contains(name_path)
                || name_path
                    .ancestors()
                    .any(|ancestor| requested.contains(&ancestor))
        };
        let tests: IndexSet<_> = file
            .tests
            .iter()
            .filter(|name_path| covered(name_path))
            .cloned()
            .collect();
        let suites = tests.iter().flat_map(|test| test.ancestors()).collect();
        Self {
            file: file.path.clone(),
            scope: FileScope::Subset,
            tests,
            suites,
        }
    }

    /// Returns the file.
    pub fn file(&self) -> &Utf8Path {
        &self.file
    }

    /// Returns how much of the file was requested.
    pub fn scope(&self) -> FileScope {
        self.scope
    }

    /// Returns the tests to report, in declaration order.
    pub fn tests(&self) -> impl ExactSizeIterator<Item = &NamePath> {
        self.tests.iter()
    }

    /// Returns the identifier of a node in this file.
    pub fn node_id(&self, name_path: &NamePath) -> TestId {
        TestId::node(&self.file, name_path)
    }

    /// Returns true if events about this node are reported for this run.
    pub fn accepts(&self, kind: NodeKind, name_path: &NamePath) -> bool {
        match kind {
            NodeKind::Suite => self.suites.contains(name_path),
            NodeKind::Test => self.tests.contains(name_path),
        }
    }

    /// Returns the filter to send to the framework for the given tests.
    pub(crate) fn filter_for<'a>(
        &self,
        remaining: impl IntoIterator<Item = &'a NamePath>,
    ) -> WorkerTestFilter {
        let remaining: Vec<_> = remaining.into_iter().collect();
        if self.scope == FileScope::Whole && remaining.len() == self.tests.len() {
            return WorkerTestFilter::All;
        }
        // Frameworks select by name, which covers every repeat of a name.
        let names: IndexSet<_> = remaining
            .into_iter()
            .map(NamePath::first_declaration)
            .collect();
        WorkerTestFilter::Only(names.into_iter().collect())
    }
}
