// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{NodeRef, TestFile, TestTree, prune};
use crate::{
    config::AdapterConfig,
    errors::{EnumerateFileError, EnumerationError, EnumerationErrorKind, LoadError},
    framework::{DiscoveredNode, Framework, FrameworkContext},
};
use camino::{Utf8Path, Utf8PathBuf};
use futures::prelude::*;
use indexmap::IndexMap;
use std::{collections::HashMap, time::Duration};
use testadapter_metadata::{NamePath, TestId, TestInfo, TestNode, TestSuiteInfo, worker::NodeKind};
use tracing::{debug, info, warn};

/// The label of the synthetic node standing for a file that failed to enumerate.
pub const LOAD_ERROR_LABEL: &str = "Error loading tests";

/// Builds [`TestTree`]s by enumerating files through a [`Framework`].
pub struct TestTreeBuilder<'a> {
    framework: &'a dyn Framework,
}

impl<'a> TestTreeBuilder<'a> {
    /// Creates a new builder.
    pub fn new(framework: &'a dyn Framework) -> Self {
        Self { framework }
    }

    /// Builds a tree from the files in `config`.
    ///
    /// Fails only if the framework itself can't be loaded. A file that fails to enumerate is
    /// represented by an errored node under that file's suite.
    pub async fn build(&self, config: &AdapterConfig) -> Result<TestTree, LoadError> {
        let cx = FrameworkContext::from_config(config);
        debug!("preparing framework at `{}`", cx.framework_path);
        self.framework.prepare(&cx).await?;

        let files = if config.prune_files {
            prune::retain_declaring(&config.files, config.framework_options.ui).await
        } else {
            config.files.clone()
        };

        let framework = self.framework;
        let cx = &cx;
        let bound = config.enumeration_bound();
        // `buffered` runs up to `enumeration_jobs` files at once but yields results in order.
        let enumerated: Vec<_> = stream::iter(&files)
            .map(|file| enumerate_file(framework, cx, file, bound))
            .buffered(config.enumeration_jobs.max(1))
            .try_collect()
            .await?;

        let mut assembler = TreeAssembler::new(&config.cwd);
        for (file, result) in enumerated {
            assembler.add(file, result);
        }
        let tree = assembler.finish(&config.label);
        info!(
            "loaded {} tests from {} files",
            tree.test_count(),
            tree.files().len()
        );
        Ok(tree)
    }
}

type FileResult<'f> = (&'f Utf8Path, Result<Vec<DiscoveredNode>, EnumerationError>);

async fn enumerate_file<'f>(
    framework: &dyn Framework,
    cx: &FrameworkContext,
    file: &'f Utf8PathBuf,
    bound: Duration,
) -> Result<FileResult<'f>, LoadError> {
    debug!("enumerating `{file}`");
    // Dropping the enumeration future stops the framework for this file.
    match tokio::time::timeout(bound, framework.enumerate(cx, file)).await {
        Ok(Ok(nodes)) => Ok((file, Ok(nodes))),
        Ok(Err(EnumerateFileError::File(error))) => Ok((file, Err(error))),
        Ok(Err(EnumerateFileError::Fatal(error))) => Err(error),
        Err(_) => Ok((
            file,
            Err(EnumerationError::new(
                file.clone(),
                EnumerationErrorKind::TimedOut { waited: bound },
            )),
        )),
    }
}

/// Collects enumeration results and turns them into a tree.
struct TreeAssembler<'c> {
    cwd: &'c Utf8Path,
    files: Vec<FileAssembly>,
    positions: HashMap<Utf8PathBuf, usize>,
}

struct FileAssembly {
    path: Utf8PathBuf,
    nodes: IndexMap<NamePath, Declaration>,
    error: Option<String>,
}

#[derive(Copy, Clone)]
struct Declaration {
    kind: NodeKind,
    line: Option<u32>,
}

impl<'c> TreeAssembler<'c> {
    fn new(cwd: &'c Utf8Path) -> Self {
        Self {
            cwd,
            files: Vec::new(),
            positions: HashMap::new(),
        }
    }

    fn add(&mut self, file: &Utf8Path, result: Result<Vec<DiscoveredNode>, EnumerationError>) {
        // A file listed twice ends up as one suite, with the declarations of both passes merged.
        let index = *self.positions.entry(file.to_owned()).or_insert_with(|| {
            self.files.push(FileAssembly {
                path: file.to_owned(),
                nodes: IndexMap::new(),
                error: None,
            });
            self.files.len() - 1
        });
        let assembly = &mut self.files[index];

        match result {
            Ok(nodes) => {
                // Tests declared again under the same names in one pass are separate tests.
                let mut seen: HashMap<NamePath, usize> = HashMap::new();
                for mut node in nodes {
                    if node.kind == NodeKind::Test {
                        let count = seen.entry(node.name_path.clone()).or_default();
                        if *count > 0 {
                            debug!(
                                "`{}` in `{file}` is declared {} times",
                                node.name_path,
                                *count + 1
                            );
                            node.name_path = node.name_path.with_repeat(*count);
                        }
                        *count += 1;
                    }
                    assembly.declare(node);
                }
            }
            Err(error) => {
                warn!("{}", crate::errors::DisplayErrorChain::new(&error));
                assembly.error.get_or_insert_with(|| error.node_message());
            }
        }
    }

    fn finish(self, label: &str) -> TestTree {
        let mut root = TestSuiteInfo::new(TestId::root(), label);
        let mut index = HashMap::new();
        index.insert(TestId::root(), NodeRef::Root);

        let mut files = Vec::with_capacity(self.files.len());
        for (file_index, assembly) in self.files.into_iter().enumerate() {
            let label = assembly
                .path
                .strip_prefix(self.cwd)
                .unwrap_or(&assembly.path)
                .to_string();
            let (suite, file) = assembly.build(file_index, label, &mut index);
            root.children.push(TestNode::Suite(suite));
            files.push(file);
        }

        TestTree {
            root,
            files,
            index,
        }
    }
}

impl FileAssembly {
    fn declare(&mut self, node: DiscoveredNode) {
        if node.name_path.is_empty() {
            warn!("ignoring node without a name in `{}`", self.path);
            return;
        }

        // Frameworks report suites before their contents, but make sure of it.
        for ancestor in node.name_path.ancestors() {
            self.nodes.entry(ancestor).or_insert(Declaration {
                kind: NodeKind::Suite,
                line: None,
            });
        }

        match self.nodes.get_mut(&node.name_path) {
            None => {
                self.nodes.insert(
                    node.name_path,
                    Declaration {
                        kind: node.kind,
                        line: node.line,
                    },
                );
            }
            Some(existing) if existing.kind == NodeKind::Suite && node.kind == NodeKind::Suite => {
                debug!(
                    "merging duplicate suite `{}` in `{}`",
                    node.name_path, self.path
                );
                existing.line = existing.line.or(node.line);
            }
            Some(existing) if existing.kind == node.kind => {
                // The same file enumerated twice.
                debug!(
                    "merging duplicate test `{}` in `{}`",
                    node.name_path, self.path
                );
                existing.line = existing.line.or(node.line);
            }
            Some(_) => {
                warn!(
                    "ignoring `{}` in `{}`: a suite and a test share these names",
                    node.name_path, self.path
                );
            }
        }
    }

    fn build(
        self,
        file_index: usize,
        label: String,
        index: &mut HashMap<TestId, NodeRef>,
    ) -> (TestSuiteInfo, TestFile) {
        let file_id = TestId::file(&self.path);
        index.insert(file_id.clone(), NodeRef::File(file_index));

        let mut suite = TestSuiteInfo::new(file_id, label);
        suite.file = Some(self.path.clone());

        let mut file = TestFile {
            path: self.path.clone(),
            suites: Vec::new(),
            tests: Vec::new(),
            error: self.error.clone(),
        };

        let mut children: HashMap<Option<NamePath>, Vec<NamePath>> = HashMap::new();
        for (name_path, declaration) in &self.nodes {
            children
                .entry(name_path.parent())
                .or_default()
                .push(name_path.clone());
            match declaration.kind {
                NodeKind::Suite => file.suites.push(name_path.clone()),
                NodeKind::Test => file.tests.push(name_path.clone()),
            }
        }

        suite.children = self.build_children(None, &children, file_index, index);

        if let Some(message) = &self.error {
            let id = TestId::load_error(&self.path);
            index.insert(id.clone(), NodeRef::LoadError(file_index));
            let mut error = TestInfo::new(id, LOAD_ERROR_LABEL);
            error.file = Some(self.path.clone());
            error.errored = true;
            error.message = Some(message.clone());
            suite.children.push(TestNode::Test(error));
        }

        (suite, file)
    }

    fn build_children(
        &self,
        parent: Option<NamePath>,
        children: &HashMap<Option<NamePath>, Vec<NamePath>>,
        file_index: usize,
        index: &mut HashMap<TestId, NodeRef>,
    ) -> Vec<TestNode> {
        let Some(names) = children.get(&parent) else {
            return Vec::new();
        };

        names
            .iter()
            .filter_map(|name_path| {
                let declaration = self.nodes.get(name_path)?;
                let id = TestId::node(&self.path, name_path);
                let label = name_path.name().unwrap_or_default();
                let node = match declaration.kind {
                    NodeKind::Suite => {
                        index.insert(id.clone(), NodeRef::Suite(file_index, name_path.clone()));
                        let mut suite = TestSuiteInfo::new(id, label);
                        suite.file = Some(self.path.clone());
                        suite.line = declaration.line;
                        suite.children = self.build_children(
                            Some(name_path.clone()),
                            children,
                            file_index,
                            index,
                        );
                        TestNode::Suite(suite)
                    }
                    NodeKind::Test => {
                        index.insert(id.clone(), NodeRef::Test(file_index, name_path.clone()));
                        let mut test = TestInfo::new(id, label);
                        test.file = Some(self.path.clone());
                        test.line = declaration.line;
                        TestNode::Test(test)
                    }
                };
                Some(node)
            })
            .collect()
    }
}
