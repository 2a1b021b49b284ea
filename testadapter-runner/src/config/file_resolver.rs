// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::GlobError;
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use globset::{Glob, GlobBuilder, GlobMatcher};
use tracing::warn;
use walkdir::WalkDir;

/// Expands test file globs into absolute paths.
#[derive(Clone, Debug)]
pub struct GlobResolver {
    matcher: GlobMatcher,
    glob: String,
}

impl GlobResolver {
    /// Compiles `glob`. Relative globs are resolved against the base directory passed to
    /// [`Self::expand`].
    pub fn new(glob: &str) -> Result<Self, GlobError> {
        let matcher = build_glob(glob)?.compile_matcher();
        Ok(Self {
            matcher,
            glob: glob.to_owned(),
        })
    }

    /// Compiles `glob` and expands it against `base` in one step.
    pub fn expand(base: &Utf8Path, glob: &str) -> Result<Vec<Utf8PathBuf>, GlobError> {
        Ok(Self::new(glob)?.files(base))
    }

    /// Returns every file under `base` that matches, sorted.
    ///
    /// Directories that can't be read are skipped with a warning.
    pub fn files(&self, base: &Utf8Path) -> Vec<Utf8PathBuf> {
        let root = base.join(literal_prefix(&self.glob));
        let mut files: Vec<_> = WalkDir::new(&root)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(error) => {
                    // A missing root simply means no matches.
                    if error.depth() > 0 {
                        warn!("skipping unreadable entry while expanding `{}`: {error}", self.glob);
                    }
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| Utf8PathBuf::from_path_buf(entry.into_path()).ok())
            .filter(|path| self.matches(base, path))
            .collect();
        files.sort_unstable();
        files
    }

    /// Returns true if `path` matches this glob when resolved against `base`.
    pub fn matches(&self, base: &Utf8Path, path: &Utf8Path) -> bool {
        if Utf8Path::new(&self.glob).is_absolute() {
            self.matcher.is_match(path)
        } else {
            path.strip_prefix(base)
                .is_ok_and(|relative| self.matcher.is_match(relative))
        }
    }
}

fn build_glob(glob: &str) -> Result<Glob, GlobError> {
    let pattern = glob.strip_prefix("./").unwrap_or(glob);
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|err| GlobError::new(glob, err))
}

/// Returns the leading components of `glob` that contain no glob syntax. Walking starts there.
fn literal_prefix(glob: &str) -> Utf8PathBuf {
    let glob = glob.strip_prefix("./").unwrap_or(glob);
    let components: Vec<_> = Utf8Path::new(glob).components().collect();
    let mut prefix = Utf8PathBuf::new();
    // The last component names files, so it never becomes part of the prefix.
    for component in components.iter().take(components.len().saturating_sub(1)) {
        let literal = match component {
            Utf8Component::Normal(segment) => !segment.contains(['*', '?', '[', ']', '{', '}']),
            _ => true,
        };
        if !literal {
            break;
        }
        prefix.push(component.as_str());
    }
    prefix
}
