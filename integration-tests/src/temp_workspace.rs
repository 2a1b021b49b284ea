// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::{Context, Result};
use std::fmt::Write as _;
use walkdir::WalkDir;

/// Returns the directory holding the sample workspace.
pub fn sample_workspace_dir() -> Utf8PathBuf {
    Utf8Path::new(env!("CARGO_MANIFEST_DIR")).join("../fixtures/sample-workspace")
}

/// A temporary copy of the sample workspace, with a settings file pointing at the fake worker.
#[derive(Debug)]
pub struct TempWorkspace {
    // Held for its destructor.
    _temp_dir: Utf8TempDir,
    root: Utf8PathBuf,
    worker: Utf8PathBuf,
    extra_settings: String,
}

impl TempWorkspace {
    /// Creates a copy whose tests are run by `worker`.
    pub fn new(worker: impl Into<Utf8PathBuf>) -> Result<Self> {
        let temp_dir = camino_tempfile::Builder::new()
            .prefix("testadapter-fixture-")
            .tempdir()?;
        // Ids are built from globbed paths, which must match the ones tests compute. On macOS the
        // temp dir is behind a symlink.
        let root = temp_dir
            .path()
            .canonicalize_utf8()
            .wrap_err("failed to canonicalize temp dir")?
            .join("workspace");
        copy_dir_all(&sample_workspace_dir(), &root)?;

        let workspace = Self {
            _temp_dir: temp_dir,
            root,
            worker: worker.into(),
            extra_settings: String::new(),
        };
        workspace.write_settings()?;
        Ok(workspace)
    }

    /// Appends TOML to the settings file.
    pub fn with_settings(mut self, settings: &str) -> Result<Self> {
        writeln!(self.extra_settings, "{settings}")?;
        self.write_settings()?;
        Ok(self)
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn settings_path(&self) -> Utf8PathBuf {
        self.root.join(".config/testadapter.toml")
    }

    /// Returns the absolute path of a test file, relative to the `test` directory.
    pub fn test_file(&self, name: &str) -> Utf8PathBuf {
        self.root.join("test").join(name)
    }

    /// Writes a test file, replacing any previous contents.
    pub fn write_test_file(&self, name: &str, contents: &str) -> Result<()> {
        let path = self.test_file(name);
        std::fs::write(&path, contents).wrap_err_with(|| format!("failed to write `{path}`"))
    }

    fn write_settings(&self) -> Result<()> {
        let settings = format!(
            "framework-path = '{}'\n\n{}",
            self.worker,
            self.extra_settings
        );
        let path = self.settings_path();
        std::fs::create_dir_all(self.root.join(".config"))?;
        std::fs::write(&path, settings).wrap_err_with(|| format!("failed to write `{path}`"))
    }
}

fn copy_dir_all(src: &Utf8Path, dst: &Utf8Path) -> Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(src)?;
        let target = dst.as_std_path().join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target).wrap_err_with(|| {
                format!("failed to copy `{}`", entry.path().display())
            })?;
        }
    }
    Ok(())
}
