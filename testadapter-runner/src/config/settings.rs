// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::{SettingsParseError, SettingsParseErrorKind};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use indexmap::IndexMap;
use serde::Deserialize;
use std::{collections::BTreeSet, time::Duration};
use testadapter_metadata::worker::TestUi;

/// Adapter settings, read from `.config/testadapter.toml` layered over built-in defaults.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AdapterSettings {
    /// The label of the root suite.
    pub label: String,

    /// The working directory, relative to the workspace root.
    pub cwd: Utf8PathBuf,

    /// The options file, relative to the working directory.
    pub opts_file: Utf8PathBuf,

    /// Globs replacing the ones from the options file.
    #[serde(default)]
    pub files: Option<Vec<String>>,

    /// The worker that drives the test framework.
    pub framework_path: Utf8PathBuf,

    /// The runtime the worker is started with.
    #[serde(default)]
    pub runtime_path: Option<Utf8PathBuf>,

    /// Whether the worker patches the module loader.
    pub monkey_patch: bool,

    /// Whether files without test declarations are skipped.
    pub prune_files: bool,

    /// Slack added to the watchdog bound.
    #[serde(with = "humantime_serde")]
    pub watchdog_overhead: Duration,

    /// The number of files enumerated at once.
    pub enumeration_jobs: usize,

    /// Extra environment variables for the worker.
    #[serde(default)]
    pub env: IndexMap<String, String>,

    /// Framework options overriding the options file.
    #[serde(default)]
    pub options: OptionsSettings,

    /// Debugger settings.
    pub debug: DebugSettings,
}

/// Framework options set in the settings file. Unset values fall back to the options file.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OptionsSettings {
    /// The interface tests are declared with.
    #[serde(default)]
    pub ui: Option<TestUi>,

    /// The per-test timeout.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// How many times a failing test is retried.
    #[serde(default)]
    pub retries: Option<usize>,

    /// Modules loaded before each test file.
    #[serde(default)]
    pub requires: Option<Vec<String>>,

    /// Whether the framework forces the process to exit when done.
    #[serde(default)]
    pub exit: Option<bool>,
}

/// Debugger settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DebugSettings {
    /// The debugger port.
    pub port: u16,

    /// How long to wait after the debugger started.
    #[serde(with = "humantime_serde")]
    pub attach_delay: Duration,

    /// Extra runtime arguments while debugging.
    pub runtime_args: Vec<String>,

    /// The launch configuration to ask the debugger for.
    #[serde(default)]
    pub launch_config: Option<String>,

    /// A command that starts a debugger.
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

impl AdapterSettings {
    /// The settings file read by default, relative to the workspace root.
    pub const SETTINGS_PATH: &'static str = ".config/testadapter.toml";

    /// The built-in defaults.
    pub const DEFAULT_SETTINGS: &'static str = include_str!("../../default-config.toml");

    /// Reads settings for `workspace_root`.
    ///
    /// If `settings_file` is given it must exist; otherwise [`Self::SETTINGS_PATH`] is read if it
    /// exists. `unknown_callback` is called with the set of keys that weren't recognized.
    pub fn from_sources(
        workspace_root: &Utf8Path,
        settings_file: Option<&Utf8Path>,
        mut unknown_callback: impl FnMut(&Utf8Path, &BTreeSet<String>),
    ) -> Result<Self, SettingsParseError> {
        let (settings_file, source) = match settings_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let settings_file = workspace_root.join(Self::SETTINGS_PATH);
                let source = File::new(settings_file.as_str(), FileFormat::Toml).required(false);
                (settings_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (settings, unknown) = Self::build_and_deserialize(&builder)
            .map_err(|kind| SettingsParseError::new(&settings_file, kind))?;
        if !unknown.is_empty() {
            unknown_callback(&settings_file, &unknown);
        }

        Ok(settings)
    }

    /// Returns the built-in defaults.
    pub fn default_settings() -> Self {
        let (settings, _) = Self::build_and_deserialize(&Self::make_default_config())
            .expect("default settings are always valid");
        settings
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_SETTINGS, FileFormat::Toml))
    }

    /// This returns a tuple of (settings, ignored paths).
    fn build_and_deserialize(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(Self, BTreeSet<String>), SettingsParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| SettingsParseErrorKind::Build(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let settings: Self = serde_path_to_error::deserialize(ignored_de).map_err(|error| {
            // The config crate also reports the key; drop it so the path is reported once.
            let path = error.path().clone();
            let error = match error.into_inner() {
                ConfigError::At { error, .. } => *error,
                other => other,
            };
            SettingsParseErrorKind::Deserialize(Box::new(serde_path_to_error::Error::new(
                path, error,
            )))
        })?;

        Ok((settings, ignored))
    }
}
