// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{
    AdapterConfig, AdapterSettings, DebugConfig, FrameworkOptions, GlobResolver, OptsFile,
};
use crate::errors::ConfigError;
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use futures::future::BoxFuture;
use itertools::Itertools;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

/// Yields the current configuration snapshot. Polled once per load or run.
pub trait ConfigProvider: Send + Sync {
    /// Returns the current configuration.
    fn current_config(&self) -> BoxFuture<'_, Result<AdapterConfig, ConfigError>>;
}

/// Reads configuration from a workspace on every call: the settings file, then the options file,
/// then the globs they select.
#[derive(Clone, Debug)]
pub struct WorkspaceConfigProvider {
    workspace_root: Utf8PathBuf,
    settings_file: Option<Utf8PathBuf>,
}

impl WorkspaceConfigProvider {
    /// Creates a provider for `workspace_root`. If `settings_file` is `None`,
    /// [`AdapterSettings::SETTINGS_PATH`] is read if it exists.
    pub fn new(workspace_root: impl Into<Utf8PathBuf>, settings_file: Option<Utf8PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            settings_file,
        }
    }

    /// Returns the workspace root.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    async fn read(&self) -> Result<AdapterConfig, ConfigError> {
        let settings = AdapterSettings::from_sources(
            &self.workspace_root,
            self.settings_file.as_deref(),
            |settings_file, unknown| {
                warn!(
                    "ignoring unknown keys in settings file `{settings_file}`: {}",
                    unknown.iter().join(", ")
                );
            },
        )?;

        let cwd = normalize(&self.workspace_root.join(&settings.cwd));
        let opts_file = cwd.join(&settings.opts_file);
        let opts = OptsFile::read(&opts_file).await?.unwrap_or_default();

        let globs = match settings.files {
            Some(globs) => globs,
            None if !opts.globs.is_empty() => opts.globs,
            None => vec![AdapterConfig::DEFAULT_GLOB.to_owned()],
        };
        let mut files = Vec::new();
        for glob in &globs {
            let matched = GlobResolver::expand(&cwd, glob)?;
            debug!("glob `{glob}` matched {} files", matched.len());
            files.extend(matched);
        }

        let defaults = FrameworkOptions::default();
        let options = settings.options;
        let framework_options = FrameworkOptions {
            ui: options.ui.or(opts.ui).unwrap_or(defaults.ui),
            timeout: options.timeout.or(opts.timeout).unwrap_or(defaults.timeout),
            retries: options.retries.or(opts.retries).unwrap_or(defaults.retries),
            requires: options.requires.unwrap_or(opts.requires),
            exit: options.exit.or(opts.exit).unwrap_or(defaults.exit),
        };

        let settings_file = match &self.settings_file {
            Some(file) => file.clone(),
            None => self.workspace_root.join(AdapterSettings::SETTINGS_PATH),
        };

        Ok(AdapterConfig {
            label: settings.label,
            files,
            globs,
            opts_file: Some(opts_file),
            settings_file: Some(settings_file),
            framework_options,
            env: settings.env,
            cwd,
            framework_path: settings.framework_path,
            runtime_path: settings.runtime_path,
            debug: DebugConfig {
                port: settings.debug.port,
                launch_config: settings.debug.launch_config,
                attach_delay: settings.debug.attach_delay,
                runtime_args: settings.debug.runtime_args,
                command: settings.debug.command,
            },
            monkey_patch: settings.monkey_patch,
            prune_files: settings.prune_files,
            watchdog_overhead: settings.watchdog_overhead,
            enumeration_jobs: settings.enumeration_jobs,
        })
    }
}

impl ConfigProvider for WorkspaceConfigProvider {
    fn current_config(&self) -> BoxFuture<'_, Result<AdapterConfig, ConfigError>> {
        Box::pin(self.read())
    }
}

/// Serves a fixed snapshot, which can be replaced between cycles.
#[derive(Debug)]
pub struct StaticConfigProvider {
    config: Mutex<AdapterConfig>,
}

impl StaticConfigProvider {
    /// Creates a provider serving `config`.
    pub fn new(config: AdapterConfig) -> Self {
        Self {
            config: Mutex::new(config),
        }
    }

    /// Replaces the snapshot served from the next cycle on.
    pub fn set(&self, config: AdapterConfig) {
        *self.config.lock().unwrap_or_else(PoisonError::into_inner) = config;
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn current_config(&self) -> BoxFuture<'_, Result<AdapterConfig, ConfigError>> {
        let config = self
            .config
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Box::pin(async move { Ok(config) })
    }
}

/// Removes `.` components so that `root/.` and `root` compare equal.
fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    path.components()
        .filter(|component| !matches!(component, Utf8Component::CurDir))
        .collect()
}
