// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The host-facing facade.

use crate::{
    cancel::CancelToken,
    channel::EventChannel,
    config::{AdapterConfig, ConfigProvider, GlobResolver},
    debug::{DebugCoordinator, DebugSubsystem, NoDebugSubsystem},
    errors::{BusyError, ConfigError, DisplayErrorChain, RunError},
    framework::Framework,
    list::{TestTree, TestTreeBuilder},
    output::{NullOutput, OutputChannel},
    runner::RunOrchestrator,
};
use camino::{Utf8Path, Utf8PathBuf};
use debug_ignore::DebugIgnore;
use std::sync::{Arc, Mutex, PoisonError};
use testadapter_metadata::{LoadEvent, RunEvent, RunStats, RunTarget};
use tracing::{debug, info, warn};

/// Loads and runs tests on behalf of a host.
///
/// At most one load or run is active at a time: a second request while one is in flight fails
/// right away with [`BusyError`] and leaves the first one alone. Progress is reported through
/// [`Self::load_events`] and [`Self::run_events`]; every operation returns only once its final
/// event was emitted.
#[derive(Debug)]
pub struct TestAdapter {
    config: DebugIgnore<Arc<dyn ConfigProvider>>,
    framework: DebugIgnore<Arc<dyn Framework>>,
    debug: DebugIgnore<Arc<dyn DebugSubsystem>>,
    output: DebugIgnore<Arc<dyn OutputChannel>>,
    busy: tokio::sync::Mutex<()>,
    state: Mutex<LoadedState>,
    cancel: Mutex<CancelToken>,
    load_events: EventChannel<LoadEvent>,
    run_events: EventChannel<RunEvent>,
    autorun: EventChannel<()>,
}

#[derive(Debug, Default)]
struct LoadedState {
    tree: Option<Arc<TestTree>>,
    // Known as soon as a configuration was read, even if the load then failed.
    watched: Option<WatchedPaths>,
}

#[derive(Clone, Debug)]
struct WatchedPaths {
    cwd: Utf8PathBuf,
    config_files: Vec<Utf8PathBuf>,
    globs: Vec<GlobResolver>,
}

impl WatchedPaths {
    fn new(config: &AdapterConfig) -> Self {
        let globs = config
            .globs
            .iter()
            .filter_map(|glob| GlobResolver::new(glob).ok())
            .collect();
        Self {
            cwd: config.cwd.clone(),
            config_files: config
                .opts_file
                .iter()
                .chain(&config.settings_file)
                .cloned()
                .collect(),
            globs,
        }
    }

    fn is_config_file(&self, path: &Utf8Path) -> bool {
        self.config_files.iter().any(|file| file == path)
    }

    fn matches_glob(&self, path: &Utf8Path) -> bool {
        self.globs.iter().any(|glob| glob.matches(&self.cwd, path))
    }
}

/// The result of [`TestAdapter::files_changed`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FilesChanged {
    /// The tree or configuration may be out of date and should be reloaded.
    pub reload: bool,

    /// A loaded test file changed, and the autorun signal was fired.
    pub autorun: bool,
}

impl TestAdapter {
    /// Creates an adapter that reads configuration from `config` and drives `framework`.
    ///
    /// Debugging is declined and output is discarded until configured otherwise.
    pub fn new(config: Arc<dyn ConfigProvider>, framework: Arc<dyn Framework>) -> Self {
        Self {
            config: DebugIgnore(config),
            framework: DebugIgnore(framework),
            debug: DebugIgnore(Arc::new(NoDebugSubsystem::new())),
            output: DebugIgnore(Arc::new(NullOutput)),
            busy: tokio::sync::Mutex::new(()),
            state: Mutex::new(LoadedState::default()),
            cancel: Mutex::new(CancelToken::new()),
            load_events: EventChannel::new(),
            run_events: EventChannel::new(),
            autorun: EventChannel::new(),
        }
    }

    /// Sets the subsystem used to start debuggers.
    pub fn with_debug_subsystem(mut self, debug: Arc<dyn DebugSubsystem>) -> Self {
        self.debug = DebugIgnore(debug);
        self
    }

    /// Sets the channel that receives human-readable output, such as retried attempts.
    pub fn with_output(mut self, output: Arc<dyn OutputChannel>) -> Self {
        self.output = DebugIgnore(output);
        self
    }

    /// Returns the channel load events are fired on.
    pub fn load_events(&self) -> &EventChannel<LoadEvent> {
        &self.load_events
    }

    /// Returns the channel run events are fired on.
    pub fn run_events(&self) -> &EventChannel<RunEvent> {
        &self.run_events
    }

    /// Returns the channel autorun requests are fired on.
    pub fn autorun_events(&self) -> &EventChannel<()> {
        &self.autorun
    }

    /// Returns the tree from the last successful load.
    pub fn tree(&self) -> Option<Arc<TestTree>> {
        self.lock_state().tree.clone()
    }

    /// Loads the test tree.
    ///
    /// Emits [`LoadEvent::Started`] and exactly one [`LoadEvent::Finished`]. Configuration and
    /// framework errors are reported through the latter; in that case the cached tree is
    /// cleared.
    pub async fn load(&self) -> Result<(), BusyError> {
        let _guard = self.busy.try_lock().map_err(|_| BusyError)?;
        info!("loading tests");
        self.load_events.fire(LoadEvent::Started);

        match self.load_tree().await {
            Ok(tree) => {
                let root = tree.root().clone();
                self.lock_state().tree = Some(Arc::new(tree));
                self.load_events.fire(LoadEvent::loaded(root));
            }
            Err(message) => {
                warn!("loading tests failed: {message}");
                self.lock_state().tree = None;
                self.load_events.fire(LoadEvent::failed(message));
            }
        }
        Ok(())
    }

    async fn load_tree(&self) -> Result<TestTree, String> {
        let config = self.current_config().await.map_err(error_message)?;
        self.lock_state().watched = Some(WatchedPaths::new(&config));
        TestTreeBuilder::new(&**self.framework)
            .build(&config)
            .await
            .map_err(error_message)
    }

    /// Runs `target` from the loaded tree.
    ///
    /// Configuration errors are returned before anything is emitted. Otherwise the run emits
    /// `RunStarted` first and `RunFinished` last, and its statistics are returned.
    pub async fn run(&self, target: RunTarget) -> Result<RunStats, RunError> {
        let _guard = self.busy.try_lock().map_err(|_| BusyError)?;
        let cancel = self.new_cancel_token();
        let (tree, config) = self.prepare_run().await?;

        let orchestrator = RunOrchestrator::new(
            &**self.framework,
            &self.run_events,
            &**self.output,
            cancel,
        );
        Ok(orchestrator.run(&tree, target, &config).await)
    }

    /// Runs `target` from the loaded tree under a debugger.
    ///
    /// `RunFinished` is only emitted once the debug session terminated. If the debugger can't
    /// be started, `RunStarted` and `RunFinished` are emitted without any test events and
    /// [`RunError::DebugStart`] is returned.
    pub async fn debug(&self, target: RunTarget) -> Result<RunStats, RunError> {
        let _guard = self.busy.try_lock().map_err(|_| BusyError)?;
        let cancel = self.new_cancel_token();
        let (tree, config) = self.prepare_run().await?;

        let orchestrator = RunOrchestrator::new(
            &**self.framework,
            &self.run_events,
            &**self.output,
            cancel,
        );
        let coordinator = DebugCoordinator::new(orchestrator, &**self.debug);
        let (stats, state) = coordinator.run(&tree, target, &config).await?;
        debug!("debug run ended in state {state:?}");
        Ok(stats)
    }

    /// Cancels the active run, if any. Cancelling twice, or after a run finished, does nothing.
    pub fn cancel(&self) {
        let cancel = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if cancel.cancel() {
            info!("cancellation requested");
        }
    }

    /// Tells the adapter that files changed on disk.
    ///
    /// Fires the autorun signal if one of the loaded test files changed.
    pub fn files_changed(&self, paths: &[Utf8PathBuf]) -> FilesChanged {
        let state = self.lock_state();
        let mut changed = FilesChanged::default();
        for path in paths {
            let loaded = state
                .tree
                .as_ref()
                .is_some_and(|tree| tree.contains_file(path));
            if loaded {
                debug!("loaded test file `{path}` changed");
                changed.reload = true;
                changed.autorun = true;
                continue;
            }
            if let Some(watched) = &state.watched {
                if watched.is_config_file(path) {
                    debug!("configuration file `{path}` changed");
                    changed.reload = true;
                } else if watched.matches_glob(path) {
                    debug!("new or removed test file `{path}`");
                    changed.reload = true;
                }
            }
        }
        drop(state);

        if changed.autorun {
            self.request_autorun();
        }
        changed
    }

    /// Fires the autorun signal.
    pub fn request_autorun(&self) {
        self.autorun.fire(());
    }

    async fn prepare_run(&self) -> Result<(Arc<TestTree>, AdapterConfig), RunError> {
        let tree = self.tree().ok_or(RunError::NotLoaded)?;
        let config = self.current_config().await?;
        Ok((tree, config))
    }

    async fn current_config(&self) -> Result<AdapterConfig, ConfigError> {
        let config = self.config.current_config().await?;
        config.validate()?;
        Ok(config)
    }

    fn new_cancel_token(&self) -> CancelToken {
        let cancel = CancelToken::new();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = cancel.clone();
        cancel
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LoadedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn error_message(error: impl std::error::Error) -> String {
    DisplayErrorChain::new(error).to_string()
}
