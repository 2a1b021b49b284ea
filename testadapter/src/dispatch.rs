// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{ExpectedError, Result},
    output::{OutputContext, OutputOpts, clap_styles},
    reporter::{MessageFormat, Reporter},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use std::{io::Write, sync::Arc};
use testadapter_metadata::{LoadEvent, RunStats, RunTarget, TestAdapterExitCode, TestId};
use testadapter_runner::{
    adapter::TestAdapter,
    config::{ConfigProvider, WorkspaceConfigProvider},
    debug::{CommandDebugSubsystem, DebugSubsystem, NoDebugSubsystem},
    errors::RunError,
    framework::ProcessFramework,
    output::StderrOutput,
};
use tracing::{debug, info, warn};

/// Discovers and runs mocha-style tests through a worker process.
///
/// Test files, framework options and debugger settings are read from the workspace: the
/// settings file (`.config/testadapter.toml` by default) and the options file it points to.
#[derive(Debug, Parser)]
#[command(name = "testadapter", version, styles = clap_styles::style())]
pub struct TestAdapterApp {
    /// The workspace to load tests from [default: current directory]
    #[arg(
        long,
        global = true,
        value_name = "DIR",
        env = "TESTADAPTER_WORKSPACE"
    )]
    workspace: Option<Utf8PathBuf>,

    /// Settings file, relative to the workspace unless absolute
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    #[command(flatten)]
    output: OutputOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load the test tree and print it
    List(ListOpts),

    /// Run tests from the loaded tree
    Run(RunOpts),
}

#[derive(Debug, Args)]
struct ListOpts {
    /// Output format
    #[arg(long, value_enum, default_value_t, value_name = "FORMAT")]
    message_format: MessageFormat,
}

#[derive(Debug, Args)]
struct RunOpts {
    /// Ids of the suites and tests to run [default: every test]
    #[arg(value_name = "TEST_ID")]
    ids: Vec<String>,

    /// Start the configured debugger and run under it
    #[arg(long)]
    debug: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t, value_name = "FORMAT")]
    message_format: MessageFormat,
}

impl TestAdapterApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        let workspace = resolve_workspace(self.workspace)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| ExpectedError::RuntimeBuildError { err })?;

        runtime.block_on(async move {
            let adapter = build_adapter(&workspace, self.config_file).await?;
            match self.command {
                Command::List(opts) => {
                    let mut reporter = new_reporter(output, opts.message_format);
                    exec_list(&adapter, &mut reporter).await
                }
                Command::Run(opts) => {
                    let mut reporter = new_reporter(output, opts.message_format);
                    exec_run(&adapter, opts, &mut reporter).await
                }
            }
        })
    }
}

fn resolve_workspace(workspace: Option<Utf8PathBuf>) -> Result<Utf8PathBuf> {
    let current_dir = std::env::current_dir()
        .map_err(|err| ExpectedError::CurrentDirFailed { err })?;
    let current_dir = Utf8PathBuf::try_from(current_dir)
        .map_err(|err| ExpectedError::CurrentDirInvalidUtf8 {
            path: err.into_path_buf(),
        })?;

    let workspace = match workspace {
        Some(workspace) => current_dir.join(workspace),
        None => current_dir,
    };
    if !workspace.is_dir() {
        return Err(ExpectedError::WorkspaceNotFound { workspace });
    }
    Ok(workspace)
}

async fn build_adapter(
    workspace: &Utf8Path,
    config_file: Option<Utf8PathBuf>,
) -> Result<TestAdapter> {
    let provider = Arc::new(WorkspaceConfigProvider::new(workspace, config_file));

    // The debugger command is fixed for the lifetime of the process.
    let config = provider.current_config().await?;
    let debug: Arc<dyn DebugSubsystem> = match config.debug.command {
        Some(command) => {
            debug!("debugger command: {}", shell_words::join(&command));
            Arc::new(CommandDebugSubsystem::new(command))
        }
        None => Arc::new(NoDebugSubsystem::new()),
    };

    Ok(TestAdapter::new(provider, Arc::new(ProcessFramework::new()))
        .with_debug_subsystem(debug)
        .with_output(Arc::new(StderrOutput)))
}

fn new_reporter(output: OutputContext, format: MessageFormat) -> Reporter<std::io::Stdout> {
    let mut reporter = Reporter::new(std::io::stdout(), format, output.verbose);
    if output.color.should_colorize(supports_color::Stream::Stdout) {
        reporter.colorize();
    }
    reporter
}

/// Loads the tree. In JSON mode, load events are printed as they were fired.
async fn load<W: Write>(
    adapter: &TestAdapter,
    reporter: &mut Reporter<W>,
    print_events: bool,
) -> Result<()> {
    let mut rx = adapter.load_events().subscribe();
    adapter
        .load()
        .await
        .map_err(|err| ExpectedError::RunSetupFailed {
            err: RunError::Busy(err),
        })?;

    for event in rx.drain() {
        if print_events {
            reporter.write_load_event(&event)?;
        }
        if let LoadEvent::Finished {
            error_message: Some(message),
            ..
        } = event
        {
            return Err(ExpectedError::LoadFailed { message });
        }
    }
    Ok(())
}

async fn exec_list<W: Write>(adapter: &TestAdapter, reporter: &mut Reporter<W>) -> Result<i32> {
    let json = reporter.format() == MessageFormat::Json;
    load(adapter, reporter, json).await?;
    if !json && let Some(tree) = adapter.tree() {
        reporter.write_tree(tree.root())?;
    }
    reporter.flush()?;
    Ok(TestAdapterExitCode::OK)
}

async fn exec_run<W: Write>(
    adapter: &TestAdapter,
    opts: RunOpts,
    reporter: &mut Reporter<W>,
) -> Result<i32> {
    load(adapter, reporter, false).await?;
    if let Some(tree) = adapter.tree() {
        reporter.set_tree(tree.root());
    }

    let RunOpts { ids, debug, .. } = opts;
    let target = RunTarget::from_ids(ids.into_iter().map(TestId::new));
    let mut rx = adapter.run_events().subscribe();
    let run = async {
        if debug {
            adapter.debug(target).await
        } else {
            adapter.run(target).await
        }
    };
    tokio::pin!(run);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    let result = loop {
        tokio::select! {
            biased;
            Some(event) = rx.recv() => reporter.write_run_event(&event)?,
            result = &mut run => break result,
            signal = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                if let Err(error) = signal {
                    warn!("failed to listen for interrupts: {error}");
                    continue;
                }
                info!("interrupted, cancelling the run");
                adapter.cancel();
            }
        }
    };
    for event in rx.drain() {
        reporter.write_run_event(&event)?;
    }
    reporter.flush()?;

    final_exit_code(result?)
}

fn final_exit_code(stats: RunStats) -> Result<i32> {
    if stats.initial_run_count == 0 {
        Err(ExpectedError::NoTestsRun)
    } else if stats.cancelled || stats.has_failures() {
        Err(ExpectedError::TestRunFailed {
            cancelled: stats.cancelled,
        })
    } else {
        Ok(TestAdapterExitCode::OK)
    }
}
