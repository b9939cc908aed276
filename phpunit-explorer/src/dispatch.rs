// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ExpectedError,
    errors::Result,
    output::{OutputContext, OutputOpts, StderrStyles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand, ValueEnum};
use explorer_metadata::ExplorerExitCode;
use explorer_runner::{
    config::ExplorerConfig,
    discovery::{RegistrySnapshot, TestRegistry},
    filesystem::{Env, Filesystem},
    reporter::{DisplayReporter, JsonReporter, Reporter},
    runner::{RunRequest, TestRunner, TestSelector},
};
use owo_colors::{OwoColorize, Style};
use std::io::{self, BufWriter, Write};
use tracing::{info, warn};

/// Discover PHPUnit tests and run them.
#[derive(Debug, Parser)]
#[command(name = "phpunit-explorer", version, max_term_width = 100)]
pub struct ExplorerApp {
    #[clap(flatten)]
    output: OutputOpts,

    /// Workspace root [default: the current directory]
    #[arg(
        long,
        global = true,
        value_name = "DIR",
        env = "PHPUNIT_EXPLORER_WORKSPACE_ROOT"
    )]
    workspace_root: Option<Utf8PathBuf>,

    /// Config file [default: <workspace-root>/.config/phpunit-explorer.toml]
    #[arg(long, global = true, value_name = "PATH")]
    config_file: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl ExplorerApp {
    /// Installs the logger and returns the output context.
    pub fn init_output(&self) -> Result<OutputContext> {
        self.output.init()
    }

    /// Returns styles for errors printed to stderr.
    pub fn stderr_styles(&self) -> StderrStyles {
        self.output.stderr_styles()
    }

    /// Executes the app, returning the process exit code on success.
    pub fn exec(self, output: OutputContext) -> Result<i32> {
        let Self {
            output: _,
            workspace_root,
            config_file,
            command,
        } = self;

        let workspace_root = resolve_workspace_root(workspace_root)?;
        let config = ExplorerConfig::from_sources(&workspace_root, config_file.as_deref())?;
        let fs = Filesystem::new(&Env::from_process());

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| ExpectedError::TokioRuntimeCreateError { err })?;

        runtime.block_on(async {
            let registry = TestRegistry::new();
            let summary = registry
                .refresh(config.workspace_root(), config.discovery(), &fs)
                .await?;
            if summary.unreadable > 0 {
                warn!(
                    "{} matching files could not be read (rerun with --verbose for details)",
                    summary.unreadable
                );
            }
            let snapshot = registry.snapshot();

            match command {
                Command::List(opts) => opts.exec(&config, &snapshot, output),
                Command::Run(opts) => opts.exec(&config, &fs, &snapshot, output).await,
            }
        })
    }
}

fn resolve_workspace_root(workspace_root: Option<Utf8PathBuf>) -> Result<Utf8PathBuf> {
    if let Some(root) = &workspace_root
        && root.is_absolute()
    {
        return Ok(root.clone());
    }

    let current_dir =
        std::env::current_dir().map_err(|err| ExpectedError::CurrentDirInvalid { err })?;
    let current_dir = Utf8PathBuf::try_from(current_dir).map_err(|err| {
        ExpectedError::CurrentDirInvalidUtf8 {
            path: err.into_path_buf(),
        }
    })?;
    Ok(match workspace_root {
        Some(root) => current_dir.join(root),
        None => current_dir,
    })
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List discovered tests
    List(ListOpts),

    /// Run tests
    ///
    /// With no arguments, every discovered test is run. Otherwise each argument selects tests: a
    /// file path, `path:line` for the test method (or class) at a 1-based line, a
    /// `Suite::method` or suite id, or any text contained in `Suite::method` ids.
    Run(RunOpts),
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
enum MessageFormat {
    /// Human-readable output
    #[default]
    Human,

    /// Machine-readable JSON
    Json,
}

#[derive(Debug, Args)]
struct ListOpts {
    /// Output format
    #[arg(long, value_enum, default_value_t, value_name = "FORMAT")]
    message_format: MessageFormat,
}

impl ListOpts {
    fn exec(
        self,
        config: &ExplorerConfig,
        snapshot: &RegistrySnapshot,
        output: OutputContext,
    ) -> Result<i32> {
        let mut writer = BufWriter::new(io::stdout().lock());
        match self.message_format {
            MessageFormat::Human => {
                let mut styles = ListStyles::default();
                if output.color.should_colorize(supports_color::Stream::Stdout) {
                    styles.colorize();
                }
                write_human_list(snapshot, config.workspace_root(), &styles, &mut writer)
                    .map_err(|err| ExpectedError::WriteListError { err })?;
            }
            MessageFormat::Json => {
                let summary = snapshot.to_summary(config.workspace_root());
                serde_json::to_writer_pretty(&mut writer, &summary)
                    .map_err(|err| ExpectedError::SerializeListError { err })?;
                writeln!(writer).map_err(|err| ExpectedError::WriteListError { err })?;
            }
        }
        writer
            .flush()
            .map_err(|err| ExpectedError::WriteListError { err })?;

        info!(
            "{} tests in {} files",
            snapshot.test_count(),
            snapshot.files().count()
        );
        Ok(ExplorerExitCode::OK)
    }
}

#[derive(Debug, Default)]
struct ListStyles {
    path: Style,
    suite: Style,
    method: Style,
}

impl ListStyles {
    fn colorize(&mut self) {
        self.path = Style::new().bold();
        self.suite = Style::new().magenta().bold();
        self.method = Style::new().blue().bold();
    }
}

fn write_human_list(
    snapshot: &RegistrySnapshot,
    workspace_root: &Utf8Path,
    styles: &ListStyles,
    writer: &mut dyn Write,
) -> io::Result<()> {
    for file in snapshot.files() {
        let path = file.path().strip_prefix(workspace_root).unwrap_or(file.path());
        writeln!(writer, "{}:", path.style(styles.path))?;
        for suite in &file.suites {
            writeln!(writer, "    {}", suite.id.style(styles.suite))?;
            for case in &suite.children {
                writeln!(writer, "        {}", case.id.style(styles.method))?;
            }
        }
    }
    Ok(())
}

#[derive(Debug, Args)]
struct RunOpts {
    /// Tests to run
    #[arg(value_name = "PATH[:LINE]|FILTER")]
    selectors: Vec<String>,

    /// Skip tests selected by this argument (same forms as the tests to run)
    #[arg(long, short = 'E', value_name = "SELECTOR")]
    exclude: Vec<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t, value_name = "FORMAT")]
    message_format: MessageFormat,
}

impl RunOpts {
    async fn exec(
        self,
        config: &ExplorerConfig,
        fs: &Filesystem,
        snapshot: &RegistrySnapshot,
        output: OutputContext,
    ) -> Result<i32> {
        let root = config.workspace_root();
        let request = self.request(snapshot, root);
        if request.plan(snapshot).is_empty() {
            return Err(ExpectedError::NoTestsRun {
                workspace_root: root.to_owned(),
            });
        }

        let reporter: Box<dyn Reporter> = match self.message_format {
            MessageFormat::Human => {
                let mut reporter = DisplayReporter::new(io::stdout());
                if output.color.should_colorize(supports_color::Stream::Stdout) {
                    reporter.colorize();
                }
                reporter.set_show_started(output.verbose);
                Box::new(reporter)
            }
            MessageFormat::Json => Box::new(JsonReporter::new(io::stdout())),
        };

        let runner = TestRunner::new(config, fs);
        let summary = runner
            .run(&request, snapshot, reporter, ctrl_c())
            .await?;

        if summary.cancelled {
            Err(ExpectedError::RunCancelled)
        } else if summary.no_results {
            Err(ExpectedError::RunnerFailed {
                exit_code: summary.exit_code,
            })
        } else if !summary.is_success() {
            Err(ExpectedError::TestRunFailed)
        } else {
            Ok(ExplorerExitCode::OK)
        }
    }

    fn request(&self, snapshot: &RegistrySnapshot, root: &Utf8Path) -> RunRequest {
        let request = if self.selectors.is_empty() {
            RunRequest::all()
        } else {
            RunRequest::new(
                self.selectors
                    .iter()
                    .map(|arg| parse_selector(arg, snapshot, root)),
            )
        };
        self.exclude
            .iter()
            .map(|arg| parse_selector(arg, snapshot, root))
            .fold(request, RunRequest::exclude)
    }
}

/// Interprets a command-line test selector against the discovered tests.
fn parse_selector(arg: &str, snapshot: &RegistrySnapshot, root: &Utf8Path) -> TestSelector {
    if let Some((path, line)) = arg.rsplit_once(':')
        && let Ok(line) = line.parse::<u32>()
    {
        let path = root.join(path);
        if let Some(file) = snapshot.file(&path) {
            // Lines are 1-based on the command line.
            return match file.node_at_line(line.saturating_sub(1)) {
                Some(node) => node.into(),
                None => TestSelector::File(path),
            };
        }
    }

    let path = root.join(arg);
    if snapshot.file(&path).is_some() {
        TestSelector::File(path)
    } else if snapshot.cases().any(|case| case.qualified_id() == arg) {
        TestSelector::Case(arg.to_owned())
    } else if snapshot.suites().any(|suite| suite.id.as_str() == arg) {
        TestSelector::Suite(arg.to_owned())
    } else {
        TestSelector::Contains(arg.to_owned())
    }
}

/// Resolves on the first Ctrl-C.
async fn ctrl_c() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!("unable to listen for Ctrl-C, runs can't be cancelled: {error}");
        std::future::pending::<()>().await;
    }
}
