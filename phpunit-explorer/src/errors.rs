// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::{NO_HEADING, StderrStyles};
use camino::Utf8PathBuf;
use explorer_metadata::ExplorerExitCode;
use explorer_runner::errors::{ConfigParseError, RefreshError, RunError};
use owo_colors::OwoColorize;
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// The #[error()] strings are placeholders: errors are printed with display_to_stderr, which
// colorizes them.

/// An error that phpunit-explorer knows how to report.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("invalid log filter")]
    InvalidLogFilter {
        value: String,
        #[source]
        err: Option<tracing_subscriber::filter::ParseError>,
    },
    #[error("could not determine the current directory")]
    CurrentDirInvalid {
        #[source]
        err: std::io::Error,
    },
    #[error("current directory is not valid UTF-8")]
    CurrentDirInvalidUtf8 { path: std::path::PathBuf },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("error creating Tokio runtime")]
    TokioRuntimeCreateError {
        #[source]
        err: std::io::Error,
    },
    #[error("test discovery failed")]
    RefreshError {
        #[from]
        err: RefreshError,
    },
    #[error("test run failed to start")]
    RunError {
        #[from]
        err: RunError,
    },
    #[error("error writing test list")]
    WriteListError {
        #[source]
        err: std::io::Error,
    },
    #[error("error serializing test list")]
    SerializeListError {
        #[source]
        err: serde_json::Error,
    },
    #[error("no tests to run")]
    NoTestsRun { workspace_root: Utf8PathBuf },
    #[error("test run failed")]
    TestRunFailed,
    #[error("test runner failed")]
    RunnerFailed { exit_code: Option<i32> },
    #[error("test run cancelled")]
    RunCancelled,
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::InvalidLogFilter { .. }
            | Self::CurrentDirInvalid { .. }
            | Self::CurrentDirInvalidUtf8 { .. }
            | Self::ConfigParseError { .. }
            | Self::TokioRuntimeCreateError { .. }
            | Self::RefreshError { .. } => ExplorerExitCode::SETUP_ERROR,
            Self::RunError { err } => match err {
                RunError::WriteEvent(_) => ExplorerExitCode::WRITE_OUTPUT_ERROR,
                RunError::BinaryNotFound(_) | RunError::Spawn(_) | RunError::Wait(_) => {
                    ExplorerExitCode::RUNNER_FAILED
                }
            },
            Self::WriteListError { .. } | Self::SerializeListError { .. } => {
                ExplorerExitCode::WRITE_OUTPUT_ERROR
            }
            Self::NoTestsRun { .. } => ExplorerExitCode::NO_TESTS_RUN,
            Self::TestRunFailed => ExplorerExitCode::TEST_RUN_FAILED,
            Self::RunnerFailed { .. } => ExplorerExitCode::RUNNER_FAILED,
            Self::RunCancelled => ExplorerExitCode::RUN_CANCELLED,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match self {
            Self::InvalidLogFilter { value, err } => {
                match err {
                    Some(_) => error!(
                        "PHPUNIT_EXPLORER_LOG value `{}` is not a valid log filter",
                        value.style(styles.bold)
                    ),
                    None => error!(
                        "PHPUNIT_EXPLORER_LOG value `{}` is not valid UTF-8",
                        value.style(styles.bold)
                    ),
                }
                err.as_ref().map(|err| err as &dyn Error)
            }
            Self::CurrentDirInvalid { err } => {
                error!("could not determine the current directory");
                Some(err as &dyn Error)
            }
            Self::CurrentDirInvalidUtf8 { path } => {
                error!(
                    "current directory `{}` is not valid UTF-8",
                    path.display().style(styles.bold)
                );
                None
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse config at `{}`",
                    err.config_file().style(styles.bold)
                );
                Some(err.kind() as &dyn Error)
            }
            Self::TokioRuntimeCreateError { err } => {
                error!("error creating Tokio runtime");
                Some(err as &dyn Error)
            }
            Self::RefreshError { err } => {
                error!("{err}");
                err.source()
            }
            Self::RunError { err } => match err {
                RunError::WriteEvent(err) => {
                    error!("error writing test run output");
                    err.source()
                }
                other => {
                    error!("{other}");
                    other.source()
                }
            },
            Self::WriteListError { err } => {
                error!("error writing test list");
                Some(err as &dyn Error)
            }
            Self::SerializeListError { err } => {
                error!("error serializing test list");
                Some(err as &dyn Error)
            }
            Self::NoTestsRun { workspace_root } => {
                error!(
                    "no tests to run under `{}`",
                    workspace_root.style(styles.bold)
                );
                None
            }
            Self::TestRunFailed => {
                error!("test run failed");
                None
            }
            Self::RunnerFailed { exit_code } => {
                match exit_code {
                    Some(code) => error!(
                        "test runner exited with code {} without reporting results",
                        code.style(styles.bold)
                    ),
                    None => error!("test runner was terminated without reporting results"),
                }
                None
            }
            Self::RunCancelled => {
                error!("test run cancelled");
                None
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
