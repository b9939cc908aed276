// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by phpunit-explorer.
//!
//! Only a few of these are fatal. Parse errors and malformed runner records are contained to a
//! single file or a single record; the types exist so that the containing code can log a precise
//! reason.

use camino::Utf8PathBuf;
use config::ConfigError;
use std::fmt;
use thiserror::Error;

/// An error that occurred while reading a file through [`Filesystem`](crate::filesystem::Filesystem).
#[derive(Debug, Error)]
#[error("failed to read `{path}`")]
pub struct FilesystemError {
    path: Utf8PathBuf,
    #[source]
    err: std::io::Error,
}

impl FilesystemError {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>, err: std::io::Error) -> Self {
        Self {
            path: path.into(),
            err,
        }
    }

    /// Returns the path that could not be read.
    pub fn path(&self) -> &Utf8PathBuf {
        &self.path
    }
}

/// An error that occurred while turning PHP source text into test suites.
///
/// This never propagates past [`parse`](crate::discovery::parse): a file that fails to parse is
/// reported as having no suites.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("line {}: {kind}", .line + 1)]
pub struct DiscoveryParseError {
    /// The 0-based line the error was detected at.
    pub line: u32,

    /// The kind of error.
    pub kind: DiscoveryParseErrorKind,
}

/// The kind of [`DiscoveryParseError`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DiscoveryParseErrorKind {
    /// A `/* ... */` comment was never closed.
    UnterminatedComment,

    /// A quoted string was never closed.
    UnterminatedString,

    /// A heredoc or nowdoc was never closed.
    UnterminatedHeredoc {
        /// The closing label that was expected.
        label: String,
    },

    /// A closing delimiter had no matching opening delimiter.
    UnexpectedClose(char),

    /// An opening delimiter was closed by the wrong delimiter.
    MismatchedClose {
        /// The delimiter that was expected.
        expected: char,
        /// The delimiter that was found.
        found: char,
    },

    /// The input ended with unclosed delimiters.
    UnclosedDelimiter(char),

    /// A declaration was malformed.
    UnexpectedToken {
        /// What the parser was looking for.
        expected: &'static str,
    },
}

impl fmt::Display for DiscoveryParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnterminatedComment => write!(f, "unterminated comment"),
            Self::UnterminatedString => write!(f, "unterminated string literal"),
            Self::UnterminatedHeredoc { label } => {
                write!(f, "unterminated heredoc (expected closing `{label}`)")
            }
            Self::UnexpectedClose(c) => write!(f, "unexpected `{c}`"),
            Self::MismatchedClose { expected, found } => {
                write!(f, "expected `{expected}`, found `{found}`")
            }
            Self::UnclosedDelimiter(c) => write!(f, "unclosed `{c}`"),
            Self::UnexpectedToken { expected } => write!(f, "expected {expected}"),
        }
    }
}

/// A raw record that could not be classified as a test event.
///
/// Malformed records are dropped one at a time; the stream continues.
#[derive(Debug, Error)]
pub enum MalformedEventError {
    /// The record has no string `event` field.
    #[error("record has no `event` field")]
    MissingEvent,

    /// The record has no string `id` field.
    #[error("record has no `id` field")]
    MissingId,

    /// The `event` field names an event this protocol doesn't define.
    #[error("unknown event `{event}`")]
    UnknownEvent {
        /// The event name.
        event: String,
    },

    /// A field required by the event kind is absent.
    #[error("`{event}` record is missing required field `{field}`")]
    MissingField {
        /// The event name.
        event: &'static str,
        /// The missing field.
        field: &'static str,
    },

    /// A field has the wrong type.
    #[error("`{event}` record has an invalid `{field}` field")]
    InvalidField {
        /// The event name.
        event: &'static str,
        /// The invalid field.
        field: &'static str,
        /// The underlying deserialization error.
        #[source]
        err: serde_json::Error,
    },
}

/// A runner-reported test id that matches no test under execution.
///
/// Events for unresolved ids are ignored; this only exists to be logged.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("no test under execution matches id `{id}`")]
pub struct UnresolvedIdError {
    id: String,
}

impl UnresolvedIdError {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Returns the id as the runner reported it.
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// An error that occurred while spawning the test runner process.
#[derive(Debug, Error)]
#[error("failed to spawn `{command_line}`")]
pub struct ProcessSpawnError {
    command_line: String,
    #[source]
    kind: ProcessSpawnErrorKind,
}

impl ProcessSpawnError {
    pub(crate) fn new(command_line: impl Into<String>, kind: ProcessSpawnErrorKind) -> Self {
        Self {
            command_line: command_line.into(),
            kind,
        }
    }

    /// Returns the command line that failed to spawn.
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> &ProcessSpawnErrorKind {
        &self.kind
    }
}

/// The kind of [`ProcessSpawnError`].
#[derive(Debug, Error)]
pub enum ProcessSpawnErrorKind {
    /// The command line could not be split into arguments.
    #[error("failed to split command line into arguments")]
    Split(#[source] shell_words::ParseError),

    /// The command line was empty.
    #[error("command line is empty")]
    Empty,

    /// The operating system failed to spawn the process.
    #[error("failed to execute process")]
    Exec(#[source] std::io::Error),
}

/// The test runner binary could not be located.
#[derive(Clone, Debug, Error)]
#[error(
    "could not find a test runner (looked for {} above `{search_root}` and on PATH)",
    .candidates.join(", ")
)]
pub struct RunnerBinaryNotFound {
    candidates: Vec<String>,
    search_root: Utf8PathBuf,
}

impl RunnerBinaryNotFound {
    pub(crate) fn new(candidates: Vec<String>, search_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            candidates,
            search_root: search_root.into(),
        }
    }
}

/// An error that is fatal to a single test run.
#[derive(Debug, Error)]
pub enum RunError {
    /// The test runner binary could not be located.
    #[error(transparent)]
    BinaryNotFound(#[from] RunnerBinaryNotFound),

    /// The test runner could not be spawned.
    #[error(transparent)]
    Spawn(#[from] ProcessSpawnError),

    /// Waiting for the test runner to exit failed.
    #[error("failed to wait for the test runner to exit")]
    Wait(#[source] std::io::Error),

    /// The reporter failed to write an event.
    #[error(transparent)]
    WriteEvent(#[from] WriteEventError),
}

/// An error that occurred while parsing the phpunit-explorer config.
#[derive(Debug, Error)]
#[error("failed to parse config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file that failed to parse.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of [`ConfigParseError`].
#[derive(Debug, Error)]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// A discovery glob pattern was invalid.
    #[error("invalid glob pattern `{pattern}`")]
    InvalidGlob {
        /// The pattern that failed to compile.
        pattern: String,
        /// The underlying error.
        #[source]
        err: globset::Error,
    },
}

/// An error that occurred while refreshing the test registry.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// The workspace root is not a directory.
    #[error("workspace root `{root}` is not a directory")]
    RootNotADirectory {
        /// The workspace root.
        root: Utf8PathBuf,
    },
}

/// An error that occurred while writing a reporter event.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteEventError {
    /// An error occurred while writing the event to the provided output.
    #[error("error writing to output")]
    Io(#[source] std::io::Error),

    /// An error occurred while serializing the event.
    #[error("error serializing event")]
    Json(#[source] serde_json::Error),
}

/// Displays an error along with its chain of sources.
pub struct DisplayErrorChain<E>(E);

impl<E: std::error::Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self(error)
    }
}

impl<E: std::error::Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;

        let mut cause = self.0.source();
        while let Some(err) = cause {
            write!(f, "\n  caused by: {err}")?;
            cause = err.source();
        }

        Ok(())
    }
}
