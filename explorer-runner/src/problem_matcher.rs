// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Classification of raw runner records into typed test events.
//!
//! The runner reports one JSON record per event. Each record is checked against the shape its
//! `event` field requires and turned into a [`TestEvent`]; records that don't fit are dropped one at
//! a time without affecting the rest of the stream.

use crate::errors::MalformedEventError;
use camino::{Utf8Path, Utf8PathBuf};
use explorer_metadata::{FailureDetail, RawRecord};
use serde::{Deserialize, de::DeserializeOwned};
use std::fmt::{self, Write as _};
use tracing::debug;

const DATASET_MARKER: &str = " with data set #";

/// Strips a single trailing ` with data set #<n>` suffix from a runner-reported id.
///
/// Discovered test ids never carry the suffix, so this must be applied before any lookup.
pub fn normalize_id(id: &str) -> &str {
    match id.rfind(DATASET_MARKER) {
        Some(idx) => {
            let index = &id[idx + DATASET_MARKER.len()..];
            if !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()) {
                &id[..idx]
            } else {
                id
            }
        }
        None => id,
    }
}

/// Returns true if `id` names a single data set of a parameterized test.
pub fn is_dataset_id(id: &str) -> bool {
    normalize_id(id).len() != id.len()
}

/// The kind of a [`TestEvent`], as named on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TestEventKind {
    /// `testStarted`.
    Started,
    /// `testFailed`.
    Failed,
    /// `testIgnored`.
    Ignored,
    /// `testFinished`.
    Finished,
}

impl TestEventKind {
    /// Returns the wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "testStarted",
            Self::Failed => "testFailed",
            Self::Ignored => "testIgnored",
            Self::Finished => "testFinished",
        }
    }

    fn from_wire(event: &str) -> Option<Self> {
        match event {
            "testStarted" => Some(Self::Started),
            "testFailed" => Some(Self::Failed),
            "testIgnored" => Some(Self::Ignored),
            "testFinished" => Some(Self::Finished),
            _ => None,
        }
    }
}

impl fmt::Display for TestEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A test lifecycle event reported by the runner.
///
/// Ids are kept exactly as reported, including any data set suffix.
#[derive(Clone, Debug, PartialEq)]
pub enum TestEvent {
    /// The runner began executing a test.
    Started {
        /// The reported id.
        id: String,
    },

    /// A test failed an assertion or raised an exception.
    Failed {
        /// The reported id.
        id: String,
        /// What went wrong.
        failure: FailureMessage,
        /// The reported duration, in milliseconds.
        duration: f64,
    },

    /// A test was skipped.
    Ignored {
        /// The reported id.
        id: String,
    },

    /// A test completed without failing.
    Finished {
        /// The reported id.
        id: String,
        /// The reported duration, in milliseconds.
        duration: f64,
    },
}

impl TestEvent {
    /// Returns the id as reported by the runner.
    pub fn id(&self) -> &str {
        match self {
            Self::Started { id }
            | Self::Failed { id, .. }
            | Self::Ignored { id }
            | Self::Finished { id, .. } => id,
        }
    }

    /// Returns the kind of this event.
    pub fn kind(&self) -> TestEventKind {
        match self {
            Self::Started { .. } => TestEventKind::Started,
            Self::Failed { .. } => TestEventKind::Failed,
            Self::Ignored { .. } => TestEventKind::Ignored,
            Self::Finished { .. } => TestEventKind::Finished,
        }
    }

    /// Returns true if this event ends a test.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started { .. })
    }
}

/// Classifies a raw record, dropping it (with a debug log) if it is malformed.
pub fn classify(record: &RawRecord) -> Option<TestEvent> {
    match try_classify(record) {
        Ok(event) => Some(event),
        Err(error) => {
            debug!("dropping runner record: {error}");
            None
        }
    }
}

/// Classifies a raw record, returning the reason it is malformed if it doesn't fit the protocol.
pub fn try_classify(record: &RawRecord) -> Result<TestEvent, MalformedEventError> {
    let event = record.event().ok_or(MalformedEventError::MissingEvent)?;
    let kind = TestEventKind::from_wire(event).ok_or_else(|| MalformedEventError::UnknownEvent {
        event: event.to_owned(),
    })?;
    let id = record.id().ok_or(MalformedEventError::MissingId)?.to_owned();

    let event = match kind {
        TestEventKind::Started => TestEvent::Started { id },
        TestEventKind::Ignored => TestEvent::Ignored { id },
        TestEventKind::Finished => TestEvent::Finished {
            id,
            duration: required_field(record, kind, "duration")?,
        },
        TestEventKind::Failed => {
            let message: String = required_field(record, kind, "message")?;
            let duration = required_field(record, kind, "duration")?;
            let expected: Option<String> = field(record, kind, "expected")?;
            let actual: Option<String> = field(record, kind, "actual")?;
            let details: Option<Vec<FailureDetail>> = field(record, kind, "details")?;
            TestEvent::Failed {
                id,
                failure: FailureMessage::new(
                    message,
                    expected.unwrap_or_default(),
                    actual.unwrap_or_default(),
                    details.unwrap_or_default(),
                ),
                duration,
            }
        }
    };
    Ok(event)
}

fn field<T: DeserializeOwned>(
    record: &RawRecord,
    kind: TestEventKind,
    name: &'static str,
) -> Result<Option<T>, MalformedEventError> {
    record
        .get(name)
        .filter(|value| !value.is_null())
        .map(|value| {
            <T as Deserialize>::deserialize(value).map_err(|err| MalformedEventError::InvalidField {
                event: kind.as_str(),
                field: name,
                err,
            })
        })
        .transpose()
}

fn required_field<T: DeserializeOwned>(
    record: &RawRecord,
    kind: TestEventKind,
    name: &'static str,
) -> Result<T, MalformedEventError> {
    field(record, kind, name)?.ok_or(MalformedEventError::MissingField {
        event: kind.as_str(),
        field: name,
    })
}

/// The payload of a failed test.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FailureMessage {
    /// The failure message.
    pub message: String,

    /// The expected value of a failed comparison, or empty.
    pub expected: String,

    /// The actual value of a failed comparison, or empty.
    pub actual: String,

    /// Stack frames, innermost first.
    pub details: Vec<FailureDetail>,
}

impl FailureMessage {
    /// Creates a new failure message.
    pub fn new(
        message: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
        details: Vec<FailureDetail>,
    ) -> Self {
        Self {
            message: message.into(),
            expected: expected.into(),
            actual: actual.into(),
            details,
        }
    }

    /// Returns true if the failure carries a comparison.
    pub fn has_diff(&self) -> bool {
        !self.expected.is_empty() || !self.actual.is_empty()
    }

    /// Renders the message followed by an expected/actual diff, if there is one.
    pub fn diff_text(&self) -> String {
        let mut text = self.message.clone();
        if !self.has_diff() {
            return text;
        }

        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str("--- Expected\n+++ Actual\n");
        for line in self.expected.lines() {
            _ = writeln!(text, "-{line}");
        }
        for line in self.actual.lines() {
            _ = writeln!(text, "+{line}");
        }
        text
    }

    /// Returns the 0-based line of the innermost reported frame.
    pub fn location_line(&self) -> Option<u32> {
        self.details
            .first()
            .map(|detail| detail.line.saturating_sub(1))
    }

    /// Returns the location of the failure within `fs_path`, the file that declares the test.
    pub fn location(&self, fs_path: &Utf8Path) -> Option<SourceLocation> {
        self.location_line().map(|line| SourceLocation {
            path: fs_path.to_owned(),
            line,
            column: 0,
        })
    }
}

/// A position within a source file. Lines and columns are 0-based.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceLocation {
    /// The file.
    pub path: Utf8PathBuf,
    /// The 0-based line.
    pub line: u32,
    /// The 0-based column.
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Rendered 1-based, as editors and terminals expect.
        write!(f, "{}:{}", self.path, self.line + 1)
    }
}
