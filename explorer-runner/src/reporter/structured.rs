// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Machine-readable output for a test run: one JSON object per line.
//!
//! Every object carries an `event` key naming the [`RunEvent`]. Tests are identified by their
//! `<suite>::<method>` id, and lines are 1-based.

use super::{Reporter, RunEvent};
use crate::{
    discovery::TestCase,
    errors::{DisplayErrorChain, WriteEventError},
    reconciler::RunSummary,
};
use camino::Utf8Path;
use serde::Serialize;
use std::io;

/// Writes every event of a run as a line of JSON.
pub struct JsonReporter<W> {
    writer: W,
}

impl<W: io::Write> JsonReporter<W> {
    /// Creates a new reporter writing to `writer`.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Consumes the reporter, returning the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: io::Write> Reporter for JsonReporter<W> {
    fn report_event(&mut self, event: RunEvent<'_>) -> Result<(), WriteEventError> {
        let event = JsonEvent::from(event);
        serde_json::to_writer(&mut self.writer, &event).map_err(WriteEventError::Json)?;
        self.writer
            .write_all(b"\n")
            .and_then(|()| self.writer.flush())
            .map_err(WriteEventError::Io)
    }
}

#[derive(Serialize)]
#[serde(
    tag = "event",
    rename_all = "kebab-case",
    rename_all_fields = "kebab-case"
)]
enum JsonEvent<'a> {
    RunStarted {
        command_line: &'a str,
        test_count: usize,
    },
    RunFailedToStart {
        error: String,
    },
    TestQueued {
        #[serde(flatten)]
        test: JsonTest<'a>,
    },
    TestStarted {
        #[serde(flatten)]
        test: JsonTest<'a>,
    },
    TestPassed {
        #[serde(flatten)]
        test: JsonTest<'a>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data_set: Option<&'a str>,
        duration_ms: f64,
    },
    TestFailed {
        #[serde(flatten)]
        test: JsonTest<'a>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data_set: Option<&'a str>,
        duration_ms: f64,
        message: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        location: Option<JsonLocation<'a>>,
    },
    TestSkipped {
        #[serde(flatten)]
        test: JsonTest<'a>,
        #[serde(skip_serializing_if = "Option::is_none")]
        data_set: Option<&'a str>,
    },
    RunErrored {
        exit_code: Option<i32>,
        stderr: &'a str,
    },
    RunFinished {
        #[serde(flatten)]
        summary: JsonSummary,
    },
}

impl<'a> From<RunEvent<'a>> for JsonEvent<'a> {
    fn from(event: RunEvent<'a>) -> Self {
        match event {
            RunEvent::RunStarted {
                command_line,
                test_count,
            } => Self::RunStarted {
                command_line,
                test_count,
            },
            RunEvent::RunFailedToStart { error } => Self::RunFailedToStart {
                error: DisplayErrorChain::new(error).to_string(),
            },
            RunEvent::TestQueued { case } => Self::TestQueued {
                test: JsonTest::new(case),
            },
            RunEvent::TestStarted { case } => Self::TestStarted {
                test: JsonTest::new(case),
            },
            RunEvent::TestPassed {
                case,
                data_set,
                duration,
            } => Self::TestPassed {
                test: JsonTest::new(case),
                data_set,
                duration_ms: duration,
            },
            RunEvent::TestFailed {
                case,
                data_set,
                report,
                duration,
            } => Self::TestFailed {
                test: JsonTest::new(case),
                data_set,
                duration_ms: duration,
                message: &report.text,
                location: report.location.as_ref().map(|location| JsonLocation {
                    path: &location.path,
                    line: location.line + 1,
                }),
            },
            RunEvent::TestSkipped { case, data_set } => Self::TestSkipped {
                test: JsonTest::new(case),
                data_set,
            },
            RunEvent::RunErrored { exit_code, stderr } => Self::RunErrored { exit_code, stderr },
            RunEvent::RunFinished { summary } => Self::RunFinished {
                summary: JsonSummary::new(summary),
            },
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct JsonTest<'a> {
    name: String,
    path: &'a Utf8Path,
    line: u32,
}

impl<'a> JsonTest<'a> {
    fn new(case: &'a TestCase) -> Self {
        Self {
            name: case.qualified_id(),
            path: &case.fs_path,
            line: case.range.start + 1,
        }
    }
}

#[derive(Serialize)]
struct JsonLocation<'a> {
    path: &'a Utf8Path,
    line: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct JsonSummary {
    test_count: usize,
    passed: usize,
    failed: usize,
    skipped: usize,
    not_run: Vec<String>,
    errored: Vec<String>,
    no_results: bool,
    cancelled: bool,
    exit_code: Option<i32>,
}

impl JsonSummary {
    fn new(summary: &RunSummary) -> Self {
        // Destructured so that new fields are accounted for.
        let RunSummary {
            test_count,
            passed,
            failed,
            skipped,
            not_run,
            errored,
            no_results,
            cancelled,
            exit_code,
        } = summary;
        Self {
            test_count: *test_count,
            passed: *passed,
            failed: *failed,
            skipped: *skipped,
            not_run: not_run.iter().map(|case| case.qualified_id()).collect(),
            errored: errored.iter().map(|case| case.qualified_id()).collect(),
            no_results: *no_results,
            cancelled: *cancelled,
            exit_code: *exit_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        discovery::TestFile,
        problem_matcher::{FailureMessage, SourceLocation},
        reconciler::FailureReport,
    };
    use camino::Utf8PathBuf;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    fn render(events: &[RunEvent<'_>]) -> Vec<Value> {
        let mut reporter = JsonReporter::new(Vec::new());
        for event in events {
            reporter.report_event(*event).expect("writing to a Vec succeeds");
        }
        let output = String::from_utf8(reporter.into_inner()).expect("output is UTF-8");
        output
            .lines()
            .map(|line| serde_json::from_str(line).expect("each line is JSON"))
            .collect()
    }

    #[test]
    fn test_events() {
        let file = TestFile::parse(
            "/project/tests/FooTest.php",
            "<?php\nclass FooTest {\n    function testBar() {}\n}\n",
        )
        .expect("test file");
        let case = file.cases().next().cloned().expect("one case");
        let report = FailureReport {
            text: "boom".to_owned(),
            location: Some(SourceLocation {
                path: Utf8PathBuf::from("/project/tests/FooTest.php"),
                line: 2,
                column: 0,
            }),
            failure: FailureMessage::new("boom", "", "", Vec::new()),
        };

        let values = render(&[
            RunEvent::TestStarted { case: &case },
            RunEvent::TestFailed {
                case: &case,
                data_set: Some("FooTest::testBar with data set #1"),
                report: &report,
                duration: 2.5,
            },
        ]);
        assert_eq!(
            values,
            vec![
                json!({
                    "event": "test-started",
                    "name": "FooTest::testBar",
                    "path": "/project/tests/FooTest.php",
                    "line": 3,
                }),
                json!({
                    "event": "test-failed",
                    "name": "FooTest::testBar",
                    "path": "/project/tests/FooTest.php",
                    "line": 3,
                    "data-set": "FooTest::testBar with data set #1",
                    "duration-ms": 2.5,
                    "message": "boom",
                    "location": { "path": "/project/tests/FooTest.php", "line": 3 },
                }),
            ]
        );
    }

    #[test]
    fn run_events() {
        let summary = RunSummary {
            test_count: 2,
            passed: 1,
            exit_code: Some(1),
            no_results: false,
            ..RunSummary::default()
        };
        let values = render(&[
            RunEvent::RunErrored {
                exit_code: None,
                stderr: "killed",
            },
            RunEvent::RunFinished { summary: &summary },
        ]);
        assert_eq!(
            values,
            vec![
                json!({ "event": "run-errored", "exit-code": null, "stderr": "killed" }),
                json!({
                    "event": "run-finished",
                    "test-count": 2,
                    "passed": 1,
                    "failed": 0,
                    "skipped": 0,
                    "not-run": [],
                    "errored": [],
                    "no-results": false,
                    "cancelled": false,
                    "exit-code": 1,
                }),
            ]
        );
    }
}
