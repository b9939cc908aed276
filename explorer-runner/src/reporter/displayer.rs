// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Human-readable output for a test run.

use super::{Reporter, RunEvent};
use crate::{
    discovery::TestCase,
    errors::{DisplayErrorChain, WriteEventError},
    problem_matcher::normalize_id,
    reconciler::{FailureReport, RunSummary},
};
use owo_colors::{OwoColorize, Style};
use std::{fmt, io};
use swrite::{SWrite, swrite};

/// Writes colored status lines for a test run, one per finished test.
pub struct DisplayReporter<W> {
    writer: W,
    styles: Styles,
    show_started: bool,
}

impl<W: io::Write> DisplayReporter<W> {
    /// Creates a new reporter writing to `writer`, without colors.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            styles: Styles::default(),
            show_started: false,
        }
    }

    /// Colorizes output.
    pub fn colorize(&mut self) {
        self.styles.colorize();
    }

    /// Also writes a line when each test starts.
    pub fn set_show_started(&mut self, show_started: bool) {
        self.show_started = show_started;
    }

    /// Consumes the reporter, returning the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_event(&mut self, event: RunEvent<'_>) -> io::Result<()> {
        match event {
            RunEvent::RunStarted {
                command_line,
                test_count,
            } => {
                writeln!(
                    self.writer,
                    "{:>12} {} {} with `{command_line}`",
                    "Starting".style(self.styles.pass),
                    test_count.style(self.styles.count),
                    plural(test_count, "test", "tests"),
                )?;
            }
            RunEvent::RunFailedToStart { error } => {
                writeln!(
                    self.writer,
                    "{:>12} {}",
                    "ERROR".style(self.styles.fail),
                    DisplayErrorChain::new(error),
                )?;
            }
            RunEvent::TestQueued { .. } => {}
            RunEvent::TestStarted { case } => {
                if self.show_started {
                    writeln!(
                        self.writer,
                        "{:>12} {:>11} {}",
                        "START".style(self.styles.start),
                        "",
                        DisplayTestName::new(case, None, &self.styles),
                    )?;
                }
            }
            RunEvent::TestPassed {
                case,
                data_set,
                duration,
            } => {
                writeln!(
                    self.writer,
                    "{:>12} {}{}",
                    "PASS".style(self.styles.pass),
                    DisplayBracketedDuration(duration),
                    DisplayTestName::new(case, data_set, &self.styles),
                )?;
            }
            RunEvent::TestFailed {
                case,
                data_set,
                report,
                duration,
            } => {
                writeln!(
                    self.writer,
                    "{:>12} {}{}",
                    "FAIL".style(self.styles.fail),
                    DisplayBracketedDuration(duration),
                    DisplayTestName::new(case, data_set, &self.styles),
                )?;
                self.write_failure(report)?;
            }
            RunEvent::TestSkipped { case, data_set } => {
                writeln!(
                    self.writer,
                    "{:>12} {:>11} {}",
                    "SKIP".style(self.styles.skip),
                    "",
                    DisplayTestName::new(case, data_set, &self.styles),
                )?;
            }
            RunEvent::RunErrored { exit_code, stderr } => {
                let status = match exit_code {
                    Some(code) => format!("exited with code {code}"),
                    None => "was terminated by a signal".to_owned(),
                };
                writeln!(
                    self.writer,
                    "{:>12} test runner {status} without reporting any results",
                    "ERROR".style(self.styles.fail),
                )?;
                for line in stderr.lines() {
                    writeln!(self.writer, "    {line}")?;
                }
            }
            RunEvent::RunFinished { summary } => self.write_summary(summary)?,
        }
        Ok(())
    }

    fn write_failure(&mut self, report: &FailureReport) -> io::Result<()> {
        if let Some(location) = &report.location {
            writeln!(
                self.writer,
                "{:>12} {}",
                "-->".style(self.styles.fail),
                location
            )?;
        }
        for line in report.text.lines() {
            let style = if line.starts_with("---") || line.starts_with("+++") {
                self.styles.count
            } else if line.starts_with('-') {
                self.styles.fail
            } else if line.starts_with('+') {
                self.styles.pass
            } else {
                Style::new()
            };
            writeln!(self.writer, "    {}", line.style(style))?;
        }
        Ok(())
    }

    fn write_summary(&mut self, summary: &RunSummary) -> io::Result<()> {
        writeln!(self.writer, "{}", "-".repeat(12))?;

        let (status, style) = if summary.cancelled {
            ("Cancelled", self.styles.fail)
        } else if summary.is_success() {
            ("Summary", self.styles.pass)
        } else {
            ("Summary", self.styles.fail)
        };
        let mut out = String::new();
        write_summary_str(summary, &self.styles, &mut out);
        writeln!(self.writer, "{:>12} {out}", status.style(style))?;

        for case in &summary.errored {
            writeln!(
                self.writer,
                "{:>12} {:>11} {}",
                "UNFINISHED".style(self.styles.fail),
                "",
                DisplayTestName::new(case, None, &self.styles),
            )?;
        }
        Ok(())
    }

}

impl<W: io::Write> Reporter for DisplayReporter<W> {
    fn report_event(&mut self, event: RunEvent<'_>) -> Result<(), WriteEventError> {
        self.write_event(event)
            .and_then(|()| self.writer.flush())
            .map_err(WriteEventError::Io)
    }
}

fn write_summary_str(summary: &RunSummary, styles: &Styles, out: &mut String) {
    swrite!(
        out,
        "{} {} run: {} {}, {} {}, {} {}",
        summary.test_count.style(styles.count),
        plural(summary.test_count, "test", "tests"),
        summary.passed.style(styles.count),
        "passed".style(styles.pass),
        summary.failed.style(styles.count),
        "failed".style(styles.fail),
        summary.skipped.style(styles.count),
        "skipped".style(styles.skip),
    );
    if !summary.not_run.is_empty() {
        swrite!(
            out,
            ", {} {}",
            summary.not_run.len().style(styles.count),
            "not run".style(styles.skip),
        );
    }
    if !summary.errored.is_empty() {
        swrite!(
            out,
            ", {} {}",
            summary.errored.len().style(styles.count),
            "did not finish".style(styles.fail),
        );
    }
}

fn plural(count: usize, singular: &'static str, plural: &'static str) -> &'static str {
    if count == 1 { singular } else { plural }
}

#[derive(Debug, Default)]
struct Styles {
    count: Style,
    pass: Style,
    fail: Style,
    skip: Style,
    start: Style,
    suite: Style,
    method: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.skip = Style::new().yellow().bold();
        self.start = Style::new().blue().bold();
        self.suite = Style::new().magenta().bold();
        self.method = Style::new().blue().bold();
    }
}

/// A duration in milliseconds, displayed as `[   1.234s] `.
struct DisplayBracketedDuration(f64);

impl fmt::Display for DisplayBracketedDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:>8.3}s] ", self.0 / 1000.0)
    }
}

struct DisplayTestName<'a> {
    case: &'a TestCase,
    data_set: Option<&'a str>,
    styles: &'a Styles,
}

impl<'a> DisplayTestName<'a> {
    fn new(case: &'a TestCase, data_set: Option<&'a str>, styles: &'a Styles) -> Self {
        Self {
            case,
            data_set,
            styles,
        }
    }
}

impl fmt::Display for DisplayTestName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}::{}",
            self.case.suite_id.style(self.styles.suite),
            self.case.id.style(self.styles.method),
        )?;
        if let Some(id) = self.data_set {
            // Only the data set suffix: the rest is already displayed.
            write!(f, "{}", &id[normalize_id(id).len()..])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        discovery::TestFile,
        problem_matcher::{FailureMessage, SourceLocation},
    };
    use camino::Utf8PathBuf;
    use explorer_metadata::FailureDetail;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn case() -> Arc<TestCase> {
        let file = TestFile::parse(
            "/project/tests/FooTest.php",
            "<?php namespace App; class FooTest { function testBar() {} }",
        )
        .expect("test file");
        file.cases().next().cloned().expect("one case")
    }

    fn render(events: &[RunEvent<'_>]) -> String {
        let mut reporter = DisplayReporter::new(Vec::new());
        for event in events {
            reporter.report_event(*event).expect("writing to a Vec succeeds");
        }
        String::from_utf8(reporter.into_inner()).expect("output is UTF-8")
    }

    #[test]
    fn status_lines() {
        let case = case();
        let output = render(&[
            RunEvent::RunStarted {
                command_line: "vendor/bin/phpunit",
                test_count: 1,
            },
            RunEvent::TestQueued { case: &case },
            RunEvent::TestStarted { case: &case },
            RunEvent::TestPassed {
                case: &case,
                data_set: None,
                duration: 12.0,
            },
            RunEvent::TestSkipped {
                case: &case,
                data_set: Some("App\\FooTest::testBar with data set #3"),
            },
        ]);
        assert_eq!(
            output,
            concat!(
                "    Starting 1 test with `vendor/bin/phpunit`\n",
                "        PASS [   0.012s] App\\FooTest::testBar\n",
                "        SKIP             App\\FooTest::testBar with data set #3\n",
            )
        );
    }

    #[test]
    fn failure_with_diff() {
        let case = case();
        let failure = FailureMessage::new(
            "Failed asserting that two values are equal.",
            "1",
            "2",
            vec![FailureDetail {
                file: "/project/tests/FooTest.php".to_owned(),
                line: 5,
            }],
        );
        let report = FailureReport {
            text: failure.diff_text(),
            location: Some(SourceLocation {
                path: Utf8PathBuf::from("/project/tests/FooTest.php"),
                line: 4,
                column: 0,
            }),
            failure,
        };
        let output = render(&[RunEvent::TestFailed {
            case: &case,
            data_set: None,
            report: &report,
            duration: 1500.0,
        }]);
        assert_eq!(
            output,
            concat!(
                "        FAIL [   1.500s] App\\FooTest::testBar\n",
                "         --> /project/tests/FooTest.php:5\n",
                "    Failed asserting that two values are equal.\n",
                "    --- Expected\n",
                "    +++ Actual\n",
                "    -1\n",
                "    +2\n",
            )
        );
    }

    #[test]
    fn runner_errored() {
        let output = render(&[RunEvent::RunErrored {
            exit_code: Some(255),
            stderr: "PHP Fatal error: oops\nin bootstrap.php\n",
        }]);
        assert_eq!(
            output,
            concat!(
                "       ERROR test runner exited with code 255 without reporting any results\n",
                "    PHP Fatal error: oops\n",
                "    in bootstrap.php\n",
            )
        );
    }

    #[test]
    fn summary() {
        let case = case();
        let summary = RunSummary {
            test_count: 4,
            passed: 2,
            failed: 1,
            errored: vec![case],
            ..RunSummary::default()
        };
        let output = render(&[RunEvent::RunFinished { summary: &summary }]);
        assert_eq!(
            output,
            indoc! {"
                ------------
                     Summary 4 tests run: 2 passed, 1 failed, 0 skipped, 1 did not finish
                  UNFINISHED             App\\FooTest::testBar
            "}
        );
    }
}
