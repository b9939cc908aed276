// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Joins runner events onto discovered test cases.
//!
//! A [`RunReconciler`] owns the state of every case selected for one run. Each [`TestEvent`] is
//! resolved to a case through its normalized id, moves that case through
//! `queued -> started -> passed | failed | skipped`, and is forwarded to a [`Reporter`].

use crate::{
    discovery::TestCase,
    errors::{UnresolvedIdError, WriteEventError},
    problem_matcher::{FailureMessage, SourceLocation, TestEvent, is_dataset_id, normalize_id},
    reporter::{Reporter, RunEvent},
    test_command::CommandOutcome,
};
use std::{collections::HashMap, sync::Arc};
use tracing::debug;

/// The test cases selected for a run, in execution order.
#[derive(Clone, Debug, Default)]
pub struct RunPlan {
    cases: Vec<Arc<TestCase>>,
}

impl RunPlan {
    /// Creates a plan out of the selected cases.
    pub fn new(cases: impl IntoIterator<Item = Arc<TestCase>>) -> Self {
        Self {
            cases: cases.into_iter().collect(),
        }
    }

    /// Returns the selected cases.
    pub fn cases(&self) -> &[Arc<TestCase>] {
        &self.cases
    }

    /// Returns the number of selected cases.
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    /// Returns true if no cases are selected.
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

/// A failure, rendered for display and attached to a source location.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FailureReport {
    /// The message followed by an expected/actual diff.
    pub text: String,

    /// Where the failure happened, within the file that declares the test.
    pub location: Option<SourceLocation>,

    /// The failure as reported.
    pub failure: FailureMessage,
}

impl FailureReport {
    fn new(failure: FailureMessage, case: &TestCase) -> Self {
        Self {
            text: failure.diff_text(),
            location: failure.location(&case.fs_path),
            failure,
        }
    }
}

/// The run state of a single test case.
#[derive(Clone, Debug, PartialEq)]
pub enum CaseState {
    /// Selected, not yet started.
    Queued,

    /// The runner reported the test as started.
    Started,

    /// The test passed.
    Passed {
        /// The reported duration, in milliseconds.
        duration: f64,
    },

    /// The test failed.
    Failed {
        /// The failure.
        report: FailureReport,
        /// The reported duration, in milliseconds.
        duration: f64,
    },

    /// The runner skipped the test.
    Skipped,
}

impl CaseState {
    /// Returns true if the test has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Passed { .. } | Self::Failed { .. } | Self::Skipped
        )
    }
}

/// The result of a run.
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    /// The number of cases selected.
    pub test_count: usize,

    /// The number of cases that passed.
    pub passed: usize,

    /// The number of cases that failed.
    pub failed: usize,

    /// The number of cases the runner skipped.
    pub skipped: usize,

    /// Cases that never started.
    pub not_run: Vec<Arc<TestCase>>,

    /// Cases that started but never finished.
    pub errored: Vec<Arc<TestCase>>,

    /// True if the runner failed without reporting any results.
    pub no_results: bool,

    /// True if the run was cancelled.
    pub cancelled: bool,

    /// The runner's exit code.
    pub exit_code: Option<i32>,
}

impl RunSummary {
    /// Iterates over cases that never reached a final state.
    pub fn orphaned(&self) -> impl Iterator<Item = &Arc<TestCase>> + '_ {
        self.not_run.iter().chain(&self.errored)
    }

    /// Returns true if every selected case passed or was skipped.
    pub fn is_success(&self) -> bool {
        self.failed == 0
            && self.not_run.is_empty()
            && self.errored.is_empty()
            && !self.no_results
            && !self.cancelled
    }
}

#[derive(Debug)]
struct CaseRun {
    case: Arc<TestCase>,
    state: CaseState,
}

/// Tracks the state of every case selected for one run.
pub struct RunReconciler<R> {
    runs: Vec<CaseRun>,
    by_qualified_id: HashMap<String, usize>,
    by_method: HashMap<String, usize>,
    terminal_events: usize,
    reporter: R,
}

impl<R: Reporter> RunReconciler<R> {
    /// Creates a reconciler for `plan`, reporting every selected case as queued.
    pub fn new(plan: &RunPlan, mut reporter: R) -> Result<Self, WriteEventError> {
        let mut by_qualified_id = HashMap::new();
        let mut by_method = HashMap::new();
        let mut runs = Vec::with_capacity(plan.len());

        for (idx, case) in plan.cases().iter().enumerate() {
            by_qualified_id.entry(case.qualified_id()).or_insert(idx);
            // Unqualified ids resolve to the first case in plan order.
            by_method.entry(case.id.as_str().to_owned()).or_insert(idx);
            reporter.report_event(RunEvent::TestQueued { case })?;
            runs.push(CaseRun {
                case: Arc::clone(case),
                state: CaseState::Queued,
            });
        }

        Ok(Self {
            runs,
            by_qualified_id,
            by_method,
            terminal_events: 0,
            reporter,
        })
    }

    /// Returns the reporter.
    pub fn reporter_mut(&mut self) -> &mut R {
        &mut self.reporter
    }

    /// Returns the state of the case with the given `<suite>::<method>` id.
    pub fn state(&self, qualified_id: &str) -> Option<&CaseState> {
        let idx = *self.by_qualified_id.get(qualified_id)?;
        Some(&self.runs[idx].state)
    }

    /// Resolves a runner-reported id, after normalization, to an index into `runs`.
    fn resolve(&self, id: &str) -> Result<usize, UnresolvedIdError> {
        let key = normalize_id(id);
        let idx = if key.contains("::") {
            self.by_qualified_id.get(key)
        } else {
            self.by_method.get(key)
        };
        idx.copied().ok_or_else(|| UnresolvedIdError::new(id))
    }

    /// Applies a single event.
    ///
    /// Events for unknown tests are ignored, as are events that would move a finished test back to
    /// running. A second result for a plain id is ignored; for a data set id, the latest result
    /// wins.
    pub fn handle(&mut self, event: TestEvent) -> Result<(), WriteEventError> {
        let idx = match self.resolve(event.id()) {
            Ok(idx) => idx,
            Err(error) => {
                debug!("ignoring {} event: {error}", event.kind());
                return Ok(());
            }
        };
        let is_data_set = is_dataset_id(event.id());

        let run = &mut self.runs[idx];
        match event {
            TestEvent::Started { .. } => {
                if run.state == CaseState::Queued {
                    run.state = CaseState::Started;
                    self.reporter
                        .report_event(RunEvent::TestStarted { case: &run.case })?;
                }
                return Ok(());
            }
            _ if run.state.is_terminal() && !is_data_set => {
                debug!(
                    "ignoring {} event for `{}`: already finished",
                    event.kind(),
                    run.case.qualified_id(),
                );
                return Ok(());
            }
            _ => {}
        }

        if run.state == CaseState::Queued {
            // A result without a start is an implicit start.
            run.state = CaseState::Started;
            self.reporter
                .report_event(RunEvent::TestStarted { case: &run.case })?;
        }
        self.terminal_events += 1;

        let data_set = is_data_set.then_some(event.id());
        let state = match &event {
            TestEvent::Started { .. } => unreachable!("started events are handled above"),
            TestEvent::Finished { duration, .. } => CaseState::Passed {
                duration: *duration,
            },
            TestEvent::Ignored { .. } => CaseState::Skipped,
            TestEvent::Failed {
                failure, duration, ..
            } => CaseState::Failed {
                report: FailureReport::new(failure.clone(), &run.case),
                duration: *duration,
            },
        };
        run.state = state;

        let case = &run.case;
        let event = match &run.state {
            CaseState::Passed { duration } => RunEvent::TestPassed {
                case,
                data_set,
                duration: *duration,
            },
            CaseState::Failed { report, duration } => RunEvent::TestFailed {
                case,
                data_set,
                report,
                duration: *duration,
            },
            CaseState::Skipped => RunEvent::TestSkipped { case, data_set },
            CaseState::Queued | CaseState::Started => {
                unreachable!("state was just set to a final state")
            }
        };
        self.reporter.report_event(event)
    }

    /// Finalizes the run once the runner has exited.
    ///
    /// Cases that never reached a final state are left as they are and listed in the summary. On a
    /// cancelled run, cases that never started are reported as skipped.
    pub fn finish(mut self, outcome: &CommandOutcome) -> Result<RunSummary, WriteEventError> {
        let mut summary = RunSummary {
            test_count: self.runs.len(),
            cancelled: outcome.cancelled,
            exit_code: outcome.exit_code,
            ..RunSummary::default()
        };

        for run in &self.runs {
            match &run.state {
                CaseState::Queued => {
                    if outcome.cancelled {
                        self.reporter.report_event(RunEvent::TestSkipped {
                            case: &run.case,
                            data_set: None,
                        })?;
                    }
                    summary.not_run.push(Arc::clone(&run.case));
                }
                CaseState::Started => summary.errored.push(Arc::clone(&run.case)),
                CaseState::Passed { .. } => summary.passed += 1,
                CaseState::Failed { .. } => summary.failed += 1,
                CaseState::Skipped => summary.skipped += 1,
            }
        }

        if !outcome.cancelled && !outcome.success() && self.terminal_events == 0 {
            summary.no_results = true;
            self.reporter.report_event(RunEvent::RunErrored {
                exit_code: outcome.exit_code,
                stderr: &outcome.stderr,
            })?;
        }

        self.reporter
            .report_event(RunEvent::RunFinished { summary: &summary })?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::TestFile;
    use explorer_metadata::FailureDetail;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    /// Records events as `<event>:<case>[:<detail>]` strings.
    #[derive(Default)]
    struct RecordingReporter {
        events: Vec<String>,
    }

    impl Reporter for RecordingReporter {
        fn report_event(&mut self, event: RunEvent<'_>) -> Result<(), WriteEventError> {
            let line = match event {
                RunEvent::TestQueued { case } | RunEvent::TestStarted { case } => {
                    format!("{}:{}", event.name(), case.qualified_id())
                }
                RunEvent::TestPassed { case, data_set, .. }
                | RunEvent::TestSkipped { case, data_set } => {
                    format!("{}:{}:{data_set:?}", event.name(), case.qualified_id())
                }
                RunEvent::TestFailed { case, report, .. } => format!(
                    "{}:{}:{:?}",
                    event.name(),
                    case.qualified_id(),
                    report.location.as_ref().map(|location| location.line),
                ),
                RunEvent::RunErrored { exit_code, .. } => {
                    format!("{}:{exit_code:?}", event.name())
                }
                _ => event.name().to_owned(),
            };
            self.events.push(line);
            Ok(())
        }
    }

    fn plan() -> RunPlan {
        let source = indoc! {r#"
            <?php
            class FooTest extends TestCase
            {
                public function testBar() {}
                public function testBaz() {}
            }
            class OtherTest extends TestCase
            {
                public function testBar() {}
            }
        "#};
        let file = TestFile::parse("/project/tests/FooTest.php", source).expect("test file");
        RunPlan::new(file.cases().cloned())
    }

    fn started(id: &str) -> TestEvent {
        TestEvent::Started { id: id.to_owned() }
    }

    fn finished(id: &str) -> TestEvent {
        TestEvent::Finished {
            id: id.to_owned(),
            duration: 1.0,
        }
    }

    fn failed(id: &str) -> TestEvent {
        TestEvent::Failed {
            id: id.to_owned(),
            failure: FailureMessage::new(
                "boom",
                "1",
                "2",
                vec![FailureDetail {
                    file: "FooTest.php".to_owned(),
                    line: 10,
                }],
            ),
            duration: 3.0,
        }
    }

    fn exited(code: i32) -> CommandOutcome {
        CommandOutcome {
            exit_code: Some(code),
            cancelled: false,
            stderr: String::new(),
        }
    }

    #[test]
    fn single_passing_test() {
        let plan = RunPlan::new(plan().cases().iter().take(1).cloned());
        let mut reconciler =
            RunReconciler::new(&plan, RecordingReporter::default()).expect("reported");

        assert_eq!(reconciler.state("FooTest::testBar"), Some(&CaseState::Queued));
        reconciler.handle(started("testBar")).unwrap();
        assert_eq!(
            reconciler.state("FooTest::testBar"),
            Some(&CaseState::Started)
        );
        reconciler.handle(finished("testBar")).unwrap();
        assert_eq!(
            reconciler.state("FooTest::testBar"),
            Some(&CaseState::Passed { duration: 1.0 })
        );

        assert_eq!(
            reconciler.reporter_mut().events,
            vec![
                "test-queued:FooTest::testBar",
                "test-started:FooTest::testBar",
                "test-passed:FooTest::testBar:None",
            ]
        );
        let summary = reconciler.finish(&exited(0)).unwrap();
        assert_eq!(summary.passed, 1);
        assert!(summary.is_success());
    }

    #[test]
    fn failing_test_with_location() {
        let mut reconciler = RunReconciler::new(&plan(), RecordingReporter::default()).unwrap();
        reconciler.handle(started("testBaz")).unwrap();
        reconciler.handle(failed("testBaz")).unwrap();

        let Some(CaseState::Failed { report, duration }) = reconciler.state("FooTest::testBaz")
        else {
            panic!("testBaz should have failed");
        };
        assert_eq!(*duration, 3.0);
        let location = report.location.as_ref().expect("failure has a location");
        assert_eq!(location.path, "/project/tests/FooTest.php");
        assert_eq!(location.line, 9);
        assert_eq!(location.column, 0);
        assert_eq!(report.text, "boom\n--- Expected\n+++ Actual\n-1\n+2\n");

        let summary = reconciler.finish(&exited(1)).unwrap();
        assert_eq!(summary.failed, 1);
        assert!(!summary.no_results);
        assert!(!summary.is_success());
    }

    #[test]
    fn data_sets() {
        let mut reconciler = RunReconciler::new(&plan(), RecordingReporter::default()).unwrap();
        reconciler.handle(started("testBar with data set #0")).unwrap();
        reconciler.handle(finished("testBar with data set #0")).unwrap();
        reconciler.handle(started("testBar with data set #1")).unwrap();
        reconciler.handle(failed("testBar with data set #1")).unwrap();

        // Both data sets resolve to the first `testBar` in plan order; the later result wins.
        assert!(matches!(
            reconciler.state("FooTest::testBar"),
            Some(CaseState::Failed { .. })
        ));
        assert_eq!(
            reconciler.state("OtherTest::testBar"),
            Some(&CaseState::Queued)
        );
        assert_eq!(
            reconciler.reporter_mut().events[3..],
            [
                "test-started:FooTest::testBar",
                "test-passed:FooTest::testBar:Some(\"testBar with data set #0\")",
                "test-failed:FooTest::testBar:Some(9)",
            ]
        );
    }

    #[test]
    fn qualified_ids() {
        let mut reconciler = RunReconciler::new(&plan(), RecordingReporter::default()).unwrap();
        reconciler.handle(finished("OtherTest::testBar")).unwrap();
        reconciler
            .handle(TestEvent::Ignored {
                id: "FooTest::testBar with data set #2".to_owned(),
            })
            .unwrap();

        assert_eq!(
            reconciler.state("OtherTest::testBar"),
            Some(&CaseState::Passed { duration: 1.0 })
        );
        assert_eq!(reconciler.state("FooTest::testBar"), Some(&CaseState::Skipped));
    }

    #[test]
    fn unknown_and_out_of_order_events() {
        let mut reconciler = RunReconciler::new(&plan(), RecordingReporter::default()).unwrap();
        reconciler.handle(started("testUnknown")).unwrap();
        reconciler.handle(finished("MissingTest::testBar")).unwrap();

        reconciler.handle(failed("testBaz")).unwrap();
        // Terminal states are never left for `started`, and a plain id keeps its first result.
        reconciler.handle(started("testBaz")).unwrap();
        reconciler.handle(finished("testBaz")).unwrap();

        assert!(matches!(
            reconciler.state("FooTest::testBaz"),
            Some(CaseState::Failed { .. })
        ));
        assert_eq!(
            reconciler.reporter_mut().events[3..],
            [
                "test-started:FooTest::testBaz",
                "test-failed:FooTest::testBaz:Some(9)",
            ]
        );
    }

    #[test]
    fn orphans() {
        let mut reconciler = RunReconciler::new(&plan(), RecordingReporter::default()).unwrap();
        reconciler.handle(started("testBar")).unwrap();
        reconciler.handle(finished("testBaz")).unwrap();

        let summary = reconciler.finish(&exited(0)).unwrap();
        let errored: Vec<_> = summary.errored.iter().map(|c| c.qualified_id()).collect();
        let not_run: Vec<_> = summary.not_run.iter().map(|c| c.qualified_id()).collect();
        assert_eq!(errored, vec!["FooTest::testBar"]);
        assert_eq!(not_run, vec!["OtherTest::testBar"]);
        assert_eq!(summary.orphaned().count(), 2);
        assert!(!summary.is_success());
    }

    #[test]
    fn cancelled_run() {
        let mut reporter = RecordingReporter::default();
        let summary = {
            let mut reconciler = RunReconciler::new(&plan(), &mut reporter).unwrap();
            reconciler.handle(started("testBar")).unwrap();
            reconciler
                .finish(&CommandOutcome {
                    exit_code: None,
                    cancelled: true,
                    stderr: String::new(),
                })
                .unwrap()
        };

        assert!(summary.cancelled);
        assert!(!summary.no_results);
        assert_eq!(summary.not_run.len(), 2);
        assert_eq!(summary.errored.len(), 1);
        assert_eq!(
            reporter.events[4..],
            [
                "test-skipped:FooTest::testBaz:None",
                "test-skipped:OtherTest::testBar:None",
                "run-finished",
            ]
        );
    }

    #[test]
    fn runner_failed_without_results() {
        let mut reporter = RecordingReporter::default();
        let reconciler = RunReconciler::new(&plan(), &mut reporter).unwrap();
        let summary = reconciler.finish(&exited(255)).unwrap();
        assert!(summary.no_results);
        assert_eq!(summary.not_run.len(), 3);
        assert_eq!(reporter.events[3..], ["run-errored:Some(255)", "run-finished"]);
    }

    #[test]
    fn nonzero_exit_with_results_is_not_an_error() {
        let mut reconciler = RunReconciler::new(&plan(), RecordingReporter::default()).unwrap();
        reconciler.handle(TestEvent::Ignored { id: "testBar".to_owned() }).unwrap();
        let summary = reconciler.finish(&exited(2)).unwrap();
        assert!(!summary.no_results);
        assert_eq!(summary.skipped, 1);
    }
}
