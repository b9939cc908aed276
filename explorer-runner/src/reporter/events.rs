// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events produced during a test run.
//!
//! These are consumed by [`Reporter`](super::Reporter) implementations.

use crate::{
    discovery::TestCase,
    errors::RunError,
    reconciler::{FailureReport, RunSummary},
};

/// An event that occurred during a test run.
#[derive(Clone, Copy, Debug)]
pub enum RunEvent<'a> {
    /// The runner process was spawned.
    RunStarted {
        /// The command line that was run.
        command_line: &'a str,

        /// The number of test cases selected for the run.
        test_count: usize,
    },

    /// The runner could not be started. No further events follow.
    RunFailedToStart {
        /// The reason.
        error: &'a RunError,
    },

    /// A test case was selected for the run and is waiting to start.
    TestQueued {
        /// The test case.
        case: &'a TestCase,
    },

    /// The runner began executing a test case.
    TestStarted {
        /// The test case.
        case: &'a TestCase,
    },

    /// A test case passed.
    TestPassed {
        /// The test case.
        case: &'a TestCase,

        /// The runner-reported id, if this result is for a single data set.
        data_set: Option<&'a str>,

        /// The reported duration, in milliseconds.
        duration: f64,
    },

    /// A test case failed.
    TestFailed {
        /// The test case.
        case: &'a TestCase,

        /// The runner-reported id, if this result is for a single data set.
        data_set: Option<&'a str>,

        /// What went wrong, and where.
        report: &'a FailureReport,

        /// The reported duration, in milliseconds.
        duration: f64,
    },

    /// A test case was skipped, either by the runner or because the run was cancelled before it
    /// started.
    TestSkipped {
        /// The test case.
        case: &'a TestCase,

        /// The runner-reported id, if this result is for a single data set.
        data_set: Option<&'a str>,
    },

    /// The runner exited unsuccessfully without reporting any test results.
    RunErrored {
        /// The runner's exit code, or `None` if it was terminated by a signal.
        exit_code: Option<i32>,

        /// Everything the runner wrote to stderr.
        stderr: &'a str,
    },

    /// The run finished.
    RunFinished {
        /// Counts and leftovers for the run.
        summary: &'a RunSummary,
    },
}

impl RunEvent<'_> {
    /// Returns the kebab-case name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run-started",
            Self::RunFailedToStart { .. } => "run-failed-to-start",
            Self::TestQueued { .. } => "test-queued",
            Self::TestStarted { .. } => "test-started",
            Self::TestPassed { .. } => "test-passed",
            Self::TestFailed { .. } => "test-failed",
            Self::TestSkipped { .. } => "test-skipped",
            Self::RunErrored { .. } => "run-errored",
            Self::RunFinished { .. } => "run-finished",
        }
    }
}
