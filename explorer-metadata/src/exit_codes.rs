// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `phpunit-explorer` failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum ExplorerExitCode {}

impl ExplorerExitCode {
    /// No errors occurred and phpunit-explorer exited normally.
    pub const OK: i32 = 0;

    /// No tests were selected to run, but no other errors occurred.
    pub const NO_TESTS_RUN: i32 = 4;

    /// One or more tests failed.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// The test runner process could not be spawned, or exited without reporting any results.
    pub const RUNNER_FAILED: i32 = 101;

    /// The run was cancelled before the test runner exited.
    pub const RUN_CANCELLED: i32 = 102;

    /// Writing data to stdout or stderr produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;

    /// A user issue happened while setting up a phpunit-explorer invocation.
    pub const SETUP_ERROR: i32 = 96;
}
