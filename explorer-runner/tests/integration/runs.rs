// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use color_eyre::eyre::{Result, ensure};
use explorer_runner::{
    discovery::TestCase,
    errors::RunError,
    reconciler::RunSummary,
    runner::{RunRequest, TestRunner, TestSelector},
};
use indoc::indoc;
use pretty_assertions::assert_eq;
use std::{future, sync::Arc};
use tokio::sync::Notify;

fn ids<'a>(cases: impl IntoIterator<Item = &'a Arc<TestCase>>) -> Vec<String> {
    cases.into_iter().map(|case| case.qualified_id()).collect()
}

async fn run(
    workspace: &Workspace,
    request: &RunRequest,
    reporter: &mut RecordingReporter,
) -> Result<RunSummary, RunError> {
    let config = workspace.config().expect("config is valid");
    let fs = workspace.filesystem();
    let registry = workspace.registry(&config).await.expect("refresh succeeded");
    TestRunner::new(&config, &fs)
        .run(request, &registry.snapshot(), reporter, future::pending())
        .await
}

#[tokio::test]
async fn single_passing_test() -> Result<()> {
    test_init();
    let workspace = Workspace::new(
        &[("tests/FooTest.php", FOO_TEST)],
        indoc! {r#"
            PHPUnit 10.5.0 by Sebastian Bergmann and contributors.
            {"event":"testStarted","id":"FooTest::testBar"}
            {"event":"testFinished","id":"FooTest::testBar","duration":3}
        "#},
        0,
    )?;

    let mut reporter = RecordingReporter::default();
    let request = RunRequest::new([TestSelector::Case("FooTest::testBar".to_owned())]);
    let summary = run(&workspace, &request, &mut reporter).await?;

    assert_eq!(
        reporter.events,
        [
            "run-started 1",
            "test-queued FooTest::testBar",
            "test-started FooTest::testBar",
            "test-passed FooTest::testBar",
            "run-finished",
        ]
    );
    ensure!(summary.is_success(), "run succeeded: {summary:?}");
    assert_eq!(summary.passed, 1);
    assert_eq!(
        workspace.runner_args()?,
        [
            "tests/FooTest.php",
            "--filter",
            r"^(?:FooTest::testBar)( with data set .*)?$",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn failing_test_with_location() -> Result<()> {
    test_init();
    let workspace = Workspace::new(
        &[("tests/FooTest.php", FOO_TEST)],
        indoc! {r#"
            {"event":"testStarted","id":"testBar"}
            {"event":"testFailed","id":"testBar","message":"Failed asserting that false is true.","details":[{"file":"tests/FooTest.php","line":10}],"duration":1.5}
        "#},
        1,
    )?;

    let mut reporter = RecordingReporter::default();
    let request = RunRequest::new([TestSelector::Case("FooTest::testBar".to_owned())]);
    let summary = run(&workspace, &request, &mut reporter).await?;

    assert_eq!(
        reporter.events,
        [
            "run-started 1",
            "test-queued FooTest::testBar",
            "test-started FooTest::testBar",
            "test-failed FooTest::testBar at 9",
            "run-finished",
        ]
    );
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.exit_code, Some(1));
    ensure!(!summary.no_results, "failing tests are results");
    Ok(())
}

#[tokio::test]
async fn parameterized_test() -> Result<()> {
    test_init();
    let workspace = Workspace::new(
        &[("tests/FooTest.php", FOO_TEST)],
        indoc! {r#"
            {"event":"testStarted","id":"FooTest::testSum with data set #0"}
            {"event":"testFinished","id":"FooTest::testSum with data set #0","duration":1}
            {"event":"testStarted","id":"FooTest::testSum with data set #1"}
            {"event":"testFailed","id":"FooTest::testSum with data set #1","message":"Failed asserting that 2 is identical to 1.","expected":"1","actual":"2","details":[{"file":"tests/FooTest.php","line":18}],"duration":1}
        "#},
        1,
    )?;

    let mut reporter = RecordingReporter::default();
    let request = RunRequest::file(workspace.path("tests/FooTest.php"));
    let summary = run(&workspace, &request, &mut reporter).await?;

    assert_eq!(
        reporter.events,
        [
            "run-started 2",
            "test-queued FooTest::testBar",
            "test-queued FooTest::testSum",
            "test-started FooTest::testSum",
            "test-passed FooTest::testSum with data set #0",
            "test-failed FooTest::testSum at 17",
            "run-finished",
        ]
    );
    // The last data set decides the state of the case.
    assert_eq!((summary.passed, summary.failed), (0, 1));
    assert_eq!(ids(&summary.not_run), ["FooTest::testBar"]);
    assert_eq!(workspace.runner_args()?, ["tests/FooTest.php"]);
    Ok(())
}

#[tokio::test]
async fn runner_crash_without_results() -> Result<()> {
    test_init();
    let workspace = Workspace::with_script(
        &[("tests/FooTest.php", FOO_TEST)],
        "echo 'PHP Fatal error: Uncaught Error' >&2\nexit 255\n",
    )?;

    let mut reporter = RecordingReporter::default();
    let summary = run(&workspace, &RunRequest::all(), &mut reporter).await?;

    assert_eq!(
        reporter.events,
        [
            "run-started 2",
            "test-queued FooTest::testBar",
            "test-queued FooTest::testSum",
            "run-errored Some(255) PHP Fatal error: Uncaught Error",
            "run-finished",
        ]
    );
    ensure!(summary.no_results, "summary marks missing results");
    assert_eq!(ids(summary.orphaned()), ["FooTest::testBar", "FooTest::testSum"]);
    Ok(())
}

#[tokio::test]
async fn chatter_and_malformed_records() -> Result<()> {
    test_init();
    let workspace = Workspace::new(
        &[("tests/FooTest.php", FOO_TEST)],
        indoc! {r#"
            Runtime: PHP 8.3.0
            progress: {"event":"testStarted","id":"FooTest::testBar"}
            {"event":"testFinished","id":"FooTest::testBar"}
            {"event":"testExploded","id":"FooTest::testBar"}
            {"event":"testIgnored","id":"OtherTest::testNothing"}
            {"message":"neither an event nor an id"}
            not json {
            {"event":"testIgnored","id":"FooTest::testSum"}
        "#},
        0,
    )?;

    let mut reporter = RecordingReporter::default();
    let summary = run(&workspace, &RunRequest::all(), &mut reporter).await?;

    assert_eq!(
        reporter.events,
        [
            "run-started 2",
            "test-queued FooTest::testBar",
            "test-queued FooTest::testSum",
            "test-started FooTest::testBar",
            "test-started FooTest::testSum",
            "test-skipped FooTest::testSum",
            "run-finished",
        ]
    );
    assert_eq!(summary.skipped, 1);
    assert_eq!(ids(&summary.errored), ["FooTest::testBar"]);
    Ok(())
}

#[tokio::test]
async fn cancelled_run() -> Result<()> {
    test_init();
    let workspace = Workspace::with_script(
        &[("tests/FooTest.php", FOO_TEST)],
        indoc! {r#"
            echo '{"event":"testStarted","id":"FooTest::testBar"}'
            exec sleep 30
        "#},
    )?;
    let config = workspace.config()?;
    let fs = workspace.filesystem();
    let registry = workspace.registry(&config).await?;

    let started = Arc::new(Notify::new());
    let mut reporter = RecordingReporter::notify_on_start(started.clone());
    let summary = TestRunner::new(&config, &fs)
        .run(
            &RunRequest::all(),
            &registry.snapshot(),
            &mut reporter,
            async move { started.notified().await },
        )
        .await?;

    assert_eq!(
        reporter.events,
        [
            "run-started 2",
            "test-queued FooTest::testBar",
            "test-queued FooTest::testSum",
            "test-started FooTest::testBar",
            "test-skipped FooTest::testSum",
            "run-finished",
        ]
    );
    ensure!(summary.cancelled, "run was cancelled");
    ensure!(!summary.no_results, "cancelled runs don't report missing results");
    assert_eq!(summary.exit_code, None);
    assert_eq!(ids(&summary.errored), ["FooTest::testBar"]);
    assert_eq!(ids(&summary.not_run), ["FooTest::testSum"]);
    Ok(())
}

#[tokio::test]
async fn runner_fails_to_spawn() -> Result<()> {
    test_init();
    let workspace = Workspace::new(&[("tests/FooTest.php", FOO_TEST)], "", 0)?;
    std::fs::remove_file(workspace.path("bin/fake-phpunit"))?;

    let mut reporter = RecordingReporter::default();
    let error = run(&workspace, &RunRequest::all(), &mut reporter)
        .await
        .expect_err("runner binary is missing");

    ensure!(
        matches!(error, RunError::Spawn(_)),
        "expected a spawn error, found {error:?}"
    );
    assert_eq!(reporter.events, ["run-failed-to-start"]);
    Ok(())
}
