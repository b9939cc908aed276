// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Selecting tests and running them.
//!
//! A [`RunRequest`] names what to run. Against a [`RegistrySnapshot`] it turns into a [`RunPlan`],
//! and a [`TestRunner`] turns the plan into a runner command line, spawns it, and feeds every
//! record it writes through [`classify`] into a [`RunReconciler`].

use crate::{
    config::ExplorerConfig,
    discovery::{RegistrySnapshot, TestCase, TestNode},
    errors::{RunError, RunnerBinaryNotFound},
    filesystem::Filesystem,
    problem_matcher::classify,
    reconciler::{RunPlan, RunReconciler, RunSummary},
    reporter::{Reporter, RunEvent},
    test_command::ProcessCommand,
};
use camino::{Utf8Path, Utf8PathBuf};
use itertools::Itertools;
use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
};
use tracing::debug;

/// Selects a set of test cases.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TestSelector {
    /// Every discovered test.
    All,

    /// Every test declared in a file.
    File(Utf8PathBuf),

    /// Every test in a suite, by suite id.
    Suite(String),

    /// A single test, by `<suite>::<method>` id.
    Case(String),

    /// Every test whose `<suite>::<method>` id contains this text.
    Contains(String),
}

impl TestSelector {
    /// Returns true if `case` is selected.
    pub fn matches(&self, case: &TestCase) -> bool {
        match self {
            Self::All => true,
            Self::File(path) => case.fs_path == *path,
            Self::Suite(id) => case.suite_id.as_str() == id,
            Self::Case(id) => case.qualified_id() == *id,
            Self::Contains(text) => case.qualified_id().contains(text.as_str()),
        }
    }
}

impl From<TestNode> for TestSelector {
    fn from(node: TestNode) -> Self {
        match node {
            TestNode::Suite(suite) => Self::Suite(suite.id.as_str().to_owned()),
            TestNode::Case(case) => Self::Case(case.qualified_id()),
        }
    }
}

/// What to run: every case matched by an include selector and by no exclude selector.
///
/// Requests hold selectors rather than cases, so the same request can be planned again against a
/// later snapshot.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunRequest {
    include: Vec<TestSelector>,
    exclude: Vec<TestSelector>,
}

impl RunRequest {
    /// Creates a request for the given selectors.
    pub fn new(include: impl IntoIterator<Item = TestSelector>) -> Self {
        Self {
            include: include.into_iter().collect(),
            exclude: Vec::new(),
        }
    }

    /// Runs every discovered test.
    pub fn all() -> Self {
        Self::new([TestSelector::All])
    }

    /// Runs every test in `path`.
    pub fn file(path: impl Into<Utf8PathBuf>) -> Self {
        Self::new([TestSelector::File(path.into())])
    }

    /// Runs the innermost test node at the 0-based `line` of `path`: the method under the line,
    /// else the class, else the whole file.
    ///
    /// Returns `None` if `path` declares no tests.
    pub fn at_line(snapshot: &RegistrySnapshot, path: &Utf8Path, line: u32) -> Option<Self> {
        let file = snapshot.file(path)?;
        let selector = match file.node_at_line(line) {
            Some(node) => TestSelector::from(node),
            None => TestSelector::File(path.to_owned()),
        };
        Some(Self::new([selector]))
    }

    /// Adds an exclude selector.
    pub fn exclude(mut self, selector: TestSelector) -> Self {
        self.exclude.push(selector);
        self
    }

    /// Returns the include selectors.
    pub fn includes(&self) -> &[TestSelector] {
        &self.include
    }

    /// Returns the exclude selectors.
    pub fn excludes(&self) -> &[TestSelector] {
        &self.exclude
    }

    /// Returns the selected cases of `snapshot`, in path and then declaration order.
    pub fn plan(&self, snapshot: &RegistrySnapshot) -> RunPlan {
        RunPlan::new(
            snapshot
                .cases()
                .filter(|case| {
                    self.include.iter().any(|selector| selector.matches(case))
                        && !self.exclude.iter().any(|selector| selector.matches(case))
                })
                .cloned(),
        )
    }
}

/// Builds runner arguments for `plan`: an optional target file and an optional `--filter`.
///
/// The target file is passed when every selected case lives in one file; the filter is left out
/// when it would select nothing more than the target (or the whole workspace) already does.
pub fn plan_args(
    plan: &RunPlan,
    snapshot: &RegistrySnapshot,
    workspace_root: &Utf8Path,
) -> Vec<String> {
    let mut per_file: BTreeMap<&Utf8Path, usize> = BTreeMap::new();
    for case in plan.cases() {
        *per_file.entry(case.fs_path.as_path()).or_default() += 1;
    }

    let whole_files = per_file.iter().all(|(path, count)| {
        snapshot
            .file(path)
            .is_some_and(|file| file.test_count() == *count)
    });

    let mut args = Vec::new();
    let needs_filter = match per_file.keys().exactly_one() {
        Ok(&path) => {
            let target = path.strip_prefix(workspace_root).unwrap_or(path);
            args.push(target.to_string());
            !whole_files
        }
        Err(_) => !(whole_files && plan.len() == snapshot.test_count()),
    };

    if needs_filter {
        args.push("--filter".to_owned());
        args.push(filter_expression(plan));
    }
    args
}

/// Returns a `--filter` regex matching exactly the cases of `plan`, including each of their data
/// sets.
pub fn filter_expression(plan: &RunPlan) -> String {
    let alternatives = plan
        .cases()
        .iter()
        .map(|case| regex::escape(&case.qualified_id()))
        .join("|");
    format!("^(?:{alternatives})( with data set .*)?$")
}

/// Locates the test runner and runs plans through it.
#[derive(Debug)]
pub struct TestRunner<'a> {
    config: &'a ExplorerConfig,
    fs: &'a Filesystem,
    last_request: Mutex<Option<RunRequest>>,
}

impl<'a> TestRunner<'a> {
    /// Creates a new runner.
    pub fn new(config: &'a ExplorerConfig, fs: &'a Filesystem) -> Self {
        Self {
            config,
            fs,
            last_request: Mutex::new(None),
        }
    }

    /// Returns the most recent request passed to [`Self::run`], for running it again.
    pub fn last_request(&self) -> Option<RunRequest> {
        self.last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Locates the runner binary.
    ///
    /// A configured binary is used as is, relative to the workspace root. Otherwise the
    /// candidates are searched for in the workspace root and its ancestors, then on `PATH`.
    pub async fn resolve_binary(&self) -> Result<Utf8PathBuf, RunnerBinaryNotFound> {
        let root = self.config.workspace_root();
        let runner = self.config.runner();
        if let Some(binary) = runner.binary() {
            return Ok(root.join(binary));
        }

        let candidates = runner.candidates();
        if let Some(binary) = self.fs.find_up(candidates, root).await {
            return Ok(binary);
        }
        if let Some(binary) = self.fs.which(candidates, root).await {
            return Ok(binary);
        }
        Err(RunnerBinaryNotFound::new(candidates.to_vec(), root))
    }

    /// Returns the command that runs `plan` with `binary`.
    pub fn command(
        &self,
        binary: &Utf8Path,
        plan: &RunPlan,
        snapshot: &RegistrySnapshot,
    ) -> ProcessCommand {
        let root = self.config.workspace_root();
        let args = plan_args(plan, snapshot, root)
            .into_iter()
            .chain(self.config.runner().args().iter().cloned());
        ProcessCommand::from_args(binary.as_str(), args, root)
    }

    /// Plans `request` against `snapshot` and runs it.
    ///
    /// The run is cancelled once `cancel` resolves. Errors that prevent the run from starting are
    /// reported through [`RunEvent::RunFailedToStart`] and returned.
    pub async fn run<R: Reporter>(
        &self,
        request: &RunRequest,
        snapshot: &RegistrySnapshot,
        mut reporter: R,
        cancel: impl Future<Output = ()>,
    ) -> Result<RunSummary, RunError> {
        *self
            .last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(request.clone());

        let plan = request.plan(snapshot);
        if plan.is_empty() {
            debug!("no tests selected, not starting the runner");
            let summary = RunSummary::default();
            reporter.report_event(RunEvent::RunFinished { summary: &summary })?;
            return Ok(summary);
        }

        let binary = match self.resolve_binary().await {
            Ok(binary) => binary,
            Err(error) => {
                let error = RunError::from(error);
                reporter.report_event(RunEvent::RunFailedToStart { error: &error })?;
                return Err(error);
            }
        };
        let command = self.command(&binary, &plan, snapshot);
        execute(&command, &plan, reporter, cancel).await
    }
}

/// Runs `command`, reconciling its output against `plan`.
///
/// The process is killed once `cancel` resolves.
pub async fn execute<R: Reporter>(
    command: &ProcessCommand,
    plan: &RunPlan,
    mut reporter: R,
    cancel: impl Future<Output = ()>,
) -> Result<RunSummary, RunError> {
    let (mut records, handle) = match command.spawn() {
        Ok(spawned) => spawned,
        Err(error) => {
            let error = RunError::from(error);
            reporter.report_event(RunEvent::RunFailedToStart { error: &error })?;
            return Err(error);
        }
    };

    reporter.report_event(RunEvent::RunStarted {
        command_line: command.command_line(),
        test_count: plan.len(),
    })?;
    let mut reconciler = RunReconciler::new(plan, reporter)?;

    let mut cancel = std::pin::pin!(cancel);
    let mut cancel_requested = false;
    loop {
        tokio::select! {
            biased;

            () = &mut cancel, if !cancel_requested => {
                debug!("cancelling `{}`", command.command_line());
                cancel_requested = true;
                handle.cancel();
            }
            record = records.next_record() => {
                let Some(record) = record else { break };
                if let Some(event) = classify(&record) {
                    reconciler.handle(event)?;
                }
            }
        }
    }

    let outcome = records.finish().await.map_err(RunError::Wait)?;
    Ok(reconciler.finish(&outcome)?)
}
