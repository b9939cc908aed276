// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::collections::BTreeMap;

/// Root element for a serializable list of discovered tests.
///
/// This is the output of `phpunit-explorer list --message-format json`.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestListSummary {
    /// The workspace root that discovery ran against.
    pub workspace_root: Utf8PathBuf,

    /// The number of test cases discovered.
    pub test_count: usize,

    /// Discovered test files, keyed by absolute path.
    pub files: BTreeMap<Utf8PathBuf, TestFileSummary>,
}

/// The test suites discovered within a single source file.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestFileSummary {
    /// Suites in declaration order.
    pub suites: Vec<TestSuiteSummary>,
}

/// A single test class.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestSuiteSummary {
    /// The fully-qualified class name, used as the suite's identifier.
    pub id: SmolStr,

    /// The 0-based line the class declaration starts at.
    pub start_line: u32,

    /// The 0-based line the class body ends at.
    pub end_line: u32,

    /// Test cases in declaration order.
    pub cases: Vec<TestCaseSummary>,
}

/// A single test method.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TestCaseSummary {
    /// The method name, unique within its suite.
    pub id: SmolStr,

    /// The 0-based line the method declaration starts at.
    pub start_line: u32,

    /// The 0-based line the method body ends at.
    pub end_line: u32,

    /// Annotations found on the method, such as `depends` or `dataProvider`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, Vec<String>>,
}
