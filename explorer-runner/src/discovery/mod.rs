// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Static test discovery.
//!
//! PHP source files are parsed into [`TestSuite`]s (test classes), each holding ordered
//! [`TestCase`]s (test methods). Identifiers are derived from the fully-qualified class name and
//! the method name, so parsing the same text twice yields the same tree.
//!
//! Parsed files are held by a [`TestRegistry`]. A file's tree is never mutated: when the file
//! changes it is parsed again and the new tree replaces the old one.

mod lexer;
mod parser;
mod registry;

pub use parser::{parse, try_parse};
pub use registry::{RefreshSummary, RegistrySnapshot, TestRegistry};

use camino::{Utf8Path, Utf8PathBuf};
use explorer_metadata::{TestCaseSummary, TestFileSummary, TestSuiteSummary};
use smol_str::SmolStr;
use std::{collections::BTreeMap, fmt, sync::Arc};

/// The identifier of a [`TestSuite`]: its fully-qualified class name.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SuiteId(SmolStr);

impl SuiteId {
    /// Creates a new suite identifier.
    pub fn new(id: impl Into<SmolStr>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SuiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The identifier of a [`TestCase`] within its suite: its method name.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct CaseId(SmolStr);

impl CaseId {
    /// Creates a new case identifier.
    pub fn new(id: impl Into<SmolStr>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A range of 0-based lines, inclusive on both ends.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LineRange {
    /// The first line.
    pub start: u32,
    /// The last line.
    pub end: u32,
}

impl LineRange {
    /// Returns true if `line` lies within this range.
    pub fn contains(&self, line: u32) -> bool {
        self.start <= line && line <= self.end
    }
}

/// A test class.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestSuite {
    /// The fully-qualified class name, without a leading backslash.
    pub id: SuiteId,

    /// The display name: namespace and class.
    pub qualified_class: String,

    /// The absolute path of the file that declares this class.
    pub fs_path: Utf8PathBuf,

    /// The lines spanned by the class declaration.
    pub range: LineRange,

    /// Test methods, in declaration order.
    pub children: Vec<Arc<TestCase>>,
}

impl TestSuite {
    /// Returns the case with the given method id.
    pub fn case(&self, id: &str) -> Option<&Arc<TestCase>> {
        self.children.iter().find(|case| case.id.as_str() == id)
    }

    pub(crate) fn to_summary(&self) -> TestSuiteSummary {
        TestSuiteSummary {
            id: self.id.0.clone(),
            start_line: self.range.start,
            end_line: self.range.end,
            cases: self
                .children
                .iter()
                .map(|case| TestCaseSummary {
                    id: case.id.0.clone(),
                    start_line: case.range.start,
                    end_line: case.range.end,
                    annotations: case.annotations.clone(),
                })
                .collect(),
        }
    }
}

/// A test method.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestCase {
    /// The method name.
    pub id: CaseId,

    /// The identifier of the suite this case belongs to.
    pub suite_id: SuiteId,

    /// The display name.
    pub method: String,

    /// The absolute path of the file that declares this method.
    pub fs_path: Utf8PathBuf,

    /// The lines spanned by the method declaration.
    pub range: LineRange,

    /// The position of this case within its suite.
    pub sort_index: usize,

    /// Annotations found in the method's docblock and attributes, keyed by tag name
    /// (`depends`, `dataProvider`, `group`, `test`, `testdox`).
    pub annotations: BTreeMap<String, Vec<String>>,
}

impl TestCase {
    /// Returns `<suite id>::<method>`, which is unique across the workspace.
    pub fn qualified_id(&self) -> String {
        format!("{}::{}", self.suite_id, self.id)
    }
}

/// The result of parsing one source file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TestFile {
    /// The absolute path of the file.
    pub path: Utf8PathBuf,

    /// Test classes, in declaration order.
    pub suites: Vec<Arc<TestSuite>>,
}

impl TestFile {
    /// Parses `source` into a test file.
    ///
    /// Returns `None` if `source` declares no test classes or fails to parse.
    pub fn parse(path: impl Into<Utf8PathBuf>, source: &str) -> Option<Self> {
        let path = path.into();
        let suites = parse(source, &path)?;
        Some(Self { path, suites })
    }

    /// Returns the path of this file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the suite with the given id.
    pub fn suite(&self, id: &str) -> Option<&Arc<TestSuite>> {
        self.suites.iter().find(|suite| suite.id.as_str() == id)
    }

    /// Iterates over all test cases, in declaration order.
    pub fn cases(&self) -> impl Iterator<Item = &Arc<TestCase>> + '_ {
        self.suites.iter().flat_map(|suite| suite.children.iter())
    }

    /// Returns the number of test cases in this file.
    pub fn test_count(&self) -> usize {
        self.cases().count()
    }

    /// Returns the innermost node enclosing the 0-based `line`: a case if the line is inside a
    /// test method, otherwise the suite whose class body contains it.
    pub fn node_at_line(&self, line: u32) -> Option<TestNode> {
        let suite = self.suites.iter().find(|suite| suite.range.contains(line))?;
        match suite.children.iter().find(|case| case.range.contains(line)) {
            Some(case) => Some(TestNode::Case(case.clone())),
            None => Some(TestNode::Suite(suite.clone())),
        }
    }

    /// Returns the machine-readable summary of this file.
    pub fn to_summary(&self) -> TestFileSummary {
        TestFileSummary {
            suites: self.suites.iter().map(|suite| suite.to_summary()).collect(),
        }
    }
}

/// A reference to a node of the test tree.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TestNode {
    /// A whole test class.
    Suite(Arc<TestSuite>),

    /// A single test method.
    Case(Arc<TestCase>),
}
