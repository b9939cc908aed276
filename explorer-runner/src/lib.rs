// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for phpunit-explorer.
//!
//! The flow of a run:
//!
//! 1. [`discovery`] parses PHP sources into suites and cases, kept in a
//!    [`TestRegistry`](discovery::TestRegistry).
//! 2. A [`RunRequest`](runner::RunRequest) is planned against a snapshot of the registry.
//! 3. The [`runner`] spawns the test runner through [`test_command`], classifies each record it
//!    writes with [`problem_matcher`], and hands the events to a
//!    [`RunReconciler`](reconciler::RunReconciler).
//! 4. The reconciler reports progress to a [`Reporter`](reporter::Reporter).

pub mod config;
pub mod discovery;
pub mod errors;
pub mod filesystem;
pub mod problem_matcher;
pub mod reconciler;
pub mod reporter;
pub mod runner;
pub mod test_command;
