// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Discover PHPUnit tests and run them from the command line.
//!
//! `phpunit-explorer list` prints the tests found in a workspace, and `phpunit-explorer run`
//! runs a selection of them through the workspace's test runner.

#![warn(missing_docs)]

mod dispatch;
mod errors;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
