// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Structured access to the machine-readable formats used by phpunit-explorer.
//!
//! The test runner subprocess writes one JSON object per line to standard output. Each object is
//! read as a [`RawRecord`]; validating it into a typed lifecycle event is the job of the runner
//! crate.

mod exit_codes;
mod record;
mod test_list;

pub use exit_codes::*;
pub use record::*;
pub use test_list::*;
