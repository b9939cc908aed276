// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

// The fake runner is a shell script.
#![cfg(unix)]

mod fixtures;
mod runs;
