// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Report the progress and results of a test run in human and machine-readable formats.
//!
//! Every [`RunEvent`] of a run is passed to a [`Reporter`]. [`DisplayReporter`] writes colored
//! status lines for a terminal, and [`JsonReporter`] writes one JSON object per event.

mod displayer;
mod events;
mod structured;

pub use displayer::*;
pub use events::*;
pub use structured::*;

use crate::errors::WriteEventError;

/// Receives the events of a test run.
pub trait Reporter {
    /// Handles a single event.
    fn report_event(&mut self, event: RunEvent<'_>) -> Result<(), WriteEventError>;
}

impl<R: Reporter + ?Sized> Reporter for &mut R {
    fn report_event(&mut self, event: RunEvent<'_>) -> Result<(), WriteEventError> {
        (**self).report_event(event)
    }
}

impl<R: Reporter + ?Sized> Reporter for Box<R> {
    fn report_event(&mut self, event: RunEvent<'_>) -> Result<(), WriteEventError> {
        (**self).report_event(event)
    }
}
