// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{ExpectedError, errors::Result};
use clap::{Args, ValueEnum};
use owo_colors::{OwoColorize, Style};
use std::{env, fmt};
use supports_color::Stream;
use tracing::{Event, Level, Subscriber, level_filters::LevelFilter};
use tracing_subscriber::{
    Layer,
    filter::Targets,
    fmt::{FmtContext, FormatEvent, FormatFields, format::Writer},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// Events with this target are printed without an `error:`-style heading.
pub(crate) const NO_HEADING: &str = "phpunit_explorer::no_heading";

/// Overrides the log level, as a list of `target=level` directives.
const LOG_ENV: &str = "PHPUNIT_EXPLORER_LOG";

#[derive(Copy, Clone, Debug, Args)]
#[must_use]
pub(crate) struct OutputOpts {
    /// Verbose output
    #[arg(long, short, global = true, env = "PHPUNIT_EXPLORER_VERBOSE")]
    pub(crate) verbose: bool,

    /// Produce color output: auto, always, never
    #[arg(
        long,
        value_enum,
        default_value_t,
        hide_possible_values = true,
        global = true,
        value_name = "WHEN"
    )]
    pub(crate) color: Color,
}

impl OutputOpts {
    /// Installs the global logger.
    ///
    /// If `PHPUNIT_EXPLORER_LOG` is invalid, the logger is installed with the default level and
    /// the error is returned.
    pub(crate) fn init(self) -> Result<OutputContext> {
        let default_level = if self.verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };
        let (targets, result) = match log_targets(env::var(LOG_ENV)) {
            Ok(Some(targets)) => (targets, Ok(())),
            Ok(None) => (Targets::new().with_default(default_level), Ok(())),
            Err(error) => (Targets::new().with_default(default_level), Err(error)),
        };

        let layer = tracing_subscriber::fmt::layer()
            .event_format(HeadingFormatter {
                colorize: self.color.should_colorize(Stream::Stderr),
            })
            .with_writer(std::io::stderr)
            .with_filter(targets);
        // Only the first logger installed in a process takes effect.
        let _ = tracing_subscriber::registry().with(layer).try_init();

        result.map(|()| OutputContext {
            verbose: self.verbose,
            color: self.color,
        })
    }

    /// Returns styles for errors printed to stderr.
    pub(crate) fn stderr_styles(self) -> StderrStyles {
        let mut styles = StderrStyles::default();
        if self.color.should_colorize(Stream::Stderr) {
            styles.bold = Style::new().bold();
        }
        styles
    }
}

/// Parses the value of `PHPUNIT_EXPLORER_LOG`. An unset or empty variable means the default level.
fn log_targets(var: Result<String, env::VarError>) -> Result<Option<Targets>> {
    match var {
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => match value.parse() {
            Ok(targets) => Ok(Some(targets)),
            Err(err) => Err(ExpectedError::InvalidLogFilter {
                value,
                err: Some(err),
            }),
        },
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(value)) => Err(ExpectedError::InvalidLogFilter {
            value: value.to_string_lossy().into_owned(),
            err: None,
        }),
    }
}

/// Output settings for a single invocation.
#[derive(Copy, Clone, Debug)]
#[must_use]
pub struct OutputContext {
    pub(crate) verbose: bool,
    pub(crate) color: Color,
}

/// When to produce color output.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
#[must_use]
pub enum Color {
    /// Colorize if the stream supports it.
    #[default]
    Auto,
    /// Always colorize.
    Always,
    /// Never colorize.
    Never,
}

impl Color {
    pub(crate) fn should_colorize(self, stream: Stream) -> bool {
        match self {
            Color::Auto => supports_color::on_cached(stream).is_some(),
            Color::Always => true,
            Color::Never => false,
        }
    }
}

/// Prints each event as `<level>: <message>`.
struct HeadingFormatter {
    colorize: bool,
}

impl HeadingFormatter {
    fn heading(&self, level: Level) -> (&'static str, Style) {
        let (heading, style) = match level {
            Level::ERROR => ("error", Style::new().red().bold()),
            Level::WARN => ("warning", Style::new().yellow().bold()),
            Level::INFO => ("info", Style::new().bold()),
            Level::DEBUG => ("debug", Style::new().bold()),
            Level::TRACE => ("trace", Style::new().dimmed()),
        };
        (heading, if self.colorize { style } else { Style::new() })
    }
}

impl<S, N> FormatEvent<S, N> for HeadingFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        if metadata.target() != NO_HEADING {
            let (heading, style) = self.heading(*metadata.level());
            write!(writer, "{}: ", heading.style(style))?;
        }
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Styles for messages written to stderr outside of logging.
#[derive(Debug, Default)]
pub struct StderrStyles {
    pub(crate) bold: Style,
}
