// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for phpunit-explorer.
//!
//! The embedded [`ExplorerConfig::DEFAULT_CONFIG`] is always loaded first. A repository-specific
//! `.config/phpunit-explorer.toml` (or an explicitly passed file) is layered on top of it.

use crate::errors::{ConfigParseError, ConfigParseErrorKind};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::collections::BTreeSet;
use tracing::warn;

/// Overall configuration for phpunit-explorer.
#[derive(Clone, Debug)]
pub struct ExplorerConfig {
    workspace_root: Utf8PathBuf,
    runner: RunnerConfig,
    discovery: DiscoveryConfig,
}

impl ExplorerConfig {
    /// The default location of the config within the workspace: `.config/phpunit-explorer.toml`.
    pub const CONFIG_PATH: &'static str = ".config/phpunit-explorer.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Repository-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Reads the config from `config_file`, or if not specified from
    /// `.config/phpunit-explorer.toml` in the workspace root.
    ///
    /// If neither exists, the default config is used. Unknown keys are logged as warnings.
    pub fn from_sources(
        workspace_root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        let workspace_root = workspace_root.into();
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = workspace_root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (config, ignored) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        if !ignored.is_empty() {
            let keys: Vec<_> = ignored.into_iter().collect();
            warn!(
                "ignoring unknown configuration keys in `{config_file}`: {}",
                keys.join(", ")
            );
        }

        let discovery = DiscoveryConfig::new(&config.discovery.include, &config.discovery.exclude)
            .map_err(|kind| ConfigParseError::new(&config_file, kind))?;

        Ok(Self {
            workspace_root,
            runner: config.runner,
            discovery,
        })
    }

    /// Returns the default config, with no repository-specific overrides.
    pub fn default_config(workspace_root: impl Into<Utf8PathBuf>) -> Self {
        let (config, _) = Self::build_and_deserialize_config(&Self::make_default_config())
            .expect("default config is always valid");
        let discovery = DiscoveryConfig::new(&config.discovery.include, &config.discovery.exclude)
            .expect("default discovery globs are always valid");

        Self {
            workspace_root: workspace_root.into(),
            runner: config.runner,
            discovery,
        }
    }

    /// Returns the workspace root.
    pub fn workspace_root(&self) -> &Utf8Path {
        &self.workspace_root
    }

    /// Returns the runner configuration.
    pub fn runner(&self) -> &RunnerConfig {
        &self.runner
    }

    /// Returns the discovery configuration.
    pub fn discovery(&self) -> &DiscoveryConfig {
        &self.discovery
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(ExplorerConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: ExplorerConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // serde_path_to_error already reports the key, so drop it from the config error.
                let path = error.path().clone();
                let error = match error.into_inner() {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ExplorerConfigDeserialize {
    runner: RunnerConfig,
    discovery: DiscoveryConfigDeserialize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct DiscoveryConfigDeserialize {
    include: Vec<String>,
    exclude: Vec<String>,
}

/// How the test runner is located and invoked.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunnerConfig {
    #[serde(default)]
    binary: Option<Utf8PathBuf>,
    candidates: Vec<String>,
    args: Vec<String>,
}

impl RunnerConfig {
    /// Returns the explicitly configured runner binary, if any.
    pub fn binary(&self) -> Option<&Utf8Path> {
        self.binary.as_deref()
    }

    /// Returns the binary names searched for when no binary is configured.
    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Returns extra arguments appended to every runner invocation.
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Which files are scanned for tests.
#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    include: GlobSet,
    exclude: GlobSet,
    // Directories matched by an exclude pattern ending in `/**`, so that walks can prune them.
    exclude_dirs: GlobSet,
}

impl DiscoveryConfig {
    fn new(include: &[String], exclude: &[String]) -> Result<Self, ConfigParseErrorKind> {
        let dir_patterns: Vec<_> = exclude
            .iter()
            .filter_map(|pattern| pattern.strip_suffix("/**"))
            .map(str::to_owned)
            .collect();

        Ok(Self {
            include: compile_globs(include)?,
            exclude: compile_globs(exclude)?,
            exclude_dirs: compile_globs(&dir_patterns)?,
        })
    }

    /// Returns true if the file at `relative_path` (relative to the workspace root) should be
    /// scanned for tests.
    pub fn is_match(&self, relative_path: &Utf8Path) -> bool {
        self.include.is_match(relative_path) && !self.exclude.is_match(relative_path)
    }

    /// Returns true if the directory at `relative_path` is excluded along with everything in it.
    pub fn is_excluded_dir(&self, relative_path: &Utf8Path) -> bool {
        self.exclude_dirs.is_match(relative_path)
    }
}

fn compile_globs(patterns: &[String]) -> Result<GlobSet, ConfigParseErrorKind> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(compile_glob(pattern)?);
    }
    builder
        .build()
        .map_err(|err| ConfigParseErrorKind::InvalidGlob {
            pattern: patterns.join(", "),
            err,
        })
}

fn compile_glob(pattern: &str) -> Result<Glob, ConfigParseErrorKind> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|err| ConfigParseErrorKind::InvalidGlob {
            pattern: pattern.to_owned(),
            err,
        })
}
