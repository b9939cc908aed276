// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Path search and filesystem access.
//!
//! [`Env`] captures the executable search path and the platform's executable extensions, and
//! [`Filesystem`] uses it to locate the test runner. Lookups never fail for "not found": absence
//! is reported through `None` or `false`. Only [`Filesystem::get`] returns an error.

use crate::errors::FilesystemError;
use camino::{Utf8Path, Utf8PathBuf};

/// The executable search environment.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Env {
    paths: String,
    delimiter: char,
    extensions: Vec<String>,
}

impl Env {
    /// Creates a new environment out of a delimited path list.
    pub fn new(
        paths: impl Into<String>,
        delimiter: char,
        extensions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            paths: paths.into(),
            delimiter,
            extensions: extensions.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates an environment from the current process's `PATH`, with the host platform's
    /// delimiter and executable extensions.
    pub fn from_process() -> Self {
        let paths = std::env::var("PATH").unwrap_or_default();
        Self::for_platform(paths, std::env::consts::OS)
    }

    /// Creates an environment with the delimiter and executable extensions of `platform`.
    pub fn for_platform(paths: impl Into<String>, platform: &str) -> Self {
        if is_windows_platform(platform) {
            Self::new(paths, ';', [".bat", ".exe", ".cmd", ""])
        } else {
            Self::new(paths, ':', [""])
        }
    }

    /// Returns the search directories, in order.
    ///
    /// Each entry is trimmed and has trailing delimiters removed. Empty entries are dropped.
    pub fn paths(&self) -> Vec<Utf8PathBuf> {
        self.paths
            .split(self.delimiter)
            .map(|path| path.trim().trim_end_matches(self.delimiter).trim())
            .filter(|path| !path.is_empty())
            .map(Utf8PathBuf::from)
            .collect()
    }

    /// Returns the executable extensions, in the order they are tried.
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Returns the path delimiter.
    pub fn delimiter(&self) -> char {
        self.delimiter
    }
}

/// Returns true if `platform` names a Windows-like platform.
///
/// Matches `win32`, `mingw`, `bccwin`, `cygwin`, `windows`, and `mswin` (but not `mswince`),
/// ignoring case.
pub fn is_windows_platform(platform: &str) -> bool {
    let platform = platform.to_ascii_lowercase();
    if ["win32", "windows", "mingw", "bccwin", "cygwin"]
        .iter()
        .any(|name| platform.contains(name))
    {
        return true;
    }

    platform
        .match_indices("mswin")
        .any(|(idx, m)| !platform[idx + m.len()..].starts_with("ce"))
}

/// Async filesystem access and executable search.
#[derive(Clone, Debug)]
pub struct Filesystem {
    paths: Vec<Utf8PathBuf>,
    extensions: Vec<String>,
}

impl Filesystem {
    /// Creates a new `Filesystem` searching the directories in `env`.
    pub fn new(env: &Env) -> Self {
        Self {
            paths: env.paths(),
            extensions: env.extensions.clone(),
        }
    }

    /// Reads the contents of `path`.
    pub async fn get(&self, path: &Utf8Path) -> Result<String, FilesystemError> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|err| FilesystemError::new(path, err))
    }

    /// Writes `text` to `path`, returning whether the write succeeded.
    pub async fn put(&self, path: &Utf8Path, text: &str) -> bool {
        match tokio::fs::write(path, text).await {
            Ok(()) => true,
            Err(error) => {
                tracing::debug!("failed to write `{path}`: {error}");
                false
            }
        }
    }

    /// Returns true if `path` exists.
    pub async fn exists(&self, path: &Utf8Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    /// Returns the parent directory of `path`, or `path` itself if it has none.
    pub fn dirname<'a>(&self, path: &'a Utf8Path) -> &'a Utf8Path {
        path.parent().unwrap_or(path)
    }

    /// Searches `extra_paths`, then the configured search paths, for the first of `names` that
    /// exists.
    ///
    /// For every directory, every executable extension is tried with every name, in that order.
    pub async fn find<S: AsRef<str>>(
        &self,
        names: &[S],
        extra_paths: &[Utf8PathBuf],
    ) -> Option<Utf8PathBuf> {
        for candidate in self.candidates(names, extra_paths) {
            if self.exists(&candidate).await {
                return Some(candidate);
            }
        }
        None
    }

    /// Searches `cwd`, then the configured search paths, for the first of `names` that exists.
    pub async fn which<S: AsRef<str>>(&self, names: &[S], cwd: &Utf8Path) -> Option<Utf8PathBuf> {
        self.find(names, &[cwd.to_owned()]).await
    }

    /// Searches `start` and each of its ancestors (nearest first), then the configured search
    /// paths, for the first of `names` that exists.
    pub async fn find_up<S: AsRef<str>>(
        &self,
        names: &[S],
        start: &Utf8Path,
    ) -> Option<Utf8PathBuf> {
        let ancestors: Vec<_> = start.ancestors().map(Utf8Path::to_path_buf).collect();
        self.find(names, &ancestors).await
    }

    fn candidates<'a, S: AsRef<str>>(
        &'a self,
        names: &'a [S],
        extra_paths: &'a [Utf8PathBuf],
    ) -> impl Iterator<Item = Utf8PathBuf> + 'a {
        extra_paths.iter().chain(&self.paths).flat_map(move |dir| {
            self.extensions.iter().flat_map(move |extension| {
                names
                    .iter()
                    .map(move |name| dir.join(format!("{}{extension}", name.as_ref())))
            })
        })
    }
}
