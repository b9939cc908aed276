// Copyright (c) The phpunit-explorer Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The set of parsed test files in a workspace.

use super::{TestCase, TestFile, TestSuite};
use crate::{config::DiscoveryConfig, errors::RefreshError, filesystem::Filesystem};
use camino::{Utf8Path, Utf8PathBuf};
use explorer_metadata::TestListSummary;
use futures::prelude::*;
use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock},
};
use tracing::debug;
use walkdir::WalkDir;

type FileMap = BTreeMap<Utf8PathBuf, Arc<TestFile>>;

/// The number of files read concurrently during a refresh.
const READ_CONCURRENCY: usize = 16;

/// The set of discovered test files in a workspace.
///
/// Updates are copy-on-write: a new map is built and swapped in, so a [`RegistrySnapshot`] taken
/// before an update keeps observing the tree it was taken from.
#[derive(Debug, Default)]
pub struct TestRegistry {
    files: RwLock<Arc<FileMap>>,
}

impl TestRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a consistent view of the registry as it is now.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        RegistrySnapshot {
            files: Arc::clone(&files),
        }
    }

    /// Parses `source` as the new contents of `path`.
    ///
    /// If the file declares test classes, it replaces any earlier entry for `path` and is returned.
    /// Otherwise any earlier entry is removed.
    pub fn update_file(&self, path: impl Into<Utf8PathBuf>, source: &str) -> Option<Arc<TestFile>> {
        let path = path.into();
        match TestFile::parse(path.clone(), source) {
            Some(file) => {
                let file = Arc::new(file);
                self.modify(|files| files.insert(path, Arc::clone(&file)));
                Some(file)
            }
            None => {
                self.remove_file(&path);
                None
            }
        }
    }

    /// Removes `path` from the registry, returning true if it was present.
    pub fn remove_file(&self, path: &Utf8Path) -> bool {
        if !self.snapshot().files.contains_key(path) {
            return false;
        }
        self.modify(|files| files.remove(path).is_some())
    }

    /// Removes every file from the registry.
    pub fn clear(&self) {
        self.replace(FileMap::new());
    }

    /// Rebuilds the registry from scratch by scanning every matching file under `root`.
    ///
    /// Files that can't be read or that don't parse are skipped.
    pub async fn refresh(
        &self,
        root: &Utf8Path,
        config: &DiscoveryConfig,
        fs: &Filesystem,
    ) -> Result<RefreshSummary, RefreshError> {
        let is_dir = tokio::fs::metadata(root)
            .await
            .is_ok_and(|metadata| metadata.is_dir());
        if !is_dir {
            return Err(RefreshError::RootNotADirectory {
                root: root.to_owned(),
            });
        }

        let paths = candidate_files(root, config);
        let mut summary = RefreshSummary {
            files_scanned: paths.len(),
            ..RefreshSummary::default()
        };

        let mut contents = stream::iter(paths)
            .map(|path| async move {
                let source = fs.get(&path).await;
                (path, source)
            })
            .buffered(READ_CONCURRENCY);

        let mut files = FileMap::new();
        while let Some((path, source)) = contents.next().await {
            let source = match source {
                Ok(source) => source,
                Err(error) => {
                    debug!("skipping unreadable file `{path}`: {error}");
                    summary.unreadable += 1;
                    continue;
                }
            };
            if let Some(file) = TestFile::parse(path.clone(), &source) {
                summary.test_files += 1;
                summary.test_count += file.test_count();
                files.insert(path, Arc::new(file));
            }
        }

        debug!(
            "discovered {} tests in {} files ({} scanned) under `{root}`",
            summary.test_count, summary.test_files, summary.files_scanned,
        );
        self.replace(files);
        Ok(summary)
    }

    fn modify<R>(&self, f: impl FnOnce(&mut FileMap) -> R) -> R {
        let mut guard = self.files.write().unwrap_or_else(PoisonError::into_inner);
        let mut files = FileMap::clone(&guard);
        let ret = f(&mut files);
        *guard = Arc::new(files);
        ret
    }

    fn replace(&self, files: FileMap) {
        let mut guard = self.files.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(files);
    }
}

/// Walks `root`, returning files matched by `config` in sorted order.
fn candidate_files(root: &Utf8Path, config: &DiscoveryConfig) -> Vec<Utf8PathBuf> {
    let relative = |path: &std::path::Path| {
        let path = Utf8Path::from_path(path)?;
        path.strip_prefix(root).ok().map(Utf8Path::to_owned)
    };

    let mut paths: Vec<_> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| {
            !entry.file_type().is_dir()
                || relative(entry.path()).is_none_or(|rel| !config.is_excluded_dir(&rel))
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let rel = relative(entry.path())?;
            config.is_match(&rel).then(|| root.join(rel))
        })
        .collect();
    paths.sort();
    paths
}

/// Counts from a [`TestRegistry::refresh`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RefreshSummary {
    /// The number of files matched by the discovery globs.
    pub files_scanned: usize,

    /// The number of files that declared at least one test class.
    pub test_files: usize,

    /// The number of test cases discovered.
    pub test_count: usize,

    /// The number of matched files that couldn't be read.
    pub unreadable: usize,
}

/// An immutable view of a [`TestRegistry`].
#[derive(Clone, Debug, Default)]
pub struct RegistrySnapshot {
    files: Arc<FileMap>,
}

impl RegistrySnapshot {
    /// Returns the file at `path`, if it declares tests.
    pub fn file(&self, path: &Utf8Path) -> Option<&Arc<TestFile>> {
        self.files.get(path)
    }

    /// Iterates over all test files, sorted by path.
    pub fn files(&self) -> impl Iterator<Item = &Arc<TestFile>> + '_ {
        self.files.values()
    }

    /// Iterates over all suites, sorted by path and then by declaration order.
    pub fn suites(&self) -> impl Iterator<Item = &Arc<TestSuite>> + '_ {
        self.files().flat_map(|file| file.suites.iter())
    }

    /// Iterates over all cases, sorted by path and then by declaration order.
    pub fn cases(&self) -> impl Iterator<Item = &Arc<TestCase>> + '_ {
        self.files().flat_map(|file| file.cases())
    }

    /// Returns the number of test cases.
    pub fn test_count(&self) -> usize {
        self.files().map(|file| file.test_count()).sum()
    }

    /// Returns true if no test files are registered.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Returns the machine-readable form of this snapshot.
    pub fn to_summary(&self, workspace_root: &Utf8Path) -> TestListSummary {
        TestListSummary {
            workspace_root: workspace_root.to_owned(),
            test_count: self.test_count(),
            files: self
                .files
                .iter()
                .map(|(path, file)| (path.clone(), file.to_summary()))
                .collect(),
        }
    }
}
