//! Lazy path enumeration
//!
//! Walks the requested input paths one entry at a time and turns every
//! regular file found into a [`TransferUnit`]. Nothing is collected up
//! front: the walk only advances when a consumer pulls the next unit.

use crate::config::EnumeratorConfig;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One unit of transfer: a file and the directory it goes to, relative to
/// the destination root
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferUnit {
    /// Absolute path of the file to send
    pub source: PathBuf,
    /// Directory under the destination root, empty for bare input files
    pub destination: PathBuf,
}

impl TransferUnit {
    /// Create a new transfer unit
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    /// File name of the source
    pub fn file_name(&self) -> Option<&OsStr> {
        self.source.file_name()
    }
}

/// An input path, or an entry beneath one, that was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionWarning {
    /// Path as it was given or met during the walk
    pub path: PathBuf,
    /// Why it was skipped
    pub reason: String,
}

/// A directory walk in progress
struct DirectoryWalk {
    entries: walkdir::IntoIter,
    /// Parent of the requested directory; destinations are relative to it
    base: PathBuf,
}

/// Lazy producer of [`TransferUnit`]s over a list of input paths
///
/// Once every input has been walked the enumerator is exhausted for good:
/// [`PathEnumerator::pull`] keeps returning `None`.
pub struct PathEnumerator {
    config: EnumeratorConfig,
    pending: VecDeque<PathBuf>,
    current: Option<DirectoryWalk>,
    skipped: Vec<ResolutionWarning>,
    yielded: u64,
}

impl PathEnumerator {
    /// Create an enumerator over `paths` with the default configuration
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self::with_config(paths, EnumeratorConfig::default())
    }

    /// Create an enumerator over `paths`
    pub fn with_config<I, P>(paths: I, config: EnumeratorConfig) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        Self {
            config,
            pending: paths.into_iter().map(|p| p.as_ref().to_path_buf()).collect(),
            current: None,
            skipped: Vec::new(),
            yielded: 0,
        }
    }

    /// Pull the next unit, or `None` once every input has been walked
    pub fn pull(&mut self) -> Option<TransferUnit> {
        loop {
            if let Some(unit) = self.next_in_directory() {
                self.yielded += 1;
                return Some(unit);
            }

            let input = self.pending.pop_front()?;
            if let Some(unit) = self.start_input(&input) {
                self.yielded += 1;
                return Some(unit);
            }
        }
    }

    /// Whether every input has been walked
    pub fn is_exhausted(&self) -> bool {
        self.current.is_none() && self.pending.is_empty()
    }

    /// Warnings emitted so far
    pub fn skipped(&self) -> &[ResolutionWarning] {
        &self.skipped
    }

    /// Number of units produced so far
    pub fn yielded(&self) -> u64 {
        self.yielded
    }

    /// Resolve an input path; files produce a unit right away, directories
    /// start a walk
    fn start_input(&mut self, input: &Path) -> Option<TransferUnit> {
        let resolved = match input.canonicalize() {
            Ok(path) => path,
            Err(err) => {
                tracing::warn!("'{}': {}", input.display(), err);
                self.skipped.push(ResolutionWarning {
                    path: input.to_path_buf(),
                    reason: err.to_string(),
                });
                return None;
            }
        };

        if resolved.is_file() {
            return Some(TransferUnit::new(resolved, PathBuf::new()));
        }

        if !resolved.is_dir() {
            tracing::debug!("'{}': neither a file nor a directory, skipping", resolved.display());
            return None;
        }

        let base = resolved.parent().map(Path::to_path_buf).unwrap_or_else(|| resolved.clone());
        let entries = WalkDir::new(&resolved)
            .follow_links(self.config.follow_symlinks)
            .into_iter();
        self.current = Some(DirectoryWalk { entries, base });
        None
    }

    /// Advance the current directory walk to its next regular file
    fn next_in_directory(&mut self) -> Option<TransferUnit> {
        let walk = self.current.as_mut()?;

        for entry in walk.entries.by_ref() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                    tracing::warn!("'{}': {}", path.display(), err);
                    self.skipped.push(ResolutionWarning {
                        path,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let destination = entry
                .path()
                .parent()
                .and_then(|parent| parent.strip_prefix(&walk.base).ok())
                .map(Path::to_path_buf)
                .unwrap_or_default();

            return Some(TransferUnit::new(entry.into_path(), destination));
        }

        self.current = None;
        None
    }
}

impl Iterator for PathEnumerator {
    type Item = TransferUnit;

    fn next(&mut self) -> Option<Self::Item> {
        self.pull()
    }
}

impl std::iter::FusedIterator for PathEnumerator {}
