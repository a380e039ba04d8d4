//! Workspace file search.
//!
//! Every lookup the engine makes (test class -> test file, type -> production
//! file, keyword fallback) is a file-name glob over the workspace tree.

use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use glob::{MatchOptions, Pattern};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::CorrelatorConfig;

/// Source of file-name search results.
pub trait FileFinder {
    /// All files under the root whose *file name* matches `name_glob`,
    /// build-output directories excluded. Paths are absolute when the root is.
    fn find_files(&self, name_glob: &str) -> Vec<PathBuf>;

    /// The directory searches are rooted at.
    fn root(&self) -> &Path;
}

/// Walks the workspace on every query.
#[derive(Debug, Clone)]
pub struct WorkspaceFinder {
    root: PathBuf,
    build_output_dirs: Vec<String>,
}

impl WorkspaceFinder {
    pub fn new(root: impl Into<PathBuf>, config: &CorrelatorConfig) -> Self {
        Self {
            root: root.into(),
            build_output_dirs: config.build_output_dirs.clone(),
        }
    }

    fn is_pruned(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        // hidden dirs (.git, .vs, .idea) never hold sources worth matching
        name.starts_with('.') || self.build_output_dirs.iter().any(|d| *d == name)
    }
}

impl FileFinder for WorkspaceFinder {
    fn find_files(&self, name_glob: &str) -> Vec<PathBuf> {
        let pattern = match Pattern::new(name_glob) {
            Ok(p) => p,
            Err(e) => {
                warn!(pattern = name_glob, error = %e, "invalid file name pattern");
                return Vec::new();
            }
        };
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };

        let matches: Vec<PathBuf> = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !self.is_pruned(e))
            .filter_map(|e| match e {
                Ok(entry) => Some(entry),
                Err(err) => {
                    debug!(error = %err, "skipping unreadable entry");
                    None
                }
            })
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.file_name()
                    .to_str()
                    .is_some_and(|name| pattern.matches_with(name, options))
            })
            .map(DirEntry::into_path)
            .collect();

        debug!(pattern = name_glob, count = matches.len(), "file search");
        matches
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

/// Whether any directory component of `path` is a build-output directory.
pub fn in_build_output(path: &Path, config: &CorrelatorConfig) -> bool {
    path.parent()
        .into_iter()
        .flat_map(Path::components)
        .any(|c| match c {
            Component::Normal(name) => is_build_output_name(name, config),
            _ => false,
        })
}

fn is_build_output_name(name: &OsStr, config: &CorrelatorConfig) -> bool {
    name.to_str().is_some_and(|n| config.is_build_output_dir(n))
}

/// `OrderService` -> `OrderService.cs`, with glob metacharacters escaped.
pub fn exact_name_glob(stem: &str, config: &CorrelatorConfig) -> String {
    format!("{}.{}", Pattern::escape(stem), config.extension())
}

/// `Order` -> `*Order*.cs`
pub fn contains_name_glob(word: &str, config: &CorrelatorConfig) -> String {
    format!("*{}*.{}", Pattern::escape(word), config.extension())
}
