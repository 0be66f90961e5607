//! Find terragrunt.hcl files in a directory tree.

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashSet;
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

pub const MODULE_FILE: &str = "terragrunt.hcl";

/// Directories to skip during discovery
const IGNORED_DIRS: &[&str] = &[
    ".terragrunt-cache",
    ".terraform",
    ".git",
    "node_modules",
    ".venv",
    "venv",
    "__pycache__",
];

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("root path does not exist: {0}")]
    RootNotFound(Utf8PathBuf),
    #[error("invalid filter pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("failed to walk {path}: {source}")]
    Walk {
        path: Utf8PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("failed to expand filter pattern {pattern:?}: {source}")]
    Glob {
        pattern: String,
        #[source]
        source: glob::GlobError,
    },
}

fn is_ignored(entry: &DirEntry) -> bool {
    // the root itself is never skipped, even when hidden
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|s| IGNORED_DIRS.contains(&s) || s.starts_with('.'))
            .unwrap_or(false)
}

/// All files under `root` whose name is one of `names`, sorted.
fn find_files(root: &Utf8Path, names: &[&str]) -> Result<Vec<Utf8PathBuf>, DiscoveryError> {
    if !root.exists() {
        return Err(DiscoveryError::RootNotFound(root.to_owned()));
    }

    // an unreadable directory fails the walk rather than hiding its modules
    let entries = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_ignored(e))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| DiscoveryError::Walk {
            path: root.to_owned(),
            source,
        })?;

    let mut files: Vec<Utf8PathBuf> = entries
        .into_iter()
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_str().is_some_and(|name| names.contains(&name)))
        .filter_map(|e| Utf8PathBuf::from_path_buf(e.into_path()).ok())
        .collect();
    files.sort();
    Ok(files)
}

/// Discovers all terragrunt.hcl files under the given root directory.
pub fn discover_modules(root: &Utf8Path) -> Result<Vec<Utf8PathBuf>, DiscoveryError> {
    find_files(root, &[MODULE_FILE])
}

/// Discovers the terragrunt.hcl files selected by `patterns`, globs relative
/// to `root`. A matched directory contributes every module below it. Files
/// matched by several patterns are listed once, in first-seen order.
pub fn discover_filtered(root: &Utf8Path, patterns: &[String]) -> Result<Vec<Utf8PathBuf>, DiscoveryError> {
    if !root.exists() {
        return Err(DiscoveryError::RootNotFound(root.to_owned()));
    }

    let mut seen = HashSet::new();
    let mut modules = Vec::new();
    for pattern in patterns {
        let full = root.join(pattern);
        let matches = glob::glob(full.as_str()).map_err(|source| DiscoveryError::Pattern {
            pattern: pattern.clone(),
            source,
        })?;

        for path in matches {
            let path = path.map_err(|source| DiscoveryError::Glob {
                pattern: pattern.clone(),
                source,
            })?;
            let Ok(path) = Utf8PathBuf::from_path_buf(path) else { continue };
            let found = if path.is_dir() {
                discover_modules(&path)?
            } else if path.file_name() == Some(MODULE_FILE) {
                vec![path]
            } else {
                continue;
            };

            for module in found {
                if seen.insert(module.clone()) {
                    modules.push(module);
                }
            }
        }
    }
    Ok(modules)
}

/// Discovers marker files with any of the given names.
pub fn discover_marker_files(root: &Utf8Path, names: &[String]) -> Result<Vec<Utf8PathBuf>, DiscoveryError> {
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    find_files(root, &names)
}

/// A marker file and the terragrunt modules below its directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectGroup {
    pub marker: Utf8PathBuf,
    pub modules: Vec<Utf8PathBuf>,
}

/// One group per directory holding a marker file. When a directory holds
/// several markers the first one by name is used.
pub fn discover_project_groups(root: &Utf8Path, names: &[String]) -> Result<Vec<ProjectGroup>, DiscoveryError> {
    let mut seen_dirs = HashSet::new();
    let mut groups = Vec::new();
    for marker in discover_marker_files(root, names)? {
        let Some(dir) = marker.parent().map(Utf8Path::to_path_buf) else {
            continue;
        };
        if !seen_dirs.insert(dir.clone()) {
            continue;
        }
        let modules = discover_modules(&dir)?;
        groups.push(ProjectGroup { marker, modules });
    }
    Ok(groups)
}
