//! Discover local terraform module sources.
//!
//! A module that calls `module "x" { source = "../shared" }` changes whenever
//! the files in `../shared` change, so every local module call (followed
//! recursively) contributes a `<dir>/*.tf*` glob.

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashSet;

use crate::parser::{parse_module_calls, ParseError};
use crate::resolver::normalize_path;

const LOCAL_MODULE_SOURCE_PREFIXES: &[&str] = &["./", "../", ".\\", "..\\"];

/// Whether a `module` block `source` points at a local directory.
pub fn is_local_module_source(source: &str) -> bool {
    LOCAL_MODULE_SOURCE_PREFIXES.iter().any(|prefix| source.starts_with(prefix))
}

/// Whether a terragrunt `terraform.source` points at a local directory.
///
/// Besides the relative prefixes, terragrunt sources are commonly built from
/// functions such as `get_repo_root()`, which evaluate to absolute paths.
pub fn is_local_terraform_source(source: &str) -> bool {
    is_local_module_source(source)
        || (Utf8Path::new(source).is_absolute() && !source.contains("::") && !source.contains("://"))
}

/// Find the globs of all local modules called from the terraform files in
/// `dir`, recursing into each of them.
pub fn find_local_module_sources(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, ParseError> {
    let dir = normalize_path(dir);
    let mut visited = HashSet::from([dir.clone()]);
    let mut globs = Vec::new();
    scan(&dir, &mut visited, &mut globs)?;
    Ok(globs)
}

fn scan(dir: &Utf8Path, visited: &mut HashSet<Utf8PathBuf>, globs: &mut Vec<Utf8PathBuf>) -> Result<(), ParseError> {
    for source in module_sources(dir)? {
        if !is_local_module_source(&source) {
            continue;
        }

        let module_dir = normalize_path(&dir.join(source.replace('\\', "/")));
        if !visited.insert(module_dir.clone()) {
            continue;
        }

        globs.push(module_dir.join("*.tf*"));
        scan(&module_dir, visited, globs)?;
    }
    Ok(())
}

/// Module sources declared in `dir`, with override files applied by module name.
fn module_sources(dir: &Utf8Path) -> Result<Vec<String>, ParseError> {
    let (primary, overrides) = config_files(dir)?;

    let mut modules: Vec<(String, String)> = Vec::new();
    for path in primary.iter().chain(&overrides) {
        for call in parse_module_calls(path)? {
            match modules.iter_mut().find(|(name, _)| *name == call.name) {
                Some(existing) => existing.1 = call.source,
                None => modules.push((call.name, call.source)),
            }
        }
    }

    Ok(modules.into_iter().map(|(_, source)| source).collect())
}

/// Terraform files directly in `dir`, split into primary and override files.
fn config_files(dir: &Utf8Path) -> Result<(Vec<Utf8PathBuf>, Vec<Utf8PathBuf>), ParseError> {
    let io_error = |source| ParseError::IoError {
        path: dir.to_owned(),
        source,
    };

    let mut names = Vec::new();
    for entry in dir.read_dir_utf8().map_err(io_error)? {
        let entry = entry.map_err(io_error)?;
        if entry.file_type().map_err(io_error)?.is_file() {
            names.push(entry.file_name().to_owned());
        }
    }
    names.sort();

    let mut primary = Vec::new();
    let mut overrides = Vec::new();
    for name in names {
        let Some(ext) = terraform_ext(&name) else { continue };
        if is_ignored_file(&name) {
            continue;
        }

        let stem = &name[..name.len() - ext.len()];
        if stem == "override" || stem.ends_with("_override") {
            overrides.push(dir.join(&name));
        } else {
            primary.push(dir.join(&name));
        }
    }

    Ok((primary, overrides))
}

fn terraform_ext(name: &str) -> Option<&'static str> {
    if name.ends_with(".tf") {
        Some(".tf")
    } else if name.ends_with(".tf.json") {
        Some(".tf.json")
    } else {
        None
    }
}

/// Editor swap files and hidden files.
fn is_ignored_file(name: &str) -> bool {
    name.starts_with('.') || name.ends_with('~') || (name.starts_with('#') && name.ends_with('#'))
}
