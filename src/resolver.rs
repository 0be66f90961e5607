//! Resolve paths and evaluate terragrunt functions.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use std::cell::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::parser::{LocalExpr, PathExpr};

/// Snapshot of the process environment, consulted by `get_env()`.
pub type Env = HashMap<String, String>;

/// A statically evaluated `locals` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalValue {
    Bool(bool),
    Str(String),
    List(Vec<String>),
}

/// Resolution context - provides base paths for resolution
pub struct ResolveContext {
    /// Directory of the module being resolved. Relative paths are anchored
    /// here, also when evaluating declarations inherited from an include.
    pub terragrunt_dir: Utf8PathBuf,
    /// Directory of the included config whose declarations are evaluated
    pub include_dir: Option<Utf8PathBuf>,
    env: Arc<Env>,
    locals: HashMap<String, LocalValue>,
    /// Cached repo root (lazily computed)
    repo_root: OnceCell<Option<Utf8PathBuf>>,
}

impl ResolveContext {
    /// Create a new resolution context for a module directory
    pub fn new(terragrunt_dir: Utf8PathBuf, env: Arc<Env>) -> Self {
        Self {
            terragrunt_dir,
            include_dir: None,
            env,
            locals: HashMap::new(),
            repo_root: OnceCell::new(),
        }
    }

    /// Create a context for a config included by the module in `terragrunt_dir`.
    pub fn for_included_config(terragrunt_dir: Utf8PathBuf, include_dir: Utf8PathBuf, env: Arc<Env>) -> Self {
        Self {
            include_dir: Some(include_dir),
            ..Self::new(terragrunt_dir, env)
        }
    }

    /// Resolve a PathExpr to a normalized, absolute filesystem path.
    /// Returns None if the path cannot be resolved.
    pub fn resolve(&self, path_expr: &PathExpr) -> Option<Utf8PathBuf> {
        let resolved = self.resolve_str(path_expr)?;
        Some(normalize_path(&self.terragrunt_dir.join(resolved)))
    }

    /// Evaluate a PathExpr to its string value without anchoring it anywhere.
    pub fn resolve_str(&self, path_expr: &PathExpr) -> Option<String> {
        match path_expr {
            PathExpr::Literal(s) => Some(s.clone()),

            PathExpr::FindInParentFolders(filename) => {
                let filename = filename.as_deref().unwrap_or("terragrunt.hcl");
                find_in_parent_folders(&self.terragrunt_dir, filename).map(Utf8PathBuf::into_string)
            }

            PathExpr::GetRepoRoot => self.repo_root().map(|p| p.to_string()),

            PathExpr::GetTerragruntDir => Some(self.terragrunt_dir.to_string()),

            PathExpr::GetParentTerragruntDir => {
                Some(self.include_dir.as_ref().unwrap_or(&self.terragrunt_dir).to_string())
            }

            PathExpr::PathRelativeToInclude => match &self.include_dir {
                Some(include_dir) => relative_path(include_dir, &self.terragrunt_dir).map(Utf8PathBuf::into_string),
                None => Some(".".to_string()),
            },

            PathExpr::PathRelativeFromInclude => match &self.include_dir {
                Some(include_dir) => relative_path(&self.terragrunt_dir, include_dir).map(Utf8PathBuf::into_string),
                None => Some(".".to_string()),
            },

            PathExpr::GetEnv { name, default } => self.env.get(name).cloned().or_else(|| default.clone()),

            PathExpr::Local(name) => match self.locals.get(name)? {
                LocalValue::Str(s) => Some(s.clone()),
                LocalValue::Bool(b) => Some(b.to_string()),
                LocalValue::List(_) => None,
            },

            PathExpr::Dirname(inner) => {
                let resolved = self.resolve(inner)?;
                resolved.parent().map(|p| p.to_string())
            }

            PathExpr::Format { fmt, args } => {
                let resolved_args: Vec<String> =
                    args.iter().map(|arg| self.resolve_str(arg)).collect::<Option<Vec<_>>>()?;

                // Replace %s placeholders in order
                let mut result = fmt.clone();
                let mut search_from = 0;
                for arg in resolved_args {
                    if let Some(pos) = result[search_from..].find("%s") {
                        let pos = search_from + pos;
                        result.replace_range(pos..pos + 2, &arg);
                        search_from = pos + arg.len();
                    }
                }
                Some(result)
            }

            PathExpr::Interpolation(parts) => {
                if parts.is_empty() {
                    return None;
                }

                // Literals within interpolations are string fragments,
                // not paths to be anchored.
                let mut result = String::new();
                for part in parts {
                    result.push_str(&self.resolve_str(part)?);
                }
                Some(result)
            }

            PathExpr::Unresolvable { .. } => None,
        }
    }

    /// Evaluate `locals` entries into this context.
    ///
    /// Locals may reference each other in any order, so evaluation repeats
    /// until no further entry becomes resolvable.
    pub fn evaluate_locals(&mut self, locals: &[(String, LocalExpr)]) {
        let mut pending: Vec<&(String, LocalExpr)> = locals.iter().collect();

        loop {
            let before = pending.len();
            pending.retain(|(name, expr)| match self.evaluate_local(expr) {
                Some(value) => {
                    self.locals.insert(name.clone(), value);
                    false
                }
                None => true,
            });
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }

        for (name, expr) in pending {
            // Lists keep whatever elements are resolvable
            if let LocalExpr::List(items) = expr {
                let values = items.iter().filter_map(|item| self.resolve_str(item)).collect();
                self.locals.insert(name.clone(), LocalValue::List(values));
            }
            tracing::debug!(local = %name, dir = %self.terragrunt_dir, "local is not statically resolvable");
        }
    }

    fn evaluate_local(&self, expr: &LocalExpr) -> Option<LocalValue> {
        match expr {
            LocalExpr::Bool(b) => Some(LocalValue::Bool(*b)),
            LocalExpr::Value(PathExpr::Local(name)) => self.locals.get(name).cloned(),
            LocalExpr::Value(inner) => self.resolve_str(inner).map(LocalValue::Str),
            LocalExpr::List(items) => items
                .iter()
                .map(|item| self.resolve_str(item))
                .collect::<Option<Vec<_>>>()
                .map(LocalValue::List),
            LocalExpr::Opaque => None,
        }
    }

    /// The locals evaluated so far.
    pub fn locals(&self) -> &HashMap<String, LocalValue> {
        &self.locals
    }

    /// Get the repository root (directory containing .git).
    /// Result is cached after first computation.
    pub fn repo_root(&self) -> Option<&Utf8PathBuf> {
        self.repo_root.get_or_init(|| find_repo_root(&self.terragrunt_dir)).as_ref()
    }
}

/// Normalize a path by resolving . and .. components.
/// Does NOT require the path to exist (pure string manipulation).
pub fn normalize_path(path: &Utf8Path) -> Utf8PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Utf8Component::ParentDir => {
                match components.last() {
                    Some(Utf8Component::Normal(_)) => {
                        components.pop();
                    }
                    // `/..` is `/`
                    Some(Utf8Component::RootDir) | Some(Utf8Component::Prefix(_)) => {}
                    _ => components.push(component),
                }
            }
            Utf8Component::CurDir => {}
            _ => components.push(component),
        }
    }

    components.iter().collect()
}

/// Express `target` relative to the directory `base`.
///
/// Both paths must be either absolute or relative. Returns `.` when they are
/// equal and None when `base` climbs above a point `target` can be expressed
/// from.
pub fn relative_path(base: &Utf8Path, target: &Utf8Path) -> Option<Utf8PathBuf> {
    if base.is_absolute() != target.is_absolute() {
        return None;
    }

    let base = normalize_path(base);
    let target = normalize_path(target);
    let base: Vec<Utf8Component<'_>> = base.components().collect();
    let target: Vec<Utf8Component<'_>> = target.components().collect();

    let common = base.iter().zip(&target).take_while(|(a, b)| a == b).count();
    if base[common..].iter().any(|c| !matches!(c, Utf8Component::Normal(_))) {
        return None;
    }

    let mut relative = Utf8PathBuf::new();
    for _ in common..base.len() {
        relative.push("..");
    }
    for component in &target[common..] {
        relative.push(component.as_str());
    }

    if relative.as_str().is_empty() {
        relative.push(".");
    }
    Some(relative)
}

/// Render a path with forward slashes regardless of the host separator.
pub fn to_slash(path: &Utf8Path) -> String {
    if std::path::MAIN_SEPARATOR == '\\' {
        path.as_str().replace('\\', "/")
    } else {
        path.as_str().to_owned()
    }
}

/// Find a file by walking up the directory tree.
/// Starts from the PARENT of `from` (not from itself).
/// Returns the path to the file if found, None otherwise.
pub fn find_in_parent_folders(from: &Utf8Path, filename: &str) -> Option<Utf8PathBuf> {
    // Start from parent directory (terragrunt convention)
    let mut current = from.parent()?.to_path_buf();

    loop {
        let candidate = current.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return None,
        }
    }
}

/// Find the repository root by looking for .git directory.
/// Walks up from the given path until .git is found.
pub fn find_repo_root(from: &Utf8Path) -> Option<Utf8PathBuf> {
    let mut current = from.to_path_buf();

    // Ensure we start from a directory
    if current.is_file() {
        current = current.parent()?.to_path_buf();
    }

    loop {
        if current.join(".git").exists() {
            return Some(current);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return None,
        }
    }
}
