//! Project representation and construction.

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

use crate::config::GenerateConfig;
use crate::dependencies::{module_dir, DependencyResolver, ResolveError};
use crate::locals::ResolvedLocals;
use crate::resolver::{relative_path, to_slash};

/// Files of the module itself that always trigger a plan
const OWN_FILES: [&str; 2] = ["*.hcl", "*.tf*"];
/// Same, for a project grouping every module below a marker file
const GROUPED_FILES: [&str; 2] = ["**/*.hcl", "**/*.tf*"];

/// Autoplan settings of a project
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Autoplan {
    #[serde(default)]
    pub enabled: bool,
    /// Globs relative to the project dir
    #[serde(default)]
    pub when_modified: Vec<String>,
}

/// One Atlantis project. Fields are declared in the order they are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    /// Only written when set through a flag or a local
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apply_requirements: Option<Vec<String>>,
    #[serde(default)]
    pub autoplan: Autoplan,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Relative to the root, `/` separated, `.` for the root itself
    pub dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_order_group: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terraform_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
}

/// Replace every run of characters outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_name(dir: &str) -> String {
    static UNSAFE_CHARS: OnceLock<Regex> = OnceLock::new();
    let unsafe_chars = UNSAFE_CHARS.get_or_init(|| Regex::new(r"[^a-zA-Z0-9_-]+").expect("Invalid name regex"));
    unsafe_chars.replace_all(dir, "_").into_owned()
}

/// Build the project for one terragrunt file. `None` means the module
/// produces no project.
pub fn build_project(resolver: &DependencyResolver<'_>, path: &Utf8Path) -> Result<Option<Project>, ResolveError> {
    let Some(dependencies) = resolver.resolve_dependencies(path)? else {
        return Ok(None);
    };

    let locals = resolver.resolve_locals(path)?;
    if !is_selected(resolver.config(), &locals, path) {
        return Ok(None);
    }

    let module_dir = module_dir(path);
    let mut when_modified: Vec<String> = OWN_FILES.iter().map(|s| s.to_string()).collect();
    for dependency in dependencies.iter() {
        push_unique(&mut when_modified, relative_to(&module_dir, dependency)?);
    }

    let dir = project_dir(&resolver.config().root, &module_dir)?;
    debug!(dir = %dir, when_modified = when_modified.len(), "built project");
    Ok(Some(new_project(resolver.config(), dir, when_modified, &locals)))
}

/// Build one project for the directory of a marker file, covering every
/// terragrunt module below it. Only dependencies outside that directory are
/// listed, everything inside is matched by the recursive globs.
pub fn build_grouped_project(
    resolver: &DependencyResolver<'_>,
    marker: &Utf8Path,
    modules: &[Utf8PathBuf],
) -> Result<Option<Project>, ResolveError> {
    let locals = resolver.resolve_locals(marker)?;
    if !is_selected(resolver.config(), &locals, marker) {
        return Ok(None);
    }

    let group_dir = module_dir(marker);
    let mut when_modified: Vec<String> = GROUPED_FILES.iter().map(|s| s.to_string()).collect();
    for module in modules {
        let Some(dependencies) = resolver.resolve_dependencies(module)? else {
            continue;
        };
        for dependency in dependencies.iter().filter(|dep| !dep.starts_with(&group_dir)) {
            push_unique(&mut when_modified, relative_to(&group_dir, dependency)?);
        }
    }

    let dir = project_dir(&resolver.config().root, &group_dir)?;
    debug!(dir = %dir, modules = modules.len(), "built grouped project");
    Ok(Some(new_project(resolver.config(), dir, when_modified, &locals)))
}

fn is_selected(config: &GenerateConfig, locals: &ResolvedLocals, path: &Utf8Path) -> bool {
    if locals.is_skipped() {
        debug!(path = %path, "skipped by atlantis_skip");
        return false;
    }
    if config.use_project_markers && !locals.is_marked_project() {
        debug!(path = %path, "not marked with atlantis_project");
        return false;
    }
    true
}

/// Apply flag defaults, then the merged locals on top.
fn new_project(config: &GenerateConfig, dir: String, when_modified: Vec<String>, locals: &ResolvedLocals) -> Project {
    let default_apply_requirements =
        (!config.default_apply_requirements.is_empty()).then(|| config.default_apply_requirements.clone());
    let name = config.wants_project_names().then(|| sanitize_name(&dir));
    let workspace = config.create_workspace.then(|| sanitize_name(&dir));

    Project {
        apply_requirements: locals.apply_requirements.clone().or(default_apply_requirements),
        autoplan: Autoplan {
            enabled: locals.autoplan.unwrap_or(config.autoplan),
            when_modified,
        },
        depends_on: Vec::new(),
        dir,
        execution_order_group: None,
        name,
        terraform_version: locals
            .terraform_version
            .clone()
            .or_else(|| config.terraform_version().map(str::to_owned)),
        workflow: locals.workflow.clone().or_else(|| config.workflow().map(str::to_owned)),
        workspace,
    }
}

/// The directory of a project relative to the root.
pub fn project_dir(root: &Utf8Path, dir: &Utf8Path) -> Result<String, ResolveError> {
    if !dir.starts_with(root) {
        return Err(ResolveError::OutsideRoot {
            path: dir.to_owned(),
            root: root.to_owned(),
        });
    }
    relative_to(root, dir)
}

fn relative_to(base: &Utf8Path, target: &Utf8Path) -> Result<String, ResolveError> {
    relative_path(base, target)
        .map(|path| to_slash(&path))
        .ok_or_else(|| ResolveError::Relativize {
            base: base.to_owned(),
            target: target.to_owned(),
        })
}

fn push_unique(list: &mut Vec<String>, value: String) {
    if !list.contains(&value) {
        list.push(value);
    }
}
