//! Settings of one generation run.

use camino::Utf8PathBuf;
use std::sync::Arc;

use crate::resolver::Env;

/// Everything that influences the generated config. Built by the CLI, one
/// field per flag.
#[derive(Debug, Clone)]
pub struct GenerateConfig {
    /// Directory to scan for terragrunt modules
    pub root: Utf8PathBuf,
    /// Existing config to preserve workflows/projects from
    pub output: Option<Utf8PathBuf>,
    /// Default for `autoplan.enabled`
    pub autoplan: bool,
    pub automerge: bool,
    /// Sets both `parallel_plan` and `parallel_apply`
    pub parallel: bool,
    pub cascade_dependencies: bool,
    pub ignore_parent_terragrunt: bool,
    pub ignore_dependency_blocks: bool,
    pub create_workspace: bool,
    pub create_project_name: bool,
    pub preserve_workflows: bool,
    pub preserve_projects: bool,
    /// Default workflow; empty means none
    pub default_workflow: String,
    pub default_apply_requirements: Vec<String>,
    /// Default terraform version; empty means none
    pub default_terraform_version: String,
    /// Globs relative to `root` selecting the modules to process
    pub filter: Vec<String>,
    pub num_executors: usize,
    pub execution_order_groups: bool,
    pub depends_on: bool,
    /// Marker file names; each directory holding one becomes a single project
    pub project_hcl_files: Vec<String>,
    pub use_project_markers: bool,
    /// Environment snapshot for `get_env()`
    pub env: Arc<Env>,
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("."),
            output: None,
            autoplan: false,
            automerge: false,
            parallel: true,
            cascade_dependencies: true,
            ignore_parent_terragrunt: true,
            ignore_dependency_blocks: false,
            create_workspace: false,
            create_project_name: false,
            preserve_workflows: true,
            preserve_projects: false,
            default_workflow: String::new(),
            default_apply_requirements: Vec::new(),
            default_terraform_version: String::new(),
            filter: Vec::new(),
            num_executors: 15,
            execution_order_groups: false,
            depends_on: false,
            project_hcl_files: Vec::new(),
            use_project_markers: false,
            env: Arc::new(Env::new()),
        }
    }
}

impl GenerateConfig {
    /// A default config rooted at `root`.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Project names are needed for `depends_on` even when not requested.
    pub fn wants_project_names(&self) -> bool {
        self.create_project_name || self.depends_on
    }

    pub(crate) fn workflow(&self) -> Option<&str> {
        non_empty(&self.default_workflow)
    }

    pub(crate) fn terraform_version(&self) -> Option<&str> {
        non_empty(&self.default_terraform_version)
    }
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
