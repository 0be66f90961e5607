//! Parallel processing of terragrunt modules into one Atlantis config.
//!
//! Modules are processed on a dedicated rayon pool sized by
//! `num_executors`. All workers share one [`RunCache`], and the first error
//! stops the run so that no partial config is ever produced.

use camino::Utf8PathBuf;
use rayon::prelude::*;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

use crate::cache::RunCache;
use crate::config::GenerateConfig;
use crate::dependencies::{DependencyResolver, ResolveError};
use crate::discovery::{discover_filtered, discover_modules, discover_project_groups, DiscoveryError};
use crate::output::{assign_depends_on, assign_execution_order_groups, read_old_config, AtlantisConfig, OutputError};
use crate::project::{build_grouped_project, build_project, Project};

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("failed to resolve root directory {path}: {source}")]
    Root {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error("failed to process {path}: {source}")]
    Project {
        path: Utf8PathBuf,
        #[source]
        source: ResolveError,
    },
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Projects gathered during a run.
///
/// When preserving, projects from the existing config are kept and a freshly
/// built project replaces the existing one with the same `dir`.
#[derive(Debug, Default)]
pub struct ProjectCollection {
    projects: Vec<Project>,
}

impl ProjectCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a project, replacing one with the same directory in place.
    pub fn upsert(&mut self, project: Project) {
        match self.projects.iter_mut().find(|p| p.dir == project.dir) {
            Some(existing) => *existing = project,
            None => self.projects.push(project),
        }
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Sort by directory, or by execution order group first when groups are set.
    pub fn into_sorted(self, by_group: bool) -> Vec<Project> {
        let mut projects = self.projects;
        if by_group {
            projects.sort_by(|a, b| {
                (a.execution_order_group, &a.dir).cmp(&(b.execution_order_group, &b.dir))
            });
        } else {
            projects.sort_by(|a, b| a.dir.cmp(&b.dir));
        }
        projects
    }

    fn into_projects(self) -> Vec<Project> {
        self.projects
    }
}

impl From<Vec<Project>> for ProjectCollection {
    fn from(projects: Vec<Project>) -> Self {
        Self { projects }
    }
}

/// Generate the Atlantis config for every module under `config.root`.
pub fn generate(config: &GenerateConfig) -> Result<AtlantisConfig, GenerateError> {
    if !config.root.exists() {
        return Err(DiscoveryError::RootNotFound(config.root.clone()).into());
    }
    let root = config.root.canonicalize_utf8().map_err(|source| GenerateError::Root {
        path: config.root.clone(),
        source,
    })?;
    let config = GenerateConfig {
        root,
        ..config.clone()
    };

    let old_config = match &config.output {
        Some(path) if config.preserve_workflows || config.preserve_projects => read_old_config(path)?,
        _ => None,
    };
    let collection = match &old_config {
        Some(old) if config.preserve_projects => ProjectCollection::from(old.projects.clone()),
        _ => ProjectCollection::new(),
    };
    let collection = Mutex::new(collection);

    let cache = RunCache::new();
    let resolver = DependencyResolver::new(&config, &cache);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.num_executors.max(1))
        .build()?;

    let add = |project: Option<Project>| {
        if let Some(project) = project {
            collection.lock().unwrap_or_else(PoisonError::into_inner).upsert(project);
        }
    };

    if config.project_hcl_files.is_empty() {
        let modules = if config.filter.is_empty() {
            discover_modules(&config.root)?
        } else {
            discover_filtered(&config.root, &config.filter)?
        };
        info!(root = %config.root, modules = modules.len(), "discovered terragrunt modules");

        pool.install(|| {
            modules.par_iter().try_for_each(|path| {
                debug!(path = %path, "processing module");
                let project = build_project(&resolver, path).map_err(|source| GenerateError::Project {
                    path: path.clone(),
                    source,
                })?;
                add(project);
                Ok::<(), GenerateError>(())
            })
        })?;
    } else {
        let groups = discover_project_groups(&config.root, &config.project_hcl_files)?;
        info!(root = %config.root, groups = groups.len(), "discovered project marker files");

        pool.install(|| {
            groups.par_iter().try_for_each(|group| {
                debug!(marker = %group.marker, modules = group.modules.len(), "processing project group");
                let project = build_grouped_project(&resolver, &group.marker, &group.modules).map_err(|source| {
                    GenerateError::Project {
                        path: group.marker.clone(),
                        source,
                    }
                })?;
                add(project);
                Ok::<(), GenerateError>(())
            })
        })?;
    }

    let mut projects = collection.into_inner().unwrap_or_else(PoisonError::into_inner).into_projects();
    if config.execution_order_groups {
        assign_execution_order_groups(&mut projects);
    }
    if config.depends_on {
        assign_depends_on(&mut projects);
    }
    let projects = ProjectCollection::from(projects).into_sorted(config.execution_order_groups);

    let (files_parsed, dependencies) = cache.stats();
    info!(
        projects = projects.len(),
        files_parsed, dependencies, "generated atlantis config"
    );

    Ok(AtlantisConfig {
        automerge: config.automerge,
        parallel_apply: config.parallel,
        parallel_plan: config.parallel,
        projects,
        workflows: old_config
            .filter(|_| config.preserve_workflows)
            .and_then(|old| old.workflows),
        ..AtlantisConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Tree;

    const LEAF: &str = "terraform {\n  source = \"git::git@github.com:org/modules.git//app\"\n}\n";

    fn leaf_depending_on(dirs: &[&str]) -> String {
        let mut content = LEAF.to_string();
        for (i, dir) in dirs.iter().enumerate() {
            content.push_str(&format!("dependency \"d{}\" {{\n  config_path = \"{}\"\n}}\n", i, dir));
        }
        content
    }

    fn config(tree: &Tree) -> GenerateConfig {
        GenerateConfig::new(tree.root())
    }

    fn dirs(config: &AtlantisConfig) -> Vec<&str> {
        config.projects.iter().map(|p| p.dir.as_str()).collect()
    }

    fn project(dir: &str) -> Project {
        Project {
            dir: dir.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_collection_upsert_replaces_by_dir() {
        let mut collection = ProjectCollection::from(vec![project("b"), project("a")]);

        collection.upsert(Project {
            workflow: Some("fresh".to_string()),
            ..project("a")
        });
        collection.upsert(project("c"));

        assert_eq!(collection.len(), 3);
        let sorted = collection.into_sorted(false);
        assert_eq!(sorted.iter().map(|p| p.dir.as_str()).collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(sorted[0].workflow.as_deref(), Some("fresh"));
    }

    #[test]
    fn test_collection_sorts_by_group_then_dir() {
        let mut collection = ProjectCollection::new();
        for (dir, group) in [("a", 1), ("c", 0), ("b", 1)] {
            collection.upsert(Project {
                execution_order_group: Some(group),
                ..project(dir)
            });
        }

        let sorted = collection.into_sorted(true);

        assert_eq!(sorted.iter().map(|p| p.dir.as_str()).collect::<Vec<_>>(), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_parent_and_child() {
        let tree = Tree::new(&[
            ("terragrunt.hcl", "locals {\n  region = \"eu\"\n}\n"),
            (
                "child/terragrunt.hcl",
                format!("include {{\n  path = find_in_parent_folders()\n}}\n{}", LEAF).as_str(),
            ),
        ]);

        let result = generate(&config(&tree)).unwrap();

        assert_eq!(dirs(&result), vec!["child"]);
    }

    #[test]
    fn test_siblings_are_sorted_and_level_zero() {
        let tree = Tree::new(&[("zeta/terragrunt.hcl", LEAF), ("alpha/terragrunt.hcl", LEAF)]);
        let config = GenerateConfig {
            execution_order_groups: true,
            ..config(&tree)
        };

        let result = generate(&config).unwrap();

        assert_eq!(dirs(&result), vec!["alpha", "zeta"]);
        assert!(result.projects.iter().all(|p| p.execution_order_group == Some(0)));
        assert!(result.parallel_plan && result.parallel_apply);
        assert_eq!(result.version, 3);
    }

    #[test]
    fn test_execution_order_and_depends_on() {
        let tree = Tree::new(&[
            ("live/vpc/terragrunt.hcl", LEAF),
            ("live/db/terragrunt.hcl", leaf_depending_on(&["../vpc"]).as_str()),
            ("live/app/terragrunt.hcl", leaf_depending_on(&["../db"]).as_str()),
        ]);
        let config = GenerateConfig {
            execution_order_groups: true,
            depends_on: true,
            ..config(&tree)
        };

        let result = generate(&config).unwrap();

        assert_eq!(dirs(&result), vec!["live/vpc", "live/db", "live/app"]);
        let groups: Vec<Option<u32>> = result.projects.iter().map(|p| p.execution_order_group).collect();
        assert_eq!(groups, vec![Some(0), Some(1), Some(2)]);
        // cascading makes app depend on vpc as well
        assert_eq!(result.projects[2].depends_on, vec!["live_db".to_string(), "live_vpc".to_string()]);
        assert_eq!(result.projects[2].name.as_deref(), Some("live_app"));
    }

    #[test]
    fn test_generation_is_idempotent() {
        let tree = Tree::new(&[
            ("a/terragrunt.hcl", leaf_depending_on(&["../b", "../c"]).as_str()),
            ("b/terragrunt.hcl", leaf_depending_on(&["../c"]).as_str()),
            ("c/terragrunt.hcl", LEAF),
        ]);
        let config = GenerateConfig {
            num_executors: 3,
            ..config(&tree)
        };

        let first = generate(&config).unwrap().to_yaml().unwrap();
        let second = generate(&config).unwrap().to_yaml().unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_preserve_projects_and_workflows() {
        let tree = Tree::new(&[
            ("app/terragrunt.hcl", LEAF),
            (
                "atlantis.yaml",
                "version: 3\nprojects:\n- dir: app\n  autoplan:\n    enabled: false\n    when_modified: [stale.hcl]\n- dir: manual\n  autoplan:\n    enabled: true\n    when_modified: ['*.tf']\nworkflows:\n  custom:\n    plan:\n      steps: [init, plan]\n",
            ),
        ]);
        let config = GenerateConfig {
            output: Some(tree.path("atlantis.yaml")),
            preserve_projects: true,
            ..config(&tree)
        };

        let result = generate(&config).unwrap();

        assert_eq!(dirs(&result), vec!["app", "manual"]);
        assert_eq!(result.projects[0].autoplan.when_modified, vec!["*.hcl", "*.tf*"]);
        assert!(result.workflows.is_some());
    }

    #[test]
    fn test_workflows_dropped_without_preserve() {
        let tree = Tree::new(&[
            ("app/terragrunt.hcl", LEAF),
            ("atlantis.yaml", "version: 3\nworkflows:\n  custom: {}\n"),
        ]);
        let config = GenerateConfig {
            output: Some(tree.path("atlantis.yaml")),
            preserve_workflows: false,
            ..config(&tree)
        };

        let result = generate(&config).unwrap();

        assert_eq!(result.workflows, None);
    }

    #[test]
    fn test_malformed_old_config_fails() {
        let tree = Tree::new(&[("app/terragrunt.hcl", LEAF), ("atlantis.yaml", "projects: [unclosed")]);
        let config = GenerateConfig {
            output: Some(tree.path("atlantis.yaml")),
            ..config(&tree)
        };

        assert!(matches!(generate(&config), Err(GenerateError::Output(_))));
    }

    #[test]
    fn test_first_error_fails_the_run() {
        let tree = Tree::new(&[
            ("good/terragrunt.hcl", LEAF),
            ("bad/terragrunt.hcl", "terraform {\n  source = \n"),
        ]);

        let result = generate(&config(&tree));

        match result {
            Err(GenerateError::Project { path, .. }) => assert!(path.ends_with("bad/terragrunt.hcl")),
            other => panic!("expected project error, got {:?}", other),
        }
    }

    #[test]
    fn test_filter_limits_modules() {
        let tree = Tree::new(&[
            ("prod/app/terragrunt.hcl", LEAF),
            ("prod/db/terragrunt.hcl", LEAF),
            ("dev/app/terragrunt.hcl", LEAF),
        ]);
        let config = GenerateConfig {
            filter: vec!["prod/*".to_string(), "prod/app".to_string()],
            ..config(&tree)
        };

        let result = generate(&config).unwrap();

        assert_eq!(dirs(&result), vec!["prod/app", "prod/db"]);
    }

    #[test]
    fn test_project_marker_files_group_modules() {
        let tree = Tree::new(&[
            ("stacks/network/project.hcl", ""),
            ("stacks/network/vpc/terragrunt.hcl", LEAF),
            ("stacks/network/subnets/terragrunt.hcl", leaf_depending_on(&["../vpc"]).as_str()),
            ("stacks/app/project.hcl", "locals {\n  atlantis_skip = true\n}\n"),
            ("stacks/app/svc/terragrunt.hcl", LEAF),
            ("loose/terragrunt.hcl", LEAF),
        ]);
        let config = GenerateConfig {
            project_hcl_files: vec!["project.hcl".to_string()],
            ..config(&tree)
        };

        let result = generate(&config).unwrap();

        assert_eq!(dirs(&result), vec!["stacks/network"]);
        assert_eq!(result.projects[0].autoplan.when_modified, vec!["**/*.hcl", "**/*.tf*"]);
    }

    #[test]
    fn test_missing_root() {
        let config = GenerateConfig::new("/does/not/exist");
        assert!(matches!(
            generate(&config),
            Err(GenerateError::Discovery(DiscoveryError::RootNotFound(_)))
        ));
    }
}
