//! The atlantis.yaml document and the passes that order its projects.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{info, warn};

use crate::project::{sanitize_name, Project};
use crate::resolver::{normalize_path, to_slash};

/// Version of the Atlantis repo config syntax
pub const CONFIG_VERSION: u32 = 3;

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("YAML serialization failed: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("failed to parse existing config {path}: {source}")]
    MalformedConfig {
        path: Utf8PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to write {path}: {source}")]
    WriteError {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// An Atlantis repo config. Keys are declared in the order they are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtlantisConfig {
    #[serde(default)]
    pub automerge: bool,
    #[serde(default)]
    pub parallel_apply: bool,
    #[serde(default)]
    pub parallel_plan: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<Project>,
    #[serde(default = "default_version")]
    pub version: u32,
    /// Never interpreted, only carried over from an existing config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflows: Option<serde_yaml::Value>,
}

fn default_version() -> u32 {
    CONFIG_VERSION
}

impl Default for AtlantisConfig {
    fn default() -> Self {
        Self {
            automerge: false,
            parallel_apply: false,
            parallel_plan: false,
            projects: Vec::new(),
            version: CONFIG_VERSION,
            workflows: None,
        }
    }
}

impl AtlantisConfig {
    pub fn to_yaml(&self) -> Result<String, OutputError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Serialize and write to `path`.
    pub fn write(&self, path: &Utf8Path) -> Result<(), OutputError> {
        let yaml = self.to_yaml()?;
        std::fs::write(path, yaml).map_err(|source| OutputError::WriteError {
            path: path.to_owned(),
            source,
        })
    }
}

/// Read a previously generated config. A missing file is not an error, a
/// malformed one is.
pub fn read_old_config(path: &Utf8Path) -> Result<Option<AtlantisConfig>, OutputError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => {
            info!(path = %path, "could not find an old config file, starting from scratch");
            return Ok(None);
        }
    };

    serde_yaml::from_str(&content)
        .map(Some)
        .map_err(|source| OutputError::MalformedConfig {
            path: path.to_owned(),
            source,
        })
}

/// For each project, the indices of the other projects whose directories its
/// `when_modified` globs point into.
fn project_edges(projects: &[Project]) -> Vec<Vec<usize>> {
    let by_dir: HashMap<&str, usize> = projects.iter().enumerate().map(|(i, p)| (p.dir.as_str(), i)).collect();

    projects
        .iter()
        .enumerate()
        .map(|(index, project)| {
            let mut edges = Vec::new();
            for pattern in &project.autoplan.when_modified {
                let target = normalize_path(&Utf8Path::new(&project.dir).join(pattern));
                let dir = match target.parent() {
                    Some(parent) if !parent.as_str().is_empty() => to_slash(parent),
                    _ => ".".to_string(),
                };
                if let Some(&dep) = by_dir.get(dir.as_str()) {
                    if dep != index && !edges.contains(&dep) {
                        edges.push(dep);
                    }
                }
            }
            edges
        })
        .collect()
}

/// Level projects so that each one runs after everything it depends on.
///
/// A project's group is one more than the highest group among its
/// dependencies, 0 without any. Iterates to a fixed point, giving up after
/// one pass per project: not converging by then means a dependency cycle,
/// which is logged and leaves the groups as computed so far.
pub fn assign_execution_order_groups(projects: &mut [Project]) {
    let edges = project_edges(projects);
    let mut groups = vec![0u32; projects.len()];

    let mut converged = false;
    for _ in 0..=projects.len() {
        let mut changed = false;
        for (index, deps) in edges.iter().enumerate() {
            let group = deps.iter().map(|&dep| groups[dep] + 1).max().unwrap_or(0);
            if group != groups[index] {
                groups[index] = group;
                changed = true;
            }
        }
        if !changed {
            converged = true;
            break;
        }
    }

    if !converged {
        warn!("execution order groups did not converge, there is likely a dependency cycle between projects");
    }

    for (project, group) in projects.iter_mut().zip(groups) {
        project.execution_order_group = Some(group);
    }
}

/// Fill `depends_on` with the names of the projects each project depends on.
pub fn assign_depends_on(projects: &mut [Project]) {
    let edges = project_edges(projects);
    let names: Vec<String> = projects
        .iter()
        .map(|p| p.name.clone().unwrap_or_else(|| sanitize_name(&p.dir)))
        .collect();

    for (project, deps) in projects.iter_mut().zip(edges) {
        project.depends_on = deps.into_iter().map(|dep| names[dep].clone()).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Autoplan;
    use rstest::rstest;

    fn project(dir: &str, when_modified: &[&str]) -> Project {
        let mut patterns = vec!["*.hcl".to_string(), "*.tf*".to_string()];
        patterns.extend(when_modified.iter().map(|s| s.to_string()));
        Project {
            dir: dir.to_string(),
            autoplan: Autoplan {
                enabled: false,
                when_modified: patterns,
            },
            ..Default::default()
        }
    }

    fn groups(projects: &[Project]) -> Vec<Option<u32>> {
        projects.iter().map(|p| p.execution_order_group).collect()
    }

    // ============== Serialization ==============

    #[test]
    fn test_yaml_key_order() {
        let config = AtlantisConfig {
            parallel_apply: true,
            parallel_plan: true,
            projects: vec![Project {
                name: Some("app".to_string()),
                workflow: Some("terragrunt".to_string()),
                execution_order_group: Some(1),
                depends_on: vec!["vpc".to_string()],
                ..project("app", &["../vpc/terragrunt.hcl"])
            }],
            ..Default::default()
        };

        let yaml = config.to_yaml().expect("should serialize");

        let expected = "\
automerge: false
parallel_apply: true
parallel_plan: true
projects:
- autoplan:
    enabled: false
    when_modified:
    - '*.hcl'
    - '*.tf*'
    - ../vpc/terragrunt.hcl
  depends_on:
  - vpc
  dir: app
  execution_order_group: 1
  name: app
  workflow: terragrunt
version: 3
";
        assert_eq!(yaml, expected);
    }

    #[test]
    fn test_empty_projects_and_workflows_are_omitted() {
        let yaml = AtlantisConfig::default().to_yaml().unwrap();

        let parsed: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert!(parsed.get("projects").is_none());
        assert!(parsed.get("workflows").is_none());
        assert_eq!(parsed["version"].as_u64(), Some(3));
    }

    #[test]
    fn test_apply_requirements_written_when_empty_list() {
        let config = AtlantisConfig {
            projects: vec![Project {
                apply_requirements: Some(vec![]),
                ..project(".", &[])
            }],
            ..Default::default()
        };

        let parsed: serde_yaml::Value = serde_yaml::from_str(&config.to_yaml().unwrap()).unwrap();

        assert!(parsed["projects"][0]["apply_requirements"].as_sequence().unwrap().is_empty());
        assert!(parsed["projects"][0].get("workspace").is_none());
    }

    // ============== Old config ==============

    #[test]
    fn test_read_old_config_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("atlantis.yaml")).unwrap();

        assert_eq!(read_old_config(&path).unwrap(), None);
    }

    #[test]
    fn test_read_old_config_keeps_workflows_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("atlantis.yaml")).unwrap();
        std::fs::write(
            &path,
            "version: 3\nprojects:\n- dir: app\n  autoplan:\n    enabled: true\n    when_modified: ['*.hcl']\nworkflows:\n  terragrunt:\n    plan:\n      steps:\n      - run: terragrunt plan\n",
        )
        .unwrap();

        let config = read_old_config(&path).unwrap().expect("config present");

        assert_eq!(config.projects.len(), 1);
        assert_eq!(config.projects[0].dir, "app");
        assert!(config.projects[0].autoplan.enabled);
        let workflows = config.workflows.expect("workflows kept");
        assert_eq!(
            workflows["terragrunt"]["plan"]["steps"][0]["run"],
            serde_yaml::Value::from("terragrunt plan")
        );
    }

    #[test]
    fn test_read_old_config_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("atlantis.yaml")).unwrap();
        std::fs::write(&path, "projects: [unclosed").unwrap();

        assert!(matches!(read_old_config(&path), Err(OutputError::MalformedConfig { .. })));
    }

    // ============== Execution order groups ==============

    #[test]
    fn test_independent_projects_are_group_zero() {
        let mut projects = vec![project("a", &[]), project("b", &["../modules/x/*.tf*"])];

        assign_execution_order_groups(&mut projects);

        assert_eq!(groups(&projects), vec![Some(0), Some(0)]);
    }

    #[test]
    fn test_chain_is_leveled() {
        let mut projects = vec![
            project("live/app", &["../db/terragrunt.hcl", "../vpc/terragrunt.hcl"]),
            project("live/db", &["../vpc/terragrunt.hcl"]),
            project("live/vpc", &[]),
        ];

        assign_execution_order_groups(&mut projects);

        assert_eq!(groups(&projects), vec![Some(2), Some(1), Some(0)]);
    }

    #[test]
    fn test_root_project_is_a_valid_target() {
        let mut projects = vec![project(".", &[]), project("app", &["../terragrunt.hcl"])];

        assign_execution_order_groups(&mut projects);

        assert_eq!(groups(&projects), vec![Some(0), Some(1)]);
    }

    #[test]
    fn test_cycle_still_assigns_groups() {
        let mut projects = vec![
            project("a", &["../b/terragrunt.hcl"]),
            project("b", &["../a/terragrunt.hcl"]),
        ];

        assign_execution_order_groups(&mut projects);

        assert!(projects.iter().all(|p| p.execution_order_group.is_some()));
    }

    // ============== depends_on ==============

    #[rstest]
    #[case::named(Some("custom-vpc"), "custom-vpc")]
    #[case::derived(None, "live_vpc")]
    fn test_depends_on_uses_project_names(#[case] name: Option<&str>, #[case] expected: &str) {
        let mut projects = vec![
            Project {
                name: Some("live_app".to_string()),
                ..project("live/app", &["../vpc/terragrunt.hcl", "../vpc/extra.hcl"])
            },
            Project {
                name: name.map(str::to_string),
                ..project("live/vpc", &[])
            },
        ];

        assign_depends_on(&mut projects);

        assert_eq!(projects[0].depends_on, vec![expected.to_string()]);
        assert!(projects[1].depends_on.is_empty());
    }
}
