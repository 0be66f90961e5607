//! Typed `atlantis_*` overrides read from `locals` blocks.

use std::collections::HashMap;

use crate::resolver::LocalValue;

/// Recognised `locals` entries of one module, after inheritance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedLocals {
    /// `atlantis_workflow`
    pub workflow: Option<String>,
    /// `atlantis_terraform_version`
    pub terraform_version: Option<String>,
    /// `atlantis_autoplan`
    pub autoplan: Option<bool>,
    /// `atlantis_skip`
    pub skip: Option<bool>,
    /// `atlantis_apply_requirements`
    pub apply_requirements: Option<Vec<String>>,
    /// `extra_atlantis_dependencies`, as written (relative to the module dir)
    pub extra_dependencies: Vec<String>,
    /// `atlantis_project`
    pub marked_project: Option<bool>,
}

impl ResolvedLocals {
    /// Pick the recognised entries out of evaluated locals. Values of the
    /// wrong shape are ignored.
    pub fn from_values(values: &HashMap<String, LocalValue>) -> Self {
        Self {
            workflow: string(values.get("atlantis_workflow")),
            terraform_version: string(values.get("atlantis_terraform_version")),
            autoplan: boolean(values.get("atlantis_autoplan")),
            skip: boolean(values.get("atlantis_skip")),
            apply_requirements: list(values.get("atlantis_apply_requirements")),
            extra_dependencies: list(values.get("extra_atlantis_dependencies")).unwrap_or_default(),
            marked_project: boolean(values.get("atlantis_project")),
        }
    }

    /// Layer `child` over `self`: set values win, extra dependencies append.
    pub fn merge(self, child: ResolvedLocals) -> ResolvedLocals {
        let mut extra_dependencies = self.extra_dependencies;
        extra_dependencies.extend(child.extra_dependencies);

        ResolvedLocals {
            workflow: child.workflow.or(self.workflow),
            terraform_version: child.terraform_version.or(self.terraform_version),
            autoplan: child.autoplan.or(self.autoplan),
            skip: child.skip.or(self.skip),
            apply_requirements: child.apply_requirements.or(self.apply_requirements),
            extra_dependencies,
            marked_project: child.marked_project.or(self.marked_project),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skip.unwrap_or(false)
    }

    pub fn is_marked_project(&self) -> bool {
        self.marked_project.unwrap_or(false)
    }
}

fn string(value: Option<&LocalValue>) -> Option<String> {
    match value? {
        LocalValue::Str(s) => Some(s.clone()),
        _ => None,
    }
}

fn boolean(value: Option<&LocalValue>) -> Option<bool> {
    match value? {
        LocalValue::Bool(b) => Some(*b),
        LocalValue::Str(s) => s.parse().ok(),
        LocalValue::List(_) => None,
    }
}

fn list(value: Option<&LocalValue>) -> Option<Vec<String>> {
    match value? {
        LocalValue::List(items) => Some(items.clone()),
        // a single string is accepted as a one element list
        LocalValue::Str(s) => Some(vec![s.clone()]),
        LocalValue::Bool(_) => None,
    }
}
