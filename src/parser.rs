//! Parse HCL files and extract terragrunt constructs.
//!
//! Parsing is deliberately partial: only the blocks that can carry a
//! dependency edge or an `atlantis_*` override are looked at, and every
//! expression is lowered into a [`PathExpr`] that the resolver can evaluate
//! without a full HCL evaluation context. Expressions outside that subset are
//! kept as [`PathExpr::Unresolvable`] instead of failing the whole file.

use camino::{Utf8Path, Utf8PathBuf};
use hcl::expr::{Expression, TraversalOperator};
use hcl::template::{Element, Template};
use hcl::Body;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("failed to read {path}: {source}")]
    IoError {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse HCL in {path}: {message}")]
    HclError { path: Utf8PathBuf, message: String },
    #[error("failed to parse JSON in {path}: {source}")]
    JsonError {
        path: Utf8PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A path-producing expression lowered from HCL.
#[derive(Debug, Clone, PartialEq)]
pub enum PathExpr {
    /// A plain string
    Literal(String),
    /// `find_in_parent_folders()` with an optional file name
    FindInParentFolders(Option<String>),
    /// `get_repo_root()`
    GetRepoRoot,
    /// `get_terragrunt_dir()` / `get_original_terragrunt_dir()`
    GetTerragruntDir,
    /// `get_parent_terragrunt_dir()`
    GetParentTerragruntDir,
    /// `path_relative_to_include()`
    PathRelativeToInclude,
    /// `path_relative_from_include()`
    PathRelativeFromInclude,
    /// `get_env("NAME", "default")`
    GetEnv { name: String, default: Option<String> },
    /// `local.<name>`
    Local(String),
    /// `dirname(expr)`
    Dirname(Box<PathExpr>),
    /// `format("%s/...", args...)`
    Format { fmt: String, args: Vec<PathExpr> },
    /// A string template made of literal fragments and expressions
    Interpolation(Vec<PathExpr>),
    /// Anything we cannot statically evaluate
    Unresolvable { func: String },
}

/// The right-hand side of a `locals` entry.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalExpr {
    Bool(bool),
    Value(PathExpr),
    List(Vec<PathExpr>),
    Opaque,
}

/// An `include` block.
#[derive(Debug, Clone, PartialEq)]
pub struct IncludeBlock {
    pub label: Option<String>,
    pub path: PathExpr,
}

/// A `dependency "name" { config_path = ... }` block.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyBlock {
    pub name: String,
    pub config_path: PathExpr,
}

/// An `extra_arguments` block inside `terraform`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtraArguments {
    pub arguments: Vec<PathExpr>,
    pub required_var_files: Vec<PathExpr>,
    pub optional_var_files: Vec<PathExpr>,
}

/// The `terraform` block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TerraformBlock {
    pub source: Option<PathExpr>,
    pub extra_arguments: Vec<ExtraArguments>,
}

/// Parsed terragrunt configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TerragruntConfig {
    pub includes: Vec<IncludeBlock>,
    /// `dependencies { paths = [...] }`
    pub dependency_paths: Vec<PathExpr>,
    pub dependency_blocks: Vec<DependencyBlock>,
    pub terraform: Option<TerraformBlock>,
    /// First arguments of every `read_terragrunt_config(...)` call in the file
    pub read_configs: Vec<PathExpr>,
    /// `locals` entries in declaration order
    pub locals: Vec<(String, LocalExpr)>,
}

impl TerragruntConfig {
    /// Extract the terragrunt constructs from a parsed HCL body.
    pub fn from_body(body: &Body) -> Self {
        let mut config = Self::default();

        for block in body.blocks() {
            match block.identifier() {
                "include" => {
                    if let Some(path) = attribute(block.body(), "path") {
                        config.includes.push(IncludeBlock {
                            label: block.labels().first().map(|l| l.as_str().to_owned()),
                            path: lower_expr(path),
                        });
                    }
                }
                "dependency" => {
                    let name = block.labels().first().map(|l| l.as_str().to_owned()).unwrap_or_default();
                    if let Some(config_path) = attribute(block.body(), "config_path") {
                        config.dependency_blocks.push(DependencyBlock {
                            name,
                            config_path: lower_expr(config_path),
                        });
                    }
                }
                "dependencies" => {
                    if let Some(paths) = attribute(block.body(), "paths") {
                        config.dependency_paths.extend(lower_list(paths));
                    }
                }
                "terraform" => config.terraform = Some(terraform_block(block.body())),
                "locals" => {
                    for attr in block.body().attributes() {
                        config.locals.push((attr.key().to_owned(), lower_local(attr.expr())));
                    }
                }
                _ => {}
            }
        }

        collect_read_configs(body, &mut config.read_configs);
        config
    }

    /// The `terraform.source` declared directly in this file.
    pub fn terraform_source(&self) -> Option<&PathExpr> {
        self.terraform.as_ref().and_then(|t| t.source.as_ref())
    }
}

/// A parent template is a file that neither includes another file nor
/// declares its own `terraform.source`. Any `include` makes a file a child,
/// since only one level of inheritance is supported.
pub fn is_parent_module(config: &TerragruntConfig) -> bool {
    config.includes.is_empty() && config.terraform_source().is_none()
}

/// Parse a terragrunt.hcl file
pub fn parse_terragrunt_file(path: &Utf8Path) -> Result<TerragruntConfig, ParseError> {
    let body = parse_hcl_file(path)?;
    Ok(TerragruntConfig::from_body(&body))
}

fn parse_hcl_file(path: &Utf8Path) -> Result<Body, ParseError> {
    let content = std::fs::read_to_string(path).map_err(|source| ParseError::IoError {
        path: path.to_owned(),
        source,
    })?;
    hcl::parse(&content).map_err(|e| ParseError::HclError {
        path: path.to_owned(),
        message: e.to_string(),
    })
}

/// A `module "name" { source = "..." }` call in a terraform file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleCall {
    pub name: String,
    pub source: String,
}

/// Read the module calls declared in a `.tf` or `.tf.json` file.
///
/// Module calls whose `source` is not a plain string are ignored.
pub fn parse_module_calls(path: &Utf8Path) -> Result<Vec<ModuleCall>, ParseError> {
    if path.as_str().ends_with(".json") {
        return parse_json_module_calls(path);
    }

    let body = parse_hcl_file(path)?;
    Ok(body
        .blocks()
        .filter(|block| block.identifier() == "module")
        .filter_map(|block| {
            let name = block.labels().first()?.as_str().to_owned();
            match attribute(block.body(), "source")? {
                Expression::String(source) => Some(ModuleCall {
                    name,
                    source: source.clone(),
                }),
                _ => None,
            }
        })
        .collect())
}

fn parse_json_module_calls(path: &Utf8Path) -> Result<Vec<ModuleCall>, ParseError> {
    let content = std::fs::read_to_string(path).map_err(|source| ParseError::IoError {
        path: path.to_owned(),
        source,
    })?;
    let value: serde_json::Value = serde_json::from_str(&content).map_err(|source| ParseError::JsonError {
        path: path.to_owned(),
        source,
    })?;

    // `module` is either an object keyed by name or a list of such objects
    let groups: Vec<&serde_json::Value> = match value.get("module") {
        Some(serde_json::Value::Array(items)) => items.iter().collect(),
        Some(obj @ serde_json::Value::Object(_)) => vec![obj],
        _ => vec![],
    };

    let mut calls = Vec::new();
    for group in groups {
        let Some(modules) = group.as_object() else { continue };
        for (name, module) in modules {
            if let Some(source) = module.get("source").and_then(|s| s.as_str()) {
                calls.push(ModuleCall {
                    name: name.clone(),
                    source: source.to_owned(),
                });
            }
        }
    }
    Ok(calls)
}

fn attribute<'a>(body: &'a Body, key: &str) -> Option<&'a Expression> {
    body.attributes().find(|attr| attr.key() == key).map(|attr| attr.expr())
}

fn terraform_block(body: &Body) -> TerraformBlock {
    let extra_arguments = body
        .blocks()
        .filter(|block| block.identifier() == "extra_arguments")
        .map(|block| {
            let list = |key: &str| attribute(block.body(), key).map(lower_list).unwrap_or_default();
            ExtraArguments {
                arguments: list("arguments"),
                required_var_files: list("required_var_files"),
                optional_var_files: list("optional_var_files"),
            }
        })
        .collect();

    TerraformBlock {
        source: attribute(body, "source").map(lower_expr),
        extra_arguments,
    }
}

fn lower_list(expr: &Expression) -> Vec<PathExpr> {
    match expr {
        Expression::Array(items) => items.iter().map(lower_expr).collect(),
        Expression::Parenthesis(inner) => lower_list(inner),
        other => vec![lower_expr(other)],
    }
}

fn lower_local(expr: &Expression) -> LocalExpr {
    match expr {
        Expression::Bool(b) => LocalExpr::Bool(*b),
        Expression::Array(items) => LocalExpr::List(items.iter().map(lower_expr).collect()),
        Expression::Parenthesis(inner) => lower_local(inner),
        Expression::Null | Expression::Object(_) => LocalExpr::Opaque,
        other => match lower_expr(other) {
            PathExpr::Unresolvable { .. } => LocalExpr::Opaque,
            lowered => LocalExpr::Value(lowered),
        },
    }
}

/// Lower an HCL expression into a [`PathExpr`].
pub fn lower_expr(expr: &Expression) -> PathExpr {
    match expr {
        Expression::String(s) => PathExpr::Literal(s.clone()),
        Expression::Number(n) => PathExpr::Literal(n.to_string()),
        Expression::Bool(b) => PathExpr::Literal(b.to_string()),
        Expression::Parenthesis(inner) => lower_expr(inner),
        Expression::TemplateExpr(template) => match Template::from_expr(template) {
            Ok(template) => lower_template(&template),
            Err(_) => PathExpr::Unresolvable {
                func: "template".to_string(),
            },
        },
        Expression::Traversal(traversal) => match (&traversal.expr, traversal.operators.as_slice()) {
            (Expression::Variable(var), [TraversalOperator::GetAttr(name)]) if var.as_str() == "local" => {
                PathExpr::Local(name.as_str().to_owned())
            }
            _ => PathExpr::Unresolvable {
                func: "traversal".to_string(),
            },
        },
        Expression::FuncCall(call) => lower_func_call(&call.name.to_string(), &call.args),
        _ => PathExpr::Unresolvable {
            func: "expression".to_string(),
        },
    }
}

fn lower_template(template: &Template) -> PathExpr {
    let mut parts = Vec::new();
    for element in template.elements() {
        match element {
            Element::Literal(s) => parts.push(PathExpr::Literal(s.clone())),
            Element::Interpolation(interpolation) => parts.push(lower_expr(&interpolation.expr)),
            _ => {
                return PathExpr::Unresolvable {
                    func: "template directive".to_string(),
                }
            }
        }
    }

    if let [PathExpr::Literal(literal)] = parts.as_slice() {
        return PathExpr::Literal(literal.clone());
    }
    PathExpr::Interpolation(parts)
}

fn string_arg(args: &[Expression], index: usize) -> Option<String> {
    match args.get(index)? {
        Expression::String(s) => Some(s.clone()),
        _ => None,
    }
}

fn lower_func_call(name: &str, args: &[Expression]) -> PathExpr {
    let unresolvable = || PathExpr::Unresolvable {
        func: format!("{}()", name),
    };

    match name {
        "find_in_parent_folders" => match args.first() {
            None => PathExpr::FindInParentFolders(None),
            Some(Expression::String(file)) => PathExpr::FindInParentFolders(Some(file.clone())),
            Some(_) => unresolvable(),
        },
        "get_repo_root" => PathExpr::GetRepoRoot,
        "get_terragrunt_dir" | "get_original_terragrunt_dir" => PathExpr::GetTerragruntDir,
        "get_parent_terragrunt_dir" => PathExpr::GetParentTerragruntDir,
        "path_relative_to_include" => PathExpr::PathRelativeToInclude,
        "path_relative_from_include" => PathExpr::PathRelativeFromInclude,
        "get_env" => match string_arg(args, 0) {
            Some(var) => PathExpr::GetEnv {
                name: var,
                default: string_arg(args, 1),
            },
            None => unresolvable(),
        },
        "dirname" => match args.first() {
            Some(inner) => PathExpr::Dirname(Box::new(lower_expr(inner))),
            None => unresolvable(),
        },
        "format" => match string_arg(args, 0) {
            Some(fmt) => PathExpr::Format {
                fmt,
                args: args[1..].iter().map(lower_expr).collect(),
            },
            None => unresolvable(),
        },
        _ => unresolvable(),
    }
}

/// Find `read_terragrunt_config(...)` calls anywhere in the body.
fn collect_read_configs(body: &Body, out: &mut Vec<PathExpr>) {
    for attr in body.attributes() {
        collect_read_configs_in_expr(attr.expr(), out);
    }
    for block in body.blocks() {
        collect_read_configs(block.body(), out);
    }
}

fn collect_read_configs_in_expr(expr: &Expression, out: &mut Vec<PathExpr>) {
    match expr {
        Expression::FuncCall(call) => {
            if call.name.to_string() == "read_terragrunt_config" {
                if let Some(first) = call.args.first() {
                    out.push(lower_expr(first));
                }
            }
            for arg in &call.args {
                collect_read_configs_in_expr(arg, out);
            }
        }
        Expression::Array(items) => {
            for item in items {
                collect_read_configs_in_expr(item, out);
            }
        }
        Expression::Object(object) => {
            for (_, value) in object.iter() {
                collect_read_configs_in_expr(value, out);
            }
        }
        Expression::Parenthesis(inner) => collect_read_configs_in_expr(inner, out),
        Expression::Traversal(traversal) => collect_read_configs_in_expr(&traversal.expr, out),
        Expression::Conditional(cond) => {
            collect_read_configs_in_expr(&cond.cond_expr, out);
            collect_read_configs_in_expr(&cond.true_expr, out);
            collect_read_configs_in_expr(&cond.false_expr, out);
        }
        _ => {}
    }
}
