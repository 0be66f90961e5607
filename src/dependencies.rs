//! Dependency resolution with cascading and memoization.
//!
//! The dependencies of a module come in two layers:
//!
//! - its *direct* dependencies, read from the module itself and the parents it
//!   includes. These are computed once per file and stored in the
//!   [`RunCache`], concurrent requests for the same file collapse into one.
//! - its *cascaded* dependencies, the direct dependencies of every module it
//!   depends on, transitively. The cascade walks the cached direct sets with a
//!   stack-local path of the modules being expanded, so cycles are reported
//!   instead of recursing forever and no cache entry ever waits on itself.

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::RunCache;
use crate::config::GenerateConfig;
use crate::discovery::MODULE_FILE;
use crate::local_source::{find_local_module_sources, is_local_terraform_source};
use crate::locals::ResolvedLocals;
use crate::parser::{is_parent_module, parse_terragrunt_file, ParseError, PathExpr, TerragruntConfig};
use crate::resolver::{normalize_path, ResolveContext};

const VAR_FILE_ARGUMENT: &str = "-var-file=";

#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    #[error("{source}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: Arc<ParseError>,
    },
    #[error("failed to scan local modules for {path}: {source}")]
    Scan {
        path: Utf8PathBuf,
        #[source]
        source: Arc<ParseError>,
    },
    #[error("dependency cycle: {}", format_chain(.chain))]
    Cycle { chain: Vec<Utf8PathBuf> },
    #[error("{path} is not inside root {root}")]
    OutsideRoot { path: Utf8PathBuf, root: Utf8PathBuf },
    #[error("cannot express {target} relative to {base}")]
    Relativize { base: Utf8PathBuf, target: Utf8PathBuf },
}

fn format_chain(chain: &[Utf8PathBuf]) -> String {
    chain.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(" -> ")
}

/// Ordered set of absolute paths and globs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencySet {
    paths: Vec<Utf8PathBuf>,
    seen: HashSet<Utf8PathBuf>,
}

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a path unless it is already present. Returns whether it was added.
    pub fn insert(&mut self, path: Utf8PathBuf) -> bool {
        if self.seen.contains(&path) {
            return false;
        }
        self.seen.insert(path.clone());
        self.paths.push(path);
        true
    }

    pub fn contains(&self, path: &Utf8Path) -> bool {
        self.seen.contains(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Utf8PathBuf> {
        self.paths.iter()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn into_vec(self) -> Vec<Utf8PathBuf> {
        self.paths
    }
}

impl Extend<Utf8PathBuf> for DependencySet {
    fn extend<I: IntoIterator<Item = Utf8PathBuf>>(&mut self, iter: I) {
        for path in iter {
            self.insert(path);
        }
    }
}

impl FromIterator<Utf8PathBuf> for DependencySet {
    fn from_iter<I: IntoIterator<Item = Utf8PathBuf>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

/// Dependencies read from one module and the parents it includes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectDependencies {
    pub set: DependencySet,
    /// Terragrunt files whose own dependencies are cascaded into dependents
    pub cascade_targets: Vec<Utf8PathBuf>,
}

/// A config evaluated in the context of the module being resolved.
struct Scope {
    config: Arc<TerragruntConfig>,
    ctx: ResolveContext,
}

/// A module and the parents it includes.
struct Scopes {
    own: Scope,
    parents: Vec<Scope>,
}

impl Scopes {
    fn iter(&self) -> impl Iterator<Item = &Scope> {
        std::iter::once(&self.own).chain(&self.parents)
    }
}

/// Resolves dependencies for one run. Cheap to create; all state lives in the
/// shared [`RunCache`].
pub struct DependencyResolver<'a> {
    config: &'a GenerateConfig,
    cache: &'a RunCache,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(config: &'a GenerateConfig, cache: &'a RunCache) -> Self {
        Self { config, cache }
    }

    pub fn config(&self) -> &GenerateConfig {
        self.config
    }

    /// Parse a terragrunt file, at most once per run.
    pub fn load(&self, path: &Utf8Path) -> Result<Arc<TerragruntConfig>, ResolveError> {
        let key = path.to_owned();
        self.cache
            .configs
            .get_or_compute(&key, || {
                debug!(path = %path, "parsing");
                parse_terragrunt_file(path).map(Arc::new).map_err(Arc::new)
            })
            .map_err(|source| ResolveError::Parse { path: key, source })
    }

    /// The recognised locals of a module, merged over those of its parents.
    pub fn resolve_locals(&self, path: &Utf8Path) -> Result<Arc<ResolvedLocals>, ResolveError> {
        self.cache.locals.get_or_compute(&path.to_owned(), || {
            let scopes = self.scopes(path)?;
            let inherited = scopes.parents.iter().fold(ResolvedLocals::default(), |acc, scope| {
                acc.merge(ResolvedLocals::from_values(scope.ctx.locals()))
            });
            Ok(Arc::new(inherited.merge(ResolvedLocals::from_values(scopes.own.ctx.locals()))))
        })
    }

    /// The dependencies of `path`, cascaded when enabled. `None` means the file
    /// is a parent template that produces no project.
    pub fn resolve_dependencies(&self, path: &Utf8Path) -> Result<Option<DependencySet>, ResolveError> {
        let Some(direct) = self.direct_dependencies(path)? else {
            return Ok(None);
        };

        let mut set = direct.set.clone();
        if self.config.cascade_dependencies {
            let mut stack = vec![path.to_owned()];
            let mut visited = HashSet::from([path.to_owned()]);
            self.cascade(&direct, &mut stack, &mut visited, &mut set);
        }

        debug!(path = %path, dependencies = set.len(), "resolved dependencies");
        Ok(Some(set))
    }

    /// Direct dependencies of one file, computed at most once per run.
    pub fn direct_dependencies(&self, path: &Utf8Path) -> Result<Option<Arc<DirectDependencies>>, ResolveError> {
        self.cache
            .dependencies
            .get_or_compute(&path.to_owned(), || self.compute_direct(path))
    }

    fn cascade(
        &self,
        direct: &DirectDependencies,
        stack: &mut Vec<Utf8PathBuf>,
        visited: &mut HashSet<Utf8PathBuf>,
        set: &mut DependencySet,
    ) {
        for target in &direct.cascade_targets {
            if stack.contains(target) {
                let mut chain = stack.clone();
                chain.push(target.clone());
                let err = ResolveError::Cycle { chain };
                warn!(error = %err, "ignoring cyclic dependency");
                continue;
            }
            if !visited.insert(target.clone()) {
                continue;
            }

            match self.direct_dependencies(target) {
                Ok(Some(child)) => {
                    set.extend(child.set.iter().cloned());
                    stack.push(target.clone());
                    self.cascade(&child, stack, visited, set);
                    stack.pop();
                }
                Ok(None) => debug!(path = %target, "cascaded dependency is a parent template"),
                Err(err) => warn!(
                    dependency = %target,
                    module = %stack[0],
                    error = %err,
                    "skipping dependency that failed to resolve"
                ),
            }
        }
    }

    fn compute_direct(&self, path: &Utf8Path) -> Result<Option<Arc<DirectDependencies>>, ResolveError> {
        let config = self.load(path)?;
        if self.config.ignore_parent_terragrunt && is_parent_module(&config) {
            debug!(path = %path, "skipping parent template");
            return Ok(None);
        }

        let module_dir = module_dir(path);
        let scopes = self.scopes(path)?;
        let mut direct = DirectDependencies::default();

        for scope in scopes.iter() {
            for dir in self.dependency_dirs(scope) {
                let target = dir.join(MODULE_FILE);
                direct.set.insert(target.clone());
                direct.cascade_targets.push(target);
            }
        }

        for include in &config.includes {
            match scopes.own.ctx.resolve(&include.path) {
                Some(target) => {
                    direct.set.insert(target);
                }
                None => debug!(path = %path, "include path is not statically resolvable"),
            }
        }

        for scope in scopes.iter() {
            for expr in &scope.config.read_configs {
                match scope.ctx.resolve(expr) {
                    Some(target) => {
                        direct.set.insert(target.clone());
                        direct.cascade_targets.push(target);
                    }
                    None => debug!(path = %path, "read_terragrunt_config target is not statically resolvable"),
                }
            }
        }

        // the module's own source wins over an inherited one
        let source = scopes
            .iter()
            .find_map(|scope| scope.config.terraform_source().map(|expr| (scope, expr)));
        if let Some((scope, expr)) = source {
            if let Some(source) = scope.ctx.resolve_str(expr) {
                if is_local_terraform_source(&source) {
                    let source_dir = normalize_path(&module_dir.join(strip_query(&source)));
                    direct.set.insert(source_dir.join("*.tf*"));
                    direct.set.extend(self.scan(&source_dir)?);
                }
            }
        }

        direct.set.extend(self.scan(&module_dir)?);

        let locals = self.resolve_locals(path)?;
        let files = scopes
            .iter()
            .flat_map(var_files)
            .chain(locals.extra_dependencies.iter().cloned());
        for file in files {
            let target = normalize_path(&module_dir.join(file));
            if is_config_file(&target) {
                direct.cascade_targets.push(target.clone());
            }
            direct.set.insert(target);
        }

        debug!(path = %path, dependencies = direct.set.len(), "resolved direct dependencies");
        Ok(Some(Arc::new(direct)))
    }

    /// The module itself followed by every parent it includes, each with its
    /// locals evaluated. Parents that cannot be located or parsed are skipped.
    fn scopes(&self, path: &Utf8Path) -> Result<Scopes, ResolveError> {
        let config = self.load(path)?;
        let dir = module_dir(path);

        let mut own = ResolveContext::new(dir.clone(), Arc::clone(&self.config.env));
        own.evaluate_locals(&config.locals);

        let mut parents = Vec::new();
        for include in &config.includes {
            let Some(parent_path) = own.resolve(&include.path) else {
                debug!(path = %path, include = ?include.label, "include path is not statically resolvable");
                continue;
            };
            let parent = match self.load(&parent_path) {
                Ok(parent) => parent,
                Err(err) => {
                    warn!(module = %path, include = ?include.label, error = %err, "ignoring include that failed to parse");
                    continue;
                }
            };

            let mut ctx = ResolveContext::for_included_config(
                dir.clone(),
                module_dir(&parent_path),
                Arc::clone(&self.config.env),
            );
            ctx.evaluate_locals(&parent.locals);
            parents.push(Scope { config: parent, ctx });
        }

        Ok(Scopes {
            own: Scope { config, ctx: own },
            parents,
        })
    }

    /// Directories named by `dependencies` and `dependency` blocks.
    fn dependency_dirs(&self, scope: &Scope) -> Vec<Utf8PathBuf> {
        let blocks = scope
            .config
            .dependency_blocks
            .iter()
            .filter(|_| !self.config.ignore_dependency_blocks)
            .map(|block| (block.name.as_str(), &block.config_path));

        scope
            .config
            .dependency_paths
            .iter()
            .map(|expr| ("dependencies", expr))
            .chain(blocks)
            .filter_map(|(name, expr)| {
                let resolved = scope.ctx.resolve(expr);
                if resolved.is_none() {
                    debug!(dir = %scope.ctx.terragrunt_dir, dependency = name, "dependency path is not statically resolvable");
                }
                resolved
            })
            .collect()
    }

    fn scan(&self, dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, ResolveError> {
        find_local_module_sources(dir).map_err(|source| ResolveError::Scan {
            path: dir.to_owned(),
            source: Arc::new(source),
        })
    }
}

/// Var files passed through `extra_arguments`, as written.
fn var_files(scope: &Scope) -> Vec<String> {
    let Some(terraform) = &scope.config.terraform else {
        return Vec::new();
    };

    let resolve = |expr: &PathExpr| scope.ctx.resolve_str(expr);
    let mut files = Vec::new();
    for extra in &terraform.extra_arguments {
        files.extend(
            extra
                .arguments
                .iter()
                .filter_map(resolve)
                .filter_map(|arg| arg.strip_prefix(VAR_FILE_ARGUMENT).map(str::to_owned)),
        );
        files.extend(extra.required_var_files.iter().filter_map(resolve));
        files.extend(extra.optional_var_files.iter().filter_map(resolve));
    }
    files
}

/// A single `.hcl` file rather than a glob. Its own dependencies are cascaded;
/// files that turn out not to be modules are skipped at the cascade.
fn is_config_file(path: &Utf8Path) -> bool {
    path.extension() == Some("hcl") && !path.as_str().contains(|c: char| matches!(c, '*' | '?' | '['))
}

/// Drop a `?ref=...` style query from a module source.
fn strip_query(source: &str) -> &str {
    source.split_once('?').map_or(source, |(path, _)| path)
}

/// Directory holding a terragrunt file.
pub fn module_dir(path: &Utf8Path) -> Utf8PathBuf {
    path.parent().map(Utf8Path::to_path_buf).unwrap_or_else(|| Utf8PathBuf::from("."))
}
