//! Run-scoped memoization shared by all workers.
//!
//! Every entry is a [`OnceLock`]: the first caller computes the value while
//! concurrent callers for the same key block on that computation and then
//! observe the same result. The map itself sits behind an [`RwLock`] that is
//! only held long enough to find or insert an entry, never while computing.

use camino::Utf8PathBuf;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::dependencies::{DirectDependencies, ResolveError};
use crate::locals::ResolvedLocals;
use crate::parser::{ParseError, TerragruntConfig};

/// A concurrent map whose values are computed at most once per key.
pub struct OnceMap<K, V> {
    entries: RwLock<HashMap<K, Arc<OnceLock<V>>>>,
}

impl<K: Eq + Hash + Clone, V: Clone> OnceMap<K, V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The completed value for `key`, if any.
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Store `value` unless the key already has one. Returns whether it was stored.
    pub fn insert(&self, key: K, value: V) -> bool {
        self.cell(&key).set(value).is_ok()
    }

    /// Return the value for `key`, computing it with `compute` if no caller
    /// has done so yet. `compute` must not request the same key again.
    pub fn get_or_compute<F>(&self, key: &K, compute: F) -> V
    where
        F: FnOnce() -> V,
    {
        self.cell(key).get_or_init(compute).clone()
    }

    /// Number of completed entries.
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.values().filter(|cell| cell.get().is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell(&self, key: &K) -> Arc<OnceLock<V>> {
        if let Some(cell) = self.entries.read().unwrap_or_else(PoisonError::into_inner).get(key) {
            return Arc::clone(cell);
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entries.entry(key.clone()).or_default())
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for OnceMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

pub type ConfigResult = Result<Arc<TerragruntConfig>, Arc<ParseError>>;
pub type LocalsResult = Result<Arc<ResolvedLocals>, ResolveError>;
/// `Ok(None)` records that the file is skipped.
pub type DependencyResult = Result<Option<Arc<DirectDependencies>>, ResolveError>;

/// All memoized state of one generation run.
#[derive(Default)]
pub struct RunCache {
    /// Parsed terragrunt files, shared by every module that includes them
    pub configs: OnceMap<Utf8PathBuf, ConfigResult>,
    pub locals: OnceMap<Utf8PathBuf, LocalsResult>,
    pub dependencies: OnceMap<Utf8PathBuf, DependencyResult>,
}

impl RunCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// (files parsed, total direct dependencies recorded)
    pub fn stats(&self) -> (usize, usize) {
        let entries = self.dependencies.entries.read().unwrap_or_else(PoisonError::into_inner);
        let deps = entries
            .values()
            .filter_map(|cell| match cell.get() {
                Some(Ok(Some(direct))) => Some(direct.set.len()),
                _ => None,
            })
            .sum();
        (self.configs.len(), deps)
    }
}
