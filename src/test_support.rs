//! Scratch directory trees for unit tests.

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::TempDir;

pub(crate) struct Tree {
    _dir: TempDir,
    root: Utf8PathBuf,
}

impl Tree {
    /// Create a tree from `(relative path, contents)` pairs. A path ending in
    /// `/` creates an empty directory.
    pub(crate) fn new(files: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().canonicalize().expect("canonicalize temp dir"))
            .expect("temp dir is utf-8");

        for (path, contents) in files {
            let full = root.join(path);
            if path.ends_with('/') {
                std::fs::create_dir_all(&full).expect("create dir");
                continue;
            }
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).expect("create parent dir");
            }
            std::fs::write(&full, contents).expect("write file");
        }

        Self { _dir: dir, root }
    }

    pub(crate) fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub(crate) fn path(&self, relative: &str) -> Utf8PathBuf {
        self.root.join(relative)
    }
}
