use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Boundary checks that keep every write and delete inside the target tree.
#[derive(Debug, Clone)]
pub struct TreeGuard {
    /// Canonical path to the tree root
    tree_root: PathBuf,
    /// Canonical paths that must never be deleted
    protected_paths: Vec<PathBuf>,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("Path is outside the target tree: {path} (tree: {tree})")]
    OutsideTree { path: PathBuf, tree: PathBuf },

    #[error("Refusing to remove protected path: {0}")]
    Protected(PathBuf),

    #[error("Failed to canonicalize path: {0}")]
    Canonicalize(#[from] std::io::Error),
}

impl TreeGuard {
    /// Create a guard for the given tree root.
    ///
    /// The root is canonicalized to handle symlinks correctly and is itself
    /// protected from removal.
    pub fn new(tree_root: impl AsRef<Path>) -> Result<Self, SafetyError> {
        let tree_root = tree_root.as_ref().canonicalize()?;
        let protected_paths = vec![tree_root.clone()];

        Ok(Self {
            tree_root,
            protected_paths,
        })
    }

    /// Protect an additional path (staging directories, the descriptor).
    ///
    /// Paths that do not exist are ignored.
    pub fn protect(mut self, path: impl AsRef<Path>) -> Self {
        if let Ok(canonical) = path.as_ref().canonicalize() {
            self.protected_paths.push(canonical);
        }
        self
    }

    /// Check that a path is safe to write to.
    ///
    /// The path does not have to exist yet; the deepest existing ancestor is
    /// canonicalized and the remaining components are checked lexically.
    pub fn validate_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
        let path = path.as_ref();

        // Resolve relative paths against the tree root
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.tree_root.join(path)
        };

        let resolved = resolve_existing_prefix(&absolute)?;

        if !resolved.starts_with(&self.tree_root) {
            return Err(SafetyError::OutsideTree {
                path: resolved,
                tree: self.tree_root.clone(),
            });
        }

        Ok(resolved)
    }

    /// Check that a path may be deleted: inside the tree and not protected.
    pub fn validate_removal(&self, path: impl AsRef<Path>) -> Result<PathBuf, SafetyError> {
        let resolved = self.validate_path(path)?;

        for protected in &self.protected_paths {
            // Removing an ancestor of a protected path would remove it too
            if protected.starts_with(&resolved) {
                return Err(SafetyError::Protected(resolved));
            }
        }

        Ok(resolved)
    }

    pub fn tree_root(&self) -> &Path {
        &self.tree_root
    }
}

/// Canonicalize the longest existing prefix of `path` and append the rest,
/// rejecting `..` in the non-existing remainder.
fn resolve_existing_prefix(path: &Path) -> Result<PathBuf, SafetyError> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }

    let mut existing = path.to_path_buf();
    let mut remainder = Vec::new();
    while !existing.exists() {
        match (existing.file_name(), existing.parent()) {
            (Some(name), Some(parent)) => {
                remainder.push(name.to_os_string());
                existing = parent.to_path_buf();
            }
            _ => break,
        }
    }

    let mut resolved = existing.canonicalize()?;
    for part in remainder.iter().rev() {
        let component = Path::new(part);
        if component
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(SafetyError::OutsideTree {
                path: path.to_path_buf(),
                tree: resolved,
            });
        }
        resolved.push(part);
    }

    Ok(resolved)
}
