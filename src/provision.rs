//! Tree provisioning: staged configuration files, per-module sample copies
//! and the mains placeholder.
//!
//! Everything created here on apply is deleted here on revert; deleting a
//! path that is already gone counts as success.

use crate::config::{HookConfig, Samples};
use crate::report::{ItemOutcome, ItemStatus};
use crate::rewrite::rewrite_literal;
use crate::safety::{SafetyError, TreeGuard};
use crate::tree::TargetTree;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Staged file not found: {0}")]
    MissingStaging(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: io::Error,
    },

    #[error(transparent)]
    Safety(#[from] SafetyError),
}

impl ProvisionError {
    fn io(path: &Path, source: io::Error) -> Self {
        ProvisionError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub struct Provisioner<'a> {
    tree: &'a TargetTree,
    config: &'a HookConfig,
    guard: &'a TreeGuard,
}

impl<'a> Provisioner<'a> {
    pub fn new(tree: &'a TargetTree, config: &'a HookConfig, guard: &'a TreeGuard) -> Self {
        Self {
            tree,
            config,
            guard,
        }
    }

    fn staged_source(&self, source: &str) -> PathBuf {
        self.tree
            .join(&format!("{}/{}", self.config.staging.dir, source))
    }

    /// Check every staged source exists before anything is mutated.
    pub fn preflight(&self) -> Result<(), ProvisionError> {
        for file in &self.config.staging.files {
            let source = self.staged_source(&file.source);
            if !source.is_file() {
                return Err(ProvisionError::MissingStaging(source));
            }
        }
        Ok(())
    }

    pub fn apply(&self) -> Result<Vec<ItemOutcome>, ProvisionError> {
        let mut items = self.copy_staged()?;
        items.extend(self.copy_samples()?);
        if let Some(mains) = &self.config.mains {
            let path = self.guard.validate_path(self.tree.join(&mains.file))?;
            items.push(rewrite_literal(&path, &mains.placeholder, &mains.block, false));
        }
        Ok(items)
    }

    pub fn revert(&self) -> Result<Vec<ItemOutcome>, ProvisionError> {
        let mut items = Vec::new();

        if let Some(mains) = &self.config.mains {
            let path = self.tree.join(&mains.file);
            if path.exists() {
                let path = self.guard.validate_path(path)?;
                items.push(rewrite_literal(&path, &mains.block, &mains.placeholder, false));
            }
        }

        for file in &self.config.staging.files {
            items.push(self.remove(&self.tree.join(&file.dest))?);
        }

        if let Some(samples) = &self.config.samples {
            items.push(self.remove(&self.tree.join(&samples.dest_dir))?);
        }

        Ok(items)
    }

    /// Copy staged configuration files into the tree, overwriting.
    fn copy_staged(&self) -> Result<Vec<ItemOutcome>, ProvisionError> {
        let mut items = Vec::with_capacity(self.config.staging.files.len());

        for file in &self.config.staging.files {
            let source = self.staged_source(&file.source);
            if !source.is_file() {
                return Err(ProvisionError::MissingStaging(source));
            }

            let dest = self.guard.validate_path(self.tree.join(&file.dest))?;
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| ProvisionError::io(parent, e))?;
            }
            fs::copy(&source, &dest).map_err(|e| ProvisionError::io(&dest, e))?;

            debug!(source = %source.display(), dest = %dest.display(), "staged file copied");
            items.push(ItemOutcome::new(dest, ItemStatus::Copied));
        }

        Ok(items)
    }

    /// Copy `<module>/samples` to `examples/<module>` for every eligible module.
    fn copy_samples(&self) -> Result<Vec<ItemOutcome>, ProvisionError> {
        let Some(samples) = &self.config.samples else {
            return Ok(Vec::new());
        };

        let root = self.tree.root();
        let dest_root = self.tree.join(&samples.dest_dir);
        let mut items = Vec::new();

        let sources = sample_sources(self.tree, samples).map_err(|e| ProvisionError::io(root, e))?;
        for source in sources {
            if let Some(reason) = source.excluded {
                items.push(ItemOutcome::skipped(source.dir, reason));
                continue;
            }

            let dest = self.guard.validate_path(dest_root.join(&source.module))?;
            let copied = copy_tree(&source.dir, &dest)?;
            info!(module = %source.module, files = copied, "samples copied");
            items.push(ItemOutcome::new(dest, ItemStatus::Copied));
        }

        Ok(items)
    }

    /// Delete a provisioned file or directory; absence is success.
    fn remove(&self, path: &Path) -> Result<ItemOutcome, ProvisionError> {
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(ItemOutcome::new(path, ItemStatus::AlreadyAbsent))
            }
            Err(e) => return Err(ProvisionError::io(path, e)),
        };

        let path = self.guard.validate_removal(path)?;
        let result = if metadata.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };

        match result {
            Ok(()) => {
                debug!(path = %path.display(), "removed");
                Ok(ItemOutcome::new(path, ItemStatus::Removed))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Ok(ItemOutcome::new(path, ItemStatus::AlreadyAbsent))
            }
            Err(e) => Err(ProvisionError::io(&path, e)),
        }
    }
}

/// A module's sample directory found under the tree root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleSource {
    pub module: String,
    pub dir: PathBuf,
    /// Why the module is not copied on this platform
    pub excluded: Option<String>,
}

/// Every `<module>/<source_dir>` directly under the tree root, sorted by module.
pub fn sample_sources(tree: &TargetTree, samples: &Samples) -> io::Result<Vec<SampleSource>> {
    let dest_root = tree.join(&samples.dest_dir);
    let mut sources = Vec::new();

    for module_dir in module_dirs(tree.root())? {
        if module_dir == dest_root {
            continue;
        }
        let dir = module_dir.join(&samples.source_dir);
        if !dir.is_dir() {
            continue;
        }

        let module = module_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let excluded = samples.exclusion(&module, tree.platform());
        sources.push(SampleSource {
            module,
            dir,
            excluded,
        });
    }

    Ok(sources)
}

/// Directories directly under `root`, sorted by name.
fn module_dirs(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Recursively copy `src` into `dst`, creating `dst` and overwriting files.
///
/// Returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<u64, ProvisionError> {
    fs::create_dir_all(dst).map_err(|e| ProvisionError::io(dst, e))?;

    let mut copied = 0;
    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| ProvisionError::io(src, e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| ProvisionError::io(entry.path(), io::Error::other(e)))?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| ProvisionError::io(&target, e))?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| ProvisionError::io(&target, e))?;
            copied += 1;
        }
    }

    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Platform;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn staged_tree(root: &Path) {
        write(root, "biicode/conf/biicode.conf", "[requirements]\n#[mains] section\n");
        write(root, "biicode/conf/ignore.bii", "*.vcproj\n");
        write(root, "biicode/conf/pocomsg.h.bii", "// generated\n");
        write(root, "Zip/samples/zip/src/zip.cpp", "int main() {}\n");
        write(root, "Util/samples/pkill/src/pkill.cpp", "int main() {}\n");
        write(root, "CppUnit/samples/demo/demo.cpp", "int main() {}\n");
        write(root, "NetSSL_Win/samples/HTTPSTimeServer/src/main.cpp", "int main() {}\n");
        write(root, "Foundation/src/Checksum.cpp", "\n");
    }

    fn provision(root: &Path, platform: Platform) -> Vec<ItemOutcome> {
        let tree = TargetTree::new(root, platform);
        let config = crate::config::builtin().unwrap();
        let guard = TreeGuard::new(root).unwrap();
        Provisioner::new(&tree, &config, &guard).apply().unwrap()
    }

    #[test]
    fn test_apply_copies_staged_files_and_samples() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        staged_tree(root);

        provision(root, Platform::Linux);

        assert_eq!(
            fs::read_to_string(root.join("ignore.bii")).unwrap(),
            "*.vcproj\n"
        );
        assert!(root.join("Foundation/src/pocomsg.h").is_file());
        assert!(root.join("examples/Zip/zip/src/zip.cpp").is_file());
        assert!(root.join("examples/Util/pkill/src/pkill.cpp").is_file());
    }

    #[test]
    fn test_denylisted_and_platform_only_modules_are_skipped() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        staged_tree(root);

        let items = provision(root, Platform::Linux);

        assert!(!root.join("examples/CppUnit").exists());
        assert!(!root.join("examples/NetSSL_Win").exists());
        let skipped: Vec<_> = items
            .iter()
            .filter(|item| matches!(item.status, ItemStatus::Skipped { .. }))
            .collect();
        assert_eq!(skipped.len(), 2);
    }

    #[test]
    fn test_platform_only_module_copied_on_its_platform() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        staged_tree(root);

        provision(root, Platform::Windows);

        assert!(root
            .join("examples/NetSSL_Win/HTTPSTimeServer/src/main.cpp")
            .is_file());
        assert!(!root.join("examples/CppUnit").exists());
    }

    #[test]
    fn test_mains_placeholder_is_replaced() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        staged_tree(root);

        provision(root, Platform::Linux);

        let conf = fs::read_to_string(root.join("biicode.conf")).unwrap();
        assert!(!conf.contains("#[mains] section"));
        assert!(conf.contains("[mains]\n    # Crypto\n"));
        assert!(conf.contains("examples/Util/SampleServer/src/SampleServer.cpp"));
    }

    #[test]
    fn test_missing_staging_fails_preflight() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        write(root, "biicode/conf/biicode.conf", "");

        let tree = TargetTree::new(root, Platform::Linux);
        let config = crate::config::builtin().unwrap();
        let guard = TreeGuard::new(root).unwrap();
        let provisioner = Provisioner::new(&tree, &config, &guard);

        assert!(matches!(
            provisioner.preflight(),
            Err(ProvisionError::MissingStaging(_))
        ));
    }

    #[test]
    fn test_revert_is_idempotent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        staged_tree(root);
        provision(root, Platform::Linux);

        let tree = TargetTree::new(root, Platform::Linux);
        let config = crate::config::builtin().unwrap();
        let guard = TreeGuard::new(root).unwrap();
        let provisioner = Provisioner::new(&tree, &config, &guard);

        let first = provisioner.revert().unwrap();
        assert!(first.iter().any(|item| item.status == ItemStatus::Removed));
        assert!(!root.join("examples").exists());
        assert!(!root.join("biicode.conf").exists());
        assert!(!root.join("Foundation/src/pocomsg.h").exists());
        assert!(root.join("biicode/conf/biicode.conf").exists());

        let second = provisioner.revert().unwrap();
        assert!(second
            .iter()
            .all(|item| item.status == ItemStatus::AlreadyAbsent));
    }

    #[test]
    fn test_copy_tree_overwrites() {
        let temp_dir = tempfile::tempdir().unwrap();
        let src = temp_dir.path().join("src");
        let dst = temp_dir.path().join("dst");
        write(&src, "a/b.txt", "new");
        write(&dst, "a/b.txt", "old");

        let copied = copy_tree(&src, &dst).unwrap();
        assert_eq!(copied, 1);
        assert_eq!(fs::read_to_string(dst.join("a/b.txt")).unwrap(), "new");
    }
}
