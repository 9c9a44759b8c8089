//! Tree state detection.
//!
//! The marker substring in the build descriptor is the ground truth for
//! `Patched` vs `Unpatched`. A JSON state record written after a successful
//! apply carries xxh3 snapshots of the descriptor so drift since the last run
//! can be reported precisely.

use crate::config::HookConfig;
use crate::edit::{atomic_write, EditError};
use crate::provision::sample_sources;
use crate::tree::TargetTree;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeState {
    Unpatched,
    Patched,
}

impl fmt::Display for TreeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeState::Unpatched => write!(f, "unpatched"),
            TreeState::Patched => write!(f, "patched"),
        }
    }
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Build descriptor not found: {0}")]
    MissingDescriptor(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Corrupt state record {path}: {source}")]
    Record {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to write state record: {0}")]
    Write(#[from] EditError),
}

fn read_descriptor(descriptor: &Path) -> Result<Vec<u8>, StateError> {
    fs::read(descriptor).map_err(|source| match source.kind() {
        ErrorKind::NotFound => StateError::MissingDescriptor(descriptor.to_path_buf()),
        _ => StateError::Io {
            path: descriptor.to_path_buf(),
            source,
        },
    })
}

/// Classify the tree by looking for `marker` in the descriptor.
pub fn detect_state(descriptor: &Path, marker: &str) -> Result<TreeState, StateError> {
    let content = read_descriptor(descriptor)?;
    let content = String::from_utf8_lossy(&content);

    if content.contains(marker) {
        Ok(TreeState::Patched)
    } else {
        Ok(TreeState::Unpatched)
    }
}

/// xxh3 hash of the descriptor's raw bytes.
pub fn descriptor_hash(descriptor: &Path) -> Result<u64, StateError> {
    Ok(xxh3_64(&read_descriptor(descriptor)?))
}

/// Persisted record of the last successful apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub tool_version: String,
    pub config_name: String,
    pub platform: String,
    /// xxh3 of the descriptor before apply, hex encoded
    pub pristine_descriptor_hash: String,
    /// xxh3 of the descriptor after apply, hex encoded
    pub patched_descriptor_hash: String,
}

impl StateRecord {
    pub fn new(config: &HookConfig, tree: &TargetTree, pristine: u64, patched: u64) -> Self {
        Self {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            config_name: config.meta.name.clone(),
            platform: tree.platform().to_string(),
            pristine_descriptor_hash: format_hash(pristine),
            patched_descriptor_hash: format_hash(patched),
        }
    }

    /// Load the record, or `None` if it was never written.
    pub fn load(path: &Path) -> Result<Option<Self>, StateError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(source) if source.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StateError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| StateError::Record {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(self).map_err(|source| StateError::Record {
            path: path.to_path_buf(),
            source,
        })?;
        atomic_write(path, json.as_bytes())?;
        Ok(())
    }

    /// Delete the record. Returns false if it was already absent.
    pub fn remove(path: &Path) -> Result<bool, StateError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(source) if source.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StateError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn matches_patched(&self, hash: u64) -> bool {
        self.patched_descriptor_hash == format_hash(hash)
    }

    pub fn matches_pristine(&self, hash: u64) -> bool {
        self.pristine_descriptor_hash == format_hash(hash)
    }
}

fn format_hash(hash: u64) -> String {
    format!("{hash:016x}")
}

/// How the state record relates to the current descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordCheck {
    /// No record on disk
    Missing,
    /// Descriptor hash equals the recorded post-apply snapshot
    Matches,
    /// Descriptor was modified after the last apply
    Drifted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPresence {
    pub path: PathBuf,
    pub present: bool,
    /// Whether apply creates this path on the current tree
    pub required: bool,
}

impl AssetPresence {
    fn check(path: PathBuf, required: bool) -> Self {
        let present = path.exists();
        Self {
            path,
            present,
            required,
        }
    }
}

/// Read-only snapshot of a tree's adaptation state.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub state: TreeState,
    pub record: Option<StateRecord>,
    pub record_check: RecordCheck,
    pub assets: Vec<AssetPresence>,
}

impl StatusReport {
    /// True when marker, provisioned assets and state record agree.
    pub fn is_consistent(&self) -> bool {
        match self.state {
            TreeState::Patched => {
                self.record_check != RecordCheck::Drifted
                    && self
                        .assets
                        .iter()
                        .all(|asset| asset.present || !asset.required)
            }
            TreeState::Unpatched => {
                self.record_check == RecordCheck::Missing
                    && self.assets.iter().all(|asset| !asset.present)
            }
        }
    }

    /// Required assets that are absent.
    pub fn missing_assets(&self) -> impl Iterator<Item = &Path> {
        self.assets
            .iter()
            .filter(|asset| asset.required && !asset.present)
            .map(|asset| asset.path.as_path())
    }

    pub fn present_assets(&self) -> impl Iterator<Item = &Path> {
        self.assets
            .iter()
            .filter(|asset| asset.present)
            .map(|asset| asset.path.as_path())
    }
}

/// Inspect a tree without modifying it.
pub fn inspect(tree: &TargetTree, config: &HookConfig) -> Result<StatusReport, StateError> {
    let descriptor = tree.join(&config.meta.descriptor);
    let state = detect_state(&descriptor, &config.meta.marker)?;
    let hash = descriptor_hash(&descriptor)?;

    let record = StateRecord::load(&tree.join(&config.meta.state_file))?;
    let record_check = match &record {
        None => RecordCheck::Missing,
        Some(record) if record.matches_patched(hash) => RecordCheck::Matches,
        Some(_) => RecordCheck::Drifted,
    };

    let mut assets: Vec<AssetPresence> = config
        .staging
        .files
        .iter()
        .map(|file| AssetPresence::check(tree.join(&file.dest), true))
        .collect();

    // The samples destination only exists when some module had samples to copy
    if let Some(samples) = &config.samples {
        let sources = sample_sources(tree, samples).map_err(|source| StateError::Io {
            path: tree.root().to_path_buf(),
            source,
        })?;
        let required = sources.iter().any(|source| source.excluded.is_none());
        assets.push(AssetPresence::check(tree.join(&samples.dest_dir), required));
    }

    Ok(StatusReport {
        state,
        record,
        record_check,
        assets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Platform;

    #[test]
    fn test_marker_present_is_patched() {
        let temp_dir = tempfile::tempdir().unwrap();
        let descriptor = temp_dir.path().join("CMakeLists.txt");
        fs::write(&descriptor, "project(Poco)\nif(BIICODE)\nendif()\n").unwrap();

        assert_eq!(
            detect_state(&descriptor, "if(BIICODE)").unwrap(),
            TreeState::Patched
        );
    }

    #[test]
    fn test_marker_absent_is_unpatched() {
        let temp_dir = tempfile::tempdir().unwrap();
        let descriptor = temp_dir.path().join("CMakeLists.txt");
        fs::write(&descriptor, "project(Poco)\n# COMMENT REPLACED BY BIICODE\n").unwrap();

        assert_eq!(
            detect_state(&descriptor, "if(BIICODE)").unwrap(),
            TreeState::Unpatched
        );
    }

    #[test]
    fn test_missing_descriptor() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = detect_state(&temp_dir.path().join("CMakeLists.txt"), "if(BIICODE)");
        assert!(matches!(result, Err(StateError::MissingDescriptor(_))));
    }

    #[test]
    fn test_record_save_load_remove() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join(".tree-patcher.json");
        let config = crate::config::builtin().unwrap();
        let tree = TargetTree::new(temp_dir.path(), Platform::Linux);

        assert_eq!(StateRecord::load(&path).unwrap(), None);

        let record = StateRecord::new(&config, &tree, 1, 0xabc);
        record.save(&path).unwrap();

        let loaded = StateRecord::load(&path).unwrap().expect("record");
        assert_eq!(loaded, record);
        assert!(loaded.matches_pristine(1));
        assert!(loaded.matches_patched(0xabc));
        assert_eq!(loaded.patched_descriptor_hash, "0000000000000abc");

        assert!(StateRecord::remove(&path).unwrap());
        assert!(!StateRecord::remove(&path).unwrap());
    }

    #[test]
    fn test_corrupt_record() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join(".tree-patcher.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            StateRecord::load(&path),
            Err(StateError::Record { .. })
        ));
    }

    #[test]
    fn test_inspect_unpatched_tree_is_consistent() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(
            temp_dir.path().join("CMakeLists.txt"),
            "# COMMENT REPLACED BY BIICODE\n",
        )
        .unwrap();
        let config = crate::config::builtin().unwrap();
        let tree = TargetTree::new(temp_dir.path(), Platform::Linux);

        let report = inspect(&tree, &config).unwrap();
        assert_eq!(report.state, TreeState::Unpatched);
        assert_eq!(report.record_check, RecordCheck::Missing);
        assert!(report.is_consistent());
    }

    #[test]
    fn test_inspect_marker_without_assets_is_inconsistent() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("CMakeLists.txt"), "if(BIICODE)\nendif()\n").unwrap();
        let config = crate::config::builtin().unwrap();
        let tree = TargetTree::new(temp_dir.path(), Platform::Linux);

        let report = inspect(&tree, &config).unwrap();
        assert_eq!(report.state, TreeState::Patched);
        assert!(!report.is_consistent());
        assert!(report.missing_assets().count() > 0);
    }

    #[test]
    fn test_samples_dir_required_only_with_eligible_samples() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("CMakeLists.txt"), "if(BIICODE)\nendif()\n").unwrap();
        fs::write(root.join("biicode.conf"), "[mains]\n").unwrap();
        fs::write(root.join("ignore.bii"), "\n").unwrap();
        fs::create_dir_all(root.join("Foundation/src")).unwrap();
        fs::write(root.join("Foundation/src/pocomsg.h"), "\n").unwrap();
        // Denylisted samples are never copied
        fs::create_dir_all(root.join("CppUnit/samples")).unwrap();
        let config = crate::config::builtin().unwrap();
        let tree = TargetTree::new(root, Platform::Linux);

        let report = inspect(&tree, &config).unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.missing_assets().count(), 0);

        fs::create_dir_all(root.join("Zip/samples/zip")).unwrap();
        let report = inspect(&tree, &config).unwrap();
        assert!(!report.is_consistent());
        assert_eq!(
            report.missing_assets().collect::<Vec<_>>(),
            vec![tree.join("examples").as_path()]
        );
    }
}
