//! Per-item results collected by every pass.

use crate::edit::{EditError, EditResult};
use crate::tree::Mode;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// What happened to a single file or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    Rewritten,
    Unchanged,
    Copied,
    Removed,
    AlreadyAbsent,
    Skipped { reason: String },
}

impl ItemStatus {
    /// True if the item changed the tree.
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            ItemStatus::Rewritten | ItemStatus::Copied | ItemStatus::Removed
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Rewritten => write!(f, "rewritten"),
            ItemStatus::Unchanged => write!(f, "unchanged"),
            ItemStatus::Copied => write!(f, "copied"),
            ItemStatus::Removed => write!(f, "removed"),
            ItemStatus::AlreadyAbsent => write!(f, "already absent"),
            ItemStatus::Skipped { reason } => write!(f, "skipped ({reason})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub path: PathBuf,
    pub status: ItemStatus,
}

impl ItemOutcome {
    pub fn new(path: impl Into<PathBuf>, status: ItemStatus) -> Self {
        Self {
            path: path.into(),
            status,
        }
    }

    pub fn skipped(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        let outcome = Self::new(
            path,
            ItemStatus::Skipped {
                reason: reason.into(),
            },
        );
        debug!(path = %outcome.path.display(), status = %outcome.status, "item skipped");
        outcome
    }

    /// Fold the result of a best-effort file rewrite into an outcome.
    ///
    /// Missing files are expected (optional modules) and only logged at debug;
    /// any other failure is logged as a warning.
    pub fn from_edit(path: &Path, result: Result<EditResult, EditError>) -> Self {
        match result {
            Ok(EditResult::Rewritten { bytes_written, .. }) => {
                debug!(path = %path.display(), bytes_written, "rewritten");
                Self::new(path, ItemStatus::Rewritten)
            }
            Ok(EditResult::Unchanged { .. }) => Self::new(path, ItemStatus::Unchanged),
            Err(e) if e.is_not_found() => Self::skipped(path, "file not found"),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "rewrite skipped");
                Self::new(
                    path,
                    ItemStatus::Skipped {
                        reason: e.to_string(),
                    },
                )
            }
        }
    }
}

/// Outcomes of one step of a plan, in one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub id: String,
    pub mode: Mode,
    /// Set when the whole step did not apply to this run
    pub skipped: Option<String>,
    pub items: Vec<ItemOutcome>,
}

impl StepReport {
    pub fn new(id: impl Into<String>, mode: Mode, items: Vec<ItemOutcome>) -> Self {
        Self {
            id: id.into(),
            mode,
            skipped: None,
            items,
        }
    }

    pub fn skipped(id: impl Into<String>, mode: Mode, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mode,
            skipped: Some(reason.into()),
            items: Vec::new(),
        }
    }

    pub fn changed(&self) -> usize {
        self.items
            .iter()
            .filter(|item| item.status.is_change())
            .count()
    }
}
