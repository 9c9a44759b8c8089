//! Tree Patcher: reversible source-tree adaptation
//!
//! Adapts the POCO C++ source tree so the biicode toolchain can consume it,
//! and undoes the adaptation exactly on request. The build descriptor
//! (`CMakeLists.txt`) carries a marker that tells whether the tree is
//! currently patched; apply and revert are both idempotent.
//!
//! # Architecture
//!
//! A [`HookConfig`] describes the transformations. [`Plan`] turns it into an
//! ordered list of [`Step`]s, each with a forward (apply) and an inverse
//! (revert) action:
//!
//! 1. include-prefix passes (platform-conditional regex rewrites)
//! 2. literal token swaps, one file each
//! 3. provisioning of staged config files, sample copies and the mains block
//!
//! [`engine::run`] classifies the tree, runs the steps in the requested
//! direction and returns a [`RunReport`] with one outcome per file touched.
//!
//! # Safety
//!
//! - Per-file rewrites are atomic (tempfile + fsync + rename)
//! - Writes and deletes are confined to the tree root
//! - Staged sources are checked before the first modification
//! - A failed run is rolled back step by step
//!
//! # Example
//!
//! ```no_run
//! use tree_patcher::{engine, Mode, Plan, Platform, TargetTree};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let plan = Plan::new(tree_patcher::config::builtin()?);
//! let tree = TargetTree::new("/path/to/poco", Platform::current());
//!
//! let report = engine::run(&tree, &plan, Mode::Apply);
//! println!("{}", report.outcome);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod edit;
pub mod engine;
pub mod logging;
pub mod plan;
pub mod provision;
pub mod report;
pub mod rewrite;
pub mod safety;
pub mod state;
pub mod tree;

// Re-exports
pub use config::{builtin, load_from_path, load_from_str, ConfigError, HookConfig};
pub use edit::{EditError, EditResult};
pub use engine::{run, EngineError, Rollback, RunOutcome, RunReport};
pub use plan::{Plan, Step, StepError};
pub use provision::{ProvisionError, Provisioner};
pub use report::{ItemOutcome, ItemStatus, StepReport};
pub use safety::{SafetyError, TreeGuard};
pub use state::{detect_state, inspect, StateError, StateRecord, StatusReport, TreeState};
pub use tree::{Mode, ModeError, Platform, TargetTree};
