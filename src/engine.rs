//! Apply/revert orchestration.
//!
//! [`run`] classifies the tree, runs the plan in the requested direction and
//! folds everything that happened into one [`RunReport`]. It never panics and
//! never returns early with an error: failures end up in
//! [`RunOutcome::Failed`] together with the per-item results collected so far.

use crate::plan::{Plan, StepContext, StepError};
use crate::provision::{ProvisionError, Provisioner};
use crate::report::{ItemOutcome, StepReport};
use crate::safety::{SafetyError, TreeGuard};
use crate::state::{descriptor_hash, detect_state, StateError, StateRecord, TreeState};
use crate::tree::{Mode, TargetTree};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info, warn};

pub use crate::state::{inspect as status, StatusReport};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Step(#[from] StepError),

    #[error(transparent)]
    Safety(#[from] SafetyError),

    #[error("{mode} finished but the tree is still {state}")]
    Incomplete { mode: Mode, state: TreeState },
}

impl EngineError {
    /// The build descriptor is absent: the tree is not a valid target.
    pub fn is_missing_descriptor(&self) -> bool {
        matches!(self, EngineError::State(StateError::MissingDescriptor(_)))
    }

    /// A staged configuration file is absent.
    pub fn is_missing_staging(&self) -> bool {
        matches!(
            self,
            EngineError::Provision(ProvisionError::MissingStaging(_))
                | EngineError::Step(StepError::Provision {
                    source: ProvisionError::MissingStaging(_),
                    ..
                })
        )
    }
}

/// What the engine did after a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rollback {
    /// Nothing had been modified
    NotNeeded,
    /// Every step that ran was undone
    Completed,
    /// Some undo steps failed; messages in run order
    Incomplete(Vec<String>),
}

#[derive(Debug)]
pub enum RunOutcome {
    AlreadyPatched,
    AlreadyUnpatched,
    Applied,
    Reverted,
    Failed {
        error: EngineError,
        rollback: Rollback,
    },
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::AlreadyPatched => write!(f, "changes already applied"),
            RunOutcome::AlreadyUnpatched => write!(f, "changes already reverted"),
            RunOutcome::Applied => write!(f, "changes applied"),
            RunOutcome::Reverted => write!(f, "changes reverted"),
            RunOutcome::Failed { error, rollback } => match rollback {
                Rollback::NotNeeded => write!(f, "failed: {error}"),
                Rollback::Completed => write!(f, "failed: {error} (rolled back)"),
                Rollback::Incomplete(_) => write!(f, "failed: {error} (rollback incomplete)"),
            },
        }
    }
}

/// Everything one invocation did.
#[derive(Debug)]
pub struct RunReport {
    pub mode: Mode,
    pub initial_state: Option<TreeState>,
    pub steps: Vec<StepReport>,
    /// Steps run in the opposite direction after a failure
    pub rollback_steps: Vec<StepReport>,
    /// After a revert: whether the descriptor matches the pre-apply snapshot
    /// (`None` when no state record was available)
    pub descriptor_restored: Option<bool>,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, RunOutcome::Failed { .. })
    }

    pub fn error(&self) -> Option<&EngineError> {
        match &self.outcome {
            RunOutcome::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Every item outcome of the forward run, in order.
    pub fn items(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.steps.iter().flat_map(|step| step.items.iter())
    }

    pub fn changed(&self) -> usize {
        self.steps.iter().map(StepReport::changed).sum()
    }
}

/// Apply or revert the plan on `tree`.
pub fn run(tree: &TargetTree, plan: &Plan, mode: Mode) -> RunReport {
    let mut report = RunReport {
        mode,
        initial_state: None,
        steps: Vec::new(),
        rollback_steps: Vec::new(),
        descriptor_restored: None,
        outcome: RunOutcome::Applied,
    };

    report.outcome = match execute(tree, plan, mode, &mut report) {
        Ok(outcome) => outcome,
        Err(failure) => {
            error!(error = %failure.error, "{mode} failed");
            RunOutcome::Failed {
                error: failure.error,
                rollback: failure.rollback,
            }
        }
    };

    report
}

struct Failure {
    error: EngineError,
    rollback: Rollback,
}

impl Failure {
    fn before_changes(error: impl Into<EngineError>) -> Self {
        Failure {
            error: error.into(),
            rollback: Rollback::NotNeeded,
        }
    }
}

impl From<StateError> for Failure {
    fn from(error: StateError) -> Self {
        Failure::before_changes(error)
    }
}

impl From<SafetyError> for Failure {
    fn from(error: SafetyError) -> Self {
        Failure::before_changes(error)
    }
}

impl From<ProvisionError> for Failure {
    fn from(error: ProvisionError) -> Self {
        Failure::before_changes(error)
    }
}

fn execute(
    tree: &TargetTree,
    plan: &Plan,
    mode: Mode,
    report: &mut RunReport,
) -> Result<RunOutcome, Failure> {
    let config = plan.config();
    let descriptor = tree.join(&config.meta.descriptor);

    let current = detect_state(&descriptor, &config.meta.marker)?;
    report.initial_state = Some(current);

    match (mode, current) {
        (Mode::Apply, TreeState::Patched) => {
            info!(root = %tree.root().display(), "changes already applied");
            return Ok(RunOutcome::AlreadyPatched);
        }
        (Mode::Revert, TreeState::Unpatched) => {
            info!(root = %tree.root().display(), "changes already reverted");
            return Ok(RunOutcome::AlreadyUnpatched);
        }
        (Mode::Apply, TreeState::Unpatched) => {
            info!(root = %tree.root().display(), platform = %tree.platform(), "applying changes");
        }
        (Mode::Revert, TreeState::Patched) => {
            info!(root = %tree.root().display(), platform = %tree.platform(), "reverting changes");
        }
    }

    let guard = TreeGuard::new(tree.root())?
        .protect(tree.join(&config.staging.dir))
        .protect(&descriptor);
    let ctx = StepContext {
        tree,
        config,
        guard: &guard,
    };

    let pristine_hash = match mode {
        Mode::Apply => {
            Provisioner::new(tree, config, &guard).preflight()?;
            Some(descriptor_hash(&descriptor)?)
        }
        Mode::Revert => None,
    };

    for (idx, step) in plan.steps().iter().enumerate() {
        match step.run(&ctx, mode) {
            Ok(step_report) => report.steps.push(step_report),
            Err(e) => {
                let error = EngineError::from(e);
                let rollback = roll_back(plan, &ctx, mode, idx, report);
                return Err(Failure { error, rollback });
            }
        }
    }

    // The marker is the state; a run that did not flip it is not done
    let target = match mode {
        Mode::Apply => TreeState::Patched,
        Mode::Revert => TreeState::Unpatched,
    };
    let reached = detect_state(&descriptor, &config.meta.marker)?;
    if reached != target {
        let rollback = roll_back(plan, &ctx, mode, plan.steps().len() - 1, report);
        return Err(Failure {
            error: EngineError::Incomplete {
                mode,
                state: reached,
            },
            rollback,
        });
    }

    let record_path = tree.join(&config.meta.state_file);
    match mode {
        Mode::Apply => {
            let patched_hash = descriptor_hash(&descriptor)?;
            let record = StateRecord::new(
                config,
                tree,
                pristine_hash.unwrap_or_default(),
                patched_hash,
            );
            if let Err(e) = record.save(&record_path) {
                warn!(error = %e, "state record not written");
            }
            info!(changed = report.changed(), "changes applied");
            Ok(RunOutcome::Applied)
        }
        Mode::Revert => {
            report.descriptor_restored = check_restored(&record_path, &descriptor);
            if let Err(e) = StateRecord::remove(&record_path) {
                warn!(error = %e, "state record not removed");
            }
            info!(changed = report.changed(), "changes reverted");
            Ok(RunOutcome::Reverted)
        }
    }
}

/// Compare the reverted descriptor with the snapshot taken before apply.
fn check_restored(record_path: &Path, descriptor: &Path) -> Option<bool> {
    let record = match StateRecord::load(record_path) {
        Ok(Some(record)) => record,
        Ok(None) => return None,
        Err(e) => {
            warn!(error = %e, "state record unreadable");
            return None;
        }
    };

    let hash = descriptor_hash(descriptor).ok()?;
    let restored = record.matches_pristine(hash);
    if !restored {
        warn!(
            descriptor = %descriptor.display(),
            "descriptor differs from its pre-apply snapshot"
        );
    }
    Some(restored)
}

/// Run steps `0..=failed` in the opposite direction, last first.
fn roll_back(
    plan: &Plan,
    ctx: &StepContext<'_>,
    mode: Mode,
    failed: usize,
    report: &mut RunReport,
) -> Rollback {
    let undo = mode.opposite();
    warn!(%undo, steps = failed + 1, "rolling back");

    let mut problems = Vec::new();
    for step in plan.steps()[..=failed].iter().rev() {
        match step.run(ctx, undo) {
            Ok(step_report) => report.rollback_steps.push(step_report),
            Err(e) => {
                error!(step = step.id(), error = %e, "rollback step failed");
                problems.push(e.to_string());
            }
        }
    }

    if problems.is_empty() {
        Rollback::Completed
    } else {
        Rollback::Incomplete(problems)
    }
}
