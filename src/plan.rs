//! Ordered transformation steps.
//!
//! A [`Plan`] turns a [`HookConfig`] into the fixed step sequence both
//! directions run: include-prefix passes, then literal swaps, then
//! provisioning. Each step knows its forward and inverse action, so apply
//! and revert can never drift apart.

use crate::config::{HookConfig, IncludeRule, LiteralRule};
use crate::provision::{ProvisionError, Provisioner};
use crate::report::{ItemOutcome, StepReport};
use crate::rewrite::{list_file_names, list_files, rewrite_literal, IncludeRewriter};
use crate::safety::TreeGuard;
use crate::tree::{Mode, TargetTree};
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StepError {
    #[error("step '{id}': invalid include pattern: {source}")]
    Pattern { id: String, source: regex::Error },

    #[error("step '{id}': {source}")]
    Provision { id: String, source: ProvisionError },
}

/// Everything a step needs to touch the tree.
pub struct StepContext<'a> {
    pub tree: &'a TargetTree,
    pub config: &'a HookConfig,
    pub guard: &'a TreeGuard,
}

#[derive(Debug, Clone)]
pub enum Step {
    /// Platform-conditional include-prefix toggle over a file set
    Include(IncludeRule),
    /// Exact-token swap in one file
    Literal(LiteralRule),
    /// Staged files, samples and mains placeholder
    Provision,
}

pub const PROVISION_STEP_ID: &str = "provision";

impl Step {
    pub fn id(&self) -> &str {
        match self {
            Step::Include(rule) => &rule.id,
            Step::Literal(rule) => &rule.id,
            Step::Provision => PROVISION_STEP_ID,
        }
    }

    /// Run the step in `mode` (forward for apply, inverse for revert).
    pub fn run(&self, ctx: &StepContext<'_>, mode: Mode) -> Result<StepReport, StepError> {
        debug!(step = self.id(), %mode, "running step");
        match self {
            Step::Include(rule) => run_include(rule, ctx, mode),
            Step::Literal(rule) => Ok(run_literal(rule, ctx, mode)),
            Step::Provision => {
                let provisioner = Provisioner::new(ctx.tree, ctx.config, ctx.guard);
                let items = match mode {
                    Mode::Apply => provisioner.apply(),
                    Mode::Revert => provisioner.revert(),
                }
                .map_err(|source| StepError::Provision {
                    id: PROVISION_STEP_ID.to_string(),
                    source,
                })?;
                Ok(StepReport::new(PROVISION_STEP_ID, mode, items))
            }
        }
    }

    /// Text files this step may rewrite, for diff snapshots.
    pub fn text_targets(&self, tree: &TargetTree) -> Vec<PathBuf> {
        match self {
            Step::Include(rule) if rule.applies_to(tree.platform()) => rule
                .targets
                .iter()
                .flat_map(|dir| list_files(&tree.join(dir)).unwrap_or_default())
                .collect(),
            Step::Include(_) => Vec::new(),
            Step::Literal(rule) => vec![tree.join(&rule.file)],
            Step::Provision => Vec::new(),
        }
    }
}

fn run_include(
    rule: &IncludeRule,
    ctx: &StepContext<'_>,
    mode: Mode,
) -> Result<StepReport, StepError> {
    let platform = ctx.tree.platform();
    if !rule.applies_to(platform) {
        return Ok(StepReport::skipped(
            &rule.id,
            mode,
            format!("not applicable on {platform}"),
        ));
    }

    let header_dir = ctx.tree.join(&rule.header_dir);
    let headers = match list_file_names(&header_dir) {
        Ok(headers) => headers,
        Err(e) => {
            return Ok(StepReport::skipped(
                &rule.id,
                mode,
                format!("cannot list {}: {e}", header_dir.display()),
            ))
        }
    };

    let rewriter = IncludeRewriter::new(&rule.prefix, &headers).map_err(|source| {
        StepError::Pattern {
            id: rule.id.clone(),
            source,
        }
    })?;
    let Some(rewriter) = rewriter else {
        return Ok(StepReport::skipped(&rule.id, mode, "no headers to rewrite"));
    };

    let mut items = Vec::new();
    for target in &rule.targets {
        let dir = ctx.tree.join(target);
        match list_files(&dir) {
            Ok(files) => items.extend(rewriter.rewrite_files(&files, mode)),
            Err(e) => items.push(ItemOutcome::skipped(dir, e.to_string())),
        }
    }

    Ok(StepReport::new(&rule.id, mode, items))
}

fn run_literal(rule: &LiteralRule, ctx: &StepContext<'_>, mode: Mode) -> StepReport {
    let (token, replacement) = match mode {
        Mode::Apply => (&rule.original, &rule.patched),
        Mode::Revert => (&rule.patched, &rule.original),
    };

    let path = ctx.tree.join(&rule.file);
    let item = match ctx.guard.validate_path(&path) {
        Ok(path) => rewrite_literal(&path, token, replacement, rule.match_line_endings),
        Err(e) => ItemOutcome::skipped(path, e.to_string()),
    };

    StepReport::new(&rule.id, mode, vec![item])
}

/// The ordered step list for one descriptor.
#[derive(Debug, Clone)]
pub struct Plan {
    config: HookConfig,
    steps: Vec<Step>,
}

impl Plan {
    pub fn new(config: HookConfig) -> Self {
        let steps = config
            .include
            .iter()
            .cloned()
            .map(Step::Include)
            .chain(config.literal.iter().cloned().map(Step::Literal))
            .chain(std::iter::once(Step::Provision))
            .collect();

        Self { config, steps }
    }

    pub fn config(&self) -> &HookConfig {
        &self.config
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Every text file the plan may rewrite on `tree`.
    pub fn text_targets(&self, tree: &TargetTree) -> Vec<PathBuf> {
        self.steps
            .iter()
            .flat_map(|step| step.text_targets(tree))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ItemStatus;
    use crate::tree::Platform;
    use std::fs;

    #[test]
    fn test_builtin_plan_order() {
        let plan = Plan::new(crate::config::builtin().unwrap());
        let ids: Vec<&str> = plan.steps().iter().map(Step::id).collect();

        assert_eq!(
            ids,
            vec![
                "netssl-win-local-includes",
                "deflating-stream-zlib",
                "inflating-stream-zlib",
                "checksum-zlib",
                "zip-stream-zlib",
                "cmake-biicode-hook",
                "provision",
            ]
        );
    }

    #[test]
    fn test_include_step_skipped_off_platform() {
        let temp_dir = tempfile::tempdir().unwrap();
        let tree = TargetTree::new(temp_dir.path(), Platform::Linux);
        let config = crate::config::builtin().unwrap();
        let guard = TreeGuard::new(temp_dir.path()).unwrap();
        let ctx = StepContext {
            tree: &tree,
            config: &config,
            guard: &guard,
        };

        let step = Step::Include(config.include[0].clone());
        let report = step.run(&ctx, Mode::Apply).unwrap();
        assert!(report.skipped.is_some());
        assert!(report.items.is_empty());
    }

    #[test]
    fn test_include_step_rewrites_headers_and_sources_on_windows() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        let headers = root.join("NetSSL_Win/include/Poco/Net");
        let sources = root.join("NetSSL_Win/src");
        fs::create_dir_all(&headers).unwrap();
        fs::create_dir_all(&sources).unwrap();
        fs::write(
            headers.join("Context.h"),
            "#include \"Poco/Net/NetSSL.h\"\n",
        )
        .unwrap();
        fs::write(headers.join("NetSSL.h"), "#include \"Poco/Net/Net.h\"\n").unwrap();
        fs::write(
            sources.join("Context.cpp"),
            "#include \"Poco/Net/Context.h\"\n",
        )
        .unwrap();

        let tree = TargetTree::new(root, Platform::Windows);
        let config = crate::config::builtin().unwrap();
        let guard = TreeGuard::new(root).unwrap();
        let ctx = StepContext {
            tree: &tree,
            config: &config,
            guard: &guard,
        };
        let step = Step::Include(config.include[0].clone());

        let report = step.run(&ctx, Mode::Apply).unwrap();
        assert_eq!(report.changed(), 2);
        assert_eq!(
            fs::read_to_string(headers.join("Context.h")).unwrap(),
            "#include \"NetSSL.h\"\n"
        );
        // Net.h lives in another module and keeps its prefix
        assert_eq!(
            fs::read_to_string(headers.join("NetSSL.h")).unwrap(),
            "#include \"Poco/Net/Net.h\"\n"
        );
        assert_eq!(
            fs::read_to_string(sources.join("Context.cpp")).unwrap(),
            "#include \"Context.h\"\n"
        );

        let report = step.run(&ctx, Mode::Revert).unwrap();
        assert_eq!(report.changed(), 2);
        assert_eq!(
            fs::read_to_string(sources.join("Context.cpp")).unwrap(),
            "#include \"Poco/Net/Context.h\"\n"
        );
    }

    #[test]
    fn test_literal_step_directions() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        let target = root.join("Zip/src/ZipStream.cpp");
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, "#include \"Poco/zlib.h\"\n").unwrap();

        let tree = TargetTree::new(root, Platform::Linux);
        let config = crate::config::builtin().unwrap();
        let guard = TreeGuard::new(root).unwrap();
        let ctx = StepContext {
            tree: &tree,
            config: &config,
            guard: &guard,
        };
        let rule = config
            .literal
            .iter()
            .find(|rule| rule.id == "zip-stream-zlib")
            .unwrap()
            .clone();
        let step = Step::Literal(rule);

        let report = step.run(&ctx, Mode::Apply).unwrap();
        assert_eq!(report.items[0].status, ItemStatus::Rewritten);
        let report = step.run(&ctx, Mode::Apply).unwrap();
        assert_eq!(report.items[0].status, ItemStatus::Unchanged);
        let report = step.run(&ctx, Mode::Revert).unwrap();
        assert_eq!(report.items[0].status, ItemStatus::Rewritten);
        assert_eq!(
            fs::read_to_string(&target).unwrap(),
            "#include \"Poco/zlib.h\"\n"
        );
    }
}
