use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tree_patcher::engine::{self, RunOutcome, RunReport};
use tree_patcher::state::RecordCheck;
use tree_patcher::{
    config, logging, ItemStatus, Mode, Plan, Platform, Rollback, StatusReport, TargetTree,
    TreeState,
};

#[derive(Parser)]
#[command(name = "tree-patcher")]
#[command(
    about = "Apply or revert the biicode adaptation of a POCO source tree",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct TreeArgs {
    /// Tree root (the block folder); --fallback-root is used when it does not exist
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Root used when --root does not exist (the project folder)
    #[arg(long)]
    fallback_root: Option<PathBuf>,

    /// Platform to adapt for (defaults to the running OS)
    #[arg(long)]
    platform: Option<Platform>,

    /// Hook descriptor TOML (defaults to the built-in POCO descriptor)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply the adaptation (no-op if already applied)
    Apply {
        #[command(flatten)]
        tree: TreeArgs,

        /// Show unified diff of rewritten files
        #[arg(short, long)]
        diff: bool,
    },

    /// Revert the adaptation (no-op if already reverted)
    Revert {
        #[command(flatten)]
        tree: TreeArgs,

        /// Show unified diff of rewritten files
        #[arg(short, long)]
        diff: bool,
    },

    /// Report marker, state record and provisioned assets without changing anything
    Status {
        #[command(flatten)]
        tree: TreeArgs,
    },

    /// Host build hook: mode comes from BII_POCO_REVERT_CHANGES, never fails the build
    Hook {
        #[command(flatten)]
        tree: TreeArgs,

        /// Revert flag: true/1/yes/on reverts; false/0/no/off, empty or unset applies
        /// (case-insensitive). Any other value is reported and changes nothing
        #[arg(long, env = "BII_POCO_REVERT_CHANGES")]
        revert_changes: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match cli.command {
        Commands::Apply { tree, diff } => cmd_run(&tree, Mode::Apply, diff),

        Commands::Revert { tree, diff } => cmd_run(&tree, Mode::Revert, diff),

        Commands::Status { tree } => cmd_status(&tree),

        Commands::Hook {
            tree,
            revert_changes,
        } => {
            cmd_hook(&tree, revert_changes.as_deref());
            Ok(())
        }
    }
}

/// Resolve the target tree.
///
/// Priority order:
/// 1. --root, when it exists
/// 2. --fallback-root
/// 3. current directory
fn resolve_tree(args: &TreeArgs) -> Result<TargetTree> {
    let platform = args.platform.clone().unwrap_or_else(Platform::current);

    let candidate = match (&args.root, &args.fallback_root) {
        (Some(root), Some(fallback)) => {
            TargetTree::resolve(root, fallback, platform.clone())
                .root()
                .to_path_buf()
        }
        (Some(root), None) => root.clone(),
        (None, Some(fallback)) => fallback.clone(),
        (None, None) => env::current_dir().context("cannot determine current directory")?,
    };

    let root = candidate
        .canonicalize()
        .with_context(|| format!("tree root does not exist: {}", candidate.display()))?;

    Ok(TargetTree::new(root, platform))
}

fn load_plan(args: &TreeArgs) -> Result<Plan> {
    let config = match &args.config {
        Some(path) => config::load_from_path(path)?,
        None => config::builtin()?,
    };
    Ok(Plan::new(config))
}

/// Read every file the plan may rewrite, for diff output.
fn snapshot(plan: &Plan, tree: &TargetTree) -> HashMap<PathBuf, String> {
    plan.text_targets(tree)
        .into_iter()
        .filter_map(|path| {
            let content = fs::read_to_string(&path).ok()?;
            Some((path, content))
        })
        .collect()
}

/// Show unified diff between original and modified content
fn display_diff(file: &Path, original: &str, modified: &str) {
    println!(
        "\n{}",
        format!("--- {} (before)", file.display()).dimmed()
    );
    println!("{}", format!("+++ {} (after)", file.display()).dimmed());

    let diff = TextDiff::from_lines(original, modified);

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => format!("-{}", change).red(),
            ChangeTag::Insert => format!("+{}", change).green(),
            ChangeTag::Equal => continue,
        };
        print!("{}", sign);
    }
}

fn print_report(report: &RunReport) {
    for step in &report.steps {
        if let Some(reason) = &step.skipped {
            println!("{} {}: Skipped ({})", "⊘".cyan(), step.id, reason);
            continue;
        }

        println!("{} {}", "▸".bold(), step.id);
        for item in &step.items {
            let symbol = match &item.status {
                ItemStatus::Rewritten | ItemStatus::Copied | ItemStatus::Removed => {
                    "✓".green()
                }
                ItemStatus::Unchanged | ItemStatus::AlreadyAbsent => "⊙".yellow(),
                ItemStatus::Skipped { .. } => "⊘".cyan(),
            };
            println!("  {} {}: {}", symbol, item.path.display(), item.status);
        }
    }

    if !report.rollback_steps.is_empty() {
        println!();
        println!("{}", "Rollback:".yellow().bold());
        for step in &report.rollback_steps {
            println!("  {} {} ({} changed)", "↺".yellow(), step.id, step.changed());
        }
    }
}

fn cmd_run(args: &TreeArgs, mode: Mode, show_diff: bool) -> Result<()> {
    // 1. Resolve tree and plan
    let tree = resolve_tree(args)?;
    let plan = load_plan(args)?;

    println!("Root: {}", tree.root().display());
    println!("Platform: {}", tree.platform());
    println!("Mode: {}", mode);
    println!();

    // 2. Capture text contents before running (for diff output)
    let before = if show_diff {
        snapshot(&plan, &tree)
    } else {
        HashMap::new()
    };

    // 3. Run
    let report = engine::run(&tree, &plan, mode);
    print_report(&report);

    if show_diff {
        for item in report.items() {
            if item.status != ItemStatus::Rewritten {
                continue;
            }
            if let (Some(original), Ok(modified)) =
                (before.get(&item.path), fs::read_to_string(&item.path))
            {
                display_diff(&item.path, original, &modified);
            }
        }
    }

    // 4. Summary
    let mut changed = 0;
    let mut unchanged = 0;
    let mut skipped = 0;
    for item in report.items() {
        match item.status {
            ItemStatus::Skipped { .. } => skipped += 1,
            ref status if status.is_change() => changed += 1,
            _ => unchanged += 1,
        }
    }

    println!();
    println!("{}", "Summary:".bold());
    println!("  {} changed", format!("{}", changed).green());
    println!("  {} unchanged", format!("{}", unchanged).yellow());
    println!("  {} skipped", format!("{}", skipped).cyan());

    match &report.outcome {
        RunOutcome::Failed { error, rollback } => {
            eprintln!("{} {}", "✗".red(), error);
            if let Rollback::Incomplete(problems) = rollback {
                eprintln!("  {}", "Rollback incomplete:".red());
                for problem in problems {
                    eprintln!("    - {}", problem);
                }
            }
            std::process::exit(1);
        }
        outcome => {
            println!("{} {}", "✓".green(), outcome);
            if report.descriptor_restored == Some(false) {
                println!(
                    "  {}",
                    "Warning: descriptor differs from its pre-apply snapshot".yellow()
                );
            }
        }
    }

    Ok(())
}

fn print_status(status: &StatusReport) {
    let state = match status.state {
        TreeState::Patched => "PATCHED".green().bold(),
        TreeState::Unpatched => "UNPATCHED".yellow().bold(),
    };
    println!("State: {}", state);

    match (&status.record, status.record_check) {
        (Some(record), check) => {
            let check = match check {
                RecordCheck::Matches => "matches descriptor".green(),
                RecordCheck::Drifted => "descriptor changed since apply".red(),
                RecordCheck::Missing => "missing".dimmed(),
            };
            println!(
                "Record: {} on {} by {} ({})",
                record.config_name, record.platform, record.tool_version, check
            );
        }
        (None, _) => println!("Record: {}", "none".dimmed()),
    }

    println!();
    println!("{}", "Provisioned assets:".bold());
    for asset in &status.assets {
        if asset.present {
            println!("  {} {}", "✓".green(), asset.path.display());
        } else if asset.required {
            println!("  {} {}", "✗".red(), asset.path.display());
        } else {
            println!(
                "  {} {} {}",
                "⊙".yellow(),
                asset.path.display(),
                "(nothing to provision)".dimmed()
            );
        }
    }
}

fn cmd_status(args: &TreeArgs) -> Result<()> {
    let tree = resolve_tree(args)?;
    let plan = load_plan(args)?;

    println!("{}", "Tree Status Report".bold());
    println!("Root: {}", tree.root().display());
    println!();

    let status = engine::status(&tree, plan.config())?;
    print_status(&status);

    println!();
    if status.is_consistent() {
        println!("{} {}", "✓".green(), "consistent".green());
        Ok(())
    } else {
        eprintln!(
            "{} {}",
            "✗".red(),
            "INCONSISTENT: marker and provisioned assets disagree".red()
        );
        std::process::exit(1);
    }
}

/// Host hook entry point. Every outcome is reported as text; never fails.
fn cmd_hook(args: &TreeArgs, revert_flag: Option<&str>) {
    let result = (|| -> Result<RunReport> {
        let mode = Mode::from_revert_flag(revert_flag)?;
        let tree = resolve_tree(args)?;
        let plan = load_plan(args)?;
        Ok(engine::run(&tree, &plan, mode))
    })();

    match result {
        Ok(report) => match &report.outcome {
            RunOutcome::Applied => println!("Hook: applying changes"),
            RunOutcome::AlreadyPatched => println!("Hook: changes just applied"),
            RunOutcome::Reverted => println!("Hook: reverting changes"),
            RunOutcome::AlreadyUnpatched => println!("Hook: changes just reverted"),
            RunOutcome::Failed { .. } => println!("Exception: {}", report.outcome),
        },
        Err(e) => println!("Exception: {e:#}"),
    }
}
