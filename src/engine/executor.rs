//! Plan execution with confirmation, progress bar and summary

use anyhow::Result;
use colored::Colorize;
use indicatif::ProgressBar;
use reconcile::{
    ApplyResult, ExecuteOptions, ExecuteSummary, ExecutionPlan, Executors, PlanEntry,
    ProgressCallback,
};

use crate::{progress, ui};

/// Options for `apply`
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Don't call any executor, just show what would happen
    pub dry_run: bool,
    /// Number of parallel jobs
    pub jobs: usize,
    /// Skip confirmation prompts
    pub yes: bool,
    /// Hide the progress bar
    pub quiet: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            jobs: 1,
            yes: false,
            quiet: false,
        }
    }
}

/// How an apply run ended
#[derive(Debug)]
pub enum Applied {
    /// Nothing to change
    UpToDate,
    /// The user declined the confirmation
    Aborted,
    DryRun(ExecuteSummary),
    Finished(ExecuteSummary),
    /// Stopped at the first failing entry; earlier entries stay applied
    Failed {
        summary: ExecuteSummary,
        error: reconcile::Error,
    },
}

/// Progress bar fed by the execution engine
struct BarProgress {
    pb: ProgressBar,
    summary: ExecuteSummary,
}

impl BarProgress {
    fn new(quiet: bool) -> Self {
        let pb = if quiet {
            progress::hidden()
        } else {
            progress::bar(0, "Applying")
        };
        Self {
            pb,
            summary: ExecuteSummary::default(),
        }
    }
}

impl ProgressCallback for BarProgress {
    fn on_start(&mut self, total: usize) {
        self.pb.set_length(total as u64);
    }

    fn on_entry_start(&mut self, entry: &PlanEntry) {
        self.pb.set_message(entry.to_string());
    }

    fn on_entry_complete(&mut self, entry: &PlanEntry, result: &ApplyResult) {
        if let ApplyResult::Failed { error } = result {
            self.pb.println(format!("    {} {}: {}", "✗".red(), entry, error));
        }
        self.pb
            .set_message(format!("{} {}", ui::result_symbol(result), entry.identity()));
        self.pb.inc(1);
    }

    fn on_finish(&mut self, summary: &ExecuteSummary) {
        self.pb.finish_and_clear();
        self.summary = summary.clone();
    }
}

/// Confirm, then execute `plan`
pub fn execute(
    plan: &ExecutionPlan,
    executors: &Executors,
    opts: &ApplyOptions,
) -> Result<Applied> {
    if plan.is_empty() {
        return Ok(Applied::UpToDate);
    }

    if !opts.yes && !opts.dry_run && !confirm_proceed()? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(Applied::Aborted);
    }

    let engine_opts = ExecuteOptions {
        dry_run: opts.dry_run,
        jobs: opts.jobs.max(1),
    };

    if opts.dry_run {
        let summary =
            reconcile::execute(plan, executors, &engine_opts, &mut reconcile::NoProgress)?;
        println!();
        println!("  {} Dry run - no changes made", "ℹ".blue());
        return Ok(Applied::DryRun(summary));
    }

    println!();
    println!(
        "  {} Applying {} changes with {} job(s)...",
        "→".cyan(),
        plan.changes().count(),
        engine_opts.jobs
    );

    let mut bar = BarProgress::new(opts.quiet);
    match reconcile::execute(plan, executors, &engine_opts, &mut bar) {
        Ok(summary) => {
            print_summary(&summary);
            Ok(Applied::Finished(summary))
        }
        // Raised before anything ran
        Err(error @ reconcile::Error::MissingExecutor(_)) => Err(error.into()),
        Err(error) => {
            print_summary(&bar.summary);
            Ok(Applied::Failed {
                summary: bar.summary,
                error,
            })
        }
    }
}

/// Confirm with user
fn confirm_proceed() -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt("Continue?")
        .default(true)
        .interact()?;

    Ok(confirmed)
}

/// Print final summary
fn print_summary(summary: &ExecuteSummary) {
    println!();
    if summary.is_success() {
        println!("  {} Plan applied successfully!", "✓".green().bold());
    } else {
        println!("  {} Plan stopped on an error", "⚠".yellow().bold());
    }

    if summary.created > 0 {
        println!("    • {} objects created", summary.created);
    }
    if summary.modified > 0 {
        println!("    • {} objects updated", summary.modified);
    }
    if summary.removed > 0 {
        println!("    • {} objects dropped", summary.removed);
    }
    if summary.skipped > 0 {
        println!("    • {} objects skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "objects".red());
    }
}
