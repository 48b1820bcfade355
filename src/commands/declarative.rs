//! Declarative commands
//!
//! - `plan` - preview what apply would change
//! - `apply` - render the plan into a psql script and record the new state
//! - `inspect` - every object in dependency order

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use reconcile::{ObjectIdentity, ObjectNode, ObservedState, Reconciliation, TypeRegistry};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::Context;
use crate::cli::{ApplyArgs, PlanArgs, SourceArgs};
use crate::config::Document;
use crate::engine::{self, Applied, ApplyOptions};
use crate::state::{Snapshot, SnapshotProvider};
use crate::target::{self, ScriptTarget};
use crate::{paths, pg, ui};

/// Everything one command run works on
struct Loaded {
    document: Document,
    registry: TypeRegistry,
    snapshot: PathBuf,
    run: Reconciliation,
}

fn load(ctx: &Context, source: &SourceArgs) -> Result<Loaded> {
    let objects = paths::objects_file(source.objects.as_deref())?;
    let snapshot = paths::snapshot_file(source.state.as_deref())?;

    if !ctx.quiet {
        ui::kv("Objects", &objects.display().to_string());
        ui::kv("Snapshot", &snapshot.display().to_string());
    }

    let document = Document::load(&objects)?;
    let registry = pg::registry(&document.cluster);
    let catalog = document
        .catalog(&registry)
        .with_context(|| format!("Invalid objects file: {}", objects.display()))?;

    let provider = SnapshotProvider::new(&snapshot);
    log::debug!("Observing cluster state from {}", provider.path().display());
    let run = reconcile::reconcile(&catalog, &provider, &registry)
        .with_context(|| format!("Failed to plan {}", objects.display()))?;

    Ok(Loaded {
        document,
        registry,
        snapshot,
        run,
    })
}

// ============================================================================
// Plan Command
// ============================================================================

pub fn plan(ctx: &Context, args: &PlanArgs) -> Result<()> {
    ui::header("Permission Plan");

    let loaded = load(ctx, &args.source)?;
    engine::display_plan(&loaded.run.plan);

    if args.fingerprint {
        println!();
        ui::kv("Fingerprint", &loaded.run.plan.fingerprint());
    }

    Ok(())
}

// ============================================================================
// Apply Command
// ============================================================================

pub fn apply(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    ui::header("Applying Permissions");

    let loaded = load(ctx, &args.source)?;
    engine::display_plan(&loaded.run.plan);

    let target = Arc::new(ScriptTarget::new(
        loaded.document.cluster.clone(),
        loaded.registry.clone(),
        &loaded.run.observed,
    ));
    let executors = target::executors(&target);
    let opts = ApplyOptions {
        dry_run: args.dry_run,
        jobs: args.jobs,
        yes: args.yes,
        quiet: ctx.quiet,
    };

    match engine::execute(&loaded.run.plan, &executors, &opts)? {
        Applied::UpToDate | Applied::Aborted => Ok(()),
        Applied::DryRun(summary) => {
            log::debug!("Dry run skipped {} changes", summary.skipped);
            Ok(())
        }
        Applied::Finished(summary) => {
            log::info!("Rendered {} changes", summary.total_changes());
            persist(&target, &loaded, args)?;
            println!();
            ui::success("Apply complete!");
            Ok(())
        }
        Applied::Failed { summary, error } => {
            // Keep what was rendered before the failure
            log::info!("Rendered {} changes before the failure", summary.total_changes());
            persist(&target, &loaded, args)?;
            Err(anyhow::Error::new(error).context("Apply stopped before the plan completed"))
        }
    }
}

/// Write the script and, unless disabled, the updated snapshot
fn persist(target: &ScriptTarget, loaded: &Loaded, args: &ApplyArgs) -> Result<()> {
    let script = match &args.script {
        Some(path) => paths::expand(&path.to_string_lossy()),
        None => paths::default_script_file()?,
    };
    write_script(target, &script)?;
    println!();
    ui::kv("Script", &script.display().to_string());
    ui::dim(&format!("Run it with: psql -f {}", script.display()));

    if args.no_save {
        ui::warn("Snapshot not updated (--no-save)");
        return Ok(());
    }

    Snapshot::capture(&target.objects(), &loaded.registry).save(&loaded.snapshot)?;
    ui::kv("Snapshot", &loaded.snapshot.display().to_string());
    Ok(())
}

fn write_script(target: &ScriptTarget, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }
    fs::write(path, target.script())
        .with_context(|| format!("Failed to write script: {}", path.display()))?;
    log::info!("Wrote {} statements to {}", target.emitted().len(), path.display());
    Ok(())
}

// ============================================================================
// Inspect Command
// ============================================================================

pub fn inspect(ctx: &Context, args: &SourceArgs) -> Result<()> {
    ui::header("Objects in Dependency Order");

    let loaded = load(ctx, args)?;
    let run = &loaded.run;
    println!();

    for (index, identity) in run.order.iter().enumerate() {
        let Some(node) = run.desired.node(identity) else {
            continue;
        };
        println!(
            "  {:02} {:<50} {}",
            index + 1,
            identity.to_string(),
            markers(node, &run.observed).join(" ").dimmed()
        );
        if ctx.verbose > 0 {
            let dependencies: Vec<String> = run
                .desired
                .dependencies(identity)
                .map(ToString::to_string)
                .collect();
            if !dependencies.is_empty() {
                ui::dim(&format!("     depends on {}", dependencies.join(", ")));
            }
        }
    }

    let leftovers = observed_only(run);
    if !leftovers.is_empty() {
        println!();
        println!("  {}", "Observed but not declared".bold());
        for identity in leftovers {
            println!("     {} {}", "-".red(), identity);
        }
    }

    Ok(())
}

/// Status markers of a desired node
fn markers(node: &ObjectNode, observed: &ObservedState) -> Vec<&'static str> {
    let mut markers = vec![if node.managed { "managed" } else { "reference" }];
    if node.explicit {
        markers.push("declared");
    }
    markers.push(if observed.contains(&node.identity) {
        "observed"
    } else {
        "missing"
    });
    markers
}

/// Observed nodes the desired state no longer contains
fn observed_only(run: &Reconciliation) -> Vec<&ObjectIdentity> {
    run.observed
        .graph()
        .nodes()
        .filter(|n| n.managed && !run.desired.contains(&n.identity))
        .map(|n| &n.identity)
        .collect()
}
