//! Execution engine - applies a plan through per-type executors
//!
//! Sequential by default. With more than one job, independent entries run on
//! a bounded rayon pool: each entry waits on a pending-dependency counter,
//! all counters live under one lock, and the first failure stops anything
//! not yet started.

use crate::context::{Executors, ObjectExecutor, ProgressCallback};
use crate::error::{Error, Result, Stage};
use crate::planner::{ExecutionPlan, PlanEntry};
use crate::types::{ApplyResult, ExecuteOptions, ExecuteSummary, PlanAction};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Execute a plan with the given options and progress callback
///
/// Fail-fast: the first executor error stops execution and is returned as
/// [`Error::Execution`]. Everything applied before it stays applied.
pub fn execute<P: ProgressCallback>(
    plan: &ExecutionPlan,
    executors: &Executors,
    opts: &ExecuteOptions,
    progress: &mut P,
) -> Result<ExecuteSummary> {
    let mut summary = ExecuteSummary::default();
    let mut resolved: BTreeMap<usize, Arc<dyn ObjectExecutor>> = BTreeMap::new();

    for (index, entry) in plan.entries().iter().enumerate() {
        if entry.is_change() {
            let executor = executors.get(&entry.identity().object_type)?;
            resolved.insert(index, Arc::clone(executor));
        } else {
            summary.add_result(&ApplyResult::NoChange);
        }
    }

    progress.on_start(resolved.len());

    if opts.dry_run {
        for index in resolved.keys() {
            let entry = &plan.entries()[*index];
            let result = ApplyResult::Skipped {
                reason: "dry run".into(),
            };
            progress.on_entry_start(entry);
            progress.on_entry_complete(entry, &result);
            summary.add_result(&result);
        }
        progress.on_finish(&summary);
        return Ok(summary);
    }

    let outcome = if opts.jobs <= 1 || resolved.len() <= 1 {
        execute_sequential(plan, &resolved, progress, &mut summary)
    } else {
        execute_parallel(plan, &resolved, opts.jobs, progress, &mut summary)
    };

    progress.on_finish(&summary);
    outcome.map(|()| summary)
}

fn execute_sequential<P: ProgressCallback>(
    plan: &ExecutionPlan,
    resolved: &BTreeMap<usize, Arc<dyn ObjectExecutor>>,
    progress: &mut P,
    summary: &mut ExecuteSummary,
) -> Result<()> {
    for (index, executor) in resolved {
        let entry = &plan.entries()[*index];
        progress.on_entry_start(entry);
        match apply_entry(entry, executor.as_ref()) {
            Ok(result) => {
                progress.on_entry_complete(entry, &result);
                summary.add_result(&result);
            }
            Err(e) => {
                let result = ApplyResult::Failed {
                    error: e.to_string(),
                };
                progress.on_entry_complete(entry, &result);
                summary.add_result(&result);
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Scheduling state shared by all workers, guarded by one mutex
struct Schedule {
    pending: BTreeMap<usize, usize>,
    results: Vec<(usize, ApplyResult)>,
    error: Option<Error>,
}

struct Shared<'a> {
    plan: &'a ExecutionPlan,
    resolved: &'a BTreeMap<usize, Arc<dyn ObjectExecutor>>,
    dependants: BTreeMap<usize, Vec<usize>>,
    state: Mutex<Schedule>,
    cancelled: AtomicBool,
}

/// Execute independent entries in parallel using rayon
fn execute_parallel<P: ProgressCallback>(
    plan: &ExecutionPlan,
    resolved: &BTreeMap<usize, Arc<dyn ObjectExecutor>>,
    jobs: usize,
    progress: &mut P,
    summary: &mut ExecuteSummary,
) -> Result<()> {
    let mut pending = BTreeMap::new();
    let mut dependants: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for index in resolved.keys() {
        let dependencies = plan.dependencies(*index);
        pending.insert(*index, dependencies.len());
        for dependency in dependencies {
            dependants.entry(*dependency).or_default().push(*index);
        }
    }
    let roots: Vec<usize> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(index, _)| *index)
        .collect();

    let shared = Shared {
        plan,
        resolved,
        dependants,
        state: Mutex::new(Schedule {
            pending,
            results: Vec::new(),
            error: None,
        }),
        cancelled: AtomicBool::new(false),
    };

    let pool = rayon::ThreadPoolBuilder::new().num_threads(jobs).build()?;
    log::debug!("Applying {} changes with {jobs} workers", resolved.len());

    pool.scope(|scope| {
        for index in roots {
            let shared = &shared;
            scope.spawn(move |scope| run(shared, index, scope));
        }
    });

    let Schedule {
        mut results,
        error,
        ..
    } = shared
        .state
        .into_inner()
        .unwrap_or_else(std::sync::PoisonError::into_inner);

    // Progress callbacks are not thread-safe, report in plan order afterwards
    results.sort_by_key(|(index, _)| *index);
    for (index, result) in &results {
        let entry = &plan.entries()[*index];
        progress.on_entry_start(entry);
        progress.on_entry_complete(entry, result);
        summary.add_result(result);
    }

    error.map_or(Ok(()), Err)
}

fn run<'s>(shared: &'s Shared<'s>, index: usize, scope: &rayon::Scope<'s>) {
    if shared.cancelled.load(Ordering::SeqCst) {
        return;
    }
    let Some(executor) = shared.resolved.get(&index) else {
        return;
    };
    let entry = &shared.plan.entries()[index];
    let outcome = apply_entry(entry, executor.as_ref());

    let mut ready = Vec::new();
    {
        let mut state = lock(&shared.state);
        match outcome {
            Ok(result) => {
                state.results.push((index, result));
                for dependant in shared.dependants.get(&index).into_iter().flatten() {
                    if let Some(count) = state.pending.get_mut(dependant) {
                        *count -= 1;
                        if *count == 0 {
                            ready.push(*dependant);
                        }
                    }
                }
            }
            Err(e) => {
                shared.cancelled.store(true, Ordering::SeqCst);
                state.results.push((
                    index,
                    ApplyResult::Failed {
                        error: e.to_string(),
                    },
                ));
                if state.error.is_none() {
                    state.error = Some(e);
                }
            }
        }
    }

    for next in ready {
        scope.spawn(move |scope| run(shared, next, scope));
    }
}

/// Lock the schedule, recovering from poison (a panicked worker must not
/// hide the results of the others)
fn lock<'a>(state: &'a Mutex<Schedule>) -> MutexGuard<'a, Schedule> {
    state
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Apply one entry, gated on the object's current existence
fn apply_entry(entry: &PlanEntry, executor: &dyn ObjectExecutor) -> Result<ApplyResult> {
    let node = &entry.node;
    let fail = |stage: Stage| {
        move |source: anyhow::Error| Error::Execution {
            identity: node.identity.clone(),
            action: entry.action.name(),
            stage,
            source,
        }
    };

    let result = match &entry.action {
        PlanAction::NoOp => ApplyResult::NoChange,
        PlanAction::Create => {
            if executor.exists(node).map_err(fail(Stage::Exists))? {
                ApplyResult::Skipped {
                    reason: "already present".into(),
                }
            } else {
                executor.create(node).map_err(fail(Stage::Create))?;
                ApplyResult::Created
            }
        }
        PlanAction::Drop => {
            if executor.exists(node).map_err(fail(Stage::Exists))? {
                executor.remove(node).map_err(fail(Stage::Drop))?;
                ApplyResult::Removed
            } else {
                ApplyResult::Skipped {
                    reason: "already absent".into(),
                }
            }
        }
        PlanAction::Update(diff) => {
            let present = executor.exists(node).map_err(fail(Stage::Exists))?;
            match (&entry.replaces, present) {
                (Some(_), true) => ApplyResult::Skipped {
                    reason: "already up to date".into(),
                },
                (None, false) => {
                    log::warn!("{} vanished before update, creating it", node.identity);
                    executor.create(node).map_err(fail(Stage::Create))?;
                    ApplyResult::Created
                }
                _ => {
                    executor.update(node, diff).map_err(fail(Stage::Update))?;
                    ApplyResult::Modified
                }
            }
        }
    };

    log::debug!("{entry}: {result:?}");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoProgress;
    use crate::graph::DependencyGraph;
    use crate::observed::ObservedState;
    use crate::planner::plan;
    use crate::synthesize::synthesize;
    use crate::testing::{Recorder, catalog, id, registry};
    use crate::types::ObjectNode;

    /// Progress callback that records the order of completions
    #[derive(Default)]
    struct Trace {
        total: Option<usize>,
        completed: Vec<String>,
        finished: bool,
    }

    impl ProgressCallback for Trace {
        fn on_start(&mut self, total: usize) {
            self.total = Some(total);
        }
        fn on_entry_start(&mut self, _entry: &PlanEntry) {}
        fn on_entry_complete(&mut self, entry: &PlanEntry, result: &ApplyResult) {
            self.completed.push(format!("{entry} {result:?}"));
        }
        fn on_finish(&mut self, _summary: &ExecuteSummary) {
            self.finished = true;
        }
    }

    fn creation_plan(nodes: Vec<ObjectNode>) -> ExecutionPlan {
        let registry = registry();
        let catalog = catalog(&registry, nodes);
        let implicit = synthesize(&catalog, &registry).unwrap();
        let desired = DependencyGraph::build(&catalog, implicit, &registry).unwrap();
        plan(&desired, &ObservedState::empty(), &registry).unwrap()
    }

    fn user_and_database() -> ExecutionPlan {
        creation_plan(vec![
            ObjectNode::entity("User", "u"),
            ObjectNode::entity("Database", "d").with_attr("owner", "u"),
        ])
    }

    fn jobs(jobs: usize) -> ExecuteOptions {
        ExecuteOptions {
            jobs,
            ..ExecuteOptions::default()
        }
    }

    #[test]
    fn applies_entries_in_plan_order() {
        let recorder = Recorder::new();
        let summary = execute(
            &user_and_database(),
            &recorder.executors(),
            &ExecuteOptions::default(),
            &mut NoProgress,
        )
        .unwrap();

        assert_eq!(
            recorder.changes(),
            [
                "create User:u",
                "create Database:d",
                "create DatabaseOwner:d+u"
            ]
        );
        assert_eq!(summary.created, 3);
        assert!(summary.is_success());
    }

    #[test]
    fn no_op_plan_makes_no_executor_calls() {
        let registry = registry();
        let nodes = || {
            vec![
                ObjectNode::entity("User", "u"),
                ObjectNode::entity("Database", "d").with_attr("owner", "u"),
            ]
        };
        let catalog = catalog(&registry, nodes());
        let implicit = synthesize(&catalog, &registry).unwrap();
        let desired = DependencyGraph::build(&catalog, implicit.clone(), &registry).unwrap();
        let observed =
            ObservedState::from_nodes(catalog.iter().cloned().chain(implicit), &registry).unwrap();
        let plan = plan(&desired, &observed, &registry).unwrap();

        let recorder = Recorder::new();
        let mut trace = Trace::default();
        let summary = execute(&plan, &recorder.executors(), &jobs(4), &mut trace).unwrap();

        assert!(recorder.calls().is_empty());
        assert_eq!(summary.total_changes(), 0);
        assert_eq!(summary.no_change, 3);
        assert_eq!(trace.total, Some(0));
        assert!(trace.finished);
    }

    #[test]
    fn existing_objects_are_skipped() {
        let recorder = Recorder::with_present(&[id("User", "u")]);
        let summary = execute(
            &user_and_database(),
            &recorder.executors(),
            &ExecuteOptions::default(),
            &mut NoProgress,
        )
        .unwrap();

        assert_eq!(
            recorder.changes(),
            ["create Database:d", "create DatabaseOwner:d+u"]
        );
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.created, 2);
    }

    #[test]
    fn failure_stops_execution() {
        let recorder = Recorder::failing_on(id("Database", "d"));
        let mut trace = Trace::default();
        let err = execute(
            &user_and_database(),
            &recorder.executors(),
            &ExecuteOptions::default(),
            &mut trace,
        )
        .unwrap_err();

        match &err {
            Error::Execution {
                identity,
                action,
                stage,
                ..
            } => {
                assert_eq!(identity, &id("Database", "d"));
                assert_eq!(*action, "create");
                assert_eq!(*stage, Stage::Create);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(recorder.changes(), ["create User:u", "create Database:d"]);
        assert!(recorder.is_present(&id("User", "u")));
        assert!(!recorder.is_present(&id("DatabaseOwner", "d+u")));
        assert!(trace.finished);
        assert!(trace.completed.last().unwrap().contains("Failed"));
    }

    #[test]
    fn dry_run_calls_nothing() {
        let recorder = Recorder::new();
        let opts = ExecuteOptions {
            dry_run: true,
            ..ExecuteOptions::default()
        };
        let summary = execute(
            &user_and_database(),
            &recorder.executors(),
            &opts,
            &mut NoProgress,
        )
        .unwrap();

        assert!(recorder.calls().is_empty());
        assert_eq!(summary.skipped, 3);
    }

    #[test]
    fn missing_executor_fails_before_any_call() {
        let recorder = Recorder::new();
        let executors = crate::context::Executors::new().with("User", recorder.clone());
        let err = execute(
            &user_and_database(),
            &executors,
            &ExecuteOptions::default(),
            &mut NoProgress,
        )
        .unwrap_err();

        assert!(matches!(err, Error::MissingExecutor(t) if t == "Database"));
        assert!(recorder.calls().is_empty());
    }

    #[test]
    fn parallel_execution_respects_dependencies() {
        let plan = creation_plan(vec![
            ObjectNode::entity("Group", "ops"),
            ObjectNode::entity("User", "a").with_attr("groups", ["ops"]),
            ObjectNode::entity("User", "b").with_attr("groups", ["ops"]),
            ObjectNode::entity("Database", "d").with_attr("owner", "a"),
            ObjectNode::entity("Database", "e").with_attr("owner", "b"),
        ]);
        let recorder = Recorder::new();
        let mut trace = Trace::default();

        let summary = execute(&plan, &recorder.executors(), &jobs(4), &mut trace).unwrap();

        assert_eq!(summary.created, plan.changes().count());
        let changes = recorder.changes();
        let at = |call: &str| changes.iter().position(|c| c == call).unwrap();
        assert!(at("create Group:ops") < at("create User:a"));
        assert!(at("create User:a") < at("create Database:d"));
        assert!(at("create Database:d") < at("create DatabaseOwner:d+a"));
        assert!(at("create User:b") < at("create GroupUser:ops+b"));
        assert!(at("create Database:e") < at("create DatabaseOwner:e+b"));
        // Progress is reported in plan order regardless of completion order
        let expected: Vec<String> = plan
            .changes()
            .map(|e| format!("{e} {:?}", ApplyResult::Created))
            .collect();
        assert_eq!(trace.completed, expected);
    }

    #[test]
    fn parallel_failure_cancels_dependants() {
        let plan = creation_plan(vec![
            ObjectNode::entity("User", "u"),
            ObjectNode::entity("Database", "d").with_attr("owner", "u"),
            ObjectNode::entity("Group", "g"),
        ]);
        let recorder = Recorder::failing_on(id("User", "u"));

        let err = execute(&plan, &recorder.executors(), &jobs(2), &mut NoProgress).unwrap_err();

        assert!(matches!(err, Error::Execution { ref identity, .. } if identity == &id("User", "u")));
        let changes = recorder.changes();
        assert!(!changes.contains(&"create Database:d".to_string()));
        assert!(!changes.contains(&"create DatabaseOwner:d+u".to_string()));
    }

    #[test]
    fn slot_update_skips_drop_of_replaced_relationship() {
        let registry = registry();
        let users = || vec![ObjectNode::entity("User", "u"), ObjectNode::entity("User", "u2")];
        let desired_catalog = catalog(
            &registry,
            [
                users(),
                vec![ObjectNode::entity("Database", "d").with_attr("owner", "u2")],
            ]
            .concat(),
        );
        let implicit = synthesize(&desired_catalog, &registry).unwrap();
        let desired = DependencyGraph::build(&desired_catalog, implicit, &registry).unwrap();
        let observed = ObservedState::from_nodes(
            [
                users(),
                vec![
                    ObjectNode::entity("Database", "d").with_attr("owner", "u"),
                    ObjectNode::entity("DatabaseOwner", "d+u")
                        .with_attr("database", "d")
                        .with_attr("owner", "u"),
                ],
            ]
            .concat(),
            &registry,
        )
        .unwrap();
        let plan = plan(&desired, &observed, &registry).unwrap();

        // The recorder has the old ownership; its update adds the new one,
        // the drop of the old one still runs because it is still present
        let recorder = Recorder::with_present(&[id("DatabaseOwner", "d+u")]);
        let summary = execute(
            &plan,
            &recorder.executors(),
            &ExecuteOptions::default(),
            &mut NoProgress,
        )
        .unwrap();

        assert_eq!(
            recorder.changes(),
            ["update DatabaseOwner:d+u2", "drop DatabaseOwner:d+u"]
        );
        assert_eq!(summary.modified, 1);
        assert_eq!(summary.removed, 1);
    }
}
