//! Synthesize, build, sort, observe and plan in one call

use crate::catalog::ObjectCatalog;
use crate::context::ObservedStateProvider;
use crate::definition::TypeRegistry;
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::observed::ObservedState;
use crate::planner::{ExecutionPlan, plan};
use crate::sort::topological_order;
use crate::synthesize::synthesize;
use crate::types::ObjectIdentity;

/// Everything one reconciliation run produces before execution
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub desired: DependencyGraph,
    /// Creation order of the desired graph
    pub order: Vec<ObjectIdentity>,
    pub observed: ObservedState,
    pub plan: ExecutionPlan,
}

/// Build the desired graph from `catalog` and plan it against a fresh snapshot
///
/// Construction errors are returned before the provider is asked for anything.
pub fn reconcile(
    catalog: &ObjectCatalog,
    provider: &dyn ObservedStateProvider,
    registry: &TypeRegistry,
) -> Result<Reconciliation> {
    let implicit = synthesize(catalog, registry)?;
    log::debug!(
        "Synthesized {} implicit objects from {} declared",
        implicit.len(),
        catalog.len()
    );
    let desired = DependencyGraph::build(catalog, implicit, registry)?;
    let order = topological_order(&desired)?;

    let observed = provider.observe(registry).map_err(Error::Observe)?;
    log::info!(
        "Observed {} objects, desired {}",
        observed.len(),
        desired.len()
    );

    let plan = plan(&desired, &observed, registry)?;
    Ok(Reconciliation {
        desired,
        order,
        observed,
        plan,
    })
}
