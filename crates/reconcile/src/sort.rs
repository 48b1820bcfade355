//! Deterministic topological ordering (Kahn's algorithm)
//!
//! Nodes become eligible once everything they depend on has been emitted.
//! Among eligible nodes the smallest identity (type tag, then name) goes
//! first, so identical graphs always produce identical orders.

use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::types::ObjectIdentity;
use std::collections::{BTreeMap, BTreeSet};

/// Creation order: every dependency precedes its dependants
pub fn topological_order(graph: &DependencyGraph) -> Result<Vec<ObjectIdentity>> {
    let mut pending: BTreeMap<&ObjectIdentity, usize> = graph
        .identities()
        .map(|id| (id, graph.dependencies(id).count()))
        .collect();
    let mut ready: BTreeSet<&ObjectIdentity> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(pending.len());

    while let Some(next) = ready.pop_first() {
        pending.remove(next);
        for dependant in graph.dependants(next) {
            if let Some(count) = pending.get_mut(dependant) {
                *count -= 1;
                if *count == 0 {
                    ready.insert(dependant);
                }
            }
        }
        order.push(next.clone());
    }

    if !pending.is_empty() {
        let remaining: Vec<ObjectIdentity> = pending.into_keys().cloned().collect();
        log::error!("Dependency cycle among {} objects", remaining.len());
        return Err(Error::CyclicDependency { remaining });
    }

    Ok(order)
}

/// Deletion order: every dependant precedes what it depends on
pub fn reverse_topological_order(graph: &DependencyGraph) -> Result<Vec<ObjectIdentity>> {
    let mut order = topological_order(graph)?;
    order.reverse();
    Ok(order)
}
