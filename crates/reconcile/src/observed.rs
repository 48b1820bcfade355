//! Snapshot of what currently exists in the target system

use crate::definition::TypeRegistry;
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::types::{ObjectIdentity, ObjectNode};

/// Observed state, in the same node shape as the desired graph
///
/// Read-only to the planner. Built leniently: observed objects may reference
/// objects that are not part of the snapshot.
#[derive(Debug, Clone, Default)]
pub struct ObservedState {
    graph: DependencyGraph,
}

impl ObservedState {
    /// Nothing exists yet
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_nodes(
        nodes: impl IntoIterator<Item = ObjectNode>,
        registry: &TypeRegistry,
    ) -> Result<Self> {
        Ok(Self {
            graph: DependencyGraph::build_lenient(nodes, registry)?,
        })
    }

    pub fn from_graph(graph: DependencyGraph) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn node(&self, identity: &ObjectIdentity) -> Option<&ObjectNode> {
        self.graph.node(identity)
    }

    pub fn contains(&self, identity: &ObjectIdentity) -> bool {
        self.graph.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }
}
