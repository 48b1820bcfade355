//! Dependency graph over explicit and implicit objects
//!
//! An edge `from -> to` means "from depends on to": `to` must exist before
//! `from` is created, and `from` must be gone before `to` is dropped.

use crate::catalog::ObjectCatalog;
use crate::definition::{TypeRegistry, resolve_target};
use crate::error::{Error, Result};
use crate::types::{ObjectIdentity, ObjectNode};
use std::collections::{BTreeMap, BTreeSet};

/// Directed graph of objects keyed by identity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    nodes: BTreeMap<ObjectIdentity, ObjectNode>,
    /// from -> {to}
    dependencies: BTreeMap<ObjectIdentity, BTreeSet<ObjectIdentity>>,
    /// to -> {from}
    dependants: BTreeMap<ObjectIdentity, BTreeSet<ObjectIdentity>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge explicit and implicit nodes and resolve every declared reference
    ///
    /// Fails with `DuplicateIdentity` when two nodes collide and with
    /// `UnknownIdentity` when a reference names nothing in the graph.
    pub fn build(
        catalog: &ObjectCatalog,
        implicit: Vec<ObjectNode>,
        registry: &TypeRegistry,
    ) -> Result<Self> {
        let mut graph = Self::new();
        for node in catalog.iter().cloned().chain(implicit) {
            graph.insert_node(node)?;
        }
        graph.link(registry, true)?;
        log::debug!(
            "Built dependency graph: {} nodes, {} edges",
            graph.len(),
            graph.edges().count()
        );
        Ok(graph)
    }

    /// Build a graph for observed state
    ///
    /// References to identities outside `nodes` are skipped instead of
    /// failing: observed objects may point at objects nobody manages.
    pub fn build_lenient(
        nodes: impl IntoIterator<Item = ObjectNode>,
        registry: &TypeRegistry,
    ) -> Result<Self> {
        let mut graph = Self::new();
        for node in nodes {
            graph.insert_node(node)?;
        }
        graph.link(registry, false)?;
        Ok(graph)
    }

    pub fn insert_node(&mut self, node: ObjectNode) -> Result<()> {
        if self.nodes.contains_key(&node.identity) {
            return Err(Error::DuplicateIdentity(node.identity));
        }
        self.nodes.insert(node.identity.clone(), node);
        Ok(())
    }

    /// Add an edge "from depends on to"; both endpoints must be present
    pub fn add_edge(&mut self, from: &ObjectIdentity, to: &ObjectIdentity) -> Result<()> {
        for endpoint in [to, from] {
            if !self.nodes.contains_key(endpoint) {
                return Err(Error::UnknownIdentity {
                    from: from.clone(),
                    target: endpoint.clone(),
                });
            }
        }
        self.dependencies
            .entry(from.clone())
            .or_default()
            .insert(to.clone());
        self.dependants
            .entry(to.clone())
            .or_default()
            .insert(from.clone());
        Ok(())
    }

    fn link(&mut self, registry: &TypeRegistry, strict: bool) -> Result<()> {
        let mut edges = Vec::new();

        for node in self.nodes.values() {
            let definition = registry.require(&node.identity.object_type)?;
            for reference in definition.references {
                for target_name in node.values(reference.attribute) {
                    match resolve_target(reference.targets, target_name, |id| self.contains(id)) {
                        Some(target) => edges.push((node.identity.clone(), target)),
                        None if strict => {
                            let target_type = reference
                                .targets
                                .first()
                                .copied()
                                .unwrap_or(reference.attribute);
                            return Err(Error::UnknownIdentity {
                                from: node.identity.clone(),
                                target: ObjectIdentity::new(target_type, target_name),
                            });
                        }
                        None => log::debug!(
                            "{} references unmanaged '{}' via '{}', no edge",
                            node.identity,
                            target_name,
                            reference.attribute
                        ),
                    }
                }
            }
        }

        for (from, to) in edges {
            self.add_edge(&from, &to)?;
        }
        Ok(())
    }

    pub fn node(&self, identity: &ObjectIdentity) -> Option<&ObjectNode> {
        self.nodes.get(identity)
    }

    pub fn contains(&self, identity: &ObjectIdentity) -> bool {
        self.nodes.contains_key(identity)
    }

    /// Nodes in identity order
    pub fn nodes(&self) -> impl Iterator<Item = &ObjectNode> {
        self.nodes.values()
    }

    pub fn identities(&self) -> impl Iterator<Item = &ObjectIdentity> {
        self.nodes.keys()
    }

    /// Identities `identity` depends on
    pub fn dependencies(&self, identity: &ObjectIdentity) -> impl Iterator<Item = &ObjectIdentity> {
        self.dependencies.get(identity).into_iter().flatten()
    }

    /// Identities that depend on `identity`
    pub fn dependants(&self, identity: &ObjectIdentity) -> impl Iterator<Item = &ObjectIdentity> {
        self.dependants.get(identity).into_iter().flatten()
    }

    /// All edges as (from, to), ordered
    pub fn edges(&self) -> impl Iterator<Item = (&ObjectIdentity, &ObjectIdentity)> {
        self.dependencies
            .iter()
            .flat_map(|(from, tos)| tos.iter().map(move |to| (from, to)))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesize::synthesize;
    use crate::testing::{catalog, id, registry};

    #[test]
    fn build_adds_reference_and_relationship_edges() {
        let registry = registry();
        let catalog = catalog(
            &registry,
            vec![
                ObjectNode::entity("User", "u"),
                ObjectNode::entity("Database", "d").with_attr("owner", "u"),
            ],
        );
        let implicit = synthesize(&catalog, &registry).unwrap();
        let graph = DependencyGraph::build(&catalog, implicit, &registry).unwrap();

        let edges: Vec<String> = graph
            .edges()
            .map(|(from, to)| format!("{from} -> {to}"))
            .collect();
        assert_eq!(
            edges,
            [
                "Database:d -> User:u",
                "DatabaseOwner:d+u -> Database:d",
                "DatabaseOwner:d+u -> User:u",
            ]
        );
        assert_eq!(
            graph.dependants(&id("User", "u")).count(),
            2,
            "database and ownership both depend on the user"
        );
    }

    #[test]
    fn build_rejects_unknown_reference() {
        let registry = registry();
        let catalog = catalog(
            &registry,
            vec![ObjectNode::entity("User", "u").with_attr("groups", ["missing"])],
        );
        // Skip synthesis so the builder sees the unresolved reference itself
        let err = DependencyGraph::build(&catalog, Vec::new(), &registry).unwrap_err();
        match err {
            Error::UnknownIdentity { from, target } => {
                assert_eq!(from, id("User", "u"));
                assert_eq!(target, id("Group", "missing"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn build_rejects_implicit_collision_with_explicit() {
        let registry = registry();
        let catalog = catalog(&registry, vec![ObjectNode::entity("User", "u")]);
        let err = DependencyGraph::build(
            &catalog,
            vec![ObjectNode::entity("User", "u")],
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, Error::DuplicateIdentity(i) if i == id("User", "u")));
    }

    #[test]
    fn lenient_build_skips_unmanaged_references() {
        let registry = registry();
        let graph = DependencyGraph::build_lenient(
            vec![ObjectNode::entity("Database", "d").with_attr("owner", "postgres")],
            &registry,
        )
        .unwrap();
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.edges().count(), 0);
    }

    #[test]
    fn add_edge_requires_both_endpoints() {
        let mut graph = DependencyGraph::new();
        graph.insert_node(ObjectNode::entity("User", "a")).unwrap();
        let err = graph
            .add_edge(&id("User", "a"), &id("User", "b"))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownIdentity { .. }));
    }
}
