//! Reconciliation planner - turns desired and observed graphs into an ordered plan
//!
//! The plan has three phases:
//! 1. drops of observed objects that must be replaced (a changed attribute that
//!    cannot be applied in place), together with everything that depends on
//!    them, in reverse observed order
//! 2. creates, updates and no-ops in forward desired order
//! 3. drops of objects no longer desired, in reverse observed order
//!
//! Relationship updates in phase 2 sever the edges that phase 3 drops would
//! otherwise violate, so the common case never needs phase 1.

use crate::definition::TypeRegistry;
use crate::diff::diff_attributes;
use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::observed::ObservedState;
use crate::sort::topological_order;
use crate::types::{ObjectIdentity, ObjectNode, PlanAction};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fmt::Write as _;

/// One step of an execution plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub action: PlanAction,
    /// Desired node for create/update/no-op, observed node for drop
    pub node: ObjectNode,
    /// Observed relationship this update takes over (same slot, new participant)
    pub replaces: Option<ObjectIdentity>,
}

impl PlanEntry {
    pub fn identity(&self) -> &ObjectIdentity {
        &self.node.identity
    }

    pub fn is_change(&self) -> bool {
        self.action.is_change()
    }
}

impl fmt::Display for PlanEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action.name(), self.identity())?;
        if let Some(replaces) = &self.replaces {
            write!(f, " (replaces {replaces})")?;
        }
        Ok(())
    }
}

/// Ordered plan, consumed once by the execution engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    entries: Vec<PlanEntry>,
    /// For each entry, the earlier change entries it must wait for
    dependencies: Vec<Vec<usize>>,
}

impl ExecutionPlan {
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    /// Indices of earlier entries that must complete before entry `index`
    pub fn dependencies(&self, index: usize) -> &[usize] {
        self.dependencies.get(index).map_or(&[], Vec::as_slice)
    }

    /// Entries that change something
    pub fn changes(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|e| e.is_change())
    }

    /// True when applying the plan would change nothing
    pub fn is_empty(&self) -> bool {
        self.changes().next().is_none()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Plain-text rendering of the changes, one per line
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in self.changes() {
            let _ = write!(out, "{entry}");
            if let PlanAction::Update(diff) = &entry.action {
                for (attribute, change) in diff {
                    let _ = write!(out, " {attribute}: {change};");
                }
            }
            out.push('\n');
        }
        out
    }

    /// Stable digest of the rendered plan
    pub fn fingerprint(&self) -> String {
        blake3::hash(self.render().as_bytes()).to_hex().to_string()
    }
}

/// Compute the plan converging `observed` onto `desired`
pub fn plan(
    desired: &DependencyGraph,
    observed: &ObservedState,
    registry: &TypeRegistry,
) -> Result<ExecutionPlan> {
    let current = observed.graph();
    let desired_order = topological_order(desired)?;
    let observed_order = topological_order(current)?;

    // Desired identities -> (action, replaced relationship)
    let mut actions: BTreeMap<ObjectIdentity, (PlanAction, Option<ObjectIdentity>)> =
        BTreeMap::new();
    // Observed identities dropped in phase 1
    let mut replaced: BTreeSet<ObjectIdentity> = BTreeSet::new();

    for identity in &desired_order {
        let Some(node) = desired.node(identity) else {
            continue;
        };
        let definition = registry.require(&identity.object_type)?;

        let action = if !node.managed {
            PlanAction::NoOp
        } else if definition.is_protected(&identity.name) {
            log::warn!("{identity} is protected, leaving it as it is");
            PlanAction::NoOp
        } else {
            match current.node(identity) {
                None => PlanAction::Create,
                Some(existing) => {
                    let diff = diff_attributes(definition, existing, node);
                    if diff.is_empty() {
                        PlanAction::NoOp
                    } else if definition.updatable {
                        PlanAction::Update(diff)
                    } else {
                        log::info!("{identity} cannot be altered in place, replacing it");
                        replaced.insert(identity.clone());
                        PlanAction::Create
                    }
                }
            }
        };
        actions.insert(identity.clone(), (action, None));
    }

    match_slots(desired, current, registry, &mut actions)?;
    expand_replacements(current, registry, &mut actions, &mut replaced);

    let mut entries = Vec::new();

    for identity in observed_order.iter().rev() {
        if replaced.contains(identity)
            && let Some(node) = current.node(identity)
        {
            entries.push(PlanEntry {
                action: PlanAction::Drop,
                node: node.clone(),
                replaces: None,
            });
        }
    }

    for identity in &desired_order {
        if let (Some(node), Some((action, replaces))) =
            (desired.node(identity), actions.remove(identity))
        {
            entries.push(PlanEntry {
                action,
                node: node.clone(),
                replaces,
            });
        }
    }

    for identity in observed_order.iter().rev() {
        if desired.contains(identity) || replaced.contains(identity) {
            continue;
        }
        let Some(node) = current.node(identity) else {
            continue;
        };
        if !node.managed {
            continue;
        }
        if registry.is_protected(identity) {
            log::warn!("{identity} is not declared but protected, leaving it in place");
            continue;
        }
        entries.push(PlanEntry {
            action: PlanAction::Drop,
            node: node.clone(),
            replaces: None,
        });
    }

    let dependencies = link(&entries, desired, current);
    let plan = ExecutionPlan {
        entries,
        dependencies,
    };
    log::debug!(
        "Planned {} entries, {} changes",
        plan.len(),
        plan.changes().count()
    );
    Ok(plan)
}

/// Turn "create new relationship + drop old one in the same slot" into an
/// in-place update of the slot, followed later by the drop of the old node
fn match_slots(
    desired: &DependencyGraph,
    current: &DependencyGraph,
    registry: &TypeRegistry,
    actions: &mut BTreeMap<ObjectIdentity, (PlanAction, Option<ObjectIdentity>)>,
) -> Result<()> {
    let mut taken: BTreeSet<ObjectIdentity> = BTreeSet::new();

    for (identity, (action, replaces)) in actions.iter_mut() {
        if *action != PlanAction::Create || current.contains(identity) {
            continue;
        }
        let definition = registry.require(&identity.object_type)?;
        let (Some(slot), Some(node)) = (definition.slot_attribute, desired.node(identity)) else {
            continue;
        };
        let Some(value) = node.attr(slot) else {
            continue;
        };

        let previous = current.nodes().find(|candidate| {
            candidate.identity.object_type == identity.object_type
                && candidate.managed
                && candidate.attr(slot) == Some(value)
                && !desired.contains(&candidate.identity)
                && !taken.contains(&candidate.identity)
        });
        if let Some(previous) = previous {
            log::debug!("{identity} takes over slot of {}", previous.identity);
            *action = PlanAction::Update(diff_attributes(definition, previous, node));
            *replaces = Some(previous.identity.clone());
            taken.insert(previous.identity.clone());
        }
    }
    Ok(())
}

/// Grow the replacement set with every observed dependant of a replaced node
fn expand_replacements(
    current: &DependencyGraph,
    registry: &TypeRegistry,
    actions: &mut BTreeMap<ObjectIdentity, (PlanAction, Option<ObjectIdentity>)>,
    replaced: &mut BTreeSet<ObjectIdentity>,
) {
    let mut stack: Vec<ObjectIdentity> = replaced.iter().cloned().collect();

    while let Some(identity) = stack.pop() {
        for dependant in current.dependants(&identity) {
            if replaced.contains(dependant) {
                continue;
            }
            let managed = current.node(dependant).is_some_and(|n| n.managed);
            if !managed || registry.is_protected(dependant) {
                log::warn!("{dependant} depends on replaced {identity} but is not managed");
                continue;
            }
            replaced.insert(dependant.clone());
            stack.push(dependant.clone());
        }
    }

    // Anything still desired among the dropped nodes comes back as a create,
    // and a slot update whose old node is already gone becomes a plain create
    for (identity, (action, replaces)) in actions.iter_mut() {
        let old_dropped = replaces.as_ref().is_some_and(|r| replaced.contains(r));
        if replaced.contains(identity) || old_dropped {
            *action = PlanAction::Create;
            *replaces = None;
        }
    }
}

/// For each change entry, the earlier change entries touching a neighbour
fn link(
    entries: &[PlanEntry],
    desired: &DependencyGraph,
    current: &DependencyGraph,
) -> Vec<Vec<usize>> {
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            if !entry.is_change() {
                return Vec::new();
            }
            entries[..i]
                .iter()
                .enumerate()
                .filter(|(_, earlier)| {
                    earlier.is_change() && conflicts(entry, earlier, desired, current)
                })
                .map(|(j, _)| j)
                .collect()
        })
        .collect()
}

fn conflicts(
    a: &PlanEntry,
    b: &PlanEntry,
    desired: &DependencyGraph,
    current: &DependencyGraph,
) -> bool {
    let (x, y) = (a.identity(), b.identity());
    x == y
        || a.replaces.as_ref() == Some(y)
        || b.replaces.as_ref() == Some(x)
        || adjacent(desired, x, y)
        || adjacent(current, x, y)
}

fn adjacent(graph: &DependencyGraph, x: &ObjectIdentity, y: &ObjectIdentity) -> bool {
    graph.dependencies(x).any(|d| d == y) || graph.dependencies(y).any(|d| d == x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ObjectCatalog;
    use crate::synthesize::{Resolution, synthesize, synthesize_with};
    use crate::testing::{catalog, id, registry};

    fn desired_graph(registry: &TypeRegistry, nodes: Vec<ObjectNode>) -> DependencyGraph {
        let catalog = catalog(registry, nodes);
        let implicit = synthesize(&catalog, registry).unwrap();
        DependencyGraph::build(&catalog, implicit, registry).unwrap()
    }

    /// Observed state shaped like a snapshot: entities plus re-synthesized relationships
    fn observed(registry: &TypeRegistry, nodes: Vec<ObjectNode>) -> ObservedState {
        let mut catalog = ObjectCatalog::new();
        for node in nodes {
            catalog.insert(registry, node).unwrap();
        }
        let implicit = synthesize_with(&catalog, registry, Resolution::Lenient).unwrap();
        ObservedState::from_nodes(catalog.iter().cloned().chain(implicit), registry).unwrap()
    }

    fn steps(plan: &ExecutionPlan) -> Vec<String> {
        plan.changes().map(ToString::to_string).collect()
    }

    fn database(owner: &str) -> ObjectNode {
        ObjectNode::entity("Database", "d").with_attr("owner", owner)
    }

    #[test]
    fn initial_creation_follows_dependencies() {
        let registry = registry();
        let desired = desired_graph(&registry, vec![ObjectNode::entity("User", "u"), database("u")]);

        let plan = plan(&desired, &ObservedState::empty(), &registry).unwrap();

        assert_eq!(
            steps(&plan),
            ["create User:u", "create Database:d", "create DatabaseOwner:d+u"]
        );
    }

    #[test]
    fn owner_reassignment_updates_relationship_only() {
        let registry = registry();
        let users = || vec![ObjectNode::entity("User", "u"), ObjectNode::entity("User", "u2")];
        let desired = desired_graph(&registry, [users(), vec![database("u2")]].concat());
        let observed = observed(&registry, [users(), vec![database("u")]].concat());

        let plan = plan(&desired, &observed, &registry).unwrap();

        assert_eq!(
            steps(&plan),
            [
                "update DatabaseOwner:d+u2 (replaces DatabaseOwner:d+u)",
                "drop DatabaseOwner:d+u",
            ]
        );
        let update = &plan.changes().next().unwrap().action;
        match update {
            PlanAction::Update(diff) => {
                assert_eq!(diff.len(), 1);
                assert_eq!(diff["owner"].to_string(), "u -> u2");
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert!(
            plan.changes().all(|e| e.identity() != &id("Database", "d")),
            "database itself is never dropped or recreated"
        );
    }

    #[test]
    fn user_removal_drops_user_last() {
        let registry = registry();
        let desired = desired_graph(
            &registry,
            vec![ObjectNode::entity("User", "u2"), database("u2")],
        );
        let observed = observed(
            &registry,
            vec![
                ObjectNode::entity("User", "u"),
                ObjectNode::entity("User", "u2"),
                database("u"),
            ],
        );

        let plan = plan(&desired, &observed, &registry).unwrap();

        assert_eq!(
            steps(&plan),
            [
                "update DatabaseOwner:d+u2 (replaces DatabaseOwner:d+u)",
                "drop DatabaseOwner:d+u",
                "drop User:u",
            ]
        );
        let touching_u: Vec<String> = plan
            .changes()
            .filter(|e| e.identity().name.split('+').any(|part| part == "u"))
            .map(ToString::to_string)
            .collect();
        assert_eq!(touching_u.last().map(String::as_str), Some("drop User:u"));
    }

    #[test]
    fn identical_states_plan_nothing() {
        let registry = registry();
        let nodes = || {
            vec![
                ObjectNode::entity("Group", "ops"),
                ObjectNode::entity("User", "u").with_attr("groups", ["ops"]),
                database("u"),
            ]
        };
        let desired = desired_graph(&registry, nodes());
        let observed = observed(&registry, nodes());

        let plan = plan(&desired, &observed, &registry).unwrap();

        assert!(plan.is_empty());
        assert_eq!(plan.len(), desired.len());
        assert!(plan.entries().iter().all(|e| e.action == PlanAction::NoOp));
        assert_eq!(plan.render(), "");
    }

    #[test]
    fn updatable_attribute_change_is_in_place() {
        let registry = registry();
        let desired = desired_graph(
            &registry,
            vec![ObjectNode::entity("User", "u").with_attr("password", "new")],
        );
        let observed = observed(
            &registry,
            vec![ObjectNode::entity("User", "u").with_attr("password", "old")],
        );

        let plan = plan(&desired, &observed, &registry).unwrap();

        assert_eq!(steps(&plan), ["update User:u"]);
        assert!(plan.render().contains("password: old -> new"));
    }

    #[test]
    fn non_updatable_change_replaces_node_and_dependants() {
        let registry = registry();
        let desired = desired_graph(
            &registry,
            vec![
                ObjectNode::entity("User", "u"),
                database("u").with_attr("encoding", "UTF8"),
            ],
        );
        let observed = observed(
            &registry,
            vec![
                ObjectNode::entity("User", "u"),
                database("u").with_attr("encoding", "LATIN1"),
            ],
        );

        let plan = plan(&desired, &observed, &registry).unwrap();

        assert_eq!(
            steps(&plan),
            [
                "drop DatabaseOwner:d+u",
                "drop Database:d",
                "create Database:d",
                "create DatabaseOwner:d+u",
            ]
        );
    }

    #[test]
    fn membership_change_only_touches_relationship() {
        let registry = registry();
        let groups = || vec![ObjectNode::entity("Group", "a"), ObjectNode::entity("Group", "b")];
        let desired = desired_graph(
            &registry,
            [groups(), vec![ObjectNode::entity("User", "u").with_attr("groups", ["b"])]].concat(),
        );
        let observed = observed(
            &registry,
            [groups(), vec![ObjectNode::entity("User", "u").with_attr("groups", ["a"])]].concat(),
        );

        let plan = plan(&desired, &observed, &registry).unwrap();

        assert_eq!(steps(&plan), ["create GroupUser:b+u", "drop GroupUser:a+u"]);
    }

    #[test]
    fn protected_and_reference_only_nodes_are_left_alone() {
        let registry = registry();
        let desired = desired_graph(
            &registry,
            vec![ObjectNode::entity("Group", "public").reference_only()],
        );
        let observed = observed(
            &registry,
            vec![
                ObjectNode::entity("User", "postgres"),
                ObjectNode::entity("User", "pg_monitor"),
            ],
        );

        let plan = plan(&desired, &observed, &registry).unwrap();

        assert!(plan.is_empty(), "unexpected changes: {:?}", steps(&plan));
    }

    #[test]
    fn dependencies_link_neighbouring_changes() {
        let registry = registry();
        let desired = desired_graph(
            &registry,
            vec![
                ObjectNode::entity("User", "a"),
                ObjectNode::entity("User", "u"),
                database("u"),
            ],
        );

        let plan = plan(&desired, &ObservedState::empty(), &registry).unwrap();
        let index = |name: &str| {
            plan.entries()
                .iter()
                .position(|e| e.identity().to_string() == name)
                .unwrap()
        };

        assert!(plan.dependencies(index("User:a")).is_empty());
        assert_eq!(plan.dependencies(index("Database:d")), [index("User:u")]);
        assert_eq!(
            plan.dependencies(index("DatabaseOwner:d+u")),
            [index("User:u"), index("Database:d")]
        );
    }

    #[test]
    fn fingerprint_is_stable_across_runs() {
        let registry = registry();
        let build = || {
            let desired =
                desired_graph(&registry, vec![ObjectNode::entity("User", "u"), database("u")]);
            plan(&desired, &ObservedState::empty(), &registry).unwrap()
        };
        let (first, second) = (build(), build());
        assert_eq!(first, second);
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(first.fingerprint().len(), 64);
    }
}
