//! Attribute comparison between observed and desired objects

use crate::definition::TypeDefinition;
use crate::planner::{ExecutionPlan, PlanEntry};
use crate::types::{AttrChange, AttrValue, AttributeDiff, ObjectNode, PlanAction};
use std::collections::BTreeMap;

/// Attributes that take part in comparison
///
/// Relationship attributes are left out: a changed owner or membership is a
/// change of the synthesized relationship node, not of the declaring object.
pub fn comparable_attributes<'a>(
    definition: &'a TypeDefinition,
    node: &'a ObjectNode,
) -> impl Iterator<Item = (&'a String, &'a AttrValue)> {
    node.attributes
        .iter()
        .filter(|(key, _)| !definition.is_relationship_attribute(key))
}

/// Per-attribute changes turning `from` into `to`; empty when they match
pub fn diff_attributes(
    definition: &TypeDefinition,
    from: &ObjectNode,
    to: &ObjectNode,
) -> AttributeDiff {
    let before: BTreeMap<_, _> = comparable_attributes(definition, from).collect();
    let after: BTreeMap<_, _> = comparable_attributes(definition, to).collect();

    before
        .keys()
        .chain(after.keys())
        .filter(|key| before.get(*key) != after.get(*key))
        .map(|key| {
            (
                (*key).clone(),
                AttrChange {
                    from: before.get(*key).map(|v| (*v).clone()),
                    to: after.get(*key).map(|v| (*v).clone()),
                },
            )
        })
        .collect()
}

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// Objects to create
    pub creates: usize,
    /// Objects to drop
    pub drops: usize,
    /// Objects to update in place
    pub updates: usize,
    /// Objects already matching
    pub unchanged: usize,
}

impl DiffSummary {
    pub fn from_plan(plan: &ExecutionPlan) -> Self {
        let mut summary = Self::default();
        for entry in plan.entries() {
            match entry.action {
                PlanAction::Create => summary.creates += 1,
                PlanAction::Drop => summary.drops += 1,
                PlanAction::Update(_) => summary.updates += 1,
                PlanAction::NoOp => summary.unchanged += 1,
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.creates + self.drops + self.updates
    }

    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Group changed entries by object type, keeping plan order within a type
pub fn group_by_type(plan: &ExecutionPlan) -> BTreeMap<&str, Vec<&PlanEntry>> {
    let mut groups: BTreeMap<&str, Vec<&PlanEntry>> = BTreeMap::new();
    for entry in plan.changes() {
        groups
            .entry(entry.identity().object_type.as_str())
            .or_default()
            .push(entry);
    }
    groups
}
