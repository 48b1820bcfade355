//! Implicit relationship synthesis
//!
//! Relationships embedded as attributes (a database's owner, a user's groups)
//! become nodes of their own. Synthesis is a pure function of the catalog:
//! the same catalog always yields the same implicit nodes, which keeps their
//! identities stable across runs for diffing against observed state.

use crate::catalog::ObjectCatalog;
use crate::definition::{RelationshipRule, TypeRegistry, resolve_target};
use crate::error::{Error, Result};
use crate::types::{Attributes, NodeKind, ObjectIdentity, ObjectNode};
use std::collections::BTreeMap;

/// How to treat relationship targets missing from the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Missing targets are a `DanglingReference` error (desired state)
    Strict,
    /// Missing targets resolve to the first candidate type (observed state,
    /// where the target may be an object nobody declared)
    Lenient,
}

/// Derive implicit relationship nodes from the catalog's explicit objects
pub fn synthesize(catalog: &ObjectCatalog, registry: &TypeRegistry) -> Result<Vec<ObjectNode>> {
    synthesize_with(catalog, registry, Resolution::Strict)
}

/// Synthesis with an explicit resolution mode; nodes are returned in identity order
pub fn synthesize_with(
    catalog: &ObjectCatalog,
    registry: &TypeRegistry,
    resolution: Resolution,
) -> Result<Vec<ObjectNode>> {
    let mut implicit: BTreeMap<ObjectIdentity, ObjectNode> = BTreeMap::new();

    for node in catalog.iter() {
        let definition = registry.require(&node.identity.object_type)?;

        for rule in definition.relationships {
            registry.require(rule.relationship)?;

            for target_name in node.values(rule.attribute) {
                let target = match resolve_target(rule.targets, target_name, |id| {
                    catalog.contains(id)
                }) {
                    Some(target) => target,
                    None if resolution == Resolution::Lenient && !rule.targets.is_empty() => {
                        ObjectIdentity::new(rule.targets[0], target_name)
                    }
                    None => {
                        return Err(Error::DanglingReference {
                            from: node.identity.clone(),
                            attribute: rule.attribute.to_string(),
                            target: target_name.to_string(),
                            expected: rule.targets.iter().map(ToString::to_string).collect(),
                        });
                    }
                };

                let relationship = relate(node, &target, rule);
                log::trace!(
                    "{} {} {} => {}",
                    node.identity,
                    rule.attribute,
                    target,
                    relationship.identity
                );

                if implicit.contains_key(&relationship.identity) || catalog.contains(&relationship.identity)
                {
                    return Err(Error::DuplicateIdentity(relationship.identity));
                }
                implicit.insert(relationship.identity.clone(), relationship);
            }
        }
    }

    Ok(implicit.into_values().collect())
}

fn relate(subject: &ObjectNode, target: &ObjectIdentity, rule: &RelationshipRule) -> ObjectNode {
    let name = if rule.target_first {
        format!("{}+{}", target.name, subject.identity.name)
    } else {
        format!("{}+{}", subject.identity.name, target.name)
    };

    let mut attributes = Attributes::new();
    attributes.insert(
        rule.subject_attribute.to_string(),
        subject.identity.name.clone().into(),
    );
    attributes.insert(rule.target_attribute.to_string(), target.name.clone().into());

    ObjectNode {
        identity: ObjectIdentity::new(rule.relationship, name),
        kind: NodeKind::Relationship,
        attributes,
        explicit: false,
        managed: subject.managed,
    }
}
