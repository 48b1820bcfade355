//! Static object-type definitions
//!
//! Every object type declares, independently of how it is executed:
//! - which attributes reference other objects (dependency edges)
//! - which attributes describe relationships that become implicit nodes
//! - whether changed attributes can be applied in place
//! - which names are never dropped

use crate::error::{Error, Result};
use crate::types::{NodeKind, ObjectIdentity};
use std::collections::BTreeMap;

/// An attribute whose values name other objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub attribute: &'static str,
    /// Candidate target types, in resolution priority order
    pub targets: &'static [&'static str],
}

/// Rule synthesizing an implicit relationship node from an attribute
///
/// For a node `Database:d` with `owner = "u"` and the rule
/// `owner => DatabaseOwner (database, owner)`, the synthesized node is
/// `DatabaseOwner:d+u` with attributes `database = d`, `owner = u`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipRule {
    /// Attribute on the declaring object (single value or list)
    pub attribute: &'static str,
    /// Type tag of the synthesized relationship node
    pub relationship: &'static str,
    /// Attribute of the relationship node naming the declaring object
    pub subject_attribute: &'static str,
    /// Attribute of the relationship node naming the referenced object
    pub target_attribute: &'static str,
    /// Candidate target types, in resolution priority order
    pub targets: &'static [&'static str],
    /// Name the relationship `target+subject` instead of `subject+target`
    pub target_first: bool,
    /// The declaring attribute holds a list rather than a single value
    pub many: bool,
}

/// Names that must never be created or dropped (built-ins, superusers)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectedNames {
    exact: Vec<String>,
    prefixes: Vec<String>,
    suffixes: Vec<String>,
}

impl ProtectedNames {
    /// Case-insensitive match against the protected names
    pub fn matches(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.exact.iter().any(|n| *n == name)
            || self.prefixes.iter().any(|p| name.starts_with(p.as_str()))
            || self.suffixes.iter().any(|s| name.ends_with(s.as_str()))
    }
}

/// Static definition of one object type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDefinition {
    pub type_tag: &'static str,
    pub kind: NodeKind,
    pub references: &'static [Reference],
    pub relationships: &'static [RelationshipRule],
    /// Changed attributes can be applied without drop and re-create
    pub updatable: bool,
    /// For single-valued relationships: nodes of this type with equal values
    /// of this attribute occupy the same slot, so a new participant is an
    /// in-place update of the old one
    pub slot_attribute: Option<&'static str>,
    pub protected: ProtectedNames,
}

impl TypeDefinition {
    pub fn entity(type_tag: &'static str) -> Self {
        Self::new(type_tag, NodeKind::Entity)
    }

    pub fn relationship(type_tag: &'static str) -> Self {
        Self::new(type_tag, NodeKind::Relationship)
    }

    fn new(type_tag: &'static str, kind: NodeKind) -> Self {
        Self {
            type_tag,
            kind,
            references: &[],
            relationships: &[],
            updatable: false,
            slot_attribute: None,
            protected: ProtectedNames::default(),
        }
    }

    pub fn with_references(mut self, references: &'static [Reference]) -> Self {
        self.references = references;
        self
    }

    pub fn with_relationships(mut self, relationships: &'static [RelationshipRule]) -> Self {
        self.relationships = relationships;
        self
    }

    pub fn updatable(mut self) -> Self {
        self.updatable = true;
        self
    }

    /// Declare a single-valued relationship slot (implies in-place update)
    pub fn with_slot(mut self, attribute: &'static str) -> Self {
        self.slot_attribute = Some(attribute);
        self.updatable = true;
        self
    }

    pub fn protect_name(mut self, name: &str) -> Self {
        self.protected.exact.push(name.to_lowercase());
        self
    }

    pub fn protect_prefix(mut self, prefix: &str) -> Self {
        self.protected.prefixes.push(prefix.to_lowercase());
        self
    }

    pub fn protect_suffix(mut self, suffix: &str) -> Self {
        self.protected.suffixes.push(suffix.to_lowercase());
        self
    }

    pub fn is_protected(&self, name: &str) -> bool {
        self.protected.matches(name)
    }

    /// Whether an attribute is carried by a synthesized relationship node
    ///
    /// Such attributes are excluded when comparing desired and observed
    /// objects: a change shows up on the relationship node instead.
    pub fn is_relationship_attribute(&self, attribute: &str) -> bool {
        self.relationships.iter().any(|r| r.attribute == attribute)
    }
}

/// Registry of type definitions keyed by type tag
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: BTreeMap<&'static str, TypeDefinition>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration
    pub fn with(mut self, definition: TypeDefinition) -> Self {
        self.register(definition);
        self
    }

    pub fn register(&mut self, definition: TypeDefinition) {
        self.types.insert(definition.type_tag, definition);
    }

    pub fn get(&self, type_tag: &str) -> Option<&TypeDefinition> {
        self.types.get(type_tag)
    }

    /// Look up a definition, failing for unregistered tags
    pub fn require(&self, type_tag: &str) -> Result<&TypeDefinition> {
        self.get(type_tag)
            .ok_or_else(|| Error::UnknownType(type_tag.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeDefinition> {
        self.types.values()
    }

    pub fn is_protected(&self, identity: &ObjectIdentity) -> bool {
        self.get(&identity.object_type)
            .is_some_and(|d| d.is_protected(&identity.name))
    }
}

/// Resolve `name` against candidate types, returning the first that exists
pub(crate) fn resolve_target(
    targets: &[&str],
    name: &str,
    exists: impl Fn(&ObjectIdentity) -> bool,
) -> Option<ObjectIdentity> {
    targets
        .iter()
        .map(|t| ObjectIdentity::new(*t, name))
        .find(|id| exists(id))
}
