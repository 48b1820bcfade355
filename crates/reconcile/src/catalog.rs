//! Explicitly declared desired-state objects

use crate::definition::TypeRegistry;
use crate::error::{Error, Result};
use crate::types::{ObjectIdentity, ObjectNode};
use std::collections::BTreeMap;

/// The objects a caller declared, keyed by identity
#[derive(Debug, Clone, Default)]
pub struct ObjectCatalog {
    objects: BTreeMap<ObjectIdentity, ObjectNode>,
}

impl ObjectCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a declared object
    ///
    /// The node is marked explicit and takes its kind from the type definition.
    pub fn insert(&mut self, registry: &TypeRegistry, mut node: ObjectNode) -> Result<()> {
        let definition = registry.require(&node.identity.object_type)?;
        if self.objects.contains_key(&node.identity) {
            return Err(Error::DuplicateIdentity(node.identity));
        }
        node.kind = definition.kind;
        node.explicit = true;
        self.objects.insert(node.identity.clone(), node);
        Ok(())
    }

    pub fn get(&self, identity: &ObjectIdentity) -> Option<&ObjectNode> {
        self.objects.get(identity)
    }

    pub fn contains(&self, identity: &ObjectIdentity) -> bool {
        self.objects.contains_key(identity)
    }

    /// Objects in identity order
    pub fn iter(&self) -> impl Iterator<Item = &ObjectNode> {
        self.objects.values()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
