//! Shared fixtures for unit tests: a small role/database type system and a
//! recording executor

use crate::catalog::ObjectCatalog;
use crate::context::{Executors, ObjectExecutor};
use crate::definition::{Reference, RelationshipRule, TypeDefinition, TypeRegistry};
use crate::types::{AttributeDiff, ObjectIdentity, ObjectNode};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

const ROLES: &[&str] = &["Group", "User"];

const USER_REFERENCES: &[Reference] = &[Reference {
    attribute: "groups",
    targets: &["Group"],
}];

const USER_RULES: &[RelationshipRule] = &[RelationshipRule {
    attribute: "groups",
    relationship: "GroupUser",
    subject_attribute: "user",
    target_attribute: "group",
    targets: &["Group"],
    target_first: true,
    many: true,
}];

const GROUP_USER_REFERENCES: &[Reference] = &[
    Reference {
        attribute: "group",
        targets: &["Group"],
    },
    Reference {
        attribute: "user",
        targets: &["User"],
    },
];

const DATABASE_REFERENCES: &[Reference] = &[Reference {
    attribute: "owner",
    targets: ROLES,
}];

const DATABASE_RULES: &[RelationshipRule] = &[RelationshipRule {
    attribute: "owner",
    relationship: "DatabaseOwner",
    subject_attribute: "database",
    target_attribute: "owner",
    targets: ROLES,
    target_first: false,
    many: false,
}];

const DATABASE_OWNER_REFERENCES: &[Reference] = &[
    Reference {
        attribute: "database",
        targets: &["Database"],
    },
    Reference {
        attribute: "owner",
        targets: ROLES,
    },
];

pub(crate) fn registry() -> TypeRegistry {
    TypeRegistry::new()
        .with(TypeDefinition::entity("Group").protect_name("public"))
        .with(
            TypeDefinition::entity("User")
                .with_references(USER_REFERENCES)
                .with_relationships(USER_RULES)
                .updatable()
                .protect_name("postgres")
                .protect_prefix("pg_"),
        )
        .with(TypeDefinition::relationship("GroupUser").with_references(GROUP_USER_REFERENCES))
        .with(
            TypeDefinition::entity("Database")
                .with_references(DATABASE_REFERENCES)
                .with_relationships(DATABASE_RULES),
        )
        .with(
            TypeDefinition::relationship("DatabaseOwner")
                .with_references(DATABASE_OWNER_REFERENCES)
                .with_slot("database"),
        )
}

pub(crate) fn catalog(registry: &TypeRegistry, nodes: Vec<ObjectNode>) -> ObjectCatalog {
    let mut catalog = ObjectCatalog::new();
    for node in nodes {
        catalog.insert(registry, node).unwrap();
    }
    catalog
}

pub(crate) fn id(object_type: &str, name: &str) -> ObjectIdentity {
    ObjectIdentity::new(object_type, name)
}

/// Executor that records every call and keeps an in-memory set of present objects
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    calls: Mutex<Vec<String>>,
    present: Mutex<BTreeSet<ObjectIdentity>>,
    fail_on: Option<ObjectIdentity>,
}

impl Recorder {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn with_present(present: &[ObjectIdentity]) -> Arc<Self> {
        Arc::new(Self {
            present: Mutex::new(present.iter().cloned().collect()),
            ..Self::default()
        })
    }

    pub(crate) fn failing_on(identity: ObjectIdentity) -> Arc<Self> {
        Arc::new(Self {
            fail_on: Some(identity),
            ..Self::default()
        })
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Mutating calls only, without existence checks
    pub(crate) fn changes(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("exists"))
            .collect()
    }

    pub(crate) fn is_present(&self, identity: &ObjectIdentity) -> bool {
        self.present.lock().unwrap().contains(identity)
    }

    fn record(&self, call: &str, node: &ObjectNode) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{call} {}", node.identity));
        if call != "exists" && self.fail_on.as_ref() == Some(&node.identity) {
            anyhow::bail!("{call} rejected by server");
        }
        Ok(())
    }

    /// Executors for every fixture type, all backed by this recorder
    pub(crate) fn executors(self: &Arc<Self>) -> Executors {
        let mut executors = Executors::new();
        for tag in ["Group", "User", "GroupUser", "Database", "DatabaseOwner"] {
            executors.register(tag, self.clone());
        }
        executors
    }
}

impl ObjectExecutor for Recorder {
    fn exists(&self, node: &ObjectNode) -> anyhow::Result<bool> {
        self.record("exists", node)?;
        Ok(self.is_present(&node.identity))
    }

    fn create(&self, node: &ObjectNode) -> anyhow::Result<()> {
        self.record("create", node)?;
        self.present.lock().unwrap().insert(node.identity.clone());
        Ok(())
    }

    fn remove(&self, node: &ObjectNode) -> anyhow::Result<()> {
        self.record("drop", node)?;
        self.present.lock().unwrap().remove(&node.identity);
        Ok(())
    }

    fn update(&self, node: &ObjectNode, _diff: &AttributeDiff) -> anyhow::Result<()> {
        self.record("update", node)?;
        self.present.lock().unwrap().insert(node.identity.clone());
        Ok(())
    }
}
