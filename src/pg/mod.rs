//! PostgreSQL permission object types
//!
//! Each type gets a static [`TypeDefinition`]: what it references, which of its
//! attributes become relationship nodes, whether it can change in place and
//! which names belong to the server rather than to us.

pub mod password;
pub mod privileges;
pub mod sql;

use crate::config::ClusterConfig;
use privileges::PrivilegeTarget;
use reconcile::{Reference, RelationshipRule, TypeDefinition, TypeRegistry};

/// Roles are resolved as a group first, then as a user
const ROLES: &[&str] = &["Group", "User"];

const USER_REFS: &[Reference] = &[Reference {
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
const GROUP_USER_REFS: &[Reference] = &[
    Reference {
        attribute: "group",
        targets: &["Group"],
    },
    Reference {
        attribute: "user",
        targets: &["User"],
    },
];

const DATABASE_REFS: &[Reference] = &[Reference {
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
const DATABASE_OWNER_REFS: &[Reference] = &[
    Reference {
        attribute: "database",
        targets: &["Database"],
    },
    Reference {
        attribute: "owner",
        targets: ROLES,
    },
];

const SCHEMA_REFS: &[Reference] = &[
    Reference {
        attribute: "database",
        targets: &["Database"],
    },
    Reference {
        attribute: "owner",
        targets: ROLES,
    },
];
const SCHEMA_RULES: &[RelationshipRule] = &[RelationshipRule {
    attribute: "owner",
    relationship: "SchemaOwner",
    subject_attribute: "schema",
    target_attribute: "owner",
    targets: ROLES,
    target_first: false,
    many: false,
}];
const SCHEMA_OWNER_REFS: &[Reference] = &[
    Reference {
        attribute: "schema",
        targets: &["Schema"],
    },
    Reference {
        attribute: "owner",
        targets: ROLES,
    },
];

const DATABASE_PRIVILEGE_REFS: &[Reference] = &[
    Reference {
        attribute: "database",
        targets: &["Database"],
    },
    Reference {
        attribute: "grantee",
        targets: ROLES,
    },
];
const SCHEMA_PRIVILEGE_REFS: &[Reference] = &[
    Reference {
        attribute: "database",
        targets: &["Database"],
    },
    Reference {
        attribute: "schema",
        targets: &["Schema"],
    },
    Reference {
        attribute: "grantee",
        targets: ROLES,
    },
];
const DEFAULT_PRIVILEGE_REFS: &[Reference] = &[
    Reference {
        attribute: "privilege",
        targets: &["SchemaTablesPrivilege"],
    },
    Reference {
        attribute: "grantor",
        targets: ROLES,
    },
];

/// Object types managed on a PostgreSQL cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PgType {
    Group,
    User,
    GroupUser,
    Database,
    DatabaseOwner,
    Schema,
    SchemaOwner,
    DatabasePrivilege,
    SchemaPrivilege,
    SchemaTablesPrivilege,
    DefaultPrivilege,
}

impl PgType {
    pub const ALL: [Self; 11] = [
        Self::Group,
        Self::User,
        Self::GroupUser,
        Self::Database,
        Self::DatabaseOwner,
        Self::Schema,
        Self::SchemaOwner,
        Self::DatabasePrivilege,
        Self::SchemaPrivilege,
        Self::SchemaTablesPrivilege,
        Self::DefaultPrivilege,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            Self::Group => "Group",
            Self::User => "User",
            Self::GroupUser => "GroupUser",
            Self::Database => "Database",
            Self::DatabaseOwner => "DatabaseOwner",
            Self::Schema => "Schema",
            Self::SchemaOwner => "SchemaOwner",
            Self::DatabasePrivilege => "DatabasePrivilege",
            Self::SchemaPrivilege => "SchemaPrivilege",
            Self::SchemaTablesPrivilege => "SchemaTablesPrivilege",
            Self::DefaultPrivilege => "DefaultPrivilege",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }

    /// Relationship types only ever come from another object's attributes
    pub fn is_declarable(self) -> bool {
        !matches!(
            self,
            Self::GroupUser | Self::DatabaseOwner | Self::SchemaOwner
        )
    }

    /// Attributes a document may set on an object of this type
    pub fn attributes(self) -> &'static [&'static str] {
        match self {
            Self::Group => &[],
            Self::User => &["password", "groups", "inherit"],
            Self::Database => &["owner"],
            Self::Schema => &["database", "owner"],
            Self::DatabasePrivilege => &["database", "grantee", "privileges"],
            Self::SchemaPrivilege | Self::SchemaTablesPrivilege => {
                &["database", "schema", "grantee", "privileges"]
            }
            Self::DefaultPrivilege => &["grantor", "privilege"],
            Self::GroupUser | Self::DatabaseOwner | Self::SchemaOwner => &[],
        }
    }

    /// What the `privileges` attribute of this type grants on
    pub fn privilege_target(self) -> Option<PrivilegeTarget> {
        match self {
            Self::DatabasePrivilege => Some(PrivilegeTarget::Database),
            Self::SchemaPrivilege => Some(PrivilegeTarget::Schema),
            Self::SchemaTablesPrivilege | Self::DefaultPrivilege => Some(PrivilegeTarget::Tables),
            _ => None,
        }
    }

    fn definition(self, cluster: &ClusterConfig) -> TypeDefinition {
        let tag = self.tag();
        match self {
            Self::Group => protect_roles(TypeDefinition::entity(tag), cluster),
            Self::User => protect_roles(
                TypeDefinition::entity(tag)
                    .with_references(USER_REFS)
                    .with_relationships(USER_RULES)
                    .updatable(),
                cluster,
            ),
            Self::GroupUser => TypeDefinition::relationship(tag).with_references(GROUP_USER_REFS),
            Self::Database => TypeDefinition::entity(tag)
                .with_references(DATABASE_REFS)
                .with_relationships(DATABASE_RULES)
                .protect_name("postgres")
                .protect_name(&cluster.master_database)
                .protect_prefix("template"),
            Self::DatabaseOwner => TypeDefinition::relationship(tag)
                .with_references(DATABASE_OWNER_REFS)
                .with_slot("database"),
            Self::Schema => TypeDefinition::entity(tag)
                .with_references(SCHEMA_REFS)
                .with_relationships(SCHEMA_RULES)
                .protect_suffix(".public")
                .protect_suffix(".information_schema"),
            Self::SchemaOwner => TypeDefinition::relationship(tag)
                .with_references(SCHEMA_OWNER_REFS)
                .with_slot("schema"),
            Self::DatabasePrivilege => TypeDefinition::entity(tag)
                .with_references(DATABASE_PRIVILEGE_REFS)
                .updatable(),
            Self::SchemaPrivilege | Self::SchemaTablesPrivilege => TypeDefinition::entity(tag)
                .with_references(SCHEMA_PRIVILEGE_REFS)
                .updatable(),
            Self::DefaultPrivilege => TypeDefinition::entity(tag)
                .with_references(DEFAULT_PRIVILEGE_REFS)
                .updatable(),
        }
    }
}

fn protect_roles(definition: TypeDefinition, cluster: &ClusterConfig) -> TypeDefinition {
    definition
        .protect_name("public")
        .protect_name("postgres")
        .protect_name(&cluster.master_user)
        .protect_prefix("pg_")
}

/// Type registry for a cluster managed as `cluster.master_user`
pub fn registry(cluster: &ClusterConfig) -> TypeRegistry {
    PgType::ALL
        .into_iter()
        .fold(TypeRegistry::new(), |registry, t| {
            registry.with(t.definition(cluster))
        })
}

/// Qualified schema name as used for schema identities
pub fn qualify_schema(database: &str, schema: &str) -> String {
    format!("{database}.{schema}")
}

/// Split a qualified `database.schema` name at the first dot
pub fn split_schema(qualified: &str) -> Option<(&str, &str)> {
    qualified.split_once('.')
}
