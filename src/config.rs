//! Desired-state document
//!
//! A document lists the cluster settings and every object that should (or
//! should no longer) exist:
//!
//! ```toml
//! [cluster]
//! master_user = "postgres"
//!
//! [[objects]]
//! type = "User"
//! name = "alice"
//! groups = ["devs"]
//!
//! [[objects]]
//! type = "SchemaTablesPrivilege"
//! database = "app"
//! schema = "reporting"
//! grantee = "devs"
//! privileges = ["SELECT"]
//! ```

use crate::pg::{self, PgType};
use anyhow::{Context, Result};
use reconcile::{AttrValue, Attributes, ObjectCatalog, ObjectIdentity, ObjectNode, TypeRegistry};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Connection-independent settings of the managed cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Superuser that receives objects of dropped roles
    #[serde(default = "default_master")]
    pub master_user: String,

    /// Database the master user connects to
    #[serde(default = "default_master")]
    pub master_database: String,
}

fn default_master() -> String {
    "postgres".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            master_user: default_master(),
            master_database: default_master(),
        }
    }
}

/// One declared object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSpec {
    #[serde(rename = "type")]
    pub object_type: String,

    /// Derived from other attributes for privileges when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// `false` declares that the object must not exist
    #[serde(default = "default_present")]
    pub present: bool,

    #[serde(flatten)]
    pub attributes: Attributes,
}

fn default_present() -> bool {
    true
}

/// Desired-state document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub objects: Vec<ObjectSpec>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("object #{index}: unknown type '{object_type}'")]
    UnknownType { index: usize, object_type: String },

    #[error("object #{index}: {object_type} objects are derived from other objects and cannot be declared")]
    NotDeclarable { index: usize, object_type: String },

    #[error("object #{index} ({object_type}): missing required attribute '{attribute}'")]
    MissingAttribute {
        index: usize,
        object_type: String,
        attribute: &'static str,
    },

    #[error("object #{index} ({object_type}): unknown attribute '{attribute}'")]
    UnknownAttribute {
        index: usize,
        object_type: String,
        attribute: String,
    },

    #[error("object #{index} ({object_type}): attribute '{attribute}' must be {expected}")]
    InvalidAttribute {
        index: usize,
        object_type: String,
        attribute: String,
        expected: &'static str,
    },

    #[error("object #{index} ({object_type}): {source}")]
    Privileges {
        index: usize,
        object_type: String,
        source: pg::privileges::PrivilegeError,
    },

    #[error("object #{index} ({object_type}): name '{name}' must not contain '{character}'")]
    InvalidName {
        index: usize,
        object_type: String,
        name: String,
        character: char,
    },

    #[error("{object} is declared twice")]
    Duplicate { object: ObjectIdentity },

    #[error("{object} depends on {dependency}, which is declared absent")]
    DependsOnAbsent {
        object: ObjectIdentity,
        dependency: ObjectIdentity,
    },
}

/// A declared object converted to a graph node
#[derive(Debug, Clone, PartialEq)]
struct Declared {
    node: ObjectNode,
    present: bool,
}

impl Document {
    /// Load a document, choosing TOML or JSON by file extension
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read objects file: {}", path.display()))?;

        let document = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse objects file: {}", path.display()))?,
            _ => toml::from_str(&content)
                .with_context(|| format!("Failed to parse objects file: {}", path.display()))?,
        };

        log::debug!("Loaded objects from {}", path.display());
        Ok(document)
    }

    /// Build the catalog of objects declared present
    ///
    /// Besides the declared objects the catalog holds the built-in `public`
    /// group and the `public` schema of every declared database, both as
    /// reference-only nodes.
    pub fn catalog(&self, registry: &TypeRegistry) -> Result<ObjectCatalog> {
        let declared = self.declared()?;

        let absent: BTreeSet<&ObjectIdentity> = declared
            .iter()
            .filter(|d| !d.present)
            .map(|d| &d.node.identity)
            .collect();
        let present: BTreeMap<&ObjectIdentity, &ObjectNode> = declared
            .iter()
            .filter(|d| d.present)
            .map(|d| (&d.node.identity, &d.node))
            .collect();

        check_absent_dependencies(&present, &absent, registry)?;

        let mut catalog = ObjectCatalog::new();
        for node in present.values() {
            catalog.insert(registry, (*node).clone())?;
        }
        for node in builtin_nodes(&present) {
            catalog.insert(registry, node)?;
        }
        log::debug!(
            "Catalog holds {} objects ({} declared absent)",
            catalog.len(),
            absent.len()
        );
        Ok(catalog)
    }

    fn declared(&self) -> Result<Vec<Declared>, DocumentError> {
        let mut declared = Vec::with_capacity(self.objects.len());
        let mut seen = BTreeSet::new();
        for (index, spec) in self.objects.iter().enumerate() {
            let node = object_node(index + 1, spec)?;
            if !seen.insert(node.identity.clone()) {
                return Err(DocumentError::Duplicate {
                    object: node.identity,
                });
            }
            declared.push(Declared {
                node,
                present: spec.present,
            });
        }

        // Default privileges carry the grant they extend, so executing one
        // never needs to look at another object.
        let grants: BTreeMap<ObjectIdentity, Attributes> = declared
            .iter()
            .filter(|d| d.node.identity.object_type == PgType::SchemaTablesPrivilege.tag())
            .map(|d| (d.node.identity.clone(), d.node.attributes.clone()))
            .collect();
        for d in &mut declared {
            if d.node.identity.object_type != PgType::DefaultPrivilege.tag() {
                continue;
            }
            let Some(privilege) = d.node.text("privilege") else {
                continue;
            };
            let key = ObjectIdentity::new(PgType::SchemaTablesPrivilege.tag(), privilege);
            if let Some(attributes) = grants.get(&key) {
                for attribute in ["database", "schema", "grantee", "privileges"] {
                    if let Some(value) = attributes.get(attribute) {
                        d.node.set_attr(attribute, value.clone());
                    }
                }
            }
        }
        Ok(declared)
    }
}

fn check_absent_dependencies(
    present: &BTreeMap<&ObjectIdentity, &ObjectNode>,
    absent: &BTreeSet<&ObjectIdentity>,
    registry: &TypeRegistry,
) -> Result<(), DocumentError> {
    for node in present.values() {
        let Some(definition) = registry.get(&node.identity.object_type) else {
            continue;
        };
        for reference in definition.references {
            for value in node.values(reference.attribute) {
                let candidates: Vec<ObjectIdentity> = reference
                    .targets
                    .iter()
                    .map(|t| ObjectIdentity::new(*t, value))
                    .collect();
                if candidates.iter().any(|c| present.contains_key(c)) {
                    continue;
                }
                if let Some(dependency) = candidates.into_iter().find(|c| absent.contains(c)) {
                    return Err(DocumentError::DependsOnAbsent {
                        object: node.identity.clone(),
                        dependency,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Reference-only nodes for objects every cluster has
fn builtin_nodes(present: &BTreeMap<&ObjectIdentity, &ObjectNode>) -> Vec<ObjectNode> {
    let mut nodes = Vec::new();
    let public = ObjectIdentity::new(PgType::Group.tag(), "public");
    if !present.contains_key(&public) {
        nodes.push(ObjectNode::entity(public.object_type, public.name).reference_only());
    }
    for id in present.keys() {
        if id.object_type != PgType::Database.tag() {
            continue;
        }
        let schema = ObjectIdentity::new(PgType::Schema.tag(), pg::qualify_schema(&id.name, "public"));
        if !present.contains_key(&schema) {
            nodes.push(
                ObjectNode::entity(schema.object_type, schema.name)
                    .with_attr("database", id.name.as_str())
                    .reference_only(),
            );
        }
    }
    nodes
}

/// A string attribute that the entry must carry
fn text_attribute<'a>(
    index: usize,
    spec: &'a ObjectSpec,
    attribute: &'static str,
) -> Result<&'a str, DocumentError> {
    match spec.attributes.get(attribute) {
        Some(AttrValue::Text(value)) => Ok(value),
        Some(_) => Err(DocumentError::InvalidAttribute {
            index,
            object_type: spec.object_type.clone(),
            attribute: attribute.to_string(),
            expected: "a string",
        }),
        None => Err(DocumentError::MissingAttribute {
            index,
            object_type: spec.object_type.clone(),
            attribute,
        }),
    }
}

/// Reject names that would make derived names ambiguous
///
/// Relationship nodes are named `subject+target`, and schemas
/// `database.schema`.
fn check_name(
    index: usize,
    kind: PgType,
    object_type: &str,
    name: Option<&str>,
) -> Result<(), DocumentError> {
    let Some(name) = name else {
        return Ok(());
    };
    let forbidden: &[char] = match kind {
        PgType::Database => &['+', '.'],
        PgType::Group | PgType::User | PgType::Schema => &['+'],
        _ => &[],
    };
    match name.chars().find(|c| forbidden.contains(c)) {
        Some(character) => Err(DocumentError::InvalidName {
            index,
            object_type: object_type.to_string(),
            name: name.to_string(),
            character,
        }),
        None => Ok(()),
    }
}

/// Convert one document entry (1-based `index`) to a graph node
fn object_node(index: usize, spec: &ObjectSpec) -> Result<ObjectNode, DocumentError> {
    let kind = PgType::from_tag(&spec.object_type).ok_or_else(|| DocumentError::UnknownType {
        index,
        object_type: spec.object_type.clone(),
    })?;
    if !kind.is_declarable() {
        return Err(DocumentError::NotDeclarable {
            index,
            object_type: spec.object_type.clone(),
        });
    }

    let allowed = kind.attributes();
    if let Some(attribute) = spec.attributes.keys().find(|k| !allowed.contains(&k.as_str())) {
        return Err(DocumentError::UnknownAttribute {
            index,
            object_type: spec.object_type.clone(),
            attribute: attribute.clone(),
        });
    }

    let text = |attribute| text_attribute(index, spec, attribute);
    let name = || {
        spec.name.clone().ok_or_else(|| DocumentError::MissingAttribute {
            index,
            object_type: spec.object_type.clone(),
            attribute: "name",
        })
    };

    let mut attributes = spec.attributes.clone();
    let name = match kind {
        PgType::Schema => pg::qualify_schema(text("database")?, &name()?),
        PgType::DatabasePrivilege => {
            let (database, grantee) = (text("database")?, text("grantee")?);
            spec.name
                .clone()
                .unwrap_or_else(|| format!("{grantee}@{database}"))
        }
        PgType::SchemaPrivilege | PgType::SchemaTablesPrivilege => {
            let schema = pg::qualify_schema(text("database")?, text("schema")?);
            let grantee = text("grantee")?;
            attributes.insert("schema".into(), AttrValue::Text(schema.clone()));
            spec.name
                .clone()
                .unwrap_or_else(|| format!("{grantee}@{schema}"))
        }
        PgType::DefaultPrivilege => {
            let (grantor, privilege) = (text("grantor")?, text("privilege")?);
            spec.name
                .clone()
                .unwrap_or_else(|| format!("{grantor}:{privilege}"))
        }
        _ => name()?,
    };

    check_name(index, kind, &spec.object_type, spec.name.as_deref())?;
    for attribute in ["owner", "groups"] {
        if attributes
            .get(attribute)
            .is_some_and(|v| v.values().iter().any(|r| r.eq_ignore_ascii_case("public")))
        {
            return Err(DocumentError::InvalidAttribute {
                index,
                object_type: spec.object_type.clone(),
                attribute: attribute.into(),
                expected: "a role other than public",
            });
        }
    }

    if kind == PgType::User {
        if let Some(password) = attributes.get("password").and_then(AttrValue::as_text) {
            let verifier = pg::password::hashed(&name, password);
            attributes.insert("password".into(), AttrValue::Text(verifier));
        }
        if let Some(inherit) = attributes.get("inherit")
            && inherit.as_bool().is_none()
        {
            return Err(DocumentError::InvalidAttribute {
                index,
                object_type: spec.object_type.clone(),
                attribute: "inherit".into(),
                expected: "a boolean",
            });
        }
        if matches!(attributes.get("groups"), Some(AttrValue::Bool(_))) {
            return Err(DocumentError::InvalidAttribute {
                index,
                object_type: spec.object_type.clone(),
                attribute: "groups".into(),
                expected: "a list of group names",
            });
        }
    }

    if let Some(target) = kind.privilege_target()
        && kind != PgType::DefaultPrivilege
    {
        let values = spec
            .attributes
            .get("privileges")
            .map(AttrValue::values)
            .ok_or_else(|| DocumentError::MissingAttribute {
                index,
                object_type: spec.object_type.clone(),
                attribute: "privileges",
            })?;
        let parsed = target
            .parse(values)
            .map_err(|source| DocumentError::Privileges {
                index,
                object_type: spec.object_type.clone(),
                source,
            })?;
        attributes.insert("privileges".into(), AttrValue::List(parsed));
    }

    let mut node = ObjectNode::entity(kind.tag(), name);
    for (key, value) in attributes {
        node.set_attr(key, value);
    }
    Ok(node)
}
