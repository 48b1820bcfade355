//! Observed-state snapshot
//!
//! The snapshot records every entity pgperm knows to exist on the cluster,
//! with its relationship attributes (owner, groups) folded back in. Loading
//! re-synthesizes the relationship nodes leniently, so a snapshot may name
//! owners or groups that it does not list itself.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reconcile::{
    AttrValue, Attributes, NodeKind, ObjectCatalog, ObjectNode, ObservedState,
    ObservedStateProvider, Resolution, TypeRegistry, synthesize_with,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::pg::{PgType, password};

/// One entity as stored in the snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotObject {
    #[serde(rename = "type")]
    pub object_type: String,
    pub name: String,
    #[serde(flatten)]
    pub attributes: Attributes,
}

/// Entities known to exist on the cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// When the snapshot was last written
    pub captured_at: DateTime<Utc>,

    #[serde(default)]
    pub objects: Vec<SnapshotObject>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            captured_at: Utc::now(),
            objects: Vec::new(),
        }
    }
}

impl Snapshot {
    /// Load a snapshot, or return `None` if the file doesn't exist
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            log::debug!("Snapshot {} does not exist", path.display());
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
        let snapshot: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse snapshot: {}", path.display()))?;

        log::debug!(
            "Loaded {} objects from {} (captured {})",
            snapshot.objects.len(),
            path.display(),
            snapshot.captured_at
        );
        Ok(Some(snapshot))
    }

    /// Save the snapshot to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).with_context(|| {
                format!("Failed to create state directory: {}", dir.display())
            })?;
        }

        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize snapshot to JSON")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write snapshot: {}", path.display()))?;

        log::debug!("Saved snapshot to {}", path.display());
        Ok(())
    }

    /// Capture the managed entities of a node set, now
    ///
    /// Relationship nodes are folded back into the attribute they were
    /// synthesized from: a `DatabaseOwner` becomes the database's `owner`,
    /// the `GroupUser` nodes of a user become its `groups`.
    pub fn capture<'a>(
        nodes: impl IntoIterator<Item = &'a ObjectNode>,
        registry: &TypeRegistry,
    ) -> Self {
        let nodes: Vec<&ObjectNode> = nodes.into_iter().collect();
        let mut objects = Vec::new();

        for node in nodes.iter().filter(|n| n.kind == NodeKind::Entity && n.managed) {
            let mut attributes = node.attributes.clone();
            if let Some(definition) = registry.get(&node.identity.object_type) {
                for rule in definition.relationships {
                    let mut targets: Vec<String> = nodes
                        .iter()
                        .filter(|n| n.identity.object_type == rule.relationship)
                        .filter(|n| n.text(rule.subject_attribute) == Some(node.identity.name.as_str()))
                        .filter_map(|n| n.text(rule.target_attribute))
                        .map(ToString::to_string)
                        .collect();
                    targets.sort();
                    attributes.remove(rule.attribute);
                    if rule.many {
                        if !targets.is_empty() {
                            attributes.insert(rule.attribute.into(), AttrValue::List(targets));
                        }
                    } else if let Some(target) = targets.pop() {
                        attributes.insert(rule.attribute.into(), AttrValue::Text(target));
                    }
                }
            }
            if node.identity.object_type == PgType::User.tag()
                && let Some(password) = attributes.get("password").and_then(AttrValue::as_text)
            {
                let verifier = password::hashed(&node.identity.name, password);
                attributes.insert("password".into(), AttrValue::Text(verifier));
            }
            objects.push(SnapshotObject {
                object_type: node.identity.object_type.clone(),
                name: node.identity.name.clone(),
                attributes,
            });
        }

        objects.sort_by(|a, b| {
            (&a.object_type, &a.name).cmp(&(&b.object_type, &b.name))
        });
        Self {
            captured_at: Utc::now(),
            objects,
        }
    }

    /// Rebuild the observed graph from the stored entities
    pub fn observed(&self, registry: &TypeRegistry) -> Result<ObservedState> {
        let mut catalog = ObjectCatalog::new();
        for object in &self.objects {
            let mut node = ObjectNode::entity(&object.object_type, &object.name);
            for (key, value) in &object.attributes {
                node.set_attr(key, value.clone());
            }
            catalog
                .insert(registry, node)
                .with_context(|| format!("Invalid snapshot entry {}:{}", object.object_type, object.name))?;
        }

        let public = ObjectNode::entity(PgType::Group.tag(), "public").reference_only();
        if !catalog.contains(&public.identity) {
            catalog.insert(registry, public)?;
        }

        let implicit = synthesize_with(&catalog, registry, Resolution::Lenient)?;
        let nodes: Vec<ObjectNode> = catalog.iter().cloned().chain(implicit).collect();
        Ok(ObservedState::from_nodes(nodes, registry)?)
    }
}

/// Observed state read from a snapshot file
///
/// A missing file means nothing has been created yet.
#[derive(Debug, Clone)]
pub struct SnapshotProvider {
    path: PathBuf,
}

impl SnapshotProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ObservedStateProvider for SnapshotProvider {
    fn observe(&self, registry: &TypeRegistry) -> Result<ObservedState> {
        Snapshot::load(&self.path)?
            .unwrap_or_default()
            .observed(registry)
    }
}
