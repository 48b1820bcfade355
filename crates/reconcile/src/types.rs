//! Core types for dependency-ordered reconciliation

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Stable identity of a managed object: its type tag and its name within that type.
///
/// The derived ordering (type tag first, then name) is the tie-break key used
/// whenever several objects are eligible at the same time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectIdentity {
    pub object_type: String,
    pub name: String,
}

impl ObjectIdentity {
    pub fn new(object_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.name)
    }
}

/// Value of a single object attribute
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Text(String),
    List(Vec<String>),
}

impl AttrValue {
    /// The value as a single string, if it is one
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// All string values carried by this attribute
    ///
    /// A text value yields itself, a list yields its items, a bool yields nothing.
    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::Text(s) => vec![s.as_str()],
            Self::List(items) => items.iter().map(String::as_str).collect(),
            Self::Bool(_) => Vec::new(),
        }
    }

    /// Sort and deduplicate list values so equality ignores declaration order
    pub fn normalized(self) -> Self {
        match self {
            Self::List(mut items) => {
                items.sort();
                items.dedup();
                Self::List(items)
            }
            other => other,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::List(items) => write!(f, "[{}]", items.join(", ")),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value).normalized()
    }
}

impl<const N: usize> From<[&str; N]> for AttrValue {
    fn from(value: [&str; N]) -> Self {
        Self::List(value.iter().map(|s| (*s).to_string()).collect()).normalized()
    }
}

/// Attribute map of an object, ordered so that rendering is stable
pub type Attributes = BTreeMap<String, AttrValue>;

/// Whether a node is a managed entity or a relationship between entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    /// A standalone object (user, database, grant, ...)
    Entity,
    /// A link between participants (ownership, membership, ...)
    Relationship,
}

/// A node of the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectNode {
    pub identity: ObjectIdentity,
    pub kind: NodeKind,
    pub attributes: Attributes,
    /// `false` for nodes synthesized from relationship attributes
    pub explicit: bool,
    /// `false` for reference-only nodes, which are never created, updated or dropped
    pub managed: bool,
}

impl ObjectNode {
    /// Create an explicit, managed entity node without attributes
    pub fn entity(object_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            identity: ObjectIdentity::new(object_type, name),
            kind: NodeKind::Entity,
            attributes: Attributes::new(),
            explicit: true,
            managed: true,
        }
    }

    /// Builder-style attribute setter
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.set_attr(key, value);
        self
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.attributes
            .insert(key.into(), value.into().normalized());
    }

    /// Mark the node as reference-only
    pub fn reference_only(mut self) -> Self {
        self.managed = false;
        self
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.attr(key).and_then(AttrValue::as_text)
    }

    /// All string values of an attribute (empty when absent)
    pub fn values(&self, key: &str) -> Vec<&str> {
        self.attr(key).map(AttrValue::values).unwrap_or_default()
    }
}

/// Change of a single attribute between observed and desired state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrChange {
    pub from: Option<AttrValue>,
    pub to: Option<AttrValue>,
}

impl fmt::Display for AttrChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<AttrValue>| v.as_ref().map_or_else(|| "-".to_string(), ToString::to_string);
        write!(f, "{} -> {}", show(&self.from), show(&self.to))
    }
}

/// Per-attribute changes, keyed by attribute name
pub type AttributeDiff = BTreeMap<String, AttrChange>;

/// Action the planner assigns to an identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanAction {
    Create,
    Drop,
    Update(AttributeDiff),
    NoOp,
}

impl PlanAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Drop => "drop",
            Self::Update(_) => "update",
            Self::NoOp => "no-op",
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoOp)
    }
}

/// Result of applying one plan entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyResult {
    /// No changes needed
    NoChange,
    /// Object was created
    Created,
    /// Object was updated in place
    Modified,
    /// Object was dropped
    Removed,
    /// Apply failed
    Failed { error: String },
    /// Apply was skipped (dry run, or the exists check found nothing to do)
    Skipped { reason: String },
}

impl ApplyResult {
    /// Check if the result represents success (no failure)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Check if the result represents a change
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Modified | Self::Removed)
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub modified: usize,
    pub removed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub no_change: usize,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.modified + self.removed
    }

    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of plan entries processed
    pub fn total(&self) -> usize {
        self.created + self.modified + self.removed + self.skipped + self.failed + self.no_change
    }

    /// Add a result to the summary
    pub fn add_result(&mut self, result: &ApplyResult) {
        match result {
            ApplyResult::NoChange => self.no_change += 1,
            ApplyResult::Created => self.created += 1,
            ApplyResult::Modified => self.modified += 1,
            ApplyResult::Removed => self.removed += 1,
            ApplyResult::Failed { .. } => self.failed += 1,
            ApplyResult::Skipped { .. } => self.skipped += 1,
        }
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Don't call any executor, report every change as skipped
    pub dry_run: bool,
    /// Number of workers; 1 applies the plan strictly in order
    pub jobs: usize,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            jobs: 1,
        }
    }
}
