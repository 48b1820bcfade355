//! Capability traits for executors, observed state and progress
//!
//! These traits allow the reconcile crate to be used without depending on a
//! specific database driver, snapshot format or UI.

use crate::definition::TypeRegistry;
use crate::error::{Error, Result};
use crate::observed::ObservedState;
use crate::planner::PlanEntry;
use crate::types::{ApplyResult, AttributeDiff, ExecuteSummary, ObjectNode};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Per-type operations against the target system
///
/// The engine calls `exists` before every change, so re-running a plan after
/// a failure is safe as long as implementations are idempotent under those
/// gated calls. Nothing here enforces that.
pub trait ObjectExecutor: Send + Sync {
    /// Check whether the object is currently present
    fn exists(&self, node: &ObjectNode) -> anyhow::Result<bool>;

    fn create(&self, node: &ObjectNode) -> anyhow::Result<()>;

    /// Drop the object
    fn remove(&self, node: &ObjectNode) -> anyhow::Result<()>;

    /// Apply changed attributes in place
    fn update(&self, node: &ObjectNode, _diff: &AttributeDiff) -> anyhow::Result<()> {
        anyhow::bail!("update not supported for {}", node.identity.object_type)
    }
}

/// Executors keyed by object type tag
#[derive(Clone, Default)]
pub struct Executors {
    executors: BTreeMap<String, Arc<dyn ObjectExecutor>>,
}

impl Executors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, object_type: impl Into<String>, executor: Arc<dyn ObjectExecutor>) {
        self.executors.insert(object_type.into(), executor);
    }

    /// Builder-style registration
    pub fn with(mut self, object_type: impl Into<String>, executor: Arc<dyn ObjectExecutor>) -> Self {
        self.register(object_type, executor);
        self
    }

    pub fn get(&self, object_type: &str) -> Result<&Arc<dyn ObjectExecutor>> {
        self.executors
            .get(object_type)
            .ok_or_else(|| Error::MissingExecutor(object_type.to_string()))
    }
}

impl fmt::Debug for Executors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.executors.keys()).finish()
    }
}

/// Source of the current state of the target system
pub trait ObservedStateProvider {
    /// Capture a fresh snapshot; called once per reconciliation run
    fn observe(&self, registry: &TypeRegistry) -> anyhow::Result<ObservedState>;
}

/// Progress callback for execution operations
///
/// Implement this trait to receive progress updates during execution.
pub trait ProgressCallback: Send {
    /// Called once before any entry runs, with the number of changes
    fn on_start(&mut self, total: usize);

    fn on_entry_start(&mut self, entry: &PlanEntry);

    fn on_entry_complete(&mut self, entry: &PlanEntry, result: &ApplyResult);

    /// Called after the last entry, also when execution stopped on a failure
    fn on_finish(&mut self, summary: &ExecuteSummary);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_start(&mut self, _total: usize) {}
    fn on_entry_start(&mut self, _entry: &PlanEntry) {}
    fn on_entry_complete(&mut self, _entry: &PlanEntry, _result: &ApplyResult) {}
    fn on_finish(&mut self, _summary: &ExecuteSummary) {}
}
