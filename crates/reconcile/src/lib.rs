//! # Reconcile
//!
//! A dependency-graph reconciliation engine for declaratively managed objects.
//!
//! The crate takes a catalog of declared objects, derives the relationship
//! objects implied by their attributes, orders everything by dependency and
//! computes the plan that converges an observed state onto the declared one.
//!
//! ## Core Concepts
//!
//! - **ObjectCatalog**: explicitly declared objects, keyed by (type, name)
//! - **Synthesis**: relationship attributes (an owner, a membership list)
//!   become implicit nodes of their own, so changing a relationship never
//!   forces the related objects to be recreated
//! - **DependencyGraph**: "depends on" edges resolved from each type's static
//!   [`TypeDefinition`]
//! - **Topological order**: Kahn's algorithm with a (type, name) tie-break;
//!   identical input gives an identical order
//! - **ExecutionPlan**: creates and updates in dependency order, drops in
//!   reverse dependency order
//! - **Executor**: applies a plan through per-type [`ObjectExecutor`]s,
//!   sequentially or on a bounded worker pool, stopping at the first failure
//!
//! ## Example
//!
//! ```ignore
//! use reconcile::{
//!     ExecuteOptions, Executors, NoProgress, ObjectCatalog, ObjectNode,
//!     ObservedState, TypeDefinition, TypeRegistry, DependencyGraph,
//!     execute, plan, synthesize,
//! };
//!
//! let registry = TypeRegistry::new().with(TypeDefinition::entity("User"));
//! let mut catalog = ObjectCatalog::new();
//! catalog.insert(&registry, ObjectNode::entity("User", "alice"))?;
//!
//! let implicit = synthesize(&catalog, &registry)?;
//! let desired = DependencyGraph::build(&catalog, implicit, &registry)?;
//! let plan = plan(&desired, &ObservedState::empty(), &registry)?;
//!
//! let executors = Executors::new().with("User", my_user_executor);
//! let summary = execute(&plan, &executors, &ExecuteOptions::default(), &mut NoProgress)?;
//! ```
//!
//! ## Provider Traits
//!
//! - [`ObjectExecutor`]: exists/create/drop/update for one object type
//! - [`ObservedStateProvider`]: captures the current state of the target
//! - [`ProgressCallback`]: receives progress updates
//!
//! This allows the crate to be used without hard dependencies on a specific
//! database driver or UI framework.

pub mod catalog;
pub mod context;
pub mod definition;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod observed;
pub mod pipeline;
pub mod planner;
pub mod sort;
pub mod synthesize;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use catalog::ObjectCatalog;
pub use context::{Executors, NoProgress, ObjectExecutor, ObservedStateProvider, ProgressCallback};
pub use definition::{ProtectedNames, Reference, RelationshipRule, TypeDefinition, TypeRegistry};
pub use diff::{DiffSummary, diff_attributes, group_by_type};
pub use error::{Error, Result, Stage};
pub use executor::execute;
pub use graph::DependencyGraph;
pub use observed::ObservedState;
pub use pipeline::{Reconciliation, reconcile};
pub use planner::{ExecutionPlan, PlanEntry, plan};
pub use sort::{reverse_topological_order, topological_order};
pub use synthesize::{Resolution, synthesize, synthesize_with};
pub use types::{
    ApplyResult, AttrChange, AttrValue, AttributeDiff, Attributes, ExecuteOptions,
    ExecuteSummary, NodeKind, ObjectIdentity, ObjectNode, PlanAction,
};
