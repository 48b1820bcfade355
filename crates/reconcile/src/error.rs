//! Error types for the reconcile crate
//!
//! Construction errors (unknown types, dangling or unknown references,
//! duplicates, cycles) are fatal before any plan exists. Execution errors
//! carry the identity, action and stage that failed so the caller can resume
//! or repair state by hand.

use crate::types::ObjectIdentity;
use std::fmt;
use thiserror::Error;

/// Step of a plan entry during which an executor call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Exists,
    Create,
    Drop,
    Update,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Exists => "existence check",
            Self::Create => "create",
            Self::Drop => "drop",
            Self::Update => "update",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while building, ordering, planning or executing
#[derive(Debug, Error)]
pub enum Error {
    /// Object type tag has no registered definition
    #[error("unknown object type '{0}'")]
    UnknownType(String),

    /// Two nodes share one identity
    #[error("duplicate identity {0}")]
    DuplicateIdentity(ObjectIdentity),

    /// A relationship attribute names an object that is not declared
    #[error(
        "{from}: attribute '{attribute}' references '{target}', which is not declared as {}",
        .expected.join(" or ")
    )]
    DanglingReference {
        from: ObjectIdentity,
        attribute: String,
        target: String,
        expected: Vec<String>,
    },

    /// A dependency points at an identity missing from the graph
    #[error("{from} depends on {target}, which is not part of the graph")]
    UnknownIdentity {
        from: ObjectIdentity,
        target: ObjectIdentity,
    },

    /// The graph is not acyclic
    #[error("cyclic dependency among: {}", join_identities(.remaining))]
    CyclicDependency { remaining: Vec<ObjectIdentity> },

    /// No executor is registered for a type that has pending changes
    #[error("no executor registered for object type '{0}'")]
    MissingExecutor(String),

    /// An executor call failed; everything before it stays applied
    #[error("{action} {identity} failed during {stage}: {source}")]
    Execution {
        identity: ObjectIdentity,
        action: &'static str,
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },

    /// The observed-state provider failed
    #[error("failed to observe current state: {0}")]
    Observe(#[source] anyhow::Error),

    /// Worker pool could not be created
    #[error("failed to create worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

fn join_identities(identities: &[ObjectIdentity]) -> String {
    identities
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type for reconcile operations
pub type Result<T> = std::result::Result<T, Error>;
