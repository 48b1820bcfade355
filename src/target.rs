//! Script-writing executors
//!
//! pgperm does not talk to the server itself. Each executor renders the SQL
//! for its object type into a shared [`ScriptTarget`], which keeps a working
//! copy of the cluster state so that exists-checks see earlier changes of the
//! same run. The result is a psql script plus the snapshot to save once the
//! script has been applied.

use crate::config::ClusterConfig;
use crate::pg::PgType;
use crate::pg::sql::{self, Statement, Target, quote_ident};
use anyhow::{Context, Result};
use chrono::Utc;
use reconcile::{
    AttributeDiff, Executors, NodeKind, ObjectExecutor, ObjectIdentity, ObjectNode, ObservedState,
    TypeRegistry,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Statement emitted for one executor call, bound to a concrete database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emitted {
    /// `create Database:app`, `drop User:bob`, ...
    pub label: String,
    pub database: String,
    pub statement: Statement,
}

#[derive(Debug, Default)]
struct Working {
    objects: BTreeMap<ObjectIdentity, ObjectNode>,
    emitted: Vec<Emitted>,
}

/// Working copy of the cluster plus the statements that produce it
#[derive(Debug)]
pub struct ScriptTarget {
    cluster: ClusterConfig,
    registry: TypeRegistry,
    state: Mutex<Working>,
}

impl ScriptTarget {
    /// Start from the observed state
    pub fn new(cluster: ClusterConfig, registry: TypeRegistry, observed: &ObservedState) -> Self {
        let objects = observed
            .graph()
            .nodes()
            .map(|n| (n.identity.clone(), n.clone()))
            .collect();
        Self {
            cluster,
            registry,
            state: Mutex::new(Working {
                objects,
                emitted: Vec::new(),
            }),
        }
    }

    pub fn cluster(&self) -> &ClusterConfig {
        &self.cluster
    }

    fn lock(&self) -> MutexGuard<'_, Working> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn contains(&self, identity: &ObjectIdentity) -> bool {
        self.lock().objects.contains_key(identity)
    }

    /// Current working copy, in identity order
    pub fn objects(&self) -> Vec<ObjectNode> {
        self.lock().objects.values().cloned().collect()
    }

    pub fn emitted(&self) -> Vec<Emitted> {
        self.lock().emitted.clone()
    }

    /// Record statements for `label` and apply `change` to the working copy
    ///
    /// Both happen under one lock, so concurrent executors never observe a
    /// change without its statements.
    fn record(&self, label: String, statements: Vec<Statement>, change: impl FnOnce(&mut Working)) {
        let mut working = self.lock();
        for statement in statements {
            for database in self.databases_for(&working, &statement.target) {
                log::trace!("{label} on {database}: {:?}", statement.queries);
                working.emitted.push(Emitted {
                    label: label.clone(),
                    database,
                    statement: statement.clone(),
                });
            }
        }
        change(&mut *working);
    }

    fn databases_for(&self, working: &Working, target: &Target) -> Vec<String> {
        match target {
            Target::Maintenance => vec![self.cluster.master_database.clone()],
            Target::Database(name) => vec![name.clone()],
            Target::AllDatabases => working
                .objects
                .values()
                .filter(|n| n.identity.object_type == PgType::Database.tag() && n.managed)
                .map(|n| n.identity.name.clone())
                .collect(),
        }
    }

    /// Nodes of the same single-valued relationship as `node`
    fn same_slot(&self, working: &Working, node: &ObjectNode) -> Vec<ObjectIdentity> {
        let Some(slot) = self
            .registry
            .get(&node.identity.object_type)
            .and_then(|d| d.slot_attribute)
        else {
            return Vec::new();
        };
        let value = node.attr(slot);
        working
            .objects
            .values()
            .filter(|n| n.identity.object_type == node.identity.object_type)
            .filter(|n| n.kind == NodeKind::Relationship && n.attr(slot) == value)
            .map(|n| n.identity.clone())
            .collect()
    }

    /// Render everything emitted so far as a psql script
    pub fn script(&self) -> String {
        let working = self.lock();
        let mut out = String::new();
        out.push_str("-- Generated by pgperm\n");
        out.push_str(&format!("-- {}\n", Utc::now().to_rfc3339()));
        if working.emitted.is_empty() {
            out.push_str("-- Nothing to do\n");
            return out;
        }
        out.push_str("\\set ON_ERROR_STOP on\n");

        let mut connected: Option<&str> = None;
        let mut last_label: Option<&str> = None;
        for emitted in &working.emitted {
            if connected != Some(emitted.database.as_str()) {
                out.push_str(&format!("\n\\connect {}\n", quote_ident(&emitted.database)));
                connected = Some(emitted.database.as_str());
                last_label = None;
            }
            if last_label != Some(emitted.label.as_str()) {
                out.push_str(&format!("-- {}\n", emitted.label));
                last_label = Some(emitted.label.as_str());
            }
            out.push_str(&emitted.statement.to_sql());
        }
        out
    }
}

/// Executor for one object type
struct PgExecutor {
    kind: PgType,
    target: Arc<ScriptTarget>,
}

impl ObjectExecutor for PgExecutor {
    fn exists(&self, node: &ObjectNode) -> Result<bool> {
        Ok(self.target.contains(&node.identity))
    }

    fn create(&self, node: &ObjectNode) -> Result<()> {
        let statements = sql::create(self.kind, node)
            .with_context(|| format!("Failed to render create for {}", node.identity))?;
        self.target
            .record(format!("create {}", node.identity), statements, |w| {
                w.objects.insert(node.identity.clone(), node.clone());
            });
        Ok(())
    }

    fn remove(&self, node: &ObjectNode) -> Result<()> {
        let statements = sql::drop(self.kind, node, self.target.cluster())
            .with_context(|| format!("Failed to render drop for {}", node.identity))?;
        self.target
            .record(format!("drop {}", node.identity), statements, |w| {
                w.objects.remove(&node.identity);
            });
        Ok(())
    }

    fn update(&self, node: &ObjectNode, diff: &AttributeDiff) -> Result<()> {
        let statements = sql::update(self.kind, node, diff)
            .with_context(|| format!("Failed to render update for {}", node.identity))?;
        let target = &self.target;
        target.record(format!("update {}", node.identity), statements, |w| {
            for previous in target.same_slot(w, node) {
                w.objects.remove(&previous);
            }
            w.objects.insert(node.identity.clone(), node.clone());
        });
        Ok(())
    }
}

/// One executor per object type, all writing into `target`
pub fn executors(target: &Arc<ScriptTarget>) -> Executors {
    PgType::ALL
        .into_iter()
        .fold(Executors::new(), |executors, kind| {
            executors.with(
                kind.tag(),
                Arc::new(PgExecutor {
                    kind,
                    target: Arc::clone(target),
                }),
            )
        })
}
