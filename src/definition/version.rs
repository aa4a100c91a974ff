//! Versioned definition registry
//!
//! Every persisted workflow instance carries the version name it was created
//! under; the runtime resolves definitions through this registry, so old
//! instances keep executing against their original graphs while new ones use
//! newer graphs.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::definition::graph::{TaskKind, WorkflowGraph};
use crate::error::{EngineError, EngineResult};

/// Per-workflow-name registry of `{version -> definition}`
#[derive(Default)]
pub struct VersionManager {
    definitions: DashMap<String, BTreeMap<String, Arc<WorkflowGraph>>>,
}

impl VersionManager {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition (and, recursively, the child definitions of its
    /// composite tasks) under its `(name, version)`
    pub fn register(&self, graph: Arc<WorkflowGraph>) {
        for task in &graph.tasks {
            match &task.kind {
                TaskKind::Composite { child } => self.register(child.clone()),
                TaskKind::DynamicComposite { children } => {
                    for child in children.values() {
                        self.register(child.clone());
                    }
                }
                _ => {}
            }
        }
        self.definitions
            .entry(graph.name.clone())
            .or_default()
            .insert(graph.version.clone(), graph);
    }

    /// Resolve one definition
    pub fn resolve(&self, name: &str, version: &str) -> EngineResult<Arc<WorkflowGraph>> {
        self.definitions
            .get(name)
            .and_then(|versions| versions.get(version).cloned())
            .ok_or_else(|| EngineError::VersionNotFound {
                workflow: name.to_owned(),
                version: version.to_owned(),
            })
    }

    /// The lexicographically greatest registered version of a workflow
    pub fn latest(&self, name: &str) -> Option<Arc<WorkflowGraph>> {
        self.definitions
            .get(name)
            .and_then(|versions| versions.values().next_back().cloned())
    }

    /// Registered versions of a workflow, in order
    pub fn versions(&self, name: &str) -> Vec<String> {
        self.definitions
            .get(name)
            .map(|versions| versions.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::definition::builder::{TaskBuilder, WorkflowBuilder};

    fn graph(version: &str) -> Arc<WorkflowGraph> {
        WorkflowBuilder::new("order")
            .start_condition("start")
            .end_condition("end")
            .task("review", TaskBuilder::new())
            .connect_condition("start", |c| c.task("review"))
            .connect_task("review", |t| t.condition("end"))
            .build(version)
            .unwrap()
    }

    #[test]
    fn resolves_by_name_and_version() {
        let manager = VersionManager::new();
        manager.register(graph("v1"));
        manager.register(graph("v2"));
        assert_eq!(manager.resolve("order", "v1").unwrap().version, "v1");
        assert_eq!(manager.latest("order").unwrap().version, "v2");
        assert_eq!(manager.versions("order"), vec!["v1", "v2"]);
        assert!(matches!(
            manager.resolve("order", "v9"),
            Err(EngineError::VersionNotFound { .. })
        ));
    }
}
