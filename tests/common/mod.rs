//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::json;
use tasquencer::{
    AuditSink, DocumentStore, Engine, WorkItemId, WorkflowId,
};

/// Engine over a throwaway store; the temp dir lives as long as the harness
pub struct Harness {
    pub engine: Engine,
    _dir: tempfile::TempDir,
}

/// Open an engine backed by a fresh temporary store
pub fn engine() -> Harness {
    engine_with_audit(Arc::new(tasquencer::NoopAudit))
}

/// Open an engine with an explicit audit sink
pub fn engine_with_audit(audit: Arc<dyn AuditSink>) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = DocumentStore::open(dir.path()).expect("open store");
    let engine = Engine::builder(store).with_audit(audit).build();
    Harness { engine, _dir: dir }
}

/// Drive one work item of `task` through initialize, start and complete
pub async fn run_work_item(engine: &Engine, workflow: WorkflowId, task: &str) -> WorkItemId {
    complete_work_item_with(engine, workflow, task, json!({})).await
}

/// Same, with an explicit completion payload
pub async fn complete_work_item_with(
    engine: &Engine,
    workflow: WorkflowId,
    task: &str,
    payload: serde_json::Value,
) -> WorkItemId {
    let item = engine
        .initialize_work_item(workflow, task, json!({}))
        .await
        .expect("initialize work item");
    engine
        .start_work_item(item, json!({}))
        .await
        .expect("start work item");
    engine
        .complete_work_item(item, payload)
        .await
        .expect("complete work item");
    item
}
