//! Audit hook
//!
//! Activity callbacks receive an audit handle whose sole operation appends a
//! structured event correlated to the current workflow/task/work-item path.
//! The sink is an external collaborator; the engine buffers events on the
//! transaction and flushes them only after a successful commit, so an aborted
//! transaction emits nothing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::runtime::{WorkItemId, WorkflowId};

/// One audit event, correlated to the element that raised it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Workflow instance the event belongs to
    pub workflow_id: WorkflowId,
    /// Realized path of the raising element
    pub path: Vec<String>,
    /// Task name, when raised from a task or work-item scope
    pub task_name: Option<String>,
    /// Work item, when raised from a work-item scope
    pub work_item_id: Option<WorkItemId>,
    /// Caller-provided structured value; the engine does not interpret it
    pub payload: serde_json::Value,
    /// Event timestamp
    pub at: DateTime<Utc>,
}

/// Audit event sink
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one event
    async fn append(&self, event: AuditEvent) -> EngineResult<()>;
}

/// Sink that discards everything
#[derive(Debug, Default)]
pub struct NoopAudit;

#[async_trait]
impl AuditSink for NoopAudit {
    async fn append(&self, _event: AuditEvent) -> EngineResult<()> {
        Ok(())
    }
}

/// In-memory sink for tests and diagnostics
#[derive(Debug, Default)]
pub struct MemoryAudit {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAudit {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything appended so far
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAudit {
    async fn append(&self, event: AuditEvent) -> EngineResult<()> {
        self.events.lock().push(event);
        Ok(())
    }
}
