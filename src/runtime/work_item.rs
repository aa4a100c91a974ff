//! Work item rows
//!
//! A work item is one externally advanceable unit of work owned by a single
//! task generation. Its state machine is
//! `initialized -> started -> {completed | failed | canceled}` with one extra
//! edge, `started -> initialized`, reachable only through the reset action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::runtime::workflow::WorkflowId;

/// Unique identifier for a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemId(#[serde(with = "uuid::serde::compact")] pub Uuid);

impl WorkItemId {
    /// Generate a new work item id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Key segment form
    pub fn key(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for WorkItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Work item state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkItemState {
    /// Created, not yet picked up
    Initialized,
    /// In progress
    Started,
    /// Finished successfully
    Completed,
    /// Finished unsuccessfully
    Failed,
    /// Withdrawn
    Canceled,
}

impl WorkItemState {
    /// Whether this state admits no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkItemState::Completed | WorkItemState::Failed | WorkItemState::Canceled
        )
    }

    fn name(&self) -> &'static str {
        match self {
            WorkItemState::Initialized => "initialized",
            WorkItemState::Started => "started",
            WorkItemState::Completed => "completed",
            WorkItemState::Failed => "failed",
            WorkItemState::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for WorkItemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One work item row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItemRow {
    /// Work item id
    pub id: WorkItemId,
    /// Owning workflow instance
    pub workflow_id: WorkflowId,
    /// Owning task name
    pub task_name: String,
    /// Owning task generation
    pub generation: u32,
    /// Display name; defaults to the owning task name
    pub name: String,
    /// Current state
    pub state: WorkItemState,
    /// Lineage path of the owning task
    pub path: Vec<String>,
    /// Definition version of the owning workflow
    pub version: String,
    /// Caller-provided payload recorded at initialization
    pub payload: serde_json::Value,
    /// Monotonic creation sequence; orders "most recent" queries
    pub seq: u64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last state-change timestamp
    pub updated_at: DateTime<Utc>,
}

impl WorkItemRow {
    fn illegal(&self, to: WorkItemState) -> EngineError {
        EngineError::IllegalTransition {
            element: format!("work item {}", self.id),
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }

    /// `initialized -> started`
    pub fn start(&mut self) -> EngineResult<()> {
        match self.state {
            WorkItemState::Initialized => {
                self.state = WorkItemState::Started;
                self.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(self.illegal(WorkItemState::Started)),
        }
    }

    /// `started -> completed`
    pub fn complete(&mut self) -> EngineResult<()> {
        self.finish(WorkItemState::Completed)
    }

    /// `started -> failed`
    pub fn fail(&mut self) -> EngineResult<()> {
        self.finish(WorkItemState::Failed)
    }

    /// `started -> canceled` for callers; the engine may additionally cancel
    /// an `initialized` item during teardown
    pub fn cancel(&mut self, internal: bool) -> EngineResult<()> {
        if internal && self.state == WorkItemState::Initialized {
            self.state = WorkItemState::Canceled;
            self.updated_at = Utc::now();
            return Ok(());
        }
        self.finish(WorkItemState::Canceled)
    }

    /// `started -> initialized`, reachable only through the reset action
    pub fn reset(&mut self) -> EngineResult<()> {
        match self.state {
            WorkItemState::Started => {
                self.state = WorkItemState::Initialized;
                self.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(self.illegal(WorkItemState::Initialized)),
        }
    }

    fn finish(&mut self, to: WorkItemState) -> EngineResult<()> {
        match self.state {
            WorkItemState::Started => {
                self.state = to;
                self.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(self.illegal(to)),
        }
    }
}
