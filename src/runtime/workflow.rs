//! Workflow instance rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};

/// Unique identifier for a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(#[serde(with = "uuid::serde::compact")] pub Uuid);

impl WorkflowId {
    /// Generate a new workflow id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from string
    pub fn parse_str(s: &str) -> EngineResult<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| EngineError::Serialization(format!("invalid workflow id: {}", e)))
    }

    /// Key segment form
    pub fn key(&self) -> String {
        self.0.simple().to_string()
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Workflow execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkflowState {
    /// Row written, start condition marked, no task enabled yet
    Initialized,
    /// At least one task has been enabled
    Started,
    /// End condition marked with no live task remaining
    Completed,
    /// A task failure propagated to the workflow
    Failed,
    /// Cancel action, parent teardown or migration teardown
    Canceled,
}

impl WorkflowState {
    /// Whether this state admits no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Completed | WorkflowState::Failed | WorkflowState::Canceled
        )
    }

    fn name(&self) -> &'static str {
        match self {
            WorkflowState::Initialized => "initialized",
            WorkflowState::Started => "started",
            WorkflowState::Completed => "completed",
            WorkflowState::Failed => "failed",
            WorkflowState::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Execution mode of a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionMode {
    /// Regular execution
    Normal,
    /// Replay mode used while a migration rebuilds the instance
    FastForward,
}

/// Back-reference from a sub-workflow to its owning composite task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentRef {
    /// Parent workflow instance
    pub workflow_id: WorkflowId,
    /// Composite task name within the parent
    pub task_name: String,
    /// Composite task generation that created this child
    pub task_generation: u32,
}

/// One workflow instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRow {
    /// Instance id
    pub id: WorkflowId,
    /// Definition name
    pub name: String,
    /// Definition version the instance was created under
    pub version: String,
    /// Execution mode
    pub mode: ExecutionMode,
    /// Current state
    pub state: WorkflowState,
    /// Lineage of ancestor composite task names
    pub path: Vec<String>,
    /// Lineage with generation indices baked in; stable for the lifetime of
    /// the instance and unique across repeated enactments
    pub realized_path: Vec<String>,
    /// Owning composite task, for sub-workflows
    pub parent: Option<ParentRef>,
    /// Monotonic creation sequence
    pub seq: u64,
    /// Failure message, when failed
    pub failure: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last state-change timestamp
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRow {
    fn illegal(&self, to: WorkflowState) -> EngineError {
        EngineError::IllegalTransition {
            element: format!("workflow {}", self.id),
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }

    /// First task enablement moves the instance out of `initialized`
    pub fn start(&mut self) -> EngineResult<()> {
        match self.state {
            WorkflowState::Initialized => {
                self.state = WorkflowState::Started;
                self.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(self.illegal(WorkflowState::Started)),
        }
    }

    /// End condition marked and no live task remains
    pub fn complete(&mut self) -> EngineResult<()> {
        match self.state {
            WorkflowState::Initialized | WorkflowState::Started => {
                self.state = WorkflowState::Completed;
                self.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(self.illegal(WorkflowState::Completed)),
        }
    }

    /// A task failure propagated to the instance
    pub fn fail(&mut self, failure: String) -> EngineResult<()> {
        match self.state {
            WorkflowState::Initialized | WorkflowState::Started => {
                self.state = WorkflowState::Failed;
                self.failure = Some(failure);
                self.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(self.illegal(WorkflowState::Failed)),
        }
    }

    /// Cancel action, parent teardown or migration teardown
    pub fn cancel(&mut self) -> EngineResult<()> {
        match self.state {
            WorkflowState::Initialized | WorkflowState::Started => {
                self.state = WorkflowState::Canceled;
                self.updated_at = Utc::now();
                Ok(())
            }
            _ => Err(self.illegal(WorkflowState::Canceled)),
        }
    }
}

/// Identifying slice of a workflow row handed to callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRef {
    /// Instance id
    pub id: WorkflowId,
    /// Definition name
    pub name: String,
    /// Definition version
    pub version: String,
    /// Execution mode at the time the callback ran
    pub mode: ExecutionMode,
}

impl WorkflowRef {
    /// Build a reference from a row
    pub fn of(row: &WorkflowRow) -> Self {
        Self {
            id: row.id,
            name: row.name.clone(),
            version: row.version.clone(),
            mode: row.mode,
        }
    }
}
