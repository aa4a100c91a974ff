//! Task generation rows and the task state log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::runtime::workflow::WorkflowId;

/// Task execution state, per generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaskState {
    /// Latent; the join is not satisfied or enablement was withdrawn
    Disabled,
    /// Join satisfied, tokens consumed, waiting for work to begin
    Enabled,
    /// At least one child (work item or sub-workflow) exists
    Started,
    /// Finalised successfully; outgoing tokens were produced
    Completed,
    /// State-transition policy returned fail
    Failed,
    /// Cancel action, cancellation region or teardown
    Canceled,
}

impl TaskState {
    /// Whether this generation can never change state again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Canceled
        )
    }

    /// Whether this generation blocks re-enablement and workflow completion
    pub fn is_live(&self) -> bool {
        matches!(self, TaskState::Enabled | TaskState::Started)
    }

    fn name(&self) -> &'static str {
        match self {
            TaskState::Disabled => "disabled",
            TaskState::Enabled => "enabled",
            TaskState::Started => "started",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One task generation within one workflow instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRow {
    /// Owning workflow instance
    pub workflow_id: WorkflowId,
    /// Task name within the definition
    pub name: String,
    /// Generation counter; a new generation is created on each re-enablement
    pub generation: u32,
    /// Current state
    pub state: TaskState,
    /// Lineage of ancestor composite task names, ending in this task
    pub path: Vec<String>,
    /// Lineage with generation indices baked in
    pub realized_path: Vec<String>,
    /// Definition version of the owning workflow
    pub version: String,
    /// Monotonic creation sequence
    pub seq: u64,
    /// Number of state-log entries appended so far
    pub log_seq: u32,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last state-change timestamp
    pub updated_at: DateTime<Utc>,
}

impl TaskRow {
    fn illegal(&self, to: TaskState) -> EngineError {
        EngineError::IllegalTransition {
            element: format!("task {}[{}]", self.name, self.generation),
            from: self.state.to_string(),
            to: to.to_string(),
        }
    }

    /// Validate and apply one state transition
    pub fn transition(&mut self, to: TaskState) -> EngineResult<()> {
        let allowed = matches!(
            (self.state, to),
            (TaskState::Disabled, TaskState::Enabled)
                | (TaskState::Enabled, TaskState::Disabled)
                | (TaskState::Enabled, TaskState::Started)
                | (TaskState::Enabled, TaskState::Canceled)
                | (TaskState::Started, TaskState::Completed)
                | (TaskState::Started, TaskState::Failed)
                | (TaskState::Started, TaskState::Canceled)
        );
        if !allowed {
            return Err(self.illegal(to));
        }
        self.state = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Append-only record of one task state change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStateLogRow {
    /// Owning workflow instance
    pub workflow_id: WorkflowId,
    /// Task name
    pub task_name: String,
    /// Task generation
    pub generation: u32,
    /// Position within the generation's log
    pub entry: u32,
    /// State before the change
    pub from: TaskState,
    /// State after the change
    pub to: TaskState,
    /// When the change committed
    pub at: DateTime<Utc>,
}

/// Identifying slice of a task generation handed to callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRef {
    /// Task name
    pub name: String,
    /// Generation
    pub generation: u32,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn row(state: TaskState) -> TaskRow {
        TaskRow {
            workflow_id: WorkflowId::new(),
            name: "review".into(),
            generation: 0,
            state,
            path: vec!["review".into()],
            realized_path: vec!["review[0]".into()],
            version: "v1".into(),
            seq: 1,
            log_seq: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test_case(TaskState::Disabled, TaskState::Enabled, true; "disabled to enabled")]
    #[test_case(TaskState::Enabled, TaskState::Disabled, true; "enabled withdrawn")]
    #[test_case(TaskState::Enabled, TaskState::Started, true; "enabled to started")]
    #[test_case(TaskState::Started, TaskState::Completed, true; "started to completed")]
    #[test_case(TaskState::Started, TaskState::Failed, true; "started to failed")]
    #[test_case(TaskState::Started, TaskState::Canceled, true; "started to canceled")]
    #[test_case(TaskState::Completed, TaskState::Started, false; "terminal is final")]
    #[test_case(TaskState::Disabled, TaskState::Started, false; "no skip to started")]
    #[test_case(TaskState::Canceled, TaskState::Enabled, false; "re-enable needs a new generation")]
    fn transition_table(from: TaskState, to: TaskState, allowed: bool) {
        let mut task = row(from);
        assert_eq!(task.transition(to).is_ok(), allowed);
    }
}
