//! Activity hooks and their execution context
//!
//! Activities are user-supplied async callbacks invoked around lifecycle
//! transitions: `on_initialized` when a workflow row is written,
//! `on_enabled` when a task generation is created, and so on. They run
//! inside the engine's transaction and receive an [`ActivityCtx`] carrying
//! the transaction handle, the audit handle and the scheduler. Callbacks
//! must not hold the context beyond their own invocation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::audit::AuditEvent;
use crate::error::{EngineError, EngineResult};
use crate::runtime::cancellation::CancellationReason;
use crate::runtime::engine::Engine;
use crate::runtime::policy::ChildTransition;
use crate::runtime::queries;
use crate::runtime::stats::TaskStats;
use crate::runtime::task::TaskRef;
use crate::runtime::work_item::{WorkItemId, WorkItemRow};
use crate::runtime::workflow::{ExecutionMode, WorkflowId, WorkflowRef, WorkflowRow};
use crate::store::scheduler::{self, ScheduledFunctionId};
use crate::store::{ReadTxn, Txn};

/// Boxed activity callback
pub type ActivityHandler =
    Arc<dyn Fn(ActivityCtx) -> BoxFuture<'static, EngineResult<()>> + Send + Sync>;

/// Lift a plain async fn into an [`ActivityHandler`]
pub fn activity_handler<F, Fut>(f: F) -> ActivityHandler
where
    F: Fn(ActivityCtx) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = EngineResult<()>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Workflow-level lifecycle hooks
#[derive(Clone, Default)]
pub struct WorkflowActivities {
    /// Row written and start condition marked
    pub on_initialized: Option<ActivityHandler>,
    /// First task enablement
    pub on_started: Option<ActivityHandler>,
    /// End condition marked with no live task remaining
    pub on_completed: Option<ActivityHandler>,
    /// A task failure propagated to the workflow
    pub on_failed: Option<ActivityHandler>,
    /// Cancel action or teardown
    pub on_canceled: Option<ActivityHandler>,
}

/// Task-level lifecycle hooks
#[derive(Clone, Default)]
pub struct TaskActivities {
    /// Enablement withdrawn without the task having started
    pub on_disabled: Option<ActivityHandler>,
    /// Generation created; composite tasks typically initialize their child
    /// workflow(s) here
    pub on_enabled: Option<ActivityHandler>,
    /// First child created
    pub on_started: Option<ActivityHandler>,
    /// Task finalised and split fired
    pub on_completed: Option<ActivityHandler>,
    /// Policy returned fail
    pub on_failed: Option<ActivityHandler>,
    /// Cancel, cancellation region or teardown
    pub on_canceled: Option<ActivityHandler>,
    /// Any work item of this task changed state
    pub on_work_item_state_changed: Option<ActivityHandler>,
    /// Any child workflow of this composite task changed state
    pub on_workflow_state_changed: Option<ActivityHandler>,
}

/// Execution context handed to activities and action callbacks
#[derive(Clone)]
pub struct ActivityCtx {
    pub(crate) engine: Engine,
    pub(crate) txn: Txn,
    /// Workflow scope
    pub workflow: WorkflowRef,
    /// Task scope, when the hook fired at or below task level
    pub task: Option<TaskRef>,
    /// Work item scope, when the hook fired for a work item
    pub work_item: Option<WorkItemId>,
    /// Child workflow scope, for composite-task hooks
    pub child_workflow: Option<WorkflowId>,
    /// The child transition that triggered the hook, when any
    pub transition: Option<ChildTransition>,
    /// Cancellation reason, for cancel hooks
    pub reason: Option<CancellationReason>,
    /// Realized path of the raising scope
    pub path: Vec<String>,
    /// Set when the transition was engine bookkeeping rather than an
    /// explicit caller action
    pub is_internal_mutation: bool,
}

impl ActivityCtx {
    /// Read-only handle to the host store, scoped to this transaction
    pub fn store(&self) -> ReadTxn {
        ReadTxn::new(self.txn.clone())
    }

    /// Execution mode of the workflow scope
    pub fn mode(&self) -> ExecutionMode {
        self.workflow.mode
    }

    /// Append a structured audit event correlated to the current path.
    ///
    /// Events buffer on the transaction and reach the sink only after a
    /// successful commit.
    pub fn audit(&self, payload: serde_json::Value) {
        self.txn.push_audit(AuditEvent {
            workflow_id: self.workflow.id,
            path: self.path.clone(),
            task_name: self.task.as_ref().map(|t| t.name.clone()),
            work_item_id: self.work_item,
            payload,
            at: Utc::now(),
        });
    }

    /// Register a deferred host-function invocation under a de-duplication
    /// key; returns the existing id if the key is already bound.
    pub fn register_scheduled(
        &self,
        key: &str,
        function: &str,
        run_at: DateTime<Utc>,
        payload: serde_json::Value,
    ) -> EngineResult<ScheduledFunctionId> {
        scheduler::register_keyed(&self.txn, key, function, run_at, payload)
    }

    /// Initialize the child workflow of the composite task in scope
    pub async fn initialize_child_workflow(
        &self,
        payload: serde_json::Value,
    ) -> EngineResult<WorkflowId> {
        self.spawn_child(None, payload).await
    }

    /// Initialize one of the named child workflows of the dynamic composite
    /// task in scope
    pub async fn initialize_named_child_workflow(
        &self,
        name: &str,
        payload: serde_json::Value,
    ) -> EngineResult<WorkflowId> {
        self.spawn_child(Some(name), payload).await
    }

    async fn spawn_child(
        &self,
        name: Option<&str>,
        payload: serde_json::Value,
    ) -> EngineResult<WorkflowId> {
        let task = self.task_scope()?;
        self.engine
            .initialize_child_in_txn(self.txn.clone(), self.workflow.id, task, name, payload)
            .await
    }

    /// Work items of the task generation in scope, in creation order
    pub fn work_items(&self) -> EngineResult<Vec<WorkItemRow>> {
        let task = self.task_scope()?;
        queries::work_items_of(&self.txn, self.workflow.id, &task.name, task.generation)
    }

    /// Child workflows of the composite task generation in scope
    pub fn child_workflows(&self) -> EngineResult<Vec<WorkflowRow>> {
        let task = self.task_scope()?;
        queries::child_workflows_of(&self.txn, self.workflow.id, &task.name, task.generation)
    }

    /// Aggregated statistics of the task generation in scope
    pub fn stats(&self) -> EngineResult<TaskStats> {
        let task = self.task_scope()?;
        queries::aggregate_stats(&self.txn, self.workflow.id, &task.name, task.generation)
    }

    fn task_scope(&self) -> EngineResult<TaskRef> {
        self.task
            .clone()
            .ok_or_else(|| EngineError::Internal("hook has no task scope".into()))
    }
}
