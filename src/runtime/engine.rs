//! The runtime engine
//!
//! Every public operation runs as one retryable transaction against the
//! document store: rows are read and written through a [`Txn`] overlay, user
//! callbacks (activities, routers, action callbacks) await inside the
//! transaction, and a conflicting commit retries the whole operation.
//!
//! The firing loop: producing a token into a condition makes its consuming
//! tasks candidates for enablement. Enabling a task consumes tokens
//! according to its join type, opens a new generation, and (for dummy tasks)
//! finalises immediately. A finalising task applies its cancellation region,
//! selects outgoing conditions according to its split type (consulting the
//! XOR/OR router), and produces tokens, which cascades until the instance
//! reaches a fixed point.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::audit::{AuditSink, NoopAudit};
use crate::definition::graph::{JoinType, SplitType, TaskIdx, TaskKind, WorkflowGraph};
use crate::definition::version::VersionManager;
use crate::error::{EngineError, EngineResult};
use crate::runtime::activities::{ActivityCtx, ActivityHandler};
use crate::runtime::actions::{ActionDef, WorkItemActionKind};
use crate::runtime::cancellation::CancellationReason;
use crate::runtime::condition::ConditionRow;
use crate::runtime::policy::{ChildState, ChildTransition, PolicyDecision};
use crate::runtime::queries;
use crate::runtime::router::{Router, RouterCtx};
use crate::runtime::stats::{StatsEvent, TaskStats};
use crate::runtime::task::{TaskRef, TaskRow, TaskState, TaskStateLogRow};
use crate::runtime::work_item::{WorkItemId, WorkItemRow, WorkItemState};
use crate::runtime::workflow::{
    ExecutionMode, ParentRef, WorkflowId, WorkflowRef, WorkflowRow, WorkflowState,
};
use crate::store::scheduler::{self, ScheduledFunctionRow};
use crate::store::{DocumentStore, Table, Txn};

/// Iteration guard for the enablement loop; a well-formed net reaches its
/// fixed point long before this.
const MAX_FIRING_ROUNDS: u32 = 10_000;

/// Engine tuning knobs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How many times a conflicted transaction is retried before the
    /// conflict surfaces to the caller
    pub txn_retry_limit: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { txn_retry_limit: 8 }
    }
}

/// One deferred host-function invocation being run
pub struct ScheduledInvocation {
    /// Engine handle for dispatching follow-up actions
    pub engine: Engine,
    /// Payload recorded at registration
    pub payload: Value,
}

/// Boxed host function invocable through the scheduler
pub type ScheduledFn =
    Arc<dyn Fn(ScheduledInvocation) -> BoxFuture<'static, EngineResult<()>> + Send + Sync>;

/// Lift a plain async fn into a [`ScheduledFn`]
pub fn scheduled_fn<F, Fut>(f: F) -> ScheduledFn
where
    F: Fn(ScheduledInvocation) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = EngineResult<()>> + Send + 'static,
{
    Arc::new(move |invocation| Box::pin(f(invocation)))
}

pub(crate) struct EngineInner {
    pub(crate) store: DocumentStore,
    pub(crate) versions: Arc<VersionManager>,
    pub(crate) audit: Arc<dyn AuditSink>,
    pub(crate) config: EngineConfig,
    pub(crate) scheduled: DashMap<String, ScheduledFn>,
}

/// The workflow engine
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<EngineInner>,
}

/// Builder for [`Engine`]
pub struct EngineBuilder {
    store: DocumentStore,
    versions: Arc<VersionManager>,
    audit: Arc<dyn AuditSink>,
    config: EngineConfig,
}

impl EngineBuilder {
    /// Use a shared definition registry
    pub fn with_versions(mut self, versions: Arc<VersionManager>) -> Self {
        self.versions = versions;
        self
    }

    /// Attach an audit sink
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Override the default configuration
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a definition before building
    pub fn register(self, graph: Arc<WorkflowGraph>) -> Self {
        self.versions.register(graph);
        self
    }

    /// Finish
    pub fn build(self) -> Engine {
        Engine {
            inner: Arc::new(EngineInner {
                store: self.store,
                versions: self.versions,
                audit: self.audit,
                config: self.config,
                scheduled: DashMap::new(),
            }),
        }
    }
}

pub(crate) struct NewWorkflowSpec {
    pub graph: Arc<WorkflowGraph>,
    pub parent: Option<ParentRef>,
    pub path: Vec<String>,
    pub realized_path: Vec<String>,
    pub mode: ExecutionMode,
}

impl Engine {
    /// Start building an engine over a store
    pub fn builder(store: DocumentStore) -> EngineBuilder {
        EngineBuilder {
            store,
            versions: Arc::new(VersionManager::new()),
            audit: Arc::new(NoopAudit),
            config: EngineConfig::default(),
        }
    }

    /// The definition registry
    pub fn versions(&self) -> &VersionManager {
        &self.inner.versions
    }

    /// Register a host function invocable through the scheduler
    pub fn register_scheduled_function(&self, name: impl Into<String>, function: ScheduledFn) {
        self.inner.scheduled.insert(name.into(), function);
    }

    // ------------------------------------------------------------------
    // Workflow actions
    // ------------------------------------------------------------------

    /// Initialize a new workflow instance: validate the payload, write the
    /// row, run the initialize action callback and `on_initialized`, mark
    /// the start condition and fire the net to its first fixed point.
    pub async fn initialize_workflow(
        &self,
        name: &str,
        version: &str,
        payload: Value,
    ) -> EngineResult<WorkflowId> {
        let graph = self.inner.versions.resolve(name, version)?;
        let this = self.clone();
        self.with_txn(move |txn| {
            let this = this.clone();
            let graph = graph.clone();
            let payload = payload.clone();
            Box::pin(async move {
                let spec = NewWorkflowSpec {
                    graph,
                    parent: None,
                    path: Vec::new(),
                    realized_path: Vec::new(),
                    mode: ExecutionMode::Normal,
                };
                let id = this.create_workflow(&txn, spec, Some(payload)).await?;
                this.kick_workflow(&txn, id).await?;
                Ok(id)
            })
        })
        .await
    }

    /// Cancel a workflow instance with reason `explicit`
    pub async fn cancel_workflow(&self, id: WorkflowId, payload: Value) -> EngineResult<()> {
        let this = self.clone();
        self.with_txn(move |txn| {
            let this = this.clone();
            let payload = payload.clone();
            Box::pin(async move {
                let wf = queries::workflow_row(&txn, id)?;
                if wf.state.is_terminal() {
                    return Err(EngineError::IllegalTransition {
                        element: format!("workflow {}", id),
                        from: wf.state.to_string(),
                        to: WorkflowState::Canceled.to_string(),
                    });
                }
                let graph = this.resolve_graph(&wf)?;
                let verified = (graph.actions.cancel.validator)(&payload)?;
                if let Some(callback) = &graph.actions.cancel.callback {
                    let mut ctx = this.ctx(&txn, &wf);
                    ctx.reason = Some(CancellationReason::Explicit);
                    callback(ctx, verified).await?;
                }
                this.cancel_workflow_inner(&txn, id, CancellationReason::Explicit, true)
                    .await
            })
        })
        .await
    }

    // ------------------------------------------------------------------
    // Work item actions
    // ------------------------------------------------------------------

    /// Initialize a work item under a task that is enabled or started
    pub async fn initialize_work_item(
        &self,
        workflow: WorkflowId,
        task: &str,
        payload: Value,
    ) -> EngineResult<WorkItemId> {
        let this = self.clone();
        let task = task.to_owned();
        self.with_txn(move |txn| {
            let this = this.clone();
            let task = task.clone();
            let payload = payload.clone();
            Box::pin(
                async move { this.initialize_work_item_in_txn(&txn, workflow, &task, payload).await },
            )
        })
        .await
    }

    /// Dispatch one of the non-initialize work item actions
    pub async fn work_item_action(
        &self,
        kind: WorkItemActionKind,
        item: WorkItemId,
        payload: Value,
    ) -> EngineResult<()> {
        if kind == WorkItemActionKind::Initialize {
            return Err(EngineError::UnknownElement(
                "initialize dispatches through initialize_work_item".into(),
            ));
        }
        let this = self.clone();
        self.with_txn(move |txn| {
            let this = this.clone();
            let payload = payload.clone();
            Box::pin(async move {
                this.work_item_transition(&txn, item, kind, Some(payload), false, None, true)
                    .await
            })
        })
        .await
    }

    /// `initialized -> started`
    pub async fn start_work_item(&self, item: WorkItemId, payload: Value) -> EngineResult<()> {
        self.work_item_action(WorkItemActionKind::Start, item, payload)
            .await
    }

    /// `started -> completed`
    pub async fn complete_work_item(&self, item: WorkItemId, payload: Value) -> EngineResult<()> {
        self.work_item_action(WorkItemActionKind::Complete, item, payload)
            .await
    }

    /// `started -> failed`
    pub async fn fail_work_item(&self, item: WorkItemId, payload: Value) -> EngineResult<()> {
        self.work_item_action(WorkItemActionKind::Fail, item, payload)
            .await
    }

    /// `started -> canceled`
    pub async fn cancel_work_item(&self, item: WorkItemId, payload: Value) -> EngineResult<()> {
        self.work_item_action(WorkItemActionKind::Cancel, item, payload)
            .await
    }

    /// `started -> initialized` without opening a new generation
    pub async fn reset_work_item(&self, item: WorkItemId, payload: Value) -> EngineResult<()> {
        self.work_item_action(WorkItemActionKind::Reset, item, payload)
            .await
    }

    /// Cancel the live generation of a task with reason `explicit`
    pub async fn cancel_task(&self, workflow: WorkflowId, task: &str) -> EngineResult<()> {
        let this = self.clone();
        let task = task.to_owned();
        self.with_txn(move |txn| {
            let this = this.clone();
            let task = task.clone();
            Box::pin(async move {
                let latest = queries::latest_task_generation(&txn, workflow, &task)?;
                let row = match latest {
                    Some(row) if row.state.is_live() => row,
                    Some(row) => {
                        return Err(EngineError::IllegalTransition {
                            element: format!("task {}", task),
                            from: row.state.to_string(),
                            to: TaskState::Canceled.to_string(),
                        })
                    }
                    None => return Err(EngineError::EntityNotFound(format!("task {}", task))),
                };
                this.cancel_task_generation(
                    &txn,
                    workflow,
                    &row.name,
                    row.generation,
                    CancellationReason::Explicit,
                )
                .await?;
                this.complete_workflow_if_ready(&txn, workflow).await
            })
        })
        .await
    }

    // ------------------------------------------------------------------
    // Scheduler
    // ------------------------------------------------------------------

    /// Run every deferred invocation due at or before `now`; returns how
    /// many ran
    pub async fn run_due(&self, now: DateTime<Utc>) -> EngineResult<usize> {
        let this = self.clone();
        let due: Vec<ScheduledFunctionRow> = self
            .with_txn(move |txn| {
                let this = this.clone();
                Box::pin(async move {
                    let due = scheduler::take_due(&txn, now)?;
                    for row in &due {
                        if !this.inner.scheduled.contains_key(&row.name) {
                            return Err(EngineError::Scheduler(format!(
                                "unknown scheduled function {}",
                                row.name
                            )));
                        }
                    }
                    Ok(due)
                })
            })
            .await?;
        let count = due.len();
        for row in due {
            let function = self
                .inner
                .scheduled
                .get(&row.name)
                .map(|f| f.value().clone())
                .ok_or_else(|| {
                    EngineError::Scheduler(format!("unknown scheduled function {}", row.name))
                })?;
            function(ScheduledInvocation {
                engine: self.clone(),
                payload: row.payload,
            })
            .await?;
        }
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Read surface
    // ------------------------------------------------------------------

    /// Load a workflow row
    pub fn workflow(&self, id: WorkflowId) -> EngineResult<WorkflowRow> {
        queries::workflow_row(&self.inner.store.begin(), id)
    }

    /// Current marking of a condition
    pub fn marking(&self, workflow: WorkflowId, condition: &str) -> EngineResult<u64> {
        Ok(queries::condition_row(&self.inner.store.begin(), workflow, condition)?.marking)
    }

    /// All generations of a task, oldest first
    pub fn task_generations(&self, workflow: WorkflowId, task: &str) -> EngineResult<Vec<TaskRow>> {
        queries::task_generations(&self.inner.store.begin(), workflow, task)
    }

    /// The newest generation of a task, if any
    pub fn latest_generation(
        &self,
        workflow: WorkflowId,
        task: &str,
    ) -> EngineResult<Option<TaskRow>> {
        queries::latest_task_generation(&self.inner.store.begin(), workflow, task)
    }

    /// Load one work item row
    pub fn work_item(&self, id: WorkItemId) -> EngineResult<WorkItemRow> {
        queries::work_item_row(&self.inner.store.begin(), id)
    }

    /// Work items of one task generation, in creation order
    pub fn work_items_of(
        &self,
        workflow: WorkflowId,
        task: &str,
        generation: u32,
    ) -> EngineResult<Vec<WorkItemRow>> {
        queries::work_items_of(&self.inner.store.begin(), workflow, task, generation)
    }

    /// Child workflows of one composite task generation
    pub fn child_workflows(
        &self,
        workflow: WorkflowId,
        task: &str,
        generation: u32,
    ) -> EngineResult<Vec<WorkflowRow>> {
        queries::child_workflows_of(&self.inner.store.begin(), workflow, task, generation)
    }

    /// Aggregated statistics of one task generation
    pub fn aggregate_stats(
        &self,
        workflow: WorkflowId,
        task: &str,
        generation: u32,
    ) -> EngineResult<TaskStats> {
        queries::aggregate_stats(&self.inner.store.begin(), workflow, task, generation)
    }

    /// State log of one task generation, in append order
    pub fn task_state_log(
        &self,
        workflow: WorkflowId,
        task: &str,
        generation: u32,
    ) -> EngineResult<Vec<TaskStateLogRow>> {
        queries::task_state_log(&self.inner.store.begin(), workflow, task, generation)
    }

    // ------------------------------------------------------------------
    // Transaction plumbing
    // ------------------------------------------------------------------

    pub(crate) async fn with_txn<T, F>(&self, op: F) -> EngineResult<T>
    where
        F: Fn(Txn) -> BoxFuture<'static, EngineResult<T>>,
    {
        let mut attempt = 0;
        loop {
            let txn = self.inner.store.begin();
            let value = op(txn.clone()).await?;
            match txn.commit() {
                Ok(events) => {
                    for event in events {
                        self.inner.audit.append(event).await?;
                    }
                    return Ok(value);
                }
                Err(EngineError::TxnConflict) if attempt < self.inner.config.txn_retry_limit => {
                    attempt += 1;
                    tracing::debug!(attempt, "transaction conflict, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub(crate) fn resolve_graph(&self, row: &WorkflowRow) -> EngineResult<Arc<WorkflowGraph>> {
        self.inner.versions.resolve(&row.name, &row.version)
    }

    fn ctx(&self, txn: &Txn, wf: &WorkflowRow) -> ActivityCtx {
        ActivityCtx {
            engine: self.clone(),
            txn: txn.clone(),
            workflow: WorkflowRef::of(wf),
            task: None,
            work_item: None,
            child_workflow: None,
            transition: None,
            reason: None,
            path: wf.realized_path.clone(),
            is_internal_mutation: false,
        }
    }

    fn task_ctx(&self, txn: &Txn, wf: &WorkflowRow, task: &TaskRow) -> ActivityCtx {
        let mut ctx = self.ctx(txn, wf);
        ctx.task = Some(TaskRef {
            name: task.name.clone(),
            generation: task.generation,
        });
        ctx.path = task.realized_path.clone();
        ctx
    }

    async fn fire(&self, handler: &Option<ActivityHandler>, ctx: ActivityCtx) -> EngineResult<()> {
        if let Some(handler) = handler {
            handler(ctx).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Instance creation and the firing loop
    // ------------------------------------------------------------------

    /// Write a new workflow row and its condition rows. With a payload the
    /// initialization is "natural": the initialize action callback and
    /// `on_initialized` run. Migration passes `None` and drives the rest
    /// itself.
    pub(crate) fn create_workflow<'a>(
        &'a self,
        txn: &'a Txn,
        spec: NewWorkflowSpec,
        payload: Option<Value>,
    ) -> BoxFuture<'a, EngineResult<WorkflowId>> {
        Box::pin(async move {
            let id = WorkflowId::new();
            let now = Utc::now();
            let row = WorkflowRow {
                id,
                name: spec.graph.name.clone(),
                version: spec.graph.version.clone(),
                mode: spec.mode,
                state: WorkflowState::Initialized,
                path: spec.path,
                realized_path: spec.realized_path,
                parent: spec.parent.clone(),
                seq: txn.next_seq(),
                failure: None,
                created_at: now,
                updated_at: now,
            };
            queries::put_workflow(txn, &row)?;
            if let Some(parent) = &spec.parent {
                txn.put(
                    Table::WorkflowsByParent,
                    &queries::child_index_key(
                        parent.workflow_id,
                        &parent.task_name,
                        parent.task_generation,
                        id,
                    ),
                    &id,
                )?;
            }
            for condition in &spec.graph.conditions {
                queries::put_condition(
                    txn,
                    &ConditionRow {
                        workflow_id: id,
                        name: condition.name.clone(),
                        implicit: condition.implicit,
                        marking: 0,
                        seq: txn.next_seq(),
                    },
                )?;
            }
            tracing::info!(workflow = %id, name = %row.name, version = %row.version, "workflow initialized");
            if let Some(payload) = payload {
                let verified = (spec.graph.actions.initialize.validator)(&payload)?;
                if let Some(callback) = &spec.graph.actions.initialize.callback {
                    callback(self.ctx(txn, &row), verified).await?;
                }
                self.fire(&spec.graph.activities.on_initialized, self.ctx(txn, &row))
                    .await?;
            }
            Ok(id)
        })
    }

    /// Mark the start condition and fire the net
    pub(crate) fn kick_workflow<'a>(
        &'a self,
        txn: &'a Txn,
        id: WorkflowId,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            let wf = queries::workflow_row(txn, id)?;
            let graph = self.resolve_graph(&wf)?;
            let start = graph.condition_node(graph.start).name.clone();
            self.produce(txn, id, &start, 1)?;
            self.pump_workflow(txn, id).await
        })
    }

    pub(crate) fn produce(
        &self,
        txn: &Txn,
        workflow: WorkflowId,
        condition: &str,
        n: u64,
    ) -> EngineResult<()> {
        let mut row = queries::condition_row(txn, workflow, condition)?;
        row.produce(n);
        queries::put_condition(txn, &row)
    }

    /// Drive the enablement loop to a fixed point, then check for workflow
    /// completion
    pub(crate) fn pump_workflow<'a>(
        &'a self,
        txn: &'a Txn,
        id: WorkflowId,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            let mut rounds = 0;
            loop {
                let wf = queries::workflow_row(txn, id)?;
                if wf.state.is_terminal() {
                    return Ok(());
                }
                let graph = self.resolve_graph(&wf)?;
                let mut changed = false;
                for idx in 0..graph.tasks.len() {
                    if self.try_enable(txn, &graph, id, TaskIdx(idx)).await? {
                        changed = true;
                    }
                }
                if !changed {
                    break;
                }
                rounds += 1;
                if rounds > MAX_FIRING_ROUNDS {
                    return Err(EngineError::Internal(format!(
                        "workflow {} did not reach a firing fixed point",
                        id
                    )));
                }
            }
            self.complete_workflow_if_ready(txn, id).await
        })
    }

    /// Enable one task if its join is satisfied and no generation is live
    fn try_enable<'a>(
        &'a self,
        txn: &'a Txn,
        graph: &'a WorkflowGraph,
        workflow: WorkflowId,
        task: TaskIdx,
    ) -> BoxFuture<'a, EngineResult<bool>> {
        Box::pin(async move {
            let node = graph.task_node(task);
            let latest = queries::latest_task_generation(txn, workflow, &node.name)?;
            if latest.as_ref().map(|t| t.state.is_live()).unwrap_or(false) {
                return Ok(false);
            }
            let incoming = graph.incoming_conditions(task);
            if incoming.is_empty() {
                return Ok(false);
            }
            let mut marked = Vec::new();
            for cond in &incoming {
                let name = &graph.condition_node(*cond).name;
                if queries::condition_row(txn, workflow, name)?.marking >= 1 {
                    marked.push(*cond);
                }
            }
            let to_consume = match node.join {
                JoinType::And => {
                    if marked.len() < incoming.len() {
                        return Ok(false);
                    }
                    incoming
                }
                JoinType::Xor => match marked.first() {
                    // Ties break deterministically by declaration order.
                    Some(first) => vec![*first],
                    None => return Ok(false),
                },
                JoinType::Or => {
                    if marked.is_empty() {
                        return Ok(false);
                    }
                    marked
                }
            };
            for cond in to_consume {
                let name = graph.condition_node(cond).name.clone();
                let mut row = queries::condition_row(txn, workflow, &name)?;
                row.consume(1)?;
                queries::put_condition(txn, &row)?;
            }

            let mut wf = queries::workflow_row(txn, workflow)?;
            let generation = latest.map(|t| t.generation + 1).unwrap_or(0);
            let now = Utc::now();
            let mut row = TaskRow {
                workflow_id: workflow,
                name: node.name.clone(),
                generation,
                state: TaskState::Enabled,
                path: wf.path.iter().cloned().chain([node.name.clone()]).collect(),
                realized_path: wf
                    .realized_path
                    .iter()
                    .cloned()
                    .chain([format!("{}[{}]", node.name, generation)])
                    .collect(),
                version: wf.version.clone(),
                seq: txn.next_seq(),
                log_seq: 0,
                created_at: now,
                updated_at: now,
            };
            queries::append_task_log(txn, &mut row, TaskState::Disabled, TaskState::Enabled)?;
            queries::put_task(txn, &row)?;
            tracing::debug!(workflow = %workflow, task = %node.name, generation, "task enabled");

            if wf.state == WorkflowState::Initialized {
                wf.start()?;
                queries::put_workflow(txn, &wf)?;
                self.fire(&graph.activities.on_started, self.ctx(txn, &wf))
                    .await?;
                self.notify_parent(txn, workflow, Some(ChildState::Initialized), ChildState::Started)
                    .await?;
            }

            match &node.kind {
                TaskKind::Dummy => {
                    self.fire(&node.activities.on_enabled, self.task_ctx(txn, &wf, &row))
                        .await?;
                    let mut task_row = queries::task_row(txn, workflow, &node.name, generation)?;
                    task_row.transition(TaskState::Started)?;
                    queries::append_task_log(txn, &mut task_row, TaskState::Enabled, TaskState::Started)?;
                    queries::put_task(txn, &task_row)?;
                    self.fire(
                        &node.activities.on_started,
                        self.task_ctx(txn, &wf, &task_row),
                    )
                    .await?;
                    self.finalize_task(txn, workflow, &node.name, generation).await?;
                }
                TaskKind::Composite { .. } => {
                    if let Some(handler) = &node.activities.on_enabled {
                        handler(self.task_ctx(txn, &wf, &row)).await?;
                    } else {
                        // Stock behaviour: one child workflow per enablement.
                        let task_ref = TaskRef {
                            name: node.name.clone(),
                            generation,
                        };
                        self.initialize_child_in_txn(
                            txn.clone(),
                            workflow,
                            task_ref,
                            None,
                            Value::Object(Default::default()),
                        )
                        .await?;
                    }
                }
                _ => {
                    self.fire(&node.activities.on_enabled, self.task_ctx(txn, &wf, &row))
                        .await?;
                }
            }
            Ok(true)
        })
    }

    // ------------------------------------------------------------------
    // Work item transitions
    // ------------------------------------------------------------------

    async fn initialize_work_item_in_txn(
        &self,
        txn: &Txn,
        workflow: WorkflowId,
        task: &str,
        payload: Value,
    ) -> EngineResult<WorkItemId> {
        let wf = queries::workflow_row(txn, workflow)?;
        if wf.state.is_terminal() {
            return Err(EngineError::IllegalTransition {
                element: format!("workflow {}", workflow),
                from: wf.state.to_string(),
                to: "accepting work".into(),
            });
        }
        let graph = self.resolve_graph(&wf)?;
        let t_idx = graph
            .task(task)
            .ok_or_else(|| EngineError::UnknownElement(task.to_owned()))?;
        let node = graph.task_node(t_idx);
        if !matches!(node.kind, TaskKind::WorkItem) {
            return Err(EngineError::UnknownElement(format!(
                "task {} hosts no work items",
                task
            )));
        }
        let mut task_row = queries::latest_task_generation(txn, workflow, task)?
            .ok_or_else(|| EngineError::EntityNotFound(format!("task {}", task)))?;
        if !task_row.state.is_live() {
            return Err(EngineError::IllegalTransition {
                element: format!("task {}", task),
                from: task_row.state.to_string(),
                to: "accepting work".into(),
            });
        }
        let verified = (node.actions.initialize.validator)(&payload)?;
        if task_row.state == TaskState::Enabled {
            task_row.transition(TaskState::Started)?;
            queries::append_task_log(txn, &mut task_row, TaskState::Enabled, TaskState::Started)?;
            queries::put_task(txn, &task_row)?;
            self.fire(
                &node.activities.on_started,
                self.task_ctx(txn, &wf, &task_row),
            )
            .await?;
        }

        let id = WorkItemId::new();
        let now = Utc::now();
        let item = WorkItemRow {
            id,
            workflow_id: workflow,
            task_name: task.to_owned(),
            generation: task_row.generation,
            name: task.to_owned(),
            state: WorkItemState::Initialized,
            path: task_row.path.clone(),
            version: wf.version.clone(),
            payload: verified.clone(),
            seq: txn.next_seq(),
            created_at: now,
            updated_at: now,
        };
        queries::put_work_item(txn, &item)?;
        txn.put(
            Table::WorkItemsByTask,
            &queries::work_item_index_key(workflow, task, task_row.generation, id),
            &id,
        )?;
        queries::record_stats_event(
            txn,
            workflow,
            task,
            task_row.generation,
            node.stats_shard_count,
            id.0.as_bytes(),
            StatsEvent::Initialized,
        )?;
        tracing::debug!(workflow = %workflow, task = %task, item = %id, "work item initialized");

        if let Some(callback) = &node.actions.initialize.callback {
            let mut ctx = self.task_ctx(txn, &wf, &task_row);
            ctx.work_item = Some(id);
            ctx.path.push(item.name.clone());
            callback(ctx, verified).await?;
        }
        let mut ctx = self.task_ctx(txn, &wf, &task_row);
        ctx.work_item = Some(id);
        ctx.transition = Some(ChildTransition {
            prev: None,
            next: ChildState::Initialized,
        });
        self.fire(&node.activities.on_work_item_state_changed, ctx).await?;
        self.apply_policy(
            txn,
            workflow,
            task,
            task_row.generation,
            ChildTransition {
                prev: None,
                next: ChildState::Initialized,
            },
        )
        .await?;
        Ok(id)
    }

    /// Drive one non-initialize work item transition: validate the payload
    /// and the state edge, write the row, count the event, run the action
    /// callback and hooks, then consult the owning task's policy.
    pub(crate) fn work_item_transition<'a>(
        &'a self,
        txn: &'a Txn,
        item: WorkItemId,
        kind: WorkItemActionKind,
        payload: Option<Value>,
        internal: bool,
        reason: Option<CancellationReason>,
        notify_policy: bool,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            let mut row = queries::work_item_row(txn, item)?;
            let wf = queries::workflow_row(txn, row.workflow_id)?;
            let graph = self.resolve_graph(&wf)?;
            let t_idx = graph
                .task(&row.task_name)
                .ok_or_else(|| EngineError::UnknownElement(row.task_name.clone()))?;
            let node = graph.task_node(t_idx);
            let def: &ActionDef = match kind {
                WorkItemActionKind::Start => &node.actions.start,
                WorkItemActionKind::Complete => &node.actions.complete,
                WorkItemActionKind::Fail => &node.actions.fail,
                WorkItemActionKind::Cancel => &node.actions.cancel,
                WorkItemActionKind::Reset => &node.actions.reset,
                WorkItemActionKind::Initialize => {
                    return Err(EngineError::UnknownElement("initialize".into()))
                }
            };
            let verified = match (&payload, internal) {
                (Some(payload), false) => (def.validator)(payload)?,
                (Some(payload), true) => payload.clone(),
                (None, _) => Value::Null,
            };
            let prev = row.state;
            match kind {
                WorkItemActionKind::Start => row.start()?,
                WorkItemActionKind::Complete => row.complete()?,
                WorkItemActionKind::Fail => row.fail()?,
                WorkItemActionKind::Cancel => row.cancel(internal)?,
                WorkItemActionKind::Reset => row.reset()?,
                WorkItemActionKind::Initialize => unreachable!("handled above"),
            }
            if kind == WorkItemActionKind::Complete && !internal && !verified.is_null() {
                // Completion records its result payload on the item, so
                // routers reading the most recent child see the latest
                // decision.
                row.payload = verified.clone();
            }
            queries::put_work_item(txn, &row)?;
            let event = match kind {
                WorkItemActionKind::Start => StatsEvent::Started,
                WorkItemActionKind::Complete => StatsEvent::Completed,
                WorkItemActionKind::Fail => StatsEvent::Failed,
                WorkItemActionKind::Cancel => StatsEvent::Canceled {
                    before_start: prev == WorkItemState::Initialized,
                },
                WorkItemActionKind::Reset => StatsEvent::Reset,
                WorkItemActionKind::Initialize => unreachable!("handled above"),
            };
            queries::record_stats_event(
                txn,
                row.workflow_id,
                &row.task_name,
                row.generation,
                node.stats_shard_count,
                row.id.0.as_bytes(),
                event,
            )?;
            tracing::debug!(
                workflow = %row.workflow_id,
                task = %row.task_name,
                item = %item,
                action = %kind,
                from = %prev,
                to = %row.state,
                "work item transition"
            );

            let task_row = queries::task_row(txn, row.workflow_id, &row.task_name, row.generation)?;
            if let Some(callback) = &def.callback {
                let mut ctx = self.task_ctx(txn, &wf, &task_row);
                ctx.work_item = Some(item);
                ctx.path.push(row.name.clone());
                ctx.is_internal_mutation = internal;
                ctx.reason = reason;
                callback(ctx, verified).await?;
            }
            let transition = ChildTransition {
                prev: Some(prev.into()),
                next: row.state.into(),
            };
            let mut ctx = self.task_ctx(txn, &wf, &task_row);
            ctx.work_item = Some(item);
            ctx.transition = Some(transition);
            ctx.is_internal_mutation = internal;
            ctx.reason = reason;
            self.fire(&node.activities.on_work_item_state_changed, ctx).await?;

            if notify_policy && task_row.state.is_live() {
                self.apply_policy(txn, row.workflow_id, &row.task_name, row.generation, transition)
                    .await?;
            }
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Policy, finalisation, failure, cancellation
    // ------------------------------------------------------------------

    fn apply_policy<'a>(
        &'a self,
        txn: &'a Txn,
        workflow: WorkflowId,
        task: &'a str,
        generation: u32,
        transition: ChildTransition,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            let wf = queries::workflow_row(txn, workflow)?;
            let graph = self.resolve_graph(&wf)?;
            let t_idx = graph
                .task(task)
                .ok_or_else(|| EngineError::UnknownElement(task.to_owned()))?;
            let node = graph.task_node(t_idx);
            let stats = queries::aggregate_stats(txn, workflow, task, generation)?;
            let decision = (node.policy)(&transition, &stats)?;
            match decision {
                PolicyDecision::Continue => Ok(()),
                PolicyDecision::Complete => {
                    self.finalize_task(txn, workflow, task, generation).await?;
                    self.pump_workflow(txn, workflow).await
                }
                PolicyDecision::Fail => self.fail_task(txn, workflow, task, generation).await,
            }
        })
    }

    /// Complete a task generation: apply its cancellation region, run
    /// `on_completed`, and fire its split
    pub(crate) fn finalize_task<'a>(
        &'a self,
        txn: &'a Txn,
        workflow: WorkflowId,
        task: &'a str,
        generation: u32,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            let wf = queries::workflow_row(txn, workflow)?;
            let graph = self.resolve_graph(&wf)?;
            let t_idx = graph
                .task(task)
                .ok_or_else(|| EngineError::UnknownElement(task.to_owned()))?;
            let node = graph.task_node(t_idx);
            let mut row = queries::task_row(txn, workflow, task, generation)?;
            let prev = row.state;
            row.transition(TaskState::Completed)?;
            queries::append_task_log(txn, &mut row, prev, TaskState::Completed)?;
            queries::put_task(txn, &row)?;
            tracing::debug!(workflow = %workflow, task = %task, generation, "task completed");

            self.apply_cancellation_region(txn, workflow, t_idx, &graph).await?;
            self.fire(&node.activities.on_completed, self.task_ctx(txn, &wf, &row))
                .await?;
            self.run_split(txn, workflow, t_idx, &graph, generation).await
        })
    }

    /// Produce outgoing tokens according to the task's split type
    pub(crate) fn run_split<'a>(
        &'a self,
        txn: &'a Txn,
        workflow: WorkflowId,
        task: TaskIdx,
        graph: &'a WorkflowGraph,
        generation: u32,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            let node = graph.task_node(task);
            let wf = queries::workflow_row(txn, workflow)?;
            let router_ctx = || RouterCtx {
                txn: txn.clone(),
                workflow: WorkflowRef::of(&wf),
                task: TaskRef {
                    name: node.name.clone(),
                    generation,
                },
            };
            let targets = match (node.split, &node.router) {
                (SplitType::And, _) => graph.outgoing_conditions(task),
                (SplitType::Xor, Some(Router::Xor(router))) => {
                    let route = router(router_ctx()).await?;
                    vec![graph.route_target(task, &route)?]
                }
                (SplitType::Or, Some(Router::Or(router))) => {
                    let routes = router(router_ctx()).await?;
                    if routes.is_empty() {
                        return Err(EngineError::Hook(anyhow::anyhow!(
                            "or router of task {} returned no targets",
                            node.name
                        )));
                    }
                    let mut targets = Vec::new();
                    for route in &routes {
                        let target = graph.route_target(task, route)?;
                        if !targets.contains(&target) {
                            targets.push(target);
                        }
                    }
                    targets
                }
                _ => {
                    return Err(EngineError::MissingRouter(node.name.clone()));
                }
            };
            for target in targets {
                let name = graph.condition_node(target).name.clone();
                self.produce(txn, workflow, &name, 1)?;
                tracing::debug!(workflow = %workflow, task = %node.name, condition = %name, "token produced");
            }
            Ok(())
        })
    }

    /// Cancel the region tasks' live generations and clear the region
    /// conditions' markings
    pub(crate) fn apply_cancellation_region<'a>(
        &'a self,
        txn: &'a Txn,
        workflow: WorkflowId,
        task: TaskIdx,
        graph: &'a WorkflowGraph,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            let node = graph.task_node(task);
            let Some(region) = &node.region else {
                return Ok(());
            };
            for member in &region.tasks {
                for row in queries::task_generations(txn, workflow, member)? {
                    if row.state.is_live() {
                        self.cancel_task_generation(
                            txn,
                            workflow,
                            member,
                            row.generation,
                            CancellationReason::Teardown,
                        )
                        .await?;
                    }
                }
            }
            for member in &region.conditions {
                let mut row = queries::condition_row(txn, workflow, member)?;
                if row.marking > 0 {
                    row.marking = 0;
                    queries::put_condition(txn, &row)?;
                    tracing::debug!(workflow = %workflow, condition = %member, "marking cleared by cancellation region");
                }
            }
            Ok(())
        })
    }

    /// Fail a task generation and propagate the failure to the workflow
    pub(crate) fn fail_task<'a>(
        &'a self,
        txn: &'a Txn,
        workflow: WorkflowId,
        task: &'a str,
        generation: u32,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            let wf = queries::workflow_row(txn, workflow)?;
            let graph = self.resolve_graph(&wf)?;
            let node = graph.task_node(
                graph
                    .task(task)
                    .ok_or_else(|| EngineError::UnknownElement(task.to_owned()))?,
            );
            let mut row = queries::task_row(txn, workflow, task, generation)?;
            let prev = row.state;
            row.transition(TaskState::Failed)?;
            queries::append_task_log(txn, &mut row, prev, TaskState::Failed)?;
            queries::put_task(txn, &row)?;
            tracing::warn!(workflow = %workflow, task = %task, generation, "task failed");

            self.teardown_task_children(txn, workflow, task, generation, CancellationReason::Teardown)
                .await?;
            self.fire(&node.activities.on_failed, self.task_ctx(txn, &wf, &row))
                .await?;
            self.fail_workflow(txn, workflow, format!("task {} failed", task))
                .await
        })
    }

    /// Cancel one live task generation together with its children
    pub(crate) fn cancel_task_generation<'a>(
        &'a self,
        txn: &'a Txn,
        workflow: WorkflowId,
        task: &'a str,
        generation: u32,
        reason: CancellationReason,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            let mut row = queries::task_row(txn, workflow, task, generation)?;
            if !row.state.is_live() {
                // Cancelling an already-terminal generation is a no-op.
                return Ok(());
            }
            let wf = queries::workflow_row(txn, workflow)?;
            let graph = self.resolve_graph(&wf)?;
            let node = graph.task_node(
                graph
                    .task(task)
                    .ok_or_else(|| EngineError::UnknownElement(task.to_owned()))?,
            );
            let child_reason = match reason {
                CancellationReason::Migration => CancellationReason::Migration,
                _ => CancellationReason::Teardown,
            };
            self.teardown_task_children(txn, workflow, task, generation, child_reason)
                .await?;
            let prev = row.state;
            row.transition(TaskState::Canceled)?;
            queries::append_task_log(txn, &mut row, prev, TaskState::Canceled)?;
            queries::put_task(txn, &row)?;
            tracing::debug!(workflow = %workflow, task = %task, generation, reason = %reason, "task canceled");

            let mut ctx = self.task_ctx(txn, &wf, &row);
            ctx.reason = Some(reason);
            ctx.is_internal_mutation = reason != CancellationReason::Explicit;
            self.fire(&node.activities.on_canceled, ctx).await
        })
    }

    /// Cancel live work items and child workflows of one task generation
    fn teardown_task_children<'a>(
        &'a self,
        txn: &'a Txn,
        workflow: WorkflowId,
        task: &'a str,
        generation: u32,
        reason: CancellationReason,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            for item in queries::work_items_of(txn, workflow, task, generation)? {
                if !item.state.is_terminal() {
                    self.work_item_transition(
                        txn,
                        item.id,
                        WorkItemActionKind::Cancel,
                        None,
                        true,
                        Some(reason),
                        false,
                    )
                    .await?;
                }
            }
            for child in queries::child_workflows_of(txn, workflow, task, generation)? {
                if !child.state.is_terminal() {
                    self.cancel_workflow_inner(txn, child.id, reason, false).await?;
                }
            }
            Ok(())
        })
    }

    /// Fail the workflow: tear down remaining live tasks, mark the row, and
    /// notify the parent composite task
    pub(crate) fn fail_workflow<'a>(
        &'a self,
        txn: &'a Txn,
        workflow: WorkflowId,
        failure: String,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            let mut wf = queries::workflow_row(txn, workflow)?;
            if wf.state.is_terminal() {
                return Ok(());
            }
            for row in queries::tasks_of_workflow(txn, workflow)? {
                if row.state.is_live() {
                    self.cancel_task_generation(
                        txn,
                        workflow,
                        &row.name,
                        row.generation,
                        CancellationReason::Teardown,
                    )
                    .await?;
                }
            }
            let graph = self.resolve_graph(&wf)?;
            let prev = wf.state;
            wf.fail(failure)?;
            queries::put_workflow(txn, &wf)?;
            tracing::warn!(workflow = %workflow, "workflow failed");
            self.fire(&graph.activities.on_failed, self.ctx(txn, &wf)).await?;
            self.notify_parent(txn, workflow, Some(prev.into()), ChildState::Failed)
                .await
        })
    }

    /// Cancel the workflow and everything live beneath it
    pub(crate) fn cancel_workflow_inner<'a>(
        &'a self,
        txn: &'a Txn,
        workflow: WorkflowId,
        reason: CancellationReason,
        notify_parent: bool,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            let mut wf = queries::workflow_row(txn, workflow)?;
            if wf.state.is_terminal() {
                return Ok(());
            }
            for row in queries::tasks_of_workflow(txn, workflow)? {
                if row.state.is_live() {
                    self.cancel_task_generation(txn, workflow, &row.name, row.generation, reason)
                        .await?;
                }
            }
            let graph = self.resolve_graph(&wf)?;
            let prev = wf.state;
            wf.cancel()?;
            queries::put_workflow(txn, &wf)?;
            tracing::info!(workflow = %workflow, reason = %reason, "workflow canceled");
            let mut ctx = self.ctx(txn, &wf);
            ctx.reason = Some(reason);
            ctx.is_internal_mutation = reason != CancellationReason::Explicit;
            self.fire(&graph.activities.on_canceled, ctx).await?;
            if notify_parent {
                self.notify_parent(txn, workflow, Some(prev.into()), ChildState::Canceled)
                    .await?;
            }
            Ok(())
        })
    }

    /// Complete the workflow once its end condition is marked and no task is
    /// live
    pub(crate) fn complete_workflow_if_ready<'a>(
        &'a self,
        txn: &'a Txn,
        workflow: WorkflowId,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            let mut wf = queries::workflow_row(txn, workflow)?;
            if wf.state.is_terminal() {
                return Ok(());
            }
            let graph = self.resolve_graph(&wf)?;
            let end = graph.condition_node(graph.end).name.clone();
            if queries::condition_row(txn, workflow, &end)?.marking == 0 {
                return Ok(());
            }
            if queries::tasks_of_workflow(txn, workflow)?
                .iter()
                .any(|t| t.state.is_live())
            {
                return Ok(());
            }
            let prev = wf.state;
            wf.complete()?;
            queries::put_workflow(txn, &wf)?;
            tracing::info!(workflow = %workflow, "workflow completed");
            self.fire(&graph.activities.on_completed, self.ctx(txn, &wf))
                .await?;
            self.notify_parent(txn, workflow, Some(prev.into()), ChildState::Completed)
                .await
        })
    }

    // ------------------------------------------------------------------
    // Composite tasks
    // ------------------------------------------------------------------

    /// Initialize a child workflow under a composite (or dynamic composite)
    /// task generation
    pub(crate) fn initialize_child_in_txn(
        &self,
        txn: Txn,
        workflow: WorkflowId,
        task: TaskRef,
        child_name: Option<&str>,
        payload: Value,
    ) -> BoxFuture<'static, EngineResult<WorkflowId>> {
        let this = self.clone();
        let child_name = child_name.map(str::to_owned);
        Box::pin(async move {
            let wf = queries::workflow_row(&txn, workflow)?;
            let graph = this.resolve_graph(&wf)?;
            let t_idx = graph
                .task(&task.name)
                .ok_or_else(|| EngineError::UnknownElement(task.name.clone()))?;
            let node = graph.task_node(t_idx);
            let child_graph = graph.child_graph(t_idx, child_name.as_deref())?;
            let mut task_row = queries::task_row(&txn, workflow, &task.name, task.generation)?;
            if !task_row.state.is_live() {
                return Err(EngineError::IllegalTransition {
                    element: format!("task {}", task.name),
                    from: task_row.state.to_string(),
                    to: "hosting a child workflow".into(),
                });
            }
            if task_row.state == TaskState::Enabled {
                task_row.transition(TaskState::Started)?;
                queries::append_task_log(&txn, &mut task_row, TaskState::Enabled, TaskState::Started)?;
                queries::put_task(&txn, &task_row)?;
                this.fire(
                    &node.activities.on_started,
                    this.task_ctx(&txn, &wf, &task_row),
                )
                .await?;
            }
            let spec = NewWorkflowSpec {
                graph: child_graph,
                parent: Some(ParentRef {
                    workflow_id: workflow,
                    task_name: task.name.clone(),
                    task_generation: task.generation,
                }),
                path: task_row.path.clone(),
                realized_path: task_row.realized_path.clone(),
                mode: wf.mode,
            };
            let child_id = this.create_workflow(&txn, spec, Some(payload)).await?;
            queries::record_stats_event(
                &txn,
                workflow,
                &task.name,
                task.generation,
                node.stats_shard_count,
                child_id.0.as_bytes(),
                StatsEvent::Initialized,
            )?;
            let mut ctx = this.task_ctx(&txn, &wf, &task_row);
            ctx.child_workflow = Some(child_id);
            ctx.transition = Some(ChildTransition {
                prev: None,
                next: ChildState::Initialized,
            });
            this.fire(&node.activities.on_workflow_state_changed, ctx).await?;
            this.apply_policy(
                &txn,
                workflow,
                &task.name,
                task.generation,
                ChildTransition {
                    prev: None,
                    next: ChildState::Initialized,
                },
            )
            .await?;
            this.kick_workflow(&txn, child_id).await?;
            Ok(child_id)
        })
    }

    /// Report a child workflow state change to the owning composite task:
    /// count it, run `on_workflow_state_changed`, and consult the policy
    fn notify_parent<'a>(
        &'a self,
        txn: &'a Txn,
        child: WorkflowId,
        prev: Option<ChildState>,
        next: ChildState,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            let child_row = queries::workflow_row(txn, child)?;
            let Some(parent) = child_row.parent.clone() else {
                return Ok(());
            };
            let parent_wf = queries::workflow_row(txn, parent.workflow_id)?;
            if parent_wf.state.is_terminal() {
                return Ok(());
            }
            let graph = self.resolve_graph(&parent_wf)?;
            let t_idx = graph
                .task(&parent.task_name)
                .ok_or_else(|| EngineError::UnknownElement(parent.task_name.clone()))?;
            let node = graph.task_node(t_idx);
            let task_row = queries::task_row(
                txn,
                parent.workflow_id,
                &parent.task_name,
                parent.task_generation,
            )?;
            let event = match next {
                ChildState::Initialized => return Ok(()),
                ChildState::Started => StatsEvent::Started,
                ChildState::Completed => StatsEvent::Completed,
                ChildState::Failed => StatsEvent::Failed,
                ChildState::Canceled => StatsEvent::Canceled {
                    before_start: prev == Some(ChildState::Initialized),
                },
            };
            queries::record_stats_event(
                txn,
                parent.workflow_id,
                &parent.task_name,
                parent.task_generation,
                node.stats_shard_count,
                child.0.as_bytes(),
                event,
            )?;
            let transition = ChildTransition { prev, next };
            let mut ctx = self.task_ctx(txn, &parent_wf, &task_row);
            ctx.child_workflow = Some(child);
            ctx.transition = Some(transition);
            self.fire(&node.activities.on_workflow_state_changed, ctx).await?;
            if task_row.state.is_live() {
                self.apply_policy(
                    txn,
                    parent.workflow_id,
                    &parent.task_name,
                    parent.task_generation,
                    transition,
                )
                .await?;
            }
            Ok(())
        })
    }

    /// Withdraw an enabled-but-unstarted generation back to `disabled`
    pub(crate) fn withdraw_enabled_generation<'a>(
        &'a self,
        txn: &'a Txn,
        workflow: WorkflowId,
        task: &'a str,
        generation: u32,
    ) -> BoxFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            let mut row = queries::task_row(txn, workflow, task, generation)?;
            row.transition(TaskState::Disabled)?;
            queries::append_task_log(txn, &mut row, TaskState::Enabled, TaskState::Disabled)?;
            queries::put_task(txn, &row)?;
            let wf = queries::workflow_row(txn, workflow)?;
            let graph = self.resolve_graph(&wf)?;
            let node = graph.task_node(
                graph
                    .task(task)
                    .ok_or_else(|| EngineError::UnknownElement(task.to_owned()))?,
            );
            self.fire(&node.activities.on_disabled, self.task_ctx(txn, &wf, &row))
                .await
        })
    }
}
