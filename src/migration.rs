//! Instance migration between definition versions
//!
//! A migration transfers an in-flight workflow instance from a source
//! version's graph to a target version's graph. Condition markings replay
//! for every condition both graphs share; each live source task generation
//! is resolved by its task migrator:
//!
//! - **Continue** retains progress: the generation, its live work items (or
//!   child workflows for composite tasks), its statistics shards and its
//!   state log carry over into the equivalent target task.
//! - **FastForward** treats the task as already complete in the target
//!   graph: a synthetic completed generation is written and outgoing tokens
//!   are produced as though the task had completed naturally, cascading
//!   enablement until the target reaches a fixed point. Source-side children
//!   are discarded.
//!
//! The target runs in `fastForward` execution mode while the migration is in
//! flight; the source instance is torn down with reason `migration` and the
//! `(source -> target)` pairing is recorded so a source migrates at most
//! once.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::AuditEvent;
use crate::error::{EngineError, EngineResult};
use crate::runtime::cancellation::CancellationReason;
use crate::runtime::engine::{Engine, NewWorkflowSpec};
use crate::runtime::queries;
use crate::runtime::task::{TaskRef, TaskRow, TaskState};
use crate::runtime::workflow::{
    ExecutionMode, ParentRef, WorkflowId, WorkflowRef, WorkflowState,
};
use crate::store::{ReadTxn, Table, Txn};

/// Persisted source-to-target pairing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRow {
    /// Source instance
    pub from: WorkflowId,
    /// Target instance
    pub to: WorkflowId,
    /// When the migration committed
    pub at: DateTime<Utc>,
}

/// Verdict of one task migrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationDecision {
    /// Carry the generation, its children and its statistics into the target
    Continue,
    /// Mark the target task completed and advance the target as though it
    /// had completed naturally; discard source-side children
    FastForward,
}

/// Context handed to the migration initializer and finalizer
#[derive(Clone)]
pub struct MigrationCtx {
    /// Engine handle
    pub engine: Engine,
    pub(crate) txn: Txn,
    /// The instance being migrated away from
    pub source: WorkflowRef,
    /// The freshly created target instance
    pub target: WorkflowRef,
}

impl MigrationCtx {
    /// Read-only handle to the host store
    pub fn store(&self) -> ReadTxn {
        ReadTxn::new(self.txn.clone())
    }

    /// Append an audit event correlated to the target instance
    pub fn audit(&self, payload: Value) {
        self.txn.push_audit(AuditEvent {
            workflow_id: self.target.id,
            path: Vec::new(),
            task_name: None,
            work_item_id: None,
            payload,
            at: Utc::now(),
        });
    }
}

/// Context handed to one task migrator
#[derive(Clone)]
pub struct TaskMigratorCtx {
    /// Engine handle
    pub engine: Engine,
    pub(crate) txn: Txn,
    /// The instance being migrated away from
    pub source: WorkflowRef,
    /// The target instance
    pub target: WorkflowRef,
    /// The live source task generation under consideration
    pub task: TaskRef,
    /// Its state in the source
    pub source_state: TaskState,
    requests: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

impl TaskMigratorCtx {
    /// Read-only handle to the host store
    pub fn store(&self) -> ReadTxn {
        ReadTxn::new(self.txn.clone())
    }

    /// Request a fresh child workflow under the target task generation in
    /// place of (or in addition to) the ported children. For dynamic
    /// composite tasks `name` selects the target child definition. Only
    /// meaningful with a `Continue` verdict; the children are created once
    /// the generation has been ported.
    pub fn initialize_child_workflow(&self, name: Option<&str>, payload: Value) {
        self.requests
            .lock()
            .push((name.map(str::to_owned), payload));
    }
}

/// Boxed initializer/finalizer hook
pub type MigrationHook =
    Arc<dyn Fn(MigrationCtx) -> BoxFuture<'static, EngineResult<()>> + Send + Sync>;

/// Lift a plain async fn into a [`MigrationHook`]
pub fn migration_hook<F, Fut>(f: F) -> MigrationHook
where
    F: Fn(MigrationCtx) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = EngineResult<()>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Boxed per-task migrator
pub type TaskMigrator =
    Arc<dyn Fn(TaskMigratorCtx) -> BoxFuture<'static, EngineResult<MigrationDecision>> + Send + Sync>;

/// Lift a plain async fn into a [`TaskMigrator`]
pub fn task_migrator<F, Fut>(f: F) -> TaskMigrator
where
    F: Fn(TaskMigratorCtx) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = EngineResult<MigrationDecision>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Declarative migration between two versions of one workflow
#[derive(Clone)]
pub struct Migration {
    /// Workflow definition name
    pub workflow_name: String,
    /// Version migrated away from
    pub from_version: String,
    /// Version migrated onto
    pub to_version: String,
    initializer: Option<MigrationHook>,
    finalizer: Option<MigrationHook>,
    /// Keyed `"<workflowName>/<taskName>"`; absent entries default to
    /// Continue with no user hook
    task_migrators: HashMap<String, TaskMigrator>,
}

/// Builder for [`Migration`]
pub struct MigrationBuilder {
    workflow_name: String,
    from_version: String,
    to_version: String,
    initializer: Option<MigrationHook>,
    finalizer: Option<MigrationHook>,
    task_migrators: HashMap<String, TaskMigrator>,
}

impl MigrationBuilder {
    /// Migrate `workflow_name` instances from one version to another
    pub fn new(
        workflow_name: impl Into<String>,
        from_version: impl Into<String>,
        to_version: impl Into<String>,
    ) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            from_version: from_version.into(),
            to_version: to_version.into(),
            initializer: None,
            finalizer: None,
            task_migrators: HashMap::new(),
        }
    }

    /// Hook run once against the target row before anything is ported
    pub fn with_initializer(mut self, hook: MigrationHook) -> Self {
        self.initializer = Some(hook);
        self
    }

    /// Hook run once at the end, observing the resulting workflow state
    pub fn with_finalizer(mut self, hook: MigrationHook) -> Self {
        self.finalizer = Some(hook);
        self
    }

    /// Register the migrator for `"<workflowName>/<taskName>"`
    pub fn with_task_migrator(mut self, key: impl Into<String>, migrator: TaskMigrator) -> Self {
        self.task_migrators.insert(key.into(), migrator);
        self
    }

    /// Shorthand: the named task fast-forwards
    pub fn fast_forward(self, key: impl Into<String>) -> Self {
        self.with_task_migrator(key, task_migrator(|_ctx| async {
            Ok(MigrationDecision::FastForward)
        }))
    }

    /// Finish
    pub fn build(self) -> Migration {
        Migration {
            workflow_name: self.workflow_name,
            from_version: self.from_version,
            to_version: self.to_version,
            initializer: self.initializer,
            finalizer: self.finalizer,
            task_migrators: self.task_migrators,
        }
    }
}

impl Engine {
    /// Migrate one live instance onto the migration's target version;
    /// returns the target workflow id
    pub async fn migrate(
        &self,
        migration: &Migration,
        source: WorkflowId,
    ) -> EngineResult<WorkflowId> {
        let this = self.clone();
        let migration = migration.clone();
        self.with_txn(move |txn| {
            let this = this.clone();
            let migration = migration.clone();
            Box::pin(async move { this.migrate_in_txn(&txn, &migration, source).await })
        })
        .await
    }

    /// The recorded pairing for a source instance, if it was migrated
    pub fn migration_record(&self, source: WorkflowId) -> EngineResult<Option<MigrationRow>> {
        self.inner
            .store
            .begin()
            .get(Table::Migrations, &source.key())
    }

    async fn migrate_in_txn(
        &self,
        txn: &Txn,
        migration: &Migration,
        source: WorkflowId,
    ) -> EngineResult<WorkflowId> {
        let src = queries::workflow_row(txn, source)?;
        if src.name != migration.workflow_name || src.version != migration.from_version {
            return Err(EngineError::PayloadInvalid(format!(
                "workflow {} is {}@{}, migration expects {}@{}",
                source, src.name, src.version, migration.workflow_name, migration.from_version
            )));
        }
        if src.state.is_terminal() {
            return Err(EngineError::IllegalTransition {
                element: format!("workflow {}", source),
                from: src.state.to_string(),
                to: "migrating".into(),
            });
        }
        if txn
            .get::<MigrationRow>(Table::Migrations, &source.key())?
            .is_some()
        {
            return Err(EngineError::AlreadyMigrated(source.to_string()));
        }
        let src_graph = self.inner.versions.resolve(&src.name, &src.version)?;
        let tgt_graph = self
            .inner
            .versions
            .resolve(&src.name, &migration.to_version)?;

        let spec = NewWorkflowSpec {
            graph: tgt_graph.clone(),
            parent: src.parent.clone(),
            path: src.path.clone(),
            realized_path: src.realized_path.clone(),
            mode: ExecutionMode::FastForward,
        };
        let target = self.create_workflow(txn, spec, None).await?;
        if src.state == WorkflowState::Started {
            let mut row = queries::workflow_row(txn, target)?;
            row.start()?;
            queries::put_workflow(txn, &row)?;
        }
        txn.put(
            Table::Migrations,
            &source.key(),
            &MigrationRow {
                from: source,
                to: target,
                at: Utc::now(),
            },
        )?;
        tracing::info!(source = %source, target = %target, from = %migration.from_version, to = %migration.to_version, "migration started");

        let src_ref = WorkflowRef::of(&src);
        let tgt_ref = WorkflowRef::of(&queries::workflow_row(txn, target)?);
        if let Some(initializer) = &migration.initializer {
            initializer(MigrationCtx {
                engine: self.clone(),
                txn: txn.clone(),
                source: src_ref.clone(),
                target: tgt_ref.clone(),
            })
            .await?;
        }

        for condition in &src_graph.conditions {
            if tgt_graph.condition(&condition.name).is_none() {
                continue;
            }
            let marking = queries::condition_row(txn, source, &condition.name)?.marking;
            if marking > 0 {
                let mut row = queries::condition_row(txn, target, &condition.name)?;
                row.marking = marking;
                queries::put_condition(txn, &row)?;
            }
        }

        for node in &src_graph.tasks {
            for gen_row in queries::task_generations(txn, source, &node.name)? {
                if !gen_row.state.is_live() {
                    continue;
                }
                if tgt_graph.task(&node.name).is_none() {
                    return Err(EngineError::UnknownElement(format!(
                        "task {} has no counterpart in version {}",
                        node.name, migration.to_version
                    )));
                }
                let requests = Arc::new(Mutex::new(Vec::new()));
                let key = format!("{}/{}", src.name, node.name);
                let decision = match migration.task_migrators.get(&key) {
                    Some(migrator) => {
                        migrator(TaskMigratorCtx {
                            engine: self.clone(),
                            txn: txn.clone(),
                            source: src_ref.clone(),
                            target: tgt_ref.clone(),
                            task: TaskRef {
                                name: node.name.clone(),
                                generation: gen_row.generation,
                            },
                            source_state: gen_row.state,
                            requests: requests.clone(),
                        })
                        .await?
                    }
                    None => MigrationDecision::Continue,
                };
                let requested = std::mem::take(&mut *requests.lock());
                match decision {
                    MigrationDecision::Continue => {
                        self.port_task_generation(txn, source, target, &gen_row).await?;
                        for (child_name, payload) in requested {
                            self.initialize_child_in_txn(
                                txn.clone(),
                                target,
                                TaskRef {
                                    name: node.name.clone(),
                                    generation: gen_row.generation,
                                },
                                child_name.as_deref(),
                                payload,
                            )
                            .await?;
                        }
                    }
                    MigrationDecision::FastForward => {
                        if !requested.is_empty() {
                            return Err(EngineError::Hook(anyhow::anyhow!(
                                "task {} requested child workflows but fast-forwarded",
                                node.name
                            )));
                        }
                        self.fast_forward_task(txn, target, &tgt_graph, &gen_row).await?;
                        self.cancel_task_generation(
                            txn,
                            source,
                            &node.name,
                            gen_row.generation,
                            CancellationReason::Migration,
                        )
                        .await?;
                    }
                }
            }
        }

        self.pump_workflow(txn, target).await?;
        self.cancel_workflow_inner(txn, source, CancellationReason::Migration, false)
            .await?;

        if let Some(finalizer) = &migration.finalizer {
            finalizer(MigrationCtx {
                engine: self.clone(),
                txn: txn.clone(),
                source: src_ref,
                target: WorkflowRef::of(&queries::workflow_row(txn, target)?),
            })
            .await?;
        }

        let mut row = queries::workflow_row(txn, target)?;
        row.mode = ExecutionMode::Normal;
        queries::put_workflow(txn, &row)?;
        self.complete_workflow_if_ready(txn, target).await?;
        tracing::info!(source = %source, target = %target, "migration finished");
        Ok(target)
    }

    /// Carry one live source generation into the target: task row, state
    /// log, statistics shards, live work items and child workflows
    async fn port_task_generation(
        &self,
        txn: &Txn,
        source: WorkflowId,
        target: WorkflowId,
        gen_row: &TaskRow,
    ) -> EngineResult<()> {
        let tgt_wf = queries::workflow_row(txn, target)?;
        let name = gen_row.name.clone();
        let generation = gen_row.generation;

        let mut ported = gen_row.clone();
        ported.workflow_id = target;
        ported.version = tgt_wf.version.clone();
        ported.seq = txn.next_seq();
        ported.path = tgt_wf
            .path
            .iter()
            .cloned()
            .chain([name.clone()])
            .collect();
        ported.realized_path = tgt_wf
            .realized_path
            .iter()
            .cloned()
            .chain([format!("{}[{}]", name, generation)])
            .collect();
        queries::put_task(txn, &ported)?;

        for entry in queries::task_state_log(txn, source, &name, generation)? {
            let mut moved = entry.clone();
            moved.workflow_id = target;
            txn.put(
                Table::TasksStateLog,
                &queries::log_key(target, &name, generation, entry.entry),
                &moved,
            )?;
        }
        for shard in queries::stats_shards(txn, source, &name, generation)? {
            let mut moved = shard.clone();
            moved.workflow_id = target;
            txn.put(
                Table::TaskStatsShards,
                &queries::shard_key(target, &name, generation, shard.shard),
                &moved,
            )?;
        }
        for item in queries::work_items_of(txn, source, &name, generation)? {
            txn.delete(
                Table::WorkItemsByTask,
                &queries::work_item_index_key(source, &name, generation, item.id),
            )?;
            let mut moved = item.clone();
            moved.workflow_id = target;
            moved.version = tgt_wf.version.clone();
            queries::put_work_item(txn, &moved)?;
            txn.put(
                Table::WorkItemsByTask,
                &queries::work_item_index_key(target, &name, generation, item.id),
                &item.id,
            )?;
        }
        for child in queries::child_workflows_of(txn, source, &name, generation)? {
            txn.delete(
                Table::WorkflowsByParent,
                &queries::child_index_key(source, &name, generation, child.id),
            )?;
            let mut moved = child.clone();
            moved.parent = Some(ParentRef {
                workflow_id: target,
                task_name: name.clone(),
                task_generation: generation,
            });
            queries::put_workflow(txn, &moved)?;
            txn.put(
                Table::WorkflowsByParent,
                &queries::child_index_key(target, &name, generation, child.id),
                &child.id,
            )?;
        }
        tracing::debug!(task = %name, generation, "generation carried into target");

        // The source-side record is withdrawn or torn down; its children
        // moved with the port.
        if gen_row.state == TaskState::Enabled {
            self.withdraw_enabled_generation(txn, source, &name, generation)
                .await
        } else {
            self.cancel_task_generation(
                txn,
                source,
                &name,
                generation,
                CancellationReason::Migration,
            )
            .await
        }
    }

    /// Write a synthetic completed generation in the target and advance the
    /// net as though the task had completed naturally
    async fn fast_forward_task(
        &self,
        txn: &Txn,
        target: WorkflowId,
        tgt_graph: &crate::definition::graph::WorkflowGraph,
        gen_row: &TaskRow,
    ) -> EngineResult<()> {
        let tgt_wf = queries::workflow_row(txn, target)?;
        let name = gen_row.name.clone();
        let generation = gen_row.generation;
        let t_idx = tgt_graph
            .task(&name)
            .ok_or_else(|| EngineError::UnknownElement(name.clone()))?;
        let now = Utc::now();
        let mut row = TaskRow {
            workflow_id: target,
            name: name.clone(),
            generation,
            state: TaskState::Enabled,
            path: tgt_wf.path.iter().cloned().chain([name.clone()]).collect(),
            realized_path: tgt_wf
                .realized_path
                .iter()
                .cloned()
                .chain([format!("{}[{}]", name, generation)])
                .collect(),
            version: tgt_wf.version.clone(),
            seq: txn.next_seq(),
            log_seq: 0,
            created_at: now,
            updated_at: now,
        };
        queries::append_task_log(txn, &mut row, TaskState::Disabled, TaskState::Enabled)?;
        row.transition(TaskState::Started)?;
        queries::append_task_log(txn, &mut row, TaskState::Enabled, TaskState::Started)?;
        row.transition(TaskState::Completed)?;
        queries::append_task_log(txn, &mut row, TaskState::Started, TaskState::Completed)?;
        queries::put_task(txn, &row)?;
        tracing::debug!(task = %name, generation, "task fast-forwarded in target");

        self.apply_cancellation_region(txn, target, t_idx, tgt_graph)
            .await?;
        self.run_split(txn, target, t_idx, tgt_graph, generation).await
    }
}
