//! Row access helpers shared by the engine, contexts and migration

use crate::error::{EngineError, EngineResult};
use crate::runtime::condition::ConditionRow;
use crate::runtime::stats::{shard_for, StatsEvent, StatsShardRow, TaskStats};
use crate::runtime::task::{TaskRow, TaskState, TaskStateLogRow};
use crate::runtime::work_item::{WorkItemId, WorkItemRow};
use crate::runtime::workflow::{WorkflowId, WorkflowRow};
use crate::store::{gen_key, key2, key3, key4, Table, Txn};

pub(crate) fn workflow_key(id: WorkflowId) -> String {
    id.key()
}

pub(crate) fn task_key(workflow: WorkflowId, name: &str, generation: u32) -> String {
    key3(&workflow.key(), name, &gen_key(generation))
}

pub(crate) fn condition_key(workflow: WorkflowId, name: &str) -> String {
    key2(&workflow.key(), name)
}

pub(crate) fn work_item_index_key(
    workflow: WorkflowId,
    task: &str,
    generation: u32,
    item: WorkItemId,
) -> String {
    key4(&workflow.key(), task, &gen_key(generation), &item.key())
}

pub(crate) fn child_index_key(
    workflow: WorkflowId,
    task: &str,
    generation: u32,
    child: WorkflowId,
) -> String {
    key4(&workflow.key(), task, &gen_key(generation), &child.key())
}

pub(crate) fn shard_key(workflow: WorkflowId, task: &str, generation: u32, shard: u32) -> String {
    key4(
        &workflow.key(),
        task,
        &gen_key(generation),
        &format!("{:04}", shard),
    )
}

pub(crate) fn log_key(workflow: WorkflowId, task: &str, generation: u32, entry: u32) -> String {
    key4(
        &workflow.key(),
        task,
        &gen_key(generation),
        &format!("{:06}", entry),
    )
}

pub(crate) fn workflow_row(txn: &Txn, id: WorkflowId) -> EngineResult<WorkflowRow> {
    txn.get(Table::Workflows, &workflow_key(id))?
        .ok_or_else(|| EngineError::EntityNotFound(format!("workflow {}", id)))
}

pub(crate) fn put_workflow(txn: &Txn, row: &WorkflowRow) -> EngineResult<()> {
    txn.put(Table::Workflows, &workflow_key(row.id), row)
}

pub(crate) fn task_row(
    txn: &Txn,
    workflow: WorkflowId,
    name: &str,
    generation: u32,
) -> EngineResult<TaskRow> {
    txn.get(Table::Tasks, &task_key(workflow, name, generation))?
        .ok_or_else(|| {
            EngineError::EntityNotFound(format!("task {}[{}] of workflow {}", name, generation, workflow))
        })
}

pub(crate) fn put_task(txn: &Txn, row: &TaskRow) -> EngineResult<()> {
    txn.put(
        Table::Tasks,
        &task_key(row.workflow_id, &row.name, row.generation),
        row,
    )
}

pub(crate) fn task_generations(
    txn: &Txn,
    workflow: WorkflowId,
    name: &str,
) -> EngineResult<Vec<TaskRow>> {
    let prefix = format!("{}/{}/", workflow.key(), name);
    Ok(txn
        .scan::<TaskRow>(Table::Tasks, &prefix)?
        .into_iter()
        .map(|(_, row)| row)
        .collect())
}

pub(crate) fn latest_task_generation(
    txn: &Txn,
    workflow: WorkflowId,
    name: &str,
) -> EngineResult<Option<TaskRow>> {
    Ok(task_generations(txn, workflow, name)?.pop())
}

pub(crate) fn tasks_of_workflow(txn: &Txn, workflow: WorkflowId) -> EngineResult<Vec<TaskRow>> {
    let prefix = format!("{}/", workflow.key());
    Ok(txn
        .scan::<TaskRow>(Table::Tasks, &prefix)?
        .into_iter()
        .map(|(_, row)| row)
        .collect())
}

/// Append one entry to the task state log and bump the row's log counter
pub(crate) fn append_task_log(
    txn: &Txn,
    task: &mut TaskRow,
    from: TaskState,
    to: TaskState,
) -> EngineResult<()> {
    let entry = task.log_seq;
    task.log_seq += 1;
    txn.put(
        Table::TasksStateLog,
        &log_key(task.workflow_id, &task.name, task.generation, entry),
        &TaskStateLogRow {
            workflow_id: task.workflow_id,
            task_name: task.name.clone(),
            generation: task.generation,
            entry,
            from,
            to,
            at: chrono::Utc::now(),
        },
    )
}

pub(crate) fn task_state_log(
    txn: &Txn,
    workflow: WorkflowId,
    name: &str,
    generation: u32,
) -> EngineResult<Vec<TaskStateLogRow>> {
    let prefix = format!("{}/{}/{}/", workflow.key(), name, gen_key(generation));
    Ok(txn
        .scan::<TaskStateLogRow>(Table::TasksStateLog, &prefix)?
        .into_iter()
        .map(|(_, row)| row)
        .collect())
}

pub(crate) fn condition_row(
    txn: &Txn,
    workflow: WorkflowId,
    name: &str,
) -> EngineResult<ConditionRow> {
    txn.get(Table::Conditions, &condition_key(workflow, name))?
        .ok_or_else(|| {
            EngineError::EntityNotFound(format!("condition {} of workflow {}", name, workflow))
        })
}

pub(crate) fn put_condition(txn: &Txn, row: &ConditionRow) -> EngineResult<()> {
    txn.put(
        Table::Conditions,
        &condition_key(row.workflow_id, &row.name),
        row,
    )
}

pub(crate) fn work_item_row(txn: &Txn, id: WorkItemId) -> EngineResult<WorkItemRow> {
    txn.get(Table::WorkItems, &id.key())?
        .ok_or_else(|| EngineError::EntityNotFound(format!("work item {}", id)))
}

pub(crate) fn put_work_item(txn: &Txn, row: &WorkItemRow) -> EngineResult<()> {
    txn.put(Table::WorkItems, &row.id.key(), row)
}

/// Work items of one task generation, in creation order
pub(crate) fn work_items_of(
    txn: &Txn,
    workflow: WorkflowId,
    task: &str,
    generation: u32,
) -> EngineResult<Vec<WorkItemRow>> {
    let prefix = format!("{}/{}/{}/", workflow.key(), task, gen_key(generation));
    let mut items = Vec::new();
    for (_, id) in txn.scan::<WorkItemId>(Table::WorkItemsByTask, &prefix)? {
        items.push(work_item_row(txn, id)?);
    }
    items.sort_by_key(|item| item.seq);
    Ok(items)
}

/// Work items across every generation of one task, in creation order
pub(crate) fn work_items_of_task(
    txn: &Txn,
    workflow: WorkflowId,
    task: &str,
) -> EngineResult<Vec<WorkItemRow>> {
    let prefix = format!("{}/{}/", workflow.key(), task);
    let mut items = Vec::new();
    for (_, id) in txn.scan::<WorkItemId>(Table::WorkItemsByTask, &prefix)? {
        items.push(work_item_row(txn, id)?);
    }
    items.sort_by_key(|item| item.seq);
    Ok(items)
}

/// Child workflows of one composite task generation, in creation order
pub(crate) fn child_workflows_of(
    txn: &Txn,
    workflow: WorkflowId,
    task: &str,
    generation: u32,
) -> EngineResult<Vec<WorkflowRow>> {
    let prefix = format!("{}/{}/{}/", workflow.key(), task, gen_key(generation));
    let mut children = Vec::new();
    for (_, id) in txn.scan::<WorkflowId>(Table::WorkflowsByParent, &prefix)? {
        children.push(workflow_row(txn, id)?);
    }
    children.sort_by_key(|child| child.seq);
    Ok(children)
}

/// Child workflows across every generation of one composite task
pub(crate) fn child_workflows_of_task(
    txn: &Txn,
    workflow: WorkflowId,
    task: &str,
) -> EngineResult<Vec<WorkflowRow>> {
    let prefix = format!("{}/{}/", workflow.key(), task);
    let mut children = Vec::new();
    for (_, id) in txn.scan::<WorkflowId>(Table::WorkflowsByParent, &prefix)? {
        children.push(workflow_row(txn, id)?);
    }
    children.sort_by_key(|child| child.seq);
    Ok(children)
}

pub(crate) fn stats_shards(
    txn: &Txn,
    workflow: WorkflowId,
    task: &str,
    generation: u32,
) -> EngineResult<Vec<StatsShardRow>> {
    let prefix = format!("{}/{}/{}/", workflow.key(), task, gen_key(generation));
    Ok(txn
        .scan::<StatsShardRow>(Table::TaskStatsShards, &prefix)?
        .into_iter()
        .map(|(_, row)| row)
        .collect())
}

pub(crate) fn aggregate_stats(
    txn: &Txn,
    workflow: WorkflowId,
    task: &str,
    generation: u32,
) -> EngineResult<TaskStats> {
    let shards = stats_shards(txn, workflow, task, generation)?;
    Ok(TaskStats::aggregate(shards.iter()))
}

/// Record one child event on the shard selected by the child id.
///
/// The shard row is created lazily on first increment.
pub(crate) fn record_stats_event(
    txn: &Txn,
    workflow: WorkflowId,
    task: &str,
    generation: u32,
    shard_count: u32,
    child_id: &[u8],
    event: StatsEvent,
) -> EngineResult<()> {
    let shard = shard_for(child_id, shard_count);
    let key = shard_key(workflow, task, generation, shard);
    let mut row = txn
        .get::<StatsShardRow>(Table::TaskStatsShards, &key)?
        .unwrap_or_else(|| StatsShardRow::new(workflow, task, generation, shard));
    row.record(event);
    txn.put(Table::TaskStatsShards, &key, &row)
}
