//! Migrating live instances between definition versions

mod common;

use serde_json::json;
use tasquencer::{
    migration_hook, DummyTaskBuilder, EngineError, JoinType, MigrationBuilder, TaskBuilder,
    TaskState, WorkItemState, WorkflowBuilder, WorkflowState,
};

/// start -> fork -> {a, b}; b -> c; {a, c} -> j -> end
fn fork_graph(version: &str) -> std::sync::Arc<tasquencer::WorkflowGraph> {
    WorkflowBuilder::new("flow")
        .start_condition("start")
        .end_condition("end")
        .dummy_task("fork", DummyTaskBuilder::new())
        .task("a", TaskBuilder::new())
        .task("b", TaskBuilder::new())
        .task("c", TaskBuilder::new())
        .task("j", TaskBuilder::new().with_join(JoinType::And))
        .connect_condition("start", |c| c.task("fork"))
        .connect_task("fork", |t| t.task("a").task("b"))
        .connect_task("a", |t| t.task("j"))
        .connect_task("b", |t| t.task("c"))
        .connect_task("c", |t| t.task("j"))
        .connect_task("j", |t| t.condition("end"))
        .build(version)
        .expect("build fork graph")
}

#[tokio::test]
async fn continue_carries_progress_and_fast_forward_advances_the_net() {
    let harness = common::engine();
    let engine = &harness.engine;
    engine.versions().register(fork_graph("v1"));
    engine.versions().register(fork_graph("v2"));

    let source = engine
        .initialize_workflow("flow", "v1", json!({}))
        .await
        .expect("initialize");
    // a is mid-flight, b is enabled but untouched.
    let item = engine
        .initialize_work_item(source, "a", json!({ "step": 1 }))
        .await
        .expect("initialize a item");
    engine.start_work_item(item, json!({})).await.expect("start a item");
    assert_eq!(
        engine.latest_generation(source, "b").unwrap().unwrap().state,
        TaskState::Enabled
    );

    let migration = MigrationBuilder::new("flow", "v1", "v2")
        .fast_forward("flow/b")
        .with_finalizer(migration_hook(|ctx| async move {
            ctx.audit(json!({ "event": "migration-finalized" }));
            Ok(())
        }))
        .build();
    let target = engine.migrate(&migration, source).await.expect("migrate");

    // Source torn down, pairing recorded.
    let record = engine.migration_record(source).unwrap().expect("record");
    assert_eq!(record.to, target);
    assert_eq!(
        engine.workflow(source).unwrap().state,
        WorkflowState::Canceled
    );

    // a carried over with its generation and its live work item.
    let target_row = engine.workflow(target).unwrap();
    assert_eq!(target_row.version, "v2");
    assert_eq!(target_row.state, WorkflowState::Started);
    let carried = engine.latest_generation(target, "a").unwrap().unwrap();
    assert_eq!(carried.generation, 0);
    assert_eq!(carried.state, TaskState::Started);
    let items = engine.work_items_of(target, "a", 0).unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, item);
    assert_eq!(items[0].state, WorkItemState::Started);
    assert!(engine.work_items_of(source, "a", 0).unwrap().is_empty());

    // b fast-forwarded: completed without any work item, and its outgoing
    // token enabled c exactly as a natural completion would.
    let b_row = engine.latest_generation(target, "b").unwrap().unwrap();
    assert_eq!(b_row.state, TaskState::Completed);
    assert!(engine.work_items_of(target, "b", 0).unwrap().is_empty());
    assert_eq!(
        engine.latest_generation(target, "c").unwrap().unwrap().state,
        TaskState::Enabled
    );

    // The migrated instance runs to completion on the new version.
    engine
        .complete_work_item(item, json!({}))
        .await
        .expect("complete carried item");
    common::run_work_item(engine, target, "c").await;
    common::run_work_item(engine, target, "j").await;
    assert_eq!(
        engine.workflow(target).unwrap().state,
        WorkflowState::Completed
    );
}

#[tokio::test]
async fn a_source_migrates_at_most_once() {
    let harness = common::engine();
    let engine = &harness.engine;
    engine.versions().register(fork_graph("v1"));
    engine.versions().register(fork_graph("v2"));
    let source = engine
        .initialize_workflow("flow", "v1", json!({}))
        .await
        .expect("initialize");

    let migration = MigrationBuilder::new("flow", "v1", "v2").build();
    engine.migrate(&migration, source).await.expect("first migration");
    let replay = engine.migrate(&migration, source).await;
    assert!(matches!(replay, Err(EngineError::AlreadyMigrated(_))));
}

#[tokio::test]
async fn migration_checks_the_source_version() {
    let harness = common::engine();
    let engine = &harness.engine;
    engine.versions().register(fork_graph("v1"));
    engine.versions().register(fork_graph("v2"));
    let source = engine
        .initialize_workflow("flow", "v2", json!({}))
        .await
        .expect("initialize");

    let migration = MigrationBuilder::new("flow", "v1", "v2").build();
    let mismatch = engine.migrate(&migration, source).await;
    assert!(matches!(mismatch, Err(EngineError::PayloadInvalid(_))));
}

#[tokio::test]
async fn all_continue_migration_reaches_the_same_terminal_state() {
    let harness = common::engine();
    let engine = &harness.engine;
    engine.versions().register(fork_graph("v1"));
    engine.versions().register(fork_graph("v2"));
    let source = engine
        .initialize_workflow("flow", "v1", json!({}))
        .await
        .expect("initialize");

    // Every migrator defaults to Continue: the target must behave exactly
    // like the source would under the same external inputs.
    let migration = MigrationBuilder::new("flow", "v1", "v2").build();
    let target = engine.migrate(&migration, source).await.expect("migrate");

    // The ported enabled generations were withdrawn on the source side.
    assert_eq!(
        engine.latest_generation(source, "a").unwrap().unwrap().state,
        TaskState::Disabled
    );

    for task in ["a", "b", "c"] {
        common::run_work_item(engine, target, task).await;
    }
    common::run_work_item(engine, target, "j").await;
    let row = engine.workflow(target).unwrap();
    assert_eq!(row.state, WorkflowState::Completed);
    assert_eq!(engine.marking(target, "end").unwrap(), 1);
}
