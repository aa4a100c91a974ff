//! Looping routers, cancellation regions, and composite-task teardown

mod common;

use std::sync::Arc;

use serde_json::json;
use tasquencer::{
    activity_handler, CompositeTaskBuilder, DummyTaskBuilder, DynamicCompositeTaskBuilder,
    EngineError, JoinType, MemoryAudit, RouteTo, Router, SplitType, TaskActivities, TaskBuilder,
    TaskState, WorkflowActivities, WorkflowBuilder, WorkflowState,
};

fn review_loop() -> std::sync::Arc<tasquencer::WorkflowGraph> {
    let router = Router::xor(|ctx: tasquencer::RouterCtx| async move {
        let latest = ctx
            .latest_work_item()?
            .ok_or_else(|| EngineError::EntityNotFound("review work item".into()))?;
        let approved = latest
            .payload
            .get("approved")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        Ok(if approved {
            RouteTo::task("finalize")
        } else {
            RouteTo::task("edit")
        })
    });
    WorkflowBuilder::new("review-loop")
        .start_condition("start")
        .end_condition("end")
        .task(
            "review",
            TaskBuilder::new()
                .with_join(JoinType::Xor)
                .with_split(SplitType::Xor)
                .with_router(router),
        )
        .task("edit", TaskBuilder::new())
        .task("finalize", TaskBuilder::new())
        .connect_condition("start", |c| c.task("review"))
        .connect_task("review", |t| t.task("edit").task("finalize"))
        .connect_task("edit", |t| t.task("review"))
        .connect_task("finalize", |t| t.condition("end"))
        .build("v1")
        .expect("build review loop")
}

#[tokio::test]
async fn looping_router_reads_the_most_recent_decision() {
    let harness = common::engine();
    let engine = &harness.engine;
    engine.versions().register(review_loop());
    let wf = engine
        .initialize_workflow("review-loop", "v1", json!({}))
        .await
        .expect("initialize");

    // First pass is rejected: the router must send the flow back to edit.
    common::complete_work_item_with(engine, wf, "review", json!({ "approved": false })).await;
    assert!(engine.latest_generation(wf, "finalize").unwrap().is_none());
    assert_eq!(
        engine.latest_generation(wf, "edit").unwrap().unwrap().state,
        TaskState::Enabled
    );

    common::run_work_item(engine, wf, "edit").await;
    let review_generations = engine.task_generations(wf, "review").unwrap();
    assert_eq!(review_generations.len(), 2);

    // Second pass approves: the router must see this decision, not the
    // first one, and finalize exactly once.
    common::complete_work_item_with(engine, wf, "review", json!({ "approved": true })).await;
    let finalize_generations = engine.task_generations(wf, "finalize").unwrap();
    assert_eq!(finalize_generations.len(), 1);
    assert!(engine.latest_generation(wf, "edit").unwrap().unwrap().state == TaskState::Completed);

    common::run_work_item(engine, wf, "finalize").await;
    assert_eq!(engine.workflow(wf).unwrap().state, WorkflowState::Completed);
    assert_eq!(engine.task_generations(wf, "finalize").unwrap().len(), 1);
}

#[tokio::test]
async fn cancellation_region_cancels_the_losing_branch() {
    let graph = WorkflowBuilder::new("race")
        .start_condition("start")
        .end_condition("end")
        .dummy_task("fork", DummyTaskBuilder::new())
        .task("fast", TaskBuilder::new())
        .task("slow", TaskBuilder::new())
        .connect_condition("start", |c| c.task("fork"))
        .connect_task("fork", |t| t.task("fast").task("slow"))
        .connect_task("fast", |t| t.condition("end"))
        .connect_task("slow", |t| t.condition("end"))
        .with_cancellation_region("fast", |r| r.task("slow"))
        .build("v1")
        .expect("build race");

    let harness = common::engine();
    let engine = &harness.engine;
    engine.versions().register(graph);
    let wf = engine
        .initialize_workflow("race", "v1", json!({}))
        .await
        .expect("initialize");

    common::run_work_item(engine, wf, "fast").await;
    assert_eq!(
        engine.latest_generation(wf, "slow").unwrap().unwrap().state,
        TaskState::Canceled
    );
    assert_eq!(engine.workflow(wf).unwrap().state, WorkflowState::Completed);
}

#[tokio::test]
async fn cancellation_region_on_a_terminal_task_is_a_no_op() {
    let graph = WorkflowBuilder::new("late-region")
        .start_condition("start")
        .end_condition("end")
        .dummy_task("fork", DummyTaskBuilder::new())
        .task("early", TaskBuilder::new())
        .task("late", TaskBuilder::new().with_join(JoinType::And))
        .connect_condition("start", |c| c.task("fork"))
        .connect_task("fork", |t| t.task("early").task("late"))
        .connect_task("early", |t| t.task("late"))
        .connect_task("late", |t| t.condition("end"))
        .with_cancellation_region("late", |r| r.task("early"))
        .build("v1")
        .expect("build late region");

    let harness = common::engine();
    let engine = &harness.engine;
    engine.versions().register(graph);
    let wf = engine
        .initialize_workflow("late-region", "v1", json!({}))
        .await
        .expect("initialize");

    common::run_work_item(engine, wf, "early").await;
    common::run_work_item(engine, wf, "late").await;

    // early finished before late's region could touch it.
    assert_eq!(
        engine.latest_generation(wf, "early").unwrap().unwrap().state,
        TaskState::Completed
    );
    assert_eq!(engine.workflow(wf).unwrap().state, WorkflowState::Completed);
}

#[tokio::test]
async fn cancellation_region_clears_condition_markings() {
    let graph = WorkflowBuilder::new("clearing")
        .start_condition("start")
        .end_condition("end")
        .condition("pending")
        .condition("never")
        .dummy_task("fork", DummyTaskBuilder::new())
        .task("winner", TaskBuilder::new())
        .task("waiter", TaskBuilder::new().with_join(JoinType::And))
        .connect_condition("start", |c| c.task("fork"))
        .connect_condition("pending", |c| c.task("waiter"))
        .connect_condition("never", |c| c.task("waiter"))
        .connect_task("fork", |t| t.task("winner").condition("pending"))
        .connect_task("winner", |t| t.condition("end"))
        .connect_task("waiter", |t| t.condition("end"))
        .with_cancellation_region("winner", |r| r.condition("pending"))
        .build("v1")
        .expect("build clearing");

    let harness = common::engine();
    let engine = &harness.engine;
    engine.versions().register(graph);
    let wf = engine
        .initialize_workflow("clearing", "v1", json!({}))
        .await
        .expect("initialize");

    // fork marked "pending"; waiter also needs "never", so it stays
    // disabled and the marking is visible.
    assert_eq!(engine.marking(wf, "pending").unwrap(), 1);

    common::run_work_item(engine, wf, "winner").await;
    assert_eq!(engine.marking(wf, "pending").unwrap(), 0);
    assert_eq!(engine.workflow(wf).unwrap().state, WorkflowState::Completed);
}

fn parent_with_composite(audit_child_cancel: bool) -> std::sync::Arc<tasquencer::WorkflowGraph> {
    let mut child = WorkflowBuilder::new("sub")
        .start_condition("start")
        .end_condition("end")
        .task("work", TaskBuilder::new())
        .connect_condition("start", |c| c.task("work"))
        .connect_task("work", |t| t.condition("end"));
    if audit_child_cancel {
        child = child.with_activities(WorkflowActivities {
            on_canceled: Some(activity_handler(|ctx: tasquencer::ActivityCtx| async move {
                ctx.audit(json!({
                    "event": "child-canceled",
                    "reason": ctx.reason.map(|r| r.to_string()),
                }));
                Ok(())
            })),
            ..WorkflowActivities::default()
        });
    }
    WorkflowBuilder::new("parent")
        .start_condition("start")
        .end_condition("end")
        .composite_task("ct", CompositeTaskBuilder::new(child))
        .connect_condition("start", |c| c.task("ct"))
        .connect_task("ct", |t| t.condition("end"))
        .build("v1")
        .expect("build parent")
}

#[tokio::test]
async fn composite_task_completes_with_its_child_workflow() {
    let harness = common::engine();
    let engine = &harness.engine;
    engine.versions().register(parent_with_composite(false));
    let wf = engine
        .initialize_workflow("parent", "v1", json!({}))
        .await
        .expect("initialize");

    let children = engine.child_workflows(wf, "ct", 0).unwrap();
    assert_eq!(children.len(), 1);
    let child = &children[0];
    assert_eq!(child.path, vec!["ct".to_string()]);
    assert_eq!(child.realized_path, vec!["ct[0]".to_string()]);
    assert_eq!(child.state, WorkflowState::Started);

    common::run_work_item(engine, child.id, "work").await;

    assert_eq!(
        engine.workflow(child.id).unwrap().state,
        WorkflowState::Completed
    );
    assert_eq!(engine.workflow(wf).unwrap().state, WorkflowState::Completed);
    let stats = engine.aggregate_stats(wf, "ct", 0).unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.completed, 1);
}

#[tokio::test]
async fn canceling_a_composite_task_tears_down_its_children() {
    let audit = Arc::new(MemoryAudit::new());
    let harness = common::engine_with_audit(audit.clone());
    let engine = &harness.engine;
    engine.versions().register(parent_with_composite(true));
    let wf = engine
        .initialize_workflow("parent", "v1", json!({}))
        .await
        .expect("initialize");
    let child = engine.child_workflows(wf, "ct", 0).unwrap()[0].clone();
    assert_eq!(child.state, WorkflowState::Started);

    engine.cancel_task(wf, "ct").await.expect("cancel ct");

    assert_eq!(
        engine.workflow(child.id).unwrap().state,
        WorkflowState::Canceled
    );
    assert_eq!(
        engine.latest_generation(wf, "ct").unwrap().unwrap().state,
        TaskState::Canceled
    );
    // The parent proceeds: canceled, not failed, and still live.
    assert_eq!(engine.workflow(wf).unwrap().state, WorkflowState::Started);

    let events = audit.events();
    let cancel_event = events
        .iter()
        .find(|e| e.payload["event"] == "child-canceled")
        .expect("child cancel audit event");
    assert_eq!(cancel_event.payload["reason"], "teardown");
    assert_eq!(cancel_event.workflow_id, child.id);
}

#[tokio::test]
async fn dynamic_composite_enacts_the_chosen_child_definition() {
    let stamp = |name: &str, task: &str| {
        WorkflowBuilder::new(name)
            .start_condition("start")
            .end_condition("end")
            .task(task, TaskBuilder::new())
            .connect_condition("start", {
                let task = task.to_owned();
                move |c| c.task(task)
            })
            .connect_task(task, |t| t.condition("end"))
    };
    let graph = WorkflowBuilder::new("triage")
        .start_condition("start")
        .end_condition("end")
        .dynamic_composite_task(
            "pick",
            DynamicCompositeTaskBuilder::new()
                .with_child(stamp("fast-track", "stamp"))
                .with_child(stamp("full-review", "inspect"))
                .with_activities(TaskActivities {
                    on_enabled: Some(activity_handler(|ctx: tasquencer::ActivityCtx| async move {
                        ctx.initialize_named_child_workflow("fast-track", json!({}))
                            .await?;
                        Ok(())
                    })),
                    ..TaskActivities::default()
                }),
        )
        .connect_condition("start", |c| c.task("pick"))
        .connect_task("pick", |t| t.condition("end"))
        .build("v1")
        .expect("build triage");

    let harness = common::engine();
    let engine = &harness.engine;
    engine.versions().register(graph);
    let wf = engine
        .initialize_workflow("triage", "v1", json!({}))
        .await
        .expect("initialize");

    let children = engine.child_workflows(wf, "pick", 0).unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].name, "fast-track");

    common::run_work_item(engine, children[0].id, "stamp").await;
    assert_eq!(engine.workflow(wf).unwrap().state, WorkflowState::Completed);
    let stats = engine.aggregate_stats(wf, "pick", 0).unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.completed, 1);
}

#[tokio::test]
async fn child_failure_fails_the_whole_lineage_by_default() {
    let harness = common::engine();
    let engine = &harness.engine;
    engine.versions().register(parent_with_composite(false));
    let wf = engine
        .initialize_workflow("parent", "v1", json!({}))
        .await
        .expect("initialize");
    let child = engine.child_workflows(wf, "ct", 0).unwrap()[0].clone();

    let item = engine
        .initialize_work_item(child.id, "work", json!({}))
        .await
        .expect("initialize item");
    engine.start_work_item(item, json!({})).await.expect("start");
    engine.fail_work_item(item, json!({})).await.expect("fail");

    assert_eq!(
        engine.workflow(child.id).unwrap().state,
        WorkflowState::Failed
    );
    assert_eq!(
        engine.latest_generation(wf, "ct").unwrap().unwrap().state,
        TaskState::Failed
    );
    assert_eq!(engine.workflow(wf).unwrap().state, WorkflowState::Failed);
}
