//! Split and join semantics: XOR routing, AND fan-out/fan-in, OR joins,
//! and deterministic XOR-join tie-breaking

mod common;

use serde_json::json;
use tasquencer::{
    DummyTaskBuilder, JoinType, RouteTo, Router, SplitType, TaskBuilder, TaskState,
    WorkflowBuilder, WorkflowState,
};

#[tokio::test]
async fn xor_split_routes_to_exactly_one_branch() {
    let graph = WorkflowBuilder::new("choice")
        .start_condition("start")
        .end_condition("end")
        .task(
            "q",
            TaskBuilder::new()
                .with_split(SplitType::Xor)
                .with_router(Router::xor(|_ctx| async { Ok(RouteTo::task("x")) })),
        )
        .task("x", TaskBuilder::new())
        .task("y", TaskBuilder::new())
        .connect_condition("start", |c| c.task("q"))
        .connect_task("q", |t| t.task("x").task("y"))
        .connect_task("x", |t| t.condition("end"))
        .connect_task("y", |t| t.condition("end"))
        .build("v1")
        .expect("build");

    let harness = common::engine();
    let engine = &harness.engine;
    engine.versions().register(graph);
    let wf = engine
        .initialize_workflow("choice", "v1", json!({}))
        .await
        .expect("initialize");

    common::run_work_item(engine, wf, "q").await;
    assert_eq!(
        engine.latest_generation(wf, "x").unwrap().unwrap().state,
        TaskState::Enabled
    );
    // The untaken branch never sees a task row or a token.
    assert!(engine.latest_generation(wf, "y").unwrap().is_none());
    assert_eq!(engine.marking(wf, "q->y").unwrap(), 0);

    common::run_work_item(engine, wf, "x").await;
    assert_eq!(engine.workflow(wf).unwrap().state, WorkflowState::Completed);
    assert!(engine.latest_generation(wf, "y").unwrap().is_none());
}

#[tokio::test]
async fn and_split_fans_out_and_and_join_waits_for_all() {
    let graph = WorkflowBuilder::new("parallel")
        .start_condition("start")
        .end_condition("end")
        .task("p", TaskBuilder::new())
        .task("l", TaskBuilder::new())
        .task("r", TaskBuilder::new())
        .task("j", TaskBuilder::new().with_join(JoinType::And))
        .connect_condition("start", |c| c.task("p"))
        .connect_task("p", |t| t.task("l").task("r"))
        .connect_task("l", |t| t.task("j"))
        .connect_task("r", |t| t.task("j"))
        .connect_task("j", |t| t.condition("end"))
        .build("v1")
        .expect("build");

    let harness = common::engine();
    let engine = &harness.engine;
    engine.versions().register(graph);
    let wf = engine
        .initialize_workflow("parallel", "v1", json!({}))
        .await
        .expect("initialize");

    common::run_work_item(engine, wf, "p").await;
    // Both branches enable concurrently.
    assert_eq!(
        engine.latest_generation(wf, "l").unwrap().unwrap().state,
        TaskState::Enabled
    );
    assert_eq!(
        engine.latest_generation(wf, "r").unwrap().unwrap().state,
        TaskState::Enabled
    );

    common::run_work_item(engine, wf, "l").await;
    // One of two join tokens present: j stays disabled.
    assert!(engine.latest_generation(wf, "j").unwrap().is_none());
    assert_eq!(engine.marking(wf, "l->j").unwrap(), 1);

    common::run_work_item(engine, wf, "r").await;
    let generations = engine.task_generations(wf, "j").unwrap();
    assert_eq!(generations.len(), 1);
    assert_eq!(generations[0].state, TaskState::Enabled);

    common::run_work_item(engine, wf, "j").await;
    assert_eq!(engine.workflow(wf).unwrap().state, WorkflowState::Completed);
}

#[tokio::test]
async fn xor_join_breaks_ties_by_declaration_order() {
    let graph = WorkflowBuilder::new("tie")
        .start_condition("start")
        .end_condition("end")
        .condition("first")
        .condition("second")
        .dummy_task("seed", DummyTaskBuilder::new())
        .task("t", TaskBuilder::new().with_join(JoinType::Xor))
        .connect_condition("start", |c| c.task("seed"))
        .connect_condition("first", |c| c.task("t"))
        .connect_condition("second", |c| c.task("t"))
        .connect_task("seed", |t| t.condition("first").condition("second"))
        .connect_task("t", |t| t.condition("end"))
        .build("v1")
        .expect("build");

    let harness = common::engine();
    let engine = &harness.engine;
    engine.versions().register(graph);
    let wf = engine
        .initialize_workflow("tie", "v1", json!({}))
        .await
        .expect("initialize");

    // The seed marked both conditions; the XOR join consumed from the first
    // by declaration order and left the second alone.
    assert_eq!(
        engine.latest_generation(wf, "t").unwrap().unwrap().state,
        TaskState::Enabled
    );
    assert_eq!(engine.marking(wf, "first").unwrap(), 0);
    assert_eq!(engine.marking(wf, "second").unwrap(), 1);
}

#[tokio::test]
async fn or_split_and_or_join_honor_every_marked_branch() {
    let graph = WorkflowBuilder::new("spread")
        .start_condition("start")
        .end_condition("end")
        .task(
            "s",
            TaskBuilder::new()
                .with_split(SplitType::Or)
                .with_router(Router::or(|_ctx| async {
                    Ok(vec![RouteTo::task("x"), RouteTo::task("y")])
                })),
        )
        .task("x", TaskBuilder::new())
        .task("y", TaskBuilder::new())
        .task("m", TaskBuilder::new().with_join(JoinType::Or))
        .connect_condition("start", |c| c.task("s"))
        .connect_task("s", |t| t.task("x").task("y"))
        .connect_task("x", |t| t.task("m"))
        .connect_task("y", |t| t.task("m"))
        .connect_task("m", |t| t.condition("end"))
        .build("v1")
        .expect("build");

    let harness = common::engine();
    let engine = &harness.engine;
    engine.versions().register(graph);
    let wf = engine
        .initialize_workflow("spread", "v1", json!({}))
        .await
        .expect("initialize");

    common::run_work_item(engine, wf, "s").await;
    assert!(engine.latest_generation(wf, "x").unwrap().is_some());
    assert!(engine.latest_generation(wf, "y").unwrap().is_some());

    // x finishes first: the OR join fires on what is marked.
    common::run_work_item(engine, wf, "x").await;
    assert_eq!(engine.task_generations(wf, "m").unwrap().len(), 1);
    common::run_work_item(engine, wf, "m").await;

    // y's token arrives later; it does not expire and re-enables m.
    common::run_work_item(engine, wf, "y").await;
    let generations = engine.task_generations(wf, "m").unwrap();
    assert_eq!(generations.len(), 2);
    common::run_work_item(engine, wf, "m").await;

    assert_eq!(engine.workflow(wf).unwrap().state, WorkflowState::Completed);
    assert_eq!(engine.marking(wf, "end").unwrap(), 2);
}
