//! Declarative workflow definition layer
//!
//! Builders assemble workflows, tasks, conditions, flows and cancellation
//! regions; `build(version)` compiles them into immutable arena graphs keyed
//! by `(workflow name, version name)` in the [`VersionManager`].

pub mod builder;
pub mod graph;
pub mod version;

pub use builder::{
    CompositeTaskBuilder, ConditionFlowBuilder, DummyTaskBuilder, DynamicCompositeTaskBuilder,
    RegionBuilder, TaskBuilder, TaskFlowBuilder, WorkflowBuilder,
};
pub use graph::{
    implicit_condition_name, CondIdx, ConditionNode, FlowEdge, FlowIdx, JoinType, SplitType,
    TaskIdx, TaskKind, TaskNode, WorkflowGraph, DEFAULT_STATS_SHARDS,
};
pub use version::VersionManager;
