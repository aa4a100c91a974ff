//! The runtime layer
//!
//! Per-instance state machines (workflows, tasks, conditions, work items),
//! sharded statistics, policies, routers, activities, the typed action
//! surface, and the engine that drives them.

pub mod activities;
pub mod actions;
pub mod cancellation;
pub mod condition;
pub mod engine;
pub mod policy;
pub(crate) mod queries;
pub mod router;
pub mod stats;
pub mod task;
pub mod work_item;
pub mod workflow;

pub use activities::{
    activity_handler, ActivityCtx, ActivityHandler, TaskActivities, WorkflowActivities,
};
pub use actions::{
    action_handler, any_payload, schema_of, ActionCallback, ActionDef, PayloadValidator,
    WorkItemActionKind, WorkItemActions, WorkflowActions,
};
pub use cancellation::{CancellationReason, CancellationRegion};
pub use condition::ConditionRow;
pub use engine::{
    scheduled_fn, Engine, EngineBuilder, EngineConfig, ScheduledFn, ScheduledInvocation,
};
pub use policy::{
    default_policy, policy, ChildState, ChildTransition, PolicyDecision, TransitionPolicy,
};
pub use router::{OrRouterFn, RouteTo, Router, RouterCtx, XorRouterFn};
pub use stats::{shard_for, StatsEvent, StatsShardRow, TaskStats};
pub use task::{TaskRef, TaskRow, TaskState, TaskStateLogRow};
pub use work_item::{WorkItemId, WorkItemRow, WorkItemState};
pub use workflow::{
    ExecutionMode, ParentRef, WorkflowId, WorkflowRef, WorkflowRow, WorkflowState,
};
