//! Typed workflow-net runtime
//!
//! Tasquencer is a durable Petri-net-style orchestrator over a transactional
//! document store. Workflow definitions are composed in Rust through a fluent
//! builder API and compiled into immutable graphs of conditions (places) and
//! tasks (transitions). A running workflow instance advances by firing tasks,
//! which produce, consume and coordinate work items (units of external or
//! human work) under AND/XOR/OR split and join semantics, cancellation
//! regions, composite (nested) workflows and versioned migrations between
//! workflow definitions.
//!
//! The engine:
//! - maintains condition markings and fires flows inside retryable store
//!   transactions
//! - drives task, work-item and workflow state machines with per-generation
//!   sharded statistics
//! - evaluates user-supplied routers and state-transition policies
//! - migrates live instances between definition versions (Continue /
//!   FastForward per task)
//! - exposes a typed, validated action surface for application code

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod audit;
pub mod definition;
pub mod error;
pub mod migration;
pub mod observability;
pub mod runtime;
pub mod store;

pub use audit::{AuditEvent, AuditSink, MemoryAudit, NoopAudit};
pub use definition::{
    CompositeTaskBuilder, DummyTaskBuilder, DynamicCompositeTaskBuilder, JoinType, SplitType,
    TaskBuilder, VersionManager, WorkflowBuilder, WorkflowGraph,
};
pub use error::{EngineError, EngineResult};
pub use migration::{
    migration_hook, task_migrator, Migration, MigrationBuilder, MigrationCtx, MigrationDecision,
    MigrationRow, TaskMigratorCtx,
};
pub use runtime::{
    action_handler, activity_handler, any_payload, default_policy, policy, scheduled_fn,
    schema_of, ActionDef, ActivityCtx, CancellationReason, ChildState, ChildTransition, Engine,
    EngineBuilder, EngineConfig, ExecutionMode, PolicyDecision, RouteTo, Router, RouterCtx,
    TaskActivities, TaskState, TaskStats, WorkItemActionKind, WorkItemActions, WorkItemId,
    WorkItemState, WorkflowActions, WorkflowActivities, WorkflowId, WorkflowState,
};
pub use store::{DocumentStore, ReadTxn, Txn};
