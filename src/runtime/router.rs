//! XOR/OR routers
//!
//! When a task with an XOR or OR split finalises, its router chooses the
//! outgoing target(s). Routers are user code: async callbacks that read the
//! current workflow state and return routing decisions. They must be
//! deterministic given that state, must read the *latest* child state in
//! looping workflows, and must not write: any state change belongs in the
//! action that preceded the route.

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::EngineResult;
use crate::runtime::queries;
use crate::runtime::task::TaskRef;
use crate::runtime::work_item::WorkItemRow;
use crate::runtime::workflow::{WorkflowRef, WorkflowRow};
use crate::store::{ReadTxn, Txn};

/// One routing decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTo {
    /// Produce into the implicit condition between the source task and the
    /// named task
    Task(String),
    /// Produce into an explicit condition
    Condition(String),
}

impl RouteTo {
    /// Route to a directly-connected task
    pub fn task(name: impl Into<String>) -> Self {
        RouteTo::Task(name.into())
    }

    /// Route to an explicit condition
    pub fn condition(name: impl Into<String>) -> Self {
        RouteTo::Condition(name.into())
    }
}

/// Context handed to a router invocation
#[derive(Clone)]
pub struct RouterCtx {
    pub(crate) txn: Txn,
    /// Workflow the routed task belongs to
    pub workflow: WorkflowRef,
    /// The routed task generation
    pub task: TaskRef,
}

impl RouterCtx {
    /// Read-only handle to the host store
    pub fn store(&self) -> ReadTxn {
        ReadTxn::new(self.txn.clone())
    }

    /// Work items of the routed task's current generation, in creation order
    pub fn work_items(&self) -> EngineResult<Vec<WorkItemRow>> {
        queries::work_items_of(
            &self.txn,
            self.workflow.id,
            &self.task.name,
            self.task.generation,
        )
    }

    /// The most recent work item of the routed task across all generations.
    ///
    /// Routers in looping workflows must base decisions on this, never on an
    /// earlier iteration's child.
    pub fn latest_work_item(&self) -> EngineResult<Option<WorkItemRow>> {
        let mut items = queries::work_items_of_task(&self.txn, self.workflow.id, &self.task.name)?;
        Ok(items.pop())
    }

    /// Child workflows of the routed composite task's current generation
    pub fn child_workflows(&self) -> EngineResult<Vec<WorkflowRow>> {
        queries::child_workflows_of(
            &self.txn,
            self.workflow.id,
            &self.task.name,
            self.task.generation,
        )
    }

    /// The most recent child workflow across all generations
    pub fn latest_child_workflow(&self) -> EngineResult<Option<WorkflowRow>> {
        let mut children =
            queries::child_workflows_of_task(&self.txn, self.workflow.id, &self.task.name)?;
        Ok(children.pop())
    }
}

/// XOR router callback: exactly one target
pub type XorRouterFn =
    Arc<dyn Fn(RouterCtx) -> BoxFuture<'static, EngineResult<RouteTo>> + Send + Sync>;

/// OR router callback: one or more targets
pub type OrRouterFn =
    Arc<dyn Fn(RouterCtx) -> BoxFuture<'static, EngineResult<Vec<RouteTo>>> + Send + Sync>;

/// Router attached to a task with an XOR or OR split
#[derive(Clone)]
pub enum Router {
    /// Chooses exactly one outgoing target
    Xor(XorRouterFn),
    /// Chooses one or more outgoing targets
    Or(OrRouterFn),
}

impl Router {
    /// Lift a plain async fn into an XOR router
    pub fn xor<F, Fut>(f: F) -> Self
    where
        F: Fn(RouterCtx) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = EngineResult<RouteTo>> + Send + 'static,
    {
        Router::Xor(Arc::new(move |ctx| Box::pin(f(ctx))))
    }

    /// Lift a plain async fn into an OR router
    pub fn or<F, Fut>(f: F) -> Self
    where
        F: Fn(RouterCtx) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = EngineResult<Vec<RouteTo>>> + Send + 'static,
    {
        Router::Or(Arc::new(move |ctx| Box::pin(f(ctx))))
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Router::Xor(_) => f.write_str("Router::Xor"),
            Router::Or(_) => f.write_str("Router::Or"),
        }
    }
}
