//! Immutable definition graphs
//!
//! A built workflow definition is an arena: tasks, conditions and flows live
//! in vectors and reference each other through integer indices. The graph is
//! immutable after `build` and shared as `Arc<WorkflowGraph>`; per-instance
//! state (markings, generations, statistics) lives in the store, keyed by
//! workflow id and element name.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::runtime::activities::{TaskActivities, WorkflowActivities};
use crate::runtime::actions::{WorkflowActions, WorkItemActions};
use crate::runtime::cancellation::CancellationRegion;
use crate::runtime::policy::TransitionPolicy;
use crate::runtime::router::{RouteTo, Router};

/// Default shard count for task statistics; raise per task for high fan-out
pub const DEFAULT_STATS_SHARDS: u32 = 2;

/// Index of a task node within its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskIdx(pub usize);

/// Index of a condition node within its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CondIdx(pub usize);

/// Index of a flow edge within its graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowIdx(pub usize);

/// How a completing task selects outgoing targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitType {
    /// One token into every outgoing condition
    #[default]
    And,
    /// The XOR router picks exactly one target
    Xor,
    /// The OR router picks one or more targets
    Or,
}

/// How incoming markings enable a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinType {
    /// Every incoming condition must be marked; one token consumed from each
    #[default]
    And,
    /// One marked incoming condition suffices; ties break by declaration order
    Xor,
    /// One token consumed from every currently marked incoming condition
    Or,
}

/// What kind of work a task coordinates
#[derive(Clone)]
pub enum TaskKind {
    /// Hosts externally advanceable work items
    WorkItem,
    /// No children; completes immediately on enablement
    Dummy,
    /// Hosts instances of one child workflow definition
    Composite {
        /// The child definition
        child: Arc<WorkflowGraph>,
    },
    /// Hosts instances chosen from a set of child workflow definitions
    DynamicComposite {
        /// Child definitions by workflow name
        children: HashMap<String, Arc<WorkflowGraph>>,
    },
}

impl std::fmt::Debug for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::WorkItem => f.write_str("WorkItem"),
            TaskKind::Dummy => f.write_str("Dummy"),
            TaskKind::Composite { child } => write!(f, "Composite({})", child.name),
            TaskKind::DynamicComposite { children } => {
                write!(f, "DynamicComposite({} children)", children.len())
            }
        }
    }
}

/// One task (transition) of the net
#[derive(Clone)]
pub struct TaskNode {
    /// Task name, unique within the workflow
    pub name: String,
    /// Kind of work coordinated
    pub kind: TaskKind,
    /// Outgoing selection semantics
    pub split: SplitType,
    /// Incoming enablement semantics
    pub join: JoinType,
    /// Statistics shard count for this task's generations
    pub stats_shard_count: u32,
    /// Optional human description
    pub description: Option<String>,
    /// Incoming condition-to-task flows, in declaration order
    pub incoming: Vec<FlowIdx>,
    /// Outgoing task-to-condition flows, in declaration order
    pub outgoing: Vec<FlowIdx>,
    /// Router for XOR/OR splits
    pub router: Option<Router>,
    /// State-transition policy
    pub policy: TransitionPolicy,
    /// Lifecycle hooks
    pub activities: TaskActivities,
    /// Work-item action surface
    pub actions: WorkItemActions,
    /// Cancellation region applied when this task completes
    pub region: Option<CancellationRegion>,
}

/// One condition (place) of the net
#[derive(Debug, Clone)]
pub struct ConditionNode {
    /// Condition name; implicit conditions use the derived `from->to` name
    pub name: String,
    /// Materialised from a direct task-to-task flow; invisible to user code
    pub implicit: bool,
    /// Incoming task-to-condition flows
    pub incoming: Vec<FlowIdx>,
    /// Outgoing condition-to-task flows
    pub outgoing: Vec<FlowIdx>,
}

/// One directed edge of the net
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEdge {
    /// Consuming edge: condition enables task
    CondToTask {
        /// Source condition
        from: CondIdx,
        /// Target task
        to: TaskIdx,
    },
    /// Producing edge: task marks condition
    TaskToCond {
        /// Source task
        from: TaskIdx,
        /// Target condition
        to: CondIdx,
    },
}

/// Immutable, validated workflow definition
#[derive(Clone)]
pub struct WorkflowGraph {
    /// Definition name
    pub name: String,
    /// Definition version
    pub version: String,
    /// Optional human description
    pub description: Option<String>,
    /// Task arena
    pub tasks: Vec<TaskNode>,
    /// Condition arena
    pub conditions: Vec<ConditionNode>,
    /// Flow arena
    pub flows: Vec<FlowEdge>,
    /// The start condition; receives one token on initialization
    pub start: CondIdx,
    /// The end condition; marking it triggers workflow completion
    pub end: CondIdx,
    /// Workflow-level lifecycle hooks
    pub activities: WorkflowActivities,
    /// Workflow-level action surface
    pub actions: WorkflowActions,
    pub(crate) task_index: HashMap<String, TaskIdx>,
    pub(crate) condition_index: HashMap<String, CondIdx>,
}

impl std::fmt::Debug for WorkflowGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowGraph")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("tasks", &self.tasks.len())
            .field("conditions", &self.conditions.len())
            .field("flows", &self.flows.len())
            .finish()
    }
}

/// Derived name of the implicit condition between two directly-connected
/// tasks
pub fn implicit_condition_name(from: &str, to: &str) -> String {
    format!("{}->{}", from, to)
}

impl WorkflowGraph {
    /// Look up a task by name
    pub fn task(&self, name: &str) -> Option<TaskIdx> {
        self.task_index.get(name).copied()
    }

    /// Task node at an index
    pub fn task_node(&self, idx: TaskIdx) -> &TaskNode {
        &self.tasks[idx.0]
    }

    /// Look up a condition by name
    pub fn condition(&self, name: &str) -> Option<CondIdx> {
        self.condition_index.get(name).copied()
    }

    /// Condition node at an index
    pub fn condition_node(&self, idx: CondIdx) -> &ConditionNode {
        &self.conditions[idx.0]
    }

    /// Incoming conditions of a task, in declaration order
    pub fn incoming_conditions(&self, task: TaskIdx) -> Vec<CondIdx> {
        self.tasks[task.0]
            .incoming
            .iter()
            .filter_map(|flow| match self.flows[flow.0] {
                FlowEdge::CondToTask { from, .. } => Some(from),
                FlowEdge::TaskToCond { .. } => None,
            })
            .collect()
    }

    /// Outgoing conditions of a task, in declaration order
    pub fn outgoing_conditions(&self, task: TaskIdx) -> Vec<CondIdx> {
        self.tasks[task.0]
            .outgoing
            .iter()
            .filter_map(|flow| match self.flows[flow.0] {
                FlowEdge::TaskToCond { to, .. } => Some(to),
                FlowEdge::CondToTask { .. } => None,
            })
            .collect()
    }

    /// Tasks consuming from a condition, in declaration order
    pub fn consumers(&self, condition: CondIdx) -> Vec<TaskIdx> {
        self.conditions[condition.0]
            .outgoing
            .iter()
            .filter_map(|flow| match self.flows[flow.0] {
                FlowEdge::CondToTask { to, .. } => Some(to),
                FlowEdge::TaskToCond { .. } => None,
            })
            .collect()
    }

    /// Resolve a routing decision of `from` to one of its outgoing
    /// conditions
    pub(crate) fn route_target(&self, from: TaskIdx, route: &RouteTo) -> EngineResult<CondIdx> {
        let outgoing = self.outgoing_conditions(from);
        match route {
            RouteTo::Condition(name) => outgoing
                .into_iter()
                .find(|c| !self.conditions[c.0].implicit && self.conditions[c.0].name == *name)
                .ok_or_else(|| EngineError::UnknownElement(format!("condition {}", name))),
            RouteTo::Task(name) => {
                let target = implicit_condition_name(&self.tasks[from.0].name, name);
                outgoing
                    .into_iter()
                    .find(|c| self.conditions[c.0].implicit && self.conditions[c.0].name == target)
                    .ok_or_else(|| EngineError::UnknownElement(format!("task {}", name)))
            }
        }
    }

    /// Child definition of a composite task; `name` selects among a dynamic
    /// composite's children
    pub fn child_graph(
        &self,
        task: TaskIdx,
        name: Option<&str>,
    ) -> EngineResult<Arc<WorkflowGraph>> {
        let node = &self.tasks[task.0];
        match (&node.kind, name) {
            (TaskKind::Composite { child }, None) => Ok(child.clone()),
            (TaskKind::Composite { child }, Some(requested)) if child.name == requested => {
                Ok(child.clone())
            }
            (TaskKind::DynamicComposite { children }, Some(requested)) => children
                .get(requested)
                .cloned()
                .ok_or_else(|| EngineError::UnknownElement(format!("child workflow {}", requested))),
            (TaskKind::DynamicComposite { .. }, None) => Err(EngineError::UnknownElement(format!(
                "dynamic composite task {} needs a child workflow name",
                node.name
            ))),
            _ => Err(EngineError::UnknownElement(format!(
                "task {} hosts no child workflows",
                node.name
            ))),
        }
    }
}
