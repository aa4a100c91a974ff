//! Fluent workflow builders
//!
//! Workflows are assembled by chaining builder calls and compiled into
//! immutable [`WorkflowGraph`]s by `build(version)`. Split and join kinds
//! are plain enums; `build` runs a structural validation pass that rejects
//! ill-formed definitions: a missing start or end condition, an XOR/OR
//! split without a matching router, duplicate connections, or references to
//! undeclared elements.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::definition::graph::{
    implicit_condition_name, CondIdx, ConditionNode, FlowEdge, FlowIdx, JoinType, SplitType,
    TaskIdx, TaskKind, TaskNode, WorkflowGraph, DEFAULT_STATS_SHARDS,
};
use crate::error::{EngineError, EngineResult};
use crate::runtime::activities::{TaskActivities, WorkflowActivities};
use crate::runtime::actions::{WorkflowActions, WorkItemActions};
use crate::runtime::cancellation::CancellationRegion;
use crate::runtime::policy::{default_policy, TransitionPolicy};
use crate::runtime::router::Router;

/// Target of a task-sourced flow
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum FlowTarget {
    Task(String),
    Condition(String),
}

/// Collects the targets of one `connect_condition` call
#[derive(Debug, Clone, Default)]
pub struct ConditionFlowBuilder {
    targets: Vec<String>,
}

impl ConditionFlowBuilder {
    /// Flow into the named task
    pub fn task(mut self, name: impl Into<String>) -> Self {
        self.targets.push(name.into());
        self
    }
}

/// Collects the targets of one `connect_task` call
#[derive(Debug, Clone, Default)]
pub struct TaskFlowBuilder {
    targets: Vec<FlowTarget>,
}

impl TaskFlowBuilder {
    /// Flow into the named task through an implicit condition
    pub fn task(mut self, name: impl Into<String>) -> Self {
        self.targets.push(FlowTarget::Task(name.into()));
        self
    }

    /// Flow into the named explicit condition
    pub fn condition(mut self, name: impl Into<String>) -> Self {
        self.targets.push(FlowTarget::Condition(name.into()));
        self
    }
}

/// Collects the members of one cancellation region
#[derive(Debug, Clone, Default)]
pub struct RegionBuilder {
    tasks: Vec<String>,
    conditions: Vec<String>,
}

impl RegionBuilder {
    /// Cancel the named task's live generations when the owner completes
    pub fn task(mut self, name: impl Into<String>) -> Self {
        self.tasks.push(name.into());
        self
    }

    /// Clear the named condition's marking when the owner completes
    pub fn condition(mut self, name: impl Into<String>) -> Self {
        self.conditions.push(name.into());
        self
    }
}

/// Builder for a work-item task
#[derive(Clone, Default)]
pub struct TaskBuilder {
    description: Option<String>,
    split: SplitType,
    join: JoinType,
    router: Option<Router>,
    policy: Option<TransitionPolicy>,
    stats_shard_count: Option<u32>,
    activities: TaskActivities,
    actions: WorkItemActions,
}

impl TaskBuilder {
    /// New task with AND split and AND join
    pub fn new() -> Self {
        Self::default()
    }

    /// Human description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Outgoing selection semantics
    pub fn with_split(mut self, split: SplitType) -> Self {
        self.split = split;
        self
    }

    /// Incoming enablement semantics
    pub fn with_join(mut self, join: JoinType) -> Self {
        self.join = join;
        self
    }

    /// Router; required for XOR and OR splits
    pub fn with_router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    /// State-transition policy override
    pub fn with_policy(mut self, policy: TransitionPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Statistics shard count; raise for high fan-out tasks
    pub fn with_stats_shards(mut self, count: u32) -> Self {
        self.stats_shard_count = Some(count.max(1));
        self
    }

    /// Lifecycle hooks
    pub fn with_activities(mut self, activities: TaskActivities) -> Self {
        self.activities = activities;
        self
    }

    /// Work-item action surface
    pub fn with_actions(mut self, actions: WorkItemActions) -> Self {
        self.actions = actions;
        self
    }
}

/// Builder for a dummy task: no children, completes on enablement
#[derive(Clone, Default)]
pub struct DummyTaskBuilder {
    description: Option<String>,
    split: SplitType,
    join: JoinType,
    router: Option<Router>,
    activities: TaskActivities,
}

impl DummyTaskBuilder {
    /// New dummy task with AND split and AND join
    pub fn new() -> Self {
        Self::default()
    }

    /// Human description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Outgoing selection semantics
    pub fn with_split(mut self, split: SplitType) -> Self {
        self.split = split;
        self
    }

    /// Incoming enablement semantics
    pub fn with_join(mut self, join: JoinType) -> Self {
        self.join = join;
        self
    }

    /// Router; required for XOR and OR splits
    pub fn with_router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    /// Lifecycle hooks
    pub fn with_activities(mut self, activities: TaskActivities) -> Self {
        self.activities = activities;
        self
    }
}

/// Builder for a composite task wrapping one child workflow definition
#[derive(Clone)]
pub struct CompositeTaskBuilder {
    child: WorkflowBuilder,
    description: Option<String>,
    split: SplitType,
    join: JoinType,
    router: Option<Router>,
    policy: Option<TransitionPolicy>,
    stats_shard_count: Option<u32>,
    activities: TaskActivities,
}

impl CompositeTaskBuilder {
    /// Wrap a child workflow definition
    pub fn new(child: WorkflowBuilder) -> Self {
        Self {
            child,
            description: None,
            split: SplitType::default(),
            join: JoinType::default(),
            router: None,
            policy: None,
            stats_shard_count: None,
            activities: TaskActivities::default(),
        }
    }

    /// Human description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Outgoing selection semantics
    pub fn with_split(mut self, split: SplitType) -> Self {
        self.split = split;
        self
    }

    /// Incoming enablement semantics
    pub fn with_join(mut self, join: JoinType) -> Self {
        self.join = join;
        self
    }

    /// Router; required for XOR and OR splits
    pub fn with_router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    /// Policy deciding completion across the set of child workflows
    pub fn with_policy(mut self, policy: TransitionPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Statistics shard count
    pub fn with_stats_shards(mut self, count: u32) -> Self {
        self.stats_shard_count = Some(count.max(1));
        self
    }

    /// Lifecycle hooks; `on_enabled` typically initializes the child
    pub fn with_activities(mut self, activities: TaskActivities) -> Self {
        self.activities = activities;
        self
    }
}

/// Builder for a dynamic composite task wrapping a set of child definitions
#[derive(Clone)]
pub struct DynamicCompositeTaskBuilder {
    children: Vec<WorkflowBuilder>,
    description: Option<String>,
    split: SplitType,
    join: JoinType,
    router: Option<Router>,
    policy: Option<TransitionPolicy>,
    stats_shard_count: Option<u32>,
    activities: TaskActivities,
}

impl DynamicCompositeTaskBuilder {
    /// New dynamic composite with no children yet
    pub fn new() -> Self {
        Self {
            children: Vec::new(),
            description: None,
            split: SplitType::default(),
            join: JoinType::default(),
            router: None,
            policy: None,
            stats_shard_count: None,
            activities: TaskActivities::default(),
        }
    }

    /// Add one child workflow definition; the caller picks by name at
    /// enablement
    pub fn with_child(mut self, child: WorkflowBuilder) -> Self {
        self.children.push(child);
        self
    }

    /// Human description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Outgoing selection semantics
    pub fn with_split(mut self, split: SplitType) -> Self {
        self.split = split;
        self
    }

    /// Incoming enablement semantics
    pub fn with_join(mut self, join: JoinType) -> Self {
        self.join = join;
        self
    }

    /// Router; required for XOR and OR splits
    pub fn with_router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    /// Policy deciding completion across the set of child workflows
    pub fn with_policy(mut self, policy: TransitionPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Statistics shard count
    pub fn with_stats_shards(mut self, count: u32) -> Self {
        self.stats_shard_count = Some(count.max(1));
        self
    }

    /// Lifecycle hooks; `on_enabled` must initialize the chosen child(ren)
    pub fn with_activities(mut self, activities: TaskActivities) -> Self {
        self.activities = activities;
        self
    }
}

impl Default for DynamicCompositeTaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
enum AnyTask {
    Task(TaskBuilder),
    Dummy(DummyTaskBuilder),
    Composite(CompositeTaskBuilder),
    Dynamic(DynamicCompositeTaskBuilder),
}

/// Fluent builder for one workflow definition
#[derive(Clone)]
pub struct WorkflowBuilder {
    name: String,
    description: Option<String>,
    start: Option<String>,
    end: Option<String>,
    conditions: Vec<String>,
    tasks: Vec<(String, AnyTask)>,
    condition_connections: Vec<(String, Vec<String>)>,
    task_connections: Vec<(String, Vec<FlowTarget>)>,
    regions: Vec<(String, RegionBuilder)>,
    activities: WorkflowActivities,
    actions: WorkflowActions,
}

impl WorkflowBuilder {
    /// Start a new definition
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            start: None,
            end: None,
            conditions: Vec::new(),
            tasks: Vec::new(),
            condition_connections: Vec::new(),
            task_connections: Vec::new(),
            regions: Vec::new(),
            activities: WorkflowActivities::default(),
            actions: WorkflowActions::default(),
        }
    }

    /// Human description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declare the start condition
    pub fn start_condition(mut self, name: impl Into<String>) -> Self {
        self.start = Some(name.into());
        self
    }

    /// Declare the end condition
    pub fn end_condition(mut self, name: impl Into<String>) -> Self {
        self.end = Some(name.into());
        self
    }

    /// Declare an explicit intermediate condition
    pub fn condition(mut self, name: impl Into<String>) -> Self {
        self.conditions.push(name.into());
        self
    }

    /// Declare a work-item task
    pub fn task(mut self, name: impl Into<String>, builder: TaskBuilder) -> Self {
        self.tasks.push((name.into(), AnyTask::Task(builder)));
        self
    }

    /// Declare a dummy task
    pub fn dummy_task(mut self, name: impl Into<String>, builder: DummyTaskBuilder) -> Self {
        self.tasks.push((name.into(), AnyTask::Dummy(builder)));
        self
    }

    /// Declare a composite task
    pub fn composite_task(
        mut self,
        name: impl Into<String>,
        builder: CompositeTaskBuilder,
    ) -> Self {
        self.tasks.push((name.into(), AnyTask::Composite(builder)));
        self
    }

    /// Declare a dynamic composite task
    pub fn dynamic_composite_task(
        mut self,
        name: impl Into<String>,
        builder: DynamicCompositeTaskBuilder,
    ) -> Self {
        self.tasks.push((name.into(), AnyTask::Dynamic(builder)));
        self
    }

    /// Connect a condition to consuming tasks; each condition may be the
    /// source of one `connect_condition` call
    pub fn connect_condition(
        mut self,
        name: impl Into<String>,
        flow: impl FnOnce(ConditionFlowBuilder) -> ConditionFlowBuilder,
    ) -> Self {
        let targets = flow(ConditionFlowBuilder::default()).targets;
        self.condition_connections.push((name.into(), targets));
        self
    }

    /// Connect a task to outgoing targets; each task may be the source of
    /// one `connect_task` call
    pub fn connect_task(
        mut self,
        name: impl Into<String>,
        flow: impl FnOnce(TaskFlowBuilder) -> TaskFlowBuilder,
    ) -> Self {
        let targets = flow(TaskFlowBuilder::default()).targets;
        self.task_connections.push((name.into(), targets));
        self
    }

    /// Declare the cancellation region applied when `task` completes
    pub fn with_cancellation_region(
        mut self,
        task: impl Into<String>,
        region: impl FnOnce(RegionBuilder) -> RegionBuilder,
    ) -> Self {
        self.regions
            .push((task.into(), region(RegionBuilder::default())));
        self
    }

    /// Workflow-level lifecycle hooks
    pub fn with_activities(mut self, activities: WorkflowActivities) -> Self {
        self.activities = activities;
        self
    }

    /// Workflow-level action surface
    pub fn with_actions(mut self, actions: WorkflowActions) -> Self {
        self.actions = actions;
        self
    }

    /// Compile into an immutable, validated definition graph
    pub fn build(self, version: &str) -> EngineResult<Arc<WorkflowGraph>> {
        let name = self.name.clone();
        check_name(&name)?;
        if version.is_empty() || version.contains('/') {
            return Err(EngineError::InvalidElementName(version.to_owned()));
        }

        let start = self
            .start
            .clone()
            .ok_or_else(|| EngineError::MissingStartCondition(name.clone()))?;
        let end = self
            .end
            .clone()
            .ok_or_else(|| EngineError::MissingEndCondition(name.clone()))?;

        let mut conditions: Vec<ConditionNode> = Vec::new();
        let mut condition_index: HashMap<String, CondIdx> = HashMap::new();
        let mut declare_condition = |cname: &str, nodes: &mut Vec<ConditionNode>,
                                     index: &mut HashMap<String, CondIdx>|
         -> EngineResult<CondIdx> {
            check_name(cname)?;
            if index.contains_key(cname) {
                return Err(EngineError::DuplicateElement(cname.to_owned()));
            }
            let idx = CondIdx(nodes.len());
            nodes.push(ConditionNode {
                name: cname.to_owned(),
                implicit: false,
                incoming: Vec::new(),
                outgoing: Vec::new(),
            });
            index.insert(cname.to_owned(), idx);
            Ok(idx)
        };
        let start_idx = declare_condition(&start, &mut conditions, &mut condition_index)?;
        let end_idx = declare_condition(&end, &mut conditions, &mut condition_index)?;
        for cname in &self.conditions {
            declare_condition(cname, &mut conditions, &mut condition_index)?;
        }

        let mut tasks: Vec<TaskNode> = Vec::new();
        let mut task_index: HashMap<String, TaskIdx> = HashMap::new();
        for (tname, spec) in self.tasks {
            check_name(&tname)?;
            if task_index.contains_key(&tname) {
                return Err(EngineError::DuplicateElement(tname.clone()));
            }
            let node = build_task_node(&tname, spec, version)?;
            task_index.insert(tname, TaskIdx(tasks.len()));
            tasks.push(node);
        }

        let mut flows: Vec<FlowEdge> = Vec::new();
        let mut connected_conditions: HashSet<String> = HashSet::new();
        for (cname, targets) in &self.condition_connections {
            let cond = *condition_index
                .get(cname)
                .ok_or_else(|| EngineError::UnknownElement(cname.clone()))?;
            if !connected_conditions.insert(cname.clone()) {
                return Err(EngineError::DuplicateConnection(cname.clone()));
            }
            let mut seen = HashSet::new();
            for target in targets {
                if !seen.insert(target.clone()) {
                    return Err(EngineError::DuplicateConnection(cname.clone()));
                }
                let task = *task_index
                    .get(target)
                    .ok_or_else(|| EngineError::UnknownElement(target.clone()))?;
                let flow = FlowIdx(flows.len());
                flows.push(FlowEdge::CondToTask {
                    from: cond,
                    to: task,
                });
                conditions[cond.0].outgoing.push(flow);
                tasks[task.0].incoming.push(flow);
            }
        }

        let mut connected_tasks: HashSet<String> = HashSet::new();
        for (tname, targets) in &self.task_connections {
            let source = *task_index
                .get(tname)
                .ok_or_else(|| EngineError::UnknownElement(tname.clone()))?;
            if !connected_tasks.insert(tname.clone()) {
                return Err(EngineError::DuplicateConnection(tname.clone()));
            }
            let mut seen = HashSet::new();
            for target in targets {
                if !seen.insert(target.clone()) {
                    return Err(EngineError::DuplicateConnection(tname.clone()));
                }
                match target {
                    FlowTarget::Condition(cname) => {
                        let cond = *condition_index
                            .get(cname)
                            .ok_or_else(|| EngineError::UnknownElement(cname.clone()))?;
                        let flow = FlowIdx(flows.len());
                        flows.push(FlowEdge::TaskToCond {
                            from: source,
                            to: cond,
                        });
                        tasks[source.0].outgoing.push(flow);
                        conditions[cond.0].incoming.push(flow);
                    }
                    FlowTarget::Task(target_name) => {
                        let consumer = *task_index
                            .get(target_name)
                            .ok_or_else(|| EngineError::UnknownElement(target_name.clone()))?;
                        let implicit = implicit_condition_name(tname, target_name);
                        if condition_index.contains_key(&implicit) {
                            return Err(EngineError::DuplicateElement(implicit));
                        }
                        let cond = CondIdx(conditions.len());
                        conditions.push(ConditionNode {
                            name: implicit.clone(),
                            implicit: true,
                            incoming: Vec::new(),
                            outgoing: Vec::new(),
                        });
                        condition_index.insert(implicit, cond);
                        let produce = FlowIdx(flows.len());
                        flows.push(FlowEdge::TaskToCond {
                            from: source,
                            to: cond,
                        });
                        tasks[source.0].outgoing.push(produce);
                        conditions[cond.0].incoming.push(produce);
                        let consume = FlowIdx(flows.len());
                        flows.push(FlowEdge::CondToTask {
                            from: cond,
                            to: consumer,
                        });
                        conditions[cond.0].outgoing.push(consume);
                        tasks[consumer.0].incoming.push(consume);
                    }
                }
            }
        }

        let mut region_owners: HashSet<String> = HashSet::new();
        for (owner, region) in &self.regions {
            let owner_idx = *task_index
                .get(owner)
                .ok_or_else(|| EngineError::UnknownElement(owner.clone()))?;
            if !region_owners.insert(owner.clone()) {
                return Err(EngineError::DuplicateConnection(owner.clone()));
            }
            for member in &region.tasks {
                if !task_index.contains_key(member) {
                    return Err(EngineError::UnknownElement(member.clone()));
                }
            }
            for member in &region.conditions {
                match condition_index.get(member) {
                    Some(idx) if !conditions[idx.0].implicit => {}
                    _ => return Err(EngineError::UnknownElement(member.clone())),
                }
            }
            tasks[owner_idx.0].region = Some(CancellationRegion {
                tasks: region.tasks.clone(),
                conditions: region.conditions.clone(),
            });
        }

        Ok(Arc::new(WorkflowGraph {
            name,
            version: version.to_owned(),
            description: self.description,
            tasks,
            conditions,
            flows,
            start: start_idx,
            end: end_idx,
            activities: self.activities,
            actions: self.actions,
            task_index,
            condition_index,
        }))
    }
}

fn check_name(name: &str) -> EngineResult<()> {
    if name.is_empty() || name.contains('/') {
        return Err(EngineError::InvalidElementName(name.to_owned()));
    }
    Ok(())
}

fn check_router(name: &str, split: SplitType, router: &Option<Router>) -> EngineResult<()> {
    match (split, router) {
        (SplitType::And, None) => Ok(()),
        (SplitType::And, Some(_)) => Err(EngineError::RouterKindMismatch(name.to_owned())),
        (SplitType::Xor, Some(Router::Xor(_))) => Ok(()),
        (SplitType::Or, Some(Router::Or(_))) => Ok(()),
        (SplitType::Xor, Some(_)) | (SplitType::Or, Some(_)) => {
            Err(EngineError::RouterKindMismatch(name.to_owned()))
        }
        (SplitType::Xor, None) | (SplitType::Or, None) => {
            Err(EngineError::MissingRouter(name.to_owned()))
        }
    }
}

fn build_task_node(name: &str, spec: AnyTask, version: &str) -> EngineResult<TaskNode> {
    let node = match spec {
        AnyTask::Task(builder) => {
            check_router(name, builder.split, &builder.router)?;
            TaskNode {
                name: name.to_owned(),
                kind: TaskKind::WorkItem,
                split: builder.split,
                join: builder.join,
                stats_shard_count: builder.stats_shard_count.unwrap_or(DEFAULT_STATS_SHARDS),
                description: builder.description,
                incoming: Vec::new(),
                outgoing: Vec::new(),
                router: builder.router,
                policy: builder.policy.unwrap_or_else(default_policy),
                activities: builder.activities,
                actions: builder.actions,
                region: None,
            }
        }
        AnyTask::Dummy(builder) => {
            check_router(name, builder.split, &builder.router)?;
            TaskNode {
                name: name.to_owned(),
                kind: TaskKind::Dummy,
                split: builder.split,
                join: builder.join,
                stats_shard_count: 1,
                description: builder.description,
                incoming: Vec::new(),
                outgoing: Vec::new(),
                router: builder.router,
                policy: default_policy(),
                activities: builder.activities,
                actions: WorkItemActions::default(),
                region: None,
            }
        }
        AnyTask::Composite(builder) => {
            check_router(name, builder.split, &builder.router)?;
            let child = builder.child.build(version)?;
            TaskNode {
                name: name.to_owned(),
                kind: TaskKind::Composite { child },
                split: builder.split,
                join: builder.join,
                stats_shard_count: builder.stats_shard_count.unwrap_or(DEFAULT_STATS_SHARDS),
                description: builder.description,
                incoming: Vec::new(),
                outgoing: Vec::new(),
                router: builder.router,
                policy: builder.policy.unwrap_or_else(default_policy),
                activities: builder.activities,
                actions: WorkItemActions::default(),
                region: None,
            }
        }
        AnyTask::Dynamic(builder) => {
            check_router(name, builder.split, &builder.router)?;
            if builder.children.is_empty() {
                return Err(EngineError::EmptyDynamicComposite(name.to_owned()));
            }
            if builder.activities.on_enabled.is_none() {
                // Nothing else can pick which child definition to enact.
                return Err(EngineError::MissingActivity {
                    task: name.to_owned(),
                    activity: "on_enabled".to_owned(),
                });
            }
            let mut children = HashMap::new();
            for child_builder in builder.children {
                let child = child_builder.build(version)?;
                if children.insert(child.name.clone(), child).is_some() {
                    return Err(EngineError::DuplicateElement(name.to_owned()));
                }
            }
            TaskNode {
                name: name.to_owned(),
                kind: TaskKind::DynamicComposite { children },
                split: builder.split,
                join: builder.join,
                stats_shard_count: builder.stats_shard_count.unwrap_or(DEFAULT_STATS_SHARDS),
                description: builder.description,
                incoming: Vec::new(),
                outgoing: Vec::new(),
                router: builder.router,
                policy: builder.policy.unwrap_or_else(default_policy),
                activities: builder.activities,
                actions: WorkItemActions::default(),
                region: None,
            }
        }
    };
    Ok(node)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::runtime::router::{RouteTo, Router};

    fn linear() -> WorkflowBuilder {
        WorkflowBuilder::new("order")
            .start_condition("start")
            .end_condition("end")
            .task("review", TaskBuilder::new())
            .connect_condition("start", |c| c.task("review"))
            .connect_task("review", |t| t.condition("end"))
    }

    #[test]
    fn builds_a_linear_definition() {
        let graph = linear().build("v1").unwrap();
        assert_eq!(graph.name, "order");
        assert_eq!(graph.version, "v1");
        assert_eq!(graph.tasks.len(), 1);
        assert_eq!(graph.conditions.len(), 2);
        let review = graph.task("review").unwrap();
        assert_eq!(graph.incoming_conditions(review), vec![graph.start]);
        assert_eq!(graph.outgoing_conditions(review), vec![graph.end]);
    }

    #[test]
    fn build_is_pure() {
        let first = linear().build("v1").unwrap();
        let second = linear().build("v1").unwrap();
        assert_eq!(first.tasks.len(), second.tasks.len());
        assert_eq!(first.conditions.len(), second.conditions.len());
        assert_eq!(first.flows.len(), second.flows.len());
        let names: Vec<&str> = first.conditions.iter().map(|c| c.name.as_str()).collect();
        let names2: Vec<&str> = second.conditions.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, names2);
    }

    #[test]
    fn missing_start_or_end_is_rejected() {
        let no_start = WorkflowBuilder::new("w")
            .end_condition("end")
            .build("v1")
            .unwrap_err();
        assert!(matches!(no_start, EngineError::MissingStartCondition(_)));
        let no_end = WorkflowBuilder::new("w")
            .start_condition("start")
            .build("v1")
            .unwrap_err();
        assert!(matches!(no_end, EngineError::MissingEndCondition(_)));
    }

    #[test]
    fn direct_task_to_task_flow_materialises_an_implicit_condition() {
        let graph = WorkflowBuilder::new("w")
            .start_condition("start")
            .end_condition("end")
            .task("a", TaskBuilder::new())
            .task("b", TaskBuilder::new())
            .connect_condition("start", |c| c.task("a"))
            .connect_task("a", |t| t.task("b"))
            .connect_task("b", |t| t.condition("end"))
            .build("v1")
            .unwrap();
        let implicit = graph.condition("a->b").unwrap();
        assert!(graph.condition_node(implicit).implicit);
        assert_eq!(graph.consumers(implicit), vec![graph.task("b").unwrap()]);
    }

    #[test]
    fn xor_split_without_router_is_rejected() {
        let err = WorkflowBuilder::new("w")
            .start_condition("start")
            .end_condition("end")
            .task("q", TaskBuilder::new().with_split(SplitType::Xor))
            .connect_condition("start", |c| c.task("q"))
            .connect_task("q", |t| t.condition("end"))
            .build("v1")
            .unwrap_err();
        assert!(matches!(err, EngineError::MissingRouter(_)));
    }

    #[test]
    fn router_kind_must_match_split() {
        let or_router = Router::or(|_ctx| async { Ok(vec![RouteTo::condition("end")]) });
        let err = WorkflowBuilder::new("w")
            .start_condition("start")
            .end_condition("end")
            .task(
                "q",
                TaskBuilder::new()
                    .with_split(SplitType::Xor)
                    .with_router(or_router),
            )
            .connect_condition("start", |c| c.task("q"))
            .connect_task("q", |t| t.condition("end"))
            .build("v1")
            .unwrap_err();
        assert!(matches!(err, EngineError::RouterKindMismatch(_)));
    }

    #[test]
    fn double_connection_is_rejected() {
        let err = WorkflowBuilder::new("w")
            .start_condition("start")
            .end_condition("end")
            .task("a", TaskBuilder::new())
            .connect_condition("start", |c| c.task("a"))
            .connect_condition("start", |c| c.task("a"))
            .connect_task("a", |t| t.condition("end"))
            .build("v1")
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateConnection(_)));
    }

    #[test]
    fn unknown_flow_target_is_rejected() {
        let err = WorkflowBuilder::new("w")
            .start_condition("start")
            .end_condition("end")
            .connect_condition("start", |c| c.task("ghost"))
            .build("v1")
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownElement(_)));
    }

    #[test]
    fn region_members_must_exist() {
        let err = WorkflowBuilder::new("w")
            .start_condition("start")
            .end_condition("end")
            .task("a", TaskBuilder::new())
            .connect_condition("start", |c| c.task("a"))
            .connect_task("a", |t| t.condition("end"))
            .with_cancellation_region("a", |r| r.task("ghost"))
            .build("v1")
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownElement(_)));
    }

    #[test]
    fn element_names_must_be_key_safe() {
        let err = WorkflowBuilder::new("w")
            .start_condition("start")
            .end_condition("end")
            .task("a/b", TaskBuilder::new())
            .build("v1")
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidElementName(_)));
    }
}
