//! Task state-transition policies
//!
//! A task owns a set of children: work items, or sub-workflows for
//! composite tasks. Every child state change is reported to the owning
//! task's policy together with the generation's aggregated statistics; the
//! policy decides whether the task keeps running, completes and fires its
//! split, or fails.

use std::sync::Arc;

use crate::error::EngineResult;
use crate::runtime::stats::TaskStats;
use crate::runtime::work_item::WorkItemState;
use crate::runtime::workflow::WorkflowState;

/// Unified state of a task's child, work item or sub-workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    /// Created
    Initialized,
    /// In progress
    Started,
    /// Finished successfully
    Completed,
    /// Finished unsuccessfully
    Failed,
    /// Withdrawn
    Canceled,
}

impl ChildState {
    /// Whether the child is done
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChildState::Completed | ChildState::Failed | ChildState::Canceled
        )
    }
}

impl From<WorkItemState> for ChildState {
    fn from(state: WorkItemState) -> Self {
        match state {
            WorkItemState::Initialized => ChildState::Initialized,
            WorkItemState::Started => ChildState::Started,
            WorkItemState::Completed => ChildState::Completed,
            WorkItemState::Failed => ChildState::Failed,
            WorkItemState::Canceled => ChildState::Canceled,
        }
    }
}

impl From<WorkflowState> for ChildState {
    fn from(state: WorkflowState) -> Self {
        match state {
            WorkflowState::Initialized => ChildState::Initialized,
            WorkflowState::Started => ChildState::Started,
            WorkflowState::Completed => ChildState::Completed,
            WorkflowState::Failed => ChildState::Failed,
            WorkflowState::Canceled => ChildState::Canceled,
        }
    }
}

/// One child state change as seen by a policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildTransition {
    /// State before the change; `None` when the child was just created
    pub prev: Option<ChildState>,
    /// State after the change
    pub next: ChildState,
}

/// Policy verdict for one child transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Child absorbed; the task keeps running
    Continue,
    /// The task completes and fires its split
    Complete,
    /// The task fails and failure teardown begins
    Fail,
}

/// User- or default-supplied state-transition policy
pub type TransitionPolicy =
    Arc<dyn Fn(&ChildTransition, &TaskStats) -> EngineResult<PolicyDecision> + Send + Sync>;

/// Lift a plain function into a [`TransitionPolicy`]
pub fn policy<F>(f: F) -> TransitionPolicy
where
    F: Fn(&ChildTransition, &TaskStats) -> EngineResult<PolicyDecision> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// The default policy: a completed or canceled child completes the task once
/// every child is terminal; a failed child fails the task immediately;
/// anything else continues.
pub fn default_policy() -> TransitionPolicy {
    policy(|transition, stats| {
        Ok(match transition.next {
            ChildState::Completed | ChildState::Canceled if stats.all_terminal() => {
                PolicyDecision::Complete
            }
            ChildState::Failed => PolicyDecision::Fail,
            _ => PolicyDecision::Continue,
        })
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn stats(total: u64, completed: u64, failed: u64, canceled: u64) -> TaskStats {
        TaskStats {
            total,
            initialized: 0,
            started: total - completed - failed - canceled,
            completed,
            failed,
            canceled,
        }
    }

    #[test]
    fn completes_only_when_all_children_terminal() {
        let policy = default_policy();
        let transition = ChildTransition {
            prev: Some(ChildState::Started),
            next: ChildState::Completed,
        };
        let verdict = policy(&transition, &stats(2, 1, 0, 0)).unwrap();
        assert_eq!(verdict, PolicyDecision::Continue);
        let verdict = policy(&transition, &stats(2, 2, 0, 0)).unwrap();
        assert_eq!(verdict, PolicyDecision::Complete);
    }

    #[test]
    fn failure_is_immediate() {
        let policy = default_policy();
        let transition = ChildTransition {
            prev: Some(ChildState::Started),
            next: ChildState::Failed,
        };
        let verdict = policy(&transition, &stats(3, 0, 1, 0)).unwrap();
        assert_eq!(verdict, PolicyDecision::Fail);
    }

    #[test]
    fn canceled_children_can_complete_the_task() {
        let policy = default_policy();
        let transition = ChildTransition {
            prev: Some(ChildState::Started),
            next: ChildState::Canceled,
        };
        let verdict = policy(&transition, &stats(1, 0, 0, 1)).unwrap();
        assert_eq!(verdict, PolicyDecision::Complete);
    }
}
