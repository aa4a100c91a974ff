//! Typed action surface
//!
//! Work items expose six actions (initialize, start, complete, fail,
//! cancel, reset) and workflows two (initialize and cancel). Each action
//! pairs a payload validator with an optional async callback. The engine
//! validates the payload, runs the callback so application code can bind
//! business side effects, then drives the state transition itself. Engine
//! bookkeeping (teardown, cancellation regions, migration) reuses the same
//! callbacks with `is_internal_mutation` set and skips payload validation.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use crate::runtime::activities::ActivityCtx;

/// Runtime-checkable payload description.
///
/// Returns the verified (possibly normalized) payload. The engine is
/// oblivious to the validation strategy; serde-driven validators are the
/// stock choice.
pub type PayloadValidator =
    Arc<dyn Fn(&serde_json::Value) -> EngineResult<serde_json::Value> + Send + Sync>;

/// Validator that accepts any payload unchanged
pub fn any_payload() -> PayloadValidator {
    Arc::new(|value| Ok(value.clone()))
}

/// Validator that parses the payload into `T` and re-serializes the result,
/// rejecting anything `T` cannot represent
pub fn schema_of<T>() -> PayloadValidator
where
    T: DeserializeOwned + Serialize + 'static,
{
    Arc::new(|value| {
        let parsed: T = serde_json::from_value(value.clone())
            .map_err(|e| EngineError::PayloadInvalid(e.to_string()))?;
        serde_json::to_value(parsed).map_err(|e| EngineError::PayloadInvalid(e.to_string()))
    })
}

/// Boxed action callback; receives the verified payload
pub type ActionCallback =
    Arc<dyn Fn(ActivityCtx, serde_json::Value) -> BoxFuture<'static, EngineResult<()>> + Send + Sync>;

/// Lift a plain async fn into an [`ActionCallback`]
pub fn action_handler<F, Fut>(f: F) -> ActionCallback
where
    F: Fn(ActivityCtx, serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = EngineResult<()>> + Send + 'static,
{
    Arc::new(move |ctx, payload| Box::pin(f(ctx, payload)))
}

/// One action: validation schema plus optional business callback
#[derive(Clone)]
pub struct ActionDef {
    /// Payload validator, consulted before anything else
    pub validator: PayloadValidator,
    /// Business callback; the stock action is just the state transition
    pub callback: Option<ActionCallback>,
}

impl Default for ActionDef {
    fn default() -> Self {
        Self {
            validator: any_payload(),
            callback: None,
        }
    }
}

impl ActionDef {
    /// Action with an explicit validator and no callback
    pub fn validated(validator: PayloadValidator) -> Self {
        Self {
            validator,
            callback: None,
        }
    }

    /// Action whose payload must parse as `T`
    pub fn schema<T>() -> Self
    where
        T: DeserializeOwned + Serialize + 'static,
    {
        Self::validated(schema_of::<T>())
    }

    /// Attach a business callback
    pub fn with_callback(mut self, callback: ActionCallback) -> Self {
        self.callback = Some(callback);
        self
    }
}

impl std::fmt::Debug for ActionDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDef")
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// The six work-item actions of one task
#[derive(Clone, Default, Debug)]
pub struct WorkItemActions {
    /// Create a work item in state `initialized`
    pub initialize: ActionDef,
    /// `initialized -> started`
    pub start: ActionDef,
    /// `started -> completed`
    pub complete: ActionDef,
    /// `started -> failed`
    pub fail: ActionDef,
    /// `started -> canceled`
    pub cancel: ActionDef,
    /// `started -> initialized`, without opening a new task generation
    pub reset: ActionDef,
}

/// The workflow-level actions
#[derive(Clone, Default, Debug)]
pub struct WorkflowActions {
    /// Create a workflow instance
    pub initialize: ActionDef,
    /// Cancel a running instance
    pub cancel: ActionDef,
}

/// Work-item action selector for the generic dispatch entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItemActionKind {
    /// Create a work item
    Initialize,
    /// Begin work
    Start,
    /// Finish successfully
    Complete,
    /// Finish unsuccessfully
    Fail,
    /// Withdraw
    Cancel,
    /// Return a started item to `initialized`
    Reset,
}

impl std::fmt::Display for WorkItemActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            WorkItemActionKind::Initialize => "initialize",
            WorkItemActionKind::Start => "start",
            WorkItemActionKind::Complete => "complete",
            WorkItemActionKind::Fail => "fail",
            WorkItemActionKind::Cancel => "cancel",
            WorkItemActionKind::Reset => "reset",
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize)]
    struct Approval {
        approver: String,
        approved: bool,
    }

    #[test]
    fn schema_validator_accepts_matching_payloads() {
        let validator = schema_of::<Approval>();
        let verified = validator(&serde_json::json!({
            "approver": "ada",
            "approved": true,
        }))
        .unwrap();
        assert_eq!(verified["approver"], "ada");
    }

    #[test]
    fn schema_validator_rejects_shape_mismatch() {
        let validator = schema_of::<Approval>();
        let result = validator(&serde_json::json!({ "approver": 7 }));
        assert!(matches!(result, Err(EngineError::PayloadInvalid(_))));
    }

    #[test]
    fn any_payload_passes_everything() {
        let validator = any_payload();
        let value = serde_json::json!([1, 2, 3]);
        assert_eq!(validator(&value).unwrap(), value);
    }
}
