//! Error types for the workflow engine

use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Tagged error kinds for the workflow engine
///
/// Every kind maps to a deterministic caller response: validation and
/// state-machine errors leave no state behind, structural errors reject a
/// definition at build time, and runtime integrity errors abort the enclosing
/// transaction.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Action payload failed schema validation
    #[error("Payload invalid: {0}")]
    PayloadInvalid(String),

    /// Requested transition is not allowed from the current state
    #[error("Illegal transition for {element}: {from} -> {to}")]
    IllegalTransition {
        element: String,
        from: String,
        to: String,
    },

    /// Raised by user policies that require an authenticated caller
    #[error("Authentication required: {0}")]
    AuthenticationRequired(String),

    /// Raised by user policies that deny the operation
    #[error("Policy denied: {0}")]
    PolicyDenied(String),

    /// Definition has no start condition
    #[error("Workflow {0} has no start condition")]
    MissingStartCondition(String),

    /// Definition has no end condition
    #[error("Workflow {0} has no end condition")]
    MissingEndCondition(String),

    /// XOR/OR split task was built without a router
    #[error("Task {0} has an XOR/OR split but no router")]
    MissingRouter(String),

    /// Router variant does not match the task's split type
    #[error("Router kind does not match split type of task {0}")]
    RouterKindMismatch(String),

    /// An element was used as a flow source more than once
    #[error("Duplicate connection from {0}")]
    DuplicateConnection(String),

    /// Two elements in one workflow share a name
    #[error("Duplicate element {0}")]
    DuplicateElement(String),

    /// A flow, region or route referenced an undeclared element
    #[error("Unknown element {0}")]
    UnknownElement(String),

    /// Element name is empty or contains reserved characters
    #[error("Invalid element name {0:?}")]
    InvalidElementName(String),

    /// Dynamic composite task declared with no child workflows
    #[error("Dynamic composite task {0} has no child workflows")]
    EmptyDynamicComposite(String),

    /// Task requires an activity hook that was not supplied
    #[error("Task {task} requires the {activity} activity")]
    MissingActivity { task: String, activity: String },

    /// Consuming a token would drive a marking negative
    #[error("Marking underflow on condition {condition} of workflow {workflow}")]
    MarkingUnderflow { workflow: String, condition: String },

    /// Row lookup failed
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// Workflow definition version is not registered
    #[error("Version {version} of workflow {workflow} is not registered")]
    VersionNotFound { workflow: String, version: String },

    /// Workflow instance was already migrated
    #[error("Workflow {0} was already migrated")]
    AlreadyMigrated(String),

    /// Optimistic concurrency check failed at commit
    #[error("Transaction conflict")]
    TxnConflict,

    /// Transaction handle used after commit
    #[error("Transaction already committed")]
    TxnClosed,

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Row serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Scheduler error
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Error bubbled out of a user-supplied callback
    #[error("Hook error: {0}")]
    Hook(#[from] anyhow::Error),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sled::Error> for EngineError {
    fn from(err: sled::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}
