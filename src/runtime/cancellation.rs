//! Cancellation semantics

use serde::{Deserialize, Serialize};

/// Why an element was canceled
///
/// Accompanies every engine-driven cancellation so observers can distinguish
/// a user's explicit cancel from a parent teardown or a migration replacing
/// the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CancellationReason {
    /// User-invoked cancel action
    Explicit,
    /// Parent completion, cancellation region or failure teardown
    Teardown,
    /// Source-side teardown during migration
    Migration,
}

impl std::fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CancellationReason::Explicit => "explicit",
            CancellationReason::Teardown => "teardown",
            CancellationReason::Migration => "migration",
        })
    }
}

/// Resolved cancellation region of one task: the sibling tasks whose live
/// generations are canceled and the conditions whose markings are cleared
/// when the owning task completes.
#[derive(Debug, Clone, Default)]
pub struct CancellationRegion {
    /// Task names to cancel
    pub tasks: Vec<String>,
    /// Condition names to clear
    pub conditions: Vec<String>,
}

impl CancellationRegion {
    /// Whether the region names nothing
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.conditions.is_empty()
    }
}
