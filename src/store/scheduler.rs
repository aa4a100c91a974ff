//! Deferred function scheduling
//!
//! Activities register future host-function invocations through a keyed
//! handle. Each registration key is recorded in `scheduledInitializations`;
//! re-registering an existing key returns the already-bound function id, so
//! a logical event schedules at most once no matter how often the enclosing
//! transaction retries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EngineResult;
use crate::store::{key2, Table, Txn};

/// Identifier of one pending deferred invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduledFunctionId(#[serde(with = "uuid::serde::compact")] pub Uuid);

impl ScheduledFunctionId {
    /// Generate a new id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ScheduledFunctionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ScheduledFunctionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One pending deferred invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledFunctionRow {
    /// Invocation id
    pub id: ScheduledFunctionId,
    /// Registered host-function name
    pub name: String,
    /// Earliest time the function may run
    pub run_at: DateTime<Utc>,
    /// Payload handed to the function
    pub payload: serde_json::Value,
    /// De-duplication key, when registered through the keyed handle
    pub key: Option<String>,
}

/// Keyed de-duplication record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledInitRow {
    /// Registration key
    pub key: String,
    /// Function id bound to the key
    pub function_id: ScheduledFunctionId,
    /// When the binding was created
    pub at: DateTime<Utc>,
}

fn row_key(run_at: DateTime<Utc>, id: ScheduledFunctionId) -> String {
    key2(
        &format!("{:020}", run_at.timestamp_millis().max(0)),
        &id.0.simple().to_string(),
    )
}

/// Register a deferred invocation without de-duplication
pub fn register(
    txn: &Txn,
    name: &str,
    run_at: DateTime<Utc>,
    payload: serde_json::Value,
) -> EngineResult<ScheduledFunctionId> {
    let id = ScheduledFunctionId::new();
    let row = ScheduledFunctionRow {
        id,
        name: name.to_owned(),
        run_at,
        payload,
        key: None,
    };
    txn.put(Table::ScheduledFunctions, &row_key(run_at, id), &row)?;
    Ok(id)
}

/// Register a deferred invocation under a de-duplication key.
///
/// Returns the existing function id when the key is already bound.
pub fn register_keyed(
    txn: &Txn,
    key: &str,
    name: &str,
    run_at: DateTime<Utc>,
    payload: serde_json::Value,
) -> EngineResult<ScheduledFunctionId> {
    if let Some(existing) = txn.get::<ScheduledInitRow>(Table::ScheduledInitializations, key)? {
        return Ok(existing.function_id);
    }
    let id = ScheduledFunctionId::new();
    let row = ScheduledFunctionRow {
        id,
        name: name.to_owned(),
        run_at,
        payload,
        key: Some(key.to_owned()),
    };
    txn.put(Table::ScheduledFunctions, &row_key(run_at, id), &row)?;
    txn.put(
        Table::ScheduledInitializations,
        key,
        &ScheduledInitRow {
            key: key.to_owned(),
            function_id: id,
            at: Utc::now(),
        },
    )?;
    Ok(id)
}

/// Remove and return every invocation due at or before `now`, in due order
pub fn take_due(txn: &Txn, now: DateTime<Utc>) -> EngineResult<Vec<ScheduledFunctionRow>> {
    let mut due = Vec::new();
    for (key, row) in txn.scan::<ScheduledFunctionRow>(Table::ScheduledFunctions, "")? {
        if row.run_at > now {
            break;
        }
        txn.delete(Table::ScheduledFunctions, &key)?;
        due.push(row);
    }
    Ok(due)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::DocumentStore;
    use chrono::Duration;

    #[test]
    fn keyed_registration_is_deduplicated() -> EngineResult<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DocumentStore::open(dir.path())?;
        let txn = store.begin();
        let at = Utc::now();
        let first = register_keyed(&txn, "wf-1/cancel", "cancel", at, serde_json::json!({}))?;
        let second = register_keyed(&txn, "wf-1/cancel", "cancel", at, serde_json::json!({}))?;
        assert_eq!(first, second);
        txn.commit()?;

        let txn = store.begin();
        let third = register_keyed(&txn, "wf-1/cancel", "cancel", at, serde_json::json!({}))?;
        assert_eq!(first, third);
        let pending = take_due(&txn, at + Duration::seconds(1))?;
        assert_eq!(pending.len(), 1);
        Ok(())
    }

    #[test]
    fn take_due_respects_run_at_order() -> EngineResult<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DocumentStore::open(dir.path())?;
        let txn = store.begin();
        let now = Utc::now();
        register(&txn, "later", now + Duration::seconds(60), serde_json::json!(1))?;
        register(&txn, "sooner", now - Duration::seconds(60), serde_json::json!(2))?;
        txn.commit()?;

        let txn = store.begin();
        let due = take_due(&txn, now)?;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name, "sooner");
        txn.commit()?;

        let txn = store.begin();
        let due = take_due(&txn, now + Duration::seconds(120))?;
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].name, "later");
        Ok(())
    }
}
