//! Transactional document store
//!
//! sled-backed implementation of the host-store contract the engine assumes:
//! typed tables with composite string keys, strictly consistent reads,
//! optimistic transactions with conflict detection, and a scheduler for
//! deferred function invocations.
//!
//! Every engine operation runs inside one [`Txn`]: an in-memory overlay over
//! the sled trees that records a read set and buffers writes. `commit`
//! validates the read set against an in-process per-key version map under the
//! store's commit lock and then applies the write buffer, or fails with
//! [`EngineError::TxnConflict`] so the caller can retry. Within a transaction
//! reads observe earlier writes of the same transaction.

pub mod scheduler;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::audit::AuditEvent;
use crate::error::{EngineError, EngineResult};

/// Logical tables of the persisted state layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    /// One row per workflow instance
    Workflows,
    /// Child workflows indexed by `(parent workflow, task, generation)`
    WorkflowsByParent,
    /// One row per work item
    WorkItems,
    /// Work items indexed by `(workflow, task, generation)`
    WorkItemsByTask,
    /// One row per task generation
    Tasks,
    /// Append-only log of task state changes
    TasksStateLog,
    /// One row per condition per workflow
    Conditions,
    /// N counter shards per task generation
    TaskStatsShards,
    /// Keyed scheduler de-duplication
    ScheduledInitializations,
    /// Pending deferred function invocations
    ScheduledFunctions,
    /// Source-to-target workflow migration pairings
    Migrations,
    /// Store bookkeeping (sequence high-water mark)
    Meta,
}

impl Table {
    fn tree_name(self) -> &'static str {
        match self {
            Table::Workflows => "workflows",
            Table::WorkflowsByParent => "workflows_by_parent",
            Table::WorkItems => "work_items",
            Table::WorkItemsByTask => "work_items_by_task",
            Table::Tasks => "tasks",
            Table::TasksStateLog => "tasks_state_log",
            Table::Conditions => "conditions",
            Table::TaskStatsShards => "task_stats_shards",
            Table::ScheduledInitializations => "scheduled_initializations",
            Table::ScheduledFunctions => "scheduled_functions",
            Table::Migrations => "migrations",
            Table::Meta => "meta",
        }
    }

    const ALL: [Table; 12] = [
        Table::Workflows,
        Table::WorkflowsByParent,
        Table::WorkItems,
        Table::WorkItemsByTask,
        Table::Tasks,
        Table::TasksStateLog,
        Table::Conditions,
        Table::TaskStatsShards,
        Table::ScheduledInitializations,
        Table::ScheduledFunctions,
        Table::Migrations,
        Table::Meta,
    ];
}

const SEQ_KEY: &str = "seq";

struct StoreInner {
    _db: sled::Db,
    trees: HashMap<Table, sled::Tree>,
    /// Per-key commit counters backing optimistic concurrency checks.
    /// Runtime-only: after a restart no transaction is in flight, so the
    /// counters start over at zero.
    versions: DashMap<(Table, Vec<u8>), u64>,
    /// Writers hold this exclusively while validating and applying a commit;
    /// individual reads hold it shared so they never observe a half-applied
    /// commit.
    commit_lock: RwLock<()>,
    seq: AtomicU64,
}

/// sled-backed document store
#[derive(Clone)]
pub struct DocumentStore {
    inner: Arc<StoreInner>,
}

impl DocumentStore {
    /// Open (or create) a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let db = sled::open(path)?;
        let mut trees = HashMap::new();
        for table in Table::ALL {
            trees.insert(table, db.open_tree(table.tree_name())?);
        }
        let seq = match trees
            .get(&Table::Meta)
            .ok_or_else(|| EngineError::Internal("meta tree missing".into()))?
            .get(SEQ_KEY)?
        {
            Some(raw) => {
                let row: u64 = serde_json::from_slice(&raw)?;
                row
            }
            None => 0,
        };
        Ok(Self {
            inner: Arc::new(StoreInner {
                _db: db,
                trees,
                versions: DashMap::new(),
                commit_lock: RwLock::new(()),
                seq: AtomicU64::new(seq),
            }),
        })
    }

    /// Begin a transaction
    pub fn begin(&self) -> Txn {
        Txn {
            store: self.clone(),
            state: Arc::new(Mutex::new(TxnState {
                reads: HashMap::new(),
                writes: BTreeMap::new(),
                audit: Vec::new(),
                committed: false,
            })),
        }
    }

    fn tree(&self, table: Table) -> EngineResult<&sled::Tree> {
        self.inner
            .trees
            .get(&table)
            .ok_or_else(|| EngineError::Internal(format!("tree {:?} missing", table)))
    }

    fn version_of(&self, table: Table, key: &[u8]) -> u64 {
        self.inner
            .versions
            .get(&(table, key.to_vec()))
            .map(|v| *v)
            .unwrap_or(0)
    }
}

struct TxnState {
    reads: HashMap<(Table, Vec<u8>), u64>,
    writes: BTreeMap<(Table, Vec<u8>), Option<Vec<u8>>>,
    audit: Vec<AuditEvent>,
    committed: bool,
}

/// One optimistic transaction over the store
///
/// The handle is cheaply clonable so it can be moved into user callbacks;
/// all clones share one overlay. Dropping every handle without calling
/// [`Txn::commit`] discards the buffered writes.
#[derive(Clone)]
pub struct Txn {
    store: DocumentStore,
    state: Arc<Mutex<TxnState>>,
}

impl Txn {
    /// Read one row, decoded from its JSON document
    pub fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> EngineResult<Option<T>> {
        match self.get_raw(table, key)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Read one raw row
    pub fn get_raw(&self, table: Table, key: &str) -> EngineResult<Option<Vec<u8>>> {
        let kb = key.as_bytes().to_vec();
        let mut state = self.state.lock();
        if state.committed {
            return Err(EngineError::TxnClosed);
        }
        if let Some(buffered) = state.writes.get(&(table, kb.clone())) {
            return Ok(buffered.clone());
        }
        let _shared = self.store.inner.commit_lock.read();
        let version = self.store.version_of(table, &kb);
        let value = self.store.tree(table)?.get(&kb)?.map(|v| v.to_vec());
        state.reads.entry((table, kb)).or_insert(version);
        Ok(value)
    }

    /// Buffer one row write
    pub fn put<T: Serialize>(&self, table: Table, key: &str, row: &T) -> EngineResult<()> {
        let raw = serde_json::to_vec(row)?;
        self.put_raw(table, key, raw)
    }

    /// Buffer one raw row write
    pub fn put_raw(&self, table: Table, key: &str, raw: Vec<u8>) -> EngineResult<()> {
        let mut state = self.state.lock();
        if state.committed {
            return Err(EngineError::TxnClosed);
        }
        state
            .writes
            .insert((table, key.as_bytes().to_vec()), Some(raw));
        Ok(())
    }

    /// Buffer one row deletion
    pub fn delete(&self, table: Table, key: &str) -> EngineResult<()> {
        let mut state = self.state.lock();
        if state.committed {
            return Err(EngineError::TxnClosed);
        }
        state.writes.insert((table, key.as_bytes().to_vec()), None);
        Ok(())
    }

    /// Scan all rows whose key starts with `prefix`, in key order, decoded
    /// from their JSON documents. Buffered writes of this transaction are
    /// merged into the result.
    pub fn scan<T: DeserializeOwned>(
        &self,
        table: Table,
        prefix: &str,
    ) -> EngineResult<Vec<(String, T)>> {
        let raw = self.scan_raw(table, prefix)?;
        let mut out = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            out.push((key, serde_json::from_slice(&value)?));
        }
        Ok(out)
    }

    /// Scan raw rows by key prefix, merged with this transaction's buffer
    pub fn scan_raw(&self, table: Table, prefix: &str) -> EngineResult<Vec<(String, Vec<u8>)>> {
        let pb = prefix.as_bytes();
        let mut state = self.state.lock();
        if state.committed {
            return Err(EngineError::TxnClosed);
        }
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        {
            let _shared = self.store.inner.commit_lock.read();
            for entry in self.store.tree(table)?.scan_prefix(pb) {
                let (key, value) = entry?;
                let key = key.to_vec();
                let version = self.store.version_of(table, &key);
                state.reads.entry((table, key.clone())).or_insert(version);
                merged.insert(key, value.to_vec());
            }
        }
        for ((t, key), value) in state.writes.iter() {
            if *t != table || !key.starts_with(pb) {
                continue;
            }
            match value {
                Some(raw) => {
                    merged.insert(key.clone(), raw.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged
            .into_iter()
            .map(|(k, v)| (String::from_utf8_lossy(&k).into_owned(), v))
            .collect())
    }

    /// Allocate the next monotonic row sequence number
    pub fn next_seq(&self) -> u64 {
        self.store.inner.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Buffer an audit event; flushed to the sink only after commit
    pub fn push_audit(&self, event: AuditEvent) {
        self.state.lock().audit.push(event);
    }

    /// Validate the read set and apply the write buffer.
    ///
    /// Returns the buffered audit events on success so the caller can flush
    /// them to the sink. Fails with [`EngineError::TxnConflict`] when any row
    /// read by this transaction was committed by another transaction in the
    /// meantime.
    pub fn commit(self) -> EngineResult<Vec<AuditEvent>> {
        let mut state = self.state.lock();
        if state.committed {
            return Err(EngineError::TxnClosed);
        }
        let _exclusive = self.store.inner.commit_lock.write();
        for ((table, key), version) in state.reads.iter() {
            if self.store.version_of(*table, key) != *version {
                return Err(EngineError::TxnConflict);
            }
        }
        for ((table, key), value) in state.writes.iter() {
            let tree = self.store.tree(*table)?;
            match value {
                Some(raw) => {
                    tree.insert(key.clone(), raw.clone())?;
                }
                None => {
                    tree.remove(key.clone())?;
                }
            }
            self.store
                .inner
                .versions
                .entry((*table, key.clone()))
                .and_modify(|v| *v += 1)
                .or_insert(1);
        }
        let seq = self.store.inner.seq.load(Ordering::SeqCst);
        self.store
            .tree(Table::Meta)?
            .insert(SEQ_KEY, serde_json::to_vec(&seq)?)?;
        state.committed = true;
        Ok(std::mem::take(&mut state.audit))
    }
}

/// Read-only view over a transaction
///
/// Handed to router callbacks, which may read workflow state but must not
/// write; any state change belongs in the action that preceded the route.
#[derive(Clone)]
pub struct ReadTxn {
    txn: Txn,
}

impl ReadTxn {
    pub(crate) fn new(txn: Txn) -> Self {
        Self { txn }
    }

    /// Read one row, decoded from its JSON document
    pub fn get<T: DeserializeOwned>(&self, table: Table, key: &str) -> EngineResult<Option<T>> {
        self.txn.get(table, key)
    }

    /// Scan rows by key prefix
    pub fn scan<T: DeserializeOwned>(
        &self,
        table: Table,
        prefix: &str,
    ) -> EngineResult<Vec<(String, T)>> {
        self.txn.scan(table, prefix)
    }
}

/// Join key segments with `/`; integers are zero-padded by the callers so
/// prefix scans return rows in numeric order.
pub fn key2(a: &str, b: &str) -> String {
    format!("{}/{}", a, b)
}

/// Three-segment composite key
pub fn key3(a: &str, b: &str, c: &str) -> String {
    format!("{}/{}/{}", a, b, c)
}

/// Four-segment composite key
pub fn key4(a: &str, b: &str, c: &str, d: &str) -> String {
    format!("{}/{}/{}/{}", a, b, c, d)
}

/// Zero-padded generation segment
pub fn gen_key(generation: u32) -> String {
    format!("{:06}", generation)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        value: u32,
    }

    fn open_store() -> (DocumentStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = DocumentStore::open(dir.path()).expect("open store");
        (store, dir)
    }

    #[test]
    fn read_your_writes() -> EngineResult<()> {
        let (store, _dir) = open_store();
        let txn = store.begin();
        txn.put(Table::Conditions, "wf/a", &Row { value: 1 })?;
        let row: Option<Row> = txn.get(Table::Conditions, "wf/a")?;
        assert_eq!(row, Some(Row { value: 1 }));
        txn.commit()?;

        let txn = store.begin();
        let row: Option<Row> = txn.get(Table::Conditions, "wf/a")?;
        assert_eq!(row, Some(Row { value: 1 }));
        Ok(())
    }

    #[test]
    fn scan_merges_buffered_writes() -> EngineResult<()> {
        let (store, _dir) = open_store();
        let setup = store.begin();
        setup.put(Table::Tasks, "wf/a/000000", &Row { value: 1 })?;
        setup.put(Table::Tasks, "wf/a/000001", &Row { value: 2 })?;
        setup.put(Table::Tasks, "wf/b/000000", &Row { value: 9 })?;
        setup.commit()?;

        let txn = store.begin();
        txn.put(Table::Tasks, "wf/a/000002", &Row { value: 3 })?;
        txn.delete(Table::Tasks, "wf/a/000000")?;
        let rows: Vec<(String, Row)> = txn.scan(Table::Tasks, "wf/a/")?;
        let values: Vec<u32> = rows.iter().map(|(_, r)| r.value).collect();
        assert_eq!(values, vec![2, 3]);
        Ok(())
    }

    #[test]
    fn conflicting_commit_is_rejected() -> EngineResult<()> {
        let (store, _dir) = open_store();
        let setup = store.begin();
        setup.put(Table::Conditions, "wf/c", &Row { value: 0 })?;
        setup.commit()?;

        let first = store.begin();
        let second = store.begin();
        let _: Option<Row> = first.get(Table::Conditions, "wf/c")?;
        let _: Option<Row> = second.get(Table::Conditions, "wf/c")?;
        first.put(Table::Conditions, "wf/c", &Row { value: 1 })?;
        second.put(Table::Conditions, "wf/c", &Row { value: 2 })?;
        first.commit()?;
        assert!(matches!(second.commit(), Err(EngineError::TxnConflict)));

        let check = store.begin();
        let row: Option<Row> = check.get(Table::Conditions, "wf/c")?;
        assert_eq!(row, Some(Row { value: 1 }));
        Ok(())
    }

    #[test]
    fn handle_is_closed_after_commit() -> EngineResult<()> {
        let (store, _dir) = open_store();
        let txn = store.begin();
        let clone = txn.clone();
        txn.commit()?;
        let stale: EngineResult<Option<Row>> = clone.get(Table::Conditions, "wf/x");
        assert!(matches!(stale, Err(EngineError::TxnClosed)));
        Ok(())
    }

    #[test]
    fn sequence_is_monotonic_across_reopen() -> EngineResult<()> {
        let dir = tempfile::tempdir().expect("tempdir");
        let high = {
            let store = DocumentStore::open(dir.path())?;
            let txn = store.begin();
            let a = txn.next_seq();
            let b = txn.next_seq();
            assert!(b > a);
            txn.commit()?;
            b
        };
        let store = DocumentStore::open(dir.path())?;
        let txn = store.begin();
        assert!(txn.next_seq() > high);
        Ok(())
    }
}
