//! Sharded per-generation statistics
//!
//! Each task generation spreads its counters across `stats_shard_count`
//! shards so concurrent children do not contend on one row. Shards hold
//! monotone event counters; aggregation sums the live shards and derives the
//! currently-in-state figures from the event counts. Shards are created
//! lazily on first increment; an unfilled shard simply does not exist.

use serde::{Deserialize, Serialize};

use crate::runtime::workflow::WorkflowId;

/// One shard of a task generation's counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsShardRow {
    /// Owning workflow instance
    pub workflow_id: WorkflowId,
    /// Owning task name
    pub task_name: String,
    /// Owning task generation
    pub generation: u32,
    /// Shard index within the generation
    pub shard: u32,
    /// Children ever created under this generation
    pub total: u64,
    /// Initialize events
    pub initialized: u64,
    /// Start events
    pub started: u64,
    /// Complete events
    pub completed: u64,
    /// Fail events
    pub failed: u64,
    /// Cancel events
    pub canceled: u64,
    /// Cancel events that hit a child which had never started
    pub canceled_before_start: u64,
    /// Reset events
    pub reset: u64,
}

/// Child state-change events counted on shards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsEvent {
    /// Child created; also increments `total`
    Initialized,
    /// Child started
    Started,
    /// Child completed
    Completed,
    /// Child failed
    Failed,
    /// Child canceled; teardown may cancel a child that never started
    Canceled {
        /// Child was still `initialized` when canceled
        before_start: bool,
    },
    /// Child reset back to initialized
    Reset,
}

impl StatsShardRow {
    /// Create an empty shard
    pub fn new(workflow_id: WorkflowId, task_name: &str, generation: u32, shard: u32) -> Self {
        Self {
            workflow_id,
            task_name: task_name.to_owned(),
            generation,
            shard,
            total: 0,
            initialized: 0,
            started: 0,
            completed: 0,
            failed: 0,
            canceled: 0,
            canceled_before_start: 0,
            reset: 0,
        }
    }

    /// Apply one event to this shard
    pub fn record(&mut self, event: StatsEvent) {
        match event {
            StatsEvent::Initialized => {
                self.total += 1;
                self.initialized += 1;
            }
            StatsEvent::Started => self.started += 1,
            StatsEvent::Completed => self.completed += 1,
            StatsEvent::Failed => self.failed += 1,
            StatsEvent::Canceled { before_start } => {
                self.canceled += 1;
                if before_start {
                    self.canceled_before_start += 1;
                }
            }
            StatsEvent::Reset => self.reset += 1,
        }
    }
}

/// Aggregated view over all shards of one task generation
///
/// `initialized` and `started` count children currently in that state, so
/// `total = initialized + started + completed + failed + canceled` holds at
/// every committed transaction boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    /// Children ever created
    pub total: u64,
    /// Children currently initialized
    pub initialized: u64,
    /// Children currently started
    pub started: u64,
    /// Children completed
    pub completed: u64,
    /// Children failed
    pub failed: u64,
    /// Children canceled
    pub canceled: u64,
}

impl TaskStats {
    /// Fold one shard into the aggregate
    pub fn aggregate<'a, I: IntoIterator<Item = &'a StatsShardRow>>(shards: I) -> Self {
        let mut total = 0u64;
        let mut init_events = 0u64;
        let mut start_events = 0u64;
        let mut completed = 0u64;
        let mut failed = 0u64;
        let mut canceled = 0u64;
        let mut canceled_before_start = 0u64;
        let mut reset_events = 0u64;
        for shard in shards {
            total += shard.total;
            init_events += shard.initialized;
            start_events += shard.started;
            completed += shard.completed;
            failed += shard.failed;
            canceled += shard.canceled;
            canceled_before_start += shard.canceled_before_start;
            reset_events += shard.reset;
        }
        let initialized = (init_events + reset_events)
            .saturating_sub(start_events)
            .saturating_sub(canceled_before_start);
        let started = start_events
            .saturating_sub(reset_events)
            .saturating_sub(completed + failed + canceled.saturating_sub(canceled_before_start));
        Self {
            total,
            initialized,
            started,
            completed,
            failed,
            canceled,
        }
    }

    /// Whether every child ever created has reached a terminal state
    pub fn all_terminal(&self) -> bool {
        self.completed + self.failed + self.canceled == self.total
    }
}

/// Deterministic shard selector: FNV-1a over the child id bytes, modulo the
/// generation's shard count.
pub fn shard_for(child_id: &[u8], shard_count: u32) -> u32 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in child_id {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    (hash % u64::from(shard_count.max(1))) as u32
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn shard(n: u32) -> StatsShardRow {
        StatsShardRow::new(WorkflowId::new(), "review", 0, n)
    }

    #[test]
    fn aggregate_tracks_current_states() {
        let mut a = shard(0);
        let mut b = shard(1);
        a.record(StatsEvent::Initialized);
        a.record(StatsEvent::Started);
        b.record(StatsEvent::Initialized);
        let stats = TaskStats::aggregate([&a, &b]);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.initialized, 1);
        assert_eq!(stats.started, 1);
        assert!(!stats.all_terminal());

        a.record(StatsEvent::Completed);
        b.record(StatsEvent::Started);
        b.record(StatsEvent::Canceled { before_start: false });
        let stats = TaskStats::aggregate([&a, &b]);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.canceled, 1);
        assert!(stats.all_terminal());
    }

    #[test]
    fn reset_returns_child_to_initialized() {
        let mut shard = shard(0);
        shard.record(StatsEvent::Initialized);
        shard.record(StatsEvent::Started);
        shard.record(StatsEvent::Reset);
        let stats = TaskStats::aggregate([&shard]);
        assert_eq!(stats.initialized, 1);
        assert_eq!(stats.started, 0);
        assert_eq!(stats.total, 1);
    }

    #[test]
    fn teardown_cancel_of_unstarted_child_balances() {
        let mut row = shard(0);
        row.record(StatsEvent::Initialized);
        row.record(StatsEvent::Canceled { before_start: true });
        let stats = TaskStats::aggregate([&row]);
        assert_eq!(stats.initialized, 0);
        assert_eq!(stats.started, 0);
        assert_eq!(stats.canceled, 1);
        assert!(stats.all_terminal());
    }

    #[test]
    fn selector_is_stable_and_in_range() {
        let id = uuid::Uuid::new_v4();
        let first = shard_for(id.as_bytes(), 8);
        let second = shard_for(id.as_bytes(), 8);
        assert_eq!(first, second);
        assert!(first < 8);
        assert_eq!(shard_for(id.as_bytes(), 0), 0);
    }

    proptest! {
        /// Drive random child lifecycles and check the aggregation equation.
        #[test]
        fn totals_balance(children in prop::collection::vec(0u8..5, 1..40), shards in 1u32..6) {
            let workflow_id = WorkflowId::new();
            let mut rows: Vec<StatsShardRow> = (0..shards)
                .map(|shard| StatsShardRow::new(workflow_id, "review", 0, shard))
                .collect();
            for (n, terminal) in children.iter().enumerate() {
                let id = [n as u8; 4];
                let shard = shard_for(&id, shards) as usize;
                rows[shard].record(StatsEvent::Initialized);
                if *terminal > 0 {
                    rows[shard].record(StatsEvent::Started);
                }
                match terminal {
                    2 => rows[shard].record(StatsEvent::Completed),
                    3 => rows[shard].record(StatsEvent::Failed),
                    4 => rows[shard].record(StatsEvent::Canceled { before_start: false }),
                    _ => {}
                }
            }
            let stats = TaskStats::aggregate(rows.iter());
            prop_assert_eq!(
                stats.total,
                stats.initialized + stats.started + stats.completed + stats.failed + stats.canceled
            );
            prop_assert_eq!(stats.total, children.len() as u64);
        }
    }
}
