//! Bounded snapshot history.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{Result, RuntimeError};
use crate::execution::{ExecutionId, Snapshot, SnapshotDiff};

pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Fixed-capacity ring of snapshots for one instance, oldest first.
///
/// Ticks are strictly increasing, so lookups are an offset from the oldest retained tick with a
/// binary search as the fallback.
#[derive(Debug)]
pub struct HistoryStore {
    execution_id: ExecutionId,
    capacity: usize,
    entries: VecDeque<Arc<Snapshot>>,
}

impl HistoryStore {
    /// A capacity of 0 records nothing.
    pub fn new(execution_id: ExecutionId, capacity: usize) -> Self {
        Self {
            execution_id,
            capacity,
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_HISTORY_CAPACITY)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a snapshot, returning the one evicted to make room.
    pub fn add(&mut self, snapshot: Arc<Snapshot>) -> Option<Arc<Snapshot>> {
        if self.capacity == 0 {
            return None;
        }
        if snapshot.execution_id != self.execution_id {
            tracing::warn!(
                execution_id = %self.execution_id,
                foreign = %snapshot.execution_id,
                "ignoring snapshot from another execution"
            );
            return None;
        }
        if self.entries.back().is_some_and(|last| last.tick >= snapshot.tick) {
            tracing::warn!(
                execution_id = %self.execution_id,
                tick = snapshot.tick,
                "ignoring out-of-order snapshot"
            );
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(snapshot);
        evicted
    }

    fn position(&self, tick: u64) -> Option<usize> {
        let first = self.entries.front()?.tick;
        let offset = usize::try_from(tick.checked_sub(first)?).ok()?;
        if self.entries.get(offset).is_some_and(|s| s.tick == tick) {
            return Some(offset);
        }
        self.entries.binary_search_by_key(&tick, |s| s.tick).ok()
    }

    pub fn get(&self, tick: u64) -> Result<Arc<Snapshot>> {
        self.position(tick)
            .map(|i| self.entries[i].clone())
            .ok_or(RuntimeError::TickNotRetained { tick })
    }

    /// Retained snapshots with `from <= tick <= to`, oldest first.
    pub fn range(&self, from: u64, to: u64) -> Vec<Arc<Snapshot>> {
        if from > to {
            return Vec::new();
        }
        let start = self.entries.partition_point(|s| s.tick < from);
        self.entries
            .range(start..)
            .take_while(|s| s.tick <= to)
            .cloned()
            .collect()
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.entries.back().cloned()
    }

    pub fn oldest_tick(&self) -> Option<u64> {
        self.entries.front().map(|s| s.tick)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Changes between two retained ticks.
    pub fn diff(&self, from: u64, to: u64) -> Result<SnapshotDiff> {
        let before = self.get(from)?;
        let after = self.get(to)?;
        Ok(before.diff(&after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn snapshot(execution_id: ExecutionId, tick: u64) -> Arc<Snapshot> {
        Arc::new(Snapshot {
            execution_id,
            tick,
            timestamp: chrono::Utc::now(),
            root_status: None,
            nodes: BTreeMap::new(),
            tip: None,
            store: BTreeMap::new(),
        })
    }

    #[test]
    fn capacity_zero_records_nothing() {
        let id = ExecutionId::new();
        let mut history = HistoryStore::new(id, 0);
        assert!(history.add(snapshot(id, 1)).is_none());
        assert_eq!(history.count(), 0);
        assert!(matches!(
            history.get(1),
            Err(RuntimeError::TickNotRetained { tick: 1 })
        ));
    }

    #[test]
    fn lookup_survives_gaps() {
        let id = ExecutionId::new();
        let mut history = HistoryStore::new(id, 10);
        for tick in [2, 3, 7, 9] {
            history.add(snapshot(id, tick));
        }
        assert_eq!(history.get(7).unwrap().tick, 7);
        assert!(history.get(4).is_err());
        let ticks: Vec<u64> = history.range(3, 8).iter().map(|s| s.tick).collect();
        assert_eq!(ticks, vec![3, 7]);
    }

    #[test]
    fn rejects_out_of_order_and_foreign_snapshots() {
        let id = ExecutionId::new();
        let mut history = HistoryStore::new(id, 10);
        history.add(snapshot(id, 5));
        history.add(snapshot(id, 5));
        history.add(snapshot(ExecutionId::new(), 6));
        assert_eq!(history.count(), 1);
    }
}
