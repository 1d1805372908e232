//! Snapshot reference counting: a snapshot source must not be deleted
//! while a clone/recover task is still reading from it. Incremented
//! exactly once at admission, decremented exactly once at terminal
//! success or error — never on every step, never twice.

use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct SnapshotRefCounter {
    counts: Arc<DashMap<String, u64>>,
}

impl SnapshotRefCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, snapshot_id: &str) {
        *self.counts.entry(snapshot_id.to_string()).or_insert(0) += 1;
    }

    /// No-op (with a debug assert upgraded to a log in release builds)
    /// if the count was already zero — that would mean a double-decrement
    /// bug upstream, not a normal race.
    pub fn decrement(&self, snapshot_id: &str) {
        if let Some(mut entry) = self.counts.get_mut(snapshot_id) {
            if *entry > 0 {
                *entry -= 1;
            } else {
                tracing::warn!(snapshot_id, "ref count already zero on decrement");
            }
        } else {
            tracing::warn!(snapshot_id, "decrement of untracked snapshot id");
        }
    }

    pub fn count(&self, snapshot_id: &str) -> u64 {
        self.counts.get(snapshot_id).map(|v| *v).unwrap_or(0)
    }

    pub fn is_referenced(&self, snapshot_id: &str) -> bool {
        self.count(snapshot_id) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_then_decrement_clears_reference() {
        let rc = SnapshotRefCounter::new();
        rc.increment("snap-1");
        assert!(rc.is_referenced("snap-1"));
        rc.decrement("snap-1");
        assert!(!rc.is_referenced("snap-1"));
    }

    #[test]
    fn counts_are_per_snapshot() {
        let rc = SnapshotRefCounter::new();
        rc.increment("snap-1");
        rc.increment("snap-2");
        rc.increment("snap-2");
        assert_eq!(rc.count("snap-1"), 1);
        assert_eq!(rc.count("snap-2"), 2);
    }

    #[test]
    fn decrement_below_zero_is_tolerated_not_panicking() {
        let rc = SnapshotRefCounter::new();
        rc.decrement("never-incremented");
        assert_eq!(rc.count("never-incremented"), 0);
    }
}
