//! Local replicated map statistics

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::Serialize;

use ripple_common::current_millis;

use crate::store::ApplyOutcome;

/// Point-in-time statistics of one local record store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalReplicatedMapStats {
    pub creation_time: i64,
    pub last_access_time: i64,
    pub last_update_time: i64,
    pub owned_entry_count: u64,
    pub hits: u64,
    pub put_operation_count: u64,
    pub get_operation_count: u64,
    pub remove_operation_count: u64,
    pub other_operation_count: u64,
    pub received_events: u64,
    pub dropped_events: u64,
    pub replication_messages_sent: u64,
    pub remote_updates_applied: u64,
    pub remote_updates_rejected: u64,
    pub conflicts_resolved: u64,
    pub evicted_entries: u64,
}

/// Counters collected while a store operates.
///
/// When statistics are disabled for the map the collector ignores every
/// update and snapshots stay at zero.
#[derive(Debug)]
pub struct ReplicatedMapStatsCollector {
    enabled: bool,
    creation_time: i64,
    last_access_time: AtomicI64,
    last_update_time: AtomicI64,
    puts: AtomicU64,
    gets: AtomicU64,
    removes: AtomicU64,
    others: AtomicU64,
    received_events: AtomicU64,
    dropped_events: AtomicU64,
    messages_sent: AtomicU64,
    remote_applied: AtomicU64,
    remote_rejected: AtomicU64,
    conflicts: AtomicU64,
    evictions: AtomicU64,
}

impl ReplicatedMapStatsCollector {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            creation_time: current_millis(),
            last_access_time: AtomicI64::new(0),
            last_update_time: AtomicI64::new(0),
            puts: AtomicU64::new(0),
            gets: AtomicU64::new(0),
            removes: AtomicU64::new(0),
            others: AtomicU64::new(0),
            received_events: AtomicU64::new(0),
            dropped_events: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            remote_applied: AtomicU64::new(0),
            remote_rejected: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn bump(&self, counter: &AtomicU64, by: u64) -> bool {
        if !self.is_enabled() {
            return false;
        }
        counter.fetch_add(by, Ordering::Relaxed);
        true
    }

    pub fn increment_puts(&self, now: i64) {
        if self.bump(&self.puts, 1) {
            self.last_update_time.fetch_max(now, Ordering::Relaxed);
        }
    }

    pub fn increment_gets(&self, now: i64) {
        if self.bump(&self.gets, 1) {
            self.last_access_time.fetch_max(now, Ordering::Relaxed);
        }
    }

    pub fn increment_removes(&self, now: i64) {
        if self.bump(&self.removes, 1) {
            self.last_update_time.fetch_max(now, Ordering::Relaxed);
        }
    }

    /// Queries other than get, such as size or containment checks
    pub fn increment_others(&self) {
        self.bump(&self.others, 1);
    }

    pub fn increment_received_events(&self) {
        self.bump(&self.received_events, 1);
    }

    /// Entry events discarded because the listener queue was full
    pub fn increment_dropped_events(&self) {
        self.bump(&self.dropped_events, 1);
    }

    pub fn add_messages_sent(&self, count: u64) {
        self.bump(&self.messages_sent, count);
    }

    pub fn add_evictions(&self, count: u64) {
        self.bump(&self.evictions, count);
    }

    pub fn record_remote(&self, outcome: ApplyOutcome, now: i64) {
        match outcome {
            ApplyOutcome::Accepted => {
                self.bump(&self.remote_applied, 1);
            }
            ApplyOutcome::ConflictWon => {
                self.bump(&self.remote_applied, 1);
                self.bump(&self.conflicts, 1);
            }
            ApplyOutcome::ConflictLost => {
                self.bump(&self.remote_rejected, 1);
                self.bump(&self.conflicts, 1);
            }
            ApplyOutcome::Stale | ApplyOutcome::Duplicate => {
                self.bump(&self.remote_rejected, 1);
            }
        }
        if outcome.changed_value() && self.is_enabled() {
            self.last_update_time.fetch_max(now, Ordering::Relaxed);
        }
    }

    /// Snapshot of the counters, combined with the entry figures the store computes
    pub fn snapshot(&self, owned_entry_count: u64, hits: u64) -> LocalReplicatedMapStats {
        if !self.is_enabled() {
            return LocalReplicatedMapStats {
                creation_time: self.creation_time,
                ..Default::default()
            };
        }
        LocalReplicatedMapStats {
            creation_time: self.creation_time,
            last_access_time: self.last_access_time.load(Ordering::Relaxed),
            last_update_time: self.last_update_time.load(Ordering::Relaxed),
            owned_entry_count,
            hits,
            put_operation_count: self.puts.load(Ordering::Relaxed),
            get_operation_count: self.gets.load(Ordering::Relaxed),
            remove_operation_count: self.removes.load(Ordering::Relaxed),
            other_operation_count: self.others.load(Ordering::Relaxed),
            received_events: self.received_events.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            replication_messages_sent: self.messages_sent.load(Ordering::Relaxed),
            remote_updates_applied: self.remote_applied.load(Ordering::Relaxed),
            remote_updates_rejected: self.remote_rejected.load(Ordering::Relaxed),
            conflicts_resolved: self.conflicts.load(Ordering::Relaxed),
            evicted_entries: self.evictions.load(Ordering::Relaxed),
        }
    }
}

impl Default for ReplicatedMapStatsCollector {
    fn default() -> Self {
        Self::new(true)
    }
}
