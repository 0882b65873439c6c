//! Local record stores
//!
//! A record store holds one member's copy of one replicated map. Local writes
//! advance the local member's counter in the entry's vector clock and are
//! handed to the store's [`ReplicationPublisher`]; replicated writes from
//! other members are applied through [`ReplicatedRecordStore::apply_remote`].

mod format;
mod iter;
mod record_store;

use std::sync::Arc;

pub use format::{BinaryFormat, ObjectFormat, RecordFormat};
pub use iter::RecordIterator;
pub use record_store::{BinaryRecordStore, ObjectRecordStore, RecordStore};

use ripple_common::{InMemoryFormat, Result};

use crate::messages::ReplicationMessage;
use crate::publisher::ReplicationPublisher;
use crate::record::{Data, ReplicatedRecord, StoredValue};
use crate::stats::LocalReplicatedMapStats;

/// Result of applying a replicated update to a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplyOutcome {
    /// The update causally followed the local state and replaced it
    Accepted,
    /// The local state already dominates the update
    Stale,
    /// The update carries exactly the local clock
    Duplicate,
    /// Concurrent write, the update won the tie-break
    ConflictWon,
    /// Concurrent write, the local value won the tie-break; clocks were merged
    ConflictLost,
}

impl ApplyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyOutcome::Accepted => "accepted",
            ApplyOutcome::Stale => "stale",
            ApplyOutcome::Duplicate => "duplicate",
            ApplyOutcome::ConflictWon => "conflict_won",
            ApplyOutcome::ConflictLost => "conflict_lost",
        }
    }

    /// Whether the update replaced the stored value
    pub fn changed_value(&self) -> bool {
        matches!(self, ApplyOutcome::Accepted | ApplyOutcome::ConflictWon)
    }
}

/// One member's copy of one replicated map
pub trait ReplicatedRecordStore: Send + Sync {
    fn name(&self) -> &str;

    fn in_memory_format(&self) -> InMemoryFormat;

    /// Store a value, returning the previous live value
    fn put(&self, key: Data, value: Data) -> Result<Option<StoredValue>> {
        self.put_with_ttl(key, value, 0)
    }

    /// Store a value that expires `ttl_millis` after this write, 0 meaning never
    fn put_with_ttl(&self, key: Data, value: Data, ttl_millis: u64) -> Result<Option<StoredValue>>;

    fn get(&self, key: &Data) -> Result<Option<StoredValue>>;

    /// Remove a key, returning the previous live value
    fn remove(&self, key: &Data) -> Result<Option<StoredValue>>;

    fn contains_key(&self, key: &Data) -> Result<bool>;

    fn contains_value(&self, value: &Data) -> Result<bool>;

    /// Number of live entries
    fn size(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Remove every live entry, returning how many were removed
    fn clear(&self) -> Result<usize>;

    /// Current record of a key, tombstones included
    fn record(&self, key: &Data) -> Option<ReplicatedRecord>;

    /// Apply a mutation replicated from another member
    fn apply_remote(&self, message: &ReplicationMessage) -> Result<ApplyOutcome>;

    /// Restartable iterator over the records live as of `now`; records whose
    /// TTL elapsed by then are included unless `skip_expired` is set
    fn iter(&self, now: i64, skip_expired: bool) -> RecordIterator;

    /// Evict records whose TTL elapsed at `now` and purge old tombstones,
    /// returning the number of evicted entries
    fn evict_expired(&self, now: i64) -> usize;

    fn stats(&self) -> LocalReplicatedMapStats;

    /// Count an entry event delivered to a local listener
    fn record_received_event(&self);

    fn publisher(&self) -> Arc<ReplicationPublisher>;

    fn is_destroyed(&self) -> bool;

    /// Drop all records and stop replication; later operations fail
    fn destroy(&self);
}
