use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, trace, warn};

use ripple_common::{
    InMemoryFormat, MemberId, ReplicatedMapConfig, Result, RippleError, current_millis,
};

use super::format::{BinaryFormat, ObjectFormat, RecordFormat};
use super::iter::RecordIterator;
use super::{ApplyOutcome, ReplicatedRecordStore};
use crate::event::{EntryEvent, EntryEventType};
use crate::messages::ReplicationMessage;
use crate::metrics;
use crate::publisher::ReplicationPublisher;
use crate::record::{Data, ReplicatedRecord, StoredValue, WriteStamp};
use crate::stats::{LocalReplicatedMapStats, ReplicatedMapStatsCollector};
use crate::vector_clock::{CausalOrdering, VectorClock};

/// Store keeping deserialized values
pub type ObjectRecordStore = RecordStore<ObjectFormat>;

/// Store keeping serialized values
pub type BinaryRecordStore = RecordStore<BinaryFormat>;

/// Record store generic over the in-memory value representation.
///
/// Each mutation of a key runs under that key's map entry, so the clock
/// comparison and the value swap of one key never interleave. Entry events and
/// outbound messages are emitted while the entry is held, which keeps their
/// order per key identical to the order of the mutations.
pub struct RecordStore<F: RecordFormat> {
    name: String,
    config: ReplicatedMapConfig,
    local_member: MemberId,
    records: Arc<DashMap<Data, ReplicatedRecord>>,
    destroyed: Arc<AtomicBool>,
    publisher: Arc<ReplicationPublisher>,
    events: mpsc::Sender<EntryEvent>,
    stats: Arc<ReplicatedMapStatsCollector>,
    _format: PhantomData<fn() -> F>,
}

impl<F: RecordFormat> RecordStore<F> {
    pub fn new(
        config: ReplicatedMapConfig,
        local_member: MemberId,
        publisher: Arc<ReplicationPublisher>,
        events: mpsc::Sender<EntryEvent>,
        stats: Arc<ReplicatedMapStatsCollector>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            config,
            local_member,
            records: Arc::new(DashMap::new()),
            destroyed: Arc::new(AtomicBool::new(false)),
            publisher,
            events,
            stats,
            _format: PhantomData,
        }
    }

    pub fn config(&self) -> &ReplicatedMapConfig {
        &self.config
    }

    fn ensure_active(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(RippleError::StoreDestroyed(self.name.clone()));
        }
        Ok(())
    }

    /// Record for a key seen for the first time: no value and an empty clock
    fn vacant_record(&self, key: Data, now: i64) -> ReplicatedRecord {
        let clock = VectorClock::new();
        let stamp = WriteStamp::of(&self.local_member, &clock);
        ReplicatedRecord::new(key, None, clock, stamp, 0, now)
    }

    /// Clock of the next local write to `record`
    fn next_clock(&self, record: &ReplicatedRecord) -> Result<VectorClock> {
        record.vector_clock.increment(&self.local_member).ok_or_else(|| {
            RippleError::ClockOverflow(format!(
                "counter of {} for a key of map '{}' is exhausted",
                self.local_member, self.name
            ))
        })
    }

    fn fire(&self, event: Option<EntryEvent>) {
        let Some(event) = event else {
            return;
        };
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.stats.increment_dropped_events();
                metrics::record_event_dropped(&self.name);
                warn!(
                    "Event queue of map {} is full, dropping {:?} event",
                    self.name, event.event_type
                );
            }
            Err(TrySendError::Closed(_)) => {
                trace!("Event dispatcher for map {} is gone, dropping event", self.name);
            }
        }
    }

    /// Tombstone the record if its TTL elapsed. Eviction is local to this
    /// member and is not replicated.
    fn expire_if_due(&self, record: &mut ReplicatedRecord, now: i64) -> bool {
        if !record.is_expired(now) {
            return false;
        }
        let old = record.expire(now);
        self.fire(Some(EntryEvent::new(
            self.name.as_str(),
            record.key.clone(),
            old,
            None,
            EntryEventType::Evicted,
            self.local_member.clone(),
        )));
        self.stats.add_evictions(1);
        metrics::record_evictions(&self.name, 1);
        true
    }

    fn live_value(&self, key: &Data, now: i64, count_hit: bool) -> Option<StoredValue> {
        let mut record = self.records.get_mut(key)?;
        if self.expire_if_due(&mut record, now) {
            return None;
        }
        let value = record.value.clone()?;
        if count_hit {
            record.access(now);
        }
        Some(value)
    }
}

impl<F: RecordFormat> ReplicatedRecordStore for RecordStore<F> {
    fn name(&self) -> &str {
        &self.name
    }

    fn in_memory_format(&self) -> InMemoryFormat {
        F::FORMAT
    }

    fn put_with_ttl(&self, key: Data, value: Data, ttl_millis: u64) -> Result<Option<StoredValue>> {
        self.ensure_active()?;
        let stored = F::to_stored(value.clone())?;
        let now = current_millis();

        let mut record = self
            .records
            .entry(key.clone())
            .or_insert_with(|| self.vacant_record(key.clone(), now));
        self.expire_if_due(&mut record, now);

        let clock = self.next_clock(&record)?;
        let stamp = WriteStamp::of(&self.local_member, &clock);
        let old = record.update(Some(stored.clone()), clock.clone(), stamp, ttl_millis, now);

        self.publisher.publish(ReplicationMessage::put(
            self.name.as_str(),
            key.clone(),
            value,
            clock,
            self.local_member.clone(),
            ttl_millis,
        ));
        self.fire(EntryEvent::for_transition(
            &self.name,
            &key,
            old.clone(),
            Some(stored),
            &self.local_member,
        ));
        drop(record);

        self.stats.increment_puts(now);
        metrics::record_local_operation(&self.name, "put");
        Ok(old)
    }

    fn get(&self, key: &Data) -> Result<Option<StoredValue>> {
        self.ensure_active()?;
        let now = current_millis();
        self.stats.increment_gets(now);
        Ok(self.live_value(key, now, true))
    }

    fn remove(&self, key: &Data) -> Result<Option<StoredValue>> {
        self.ensure_active()?;
        let now = current_millis();

        // Removing an unknown key still advances its clock, so a concurrent
        // put elsewhere is ordered against this remove.
        let mut record = self
            .records
            .entry(key.clone())
            .or_insert_with(|| self.vacant_record(key.clone(), now));
        self.expire_if_due(&mut record, now);

        let clock = self.next_clock(&record)?;
        let stamp = WriteStamp::of(&self.local_member, &clock);
        let old = record.update(None, clock.clone(), stamp, 0, now);

        self.publisher.publish(ReplicationMessage::remove(
            self.name.as_str(),
            key.clone(),
            clock,
            self.local_member.clone(),
        ));
        self.fire(EntryEvent::for_transition(
            &self.name,
            key,
            old.clone(),
            None,
            &self.local_member,
        ));
        drop(record);

        self.stats.increment_removes(now);
        metrics::record_local_operation(&self.name, "remove");
        Ok(old)
    }

    fn contains_key(&self, key: &Data) -> Result<bool> {
        self.ensure_active()?;
        self.stats.increment_others();
        Ok(self.live_value(key, current_millis(), false).is_some())
    }

    fn contains_value(&self, value: &Data) -> Result<bool> {
        self.ensure_active()?;
        self.stats.increment_others();
        let wanted = F::to_stored(value.clone())?;
        let now = current_millis();
        Ok(self.records.iter().any(|record| {
            record.is_live(now)
                && record
                    .value
                    .as_ref()
                    .is_some_and(|stored| stored.same_content(&wanted))
        }))
    }

    fn size(&self) -> usize {
        let now = current_millis();
        self.records.iter().filter(|r| r.is_live(now)).count()
    }

    fn clear(&self) -> Result<usize> {
        self.ensure_active()?;
        let keys: Vec<Data> = self
            .iter(current_millis(), true)
            .map(|record| record.key)
            .collect();
        let mut removed = 0;
        for key in keys {
            if self.remove(&key)?.is_some() {
                removed += 1;
            }
        }
        debug!("Cleared {} entries from replicated map {}", removed, self.name);
        Ok(removed)
    }

    fn record(&self, key: &Data) -> Option<ReplicatedRecord> {
        self.records.get(key).map(|record| record.clone())
    }

    fn apply_remote(&self, message: &ReplicationMessage) -> Result<ApplyOutcome> {
        self.ensure_active()?;
        if message.name != self.name {
            return Err(RippleError::MalformedReplicationMessage(format!(
                "message for map '{}' routed to store '{}'",
                message.name, self.name
            )));
        }
        let incoming = message.value.clone().map(F::to_stored).transpose()?;
        let stamp = message.stamp();
        let now = current_millis();

        let mut record = self
            .records
            .entry(message.key.clone())
            .or_insert_with(|| self.vacant_record(message.key.clone(), now));
        self.expire_if_due(&mut record, now);

        let (outcome, old) = match record.vector_clock.compare(&message.vector_clock) {
            CausalOrdering::Before => {
                let old = record.update(
                    incoming.clone(),
                    message.vector_clock.clone(),
                    stamp,
                    message.ttl_millis,
                    now,
                );
                (ApplyOutcome::Accepted, old)
            }
            CausalOrdering::After => (ApplyOutcome::Stale, None),
            CausalOrdering::Equal => (ApplyOutcome::Duplicate, None),
            CausalOrdering::Concurrent => {
                let merged = record.vector_clock.merge(&message.vector_clock);
                if stamp > record.stamp {
                    let old = record.update(incoming.clone(), merged, stamp, message.ttl_millis, now);
                    (ApplyOutcome::ConflictWon, old)
                } else {
                    record.vector_clock = merged;
                    (ApplyOutcome::ConflictLost, None)
                }
            }
        };

        if outcome.changed_value() {
            self.fire(EntryEvent::for_transition(
                &self.name,
                &message.key,
                old,
                incoming,
                &message.origin,
            ));
        }
        if matches!(outcome, ApplyOutcome::ConflictWon | ApplyOutcome::ConflictLost) {
            debug!(
                "Concurrent update of {:?} in map {}: write {} {}, clock now {}",
                message.key,
                self.name,
                message.stamp(),
                outcome.as_str(),
                record.vector_clock
            );
        }
        drop(record);

        self.stats.record_remote(outcome, now);
        metrics::record_remote_update(&self.name, outcome);
        Ok(outcome)
    }

    fn iter(&self, now: i64, skip_expired: bool) -> RecordIterator {
        RecordIterator::new(self.records.clone(), self.destroyed.clone(), now, skip_expired)
    }

    fn evict_expired(&self, now: i64) -> usize {
        if self.destroyed.load(Ordering::Acquire) {
            return 0;
        }

        let mut evicted = 0;
        for candidate in self.iter(now, false) {
            if !candidate.is_expired(now) {
                continue;
            }
            if let Some(mut record) = self.records.get_mut(&candidate.key)
                && self.expire_if_due(&mut record, now)
            {
                evicted += 1;
            }
        }

        let tombstone_ttl = self.config.tombstone_ttl_millis;
        self.records
            .retain(|_, record| !record.is_purgeable(now, tombstone_ttl));

        if evicted > 0 {
            debug!("Evicted {} expired entries from replicated map {}", evicted, self.name);
        }
        evicted
    }

    fn stats(&self) -> LocalReplicatedMapStats {
        let now = current_millis();
        let (owned, hits) = self
            .records
            .iter()
            .filter(|record| record.is_live(now))
            .fold((0u64, 0u64), |(owned, hits), record| (owned + 1, hits + record.hits));
        self.stats.snapshot(owned, hits)
    }

    fn record_received_event(&self) {
        self.stats.increment_received_events();
    }

    fn publisher(&self) -> Arc<ReplicationPublisher> {
        self.publisher.clone()
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.publisher.shutdown();
        self.records.clear();
        info!("Destroyed record store of replicated map {}", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessBus;

    struct Fixture<F: RecordFormat> {
        store: RecordStore<F>,
        events: mpsc::Receiver<EntryEvent>,
    }

    fn fixture<F: RecordFormat>(member: &str, config: ReplicatedMapConfig) -> Fixture<F> {
        let member = MemberId::from(member);
        let bus = InProcessBus::new().endpoint(member.clone());
        let stats = Arc::new(ReplicatedMapStatsCollector::new(config.statistics_enabled));
        let publisher = Arc::new(ReplicationPublisher::new(
            &config,
            member.clone(),
            bus,
            stats.clone(),
        ));
        let (tx, rx) = mpsc::channel(config.event_queue_capacity.max(1));
        Fixture {
            store: RecordStore::new(config, member, publisher, tx, stats),
            events: rx,
        }
    }

    fn object_store(member: &str) -> Fixture<ObjectFormat> {
        fixture(member, ReplicatedMapConfig::new("orders"))
    }

    fn data(value: &str) -> Data {
        Data::serialize(value).unwrap()
    }

    fn remote_put(key: &str, value: &str, clock: VectorClock, origin: &str) -> ReplicationMessage {
        ReplicationMessage::put("orders", data(key), data(value), clock, MemberId::from(origin), 0)
    }

    fn clock(entries: &[(&str, u64)]) -> VectorClock {
        entries.iter().map(|(m, c)| (MemberId::from(*m), *c)).collect()
    }

    fn value_of(store: &dyn ReplicatedRecordStore, key: &str) -> Option<String> {
        store
            .get(&data(key))
            .unwrap()
            .map(|v| v.deserialize::<String>().unwrap())
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let mut f = object_store("m1");
        assert!(f.store.put(data("k"), data("v1")).unwrap().is_none());
        let old = f.store.put(data("k"), data("v2")).unwrap();
        assert_eq!(old.unwrap().deserialize::<String>().unwrap(), "v1");
        assert_eq!(value_of(&f.store, "k").as_deref(), Some("v2"));
        assert_eq!(f.store.size(), 1);

        assert_eq!(f.events.recv().await.unwrap().event_type, EntryEventType::Added);
        assert_eq!(f.events.recv().await.unwrap().event_type, EntryEventType::Updated);
        assert_eq!(f.store.publisher().pending(), 2);
    }

    #[tokio::test]
    async fn test_local_counter_tracks_mutations() {
        let f = object_store("m1");
        let m1 = MemberId::from("m1");
        f.store.put(data("k"), data("a")).unwrap();
        f.store.put(data("k"), data("b")).unwrap();
        f.store.remove(&data("k")).unwrap();
        f.store.put(data("k"), data("c")).unwrap();

        let record = f.store.record(&data("k")).unwrap();
        assert_eq!(record.vector_clock.get(&m1), 4);
        assert_eq!(record.stamp.sequence, 4);
    }

    #[tokio::test]
    async fn test_remove_absent_key_leaves_tombstone() {
        let mut f = object_store("m1");
        assert!(f.store.remove(&data("missing")).unwrap().is_none());

        let record = f.store.record(&data("missing")).unwrap();
        assert!(record.is_tombstone());
        assert_eq!(record.vector_clock.get(&MemberId::from("m1")), 1);
        assert_eq!(f.store.size(), 0);
        assert!(f.events.try_recv().is_err());
        assert_eq!(f.store.publisher().pending(), 1);
    }

    #[tokio::test]
    async fn test_apply_remote_accepts_causal_successor() {
        let mut f = object_store("m2");
        let outcome = f
            .store
            .apply_remote(&remote_put("k", "v", clock(&[("m1", 1)]), "m1"))
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Accepted);
        assert_eq!(value_of(&f.store, "k").as_deref(), Some("v"));

        let event = f.events.recv().await.unwrap();
        assert_eq!(event.event_type, EntryEventType::Added);
        assert_eq!(event.member, MemberId::from("m1"));
        // Applying a remote update never re-broadcasts it.
        assert_eq!(f.store.publisher().pending(), 0);
    }

    #[tokio::test]
    async fn test_apply_remote_rejects_stale_and_duplicate() {
        let mut f = object_store("m2");
        let newer = remote_put("k", "new", clock(&[("m1", 2)]), "m1");
        let older = remote_put("k", "old", clock(&[("m1", 1)]), "m1");

        assert_eq!(f.store.apply_remote(&newer).unwrap(), ApplyOutcome::Accepted);
        assert_eq!(f.store.apply_remote(&newer).unwrap(), ApplyOutcome::Duplicate);
        assert_eq!(f.store.apply_remote(&older).unwrap(), ApplyOutcome::Stale);
        assert_eq!(value_of(&f.store, "k").as_deref(), Some("new"));

        assert!(f.events.recv().await.is_some());
        assert!(f.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_concurrent_writes_resolve_by_write_stamp() {
        // m1 and m2 both write their first version of the key.
        let a = object_store("m1");
        let b = object_store("m2");
        a.store.put(data("k"), data("from-m1")).unwrap();
        b.store.put(data("k"), data("from-m2")).unwrap();

        let from_a = remote_put("k", "from-m1", clock(&[("m1", 1)]), "m1");
        let from_b = remote_put("k", "from-m2", clock(&[("m2", 1)]), "m2");

        assert_eq!(a.store.apply_remote(&from_b).unwrap(), ApplyOutcome::ConflictWon);
        assert_eq!(b.store.apply_remote(&from_a).unwrap(), ApplyOutcome::ConflictLost);

        assert_eq!(value_of(&a.store, "k").as_deref(), Some("from-m2"));
        assert_eq!(value_of(&b.store, "k").as_deref(), Some("from-m2"));
        let merged = clock(&[("m1", 1), ("m2", 1)]);
        assert_eq!(a.store.record(&data("k")).unwrap().vector_clock, merged);
        assert_eq!(b.store.record(&data("k")).unwrap().vector_clock, merged);
    }

    #[tokio::test]
    async fn test_remote_remove_of_unknown_key_keeps_clock() {
        let mut f = object_store("m2");
        let remove = ReplicationMessage::remove("orders", data("k"), clock(&[("m1", 3)]), MemberId::from("m1"));
        assert_eq!(f.store.apply_remote(&remove).unwrap(), ApplyOutcome::Accepted);
        assert!(f.events.try_recv().is_err());

        let late_put = remote_put("k", "v", clock(&[("m1", 2)]), "m1");
        assert_eq!(f.store.apply_remote(&late_put).unwrap(), ApplyOutcome::Stale);
        assert!(value_of(&f.store, "k").is_none());
    }

    #[tokio::test]
    async fn test_apply_remote_rejects_foreign_map() {
        let f = object_store("m2");
        let mut message = remote_put("k", "v", clock(&[("m1", 1)]), "m1");
        message.name = "other".to_string();
        assert!(matches!(
            f.store.apply_remote(&message),
            Err(RippleError::MalformedReplicationMessage(_))
        ));
    }

    #[tokio::test]
    async fn test_ttl_expiry_evicts_without_replication() {
        let mut f = object_store("m1");
        f.store.put_with_ttl(data("k"), data("v"), 1).unwrap();
        assert_eq!(f.events.recv().await.unwrap().event_type, EntryEventType::Added);
        let pending = f.store.publisher().pending();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(value_of(&f.store, "k").is_none());
        assert_eq!(f.events.recv().await.unwrap().event_type, EntryEventType::Evicted);
        assert_eq!(f.store.publisher().pending(), pending);

        let record = f.store.record(&data("k")).unwrap();
        assert!(record.is_tombstone());
        assert_eq!(record.vector_clock.get(&MemberId::from("m1")), 1);
    }

    #[tokio::test]
    async fn test_evict_expired_sweeps_and_purges_tombstones() {
        let f = fixture::<ObjectFormat>(
            "m1",
            ReplicatedMapConfig::new("orders").with_tombstone_ttl_millis(0),
        );
        f.store.put_with_ttl(data("a"), data("v"), 1).unwrap();
        f.store.put(data("b"), data("v")).unwrap();

        let later = current_millis() + 10;
        assert_eq!(f.store.evict_expired(later), 1);
        assert!(f.store.record(&data("a")).is_none());
        assert_eq!(f.store.size(), 1);
        assert_eq!(f.store.stats().evicted_entries, 1);
    }

    #[tokio::test]
    async fn test_contains_and_clear() {
        let f = object_store("m1");
        f.store.put(data("a"), data("x")).unwrap();
        f.store.put(data("b"), data("y")).unwrap();

        assert!(f.store.contains_key(&data("a")).unwrap());
        assert!(!f.store.contains_key(&data("c")).unwrap());
        assert!(f.store.contains_value(&data("y")).unwrap());
        assert!(!f.store.contains_value(&data("z")).unwrap());

        assert_eq!(f.store.clear().unwrap(), 2);
        assert!(f.store.is_empty());
        assert_eq!(f.store.iter(current_millis(), true).count(), 0);
    }

    #[tokio::test]
    async fn test_binary_store_keeps_serialized_values() {
        let f = fixture::<BinaryFormat>(
            "m1",
            ReplicatedMapConfig::new("orders").with_in_memory_format(InMemoryFormat::Binary),
        );
        f.store.put(data("k"), data("v")).unwrap();
        assert_eq!(f.store.in_memory_format(), InMemoryFormat::Binary);
        assert!(matches!(
            f.store.get(&data("k")).unwrap(),
            Some(StoredValue::Binary(_))
        ));
    }

    #[tokio::test]
    async fn test_destroy_blocks_operations() {
        let f = object_store("m1");
        f.store.put(data("k"), data("v")).unwrap();
        let mut iter = f.store.iter(current_millis(), true);

        f.store.destroy();
        assert!(f.store.is_destroyed());
        assert!(iter.next().is_none());
        iter.restart();
        assert!(iter.next().is_none());
        assert!(matches!(
            f.store.put(data("k"), data("v")),
            Err(RippleError::StoreDestroyed(_))
        ));
        assert_eq!(f.store.size(), 0);
    }

    #[tokio::test]
    async fn test_iterator_restarts_over_fresh_snapshot() {
        let f = object_store("m1");
        f.store.put(data("a"), data("x")).unwrap();
        let mut iter = f.store.iter(current_millis(), true);
        assert_eq!(iter.remaining(), 1);

        f.store.put(data("b"), data("y")).unwrap();
        assert_eq!(iter.by_ref().count(), 1);

        iter.restart();
        assert_eq!(iter.count(), 2);
    }

    #[tokio::test]
    async fn test_iterator_judges_expiry_at_given_time() {
        let f = object_store("m1");
        f.store.put_with_ttl(data("short"), data("x"), 100).unwrap();
        f.store.put(data("forever"), data("y")).unwrap();
        let written = f.store.record(&data("short")).unwrap().update_time;

        let before = f.store.iter(written + 99, true);
        assert_eq!(before.now(), written + 99);
        assert_eq!(before.count(), 2);

        let mut after = f.store.iter(written + 100, true);
        assert_eq!(after.by_ref().count(), 1);
        after.restart();
        assert_eq!(after.count(), 1);

        assert_eq!(f.store.iter(written + 100, false).count(), 2);
    }

    #[tokio::test]
    async fn test_huge_ttl_never_expires() {
        let f = object_store("m2");
        f.store.put_with_ttl(data("local"), data("v"), u64::MAX).unwrap();

        let mut remote = remote_put("remote", "v", clock(&[("m1", 1)]), "m1");
        remote.ttl_millis = 1 << 63;
        assert_eq!(f.store.apply_remote(&remote).unwrap(), ApplyOutcome::Accepted);

        assert_eq!(value_of(&f.store, "local").as_deref(), Some("v"));
        assert_eq!(value_of(&f.store, "remote").as_deref(), Some("v"));
        assert_eq!(f.store.evict_expired(i64::MAX), 0);
        assert_eq!(f.store.size(), 2);
    }

    #[tokio::test]
    async fn test_huge_tombstone_ttl_keeps_tombstones() {
        let f = fixture::<ObjectFormat>(
            "m2",
            ReplicatedMapConfig::new("orders").with_tombstone_ttl_millis(u64::MAX),
        );
        let remove = ReplicationMessage::remove("orders", data("k"), clock(&[("m1", 3)]), MemberId::from("m1"));
        f.store.apply_remote(&remove).unwrap();

        f.store.evict_expired(i64::MAX);
        assert!(f.store.record(&data("k")).unwrap().is_tombstone());

        let late_put = remote_put("k", "v", clock(&[("m1", 2)]), "m1");
        assert_eq!(f.store.apply_remote(&late_put).unwrap(), ApplyOutcome::Stale);
        assert!(value_of(&f.store, "k").is_none());
    }

    #[tokio::test]
    async fn test_exhausted_local_counter_fails_write() {
        let f = object_store("m2");
        let seeded = remote_put("k", "v", clock(&[("m1", 1), ("m2", u64::MAX - 1)]), "m1");
        assert_eq!(f.store.apply_remote(&seeded).unwrap(), ApplyOutcome::Accepted);

        f.store.put(data("k"), data("last")).unwrap();
        assert!(matches!(
            f.store.put(data("k"), data("again")),
            Err(RippleError::ClockOverflow(_))
        ));
        assert!(matches!(
            f.store.remove(&data("k")),
            Err(RippleError::ClockOverflow(_))
        ));
        assert_eq!(value_of(&f.store, "k").as_deref(), Some("last"));
        assert_eq!(
            f.store.record(&data("k")).unwrap().vector_clock.get(&MemberId::from("m2")),
            u64::MAX
        );
    }

    #[tokio::test]
    async fn test_full_event_queue_drops_and_counts() {
        let mut f: Fixture<ObjectFormat> = fixture(
            "m1",
            ReplicatedMapConfig::new("orders").with_event_queue_capacity(1),
        );
        f.store.put(data("a"), data("1")).unwrap();
        f.store.put(data("b"), data("2")).unwrap();

        // Writes are not held back by a slow listener
        assert_eq!(value_of(&f.store, "b").as_deref(), Some("2"));
        assert_eq!(f.store.stats().dropped_events, 1);

        let kept = f.events.recv().await.unwrap();
        assert_eq!(kept.key, data("a"));
        assert!(f.events.try_recv().is_err());

        f.store.put(data("c"), data("3")).unwrap();
        assert_eq!(f.events.recv().await.unwrap().key, data("c"));
        assert_eq!(f.store.stats().dropped_events, 1);
    }

    #[tokio::test]
    async fn test_stats_track_hits() {
        let f = object_store("m1");
        f.store.put(data("k"), data("v")).unwrap();
        f.store.get(&data("k")).unwrap();
        f.store.get(&data("k")).unwrap();

        let stats = f.store.stats();
        assert_eq!(stats.owned_entry_count, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.put_operation_count, 1);
        assert_eq!(stats.get_operation_count, 2);
    }
}
