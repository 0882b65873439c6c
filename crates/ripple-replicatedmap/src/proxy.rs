use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use ripple_common::{Result, RippleError, current_millis};

use crate::event::{EntryListener, EventFilter};
use crate::record::{Data, StoredValue};
use crate::service::ReplicatedMapService;
use crate::stats::LocalReplicatedMapStats;
use crate::store::ReplicatedRecordStore;

/// Typed handle to one replicated map on this member.
///
/// Reads are served from the local store. Writes apply locally and are
/// replicated to the other members asynchronously.
pub struct ReplicatedMap<K, V> {
    store: Arc<dyn ReplicatedRecordStore>,
    service: ReplicatedMapService,
    _types: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Clone for ReplicatedMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            service: self.service.clone(),
            _types: PhantomData,
        }
    }
}

impl<K, V> ReplicatedMap<K, V> {
    pub(crate) fn new(store: Arc<dyn ReplicatedRecordStore>, service: ReplicatedMapService) -> Self {
        Self {
            store,
            service,
            _types: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        self.store.name()
    }

    pub fn size(&self) -> usize {
        self.store.size()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Register a listener for every entry of this map
    pub fn add_entry_listener(&self, listener: Arc<dyn EntryListener>) -> String {
        self.service
            .add_event_listener(self.name(), listener, EventFilter::All)
    }

    pub fn remove_entry_listener(&self, registration_id: &str) -> bool {
        self.service.remove_event_listener(self.name(), registration_id)
    }

    pub fn local_stats(&self) -> LocalReplicatedMapStats {
        self.store.stats()
    }

    /// Destroy this map's store on the local member
    pub fn destroy(&self) {
        self.service.destroy_distributed_object(self.name());
    }

    pub fn is_destroyed(&self) -> bool {
        self.store.is_destroyed()
    }

    fn ensure_active(&self) -> Result<()> {
        if self.store.is_destroyed() {
            return Err(RippleError::StoreDestroyed(self.name().to_string()));
        }
        Ok(())
    }
}

impl<K, V> ReplicatedMap<K, V>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    pub fn put(&self, key: &K, value: &V) -> Result<Option<V>> {
        let old = self.store.put(Data::serialize(key)?, Data::serialize(value)?)?;
        decode(old)
    }

    /// Store a value that expires after `ttl`; a zero duration never expires
    pub fn put_with_ttl(&self, key: &K, value: &V, ttl: Duration) -> Result<Option<V>> {
        let ttl_millis = match ttl.as_millis() {
            0 if ttl.is_zero() => 0,
            0 => 1,
            millis => u64::try_from(millis).unwrap_or(u64::MAX),
        };
        let old = self.store.put_with_ttl(
            Data::serialize(key)?,
            Data::serialize(value)?,
            ttl_millis,
        )?;
        decode(old)
    }

    pub fn get(&self, key: &K) -> Result<Option<V>> {
        decode(self.store.get(&Data::serialize(key)?)?)
    }

    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        decode(self.store.remove(&Data::serialize(key)?)?)
    }

    pub fn contains_key(&self, key: &K) -> Result<bool> {
        self.store.contains_key(&Data::serialize(key)?)
    }

    pub fn contains_value(&self, value: &V) -> Result<bool> {
        self.store.contains_value(&Data::serialize(value)?)
    }

    /// Remove every entry; each removal is replicated
    pub fn clear(&self) -> Result<()> {
        self.store.clear()?;
        Ok(())
    }

    pub fn keys(&self) -> Result<Vec<K>> {
        self.ensure_active()?;
        self.store
            .iter(current_millis(), true)
            .map(|record| record.key.deserialize())
            .collect()
    }

    pub fn values(&self) -> Result<Vec<V>> {
        self.ensure_active()?;
        self.store
            .iter(current_millis(), true)
            .filter_map(|record| record.value)
            .map(|value| value.deserialize())
            .collect()
    }

    pub fn entries(&self) -> Result<Vec<(K, V)>> {
        self.ensure_active()?;
        self.store
            .iter(current_millis(), true)
            .filter_map(|record| record.value.map(|value| (record.key, value)))
            .map(|(key, value)| Ok((key.deserialize()?, value.deserialize()?)))
            .collect()
    }

    /// Register a listener for one key of this map
    pub fn add_entry_listener_for_key(
        &self,
        listener: Arc<dyn EntryListener>,
        key: &K,
    ) -> Result<String> {
        let filter = EventFilter::Key(Data::serialize(key)?);
        Ok(self.service.add_event_listener(self.name(), listener, filter))
    }
}

fn decode<T: DeserializeOwned>(value: Option<StoredValue>) -> Result<Option<T>> {
    value.map(|v| v.deserialize()).transpose()
}
