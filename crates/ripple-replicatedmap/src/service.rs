//! Replicated map service
//!
//! One service runs per member. It owns the member's record stores, routes
//! replication traffic from the bus to them, dispatches entry events to local
//! listeners, and periodically evicts expired entries.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, trace, warn};

use ripple_common::{
    Configuration, InMemoryFormat, Member, MemberId, ReplicatedMapConfig, Result, RippleError,
    current_millis, is_valid_name,
};

use crate::bus::{EventBus, TopicListener};
use crate::event::{EntryEvent, EntryEventType, EntryListener, EventFilter, ListenerRegistry};
use crate::messages::{REPLICATION_TOPIC, ReplicationPayload, SERVICE_NAME};
use crate::metrics;
use crate::proxy::ReplicatedMap;
use crate::publisher::ReplicationPublisher;
use crate::stats::{LocalReplicatedMapStats, ReplicatedMapStatsCollector};
use crate::store::{BinaryRecordStore, ObjectRecordStore, ReplicatedRecordStore};

const STATE_NEW: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_SHUT_DOWN: u8 = 2;

/// What a member provides to the service
pub struct NodeContext {
    pub local_member: Member,
    pub config: Configuration,
    pub bus: Arc<dyn EventBus>,
}

impl NodeContext {
    pub fn new(local_member: Member, config: Configuration, bus: Arc<dyn EventBus>) -> Self {
        Self {
            local_member,
            config,
            bus,
        }
    }
}

struct RegisteredStore {
    store: Arc<dyn ReplicatedRecordStore>,
    event_task: JoinHandle<()>,
}

impl RegisteredStore {
    fn destroy(self) {
        self.store.destroy();
        self.event_task.abort();
    }
}

struct ServiceInner {
    local_member: Member,
    config: Configuration,
    bus: Arc<dyn EventBus>,
    stores: DashMap<String, RegisteredStore>,
    listeners: ListenerRegistry,
    subscription: Mutex<Option<String>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    state: AtomicU8,
}

/// Per-member replicated map service. Cloning yields another handle to the
/// same service.
#[derive(Clone)]
pub struct ReplicatedMapService {
    inner: Arc<ServiceInner>,
}

impl ReplicatedMapService {
    pub const SERVICE_NAME: &'static str = SERVICE_NAME;

    pub fn new(context: NodeContext) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                local_member: context.local_member,
                config: context.config,
                bus: context.bus,
                stores: DashMap::new(),
                listeners: ListenerRegistry::new(),
                subscription: Mutex::new(None),
                sweeper: Mutex::new(None),
                state: AtomicU8::new(STATE_NEW),
            }),
        }
    }

    /// Subscribe to replication traffic and start the expiration sweep.
    /// Lite members start without either. Must be called from within a Tokio
    /// runtime.
    pub fn start(&self) -> Result<()> {
        match self.inner.state.compare_exchange(
            STATE_NEW,
            STATE_RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(STATE_RUNNING) => return Ok(()),
            Err(_) => return Err(RippleError::ServiceNotRunning),
        }

        if self.is_lite_member() {
            info!(
                "Replicated map service started on lite member {}, no data is held here",
                self.inner.local_member
            );
            return Ok(());
        }

        let listener = Arc::new(ReplicationListener {
            service: Arc::downgrade(&self.inner),
        });
        let registration = self.inner.bus.subscribe(REPLICATION_TOPIC, listener)?;
        *self.inner.subscription.lock() = Some(registration);
        *self.inner.sweeper.lock() = Some(self.spawn_sweeper());

        info!(
            "Replicated map service started on {} (eviction interval {}ms)",
            self.inner.local_member,
            self.inner.config.eviction_interval_millis()
        );
        Ok(())
    }

    /// Stop replication and destroy every record store
    pub fn shutdown(&self) {
        if self.inner.state.swap(STATE_SHUT_DOWN, Ordering::AcqRel) == STATE_SHUT_DOWN {
            return;
        }

        if let Some(registration) = self.inner.subscription.lock().take() {
            self.inner.bus.unsubscribe(REPLICATION_TOPIC, &registration);
        }
        if let Some(sweeper) = self.inner.sweeper.lock().take() {
            sweeper.abort();
        }

        let names: Vec<String> = self.inner.stores.iter().map(|e| e.key().clone()).collect();
        for name in &names {
            if let Some((_, registered)) = self.inner.stores.remove(name) {
                registered.destroy();
            }
            self.inner.listeners.deregister_all(name);
        }
        metrics::set_record_stores(0);
        info!(
            "Replicated map service stopped on {}, {} stores destroyed",
            self.inner.local_member,
            names.len()
        );
    }

    /// Part of the node service lifecycle; replicated maps keep their state
    /// across a reset
    pub fn reset(&self) {
        debug!("Reset of replicated map service on {} ignored", self.inner.local_member);
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == STATE_RUNNING
    }

    pub fn local_member(&self) -> &Member {
        &self.inner.local_member
    }

    pub fn is_lite_member(&self) -> bool {
        self.inner.local_member.lite
    }

    pub fn replicated_map_config(&self, name: &str) -> Result<ReplicatedMapConfig> {
        self.inner.config.replicated_map_config(name)
    }

    fn ensure_data_member(&self, name: &str) -> Result<()> {
        if self.is_lite_member() {
            return Err(RippleError::LiteMemberRestriction {
                map: name.to_string(),
                member: self.inner.local_member.id.to_string(),
            });
        }
        Ok(())
    }

    /// Record store of a map, constructed on first use
    pub fn get_or_create_record_store(&self, name: &str) -> Result<Arc<dyn ReplicatedRecordStore>> {
        self.ensure_data_member(name)?;
        if self.inner.state.load(Ordering::Acquire) == STATE_SHUT_DOWN {
            return Err(RippleError::ServiceNotRunning);
        }
        if let Some(registered) = self.inner.stores.get(name) {
            return Ok(registered.store.clone());
        }

        let store = self
            .inner
            .stores
            .entry(name.to_string())
            .or_try_insert_with(|| self.construct_store(name))?
            .store
            .clone();
        metrics::set_record_stores(self.inner.stores.len());
        Ok(store)
    }

    /// Record store of a map if it exists
    pub fn get_record_store(&self, name: &str) -> Result<Option<Arc<dyn ReplicatedRecordStore>>> {
        self.ensure_data_member(name)?;
        Ok(self.inner.stores.get(name).map(|r| r.store.clone()))
    }

    pub fn record_store_count(&self) -> usize {
        self.inner.stores.len()
    }

    fn construct_store(&self, name: &str) -> Result<RegisteredStore> {
        if !is_valid_name(name) {
            return Err(RippleError::IllegalArgument(format!(
                "invalid replicated map name '{}'",
                name
            )));
        }
        let config = self.replicated_map_config(name)?;
        let format = config.in_memory_format;
        if format == InMemoryFormat::Native {
            return Err(RippleError::UnsupportedInMemoryFormat(format.to_string()));
        }

        let local_id = self.inner.local_member.id.clone();
        let stats = Arc::new(ReplicatedMapStatsCollector::new(config.statistics_enabled));
        let publisher = Arc::new(ReplicationPublisher::new(
            &config,
            local_id.clone(),
            self.inner.bus.clone(),
            stats.clone(),
        ));
        let (events_tx, events_rx) = mpsc::channel(config.event_queue_capacity.max(1));

        let store: Arc<dyn ReplicatedRecordStore> = match format {
            InMemoryFormat::Binary => Arc::new(BinaryRecordStore::new(
                config,
                local_id,
                publisher.clone(),
                events_tx,
                stats,
            )),
            _ => Arc::new(ObjectRecordStore::new(
                config,
                local_id,
                publisher.clone(),
                events_tx,
                stats,
            )),
        };
        publisher.start(Arc::downgrade(&store));
        let event_task = tokio::spawn(run_event_dispatcher(
            Arc::downgrade(&self.inner),
            events_rx,
        ));

        info!(
            "Created record store for replicated map {} on {} ({})",
            name, self.inner.local_member, format
        );
        Ok(RegisteredStore { store, event_task })
    }

    /// Typed handle to a replicated map, creating its store on first use
    pub fn create_distributed_object<K, V>(&self, name: &str) -> Result<ReplicatedMap<K, V>> {
        let store = self.get_or_create_record_store(name)?;
        Ok(ReplicatedMap::new(store, self.clone()))
    }

    /// Destroy the local store of a map and drop its listeners
    pub fn destroy_distributed_object(&self, name: &str) {
        if let Some((_, registered)) = self.inner.stores.remove(name) {
            registered.destroy();
            metrics::set_record_stores(self.inner.stores.len());
        }
        self.inner.listeners.deregister_all(name);
    }

    /// Register a local entry listener, returning its registration id
    pub fn add_event_listener(
        &self,
        name: &str,
        listener: Arc<dyn EntryListener>,
        filter: EventFilter,
    ) -> String {
        self.inner.listeners.register(name, filter, listener)
    }

    pub fn remove_event_listener(&self, name: &str, registration_id: &str) -> bool {
        self.inner.listeners.deregister(name, registration_id)
    }

    /// Deliver one event to one listener
    pub async fn dispatch_event(&self, event: &EntryEvent, listener: &dyn EntryListener) {
        self.inner.dispatch_event(event, listener).await;
    }

    /// Statistics of every local store, keyed by map name
    pub fn get_stats(&self) -> HashMap<String, LocalReplicatedMapStats> {
        self.inner
            .stores
            .iter()
            .map(|e| (e.key().clone(), e.store.stats()))
            .collect()
    }

    /// Run one expiration sweep over every store now
    pub fn evict_expired(&self) -> usize {
        self.inner.evict_expired(current_millis())
    }

    /// Listener that feeds replication traffic into this service
    pub fn replication_listener(&self) -> Arc<ReplicationListener> {
        Arc::new(ReplicationListener {
            service: Arc::downgrade(&self.inner),
        })
    }

    /// Broadcast every buffered local mutation of every store now
    pub async fn flush_replication(&self) {
        for store in self.inner.store_snapshot() {
            store.publisher().flush().await;
        }
    }

    /// Wait until every queued replicated update has been applied
    pub async fn sync_replication(&self) {
        for store in self.inner.store_snapshot() {
            store.publisher().sync().await;
        }
    }

    fn spawn_sweeper(&self) -> JoinHandle<()> {
        let service = Arc::downgrade(&self.inner);
        let period = Duration::from_millis(self.inner.config.eviction_interval_millis());
        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                let Some(inner) = service.upgrade() else {
                    break;
                };
                inner.evict_expired(current_millis());
            }
        })
    }
}

impl ServiceInner {
    fn store_snapshot(&self) -> Vec<Arc<dyn ReplicatedRecordStore>> {
        self.stores.iter().map(|e| e.store.clone()).collect()
    }

    fn store(&self, name: &str) -> Option<Arc<dyn ReplicatedRecordStore>> {
        self.stores.get(name).map(|e| e.store.clone())
    }

    fn evict_expired(&self, now: i64) -> usize {
        self.store_snapshot()
            .iter()
            .map(|store| store.evict_expired(now))
            .sum()
    }

    async fn dispatch_event(&self, event: &EntryEvent, listener: &dyn EntryListener) {
        if self.local_member.lite {
            warn!(
                "Lite member {} got a {} event for map {}, discarding",
                self.local_member.id, event.event_type, event.name
            );
            return;
        }
        if let Some(store) = self.store(&event.name) {
            store.record_received_event();
        }

        let delivery = async {
            match event.event_type {
                EntryEventType::Added => listener.entry_added(event).await,
                EntryEventType::Updated => listener.entry_updated(event).await,
                EntryEventType::Removed => listener.entry_removed(event).await,
                EntryEventType::Evicted => listener.entry_evicted(event).await,
            }
        };
        if AssertUnwindSafe(delivery).catch_unwind().await.is_err() {
            error!(
                "Entry listener panicked on {} event of map {}",
                event.event_type, event.name
            );
        }
    }

    async fn handle_replication(&self, origin: &MemberId, payload: &[u8]) {
        if self.local_member.lite {
            trace!("Lite member ignores replication traffic from {}", origin);
            metrics::record_inbound_dropped("lite_member");
            return;
        }
        if origin == &self.local_member.id {
            trace!("Ignoring own replication payload");
            metrics::record_inbound_dropped("loopback");
            return;
        }

        let payload = match ReplicationPayload::decode(payload) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Dropping replication payload from {}: {}", origin, e);
                metrics::record_inbound_dropped("malformed");
                return;
            }
        };
        if let Some(claimed) = payload.origins().find(|claimed| *claimed != origin) {
            warn!(
                "Dropping replication payload from {} carrying updates of {}",
                origin, claimed
            );
            metrics::record_inbound_dropped("origin_mismatch");
            return;
        }
        let Some(store) = self.store(payload.name()) else {
            warn!(
                "Dropping replication payload from {} for unknown map {}",
                origin,
                payload.name()
            );
            metrics::record_inbound_dropped("unknown_map");
            return;
        };

        let publisher = store.publisher();
        match payload {
            ReplicationPayload::Single(message) => publisher.queue_update_message(message).await,
            ReplicationPayload::Multi(batch) => publisher.queue_update_messages(batch).await,
        }
    }
}

async fn run_event_dispatcher(
    service: Weak<ServiceInner>,
    mut events: mpsc::Receiver<EntryEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = service.upgrade() else {
            break;
        };
        for listener in inner.listeners.matching(&event) {
            inner.dispatch_event(&event, listener.as_ref()).await;
        }
    }
}

/// Receives replication payloads from the bus on behalf of a service
pub struct ReplicationListener {
    service: Weak<ServiceInner>,
}

#[async_trait::async_trait]
impl TopicListener for ReplicationListener {
    async fn on_message(&self, origin: &MemberId, payload: Bytes) {
        let Some(inner) = self.service.upgrade() else {
            return;
        };
        inner.handle_replication(origin, &payload).await;
    }
}
