//! Common test utilities for replicated map integration tests
//!
//! - TestCluster: several members sharing one in-process bus
//! - RecordingListener: entry listener that keeps every event it receives

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use ripple_common::{Configuration, Member};
use ripple_replicatedmap::{
    EntryEvent, EntryEventType, EntryListener, InProcessBus, NodeContext, ReplicatedMapService,
};

/// Members of one cluster, all connected to the same bus
pub struct TestCluster {
    pub bus: Arc<InProcessBus>,
    pub members: Vec<ReplicatedMapService>,
}

impl TestCluster {
    /// Start one data member per id with default configuration
    pub fn start(ids: &[&str]) -> Self {
        Self::start_with(ids, Configuration::default())
    }

    pub fn start_with(ids: &[&str], config: Configuration) -> Self {
        let mut cluster = Self {
            bus: InProcessBus::new(),
            members: Vec::new(),
        };
        for id in ids {
            cluster.join(id, config.clone(), false);
        }
        cluster
    }

    /// Start another member and return its index
    pub fn join(&mut self, id: &str, config: Configuration, lite: bool) -> usize {
        let member = Member::new(id, "127.0.0.1").lite(lite);
        let endpoint = self.bus.endpoint(member.id.clone());
        let service = ReplicatedMapService::new(NodeContext::new(member, config, endpoint));
        service.start().unwrap();
        self.members.push(service);
        self.members.len() - 1
    }

    pub fn member(&self, index: usize) -> &ReplicatedMapService {
        &self.members[index]
    }

    /// Broadcast everything buffered on every member, then wait until every
    /// member applied what it received
    pub async fn settle(&self) {
        for member in &self.members {
            member.flush_replication().await;
        }
        for member in &self.members {
            member.sync_replication().await;
        }
    }

    pub fn shutdown(&self) {
        for member in &self.members {
            member.shutdown();
        }
    }
}

/// Entry listener that records every event
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<EntryEvent>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<EntryEvent> {
        self.events.lock().clone()
    }

    pub fn event_types(&self) -> Vec<EntryEventType> {
        self.events.lock().iter().map(|e| e.event_type).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Wait until at least `count` events arrived
    pub async fn wait_for(&self, count: usize) {
        wait_until(|| self.len() >= count).await;
    }

    fn record(&self, event: &EntryEvent) {
        self.events.lock().push(event.clone());
    }
}

#[async_trait::async_trait]
impl EntryListener for RecordingListener {
    async fn entry_added(&self, event: &EntryEvent) {
        self.record(event);
    }

    async fn entry_updated(&self, event: &EntryEvent) {
        self.record(event);
    }

    async fn entry_removed(&self, event: &EntryEvent) {
        self.record(event);
    }

    async fn entry_evicted(&self, event: &EntryEvent) {
        self.record(event);
    }
}

/// Poll a condition until it holds, failing after five seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met within 5s");
}
