//! Demo workload
//!
//! Every data member writes random keys of one map at a fixed pace, so
//! replication and conflict resolution can be watched in the logs and the
//! metrics while the node runs.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ripple_common::Result;
use ripple_replicatedmap::{EntryEvent, EntryEventType, EntryListener, ReplicatedMap};

use crate::cluster::EmbeddedCluster;
use crate::startup::ShutdownSignal;

#[derive(Debug, Clone)]
pub struct WorkloadOptions {
    pub map_name: String,
    /// Distinct keys written; fewer keys mean more concurrent writes
    pub key_space: usize,
    pub write_interval: Duration,
    /// Share of writes that remove instead of put, 0.0 to 1.0
    pub remove_ratio: f64,
    /// Share of puts carrying a TTL, 0.0 to 1.0
    pub ttl_ratio: f64,
    pub ttl: Duration,
    /// Entry event kinds written to the log
    pub logged_events: Vec<EntryEventType>,
}

impl Default for WorkloadOptions {
    fn default() -> Self {
        Self {
            map_name: "ripple-demo".to_string(),
            key_space: 16,
            write_interval: Duration::from_millis(250),
            remove_ratio: 0.1,
            ttl_ratio: 0.1,
            ttl: Duration::from_secs(5),
            logged_events: EntryEventType::ALL.to_vec(),
        }
    }
}

/// Logs the selected entry events of the demo map
struct EventLogger {
    kinds: Vec<EntryEventType>,
}

impl EventLogger {
    fn log(&self, event: &EntryEvent) {
        if !self.kinds.contains(&event.event_type) {
            return;
        }
        let key = event.key_as::<String>().unwrap_or_default();
        debug!(
            "{} {} on map {} by {}",
            event.event_type, key, event.name, event.member
        );
    }
}

#[async_trait::async_trait]
impl EntryListener for EventLogger {
    async fn entry_added(&self, event: &EntryEvent) {
        self.log(event);
    }

    async fn entry_updated(&self, event: &EntryEvent) {
        self.log(event);
    }

    async fn entry_removed(&self, event: &EntryEvent) {
        self.log(event);
    }

    async fn entry_evicted(&self, event: &EntryEvent) {
        self.log(event);
    }
}

/// Decode the numeric event type codes given on the command line
pub fn parse_event_codes(codes: &[i32]) -> Result<Vec<EntryEventType>> {
    if codes.is_empty() {
        return Ok(EntryEventType::ALL.to_vec());
    }
    codes.iter().map(|code| EntryEventType::from_code(*code)).collect()
}

/// Start one writer per data member and an event logger on the first one
pub fn spawn(
    cluster: &EmbeddedCluster,
    options: &WorkloadOptions,
    shutdown: &ShutdownSignal,
) -> Result<Vec<JoinHandle<()>>> {
    let maps = cluster.maps(&options.map_name)?;
    if let Some(first) = maps.first()
        && !options.logged_events.is_empty()
    {
        first.add_entry_listener(Arc::new(EventLogger {
            kinds: options.logged_events.clone(),
        }));
    }

    let handles = maps
        .into_iter()
        .map(|map| {
            tokio::spawn(run_writer(map, options.clone(), shutdown.clone()))
        })
        .collect();
    info!(
        "Workload started on map {} ({} keys, one write every {:?} per member)",
        options.map_name, options.key_space, options.write_interval
    );
    Ok(handles)
}

async fn run_writer(map: ReplicatedMap<String, Value>, options: WorkloadOptions, shutdown: ShutdownSignal) {
    let mut rng = StdRng::from_os_rng();
    let mut ticker = tokio::time::interval(options.write_interval);
    let mut sequence = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.wait() => break,
        }
        sequence += 1;

        let key = format!("key-{}", rng.random_range(0..options.key_space.max(1)));
        let result = if rng.random_bool(options.remove_ratio.clamp(0.0, 1.0)) {
            map.remove(&key).map(|_| ())
        } else {
            let value = json!({ "sequence": sequence, "at": ripple_common::current_millis() });
            if rng.random_bool(options.ttl_ratio.clamp(0.0, 1.0)) {
                map.put_with_ttl(&key, &value, options.ttl).map(|_| ())
            } else {
                map.put(&key, &value).map(|_| ())
            }
        };

        if let Err(e) = result {
            warn!("Workload write to map {} stopped: {}", map.name(), e);
            break;
        }
    }
}

/// Log cluster statistics and convergence of the demo map periodically
pub fn spawn_reporter(
    cluster: Arc<EmbeddedCluster>,
    map_name: String,
    period: Duration,
    shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.wait() => break,
            }
            match cluster.converged(&map_name) {
                Ok(converged) => info!("Map {} converged: {}", map_name, converged),
                Err(e) => warn!("Convergence check of map {} failed: {}", map_name, e),
            }
            debug!("Cluster statistics: {}", cluster.report());
        }
    })
}
