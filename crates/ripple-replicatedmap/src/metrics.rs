// Metrics for replicated map stores
// Counters and gauges exposed through the `metrics` facade

use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use crate::store::ApplyOutcome;

/// Initialize all metric descriptions
/// Should be called once at application startup
pub fn init_metrics() {
    describe_counter!(
        "replicatedmap_local_operations_total",
        "Total number of local mutations applied to replicated maps"
    );
    describe_counter!(
        "replicatedmap_remote_updates_total",
        "Total number of replicated updates received, by outcome"
    );
    describe_counter!(
        "replicatedmap_messages_published_total",
        "Total number of replication messages broadcast"
    );
    describe_histogram!(
        "replicatedmap_publish_duration_seconds",
        "Time spent broadcasting one replication batch"
    );
    describe_counter!(
        "replicatedmap_inbound_dropped_total",
        "Total number of replication payloads dropped before reaching a store"
    );
    describe_counter!(
        "replicatedmap_events_dropped_total",
        "Total number of entry events dropped because the listener queue was full"
    );
    describe_counter!(
        "replicatedmap_evictions_total",
        "Total number of entries evicted because their TTL elapsed"
    );
    describe_gauge!(
        "replicatedmap_record_stores",
        "Number of replicated map record stores on this member"
    );

    tracing::info!("Replicated map metrics initialized");
}

/// Record a local put or remove
pub fn record_local_operation(map: &str, operation: &'static str) {
    counter!("replicatedmap_local_operations_total", "map" => map.to_string(), "operation" => operation).increment(1);
}

/// Record the outcome of applying a replicated update
pub fn record_remote_update(map: &str, outcome: ApplyOutcome) {
    counter!("replicatedmap_remote_updates_total", "map" => map.to_string(), "outcome" => outcome.as_str()).increment(1);
}

/// Record a broadcast replication batch
pub fn record_published(map: &str, messages: usize, duration_secs: f64) {
    counter!("replicatedmap_messages_published_total", "map" => map.to_string()).increment(messages as u64);
    histogram!("replicatedmap_publish_duration_seconds", "map" => map.to_string()).record(duration_secs);
}

/// Record a payload dropped on the inbound path
pub fn record_inbound_dropped(reason: &'static str) {
    counter!("replicatedmap_inbound_dropped_total", "reason" => reason).increment(1);
}

/// Record an entry event that did not fit in the listener queue
pub fn record_event_dropped(map: &str) {
    counter!("replicatedmap_events_dropped_total", "map" => map.to_string()).increment(1);
}

/// Record entries evicted by TTL
pub fn record_evictions(map: &str, count: usize) {
    counter!("replicatedmap_evictions_total", "map" => map.to_string()).increment(count as u64);
}

/// Update the record store count
pub fn set_record_stores(count: usize) {
    gauge!("replicatedmap_record_stores").set(count as f64);
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
