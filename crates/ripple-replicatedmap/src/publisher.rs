//! Replication pipeline of one record store
//!
//! Outbound, local mutations are buffered and broadcast on the replication
//! topic after the configured delay, or as soon as a full batch is waiting.
//! Inbound, replicated updates are queued in arrival order and applied to the
//! store by a single consumer task.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use ripple_common::{MemberId, ReplicatedMapConfig};

use crate::bus::EventBus;
use crate::messages::{
    MultiReplicationMessage, REPLICATION_TOPIC, ReplicationMessage, ReplicationPayload,
};
use crate::metrics::{self, Timer};
use crate::stats::ReplicatedMapStatsCollector;
use crate::store::ReplicatedRecordStore;

#[derive(Default)]
struct Outbound {
    messages: Vec<ReplicationMessage>,
    waiters: Vec<oneshot::Sender<()>>,
}

enum InboundCommand {
    Apply(ReplicationMessage),
    Barrier(oneshot::Sender<()>),
}

pub struct ReplicationPublisher {
    name: String,
    local_member: MemberId,
    bus: Arc<dyn EventBus>,
    replication_delay: Duration,
    max_batch_size: usize,
    outbound: Mutex<Outbound>,
    outbound_ready: Notify,
    flush_now: Notify,
    inbound_tx: mpsc::Sender<InboundCommand>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundCommand>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    shut_down: AtomicBool,
    stats: Arc<ReplicatedMapStatsCollector>,
}

impl ReplicationPublisher {
    pub fn new(
        config: &ReplicatedMapConfig,
        local_member: MemberId,
        bus: Arc<dyn EventBus>,
        stats: Arc<ReplicatedMapStatsCollector>,
    ) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_queue_capacity.max(1));
        Self {
            name: config.name.clone(),
            local_member,
            bus,
            replication_delay: Duration::from_millis(config.replication_delay_millis),
            max_batch_size: config.max_batch_size.max(1),
            outbound: Mutex::new(Outbound::default()),
            outbound_ready: Notify::new(),
            flush_now: Notify::new(),
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            stats,
        }
    }

    /// Spawn the outbound flush task and the inbound consumer for `store`.
    /// Must be called from within a Tokio runtime.
    pub fn start(self: &Arc<Self>, store: Weak<dyn ReplicatedRecordStore>) {
        let Some(inbound_rx) = self.inbound_rx.lock().take() else {
            warn!("Replication publisher for map {} already started", self.name);
            return;
        };

        let outbound = tokio::spawn(self.clone().run_outbound());
        let inbound = tokio::spawn(run_inbound(self.name.clone(), inbound_rx, store));
        self.tasks.lock().extend([outbound, inbound]);
        self.started.store(true, Ordering::Release);
        debug!(
            "Started replication for map {} on member {} (delay {:?}, batch {})",
            self.name, self.local_member, self.replication_delay, self.max_batch_size
        );
    }

    /// Buffer a local mutation for broadcast
    pub fn publish(&self, message: ReplicationMessage) {
        if self.shut_down.load(Ordering::Acquire) {
            trace!("Replication for map {} is shut down, dropping message", self.name);
            return;
        }
        let buffered = {
            let mut outbound = self.outbound.lock();
            outbound.messages.push(message);
            outbound.messages.len()
        };
        self.outbound_ready.notify_one();
        if buffered >= self.max_batch_size {
            self.flush_now.notify_one();
        }
    }

    /// Messages waiting for the next broadcast
    pub fn pending(&self) -> usize {
        self.outbound.lock().messages.len()
    }

    /// Broadcast everything buffered so far and wait until it has been handed
    /// to the bus
    pub async fn flush(&self) {
        if !self.started.load(Ordering::Acquire) {
            return;
        }
        let (done_tx, done_rx) = oneshot::channel();
        {
            let mut outbound = self.outbound.lock();
            if self.shut_down.load(Ordering::Acquire) {
                return;
            }
            outbound.waiters.push(done_tx);
        }
        self.outbound_ready.notify_one();
        self.flush_now.notify_one();
        let _ = done_rx.await;
    }

    /// Queue a replicated update for the store. Waits while the inbound queue
    /// is full.
    pub async fn queue_update_message(&self, message: ReplicationMessage) {
        if self
            .inbound_tx
            .send(InboundCommand::Apply(message))
            .await
            .is_err()
        {
            debug!("Inbound queue of map {} is closed, dropping update", self.name);
            metrics::record_inbound_dropped("closed");
        }
    }

    /// Queue every update of a batch, preserving its order
    pub async fn queue_update_messages(&self, batch: MultiReplicationMessage) {
        for message in batch.messages {
            self.queue_update_message(message).await;
        }
    }

    /// Wait until every update queued so far has been applied
    pub async fn sync(&self) {
        if !self.started.load(Ordering::Acquire) {
            return;
        }
        let (done_tx, done_rx) = oneshot::channel();
        if self
            .inbound_tx
            .send(InboundCommand::Barrier(done_tx))
            .await
            .is_ok()
        {
            let _ = done_rx.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.shut_down.load(Ordering::Acquire)
    }

    /// Stop both tasks and drop anything not yet broadcast
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        let dropped = {
            let mut outbound = self.outbound.lock();
            outbound.waiters.clear();
            std::mem::take(&mut outbound.messages).len()
        };
        debug!(
            "Stopped replication for map {}, {} unsent messages dropped",
            self.name, dropped
        );
    }

    fn flush_due(&self) -> bool {
        let outbound = self.outbound.lock();
        outbound.messages.len() >= self.max_batch_size || !outbound.waiters.is_empty()
    }

    async fn run_outbound(self: Arc<Self>) {
        loop {
            self.outbound_ready.notified().await;

            if !self.replication_delay.is_zero() && !self.flush_due() {
                tokio::select! {
                    _ = tokio::time::sleep(self.replication_delay) => {}
                    _ = self.flush_now.notified() => {}
                }
            }

            let (messages, waiters) = {
                let mut outbound = self.outbound.lock();
                (
                    std::mem::take(&mut outbound.messages),
                    std::mem::take(&mut outbound.waiters),
                )
            };
            self.broadcast(messages).await;
            for waiter in waiters {
                let _ = waiter.send(());
            }
        }
    }

    async fn broadcast(&self, messages: Vec<ReplicationMessage>) {
        let mut messages = messages.into_iter().peekable();
        while messages.peek().is_some() {
            let batch: Vec<_> = messages.by_ref().take(self.max_batch_size).collect();
            let count = batch.len();
            let Some(payload) = ReplicationPayload::from_batch(&self.name, batch) else {
                continue;
            };
            let encoded = match payload.encode() {
                Ok(encoded) => encoded,
                Err(e) => {
                    error!("Failed to encode replication batch for map {}: {}", self.name, e);
                    continue;
                }
            };

            let timer = Timer::new();
            match self.bus.broadcast(REPLICATION_TOPIC, encoded).await {
                Ok(()) => {
                    self.stats.add_messages_sent(count as u64);
                    metrics::record_published(&self.name, count, timer.elapsed_secs());
                    trace!("Broadcast {} replication messages for map {}", count, self.name);
                }
                Err(e) => {
                    warn!(
                        "Failed to broadcast {} replication messages for map {}: {}",
                        count, self.name, e
                    );
                }
            }
        }
    }
}

async fn run_inbound(
    name: String,
    mut inbound_rx: mpsc::Receiver<InboundCommand>,
    store: Weak<dyn ReplicatedRecordStore>,
) {
    while let Some(command) = inbound_rx.recv().await {
        match command {
            InboundCommand::Apply(message) => {
                let Some(store) = store.upgrade() else {
                    debug!("Record store of map {} is gone, stopping inbound replication", name);
                    break;
                };
                let applied = panic::catch_unwind(AssertUnwindSafe(|| store.apply_remote(&message)));
                match applied {
                    Ok(Ok(outcome)) => trace!(
                        "Replicated update of {:?} in map {} from {}: {}",
                        message.key,
                        name,
                        message.origin,
                        outcome.as_str()
                    ),
                    Ok(Err(e)) => {
                        warn!(
                            "Dropping replicated update for map {} from {}: {}",
                            name, message.origin, e
                        );
                        let reason = if e.is_replication_error() {
                            "rejected"
                        } else {
                            "store_unavailable"
                        };
                        metrics::record_inbound_dropped(reason);
                    }
                    Err(_) => {
                        error!(
                            "Applying replicated update for map {} from {} panicked, dropping it",
                            name, message.origin
                        );
                        metrics::record_inbound_dropped("panicked");
                    }
                }
            }
            InboundCommand::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
}
