//! Ripple replicated map
//!
//! A replicated map keeps a full copy of its entries on every data-holding
//! member. Any member accepts writes; each write is applied locally, stamped
//! with a per-entry vector clock, and broadcast to the other members, which
//! apply it, reject it as stale, or resolve it as a concurrent write.

pub mod bus;
pub mod event;
pub mod messages;
pub mod metrics;
pub mod proxy;
pub mod publisher;
pub mod record;
pub mod service;
pub mod stats;
pub mod store;
pub mod vector_clock;

pub use bus::{EventBus, InProcessBus, InProcessEndpoint, TopicListener};
pub use event::{EntryEvent, EntryEventType, EntryListener, EventFilter};
pub use messages::{MultiReplicationMessage, ReplicationMessage, ReplicationPayload};
pub use proxy::ReplicatedMap;
pub use record::{Data, ReplicatedRecord, StoredValue, WriteStamp};
pub use service::{NodeContext, ReplicatedMapService, ReplicationListener};
pub use stats::LocalReplicatedMapStats;
pub use store::{ApplyOutcome, RecordIterator, ReplicatedRecordStore};
pub use vector_clock::{CausalOrdering, VectorClock};
