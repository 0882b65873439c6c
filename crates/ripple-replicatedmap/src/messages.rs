//! Replication wire messages
//!
//! Payloads on the replication topic are a one-byte format version followed by
//! a bincode-encoded [`ReplicationPayload`].

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use ripple_common::{MemberId, Result, RippleError};

use crate::record::{Data, WriteStamp};
use crate::vector_clock::VectorClock;

/// Internal name of the replicated map service
pub const SERVICE_NAME: &str = "ripple:impl:replicatedMapService";

/// Topic that carries replication traffic for every replicated map
pub const REPLICATION_TOPIC: &str = "ripple:impl:replicatedMapService.replication";

/// Current payload format version
pub const WIRE_VERSION: u8 = 1;

/// Kind of mutation carried by a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationOperation {
    Put,
    Remove,
}

/// One replicated mutation of one key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationMessage {
    pub name: String,
    pub key: Data,
    pub value: Option<Data>,
    pub vector_clock: VectorClock,
    pub origin: MemberId,
    pub operation: ReplicationOperation,
    /// Time-to-live in milliseconds, 0 means no expiry
    pub ttl_millis: u64,
}

impl ReplicationMessage {
    pub fn put(
        name: impl Into<String>,
        key: Data,
        value: Data,
        vector_clock: VectorClock,
        origin: MemberId,
        ttl_millis: u64,
    ) -> Self {
        Self {
            name: name.into(),
            key,
            value: Some(value),
            vector_clock,
            origin,
            operation: ReplicationOperation::Put,
            ttl_millis,
        }
    }

    pub fn remove(
        name: impl Into<String>,
        key: Data,
        vector_clock: VectorClock,
        origin: MemberId,
    ) -> Self {
        Self {
            name: name.into(),
            key,
            value: None,
            vector_clock,
            origin,
            operation: ReplicationOperation::Remove,
            ttl_millis: 0,
        }
    }

    pub fn is_remove(&self) -> bool {
        self.operation == ReplicationOperation::Remove
    }

    /// Tie-break identity of the carried write
    pub fn stamp(&self) -> WriteStamp {
        WriteStamp::of(&self.origin, &self.vector_clock)
    }

    /// Check the invariants a sender must uphold
    pub fn validate(&self) -> Result<()> {
        match (self.operation, &self.value) {
            (ReplicationOperation::Put, None) => {
                return Err(malformed(format!(
                    "put for map '{}' carries no value",
                    self.name
                )));
            }
            (ReplicationOperation::Remove, Some(_)) => {
                return Err(malformed(format!(
                    "remove for map '{}' carries a value",
                    self.name
                )));
            }
            _ => {}
        }
        if self.vector_clock.get(&self.origin) == 0 {
            return Err(malformed(format!(
                "clock {} has no counter for origin {}",
                self.vector_clock, self.origin
            )));
        }
        if self.vector_clock.checked_logical_time().is_none() {
            return Err(malformed(format!(
                "counters of clock {} overflow their sum",
                self.vector_clock
            )));
        }
        Ok(())
    }
}

/// Several mutations of one map sent as one payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiReplicationMessage {
    pub name: String,
    pub messages: Vec<ReplicationMessage>,
}

impl MultiReplicationMessage {
    pub fn new(name: impl Into<String>, messages: Vec<ReplicationMessage>) -> Self {
        Self {
            name: name.into(),
            messages,
        }
    }
}

/// Everything that travels on the replication topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReplicationPayload {
    Single(ReplicationMessage),
    Multi(MultiReplicationMessage),
}

impl ReplicationPayload {
    /// Map the payload belongs to
    pub fn name(&self) -> &str {
        match self {
            ReplicationPayload::Single(message) => &message.name,
            ReplicationPayload::Multi(multi) => &multi.name,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ReplicationPayload::Single(_) => 1,
            ReplicationPayload::Multi(multi) => multi.messages.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Origin members named by the carried messages
    pub fn origins(&self) -> impl Iterator<Item = &MemberId> {
        let messages: &[ReplicationMessage] = match self {
            ReplicationPayload::Single(message) => std::slice::from_ref(message),
            ReplicationPayload::Multi(multi) => &multi.messages,
        };
        messages.iter().map(|m| &m.origin)
    }

    /// Build the smallest payload for a batch of one map's messages
    pub fn from_batch(name: &str, mut batch: Vec<ReplicationMessage>) -> Option<Self> {
        match batch.len() {
            0 => None,
            1 => batch.pop().map(ReplicationPayload::Single),
            _ => Some(ReplicationPayload::Multi(MultiReplicationMessage::new(
                name, batch,
            ))),
        }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let body = bincode::serialize(self)
            .map_err(|e| RippleError::Serialization(format!("encode replication payload: {}", e)))?;
        let mut buf = BytesMut::with_capacity(body.len() + 1);
        buf.put_u8(WIRE_VERSION);
        buf.put_slice(&body);
        Ok(buf.freeze())
    }

    /// Decode and validate a payload received from the bus
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (version, body) = bytes
            .split_first()
            .ok_or_else(|| malformed("empty payload"))?;
        if *version != WIRE_VERSION {
            return Err(malformed(format!("unknown wire version {}", version)));
        }
        let payload: ReplicationPayload =
            bincode::deserialize(body).map_err(|e| malformed(e.to_string()))?;
        payload.validate()?;
        Ok(payload)
    }

    fn validate(&self) -> Result<()> {
        match self {
            ReplicationPayload::Single(message) => message.validate(),
            ReplicationPayload::Multi(multi) => {
                for message in &multi.messages {
                    if message.name != multi.name {
                        return Err(malformed(format!(
                            "batch for map '{}' contains a message for '{}'",
                            multi.name, message.name
                        )));
                    }
                    message.validate()?;
                }
                Ok(())
            }
        }
    }
}

fn malformed(reason: impl Into<String>) -> RippleError {
    RippleError::MalformedReplicationMessage(reason.into())
}
