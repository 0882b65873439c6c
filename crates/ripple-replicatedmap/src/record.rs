//! Replicated records and the value representations they hold

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use ripple_common::{MemberId, Result, RippleError};

use crate::vector_clock::VectorClock;

/// Serialized key or value token
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Data(Bytes);

impl Data {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Serialize a value with `serde_json`
    pub fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Self(Bytes::from(serde_json::to_vec(value)?)))
    }

    /// Deserialize the token with `serde_json`
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.0)?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(text) => write!(f, "Data({})", text),
            Err(_) => write!(f, "Data({} bytes)", self.0.len()),
        }
    }
}

impl From<&str> for Data {
    fn from(value: &str) -> Self {
        Self(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<Vec<u8>> for Data {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}

/// A value as kept by a record store
#[derive(Clone, Debug)]
pub enum StoredValue {
    /// Serialized form, used by the binary in-memory format
    Binary(Data),
    /// Deserialized form, used by the object in-memory format
    Object(Arc<serde_json::Value>),
}

impl StoredValue {
    /// Serialized form of the value, as sent on the wire
    pub fn to_data(&self) -> Result<Data> {
        match self {
            StoredValue::Binary(data) => Ok(data.clone()),
            StoredValue::Object(value) => Data::serialize(value.as_ref()),
        }
    }

    /// Deserialize into a caller type
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            StoredValue::Binary(data) => data.deserialize(),
            StoredValue::Object(value) => {
                T::deserialize(value.as_ref()).map_err(RippleError::from)
            }
        }
    }

    /// Equality by content, independent of the representation
    pub fn same_content(&self, other: &StoredValue) -> bool {
        match (self, other) {
            (StoredValue::Binary(a), StoredValue::Binary(b)) => a == b,
            (StoredValue::Object(a), StoredValue::Object(b)) => a == b,
            (a, b) => match (a.to_data(), b.to_data()) {
                (Ok(a), Ok(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl PartialEq for StoredValue {
    fn eq(&self, other: &Self) -> bool {
        self.same_content(other)
    }
}

/// Identity of the write that produced a record's current value.
///
/// Ordered by the logical time of the write's clock, then by origin member,
/// then by the origin's own counter. A write always has a greater stamp than
/// any write it causally follows, and every member derives the same stamp
/// for the same write, which makes it the input of the concurrent-write
/// tie-break.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WriteStamp {
    pub logical_time: u64,
    pub origin: MemberId,
    pub sequence: u64,
}

impl WriteStamp {
    /// Stamp of a write by `origin` that produced `clock`
    pub fn of(origin: &MemberId, clock: &VectorClock) -> Self {
        Self {
            logical_time: clock.logical_time(),
            origin: origin.clone(),
            sequence: clock.get(origin),
        }
    }
}

impl fmt::Display for WriteStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.origin, self.sequence, self.logical_time)
    }
}

/// Whether `millis` have passed between `since` and `now`. The age is
/// compared as `u64`, so durations above `i64::MAX` never elapse and a clock
/// running backwards yields no age.
pub fn has_elapsed(since: i64, now: i64, millis: u64) -> bool {
    u64::try_from(now.saturating_sub(since)).is_ok_and(|age| age >= millis)
}

/// A key with its value, clock, and access statistics.
///
/// A record without a value is a tombstone: it keeps the clock of a removed
/// or evicted key so that older writes replayed later are still rejected.
#[derive(Clone, Debug)]
pub struct ReplicatedRecord {
    pub key: Data,
    pub value: Option<StoredValue>,
    pub vector_clock: VectorClock,
    pub stamp: WriteStamp,
    /// Time-to-live in milliseconds, 0 means no expiry
    pub ttl_millis: u64,
    pub hits: u64,
    pub creation_time: i64,
    pub update_time: i64,
    pub last_access_time: i64,
}

impl ReplicatedRecord {
    pub fn new(
        key: Data,
        value: Option<StoredValue>,
        vector_clock: VectorClock,
        stamp: WriteStamp,
        ttl_millis: u64,
        now: i64,
    ) -> Self {
        Self {
            key,
            value,
            vector_clock,
            stamp,
            ttl_millis,
            hits: 0,
            creation_time: now,
            update_time: now,
            last_access_time: now,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Whether the TTL of a live record has elapsed at `now`
    pub fn is_expired(&self, now: i64) -> bool {
        self.value.is_some() && self.ttl_millis > 0 && has_elapsed(self.update_time, now, self.ttl_millis)
    }

    /// Whether a tombstone is older than `tombstone_ttl_millis` at `now`
    pub fn is_purgeable(&self, now: i64, tombstone_ttl_millis: u64) -> bool {
        self.is_tombstone() && has_elapsed(self.update_time, now, tombstone_ttl_millis)
    }

    /// Whether the record holds a value that has not expired at `now`
    pub fn is_live(&self, now: i64) -> bool {
        self.value.is_some() && !self.is_expired(now)
    }

    /// Replace the value, clock, and write stamp, returning the previous value
    pub fn update(
        &mut self,
        value: Option<StoredValue>,
        vector_clock: VectorClock,
        stamp: WriteStamp,
        ttl_millis: u64,
        now: i64,
    ) -> Option<StoredValue> {
        let old = std::mem::replace(&mut self.value, value);
        if old.is_none() {
            self.creation_time = now;
            self.hits = 0;
        }
        self.vector_clock = vector_clock;
        self.stamp = stamp;
        self.ttl_millis = ttl_millis;
        self.update_time = now;
        old
    }

    /// Turn the record into a tombstone after its TTL elapsed, keeping the clock
    pub fn expire(&mut self, now: i64) -> Option<StoredValue> {
        self.update_time = now;
        self.value.take()
    }

    /// Count a read access
    pub fn access(&mut self, now: i64) {
        self.hits += 1;
        self.last_access_time = now;
    }
}
