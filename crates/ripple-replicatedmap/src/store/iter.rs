use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;

use crate::record::{Data, ReplicatedRecord};

/// Lazy iterator over the live records of a store as of a fixed time.
///
/// The key set is captured when the iterator is created or restarted; each
/// record is read when it is reached, so entries removed in between are
/// skipped. Expiry is judged against the `now` given at creation, also after
/// a restart. A destroyed store yields nothing.
pub struct RecordIterator {
    records: Arc<DashMap<Data, ReplicatedRecord>>,
    destroyed: Arc<AtomicBool>,
    skip_expired: bool,
    now: i64,
    keys: Vec<Data>,
    position: usize,
}

impl RecordIterator {
    pub(crate) fn new(
        records: Arc<DashMap<Data, ReplicatedRecord>>,
        destroyed: Arc<AtomicBool>,
        now: i64,
        skip_expired: bool,
    ) -> Self {
        let mut iter = Self {
            records,
            destroyed,
            skip_expired,
            now,
            keys: Vec::new(),
            position: 0,
        };
        iter.restart();
        iter
    }

    /// Capture the current key set and start over
    pub fn restart(&mut self) {
        self.position = 0;
        self.keys = if self.destroyed.load(Ordering::Acquire) {
            Vec::new()
        } else {
            self.records
                .iter()
                .filter(|entry| !entry.is_tombstone())
                .map(|entry| entry.key().clone())
                .collect()
        };
    }

    /// Time expiry is judged against
    pub fn now(&self) -> i64 {
        self.now
    }

    /// Keys left to visit
    pub fn remaining(&self) -> usize {
        self.keys.len().saturating_sub(self.position)
    }
}

impl Iterator for RecordIterator {
    type Item = ReplicatedRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.destroyed.load(Ordering::Acquire) {
                self.position = self.keys.len();
                return None;
            }
            let key = self.keys.get(self.position)?;
            self.position += 1;

            let Some(record) = self.records.get(key) else {
                continue;
            };
            if record.is_tombstone() || (self.skip_expired && record.is_expired(self.now)) {
                continue;
            }
            return Some(record.clone());
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}
