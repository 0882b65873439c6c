//! Per-entry vector clocks
//!
//! A [`VectorClock`] is an immutable causality token: every operation returns
//! a new clock and leaves the receiver untouched, so clocks can be shared
//! between records, messages, and events without synchronization.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use ripple_common::MemberId;

/// Causal relationship of one clock to another
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalOrdering {
    /// Every counter is lower or equal, at least one strictly lower
    Before,
    /// Every counter is higher or equal, at least one strictly higher
    After,
    /// Some counters are higher, some lower
    Concurrent,
    /// All counters match
    Equal,
}

impl CausalOrdering {
    /// The ordering seen from the other clock
    pub fn reverse(self) -> Self {
        match self {
            CausalOrdering::Before => CausalOrdering::After,
            CausalOrdering::After => CausalOrdering::Before,
            other => other,
        }
    }
}

/// Logical counters per member that modified an entry. Members without an
/// entry have an implicit counter of 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    clocks: BTreeMap<MemberId, u64>,
}

impl VectorClock {
    /// The empty clock ("nothing known")
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock seeded with a single counter
    pub fn with_entry(member: MemberId, counter: u64) -> Self {
        let mut clocks = BTreeMap::new();
        if counter > 0 {
            clocks.insert(member, counter);
        }
        Self { clocks }
    }

    /// Counter of `member`, 0 when unknown
    pub fn get(&self, member: &MemberId) -> u64 {
        self.clocks.get(member).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    /// Number of members with a counter
    pub fn len(&self) -> usize {
        self.clocks.len()
    }

    /// Sum of all counters. Strictly grows along every causal chain, so it
    /// orders causally related clocks the same way `compare` does. Saturates
    /// at `u64::MAX`.
    pub fn logical_time(&self) -> u64 {
        self.clocks
            .values()
            .fold(0u64, |sum, counter| sum.saturating_add(*counter))
    }

    /// Sum of all counters, `None` if it does not fit in a `u64`
    pub fn checked_logical_time(&self) -> Option<u64> {
        self.clocks
            .values()
            .try_fold(0u64, |sum, counter| sum.checked_add(*counter))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MemberId, u64)> {
        self.clocks.iter().map(|(member, counter)| (member, *counter))
    }

    /// Clock with the counter of `member` advanced by one, `None` once that
    /// counter reached `u64::MAX`
    #[must_use]
    pub fn increment(&self, member: &MemberId) -> Option<Self> {
        let next = self.get(member).checked_add(1)?;
        let mut clocks = self.clocks.clone();
        clocks.insert(member.clone(), next);
        Some(Self { clocks })
    }

    /// Pointwise maximum of both clocks
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let mut clocks = self.clocks.clone();
        for (member, &counter) in &other.clocks {
            let entry = clocks.entry(member.clone()).or_insert(0);
            *entry = (*entry).max(counter);
        }
        Self { clocks }
    }

    /// Causal relationship of `self` to `other`
    pub fn compare(&self, other: &Self) -> CausalOrdering {
        let mut less = false;
        let mut greater = false;

        // Both maps are sorted, so walk them as one merged sequence.
        let mut left = self.clocks.iter().peekable();
        let mut right = other.clocks.iter().peekable();
        loop {
            let (l, r) = match (left.peek().copied(), right.peek().copied()) {
                (None, None) => break,
                (Some((_, l)), None) => {
                    left.next();
                    (*l, 0)
                }
                (None, Some((_, r))) => {
                    right.next();
                    (0, *r)
                }
                (Some((lm, l)), Some((rm, r))) => match lm.cmp(rm) {
                    Ordering::Less => {
                        left.next();
                        (*l, 0)
                    }
                    Ordering::Greater => {
                        right.next();
                        (0, *r)
                    }
                    Ordering::Equal => {
                        left.next();
                        right.next();
                        (*l, *r)
                    }
                },
            };

            match l.cmp(&r) {
                Ordering::Less => less = true,
                Ordering::Greater => greater = true,
                Ordering::Equal => {}
            }
            if less && greater {
                return CausalOrdering::Concurrent;
            }
        }

        match (less, greater) {
            (false, false) => CausalOrdering::Equal,
            (true, false) => CausalOrdering::Before,
            (false, true) => CausalOrdering::After,
            (true, true) => CausalOrdering::Concurrent,
        }
    }

    /// Whether `x` happened strictly before `y`
    pub fn happened_before(x: &Self, y: &Self) -> bool {
        x.compare(y) == CausalOrdering::Before
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vector{{")?;
        for (i, (member, counter)) in self.clocks.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", member, counter)?;
        }
        write!(f, "}}")
    }
}

impl FromIterator<(MemberId, u64)> for VectorClock {
    fn from_iter<I: IntoIterator<Item = (MemberId, u64)>>(iter: I) -> Self {
        Self {
            clocks: iter.into_iter().filter(|(_, c)| *c > 0).collect(),
        }
    }
}
