//! Entry events and listener registrations

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;

use ripple_common::{MemberId, Result, RippleError};

use crate::record::{Data, StoredValue};

/// Kind of change an entry event describes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryEventType {
    Added,
    Removed,
    Updated,
    Evicted,
}

impl EntryEventType {
    pub const ALL: [EntryEventType; 4] = [
        EntryEventType::Added,
        EntryEventType::Removed,
        EntryEventType::Updated,
        EntryEventType::Evicted,
    ];

    /// Decode a numeric type code (1, 2, 4, 8); codes outside the listener
    /// contract are rejected
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            1 => Ok(EntryEventType::Added),
            2 => Ok(EntryEventType::Removed),
            4 => Ok(EntryEventType::Updated),
            8 => Ok(EntryEventType::Evicted),
            other => Err(RippleError::UnsupportedEventKind(other)),
        }
    }
}

impl fmt::Display for EntryEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryEventType::Added => write!(f, "ADDED"),
            EntryEventType::Removed => write!(f, "REMOVED"),
            EntryEventType::Updated => write!(f, "UPDATED"),
            EntryEventType::Evicted => write!(f, "EVICTED"),
        }
    }
}

/// A change to one entry of a replicated map
#[derive(Clone, Debug)]
pub struct EntryEvent {
    /// Map name
    pub name: String,
    pub key: Data,
    pub old_value: Option<StoredValue>,
    pub value: Option<StoredValue>,
    pub event_type: EntryEventType,
    /// Member whose mutation caused the event
    pub member: MemberId,
}

impl EntryEvent {
    pub fn new(
        name: impl Into<String>,
        key: Data,
        old_value: Option<StoredValue>,
        value: Option<StoredValue>,
        event_type: EntryEventType,
        member: MemberId,
    ) -> Self {
        Self {
            name: name.into(),
            key,
            old_value,
            value,
            event_type,
            member,
        }
    }

    /// Event for a transition from `old` to `new`, none when nothing changed
    pub fn for_transition(
        name: &str,
        key: &Data,
        old: Option<StoredValue>,
        new: Option<StoredValue>,
        member: &MemberId,
    ) -> Option<Self> {
        let event_type = match (&old, &new) {
            (None, Some(_)) => EntryEventType::Added,
            (Some(_), Some(_)) => EntryEventType::Updated,
            (Some(_), None) => EntryEventType::Removed,
            (None, None) => return None,
        };
        Some(Self::new(name, key.clone(), old, new, event_type, member.clone()))
    }

    pub fn key_as<K: DeserializeOwned>(&self) -> Result<K> {
        self.key.deserialize()
    }

    pub fn value_as<V: DeserializeOwned>(&self) -> Result<Option<V>> {
        self.value.as_ref().map(|v| v.deserialize()).transpose()
    }

    pub fn old_value_as<V: DeserializeOwned>(&self) -> Result<Option<V>> {
        self.old_value.as_ref().map(|v| v.deserialize()).transpose()
    }
}

/// Receives entry events of a replicated map. Every callback defaults to a no-op.
#[async_trait::async_trait]
pub trait EntryListener: Send + Sync {
    async fn entry_added(&self, _event: &EntryEvent) {}

    async fn entry_updated(&self, _event: &EntryEvent) {}

    async fn entry_removed(&self, _event: &EntryEvent) {}

    async fn entry_evicted(&self, _event: &EntryEvent) {}
}

/// Which events of a map a registration receives
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum EventFilter {
    #[default]
    All,
    Key(Data),
}

impl EventFilter {
    pub fn matches(&self, event: &EntryEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Key(key) => key == &event.key,
        }
    }
}

#[derive(Clone)]
struct Registration {
    id: String,
    filter: EventFilter,
    listener: Arc<dyn EntryListener>,
}

/// Local listener registrations, keyed by map name
#[derive(Default)]
pub struct ListenerRegistry {
    registrations: DashMap<String, Vec<Registration>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener and return its registration id
    pub fn register(
        &self,
        map_name: &str,
        filter: EventFilter,
        listener: Arc<dyn EntryListener>,
    ) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.registrations
            .entry(map_name.to_string())
            .or_default()
            .push(Registration {
                id: id.clone(),
                filter,
                listener,
            });
        id
    }

    pub fn deregister(&self, map_name: &str, registration_id: &str) -> bool {
        let Some(mut registrations) = self.registrations.get_mut(map_name) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.id != registration_id);
        let removed = registrations.len() != before;
        let now_empty = registrations.is_empty();
        drop(registrations);

        if now_empty {
            self.registrations
                .remove_if(map_name, |_, registrations| registrations.is_empty());
        }
        removed
    }

    /// Drop every registration of a map
    pub fn deregister_all(&self, map_name: &str) -> usize {
        self.registrations
            .remove(map_name)
            .map(|(_, registrations)| registrations.len())
            .unwrap_or(0)
    }

    /// Listeners whose filter accepts the event
    pub fn matching(&self, event: &EntryEvent) -> Vec<Arc<dyn EntryListener>> {
        self.registrations
            .get(&event.name)
            .map(|registrations| {
                registrations
                    .iter()
                    .filter(|r| r.filter.matches(event))
                    .map(|r| r.listener.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn count(&self, map_name: &str) -> usize {
        self.registrations
            .get(map_name)
            .map(|r| r.len())
            .unwrap_or(0)
    }
}
