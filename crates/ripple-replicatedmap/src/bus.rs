// Cluster event bus
// Broadcasts opaque payloads on named topics to every other member

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use tracing::{debug, trace};

use ripple_common::{MemberId, Result, RippleError};

/// Receives messages published on a topic
#[async_trait::async_trait]
pub trait TopicListener: Send + Sync {
    /// Called with the member that broadcast the payload
    async fn on_message(&self, origin: &MemberId, payload: Bytes);
}

/// A member's connection to the cluster-wide publish/subscribe bus.
///
/// Delivery is best-effort: a payload may be delayed, duplicated, or lost,
/// and a member never receives its own broadcasts.
#[async_trait::async_trait]
pub trait EventBus: Send + Sync {
    /// Member this connection belongs to
    fn local_member(&self) -> &MemberId;

    /// Send a payload to every other subscribed member
    async fn broadcast(&self, topic: &str, payload: Bytes) -> Result<()>;

    /// Subscribe to a topic, returning a registration id
    fn subscribe(&self, topic: &str, listener: Arc<dyn TopicListener>) -> Result<String>;

    fn unsubscribe(&self, topic: &str, registration_id: &str) -> bool;
}

#[derive(Clone)]
struct Subscription {
    id: String,
    member: MemberId,
    listener: Arc<dyn TopicListener>,
}

/// Bus shared by members running in one process.
///
/// Payloads are handed to every other member's listeners in subscription
/// order on the broadcasting task. Once closed, broadcasts and new
/// subscriptions fail with a transport error.
#[derive(Default)]
pub struct InProcessBus {
    topics: DashMap<String, Vec<Subscription>>,
    closed: AtomicBool,
}

impl InProcessBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connection for one member
    pub fn endpoint(self: &Arc<Self>, member: MemberId) -> Arc<InProcessEndpoint> {
        Arc::new(InProcessEndpoint {
            hub: self.clone(),
            member,
        })
    }

    /// Drop every subscription and refuse further traffic
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.topics.clear();
            debug!("In-process bus closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self, member: &MemberId, topic: &str) -> Result<()> {
        if self.is_closed() {
            return Err(RippleError::Transport(format!(
                "bus is closed, {} can't use topic {}",
                member, topic
            )));
        }
        Ok(())
    }

    /// Number of subscriptions on a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|s| s.len()).unwrap_or(0)
    }

    fn receivers(&self, topic: &str, sender: &MemberId) -> Vec<Arc<dyn TopicListener>> {
        self.topics
            .get(topic)
            .map(|subscriptions| {
                subscriptions
                    .iter()
                    .filter(|s| &s.member != sender)
                    .map(|s| s.listener.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// One member's connection to an [`InProcessBus`]
pub struct InProcessEndpoint {
    hub: Arc<InProcessBus>,
    member: MemberId,
}

#[async_trait::async_trait]
impl EventBus for InProcessEndpoint {
    fn local_member(&self) -> &MemberId {
        &self.member
    }

    async fn broadcast(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.hub.ensure_open(&self.member, topic)?;
        // Listeners are collected first so no shard lock is held across delivery.
        let receivers = self.hub.receivers(topic, &self.member);
        trace!(
            "Broadcasting {} bytes on {} from {} to {} receivers",
            payload.len(),
            topic,
            self.member,
            receivers.len()
        );
        for listener in receivers {
            listener.on_message(&self.member, payload.clone()).await;
        }
        Ok(())
    }

    fn subscribe(&self, topic: &str, listener: Arc<dyn TopicListener>) -> Result<String> {
        if topic.is_empty() {
            return Err(RippleError::IllegalArgument("topic must not be empty".to_string()));
        }
        self.hub.ensure_open(&self.member, topic)?;
        let id = uuid::Uuid::new_v4().to_string();
        self.hub
            .topics
            .entry(topic.to_string())
            .or_default()
            .push(Subscription {
                id: id.clone(),
                member: self.member.clone(),
                listener,
            });
        debug!("Member {} subscribed to {}", self.member, topic);
        Ok(id)
    }

    fn unsubscribe(&self, topic: &str, registration_id: &str) -> bool {
        let Some(mut subscriptions) = self.hub.topics.get_mut(topic) else {
            return false;
        };
        let before = subscriptions.len();
        subscriptions.retain(|s| !(s.id == registration_id && s.member == self.member));
        let removed = subscriptions.len() != before;
        if removed {
            debug!("Member {} unsubscribed from {}", self.member, topic);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        received: Mutex<Vec<(MemberId, Bytes)>>,
    }

    #[async_trait::async_trait]
    impl TopicListener for Recorder {
        async fn on_message(&self, origin: &MemberId, payload: Bytes) {
            self.received.lock().push((origin.clone(), payload));
        }
    }

    #[tokio::test]
    async fn test_broadcast_skips_sender() {
        let bus = InProcessBus::new();
        let m1 = bus.endpoint(MemberId::from("m1"));
        let m2 = bus.endpoint(MemberId::from("m2"));
        let on_m1 = Arc::new(Recorder::default());
        let on_m2 = Arc::new(Recorder::default());
        m1.subscribe("t", on_m1.clone()).unwrap();
        m2.subscribe("t", on_m2.clone()).unwrap();

        m1.broadcast("t", Bytes::from_static(b"hello")).await.unwrap();

        assert!(on_m1.received.lock().is_empty());
        let received = on_m2.received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, MemberId::from("m1"));
        assert_eq!(received[0].1, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = InProcessBus::new();
        let m1 = bus.endpoint(MemberId::from("m1"));
        let m2 = bus.endpoint(MemberId::from("m2"));
        let on_m2 = Arc::new(Recorder::default());
        let id = m2.subscribe("t", on_m2.clone()).unwrap();
        assert_eq!(bus.subscriber_count("t"), 1);

        // Only the subscribing member can remove its registration.
        assert!(!m1.unsubscribe("t", &id));
        assert!(m2.unsubscribe("t", &id));
        assert!(!m2.unsubscribe("t", &id));

        m1.broadcast("t", Bytes::from_static(b"x")).await.unwrap();
        assert!(on_m2.received.lock().is_empty());
    }

    #[tokio::test]
    async fn test_closed_bus_refuses_traffic() {
        let bus = InProcessBus::new();
        let m1 = bus.endpoint(MemberId::from("m1"));
        let m2 = bus.endpoint(MemberId::from("m2"));
        let on_m2 = Arc::new(Recorder::default());
        m2.subscribe("t", on_m2.clone()).unwrap();

        bus.close();
        assert!(bus.is_closed());
        assert_eq!(bus.subscriber_count("t"), 0);

        let err = m1.broadcast("t", Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, RippleError::Transport(_)));
        assert!(err.is_replication_error());
        assert!(matches!(
            m2.subscribe("t", on_m2.clone()),
            Err(RippleError::Transport(_))
        ));
        assert!(on_m2.received.lock().is_empty());
    }

    #[test]
    fn test_subscribe_rejects_empty_topic() {
        let bus = InProcessBus::new();
        let m1 = bus.endpoint(MemberId::from("m1"));
        assert!(m1.subscribe("", Arc::new(Recorder::default())).is_err());
    }
}
