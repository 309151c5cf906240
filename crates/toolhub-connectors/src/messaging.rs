//! Message bus connector.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::ConnectorError;

/// Publishes events to named topics.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `event` on `topic`; returns how many subscribers received it.
    async fn publish(&self, topic: &str, event: Value) -> Result<usize, ConnectorError>;
}

/// In-process bus: one broadcast channel per topic.
#[derive(Debug)]
pub struct BroadcastBus {
    capacity: usize,
    topics: Mutex<HashMap<String, broadcast::Sender<Value>>>,
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl BroadcastBus {
    /// Create a bus whose topics buffer `capacity` events per lagging subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<Value> {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        topics
            .entry(topic.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Subscribe to `topic`.
    #[must_use]
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<Value> {
        self.sender(topic).subscribe()
    }
}

#[async_trait]
impl Publisher for BroadcastBus {
    async fn publish(&self, topic: &str, event: Value) -> Result<usize, ConnectorError> {
        if topic.is_empty() {
            return Err(ConnectorError::InvalidInput("topic is empty".into()));
        }
        // No subscribers is not an error for a fire-and-forget bus.
        let delivered = self.sender(topic).send(event).unwrap_or(0);
        tracing::debug!(topic, delivered, "published event");
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_published_events() {
        let bus = BroadcastBus::default();
        let mut rx = bus.subscribe("orders");
        let delivered = bus.publish("orders", json!({"id": 7})).await.unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(rx.recv().await.unwrap(), json!({"id": 7}));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = BroadcastBus::default();
        assert_eq!(bus.publish("nobody", json!(1)).await.unwrap(), 0);
        assert!(bus.publish("", json!(1)).await.is_err());
    }
}
