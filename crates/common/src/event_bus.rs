//! Topic-keyed broadcast bus for control events.
//!
//! Subscribers (dashboards, audit log) consume but must never block the
//! publisher: sends are bounded by a publish timeout and lagging receivers
//! drop events rather than stall the core.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::events::ControlEvent;

/// Event plus the wall-clock time it was published.
#[derive(Debug, Clone)]
pub struct BusEnvelope {
    pub topic: &'static str,
    pub event: ControlEvent,
    pub ts_ms: u128,
}

#[derive(Clone)]
pub struct ControlBus {
    topics: Arc<RwLock<HashMap<&'static str, broadcast::Sender<BusEnvelope>>>>,
    subscribe_buffer: usize,
    publish_timeout: Duration,
}

impl Default for ControlBus {
    fn default() -> Self {
        Self::new(256, Duration::from_millis(250))
    }
}

impl ControlBus {
    pub fn new(subscribe_buffer: usize, publish_timeout: Duration) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            subscribe_buffer,
            publish_timeout,
        }
    }

    async fn ensure_topic(&self, topic: &'static str) -> broadcast::Sender<BusEnvelope> {
        {
            let topics = self.topics.read().await;
            if let Some(tx) = topics.get(topic) {
                return tx.clone();
            }
        }
        let mut topics = self.topics.write().await;
        topics
            .entry(topic)
            .or_insert_with(|| {
                debug!(target: "control_bus", topic, "created topic");
                broadcast::channel(self.subscribe_buffer).0
            })
            .clone()
    }

    /// Publish an event to its topic. Never propagates subscriber errors;
    /// a full buffer or missing subscriber is logged and dropped.
    pub async fn publish(&self, event: ControlEvent) {
        let topic = event.topic();
        let tx = self.ensure_topic(topic).await;
        let envelope = BusEnvelope {
            topic,
            event,
            ts_ms: current_ts_ms(),
        };
        let send = async move { tx.send(envelope).map(|_| ()) };
        match timeout(self.publish_timeout, send).await {
            Ok(Ok(())) => debug!(target: "control_bus", topic, "published"),
            Ok(Err(_)) => debug!(target: "control_bus", topic, "no subscribers"),
            Err(_) => warn!(target: "control_bus", topic, "publish timeout"),
        }
    }

    pub async fn subscribe(&self, topic: &'static str) -> broadcast::Receiver<BusEnvelope> {
        self.ensure_topic(topic).await.subscribe()
    }
}

fn current_ts_ms() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
