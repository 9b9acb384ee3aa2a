//! Push-notification interface toward the API layer.
//!
//! Sessions publish onto a broadcast channel instead of calling the consumer
//! inline, so a slow subscriber can never stall a poll loop. Subscribers that
//! fall behind lose the oldest events, which is fine for display state.

use crate::types::{ConnKey, ConnStatus, LiveVitals};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::broadcast;

/// Single-connection teardown notice, serialized as `{"status":"disconnected"}`.
#[derive(Debug, Clone, Serialize)]
pub struct DisconnectNotice {
    pub status: ConnStatus,
}

/// One push toward the API layer.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PushEvent {
    /// Full live-vitals mapping, published once per poll cycle.
    Update(HashMap<ConnKey, LiveVitals>),
    /// `{connectionKey: {"status": "disconnected"}}`, published once on
    /// session teardown.
    Disconnected(HashMap<ConnKey, DisconnectNotice>),
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PushEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.tx.subscribe()
    }

    pub fn publish_update(&self, vitals: HashMap<ConnKey, LiveVitals>) {
        // no receivers is not an error
        let _ = self.tx.send(PushEvent::Update(vitals));
    }

    pub fn publish_disconnect(&self, conn_key: &str) {
        let mut notice = HashMap::with_capacity(1);
        notice.insert(
            conn_key.to_string(),
            DisconnectNotice {
                status: ConnStatus::Disconnected,
            },
        );
        let _ = self.tx.send(PushEvent::Disconnected(notice));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disconnect_notice_shape() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish_disconnect("10.0.0.1:4000");

        let event = rx.recv().await.unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"10.0.0.1:4000": {"status": "disconnected"}})
        );
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = EventBus::new(8);
        bus.publish_update(HashMap::new());
    }
}
