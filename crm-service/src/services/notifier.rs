//! Live notification fan-out.
//!
//! Each WebSocket connection registers a bounded channel. Broadcasts are
//! best-effort: an observer whose channel is closed or full is dropped from
//! the registry and never retried.

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use crate::services::metrics::NOTIFICATIONS_DROPPED_TOTAL;

/// Per-observer buffer.
pub const OBSERVER_BUFFER: usize = 64;

pub type ConnectionId = u64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
    pub timestamp: String,
}

#[derive(Default)]
pub struct NotificationHub {
    observers: DashMap<ConnectionId, mpsc::Sender<Notification>>,
    next_id: AtomicU64,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(OBSERVER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.insert(id, tx);
        tracing::debug!(connection_id = id, "Observer registered");
        (id, rx)
    }

    pub fn deregister(&self, id: ConnectionId) {
        if self.observers.remove(&id).is_some() {
            tracing::debug!(connection_id = id, "Observer deregistered");
        }
    }

    pub fn connection_count(&self) -> usize {
        self.observers.len()
    }

    /// Send to every observer. Returns how many received it.
    pub fn broadcast(&self, event_type: &str, data: serde_json::Value) -> usize {
        let notification = Notification {
            event_type: event_type.to_string(),
            data,
            timestamp: Utc::now().to_rfc3339(),
        };

        let mut failed = Vec::new();
        let mut delivered = 0;
        for entry in self.observers.iter() {
            match entry.value().try_send(notification.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => failed.push(*entry.key()),
            }
        }

        // Removal happens after iteration; removing while holding a shard
        // guard would deadlock.
        for id in failed {
            self.observers.remove(&id);
            NOTIFICATIONS_DROPPED_TOTAL.inc();
            tracing::debug!(connection_id = id, event_type, "Dropped unreachable observer");
        }

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_broadcast_reaches_all_observers() {
        let hub = NotificationHub::new();
        let (_a, mut rx_a) = hub.register();
        let (_b, mut rx_b) = hub.register();

        let delivered = hub.broadcast("invoice_paid", json!({ "invoice_id": "inv-1" }));
        assert_eq!(delivered, 2);

        let got = rx_a.recv().await.unwrap();
        assert_eq!(got.event_type, "invoice_paid");
        assert_eq!(got.data["invoice_id"], "inv-1");
        assert_eq!(rx_b.recv().await.unwrap(), got);
    }

    #[tokio::test]
    async fn test_closed_observer_is_dropped() {
        let hub = NotificationHub::new();
        let (_a, rx_a) = hub.register();
        let (_b, mut rx_b) = hub.register();
        drop(rx_a);

        assert_eq!(hub.broadcast("invoice_paid", json!({})), 1);
        assert_eq!(hub.connection_count(), 1);
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_full_observer_is_dropped() {
        let hub = NotificationHub::new();
        let (_slow, _rx_slow) = hub.register();

        for _ in 0..OBSERVER_BUFFER {
            hub.broadcast("tick", json!({}));
        }
        assert_eq!(hub.connection_count(), 1);

        assert_eq!(hub.broadcast("tick", json!({})), 0);
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn test_deregister() {
        let hub = NotificationHub::new();
        let (id, _rx) = hub.register();
        assert_eq!(hub.connection_count(), 1);

        hub.deregister(id);
        hub.deregister(id);
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn test_notification_wire_shape() {
        let notification = Notification {
            event_type: "invoice_paid".to_string(),
            data: json!({ "amount": 840.0 }),
            timestamp: "2024-01-01T00:00:00+00:00".to_string(),
        };
        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["type"], "invoice_paid");
        assert_eq!(value["data"]["amount"], 840.0);
        assert!(value.get("event_type").is_none());
    }
}
