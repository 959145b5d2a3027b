//! Connected-socket registry with non-blocking broadcast.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::message::WireMessage;

/// Outbound buffer per socket; a client that falls this far behind is
/// considered dead and gets disconnected.
const CLIENT_BUFFER: usize = 64;

/// Registry of connected WebSocket clients.
///
/// Each client owns a bounded outbound channel drained by its writer
/// task. Broadcast never blocks: a full or closed channel removes the
/// client, which makes its writer task (and socket) wind down.
#[derive(Default)]
pub struct Hub {
    clients: Mutex<HashMap<u64, mpsc::Sender<String>>>,
    next_id: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> (u64, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
        self.clients.lock().insert(id, tx);
        info!(client = id, "websocket client registered");
        (id, rx)
    }

    pub fn unregister(&self, id: u64) {
        if self.clients.lock().remove(&id).is_some() {
            info!(client = id, "websocket client unregistered");
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Sends `message` to every connected client.
    pub fn broadcast(&self, message: &WireMessage) {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                debug!(error = %e, "unserializable broadcast");
                return;
            }
        };
        self.clients.lock().retain(|id, tx| {
            match tx.try_send(text.clone()) {
                Ok(()) => true,
                Err(e) => {
                    debug!(client = id, error = %e, "dropping slow websocket client");
                    false
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message() -> WireMessage {
        WireMessage::new("power_update", json!({ "isOn": true }))
    }

    #[tokio::test]
    async fn broadcast_reaches_every_client() {
        let hub = Hub::new();
        let (_a, mut rx_a) = hub.register();
        let (_b, mut rx_b) = hub.register();

        hub.broadcast(&message());

        assert!(rx_a.recv().await.unwrap().contains("power_update"));
        assert!(rx_b.recv().await.unwrap().contains("power_update"));
    }

    #[tokio::test]
    async fn unregistered_client_receives_nothing() {
        let hub = Hub::new();
        let (id, mut rx) = hub.register();
        hub.unregister(id);

        hub.broadcast(&message());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn slow_client_is_dropped() {
        let hub = Hub::new();
        let (_id, rx) = hub.register();

        for _ in 0..CLIENT_BUFFER + 1 {
            hub.broadcast(&message());
        }
        assert_eq!(hub.client_count(), 0);
        drop(rx);
    }

    #[tokio::test]
    async fn closed_client_is_pruned_on_broadcast() {
        let hub = Hub::new();
        let (_id, rx) = hub.register();
        drop(rx);

        hub.broadcast(&message());
        assert_eq!(hub.client_count(), 0);
    }
}
