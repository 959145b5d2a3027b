//! Topic-typed broadcast bus with non-blocking delivery.
//!
//! Subscribers register once for a set of [`EventKind`]s and receive a
//! bounded channel handle. Publishing walks the subscribers of the event's
//! kind and `try_send`s: a subscriber whose buffer is full loses that event,
//! but the publisher never blocks. Late UI updates beat stalling the
//! orchestrator behind a slow WebSocket.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::event::{Event, EventKind};

/// Per-subscriber buffer size.
pub const SUBSCRIBER_BUFFER: usize = 100;

struct Slot {
    id: u64,
    tx: mpsc::Sender<Event>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<Slot>>,
}

/// Pub/sub fan-out for [`Event`]s.
#[derive(Default)]
pub struct EventBus {
    registry: Mutex<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber for the given kinds.
    ///
    /// Dropping the returned [`Subscription`] closes its channel; the dead
    /// sender is pruned on the next publish of a matching kind. Call
    /// [`unsubscribe`](Self::unsubscribe) to remove it eagerly.
    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        for kind in kinds {
            registry
                .by_kind
                .entry(*kind)
                .or_default()
                .push(Slot { id, tx: tx.clone() });
        }
        Subscription { id, rx }
    }

    /// Removes a subscriber from every kind it registered for.
    pub fn unsubscribe(&self, id: u64) {
        let mut registry = self.registry.lock();
        for slots in registry.by_kind.values_mut() {
            slots.retain(|slot| slot.id != id);
        }
    }

    /// Delivers `event` to every live subscriber of its kind.
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        let mut registry = self.registry.lock();
        let Some(slots) = registry.by_kind.get_mut(&kind) else {
            return;
        };
        slots.retain(|slot| match slot.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(subscriber = slot.id, ?kind, "subscriber full, dropping event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

/// Receiving half of a bus registration.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Event>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next event; `None` once unsubscribed everywhere.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}
