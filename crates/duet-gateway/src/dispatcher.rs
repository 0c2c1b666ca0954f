use tokio::sync::broadcast;

use duet_types::events::StoreEvent;

/// Fans store change events out to every subscribed client. This is the
/// push half of the store: writes emit an event here, readers re-run the
/// query they care about when one arrives.
#[derive(Clone)]
pub struct Dispatcher {
    broadcast_tx: broadcast::Sender<StoreEvent>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self { broadcast_tx }
    }

    /// Subscribe to store events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients. A send with no
    /// subscribers is fine: mutations don't care who is listening.
    pub fn broadcast(&self, event: StoreEvent) {
        let _ = self.broadcast_tx.send(event);
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_see_broadcast_events() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();

        dispatcher.broadcast(StoreEvent::UserUpserted { user_id: "a1".into() });

        match rx.recv().await.unwrap() {
            StoreEvent::UserUpserted { user_id } => assert_eq!(user_id, "a1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_a_noop() {
        let dispatcher = Dispatcher::new();
        // Must not panic or error
        dispatcher.broadcast(StoreEvent::UserUpserted { user_id: "a1".into() });
    }
}
