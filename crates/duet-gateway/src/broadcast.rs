//! Per-chat fan-out of events to live connections.

use std::sync::Arc;

use tracing::{debug, warn};

use duet_types::events::ServerEvent;
use duet_types::models::{ChatId, UserId};
use duet_types::store::ChatStore;

use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::run_blocking;

#[derive(Clone)]
pub struct Broadcaster {
    store: Arc<dyn ChatStore>,
    registry: ConnectionRegistry,
}

impl Broadcaster {
    pub fn new(store: Arc<dyn ChatStore>, registry: ConnectionRegistry) -> Self {
        Self { store, registry }
    }

    /// Deliver `event` to both participants of `chat_id`, each independently.
    /// Returns how many connections accepted the event.
    ///
    /// No access check here: the caller authorized the event when it built it.
    pub async fn broadcast(&self, chat_id: ChatId, event: ServerEvent) -> usize {
        let (user1_id, user2_id) =
            match run_blocking(&self.store, move |store| store.get_participants(chat_id)).await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(
                        "Error getting chat participants for broadcast of chat {}: {}",
                        chat_id, e
                    );
                    return 0;
                }
            };

        let mut delivered = 0;
        for user_id in [user1_id, user2_id] {
            if self.send_to(user_id, event.clone()) {
                delivered += 1;
            }
        }

        debug!(
            "Broadcast {} to chat {}: {}/2 delivered",
            event.kind(),
            chat_id,
            delivered
        );
        delivered
    }

    /// Deliver to whatever connection `user_id` currently has. Returns false
    /// if they are offline or the write failed.
    pub fn send_to(&self, user_id: UserId, event: ServerEvent) -> bool {
        match self.registry.lookup(user_id) {
            Some(handle) => self.deliver(&handle, event),
            None => false,
        }
    }

    /// Write to one specific connection. On failure the connection is evicted
    /// from the registry and closed; the error is only logged.
    pub fn deliver(&self, handle: &ConnectionHandle, event: ServerEvent) -> bool {
        let kind = event.kind();
        match handle.send(event) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    "Error sending {} to user {} (connection {}): {}",
                    kind,
                    handle.user_id(),
                    handle.id(),
                    e
                );
                self.registry.unregister_connection(handle.user_id(), handle.id());
                handle.close();
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_db::Database;
    use tokio::sync::mpsc;

    fn setup() -> (Arc<Database>, ConnectionRegistry, Broadcaster) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let registry = ConnectionRegistry::new();
        let broadcaster = Broadcaster::new(db.clone(), registry.clone());
        (db, registry, broadcaster)
    }

    fn connect(registry: &ConnectionRegistry, user_id: UserId) -> (ConnectionHandle, mpsc::Receiver<ServerEvent>) {
        let (handle, rx) = ConnectionHandle::new(user_id, 8);
        registry.register(handle.clone());
        (handle, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn nobody_connected_is_not_an_error() {
        let (db, _registry, broadcaster) = setup();
        let chat = db.get_or_create_chat(5, 7).unwrap();

        assert_eq!(broadcaster.broadcast(chat.id, ServerEvent::pong_now()).await, 0);
    }

    #[tokio::test]
    async fn each_connected_participant_gets_exactly_one_copy() {
        let (db, registry, broadcaster) = setup();
        let chat = db.get_or_create_chat(5, 7).unwrap();
        let (_h7, mut rx7) = connect(&registry, 7);
        let (_h9, mut rx9) = connect(&registry, 9);

        let event = ServerEvent::MessagesMarkedRead { chat_id: chat.id };
        assert_eq!(broadcaster.broadcast(chat.id, event.clone()).await, 1);

        assert_eq!(drain(&mut rx7), vec![event]);
        assert!(drain(&mut rx9).is_empty());
    }

    #[tokio::test]
    async fn failed_write_evicts_only_that_participant() {
        let (db, registry, broadcaster) = setup();
        let chat = db.get_or_create_chat(5, 7).unwrap();
        let (_h5, mut rx5) = connect(&registry, 5);
        let (h7, rx7) = connect(&registry, 7);
        drop(rx7);

        let event = ServerEvent::MessagesMarkedRead { chat_id: chat.id };
        assert_eq!(broadcaster.broadcast(chat.id, event.clone()).await, 1);
        assert!(registry.lookup(7).is_none());
        assert!(h7.is_closed());
        assert_eq!(drain(&mut rx5), vec![event.clone()]);

        // Second send finds nobody for 7 and still reaches 5.
        assert_eq!(broadcaster.broadcast(chat.id, event).await, 1);
        assert_eq!(drain(&mut rx5).len(), 1);
    }

    #[tokio::test]
    async fn missing_chat_aborts_the_broadcast() {
        let (_db, registry, broadcaster) = setup();
        let (_h5, mut rx5) = connect(&registry, 5);

        assert_eq!(broadcaster.broadcast(404, ServerEvent::pong_now()).await, 0);
        assert!(drain(&mut rx5).is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn stale_handle_failure_keeps_the_replacement() {
        let (_db, registry, broadcaster) = setup();
        let (old, _old_rx) = connect(&registry, 7);
        let (new, mut new_rx) = connect(&registry, 7);

        assert!(!broadcaster.deliver(&old, ServerEvent::pong_now()));
        assert_eq!(registry.lookup(7).map(|h| h.id()), Some(new.id()));

        assert!(broadcaster.send_to(7, ServerEvent::pong_now()));
        assert_eq!(drain(&mut new_rx).len(), 1);
    }
}
