use std::sync::Arc;

use tracing::{debug, info, warn};

use duet_types::events::{ClientCommand, ServerEvent};
use duet_types::models::ChatId;
use duet_types::store::ChatStore;

use crate::broadcast::Broadcaster;
use crate::registry::ConnectionHandle;
use crate::run_blocking;

/// Routes decoded client commands to their handlers.
///
/// Every failure is turned into an `error` event for the originating
/// connection; nothing here ends the session.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn ChatStore>,
    broadcaster: Broadcaster,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn ChatStore>, broadcaster: Broadcaster) -> Self {
        Self { store, broadcaster }
    }

    pub async fn dispatch(&self, conn: &ConnectionHandle, cmd: ClientCommand) {
        match cmd {
            ClientCommand::Ping => self.reply(conn, ServerEvent::pong_now()),
            ClientCommand::SendMessage { chat_id, content } => {
                self.handle_send_message(conn, chat_id, content).await
            }
            ClientCommand::JoinChat { chat_id } => self.handle_join_chat(conn, chat_id).await,
            ClientCommand::MarkRead { chat_id } => self.handle_mark_read(conn, chat_id).await,
            ClientCommand::Unknown(kind) => {
                warn!("User {} sent unknown message type: {}", conn.user_id(), kind);
            }
        }
    }

    async fn handle_send_message(&self, conn: &ConnectionHandle, chat_id: ChatId, content: String) {
        if chat_id == 0 || content.is_empty() {
            return self.reply(conn, ServerEvent::error("Invalid message data"));
        }

        let sender_id = conn.user_id();
        let result = run_blocking(&self.store, move |store| {
            store.send_message(chat_id, sender_id, &content)
        })
        .await;

        match result {
            Ok(message) => {
                debug!("User {} sent message {} in chat {}", sender_id, message.id, chat_id);
                self.broadcaster
                    .broadcast(chat_id, ServerEvent::NewMessage(message))
                    .await;
            }
            Err(e) => self.reply(conn, ServerEvent::error(e.to_string())),
        }
    }

    async fn handle_join_chat(&self, conn: &ConnectionHandle, chat_id: ChatId) {
        if chat_id == 0 {
            return self.reply(conn, ServerEvent::error("Invalid chat ID"));
        }

        let user_id = conn.user_id();
        match run_blocking(&self.store, move |store| store.get_chat(chat_id, user_id)).await {
            Ok(chat) => {
                info!("User {} joined chat {}", user_id, chat.id);
                self.reply(conn, ServerEvent::joined(chat.id));
            }
            Err(e) => self.reply(conn, ServerEvent::error(e.to_string())),
        }
    }

    async fn handle_mark_read(&self, conn: &ConnectionHandle, chat_id: ChatId) {
        if chat_id == 0 {
            return self.reply(conn, ServerEvent::error("Invalid chat ID"));
        }

        let user_id = conn.user_id();
        match run_blocking(&self.store, move |store| store.mark_read(chat_id, user_id)).await {
            Ok(updated) => {
                debug!("User {} marked {} messages read in chat {}", user_id, updated, chat_id);
                self.reply(conn, ServerEvent::MessagesMarkedRead { chat_id });
            }
            Err(e) => self.reply(conn, ServerEvent::error(e.to_string())),
        }
    }

    fn reply(&self, conn: &ConnectionHandle, event: ServerEvent) {
        self.broadcaster.deliver(conn, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionRegistry;
    use duet_db::Database;
    use tokio::sync::mpsc;

    struct Harness {
        db: Arc<Database>,
        registry: ConnectionRegistry,
        dispatcher: Dispatcher,
    }

    impl Harness {
        fn new() -> Self {
            let db = Arc::new(Database::open_in_memory().unwrap());
            let registry = ConnectionRegistry::new();
            let broadcaster = Broadcaster::new(db.clone(), registry.clone());
            let dispatcher = Dispatcher::new(db.clone(), broadcaster);
            Self { db, registry, dispatcher }
        }

        fn connect(&self, user_id: u64) -> (ConnectionHandle, mpsc::Receiver<ServerEvent>) {
            let (handle, rx) = ConnectionHandle::new(user_id, 16);
            self.registry.register(handle.clone());
            (handle, rx)
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn send(chat_id: ChatId, content: &str) -> ClientCommand {
        ClientCommand::SendMessage {
            chat_id,
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn ping_gets_pong() {
        let h = Harness::new();
        let (conn, mut rx) = h.connect(5);

        h.dispatcher.dispatch(&conn, ClientCommand::Ping).await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ServerEvent::Pong { timestamp } if timestamp > 0));
    }

    #[tokio::test]
    async fn zero_chat_id_yields_one_error_and_no_registry_change() {
        let h = Harness::new();
        let (conn, mut rx) = h.connect(5);

        h.dispatcher.dispatch(&conn, send(0, "hello")).await;

        assert_eq!(drain(&mut rx), vec![ServerEvent::error("Invalid message data")]);
        assert_eq!(h.registry.connected_users(), vec![5]);
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn empty_content_is_rejected() {
        let h = Harness::new();
        let chat = h.db.get_or_create_chat(5, 7).unwrap();
        let (conn, mut rx) = h.connect(5);

        h.dispatcher.dispatch(&conn, send(chat.id, "")).await;

        assert_eq!(drain(&mut rx), vec![ServerEvent::error("Invalid message data")]);
        assert!(h.db.get_chat_messages(chat.id, 5, 0, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn outsider_cannot_post() {
        let h = Harness::new();
        let chat = h.db.get_or_create_chat(5, 7).unwrap();
        let (outsider, mut rx9) = h.connect(9);
        let (_member, mut rx7) = h.connect(7);

        h.dispatcher.dispatch(&outsider, send(chat.id, "sneaky")).await;

        assert_eq!(drain(&mut rx9), vec![ServerEvent::error("unauthorized access to chat")]);
        assert!(drain(&mut rx7).is_empty());
    }

    #[tokio::test]
    async fn message_reaches_both_participants() {
        let h = Harness::new();
        h.db.upsert_user(5, "Five", None).unwrap();
        let chat = h.db.get_or_create_chat(5, 7).unwrap();
        let (sender, mut rx5) = h.connect(5);
        let (_peer, mut rx7) = h.connect(7);

        h.dispatcher.dispatch(&sender, send(chat.id, "hello")).await;

        for rx in [&mut rx5, &mut rx7] {
            let events = drain(rx);
            assert_eq!(events.len(), 1);
            match &events[0] {
                ServerEvent::NewMessage(m) => {
                    assert_eq!(m.content, "hello");
                    assert_eq!(m.sender_id, 5);
                    assert_eq!(m.chat_id, chat.id);
                    assert_eq!(m.sender.name, "Five");
                    assert!(!m.is_read);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn join_chat_acknowledges_requester_only() {
        let h = Harness::new();
        let chat = h.db.get_or_create_chat(5, 7).unwrap();
        let (conn, mut rx5) = h.connect(5);
        let (_peer, mut rx7) = h.connect(7);

        h.dispatcher.dispatch(&conn, ClientCommand::JoinChat { chat_id: chat.id }).await;
        h.dispatcher.dispatch(&conn, ClientCommand::JoinChat { chat_id: 0 }).await;
        h.dispatcher.dispatch(&conn, ClientCommand::JoinChat { chat_id: 999 }).await;

        assert_eq!(
            drain(&mut rx5),
            vec![
                ServerEvent::joined(chat.id),
                ServerEvent::error("Invalid chat ID"),
                ServerEvent::error("unauthorized access to chat"),
            ]
        );
        assert!(drain(&mut rx7).is_empty());
    }

    #[tokio::test]
    async fn mark_read_flips_only_the_counterparts_messages() {
        let h = Harness::new();
        let chat = h.db.get_or_create_chat(5, 7).unwrap();
        h.db.send_message(chat.id, 7, "from seven").unwrap();
        h.db.send_message(chat.id, 5, "from five").unwrap();
        let (conn, mut rx5) = h.connect(5);
        let (_peer, mut rx7) = h.connect(7);

        h.dispatcher.dispatch(&conn, ClientCommand::MarkRead { chat_id: chat.id }).await;

        assert_eq!(drain(&mut rx5), vec![ServerEvent::MessagesMarkedRead { chat_id: chat.id }]);
        assert!(drain(&mut rx7).is_empty());

        let messages = h.db.get_chat_messages(chat.id, 5, 0, 10).unwrap();
        for m in messages {
            assert_eq!(m.is_read, m.sender_id == 7);
        }
    }

    #[tokio::test]
    async fn unknown_commands_are_ignored() {
        let h = Harness::new();
        let (conn, mut rx) = h.connect(5);

        h.dispatcher
            .dispatch(&conn, ClientCommand::Unknown("typing".into()))
            .await;

        assert!(drain(&mut rx).is_empty());
        assert!(!conn.is_closed());
    }
}
