use thiserror::Error;

use crate::models::{Chat, ChatId, Message, UserId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot create chat with yourself")]
    SelfChat,

    #[error("unauthorized access to chat")]
    Unauthorized,

    #[error("chat not found")]
    ChatNotFound,

    #[error("message content cannot be empty")]
    EmptyContent,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Persistence for chats and messages, as consumed by the realtime gateway.
///
/// Calls are synchronous and may block on I/O; async callers run them on the
/// blocking pool. Every method except [`ChatStore::get_participants`] checks that
/// the acting user belongs to the chat.
pub trait ChatStore: Send + Sync + 'static {
    /// Idempotent and symmetric in argument order. Fails if `a == b`.
    fn get_or_create_chat(&self, a: UserId, b: UserId) -> Result<Chat, StoreError>;

    fn send_message(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        content: &str,
    ) -> Result<Message, StoreError>;

    fn get_chat(&self, chat_id: ChatId, user_id: UserId) -> Result<Chat, StoreError>;

    /// No access check: only for fan-out of an event the caller already authorized.
    fn get_participants(&self, chat_id: ChatId) -> Result<(UserId, UserId), StoreError>;

    /// Marks the counterpart's unread messages as read and returns how many
    /// were flipped. Messages sent by `user_id` are never touched.
    fn mark_read(&self, chat_id: ChatId, user_id: UserId) -> Result<usize, StoreError>;
}
