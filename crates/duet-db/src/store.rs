use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use duet_types::models::{Chat, ChatId, Message, UserId};
use duet_types::store::{ChatStore, StoreError};

use crate::models::{ChatRow, MessageRow};
use crate::{Database, now_timestamp};

impl Database {
    /// Fails with [`StoreError::Unauthorized`] unless `user_id` is one of the
    /// chat's participants. A missing chat is indistinguishable from no access.
    pub(crate) fn ensure_access(&self, chat_id: ChatId, user_id: UserId) -> Result<(), StoreError> {
        if self.with_conn(|conn| user_has_access(conn, chat_id, user_id))? {
            Ok(())
        } else {
            Err(StoreError::Unauthorized)
        }
    }
}

impl ChatStore for Database {
    fn get_or_create_chat(&self, a: UserId, b: UserId) -> Result<Chat, StoreError> {
        if a == b {
            return Err(StoreError::SelfChat);
        }
        let (user1_id, user2_id) = if a < b { (a, b) } else { (b, a) };

        let row = self.with_conn_mut(|conn| {
            let now = now_timestamp();
            let created = conn.execute(
                "INSERT OR IGNORE INTO chats (user1_id, user2_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
                rusqlite::params![user1_id, user2_id, now],
            )?;
            if created > 0 {
                debug!("Created chat between {} and {}", user1_id, user2_id);
            }

            let row = conn.query_row(
                &format!(
                    "SELECT {} FROM chats WHERE user1_id = ?1 AND user2_id = ?2",
                    ChatRow::COLUMNS
                ),
                rusqlite::params![user1_id, user2_id],
                ChatRow::from_row,
            )?;
            Ok(row)
        })?;

        Ok(row.into_chat())
    }

    fn send_message(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        content: &str,
    ) -> Result<Message, StoreError> {
        self.ensure_access(chat_id, sender_id)?;

        if content.is_empty() {
            return Err(StoreError::EmptyContent);
        }

        let row = self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = now_timestamp();
            tx.execute(
                "INSERT INTO messages (chat_id, sender_id, content, is_read, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                rusqlite::params![chat_id, sender_id, content, now],
            )?;
            let message_id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE chats SET updated_at = ?2 WHERE id = ?1",
                rusqlite::params![chat_id, now],
            )?;

            let row = tx.query_row(
                &format!(
                    "SELECT {} FROM messages m LEFT JOIN users u ON u.id = m.sender_id WHERE m.id = ?1",
                    MessageRow::COLUMNS
                ),
                [message_id],
                MessageRow::from_row,
            )?;
            tx.commit()?;
            Ok(row)
        })?;

        Ok(row.into_message())
    }

    fn get_chat(&self, chat_id: ChatId, user_id: UserId) -> Result<Chat, StoreError> {
        self.ensure_access(chat_id, user_id)?;

        let row = self.with_conn(|conn| query_chat(conn, chat_id))?;
        row.map(ChatRow::into_chat).ok_or(StoreError::ChatNotFound)
    }

    fn get_participants(&self, chat_id: ChatId) -> Result<(UserId, UserId), StoreError> {
        let pair = self.with_conn(|conn| {
            let pair = conn
                .query_row(
                    "SELECT user1_id, user2_id FROM chats WHERE id = ?1",
                    [chat_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            Ok(pair)
        })?;

        pair.ok_or(StoreError::ChatNotFound)
    }

    fn mark_read(&self, chat_id: ChatId, user_id: UserId) -> Result<usize, StoreError> {
        self.ensure_access(chat_id, user_id)?;

        let updated = self.with_conn_mut(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET is_read = 1
                 WHERE chat_id = ?1 AND sender_id != ?2 AND is_read = 0",
                rusqlite::params![chat_id, user_id],
            )?;
            Ok(updated)
        })?;

        Ok(updated)
    }
}

fn user_has_access(conn: &Connection, chat_id: ChatId, user_id: UserId) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM chats WHERE id = ?1 AND (user1_id = ?2 OR user2_id = ?2)",
        rusqlite::params![chat_id, user_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub(crate) fn query_chat(conn: &Connection, chat_id: ChatId) -> Result<Option<ChatRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM chats WHERE id = ?1", ChatRow::COLUMNS),
            [chat_id],
            ChatRow::from_row,
        )
        .optional()?;
    Ok(row)
}
