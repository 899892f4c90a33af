use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};

use duet_types::api::{ChatSummary, UnreadBySender, UnreadNotification};
use duet_types::models::{ChatId, Message, UserId, UserSummary};
use duet_types::store::StoreError;

use crate::models::{ChatRow, MessageRow};
use crate::{Database, parse_timestamp};

impl Database {
    // -- Users --

    pub fn upsert_user(&self, id: UserId, name: &str, avatar_url: Option<&str>) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, avatar_url) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, avatar_url = excluded.avatar_url",
                rusqlite::params![id, name, avatar_url],
            )?;
            Ok(())
        })
    }

    // -- Chats --

    /// All chats of a user, most recently active first, each with the
    /// counterpart's display fields and the latest message.
    pub fn list_user_chats(&self, user_id: UserId) -> Result<Vec<ChatSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM chats
                 WHERE user1_id = ?1 OR user2_id = ?1
                 ORDER BY updated_at DESC, id DESC",
                ChatRow::COLUMNS
            ))?;
            let rows = stmt
                .query_map([user_id], ChatRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut chats = Vec::with_capacity(rows.len());
            for row in rows {
                let chat = row.into_chat();
                let other_id = chat.other_participant(user_id).unwrap_or(chat.user2_id);
                chats.push(ChatSummary {
                    other_user: query_user_summary(conn, other_id)?,
                    last_message: query_last_message(conn, chat.id)?,
                    chat,
                });
            }
            Ok(chats)
        })
    }

    // -- Messages --

    /// A page of a chat's history, newest first.
    pub fn get_chat_messages(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        offset: u32,
        limit: u32,
    ) -> std::result::Result<Vec<Message>, StoreError> {
        self.ensure_access(chat_id, user_id)?;

        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages m
                 LEFT JOIN users u ON u.id = m.sender_id
                 WHERE m.chat_id = ?1
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?2 OFFSET ?3",
                MessageRow::COLUMNS
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![chat_id, limit, offset], MessageRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        Ok(rows.into_iter().map(MessageRow::into_message).collect())
    }

    // -- Unread --

    /// One entry per chat that has messages the user has not read yet.
    pub fn unread_notifications(&self, user_id: UserId) -> Result<Vec<UnreadNotification>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id,
                        CASE WHEN c.user1_id = ?1 THEN c.user2_id ELSE c.user1_id END AS other_id,
                        COALESCE(u.name, 'unknown'),
                        COUNT(m.id),
                        MAX(m.created_at) AS last_time,
                        (SELECT content FROM messages
                          WHERE chat_id = c.id
                          ORDER BY created_at DESC, id DESC LIMIT 1)
                 FROM chats c
                 JOIN messages m
                   ON m.chat_id = c.id AND m.sender_id != ?1 AND m.is_read = 0
                 LEFT JOIN users u
                   ON u.id = CASE WHEN c.user1_id = ?1 THEN c.user2_id ELSE c.user1_id END
                 WHERE c.user1_id = ?1 OR c.user2_id = ?1
                 GROUP BY c.id
                 ORDER BY last_time DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    let last_time: Option<String> = row.get(4)?;
                    Ok(UnreadNotification {
                        chat_id: row.get(0)?,
                        other_user_id: row.get(1)?,
                        other_user_name: row.get(2)?,
                        unread_count: row.get(3)?,
                        last_message_time: last_time.as_deref().map(parse_timestamp),
                        last_message_content: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Messages sent to `user_id`, across all chats, that are still unread.
    pub fn total_unread_count(&self, user_id: UserId) -> Result<u64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages m
                 JOIN chats c ON m.chat_id = c.id
                 WHERE (c.user1_id = ?1 OR c.user2_id = ?1)
                   AND m.sender_id != ?1 AND m.is_read = 0",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Number of distinct users with unread messages waiting for `user_id`.
    pub fn unread_users_count(&self, user_id: UserId) -> Result<u64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(DISTINCT m.sender_id) FROM messages m
                 JOIN chats c ON m.chat_id = c.id
                 WHERE (c.user1_id = ?1 OR c.user2_id = ?1)
                   AND m.sender_id != ?1 AND m.is_read = 0",
                [user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Unread counts grouped by sender, largest first.
    pub fn unread_counts_by_sender(&self, user_id: UserId) -> Result<Vec<UnreadBySender>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.sender_id, COALESCE(u.name, 'unknown'), COUNT(m.id) AS unread_count
                 FROM messages m
                 JOIN chats c ON m.chat_id = c.id
                 LEFT JOIN users u ON u.id = m.sender_id
                 WHERE (c.user1_id = ?1 OR c.user2_id = ?1)
                   AND m.sender_id != ?1 AND m.is_read = 0
                 GROUP BY m.sender_id
                 ORDER BY unread_count DESC, m.sender_id",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(UnreadBySender {
                        user_id: row.get(0)?,
                        user_name: row.get(1)?,
                        unread_count: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn query_user_summary(conn: &Connection, user_id: UserId) -> Result<UserSummary> {
    let found = conn
        .query_row(
            "SELECT name, avatar_url FROM users WHERE id = ?1",
            [user_id],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
        )
        .optional()?;

    let (name, avatar) = found.unwrap_or_else(|| ("unknown".to_string(), None));
    Ok(UserSummary {
        id: user_id,
        name,
        avatar,
    })
}

fn query_last_message(conn: &Connection, chat_id: ChatId) -> Result<Option<Message>> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {} FROM messages m
                 LEFT JOIN users u ON u.id = m.sender_id
                 WHERE m.chat_id = ?1
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT 1",
                MessageRow::COLUMNS
            ),
            [chat_id],
            MessageRow::from_row,
        )
        .optional()?;
    Ok(row.map(MessageRow::into_message))
}
