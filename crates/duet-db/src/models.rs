//! Database row types. These map directly to SQLite rows and are converted
//! into the `duet-types` models at the crate boundary.

use duet_types::models::{Chat, Message, UserSummary};

use crate::parse_timestamp;

pub struct ChatRow {
    pub id: u64,
    pub user1_id: u64,
    pub user2_id: u64,
    pub created_at: String,
    pub updated_at: String,
}

impl ChatRow {
    pub const COLUMNS: &'static str = "id, user1_id, user2_id, created_at, updated_at";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user1_id: row.get(1)?,
            user2_id: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    pub fn into_chat(self) -> Chat {
        Chat {
            id: self.id,
            user1_id: self.user1_id,
            user2_id: self.user2_id,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        }
    }
}

pub struct MessageRow {
    pub id: u64,
    pub chat_id: u64,
    pub sender_id: u64,
    pub sender_name: Option<String>,
    pub sender_avatar: Option<String>,
    pub content: String,
    pub is_read: bool,
    pub created_at: String,
}

impl MessageRow {
    /// Select list for `messages m LEFT JOIN users u ON u.id = m.sender_id`.
    pub const COLUMNS: &'static str =
        "m.id, m.chat_id, m.sender_id, u.name, u.avatar_url, m.content, m.is_read, m.created_at";

    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            chat_id: row.get(1)?,
            sender_id: row.get(2)?,
            sender_name: row.get(3)?,
            sender_avatar: row.get(4)?,
            content: row.get(5)?,
            is_read: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    pub fn into_message(self) -> Message {
        Message {
            id: self.id,
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            content: self.content,
            is_read: self.is_read,
            created_at: parse_timestamp(&self.created_at),
            sender: UserSummary {
                id: self.sender_id,
                name: self.sender_name.unwrap_or_else(|| "unknown".to_string()),
                avatar: self.sender_avatar,
            },
        }
    }
}
