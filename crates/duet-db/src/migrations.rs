use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Owned by the account service; only read here for display fields.
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY,
            name        TEXT NOT NULL,
            avatar_url  TEXT
        );

        CREATE TABLE IF NOT EXISTS chats (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user1_id    INTEGER NOT NULL,
            user2_id    INTEGER NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            CHECK (user1_id < user2_id),
            UNIQUE (user1_id, user2_id)
        );

        CREATE INDEX IF NOT EXISTS idx_chats_user2
            ON chats(user2_id);

        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id     INTEGER NOT NULL REFERENCES chats(id),
            sender_id   INTEGER NOT NULL,
            content     TEXT NOT NULL CHECK (content <> ''),
            is_read     INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON messages(chat_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_unread
            ON messages(chat_id, is_read, sender_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
