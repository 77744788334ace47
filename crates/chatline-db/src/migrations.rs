use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS settings (
            key         TEXT PRIMARY KEY,
            value       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id INTEGER NOT NULL,
            text            TEXT NOT NULL,
            sender_id       TEXT NOT NULL,
            timestamp       INTEGER NOT NULL,
            is_from_me      INTEGER NOT NULL DEFAULT 0,
            status          TEXT NOT NULL DEFAULT 'SENT'
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, timestamp);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
