use crate::Database;
use crate::models::MessageRow;
use anyhow::Result;
use chatline_types::models::Message;
use rusqlite::Connection;
use tracing::debug;

pub const KEY_JWT_TOKEN: &str = "jwt_token";
pub const KEY_USERNAME: &str = "username";
pub const KEY_USER_ID: &str = "user_id";

impl Database {
    // -- Auth state --

    pub fn save_token(&self, token: &str) -> Result<()> {
        self.with_conn(|conn| set_value(conn, KEY_JWT_TOKEN, token))
    }

    pub fn token(&self) -> Result<Option<String>> {
        self.with_conn(|conn| get_value(conn, KEY_JWT_TOKEN))
    }

    pub fn save_user_info(&self, user_id: i64, username: &str) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            set_value(&tx, KEY_USER_ID, &user_id.to_string())?;
            set_value(&tx, KEY_USERNAME, username)?;
            tx.commit()?;
            Ok(())
        })
    }

    pub fn username(&self) -> Result<Option<String>> {
        self.with_conn(|conn| get_value(conn, KEY_USERNAME))
    }

    /// `None` when absent or unreadable.
    pub fn user_id(&self) -> Result<Option<i64>> {
        let raw = self.with_conn(|conn| get_value(conn, KEY_USER_ID))?;
        Ok(raw.and_then(|id| id.parse().ok()))
    }

    pub fn is_logged_in(&self) -> Result<bool> {
        Ok(self.token()?.is_some())
    }

    /// Forget token, username and user id.
    pub fn clear_auth(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM settings WHERE key IN (?1, ?2, ?3)",
                (KEY_JWT_TOKEN, KEY_USERNAME, KEY_USER_ID),
            )?;
            Ok(())
        })
    }

    // -- Message cache --

    /// Insert or replace by message id.
    pub fn cache_messages(&self, conversation_id: i64, messages: &[Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }

        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR REPLACE INTO messages
                        (id, conversation_id, text, sender_id, timestamp, is_from_me, status)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )?;
                for message in messages {
                    let row = MessageRow::from_message(conversation_id, message);
                    stmt.execute(rusqlite::params![
                        row.id,
                        row.conversation_id,
                        row.text,
                        row.sender_id,
                        row.timestamp,
                        row.is_from_me,
                        row.status,
                    ])?;
                }
            }
            tx.commit()?;
            debug!("Cached {} messages for conversation {}", messages.len(), conversation_id);
            Ok(())
        })
    }

    /// Oldest first.
    pub fn cached_messages(&self, conversation_id: i64) -> Result<Vec<Message>> {
        let rows = self.with_conn(|conn| query_messages(conn, conversation_id))?;
        Ok(rows.into_iter().map(MessageRow::into_message).collect())
    }
}

fn set_value(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, value),
    )?;
    Ok(())
}

fn get_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(value)
}

fn query_messages(conn: &Connection, conversation_id: i64) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, text, sender_id, timestamp, is_from_me, status
         FROM messages
         WHERE conversation_id = ?1
         ORDER BY timestamp ASC",
    )?;

    let rows = stmt
        .query_map([conversation_id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                text: row.get(2)?,
                sender_id: row.get(3)?,
                timestamp: row.get(4)?,
                is_from_me: row.get(5)?,
                status: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatline_types::models::MessageStatus;

    fn message(id: &str, timestamp: i64, text: &str) -> Message {
        Message {
            id: id.to_string(),
            text: text.to_string(),
            sender_id: "bob".to_string(),
            timestamp,
            is_from_me: false,
            status: MessageStatus::Sent,
        }
    }

    #[test]
    fn auth_state_round_trip() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.is_logged_in().unwrap());
        assert_eq!(db.user_id().unwrap(), None);

        db.save_token("jwt").unwrap();
        db.save_user_info(12, "alice").unwrap();
        db.save_token("jwt-2").unwrap();

        assert!(db.is_logged_in().unwrap());
        assert_eq!(db.token().unwrap().as_deref(), Some("jwt-2"));
        assert_eq!(db.username().unwrap().as_deref(), Some("alice"));
        assert_eq!(db.user_id().unwrap(), Some(12));

        db.clear_auth().unwrap();
        assert!(!db.is_logged_in().unwrap());
        assert_eq!(db.username().unwrap(), None);
        assert_eq!(db.user_id().unwrap(), None);
    }

    #[test]
    fn cached_messages_are_ordered_and_replaced() {
        let db = Database::open_in_memory().unwrap();
        db.cache_messages(7, &[message("b", 200, "second"), message("a", 100, "first")])
            .unwrap();
        db.cache_messages(8, &[message("c", 50, "elsewhere")]).unwrap();
        db.cache_messages(7, &[message("b", 200, "second, edited")]).unwrap();

        let cached = db.cached_messages(7).unwrap();
        let ids: Vec<_> = cached.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(cached[1].text, "second, edited");
        assert_eq!(cached[1].status, MessageStatus::Sent);
        assert!(db.cached_messages(9).unwrap().is_empty());
    }
}
