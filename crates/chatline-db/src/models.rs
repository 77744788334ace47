//! Database row types. Kept apart from the domain models so the storage
//! layout can change on its own.

use chatline_types::models::{Message, MessageStatus};

pub struct MessageRow {
    pub id: String,
    pub conversation_id: i64,
    pub text: String,
    pub sender_id: String,
    pub timestamp: i64,
    pub is_from_me: bool,
    pub status: String,
}

impl MessageRow {
    pub fn from_message(conversation_id: i64, message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            conversation_id,
            text: message.text.clone(),
            sender_id: message.sender_id.clone(),
            timestamp: message.timestamp,
            is_from_me: message.is_from_me,
            status: message.status.as_str().to_string(),
        }
    }

    pub fn into_message(self) -> Message {
        Message {
            id: self.id,
            text: self.text,
            sender_id: self.sender_id,
            timestamp: self.timestamp,
            is_from_me: self.is_from_me,
            status: MessageStatus::from_str_lossy(&self.status),
        }
    }
}
