use serde::{Deserialize, Serialize};

/// Delivery status of a message as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
    Error,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "SENT",
            Self::Delivered => "DELIVERED",
            Self::Read => "READ",
            Self::Error => "ERROR",
        }
    }

    /// Unknown values fall back to `Sent`.
    pub fn from_str_lossy(value: &str) -> Self {
        match value {
            "DELIVERED" => Self::Delivered,
            "READ" => Self::Read,
            "ERROR" => Self::Error,
            _ => Self::Sent,
        }
    }
}

/// A chat message as presented to the user.
///
/// `is_from_me` is never sent by the server. It is derived when the wire
/// message is mapped, by comparing `sender_id` with the local username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub text: String,
    pub sender_id: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub is_from_me: bool,
    pub status: MessageStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationType {
    Private,
    Group,
}

impl ConversationType {
    /// Anything that is not `"group"` (case-insensitive) is a private conversation.
    pub fn from_wire(value: &str) -> Self {
        if value.eq_ignore_ascii_case("group") {
            Self::Group
        } else {
            Self::Private
        }
    }
}

/// Denormalized snapshot of the latest message of a conversation.
/// Only refreshed when the conversation list is refetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessage {
    pub content: String,
    pub sender: String,
    pub sent_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub kind: ConversationType,
    pub name: String,
    pub member_count: u32,
    pub created_at: String,
    pub last_message: Option<LastMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub is_online: bool,
}
