use serde::{Deserialize, Serialize};

// -- Auth (REST) --

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Body of both `/auth/register` and `/auth/login` responses.
/// Every field is optional: the server has been seen omitting all of them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthResponse {
    pub access_token: Option<String>,
    pub user: Option<UserInfo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub id: i64,
    pub username: Option<String>,
}

/// What a successful login or registration leaves behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub token: String,
    pub user_id: i64,
    pub username: String,
}

impl AuthResponse {
    /// `None` without a usable token. A missing username falls back to the
    /// one that was submitted; a missing user id is 0.
    pub fn into_account(self, fallback_username: &str) -> Option<Account> {
        let token = self.access_token.filter(|token| !token.trim().is_empty())?;
        let user = self.user.unwrap_or_default();
        Some(Account {
            token,
            user_id: user.id,
            username: user
                .username
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| fallback_username.to_string()),
        })
    }
}

// -- Realtime requests --

#[derive(Debug, Clone, Serialize)]
pub struct JoinRequest {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchUsersRequest {
    pub query: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePrivateConversationRequest {
    pub recipient_username: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupConversationRequest {
    pub name: String,
    pub member_usernames: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessagesRequest {
    pub conversation_id: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendConversationMessageRequest {
    pub conversation_id: i64,
    pub content: String,
}

/// Legacy broadcast message, sent to everyone who joined.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest {
    pub content: String,
}

// -- Realtime payloads (already normalized by the client parser) --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDto {
    pub id: String,
    pub content: String,
    pub sender: String,
    /// Epoch milliseconds.
    pub sent_at: i64,
    pub conversation_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastMessageDto {
    pub content: String,
    pub sender: String,
    pub sent_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationDto {
    pub id: i64,
    /// `"private"` or `"group"`.
    pub kind: String,
    pub name: String,
    pub member_count: u32,
    pub created_at: String,
    pub last_message: Option<LastMessageDto>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDto {
    pub id: i64,
    pub username: String,
    pub is_online: bool,
}
