use crate::api::{ConversationDto, MessageDto};

/// Connection state as shown to the UI.
///
/// Driven only by transport lifecycle callbacks. Reconnection attempts are
/// made by the transport and are not counted here.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

/// Typed events produced by a realtime session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Transport-level connect (also fired after each automatic reconnect)
    Connected,

    /// Transport-level disconnect
    Disconnected,

    /// Server acknowledged the `join` greeting with `success: true`
    JoinSuccess,

    /// Transport error or server-sent `error` event
    Error(String),

    /// Full replacement of the legacy broadcast history
    MessageHistory(Vec<MessageDto>),

    /// A legacy broadcast message
    NewMessage(MessageDto),

    /// A message posted to a conversation
    NewConversationMessage(MessageDto),

    /// A conversation was created or updated
    NewConversation(ConversationDto),
}

/// Socket.IO event names used on the realtime boundary.
pub mod wire {
    // client -> server, acknowledged
    pub const JOIN: &str = "join";
    pub const GET_ALL_USERS: &str = "getAllUsers";
    pub const SEARCH_USERS: &str = "searchUsers";
    pub const GET_CONVERSATIONS: &str = "getConversations";
    pub const CREATE_PRIVATE_CONVERSATION: &str = "createPrivateConversation";
    pub const CREATE_GROUP_CONVERSATION: &str = "createGroupConversation";
    pub const GET_CONVERSATION_MESSAGES: &str = "getConversationMessages";
    pub const SEND_MESSAGE_TO_CONVERSATION: &str = "sendMessageToConversation";
    pub const SEND_MESSAGE: &str = "sendMessage";

    // server -> client
    pub const MESSAGE_HISTORY: &str = "messageHistory";
    pub const NEW_MESSAGE: &str = "newMessage";
    pub const NEW_CONVERSATION_MESSAGE: &str = "newConversationMessage";
    pub const NEW_CONVERSATION: &str = "newConversation";
    pub const ERROR: &str = "error";
}
