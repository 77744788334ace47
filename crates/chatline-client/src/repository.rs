//! Repository Facade: validated async operations over one session.

use chatline_types::events::{ConnectionState, SessionEvent};
use chatline_types::models::{Conversation, Message, User};
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::config::TransportConfig;
use crate::error::RepositoryError;
use crate::mapper;
use crate::session::{Credentials, Session};
use crate::share::SharedState;
use crate::sync::{CacheSynchronizer, ReceivedMessage};

/// Shortest accepted user search, after trimming.
pub const MIN_SEARCH_QUERY_LEN: usize = 2;

pub type RepoResult<T> = Result<T, RepositoryError>;

/// Owns exactly one [`Session`] and the [`CacheSynchronizer`] feeding its
/// domain caches. Dropping the repository disconnects.
pub struct ChatRepository {
    session: Session,
    sync: CacheSynchronizer,
    messages: SharedState<Vec<Message>>,
    conversations: SharedState<Vec<Conversation>>,
    users: SharedState<Vec<User>>,
    conversation_messages: SharedState<Vec<Message>>,
    last_received: SharedState<Option<ReceivedMessage>>,
    connection_state: SharedState<ConnectionState>,
}

impl ChatRepository {
    /// Must be called from within a tokio runtime.
    pub fn new(config: TransportConfig) -> Self {
        let session = Session::new(config);
        let sync = CacheSynchronizer::start(&session);

        Self {
            messages: SharedState::with_default_grace(sync.messages()),
            conversations: SharedState::with_default_grace(sync.conversations()),
            users: SharedState::with_default_grace(sync.users()),
            conversation_messages: SharedState::with_default_grace(sync.conversation_messages()),
            last_received: SharedState::with_default_grace(sync.last_received()),
            connection_state: SharedState::with_default_grace(session.connection_state()),
            session,
            sync,
        }
    }

    // -- Connection --

    pub fn connect(
        &self,
        server_url: &str,
        username: &str,
    ) -> RepoResult<mpsc::UnboundedReceiver<SessionEvent>> {
        let username = non_blank(username, "username is required")?;
        Ok(self.open(server_url, Credentials::new(username)))
    }

    /// Reconnect with a stored token.
    pub fn connect_with_token(
        &self,
        server_url: &str,
        username: &str,
        token: &str,
    ) -> RepoResult<mpsc::UnboundedReceiver<SessionEvent>> {
        let username = non_blank(username, "username is required")?;
        let token = non_blank(token, "token is required")?;
        Ok(self.open(server_url, Credentials::with_token(username, token)))
    }

    fn open(
        &self,
        server_url: &str,
        credentials: Credentials,
    ) -> mpsc::UnboundedReceiver<SessionEvent> {
        self.sync.reset();
        self.session.connect(server_url, credentials)
    }

    pub fn disconnect(&self) {
        self.session.disconnect();
        self.sync.reset();
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.session.connection_state()
    }

    /// Connection state for display, shared across observers.
    pub fn shared_connection_state(&self) -> SharedState<ConnectionState> {
        self.connection_state.clone()
    }

    pub fn current_username(&self) -> Option<String> {
        self.session.current_username()
    }

    /// Every session event, for callers that need more than the caches.
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<SessionEvent> {
        self.session.subscribe()
    }

    // -- Users --

    pub async fn get_all_users(&self) -> RepoResult<Vec<User>> {
        let users = self.session.get_all_users().await?;
        Ok(mapper::users_to_domain(&users))
    }

    pub async fn search_users(&self, query: &str) -> RepoResult<Vec<User>> {
        let query = query.trim();
        if query.chars().count() < MIN_SEARCH_QUERY_LEN {
            debug!("Search query too short: {:?}", query);
            return Err(RepositoryError::Validation("search query is too short"));
        }
        let users = self.session.search_users(query).await?;
        Ok(mapper::users_to_domain(&users))
    }

    // -- Conversations --

    pub async fn get_conversations(&self) -> RepoResult<Vec<Conversation>> {
        let conversations = self.session.get_conversations().await?;
        Ok(mapper::conversations_to_domain(&conversations))
    }

    pub async fn create_private_conversation(
        &self,
        recipient_username: &str,
    ) -> RepoResult<Conversation> {
        let recipient = non_blank(recipient_username, "recipient is required")?;
        let conversation = self.session.create_private_conversation(recipient).await?;
        Ok(mapper::conversation_to_domain(&conversation))
    }

    pub async fn create_group_conversation(
        &self,
        name: &str,
        member_usernames: &[String],
    ) -> RepoResult<Conversation> {
        let name = non_blank(name, "group name is required")?;
        let members: Vec<String> = member_usernames
            .iter()
            .map(|member| member.trim())
            .filter(|member| !member.is_empty())
            .map(str::to_string)
            .collect();
        if members.is_empty() {
            return Err(RepositoryError::Validation("a group needs at least one member"));
        }

        let conversation = self.session.create_group_conversation(name, &members).await?;
        Ok(mapper::conversation_to_domain(&conversation))
    }

    // -- Messages --

    pub async fn get_conversation_messages(&self, conversation_id: i64) -> RepoResult<Vec<Message>> {
        let messages = self.session.get_conversation_messages(conversation_id).await?;
        let me = self.session.current_username();
        Ok(mapper::messages_to_domain(&messages, me.as_deref()))
    }

    pub async fn send_message_to_conversation(
        &self,
        conversation_id: i64,
        text: &str,
    ) -> RepoResult<()> {
        let text = non_blank(text, "message is empty")?;
        self.session
            .send_message_to_conversation(conversation_id, text)
            .await?;
        Ok(())
    }

    /// Legacy broadcast to everyone who joined.
    pub async fn send_message(&self, text: &str) -> RepoResult<()> {
        let text = non_blank(text, "message is empty")?;
        self.session.send_message(text).await?;
        Ok(())
    }

    // -- Caches --

    pub fn messages(&self) -> SharedState<Vec<Message>> {
        self.messages.clone()
    }

    pub fn conversations(&self) -> SharedState<Vec<Conversation>> {
        self.conversations.clone()
    }

    pub fn users(&self) -> SharedState<Vec<User>> {
        self.users.clone()
    }

    pub fn conversation_messages(&self) -> SharedState<Vec<Message>> {
        self.conversation_messages.clone()
    }

    pub fn last_received(&self) -> SharedState<Option<ReceivedMessage>> {
        self.last_received.clone()
    }

    /// Unshared view of the conversations cache.
    pub fn conversations_watch(&self) -> watch::Receiver<Vec<Conversation>> {
        self.sync.conversations()
    }

    pub fn conversation_messages_watch(&self) -> watch::Receiver<Vec<Message>> {
        self.sync.conversation_messages()
    }
}

impl Drop for ChatRepository {
    fn drop(&mut self) {
        self.session.disconnect();
    }
}

/// Trimmed input, or a validation error when nothing is left.
fn non_blank<'a>(value: &'a str, message: &'static str) -> RepoResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(RepositoryError::Validation(message))
    } else {
        Ok(trimmed)
    }
}
