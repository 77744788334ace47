//! Socket Session Manager.
//!
//! Owns at most one live realtime connection, greets the server with `join`
//! on every transport connect, turns inbound server events into typed
//! [`SessionEvent`]s and keeps the raw DTO stores in step with them.
//! Request/acknowledgement calls are bridged into plain async calls.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chatline_types::api::{
    ConversationDto, ConversationMessagesRequest, CreateGroupConversationRequest,
    CreatePrivateConversationRequest, JoinRequest, MessageDto, SearchUsersRequest,
    SendConversationMessageRequest, SendMessageRequest, UserDto,
};
use chatline_types::events::{ConnectionState, SessionEvent, wire};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TransportConfig;
use crate::error::SessionError;
use crate::parser::{self, AckReply};
use crate::transport::{Transport, TransportEvent};

/// Capacity of the per-event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Identity presented to the server on connect and in the `join` greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub token: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: None,
        }
    }

    pub fn with_token(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: Some(token.into()),
        }
    }
}

struct Connection {
    transport: Transport,
    /// Cancelled on disconnect; every store write checks it.
    cancel: CancellationToken,
}

/// Realtime session. Clones share the same connection and stores.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: TransportConfig,
    connection: Mutex<Option<Connection>>,
    username: watch::Sender<Option<String>>,
    /// Conversation whose messages are being shown, if any.
    active_conversation: Mutex<Option<i64>>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<SessionEvent>,

    messages: watch::Sender<Vec<MessageDto>>,
    conversations: watch::Sender<Vec<ConversationDto>>,
    users: watch::Sender<Vec<UserDto>>,
    conversation_messages: watch::Sender<Vec<MessageDto>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl Session {
    pub fn new(config: TransportConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SessionInner {
                config,
                connection: Mutex::new(None),
                username: watch::Sender::new(None),
                active_conversation: Mutex::new(None),
                state: watch::Sender::new(ConnectionState::Disconnected),
                events,
                messages: watch::Sender::new(Vec::new()),
                conversations: watch::Sender::new(Vec::new()),
                users: watch::Sender::new(Vec::new()),
                conversation_messages: watch::Sender::new(Vec::new()),
            }),
        }
    }

    // -- Lifecycle --

    /// Open a connection and return its event stream.
    ///
    /// Any live connection is torn down first. Must be called from within a
    /// tokio runtime; connection progress is reported on the stream and in
    /// [`Session::connection_state`].
    pub fn connect(
        &self,
        server_url: &str,
        credentials: Credentials,
    ) -> mpsc::UnboundedReceiver<SessionEvent> {
        self.disconnect();

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        info!("Connecting to {} as {}", server_url, credentials.username);

        self.inner
            .username
            .send_replace(Some(credentials.username.clone()));
        self.inner.state.send_replace(ConnectionState::Connecting);

        let auth = credentials
            .token
            .as_ref()
            .map(|token| json!({ "token": token }));

        let (transport, transport_events) =
            match Transport::open(server_url, auth, self.inner.config.clone()) {
                Ok(opened) => opened,
                Err(e) => {
                    let message = e.to_string();
                    error!("Cannot connect: {}", message);
                    self.inner
                        .state
                        .send_replace(ConnectionState::Error(message.clone()));
                    self.publish(&events_tx, SessionEvent::Error(message));
                    return events_rx;
                }
            };

        let cancel = CancellationToken::new();
        *self.lock_connection() = Some(Connection {
            transport: transport.clone(),
            cancel: cancel.clone(),
        });

        let session = self.clone();
        tokio::spawn(async move {
            session
                .run(transport, transport_events, events_tx, credentials, cancel)
                .await;
        });

        events_rx
    }

    /// Tear down the transport, clear every store and return to `Disconnected`.
    /// Safe to call at any time, any number of times.
    pub fn disconnect(&self) {
        let previous = self.lock_connection().take();

        if let Some(connection) = previous {
            info!("Disconnecting");
            // Cancel before clearing so racing writes see the token inside the lock.
            connection.cancel.cancel();
            connection.transport.close();
        }

        *self.lock_active() = None;
        self.inner.username.send_if_modified(|name| name.take().is_some());
        clear(&self.inner.messages);
        clear(&self.inner.conversations);
        clear(&self.inner.users);
        clear(&self.inner.conversation_messages);
        self.inner
            .state
            .send_if_modified(|state| replace_if_changed(state, ConnectionState::Disconnected));
    }

    /// Point-in-time transport state; guards outbound calls.
    pub fn is_connected(&self) -> bool {
        self.lock_connection()
            .as_ref()
            .is_some_and(|connection| connection.transport.is_connected())
    }

    /// Reactive connection state for display.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn current_username(&self) -> Option<String> {
        self.inner.username.borrow().clone()
    }

    /// Every event of every connection, in delivery order.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    // -- Raw stores --

    pub fn incoming_messages(&self) -> watch::Receiver<Vec<MessageDto>> {
        self.inner.messages.subscribe()
    }

    pub fn conversations(&self) -> watch::Receiver<Vec<ConversationDto>> {
        self.inner.conversations.subscribe()
    }

    pub fn users(&self) -> watch::Receiver<Vec<UserDto>> {
        self.inner.users.subscribe()
    }

    pub fn conversation_messages(&self) -> watch::Receiver<Vec<MessageDto>> {
        self.inner.conversation_messages.subscribe()
    }

    pub fn active_conversation(&self) -> Option<i64> {
        *self.lock_active()
    }

    // -- Requests --

    pub async fn get_all_users(&self) -> Result<Vec<UserDto>, SessionError> {
        let (transport, cancel) = self.live()?;
        let reply = request(&transport, wire::GET_ALL_USERS, json!({}), false).await?;
        let users = parser::parse_users(reply.array("users")?);
        debug!("Fetched {} users", users.len());
        self.write(&cancel, &self.inner.users, |store| *store = users.clone());
        Ok(users)
    }

    pub async fn search_users(&self, query: &str) -> Result<Vec<UserDto>, SessionError> {
        let (transport, cancel) = self.live()?;
        let payload = SearchUsersRequest {
            query: query.to_string(),
        };
        let reply = request(&transport, wire::SEARCH_USERS, to_payload(&payload), false).await?;
        let users = parser::parse_users(reply.array("users")?);
        self.write(&cancel, &self.inner.users, |store| *store = users.clone());
        Ok(users)
    }

    pub async fn get_conversations(&self) -> Result<Vec<ConversationDto>, SessionError> {
        let (transport, cancel) = self.live()?;
        let reply = request(&transport, wire::GET_CONVERSATIONS, json!({}), false).await?;
        let conversations = parser::parse_conversations(reply.array("conversations")?);
        debug!("Fetched {} conversations", conversations.len());
        self.write(&cancel, &self.inner.conversations, |store| {
            *store = conversations.clone()
        });
        Ok(conversations)
    }

    pub async fn create_private_conversation(
        &self,
        recipient_username: &str,
    ) -> Result<ConversationDto, SessionError> {
        let (transport, _) = self.live()?;
        let payload = CreatePrivateConversationRequest {
            recipient_username: recipient_username.to_string(),
        };
        let reply = request(
            &transport,
            wire::CREATE_PRIVATE_CONVERSATION,
            to_payload(&payload),
            false,
        )
        .await?;
        conversation_from(&reply)
    }

    pub async fn create_group_conversation(
        &self,
        name: &str,
        member_usernames: &[String],
    ) -> Result<ConversationDto, SessionError> {
        let (transport, _) = self.live()?;
        let payload = CreateGroupConversationRequest {
            name: name.to_string(),
            member_usernames: member_usernames.to_vec(),
        };
        let reply = request(
            &transport,
            wire::CREATE_GROUP_CONVERSATION,
            to_payload(&payload),
            false,
        )
        .await?;
        conversation_from(&reply)
    }

    /// Fetch a conversation's history and make it the active conversation.
    pub async fn get_conversation_messages(
        &self,
        conversation_id: i64,
    ) -> Result<Vec<MessageDto>, SessionError> {
        let (transport, cancel) = self.live()?;
        let previous = self.lock_active().replace(conversation_id);

        let payload = ConversationMessagesRequest { conversation_id };
        let fetched: Result<Vec<MessageDto>, SessionError> = async {
            let reply = request(
                &transport,
                wire::GET_CONVERSATION_MESSAGES,
                to_payload(&payload),
                false,
            )
            .await?;
            Ok(parser::parse_messages(reply.array("messages")?))
        }
        .await;

        let mut messages = match fetched {
            Ok(messages) => messages,
            Err(e) => {
                // Give the conversation back unless a newer open took over.
                let mut active = self.lock_active();
                if *active == Some(conversation_id) {
                    *active = previous;
                }
                return Err(e);
            }
        };
        for message in &mut messages {
            message.conversation_id.get_or_insert(conversation_id);
        }

        // A newer open of another conversation wins.
        if self.active_conversation() == Some(conversation_id) {
            self.write(&cancel, &self.inner.conversation_messages, |store| {
                *store = messages.clone()
            });
        }
        Ok(messages)
    }

    pub async fn send_message_to_conversation(
        &self,
        conversation_id: i64,
        content: &str,
    ) -> Result<(), SessionError> {
        let (transport, _) = self.live()?;
        let payload = SendConversationMessageRequest {
            conversation_id,
            content: content.to_string(),
        };
        request(
            &transport,
            wire::SEND_MESSAGE_TO_CONVERSATION,
            to_payload(&payload),
            false,
        )
        .await?;
        Ok(())
    }

    /// Legacy broadcast. A bare ack counts as success.
    pub async fn send_message(&self, content: &str) -> Result<(), SessionError> {
        let (transport, _) = self.live()?;
        let payload = SendMessageRequest {
            content: content.to_string(),
        };
        request(&transport, wire::SEND_MESSAGE, to_payload(&payload), true).await?;
        Ok(())
    }

    // -- Internals --

    /// Drive one connection until it is cancelled or the transport stops.
    async fn run(
        self,
        transport: Transport,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        events: mpsc::UnboundedSender<SessionEvent>,
        credentials: Credentials,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = transport_events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                TransportEvent::Connected => {
                    self.set_state(&cancel, ConnectionState::Connected);
                    self.publish_guarded(&cancel, &events, SessionEvent::Connected);

                    let session = self.clone();
                    let transport = transport.clone();
                    let credentials = credentials.clone();
                    let events = events.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        session.join(&transport, &credentials, &events, &cancel).await;
                    });
                }
                TransportEvent::Disconnected { reason } => {
                    debug!("Transport disconnected: {}", reason);
                    self.set_state(&cancel, ConnectionState::Disconnected);
                    self.publish_guarded(&cancel, &events, SessionEvent::Disconnected);
                }
                TransportEvent::ConnectError(message) => {
                    error!("Connection error: {}", message);
                    self.set_state(&cancel, ConnectionState::Error(message.clone()));
                    self.publish_guarded(&cancel, &events, SessionEvent::Error(message));
                }
                TransportEvent::ReconnectFailed => {
                    warn!("Transport gave up reconnecting");
                }
                TransportEvent::Event { name, args } => {
                    self.on_server_event(&name, &args, &events, &cancel);
                }
            }
        }

        debug!("Session event loop stopped");
    }

    /// Greet the server. A failed join is logged and never changes the state.
    async fn join(
        &self,
        transport: &Transport,
        credentials: &Credentials,
        events: &mpsc::UnboundedSender<SessionEvent>,
        cancel: &CancellationToken,
    ) {
        let payload = JoinRequest {
            username: credentials.username.clone(),
            token: credentials.token.clone(),
        };

        match request(transport, wire::JOIN, to_payload(&payload), false).await {
            Ok(_) => {
                info!("Joined as {}", credentials.username);
                self.publish_guarded(cancel, events, SessionEvent::JoinSuccess);
            }
            Err(e) => warn!("Join failed for {}: {}", credentials.username, e),
        }
    }

    fn on_server_event(
        &self,
        name: &str,
        args: &[Value],
        events: &mpsc::UnboundedSender<SessionEvent>,
        cancel: &CancellationToken,
    ) {
        let Some(event) = parser::decode_event(name, args) else {
            debug!("Unhandled server event {}", name);
            return;
        };

        match &event {
            SessionEvent::MessageHistory(messages) => {
                debug!("Received history of {} messages", messages.len());
                self.write(cancel, &self.inner.messages, |store| *store = messages.clone());
            }
            SessionEvent::NewMessage(message) => {
                self.write(cancel, &self.inner.messages, |store| store.push(message.clone()));
            }
            SessionEvent::NewConversationMessage(message) => {
                let active = self.active_conversation();
                let belongs = match message.conversation_id {
                    None => true,
                    Some(id) => active == Some(id),
                };
                if belongs {
                    self.write(cancel, &self.inner.conversation_messages, |store| {
                        store.push(message.clone())
                    });
                } else {
                    debug!(
                        "Message for conversation {:?} while {:?} is open",
                        message.conversation_id, active
                    );
                }
            }
            SessionEvent::NewConversation(conversation) => {
                self.write(cancel, &self.inner.conversations, |store| {
                    match store.iter_mut().find(|existing| existing.id == conversation.id) {
                        Some(existing) => *existing = conversation.clone(),
                        None => store.push(conversation.clone()),
                    }
                });
            }
            SessionEvent::Error(message) => error!("Server error: {}", message),
            _ => {}
        }

        self.publish_guarded(cancel, events, event);
    }

    /// Transport of the live connection, if it is connected right now.
    fn live(&self) -> Result<(Transport, CancellationToken), SessionError> {
        match self.lock_connection().as_ref() {
            Some(connection) if connection.transport.is_connected() => {
                Ok((connection.transport.clone(), connection.cancel.clone()))
            }
            _ => Err(SessionError::NotConnected),
        }
    }

    /// Store write that is dropped once the connection has been cancelled.
    fn write<T>(
        &self,
        cancel: &CancellationToken,
        store: &watch::Sender<T>,
        update: impl FnOnce(&mut T),
    ) {
        store.send_if_modified(|value| {
            if cancel.is_cancelled() {
                return false;
            }
            update(value);
            true
        });
    }

    fn set_state(&self, cancel: &CancellationToken, state: ConnectionState) {
        self.inner.state.send_if_modified(|current| {
            !cancel.is_cancelled() && replace_if_changed(current, state)
        });
    }

    fn publish(&self, events: &mpsc::UnboundedSender<SessionEvent>, event: SessionEvent) {
        let _ = self.inner.events.send(event.clone());
        let _ = events.send(event);
    }

    fn publish_guarded(
        &self,
        cancel: &CancellationToken,
        events: &mpsc::UnboundedSender<SessionEvent>,
        event: SessionEvent,
    ) {
        if !cancel.is_cancelled() {
            self.publish(events, event);
        }
    }

    /// Publish on the broadcast channel only, as a server event would.
    #[cfg(test)]
    pub(crate) fn broadcast(&self, event: SessionEvent) {
        let _ = self.inner.events.send(event);
    }

    fn lock_connection(&self) -> MutexGuard<'_, Option<Connection>> {
        self.inner
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<i64>> {
        self.inner
            .active_conversation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// One emit-with-ack exchange: exactly one success or failure per call.
async fn request(
    transport: &Transport,
    event: &str,
    payload: Value,
    default_success: bool,
) -> Result<AckReply, SessionError> {
    let pending = transport.emit_with_ack(event, payload).await?;
    let args = pending.await.map_err(|_| SessionError::Closed)?;
    AckReply::parse(args, default_success).into_result()
}

fn to_payload<T: Serialize>(payload: &T) -> Value {
    json!(payload)
}

fn conversation_from(reply: &AckReply) -> Result<ConversationDto, SessionError> {
    parser::parse_conversation(reply.field("conversation")?).map_err(|e| {
        warn!("Bad conversation in acknowledgement: {}", e);
        SessionError::Malformed("conversation")
    })
}

fn clear<T>(store: &watch::Sender<Vec<T>>) {
    store.send_if_modified(|items| {
        let had_items = !items.is_empty();
        items.clear();
        had_items
    });
}

fn replace_if_changed<T: PartialEq>(current: &mut T, next: T) -> bool {
    if *current == next {
        return false;
    }
    *current = next;
    true
}
