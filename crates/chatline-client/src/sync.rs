//! Cache Synchronizer: session stores and events -> domain caches.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chatline_types::events::SessionEvent;
use chatline_types::models::{Conversation, Message, User};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::mapper;
use crate::session::Session;

/// Arrival notice for a single inbound message.
///
/// `sequence` increases by one per arrival, duplicates included, and has no
/// meaning on the server. Consumers compare it to the last one they saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub sequence: u64,
    pub message: Message,
    pub conversation_id: Option<i64>,
}

struct Caches {
    messages: watch::Sender<Vec<Message>>,
    conversations: watch::Sender<Vec<Conversation>>,
    users: watch::Sender<Vec<User>>,
    conversation_messages: watch::Sender<Vec<Message>>,
    last_received: watch::Sender<Option<ReceivedMessage>>,
    sequence: AtomicU64,
}

/// Single writer of the domain caches. Stops when dropped.
pub struct CacheSynchronizer {
    caches: Arc<Caches>,
    cancel: CancellationToken,
}

impl CacheSynchronizer {
    /// Subscribe to `session` and start republishing. Must be called from
    /// within a tokio runtime.
    pub fn start(session: &Session) -> Self {
        let caches = Arc::new(Caches {
            messages: watch::Sender::new(Vec::new()),
            conversations: watch::Sender::new(Vec::new()),
            users: watch::Sender::new(Vec::new()),
            conversation_messages: watch::Sender::new(Vec::new()),
            last_received: watch::Sender::new(None),
            sequence: AtomicU64::new(0),
        });
        let cancel = CancellationToken::new();

        // Subscribe before spawning so nothing published from here on is missed.
        let events = session.subscribe();
        tokio::spawn(run(session.clone(), caches.clone(), events, cancel.clone()));

        Self { caches, cancel }
    }

    pub fn messages(&self) -> watch::Receiver<Vec<Message>> {
        self.caches.messages.subscribe()
    }

    pub fn conversations(&self) -> watch::Receiver<Vec<Conversation>> {
        self.caches.conversations.subscribe()
    }

    pub fn users(&self) -> watch::Receiver<Vec<User>> {
        self.caches.users.subscribe()
    }

    pub fn conversation_messages(&self) -> watch::Receiver<Vec<Message>> {
        self.caches.conversation_messages.subscribe()
    }

    pub fn last_received(&self) -> watch::Receiver<Option<ReceivedMessage>> {
        self.caches.last_received.subscribe()
    }

    /// Empty every cache now. The arrival sequence keeps counting.
    pub fn reset(&self) {
        self.caches.messages.send_replace(Vec::new());
        self.caches.conversations.send_replace(Vec::new());
        self.caches.users.send_replace(Vec::new());
        self.caches.conversation_messages.send_replace(Vec::new());
        self.caches.last_received.send_replace(None);
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for CacheSynchronizer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    session: Session,
    caches: Arc<Caches>,
    mut events: tokio::sync::broadcast::Receiver<SessionEvent>,
    cancel: CancellationToken,
) {
    let mut messages = session.incoming_messages();
    let mut conversations = session.conversations();
    let mut users = session.users();
    let mut conversation_messages = session.conversation_messages();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Ok(()) = messages.changed() => {
                let mapped = {
                    let me = session.current_username();
                    mapper::messages_to_domain(&messages.borrow_and_update(), me.as_deref())
                };
                caches.messages.send_replace(mapped);
            }
            Ok(()) = conversations.changed() => {
                let mapped = mapper::conversations_to_domain(&conversations.borrow_and_update());
                caches.conversations.send_replace(mapped);
            }
            Ok(()) = users.changed() => {
                let mapped = mapper::users_to_domain(&users.borrow_and_update());
                caches.users.send_replace(mapped);
            }
            Ok(()) = conversation_messages.changed() => {
                let mapped = {
                    let me = session.current_username();
                    mapper::messages_to_domain(&conversation_messages.borrow_and_update(), me.as_deref())
                };
                caches.conversation_messages.send_replace(mapped);
            }
            event = events.recv() => match event {
                Ok(SessionEvent::NewMessage(dto) | SessionEvent::NewConversationMessage(dto)) => {
                    // Queued before a disconnect; the caches were already reset.
                    let Some(me) = session.current_username() else {
                        debug!("Dropping message {} received after disconnect", dto.id);
                        continue;
                    };
                    let sequence = caches.sequence.fetch_add(1, Ordering::Relaxed) + 1;
                    caches.last_received.send_replace(Some(ReceivedMessage {
                        sequence,
                        message: mapper::message_to_domain(&dto, Some(&me)),
                        conversation_id: dto.conversation_id,
                    }));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Cache synchronizer lagged, {} events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    debug!("Cache synchronizer stopped");
}
