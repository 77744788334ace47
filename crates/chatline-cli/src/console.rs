//! Interactive line console over a connected repository.

use anyhow::Result;
use chatline_client::{ChatRepository, RepositoryError};
use chatline_db::Database;
use chatline_types::events::{ConnectionState, SessionEvent};
use chatline_types::models::{Conversation, ConversationType, Message, User};
use chrono::{DateTime, Local};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::commands::{Command, HELP};

/// What the console loop should do after a command.
enum Flow {
    Continue,
    Quit,
}

struct Console {
    repo: ChatRepository,
    db: Database,
    /// Conversation plain lines are sent to.
    open: Option<i64>,
    /// Highest arrival sequence already shown.
    last_seen: u64,
}

pub async fn run(
    repo: ChatRepository,
    db: Database,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) -> Result<()> {
    let mut console = Console {
        repo,
        db,
        open: None,
        last_seen: 0,
    };

    let connection = console.repo.shared_connection_state();
    let mut state = connection.observe();
    let received_state = console.repo.last_received();
    let mut received = received_state.observe();
    let conversation_messages = console.repo.conversation_messages();
    let mut opened = conversation_messages.observe();

    print_state(&state.get());
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let Some(command) = Command::parse(&line) else {
                    continue;
                };
                if let Flow::Quit = console.handle(command).await? {
                    break;
                }
            }
            Some(state) = state.changed() => print_state(&state),
            Some(arrival) = received.changed() => {
                if let Some(arrival) = arrival {
                    if arrival.sequence > console.last_seen {
                        console.last_seen = arrival.sequence;
                        console.notify(arrival.conversation_id, &arrival.message);
                    }
                }
            }
            Some(messages) = opened.changed() => console.store(&messages),
            Some(event) = events.recv() => match event {
                SessionEvent::JoinSuccess => println!("* joined"),
                SessionEvent::Error(message) => println!("! {}", message),
                other => debug!("Session event: {:?}", other),
            },
        }
    }

    console.repo.disconnect();
    Ok(())
}

impl Console {
    async fn handle(&mut self, command: Command) -> Result<Flow> {
        let outcome = match command {
            Command::Users => self.repo.get_all_users().await.map(|users| print_users(&users)),
            Command::Search(query) => self
                .repo
                .search_users(&query)
                .await
                .map(|users| print_users(&users)),
            Command::Conversations => self
                .repo
                .get_conversations()
                .await
                .map(|list| list.iter().for_each(print_conversation)),
            Command::Dm(recipient) => self
                .repo
                .create_private_conversation(&recipient)
                .await
                .map(|conversation| print_conversation(&conversation)),
            Command::Group { name, members } => self
                .repo
                .create_group_conversation(&name, &members)
                .await
                .map(|conversation| print_conversation(&conversation)),
            Command::Open(id) => self.open(id).await,
            Command::Say(text) => self.repo.send_message(&text).await,
            Command::Send(text) => match self.open {
                Some(id) => self.repo.send_message_to_conversation(id, &text).await,
                None => {
                    println!("no conversation open, use /open <id>");
                    Ok(())
                }
            },
            Command::Logout => {
                self.db.clear_auth()?;
                println!("logged out");
                return Ok(Flow::Quit);
            }
            Command::Quit => return Ok(Flow::Quit),
            Command::Help => {
                println!("{}", HELP);
                Ok(())
            }
            Command::Invalid(usage) => {
                println!("{}", usage);
                Ok(())
            }
        };

        if let Err(e) = outcome {
            println!("! {}", e);
        }
        Ok(Flow::Continue)
    }

    /// Fetch the history, or fall back to the local cache while offline.
    async fn open(&mut self, id: i64) -> Result<(), RepositoryError> {
        if !self.repo.is_connected() {
            let cached = self.db.cached_messages(id).unwrap_or_else(|e| {
                warn!("Failed to read cached messages for {}: {}", id, e);
                Vec::new()
            });
            println!("-- conversation {} (offline, {} cached) --", id, cached.len());
            cached.iter().for_each(print_message);
            return Ok(());
        }

        let messages = self.repo.get_conversation_messages(id).await?;
        self.open = Some(id);
        println!("-- conversation {} --", id);
        messages.iter().for_each(print_message);
        self.store(&messages);
        Ok(())
    }

    fn store(&self, messages: &[Message]) {
        let Some(id) = self.open else {
            return;
        };
        if messages.is_empty() {
            return;
        }
        if let Err(e) = self.db.cache_messages(id, messages) {
            warn!("Failed to cache messages for {}: {}", id, e);
        }
    }

    fn notify(&self, conversation_id: Option<i64>, message: &Message) {
        if message.is_from_me {
            return;
        }
        match conversation_id {
            Some(id) if Some(id) != self.open => {
                println!("* new message in conversation {} from {}", id, message.sender_id)
            }
            _ => print_message(message),
        }
    }
}

fn print_state(state: &ConnectionState) {
    match state {
        ConnectionState::Disconnected => println!("* disconnected"),
        ConnectionState::Connecting => println!("* connecting..."),
        ConnectionState::Connected => println!("* connected"),
        ConnectionState::Error(reason) => println!("* connection error: {}", reason),
    }
}

fn print_users(users: &[User]) {
    if users.is_empty() {
        println!("(no users)");
    }
    for user in users {
        let presence = if user.is_online { "online" } else { "offline" };
        println!("  {} [{}] {}", user.id, presence, user.username);
    }
}

fn print_conversation(conversation: &Conversation) {
    let kind = match conversation.kind {
        ConversationType::Private => "dm",
        ConversationType::Group => "group",
    };
    let last = conversation
        .last_message
        .as_ref()
        .map(|last| format!(" | {}: {}", last.sender, last.content))
        .unwrap_or_default();
    println!(
        "  #{} {} {} ({} members){}",
        conversation.id, kind, conversation.name, conversation.member_count, last
    );
}

fn print_message(message: &Message) {
    let sender = if message.is_from_me { "me" } else { message.sender_id.as_str() };
    println!("  [{}] {}: {}", clock(message.timestamp), sender, message.text);
}

fn clock(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|t| t.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string())
}
