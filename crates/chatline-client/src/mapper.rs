//! Wire DTO -> domain model.

use chatline_types::api::{ConversationDto, MessageDto, UserDto};
use chatline_types::models::{
    Conversation, ConversationType, LastMessage, Message, MessageStatus, User,
};

/// `is_from_me` compares the sender with the local username at mapping time.
/// Without a known username nothing is considered ours.
pub fn message_to_domain(dto: &MessageDto, current_username: Option<&str>) -> Message {
    Message {
        id: dto.id.clone(),
        text: dto.content.clone(),
        sender_id: dto.sender.clone(),
        timestamp: dto.sent_at,
        is_from_me: current_username.is_some_and(|me| me == dto.sender),
        status: MessageStatus::Sent,
    }
}

pub fn messages_to_domain(dtos: &[MessageDto], current_username: Option<&str>) -> Vec<Message> {
    dtos.iter()
        .map(|dto| message_to_domain(dto, current_username))
        .collect()
}

pub fn conversation_to_domain(dto: &ConversationDto) -> Conversation {
    Conversation {
        id: dto.id,
        kind: ConversationType::from_wire(&dto.kind),
        name: dto.name.clone(),
        member_count: dto.member_count,
        created_at: dto.created_at.clone(),
        last_message: dto.last_message.as_ref().map(|last| LastMessage {
            content: last.content.clone(),
            sender: last.sender.clone(),
            sent_at: last.sent_at.clone(),
        }),
    }
}

pub fn conversations_to_domain(dtos: &[ConversationDto]) -> Vec<Conversation> {
    dtos.iter().map(conversation_to_domain).collect()
}

pub fn user_to_domain(dto: &UserDto) -> User {
    User {
        id: dto.id,
        username: dto.username.clone(),
        is_online: dto.is_online,
    }
}

pub fn users_to_domain(dtos: &[UserDto]) -> Vec<User> {
    dtos.iter().map(user_to_domain).collect()
}
