//! Defensive decoding of loosely typed server payloads.
//!
//! The server is inconsistent about field names and types, so every accessor
//! here accepts the shapes that have been observed in the wild. Parsing is
//! stateless: one payload in, one typed value out. List parsing never fails
//! as a whole; malformed elements are logged and skipped.

use chatline_types::api::{ConversationDto, LastMessageDto, MessageDto, UserDto};
use chatline_types::events::{SessionEvent, wire};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::error::{SessionError, UNKNOWN_ERROR};

/// Sender shown for legacy broadcast messages that do not name one.
pub const UNKNOWN_SENDER: &str = "Unknown";

/// Text of an `error` event that carries nothing readable.
pub const SERVER_ERROR: &str = "server error";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expected a JSON object")]
    NotAnObject,

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid field `{0}`")]
    InvalidField(&'static str),
}

type Object = Map<String, Value>;

/// Translate one inbound server event into a [`SessionEvent`].
///
/// Returns `None` for events this client does not handle and for payloads
/// that cannot be salvaged (logged).
pub fn decode_event(name: &str, args: &[Value]) -> Option<SessionEvent> {
    let payload = args.first();

    match name {
        wire::MESSAGE_HISTORY => {
            let items = payload.and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
            Some(SessionEvent::MessageHistory(parse_legacy_messages(items)))
        }
        wire::NEW_MESSAGE => match payload.map(parse_legacy_message) {
            Some(Ok(message)) => Some(SessionEvent::NewMessage(message)),
            Some(Err(e)) => {
                warn!("Skipping {} payload: {}", name, e);
                None
            }
            None => None,
        },
        wire::NEW_CONVERSATION_MESSAGE => match payload.map(parse_message) {
            Some(Ok(message)) => Some(SessionEvent::NewConversationMessage(message)),
            Some(Err(e)) => {
                warn!("Skipping {} payload: {}", name, e);
                None
            }
            None => None,
        },
        wire::NEW_CONVERSATION => match payload.map(parse_conversation) {
            Some(Ok(conversation)) => Some(SessionEvent::NewConversation(conversation)),
            Some(Err(e)) => {
                warn!("Skipping {} payload: {}", name, e);
                None
            }
            None => None,
        },
        wire::ERROR => Some(SessionEvent::Error(error_text(payload))),
        _ => None,
    }
}

/// `error` events carry `{message}` or a bare string.
pub fn error_text(payload: Option<&Value>) -> String {
    match payload {
        Some(Value::Object(map)) => map
            .get("message")
            .and_then(coerce_string)
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
        Some(Value::String(message)) if !message.is_empty() => message.clone(),
        Some(other @ (Value::Number(_) | Value::Bool(_) | Value::Array(_))) => other.to_string(),
        _ => SERVER_ERROR.to_string(),
    }
}

// -- Messages --

/// Conversation message: text and sender are required.
pub fn parse_message(value: &Value) -> Result<MessageDto, ParseError> {
    let obj = value.as_object().ok_or(ParseError::NotAnObject)?;

    let content = string_field(obj, &["content", "text"]).ok_or(ParseError::MissingField("content"))?;
    let sender = string_field(obj, &["sender", "senderId"]).ok_or(ParseError::MissingField("sender"))?;

    Ok(MessageDto {
        id: message_id(obj),
        content,
        sender,
        sent_at: message_timestamp(obj),
        conversation_id: int_field(obj, "conversationId"),
    })
}

/// Legacy broadcast message: every field has a fallback.
pub fn parse_legacy_message(value: &Value) -> Result<MessageDto, ParseError> {
    let obj = value.as_object().ok_or(ParseError::NotAnObject)?;

    Ok(MessageDto {
        id: message_id(obj),
        content: string_field(obj, &["content", "text"]).unwrap_or_default(),
        sender: string_field(obj, &["sender", "senderId"])
            .unwrap_or_else(|| UNKNOWN_SENDER.to_string()),
        sent_at: message_timestamp(obj),
        conversation_id: int_field(obj, "conversationId"),
    })
}

pub fn parse_messages(items: &[Value]) -> Vec<MessageDto> {
    parse_list(items, "message", parse_message)
}

pub fn parse_legacy_messages(items: &[Value]) -> Vec<MessageDto> {
    parse_list(items, "message", parse_legacy_message)
}

/// Server ids are strings or numbers; a missing id gets a fresh UUID, so the
/// same payload parsed twice yields two different ids.
fn message_id(obj: &Object) -> String {
    obj.get("id")
        .and_then(coerce_string)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn message_timestamp(obj: &Object) -> i64 {
    let raw = ["sentAt", "timestamp"]
        .iter()
        .find_map(|key| obj.get(*key).filter(|v| !v.is_null()));
    parse_timestamp(raw)
}

/// Resolve a wire timestamp to epoch milliseconds.
///
/// Accepts a non-zero number, a numeric string, or an ISO-8601 date (with or
/// without offset; offset-less dates are UTC). Anything else is "now".
pub fn parse_timestamp(value: Option<&Value>) -> i64 {
    let parsed = match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .filter(|millis| *millis != 0),
        Some(Value::String(s)) => parse_timestamp_str(s.trim()),
        _ => None,
    };
    parsed.unwrap_or_else(|| Utc::now().timestamp_millis())
}

fn parse_timestamp_str(s: &str) -> Option<i64> {
    if s.is_empty() {
        return None;
    }
    if let Ok(millis) = s.parse::<i64>() {
        return (millis != 0).then_some(millis);
    }
    if let Ok(date) = DateTime::parse_from_rfc3339(s) {
        return Some(date.timestamp_millis());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().timestamp_millis())
}

// -- Users & conversations --

pub fn parse_user(value: &Value) -> Result<UserDto, ParseError> {
    let obj = value.as_object().ok_or(ParseError::NotAnObject)?;

    Ok(UserDto {
        id: required_int(obj, "id")?,
        username: required_string(obj, "username")?,
        is_online: obj.get("isOnline").and_then(coerce_bool).unwrap_or(false),
    })
}

pub fn parse_users(items: &[Value]) -> Vec<UserDto> {
    parse_list(items, "user", parse_user)
}

/// A malformed `lastMessage` makes the whole conversation malformed.
pub fn parse_conversation(value: &Value) -> Result<ConversationDto, ParseError> {
    let obj = value.as_object().ok_or(ParseError::NotAnObject)?;

    let last_message = match obj.get("lastMessage") {
        None | Some(Value::Null) => None,
        Some(Value::Object(last)) => Some(LastMessageDto {
            content: required_string(last, "content")?,
            sender: required_string(last, "sender")?,
            sent_at: required_string(last, "sentAt")?,
        }),
        Some(_) => return Err(ParseError::InvalidField("lastMessage")),
    };

    let member_count = match obj.get("memberCount") {
        None | Some(Value::Null) => 0,
        Some(raw) => coerce_int(raw)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or(ParseError::InvalidField("memberCount"))?,
    };

    Ok(ConversationDto {
        id: required_int(obj, "id")?,
        kind: required_string(obj, "type")?,
        name: required_string(obj, "name")?,
        member_count,
        created_at: required_string(obj, "createdAt")?,
        last_message,
    })
}

pub fn parse_conversations(items: &[Value]) -> Vec<ConversationDto> {
    parse_list(items, "conversation", parse_conversation)
}

fn parse_list<T>(
    items: &[Value],
    what: &str,
    parse: impl Fn(&Value) -> Result<T, ParseError>,
) -> Vec<T> {
    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| match parse(item) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!("Skipping {} at index {}: {}", what, index, e);
                None
            }
        })
        .collect()
}

// -- Acknowledgements --

/// Decoded `{success, ...payload | error}` acknowledgement.
#[derive(Debug, Clone)]
pub struct AckReply {
    pub success: bool,
    body: Object,
}

impl AckReply {
    /// `default_success` applies when the ack omits `success` (or is not an object).
    pub fn parse(args: Vec<Value>, default_success: bool) -> Self {
        let body = match args.into_iter().next() {
            Some(Value::Object(map)) => map,
            _ => Object::new(),
        };
        let success = body
            .get("success")
            .and_then(coerce_bool)
            .unwrap_or(default_success);
        Self { success, body }
    }

    pub fn error(&self) -> Option<String> {
        self.body
            .get("error")
            .and_then(coerce_string)
            .filter(|error| !error.is_empty())
    }

    /// Turn `success: false` into [`SessionError::Rejected`].
    pub fn into_result(self) -> Result<Self, SessionError> {
        if self.success {
            Ok(self)
        } else {
            Err(SessionError::Rejected(
                self.error().unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
            ))
        }
    }

    /// Array payload field, e.g. `users` or `messages`.
    pub fn array(&self, field: &'static str) -> Result<&[Value], SessionError> {
        self.body
            .get(field)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .ok_or(SessionError::Malformed(field))
    }

    pub fn field(&self, field: &'static str) -> Result<&Value, SessionError> {
        self.body
            .get(field)
            .filter(|value| !value.is_null())
            .ok_or(SessionError::Malformed(field))
    }
}

// -- Loose accessors --

fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

/// First present key wins.
fn string_field(obj: &Object, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| obj.get(*key).and_then(coerce_string))
}

fn int_field(obj: &Object, key: &str) -> Option<i64> {
    obj.get(key).and_then(coerce_int)
}

fn required_string(obj: &Object, key: &'static str) -> Result<String, ParseError> {
    match obj.get(key) {
        None | Some(Value::Null) => Err(ParseError::MissingField(key)),
        Some(raw) => coerce_string(raw).ok_or(ParseError::InvalidField(key)),
    }
}

fn required_int(obj: &Object, key: &'static str) -> Result<i64, ParseError> {
    match obj.get(key) {
        None | Some(Value::Null) => Err(ParseError::MissingField(key)),
        Some(raw) => coerce_int(raw).ok_or(ParseError::InvalidField(key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recent(millis: i64) -> bool {
        (Utc::now().timestamp_millis() - millis).abs() < 5_000
    }

    #[test]
    fn missing_sent_at_falls_back_to_now() {
        let message = parse_message(&json!({"id": 1, "content": "hi", "sender": "bob"})).unwrap();
        assert!(recent(message.sent_at));

        let message =
            parse_message(&json!({"content": "hi", "sender": "bob", "sentAt": "yesterday"}))
                .unwrap();
        assert!(recent(message.sent_at));

        let message = parse_message(&json!({"content": "hi", "sender": "bob", "sentAt": 0})).unwrap();
        assert!(recent(message.sent_at));
    }

    #[test]
    fn timestamp_accepts_numbers_and_iso_dates() {
        assert_eq!(parse_timestamp(Some(&json!(1700000000123i64))), 1700000000123);
        assert_eq!(parse_timestamp(Some(&json!("1700000000123"))), 1700000000123);
        assert_eq!(
            parse_timestamp(Some(&json!("2024-01-15T10:30:00.000Z"))),
            1705314600000
        );
        assert_eq!(
            parse_timestamp(Some(&json!("2024-01-15T12:30:00+02:00"))),
            1705314600000
        );
        // no offset is read as UTC
        assert_eq!(
            parse_timestamp(Some(&json!("2024-01-15T10:30:00.5"))),
            1705314600500
        );
    }

    #[test]
    fn missing_id_is_unique_per_parse() {
        let payload = json!({"content": "hi", "sender": "bob"});
        let first = parse_message(&payload).unwrap();
        let second = parse_message(&payload).unwrap();
        assert_ne!(first.id, second.id);
        assert!(Uuid::parse_str(&first.id).is_ok());
    }

    #[test]
    fn numeric_id_becomes_decimal_string() {
        let message = parse_message(&json!({"id": 42, "content": "hi", "sender": "bob"})).unwrap();
        assert_eq!(message.id, "42");
    }

    #[test]
    fn field_name_fallbacks() {
        let message = parse_message(&json!({
            "text": "hello",
            "senderId": "carol",
            "timestamp": 1700000000000i64,
            "conversationId": "7"
        }))
        .unwrap();
        assert_eq!(message.content, "hello");
        assert_eq!(message.sender, "carol");
        assert_eq!(message.sent_at, 1700000000000);
        assert_eq!(message.conversation_id, Some(7));
    }

    #[test]
    fn conversation_message_requires_content_and_sender() {
        assert_eq!(
            parse_message(&json!({"sender": "bob"})),
            Err(ParseError::MissingField("content"))
        );
        assert_eq!(
            parse_message(&json!({"content": "hi"})),
            Err(ParseError::MissingField("sender"))
        );
        assert_eq!(parse_message(&json!("hi")), Err(ParseError::NotAnObject));
    }

    #[test]
    fn legacy_message_is_lenient() {
        let message = parse_legacy_message(&json!({})).unwrap();
        assert_eq!(message.content, "");
        assert_eq!(message.sender, UNKNOWN_SENDER);
    }

    #[test]
    fn malformed_element_is_skipped() {
        let items = vec![
            json!({"id": 1, "content": "a", "sender": "x"}),
            json!({"id": 2, "sender": "x"}),
            json!({"id": 3, "content": "c", "sender": "y"}),
        ];
        let messages = parse_messages(&items);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "1");
        assert_eq!(messages[1].id, "3");

        let legacy = parse_legacy_messages(&[json!({"content": "a"}), json!(17), json!({})]);
        assert_eq!(legacy.len(), 2);
    }

    #[test]
    fn users_default_offline() {
        let users = parse_users(&[
            json!({"id": 1, "username": "alice", "isOnline": true}),
            json!({"id": "2", "username": "bob"}),
            json!({"username": "ghost"}),
        ]);
        assert_eq!(users.len(), 2);
        assert!(users[0].is_online);
        assert_eq!(users[1].id, 2);
        assert!(!users[1].is_online);
    }

    #[test]
    fn conversation_with_last_message() {
        let conversation = parse_conversation(&json!({
            "id": 7,
            "type": "group",
            "name": "team",
            "createdAt": "2024-01-15T10:30:00.000Z",
            "lastMessage": {"content": "hi", "sender": "bob", "sentAt": "2024-01-15T11:00:00.000Z"}
        }))
        .unwrap();
        assert_eq!(conversation.member_count, 0);
        assert_eq!(conversation.last_message.unwrap().sender, "bob");
    }

    #[test]
    fn malformed_last_message_drops_conversation() {
        let items = vec![
            json!({
                "id": 1, "type": "private", "name": "bob", "createdAt": "x",
                "lastMessage": {"content": "hi"}
            }),
            json!({"id": 2, "type": "private", "name": "carol", "createdAt": "x", "memberCount": 2}),
        ];
        let conversations = parse_conversations(&items);
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].id, 2);
        assert_eq!(conversations[0].member_count, 2);
    }

    #[test]
    fn error_event_accepts_object_or_string() {
        assert_eq!(error_text(Some(&json!({"message": "boom"}))), "boom");
        assert_eq!(error_text(Some(&json!("boom"))), "boom");
        assert_eq!(error_text(None), SERVER_ERROR);
        assert_eq!(error_text(Some(&json!(503))), "503");
    }

    #[test]
    fn decode_event_maps_known_events() {
        let event = decode_event(
            wire::NEW_CONVERSATION_MESSAGE,
            &[json!({"id": "m1", "content": "hi", "sender": "bob", "conversationId": 7})],
        );
        assert!(matches!(
            event,
            Some(SessionEvent::NewConversationMessage(ref m)) if m.conversation_id == Some(7)
        ));

        let event = decode_event(wire::MESSAGE_HISTORY, &[json!([{"content": "a"}, 5])]);
        assert!(matches!(event, Some(SessionEvent::MessageHistory(ref list)) if list.len() == 1));

        assert_eq!(decode_event("typing", &[json!({})]), None);
        assert_eq!(decode_event(wire::NEW_CONVERSATION_MESSAGE, &[json!({})]), None);
    }

    #[test]
    fn ack_success_defaults() {
        let reply = AckReply::parse(vec![json!({})], false);
        assert_eq!(
            reply.into_result().unwrap_err(),
            SessionError::Rejected(UNKNOWN_ERROR.to_string())
        );

        let reply = AckReply::parse(Vec::new(), true);
        assert!(reply.into_result().is_ok());

        let reply = AckReply::parse(vec![json!({"success": false, "error": "nope"})], true);
        assert_eq!(
            reply.into_result().unwrap_err(),
            SessionError::Rejected("nope".to_string())
        );
    }

    #[test]
    fn ack_missing_payload_is_malformed() {
        let reply = AckReply::parse(vec![json!({"success": true})], false);
        assert_eq!(reply.array("users").unwrap_err(), SessionError::Malformed("users"));
        assert_eq!(
            reply.field("conversation").unwrap_err(),
            SessionError::Malformed("conversation")
        );
    }
}
