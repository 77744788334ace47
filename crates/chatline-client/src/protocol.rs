//! Engine.IO v4 / Socket.IO v5 text packet codec.
//!
//! Every WebSocket text frame is one Engine.IO packet:
//!
//!   `0{handshake}` open, `1` close, `2` ping, `3` pong, `4<socket packet>` message
//!
//! and a Socket.IO packet inside a message is:
//!
//!   `<type>[/<namespace>,][<ack id>][json]`
//!
//! with type `0` connect, `1` disconnect, `2` event, `3` ack, `4` connect error.
//! Binary packets (`5`, `6`) are not used by this protocol and are rejected.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

pub const DEFAULT_NAMESPACE: &str = "/";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty packet")]
    Empty,

    #[error("unknown engine packet type {0:?}")]
    UnknownEngineType(char),

    #[error("unknown socket packet type {0:?}")]
    UnknownSocketType(char),

    #[error("unsupported packet: {0}")]
    Unsupported(&'static str),

    #[error("missing or invalid ack id")]
    InvalidAckId,

    #[error("event packet has no name")]
    MissingEventName,

    #[error("bad packet body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Engine.IO open handshake sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings.
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

impl Handshake {
    /// How long the client waits for the next server ping before treating
    /// the connection as dead.
    pub fn heartbeat_deadline(&self) -> Duration {
        Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let kind = text.chars().next().ok_or(ProtocolError::Empty)?;
        let body = &text[kind.len_utf8()..];

        match kind {
            '0' => Ok(Self::Open(serde_json::from_str(body)?)),
            '1' => Ok(Self::Close),
            // "2probe" / "3probe" only matter for transport upgrades
            '2' => Ok(Self::Ping),
            '3' => Ok(Self::Pong),
            '4' => Ok(Self::Message(body.to_string())),
            '5' => Ok(Self::Upgrade),
            '6' => Ok(Self::Noop),
            other => Err(ProtocolError::UnknownEngineType(other)),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Open(handshake) => format!("0{}", json!(handshake)),
            Self::Close => "1".to_string(),
            Self::Ping => "2".to_string(),
            Self::Pong => "3".to_string(),
            Self::Message(body) => format!("4{}", body),
            Self::Upgrade => "5".to_string(),
            Self::Noop => "6".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// Client: optional auth payload. Server: `{sid}`.
    Connect(Option<Value>),
    Disconnect,
    Event {
        id: Option<u64>,
        name: String,
        args: Vec<Value>,
    },
    Ack {
        id: u64,
        args: Vec<Value>,
    },
    ConnectError(String),
}

impl SocketPacket {
    pub fn event(name: &str, payload: Value, id: Option<u64>) -> Self {
        Self::Event {
            id,
            name: name.to_string(),
            args: vec![payload],
        }
    }

    /// Decode the body of an Engine.IO message. Returns the namespace and the packet.
    pub fn decode(text: &str) -> Result<(String, Self), ProtocolError> {
        let kind = text.chars().next().ok_or(ProtocolError::Empty)?;
        let mut rest = &text[kind.len_utf8()..];

        let mut namespace = DEFAULT_NAMESPACE;
        if rest.starts_with('/') {
            match rest.find(',') {
                Some(comma) => {
                    namespace = &rest[..comma];
                    rest = &rest[comma + 1..];
                }
                None => {
                    namespace = rest;
                    rest = "";
                }
            }
        }

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        let id = if digits > 0 {
            Some(
                rest[..digits]
                    .parse::<u64>()
                    .map_err(|_| ProtocolError::InvalidAckId)?,
            )
        } else {
            None
        };
        let body = &rest[digits..];

        let packet = match kind {
            '0' => {
                if body.is_empty() {
                    Self::Connect(None)
                } else {
                    Self::Connect(Some(serde_json::from_str(body)?))
                }
            }
            '1' => Self::Disconnect,
            '2' => {
                let mut args: Vec<Value> = serde_json::from_str(body)?;
                if args.is_empty() {
                    return Err(ProtocolError::MissingEventName);
                }
                let name = match args.remove(0) {
                    Value::String(name) => name,
                    _ => return Err(ProtocolError::MissingEventName),
                };
                Self::Event { id, name, args }
            }
            '3' => {
                let id = id.ok_or(ProtocolError::InvalidAckId)?;
                let args = if body.is_empty() {
                    Vec::new()
                } else {
                    serde_json::from_str(body)?
                };
                Self::Ack { id, args }
            }
            '4' => Self::ConnectError(connect_error_message(body)),
            '5' | '6' => return Err(ProtocolError::Unsupported("binary attachments")),
            other => return Err(ProtocolError::UnknownSocketType(other)),
        };

        Ok((namespace.to_string(), packet))
    }

    /// Encode for the default namespace.
    pub fn encode(&self) -> String {
        match self {
            Self::Connect(None) => "0".to_string(),
            Self::Connect(Some(data)) => format!("0{}", data),
            Self::Disconnect => "1".to_string(),
            Self::Event { id, name, args } => {
                let mut array = Vec::with_capacity(args.len() + 1);
                array.push(Value::String(name.clone()));
                array.extend(args.iter().cloned());
                let id = id.map(|id| id.to_string()).unwrap_or_default();
                format!("2{}{}", id, Value::Array(array))
            }
            Self::Ack { id, args } => format!("3{}{}", id, Value::Array(args.clone())),
            Self::ConnectError(message) => format!("4{}", json!({ "message": message })),
        }
    }

    /// Wrap into an Engine.IO message frame, ready to be written to the socket.
    pub fn to_frame(&self) -> String {
        EnginePacket::Message(self.encode()).encode()
    }
}

/// CONNECT_ERROR data is `{message}` on current servers and a bare string on old ones.
fn connect_error_message(body: &str) -> String {
    if body.is_empty() {
        return "connection refused".to_string();
    }
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("message") {
            Some(Value::String(message)) => message.clone(),
            _ => Value::Object(map).to_string(),
        },
        Ok(Value::String(message)) => message,
        Ok(other) => other.to_string(),
        Err(_) => body.to_string(),
    }
}
