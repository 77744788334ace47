//! Socket.IO transport over a single WebSocket.
//!
//! A background driver task owns the socket: it performs the handshake,
//! answers heartbeats, routes acknowledgements back to their callers and
//! reconnects with backoff after unexpected drops. Callers only see a
//! [`Transport`] handle and a stream of [`TransportEvent`]s.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::{Instant, sleep, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::config::TransportConfig;
use crate::protocol::{DEFAULT_NAMESPACE, EnginePacket, Handshake, ProtocolError, SocketPacket};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Server answered the Socket.IO CONNECT with CONNECT_ERROR.
    #[error("connection rejected: {0}")]
    Rejected(String),

    #[error("connection timeout")]
    Timeout,

    #[error("connection closed during handshake")]
    HandshakeClosed,
}

/// Why an established connection ended. Mirrors the Socket.IO reason strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientDisconnect,
    ServerDisconnect,
    PingTimeout,
    TransportClose,
    TransportError,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientDisconnect => "io client disconnect",
            Self::ServerDisconnect => "io server disconnect",
            Self::PingTimeout => "ping timeout",
            Self::TransportClose => "transport close",
            Self::TransportError => "transport error",
        }
    }

    /// Explicit disconnects from either side are final.
    pub fn should_reconnect(&self) -> bool {
        !matches!(self, Self::ClientDisconnect | Self::ServerDisconnect)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle callbacks and inbound events, in transport delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: DisconnectReason },
    ConnectError(String),
    Event { name: String, args: Vec<Value> },
    /// All reconnection attempts were used up.
    ReconnectFailed,
}

/// Turn an `http(s)://host[:port]` server URL into the Socket.IO WebSocket endpoint.
pub fn socket_url(server_url: &str, path: &str) -> Result<Url, TransportError> {
    let mut url = Url::parse(server_url)
        .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", server_url, e)))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme `{}`",
                other
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::InvalidUrl(server_url.to_string()))?;
    url.set_path(path);
    url.query_pairs_mut()
        .clear()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket");

    Ok(url)
}

struct Shared {
    connected: AtomicBool,
    next_ack_id: AtomicU64,
    /// Outstanding acknowledgements: ack id -> single-use completion.
    pending: Mutex<HashMap<u64, oneshot::Sender<Vec<Value>>>>,
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

/// Handle to a running transport. Cloning is cheap; the driver stops when
/// [`Transport::close`] is called or the last handle is dropped.
#[derive(Clone)]
pub struct Transport {
    shared: Arc<Shared>,
    _guard: Arc<DropGuard>,
}

impl Transport {
    /// Start connecting in the background. Only URL errors are reported here;
    /// everything else arrives on the returned event stream.
    pub fn open(
        server_url: &str,
        auth: Option<Value>,
        config: TransportConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>), TransportError> {
        let url = socket_url(server_url, &config.path)?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let shared = Arc::new(Shared {
            connected: AtomicBool::new(false),
            next_ack_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            outbound: outbound_tx,
            cancel: cancel.clone(),
        });

        let driver = Driver {
            shared: shared.clone(),
            url,
            auth,
            config,
            events: events_tx,
            outbound: outbound_rx,
        };
        tokio::spawn(driver.run());

        Ok((
            Self {
                shared,
                _guard: Arc::new(cancel.drop_guard()),
            },
            events_rx,
        ))
    }

    /// Point-in-time transport state.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Emit an event that expects an acknowledgement. The receiver resolves
    /// exactly once with the ack arguments, or errors if the connection drops first.
    pub async fn emit_with_ack(
        &self,
        name: &str,
        payload: Value,
    ) -> Result<oneshot::Receiver<Vec<Value>>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let id = self.shared.next_ack_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().await.insert(id, tx);

        let frame = SocketPacket::event(name, payload, Some(id)).to_frame();
        if self.shared.outbound.send(frame).is_err() {
            self.shared.pending.lock().await.remove(&id);
            return Err(TransportError::NotConnected);
        }

        trace!("-> {} (ack {})", name, id);
        Ok(rx)
    }

    /// Send DISCONNECT and stop the driver. Idempotent.
    pub fn close(&self) {
        self.shared.cancel.cancel();
    }
}

struct Driver {
    shared: Arc<Shared>,
    url: Url,
    auth: Option<Value>,
    config: TransportConfig,
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl Driver {
    async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            let outcome = tokio::select! {
                _ = self.shared.cancel.cancelled() => break,
                outcome = timeout(self.config.timeout, establish(&self.url, self.auth.clone())) => outcome,
            };

            match outcome {
                Ok(Ok((socket, handshake))) => {
                    attempt = 0;
                    info!(
                        "Connected to {} (sid {})",
                        self.url.host_str().unwrap_or("?"),
                        handshake.sid
                    );
                    self.shared.connected.store(true, Ordering::Release);
                    let _ = self.events.send(TransportEvent::Connected);

                    let reason = self.pump(socket, &handshake).await;

                    self.shared.connected.store(false, Ordering::Release);
                    self.fail_pending().await;
                    info!("Disconnected: {}", reason);
                    let _ = self.events.send(TransportEvent::Disconnected { reason });

                    if !reason.should_reconnect() {
                        break;
                    }
                }
                Ok(Err(TransportError::Rejected(message))) => {
                    warn!("Server rejected connection: {}", message);
                    let _ = self.events.send(TransportEvent::ConnectError(message));
                    break;
                }
                Ok(Err(e)) => {
                    warn!("Connect error: {}", e);
                    let _ = self.events.send(TransportEvent::ConnectError(e.to_string()));
                }
                Err(_) => {
                    warn!("Connect timed out after {:?}", self.config.timeout);
                    let _ = self
                        .events
                        .send(TransportEvent::ConnectError(TransportError::Timeout.to_string()));
                }
            }

            if !self.config.reconnection {
                break;
            }
            attempt += 1;
            if attempt > self.config.reconnection_attempts {
                warn!("Giving up after {} reconnection attempts", attempt - 1);
                let _ = self.events.send(TransportEvent::ReconnectFailed);
                break;
            }

            let delay = self.config.backoff(attempt);
            debug!("Reconnection attempt {} in {:?}", attempt, delay);
            tokio::select! {
                _ = self.shared.cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        // Refuse new frames before failing what is left, so no ack can be
        // registered after the final sweep.
        self.outbound.close();
        self.shared.connected.store(false, Ordering::Release);
        self.fail_pending().await;
        debug!("Transport driver stopped");
    }

    /// Run one established connection until it ends.
    async fn pump(&mut self, socket: WsStream, handshake: &Handshake) -> DisconnectReason {
        let (mut sink, mut stream) = socket.split();
        let deadline = handshake.heartbeat_deadline();
        let heartbeat = sleep(deadline);
        tokio::pin!(heartbeat);

        loop {
            tokio::select! {
                _ = self.shared.cancel.cancelled() => {
                    let _ = sink.send(WsMessage::text(SocketPacket::Disconnect.to_frame())).await;
                    let _ = sink.close().await;
                    return DisconnectReason::ClientDisconnect;
                }
                _ = &mut heartbeat => {
                    warn!("No ping from server within {:?}", deadline);
                    return DisconnectReason::PingTimeout;
                }
                frame = self.outbound.recv() => {
                    let Some(frame) = frame else {
                        return DisconnectReason::ClientDisconnect;
                    };
                    if let Err(e) = sink.send(WsMessage::text(frame)).await {
                        warn!("WebSocket write failed: {}", e);
                        return DisconnectReason::TransportError;
                    }
                }
                message = stream.next() => {
                    match self.on_message(message, &mut sink, &mut heartbeat, deadline).await {
                        Ok(()) => {}
                        Err(reason) => return reason,
                    }
                }
            }
        }
    }

    async fn on_message(
        &mut self,
        message: Option<Result<WsMessage, tokio_tungstenite::tungstenite::Error>>,
        sink: &mut SplitSink<WsStream, WsMessage>,
        heartbeat: &mut std::pin::Pin<&mut tokio::time::Sleep>,
        deadline: std::time::Duration,
    ) -> Result<(), DisconnectReason> {
        let text = match message {
            Some(Ok(WsMessage::Text(text))) => text.to_string(),
            Some(Ok(WsMessage::Close(_))) | None => return Err(DisconnectReason::TransportClose),
            Some(Ok(_)) => return Ok(()),
            Some(Err(e)) => {
                warn!("WebSocket error: {}", e);
                return Err(DisconnectReason::TransportError);
            }
        };

        match EnginePacket::decode(&text) {
            Ok(EnginePacket::Ping) => {
                heartbeat.as_mut().reset(Instant::now() + deadline);
                sink.send(WsMessage::text(EnginePacket::Pong.encode()))
                    .await
                    .map_err(|_| DisconnectReason::TransportError)?;
            }
            Ok(EnginePacket::Close) => return Err(DisconnectReason::TransportClose),
            Ok(EnginePacket::Message(body)) => {
                if let Some(reply) = self.dispatch(&body).await? {
                    sink.send(WsMessage::text(reply))
                        .await
                        .map_err(|_| DisconnectReason::TransportError)?;
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Dropping bad frame: {} -- raw: {}", e, preview(&text)),
        }

        Ok(())
    }

    /// Route one Socket.IO packet. Returns a frame to send back, if any.
    async fn dispatch(&self, body: &str) -> Result<Option<String>, DisconnectReason> {
        let (namespace, packet) = match SocketPacket::decode(body) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Dropping bad packet: {} -- raw: {}", e, preview(body));
                return Ok(None);
            }
        };

        if namespace != DEFAULT_NAMESPACE {
            trace!("Ignoring packet for namespace {}", namespace);
            return Ok(None);
        }

        match packet {
            SocketPacket::Event { id, name, args } => {
                trace!("<- {}", name);
                let _ = self.events.send(TransportEvent::Event { name, args });
                // The server asked for an ack; there is nothing to report back.
                Ok(id.map(|id| SocketPacket::Ack { id, args: Vec::new() }.to_frame()))
            }
            SocketPacket::Ack { id, args } => {
                match self.shared.pending.lock().await.remove(&id) {
                    Some(tx) => {
                        let _ = tx.send(args);
                    }
                    None => debug!("Ack {} matches no pending request", id),
                }
                Ok(None)
            }
            SocketPacket::Disconnect => Err(DisconnectReason::ServerDisconnect),
            SocketPacket::ConnectError(message) => {
                warn!("Server error on open connection: {}", message);
                Ok(None)
            }
            SocketPacket::Connect(_) => Ok(None),
        }
    }

    /// Drop every outstanding completion so waiting callers observe the closure.
    async fn fail_pending(&mut self) {
        let dropped = {
            let mut pending = self.shared.pending.lock().await;
            let count = pending.len();
            pending.clear();
            count
        };
        if dropped > 0 {
            debug!("Dropped {} pending acknowledgements", dropped);
        }
        while self.outbound.try_recv().is_ok() {}
    }
}

/// WebSocket upgrade, Engine.IO open, Socket.IO connect.
async fn establish(
    url: &Url,
    auth: Option<Value>,
) -> Result<(WsStream, Handshake), TransportError> {
    let (mut socket, _) = connect_async(url.as_str()).await?;

    let handshake = loop {
        let text = next_text(&mut socket).await?;
        match EnginePacket::decode(&text)? {
            EnginePacket::Open(handshake) => break handshake,
            other => trace!("Ignoring {:?} before open", other),
        }
    };

    socket
        .send(WsMessage::text(SocketPacket::Connect(auth).to_frame()))
        .await?;

    loop {
        let text = next_text(&mut socket).await?;
        match EnginePacket::decode(&text)? {
            EnginePacket::Ping => {
                socket
                    .send(WsMessage::text(EnginePacket::Pong.encode()))
                    .await?;
            }
            EnginePacket::Message(body) => match SocketPacket::decode(&body)? {
                (namespace, SocketPacket::Connect(_)) if namespace == DEFAULT_NAMESPACE => {
                    return Ok((socket, handshake));
                }
                (_, SocketPacket::ConnectError(message)) => {
                    return Err(TransportError::Rejected(message));
                }
                (_, other) => trace!("Ignoring {:?} during handshake", other),
            },
            EnginePacket::Close => return Err(TransportError::HandshakeClosed),
            _ => {}
        }
    }
}

async fn next_text(socket: &mut WsStream) -> Result<String, TransportError> {
    loop {
        match socket.next().await {
            Some(Ok(WsMessage::Text(text))) => return Ok(text.to_string()),
            Some(Ok(WsMessage::Close(_))) | None => return Err(TransportError::HandshakeClosed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_url_maps_to_socket_endpoint() {
        let url = socket_url("http://10.0.2.2:3000", "/socket.io/").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://10.0.2.2:3000/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn https_url_maps_to_secure_socket() {
        let url = socket_url("https://chat.example.com/?x=1", "/socket.io/").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://chat.example.com/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(matches!(
            socket_url("ftp://example.com", "/socket.io/"),
            Err(TransportError::InvalidUrl(_))
        ));
        assert!(matches!(
            socket_url("not a url", "/socket.io/"),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[test]
    fn explicit_disconnects_are_final() {
        assert!(!DisconnectReason::ClientDisconnect.should_reconnect());
        assert!(!DisconnectReason::ServerDisconnect.should_reconnect());
        assert!(DisconnectReason::PingTimeout.should_reconnect());
        assert!(DisconnectReason::TransportClose.should_reconnect());
    }

    #[tokio::test]
    async fn emit_before_connect_fails_fast() {
        let config = TransportConfig {
            reconnection: false,
            ..TransportConfig::default()
        };
        // Nothing listens on port 9; the driver fails in the background.
        let (transport, _events) = Transport::open("http://127.0.0.1:9", None, config).unwrap();

        assert!(!transport.is_connected());
        assert!(matches!(
            transport.emit_with_ack("getAllUsers", serde_json::json!({})).await,
            Err(TransportError::NotConnected)
        ));
        transport.close();
    }
}
