//! In-process Socket.IO server speaking just enough Engine.IO v4 / Socket.IO v5
//! for the client tests: open handshake, CONNECT, EVENT with acks, server pushes.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

const OPEN: &str =
    r#"0{"sid":"fake-sid","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

/// How the server answers one acknowledged event.
pub struct Ack {
    pub body: Value,
    pub delay: Duration,
}

impl Ack {
    pub fn now(body: Value) -> Option<Self> {
        Some(Self {
            body,
            delay: Duration::ZERO,
        })
    }

    pub fn after(millis: u64, body: Value) -> Option<Self> {
        Some(Self {
            body,
            delay: Duration::from_millis(millis),
        })
    }
}

type Handler = Box<dyn Fn(&str, &Value) -> Option<Ack> + Send + Sync>;

/// What the per-client task should do next.
enum Outbound {
    Frame(String),
    /// Send a Socket.IO DISCONNECT, then close.
    Kick,
    /// Close the TCP connection without any goodbye.
    Drop,
}

struct State {
    handler: Handler,
    clients: Mutex<Vec<mpsc::UnboundedSender<Outbound>>>,
    received: Mutex<Vec<(String, Value)>>,
    connect_auth: Mutex<Vec<Option<Value>>>,
}

pub struct FakeServer {
    pub url: String,
    state: Arc<State>,
}

impl FakeServer {
    /// `handler` sees every acknowledged event and returns the ack, if any.
    pub async fn start(
        handler: impl Fn(&str, &Value) -> Option<Ack> + Send + Sync + 'static,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let state = Arc::new(State {
            handler: Box::new(handler),
            clients: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            connect_auth: Mutex::new(Vec::new()),
        });

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_client(accept_state.clone(), stream));
            }
        });

        Self { url, state }
    }

    /// Accepts `join` and nothing else.
    pub async fn joinable() -> Self {
        Self::start(|name, _| match name {
            "join" => Ack::now(json!({"success": true})),
            _ => None,
        })
        .await
    }

    /// Push a server event to every connected client.
    pub fn emit(&self, name: &str, payload: Value) {
        let frame = format!("42{}", json!([name, payload]));
        for client in self.state.clients.lock().unwrap().iter() {
            let _ = client.send(Outbound::Frame(frame.clone()));
        }
    }

    /// Send a Socket.IO DISCONNECT to every client.
    pub fn kick(&self) {
        for client in self.state.clients.lock().unwrap().drain(..) {
            let _ = client.send(Outbound::Kick);
        }
    }

    /// Cut every client off as a network failure would.
    pub fn drop_connections(&self) {
        for client in self.state.clients.lock().unwrap().drain(..) {
            let _ = client.send(Outbound::Drop);
        }
    }

    /// Payloads of every event received under `name`, in arrival order.
    pub fn received(&self, name: &str) -> Vec<Value> {
        self.state
            .received
            .lock()
            .unwrap()
            .iter()
            .filter(|(event, _)| event == name)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn connect_auth(&self) -> Vec<Option<Value>> {
        self.state.connect_auth.lock().unwrap().clone()
    }

    pub async fn wait_for_event(&self, name: &str) -> Value {
        for _ in 0..200 {
            if let Some(payload) = self.received(name).into_iter().last() {
                return payload;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server never received {}", name);
    }
}

async fn serve_client(state: Arc<State>, stream: TcpStream) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut sink, mut stream) = ws.split();
    if sink.send(Message::text(OPEN)).await.is_err() {
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    state.clients.lock().unwrap().push(tx.clone());

    loop {
        tokio::select! {
            Some(outbound) = rx.recv() => match outbound {
                Outbound::Frame(frame) => {
                    if sink.send(Message::text(frame)).await.is_err() {
                        break;
                    }
                }
                Outbound::Kick => {
                    let _ = sink.send(Message::text("41")).await;
                    break;
                }
                Outbound::Drop => break,
            },
            message = stream.next() => {
                let text = match message {
                    Some(Ok(Message::Text(text))) => text.to_string(),
                    Some(Ok(_)) => continue,
                    _ => break,
                };
                let Some(packet) = text.strip_prefix('4') else {
                    continue;
                };
                if !handle_packet(&state, &tx, packet) {
                    break;
                }
            }
        }
    }
}

/// Returns false when the client disconnected.
fn handle_packet(state: &Arc<State>, tx: &mpsc::UnboundedSender<Outbound>, packet: &str) -> bool {
    let (kind, rest) = packet.split_at(1);
    match kind {
        "0" => {
            let auth = (!rest.is_empty()).then(|| serde_json::from_str(rest).unwrap());
            state.connect_auth.lock().unwrap().push(auth);
            let _ = tx.send(Outbound::Frame(r#"40{"sid":"fake-socket"}"#.to_string()));
            true
        }
        "1" => false,
        "2" => {
            let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
            let id: Option<u64> = (digits > 0).then(|| rest[..digits].parse().unwrap());
            let args: Vec<Value> = serde_json::from_str(&rest[digits..]).unwrap();
            let name = args[0].as_str().unwrap().to_string();
            let payload = args.get(1).cloned().unwrap_or(Value::Null);

            state
                .received
                .lock()
                .unwrap()
                .push((name.clone(), payload.clone()));

            if let (Some(id), Some(ack)) = (id, (state.handler)(&name, &payload)) {
                let frame = format!("43{}{}", id, json!([ack.body]));
                let tx = tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(ack.delay).await;
                    let _ = tx.send(Outbound::Frame(frame));
                });
            }
            true
        }
        _ => true,
    }
}
