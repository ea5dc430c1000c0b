//! In-process WebSocket backend standing in for the console server.
//!
//! Accepts connections at `/ws/{user_id}`, sends the
//! `connection_established` greeting, records every client frame it
//! receives, and lets tests script outbound frames and closes per
//! connection.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use dockline_client::ClientEvent;
use dockline_types::{ClientFrame, ServerFrame};
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

pub enum ServerCommand {
    Send(ServerFrame),
    Close(u16),
}

#[derive(Clone)]
struct ServerState {
    recorded: Arc<Mutex<Vec<(usize, ClientFrame)>>>,
    commands: Arc<Mutex<HashMap<usize, mpsc::UnboundedSender<ServerCommand>>>>,
    accepted: Arc<watch::Sender<usize>>,
    next_conn: Arc<AtomicUsize>,
}

/// Scriptable backend double. Connections are numbered from 1 in accept
/// order.
pub struct TestServer {
    pub addr: SocketAddr,
    state: ServerState,
    accepted_rx: watch::Receiver<usize>,
    server: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (accepted_tx, accepted_rx) = watch::channel(0usize);
        let state = ServerState {
            recorded: Arc::new(Mutex::new(Vec::new())),
            commands: Arc::new(Mutex::new(HashMap::new())),
            accepted: Arc::new(accepted_tx),
            next_conn: Arc::new(AtomicUsize::new(0)),
        };

        let app = Router::new()
            .route("/ws/{user_id}", get(ws_handler))
            .with_state(state.clone());
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            accepted_rx,
            server,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Block until at least `n` connections have been accepted in total.
    pub async fn wait_for_connections(&self, n: usize) {
        let mut rx = self.accepted_rx.clone();
        tokio::time::timeout(Duration::from_secs(5), async move {
            while *rx.borrow() < n {
                rx.changed().await.expect("server state dropped");
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {n} connections"));
    }

    /// Total connections accepted so far.
    pub fn connection_count(&self) -> usize {
        *self.accepted_rx.borrow()
    }

    pub fn send_to(&self, conn: usize, frame: ServerFrame) {
        let commands = self.state.commands.lock().unwrap();
        commands
            .get(&conn)
            .unwrap_or_else(|| panic!("no live connection {conn}"))
            .send(ServerCommand::Send(frame))
            .expect("connection task gone");
    }

    /// Close a connection with the given close code.
    pub fn close(&self, conn: usize, code: u16) {
        let commands = self.state.commands.lock().unwrap();
        if let Some(tx) = commands.get(&conn) {
            let _ = tx.send(ServerCommand::Close(code));
        }
    }

    /// Every client frame received, tagged with its connection number.
    pub fn recorded(&self) -> Vec<(usize, ClientFrame)> {
        self.state.recorded.lock().unwrap().clone()
    }

    /// Stop accepting new connections; live sockets keep running.
    pub fn shutdown(&self) {
        self.server.abort();
    }
}

async fn ws_handler(
    Path(user_id): Path<String>,
    State(state): State<ServerState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: ServerState, user_id: String) {
    let conn_id = state.next_conn.fetch_add(1, Ordering::SeqCst) + 1;
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
    state.commands.lock().unwrap().insert(conn_id, cmd_tx);
    state.accepted.send_replace(conn_id);

    let (mut ws_tx, mut ws_rx) = socket.split();

    let established = ServerFrame::ConnectionEstablished {
        user_id,
        timestamp: Utc::now(),
    };
    let _ = ws_tx
        .send(Message::Text(
            serde_json::to_string(&established).unwrap().into(),
        ))
        .await;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(ServerCommand::Send(frame)) => {
                    let json = serde_json::to_string(&frame).unwrap();
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Some(ServerCommand::Close(code)) => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: "".into(),
                        })))
                        .await;
                    break;
                }
                None => break,
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) {
                        state.recorded.lock().unwrap().push((conn_id, frame));
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }

    state.commands.lock().unwrap().remove(&conn_id);
}

/// Drain events until one matches, failing the test after five seconds.
pub async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<ClientEvent>,
    mut pred: F,
) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async move {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
