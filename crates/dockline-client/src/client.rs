//! Connection lifecycle for the console's realtime channel.

use crate::backoff::ReconnectPolicy;
use crate::config::ClientConfig;
use crate::router::route_frame;
use crate::store::ChatStore;
use crate::Result;
use chrono::Utc;
use dockline_types::{ChatMessage, ClientFrame, ServerFrame, SessionId, TaskStatus};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Normal closure; never triggers reconnection.
const NORMAL_CLOSE: u16 = 1000;
/// No close frame received before the close handshake.
const NO_STATUS_CLOSE: u16 = 1005;
/// Transport dropped without a close handshake.
const ABNORMAL_CLOSE: u16 = 1006;

/// Connection lifecycle states.
///
/// `Closed` is only reached through an explicit [`ChatClient::disconnect`];
/// abnormal closures loop through `Disconnected` while reconnect attempts
/// remain, then rest there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Closed,
}

/// Notifications emitted as the connection and chat state change.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Socket opened and tasks are running.
    Connected { user_id: String },
    /// Socket closed with the given close code (1006 when the transport
    /// dropped without a close frame).
    Disconnected { code: u16 },
    /// A reconnect attempt has been scheduled.
    Reconnecting { attempt: u32, delay: Duration },
    /// Every reconnect attempt is spent; the client stays disconnected
    /// until `connect` is called again.
    ReconnectsExhausted,
    /// A new message was appended to the active session.
    MessageAdded(ChatMessage),
    /// A streamed response finished assembling.
    StreamCompleted { message_id: String, text: String },
    /// Another subscriber started or stopped typing.
    TypingChanged {
        user_id: String,
        session_id: SessionId,
        is_typing: bool,
    },
    /// A read receipt was recorded for a message.
    ReadReceiptRecorded { message_id: String, user_id: String },
    /// A backend task reported progress.
    TaskUpdated(TaskStatus),
}

/// Handle to the console's realtime channel.
///
/// Cheap to clone; all clones share the single underlying socket. Construct
/// one per chat surface and pass it around explicitly so tests can run
/// isolated instances.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    policy: ReconnectPolicy,
    store: Arc<ChatStore>,
    events: broadcast::Sender<ClientEvent>,
    subscriptions: Mutex<HashSet<SessionId>>,
    conn: Mutex<ConnState>,
}

struct ConnState {
    status: ConnectionStatus,
    user_id: Option<String>,
    /// Bumped on every `connect`/`disconnect`; scheduled reconnects carry
    /// the generation they were created under and stand down when a newer
    /// one exists
    generation: u64,
    attempts: u32,
    outbound: Option<mpsc::Sender<ClientFrame>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    keepalive: Option<JoinHandle<()>>,
}

/// Stop the tasks serving the current socket, if any.
///
/// The writer is left to exit on its own: once every outbound sender is
/// dropped it performs the closing handshake and ends.
fn teardown(conn: &mut ConnState) {
    conn.outbound = None;
    if let Some(task) = conn.reader.take() {
        task.abort();
    }
    if let Some(task) = conn.keepalive.take() {
        task.abort();
    }
    conn.writer.take();
}

impl ChatClient {
    pub fn new(config: ClientConfig) -> Self {
        let store = Arc::new(ChatStore::new(config.typing_ttl, config.task_retention));
        let (events, _) = broadcast::channel(config.event_capacity);
        let policy = config.reconnect_policy();
        Self {
            inner: Arc::new(ClientInner {
                config,
                policy,
                store,
                events,
                subscriptions: Mutex::new(HashSet::new()),
                conn: Mutex::new(ConnState {
                    status: ConnectionStatus::Idle,
                    user_id: None,
                    generation: 0,
                    attempts: 0,
                    outbound: None,
                    reader: None,
                    writer: None,
                    keepalive: None,
                }),
            }),
        }
    }

    /// Shared chat state fed by this client.
    pub fn store(&self) -> Arc<ChatStore> {
        Arc::clone(&self.inner.store)
    }

    /// Subscribe to connection and chat events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.conn.lock().unwrap().status
    }

    /// Session the UI is currently looking at; drives message filtering and
    /// the auto-subscribe on connection establishment.
    pub fn set_active_session(&self, session: Option<SessionId>) {
        self.inner.store.set_active_session(session);
    }

    /// Sessions that will be re-subscribed after a reconnect (unordered).
    pub fn subscriptions(&self) -> Vec<SessionId> {
        self.inner
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .copied()
            .collect()
    }

    /// Open the socket for the given user, tearing down any existing
    /// connection first. Failures schedule a reconnect and are also
    /// returned so a caller's first dial can report immediately.
    pub async fn connect(&self, user_id: &str) -> Result<()> {
        connect_inner(self.inner.clone(), user_id.to_string()).await
    }

    /// Send a frame if currently connected.
    ///
    /// Returns `false` instead of erroring when the socket is down or the
    /// outbound queue is full, so callers can treat transient
    /// disconnection as a soft failure.
    pub fn send(&self, frame: ClientFrame) -> bool {
        let tx = {
            let conn = self.inner.conn.lock().unwrap();
            if conn.status != ConnectionStatus::Connected {
                None
            } else {
                conn.outbound.clone()
            }
        };
        let Some(tx) = tx else {
            debug!(target: "dockline::ws", "Cannot send frame: not connected");
            return false;
        };
        tx.try_send(frame).is_ok()
    }

    /// Subscribe to live updates for a session. Fails without side effects
    /// when disconnected; tracked subscriptions are replayed after every
    /// reconnect.
    pub fn subscribe_to_session(&self, session_id: SessionId) -> bool {
        if !self.send(ClientFrame::Subscribe { session_id }) {
            warn!(
                target: "dockline::ws",
                "Cannot subscribe to session {}: not connected", session_id
            );
            return false;
        }
        self.inner.subscriptions.lock().unwrap().insert(session_id);
        debug!(target: "dockline::ws", "Subscribed to session {}", session_id);
        true
    }

    pub fn unsubscribe_from_session(&self, session_id: SessionId) -> bool {
        if !self.send(ClientFrame::Unsubscribe { session_id }) {
            warn!(
                target: "dockline::ws",
                "Cannot unsubscribe from session {}: not connected", session_id
            );
            return false;
        }
        self.inner.subscriptions.lock().unwrap().remove(&session_id);
        debug!(target: "dockline::ws", "Unsubscribed from session {}", session_id);
        true
    }

    /// Report the local user's typing state to other session subscribers.
    pub fn update_typing_status(&self, is_typing: bool, session_id: SessionId) -> bool {
        self.send(ClientFrame::Typing {
            is_typing,
            session_id,
        })
    }

    /// Acknowledge that the local user read a message.
    pub fn send_read_receipt(
        &self,
        message_id: impl Into<String>,
        session_id: SessionId,
    ) -> bool {
        self.send(ClientFrame::ReadReceipt {
            message_id: message_id.into(),
            session_id,
        })
    }

    /// Close the socket with a normal closure and settle in `Closed`.
    /// Clears tracked subscriptions and cancels any pending reconnect.
    /// Idempotent.
    pub fn disconnect(&self) {
        let was_live = {
            let mut conn = self.inner.conn.lock().unwrap();
            if conn.status == ConnectionStatus::Closed {
                return;
            }
            let was_live = conn.outbound.is_some();
            conn.generation += 1;
            conn.attempts = 0;
            teardown(&mut conn);
            conn.status = ConnectionStatus::Closed;
            was_live
        };
        self.inner.subscriptions.lock().unwrap().clear();
        if was_live {
            let _ = self.inner.events.send(ClientEvent::Disconnected { code: NORMAL_CLOSE });
        }
        info!(target: "dockline::ws", "Disconnected");
    }
}

async fn connect_inner(inner: Arc<ClientInner>, user_id: String) -> Result<()> {
    let generation = {
        let mut conn = inner.conn.lock().unwrap();
        teardown(&mut conn);
        conn.generation += 1;
        conn.status = ConnectionStatus::Connecting;
        conn.user_id = Some(user_id.clone());
        conn.generation
    };

    let url = inner.config.socket_url(&user_id)?;
    info!(target: "dockline::ws", "Connecting to {}", url);

    let (socket, _response) = match connect_async(url.as_str()).await {
        Ok(ok) => ok,
        Err(e) => {
            warn!(target: "dockline::ws", "Connection to {} failed: {}", url, e);
            handle_connection_lost(&inner, generation, ABNORMAL_CLOSE);
            return Err(e.into());
        }
    };

    let (ws_tx, ws_rx) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(inner.config.send_queue_capacity);

    let writer = tokio::spawn(writer_task(ws_tx, outbound_rx));
    let reader = tokio::spawn(reader_task(inner.clone(), ws_rx, generation));
    let keepalive = tokio::spawn(keepalive_task(
        outbound_tx.clone(),
        inner.config.keepalive_interval,
    ));

    {
        let mut conn = inner.conn.lock().unwrap();
        if conn.generation != generation {
            // A newer connect or disconnect superseded this dial while the
            // handshake was in flight
            reader.abort();
            keepalive.abort();
            drop(outbound_tx);
            return Ok(());
        }
        conn.status = ConnectionStatus::Connected;
        conn.attempts = 0;
        conn.outbound = Some(outbound_tx.clone());
        conn.reader = Some(reader);
        conn.writer = Some(writer);
        conn.keepalive = Some(keepalive);
    }

    let _ = inner.events.send(ClientEvent::Connected {
        user_id: user_id.clone(),
    });

    // Replay tracked subscriptions on the fresh socket
    let tracked: Vec<SessionId> = inner
        .subscriptions
        .lock()
        .unwrap()
        .iter()
        .copied()
        .collect();
    if !tracked.is_empty() {
        debug!(
            target: "dockline::ws",
            "Replaying {} session subscriptions", tracked.len()
        );
    }
    for session_id in tracked {
        if outbound_tx
            .send(ClientFrame::Subscribe { session_id })
            .await
            .is_err()
        {
            break;
        }
    }

    Ok(())
}

/// React to the socket going away for the given connection generation.
/// Stale generations (an explicit reconnect already replaced the socket)
/// are ignored.
fn handle_connection_lost(inner: &Arc<ClientInner>, generation: u64, code: u16) {
    enum NextStep {
        Stay,
        Retry {
            user_id: String,
            attempt: u32,
            delay: Duration,
        },
        Exhausted,
    }

    let step = {
        let mut conn = inner.conn.lock().unwrap();
        if conn.generation != generation || conn.status == ConnectionStatus::Closed {
            return;
        }
        teardown(&mut conn);
        conn.status = ConnectionStatus::Disconnected;

        if code == NORMAL_CLOSE {
            NextStep::Stay
        } else if inner.policy.allows(conn.attempts) {
            conn.attempts += 1;
            let attempt = conn.attempts;
            NextStep::Retry {
                user_id: conn.user_id.clone().unwrap_or_default(),
                attempt,
                delay: inner.policy.delay_for(attempt),
            }
        } else {
            NextStep::Exhausted
        }
    };

    let _ = inner.events.send(ClientEvent::Disconnected { code });

    match step {
        NextStep::Stay => {}
        NextStep::Retry {
            user_id,
            attempt,
            delay,
        } => {
            info!(
                target: "dockline::ws",
                "Reconnecting in {:?} (attempt {}/{})",
                delay, attempt, inner.policy.max_attempts
            );
            let _ = inner
                .events
                .send(ClientEvent::Reconnecting { attempt, delay });

            let inner = inner.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let superseded = {
                    let conn = inner.conn.lock().unwrap();
                    conn.generation != generation
                        || conn.status != ConnectionStatus::Disconnected
                };
                if superseded {
                    debug!(target: "dockline::ws", "Reconnect attempt {} superseded", attempt);
                    return;
                }
                if let Err(e) = connect_inner(inner.clone(), user_id).await {
                    debug!(
                        target: "dockline::ws",
                        "Reconnect attempt {} failed: {}", attempt, e
                    );
                }
            });
        }
        NextStep::Exhausted => {
            warn!(
                target: "dockline::ws",
                "Giving up after {} reconnect attempts", inner.policy.max_attempts
            );
            let _ = inner.events.send(ClientEvent::ReconnectsExhausted);
        }
    }
}

/// Forward queued frames onto the socket; perform the closing handshake
/// once every sender is gone.
async fn writer_task(
    mut ws_tx: SplitSink<WsStream, Message>,
    mut outbound_rx: mpsc::Receiver<ClientFrame>,
) {
    while let Some(frame) = outbound_rx.recv().await {
        let json = match serde_json::to_string(&frame) {
            Ok(json) => json,
            Err(e) => {
                warn!(target: "dockline::ws", "Failed to serialize outbound frame: {}", e);
                continue;
            }
        };
        if let Err(e) = ws_tx.send(Message::Text(json.into())).await {
            debug!(target: "dockline::ws", "Socket send failed: {}", e);
            break;
        }
    }
    let _ = ws_tx
        .send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        })))
        .await;
}

/// Read frames until the socket goes away, then report the close code.
async fn reader_task(inner: Arc<ClientInner>, mut ws_rx: SplitStream<WsStream>, generation: u64) {
    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(Message::Text(text)) => handle_text(&inner, &text),
            Ok(Message::Close(frame)) => {
                let code = frame
                    .map(|f| u16::from(f.code))
                    .unwrap_or(NO_STATUS_CLOSE);
                debug!(target: "dockline::ws", "Server closed connection (code {})", code);
                handle_connection_lost(&inner, generation, code);
                return;
            }
            // Binary frames are not part of the protocol; ping/pong control
            // frames are answered by the transport
            Ok(_) => {}
            Err(e) => {
                debug!(target: "dockline::ws", "Socket error: {}", e);
                handle_connection_lost(&inner, generation, ABNORMAL_CLOSE);
                return;
            }
        }
    }
    debug!(target: "dockline::ws", "Socket stream ended");
    handle_connection_lost(&inner, generation, ABNORMAL_CLOSE);
}

fn handle_text(inner: &Arc<ClientInner>, text: &str) {
    match serde_json::from_str::<ServerFrame>(text) {
        Ok(frame) => {
            if let Some(reply) = route_frame(frame, &inner.store, &inner.events) {
                apply_reply(inner, reply);
            }
        }
        Err(e) if e.to_string().starts_with("unknown variant") => {
            warn!(target: "dockline::ws", "Unknown message type: {}", e);
        }
        Err(e) => {
            warn!(target: "dockline::ws", "Dropping unparseable frame: {}", e);
        }
    }
}

/// Send a frame the router asked for, tracking subscriptions it creates.
fn apply_reply(inner: &Arc<ClientInner>, reply: ClientFrame) {
    if let ClientFrame::Subscribe { session_id } = &reply {
        inner.subscriptions.lock().unwrap().insert(*session_id);
    }
    let tx = inner.conn.lock().unwrap().outbound.clone();
    if let Some(tx) = tx {
        if tx.try_send(reply).is_err() {
            debug!(target: "dockline::ws", "Outbound queue full; dropped router reply");
        }
    }
}

/// Emit a ping on every interval tick while the connection lives. The task
/// exits when the writer goes away and is aborted on teardown.
async fn keepalive_task(outbound_tx: mpsc::Sender<ClientFrame>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; the first ping waits one period
    interval.tick().await;
    loop {
        interval.tick().await;
        trace!(target: "dockline::ws::ping", "Sending ping");
        if outbound_tx
            .send(ClientFrame::Ping {
                timestamp: Utc::now(),
            })
            .await
            .is_err()
        {
            break;
        }
    }
}
