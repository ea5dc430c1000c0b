//! Shared chat state fed by the frame router.
//!
//! One store per client, shared behind an `Arc`. All maps are safe for
//! concurrent access so socket callbacks and UI reads never contend on a
//! single lock.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dockline_types::{ChatMessage, ReadReceipt, SessionId, TaskStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// An assistant response being assembled from streamed chunks.
#[derive(Debug, Clone)]
pub struct StreamingMessage {
    /// Concatenated text received so far
    pub text: String,
    /// Raw chunks in arrival order
    pub chunks: Vec<String>,
    /// Set once the final chunk arrives; the entry is immutable afterwards
    pub is_complete: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StreamingMessage {
    fn new() -> Self {
        Self {
            text: String::new(),
            chunks: Vec::new(),
            is_complete: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

#[derive(Debug)]
struct TypingEntry {
    is_typing: bool,
    session_id: SessionId,
    seen_at: Instant,
}

#[derive(Debug)]
struct TaskEntry {
    status: TaskStatus,
    /// Update generation; a scheduled sweep only removes the task if no
    /// later update has replaced it
    generation: u64,
}

/// Client-side chat state: the message list for the active session plus the
/// keyed maps (streaming responses, typing indicators, read receipts, task
/// progress) the router maintains.
pub struct ChatStore {
    active_session: Mutex<Option<SessionId>>,
    messages: Mutex<Vec<ChatMessage>>,
    streaming: DashMap<String, StreamingMessage>,
    typing: DashMap<String, TypingEntry>,
    read_receipts: DashMap<String, Vec<ReadReceipt>>,
    tasks: DashMap<String, TaskEntry>,
    task_generation: AtomicU64,
    typing_ttl: Duration,
    task_retention: Duration,
}

impl ChatStore {
    pub fn new(typing_ttl: Duration, task_retention: Duration) -> Self {
        Self {
            active_session: Mutex::new(None),
            messages: Mutex::new(Vec::new()),
            streaming: DashMap::new(),
            typing: DashMap::new(),
            read_receipts: DashMap::new(),
            tasks: DashMap::new(),
            task_generation: AtomicU64::new(0),
            typing_ttl,
            task_retention,
        }
    }

    // === Active session ===

    /// Session whose messages populate the message list. Also the session
    /// the client auto-subscribes to when a connection is established.
    pub fn active_session(&self) -> Option<SessionId> {
        *self.active_session.lock().unwrap()
    }

    pub fn set_active_session(&self, session: Option<SessionId>) {
        *self.active_session.lock().unwrap() = session;
    }

    // === Message list ===

    /// Snapshot of the message list in arrival order.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn contains_message(&self, message_id: &str) -> bool {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.id == message_id)
    }

    /// Append a message unless one with the same id is already present.
    /// Returns whether the message was added.
    pub fn push_message(&self, message: ChatMessage) -> bool {
        let mut messages = self.messages.lock().unwrap();
        if messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        messages.push(message);
        true
    }

    /// Replace the text of an existing message (used when a streamed
    /// response finishes assembling). Returns whether a matching entry
    /// existed.
    pub fn set_message_text(&self, message_id: &str, text: &str) -> bool {
        let mut messages = self.messages.lock().unwrap();
        match messages.iter_mut().find(|m| m.id == message_id) {
            Some(message) => {
                message.text = text.to_string();
                true
            }
            None => false,
        }
    }

    // === Streaming messages ===

    /// Begin assembling a streamed response, discarding any stale partial
    /// state left from an interrupted earlier stream with the same id.
    pub fn start_stream(&self, message_id: &str) {
        self.streaming
            .insert(message_id.to_string(), StreamingMessage::new());
    }

    /// Append one chunk. Creates the entry if the first chunk was missed.
    /// Chunks arriving after completion are ignored.
    pub fn append_chunk(&self, message_id: &str, chunk: &str) {
        let mut entry = self
            .streaming
            .entry(message_id.to_string())
            .or_insert_with(StreamingMessage::new);
        if entry.is_complete {
            debug!(
                target: "dockline::store",
                "Ignoring chunk for completed stream {}", message_id
            );
            return;
        }
        entry.chunks.push(chunk.to_string());
        entry.text.push_str(chunk);
    }

    /// Seal a streamed response and return its final text.
    pub fn finish_stream(&self, message_id: &str) -> Option<String> {
        let mut entry = self.streaming.get_mut(message_id)?;
        entry.is_complete = true;
        entry.finished_at = Some(Utc::now());
        Some(entry.text.clone())
    }

    pub fn streaming_message(&self, message_id: &str) -> Option<StreamingMessage> {
        self.streaming.get(message_id).map(|e| e.value().clone())
    }

    // === Typing indicators ===

    /// Record a typing update for a user, overwriting any previous state.
    pub fn set_typing(&self, user_id: &str, session_id: SessionId, is_typing: bool) {
        self.typing.insert(
            user_id.to_string(),
            TypingEntry {
                is_typing,
                session_id,
                seen_at: Instant::now(),
            },
        );
    }

    /// Users currently typing in a session. Entries older than the typing
    /// TTL are expired here, on read, so the map cannot grow without bound.
    pub fn typing_users(&self, session_id: SessionId) -> Vec<String> {
        let now = Instant::now();
        self.typing
            .retain(|_, entry| now.duration_since(entry.seen_at) < self.typing_ttl);
        let mut users: Vec<String> = self
            .typing
            .iter()
            .filter(|entry| entry.is_typing && entry.session_id == session_id)
            .map(|entry| entry.key().clone())
            .collect();
        users.sort();
        users
    }

    pub fn is_typing(&self, user_id: &str, session_id: SessionId) -> bool {
        self.typing_users(session_id).iter().any(|u| u == user_id)
    }

    // === Read receipts ===

    /// Record that a user read a message. Returns `false` when the same
    /// reader was already recorded for the message.
    pub fn mark_read(&self, message_id: &str, receipt: ReadReceipt) -> bool {
        let mut readers = self
            .read_receipts
            .entry(message_id.to_string())
            .or_default();
        if readers.iter().any(|r| r.user_id == receipt.user_id) {
            return false;
        }
        readers.push(receipt);
        true
    }

    pub fn read_receipts(&self, message_id: &str) -> Vec<ReadReceipt> {
        self.read_receipts
            .get(message_id)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    // === Task progress ===

    /// Upsert a task status report. Terminal states stay visible for the
    /// retention window and are then swept, unless a newer update has
    /// restarted the task in the meantime.
    pub fn update_task(self: &Arc<Self>, status: TaskStatus) {
        let generation = self.task_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let terminal = status.state.is_terminal();
        let task_id = status.task_id.clone();
        self.tasks
            .insert(task_id.clone(), TaskEntry { status, generation });

        if terminal {
            let store = Arc::clone(self);
            let retention = self.task_retention;
            tokio::spawn(async move {
                tokio::time::sleep(retention).await;
                store.reap_task(&task_id, generation);
            });
        }
    }

    fn reap_task(&self, task_id: &str, generation: u64) {
        let removed = self
            .tasks
            .remove_if(task_id, |_, entry| entry.generation == generation);
        if removed.is_some() {
            debug!(target: "dockline::store", "Expired finished task {}", task_id);
        }
    }

    pub fn task(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks.get(task_id).map(|e| e.status.clone())
    }

    /// Snapshot of all tasks still within their lifetime.
    pub fn tasks(&self) -> Vec<TaskStatus> {
        let mut tasks: Vec<TaskStatus> =
            self.tasks.iter().map(|e| e.status.clone()).collect();
        tasks.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        tasks
    }
}
