//! WebSocket frame protocol between the console client and backend.
//!
//! Every frame is one JSON object carrying a snake_case `type` tag. The
//! backend serves the socket at `ws(s)://<host>/ws/<user_id>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ChatMessage, SessionId, TaskState};

/// Frames sent from client to backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Start receiving live updates for a session.
    Subscribe { session_id: SessionId },
    /// Stop receiving live updates for a session.
    Unsubscribe { session_id: SessionId },
    /// Report the local user's typing state to other subscribers.
    Typing {
        is_typing: bool,
        session_id: SessionId,
    },
    /// Acknowledge that the local user has read a message.
    ReadReceipt {
        message_id: String,
        session_id: SessionId,
    },
    /// Keepalive probe.
    Ping { timestamp: DateTime<Utc> },
}

/// Frames sent from backend to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// First frame after the socket opens.
    ConnectionEstablished {
        user_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A complete message posted to a subscribed session.
    ChatMessage {
        message: ChatMessage,
        session_id: SessionId,
        timestamp: DateTime<Utc>,
    },
    /// One fragment of an assistant response streamed incrementally.
    MessageChunk {
        message_id: String,
        session_id: SessionId,
        chunk: String,
        is_first: bool,
        is_last: bool,
        /// Position of this chunk within the stream, when the backend
        /// includes it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chunk_index: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_chunks: Option<u32>,
        timestamp: DateTime<Utc>,
    },
    /// Another subscriber started or stopped typing.
    TypingStatus {
        user_id: String,
        is_typing: bool,
        session_id: SessionId,
        timestamp: DateTime<Utc>,
    },
    /// Another subscriber read a message.
    ReadReceipt {
        message_id: String,
        user_id: String,
        session_id: SessionId,
        timestamp: DateTime<Utc>,
    },
    /// Progress report for a long-running backend task.
    TaskUpdate {
        task_id: String,
        session_id: SessionId,
        status: TaskState,
        progress: f64,
        message: String,
        #[serde(default)]
        data: Value,
        timestamp: DateTime<Utc>,
    },
    /// Keepalive acknowledgment.
    Pong { timestamp: DateTime<Utc> },
    /// Backend-reported error; informational only.
    Error { error: String },
}
