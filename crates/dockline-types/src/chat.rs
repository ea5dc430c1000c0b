//! Chat data types shared between the wire protocol and the client store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a chat session. The console backend keys sessions by
/// database row id, so these are plain integers rather than UUIDs.
pub type SessionId = i64;

/// A chat message within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Server-issued message identifier
    pub id: String,
    /// Session this message belongs to
    pub session_id: SessionId,
    /// Who sent this message
    pub role: ChatRole,
    /// Message text content (replaced wholesale when a streamed response
    /// finishes assembling)
    pub text: String,
    /// Message timestamp
    pub timestamp: DateTime<Utc>,
}

/// Role of the message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// A console user's prompt
    User,
    /// The assistant's response
    Assistant,
    /// Backend-generated notices (task summaries, warnings)
    System,
}

impl ChatMessage {
    /// Create a message stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        session_id: SessionId,
        role: ChatRole,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            session_id,
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Lifecycle state of a long-running backend task (image pull, backup,
/// security scan) reported over the realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Running,
    Complete,
    Failed,
}

impl TaskState {
    /// Whether the task has finished and will not report further progress.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Complete | TaskState::Failed)
    }
}

/// Latest known status of a backend task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub session_id: SessionId,
    pub state: TaskState,
    /// Progress percentage in `0.0..=100.0`
    pub progress: f64,
    /// Human-readable description of the current step
    pub message: String,
    /// Task-specific payload, opaque to the client
    #[serde(default)]
    pub data: Value,
    pub updated_at: DateTime<Utc>,
}

/// Record of one user having read one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_role_serialization() {
        assert_eq!(serde_json::to_string(&ChatRole::User).unwrap(), r#""user""#);
        assert_eq!(
            serde_json::to_string(&ChatRole::Assistant).unwrap(),
            r#""assistant""#
        );
    }

    #[test]
    fn test_task_state_tags() {
        assert_eq!(
            serde_json::to_string(&TaskState::Running).unwrap(),
            r#""running""#
        );
        let state: TaskState = serde_json::from_str(r#""failed""#).unwrap();
        assert_eq!(state, TaskState::Failed);
    }

    #[test]
    fn test_task_state_terminal() {
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Complete.is_terminal());
        assert!(TaskState::Failed.is_terminal());
    }

    #[test]
    fn test_task_status_data_defaults_to_null() {
        let status: TaskStatus = serde_json::from_str(
            r#"{
                "task_id": "pull-nginx",
                "session_id": 7,
                "state": "running",
                "progress": 40.0,
                "message": "Pulling layer 3/8",
                "updated_at": "2025-06-01T12:00:00Z"
            }"#,
        )
        .unwrap();
        assert!(status.data.is_null());
    }
}
