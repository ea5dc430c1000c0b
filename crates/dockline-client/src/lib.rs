//! Realtime chat client for the Dockline console.
//!
//! Owns the single WebSocket to the console backend and keeps the shared
//! chat state (messages, streaming responses, typing indicators, read
//! receipts, task progress) current as frames arrive. Reconnects with
//! exponential backoff on abnormal closure and replays session
//! subscriptions after every reconnect.

mod backoff;
mod client;
mod config;
mod error;
mod router;
mod store;

pub use backoff::ReconnectPolicy;
pub use client::{ChatClient, ClientEvent, ConnectionStatus};
pub use config::ClientConfig;
pub use error::ClientError;
pub use store::{ChatStore, StreamingMessage};

/// Result type for Dockline client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
