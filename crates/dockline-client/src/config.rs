//! Client configuration.

use crate::backoff::ReconnectPolicy;
use crate::error::ClientError;
use std::time::Duration;
use url::Url;

/// Tuning knobs for a [`crate::ChatClient`].
///
/// Defaults match the console's production values: five reconnect attempts
/// starting at one second and capped at thirty, a thirty-second keepalive
/// ping, and thirty seconds of retention for finished tasks.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base origin of the console backend, e.g. `ws://127.0.0.1:8080`.
    /// The socket path `/ws/<user_id>` is appended per connection.
    pub endpoint: String,
    /// Give up reconnecting after this many consecutive failures.
    pub max_reconnect_attempts: u32,
    /// First reconnect delay; doubles per attempt.
    pub reconnect_base_delay: Duration,
    /// Ceiling on the reconnect delay.
    pub reconnect_max_delay: Duration,
    /// Interval between keepalive pings while connected.
    pub keepalive_interval: Duration,
    /// Typing indicators older than this are treated as expired.
    pub typing_ttl: Duration,
    /// How long finished tasks stay visible before being dropped.
    pub task_retention: Duration,
    /// Outbound frame queue depth; sends fail once it is full.
    pub send_queue_capacity: usize,
    /// Event broadcast channel depth.
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8080".to_string(),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(30),
            typing_ttl: Duration::from_secs(10),
            task_retention: Duration::from_secs(30),
            send_queue_capacity: 32,
            event_capacity: 256,
        }
    }
}

impl ClientConfig {
    /// Build a config pointing at the given backend origin.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Reconnect policy derived from this config.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: self.reconnect_base_delay,
            max_delay: self.reconnect_max_delay,
            max_attempts: self.max_reconnect_attempts,
        }
    }

    /// Full socket URL for a user: `<endpoint>/ws/<user_id>`.
    pub fn socket_url(&self, user_id: &str) -> crate::Result<Url> {
        let mut url = Url::parse(&self.endpoint)?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(ClientError::UnsupportedScheme(other.to_string())),
        }
        url.set_path(&format!("/ws/{user_id}"));
        Ok(url)
    }
}
