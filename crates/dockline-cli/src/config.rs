//! CLI configuration.

use anyhow::Result;
use dockline_client::ClientConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_typing_ttl_secs")]
    pub typing_ttl_secs: u64,
    #[serde(default = "default_task_retention_secs")]
    pub task_retention_secs: u64,
}

fn default_server_url() -> String {
    "ws://127.0.0.1:8080".to_string()
}

fn default_user_id() -> String {
    "anonymous".to_string()
}

fn default_keepalive_secs() -> u64 {
    30
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_typing_ttl_secs() -> u64 {
    10
}

fn default_task_retention_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            user_id: default_user_id(),
            keepalive_secs: default_keepalive_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            typing_ttl_secs: default_typing_ttl_secs(),
            task_retention_secs: default_task_retention_secs(),
        }
    }
}

impl Config {
    /// Load config from a specific file path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load config from `config/default.toml`, then the user config
    /// directory, or fall back to defaults.
    pub fn load() -> Result<Self> {
        let local = PathBuf::from("config/default.toml");
        if local.exists() {
            return Self::load_from(&local);
        }

        if let Some(dir) = dirs::config_dir() {
            let user = dir.join("dockline").join("config.toml");
            if user.exists() {
                return Self::load_from(&user);
            }
        }

        Ok(Config::default())
    }

    /// Client configuration derived from this file.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoint: self.server_url.clone(),
            max_reconnect_attempts: self.max_reconnect_attempts,
            keepalive_interval: Duration::from_secs(self.keepalive_secs),
            typing_ttl: Duration::from_secs(self.typing_ttl_secs),
            task_retention: Duration::from_secs(self.task_retention_secs),
            ..ClientConfig::default()
        }
    }
}
