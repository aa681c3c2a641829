//! Configuration loading and management.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server information.
    pub server: ServerConfig,
    /// Network listen configuration.
    pub listen: ListenConfig,
    /// Database configuration.
    pub database: Option<DatabaseConfig>,
    /// Presence/typing tuning.
    #[serde(default)]
    pub presence: PresenceConfig,
    /// External summarization service. Absent means summarization is
    /// disabled and requests fail with an external-service error.
    pub summarize: Option<SummarizeConfig>,
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name (e.g., "chat.palaver.im").
    pub name: String,
}

/// Network listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Address to bind the WebSocket listener to (e.g., "0.0.0.0:4000").
    pub address: SocketAddr,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file, or ":memory:".
    pub path: String,
}

/// Presence/typing tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct PresenceConfig {
    /// Quiet window after the last typing signal before `stop typing` is
    /// broadcast, in milliseconds.
    #[serde(default = "default_typing_quiet_ms")]
    pub typing_quiet_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            typing_quiet_ms: default_typing_quiet_ms(),
        }
    }
}

fn default_typing_quiet_ms() -> u64 {
    3000
}

/// External summarization service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SummarizeConfig {
    /// Endpoint accepting `{ "text": ... }` and returning `{ "summary": ... }`.
    pub endpoint: String,
    /// Bearer token for the service.
    pub api_key: String,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
