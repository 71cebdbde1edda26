//! Configuration file support

use claw_client::{CredentialProvider, EnvToken, StaticToken};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const TOKEN_ENV_VAR: &str = "CLAW_TOKEN";

/// Configuration for claw
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the chat service
    pub base_url: Option<String>,
    /// Bearer token (alternative to CLAW_TOKEN)
    pub token: Option<String>,
    /// Conversation opened when --agent is not given
    pub default_conversation: Option<String>,
    /// Number of messages requested when loading history
    pub history_limit: Option<u32>,
    /// Timeout for establishing a connection
    pub connect_timeout_secs: Option<u64>,
    /// Timeout for history and clear requests
    pub request_timeout_secs: Option<u64>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("claw")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("CLAW_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Self::default()
            }),
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            base_url: Some(DEFAULT_BASE_URL.to_string()),
            history_limit: Some(claw_client::transport::DEFAULT_HISTORY_LIMIT),
            ..Default::default()
        };

        default_config.save()?;
        Ok(path)
    }

    pub fn base_url(&self, flag: Option<String>) -> String {
        flag.or_else(|| self.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    /// Get the bearer token from the flag or the config file
    pub fn token(&self, flag: Option<String>) -> Option<String> {
        flag.or_else(|| self.token.clone())
            .filter(|token| !token.is_empty())
    }

    /// Credentials for requests: the flag or config token, otherwise CLAW_TOKEN
    pub fn credentials(&self, flag: Option<String>) -> Arc<dyn CredentialProvider> {
        match self.token(flag) {
            Some(token) => Arc::new(StaticToken::new(token)),
            None => Arc::new(EnvToken::new(TOKEN_ENV_VAR)),
        }
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# claw configuration file
# Place at ~/.config/claw/config.toml (Linux/Mac) or %APPDATA%\claw\config.toml (Windows)

# Chat service to talk to
base_url = "http://localhost:8000"

# Bearer token (optional - CLAW_TOKEN is used when unset)
# token = "..."

# Conversation opened when --agent is not given
# default_conversation = "my-agent"

# Messages fetched when a conversation is opened
history_limit = 50

# Timeouts in seconds
# connect_timeout_secs = 10
# request_timeout_secs = 10
"#
}
