use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub webhook: WebhookConfig,
    pub llm: LlmConfig,
    pub video: VideoConfig,
    pub chat: ChatConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Override path for the SQLite database. Defaults to the data dir.
    pub db_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3839,
            db_path: None,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Shared secret for webhook signature verification (HMAC-SHA256 over
    /// the raw request body, hex-encoded in the x-signature header).
    pub secret: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "gpt-4o".to_string(),
            endpoint: None,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

/// Retry/backoff tuning for the transcript processing pipeline. The exact
/// schedule is deliberately configuration, not code constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Attempts to poll the meeting record for a transcript URL.
    pub poll_attempts: u32,
    /// Base backoff between poll attempts; attempt N waits N * base seconds.
    pub poll_backoff_secs: u64,
    /// Attempts to download the transcript artifact.
    pub fetch_attempts: u32,
    /// Base backoff between fetch attempts; attempt N waits N * base seconds.
    pub fetch_backoff_secs: u64,
    /// Rounds of re-fetch/re-parse when the parsed transcript is empty.
    pub empty_retry_attempts: u32,
    /// Backoff between empty-transcript retry rounds, in seconds.
    pub empty_retry_backoff_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_attempts: 6,
            poll_backoff_secs: 15,
            fetch_attempts: 3,
            fetch_backoff_secs: 5,
            empty_retry_attempts: 2,
            empty_retry_backoff_secs: 10,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}
