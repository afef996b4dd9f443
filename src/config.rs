//! Configuration loading and validation.

use crate::error::{ConfigError, Result};
use anyhow::Context as _;
use std::path::PathBuf;

/// SydneyBot configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Discord bot token.
    pub discord_token: String,

    /// Data directory path (database, logs).
    pub data_dir: PathBuf,

    /// Completion backend configuration.
    pub completion: CompletionConfig,

    /// Trigger word configuration.
    pub triggers: TriggerConfig,
}

/// Completion backend configuration: two logical backends behind one
/// OpenAI-compatible endpoint, selected by API key and model name.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// Base URL of the chat-completions endpoint.
    pub base_url: String,

    /// API key for the standard backend.
    pub standard_api_key: String,

    /// API key for the premium backend.
    pub premium_api_key: String,

    /// Model served by the standard backend.
    pub standard_model: String,

    /// Model served by the premium backend.
    pub premium_model: String,
}

/// Words that cause an unconditional response when they appear in a message.
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// Trigger words answered by the standard backend.
    pub words: Vec<String>,

    /// Trigger words routed to the premium backend.
    pub expensive_words: Vec<String>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            words: ["sydney", "syd", "s!talk", "sydneybot#3817"]
                .map(String::from)
                .to_vec(),
            expensive_words: vec!["xxx".to_string()],
        }
    }
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// Missing credentials fail here, before any connection is attempted.
    pub fn load() -> Result<Self> {
        let discord_token = require_env("DISCORD_TOKEN")?;
        let standard_api_key = require_env("OPENPIPE_API_KEY")?;
        let premium_api_key = require_env("OPENPIPE_API_KEY_EXPENSIVE")?;

        let data_dir = std::env::var("SYDNEYBOT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .map(|d| d.join("sydneybot"))
                    .unwrap_or_else(|| PathBuf::from("./data"))
            });

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
        std::fs::create_dir_all(data_dir.join("logs"))
            .with_context(|| "failed to create log directory")?;

        let completion = CompletionConfig {
            base_url: std::env::var("OPENPIPE_BASE_URL")
                .unwrap_or_else(|_| "https://api.openpipe.ai/api/v1".into()),
            standard_api_key,
            premium_api_key,
            standard_model: std::env::var("SYDNEYBOT_STANDARD_MODEL")
                .unwrap_or_else(|_| "openpipe:Sydney-Court".into()),
            premium_model: std::env::var("SYDNEYBOT_PREMIUM_MODEL")
                .unwrap_or_else(|_| "openpipe:CSRv2".into()),
        };

        Ok(Self {
            discord_token,
            data_dir,
            completion,
            triggers: TriggerConfig::default(),
        })
    }

    /// Get the SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("sydneybot.db")
    }

    /// Get the log directory path.
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn require_env(key: &'static str) -> Result<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ConfigError::MissingKey(key).into())
}
