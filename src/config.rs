// Runtime settings for generation: model server, model and render pacing

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.2";
pub const DEFAULT_SYSTEM_PROMPT: &str = "Continue the user's text seamlessly. \
Respond with only the continuation as plain text. Do not repeat the given text \
and do not include any explanations or formatting.";

/// Generation settings. Every field has a default so partial files load.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ollama_host: String,
    pub model: String,
    /// Time between two drain steps of the render queue.
    pub frame_interval_ms: u64,
    pub connect_timeout_secs: u64,
    pub system_prompt: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ollama_host: DEFAULT_OLLAMA_HOST.to_string(),
            model: DEFAULT_MODEL.to_string(),
            frame_interval_ms: 16,
            connect_timeout_secs: 5,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl Config {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Apply `OLLAMA_HOST` and `OLLAMAWRITE_MODEL` if they are set and non-empty.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(host) = lookup("OLLAMA_HOST").filter(|v| !v.trim().is_empty()) {
            self.ollama_host = host;
        }
        if let Some(model) = lookup("OLLAMAWRITE_MODEL").filter(|v| !v.trim().is_empty()) {
            self.model = model;
        }
        self
    }

    pub fn frame_interval(&self) -> Duration {
        // A zero interval would make tokio's interval panic.
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Host root without a trailing slash, e.g. `http://localhost:11434`.
    pub fn host_root(&self) -> &str {
        self.ollama_host.trim_end_matches('/')
    }
}
