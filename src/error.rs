// Error types surfaced by producers and configuration loading

use thiserror::Error;

/// Failure raised by a fragment producer mid-stream.
///
/// Whatever the variant, the controller only keeps its `Display` text as the
/// session's error message.
#[derive(Debug, Error)]
pub enum ProducerError {
    /// The HTTP request could not be sent or the body could not be read.
    #[error("Failed to reach the model server: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("API call failed with status: {0}")]
    Status(reqwest::StatusCode),

    /// The server reported an error inside the stream.
    #[error("{0}")]
    Remote(String),

    /// A stream line was not valid JSON.
    #[error("Malformed stream line: {0}")]
    Decode(#[from] serde_json::Error),

    /// Any other failure, carried as a plain message.
    #[error("{0}")]
    Failed(String),
}

impl ProducerError {
    pub fn failed(message: impl Into<String>) -> Self {
        ProducerError::Failed(message.into())
    }
}

/// Errors raised while loading a [`crate::config::Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
