//! Error types for the sale watcher.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("API error: {message}")]
    Api { message: String, status: Option<u16> },

    #[error("RPC error: {message}")]
    Rpc { message: String, code: Option<i64> },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Undecodable log: {0}")]
    UndecodableLog(String),

    #[error("Classification error: {0}")]
    Classification(String),

    #[error("Notification error: {0}")]
    Notification(String),
}

/// Coarse failure classes that decide how the pipeline reacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network, RPC or timeout failure. The cycle aborts and is retried later.
    Transport,
    /// A single malformed log. Skipped.
    UndecodableLog,
    /// Transaction detail missing. The candidate is discarded.
    Classification,
    /// Delivery failed. Logged, the event stays marked as seen.
    Notification,
    /// Bootstrap configuration problem.
    Config,
    /// A payload could not be parsed.
    Decode,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::WebSocket(_)
            | Error::Http(_)
            | Error::Api { .. }
            | Error::Rpc { .. }
            | Error::Timeout(_) => ErrorKind::Transport,
            Error::Json(_) => ErrorKind::Decode,
            Error::ConfigFile(_) | Error::Config { .. } => ErrorKind::Config,
            Error::UndecodableLog(_) => ErrorKind::UndecodableLog,
            Error::Classification(_) => ErrorKind::Classification,
            Error::Notification(_) => ErrorKind::Notification,
        }
    }

    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }

    pub fn undecodable(reason: impl Into<String>) -> Self {
        Error::UndecodableLog(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
