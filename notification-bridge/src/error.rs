//! Error types for the notification bridge

use thiserror::Error;

/// Notification bridge error
#[derive(Debug, Error)]
pub enum Error {
    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Real-time publish error
    #[error("Publish error: {0}")]
    Publish(String),

    /// Push gateway rejected the message
    #[error("Push error: {0}")]
    Push(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid room name
    #[error("Invalid room: {0}")]
    InvalidRoom(String),

    /// Operation timed out (milliseconds)
    #[error("Timed out after {0}ms")]
    Timeout(u64),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
