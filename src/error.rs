//! Songlist Error Types

use thiserror::Error;

/// Result type alias for songlist operations
pub type Result<T> = std::result::Result<T, Error>;

/// Songlist error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Wire protocol errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Song list payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Line framing error: {0}")]
    Framing(#[from] tokio_util::codec::LinesCodecError),

    // Network errors
    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    // Room errors
    #[error("Vote request received with no known coordinator")]
    NoCoordinator,

    #[error("Room state error: {0}")]
    State(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
