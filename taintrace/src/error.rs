//! Errors the engine can raise at its boundaries

use std::path::PathBuf;

use thiserror::Error;

/// Custom errors the tracer can throw
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed startup configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The replay server could not be reached
    #[error("Failed to talk to the replay server at {path:?}: {source}")]
    Server {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The replay server sent something we did not expect
    #[error("Replay server protocol error: {0}")]
    Protocol(String),

    /// A function could not be wrapped. Never fatal.
    #[error("Failed to hook {function}: {reason}")]
    Hook { function: String, reason: String },

    /// A module image could not be parsed
    #[error("Failed to parse module image: {0}")]
    Image(String),

    /// A crash artifact could not be written
    #[error("Failed to persist crash artifact to {path:?}: {source}")]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
