//! Coordination Client Error Hierarchy
//!
//! Errors are split by where they are detected: argument and size checks
//! fail before any I/O, store errors come back from the session transport,
//! and session errors decide whether the retry loop keeps going.

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed path or arguments, detected synchronously
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Payload rejected client-side, no request reaches the store
    #[error("Payload of {size} bytes for {path} exceeds the {limit} byte node size limit")]
    PayloadTooLarge {
        path: String,
        size: usize,
        limit: usize,
    },

    /// Operation targets an absent path
    #[error("No node exists at {0}")]
    NoSuchNode(String),

    /// Create raced with (or repeated) an existing node
    #[error("Node already exists at {0}")]
    NodeExists(String),

    /// Delete of a node which still has children
    #[error("Node {0} still has children")]
    NotEmpty(String),

    /// Conditional write lost a race
    #[error("Version conflict at {path}: expected {expected}, found {actual}")]
    VersionConflict {
        path: String,
        expected: i32,
        actual: i32,
    },

    /// Session is unrecoverable; never retried
    #[error("Invalid session: {0}")]
    InvalidSession(String),

    /// Transport lost its connection; retried until the deadline
    #[error("Connection to the coordination store lost: {0}")]
    TransientConnectionLoss(String),

    /// Raw transport signal that the session behind a handle expired
    #[error("Session {0:#x} expired")]
    SessionExpired(u64),

    /// Payload could not be encoded or decoded
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// Configuration loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration validation failures
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Metric registration failures
    #[error(transparent)]
    Metrics(#[from] prometheus::Error),

    /// Worker thread could not be started
    #[error("Failed to spawn client worker: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the retry loop should wait for the session and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransientConnectionLoss(_) | Error::SessionExpired(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("JSON codec failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Bincode codec failed: {0}")]
    Bincode(#[from] bincode::Error),

    /// Zero-length payload where a record was expected
    #[error("Empty payload at {0}")]
    EmptyPayload(String),
}
