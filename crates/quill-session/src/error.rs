//! Error types for the editor session layer.

/// Session error type.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Core engine error.
    #[error("core error: {0}")]
    Core(#[from] quill_core::Error),

    /// The editor channel broke or misbehaved.
    #[error("editor link error: {0}")]
    Link(String),

    /// The editor answered a request with the wrong reply kind.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The editor reported a failed operation.
    #[error("editor rejected request: {0}")]
    EditorRejected(String),

    /// JSON encoding/decoding of a wire message failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error on the editor channel.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;
