//! Error types for quill-core.

use thiserror::Error;

/// Result type for quill-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in quill-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Interpreter executable missing or unusable.
    ///
    /// Fatal for that language until corrected externally; never retried.
    #[error("failed to spawn {language} interpreter: {message}")]
    Spawn { language: String, message: String },

    /// No output within the configured window.
    ///
    /// The process is killed and left dead; recoverable by an explicit reinit.
    #[error("{language} interpreter produced no output for {:.1}s", waited.as_secs_f64())]
    InterpreterTimeout {
        language: String,
        waited: std::time::Duration,
    },

    /// The interpreter reported an error while evaluating a cell.
    ///
    /// Carries the output captured so far; recovered locally by writing it
    /// back as the cell's output.
    #[error("interpreter error: {0}")]
    InterpreterError(String),

    /// Malformed cell markup in the document.
    ///
    /// Aborts the whole request before any document mutation. Lines are
    /// 1-based for reporting.
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// No interpreter spec registered for this language.
    #[error("unknown language: {0}")]
    UnknownLanguage(String),

    /// PTY channel failure.
    #[error("PTY error: {0}")]
    Pty(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this failure leaves the interpreter process dead.
    pub fn is_fatal_to_process(&self) -> bool {
        matches!(
            self,
            Error::Spawn { .. } | Error::InterpreterTimeout { .. } | Error::Pty(_)
        )
    }
}
