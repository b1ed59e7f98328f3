//! Error types for chunkwire.

use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for protocol, transfer and session operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Peer closed the stream before a complete message arrived.
    #[error("connection closed{}", partial_suffix(.partial))]
    ConnectionClosed { partial: String },

    /// A read deadline elapsed while waiting for bytes.
    #[error("timed out after {ms} ms")]
    Timeout { ms: u64 },

    /// Malformed header: wrong field count, non-numeric sizes, bad UTF-8.
    #[error("protocol violation: {message}")]
    ProtocolViolation { message: String },

    /// Requested file does not exist in the served directory.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// The server answered with an ERROR response.
    #[error("server error: {message}")]
    Server { message: String },

    /// Received byte total differs from the advertised size.
    #[error("size mismatch: expected {expected} bytes, got {received}")]
    SizeMismatch { expected: u64, received: u64 },

    /// Local disk or socket I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fieldless discriminant of [`Error`], handy for matching in callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConnectionClosed,
    Timeout,
    ProtocolViolation,
    NotFound,
    Server,
    SizeMismatch,
    Io,
}

fn partial_suffix(partial: &str) -> String {
    if partial.is_empty() {
        String::new()
    } else {
        format!(" (partial line: '{}')", partial)
    }
}

impl Error {
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::ProtocolViolation {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConnectionClosed { .. } => ErrorKind::ConnectionClosed,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::ProtocolViolation { .. } => ErrorKind::ProtocolViolation,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Server { .. } => ErrorKind::Server,
            Error::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Returns true if the connection can no longer carry another command.
    ///
    /// After a closed stream, a timeout or a framing error the position in the
    /// byte stream is unknown, so the connection must be dropped.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            Error::ConnectionClosed { .. }
                | Error::Timeout { .. }
                | Error::ProtocolViolation { .. }
                | Error::Io(_)
                | Error::SizeMismatch { .. }
        )
    }
}
