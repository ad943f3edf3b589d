//! Error types for kvwire-client.

use thiserror::Error;

use crate::protocol::ErrorKind;

/// Main error type for all kvwire operations.
#[derive(Debug, Error)]
pub enum KvError {
    /// I/O error while connecting or on a local socket call.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol violation (malformed frame, count mismatch, unexpected frame).
    ///
    /// Fatal for the connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A response arrived for a token with no pending entry.
    #[error("Unexpected response for token {0}")]
    UnexpectedResponse(u32),

    /// A token was registered while another request with it was still pending.
    #[error("Token {0} is already pending")]
    DuplicateToken(u32),

    /// Outbound payload exceeds the configured frame limit.
    #[error("Frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Encoded payload size.
        size: usize,
        /// Configured maximum.
        max: u32,
    },

    /// The correlation table is full.
    #[error("Too many pending requests (max {max})")]
    TooManyPending {
        /// Configured maximum.
        max: usize,
    },

    /// Error payload returned by the server for one request.
    #[error("Server error ({kind:?}): {message}")]
    Server {
        /// Error category.
        kind: ErrorKind,
        /// Server-provided message.
        message: String,
    },

    /// The server announced the connection can no longer be used.
    #[error("Server closed the connection: {0}")]
    ClosingError(String),

    /// Connection closed locally or by the peer.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The underlying transport failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The request deadline passed before a response arrived.
    #[error("Request timed out")]
    Timeout,

    /// The caller abandoned the request.
    #[error("Request cancelled")]
    Cancelled,

    /// Backpressure timeout - write queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

impl KvError {
    /// Whether this error tears down the whole connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KvError::Protocol(_)
                | KvError::ClosingError(_)
                | KvError::ConnectionClosed
                | KvError::Transport(_)
        )
    }
}

/// Result type alias using KvError.
pub type Result<T> = std::result::Result<T, KvError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(KvError::Protocol("bad".into()).is_fatal());
        assert!(KvError::ConnectionClosed.is_fatal());
        assert!(KvError::Transport("reset".into()).is_fatal());
        assert!(KvError::ClosingError("bye".into()).is_fatal());

        assert!(!KvError::Timeout.is_fatal());
        assert!(!KvError::Cancelled.is_fatal());
        assert!(!KvError::UnexpectedResponse(7).is_fatal());
        assert!(!KvError::Server {
            kind: ErrorKind::Unspecified,
            message: "WRONGTYPE".into(),
        }
        .is_fatal());
    }

    #[test]
    fn test_display_messages() {
        let err = KvError::FrameTooLarge { size: 10, max: 5 };
        assert_eq!(err.to_string(), "Frame of 10 bytes exceeds maximum 5");

        let err = KvError::Server {
            kind: ErrorKind::ExecAbort,
            message: "EXECABORT".into(),
        };
        assert!(err.to_string().contains("ExecAbort"));
    }
}
