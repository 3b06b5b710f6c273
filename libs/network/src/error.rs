//! Transport Error Types

use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The connection has been closed by either side
    #[error("Connection closed: {connection}")]
    Closed { connection: String },

    /// Connection establishment or acceptance failed
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// The peer handled a call but dropped its acknowledgement without replying
    #[error("No reply: {event} was handled without an acknowledgement")]
    Unanswered { event: String },

    /// No acknowledgement arrived in time
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a closed-connection error
    pub fn closed(connection: impl ToString) -> Self {
        Self::Closed {
            connection: connection.to_string(),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create an unanswered-call error
    pub fn unanswered(event: impl Into<String>) -> Self {
        Self::Unanswered {
            event: event.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Whether the error means the peer is gone for good
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}
