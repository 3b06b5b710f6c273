//! Server error types

use rmi_codec::ProtocolError;
use rmi_network::TransportError;
use thiserror::Error;

/// Errors raised while exposing objects or talking to callers
#[derive(Debug, Error)]
pub enum ServerError {
    /// An action map names something the backing object cannot do
    #[error(
        "The action '{action}' is not a method of {object}; invoking it remotely would fail"
    )]
    UnknownAction { action: String, object: String },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// A handler stub was asked to emit on a surface the caller never declared
    #[error("Remote handler has no event named '{event}'")]
    UnknownSurface { event: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for server operations
pub type Result<T> = std::result::Result<T, ServerError>;

impl ServerError {
    pub fn unknown_action(action: impl Into<String>, object: impl Into<String>) -> Self {
        Self::UnknownAction {
            action: action.into(),
            object: object.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
