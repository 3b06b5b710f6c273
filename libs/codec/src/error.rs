//! Protocol-level errors
//!
//! Two families live here:
//!
//! - [`ProtocolError`]: local failures while recognising or building protocol payloads.
//! - [`RmiError`]: errors raised by remotely invoked methods. These travel over the wire
//!   and carry an [`ErrorKind`] deciding which channel delivers them:
//!   - **Recoverable** errors ride the ordinary per-call reply as
//!     `{type: "error", error: {message, ..fields}}`.
//!   - **Uncatchable** errors bypass the reply and are emitted once on the
//!     connection-wide error event as `{type: "error", message, ..fields}`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::constants::{TYPE_ERROR, TYPE_FIELD};

/// Errors recognising or constructing protocol payloads
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// A tagged payload was missing fields its discriminator requires
    #[error("Malformed {discriminator} payload: {reason}")]
    MalformedPayload {
        discriminator: String,
        reason: String,
    },

    /// A payload carried a different discriminator than expected
    #[error("Unexpected discriminator: expected {expected}, got {got}")]
    UnexpectedDiscriminator { expected: String, got: String },

    /// An action name would make derived event names ambiguous
    #[error("Invalid action name '{action}': {reason}")]
    InvalidActionName { action: String, reason: String },
}

impl ProtocolError {
    pub fn malformed(discriminator: &str, reason: impl ToString) -> Self {
        Self::MalformedPayload {
            discriminator: discriminator.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Delivery tier of an [`RmiError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Delivered through the per-call reply; the connection stays usable.
    Recoverable,
    /// Delivered on the connection-wide error event; in-flight calls should be abandoned.
    Uncatchable,
}

/// An error raised by a remotely invoked method
///
/// Carries a message plus optional structured fields, which serialize alongside the
/// message so callers can branch on machine-readable data.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct RmiError {
    kind: ErrorKind,
    message: String,
    fields: Map<String, Value>,
}

impl RmiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            fields: Map::new(),
        }
    }

    /// Error reported to the caller through the per-call reply.
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Recoverable, message)
    }

    /// Error signalling protocol- or authorization-level compromise of the connection.
    pub fn uncatchable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Uncatchable, message)
    }

    /// Attach a structured field. `message` and `type` are reserved and ignored.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != "message" && key != TYPE_FIELD {
            self.fields.insert(key, value.into());
        }
        self
    }

    /// Formats an arbitrary returned value as a recoverable error.
    ///
    /// Objects are treated as already-serialized errors: their `message` string becomes the
    /// message and remaining members become fields. Strings become the message verbatim;
    /// anything else is rendered as JSON text.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(mut object) => {
                let message = match object.remove("message") {
                    Some(Value::String(message)) => message,
                    Some(other) => other.to_string(),
                    None => Value::Object(object.clone()).to_string(),
                };
                object.remove(TYPE_FIELD);
                Self {
                    kind: ErrorKind::Recoverable,
                    message,
                    fields: object,
                }
            }
            Value::String(message) => Self::recoverable(message),
            other => Self::recoverable(other.to_string()),
        }
    }

    /// Parses a per-call error reply, returning `None` for successful replies.
    pub fn from_reply(reply: &Value) -> Option<Self> {
        let object = reply.as_object()?;
        if object.get(TYPE_FIELD)?.as_str()? != TYPE_ERROR {
            return None;
        }
        let body = object.get("error").cloned().unwrap_or(Value::Null);
        Some(Self::from_value(body))
    }

    /// Parses a fatal notification received on the connection-wide error event.
    pub fn from_fatal(payload: &Value) -> Option<Self> {
        let object = payload.as_object()?;
        if object.get(TYPE_FIELD)?.as_str()? != TYPE_ERROR {
            return None;
        }
        let mut error = Self::from_value(Value::Object(object.clone()));
        error.kind = ErrorKind::Uncatchable;
        Some(error)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn is_uncatchable(&self) -> bool {
        self.kind == ErrorKind::Uncatchable
    }

    /// The error's own serialization: structured fields plus `message`.
    pub fn to_json(&self) -> Value {
        let mut body = self.fields.clone();
        body.insert("message".to_string(), Value::String(self.message.clone()));
        Value::Object(body)
    }

    /// Payload delivered through the per-call reply.
    pub fn to_reply(&self) -> Value {
        json!({
            "type": TYPE_ERROR,
            "error": self.to_json(),
        })
    }

    /// Payload emitted on the connection-wide error event.
    pub fn to_fatal(&self) -> Value {
        let mut body = self.fields.clone();
        body.insert(TYPE_FIELD.to_string(), Value::String(TYPE_ERROR.to_string()));
        body.insert("message".to_string(), Value::String(self.message.clone()));
        Value::Object(body)
    }
}
