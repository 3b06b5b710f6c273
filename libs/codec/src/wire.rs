//! Tagged wire values
//!
//! Object-valued payloads with protocol meaning carry a `type` discriminator:
//!
//! ```text
//! {type: "remote-instance", namespace: "/open:1", actions: ["read", "close"]}
//! {type: "remote-handler",  namespace: "/sub", events: ["added", "removed"]}
//! {type: "callback",        namespace: "",     id: 7}
//! ```
//!
//! Instance descriptors flow server → caller; placeholders flow caller → server inside
//! argument lists, standing in for caller-owned functions that cannot cross the wire.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::constants::{TYPE_CALLBACK, TYPE_FIELD, TYPE_REMOTE_HANDLER, TYPE_REMOTE_INSTANCE};
use crate::error::{ProtocolError, Result};

/// Wire representation of a remotely callable instance
///
/// Carries no behavior: the receiver rebuilds a call surface purely from the namespace,
/// the action names and the event-naming rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub namespace: String,
    pub actions: Vec<String>,
}

impl InstanceDescriptor {
    pub fn new(namespace: impl Into<String>, actions: Vec<String>) -> Self {
        Self {
            namespace: namespace.into(),
            actions,
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "type": TYPE_REMOTE_INSTANCE,
            "namespace": self.namespace,
            "actions": self.actions,
        })
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        expect_discriminator(value, TYPE_REMOTE_INSTANCE)?;
        Self::deserialize(value).map_err(|e| ProtocolError::malformed(TYPE_REMOTE_INSTANCE, e))
    }
}

/// A caller-owned function, addressed by `(namespace, id)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackRef {
    pub namespace: String,
    pub id: u64,
}

impl CallbackRef {
    pub fn new(namespace: impl Into<String>, id: u64) -> Self {
        Self {
            namespace: namespace.into(),
            id,
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "type": TYPE_CALLBACK,
            "namespace": self.namespace,
            "id": self.id,
        })
    }
}

/// A caller-owned object exposing several named event sinks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerRef {
    pub namespace: String,
    pub events: Vec<String>,
}

impl HandlerRef {
    pub fn new(namespace: impl Into<String>, events: Vec<String>) -> Self {
        Self {
            namespace: namespace.into(),
            events,
        }
    }

    pub fn to_value(&self) -> Value {
        json!({
            "type": TYPE_REMOTE_HANDLER,
            "namespace": self.namespace,
            "events": self.events,
        })
    }
}

/// A placeholder found in an inbound argument list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
    Callback(CallbackRef),
    Handler(HandlerRef),
}

impl Placeholder {
    /// Recognises a placeholder by its discriminator.
    ///
    /// Returns `None` for ordinary values, including objects with an unrelated `type`.
    /// A recognised discriminator with missing or mistyped fields yields `Some(Err(..))`.
    pub fn detect(value: &Value) -> Option<Result<Self>> {
        let tag = value.as_object()?.get(TYPE_FIELD)?.as_str()?;
        match tag {
            TYPE_CALLBACK => Some(
                CallbackRef::deserialize(value)
                    .map(Placeholder::Callback)
                    .map_err(|e| ProtocolError::malformed(TYPE_CALLBACK, e)),
            ),
            TYPE_REMOTE_HANDLER => Some(
                HandlerRef::deserialize(value)
                    .map(Placeholder::Handler)
                    .map_err(|e| ProtocolError::malformed(TYPE_REMOTE_HANDLER, e)),
            ),
            _ => None,
        }
    }
}

fn expect_discriminator(value: &Value, expected: &str) -> Result<()> {
    let got = value
        .get(TYPE_FIELD)
        .and_then(Value::as_str)
        .unwrap_or_default();

    if got != expected {
        return Err(ProtocolError::UnexpectedDiscriminator {
            expected: expected.to_string(),
            got: got.to_string(),
        });
    }

    Ok(())
}
