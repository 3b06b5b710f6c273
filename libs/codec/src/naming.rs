//! Event-name derivation
//!
//! Every event on the wire is named from data both peers already hold, so no
//! extra round trip is needed to agree on a name:
//!
//! | Event              | Name                              | Example (namespace `/open:1`) |
//! |--------------------|-----------------------------------|-------------------------------|
//! | action             | `{namespace}/{action}`            | `/open:1/read`                |
//! | callback           | `{namespace}/callback:{id}`       | `/open:1/callback:7`          |
//! | nested namespace   | `{parent}/{action}:{ordinal}`     | `/open:1/lines:2`             |
//!
//! The root namespace is empty, so root actions carry a leading separator (`/method1`).

use crate::constants::{CALLBACK_PREFIX, NAMESPACE_SEPARATOR};
use crate::error::{ProtocolError, Result};

/// Event name of `action` within `namespace`.
pub fn event_name(namespace: &str, action: &str) -> String {
    format!("{namespace}{NAMESPACE_SEPARATOR}{action}")
}

/// Event name of the caller-owned callback `id` allocated within `namespace`.
pub fn callback_event_name(namespace: &str, id: u64) -> String {
    format!("{namespace}{NAMESPACE_SEPARATOR}{CALLBACK_PREFIX}{id}")
}

/// Namespace of the `ordinal`-th instance produced by `action` on the instance at `parent`.
///
/// Derived from the call path rather than the backing object's type, so repeated calls
/// never share event names and no server-side type names reach the wire.
pub fn child_namespace(parent: &str, action: &str, ordinal: u64) -> String {
    format!("{parent}{NAMESPACE_SEPARATOR}{action}:{ordinal}")
}

/// Rejects action names that would make derived event names ambiguous.
pub fn validate_action_name(action: &str) -> Result<()> {
    if action.is_empty() {
        return Err(ProtocolError::InvalidActionName {
            action: action.to_string(),
            reason: "action names cannot be empty".to_string(),
        });
    }

    if action.contains(NAMESPACE_SEPARATOR) {
        return Err(ProtocolError::InvalidActionName {
            action: action.to_string(),
            reason: format!("action names cannot contain '{NAMESPACE_SEPARATOR}'"),
        });
    }

    Ok(())
}
