//! Protocol-level constants
//!
//! These values are part of the wire contract. Both ends derive event names and
//! recognise tagged payloads from them, so they MUST remain stable across releases.

/// Event emitted once per accepted connection, carrying the root instance descriptor.
pub const EVENT_CONNECTED: &str = "rmi:connected";

/// Connection-wide channel for fatal (uncatchable) notifications.
pub const EVENT_ERROR: &str = "rmi:error";

/// Field holding the discriminator on every object-valued protocol payload.
pub const TYPE_FIELD: &str = "type";

/// Discriminator of an instance descriptor.
pub const TYPE_REMOTE_INSTANCE: &str = "remote-instance";

/// Discriminator of a multi-event handler placeholder.
pub const TYPE_REMOTE_HANDLER: &str = "remote-handler";

/// Discriminator of a callback placeholder.
pub const TYPE_CALLBACK: &str = "callback";

/// Discriminator of error payloads, both per-call replies and fatal notifications.
pub const TYPE_ERROR: &str = "error";

/// Separates a namespace from the action (or callback) segment of an event name.
pub const NAMESPACE_SEPARATOR: char = '/';

/// Prefix of the segment that identifies a callback within its namespace.
pub const CALLBACK_PREFIX: &str = "callback:";

/// Namespace of the root instance.
pub const ROOT_NAMESPACE: &str = "";
