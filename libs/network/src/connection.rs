//! Named-Event Connection Contract
//!
//! The minimal surface the RMI core needs from a bidirectional transport:
//!
//! - `on(event, handler)`: register a handler receiving a positional argument list and an
//!   [`Ack`] (the per-emit reply function).
//! - `emit(event, args)`: send an event to the peer, fire-and-forget.
//! - `on_disconnect(hook)` / `disconnect()`: per-connection lifecycle.
//!
//! Connection acceptance is modelled by [`Listener`]. Implementations are expected to
//! deliver events in order, at least once, and to run every disconnect hook exactly once.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use uuid::Uuid;

use crate::{Result, TransportError};

/// Unique connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    id: Uuid,
}

impl ConnectionId {
    /// Create new connection ID
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.id.simple())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler registered for a named event
pub type EventHandler = Arc<dyn Fn(Vec<Value>, Ack) + Send + Sync>;

/// Hook run once when a connection goes away
pub type DisconnectHook = Box<dyn FnOnce() + Send>;

/// Reply function handed to an event handler
///
/// Consumed on use, so a handler replies at most once. Events emitted without an
/// acknowledgement request receive a no-op `Ack`.
pub struct Ack {
    reply: Option<Box<dyn FnOnce(Value) + Send>>,
}

impl Ack {
    pub fn new(reply: impl FnOnce(Value) + Send + 'static) -> Self {
        Self {
            reply: Some(Box::new(reply)),
        }
    }

    /// An acknowledgement nobody is waiting for
    pub fn noop() -> Self {
        Self { reply: None }
    }

    /// Whether the peer asked for a reply
    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Deliver the reply payload
    pub fn send(mut self, value: Value) {
        if let Some(reply) = self.reply.take() {
            reply(value);
        }
    }
}

impl fmt::Debug for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ack")
            .field("expects_reply", &self.expects_reply())
            .finish()
    }
}

/// One side of a bidirectional named-event connection
pub trait Connection: Send + Sync + fmt::Debug {
    /// Identifier used in logs and registries
    fn id(&self) -> ConnectionId;

    /// Register a handler for `event`. Several handlers may share an event.
    fn on(&self, event: &str, handler: EventHandler) -> Result<()>;

    /// Send `event` to the peer carrying `args`
    fn emit(&self, event: &str, args: Vec<Value>) -> Result<()>;

    /// Run `hook` when the connection is reported closed.
    ///
    /// Hooks registered after the connection closed run immediately.
    fn on_disconnect(&self, hook: DisconnectHook);

    /// Close the connection from this side
    fn disconnect(&self);

    /// Whether the connection is still open
    fn is_connected(&self) -> bool;
}

/// Source of newly accepted connections
#[async_trait]
pub trait Listener: Send {
    /// Wait for the next connection; `None` once the listener is exhausted.
    async fn accept(&mut self) -> Option<Arc<dyn Connection>>;
}

/// Non-owning reference to a connection
///
/// Emitting through a reference whose connection has been dropped fails with
/// [`TransportError::Closed`] instead of keeping the connection alive.
#[derive(Clone)]
pub struct ConnectionRef {
    id: ConnectionId,
    inner: Weak<dyn Connection>,
}

impl ConnectionRef {
    pub fn new(connection: &Arc<dyn Connection>) -> Self {
        Self {
            id: connection.id(),
            inner: Arc::downgrade(connection),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn upgrade(&self) -> Option<Arc<dyn Connection>> {
        self.inner.upgrade()
    }

    pub fn emit(&self, event: &str, args: Vec<Value>) -> Result<()> {
        match self.upgrade() {
            Some(connection) => connection.emit(event, args),
            None => Err(TransportError::closed(self.id)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.upgrade()
            .map(|connection| connection.is_connected())
            .unwrap_or(false)
    }
}

impl fmt::Debug for ConnectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRef")
            .field("id", &self.id)
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}
