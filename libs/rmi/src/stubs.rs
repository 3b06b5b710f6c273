//! Remote sink stubs
//!
//! Callers cannot send functions over the wire. They send a placeholder instead, and the
//! server substitutes a stub that turns a local call into an event the caller listens on:
//!
//! - [`RemoteCallback`]: one surface, emitting `{namespace}/callback:{id}`.
//! - [`RemoteEventHandler`]: one surface per declared event, emitting `{namespace}/{event}`.
//!
//! Both are built from [`RemoteSink`], a `(connection, event)` emitter. Stubs hold a
//! [`ConnectionRef`] only, so a callback kept past the connection's lifetime fails with a
//! transport error instead of keeping the connection alive. Arguments are sent verbatim.

use rmi_codec::{callback_event_name, event_name, CallbackRef, HandlerRef};
use rmi_network::ConnectionRef;
use serde_json::Value;

use crate::{Result, ServerError};

/// Emits one named event on a connection the sink does not own
#[derive(Debug, Clone)]
pub struct RemoteSink {
    connection: ConnectionRef,
    event: String,
}

impl RemoteSink {
    pub fn new(connection: ConnectionRef, event: impl Into<String>) -> Self {
        Self {
            connection,
            event: event.into(),
        }
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Fire-and-forget emission of `args`
    pub fn call(&self, args: Vec<Value>) -> Result<()> {
        self.connection.emit(&self.event, args)?;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }
}

/// Stand-in for a function owned by the caller
#[derive(Debug, Clone)]
pub struct RemoteCallback {
    reference: CallbackRef,
    sink: RemoteSink,
}

impl RemoteCallback {
    pub fn new(connection: ConnectionRef, namespace: impl Into<String>, id: u64) -> Self {
        let reference = CallbackRef::new(namespace, id);
        let event = callback_event_name(&reference.namespace, reference.id);
        Self {
            reference,
            sink: RemoteSink::new(connection, event),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.reference.namespace
    }

    pub fn id(&self) -> u64 {
        self.reference.id
    }

    pub fn event(&self) -> &str {
        self.sink.event()
    }

    pub fn call(&self, args: Vec<Value>) -> Result<()> {
        self.sink.call(args)
    }

    /// The placeholder this stub was built from
    pub fn reference(&self) -> &CallbackRef {
        &self.reference
    }
}

/// Stand-in for a caller-owned object with several named event sinks
#[derive(Debug, Clone)]
pub struct RemoteEventHandler {
    namespace: String,
    surfaces: Vec<(String, RemoteSink)>,
}

impl RemoteEventHandler {
    pub fn new(
        connection: ConnectionRef,
        namespace: impl Into<String>,
        events: Vec<String>,
    ) -> Self {
        let namespace = namespace.into();
        let surfaces = events
            .into_iter()
            .map(|name| {
                let sink = RemoteSink::new(connection.clone(), event_name(&namespace, &name));
                (name, sink)
            })
            .collect();

        Self {
            namespace,
            surfaces,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Declared event names in declaration order
    pub fn events(&self) -> Vec<&str> {
        self.surfaces.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn surface(&self, event: &str) -> Option<&RemoteSink> {
        self.surfaces
            .iter()
            .find(|(name, _)| name == event)
            .map(|(_, sink)| sink)
    }

    /// Emit `event` to the caller. Undeclared events are rejected without emitting.
    pub fn call(&self, event: &str, args: Vec<Value>) -> Result<()> {
        match self.surface(event) {
            Some(sink) => sink.call(args),
            None => Err(ServerError::UnknownSurface {
                event: event.to_string(),
            }),
        }
    }

    pub fn reference(&self) -> HandlerRef {
        HandlerRef::new(
            self.namespace.clone(),
            self.surfaces.iter().map(|(name, _)| name.clone()).collect(),
        )
    }
}
