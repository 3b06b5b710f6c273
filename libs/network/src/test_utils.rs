use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::connection::{Ack, Connection, ConnectionId, DisconnectHook, EventHandler};
use crate::{Result, TransportError};

/// A connection that records registrations and emissions for testing
///
/// Events are delivered by calling [`RecordingConnection::trigger`] or
/// [`RecordingConnection::call`] directly; nothing crosses a channel.
pub struct RecordingConnection {
    id: ConnectionId,
    handlers: DashMap<String, Vec<EventHandler>>,
    registrations: Mutex<Vec<String>>,
    emitted: Mutex<Vec<(String, Vec<Value>)>>,
    hooks: Mutex<Vec<DisconnectHook>>,
    connected: AtomicBool,
}

impl RecordingConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(),
            handlers: DashMap::new(),
            registrations: Mutex::new(Vec::new()),
            emitted: Mutex::new(Vec::new()),
            hooks: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        })
    }

    /// Every event passed to `on`, in registration order
    pub fn registered_events(&self) -> Vec<String> {
        self.registrations.lock().clone()
    }

    /// Every `(event, args)` pair emitted so far
    pub fn emitted(&self) -> Vec<(String, Vec<Value>)> {
        self.emitted.lock().clone()
    }

    /// Argument lists emitted on `event`
    pub fn emitted_on(&self, event: &str) -> Vec<Vec<Value>> {
        self.emitted
            .lock()
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, args)| args.clone())
            .collect()
    }

    /// Deliver `event` and return a reply sent before the handlers returned
    pub fn trigger(&self, event: &str, args: Vec<Value>) -> Option<Value> {
        let reply = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&reply);
        self.deliver(event, args, Ack::new(move |value| *slot.lock() = Some(value)));
        let value = reply.lock().take();
        value
    }

    /// Deliver `event` and wait for its reply, which may arrive from a spawned task.
    ///
    /// Returns `None` when the reply function was dropped without being called.
    pub async fn call(&self, event: &str, args: Vec<Value>) -> Option<Value> {
        let (tx, rx) = oneshot::channel();
        self.deliver(event, args, Ack::new(move |value| {
            let _ = tx.send(value);
        }));
        rx.await.ok()
    }

    /// Simulate the peer going away
    pub fn close(&self) {
        let hooks = {
            let mut hooks = self.hooks.lock();
            if !self.connected.swap(false, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *hooks)
        };
        self.handlers.clear();
        for hook in hooks {
            hook();
        }
    }

    fn deliver(&self, event: &str, args: Vec<Value>, ack: Ack) {
        let handlers = self
            .handlers
            .get(event)
            .map(|handlers| handlers.value().clone())
            .unwrap_or_default();

        let mut ack = Some(ack);
        for handler in handlers {
            handler(args.clone(), ack.take().unwrap_or_else(Ack::noop));
        }
    }
}

impl fmt::Debug for RecordingConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingConnection")
            .field("id", &self.id)
            .field("registrations", &*self.registrations.lock())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Connection for RecordingConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn on(&self, event: &str, handler: EventHandler) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::closed(self.id));
        }
        self.registrations.lock().push(event.to_string());
        self.handlers
            .entry(event.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }

    fn emit(&self, event: &str, args: Vec<Value>) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::closed(self.id));
        }
        self.emitted.lock().push((event.to_string(), args));
        Ok(())
    }

    fn on_disconnect(&self, hook: DisconnectHook) {
        let mut hooks = self.hooks.lock();
        if self.connected.load(Ordering::Acquire) {
            hooks.push(hook);
            return;
        }
        drop(hooks);
        hook();
    }

    fn disconnect(&self) {
        self.close();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}
