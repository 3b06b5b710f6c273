//! In-Process Transport
//!
//! Channel-backed [`Connection`] and [`Listener`] used by tests and the demo service.
//! Each connection is a pair of unbounded channels plus one pump task per side:
//!
//! ```text
//! ClientSocket ──ClientFrame──► server pump ──► MemoryConnection handlers
//! ClientSocket ◄──ServerFrame── MemoryConnection::emit / Ack
//! ```
//!
//! Events reaching the server before a handler is registered for them are dropped, so
//! clients wait for the server's connected event before calling. A call whose
//! acknowledgement is dropped without a reply, including a call to an event nobody
//! handles, fails with [`TransportError::Unanswered`] instead of waiting forever.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, trace};

use crate::connection::{
    Ack, Connection, ConnectionId, DisconnectHook, EventHandler, Listener,
};
use crate::{Result, TransportError};

/// Frames travelling from the client to the server
#[derive(Debug)]
enum ClientFrame {
    Event {
        name: String,
        args: Vec<Value>,
        ack: Option<u64>,
    },
    Close,
}

/// Frames travelling from the server to the client
#[derive(Debug)]
enum ServerFrame {
    Event { name: String, args: Vec<Value> },
    Ack { id: u64, value: Value },
    Unanswered { id: u64 },
    Close,
}

/// Event received by a [`ClientSocket`]
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEvent {
    pub name: String,
    pub args: Vec<Value>,
}

/// Factory for in-process connections
pub struct MemoryTransport;

impl MemoryTransport {
    /// Create a listener and the connector feeding it.
    ///
    /// The listener is exhausted once every connector clone has been dropped.
    pub fn bind() -> (MemoryListener, MemoryConnector) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            MemoryListener { incoming: rx },
            MemoryConnector { incoming: tx },
        )
    }

    /// Create a connected pair without a listener.
    ///
    /// Must be called from within a Tokio runtime; both pump tasks start immediately.
    pub fn pair() -> (Arc<MemoryConnection>, ClientSocket) {
        let id = ConnectionId::new();
        let (client_tx, client_rx) = mpsc::unbounded_channel();
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let server = Arc::new(MemoryConnection {
            id,
            handlers: DashMap::new(),
            hooks: Mutex::new(Vec::new()),
            connected: Arc::new(AtomicBool::new(true)),
            outbound: server_tx,
            closed: Notify::new(),
        });

        let client = ClientSocket {
            id,
            outbound: client_tx,
            events: events_rx,
            pending: Arc::new(DashMap::new()),
            next_ack: AtomicU64::new(1),
            connected: Arc::new(AtomicBool::new(true)),
        };

        tokio::spawn(run_server_pump(Arc::clone(&server), client_rx));
        tokio::spawn(run_client_pump(
            server_rx,
            events_tx,
            Arc::clone(&client.pending),
            Arc::clone(&client.connected),
        ));

        debug!(connection = %id, "In-memory connection opened");
        (server, client)
    }
}

/// Accepting end of [`MemoryTransport::bind`]
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<Arc<dyn Connection>>,
}

#[async_trait]
impl Listener for MemoryListener {
    async fn accept(&mut self) -> Option<Arc<dyn Connection>> {
        self.incoming.recv().await
    }
}

/// Connecting end of [`MemoryTransport::bind`]
#[derive(Clone)]
pub struct MemoryConnector {
    incoming: mpsc::UnboundedSender<Arc<dyn Connection>>,
}

impl MemoryConnector {
    /// Open a new connection and hand its server side to the listener.
    pub fn connect(&self) -> Result<ClientSocket> {
        let (server, client) = MemoryTransport::pair();
        self.incoming
            .send(server as Arc<dyn Connection>)
            .map_err(|_| TransportError::connection("listener dropped"))?;
        Ok(client)
    }
}

/// Server side of an in-process connection
pub struct MemoryConnection {
    id: ConnectionId,
    handlers: DashMap<String, Vec<EventHandler>>,
    hooks: Mutex<Vec<DisconnectHook>>,
    connected: Arc<AtomicBool>,
    outbound: mpsc::UnboundedSender<ServerFrame>,
    closed: Notify,
}

impl MemoryConnection {
    fn dispatch(&self, name: String, args: Vec<Value>, ack: Option<u64>) {
        let mut ack = ack.map(|id| self.ack_for(id));

        // Clone out of the shard so handlers may register or emit re-entrantly.
        let handlers = match self.handlers.get(&name) {
            Some(handlers) => handlers.value().clone(),
            None => {
                debug!(connection = %self.id, event = %name, "No handler registered");
                return;
            }
        };

        trace!(connection = %self.id, event = %name, handlers = handlers.len(), "Dispatching");
        for handler in handlers {
            handler(args.clone(), ack.take().unwrap_or_else(Ack::noop));
        }
    }

    fn ack_for(&self, id: u64) -> Ack {
        let reply = PendingReply {
            id,
            outbound: self.outbound.clone(),
            connected: Arc::clone(&self.connected),
            answered: false,
        };
        Ack::new(move |value| reply.answer(value))
    }

    fn shutdown(&self, reason: &str) {
        let hooks = {
            let mut hooks = self.hooks.lock();
            if !self.connected.swap(false, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *hooks)
        };

        let _ = self.outbound.send(ServerFrame::Close);
        self.closed.notify_one();
        self.handlers.clear();

        debug!(connection = %self.id, reason, hooks = hooks.len(), "Connection closed");
        for hook in hooks {
            hook();
        }
    }
}

/// Server-side end of one acknowledged call
///
/// Dropping it unanswered tells the client to stop waiting.
struct PendingReply {
    id: u64,
    outbound: mpsc::UnboundedSender<ServerFrame>,
    connected: Arc<AtomicBool>,
    answered: bool,
}

impl PendingReply {
    fn answer(mut self, value: Value) {
        self.answered = true;
        if self.connected.load(Ordering::Acquire) {
            let _ = self.outbound.send(ServerFrame::Ack { id: self.id, value });
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if !self.answered && self.connected.load(Ordering::Acquire) {
            let _ = self.outbound.send(ServerFrame::Unanswered { id: self.id });
        }
    }
}

impl Connection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn on(&self, event: &str, handler: EventHandler) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::closed(self.id));
        }
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
        self.outbound
            .send(ServerFrame::Event {
                name: event.to_string(),
                args,
            })
            .map_err(|_| TransportError::closed(self.id))
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
        self.shutdown("server disconnect");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .field("events", &self.handlers.len())
            .field("connected", &self.is_connected())
            .finish()
    }
}

async fn run_server_pump(
    connection: Arc<MemoryConnection>,
    mut inbound: mpsc::UnboundedReceiver<ClientFrame>,
) {
    loop {
        tokio::select! {
            frame = inbound.recv() => match frame {
                Some(ClientFrame::Event { name, args, ack }) => {
                    connection.dispatch(name, args, ack)
                }
                Some(ClientFrame::Close) | None => {
                    connection.shutdown("client disconnect");
                    break;
                }
            },
            _ = connection.closed.notified() => break,
        }
    }
}

async fn run_client_pump(
    mut inbound: mpsc::UnboundedReceiver<ServerFrame>,
    events: mpsc::UnboundedSender<ServerEvent>,
    pending: Arc<DashMap<u64, oneshot::Sender<Option<Value>>>>,
    connected: Arc<AtomicBool>,
) {
    while let Some(frame) = inbound.recv().await {
        match frame {
            ServerFrame::Event { name, args } => {
                let _ = events.send(ServerEvent { name, args });
            }
            ServerFrame::Ack { id, value } => {
                if let Some((_, reply)) = pending.remove(&id) {
                    let _ = reply.send(Some(value));
                }
            }
            ServerFrame::Unanswered { id } => {
                if let Some((_, reply)) = pending.remove(&id) {
                    let _ = reply.send(None);
                }
            }
            ServerFrame::Close => break,
        }
    }

    connected.store(false, Ordering::Release);
    // Dropping the senders fails every outstanding call.
    pending.clear();
}

/// Client side of an in-process connection
pub struct ClientSocket {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<ClientFrame>,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    pending: Arc<DashMap<u64, oneshot::Sender<Option<Value>>>>,
    next_ack: AtomicU64,
    connected: Arc<AtomicBool>,
}

impl ClientSocket {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Emit an event without requesting a reply
    pub fn emit(&self, event: &str, args: Vec<Value>) -> Result<()> {
        self.send(ClientFrame::Event {
            name: event.to_string(),
            args,
            ack: None,
        })
    }

    /// Emit an event and wait for the handler's reply.
    ///
    /// Fails with [`TransportError::Unanswered`] when the server drops the
    /// acknowledgement without replying.
    pub async fn call(&self, event: &str, args: Vec<Value>) -> Result<Value> {
        let (_, reply) = self.request(event, args)?;
        self.settle(event, reply.await)
    }

    /// Like [`ClientSocket::call`], giving up after `timeout`
    pub async fn call_timeout(
        &self,
        event: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let (id, reply) = self.request(event, args)?;
        match tokio::time::timeout(timeout, reply).await {
            Ok(result) => self.settle(event, result),
            Err(_) => {
                self.pending.remove(&id);
                Err(TransportError::timeout(
                    format!("call {event}"),
                    timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Next event emitted by the server; `None` once the connection is closed and drained.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    /// Next already-delivered event, if any
    pub fn try_next_event(&mut self) -> Option<ServerEvent> {
        self.events.try_recv().ok()
    }

    /// Close the connection from the client side
    pub fn disconnect(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            let _ = self.outbound.send(ClientFrame::Close);
        }
    }

    fn settle(
        &self,
        event: &str,
        reply: std::result::Result<Option<Value>, oneshot::error::RecvError>,
    ) -> Result<Value> {
        match reply {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(TransportError::unanswered(event)),
            Err(_) => Err(TransportError::closed(self.id)),
        }
    }

    fn request(
        &self,
        event: &str,
        args: Vec<Value>,
    ) -> Result<(u64, oneshot::Receiver<Option<Value>>)> {
        let id = self.next_ack.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let sent = self.send(ClientFrame::Event {
            name: event.to_string(),
            args,
            ack: Some(id),
        });
        if let Err(e) = sent {
            self.pending.remove(&id);
            return Err(e);
        }

        Ok((id, rx))
    }

    fn send(&self, frame: ClientFrame) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::closed(self.id));
        }
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::closed(self.id))
    }
}

impl fmt::Debug for ClientSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSocket")
            .field("id", &self.id)
            .field("pending", &self.pending.len())
            .field("connected", &self.is_connected())
            .finish()
    }
}
