//! # RMI Network Layer
//!
//! ## Purpose
//!
//! Defines the named-event transport the RMI core is written against, and ships an
//! in-process transport implementing it. Production transports (websockets, TCP) live
//! outside this workspace and only need to implement [`Connection`] and [`Listener`].
//!
//! ## Architecture Role
//!
//! ```text
//! codec/ → [network] → rmi/
//!              ↓
//!   Connection (on / emit / on_disconnect)
//!   Listener   (accept)
//!   MemoryTransport (tests, demo)
//! ```
//!
//! ## Delivery Guarantees
//!
//! Implementations deliver events in order per connection, at least once, and give each
//! handler an [`Ack`] through which it may reply once to the emitting peer.

pub mod connection;
pub mod error;
pub mod memory;
pub mod test_utils;

pub use connection::{
    Ack, Connection, ConnectionId, ConnectionRef, DisconnectHook, EventHandler, Listener,
};
pub use error::{Result, TransportError};
pub use memory::{
    ClientSocket, MemoryConnection, MemoryConnector, MemoryListener, MemoryTransport,
    ServerEvent,
};
