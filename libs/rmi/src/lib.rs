//! # RMI Server
//!
//! ## Purpose
//!
//! Exposes a graph of server-side objects to remote callers over a named-event
//! connection. Each exposed object is an [`Instance`]: a fixed allow-list of actions
//! ([`ActionMap`]) bound to a [`RemoteObject`], reachable on derived event names.
//!
//! ## Architecture Role
//!
//! ```text
//! codec/ → network/ → [rmi]
//!                       ├── lifecycle  accept → factory → root Instance → connected
//!                       ├── instance   marshal → invoke → resolve → reply / fatal
//!                       ├── args       placeholders → RemoteCallback / RemoteEventHandler
//!                       ├── stubs      local call → emitted event
//!                       └── config     TOML server settings and root action map
//! ```
//!
//! ## Error Delivery
//!
//! Recoverable errors reach the caller as the reply of the failing call. Uncatchable
//! errors skip the reply and are emitted once on the connection-wide error event.
//!
//! ## Example
//!
//! ```no_run
//! use rmi_network::MemoryTransport;
//! use rmi_server::{per_connection, start, ActionMap, Args, Outcome, RemoteObject};
//! use std::sync::Arc;
//!
//! struct Greeter;
//!
//! impl RemoteObject for Greeter {
//!     fn methods(&self) -> &[&str] {
//!         &["greet"]
//!     }
//!
//!     fn invoke(self: Arc<Self>, method: &str, args: Args) -> Outcome {
//!         match method {
//!             "greet" => Outcome::from_result(
//!                 args.value::<String>(0).map(|name| format!("hello {name}")),
//!             ),
//!             other => Outcome::no_such_method(other),
//!         }
//!     }
//! }
//!
//! # async fn run() {
//! let (listener, _connector) = MemoryTransport::bind();
//! let actions = ActionMap::new().value("greet");
//! let (server, _task) = start(listener, per_connection(|_| Greeter), actions);
//! # let _ = server;
//! # }
//! ```

pub mod action;
pub mod args;
pub mod config;
pub mod error;
pub mod instance;
pub mod lifecycle;
pub mod object;
pub mod stubs;

pub use action::{ActionMap, ResponseShape};
pub use args::{Arg, Args};
pub use config::{ServerConfig, ServerSettings};
pub use error::{Result, ServerError};
pub use instance::{Instance, InstanceOptions, Resolution};
pub use lifecycle::{start, RmiServer};
pub use object::{
    per_connection, ObjectFactory, Outcome, PerConnection, RemoteObject, Returned, Shared,
};
pub use stubs::{RemoteCallback, RemoteEventHandler, RemoteSink};

pub use rmi_codec::{ErrorKind, RmiError};
