//! # RMI Protocol Codec
//!
//! ## Purpose
//!
//! This crate is the "Rules" layer of the RMI system. Everything both ends of a
//! connection must agree on without talking to each other lives here:
//! - Canonical event-name derivation for actions, callbacks and nested namespaces
//! - Reserved protocol events (connected, error)
//! - Wire type discriminators and the shapes of object-valued payloads
//! - The two-tier error taxonomy (recoverable vs. uncatchable)
//!
//! ## Architecture Role
//!
//! ```text
//! [codec] → network/ → rmi/
//!    ↑          ↓         ↓
//! Naming    Transport   Instances
//! Wire      Connections Stubs
//! Errors    Acks        Lifecycle
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Transport logic (belongs in network/)
//! - Method dispatch or marshaling of live objects (belongs in rmi/)
//!
//! Payloads are plain `serde_json::Value`s; this crate only knows how to recognise
//! and build the tagged objects that carry protocol meaning.

pub mod constants;
pub mod error;
pub mod naming;
pub mod wire;

pub use constants::*;
pub use error::{ErrorKind, ProtocolError, Result, RmiError};
pub use naming::{callback_event_name, child_namespace, event_name, validate_action_name};
pub use wire::{CallbackRef, HandlerRef, InstanceDescriptor, Placeholder};
