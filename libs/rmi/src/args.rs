//! Inbound argument marshaling
//!
//! Positional arguments arrive as JSON values. Callback and handler placeholders are
//! replaced by live stubs before the backing method sees them; everything else passes
//! through untouched.

use rmi_codec::{Placeholder, RmiError};
use rmi_network::ConnectionRef;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::stubs::{RemoteCallback, RemoteEventHandler};

/// One marshaled argument
#[derive(Debug, Clone)]
pub enum Arg {
    Value(Value),
    Callback(RemoteCallback),
    Handler(RemoteEventHandler),
}

impl Arg {
    fn kind(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Callback(_) => "callback",
            Self::Handler(_) => "handler",
        }
    }
}

/// Marshaled argument list handed to [`RemoteObject::invoke`](crate::RemoteObject::invoke)
#[derive(Debug, Clone, Default)]
pub struct Args {
    items: Vec<Arg>,
}

impl Args {
    /// Substitute stubs for placeholders in `raw`.
    ///
    /// A value carrying a placeholder discriminator but missing fields stays a plain value.
    pub fn marshal(connection: &ConnectionRef, raw: Vec<Value>) -> Self {
        let items = raw
            .into_iter()
            .enumerate()
            .map(|(index, value)| match Placeholder::detect(&value) {
                None => Arg::Value(value),
                Some(Ok(Placeholder::Callback(reference))) => Arg::Callback(RemoteCallback::new(
                    connection.clone(),
                    reference.namespace,
                    reference.id,
                )),
                Some(Ok(Placeholder::Handler(reference))) => Arg::Handler(RemoteEventHandler::new(
                    connection.clone(),
                    reference.namespace,
                    reference.events,
                )),
                Some(Err(e)) => {
                    warn!(
                        connection = %connection.id(),
                        index,
                        error = %e,
                        "Passing malformed placeholder through"
                    );
                    Arg::Value(value)
                }
            })
            .collect();

        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arg> {
        self.items.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arg> {
        self.items.iter()
    }

    /// Deserialize argument `index`.
    ///
    /// A missing argument reads as `null`, so optional trailing arguments can be taken as
    /// `Option<T>`.
    pub fn value<T: DeserializeOwned>(&self, index: usize) -> Result<T, RmiError> {
        let value = match self.items.get(index) {
            Some(Arg::Value(value)) => value.clone(),
            Some(other) => {
                return Err(RmiError::recoverable(format!(
                    "argument {index} is a {}, expected a value",
                    other.kind()
                )))
            }
            None => Value::Null,
        };

        serde_json::from_value(value)
            .map_err(|e| RmiError::recoverable(format!("invalid argument {index}: {e}")))
    }

    pub fn callback(&self, index: usize) -> Result<RemoteCallback, RmiError> {
        match self.items.get(index) {
            Some(Arg::Callback(callback)) => Ok(callback.clone()),
            Some(other) => Err(RmiError::recoverable(format!(
                "argument {index} is a {}, expected a callback",
                other.kind()
            ))),
            None => Err(RmiError::recoverable(format!("missing callback argument {index}"))),
        }
    }

    pub fn handler(&self, index: usize) -> Result<RemoteEventHandler, RmiError> {
        match self.items.get(index) {
            Some(Arg::Handler(handler)) => Ok(handler.clone()),
            Some(other) => Err(RmiError::recoverable(format!(
                "argument {index} is a {}, expected a handler",
                other.kind()
            ))),
            None => Err(RmiError::recoverable(format!("missing handler argument {index}"))),
        }
    }
}

impl From<Vec<Arg>> for Args {
    fn from(items: Vec<Arg>) -> Self {
        Self { items }
    }
}

impl IntoIterator for Args {
    type Item = Arg;
    type IntoIter = std::vec::IntoIter<Arg>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
