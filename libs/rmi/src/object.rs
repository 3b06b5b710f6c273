//! Backing objects
//!
//! A [`RemoteObject`] is the server-side object an [`Instance`](crate::Instance) exposes.
//! Instead of reflection, an object lists the methods it can dispatch and performs the
//! dispatch itself in [`RemoteObject::invoke`]. The action map then narrows that list
//! down to what callers may reach.

use futures::future::BoxFuture;
use rmi_codec::RmiError;
use rmi_network::ConnectionId;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::args::Args;

/// Server-side object whose methods can be invoked remotely
pub trait RemoteObject: Send + Sync + 'static {
    /// Every method `invoke` can dispatch
    ///
    /// Consulted when an instance is built. A panic here while exposing a returned
    /// object is answered as a recoverable error; for a root object it propagates out
    /// of [`RmiServer::accept`](crate::RmiServer::accept).
    fn methods(&self) -> &[&str];

    /// Run `method` with marshaled arguments.
    ///
    /// Taking `Arc<Self>` lets pending outcomes keep the object alive until they settle.
    fn invoke(self: Arc<Self>, method: &str, args: Args) -> Outcome;

    /// Name used in diagnostics
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Called once when the connection owning this object as its root closes
    fn teardown(&self) {}

    fn responds_to(&self, method: &str) -> bool {
        self.methods().contains(&method)
    }
}

/// A settled return value
pub enum Returned {
    /// Plain data, sent as-is for passthrough shapes
    Value(Value),
    /// A live object, exposable through a nested action map
    Object(Arc<dyn RemoteObject>),
}

impl Returned {
    /// Format this value as the payload of a forced-error response
    pub fn into_error(self) -> RmiError {
        match self {
            Self::Value(value) => RmiError::from_value(value),
            Self::Object(object) => RmiError::recoverable(object.type_name()),
        }
    }
}

impl std::fmt::Debug for Returned {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Object(object) => f.debug_tuple("Object").field(&object.type_name()).finish(),
        }
    }
}

/// Result of invoking a method: settled now, or later
pub enum Outcome {
    Ready(Result<Returned, RmiError>),
    Pending(BoxFuture<'static, Outcome>),
}

impl Outcome {
    /// Return serializable data
    pub fn value<T: Serialize>(value: T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => Self::Ready(Ok(Returned::Value(value))),
            Err(e) => Self::fail(RmiError::recoverable(format!(
                "return value is not serializable: {e}"
            ))),
        }
    }

    /// Return nothing
    pub fn unit() -> Self {
        Self::Ready(Ok(Returned::Value(Value::Null)))
    }

    /// Return a live object
    pub fn object<O: RemoteObject>(object: O) -> Self {
        Self::shared(Arc::new(object))
    }

    /// Return an already shared live object
    pub fn shared(object: Arc<dyn RemoteObject>) -> Self {
        Self::Ready(Ok(Returned::Object(object)))
    }

    /// Throw `error`
    pub fn fail(error: RmiError) -> Self {
        Self::Ready(Err(error))
    }

    /// Conventional failure for a method name `invoke` does not know
    pub fn no_such_method(method: &str) -> Self {
        Self::fail(RmiError::recoverable(format!("no such method: {method}")))
    }

    pub fn from_result<T: Serialize>(result: Result<T, RmiError>) -> Self {
        match result {
            Ok(value) => Self::value(value),
            Err(error) => Self::fail(error),
        }
    }

    /// Settle later with whatever outcome `future` produces
    pub fn pending<F>(future: F) -> Self
    where
        F: Future<Output = Outcome> + Send + 'static,
    {
        Self::Pending(Box::pin(future))
    }

    /// Settle later with the data or error `future` resolves to
    pub fn future<F, T>(future: F) -> Self
    where
        F: Future<Output = Result<T, RmiError>> + Send + 'static,
        T: Serialize,
    {
        Self::pending(async move { Self::from_result(future.await) })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Self::Pending(_) => f.write_str("Pending"),
        }
    }
}

/// Produces the root object of each accepted connection
pub trait ObjectFactory: Send + Sync + 'static {
    fn create(&self, connection: ConnectionId) -> Arc<dyn RemoteObject>;
}

/// A fresh object per connection
pub struct PerConnection<F> {
    make: F,
}

/// Build a factory creating one object per connection from `make`
pub fn per_connection<F, O>(make: F) -> PerConnection<F>
where
    F: Fn(ConnectionId) -> O + Send + Sync + 'static,
    O: RemoteObject,
{
    PerConnection { make }
}

impl<F, O> ObjectFactory for PerConnection<F>
where
    F: Fn(ConnectionId) -> O + Send + Sync + 'static,
    O: RemoteObject,
{
    fn create(&self, connection: ConnectionId) -> Arc<dyn RemoteObject> {
        Arc::new((self.make)(connection))
    }
}

/// One object shared by every connection
pub struct Shared {
    object: Arc<dyn RemoteObject>,
}

impl Shared {
    pub fn new<O: RemoteObject>(object: O) -> Self {
        Self {
            object: Arc::new(object),
        }
    }

    pub fn from_arc(object: Arc<dyn RemoteObject>) -> Self {
        Self { object }
    }
}

impl ObjectFactory for Shared {
    fn create(&self, _connection: ConnectionId) -> Arc<dyn RemoteObject> {
        Arc::clone(&self.object)
    }
}
