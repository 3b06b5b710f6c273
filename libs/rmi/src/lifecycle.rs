//! Connection lifecycle
//!
//! For each accepted connection the server:
//!
//! 1. Asks its [`ObjectFactory`] for the root backing object.
//! 2. Registers the object's teardown for the connection's disconnection.
//! 3. Builds the root [`Instance`] in the root namespace.
//! 4. Emits the root descriptor on the connected event, or on failure emits a fatal error
//!    payload and disconnects.
//!
//! Teardown is registered before the root instance is built, so it also runs for
//! connections rejected in step 4.

use dashmap::DashMap;
use rmi_codec::{RmiError, EVENT_CONNECTED, EVENT_ERROR, ROOT_NAMESPACE};
use rmi_network::{Connection, ConnectionId, Listener};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::action::ActionMap;
use crate::config::ServerConfig;
use crate::instance::{Instance, InstanceOptions};
use crate::object::ObjectFactory;
use crate::Result;

/// Exposes a root object to every accepted connection
#[derive(Clone)]
pub struct RmiServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    name: String,
    factory: Box<dyn ObjectFactory>,
    actions: ActionMap,
    options: InstanceOptions,
    live: DashMap<ConnectionId, Arc<dyn Connection>>,
}

impl RmiServer {
    pub fn new(factory: impl ObjectFactory, actions: ActionMap) -> Self {
        Self::with_options("rmi-server", factory, actions, InstanceOptions::default())
    }

    /// Build a server from loaded configuration
    pub fn from_config(config: &ServerConfig, factory: impl ObjectFactory) -> Self {
        Self::with_options(
            config.server.name.clone(),
            factory,
            config.actions.clone(),
            InstanceOptions {
                log_arguments: config.server.log_arguments,
            },
        )
    }

    pub fn with_options(
        name: impl Into<String>,
        factory: impl ObjectFactory,
        actions: ActionMap,
        options: InstanceOptions,
    ) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                name: name.into(),
                factory: Box::new(factory),
                actions,
                options,
                live: DashMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn actions(&self) -> &ActionMap {
        &self.inner.actions
    }

    /// Number of connections accepted and not yet closed
    pub fn connection_count(&self) -> usize {
        self.inner.live.len()
    }

    pub fn is_live(&self, connection: ConnectionId) -> bool {
        self.inner.live.contains_key(&connection)
    }

    /// Expose the root object on `connection`
    pub fn accept(&self, connection: Arc<dyn Connection>) -> Result<Instance> {
        let id = connection.id();
        let object = self.inner.factory.create(id);
        self.inner.live.insert(id, Arc::clone(&connection));

        let server: Weak<ServerInner> = Arc::downgrade(&self.inner);
        let teardown_target = Arc::clone(&object);
        connection.on_disconnect(Box::new(move || {
            if let Some(server) = server.upgrade() {
                server.live.remove(&id);
            }
            if panic::catch_unwind(AssertUnwindSafe(|| teardown_target.teardown())).is_err() {
                error!(connection = %id, object = teardown_target.type_name(), "Teardown panicked");
            }
            info!(connection = %id, "Connection closed");
        }));

        match Instance::build_with(
            &connection,
            object,
            ROOT_NAMESPACE,
            self.inner.actions.clone(),
            self.inner.options,
        ) {
            Ok(root) => {
                connection.emit(EVENT_CONNECTED, vec![root.to_value()])?;
                info!(
                    server = %self.inner.name,
                    connection = %id,
                    actions = root.actions().len(),
                    "Connection accepted"
                );
                Ok(root)
            }
            Err(e) => {
                error!(
                    server = %self.inner.name,
                    connection = %id,
                    error = %e,
                    "Rejecting connection"
                );
                let fatal = RmiError::uncatchable(e.to_string());
                if let Err(emit_error) = connection.emit(EVENT_ERROR, vec![fatal.to_fatal()]) {
                    debug!(connection = %id, error = %emit_error, "Rejection not delivered");
                }
                connection.disconnect();
                Err(e)
            }
        }
    }

    /// Accept connections from `listener` until it is exhausted
    pub async fn serve<L: Listener>(&self, mut listener: L) {
        info!(server = %self.inner.name, "Accepting connections");

        while let Some(connection) = listener.accept().await {
            let id = connection.id();
            if let Err(e) = self.accept(connection) {
                warn!(
                    server = %self.inner.name,
                    connection = %id,
                    error = %e,
                    "Connection rejected"
                );
            }
        }

        info!(server = %self.inner.name, "Listener closed");
    }
}

impl std::fmt::Debug for RmiServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RmiServer")
            .field("name", &self.inner.name)
            .field("actions", &self.inner.actions.names())
            .field("connections", &self.inner.live.len())
            .finish()
    }
}

/// Serve `listener` on a spawned task
///
/// Every accepted connection gets a root object from `factory` exposed with `actions`.
pub fn start<L>(
    listener: L,
    factory: impl ObjectFactory,
    actions: ActionMap,
) -> (RmiServer, JoinHandle<()>)
where
    L: Listener + 'static,
{
    let server = RmiServer::new(factory, actions);
    let serving = server.clone();
    let handle = tokio::spawn(async move { serving.serve(listener).await });
    (server, handle)
}
