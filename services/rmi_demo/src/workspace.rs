//! Demo backing objects
//!
//! A [`Workspace`] is a tiny per-connection file store. Opening a file returns a
//! [`Document`] that callers reach as a nested instance; writes notify every handler
//! registered through `watch`.

use dashmap::DashMap;
use parking_lot::Mutex;
use rmi_network::ConnectionId;
use rmi_server::{Args, Outcome, RemoteEventHandler, RemoteObject, RmiError};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

type Watchers = Arc<Mutex<Vec<RemoteEventHandler>>>;

pub struct Workspace {
    connection: ConnectionId,
    files: Arc<DashMap<String, String>>,
    watchers: Watchers,
}

impl Workspace {
    pub fn new(connection: ConnectionId) -> Self {
        Self {
            connection,
            files: Arc::new(DashMap::new()),
            watchers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn list(&self, args: &Args) -> Outcome {
        let callback = match args.callback(0) {
            Ok(callback) => callback,
            Err(e) => return Outcome::fail(e),
        };

        let mut names: Vec<String> = self.files.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        for name in &names {
            if let Err(e) = callback.call(vec![json!(name)]) {
                return Outcome::fail(RmiError::recoverable(e.to_string()));
            }
        }
        Outcome::value(names.len())
    }
}

impl RemoteObject for Workspace {
    fn methods(&self) -> &[&str] {
        &["ping", "echo", "add", "list", "watch", "delay", "reject", "open"]
    }

    fn invoke(self: Arc<Self>, method: &str, args: Args) -> Outcome {
        match method {
            "ping" => Outcome::unit(),
            "echo" => Outcome::from_result(args.value::<Value>(0)),
            "add" => Outcome::from_result(
                args.value::<f64>(0)
                    .and_then(|a| args.value::<f64>(1).map(|b| a + b)),
            ),
            "list" => self.list(&args),
            "watch" => match args.handler(0) {
                Ok(handler) => {
                    debug!(
                        connection = %self.connection,
                        events = ?handler.events(),
                        "Watcher added"
                    );
                    self.watchers.lock().push(handler);
                    Outcome::unit()
                }
                Err(e) => Outcome::fail(e),
            },
            "delay" => {
                let ms = match args.value::<u64>(0) {
                    Ok(ms) => ms,
                    Err(e) => return Outcome::fail(e),
                };
                let text = args.value::<Option<String>>(1).ok().flatten().unwrap_or_default();
                Outcome::future(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok::<_, RmiError>(text)
                })
            }
            "reject" => {
                let reason = args.value::<String>(0).unwrap_or_else(|_| "no reason".to_string());
                Outcome::value(json!({"message": format!("rejected: {reason}"), "reason": reason}))
            }
            "open" => match args.value::<String>(0) {
                Ok(name) => {
                    self.files.entry(name.clone()).or_default();
                    Outcome::object(Document {
                        name,
                        files: Arc::clone(&self.files),
                        watchers: Arc::clone(&self.watchers),
                    })
                }
                Err(e) => Outcome::fail(e),
            },
            other => Outcome::no_such_method(other),
        }
    }

    fn teardown(&self) {
        let watchers = std::mem::take(&mut *self.watchers.lock());
        info!(
            connection = %self.connection,
            files = self.files.len(),
            watchers = watchers.len(),
            "Workspace released"
        );
    }
}

/// One open file of a [`Workspace`]
pub struct Document {
    name: String,
    files: Arc<DashMap<String, String>>,
    watchers: Watchers,
}

impl RemoteObject for Document {
    fn methods(&self) -> &[&str] {
        &["read", "write", "close"]
    }

    fn invoke(self: Arc<Self>, method: &str, args: Args) -> Outcome {
        match method {
            "read" => Outcome::value(
                self.files
                    .get(&self.name)
                    .map(|text| text.value().clone())
                    .unwrap_or_default(),
            ),
            "write" => match args.value::<String>(0) {
                Ok(text) => {
                    self.files.insert(self.name.clone(), text);
                    self.notify("changed");
                    Outcome::unit()
                }
                Err(e) => Outcome::fail(e),
            },
            "close" => {
                debug!(file = %self.name, "Document closed");
                Outcome::unit()
            }
            other => Outcome::no_such_method(other),
        }
    }
}

impl Document {
    fn notify(&self, event: &str) {
        // Watchers whose connection is gone are dropped.
        self.watchers.lock().retain(|watcher| {
            match watcher.call(event, vec![json!(self.name)]) {
                Ok(()) => true,
                Err(e) => {
                    debug!(file = %self.name, error = %e, "Dropping watcher");
                    false
                }
            }
        });
    }
}
