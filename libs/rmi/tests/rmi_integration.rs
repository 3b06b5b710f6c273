//! End-to-end tests over the in-memory transport

use parking_lot::Mutex;
use rmi_codec::{EVENT_CONNECTED, EVENT_ERROR};
use rmi_network::{ClientSocket, MemoryConnector, MemoryTransport, TransportError};
use rmi_server::{
    per_connection, start, ActionMap, Args, Outcome, RemoteObject, RmiError, RmiServer,
    ServerConfig, Shared,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

const TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct Workspace {
    torn_down: Arc<AtomicUsize>,
}

impl RemoteObject for Workspace {
    fn methods(&self) -> &[&str] {
        &[
            "method1", "method2", "each", "watch", "delay", "revoke", "expire", "explode",
            "open",
        ]
    }

    fn invoke(self: Arc<Self>, method: &str, args: Args) -> Outcome {
        match method {
            "method1" => Outcome::value("Method 1"),
            "method2" => Outcome::from_result(
                args.value::<i64>(0)
                    .and_then(|a| args.value::<i64>(1).map(|b| a + b)),
            ),
            "each" => {
                let items: Vec<Value> = match args.value(0) {
                    Ok(items) => items,
                    Err(e) => return Outcome::fail(e),
                };
                let callback = match args.callback(1) {
                    Ok(callback) => callback,
                    Err(e) => return Outcome::fail(e),
                };
                for item in &items {
                    if let Err(e) = callback.call(vec![item.clone()]) {
                        return Outcome::fail(RmiError::recoverable(e.to_string()));
                    }
                }
                Outcome::value(items.len())
            }
            "watch" => match args.handler(0) {
                Ok(handler) => {
                    let sent = handler
                        .call("changed", vec![json!("a.txt")])
                        .and_then(|_| handler.call("removed", vec![json!("b.txt")]));
                    match sent {
                        Ok(()) => Outcome::unit(),
                        Err(e) => Outcome::fail(RmiError::recoverable(e.to_string())),
                    }
                }
                Err(e) => Outcome::fail(e),
            },
            "delay" => {
                let ms: u64 = args.value(0).unwrap_or_default();
                let tag: String = args.value(1).unwrap_or_default();
                Outcome::future(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok::<_, RmiError>(tag)
                })
            }
            "revoke" => {
                Outcome::fail(RmiError::uncatchable("session revoked").with_field("code", 401))
            }
            "expire" => Outcome::future(async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Err::<Value, _>(RmiError::uncatchable("session expired"))
            }),
            "explode" => panic!("workspace exploded"),
            "open" => Outcome::object(Document {
                text: Mutex::new(args.value::<String>(0).unwrap_or_default()),
            }),
            other => Outcome::no_such_method(other),
        }
    }

    fn teardown(&self) {
        self.torn_down.fetch_add(1, Ordering::SeqCst);
    }
}

struct Document {
    text: Mutex<String>,
}

impl RemoteObject for Document {
    fn methods(&self) -> &[&str] {
        &["read", "write"]
    }

    fn invoke(self: Arc<Self>, method: &str, args: Args) -> Outcome {
        match method {
            "read" => Outcome::value(self.text.lock().clone()),
            "write" => match args.value::<String>(0) {
                Ok(text) => {
                    *self.text.lock() = text;
                    Outcome::unit()
                }
                Err(e) => Outcome::fail(e),
            },
            other => Outcome::no_such_method(other),
        }
    }
}

fn root_actions() -> ActionMap {
    ActionMap::new()
        .value("method1")
        .value("method2")
        .value("each")
        .void("watch")
        .value("delay")
        .value("revoke")
        .value("expire")
        .value("explode")
        .instance("open", ActionMap::new().value("read").void("write"))
}

fn serve(actions: ActionMap) -> (RmiServer, MemoryConnector, Arc<AtomicUsize>) {
    let torn_down = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&torn_down);
    let (listener, connector) = MemoryTransport::bind();
    let (server, _task) = start(
        listener,
        per_connection(move |_| Workspace {
            torn_down: Arc::clone(&counter),
        }),
        actions,
    );
    (server, connector, torn_down)
}

async fn next_named(client: &mut ClientSocket, name: &str) -> Vec<Value> {
    loop {
        let event = tokio::time::timeout(TIMEOUT, client.next_event())
            .await
            .expect("timed out waiting for event")
            .expect("connection closed while waiting for event");
        if event.name == name {
            return event.args;
        }
    }
}

async fn connect(connector: &MemoryConnector) -> (ClientSocket, Value) {
    let mut client = assert_ok!(connector.connect());
    let descriptor = next_named(&mut client, EVENT_CONNECTED).await.remove(0);
    (client, descriptor)
}

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_basic_method_calls() {
    let (_server, connector, _) = serve(ActionMap::new().value("method1").value("method2"));
    let (client, descriptor) = connect(&connector).await;

    assert_eq!(
        descriptor,
        json!({"type": "remote-instance", "namespace": "", "actions": ["method1", "method2"]})
    );
    assert_eq!(assert_ok!(client.call("/method1", vec![]).await), json!("Method 1"));
    assert_eq!(
        assert_ok!(client.call("/method2", vec![json!(2), json!(3)]).await),
        json!(5)
    );
}

#[tokio::test]
async fn test_nonexistent_method_rejects_connection() {
    let (server, connector, torn_down) =
        serve(ActionMap::new().value("method1").value("nonexistent"));
    let mut client = assert_ok!(connector.connect());

    let mut received = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(TIMEOUT, client.next_event()).await {
        received.push(event);
    }

    assert_eq!(received.len(), 1);
    assert_eq!(received[0].name, EVENT_ERROR);
    assert_eq!(received[0].args[0]["type"], "error");
    assert!(received[0].args[0]["message"]
        .as_str()
        .unwrap()
        .contains("nonexistent"));
    assert!(!client.is_connected());
    assert_eq!(server.connection_count(), 0);
    assert_eq!(torn_down.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_teardown_runs_once_at_disconnect() {
    let (server, connector, torn_down) = serve(root_actions());
    let (client, _) = connect(&connector).await;
    let (other, _) = connect(&connector).await;

    assert_eq!(server.connection_count(), 2);
    assert_eq!(torn_down.load(Ordering::SeqCst), 0);

    client.disconnect();
    wait_until(|| server.connection_count() == 1).await;
    assert_eq!(torn_down.load(Ordering::SeqCst), 1);

    // The other connection is unaffected.
    assert_eq!(assert_ok!(other.call("/method1", vec![]).await), json!("Method 1"));
    assert_eq!(torn_down.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_callback_arguments_emit_events() {
    let (_server, connector, _) = serve(root_actions());
    let (mut client, _) = connect(&connector).await;

    let placeholder = json!({"type": "callback", "namespace": "", "id": 1});
    let reply = client
        .call("/each", vec![json!(["x", "y"]), placeholder])
        .await;
    assert_eq!(assert_ok!(reply), json!(2));

    assert_eq!(next_named(&mut client, "/callback:1").await, vec![json!("x")]);
    assert_eq!(next_named(&mut client, "/callback:1").await, vec![json!("y")]);
}

#[tokio::test]
async fn test_handler_arguments_emit_named_events() {
    let (_server, connector, _) = serve(root_actions());
    let (mut client, _) = connect(&connector).await;

    let placeholder = json!({
        "type": "remote-handler",
        "namespace": "/w",
        "events": ["changed", "removed"]
    });
    assert_eq!(assert_ok!(client.call("/watch", vec![placeholder]).await), Value::Null);

    assert_eq!(next_named(&mut client, "/w/changed").await, vec![json!("a.txt")]);
    assert_eq!(next_named(&mut client, "/w/removed").await, vec![json!("b.txt")]);
}

#[tokio::test]
async fn test_undeclared_handler_surface_is_recoverable() {
    let (_server, connector, _) = serve(root_actions());
    let (client, _) = connect(&connector).await;

    let placeholder = json!({"type": "remote-handler", "namespace": "/w", "events": ["changed"]});
    let reply = assert_ok!(client.call("/watch", vec![placeholder]).await);
    assert_eq!(reply["type"], "error");
    assert!(reply["error"]["message"].as_str().unwrap().contains("removed"));
}

#[tokio::test]
async fn test_pending_results_reply_out_of_order() {
    let (_server, connector, _) = serve(root_actions());
    let (client, _) = connect(&connector).await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let slow = async {
        let reply = client.call("/delay", vec![json!(100), json!("slow")]).await;
        let _ = tx.send(assert_ok!(reply));
    };
    let fast = async {
        let reply = client.call("/delay", vec![json!(0), json!("fast")]).await;
        let _ = tx.send(assert_ok!(reply));
    };
    tokio::join!(slow, fast);

    assert_eq!(rx.recv().await, Some(json!("fast")));
    assert_eq!(rx.recv().await, Some(json!("slow")));
}

#[tokio::test]
async fn test_reply_after_disconnect_is_swallowed() {
    let (server, connector, torn_down) = serve(root_actions());
    let (client, _) = connect(&connector).await;

    let call = client.call_timeout("/delay", vec![json!(50), json!("late")], TIMEOUT);
    let disconnect = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.disconnect();
    };
    let (reply, _) = tokio::join!(call, disconnect);

    assert!(assert_err!(reply).is_closed());
    wait_until(|| server.connection_count() == 0).await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(torn_down.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_uncatchable_error_uses_error_event() {
    let (_server, connector, _) = serve(root_actions());
    let (mut client, _) = connect(&connector).await;

    let reply = client.call("/revoke", vec![]).await;
    assert_eq!(assert_err!(reply), TransportError::unanswered("/revoke"));

    let fatal = next_named(&mut client, EVENT_ERROR).await;
    assert_eq!(
        fatal,
        vec![json!({"type": "error", "message": "session revoked", "code": 401})]
    );
    assert!(client.try_next_event().is_none());
}

#[tokio::test]
async fn test_uncatchable_pending_result_uses_error_event() {
    let (_server, connector, _) = serve(root_actions());
    let (mut client, _) = connect(&connector).await;

    let reply = client.call("/expire", vec![]).await;
    assert_eq!(assert_err!(reply), TransportError::unanswered("/expire"));

    let fatal = next_named(&mut client, EVENT_ERROR).await;
    assert_eq!(fatal, vec![json!({"type": "error", "message": "session expired"})]);
    assert!(client.try_next_event().is_none());
    assert_eq!(assert_ok!(client.call("/method1", vec![]).await), json!("Method 1"));
}

#[tokio::test]
async fn test_recoverable_errors_keep_connection_usable() {
    let (_server, connector, _) = serve(root_actions());
    let (client, _) = connect(&connector).await;

    let panicked = assert_ok!(client.call("/explode", vec![]).await);
    assert_eq!(panicked["type"], "error");
    assert!(panicked["error"]["message"]
        .as_str()
        .unwrap()
        .contains("workspace exploded"));

    let invalid = assert_ok!(client.call("/method2", vec![json!("two"), json!(3)]).await);
    assert_eq!(invalid["type"], "error");

    assert_eq!(assert_ok!(client.call("/method1", vec![]).await), json!("Method 1"));
}

#[tokio::test]
async fn test_nested_instances() {
    let (_server, connector, _) = serve(root_actions());
    let (client, _) = connect(&connector).await;

    let first = assert_ok!(client.call("/open", vec![json!("hello")]).await);
    let second = assert_ok!(client.call("/open", vec![json!("bye")]).await);
    assert_eq!(
        first,
        json!({"type": "remote-instance", "namespace": "/open:1", "actions": ["read", "write"]})
    );
    assert_eq!(second["namespace"], "/open:2");

    assert_eq!(assert_ok!(client.call("/open:1/read", vec![]).await), json!("hello"));
    assert_eq!(
        assert_ok!(client.call("/open:1/write", vec![json!("changed")]).await),
        Value::Null
    );
    assert_eq!(assert_ok!(client.call("/open:1/read", vec![]).await), json!("changed"));
    assert_eq!(assert_ok!(client.call("/open:2/read", vec![]).await), json!("bye"));

    // Undeclared actions of the nested object are unreachable.
    let undeclared = client.call("/open:1/close", vec![]).await;
    assert_eq!(assert_err!(undeclared), TransportError::unanswered("/open:1/close"));
}

#[tokio::test]
async fn test_server_from_toml_config() {
    let config = assert_ok!(ServerConfig::from_toml_str(
        r#"
        [server]
        name = "configured"

        [actions]
        method2 = "number"
        method1 = "string"

        [actions.open]
        read = "string"
        "#,
    ));

    let (listener, connector) = MemoryTransport::bind();
    let server = RmiServer::from_config(&config, Shared::new(Workspace::default()));
    assert_eq!(server.name(), "configured");
    let serving = server.clone();
    tokio::spawn(async move { serving.serve(listener).await });

    let (client, descriptor) = connect(&connector).await;
    assert_eq!(descriptor["actions"], json!(["method2", "method1", "open"]));

    let document = assert_ok!(client.call("/open", vec![json!("text")]).await);
    assert_eq!(document["actions"], json!(["read"]));
    assert_eq!(assert_ok!(client.call("/open:1/read", vec![]).await), json!("text"));
}
