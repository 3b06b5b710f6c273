//! Instance wrapper
//!
//! Binds an [`ActionMap`] to a backing [`RemoteObject`] on one connection. Building an
//! instance registers one handler per declared action on `{namespace}/{action}`; each
//! handler runs the per-call protocol:
//!
//! 1. Marshal arguments, replacing placeholders by stubs.
//! 2. Invoke the backing method. Panics are captured as recoverable errors.
//! 3. Resolve the return value against the action's [`ResponseShape`], waiting for pending
//!    outcomes on a spawned task and exposing returned objects as nested instances.
//! 4. Reply through the acknowledgement, or emit uncatchable errors on the connection-wide
//!    error event without replying.
//!
//! Ready outcomes are resolved and replied synchronously inside the event dispatch.
//! Pending outcomes only suspend their own reply, so replies may arrive out of call order.
//!
//! Handlers are the only strong owners of an instance; they are released when the
//! connection drops its registrations on close.

use futures::future::BoxFuture;
use futures::FutureExt;
use rmi_codec::{
    child_namespace, event_name, validate_action_name, InstanceDescriptor, RmiError, EVENT_ERROR,
};
use rmi_network::{Ack, Connection, ConnectionRef};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, warn};

use crate::action::{ActionMap, ResponseShape};
use crate::args::Args;
use crate::object::{Outcome, RemoteObject, Returned};
use crate::{Result, ServerError};

/// Per-instance behavior switches, inherited by nested instances
#[derive(Debug, Clone, Copy, Default)]
pub struct InstanceOptions {
    /// Include argument and reply values in call traces
    pub log_arguments: bool,
}

/// A backing object exposed on a connection under a namespace
#[derive(Clone)]
pub struct Instance {
    inner: Arc<InstanceInner>,
}

struct InstanceInner {
    namespace: String,
    actions: ActionMap,
    target: Arc<dyn RemoteObject>,
    connection: ConnectionRef,
    children: AtomicU64,
    options: InstanceOptions,
}

/// What a call resolved to
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Void,
    Value(Value),
    Instance(InstanceDescriptor),
    Error(RmiError),
    /// Uncatchable: bypasses the reply
    Fatal(RmiError),
}

impl Resolution {
    /// Reply payload, or the error to emit on the error event instead of replying
    pub fn into_reply(self) -> std::result::Result<Value, RmiError> {
        match self {
            Self::Void => Ok(Value::Null),
            Self::Value(value) => Ok(value),
            Self::Instance(descriptor) => Ok(descriptor.to_value()),
            Self::Error(error) => Ok(error.to_reply()),
            Self::Fatal(error) => Err(error),
        }
    }
}

impl Instance {
    /// Expose `target` under `namespace` with the actions in `actions`.
    ///
    /// Every action must be a method `target` responds to; this is checked before any
    /// handler is registered, so a failed build leaves the connection untouched.
    pub fn build(
        connection: &Arc<dyn Connection>,
        target: Arc<dyn RemoteObject>,
        namespace: impl Into<String>,
        actions: ActionMap,
    ) -> Result<Self> {
        Self::build_with(connection, target, namespace, actions, InstanceOptions::default())
    }

    pub fn build_with(
        connection: &Arc<dyn Connection>,
        target: Arc<dyn RemoteObject>,
        namespace: impl Into<String>,
        actions: ActionMap,
        options: InstanceOptions,
    ) -> Result<Self> {
        for (name, _) in actions.iter() {
            validate_action_name(name)?;
            if !target.responds_to(name) {
                return Err(ServerError::unknown_action(name, target.type_name()));
            }
        }

        let inner = Arc::new(InstanceInner {
            namespace: namespace.into(),
            actions,
            target,
            connection: ConnectionRef::new(connection),
            children: AtomicU64::new(0),
            options,
        });

        for (name, _) in inner.actions.iter() {
            let instance = Arc::clone(&inner);
            let action = name.to_string();
            connection.on(
                &event_name(&inner.namespace, name),
                Arc::new(move |args: Vec<Value>, ack: Ack| instance.handle(&action, args, ack)),
            )?;
        }

        debug!(
            connection = %connection.id(),
            namespace = %inner.namespace,
            object = inner.target.type_name(),
            actions = ?inner.actions.names(),
            "Instance registered"
        );

        Ok(Self { inner })
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn actions(&self) -> &ActionMap {
        &self.inner.actions
    }

    pub fn descriptor(&self) -> InstanceDescriptor {
        InstanceDescriptor::new(
            self.inner.namespace.clone(),
            self.inner
                .actions
                .names()
                .into_iter()
                .map(String::from)
                .collect(),
        )
    }

    /// Wire representation sent to the caller
    pub fn to_value(&self) -> Value {
        self.descriptor().to_value()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("namespace", &self.inner.namespace)
            .field("actions", &self.inner.actions.names())
            .field("object", &self.inner.target.type_name())
            .field("connection", &self.inner.connection.id())
            .finish()
    }
}

impl InstanceInner {
    fn handle(self: &Arc<Self>, action: &str, raw: Vec<Value>, ack: Ack) {
        let Some(shape) = self.actions.get(action).cloned() else {
            return;
        };

        if self.options.log_arguments {
            debug!(namespace = %self.namespace, action, args = ?raw, "Dispatching call");
        } else {
            debug!(namespace = %self.namespace, action, "Dispatching call");
        }

        let args = Args::marshal(&self.connection, raw);
        let target = Arc::clone(&self.target);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| target.invoke(action, args)))
            .unwrap_or_else(|payload| Outcome::Ready(Err(panicked(action, payload))));

        match outcome {
            Outcome::Ready(result) => {
                let resolution = self.resolve_captured(action, &shape, result);
                self.deliver(action, resolution, ack);
            }
            Outcome::Pending(future) => match Handle::try_current() {
                Ok(runtime) => {
                    let instance = Arc::clone(self);
                    let action = action.to_string();
                    runtime.spawn(async move {
                        let result = settle(&action, future).await;
                        let resolution = instance.resolve_captured(&action, &shape, result);
                        instance.deliver(&action, resolution, ack);
                    });
                }
                Err(_) => {
                    let error = RmiError::recoverable(format!(
                        "action '{action}' returned a pending result outside an async runtime"
                    ));
                    self.deliver(action, Resolution::Error(error), ack);
                }
            },
        }
    }

    /// [`InstanceInner::resolve`], turning a panic while exposing a returned object into a
    /// recoverable error
    fn resolve_captured(
        &self,
        action: &str,
        shape: &ResponseShape,
        result: std::result::Result<Returned, RmiError>,
    ) -> Resolution {
        panic::catch_unwind(AssertUnwindSafe(|| self.resolve(action, shape, result)))
            .unwrap_or_else(|payload| Resolution::Error(panicked(action, payload)))
    }

    fn resolve(
        &self,
        action: &str,
        shape: &ResponseShape,
        result: std::result::Result<Returned, RmiError>,
    ) -> Resolution {
        let returned = match result {
            Ok(returned) => returned,
            Err(error) if error.is_uncatchable() => return Resolution::Fatal(error),
            Err(error) => return Resolution::Error(error),
        };

        match (shape, returned) {
            (ResponseShape::Void, _) => Resolution::Void,
            (ResponseShape::Error, returned) => Resolution::Error(returned.into_error()),
            (ResponseShape::Value, Returned::Value(value)) => Resolution::Value(value),
            (ResponseShape::Value, Returned::Object(object)) => {
                Resolution::Error(RmiError::recoverable(format!(
                    "action '{action}' returned a {} object, which cannot be sent as a value",
                    object.type_name()
                )))
            }
            (ResponseShape::Instance(actions), Returned::Object(object)) => {
                self.spawn_child(action, object, actions.clone())
            }
            (ResponseShape::Instance(_), Returned::Value(value)) => {
                Resolution::Error(RmiError::recoverable(format!(
                    "action '{action}' must return an object to expose as an instance, got {value}"
                )))
            }
        }
    }

    fn spawn_child(
        &self,
        action: &str,
        target: Arc<dyn RemoteObject>,
        actions: ActionMap,
    ) -> Resolution {
        let ordinal = self.children.fetch_add(1, Ordering::Relaxed) + 1;
        let namespace = child_namespace(&self.namespace, action, ordinal);

        let Some(connection) = self.connection.upgrade() else {
            return Resolution::Error(RmiError::recoverable("connection closed"));
        };

        match Instance::build_with(&connection, target, namespace, actions, self.options) {
            Ok(child) => Resolution::Instance(child.descriptor()),
            Err(e) => Resolution::Error(RmiError::recoverable(e.to_string())),
        }
    }

    fn deliver(&self, action: &str, resolution: Resolution, ack: Ack) {
        match &resolution {
            Resolution::Error(e) => {
                warn!(namespace = %self.namespace, action, error = %e, "Call failed")
            }
            Resolution::Fatal(e) => {
                error!(namespace = %self.namespace, action, error = %e, "Uncatchable error")
            }
            _ => {}
        }

        match resolution.into_reply() {
            Ok(reply) => {
                if self.options.log_arguments {
                    debug!(namespace = %self.namespace, action, reply = %reply, "Replying");
                } else {
                    debug!(namespace = %self.namespace, action, "Replying");
                }
                ack.send(reply);
            }
            Err(fatal) => {
                if let Err(e) = self.connection.emit(EVENT_ERROR, vec![fatal.to_fatal()]) {
                    debug!(
                        namespace = %self.namespace,
                        action,
                        error = %e,
                        "Fatal error not delivered"
                    );
                }
            }
        }
    }
}

/// Poll a pending outcome until it settles, capturing panics
async fn settle(
    action: &str,
    mut future: BoxFuture<'static, Outcome>,
) -> std::result::Result<Returned, RmiError> {
    loop {
        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Outcome::Ready(result)) => return result,
            Ok(Outcome::Pending(next)) => future = next,
            Err(payload) => return Err(panicked(action, payload)),
        }
    }
}

fn panicked(action: &str, payload: Box<dyn Any + Send>) -> RmiError {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    RmiError::recoverable(format!("method '{action}' panicked: {detail}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmi_network::test_utils::RecordingConnection;
    use serde_json::json;

    struct Calculator;

    impl RemoteObject for Calculator {
        fn methods(&self) -> &[&str] {
            &["method1", "method2", "nothing", "explode", "revoke", "child", "refuse"]
        }

        fn invoke(self: Arc<Self>, method: &str, args: Args) -> Outcome {
            match method {
                "method1" => Outcome::value("Method 1"),
                "method2" => match (args.value::<i64>(0), args.value::<i64>(1)) {
                    (Ok(a), Ok(b)) => Outcome::value(a + b),
                    (Err(e), _) | (_, Err(e)) => Outcome::fail(e),
                },
                "nothing" => Outcome::value("ignored"),
                "explode" => panic!("kaboom"),
                "revoke" => Outcome::fail(RmiError::uncatchable("session revoked")),
                "child" => Outcome::object(Calculator),
                "refuse" => Outcome::value(json!({"message": "refused", "code": 7})),
                other => Outcome::no_such_method(other),
            }
        }
    }

    fn connection() -> (Arc<RecordingConnection>, Arc<dyn Connection>) {
        let recording = RecordingConnection::new();
        let dynamic: Arc<dyn Connection> = recording.clone();
        (recording, dynamic)
    }

    fn build(actions: ActionMap) -> (Arc<RecordingConnection>, Instance) {
        let (recording, dynamic) = connection();
        let instance = Instance::build(&dynamic, Arc::new(Calculator), "", actions).unwrap();
        (recording, instance)
    }

    #[test]
    fn test_one_handler_per_action() {
        let (recording, instance) = build(ActionMap::new().value("method1").value("method2"));

        assert_eq!(recording.registered_events(), vec!["/method1", "/method2"]);
        assert_eq!(
            instance.to_value(),
            json!({"type": "remote-instance", "namespace": "", "actions": ["method1", "method2"]})
        );
    }

    #[test]
    fn test_unknown_action_fails_before_registration() {
        let (recording, dynamic) = connection();
        let actions = ActionMap::new().value("method1").value("missing");

        let err = Instance::build(&dynamic, Arc::new(Calculator), "", actions).unwrap_err();

        assert!(matches!(
            err,
            ServerError::UnknownAction { ref action, .. } if action == "missing"
        ));
        assert!(recording.registered_events().is_empty());
    }

    #[test]
    fn test_value_and_void_shapes() {
        let (recording, _instance) = build(
            ActionMap::new().value("method1").value("method2").void("nothing"),
        );

        assert_eq!(recording.trigger("/method1", vec![]), Some(json!("Method 1")));
        assert_eq!(
            recording.trigger("/method2", vec![json!(2), json!(3)]),
            Some(json!(5))
        );
        assert_eq!(recording.trigger("/nothing", vec![]), Some(Value::Null));
    }

    #[test]
    fn test_recoverable_errors_are_replies() {
        let (recording, _instance) = build(ActionMap::new().value("method2").value("explode"));

        let reply = recording.trigger("/method2", vec![json!("a")]).unwrap();
        assert_eq!(reply["type"], "error");
        assert!(reply["error"]["message"].as_str().unwrap().contains("invalid argument 0"));

        let reply = recording.trigger("/explode", vec![]).unwrap();
        assert_eq!(reply["type"], "error");
        assert!(reply["error"]["message"].as_str().unwrap().contains("kaboom"));
        assert!(recording.emitted_on(EVENT_ERROR).is_empty());
    }

    #[test]
    fn test_forced_error_shape_formats_value() {
        let (recording, _instance) = build(ActionMap::new().error("refuse"));

        let reply = recording.trigger("/refuse", vec![]).unwrap();
        assert_eq!(
            reply,
            json!({"type": "error", "error": {"message": "refused", "code": 7}})
        );
    }

    #[test]
    fn test_uncatchable_error_bypasses_reply() {
        let (recording, _instance) = build(ActionMap::new().value("revoke"));

        assert_eq!(recording.trigger("/revoke", vec![]), None);
        assert_eq!(
            recording.emitted_on(EVENT_ERROR),
            vec![vec![json!({"type": "error", "message": "session revoked"})]]
        );
    }

    #[test]
    fn test_nested_instances_get_path_namespaces() {
        let nested = ActionMap::new()
            .value("method1")
            .instance("child", ActionMap::new().void("nothing"));
        let (recording, _instance) = build(ActionMap::new().instance("child", nested));

        let first = recording.trigger("/child", vec![]).unwrap();
        let second = recording.trigger("/child", vec![]).unwrap();
        assert_eq!(first["namespace"], "/child:1");
        assert_eq!(second["namespace"], "/child:2");
        assert_eq!(first["actions"], json!(["method1", "child"]));

        assert_eq!(recording.trigger("/child:1/method1", vec![]), Some(json!("Method 1")));
        let grandchild = recording.trigger("/child:1/child", vec![]).unwrap();
        assert_eq!(grandchild["namespace"], "/child:1/child:1");
    }

    #[test]
    fn test_nested_build_failure_is_recoverable() {
        let nested = ActionMap::new().value("missing");
        let (recording, _instance) = build(ActionMap::new().instance("child", nested));

        let reply = recording.trigger("/child", vec![]).unwrap();
        assert_eq!(reply["type"], "error");
        assert!(reply["error"]["message"].as_str().unwrap().contains("missing"));
        assert!(recording.emitted_on(EVENT_ERROR).is_empty());
    }

    #[test]
    fn test_pending_without_runtime_is_recoverable() {
        struct Sleepy;

        impl RemoteObject for Sleepy {
            fn methods(&self) -> &[&str] {
                &["wait"]
            }

            fn invoke(self: Arc<Self>, _method: &str, _args: Args) -> Outcome {
                Outcome::future(async { Ok::<_, RmiError>(1) })
            }
        }

        let (recording, dynamic) = connection();
        let actions = ActionMap::new().value("wait");
        let _instance = Instance::build(&dynamic, Arc::new(Sleepy), "", actions).unwrap();

        let reply = recording.trigger("/wait", vec![]).unwrap();
        assert_eq!(reply["type"], "error");
    }

    struct Deferred;

    fn lost() -> Outcome {
        panic!("future lost its state")
    }

    impl RemoteObject for Deferred {
        fn methods(&self) -> &[&str] {
            &["reject", "revoke", "chain", "lose", "settle"]
        }

        fn invoke(self: Arc<Self>, method: &str, _args: Args) -> Outcome {
            match method {
                "reject" => Outcome::future(async {
                    Err::<Value, _>(RmiError::recoverable("disk full"))
                }),
                "revoke" => Outcome::future(async {
                    Err::<Value, _>(RmiError::uncatchable("token expired"))
                }),
                "chain" => Outcome::pending(async {
                    Outcome::pending(async { Outcome::value(7) })
                }),
                "lose" => Outcome::pending(async { lost() }),
                "settle" => Outcome::future(async { Ok::<_, RmiError>("ignored") }),
                other => Outcome::no_such_method(other),
            }
        }
    }

    fn build_deferred(actions: ActionMap) -> (Arc<RecordingConnection>, Instance) {
        let (recording, dynamic) = connection();
        let instance = Instance::build(&dynamic, Arc::new(Deferred), "", actions).unwrap();
        (recording, instance)
    }

    #[tokio::test]
    async fn test_rejected_pending_result_is_recoverable() {
        let (recording, _instance) = build_deferred(ActionMap::new().value("reject"));

        assert_eq!(
            recording.call("/reject", vec![]).await,
            Some(json!({"type": "error", "error": {"message": "disk full"}}))
        );
        assert!(recording.emitted_on(EVENT_ERROR).is_empty());
    }

    #[tokio::test]
    async fn test_uncatchable_pending_result_skips_reply() {
        let (recording, _instance) = build_deferred(ActionMap::new().value("revoke"));

        assert_eq!(recording.call("/revoke", vec![]).await, None);
        assert_eq!(
            recording.emitted_on(EVENT_ERROR),
            vec![vec![json!({"type": "error", "message": "token expired"})]]
        );
    }

    #[tokio::test]
    async fn test_pending_result_settling_into_pending_result() {
        let (recording, _instance) =
            build_deferred(ActionMap::new().value("chain").void("settle"));

        assert_eq!(recording.call("/chain", vec![]).await, Some(json!(7)));
        assert_eq!(recording.call("/settle", vec![]).await, Some(Value::Null));
    }

    #[tokio::test]
    async fn test_panic_inside_pending_result_is_recoverable() {
        let (recording, _instance) = build_deferred(ActionMap::new().value("lose"));

        let reply = recording.call("/lose", vec![]).await.unwrap();
        assert_eq!(reply["type"], "error");
        assert!(reply["error"]["message"]
            .as_str()
            .unwrap()
            .contains("future lost its state"));
        assert!(recording.emitted_on(EVENT_ERROR).is_empty());
    }

    #[test]
    fn test_panicking_nested_object_is_recoverable() {
        struct Unlisted;

        impl RemoteObject for Unlisted {
            fn methods(&self) -> &[&str] {
                panic!("method table unavailable")
            }

            fn invoke(self: Arc<Self>, method: &str, _args: Args) -> Outcome {
                Outcome::no_such_method(method)
            }
        }

        struct Opener;

        impl RemoteObject for Opener {
            fn methods(&self) -> &[&str] {
                &["open", "ping"]
            }

            fn invoke(self: Arc<Self>, method: &str, _args: Args) -> Outcome {
                match method {
                    "open" => Outcome::object(Unlisted),
                    _ => Outcome::value("pong"),
                }
            }
        }

        let (recording, dynamic) = connection();
        let actions = ActionMap::new()
            .instance("open", ActionMap::new().value("read"))
            .value("ping");
        let _instance = Instance::build(&dynamic, Arc::new(Opener), "", actions).unwrap();

        let reply = recording.trigger("/open", vec![]).unwrap();
        assert_eq!(reply["type"], "error");
        assert!(reply["error"]["message"]
            .as_str()
            .unwrap()
            .contains("method table unavailable"));
        assert_eq!(recording.trigger("/ping", vec![]), Some(json!("pong")));
    }

    #[test]
    fn test_resolution_replies() {
        assert_eq!(Resolution::Void.into_reply(), Ok(Value::Null));
        assert_eq!(Resolution::Value(json!(1)).into_reply(), Ok(json!(1)));
        assert!(Resolution::Fatal(RmiError::uncatchable("x")).into_reply().is_err());
    }
}
