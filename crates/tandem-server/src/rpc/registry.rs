//! Method registry and async dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use metrics::{counter, histogram};
use serde_json::Value;
use tandem_session::{ConnectionSocket, RequestId, Responder, Session, SocketResponder};
use tracing::warn;

use crate::metrics::{RPC_ERRORS_TOTAL, RPC_REQUEST_DURATION_SECONDS, RPC_REQUESTS_TOTAL};
use crate::rpc::errors::RpcError;
use crate::rpc::types::RpcRequest;

/// The caller of one request.
pub struct RpcCall {
    /// Session the request belongs to.
    pub session: Arc<Session>,
    /// Socket replies go to.
    pub socket: Arc<dyn ConnectionSocket>,
    /// Request id, echoed in the reply.
    pub id: Option<RequestId>,
}

impl RpcCall {
    /// Responder using the session's current transport flags.
    pub fn responder(&self) -> SocketResponder {
        self.session.responder(self.socket.clone(), self.id.clone())
    }
}

/// Trait implemented by every RPC method handler.
///
/// A handler either replies itself through [`RpcCall::responder`] and
/// returns `Ok(None)`, or returns `Ok(Some(value))` for the registry to
/// send. Errors are sent by the registry.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Execute the handler.
    async fn handle(&self, params: Value, call: &RpcCall) -> Result<Option<Value>, RpcError>;
}

/// Registry mapping method names to handlers.
pub struct MethodRegistry {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl MethodRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a method name.
    pub fn register(&mut self, method: &str, handler: impl MethodHandler + 'static) {
        let _ = self.handlers.insert(method.to_owned(), Arc::new(handler));
    }

    /// Dispatch a request and deliver its reply.
    ///
    /// The request is listed as live on the session until the reply has
    /// been handed to the socket. Requests without an id, or reusing the id
    /// of a request still in flight, are refused with `INVALID_PARAMS`
    /// before any handler runs.
    pub async fn dispatch(&self, request: RpcRequest, call: &RpcCall) {
        let method = request.method;
        counter!(RPC_REQUESTS_TOTAL, "method" => method.clone()).increment(1);

        let Some(id) = &call.id else {
            let err = RpcError::InvalidParams {
                message: "Request id is required".into(),
            };
            Self::deliver(call, &method, Err(err)).await;
            return;
        };
        if !call.session.begin_request(id, &method) {
            let err = RpcError::InvalidParams {
                message: format!("Request id {id} is already in flight"),
            };
            Self::deliver(call, &method, Err(err)).await;
            return;
        }

        let start = Instant::now();
        let outcome = match self.handlers.get(&method) {
            Some(handler) => handler.handle(request.params, call).await,
            None => Err(RpcError::MethodNotFound {
                method: method.clone(),
            }),
        };
        Self::deliver(call, &method, outcome).await;

        histogram!(RPC_REQUEST_DURATION_SECONDS, "method" => method.clone())
            .record(start.elapsed().as_secs_f64());
        let _ = call.session.end_request(id);
    }

    async fn deliver(call: &RpcCall, method: &str, outcome: Result<Option<Value>, RpcError>) {
        let delivered = match outcome {
            Ok(None) => Ok(()),
            Ok(Some(value)) => call.responder().send_result(value).await,
            Err(err) => {
                counter!(RPC_ERRORS_TOTAL, "method" => method.to_owned(), "error_type" => err.code())
                    .increment(1);
                warn!(method, code = err.code(), error = %err, "rpc request rejected");
                call.responder().send_error(&err.to_error_body()).await
            }
        };
        if let Err(err) = delivered {
            warn!(method, error = %err, "failed to deliver reply");
        }
    }

    /// List all registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check whether a method is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tandem_session::AccountProvisioner;
    use tandem_session::testing::{FakePipeline, RecordingSocket, user_token};
    use tandem_settings::SessionSettings;

    struct EchoHandler;

    #[async_trait]
    impl MethodHandler for EchoHandler {
        async fn handle(&self, params: Value, _call: &RpcCall) -> Result<Option<Value>, RpcError> {
            Ok(Some(params))
        }
    }

    struct FailHandler;

    #[async_trait]
    impl MethodHandler for FailHandler {
        async fn handle(&self, _params: Value, _call: &RpcCall) -> Result<Option<Value>, RpcError> {
            Err(RpcError::InvalidParams {
                message: "bad".into(),
            })
        }
    }

    struct LiveCheckHandler;

    #[async_trait]
    impl MethodHandler for LiveCheckHandler {
        async fn handle(&self, _params: Value, call: &RpcCall) -> Result<Option<Value>, RpcError> {
            Ok(Some(json!(call.session.tracker().live_requests().len())))
        }
    }

    fn make_call(id: Option<RequestId>) -> (RpcCall, Arc<RecordingSocket>) {
        let socket = Arc::new(RecordingSocket::new("c1"));
        let session = Session::new(
            user_token("ann@example.com"),
            Arc::new(FakePipeline::new()),
            Arc::new(AccountProvisioner::new()),
            &SessionSettings::default(),
        );
        let call = RpcCall {
            session: Arc::new(session),
            socket: socket.clone(),
            id,
        };
        (call, socket)
    }

    fn request(method: &str, params: Value) -> RpcRequest {
        RpcRequest {
            id: None,
            method: method.into(),
            params,
        }
    }

    #[tokio::test]
    async fn dispatch_sends_returned_value() {
        let mut reg = MethodRegistry::new();
        reg.register("echo", EchoHandler);
        let (call, socket) = make_call(Some(1.into()));

        reg.dispatch(request("echo", json!({"x": 1})), &call).await;

        let frames = socket.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].response.id, Some(RequestId::Num(1)));
        assert_eq!(frames[0].response.result, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn unknown_method_is_an_error_reply() {
        let reg = MethodRegistry::new();
        let (call, socket) = make_call(Some("r2".into()));

        reg.dispatch(request("no.such", Value::Null), &call).await;

        let err = socket.frames()[0].response.error.clone().unwrap();
        assert_eq!(err.code, "METHOD_NOT_FOUND");
        assert!(err.message.contains("no.such"));
    }

    #[tokio::test]
    async fn handler_error_is_sent_with_its_code() {
        let mut reg = MethodRegistry::new();
        reg.register("fail", FailHandler);
        let (call, socket) = make_call(Some(3.into()));

        reg.dispatch(request("fail", Value::Null), &call).await;

        let response = &socket.frames()[0].response;
        assert_eq!(response.error.as_ref().unwrap().code, "INVALID_PARAMS");
        assert!(response.result.is_none());
    }

    #[tokio::test]
    async fn request_is_live_only_while_dispatching() {
        let mut reg = MethodRegistry::new();
        reg.register("live", LiveCheckHandler);
        let (call, socket) = make_call(Some(4.into()));

        reg.dispatch(request("live", Value::Null), &call).await;

        assert_eq!(socket.frames()[0].response.result, Some(json!(1)));
        assert!(call.session.tracker().live_requests().is_empty());
    }

    #[tokio::test]
    async fn request_without_id_is_refused() {
        let mut reg = MethodRegistry::new();
        reg.register("echo", EchoHandler);
        let (call, socket) = make_call(None);

        reg.dispatch(request("echo", json!({"x": 1})), &call).await;

        let frames = socket.frames();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].response.id.is_none());
        assert!(frames[0].response.result.is_none());
        let err = frames[0].response.error.as_ref().unwrap();
        assert_eq!(err.code, "INVALID_PARAMS");
        assert!(err.message.contains("id is required"));
    }

    #[tokio::test]
    async fn reused_live_id_is_refused_without_touching_the_first() {
        let mut reg = MethodRegistry::new();
        reg.register("echo", EchoHandler);
        let (call, socket) = make_call(Some(5.into()));
        assert!(call.session.begin_request(&RequestId::Num(5), "tx"));

        reg.dispatch(request("echo", json!({})), &call).await;

        let err = socket.frames()[0].response.error.clone().unwrap();
        assert_eq!(err.code, "INVALID_PARAMS");
        assert!(err.message.contains("already in flight"));
        let live = call.session.tracker().live_requests();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].method, "tx");
    }

    #[test]
    fn list_methods_sorted() {
        let mut reg = MethodRegistry::new();
        reg.register("tx", EchoHandler);
        reg.register("findAll", EchoHandler);

        assert_eq!(reg.methods(), vec!["findAll", "tx"]);
        assert!(reg.has_method("tx"));
        assert!(!reg.has_method("ping"));
    }
}
