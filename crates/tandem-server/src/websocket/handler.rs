//! WebSocket message dispatch: parses an incoming frame as an
//! [`RpcRequest`] and routes it through the [`MethodRegistry`].

use std::sync::Arc;

use tandem_session::{ConnectionSocket, Response, Session};
use tracing::{debug, instrument, warn};

use crate::rpc::errors::RpcError;
use crate::rpc::registry::{MethodRegistry, RpcCall};
use crate::rpc::types::RpcRequest;

/// Handle one incoming text or binary frame.
///
/// Unparseable frames get an `INVALID_PARAMS` reply without an id.
#[instrument(skip_all, fields(session_id = %session.id(), method))]
pub async fn handle_message(
    payload: &[u8],
    registry: &MethodRegistry,
    session: Arc<Session>,
    socket: Arc<dyn ConnectionSocket>,
) {
    let request: RpcRequest = match serde_json::from_slice(payload) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "invalid request frame");
            let err = RpcError::InvalidParams {
                message: format!("Invalid JSON: {e}"),
            };
            let response = Response::error(None, err.to_error_body());
            if let Err(err) = socket
                .send(&response, session.binary_mode(), session.use_compression())
                .await
            {
                warn!(error = %err, "failed to deliver parse error");
            }
            return;
        }
    };

    let _ = tracing::Span::current().record("method", request.method.as_str());
    debug!(id = ?request.id, "dispatching RPC");
    if !registry.has_method(&request.method) {
        warn!("unknown RPC method");
    }

    let call = RpcCall {
        session,
        socket,
        id: request.id.clone(),
    };
    registry.dispatch(request, &call).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::handlers::register_all;
    use tandem_session::AccountProvisioner;
    use tandem_session::testing::{FakePipeline, RecordingSocket, user_token};
    use tandem_settings::SessionSettings;

    fn setup() -> (MethodRegistry, Arc<Session>, Arc<RecordingSocket>) {
        let mut registry = MethodRegistry::new();
        register_all(&mut registry);
        let session = Arc::new(Session::new(
            user_token("ann@example.com"),
            Arc::new(FakePipeline::new()),
            Arc::new(AccountProvisioner::new()),
            &SessionSettings::default(),
        ));
        (registry, session, Arc::new(RecordingSocket::new("c1")))
    }

    #[tokio::test]
    async fn invalid_json_gets_error_without_id() {
        let (registry, session, socket) = setup();
        handle_message(b"not json", &registry, session, socket.clone()).await;

        let frames = socket.frames();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].response.id.is_none());
        let err = frames[0].response.error.as_ref().unwrap();
        assert_eq!(err.code, "INVALID_PARAMS");
        assert!(err.message.starts_with("Invalid JSON"));
    }

    #[tokio::test]
    async fn valid_request_is_dispatched() {
        let (registry, session, socket) = setup();
        handle_message(
            br#"{"id":"p1","method":"ping"}"#,
            &registry,
            session,
            socket.clone(),
        )
        .await;

        let response = &socket.frames()[0].response;
        assert_eq!(response.id, Some("p1".into()));
        assert_eq!(response.result, Some(serde_json::json!("pong!")));
    }

    #[tokio::test]
    async fn unknown_method_is_reported() {
        let (registry, session, socket) = setup();
        handle_message(
            br#"{"id":2,"method":"deleteEverything"}"#,
            &registry,
            session,
            socket.clone(),
        )
        .await;

        let err = socket.frames()[0].response.error.clone().unwrap();
        assert_eq!(err.code, "METHOD_NOT_FOUND");
    }
}
