//! Response channel for one request.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::SocketError;
use crate::socket::{ConnectionSocket, ErrorBody, RequestId, Response, send_response};

/// Delivers the outcome of one request back to its caller.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Reply with a result.
    async fn send_result(&self, result: Value) -> Result<(), SocketError>;

    /// Reply with an error.
    async fn send_error(&self, error: &ErrorBody) -> Result<(), SocketError>;
}

/// [`Responder`] writing to a connection socket through [`send_response`].
pub struct SocketResponder {
    socket: Arc<dyn ConnectionSocket>,
    id: Option<RequestId>,
    binary: bool,
    compression: bool,
    max_payload: usize,
}

impl SocketResponder {
    /// Responder for request `id` using the given transport flags.
    pub fn new(
        socket: Arc<dyn ConnectionSocket>,
        id: Option<RequestId>,
        binary: bool,
        compression: bool,
        max_payload: usize,
    ) -> Self {
        Self {
            socket,
            id,
            binary,
            compression,
            max_payload,
        }
    }
}

#[async_trait]
impl Responder for SocketResponder {
    async fn send_result(&self, result: Value) -> Result<(), SocketError> {
        send_response(
            self.socket.as_ref(),
            Response::result(self.id.clone(), result),
            self.max_payload,
            self.binary,
            self.compression,
        )
        .await
    }

    async fn send_error(&self, error: &ErrorBody) -> Result<(), SocketError> {
        let response = Response::error(self.id.clone(), error.clone());
        let _ = self
            .socket
            .send(&response, self.binary, self.compression)
            .await?;
        Ok(())
    }
}
