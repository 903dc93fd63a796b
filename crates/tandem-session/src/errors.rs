//! Session error types.

use thiserror::Error;

use crate::socket::ErrorBody;

/// Pipeline rejected a transaction.
pub const TX_REJECTED: &str = "TX_REJECTED";
/// Pipeline failed while serving a request.
pub const PIPELINE_ERROR: &str = "PIPELINE_ERROR";
/// Requested object does not exist.
pub const NOT_FOUND: &str = "NOT_FOUND";
/// Unexpected internal error.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Failure raised by the processing pipeline.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// The referenced object does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Validation or permission check rejected the request.
    #[error("rejected: {0}")]
    Rejected(String),
    /// Storage or processing failure.
    #[error("pipeline failure: {0}")]
    Internal(String),
}

/// Failure to hand a payload to the connection socket.
#[derive(Debug, Error)]
pub enum SocketError {
    /// The peer disconnected.
    #[error("socket closed")]
    Closed,
    /// The outbound queue is full.
    #[error("send queue full")]
    Full,
    /// Payload could not be serialized.
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Error produced by a session operation.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The pipeline failed; reported to the originating request only.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    /// The reply could not be delivered.
    #[error(transparent)]
    Socket(#[from] SocketError),
    /// A pipeline result could not be serialized.
    #[error("failed to encode result: {0}")]
    Encode(#[from] serde_json::Error),
    /// A document stored under an account key is not a valid account.
    #[error("invalid account document: {source}")]
    InvalidAccount {
        /// Decoding failure.
        #[source]
        source: serde_json::Error,
    },
}

impl SessionError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Pipeline(PipelineError::NotFound(_)) => NOT_FOUND,
            Self::Pipeline(PipelineError::Rejected(_)) => TX_REJECTED,
            Self::Pipeline(PipelineError::Internal(_)) => PIPELINE_ERROR,
            Self::Socket(_) | Self::Encode(_) | Self::InvalidAccount { .. } => INTERNAL_ERROR,
        }
    }

    /// Convert to the wire-format error body.
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody::new(self.code(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_error_codes() {
        let err = SessionError::from(PipelineError::Rejected("readonly".into()));
        assert_eq!(err.code(), TX_REJECTED);
        assert_eq!(err.to_string(), "rejected: readonly");

        let err = SessionError::from(PipelineError::NotFound("doc-1".into()));
        assert_eq!(err.code(), NOT_FOUND);

        let err = SessionError::from(PipelineError::Internal("disk".into()));
        assert_eq!(err.code(), PIPELINE_ERROR);
    }

    #[test]
    fn socket_errors_are_internal() {
        let err = SessionError::from(SocketError::Closed);
        assert_eq!(err.code(), INTERNAL_ERROR);
        assert_eq!(err.to_string(), "socket closed");
    }

    #[test]
    fn error_body_carries_code_and_message() {
        let body = SessionError::from(PipelineError::Internal("boom".into())).to_error_body();
        assert_eq!(body.code, PIPELINE_ERROR);
        assert_eq!(body.message, "pipeline failure: boom");
    }
}
