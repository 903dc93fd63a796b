//! Connection socket seam and the bounded-size send helper.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::errors::SocketError;

/// Client-chosen request identifier (number or string on the wire).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric identifier.
    Num(i64),
    /// String identifier.
    Str(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(n) => write!(f, "{n}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Num(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

/// Structured error inside a [`Response`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorBody {
    /// Build an error body.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Position of a frame within a chunked response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkInfo {
    /// 1-based chunk index.
    pub index: u32,
    /// Whether this is the last chunk.
    #[serde(rename = "final")]
    pub is_final: bool,
}

/// Message sent to a client: a reply (with `id`) or a broadcast (without).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Request being answered; absent for broadcasts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    /// Successful result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    /// Chunk position when the result was split.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<ChunkInfo>,
}

impl Response {
    /// Successful reply to `id`.
    pub fn result(id: Option<RequestId>, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            ..Self::default()
        }
    }

    /// Failed reply to `id`.
    pub fn error(id: Option<RequestId>, error: ErrorBody) -> Self {
        Self {
            id,
            error: Some(error),
            ..Self::default()
        }
    }

    /// Unsolicited push carrying `result`.
    pub fn broadcast(result: Value) -> Self {
        Self::result(None, result)
    }
}

/// Transport end of one client connection.
///
/// Implementations own encoding and framing; `binary` and `compression`
/// are the session's negotiated transport flags.
#[async_trait]
pub trait ConnectionSocket: Send + Sync {
    /// Connection identifier, for logging.
    fn id(&self) -> &str;

    /// Whether the peer has gone away.
    fn is_closed(&self) -> bool;

    /// Send one message; returns the encoded size in bytes.
    async fn send(
        &self,
        response: &Response,
        binary: bool,
        compression: bool,
    ) -> Result<usize, SocketError>;
}

/// Send a response, splitting an oversized array result into chunks.
///
/// Array results with more than one element whose encoding exceeds
/// `max_payload` bytes are split into consecutive chunks sized from the
/// average element size, each tagged with a [`ChunkInfo`]. Everything else
/// goes out as a single frame. Sending stops early when the socket closes.
pub async fn send_response(
    socket: &dyn ConnectionSocket,
    response: Response,
    max_payload: usize,
    binary: bool,
    compression: bool,
) -> Result<(), SocketError> {
    let items = match response.result {
        Some(Value::Array(items)) if items.len() > 1 && max_payload > 0 => items,
        result => {
            let response = Response { result, ..response };
            let _ = socket.send(&response, binary, compression).await?;
            return Ok(());
        }
    };

    let size = serde_json::to_vec(&items)?.len();
    if size <= max_payload {
        let response = Response {
            result: Some(Value::Array(items)),
            ..response
        };
        let _ = socket.send(&response, binary, compression).await?;
        return Ok(());
    }

    let avg = (size / items.len()).max(1);
    let per_chunk = (max_payload / avg).max(1);
    let total = items.len().div_ceil(per_chunk);
    debug!(
        socket = socket.id(),
        size,
        items = items.len(),
        chunks = total,
        "splitting response into chunks"
    );

    let mut items = items.into_iter().peekable();
    let mut index: u32 = 1;
    while items.peek().is_some() {
        if socket.is_closed() {
            return Err(SocketError::Closed);
        }
        let chunk: Vec<Value> = items.by_ref().take(per_chunk).collect();
        let frame = Response {
            id: response.id.clone(),
            result: Some(Value::Array(chunk)),
            error: None,
            chunk: Some(ChunkInfo {
                index,
                is_final: items.peek().is_none(),
            }),
        };
        let _ = socket.send(&frame, binary, compression).await?;
        index += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSocket;
    use serde_json::json;

    fn items(n: usize) -> Vec<Value> {
        (0..n)
            .map(|i| json!({"_id": format!("doc-{i:04}"), "title": "x".repeat(80)}))
            .collect()
    }

    #[test]
    fn request_id_accepts_numbers_and_strings() {
        let n: RequestId = serde_json::from_str("7").unwrap();
        assert_eq!(n, RequestId::Num(7));
        let s: RequestId = serde_json::from_str("\"r-1\"").unwrap();
        assert_eq!(s, RequestId::from("r-1"));
        assert_eq!(s.to_string(), "r-1");
    }

    #[test]
    fn response_wire_shape() {
        let v = serde_json::to_value(Response::result(Some(1.into()), json!("pong!"))).unwrap();
        assert_eq!(v, json!({"id": 1, "result": "pong!"}));

        let v = serde_json::to_value(Response {
            chunk: Some(ChunkInfo { index: 2, is_final: true }),
            ..Response::broadcast(json!([]))
        })
        .unwrap();
        assert_eq!(v["chunk"], json!({"index": 2, "final": true}));
        assert!(v.get("id").is_none());
    }

    #[tokio::test]
    async fn small_array_is_sent_whole() {
        let socket = RecordingSocket::new("s1");
        let resp = Response::result(Some(1.into()), Value::Array(items(3)));
        send_response(&socket, resp.clone(), 1024 * 1024, false, true)
            .await
            .unwrap();
        let frames = socket.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].response, resp);
        assert!(frames[0].compression);
    }

    #[tokio::test]
    async fn oversized_array_is_chunked_in_order() {
        let socket = RecordingSocket::new("s1");
        let all = items(50);
        let resp = Response::result(Some("req".into()), Value::Array(all.clone()));
        send_response(&socket, resp, 1024, true, false).await.unwrap();

        let frames = socket.frames();
        assert!(frames.len() >= 2);
        let mut joined = Vec::new();
        for (i, frame) in frames.iter().enumerate() {
            let chunk = frame.response.chunk.unwrap();
            assert_eq!(chunk.index as usize, i + 1);
            assert_eq!(chunk.is_final, i + 1 == frames.len());
            assert_eq!(frame.response.id, Some(RequestId::from("req")));
            assert!(frame.binary);
            joined.extend(frame.response.result.clone().unwrap().as_array().unwrap().clone());
        }
        assert_eq!(joined, all);
    }

    #[tokio::test]
    async fn scalar_result_ignores_limit() {
        let socket = RecordingSocket::new("s1");
        let big = json!("y".repeat(4096));
        send_response(&socket, Response::result(None, big.clone()), 1024, false, false)
            .await
            .unwrap();
        let frames = socket.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].response.result, Some(big));
        assert!(frames[0].response.chunk.is_none());
    }

    #[tokio::test]
    async fn closed_socket_stops_chunking() {
        let socket = RecordingSocket::new("s1");
        socket.close();
        let resp = Response::result(None, Value::Array(items(50)));
        let err = send_response(&socket, resp, 1024, false, false).await.unwrap_err();
        assert!(matches!(err, SocketError::Closed));
    }
}
