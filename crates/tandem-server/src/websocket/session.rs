//! WebSocket session lifecycle: one connected client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tandem_session::{ConnectionSocket, Session};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::connection::{ClientConnection, Outbound};
use super::handler::handle_message;
use super::heartbeat::{HeartbeatResult, run_heartbeat};
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};
use crate::rpc::registry::MethodRegistry;

/// Heartbeat cadence of a connection.
#[derive(Clone, Copy, Debug)]
pub struct HeartbeatConfig {
    /// Ping interval.
    pub interval: Duration,
    /// Silence tolerated before disconnecting.
    pub timeout: Duration,
}

/// Run a WebSocket session for a connected client.
///
/// 1. Forwards queued replies and broadcasts to the socket, pinging on the
///    heartbeat interval
/// 2. Dispatches every inbound text or binary frame as an RPC request in
///    its own task, so one slow pipeline call does not stall the others
/// 3. Stops on close, heartbeat timeout or `cancel`
///
/// Requests already dispatched run to completion after disconnect; their
/// replies are discarded by the closed connection.
#[instrument(skip_all, fields(session_id = %session.id(), workspace = %session.workspace()))]
pub async fn run_ws_session(
    ws: WebSocket,
    connection: Arc<ClientConnection>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    session: Arc<Session>,
    registry: Arc<MethodRegistry>,
    heartbeat: HeartbeatConfig,
    cancel: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let connection_start = Instant::now();
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    info!(connection_id = %connection.id(), "client connected");
    let stop = cancel.child_token();

    let writer_stop = stop.clone();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(heartbeat.interval);
        let _ = ping_interval.tick().await;
        loop {
            tokio::select! {
                msg = outbound_rx.recv() => {
                    let frame = match msg {
                        Some(Outbound::Text(text)) => Message::Text(text.into()),
                        Some(Outbound::Binary(bytes)) => Message::Binary(bytes.into()),
                        None => break,
                    };
                    if ws_tx.send(frame).await.is_err() {
                        break;
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                () = writer_stop.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let monitor = tokio::spawn(run_heartbeat(
        connection.clone(),
        heartbeat.interval,
        heartbeat.timeout,
        stop.clone(),
    ));
    let monitor_stop = stop.clone();
    let watchdog = tokio::spawn(async move {
        if monitor.await.ok() == Some(HeartbeatResult::TimedOut) {
            warn!("client unresponsive, disconnecting");
            monitor_stop.cancel();
        }
    });

    let socket: Arc<dyn ConnectionSocket> = connection.clone();
    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = stop.cancelled() => break,
        };
        let Some(Ok(msg)) = msg else { break };
        connection.mark_alive();

        let payload = match msg {
            Message::Text(text) => text.as_str().as_bytes().to_vec(),
            Message::Binary(bytes) => bytes.to_vec(),
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        let registry = registry.clone();
        let session = session.clone();
        let socket = socket.clone();
        drop(tokio::spawn(async move {
            handle_message(&payload, &registry, session, socket).await;
        }));
    }

    connection.close();
    stop.cancel();
    let _ = writer.await;
    let _ = watchdog.await;

    debug!(dropped = connection.drop_count(), "connection closed");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());
}
