//! WebSocket connection state, heartbeat, message dispatch and the
//! per-connection session loop.

pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod session;
