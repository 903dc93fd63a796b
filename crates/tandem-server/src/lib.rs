//! # tandem-server
//!
//! Axum WebSocket host for Tandem sessions.
//!
//! - `GET /ws/{token}`: HS256 token check, then one [`tandem_session::Session`] per connection
//! - RPC dispatch of `hello`, `ping`, `loadModel`, `getAccount`, `findAll`,
//!   `searchFulltext`, `tx` and `getStatistics`
//! - Per-workspace session registry whose broadcaster fans pipeline batches
//!   out to the other sessions of the workspace
//! - Heartbeat, statistics roller and graceful shutdown via `CancellationToken`
//! - `/health` and Prometheus `/metrics`
//! - [`TandemServer::bootstrap`]: settings, logging and recorder setup for a host binary

#![deny(unsafe_code)]

pub mod auth;
pub mod health;
pub mod metrics;
pub mod rpc;
pub mod server;
pub mod shutdown;
pub mod startup;
pub mod websocket;
pub mod workspace;

pub use auth::{AuthError, TokenDecoder, encode_token};
pub use server::TandemServer;
pub use startup::{StartupError, init_logging};
pub use workspace::{PipelineFactory, SessionManager};
