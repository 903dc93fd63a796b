//! # tandem-session
//!
//! The per-connection session coordinator.
//!
//! A [`Session`] sits between one client connection and the shared
//! processing [`Pipeline`]:
//!
//! - builds a fresh [`SessionContext`] for every pipeline call
//! - resolves (and for admins, lazily provisions) the caller's account
//! - counts find/transaction calls and tracks live requests
//! - forwards queries, searches and transactions, replying through a [`Responder`]
//! - decides per batch whether to broadcast transactions verbatim or as a
//!   compacted class-list event
//!
//! The pipeline, the model store and the connection socket are collaborators
//! expressed as traits; the server crate supplies the transport side.

#![deny(unsafe_code)]

pub mod account;
pub mod broadcast;
pub mod context;
pub mod errors;
pub mod pipeline;
pub mod reply;
pub mod session;
pub mod socket;
pub mod stats;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use account::AccountProvisioner;
pub use broadcast::{BroadcastOutcome, BroadcastPlan, affected_classes, create_broadcast_event};
pub use context::SessionContext;
pub use errors::{PipelineError, SessionError, SocketError};
pub use pipeline::{Broadcaster, ModelDb, Pipeline};
pub use reply::{Responder, SocketResponder};
pub use session::{LiveRequest, Session, SessionStatistics};
pub use socket::{ChunkInfo, ConnectionSocket, ErrorBody, RequestId, Response, send_response};
pub use stats::{RequestTracker, SessionRequest, StatisticalData, StatsSnapshot};
