//! RPC envelope, errors, method registry and session method handlers.

pub mod errors;
pub mod handlers;
pub mod registry;
pub mod types;
