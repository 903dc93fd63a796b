//! # tandem-core
//!
//! Foundation types shared by every Tandem crate.
//!
//! - **Branded IDs**: `SessionId`, `WorkspaceId`, `DocId`, `ClassId`, `SpaceId` as newtypes
//! - **Documents**: [`doc::Doc`] and the typed [`doc::Account`] view
//! - **Transactions**: the tagged [`tx::Tx`] enum with explicit unwrapping of wrapped changes
//! - **Queries**: find / full-text search / model-load payloads
//! - **Tokens**: authenticated identity with extra claims
//! - **Logging**: `tracing` subscriber bootstrap

#![deny(unsafe_code)]

pub mod doc;
pub mod ids;
pub mod logging;
pub mod query;
pub mod time;
pub mod token;
pub mod tx;

pub use doc::{Account, AccountRole, Doc};
pub use ids::{ClassId, DocId, SessionId, SpaceId, WorkspaceId};
pub use time::{Timestamp, now_millis};
pub use token::Token;
pub use tx::{Tx, TxFactory};
