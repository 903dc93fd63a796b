//! Collaborator traits: the processing pipeline, its model store, and the
//! workspace broadcaster the pipeline fans results out through.

use std::sync::Arc;

use async_trait::async_trait;
use tandem_core::query::{
    DocumentQuery, FindOptions, FindResult, ModelDelta, SearchOptions, SearchQuery, SearchResult,
};
use tandem_core::{Account, ClassId, Doc, DocId, SessionId, Timestamp, Tx};

use crate::context::SessionContext;
use crate::errors::PipelineError;

/// Read access to the workspace model.
///
/// Shared by all sessions of a workspace and synchronized by its owner.
#[cfg_attr(test, mockall::automock)]
pub trait ModelDb: Send + Sync {
    /// Account document registered under `email`.
    fn account_by_email(&self, email: &str) -> Option<Account>;

    /// Any model document by reference.
    fn find_object(&self, id: &DocId) -> Option<Doc>;
}

/// Validation, persistence and model maintenance for one workspace.
///
/// Every call receives the context built for it; implementations may push
/// derived transactions and broadcast targets into that context and are
/// expected to distribute them on [`Pipeline::handle_broadcast`].
#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Model transactions newer than `last_model_tx`.
    async fn load_model(
        &self,
        ctx: &SessionContext,
        last_model_tx: Timestamp,
        hash: Option<&str>,
    ) -> Result<ModelDelta, PipelineError>;

    /// Documents of `class` matching `query`.
    async fn find_all(
        &self,
        ctx: &SessionContext,
        class: &ClassId,
        query: &DocumentQuery,
        options: &FindOptions,
    ) -> Result<FindResult, PipelineError>;

    /// Full-text search.
    async fn search_fulltext(
        &self,
        ctx: &SessionContext,
        query: &SearchQuery,
        options: &SearchOptions,
    ) -> Result<SearchResult, PipelineError>;

    /// Apply transactions; returns the resulting transactions.
    async fn tx(&self, ctx: &SessionContext, txes: Vec<Tx>) -> Result<Vec<Tx>, PipelineError>;

    /// Distribute transactions accumulated in `ctx` to the workspace.
    async fn handle_broadcast(&self, ctx: &SessionContext) -> Result<(), PipelineError>;

    /// The model store backing this pipeline.
    fn model_db(&self) -> Arc<dyn ModelDb>;
}

/// Fan-out of committed transactions to the sessions of a workspace.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Send `txes` to every session of the workspace, or only to sessions
    /// whose caller email is listed in `target`. `from` names the session
    /// that caused the change, for logging.
    async fn broadcast(&self, from: Option<&SessionId>, txes: Vec<Tx>, target: Option<Vec<String>>);
}
