//! Per-call execution context handed to the pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tandem_core::{SessionId, Tx, WorkspaceId};

use crate::pipeline::ModelDb;

/// Identity and scratch state for exactly one pipeline call.
///
/// Built fresh by the session before every call and dropped when the call
/// (and its broadcast flush) finishes. The pipeline accumulates derived
/// transactions and per-transaction broadcast targets here.
pub struct SessionContext {
    /// Caller email.
    pub user_email: String,
    /// Session issuing the call.
    pub session_id: SessionId,
    /// Whether the caller holds admin privilege.
    pub admin: bool,
    /// Workspace the session is bound to.
    pub workspace: WorkspaceId,
    /// Branding the client connected through.
    pub branding: Option<String>,
    model_db: Arc<dyn ModelDb>,
    derived: Mutex<Vec<Tx>>,
    targets: Mutex<HashMap<String, Vec<String>>>,
}

impl SessionContext {
    /// Fresh context with empty scratch buffers.
    pub fn new(
        user_email: impl Into<String>,
        session_id: SessionId,
        admin: bool,
        workspace: WorkspaceId,
        branding: Option<String>,
        model_db: Arc<dyn ModelDb>,
    ) -> Self {
        Self {
            user_email: user_email.into(),
            session_id,
            admin,
            workspace,
            branding,
            model_db,
            derived: Mutex::new(Vec::new()),
            targets: Mutex::new(HashMap::new()),
        }
    }

    /// Shared model store.
    pub fn model_db(&self) -> &Arc<dyn ModelDb> {
        &self.model_db
    }

    /// Queue a transaction produced while processing this call.
    pub fn push_derived(&self, tx: Tx) {
        self.derived.lock().push(tx);
    }

    /// Drain queued transactions in insertion order.
    pub fn take_derived(&self) -> Vec<Tx> {
        std::mem::take(&mut *self.derived.lock())
    }

    /// Number of queued transactions.
    pub fn derived_len(&self) -> usize {
        self.derived.lock().len()
    }

    /// Restrict broadcast of transaction `tx_id` to the given emails.
    pub fn add_targets(&self, tx_id: impl Into<String>, emails: Vec<String>) {
        self.targets
            .lock()
            .entry(tx_id.into())
            .or_default()
            .extend(emails);
    }

    /// Drain the target map.
    pub fn take_targets(&self) -> HashMap<String, Vec<String>> {
        std::mem::take(&mut *self.targets.lock())
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("user_email", &self.user_email)
            .field("session_id", &self.session_id)
            .field("admin", &self.admin)
            .field("workspace", &self.workspace)
            .field("branding", &self.branding)
            .field("derived", &self.derived_len())
            .finish_non_exhaustive()
    }
}
