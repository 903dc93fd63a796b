//! The client session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tandem_core::query::{DocumentQuery, FindOptions, SearchOptions, SearchQuery};
use tandem_core::{ClassId, SessionId, Timestamp, Token, Tx, WorkspaceId, now_millis};
use tandem_settings::SessionSettings;
use tracing::{debug, instrument, warn};

use crate::account::AccountProvisioner;
use crate::broadcast::{BroadcastOutcome, BroadcastPlan, create_broadcast_event};
use crate::context::SessionContext;
use crate::errors::SessionError;
use crate::pipeline::Pipeline;
use crate::reply::{Responder, SocketResponder};
use crate::socket::{ConnectionSocket, RequestId, Response, send_response};
use crate::stats::{RequestTracker, StatsSnapshot};

/// One authenticated client connection's view of a workspace.
pub struct Session {
    id: SessionId,
    token: Token,
    branding: Option<String>,
    pub(crate) pipeline: Arc<dyn Pipeline>,
    pub(crate) provisioner: Arc<AccountProvisioner>,
    settings: SessionSettings,
    created_at: Timestamp,
    binary_mode: AtomicBool,
    use_compression: AtomicBool,
    tracker: RequestTracker,
}

/// Live request as reported by [`Session::statistics`].
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveRequest {
    /// Client request id.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Time in flight.
    pub elapsed_ms: u64,
}

/// Statistics report of one session.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatistics {
    /// Session id.
    pub session_id: SessionId,
    /// Caller email.
    pub user: String,
    /// Negotiated binary mode.
    pub binary_mode: bool,
    /// Negotiated compression flag.
    pub compression: bool,
    /// Creation time.
    pub created_on: Timestamp,
    /// Last activity.
    pub last_request: Timestamp,
    /// Counters.
    pub data: StatsSnapshot,
    /// Requests in flight.
    pub requests: Vec<LiveRequest>,
}

impl Session {
    /// New session for `token` on `pipeline`.
    pub fn new(
        token: Token,
        pipeline: Arc<dyn Pipeline>,
        provisioner: Arc<AccountProvisioner>,
        settings: &SessionSettings,
    ) -> Self {
        Self {
            id: SessionId::new(),
            token,
            branding: None,
            pipeline,
            provisioner,
            settings: settings.clone(),
            created_at: now_millis(),
            binary_mode: AtomicBool::new(settings.default_binary_mode),
            use_compression: AtomicBool::new(settings.default_compression),
            tracker: RequestTracker::new(),
        }
    }

    /// Attach the branding the client connected through.
    #[must_use]
    pub fn with_branding(mut self, branding: impl Into<String>) -> Self {
        self.branding = Some(branding.into());
        self
    }

    // ── Identity ────────────────────────────────────────────────────

    /// Session id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Authenticated token.
    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Caller email.
    pub fn user(&self) -> &str {
        &self.token.email
    }

    /// Bound workspace.
    pub fn workspace(&self) -> &WorkspaceId {
        &self.token.workspace
    }

    /// Branding, if any.
    pub fn branding(&self) -> Option<&str> {
        self.branding.as_deref()
    }

    /// Whether the caller holds admin privilege.
    pub fn is_admin(&self) -> bool {
        self.token.is_admin()
    }

    /// Whether the caller is a model-upgrade client.
    pub fn is_upgrade_client(&self) -> bool {
        self.token.is_upgrade_client()
    }

    /// Operating mode.
    pub fn mode(&self) -> &str {
        self.token.mode()
    }

    /// Creation time.
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    // ── Transport flags ─────────────────────────────────────────────

    /// Whether payloads go out as binary frames.
    pub fn binary_mode(&self) -> bool {
        self.binary_mode.load(Ordering::Relaxed)
    }

    /// Set binary mode.
    pub fn set_binary_mode(&self, on: bool) {
        self.binary_mode.store(on, Ordering::Relaxed);
    }

    /// Whether the client accepts compressed payloads.
    pub fn use_compression(&self) -> bool {
        self.use_compression.load(Ordering::Relaxed)
    }

    /// Set the compression flag.
    pub fn set_compression(&self, on: bool) {
        self.use_compression.store(on, Ordering::Relaxed);
    }

    // ── Bookkeeping ─────────────────────────────────────────────────

    /// Counters and live requests.
    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    /// Register a dispatched request; `false` when `id` is already live.
    pub fn begin_request(&self, id: &RequestId, method: &str) -> bool {
        self.tracker.begin(id.clone(), method)
    }

    /// Unregister an answered request, reporting it when slow.
    pub fn end_request(&self, id: &RequestId) -> Option<Duration> {
        let elapsed = self.tracker.finish(id)?;
        if elapsed >= Duration::from_millis(self.settings.slow_request_ms) {
            warn!(
                session_id = %self.id,
                request_id = %id,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow request"
            );
        }
        Some(elapsed)
    }

    /// Statistics report.
    pub fn statistics(&self) -> SessionStatistics {
        SessionStatistics {
            session_id: self.id.clone(),
            user: self.user().to_owned(),
            binary_mode: self.binary_mode(),
            compression: self.use_compression(),
            created_on: self.created_at,
            last_request: self.tracker.last_request(),
            data: self.tracker.snapshot(),
            requests: self
                .tracker
                .live_requests()
                .into_iter()
                .map(|r| LiveRequest {
                    elapsed_ms: r.elapsed().as_millis() as u64,
                    id: r.id,
                    method: r.method,
                })
                .collect(),
        }
    }

    /// Fresh execution context for one pipeline call.
    pub fn build_context(&self) -> SessionContext {
        SessionContext::new(
            self.user(),
            self.id.clone(),
            self.is_admin(),
            self.workspace().clone(),
            self.branding.clone(),
            self.pipeline.model_db(),
        )
    }

    /// Responder for request `id` on `socket` with this session's flags.
    pub fn responder(
        &self,
        socket: Arc<dyn ConnectionSocket>,
        id: Option<RequestId>,
    ) -> SocketResponder {
        SocketResponder::new(
            socket,
            id,
            self.binary_mode(),
            self.use_compression(),
            self.settings.max_payload_bytes,
        )
    }

    async fn reply<T: Serialize>(
        &self,
        responder: &dyn Responder,
        method: &'static str,
        result: Result<T, SessionError>,
    ) {
        let value = result.and_then(|v| serde_json::to_value(v).map_err(SessionError::from));
        let sent = match value {
            Ok(value) => responder.send_result(value).await,
            Err(err) => {
                warn!(session_id = %self.id, method, code = err.code(), error = %err, "request failed");
                responder.send_error(&err.to_error_body()).await
            }
        };
        if let Err(err) = sent {
            warn!(session_id = %self.id, method, error = %err, "failed to deliver reply");
        }
    }

    // ── Gateways ────────────────────────────────────────────────────

    /// Reply `"pong!"`.
    pub async fn ping(&self, responder: &dyn Responder) {
        self.tracker.touch();
        self.reply(responder, "ping", Ok("pong!")).await;
    }

    /// Forward a model load.
    #[instrument(skip_all, fields(session_id = %self.id, method = "loadModel"))]
    pub async fn load_model(
        &self,
        responder: &dyn Responder,
        last_model_tx: Timestamp,
        hash: Option<&str>,
    ) {
        let ctx = self.build_context();
        let result = self
            .pipeline
            .load_model(&ctx, last_model_tx, hash)
            .await
            .map_err(SessionError::from);
        self.reply(responder, "loadModel", result).await;
    }

    /// Reply with the caller's account, `null` when there is none.
    #[instrument(skip_all, fields(session_id = %self.id, method = "getAccount"))]
    pub async fn get_account(&self, responder: &dyn Responder) {
        let result = self.resolve_account().await;
        self.reply(responder, "getAccount", result).await;
    }

    /// Forward a find and count it.
    #[instrument(skip_all, fields(session_id = %self.id, method = "findAll", class = %class))]
    pub async fn find_all(
        &self,
        responder: &dyn Responder,
        class: &ClassId,
        query: &DocumentQuery,
        options: &FindOptions,
    ) {
        self.tracker.touch();
        self.tracker.record_find();
        let ctx = self.build_context();
        let result = self
            .pipeline
            .find_all(&ctx, class, query, options)
            .await
            .map_err(SessionError::from);
        self.reply(responder, "findAll", result).await;
    }

    /// Forward a full-text search. Not counted as a find.
    #[instrument(skip_all, fields(session_id = %self.id, method = "searchFulltext"))]
    pub async fn search_fulltext(
        &self,
        responder: &dyn Responder,
        query: &SearchQuery,
        options: &SearchOptions,
    ) {
        self.tracker.touch();
        let ctx = self.build_context();
        let result = self
            .pipeline
            .search_fulltext(&ctx, query, options)
            .await
            .map_err(SessionError::from);
        self.reply(responder, "searchFulltext", result).await;
    }

    /// Apply one transaction, reply, then flush accumulated broadcasts.
    ///
    /// The reply is always delivered before the flush starts. The flush runs
    /// even when the transaction failed.
    #[instrument(skip_all, fields(session_id = %self.id, method = "tx"))]
    pub async fn tx(&self, responder: &dyn Responder, tx: Tx) {
        self.tracker.touch();
        self.tracker.record_tx();
        let ctx = self.build_context();
        let result = self
            .pipeline
            .tx(&ctx, vec![tx])
            .await
            .map_err(SessionError::from);
        self.reply(responder, "tx", result).await;

        if let Err(err) = self.pipeline.handle_broadcast(&ctx).await {
            warn!(session_id = %self.id, error = %err, "broadcast flush failed");
        }
    }

    /// Deliver a committed batch to this session's socket.
    ///
    /// Batches longer than the compaction threshold are replaced by one
    /// bulk-update event naming the affected classes; shorter batches go
    /// out unchanged through the chunked send helper.
    pub async fn broadcast(
        &self,
        socket: &dyn ConnectionSocket,
        txes: Vec<Tx>,
    ) -> Result<BroadcastOutcome, SessionError> {
        if txes.is_empty() {
            return Ok(BroadcastOutcome::Empty);
        }
        let binary = self.binary_mode();
        let compression = self.use_compression();

        match BroadcastPlan::for_batch(&txes, self.settings.broadcast_compact_threshold) {
            BroadcastPlan::Compacted(classes) => {
                let event = create_broadcast_event(&classes);
                let response = Response::broadcast(serde_json::to_value([event])?);
                let _ = socket.send(&response, binary, compression).await?;
                debug!(
                    session_id = %self.id,
                    tx_count = txes.len(),
                    classes = classes.len(),
                    "sent compacted broadcast"
                );
                Ok(BroadcastOutcome::Compacted { classes })
            }
            BroadcastPlan::Verbatim => {
                let count = txes.len();
                let response = Response::broadcast(serde_json::to_value(&txes)?);
                send_response(
                    socket,
                    response,
                    self.settings.max_payload_bytes,
                    binary,
                    compression,
                )
                .await?;
                Ok(BroadcastOutcome::Verbatim { count })
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user", &self.token.email)
            .field("workspace", &self.token.workspace)
            .finish_non_exhaustive()
    }
}
