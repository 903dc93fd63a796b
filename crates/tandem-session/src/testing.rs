//! Test doubles for the pipeline, model store, socket and responder.
//!
//! Compiled for this crate's tests and, with the `test-util` feature, for
//! downstream crates' tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value, json};
use tandem_core::doc::refs;
use tandem_core::query::{
    DocumentQuery, FindOptions, FindResult, ModelDelta, SearchOptions, SearchQuery, SearchResult,
};
use tandem_core::tx::TxCollectionCud;
use tandem_core::{
    Account, ClassId, Doc, DocId, SessionId, SpaceId, Timestamp, Token, Tx, TxFactory, WorkspaceId,
};

use crate::context::SessionContext;
use crate::errors::{PipelineError, SocketError};
use crate::pipeline::{Broadcaster, ModelDb, Pipeline};
use crate::reply::Responder;
use crate::socket::{ConnectionSocket, ErrorBody, Response};

// ── Fixtures ────────────────────────────────────────────────────────────────

/// Token for a regular member of `ws-1`.
pub fn user_token(email: &str) -> Token {
    Token::new(email, "ws-1")
}

/// Token for an admin of `ws-1`.
pub fn admin_token(email: &str) -> Token {
    Token::new(email, "ws-1").with_extra("admin", "true")
}

/// System-authored creation of a document of `class`.
pub fn create_tx(class: &str) -> Tx {
    Tx::CreateDoc(TxFactory::system().create_doc(
        ClassId::from(class),
        SpaceId::from("space-1"),
        Map::new(),
        None,
    ))
}

/// Collection envelope on a parent of class `parent` wrapping `inner`.
pub fn collection_tx(parent: &str, inner: Tx) -> Tx {
    let meta = inner.meta().clone();
    Tx::Collection(TxCollectionCud {
        meta,
        object_id: DocId::from("parent-1"),
        object_class: ClassId::from(parent),
        collection: "items".into(),
        tx: Box::new(inner),
    })
}

/// Account document with the given reference and email.
pub fn account_doc(id: &str, email: &str) -> Doc {
    let mut attributes = Map::new();
    let _ = attributes.insert("email".into(), json!(email));
    let _ = attributes.insert("role".into(), json!("OWNER"));
    Doc {
        id: DocId::from(id),
        class: ClassId::from(refs::CLASS_ACCOUNT),
        space: SpaceId::from(refs::SPACE_MODEL),
        modified_on: 0,
        modified_by: DocId::from(refs::ACCOUNT_SYSTEM),
        created_on: None,
        created_by: None,
        attributes,
    }
}

// ── Model store ─────────────────────────────────────────────────────────────

/// Model store backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryModelDb {
    docs: RwLock<HashMap<DocId, Doc>>,
}

impl InMemoryModelDb {
    /// Insert or replace a document.
    pub fn insert(&self, doc: Doc) {
        let _ = self.docs.write().insert(doc.id.clone(), doc);
    }

    /// Apply creations and removals; other transactions are ignored.
    pub fn apply(&self, tx: &Tx) {
        match tx {
            Tx::CreateDoc(create) => self.insert(create.to_doc()),
            Tx::RemoveDoc(remove) => {
                let _ = self.docs.write().remove(&remove.object_id);
            }
            Tx::Collection(envelope) => self.apply(&envelope.tx),
            _ => {}
        }
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }
}

impl ModelDb for InMemoryModelDb {
    fn account_by_email(&self, email: &str) -> Option<Account> {
        self.docs
            .read()
            .values()
            .filter(|doc| doc.class.as_str() == refs::CLASS_ACCOUNT)
            .filter(|doc| doc.attributes.get("email").and_then(Value::as_str) == Some(email))
            .find_map(|doc| Account::from_doc(doc.clone()).ok())
    }

    fn find_object(&self, id: &DocId) -> Option<Doc> {
        self.docs.read().get(id).cloned()
    }
}

// ── Call log ────────────────────────────────────────────────────────────────

/// Observable step, in the order it happened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// `load_model` called.
    LoadModel,
    /// `find_all` called for a class.
    FindAll(String),
    /// `search_fulltext` called with a query.
    Search(String),
    /// `tx` called with this many transactions.
    Tx(usize),
    /// `handle_broadcast` called.
    HandleBroadcast,
    /// A reply was delivered.
    Reply {
        /// Whether it was a result rather than an error.
        ok: bool,
    },
}

/// Shared, ordered event log.
pub type EventLog = Arc<Mutex<Vec<Event>>>;

/// One `tx` call and the context it arrived with.
#[derive(Clone, Debug)]
pub struct Submission {
    /// Submitted transactions.
    pub txes: Vec<Tx>,
    /// Caller email on the context.
    pub user_email: String,
    /// Session id on the context.
    pub session_id: SessionId,
    /// Admin flag on the context.
    pub admin: bool,
    /// Workspace on the context.
    pub workspace: WorkspaceId,
    /// Derived transactions already queued on the context at entry.
    pub derived_on_entry: usize,
}

// ── Pipeline ────────────────────────────────────────────────────────────────

/// Pipeline double that applies creations to a model store, queues every
/// applied transaction for broadcast, and logs each call.
pub struct FakePipeline {
    model: Arc<InMemoryModelDb>,
    model_db: Arc<dyn ModelDb>,
    log: EventLog,
    tx_error: Mutex<Option<PipelineError>>,
    find_error: Mutex<Option<PipelineError>>,
    tx_delay: Option<Duration>,
    broadcaster: RwLock<Option<Arc<dyn Broadcaster>>>,
    targets: Mutex<HashMap<String, Vec<String>>>,
    submissions: Mutex<Vec<Submission>>,
}

impl Default for FakePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePipeline {
    /// Pipeline over an empty in-memory model.
    pub fn new() -> Self {
        Self::with_model(Arc::new(InMemoryModelDb::default()))
    }

    /// Pipeline over `model`.
    pub fn with_model(model: Arc<InMemoryModelDb>) -> Self {
        Self {
            model_db: model.clone(),
            model,
            log: Arc::new(Mutex::new(Vec::new())),
            tx_error: Mutex::new(None),
            find_error: Mutex::new(None),
            tx_delay: None,
            broadcaster: RwLock::new(None),
            targets: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
        }
    }

    /// Pipeline answering model lookups from `model_db`; applied
    /// transactions are not visible through it.
    pub fn with_model_db(model_db: Arc<dyn ModelDb>) -> Self {
        Self {
            model_db,
            ..Self::new()
        }
    }

    /// Delay every `tx` call.
    #[must_use]
    pub fn with_tx_delay(mut self, delay: Duration) -> Self {
        self.tx_delay = Some(delay);
        self
    }

    /// Route flushed transactions to `broadcaster`.
    pub fn set_broadcaster(&self, broadcaster: Arc<dyn Broadcaster>) {
        *self.broadcaster.write() = Some(broadcaster);
    }

    /// Make subsequent `tx` calls fail.
    pub fn fail_tx(&self, error: PipelineError) {
        *self.tx_error.lock() = Some(error);
    }

    /// Make subsequent `find_all` calls fail.
    pub fn fail_find(&self, error: PipelineError) {
        *self.find_error.lock() = Some(error);
    }

    /// Deliver transactions whose creation class is `class` only to `emails`.
    pub fn target_class(&self, class: &str, emails: Vec<String>) {
        let _ = self.targets.lock().insert(class.to_owned(), emails);
    }

    /// Shared event log.
    pub fn log(&self) -> EventLog {
        self.log.clone()
    }

    /// Snapshot of the event log.
    pub fn events(&self) -> Vec<Event> {
        self.log.lock().clone()
    }

    /// Number of `tx` calls so far.
    pub fn tx_calls(&self) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|e| matches!(e, Event::Tx(_)))
            .count()
    }

    /// Every `tx` call so far, in order.
    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }

    /// The backing in-memory model.
    pub fn model(&self) -> &Arc<InMemoryModelDb> {
        &self.model
    }
}

#[async_trait]
impl Pipeline for FakePipeline {
    async fn load_model(
        &self,
        _ctx: &SessionContext,
        last_model_tx: Timestamp,
        _hash: Option<&str>,
    ) -> Result<ModelDelta, PipelineError> {
        self.log.lock().push(Event::LoadModel);
        Ok(ModelDelta {
            full: last_model_tx == 0,
            hash: "fake".into(),
            transactions: Vec::new(),
        })
    }

    async fn find_all(
        &self,
        _ctx: &SessionContext,
        class: &ClassId,
        _query: &DocumentQuery,
        _options: &FindOptions,
    ) -> Result<FindResult, PipelineError> {
        self.log.lock().push(Event::FindAll(class.to_string()));
        if let Some(err) = self.find_error.lock().clone() {
            return Err(err);
        }
        let data = self
            .model
            .docs
            .read()
            .values()
            .filter(|doc| &doc.class == class)
            .cloned()
            .collect();
        Ok(FindResult {
            data,
            total: -1,
            lookup_map: None,
        })
    }

    async fn search_fulltext(
        &self,
        _ctx: &SessionContext,
        query: &SearchQuery,
        _options: &SearchOptions,
    ) -> Result<SearchResult, PipelineError> {
        self.log.lock().push(Event::Search(query.query.clone()));
        Ok(SearchResult {
            docs: Vec::new(),
            total: Some(0),
        })
    }

    async fn tx(&self, ctx: &SessionContext, txes: Vec<Tx>) -> Result<Vec<Tx>, PipelineError> {
        self.log.lock().push(Event::Tx(txes.len()));
        self.submissions.lock().push(Submission {
            txes: txes.clone(),
            user_email: ctx.user_email.clone(),
            session_id: ctx.session_id.clone(),
            admin: ctx.admin,
            workspace: ctx.workspace.clone(),
            derived_on_entry: ctx.derived_len(),
        });
        if let Some(delay) = self.tx_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.tx_error.lock().clone() {
            return Err(err);
        }
        for tx in &txes {
            self.model.apply(tx);
            let target = tx
                .extract()
                .object_class()
                .and_then(|class| self.targets.lock().get(class.as_str()).cloned());
            if let Some(emails) = target {
                ctx.add_targets(tx.meta().id.to_string(), emails);
            }
            ctx.push_derived(tx.clone());
        }
        Ok(txes)
    }

    async fn handle_broadcast(&self, ctx: &SessionContext) -> Result<(), PipelineError> {
        self.log.lock().push(Event::HandleBroadcast);
        let derived = ctx.take_derived();
        let targets = ctx.take_targets();
        let broadcaster = self.broadcaster.read().clone();
        let Some(broadcaster) = broadcaster else {
            return Ok(());
        };

        let (targeted, public): (Vec<Tx>, Vec<Tx>) = derived
            .into_iter()
            .partition(|tx| targets.contains_key(tx.meta().id.as_str()));
        if !public.is_empty() {
            broadcaster
                .broadcast(Some(&ctx.session_id), public, None)
                .await;
        }
        for tx in targeted {
            let emails = targets.get(tx.meta().id.as_str()).cloned();
            broadcaster
                .broadcast(Some(&ctx.session_id), vec![tx], emails)
                .await;
        }
        Ok(())
    }

    fn model_db(&self) -> Arc<dyn ModelDb> {
        self.model_db.clone()
    }
}

// ── Socket ──────────────────────────────────────────────────────────────────

/// One message handed to a [`RecordingSocket`].
#[derive(Clone, Debug)]
pub struct Frame {
    /// The message.
    pub response: Response,
    /// Binary flag it was sent with.
    pub binary: bool,
    /// Compression flag it was sent with.
    pub compression: bool,
}

/// Socket that records every message.
#[derive(Debug)]
pub struct RecordingSocket {
    id: String,
    frames: Mutex<Vec<Frame>>,
    closed: AtomicBool,
}

impl RecordingSocket {
    /// Open socket named `id`.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            frames: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Recorded messages.
    pub fn frames(&self) -> Vec<Frame> {
        self.frames.lock().clone()
    }

    /// Simulate a disconnect.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[async_trait]
impl ConnectionSocket for RecordingSocket {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn send(
        &self,
        response: &Response,
        binary: bool,
        compression: bool,
    ) -> Result<usize, SocketError> {
        if self.is_closed() {
            return Err(SocketError::Closed);
        }
        let size = serde_json::to_vec(response)?.len();
        self.frames.lock().push(Frame {
            response: response.clone(),
            binary,
            compression,
        });
        Ok(size)
    }
}

// ── Responder ───────────────────────────────────────────────────────────────

/// Responder that records replies and logs them to a shared [`EventLog`].
#[derive(Debug)]
pub struct RecordingResponder {
    log: EventLog,
    replies: Mutex<Vec<Result<Value, ErrorBody>>>,
}

impl RecordingResponder {
    /// Responder logging into `log`.
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            replies: Mutex::new(Vec::new()),
        }
    }

    /// Successful replies.
    pub fn results(&self) -> Vec<Value> {
        self.replies
            .lock()
            .iter()
            .filter_map(|r| r.as_ref().ok().cloned())
            .collect()
    }

    /// Error replies.
    pub fn errors(&self) -> Vec<ErrorBody> {
        self.replies
            .lock()
            .iter()
            .filter_map(|r| r.as_ref().err().cloned())
            .collect()
    }
}

#[async_trait]
impl Responder for RecordingResponder {
    async fn send_result(&self, result: Value) -> Result<(), SocketError> {
        self.log.lock().push(Event::Reply { ok: true });
        self.replies.lock().push(Ok(result));
        Ok(())
    }

    async fn send_error(&self, error: &ErrorBody) -> Result<(), SocketError> {
        self.log.lock().push(Event::Reply { ok: false });
        self.replies.lock().push(Err(error.clone()));
        Ok(())
    }
}
