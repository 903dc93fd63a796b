//! Per-workspace session registry and broadcast fan-out.
//!
//! All sessions of a workspace share one pipeline and one account
//! provisioner. The pipeline reports committed batches through the
//! workspace's [`Broadcaster`], which hands each batch to every other live
//! session; each session then applies its own compaction decision and
//! transport flags.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use metrics::{counter, gauge};
use tandem_core::{SessionId, Token, Tx, WorkspaceId};
use tandem_session::{
    AccountProvisioner, BroadcastOutcome, Broadcaster, ConnectionSocket, Pipeline, PipelineError,
    Session,
};
use tandem_settings::SessionSettings;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{BROADCAST_BATCHES_TOTAL, BROADCAST_COMPACTED_TOTAL, SESSIONS_ACTIVE};

/// Builds the processing pipeline of a workspace on first connect.
#[async_trait]
pub trait PipelineFactory: Send + Sync {
    /// Pipeline for `workspace`, flushing its broadcasts into `broadcaster`.
    async fn create(
        &self,
        workspace: &WorkspaceId,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Result<Arc<dyn Pipeline>, PipelineError>;
}

#[derive(Clone)]
struct Member {
    session: Arc<Session>,
    socket: Arc<dyn ConnectionSocket>,
}

/// Fans committed batches out to the live sessions of one workspace.
pub struct WorkspaceBroadcaster {
    workspace: WorkspaceId,
    members: DashMap<SessionId, Member>,
}

impl WorkspaceBroadcaster {
    fn new(workspace: WorkspaceId) -> Self {
        Self {
            workspace,
            members: DashMap::new(),
        }
    }

    /// Number of attached sessions.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether no session is attached.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn recipients(&self, from: Option<&SessionId>, target: Option<&[String]>) -> Vec<Member> {
        self.members
            .iter()
            .filter(|entry| Some(entry.key()) != from)
            .filter(|entry| !entry.socket.is_closed())
            .filter(|entry| target.is_none_or(|emails| emails.iter().any(|e| e == entry.session.user())))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

async fn deliver(member: Member, txes: Vec<Tx>) {
    let session = &member.session;
    match session.broadcast(member.socket.as_ref(), txes).await {
        Ok(BroadcastOutcome::Compacted { classes }) => {
            counter!(BROADCAST_COMPACTED_TOTAL).increment(1);
            debug!(session_id = %session.id(), classes = classes.len(), "compacted broadcast delivered");
        }
        Ok(_) => {}
        Err(err) => {
            warn!(session_id = %session.id(), error = %err, "broadcast delivery failed");
        }
    }
}

#[async_trait]
impl Broadcaster for WorkspaceBroadcaster {
    async fn broadcast(&self, from: Option<&SessionId>, txes: Vec<Tx>, target: Option<Vec<String>>) {
        if txes.is_empty() {
            return;
        }
        let recipients = self.recipients(from, target.as_deref());
        counter!(BROADCAST_BATCHES_TOTAL).increment(1);
        debug!(
            workspace = %self.workspace,
            tx_count = txes.len(),
            recipients = recipients.len(),
            targeted = target.is_some(),
            "broadcasting batch"
        );
        let _ = join_all(
            recipients
                .into_iter()
                .map(|member| deliver(member, txes.clone())),
        )
        .await;
    }
}

/// One open workspace.
pub struct Workspace {
    id: WorkspaceId,
    pipeline: Arc<dyn Pipeline>,
    provisioner: Arc<AccountProvisioner>,
    broadcaster: Arc<WorkspaceBroadcaster>,
}

impl Workspace {
    /// Workspace id.
    pub fn id(&self) -> &WorkspaceId {
        &self.id
    }

    /// Shared pipeline.
    pub fn pipeline(&self) -> &Arc<dyn Pipeline> {
        &self.pipeline
    }

    /// Broadcaster handed to the pipeline.
    pub fn broadcaster(&self) -> &Arc<WorkspaceBroadcaster> {
        &self.broadcaster
    }

    /// Live sessions.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.broadcaster
            .members
            .iter()
            .map(|entry| entry.session.clone())
            .collect()
    }
}

/// Opens and closes sessions, grouping them by workspace.
pub struct SessionManager {
    factory: Arc<dyn PipelineFactory>,
    settings: SessionSettings,
    workspaces: Mutex<HashMap<WorkspaceId, Arc<Workspace>>>,
}

impl SessionManager {
    /// Manager creating pipelines through `factory`.
    pub fn new(factory: Arc<dyn PipelineFactory>, settings: SessionSettings) -> Self {
        Self {
            factory,
            settings,
            workspaces: Mutex::new(HashMap::new()),
        }
    }

    /// Session settings applied to new sessions.
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Open a session for `token` writing to `socket`.
    ///
    /// The workspace and its pipeline are created on first use. The session
    /// joins the workspace under the registry lock, so a concurrent
    /// [`close`](Self::close) never drops a workspace that is gaining a member.
    pub async fn open(
        &self,
        token: Token,
        branding: Option<String>,
        socket: Arc<dyn ConnectionSocket>,
    ) -> Result<Arc<Session>, PipelineError> {
        let mut workspaces = self.workspaces.lock().await;
        let workspace = match workspaces.get(&token.workspace) {
            Some(ws) => ws.clone(),
            None => {
                let ws = self.open_workspace(&token.workspace).await?;
                let _ = workspaces.insert(token.workspace.clone(), ws.clone());
                ws
            }
        };

        let mut session = Session::new(
            token,
            workspace.pipeline.clone(),
            workspace.provisioner.clone(),
            &self.settings,
        );
        if let Some(branding) = branding {
            session = session.with_branding(branding);
        }
        let session = Arc::new(session);
        let _ = workspace.broadcaster.members.insert(
            session.id().clone(),
            Member {
                session: session.clone(),
                socket,
            },
        );
        gauge!(SESSIONS_ACTIVE).increment(1.0);
        drop(workspaces);

        info!(
            session_id = %session.id(),
            workspace = %session.workspace(),
            user = session.user(),
            "session opened"
        );
        Ok(session)
    }

    async fn open_workspace(&self, id: &WorkspaceId) -> Result<Arc<Workspace>, PipelineError> {
        let broadcaster = Arc::new(WorkspaceBroadcaster::new(id.clone()));
        let pipeline = self.factory.create(id, broadcaster.clone()).await?;
        info!(workspace = %id, "workspace opened");
        Ok(Arc::new(Workspace {
            id: id.clone(),
            pipeline,
            provisioner: Arc::new(AccountProvisioner::new()),
            broadcaster,
        }))
    }

    /// Detach `session`; the workspace is dropped with its last session.
    pub async fn close(&self, session: &Session) {
        let mut workspaces = self.workspaces.lock().await;
        let Some(workspace) = workspaces.get(session.workspace()) else {
            return;
        };
        if workspace.broadcaster.members.remove(session.id()).is_some() {
            gauge!(SESSIONS_ACTIVE).decrement(1.0);
            info!(session_id = %session.id(), workspace = %session.workspace(), "session closed");
        }
        if workspace.broadcaster.is_empty() {
            let _ = workspaces.remove(session.workspace());
            info!(workspace = %session.workspace(), "workspace closed");
        }
    }

    /// Open workspace by id.
    pub async fn workspace(&self, id: &WorkspaceId) -> Option<Arc<Workspace>> {
        self.workspaces.lock().await.get(id).cloned()
    }

    /// Number of open workspaces.
    pub async fn workspace_count(&self) -> usize {
        self.workspaces.lock().await.len()
    }

    /// Number of live sessions across all workspaces.
    pub async fn session_count(&self) -> usize {
        self.workspaces
            .lock()
            .await
            .values()
            .map(|ws| ws.broadcaster.len())
            .sum()
    }

    /// Live sessions across all workspaces.
    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        self.workspaces
            .lock()
            .await
            .values()
            .flat_map(|ws| ws.sessions())
            .collect()
    }

    /// Start a new statistics period on every session, clearing the
    /// trailing window first when `reset_window` is set.
    pub async fn roll_statistics(&self, reset_window: bool) {
        for session in self.sessions().await {
            if reset_window {
                session.tracker().reset_window();
            }
            session.tracker().roll_period();
        }
    }
}

/// Periodically roll every session's statistics until `cancel` fires.
///
/// Every `roll` the current period is folded into the window; the window is
/// cleared once per `window`.
pub fn start_stats_roller(
    manager: Arc<SessionManager>,
    roll: Duration,
    window: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let roll = roll.max(Duration::from_millis(1));
    let rolls_per_window = (window.as_millis() / roll.as_millis()).max(1);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(roll);
        let _ = ticker.tick().await;
        let mut ticks: u128 = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    ticks += 1;
                    manager.roll_statistics(ticks % rolls_per_window == 0).await;
                }
                () = cancel.cancelled() => break,
            }
        }
        debug!("statistics roller stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::Value;
    use tandem_session::testing::{
        FakePipeline, RecordingResponder, RecordingSocket, create_tx, user_token,
    };

    #[derive(Default)]
    struct FakeFactory {
        pipelines: parking_lot::Mutex<Vec<Arc<FakePipeline>>>,
        fail: bool,
    }

    impl FakeFactory {
        fn last(&self) -> Arc<FakePipeline> {
            self.pipelines.lock().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl PipelineFactory for FakeFactory {
        async fn create(
            &self,
            _workspace: &WorkspaceId,
            broadcaster: Arc<dyn Broadcaster>,
        ) -> Result<Arc<dyn Pipeline>, PipelineError> {
            if self.fail {
                return Err(PipelineError::Internal("no storage".into()));
            }
            let pipeline = Arc::new(FakePipeline::new());
            pipeline.set_broadcaster(broadcaster);
            self.pipelines.lock().push(pipeline.clone());
            Ok(pipeline)
        }
    }

    fn manager(factory: &Arc<FakeFactory>) -> SessionManager {
        SessionManager::new(factory.clone(), SessionSettings::default())
    }

    async fn open(
        manager: &SessionManager,
        email: &str,
    ) -> (Arc<Session>, Arc<RecordingSocket>) {
        let socket = Arc::new(RecordingSocket::new(email));
        let session = manager
            .open(user_token(email), None, socket.clone())
            .await
            .unwrap();
        (session, socket)
    }

    fn broadcast_lengths(socket: &RecordingSocket) -> Vec<usize> {
        socket
            .frames()
            .iter()
            .filter(|f| f.response.id.is_none())
            .filter_map(|f| f.response.result.as_ref().and_then(Value::as_array).map(Vec::len))
            .collect()
    }

    #[tokio::test]
    async fn sessions_of_a_workspace_share_one_pipeline() {
        let factory = Arc::new(FakeFactory::default());
        let m = manager(&factory);
        let _ = open(&m, "ann@example.com").await;
        let _ = open(&m, "bob@example.com").await;

        assert_eq!(factory.pipelines.lock().len(), 1);
        assert_eq!(m.workspace_count().await, 1);
        assert_eq!(m.session_count().await, 2);
    }

    #[tokio::test]
    async fn tx_is_broadcast_to_other_sessions_only() {
        let factory = Arc::new(FakeFactory::default());
        let m = manager(&factory);
        let (ann, ann_socket) = open(&m, "ann@example.com").await;
        let (_bob, bob_socket) = open(&m, "bob@example.com").await;

        let responder = RecordingResponder::new(factory.last().log());
        ann.tx(&responder, create_tx("task:class:Issue")).await;

        assert_eq!(responder.results().len(), 1);
        assert_eq!(broadcast_lengths(&bob_socket), [1]);
        assert!(ann_socket.frames().is_empty());
    }

    #[tokio::test]
    async fn targeted_batches_reach_named_users_only() {
        let factory = Arc::new(FakeFactory::default());
        let m = manager(&factory);
        let (ann, _) = open(&m, "ann@example.com").await;
        let (_bob, bob_socket) = open(&m, "bob@example.com").await;
        let (_carl, carl_socket) = open(&m, "carl@example.com").await;
        factory
            .last()
            .target_class("chat:class:Secret", vec!["bob@example.com".into()]);

        let responder = RecordingResponder::new(factory.last().log());
        ann.tx(&responder, create_tx("chat:class:Secret")).await;

        assert_eq!(broadcast_lengths(&bob_socket), [1]);
        assert!(carl_socket.frames().is_empty());
    }

    #[tokio::test]
    async fn closed_sockets_are_skipped() {
        let factory = Arc::new(FakeFactory::default());
        let m = manager(&factory);
        let (ann, _) = open(&m, "ann@example.com").await;
        let (_bob, bob_socket) = open(&m, "bob@example.com").await;
        bob_socket.close();

        let responder = RecordingResponder::new(factory.last().log());
        ann.tx(&responder, create_tx("A")).await;
        assert!(bob_socket.frames().is_empty());
    }

    #[tokio::test]
    async fn large_batches_are_compacted_per_recipient() {
        let factory = Arc::new(FakeFactory::default());
        let settings = SessionSettings {
            broadcast_compact_threshold: 3,
            ..SessionSettings::default()
        };
        let m = SessionManager::new(factory.clone(), settings);
        let (_ann, ann_socket) = open(&m, "ann@example.com").await;

        let ws = m.workspace(&WorkspaceId::from("ws-1")).await.unwrap();
        let txes = (0..4).map(|_| create_tx("A")).collect();
        ws.broadcaster().broadcast(None, txes, None).await;

        let frames = ann_socket.frames();
        assert_eq!(frames.len(), 1);
        let result = frames[0].response.result.as_ref().unwrap();
        assert_eq!(result[0]["event"], "bulkUpdate");
        assert_eq!(result[0]["params"]["_class"], serde_json::json!(["A"]));
    }

    #[test]
    fn compacted_delivery_is_counted() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                let factory = Arc::new(FakeFactory::default());
                let settings = SessionSettings {
                    broadcast_compact_threshold: 3,
                    ..SessionSettings::default()
                };
                let m = SessionManager::new(factory.clone(), settings);
                let _ann = open(&m, "ann@example.com").await;
                let _bob = open(&m, "bob@example.com").await;

                let ws = m.workspace(&WorkspaceId::from("ws-1")).await.unwrap();
                let large = (0..4).map(|_| create_tx("A")).collect();
                ws.broadcaster().broadcast(None, large, None).await;
                ws.broadcaster().broadcast(None, vec![create_tx("B")], None).await;
            });
        });

        let output = crate::metrics::render(&handle);
        assert!(output.contains("broadcast_batches_total 2"), "{output}");
        assert!(output.contains("broadcast_compacted_total 2"), "{output}");
        assert!(output.contains("sessions_active 2"), "{output}");
    }

    #[tokio::test]
    async fn last_close_drops_the_workspace() {
        let factory = Arc::new(FakeFactory::default());
        let m = manager(&factory);
        let (ann, _) = open(&m, "ann@example.com").await;
        let (bob, _) = open(&m, "bob@example.com").await;

        m.close(&ann).await;
        assert_eq!(m.session_count().await, 1);
        assert_eq!(m.workspace_count().await, 1);

        m.close(&bob).await;
        assert_eq!(m.workspace_count().await, 0);

        let _ = open(&m, "ann@example.com").await;
        assert_eq!(factory.pipelines.lock().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn open_racing_last_close_is_never_orphaned() {
        let factory = Arc::new(FakeFactory::default());
        let m = Arc::new(manager(&factory));

        for i in 0..200 {
            let (ann, _) = open(&m, "ann@example.com").await;
            let closer = {
                let m = m.clone();
                tokio::spawn(async move { m.close(&ann).await })
            };
            let opener = {
                let m = m.clone();
                tokio::spawn(async move { open(&m, "bob@example.com").await.0 })
            };
            closer.await.unwrap();
            let bob = opener.await.unwrap();

            assert_eq!(m.session_count().await, 1, "iteration {i}");
            let ws = m.workspace(bob.workspace()).await.unwrap();
            assert!(ws.sessions().iter().any(|s| s.id() == bob.id()));

            m.close(&bob).await;
            assert_eq!(m.workspace_count().await, 0);
        }
    }

    #[tokio::test]
    async fn factory_failure_is_reported() {
        let factory = Arc::new(FakeFactory {
            fail: true,
            ..FakeFactory::default()
        });
        let m = manager(&factory);
        let socket = Arc::new(RecordingSocket::new("c"));
        let err = m
            .open(user_token("ann@example.com"), None, socket)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Internal(_)));
        assert_eq!(m.workspace_count().await, 0);
    }

    #[tokio::test]
    async fn branding_is_attached() {
        let factory = Arc::new(FakeFactory::default());
        let m = manager(&factory);
        let socket = Arc::new(RecordingSocket::new("c"));
        let session = m
            .open(user_token("ann@example.com"), Some("acme".into()), socket)
            .await
            .unwrap();
        assert_eq!(session.branding(), Some("acme"));
    }

    #[tokio::test]
    async fn roll_statistics_moves_current_into_window() {
        let factory = Arc::new(FakeFactory::default());
        let m = manager(&factory);
        let (ann, _) = open(&m, "ann@example.com").await;
        ann.tracker().record_find();
        ann.tracker().record_tx();

        m.roll_statistics(false).await;
        let snap = ann.tracker().snapshot();
        assert_eq!(snap.current.find, 0);
        assert_eq!(snap.mins5.find, 1);
        assert_eq!(snap.total.tx, 1);

        m.roll_statistics(true).await;
        let snap = ann.tracker().snapshot();
        assert_eq!(snap.mins5.find, 0);
        assert_eq!(snap.total.find, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn roller_runs_until_cancelled() {
        let factory = Arc::new(FakeFactory::default());
        let m = Arc::new(manager(&factory));
        let (ann, _) = open(&m, "ann@example.com").await;
        ann.tracker().record_find();

        let cancel = CancellationToken::new();
        let handle = start_stats_roller(
            m.clone(),
            Duration::from_secs(60),
            Duration::from_secs(300),
            cancel.clone(),
        );
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(ann.tracker().snapshot().mins5.find, 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
