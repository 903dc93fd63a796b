//! Account resolution and lazy provisioning of admin accounts.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, json};
use tandem_core::doc::refs;
use tandem_core::{Account, AccountRole, ClassId, DocId, SpaceId, Tx, TxFactory};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::SessionError;
use crate::pipeline::ModelDb;
use crate::session::Session;

/// Serializes account provisioning per account key.
///
/// Shared by all sessions of a workspace so concurrent logins of the same
/// admin create the system account once. Locks are dropped from the map
/// once nobody waits on them.
#[derive(Debug, Default)]
pub struct AccountProvisioner {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl AccountProvisioner {
    /// Empty provisioner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`.
    pub async fn with_key<F, Fut, T>(&self, key: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = Arc::clone(&self.locks.entry(key.to_owned()).or_default());
        let result = {
            let _guard = lock.lock().await;
            f().await
        };
        drop(lock);
        let _ = self
            .locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Keys with a provisioning call in progress.
    pub fn pending(&self) -> usize {
        self.locks.len()
    }
}

impl Session {
    /// Account of the caller, provisioning a system account for admins.
    ///
    /// Returns `Ok(None)` for a non-admin caller without an account.
    pub async fn resolve_account(&self) -> Result<Option<Account>, SessionError> {
        let model_db = self.pipeline.model_db();
        let email = self.user();
        if let Some(account) = model_db.account_by_email(email) {
            return Ok(Some(account));
        }
        if !self.is_admin() {
            debug!(session_id = %self.id(), "no account for caller");
            return Ok(None);
        }

        let key = DocId::from(email);
        self.provisioner
            .with_key(email, || self.provision_system_account(model_db.as_ref(), &key))
            .await
    }

    async fn provision_system_account(
        &self,
        model_db: &dyn ModelDb,
        key: &DocId,
    ) -> Result<Option<Account>, SessionError> {
        if let Some(doc) = model_db.find_object(key) {
            return Account::from_doc(doc)
                .map(Some)
                .map_err(|source| SessionError::InvalidAccount { source });
        }

        let mut attributes = Map::new();
        let _ = attributes.insert("role".into(), json!(AccountRole::Owner));
        let _ = attributes.insert(
            "email".into(),
            json!(format!("{}{}", refs::SYSTEM_EMAIL_PREFIX, self.user())),
        );
        let create = TxFactory::system().create_doc(
            ClassId::from(refs::CLASS_ACCOUNT),
            SpaceId::from(refs::SPACE_MODEL),
            attributes,
            Some(key.clone()),
        );

        let ctx = self.build_context();
        let _ = self
            .pipeline
            .tx(&ctx, vec![Tx::CreateDoc(create.clone())])
            .await?;
        info!(
            session_id = %self.id(),
            workspace = %self.workspace(),
            account = %key,
            "provisioned system account"
        );

        Account::from_doc(create.to_doc())
            .map(Some)
            .map_err(|source| SessionError::InvalidAccount { source })
    }
}
