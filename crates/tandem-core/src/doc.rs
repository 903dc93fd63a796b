//! Documents and the typed account view.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{ClassId, DocId, SpaceId};
use crate::time::Timestamp;

/// Well-known model references.
pub mod refs {
    /// Class of account documents.
    pub const CLASS_ACCOUNT: &str = "core:class:Account";
    /// Class of the compacted broadcast event.
    pub const CLASS_WORKSPACE_EVENT: &str = "core:class:TxWorkspaceEvent";
    /// Space holding model documents.
    pub const SPACE_MODEL: &str = "core:space:Model";
    /// Space holding transactions.
    pub const SPACE_TX: &str = "core:space:Tx";
    /// Account that authors system-generated transactions.
    pub const ACCOUNT_SYSTEM: &str = "core:account:System";
    /// Prefix of synthesized admin account emails.
    pub const SYSTEM_EMAIL_PREFIX: &str = "system:";
}

/// A stored document.
///
/// Class-specific attributes are kept untyped; only the fields every
/// document carries are lifted into struct fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Doc {
    /// Document reference.
    #[serde(rename = "_id")]
    pub id: DocId,
    /// Document class.
    #[serde(rename = "_class")]
    pub class: ClassId,
    /// Owning space.
    pub space: SpaceId,
    /// Last modification time.
    pub modified_on: Timestamp,
    /// Account that last modified the document.
    pub modified_by: DocId,
    /// Creation time, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_on: Option<Timestamp>,
    /// Account that created the document, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<DocId>,
    /// Remaining class attributes.
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

/// Role of an account within a workspace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountRole {
    /// Read access to shared documents only.
    DocGuest,
    /// Guest member.
    Guest,
    /// Regular member.
    User,
    /// Workspace maintainer.
    Maintainer,
    /// Workspace owner.
    Owner,
}

/// Typed view of an account document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Account reference.
    #[serde(rename = "_id")]
    pub id: DocId,
    /// Always `core:class:Account` (or a subclass).
    #[serde(rename = "_class")]
    pub class: ClassId,
    /// Owning space (the model space).
    pub space: SpaceId,
    /// Last modification time.
    pub modified_on: Timestamp,
    /// Account that last modified the document.
    pub modified_by: DocId,
    /// Login email.
    pub email: String,
    /// Workspace role.
    pub role: AccountRole,
}

impl Account {
    /// Read an account out of a generic document.
    ///
    /// Fails when the document lacks `email` or `role`.
    pub fn from_doc(doc: Doc) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(doc)?)
    }

    /// Whether this account was synthesized for an admin caller.
    pub fn is_system(&self) -> bool {
        self.email.starts_with(refs::SYSTEM_EMAIL_PREFIX)
    }
}
