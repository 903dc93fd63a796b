//! Transaction model.
//!
//! [`Tx`] is a tagged variant type. Create/update/delete-style changes
//! ("CUD") expose the class of the document they touch through
//! [`Tx::object_class`]. Envelopes that carry a single inner change (today
//! only [`TxCollectionCud`]) are unwrapped with [`Tx::extract`], which returns
//! either the inner transaction or the transaction itself.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::doc::{Doc, refs};
use crate::ids::{ClassId, DocId, SpaceId};
use crate::time::{Timestamp, now_millis};

/// Fields shared by every transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxMeta {
    /// Transaction reference.
    #[serde(rename = "_id")]
    pub id: DocId,
    /// Account that issued the transaction.
    pub modified_by: DocId,
    /// Issue time.
    pub modified_on: Timestamp,
    /// Space of the affected object.
    pub object_space: SpaceId,
}

/// Creation of a document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxCreateDoc {
    /// Common transaction fields.
    #[serde(flatten)]
    pub meta: TxMeta,
    /// Created document reference.
    pub object_id: DocId,
    /// Created document class.
    pub object_class: ClassId,
    /// Initial attributes.
    pub attributes: Map<String, Value>,
}

impl TxCreateDoc {
    /// Materialize the document this transaction creates.
    pub fn to_doc(&self) -> Doc {
        Doc {
            id: self.object_id.clone(),
            class: self.object_class.clone(),
            space: self.meta.object_space.clone(),
            modified_on: self.meta.modified_on,
            modified_by: self.meta.modified_by.clone(),
            created_on: Some(self.meta.modified_on),
            created_by: Some(self.meta.modified_by.clone()),
            attributes: self.attributes.clone(),
        }
    }
}

/// Partial update of a document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxUpdateDoc {
    /// Common transaction fields.
    #[serde(flatten)]
    pub meta: TxMeta,
    /// Updated document reference.
    pub object_id: DocId,
    /// Updated document class.
    pub object_class: ClassId,
    /// Update operations.
    pub operations: Map<String, Value>,
}

/// Removal of a document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRemoveDoc {
    /// Common transaction fields.
    #[serde(flatten)]
    pub meta: TxMeta,
    /// Removed document reference.
    pub object_id: DocId,
    /// Removed document class.
    pub object_class: ClassId,
}

/// Mixin attribute change on a document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxMixin {
    /// Common transaction fields.
    #[serde(flatten)]
    pub meta: TxMeta,
    /// Target document reference.
    pub object_id: DocId,
    /// Target document class.
    pub object_class: ClassId,
    /// Mixin class.
    pub mixin: ClassId,
    /// Mixin attributes.
    pub attributes: Map<String, Value>,
}

/// Change to a collection attached to a parent document.
///
/// The envelope itself is a CUD on the parent (`object_class` is the parent's
/// class); the wrapped `tx` touches the attached document, which usually has
/// a different class.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxCollectionCud {
    /// Common transaction fields.
    #[serde(flatten)]
    pub meta: TxMeta,
    /// Parent document reference.
    pub object_id: DocId,
    /// Parent document class.
    pub object_class: ClassId,
    /// Collection attribute on the parent.
    pub collection: String,
    /// Change applied to the attached document.
    pub tx: Box<Tx>,
}

/// Workspace-wide notification kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkspaceEvent {
    /// Many documents of the listed classes changed; refetch by class.
    BulkUpdate,
    /// The workspace model is being upgraded.
    Upgrade,
    /// Full-text indexing progress.
    IndexingUpdate,
    /// Security or permission change.
    SecurityChange,
}

/// Workspace-level event, not tied to a single document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxWorkspaceEvent {
    /// Common transaction fields.
    #[serde(flatten)]
    pub meta: TxMeta,
    /// Event kind.
    pub event: WorkspaceEvent,
    /// Event parameters.
    pub params: Value,
}

/// A transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_class")]
pub enum Tx {
    /// Document creation.
    #[serde(rename = "core:class:TxCreateDoc")]
    CreateDoc(TxCreateDoc),
    /// Document update.
    #[serde(rename = "core:class:TxUpdateDoc")]
    UpdateDoc(TxUpdateDoc),
    /// Document removal.
    #[serde(rename = "core:class:TxRemoveDoc")]
    RemoveDoc(TxRemoveDoc),
    /// Mixin change.
    #[serde(rename = "core:class:TxMixin")]
    Mixin(TxMixin),
    /// Attached-collection envelope.
    #[serde(rename = "core:class:TxCollectionCUD")]
    Collection(TxCollectionCud),
    /// Workspace event.
    #[serde(rename = "core:class:TxWorkspaceEvent")]
    WorkspaceEvent(TxWorkspaceEvent),
}

impl Tx {
    /// Common transaction fields.
    pub fn meta(&self) -> &TxMeta {
        match self {
            Self::CreateDoc(tx) => &tx.meta,
            Self::UpdateDoc(tx) => &tx.meta,
            Self::RemoveDoc(tx) => &tx.meta,
            Self::Mixin(tx) => &tx.meta,
            Self::Collection(tx) => &tx.meta,
            Self::WorkspaceEvent(tx) => &tx.meta,
        }
    }

    /// Whether this is a create/update/delete-style change.
    pub fn is_cud(&self) -> bool {
        !matches!(self, Self::WorkspaceEvent(_))
    }

    /// Class of the document a CUD touches; `None` for non-CUD transactions.
    pub fn object_class(&self) -> Option<&ClassId> {
        match self {
            Self::CreateDoc(tx) => Some(&tx.object_class),
            Self::UpdateDoc(tx) => Some(&tx.object_class),
            Self::RemoveDoc(tx) => Some(&tx.object_class),
            Self::Mixin(tx) => Some(&tx.object_class),
            Self::Collection(tx) => Some(&tx.object_class),
            Self::WorkspaceEvent(_) => None,
        }
    }

    /// Unwrap a single-change envelope.
    ///
    /// Returns the wrapped transaction for envelopes and `self` otherwise.
    /// Only one level is unwrapped.
    pub fn extract(&self) -> &Tx {
        match self {
            Self::Collection(tx) => &tx.tx,
            other => other,
        }
    }
}

/// Builds transactions authored by one account.
#[derive(Clone, Debug)]
pub struct TxFactory {
    account: DocId,
}

impl TxFactory {
    /// Factory for transactions authored by `account`.
    pub fn new(account: impl Into<DocId>) -> Self {
        Self {
            account: account.into(),
        }
    }

    /// Factory for system-authored transactions.
    pub fn system() -> Self {
        Self::new(refs::ACCOUNT_SYSTEM)
    }

    fn meta(&self, space: SpaceId) -> TxMeta {
        TxMeta {
            id: DocId::new(),
            modified_by: self.account.clone(),
            modified_on: now_millis(),
            object_space: space,
        }
    }

    /// Build a document creation. A fresh reference is generated when
    /// `object_id` is `None`.
    pub fn create_doc(
        &self,
        class: ClassId,
        space: SpaceId,
        attributes: Map<String, Value>,
        object_id: Option<DocId>,
    ) -> TxCreateDoc {
        TxCreateDoc {
            meta: self.meta(space),
            object_id: object_id.unwrap_or_default(),
            object_class: class,
            attributes,
        }
    }

    /// Build a workspace event in the transaction space.
    pub fn workspace_event(&self, event: WorkspaceEvent, params: Value) -> TxWorkspaceEvent {
        TxWorkspaceEvent {
            meta: self.meta(SpaceId::from(refs::SPACE_TX)),
            event,
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use serde_json::json;

    fn create(class: &str) -> Tx {
        Tx::CreateDoc(TxFactory::system().create_doc(
            ClassId::from(class),
            SpaceId::from("space-1"),
            Map::new(),
            None,
        ))
    }

    fn collection(parent: &str, inner: Tx) -> Tx {
        Tx::Collection(TxCollectionCud {
            meta: TxFactory::system().meta(SpaceId::from("space-1")),
            object_id: DocId::from("parent-1"),
            object_class: ClassId::from(parent),
            collection: "comments".into(),
            tx: Box::new(inner),
        })
    }

    #[test]
    fn cud_exposes_object_class() {
        let tx = create("task:class:Issue");
        assert!(tx.is_cud());
        assert_eq!(tx.object_class().unwrap().as_str(), "task:class:Issue");
    }

    #[test]
    fn workspace_event_is_not_cud() {
        let tx = Tx::WorkspaceEvent(
            TxFactory::system().workspace_event(WorkspaceEvent::Upgrade, json!({})),
        );
        assert!(!tx.is_cud());
        assert!(tx.object_class().is_none());
        assert_eq!(tx.meta().object_space.as_str(), refs::SPACE_TX);
    }

    #[test]
    fn extract_unwraps_collection_envelope() {
        let tx = collection("task:class:Issue", create("chunter:class:Comment"));
        assert_eq!(tx.object_class().unwrap().as_str(), "task:class:Issue");
        let inner = tx.extract();
        assert_eq!(inner.object_class().unwrap().as_str(), "chunter:class:Comment");
    }

    #[test]
    fn extract_returns_self_for_plain_tx() {
        let tx = create("a");
        assert_eq!(tx.extract(), &tx);
    }

    #[test]
    fn extract_unwraps_one_level_only() {
        let tx = collection("a", collection("b", create("c")));
        assert_matches!(tx.extract(), Tx::Collection(inner) if inner.object_class.as_str() == "b");
    }

    #[test]
    fn create_doc_to_doc_copies_fields() {
        let mut attributes = Map::new();
        let _ = attributes.insert("title".into(), json!("hello"));
        let tx = TxFactory::new("acc-7").create_doc(
            ClassId::from("task:class:Issue"),
            SpaceId::from("space-1"),
            attributes,
            Some(DocId::from("issue-1")),
        );
        let doc = tx.to_doc();
        assert_eq!(doc.id.as_str(), "issue-1");
        assert_eq!(doc.class.as_str(), "task:class:Issue");
        assert_eq!(doc.modified_by.as_str(), "acc-7");
        assert_eq!(doc.created_on, Some(tx.meta.modified_on));
        assert_eq!(doc.attributes["title"], "hello");
    }

    #[test]
    fn wire_format_is_tagged_by_class() {
        let v = serde_json::to_value(create("a")).unwrap();
        assert_eq!(v["_class"], "core:class:TxCreateDoc");
        assert_eq!(v["objectClass"], "a");
        assert!(v["_id"].is_string());
        assert_eq!(v["objectSpace"], "space-1");
    }

    #[test]
    fn nested_envelope_deserializes() {
        let v = json!({
            "_class": "core:class:TxCollectionCUD",
            "_id": "tx-1",
            "modifiedBy": "acc-1",
            "modifiedOn": 5,
            "objectSpace": "space-1",
            "objectId": "parent-1",
            "objectClass": "task:class:Issue",
            "collection": "comments",
            "tx": {
                "_class": "core:class:TxRemoveDoc",
                "_id": "tx-2",
                "modifiedBy": "acc-1",
                "modifiedOn": 5,
                "objectSpace": "space-1",
                "objectId": "comment-1",
                "objectClass": "chunter:class:Comment"
            }
        });
        let tx: Tx = serde_json::from_value(v).unwrap();
        assert_matches!(tx.extract(), Tx::RemoveDoc(r) if r.object_id.as_str() == "comment-1");
    }

    proptest! {
        #[test]
        fn envelope_survives_the_wire(
            parent in "[a-z]{1,8}:class:[A-Z][a-z]{0,8}",
            child in "[a-z]{1,8}:class:[A-Z][a-z]{0,8}",
            nested in any::<bool>(),
        ) {
            let inner = if nested { collection(&child, create(&child)) } else { create(&child) };
            let tx = collection(&parent, inner);

            let back: Tx = serde_json::from_value(serde_json::to_value(&tx).unwrap()).unwrap();
            prop_assert_eq!(&back, &tx);
            prop_assert_eq!(back.object_class().unwrap().as_str(), parent.as_str());
            prop_assert_eq!(back.extract().object_class().unwrap().as_str(), child.as_str());
        }
    }
}
