//! Broadcast decision: send a batch verbatim or as one compacted event.
//!
//! Large change bursts are replaced by a single workspace event listing the
//! distinct affected classes, so observers refetch by class instead of
//! replaying every change.

use serde_json::json;
use tandem_core::tx::WorkspaceEvent;
use tandem_core::{ClassId, Tx, TxFactory};

/// How a batch will be delivered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BroadcastPlan {
    /// Send the batch unchanged.
    Verbatim,
    /// Send one event carrying these classes instead.
    Compacted(Vec<ClassId>),
}

impl BroadcastPlan {
    /// Decide for a batch. Compacts only when `txes.len() > threshold`.
    pub fn for_batch(txes: &[Tx], threshold: usize) -> Self {
        if txes.len() > threshold {
            Self::Compacted(affected_classes(txes))
        } else {
            Self::Verbatim
        }
    }
}

/// What [`crate::Session::broadcast`] put on the socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// Nothing to send.
    Empty,
    /// The batch went out unchanged.
    Verbatim {
        /// Number of transactions sent.
        count: usize,
    },
    /// One compacted event went out.
    Compacted {
        /// Classes in the event.
        classes: Vec<ClassId>,
    },
}

/// Distinct classes touched by a batch, in first-seen order.
///
/// For every transaction the class of the transaction itself is taken if it
/// is a CUD, then the class of its unwrapped inner transaction if that is a
/// CUD too.
pub fn affected_classes(txes: &[Tx]) -> Vec<ClassId> {
    let mut classes: Vec<ClassId> = Vec::new();
    let mut record = |tx: &Tx| {
        if let Some(class) = tx.object_class().filter(|_| tx.is_cud()) {
            if !classes.contains(class) {
                classes.push(class.clone());
            }
        }
    };
    for tx in txes {
        record(tx);
        record(tx.extract());
    }
    classes
}

/// Build the compacted bulk-update event for `classes`.
pub fn create_broadcast_event(classes: &[ClassId]) -> Tx {
    Tx::WorkspaceEvent(
        TxFactory::system().workspace_event(WorkspaceEvent::BulkUpdate, json!({ "_class": classes })),
    )
}
