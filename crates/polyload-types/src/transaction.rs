//! # Transaction lifecycle
//!
//! [`TransactionStatus`] is what the node pushes on an
//! `author_extrinsicUpdate` subscription. [`TxStatus`] is the local
//! lifecycle of a [`Transaction`]:
//!
//! ```text
//!   ┌───────────┐  inBlock   ┌──────────┐  finalized  ┌───────────┐
//!   │ SUBMITTED ├───────────▶│ IN_BLOCK ├────────────▶│ FINALIZED │
//!   └─────┬─────┘            └────┬─────┘             └───────────┘
//!         │ dropped/invalid        │ ExtrinsicFailed
//!         ▼                        ▼
//!   ┌─────────┐              ┌────────┐
//!   │ DROPPED │              │ FAILED │
//!   └─────────┘              └────────┘
//! ```
//!
//! A `Submitted` transaction may also go straight to `Finalized` or
//! `Failed` when the node reports finality first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    AccountId, BlockHash, Call, ChainEvent, DispatchError, EventKind, ExtrinsicHash, TxId,
};

/// Status notification for a watched extrinsic, as sent by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionStatus {
    Future,
    Ready,
    Broadcast(Vec<String>),
    InBlock(BlockHash),
    Retracted(BlockHash),
    FinalityTimeout(BlockHash),
    Finalized(BlockHash),
    Usurped(ExtrinsicHash),
    Dropped,
    Invalid,
}

impl TransactionStatus {
    /// No further updates follow this status.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finalized(_)
                | Self::FinalityTimeout(_)
                | Self::Usurped(_)
                | Self::Dropped
                | Self::Invalid
        )
    }
}

/// How deep an extrinsic must be before it counts as confirmed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    /// Resolve on the first `inBlock` status.
    #[default]
    InBlock,
    /// Wait for `finalized`.
    Finalized,
}

impl Confirmation {
    /// The block hash to inspect if `status` satisfies this depth.
    #[must_use]
    pub fn reached_by(self, status: &TransactionStatus) -> Option<BlockHash> {
        match (self, status) {
            (Self::InBlock, TransactionStatus::InBlock(h) | TransactionStatus::Finalized(h))
            | (Self::Finalized, TransactionStatus::Finalized(h)) => Some(*h),
            _ => None,
        }
    }
}

/// Local lifecycle state of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Submitted,
    InBlock(BlockHash),
    Finalized(BlockHash),
    Failed(DispatchError),
    Dropped,
}

impl TxStatus {
    #[must_use]
    pub fn can_transition_to(&self, target: &Self) -> bool {
        matches!(
            (self, target),
            (
                Self::Submitted,
                Self::InBlock(_) | Self::Finalized(_) | Self::Failed(_) | Self::Dropped
            ) | (Self::InBlock(_), Self::Finalized(_) | Self::Failed(_))
        )
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::InBlock(_) | Self::Finalized(_))
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submitted => write!(f, "SUBMITTED"),
            Self::InBlock(_) => write!(f, "IN_BLOCK"),
            Self::Finalized(_) => write!(f, "FINALIZED"),
            Self::Failed(e) => write!(f, "FAILED({e})"),
            Self::Dropped => write!(f, "DROPPED"),
        }
    }
}

/// A transaction this client broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub signer: AccountId,
    pub call: Call,
    pub nonce: u64,
    pub hash: ExtrinsicHash,
    pub status: TxStatus,
    pub submitted_at: DateTime<Utc>,
    /// Index of the extrinsic within its block, once included.
    pub extrinsic_index: Option<u32>,
    /// Events emitted while applying this extrinsic.
    pub events: Vec<ChainEvent>,
}

impl Transaction {
    #[must_use]
    pub fn new(signer: AccountId, call: Call, nonce: u64, hash: ExtrinsicHash) -> Self {
        Self {
            id: TxId::new(),
            signer,
            call,
            nonce,
            hash,
            status: TxStatus::Submitted,
            submitted_at: Utc::now(),
            extrinsic_index: None,
            events: Vec::new(),
        }
    }

    /// Apply a status transition.
    ///
    /// # Errors
    /// Returns `Internal` if the transition is not allowed.
    pub fn transition(&mut self, target: TxStatus) -> crate::Result<()> {
        if !self.status.can_transition_to(&target) {
            return Err(crate::PolyloadError::Internal(format!(
                "Cannot transition {} from {} to {target}",
                self.id, self.status
            )));
        }
        self.status = target;
        Ok(())
    }

    /// Block the transaction was included in, if any.
    #[must_use]
    pub fn block_hash(&self) -> Option<BlockHash> {
        match self.status {
            TxStatus::InBlock(h) | TxStatus::Finalized(h) => Some(h),
            _ => None,
        }
    }

    /// First event of the given kind.
    #[must_use]
    pub fn find_event(&self, kind: EventKind) -> Option<&ChainEvent> {
        self.events.iter().find(|e| e.kind() == kind)
    }

    /// All events of the given kind.
    pub fn events_of(&self, kind: EventKind) -> impl Iterator<Item = &ChainEvent> {
        self.events.iter().filter(move |e| e.kind() == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SystemEvent, VenueType};
    use serde_json::json;

    fn tx() -> Transaction {
        Transaction::new(
            AccountId([1; 32]),
            Call::create_venue("v", VenueType::Other),
            0,
            ExtrinsicHash([2; 32]),
        )
    }

    #[test]
    fn wire_status_shapes() {
        let ready: TransactionStatus = serde_json::from_value(json!("ready")).unwrap();
        assert_eq!(ready, TransactionStatus::Ready);
        let hash = format!("0x{}", "ab".repeat(32));
        let in_block: TransactionStatus =
            serde_json::from_value(json!({ "inBlock": hash })).unwrap();
        assert_eq!(in_block, TransactionStatus::InBlock(BlockHash([0xab; 32])));
        let broadcast: TransactionStatus =
            serde_json::from_value(json!({ "broadcast": ["peer1"] })).unwrap();
        assert!(!broadcast.is_terminal());
        assert!(TransactionStatus::Dropped.is_terminal());
        assert!(!in_block.is_terminal());
    }

    #[test]
    fn confirmation_depth() {
        let h = BlockHash([1; 32]);
        let in_block = TransactionStatus::InBlock(h);
        let finalized = TransactionStatus::Finalized(h);
        assert_eq!(Confirmation::InBlock.reached_by(&in_block), Some(h));
        assert_eq!(Confirmation::InBlock.reached_by(&finalized), Some(h));
        assert_eq!(Confirmation::Finalized.reached_by(&in_block), None);
        assert_eq!(Confirmation::Finalized.reached_by(&finalized), Some(h));
        assert_eq!(Confirmation::InBlock.reached_by(&TransactionStatus::Ready), None);
    }

    #[test]
    fn lifecycle_transitions() {
        let mut t = tx();
        let h = BlockHash([3; 32]);
        t.transition(TxStatus::InBlock(h)).unwrap();
        assert_eq!(t.block_hash(), Some(h));
        t.transition(TxStatus::Finalized(h)).unwrap();
        assert!(t.status.is_success());
        assert!(t.transition(TxStatus::Dropped).is_err());
    }

    #[test]
    fn dropped_is_terminal() {
        let mut t = tx();
        t.transition(TxStatus::Dropped).unwrap();
        assert!(t.transition(TxStatus::InBlock(BlockHash([0; 32]))).is_err());
        assert_eq!(t.block_hash(), None);
    }

    #[test]
    fn find_event_by_kind() {
        let mut t = tx();
        t.events.push(ChainEvent::System(SystemEvent::ExtrinsicSuccess));
        assert!(t.find_event(EventKind::ExtrinsicSuccess).is_some());
        assert!(t.find_event(EventKind::ExtrinsicFailed).is_none());
        assert_eq!(t.events_of(EventKind::ExtrinsicSuccess).count(), 1);
    }
}
