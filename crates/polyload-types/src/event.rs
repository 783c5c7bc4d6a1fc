//! Typed chain events.
//!
//! JSON shape of an event record:
//!
//! ```json
//! { "phase": { "applyExtrinsic": 1 },
//!   "event": { "section": "settlement",
//!              "event": { "method": "InstructionCreated", "data": { ... } } } }
//! ```
//!
//! Events outside the known set decode as [`ChainEvent::Other`] instead of
//! failing, so a newer runtime never breaks block processing.

use serde::{Deserialize, Serialize};

use crate::{
    AccountId, AuthorizationData, Claim, DispatchError, IdentityId, InstructionId, Leg,
    PortfolioId, SettlementType, Signatory, Ticker, VenueId, VenueType,
};

/// When, within block execution, an event was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    ApplyExtrinsic(u32),
    Finalization,
    Initialization,
}

/// One entry of `System.Events`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub phase: Phase,
    pub event: ChainEvent,
}

impl EventRecord {
    #[must_use]
    pub fn applied(index: u32, event: ChainEvent) -> Self {
        Self {
            phase: Phase::ApplyExtrinsic(index),
            event,
        }
    }

    /// Was this event emitted while applying extrinsic `index`?
    #[must_use]
    pub fn is_for_extrinsic(&self, index: u32) -> bool {
        self.phase == Phase::ApplyExtrinsic(index)
    }
}

// ---------------------------------------------------------------------------
// Per-pallet events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "data")]
pub enum SystemEvent {
    ExtrinsicSuccess,
    ExtrinsicFailed { dispatch_error: DispatchError },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "data")]
pub enum BalancesEvent {
    Transfer {
        from: AccountId,
        to: AccountId,
        #[serde(with = "crate::amount")]
        amount: u128,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "data")]
pub enum IdentityEvent {
    DidCreated {
        did: IdentityId,
        account: AccountId,
    },
    AuthorizationAdded {
        from: IdentityId,
        target: Signatory,
        auth_id: u64,
        data: AuthorizationData,
    },
    SecondaryKeyJoined {
        did: IdentityId,
        account: AccountId,
    },
    ClaimAdded {
        target: IdentityId,
        claim: Claim,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "data")]
pub enum AssetEvent {
    AssetCreated {
        did: IdentityId,
        ticker: Ticker,
        divisible: bool,
    },
    Issued {
        did: IdentityId,
        ticker: Ticker,
        #[serde(with = "crate::amount")]
        amount: u128,
    },
    Transfer {
        ticker: Ticker,
        from: PortfolioId,
        to: PortfolioId,
        #[serde(with = "crate::amount")]
        amount: u128,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "data")]
pub enum PortfolioEvent {
    PortfolioCreated {
        did: IdentityId,
        number: u64,
        name: String,
    },
    MovedBetweenPortfolios {
        did: IdentityId,
        from: PortfolioId,
        to: PortfolioId,
        ticker: Ticker,
        #[serde(with = "crate::amount")]
        amount: u128,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "data")]
pub enum ComplianceManagerEvent {
    ComplianceRequirementCreated { ticker: Ticker, id: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "data")]
pub enum SettlementEvent {
    VenueCreated {
        did: IdentityId,
        venue_id: VenueId,
        details: String,
        venue_type: VenueType,
    },
    InstructionCreated {
        did: IdentityId,
        venue_id: VenueId,
        instruction_id: InstructionId,
        settlement_type: SettlementType,
        valid_from: Option<u64>,
        legs: Vec<Leg>,
    },
    InstructionAffirmed {
        did: IdentityId,
        portfolio: PortfolioId,
        instruction_id: InstructionId,
    },
    AffirmationWithdrawn {
        did: IdentityId,
        portfolio: PortfolioId,
        instruction_id: InstructionId,
    },
    InstructionRejected {
        did: IdentityId,
        instruction_id: InstructionId,
    },
    LegFailedExecution {
        did: IdentityId,
        instruction_id: InstructionId,
        leg_index: u64,
    },
    InstructionFailed {
        did: IdentityId,
        instruction_id: InstructionId,
    },
    InstructionExecuted {
        did: IdentityId,
        instruction_id: InstructionId,
    },
}

impl SettlementEvent {
    /// The instruction this event is about, if any.
    #[must_use]
    pub fn instruction_id(&self) -> Option<InstructionId> {
        match self {
            Self::VenueCreated { .. } => None,
            Self::InstructionCreated { instruction_id, .. }
            | Self::InstructionAffirmed { instruction_id, .. }
            | Self::AffirmationWithdrawn { instruction_id, .. }
            | Self::InstructionRejected { instruction_id, .. }
            | Self::LegFailedExecution { instruction_id, .. }
            | Self::InstructionFailed { instruction_id, .. }
            | Self::InstructionExecuted { instruction_id, .. } => Some(*instruction_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "data")]
pub enum StakingEvent {
    Bonded {
        stash: AccountId,
        #[serde(with = "crate::amount")]
        amount: u128,
    },
    Nominated {
        stash: AccountId,
        targets: Vec<AccountId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "data")]
pub enum PipsEvent {
    ProposalCreated {
        proposer: AccountId,
        id: u32,
        #[serde(with = "crate::amount")]
        deposit: u128,
    },
    Voted {
        voter: AccountId,
        id: u32,
        aye: bool,
        #[serde(with = "crate::amount")]
        deposit: u128,
    },
}

/// Body of an event polyload does not model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtherEventBody {
    pub method: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// An event we do not model, kept by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtherEvent {
    pub section: String,
    pub event: OtherEventBody,
}

// ---------------------------------------------------------------------------
// ChainEvent
// ---------------------------------------------------------------------------

/// A decoded runtime event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "section", content = "event", rename_all = "camelCase")]
pub enum ChainEvent {
    System(SystemEvent),
    Balances(BalancesEvent),
    Identity(IdentityEvent),
    Asset(AssetEvent),
    Portfolio(PortfolioEvent),
    ComplianceManager(ComplianceManagerEvent),
    Settlement(SettlementEvent),
    Staking(StakingEvent),
    Pips(PipsEvent),
    #[serde(untagged)]
    Other(OtherEvent),
}

/// Field-less discriminant of [`ChainEvent`] for matching on kind only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ExtrinsicSuccess,
    ExtrinsicFailed,
    BalancesTransfer,
    DidCreated,
    AuthorizationAdded,
    SecondaryKeyJoined,
    ClaimAdded,
    AssetCreated,
    Issued,
    AssetTransfer,
    PortfolioCreated,
    MovedBetweenPortfolios,
    ComplianceRequirementCreated,
    VenueCreated,
    InstructionCreated,
    InstructionAffirmed,
    AffirmationWithdrawn,
    InstructionRejected,
    LegFailedExecution,
    InstructionFailed,
    InstructionExecuted,
    Bonded,
    Nominated,
    ProposalCreated,
    Voted,
    Other,
}

impl ChainEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::System(SystemEvent::ExtrinsicSuccess) => EventKind::ExtrinsicSuccess,
            Self::System(SystemEvent::ExtrinsicFailed { .. }) => EventKind::ExtrinsicFailed,
            Self::Balances(BalancesEvent::Transfer { .. }) => EventKind::BalancesTransfer,
            Self::Identity(e) => match e {
                IdentityEvent::DidCreated { .. } => EventKind::DidCreated,
                IdentityEvent::AuthorizationAdded { .. } => EventKind::AuthorizationAdded,
                IdentityEvent::SecondaryKeyJoined { .. } => EventKind::SecondaryKeyJoined,
                IdentityEvent::ClaimAdded { .. } => EventKind::ClaimAdded,
            },
            Self::Asset(e) => match e {
                AssetEvent::AssetCreated { .. } => EventKind::AssetCreated,
                AssetEvent::Issued { .. } => EventKind::Issued,
                AssetEvent::Transfer { .. } => EventKind::AssetTransfer,
            },
            Self::Portfolio(e) => match e {
                PortfolioEvent::PortfolioCreated { .. } => EventKind::PortfolioCreated,
                PortfolioEvent::MovedBetweenPortfolios { .. } => EventKind::MovedBetweenPortfolios,
            },
            Self::ComplianceManager(ComplianceManagerEvent::ComplianceRequirementCreated {
                ..
            }) => EventKind::ComplianceRequirementCreated,
            Self::Settlement(e) => match e {
                SettlementEvent::VenueCreated { .. } => EventKind::VenueCreated,
                SettlementEvent::InstructionCreated { .. } => EventKind::InstructionCreated,
                SettlementEvent::InstructionAffirmed { .. } => EventKind::InstructionAffirmed,
                SettlementEvent::AffirmationWithdrawn { .. } => EventKind::AffirmationWithdrawn,
                SettlementEvent::InstructionRejected { .. } => EventKind::InstructionRejected,
                SettlementEvent::LegFailedExecution { .. } => EventKind::LegFailedExecution,
                SettlementEvent::InstructionFailed { .. } => EventKind::InstructionFailed,
                SettlementEvent::InstructionExecuted { .. } => EventKind::InstructionExecuted,
            },
            Self::Staking(e) => match e {
                StakingEvent::Bonded { .. } => EventKind::Bonded,
                StakingEvent::Nominated { .. } => EventKind::Nominated,
            },
            Self::Pips(e) => match e {
                PipsEvent::ProposalCreated { .. } => EventKind::ProposalCreated,
                PipsEvent::Voted { .. } => EventKind::Voted,
            },
            Self::Other(_) => EventKind::Other,
        }
    }

    /// Pallet name as the node reports it.
    #[must_use]
    pub fn section(&self) -> &str {
        match self {
            Self::System(_) => "system",
            Self::Balances(_) => "balances",
            Self::Identity(_) => "identity",
            Self::Asset(_) => "asset",
            Self::Portfolio(_) => "portfolio",
            Self::ComplianceManager(_) => "complianceManager",
            Self::Settlement(_) => "settlement",
            Self::Staking(_) => "staking",
            Self::Pips(_) => "pips",
            Self::Other(o) => &o.section,
        }
    }

    /// Returns the dispatch error if this is `System.ExtrinsicFailed`.
    #[must_use]
    pub fn dispatch_error(&self) -> Option<&DispatchError> {
        match self {
            Self::System(SystemEvent::ExtrinsicFailed { dispatch_error }) => Some(dispatch_error),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_settlement(&self) -> Option<&SettlementEvent> {
        match self {
            Self::Settlement(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_known_settlement_event() {
        let v = json!({
            "phase": { "applyExtrinsic": 2 },
            "event": {
                "section": "settlement",
                "event": {
                    "method": "InstructionExecuted",
                    "data": { "did": format!("0x{}", "01".repeat(32)), "instruction_id": 4 }
                }
            }
        });
        let rec: EventRecord = serde_json::from_value(v).unwrap();
        assert!(rec.is_for_extrinsic(2));
        assert!(!rec.is_for_extrinsic(1));
        assert_eq!(rec.event.kind(), EventKind::InstructionExecuted);
        assert_eq!(
            rec.event.as_settlement().and_then(SettlementEvent::instruction_id),
            Some(InstructionId(4))
        );
    }

    #[test]
    fn decodes_extrinsic_failed_with_module_error() {
        let v = json!({
            "section": "system",
            "event": {
                "method": "ExtrinsicFailed",
                "data": { "dispatch_error": { "module": { "index": 36, "error": 2 } } }
            }
        });
        let ev: ChainEvent = serde_json::from_value(v).unwrap();
        assert_eq!(ev.kind(), EventKind::ExtrinsicFailed);
        assert!(matches!(ev.dispatch_error(), Some(DispatchError::Module(m)) if m.index == 36));
    }

    #[test]
    fn decodes_move_between_portfolios() {
        let did = format!("0x{}", "02".repeat(32));
        let v = json!({
            "section": "portfolio",
            "event": {
                "method": "MovedBetweenPortfolios",
                "data": {
                    "did": did,
                    "from": { "did": did, "kind": "Default" },
                    "to": { "did": did, "kind": { "User": 1 } },
                    "ticker": "ACME",
                    "amount": "250"
                }
            }
        });
        let ev: ChainEvent = serde_json::from_value(v).unwrap();
        assert_eq!(ev.kind(), EventKind::MovedBetweenPortfolios);
        assert_eq!(ev.section(), "portfolio");
        assert!(matches!(
            ev,
            ChainEvent::Portfolio(PortfolioEvent::MovedBetweenPortfolios { amount: 250, to, .. })
                if to == PortfolioId::user(IdentityId([2; 32]), 1)
        ));
    }

    #[test]
    fn unit_event_without_data() {
        let v = json!({ "section": "system", "event": { "method": "ExtrinsicSuccess" } });
        let ev: ChainEvent = serde_json::from_value(v).unwrap();
        assert_eq!(ev, ChainEvent::System(SystemEvent::ExtrinsicSuccess));
    }

    #[test]
    fn unknown_event_falls_back_to_other() {
        let v = json!({
            "section": "treasury",
            "event": { "method": "Deposit", "data": [1, 2] }
        });
        let ev: ChainEvent = serde_json::from_value(v).unwrap();
        assert_eq!(ev.kind(), EventKind::Other);
        assert_eq!(ev.section(), "treasury");

        let v = json!({
            "section": "settlement",
            "event": { "method": "SomethingNew", "data": null }
        });
        let ev: ChainEvent = serde_json::from_value(v).unwrap();
        assert_eq!(ev.kind(), EventKind::Other);
    }

    #[test]
    fn large_amount_survives_roundtrip() {
        let ev = ChainEvent::Balances(BalancesEvent::Transfer {
            from: AccountId([1; 32]),
            to: AccountId([2; 32]),
            amount: u128::MAX,
        });
        let rec = EventRecord::applied(0, ev);
        let json = serde_json::to_string(&rec).unwrap();
        let back: EventRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn phase_json_shapes() {
        assert_eq!(
            serde_json::to_value(Phase::ApplyExtrinsic(3)).unwrap(),
            json!({ "applyExtrinsic": 3 })
        );
        assert_eq!(
            serde_json::to_value(Phase::Finalization).unwrap(),
            json!("finalization")
        );
    }
}
