//! # Settlement model: venues, instructions, legs and affirmations
//!
//! An [`Instruction`] groups one or more [`Leg`]s (asset movements between
//! portfolios) under a [`Venue`]. Every distinct portfolio referenced by a
//! leg is a *party* and must affirm before the instruction executes.
//!
//! ## Instruction State Machine
//!
//! ```text
//!                 all parties affirmed
//!   ┌─────────┐   + all legs funded      ┌──────────┐
//!   │ PENDING ├─────────────────────────▶│ EXECUTED │
//!   └──┬───┬──┘                          └──────────┘
//!      │   │ leg shortfall / scheduled
//!      │   │ block with missing affirmations
//!      │   │                             ┌────────┐
//!      │   └────────────────────────────▶│ FAILED │
//!      │ any party rejects               └────────┘
//!      ▼
//!   ┌──────────┐
//!   │ REJECTED │
//!   └──────────┘
//! ```
//!
//! All three end states are terminal. Affirmations move independently:
//! `Pending ⇄ Affirmed` (affirm / withdraw) until the instruction leaves
//! `Pending`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::{IdentityId, InstructionId, PortfolioId, Ticker, VenueId};

/// Kind of venue. Purely descriptive.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub enum VenueType {
    #[default]
    Other,
    Distribution,
    Sto,
    Exchange,
}

/// When an instruction executes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub enum SettlementType {
    /// As soon as the last party affirms.
    #[default]
    SettleOnAffirmation,
    /// At the given block number, failing if anyone has not affirmed.
    SettleOnBlock(u64),
}

/// Affirmation state of one party.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub enum AffirmationStatus {
    #[default]
    Unknown,
    Pending,
    Affirmed,
    Rejected,
}

impl fmt::Display for AffirmationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "UNKNOWN"),
            Self::Pending => write!(f, "PENDING"),
            Self::Affirmed => write!(f, "AFFIRMED"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Lifecycle of an instruction.
///
/// Transitions are **monotonic**: `Pending` may move to any of the three
/// terminal states, nothing leaves a terminal state.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub enum InstructionStatus {
    #[default]
    Pending,
    Executed,
    Failed,
    Rejected,
}

impl InstructionStatus {
    /// Can the instruction move to `target`?
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Executed | Self::Failed | Self::Rejected)
        )
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for InstructionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Executed => write!(f, "EXECUTED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Per-leg progress while the instruction is pending.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub enum LegStatus {
    /// The sender has not affirmed; funds are free.
    #[default]
    PendingTokenLock,
    /// The sender affirmed; funds are locked.
    ExecutionPending,
    /// The leg will not move funds (instruction rejected or failed).
    ExecutionToBeSkipped,
}

/// A single asset movement between two portfolios.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub struct Leg {
    pub from: PortfolioId,
    pub to: PortfolioId,
    pub asset: Ticker,
    #[serde(with = "crate::amount")]
    pub amount: u128,
}

impl Leg {
    #[must_use]
    pub fn new(from: PortfolioId, to: PortfolioId, asset: Ticker, amount: u128) -> Self {
        Self {
            from,
            to,
            asset,
            amount,
        }
    }
}

/// Dummy leg for testing. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl Leg {
    /// A leg between two random default portfolios.
    pub fn dummy(asset: &str, amount: u128) -> Self {
        Self {
            from: PortfolioId::default_of(IdentityId(rand::random())),
            to: PortfolioId::default_of(IdentityId(rand::random())),
            asset: Ticker::new(asset).unwrap_or(Ticker([b'X'; crate::constants::TICKER_LEN])),
            amount,
        }
    }
}

/// A settlement venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    pub id: VenueId,
    pub creator: IdentityId,
    pub details: String,
    pub venue_type: VenueType,
    /// Instructions created under this venue, in creation order.
    pub instructions: Vec<InstructionId>,
}

/// A settlement instruction and its affirmation book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: InstructionId,
    pub venue_id: VenueId,
    pub created_by: IdentityId,
    pub settlement_type: SettlementType,
    /// Block number before which the instruction cannot execute.
    pub valid_from: Option<u64>,
    pub legs: Vec<Leg>,
    pub leg_status: Vec<LegStatus>,
    #[serde(with = "affirmation_entries")]
    pub affirmations: BTreeMap<PortfolioId, AffirmationStatus>,
    /// Number of parties that still have to affirm.
    pub affirms_pending: u64,
    pub status: InstructionStatus,
}

impl Instruction {
    /// Create a pending instruction; every party starts `Pending`.
    #[must_use]
    pub fn new(
        id: InstructionId,
        venue_id: VenueId,
        created_by: IdentityId,
        settlement_type: SettlementType,
        valid_from: Option<u64>,
        legs: Vec<Leg>,
    ) -> Self {
        let affirmations: BTreeMap<_, _> = parties_of(&legs)
            .into_iter()
            .map(|p| (p, AffirmationStatus::Pending))
            .collect();
        Self {
            id,
            venue_id,
            created_by,
            settlement_type,
            valid_from,
            leg_status: vec![LegStatus::PendingTokenLock; legs.len()],
            legs,
            affirms_pending: affirmations.len() as u64,
            affirmations,
            status: InstructionStatus::Pending,
        }
    }

    /// Every distinct portfolio referenced by a leg.
    #[must_use]
    pub fn parties(&self) -> BTreeSet<PortfolioId> {
        parties_of(&self.legs)
    }

    /// Affirmation status of `portfolio`, `Unknown` if it is not a party.
    #[must_use]
    pub fn affirmation(&self, portfolio: &PortfolioId) -> AffirmationStatus {
        self.affirmations
            .get(portfolio)
            .copied()
            .unwrap_or(AffirmationStatus::Unknown)
    }

    /// Indices of legs sent from any of `portfolios`.
    #[must_use]
    pub fn legs_sent_from(&self, portfolios: &[PortfolioId]) -> Vec<usize> {
        self.legs
            .iter()
            .enumerate()
            .filter(|(_, leg)| portfolios.contains(&leg.from))
            .map(|(i, _)| i)
            .collect()
    }

    /// Returns `true` once every party has affirmed.
    #[must_use]
    pub fn all_affirmed(&self) -> bool {
        self.affirms_pending == 0
            && self
                .affirmations
                .values()
                .all(|s| *s == AffirmationStatus::Affirmed)
    }

    /// Move to a terminal status.
    ///
    /// # Errors
    /// Returns `InstructionNotPending` if the instruction already ended.
    pub fn finish(&mut self, target: InstructionStatus) -> crate::Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(crate::PolyloadError::InstructionNotPending {
                id: self.id,
                status: self.status,
            });
        }
        if target != InstructionStatus::Executed {
            self.leg_status.fill(LegStatus::ExecutionToBeSkipped);
        }
        self.status = target;
        Ok(())
    }
}

fn parties_of(legs: &[Leg]) -> BTreeSet<PortfolioId> {
    legs.iter().flat_map(|l| [l.from, l.to]).collect()
}

/// JSON objects need string keys, so the affirmation book is written as a
/// list of `[portfolio, status]` pairs.
mod affirmation_entries {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::{AffirmationStatus, PortfolioId};

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<PortfolioId, AffirmationStatus>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let entries: Vec<_> = map.iter().collect();
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<PortfolioId, AffirmationStatus>, D::Error> {
        let entries = Vec::<(PortfolioId, AffirmationStatus)>::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}
