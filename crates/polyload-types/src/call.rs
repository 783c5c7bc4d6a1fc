//! The closed set of chain calls polyload knows how to build.
//!
//! Each pallet gets its own enum; [`Call`] tags them with the pallet index
//! and each variant carries its call index, so the SCALE encoding is
//! `pallet_index ++ call_index ++ args` as the node expects.

use parity_scale_codec::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::{
    AccountId, IdentityId, InstructionId, Leg, PortfolioId, SettlementType, Ticker, VenueId,
    VenueType,
};

// ---------------------------------------------------------------------------
// Argument types
// ---------------------------------------------------------------------------

/// Target of an authorization: an identity or a bare key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub enum Signatory {
    Identity(IdentityId),
    Account(AccountId),
}

/// What an authorization grants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub enum AuthorizationData {
    /// Lets the target key join the issuing identity as a secondary key.
    JoinIdentity,
    PortfolioCustody(PortfolioId),
    TransferAssetOwnership(Ticker),
}

/// What a claim is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub enum Scope {
    Identity(IdentityId),
    Ticker(Ticker),
}

/// A statement attached to an identity by a claim issuer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub enum Claim {
    Accredited(Scope),
    Affiliate(Scope),
    BuyLockup(Scope),
    SellLockup(Scope),
    CustomerDueDiligence,
    KnowYourCustomer(Scope),
    Exempted(Scope),
    Blocked(Scope),
}

impl Claim {
    /// Number of claim kinds, for [`Claim::nth`].
    pub const KINDS: usize = 8;

    /// The `n`-th claim kind (modulo [`Claim::KINDS`]) for `scope`.
    #[must_use]
    pub fn nth(n: usize, scope: Scope) -> Self {
        match n % Self::KINDS {
            0 => Self::Accredited(scope),
            1 => Self::Affiliate(scope),
            2 => Self::BuyLockup(scope),
            3 => Self::SellLockup(scope),
            4 => Self::CustomerDueDiligence,
            5 => Self::KnowYourCustomer(scope),
            6 => Self::Exempted(scope),
            _ => Self::Blocked(scope),
        }
    }
}

/// One compliance condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub enum Condition {
    IsPresent(Claim),
    IsAbsent(Claim),
}

/// Where staking rewards go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub enum RewardDestination {
    Staked,
    Stash,
    Controller,
}

// ---------------------------------------------------------------------------
// Per-pallet calls
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum TimestampCall {
    /// Inherent: the block author's wall clock in milliseconds.
    #[codec(index = 0)]
    Set {
        #[codec(compact)]
        now: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum BalancesCall {
    #[codec(index = 0)]
    Transfer {
        dest: AccountId,
        #[codec(compact)]
        #[serde(with = "crate::amount")]
        value: u128,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum IdentityCall {
    #[codec(index = 0)]
    CddRegisterDid {
        target: AccountId,
        secondary_keys: Vec<AccountId>,
    },
    #[codec(index = 1)]
    AddAuthorization {
        target: Signatory,
        data: AuthorizationData,
        expiry: Option<u64>,
    },
    #[codec(index = 2)]
    JoinIdentityAsKey { auth_id: u64 },
    #[codec(index = 3)]
    AddClaim {
        target: IdentityId,
        claim: Claim,
        expiry: Option<u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum AssetCall {
    #[codec(index = 0)]
    CreateAsset {
        name: String,
        ticker: Ticker,
        divisible: bool,
    },
    #[codec(index = 1)]
    Issue {
        ticker: Ticker,
        #[codec(compact)]
        #[serde(with = "crate::amount")]
        amount: u128,
    },
}

/// Numbered portfolios an identity keeps beside its default one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum PortfolioCall {
    #[codec(index = 0)]
    CreatePortfolio { name: String },
    /// Moves unlocked units between two portfolios of the caller.
    #[codec(index = 1)]
    MovePortfolioFunds {
        from: PortfolioId,
        to: PortfolioId,
        ticker: Ticker,
        #[codec(compact)]
        #[serde(with = "crate::amount")]
        amount: u128,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum ComplianceManagerCall {
    #[codec(index = 0)]
    AddComplianceRequirement {
        ticker: Ticker,
        sender_conditions: Vec<Condition>,
        receiver_conditions: Vec<Condition>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum SettlementCall {
    #[codec(index = 0)]
    CreateVenue {
        details: String,
        signers: Vec<AccountId>,
        venue_type: VenueType,
    },
    #[codec(index = 1)]
    AddInstruction {
        venue_id: VenueId,
        settlement_type: SettlementType,
        valid_from: Option<u64>,
        legs: Vec<Leg>,
    },
    #[codec(index = 2)]
    AddAndAffirmInstruction {
        venue_id: VenueId,
        settlement_type: SettlementType,
        valid_from: Option<u64>,
        legs: Vec<Leg>,
        portfolios: Vec<PortfolioId>,
    },
    #[codec(index = 3)]
    AffirmInstruction {
        instruction_id: InstructionId,
        portfolios: Vec<PortfolioId>,
        max_legs_count: u32,
    },
    #[codec(index = 4)]
    WithdrawAffirmation {
        instruction_id: InstructionId,
        portfolios: Vec<PortfolioId>,
        max_legs_count: u32,
    },
    #[codec(index = 5)]
    RejectInstruction {
        instruction_id: InstructionId,
        portfolio: PortfolioId,
        num_of_legs: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum StakingCall {
    #[codec(index = 0)]
    Bond {
        controller: AccountId,
        #[codec(compact)]
        #[serde(with = "crate::amount")]
        value: u128,
        payee: RewardDestination,
    },
    #[codec(index = 5)]
    Nominate { targets: Vec<AccountId> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum PipsCall {
    #[codec(index = 0)]
    Propose {
        proposal: Box<Call>,
        #[codec(compact)]
        #[serde(with = "crate::amount")]
        deposit: u128,
        url: Option<String>,
    },
    #[codec(index = 1)]
    Vote {
        id: u32,
        aye: bool,
        #[codec(compact)]
        #[serde(with = "crate::amount")]
        deposit: u128,
    },
}

// ---------------------------------------------------------------------------
// Call
// ---------------------------------------------------------------------------

/// A dispatchable call. Indices mirror `constants::pallet`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum Call {
    #[codec(index = 2)]
    Timestamp(TimestampCall),
    #[codec(index = 5)]
    Balances(BalancesCall),
    #[codec(index = 7)]
    Identity(IdentityCall),
    #[codec(index = 17)]
    Staking(StakingCall),
    #[codec(index = 22)]
    Pips(PipsCall),
    #[codec(index = 26)]
    Asset(AssetCall),
    #[codec(index = 27)]
    Portfolio(PortfolioCall),
    #[codec(index = 28)]
    ComplianceManager(ComplianceManagerCall),
    #[codec(index = 36)]
    Settlement(SettlementCall),
}

impl Call {
    /// Pallet name as the node reports it (`"settlement"`).
    #[must_use]
    pub fn section(&self) -> &'static str {
        match self {
            Self::Timestamp(_) => "timestamp",
            Self::Balances(_) => "balances",
            Self::Identity(_) => "identity",
            Self::Staking(_) => "staking",
            Self::Pips(_) => "pips",
            Self::Asset(_) => "asset",
            Self::Portfolio(_) => "portfolio",
            Self::ComplianceManager(_) => "complianceManager",
            Self::Settlement(_) => "settlement",
        }
    }

    /// Call name as the node reports it (`"affirmInstruction"`).
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::Timestamp(TimestampCall::Set { .. }) => "set",
            Self::Balances(BalancesCall::Transfer { .. }) => "transfer",
            Self::Identity(c) => match c {
                IdentityCall::CddRegisterDid { .. } => "cddRegisterDid",
                IdentityCall::AddAuthorization { .. } => "addAuthorization",
                IdentityCall::JoinIdentityAsKey { .. } => "joinIdentityAsKey",
                IdentityCall::AddClaim { .. } => "addClaim",
            },
            Self::Staking(c) => match c {
                StakingCall::Bond { .. } => "bond",
                StakingCall::Nominate { .. } => "nominate",
            },
            Self::Pips(c) => match c {
                PipsCall::Propose { .. } => "propose",
                PipsCall::Vote { .. } => "vote",
            },
            Self::Asset(c) => match c {
                AssetCall::CreateAsset { .. } => "createAsset",
                AssetCall::Issue { .. } => "issue",
            },
            Self::Portfolio(c) => match c {
                PortfolioCall::CreatePortfolio { .. } => "createPortfolio",
                PortfolioCall::MovePortfolioFunds { .. } => "movePortfolioFunds",
            },
            Self::ComplianceManager(ComplianceManagerCall::AddComplianceRequirement { .. }) => {
                "addComplianceRequirement"
            }
            Self::Settlement(c) => match c {
                SettlementCall::CreateVenue { .. } => "createVenue",
                SettlementCall::AddInstruction { .. } => "addInstruction",
                SettlementCall::AddAndAffirmInstruction { .. } => "addAndAffirmInstruction",
                SettlementCall::AffirmInstruction { .. } => "affirmInstruction",
                SettlementCall::WithdrawAffirmation { .. } => "withdrawAffirmation",
                SettlementCall::RejectInstruction { .. } => "rejectInstruction",
            },
        }
    }

    /// `section.method`, for log fields.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}.{}", self.section(), self.method())
    }

    /// Inherents are unsigned and inserted by the block author.
    #[must_use]
    pub fn is_inherent(&self) -> bool {
        matches!(self, Self::Timestamp(_))
    }

    // -- convenience constructors used by the scenario drivers --

    #[must_use]
    pub fn transfer(dest: AccountId, value: u128) -> Self {
        Self::Balances(BalancesCall::Transfer { dest, value })
    }

    #[must_use]
    pub fn timestamp(now: u64) -> Self {
        Self::Timestamp(TimestampCall::Set { now })
    }

    #[must_use]
    pub fn create_venue(details: &str, venue_type: VenueType) -> Self {
        Self::Settlement(SettlementCall::CreateVenue {
            details: details.to_string(),
            signers: Vec::new(),
            venue_type,
        })
    }

    #[must_use]
    pub fn create_portfolio(name: &str) -> Self {
        Self::Portfolio(PortfolioCall::CreatePortfolio {
            name: name.to_string(),
        })
    }

    #[must_use]
    pub fn move_portfolio_funds(
        from: PortfolioId,
        to: PortfolioId,
        ticker: Ticker,
        amount: u128,
    ) -> Self {
        Self::Portfolio(PortfolioCall::MovePortfolioFunds {
            from,
            to,
            ticker,
            amount,
        })
    }
}
