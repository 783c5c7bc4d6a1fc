//! Error types for polyload.
//!
//! All errors use the `PL_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Transport / JSON-RPC errors
//! - 2xx: Submission errors (nonce, signing, broadcast)
//! - 3xx: Transaction outcome errors (dispatch failures, pool drops)
//! - 4xx: Settlement protocol errors
//! - 5xx: Chain synchronisation errors
//! - 9xx: General / internal errors
//!
//! A settlement instruction that ends up rejected or failed is **not** an
//! error: it is a terminal outcome reported through the settlement crate.

use thiserror::Error;

use crate::{AccountId, AffirmationStatus, BlockHash, DispatchError, ExtrinsicHash, InstructionId};
use crate::{IdentityId, InstructionStatus, PortfolioId, Ticker, VenueId};

/// Central error enum for all polyload operations.
#[derive(Debug, Error)]
pub enum PolyloadError {
    // =================================================================
    // Transport / RPC Errors (1xx)
    // =================================================================
    /// Could not open (or lost) the connection to the node.
    #[error("PL_ERR_100: Connection to {endpoint} failed: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The node answered a request with a JSON-RPC error object.
    #[error("PL_ERR_101: RPC error {code} from {method}: {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    /// No response arrived within the configured request timeout.
    #[error("PL_ERR_102: Request {method} timed out")]
    RequestTimeout { method: String },

    /// A subscription stream ended before a terminal item arrived.
    #[error("PL_ERR_103: Subscription closed: {what}")]
    SubscriptionClosed { what: String },

    /// The node returned a payload we could not interpret.
    #[error("PL_ERR_104: Unexpected response to {method}: {reason}")]
    UnexpectedResponse { method: String, reason: String },

    /// The endpoint URL is malformed or uses an unsupported scheme.
    #[error("PL_ERR_105: Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    // =================================================================
    // Submission Errors (2xx)
    // =================================================================
    /// The node refused to accept the extrinsic into its pool.
    #[error("PL_ERR_200: Submission failed: {reason}")]
    Submission { reason: String },

    /// Building or signing the extrinsic failed.
    #[error("PL_ERR_201: Signing failed: {reason}")]
    Signing { reason: String },

    /// The encoded extrinsic could not be decoded.
    #[error("PL_ERR_202: Invalid extrinsic: {reason}")]
    InvalidExtrinsic { reason: String },

    /// The account's nonce counter would overflow.
    #[error("PL_ERR_203: Nonce exhausted for {account}")]
    NonceExhausted { account: AccountId },

    /// The nonce is lower than the account's next index on chain.
    #[error("PL_ERR_204: Stale nonce {nonce} for {account}, chain expects {expected}")]
    StaleNonce {
        account: AccountId,
        nonce: u64,
        expected: u64,
    },

    // =================================================================
    // Transaction Outcome Errors (3xx)
    // =================================================================
    /// The extrinsic was included but its dispatch failed.
    #[error("PL_ERR_300: Dispatch of nonce {nonce} from {signer} failed: {error}")]
    Dispatch {
        signer: AccountId,
        nonce: u64,
        error: DispatchError,
    },

    /// The pool dropped the transaction (or it was usurped).
    #[error("PL_ERR_301: Transaction {hash:?} dropped from pool")]
    TransactionDropped { hash: ExtrinsicHash },

    /// The pool declared the transaction invalid.
    #[error("PL_ERR_302: Transaction {hash:?} invalid")]
    TransactionInvalid { hash: ExtrinsicHash },

    /// The block reported as containing the extrinsic does not contain it.
    #[error("PL_ERR_303: Extrinsic {hash:?} not found in block {block}")]
    ExtrinsicNotInBlock { hash: ExtrinsicHash, block: String },

    /// An expected event was missing from a successful extrinsic.
    #[error("PL_ERR_304: Expected event {expected} not emitted")]
    MissingEvent { expected: String },

    /// The extrinsic was included, so its nonce is spent, but its block or
    /// events could not be read.
    #[error("PL_ERR_305: Outcome of nonce {nonce} from {signer} in block {block} unknown: {source}")]
    OutcomeUnknown {
        hash: ExtrinsicHash,
        block: BlockHash,
        signer: AccountId,
        nonce: u64,
        #[source]
        source: Box<PolyloadError>,
    },

    // =================================================================
    // Settlement Protocol Errors (4xx)
    // =================================================================
    /// The venue does not exist.
    #[error("PL_ERR_400: Venue not found: {0}")]
    VenueNotFound(VenueId),

    /// The caller does not own the venue.
    #[error("PL_ERR_401: Caller is not the creator of {0}")]
    UnauthorizedVenueCreator(VenueId),

    /// The instruction does not exist.
    #[error("PL_ERR_402: Instruction not found: {0}")]
    InstructionNotFound(InstructionId),

    /// The instruction failed structural validation.
    #[error("PL_ERR_403: Invalid instruction: {reason}")]
    InvalidInstruction { reason: String },

    /// The instruction is not in a state that accepts this operation.
    #[error("PL_ERR_404: {id} is {status}, expected PENDING")]
    InstructionNotPending {
        id: InstructionId,
        status: InstructionStatus,
    },

    /// The caller has no custody of the portfolio.
    #[error("PL_ERR_405: Caller has no custody of portfolio {0}")]
    UnauthorizedCustodian(PortfolioId),

    /// The portfolio has no legs in this instruction.
    #[error("PL_ERR_406: Portfolio {portfolio} is not a party to {id}")]
    NotParty {
        id: InstructionId,
        portfolio: PortfolioId,
    },

    /// The affirmation is in the wrong state for this operation.
    #[error("PL_ERR_407: Portfolio {portfolio} affirmation is {status}")]
    UnexpectedAffirmationStatus {
        portfolio: PortfolioId,
        status: AffirmationStatus,
    },

    /// `max_legs_count` does not cover the legs sent from the portfolios.
    #[error("PL_ERR_408: Leg count too small: {needed} legs, {given} allowed")]
    LegCountTooSmall { needed: usize, given: u32 },

    /// Not enough free balance in the portfolio.
    #[error("PL_ERR_409: Insufficient {ticker} in {portfolio}: need {needed}, have {available}")]
    InsufficientBalance {
        portfolio: PortfolioId,
        ticker: Ticker,
        needed: u128,
        available: u128,
    },

    /// Execution was already attempted for this instruction (idempotency guard).
    #[error("PL_ERR_410: Instruction already executed: {0}")]
    InstructionAlreadyExecuted(InstructionId),

    /// Supply conservation invariant violated.
    #[error("PL_ERR_411: Supply invariant violation: {reason}")]
    SupplyInvariantViolation { reason: String },

    /// The asset has not been created.
    #[error("PL_ERR_412: Unknown asset {0}")]
    UnknownAsset(Ticker),

    /// The ticker is already registered.
    #[error("PL_ERR_413: Ticker {0} already registered")]
    TickerTaken(Ticker),

    /// The account is not linked to an identity.
    #[error("PL_ERR_414: Account {0} has no identity")]
    MissingIdentity(AccountId),

    /// Not enough free native balance on the account.
    #[error("PL_ERR_415: Insufficient funds on {account}: need {needed}, have {available}")]
    InsufficientFunds {
        account: AccountId,
        needed: u128,
        available: u128,
    },

    /// The call is not allowed for this origin or state.
    #[error("PL_ERR_416: Operation not permitted: {reason}")]
    NotPermitted { reason: String },

    /// A user portfolio that was never created.
    #[error("PL_ERR_417: Portfolio {0} does not exist")]
    PortfolioNotFound(PortfolioId),

    #[error("PL_ERR_418: Portfolio name {name:?} already used by {did}")]
    PortfolioNameTaken { did: IdentityId, name: String },

    #[error("PL_ERR_419: Cannot move funds from {0} into itself")]
    SamePortfolio(PortfolioId),

    // =================================================================
    // Sync Errors (5xx)
    // =================================================================
    /// `wait_for_drain` gave up after the configured timeout.
    #[error("PL_ERR_500: Chain did not drain within {waited_ms}ms")]
    SyncTimeout { waited_ms: u64 },

    /// A block that must exist could not be fetched.
    #[error("PL_ERR_501: Block #{0} not found")]
    BlockNotFound(u64),

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("PL_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("PL_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, bad values, etc.).
    #[error("PL_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error.
    #[error("PL_ERR_903: I/O error: {0}")]
    Io(String),

    /// The ticker symbol is not valid.
    #[error("PL_ERR_904: Invalid ticker: {0:?}")]
    InvalidTicker(String),
}

impl PolyloadError {
    /// The `PL_ERR_nnn` code of this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectionFailed { .. } => "PL_ERR_100",
            Self::Rpc { .. } => "PL_ERR_101",
            Self::RequestTimeout { .. } => "PL_ERR_102",
            Self::SubscriptionClosed { .. } => "PL_ERR_103",
            Self::UnexpectedResponse { .. } => "PL_ERR_104",
            Self::InvalidEndpoint(_) => "PL_ERR_105",
            Self::Submission { .. } => "PL_ERR_200",
            Self::Signing { .. } => "PL_ERR_201",
            Self::InvalidExtrinsic { .. } => "PL_ERR_202",
            Self::NonceExhausted { .. } => "PL_ERR_203",
            Self::StaleNonce { .. } => "PL_ERR_204",
            Self::Dispatch { .. } => "PL_ERR_300",
            Self::TransactionDropped { .. } => "PL_ERR_301",
            Self::TransactionInvalid { .. } => "PL_ERR_302",
            Self::ExtrinsicNotInBlock { .. } => "PL_ERR_303",
            Self::MissingEvent { .. } => "PL_ERR_304",
            Self::OutcomeUnknown { .. } => "PL_ERR_305",
            Self::VenueNotFound(_) => "PL_ERR_400",
            Self::UnauthorizedVenueCreator(_) => "PL_ERR_401",
            Self::InstructionNotFound(_) => "PL_ERR_402",
            Self::InvalidInstruction { .. } => "PL_ERR_403",
            Self::InstructionNotPending { .. } => "PL_ERR_404",
            Self::UnauthorizedCustodian(_) => "PL_ERR_405",
            Self::NotParty { .. } => "PL_ERR_406",
            Self::UnexpectedAffirmationStatus { .. } => "PL_ERR_407",
            Self::LegCountTooSmall { .. } => "PL_ERR_408",
            Self::InsufficientBalance { .. } => "PL_ERR_409",
            Self::InstructionAlreadyExecuted(_) => "PL_ERR_410",
            Self::SupplyInvariantViolation { .. } => "PL_ERR_411",
            Self::UnknownAsset(_) => "PL_ERR_412",
            Self::TickerTaken(_) => "PL_ERR_413",
            Self::MissingIdentity(_) => "PL_ERR_414",
            Self::InsufficientFunds { .. } => "PL_ERR_415",
            Self::NotPermitted { .. } => "PL_ERR_416",
            Self::PortfolioNotFound(_) => "PL_ERR_417",
            Self::PortfolioNameTaken { .. } => "PL_ERR_418",
            Self::SamePortfolio(_) => "PL_ERR_419",
            Self::SyncTimeout { .. } => "PL_ERR_500",
            Self::BlockNotFound(_) => "PL_ERR_501",
            Self::Internal(_) => "PL_ERR_900",
            Self::Serialization(_) => "PL_ERR_901",
            Self::Configuration(_) => "PL_ERR_902",
            Self::Io(_) => "PL_ERR_903",
            Self::InvalidTicker(_) => "PL_ERR_904",
        }
    }

    /// Returns `true` when the extrinsic made it into a block but its
    /// outcome could not be determined.
    #[must_use]
    pub fn is_outcome_unknown(&self) -> bool {
        matches!(
            self,
            Self::OutcomeUnknown { .. } | Self::ExtrinsicNotInBlock { .. }
        )
    }

    /// Returns `true` for errors reported by the chain after inclusion or
    /// by the pool, as opposed to errors on the client side.
    #[must_use]
    pub fn is_chain_rejection(&self) -> bool {
        matches!(
            self,
            Self::Dispatch { .. } | Self::TransactionDropped { .. } | Self::TransactionInvalid { .. }
        )
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, PolyloadError>;

impl From<std::io::Error> for PolyloadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PolyloadError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<parity_scale_codec::Error> for PolyloadError {
    fn from(err: parity_scale_codec::Error) -> Self {
        Self::InvalidExtrinsic {
            reason: err.to_string(),
        }
    }
}
