//! # polyload-settlement
//!
//! Venue-based multi-party settlement: the protocol model and the client
//! that drives it on a chain.
//!
//! ## Architecture
//!
//! ```text
//!  SettlementClient ──submit──▶ TransactionSubmitter ──▶ node
//!        │                                              │
//!        └──── await_outcome ◀── new heads + events ◀───┘
//!
//!  SettlementEngine (runs inside the development chain)
//!    ├── PortfolioBook        available / locked balances
//!    ├── SupplyConservation   Σ balances == Σ issued
//!    ├── ComplianceRules      per-asset transfer conditions
//!    └── IdempotencyGuard     execute at most once
//! ```
//!
//! An instruction executes only once every portfolio named by its legs has
//! affirmed. Execution moves all legs or none.

pub mod client;
pub mod compliance;
pub mod engine;
pub mod idempotency;
pub mod portfolio;
pub mod supply;

pub use client::{InstructionOutcome, SettlementClient};
pub use compliance::{ComplianceRequirement, ComplianceRules};
pub use engine::{AssetInfo, Emitted, InstructionRequest, SETTLEMENT_DID, SettlementEngine};
pub use idempotency::IdempotencyGuard;
pub use portfolio::{PortfolioBalance, PortfolioBook};
pub use supply::SupplyConservation;
