//! # polyload-types
//!
//! Shared types, errors, and configuration for **polyload**, a client that
//! drives a ledger node over JSON-RPC to exercise its identity, asset and
//! settlement features.
//!
//! This crate is the leaf dependency of the workspace — every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`AccountId`], [`IdentityId`], [`PortfolioId`], [`Ticker`], [`VenueId`], [`InstructionId`], [`BlockHash`], [`ExtrinsicHash`], [`TxId`]
//! - **Calls**: [`Call`] and the per-pallet call enums
//! - **Extrinsics**: [`Extrinsic`], [`SignedExtrinsic`]
//! - **Events**: [`ChainEvent`], [`EventRecord`], [`EventKind`], [`Phase`]
//! - **Dispatch errors**: [`DispatchError`], [`ModuleError`]
//! - **Transactions**: [`Transaction`], [`TxStatus`], [`TransactionStatus`], [`Confirmation`]
//! - **Blocks**: [`Header`], [`Block`], [`SignedBlock`]
//! - **Settlement model**: [`Venue`], [`Instruction`], [`Leg`], [`AffirmationStatus`], [`InstructionStatus`]
//! - **Configuration**: [`ClientConfig`], [`DrainConfig`]
//! - **Errors**: [`PolyloadError`] with `PL_ERR_` prefix codes
//! - **Constants**: defaults, limits, pallet indices

pub mod amount;
pub mod block;
pub mod call;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod extrinsic;
pub mod ids;
pub mod settlement;
pub mod transaction;

// Re-export all primary types at crate root for ergonomic imports:
//   use polyload_types::{Call, ChainEvent, Instruction, ...};

pub use block::*;
pub use call::*;
pub use config::*;
pub use dispatch::*;
pub use error::*;
pub use event::*;
pub use extrinsic::*;
pub use ids::*;
pub use settlement::*;
pub use transaction::*;

// Constants are accessed via `polyload_types::constants::FOO`
// (not re-exported to avoid name collisions).
