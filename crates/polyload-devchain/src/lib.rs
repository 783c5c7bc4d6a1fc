//! # polyload-devchain
//!
//! An in-process ledger implementing [`polyload_rpc::ChainApi`], so the
//! submitter, the drain barrier and the settlement client can run without a
//! node. It checks signatures and nonces, keeps a pending pool, seals blocks
//! on demand or on an interval, and executes calls through a small runtime
//! built on the settlement model.
//!
//! Not a consensus engine: one author, instant finality, no forks.

pub mod chain;
pub mod runtime;

pub use chain::{
    BlockProduction, DevChain, DevChainConfig, HOUSEKEEPING_EXTRINSICS, INVALID_TRANSACTION_CODE,
    ProducedBlock,
};
pub use runtime::{DidRecord, Runtime, derive_did, dispatch_error};
