//! # polyload-submit
//!
//! The write path of polyload: nonce allocation, signing, broadcast with
//! status tracking, and the drain barrier that waits for the chain to
//! catch up.
//!
//! | Component | Role |
//! |---|---|
//! | [`NonceLedger`] | Per-account monotonic nonces, fetched once |
//! | [`TransactionSubmitter`] | Sign, submit, watch, resolve events |
//! | [`ChainSyncWatcher`] | Wait for submitted work and an empty pool |
//! | [`Signer`] | Development and random ed25519 keys |
//! | [`SubmissionStats`] | Run-wide outcome counters |

pub mod nonce;
pub mod signer;
pub mod stats;
pub mod submitter;
pub mod sync;

pub use nonce::NonceLedger;
pub use signer::Signer;
pub use stats::{StatsSnapshot, SubmissionStats};
pub use submitter::TransactionSubmitter;
pub use sync::{BlockSample, ChainSyncWatcher, DrainReport};
