//! # Chain sync watcher
//!
//! A drain barrier: resolves once the chain has done the work a scenario
//! submitted and the node's pool is empty.
//!
//! ```text
//!   new head N ─▶ fetch blocks (last+1 ..= N) in order ─▶ sample counts
//!                                                          │
//!                    goal reached? ── no ──▶ wait for next head
//!                         │
//!                        yes ─▶ pending pool empty? ── no ──▶ wait
//!                                        │
//!                                       yes ─▶ unsubscribe ─▶ DrainReport
//! ```
//!
//! Two goals are supported. [`ChainSyncWatcher::wait_for_drain`] uses the
//! housekeeping heuristic: some block carried more than
//! `housekeeping_extrinsics` extrinsics. [`ChainSyncWatcher::wait_for_extrinsics`]
//! counts signed extrinsics until an expected total is reached.
//!
//! The last processed block number persists across calls, so consecutive
//! waits never skip or re-read a block.

use std::sync::Arc;
use std::time::{Duration, Instant};

use polyload_rpc::ChainApi;
use polyload_types::{DrainConfig, PolyloadError, Result};
use serde::Serialize;
use tracing::{debug, info};

/// What one observed block looked like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockSample {
    pub number: u64,
    pub extrinsics: usize,
    pub signed_extrinsics: usize,
    /// Milliseconds since the previous sampled block, from the timestamp
    /// inherents. `None` for the first block or a block without one.
    pub block_time_ms: Option<u64>,
}

/// Summary of one wait.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub blocks: Vec<BlockSample>,
    pub elapsed_ms: u64,
}

impl DrainReport {
    #[must_use]
    pub fn signed_extrinsics(&self) -> usize {
        self.blocks.iter().map(|b| b.signed_extrinsics).sum()
    }

    /// Blocks that carried more than `housekeeping` extrinsics.
    #[must_use]
    pub fn busy_blocks(&self, housekeeping: usize) -> usize {
        self.blocks.iter().filter(|b| b.extrinsics > housekeeping).count()
    }
}

#[derive(Debug, Clone, Copy)]
enum Goal {
    UsefulWork,
    Extrinsics(usize),
}

/// Waits for submitted work to land on chain.
#[derive(Debug)]
pub struct ChainSyncWatcher {
    chain: Arc<dyn ChainApi>,
    config: DrainConfig,
    last_processed: Option<u64>,
    last_timestamp: Option<u64>,
}

impl ChainSyncWatcher {
    #[must_use]
    pub fn new(chain: Arc<dyn ChainApi>, config: DrainConfig) -> Self {
        Self {
            chain,
            config,
            last_processed: None,
            last_timestamp: None,
        }
    }

    /// Highest block number already sampled.
    #[must_use]
    pub fn last_processed(&self) -> Option<u64> {
        self.last_processed
    }

    /// Take the next announced head as already processed, so the following
    /// wait samples only blocks produced after this returns. Call it before
    /// broadcasting work the wait is meant to observe.
    ///
    /// # Errors
    /// `SubscriptionClosed` if the head stream ends, and transport errors.
    pub async fn anchor(&mut self) -> Result<u64> {
        let mut heads = self.chain.subscribe_new_heads().await?;
        let next = heads.next().await;
        if let Err(e) = heads.unsubscribe().await {
            debug!(error = %e, "unsubscribe from new heads failed");
        }
        let number = match next {
            Some(Ok(header)) => header.number,
            Some(Err(e)) => return Err(e),
            None => {
                return Err(PolyloadError::SubscriptionClosed {
                    what: "new heads".into(),
                });
            }
        };
        if self.last_processed.is_none_or(|n| n < number) {
            self.last_processed = Some(number);
            self.last_timestamp = None;
        }
        debug!(number, "anchored");
        Ok(number)
    }

    /// Wait until a block with more than the housekeeping extrinsic count
    /// has been seen and the pending pool is empty.
    ///
    /// # Errors
    /// `SyncTimeout` if the configured timeout elapses, `BlockNotFound` if
    /// the node cannot serve an announced block, and transport errors.
    pub async fn wait_for_drain(&mut self) -> Result<DrainReport> {
        self.wait(Goal::UsefulWork).await
    }

    /// Wait until `expected` signed extrinsics have been included since the
    /// last processed block and the pending pool is empty.
    ///
    /// # Errors
    /// Same as [`Self::wait_for_drain`].
    pub async fn wait_for_extrinsics(&mut self, expected: usize) -> Result<DrainReport> {
        self.wait(Goal::Extrinsics(expected)).await
    }

    async fn wait(&mut self, goal: Goal) -> Result<DrainReport> {
        let started = Instant::now();
        let timeout_ms = self.config.timeout_ms;
        let mut report = match timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), self.run(goal))
                .await
                .map_err(|_| PolyloadError::SyncTimeout { waited_ms: ms })??,
            None => self.run(goal).await?,
        };
        report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            blocks = report.blocks.len(),
            signed = report.signed_extrinsics(),
            elapsed_ms = report.elapsed_ms,
            "chain drained"
        );
        Ok(report)
    }

    async fn run(&mut self, goal: Goal) -> Result<DrainReport> {
        let mut heads = self.chain.subscribe_new_heads().await?;
        let mut report = DrainReport::default();
        let mut did_work = false;

        let outcome = loop {
            let header = match heads.next().await {
                Some(Ok(header)) => header,
                Some(Err(e)) => break Err(e),
                None => {
                    break Err(PolyloadError::SubscriptionClosed {
                        what: "new heads".into(),
                    });
                }
            };
            if let Err(e) = self.catch_up(header.number, &mut report, &mut did_work).await {
                break Err(e);
            }
            let reached = match goal {
                Goal::UsefulWork => did_work,
                Goal::Extrinsics(expected) => report.signed_extrinsics() >= expected,
            };
            if !reached {
                continue;
            }
            match self.chain.pending_extrinsics().await {
                Ok(pending) if pending.is_empty() => break Ok(()),
                Ok(pending) => debug!(pending = pending.len(), "pool not empty yet"),
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = heads.unsubscribe().await {
            debug!(error = %e, "unsubscribe from new heads failed");
        }
        outcome.map(|()| report)
    }

    /// Sample every block after the last processed one up to `head`.
    async fn catch_up(
        &mut self,
        head: u64,
        report: &mut DrainReport,
        did_work: &mut bool,
    ) -> Result<()> {
        let first = self.last_processed.map_or(head, |n| n.saturating_add(1));
        for number in first..=head {
            let hash = self
                .chain
                .block_hash(number)
                .await?
                .ok_or(PolyloadError::BlockNotFound(number))?;
            let block = self
                .chain
                .block(&hash)
                .await?
                .ok_or(PolyloadError::BlockNotFound(number))?;

            let timestamp = block.timestamp();
            let block_time_ms = match (self.last_timestamp, timestamp) {
                (Some(prev), Some(now)) => Some(now.saturating_sub(prev)),
                _ => None,
            };
            let sample = BlockSample {
                number,
                extrinsics: block.extrinsic_count(),
                signed_extrinsics: block.signed_extrinsic_count(),
                block_time_ms,
            };
            if sample.extrinsics > self.config.housekeeping_extrinsics {
                *did_work = true;
            }
            debug!(
                number,
                extrinsics = sample.extrinsics,
                signed = sample.signed_extrinsics,
                block_time_ms,
                "block"
            );
            report.blocks.push(sample);
            self.last_processed = Some(number);
            if timestamp.is_some() {
                self.last_timestamp = timestamp;
            }
        }
        Ok(())
    }
}
