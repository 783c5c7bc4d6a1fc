//! # Transaction submitter
//!
//! Turns `(signer, call)` into a confirmed [`Transaction`] or a typed error.
//!
//! ```text
//!   reserve nonce ─▶ sign ─▶ submitAndWatch ─▶ status stream
//!                                                 │
//!        inBlock / finalized (per Confirmation) ◀─┘
//!                 │
//!                 ▼
//!   fetch block ─▶ locate extrinsic index ─▶ fetch events ─▶ keep ApplyExtrinsic(index)
//!                 │
//!                 ├─ block or events unreadable ─▶ Err(OutcomeUnknown)
//!                 ├─ System.ExtrinsicFailed     ─▶ Err(Dispatch)
//!                 └─ otherwise                  ─▶ Ok(Transaction)
//! ```
//!
//! The status subscription is cancelled exactly once, on the first terminal
//! outcome, whichever it is. Nonces are never returned to the ledger.

use std::sync::Arc;

use futures_util::future::join_all;
use polyload_rpc::{ChainApi, Subscription};
use polyload_types::{
    BlockHash, Call, ChainEvent, Confirmation, Extrinsic, ExtrinsicHash, PolyloadError, Result,
    Transaction, TransactionStatus, TxStatus,
};
use tracing::{debug, info, warn};

use crate::nonce::NonceLedger;
use crate::signer::Signer;
use crate::stats::SubmissionStats;

/// Signs, broadcasts and tracks transactions.
#[derive(Debug, Clone)]
pub struct TransactionSubmitter {
    chain: Arc<dyn ChainApi>,
    nonces: Arc<NonceLedger>,
    confirmation: Confirmation,
    stats: Arc<SubmissionStats>,
}

impl TransactionSubmitter {
    /// A submitter with its own nonce ledger.
    #[must_use]
    pub fn new(chain: Arc<dyn ChainApi>, confirmation: Confirmation) -> Self {
        let nonces = Arc::new(NonceLedger::new(Arc::clone(&chain)));
        Self::with_ledger(chain, nonces, confirmation)
    }

    /// A submitter sharing an existing ledger.
    #[must_use]
    pub fn with_ledger(
        chain: Arc<dyn ChainApi>,
        nonces: Arc<NonceLedger>,
        confirmation: Confirmation,
    ) -> Self {
        Self {
            chain,
            nonces,
            confirmation,
            stats: Arc::new(SubmissionStats::new()),
        }
    }

    #[must_use]
    pub fn chain(&self) -> &Arc<dyn ChainApi> {
        &self.chain
    }

    #[must_use]
    pub fn nonces(&self) -> &Arc<NonceLedger> {
        &self.nonces
    }

    #[must_use]
    pub fn stats(&self) -> Arc<SubmissionStats> {
        Arc::clone(&self.stats)
    }

    /// Submit and wait for the configured confirmation depth.
    ///
    /// # Errors
    /// - `Dispatch` when the extrinsic was included but failed;
    /// - `TransactionDropped` / `TransactionInvalid` for pool outcomes;
    /// - `OutcomeUnknown` when the extrinsic was included but its block or
    ///   events could not be read;
    /// - `Submission`, `ConnectionFailed`, `SubscriptionClosed` and other
    ///   transport errors otherwise.
    pub async fn submit(&self, signer: &Signer, call: Call) -> Result<Transaction> {
        let account = signer.account();
        let nonce = self.nonces.reserve(&account).await.inspect_err(|_| {
            self.stats.record_submission_error();
        })?;
        let xt = Extrinsic::Signed(signer.sign(call.clone(), nonce));
        let mut tx = Transaction::new(account, call, nonce, xt.hash());
        debug!(
            tx_id = %tx.id,
            signer = signer.name(),
            nonce,
            call = %tx.call.label(),
            "broadcasting"
        );

        let mut updates = match self.chain.submit_and_watch(&xt.to_hex()).await {
            Ok(updates) => updates,
            Err(e) => {
                warn!(tx_id = %tx.id, nonce, error = %e, "broadcast failed, nonce stays consumed");
                self.stats.record_submission_error();
                return Err(e);
            }
        };
        self.stats.record_submitted();

        let outcome = self.track(&mut tx, &mut updates).await;
        if let Err(e) = updates.unsubscribe().await {
            debug!(tx_id = %tx.id, error = %e, "unwatch failed");
        }
        self.record(&outcome);
        outcome.map(|()| tx)
    }

    /// Fire-and-forget: broadcast without watching. The nonce is consumed.
    pub async fn submit_detached(&self, signer: &Signer, call: Call) -> Result<ExtrinsicHash> {
        let account = signer.account();
        let nonce = self.nonces.reserve(&account).await.inspect_err(|_| {
            self.stats.record_submission_error();
        })?;
        let xt = Extrinsic::Signed(signer.sign(call, nonce));
        match self.chain.submit_extrinsic(&xt.to_hex()).await {
            Ok(hash) => {
                self.stats.record_submitted();
                Ok(hash)
            }
            Err(e) => {
                self.stats.record_submission_error();
                Err(e)
            }
        }
    }

    /// Submit many transactions concurrently. Results are in request order.
    pub async fn submit_all(&self, requests: &[(Signer, Call)]) -> Vec<Result<Transaction>> {
        info!(count = requests.len(), "submitting batch");
        join_all(
            requests
                .iter()
                .map(|(signer, call)| self.submit(signer, call.clone())),
        )
        .await
    }

    fn record(&self, outcome: &Result<()>) {
        match outcome {
            Ok(()) => self.stats.record_succeeded(),
            Err(PolyloadError::Dispatch { .. }) => self.stats.record_dispatch_failed(),
            Err(PolyloadError::TransactionDropped { .. } | PolyloadError::TransactionInvalid { .. }) => {
                self.stats.record_dropped();
            }
            Err(e) if e.is_outcome_unknown() => self.stats.record_outcome_unknown(),
            Err(_) => self.stats.record_submission_error(),
        }
    }

    async fn track(
        &self,
        tx: &mut Transaction,
        updates: &mut Subscription<TransactionStatus>,
    ) -> Result<()> {
        while let Some(update) = updates.next().await {
            let status = update?;
            debug!(tx_id = %tx.id, ?status, "status update");
            if let Some(block) = self.confirmation.reached_by(&status) {
                let finalized = matches!(status, TransactionStatus::Finalized(_));
                return self.resolve_in_block(tx, block, finalized).await;
            }
            match status {
                TransactionStatus::Dropped | TransactionStatus::Usurped(_) => {
                    tx.transition(TxStatus::Dropped)?;
                    warn!(tx_id = %tx.id, nonce = tx.nonce, "transaction dropped");
                    return Err(PolyloadError::TransactionDropped { hash: tx.hash });
                }
                TransactionStatus::Invalid => {
                    tx.transition(TxStatus::Dropped)?;
                    warn!(tx_id = %tx.id, nonce = tx.nonce, "transaction invalid");
                    return Err(PolyloadError::TransactionInvalid { hash: tx.hash });
                }
                TransactionStatus::FinalityTimeout(_) => {
                    return Err(PolyloadError::SubscriptionClosed {
                        what: format!("finality timeout for {}", tx.id),
                    });
                }
                _ => {}
            }
        }
        Err(PolyloadError::SubscriptionClosed {
            what: format!("status stream of {}", tx.id),
        })
    }

    async fn resolve_in_block(
        &self,
        tx: &mut Transaction,
        block_hash: BlockHash,
        finalized: bool,
    ) -> Result<()> {
        let hash = tx.hash;
        let not_found = || PolyloadError::ExtrinsicNotInBlock {
            hash,
            block: block_hash.to_hex(),
        };
        let unknown = |source: PolyloadError| {
            warn!(
                tx_id = %tx.id,
                nonce = tx.nonce,
                block = %block_hash,
                error = %source,
                "included, outcome unreadable"
            );
            PolyloadError::OutcomeUnknown {
                hash,
                block: block_hash,
                signer: tx.signer,
                nonce: tx.nonce,
                source: Box::new(source),
            }
        };
        let block = self
            .chain
            .block(&block_hash)
            .await
            .map_err(unknown)?
            .ok_or_else(not_found)?;
        let index = block.position_of(&hash).ok_or_else(not_found)?;
        let events: Vec<ChainEvent> = self
            .chain
            .block_events(&block_hash)
            .await
            .map_err(unknown)?
            .into_iter()
            .filter(|r| r.is_for_extrinsic(index))
            .map(|r| r.event)
            .collect();
        tx.extrinsic_index = Some(index);
        tx.events = events;

        if let Some(error) = tx.events.iter().find_map(ChainEvent::dispatch_error).cloned() {
            warn!(
                tx_id = %tx.id,
                signer = %tx.signer,
                nonce = tx.nonce,
                call = %tx.call.label(),
                %error,
                "dispatch failed"
            );
            tx.transition(TxStatus::Failed(error.clone()))?;
            return Err(PolyloadError::Dispatch {
                signer: tx.signer,
                nonce: tx.nonce,
                error,
            });
        }

        let status = if finalized {
            TxStatus::Finalized(block_hash)
        } else {
            TxStatus::InBlock(block_hash)
        };
        tx.transition(status)?;
        debug!(
            tx_id = %tx.id,
            block = %block_hash,
            number = block.number(),
            index,
            events = tx.events.len(),
            "included"
        );
        Ok(())
    }
}
