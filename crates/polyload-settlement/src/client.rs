//! Settlement operations against a live chain.
//!
//! Each operation is one signed extrinsic through the shared
//! [`TransactionSubmitter`]. Ids are read back from the typed events of the
//! including block, never guessed from counters.
//!
//! Settlement outcomes are not errors: a rejected or failed instruction is
//! reported as an [`InstructionOutcome`] by [`SettlementClient::await_outcome`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use polyload_rpc::ChainApi;
use polyload_submit::{Signer, TransactionSubmitter};
use polyload_types::{
    BlockHash, Call, ChainEvent, EventKind, InstructionId, PolyloadError, PortfolioEvent,
    PortfolioId, Result, SettlementCall, SettlementEvent, Ticker, Transaction, VenueId, VenueType,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::engine::InstructionRequest;

/// How an instruction ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InstructionOutcome {
    Executed,
    Rejected,
    /// Execution was attempted and nothing moved.
    Failed { failed_legs: Vec<u64> },
}

impl InstructionOutcome {
    #[must_use]
    pub fn is_executed(&self) -> bool {
        matches!(self, Self::Executed)
    }
}

/// Terminal outcome of `id` among `events`, if any.
fn outcome_in<'a>(
    id: InstructionId,
    events: impl IntoIterator<Item = &'a ChainEvent>,
) -> Option<InstructionOutcome> {
    let mut failed_legs = Vec::new();
    for event in events {
        let Some(e) = event.as_settlement() else {
            continue;
        };
        if e.instruction_id() != Some(id) {
            continue;
        }
        match e {
            SettlementEvent::InstructionExecuted { .. } => return Some(InstructionOutcome::Executed),
            SettlementEvent::InstructionRejected { .. } => return Some(InstructionOutcome::Rejected),
            SettlementEvent::LegFailedExecution { leg_index, .. } => failed_legs.push(*leg_index),
            SettlementEvent::InstructionFailed { .. } => {
                return Some(InstructionOutcome::Failed { failed_legs });
            }
            _ => {}
        }
    }
    None
}

fn missing(expected: &str) -> PolyloadError {
    PolyloadError::MissingEvent {
        expected: expected.to_string(),
    }
}

/// Drives venues and instructions through a [`TransactionSubmitter`].
#[derive(Debug)]
pub struct SettlementClient {
    submitter: Arc<TransactionSubmitter>,
    /// Block number each instruction this client saw created was included in.
    created_at: Mutex<HashMap<InstructionId, u64>>,
    /// Outcomes already observed in this client's own transactions.
    outcomes: Mutex<HashMap<InstructionId, InstructionOutcome>>,
    outcome_timeout: Option<Duration>,
}

impl SettlementClient {
    #[must_use]
    pub fn new(submitter: Arc<TransactionSubmitter>) -> Self {
        Self {
            submitter,
            created_at: Mutex::new(HashMap::new()),
            outcomes: Mutex::new(HashMap::new()),
            outcome_timeout: None,
        }
    }

    /// Give up on [`Self::await_outcome`] after `timeout`.
    #[must_use]
    pub fn with_outcome_timeout(mut self, timeout: Duration) -> Self {
        self.outcome_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn submitter(&self) -> &Arc<TransactionSubmitter> {
        &self.submitter
    }

    fn chain(&self) -> &Arc<dyn ChainApi> {
        self.submitter.chain()
    }

    /// Submit a settlement call and remember any outcome it carries.
    async fn submit(&self, signer: &Signer, call: SettlementCall) -> Result<Transaction> {
        let tx = self.submitter.submit(signer, Call::Settlement(call)).await?;
        let mut outcomes = self.outcomes.lock().await;
        for event in &tx.events {
            if let Some(id) = event.as_settlement().and_then(SettlementEvent::instruction_id) {
                if let Some(outcome) = outcome_in(id, &tx.events) {
                    outcomes.entry(id).or_insert(outcome);
                }
            }
        }
        Ok(tx)
    }

    async fn record_creation(&self, id: InstructionId, tx: &Transaction) -> Result<()> {
        let Some(hash) = tx.block_hash() else {
            return Ok(());
        };
        let block = self
            .chain()
            .block(&hash)
            .await?
            .ok_or_else(|| PolyloadError::UnexpectedResponse {
                method: "chain_getBlock".into(),
                reason: format!("included block {hash} is unknown"),
            })?;
        self.created_at.lock().await.insert(id, block.number());
        Ok(())
    }

    fn instruction_created(tx: &Transaction) -> Result<InstructionId> {
        tx.events_of(EventKind::InstructionCreated)
            .find_map(|e| e.as_settlement().and_then(SettlementEvent::instruction_id))
            .ok_or_else(|| missing("settlement.InstructionCreated"))
    }

    /// Create a venue owned by the signer's identity.
    pub async fn create_venue(
        &self,
        signer: &Signer,
        details: &str,
        venue_type: VenueType,
    ) -> Result<VenueId> {
        let tx = self
            .submit(
                signer,
                SettlementCall::CreateVenue {
                    details: details.to_string(),
                    signers: Vec::new(),
                    venue_type,
                },
            )
            .await?;
        let id = tx
            .events
            .iter()
            .find_map(|e| match e.as_settlement() {
                Some(SettlementEvent::VenueCreated { venue_id, .. }) => Some(*venue_id),
                _ => None,
            })
            .ok_or_else(|| missing("settlement.VenueCreated"))?;
        info!(venue = %id, signer = signer.name(), "venue created");
        Ok(id)
    }

    /// Create the next user portfolio of the signer's identity.
    pub async fn create_portfolio(&self, signer: &Signer, name: &str) -> Result<PortfolioId> {
        let tx = self
            .submitter
            .submit(signer, Call::create_portfolio(name))
            .await?;
        let portfolio = tx
            .events
            .iter()
            .find_map(|e| match e {
                ChainEvent::Portfolio(PortfolioEvent::PortfolioCreated { did, number, .. }) => {
                    Some(PortfolioId::user(*did, *number))
                }
                _ => None,
            })
            .ok_or_else(|| missing("portfolio.PortfolioCreated"))?;
        info!(%portfolio, name, signer = signer.name(), "portfolio created");
        Ok(portfolio)
    }

    /// Move unlocked units between two of the signer's portfolios.
    pub async fn move_portfolio_funds(
        &self,
        signer: &Signer,
        from: PortfolioId,
        to: PortfolioId,
        ticker: Ticker,
        amount: u128,
    ) -> Result<Transaction> {
        let tx = self
            .submitter
            .submit(signer, Call::move_portfolio_funds(from, to, ticker, amount))
            .await?;
        if tx.find_event(EventKind::MovedBetweenPortfolios).is_none() {
            return Err(missing("portfolio.MovedBetweenPortfolios"));
        }
        debug!(%from, %to, %ticker, amount, "moved between portfolios");
        Ok(tx)
    }

    pub async fn add_instruction(
        &self,
        signer: &Signer,
        request: InstructionRequest,
    ) -> Result<InstructionId> {
        let tx = self
            .submit(
                signer,
                SettlementCall::AddInstruction {
                    venue_id: request.venue_id,
                    settlement_type: request.settlement_type,
                    valid_from: request.valid_from,
                    legs: request.legs,
                },
            )
            .await?;
        let id = Self::instruction_created(&tx)?;
        self.record_creation(id, &tx).await?;
        info!(instruction = %id, signer = signer.name(), "instruction added");
        Ok(id)
    }

    /// Create an instruction and affirm it for the signer's `portfolios` in
    /// one extrinsic.
    pub async fn add_and_affirm_instruction(
        &self,
        signer: &Signer,
        request: InstructionRequest,
        portfolios: Vec<PortfolioId>,
    ) -> Result<InstructionId> {
        let tx = self
            .submit(
                signer,
                SettlementCall::AddAndAffirmInstruction {
                    venue_id: request.venue_id,
                    settlement_type: request.settlement_type,
                    valid_from: request.valid_from,
                    legs: request.legs,
                    portfolios,
                },
            )
            .await?;
        let id = Self::instruction_created(&tx)?;
        self.record_creation(id, &tx).await?;
        info!(instruction = %id, signer = signer.name(), "instruction added and affirmed");
        Ok(id)
    }

    pub async fn affirm_instruction(
        &self,
        signer: &Signer,
        id: InstructionId,
        portfolios: Vec<PortfolioId>,
        max_legs_count: u32,
    ) -> Result<Transaction> {
        let tx = self
            .submit(
                signer,
                SettlementCall::AffirmInstruction {
                    instruction_id: id,
                    portfolios,
                    max_legs_count,
                },
            )
            .await?;
        if tx.find_event(EventKind::InstructionAffirmed).is_none() {
            return Err(missing("settlement.InstructionAffirmed"));
        }
        debug!(instruction = %id, signer = signer.name(), "affirmed");
        Ok(tx)
    }

    pub async fn withdraw_affirmation(
        &self,
        signer: &Signer,
        id: InstructionId,
        portfolios: Vec<PortfolioId>,
        max_legs_count: u32,
    ) -> Result<Transaction> {
        let tx = self
            .submit(
                signer,
                SettlementCall::WithdrawAffirmation {
                    instruction_id: id,
                    portfolios,
                    max_legs_count,
                },
            )
            .await?;
        if tx.find_event(EventKind::AffirmationWithdrawn).is_none() {
            return Err(missing("settlement.AffirmationWithdrawn"));
        }
        debug!(instruction = %id, signer = signer.name(), "affirmation withdrawn");
        Ok(tx)
    }

    pub async fn reject_instruction(
        &self,
        signer: &Signer,
        id: InstructionId,
        portfolio: PortfolioId,
        num_of_legs: u32,
    ) -> Result<Transaction> {
        let tx = self
            .submit(
                signer,
                SettlementCall::RejectInstruction {
                    instruction_id: id,
                    portfolio,
                    num_of_legs,
                },
            )
            .await?;
        if tx.find_event(EventKind::InstructionRejected).is_none() {
            return Err(missing("settlement.InstructionRejected"));
        }
        info!(instruction = %id, signer = signer.name(), "instruction rejected");
        Ok(tx)
    }

    /// Wait until `id` reaches a terminal state.
    ///
    /// Scans every block from the one that created the instruction (or the
    /// current head, for instructions created elsewhere) and keeps following
    /// new heads until `InstructionExecuted`, `InstructionRejected` or
    /// `InstructionFailed` for `id` shows up.
    ///
    /// # Errors
    /// Transport errors, a closed head subscription, or `SyncTimeout` when a
    /// timeout is configured.
    pub async fn await_outcome(&self, id: InstructionId) -> Result<InstructionOutcome> {
        if let Some(outcome) = self.outcomes.lock().await.get(&id) {
            return Ok(outcome.clone());
        }
        let outcome = match self.outcome_timeout {
            None => self.follow(id).await?,
            Some(timeout) => tokio::time::timeout(timeout, self.follow(id))
                .await
                .map_err(|_| PolyloadError::SyncTimeout {
                    waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })??,
        };
        info!(instruction = %id, ?outcome, "instruction settled");
        self.outcomes.lock().await.insert(id, outcome.clone());
        Ok(outcome)
    }

    async fn follow(&self, id: InstructionId) -> Result<InstructionOutcome> {
        let chain = self.chain().clone();
        let mut heads = chain.subscribe_new_heads().await?;
        let mut next = self.created_at.lock().await.get(&id).copied();

        let result = loop {
            let header = match heads.next().await {
                Some(Ok(header)) => header,
                Some(Err(e)) => break Err(e),
                None => {
                    break Err(PolyloadError::SubscriptionClosed {
                        what: "new heads".into(),
                    });
                }
            };
            let from = next.unwrap_or(header.number);
            match self.scan(id, from, header.number).await {
                Ok(Some(outcome)) => break Ok(outcome),
                Ok(None) => next = Some(header.number.saturating_add(1).max(from)),
                Err(e) => break Err(e),
            }
        };
        if let Err(e) = heads.unsubscribe().await {
            debug!(instruction = %id, error = %e, "unsubscribe from new heads failed");
        }
        result
    }

    /// Look for the outcome of `id` in blocks `from..=to`.
    async fn scan(&self, id: InstructionId, from: u64, to: u64) -> Result<Option<InstructionOutcome>> {
        for number in from..=to {
            let hash: BlockHash = self
                .chain()
                .block_hash(number)
                .await?
                .ok_or(PolyloadError::BlockNotFound(number))?;
            let records = self.chain().block_events(&hash).await?;
            if let Some(outcome) = outcome_in(id, records.iter().map(|r| &r.event)) {
                debug!(instruction = %id, block = number, "outcome found");
                return Ok(Some(outcome));
            }
        }
        Ok(None)
    }
}
