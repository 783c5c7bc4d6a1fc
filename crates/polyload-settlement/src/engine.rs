//! # Settlement engine
//!
//! Protocol model of venue-based multi-party settlement: venues, instructions
//! and their legs, per-portfolio affirmations, fund locking and
//! all-or-nothing execution.
//!
//! ```text
//!   create_venue ─▶ add_instruction ─▶ affirm (lock sender funds) ─┐
//!                        │                   ▲        │            │
//!                        │          withdraw │        ▼            │
//!                        │         (unlock)  └── Affirmed          │
//!                        │                                         │
//!                        │   all parties affirmed + SettleOnAffirmation
//!                        │   or scheduled block reached            │
//!                        ▼                                         ▼
//!                  reject ─▶ REJECTED          execute: release locks,
//!                                              fund check, move all legs
//!                                              ├─ EXECUTED
//!                                              └─ FAILED (nothing moves)
//! ```
//!
//! Funds can also be parked in numbered user portfolios and moved between
//! an identity's own portfolios; locked units never move.
//!
//! Every operation returns the events it emitted, in order. Engine-driven
//! outcomes (execution, failure) are attributed to [`SETTLEMENT_DID`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use polyload_types::constants::{FIRST_INSTRUCTION_ID, FIRST_VENUE_ID, MAX_LEGS_PER_INSTRUCTION};
use polyload_types::{
    AffirmationStatus, AssetEvent, ChainEvent, Claim, ComplianceManagerEvent, Condition,
    IdentityId, Instruction, InstructionId, InstructionStatus, Leg, LegStatus, PolyloadError,
    PortfolioEvent, PortfolioId, Result, SettlementEvent, SettlementType, Ticker, Venue, VenueId, VenueType,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::compliance::ComplianceRules;
use crate::idempotency::IdempotencyGuard;
use crate::portfolio::{PortfolioBalance, PortfolioBook};
use crate::supply::SupplyConservation;

/// Identity the engine acts as when it executes or fails an instruction.
pub const SETTLEMENT_DID: IdentityId = IdentityId(*b"system:settlement_module_did\0\0\0\0");

const EXECUTED_CACHE_SIZE: usize = 4096;

/// A value plus the events emitted while producing it.
pub type Emitted<T> = (T, Vec<ChainEvent>);

/// Parameters of a new instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionRequest {
    pub venue_id: VenueId,
    pub settlement_type: SettlementType,
    /// Block number before which the instruction cannot be affirmed.
    pub valid_from: Option<u64>,
    pub legs: Vec<Leg>,
}

/// A registered asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetInfo {
    pub ticker: Ticker,
    pub name: String,
    pub owner: IdentityId,
    pub divisible: bool,
    pub total_supply: u128,
}

/// Venues, instructions, balances and their invariants.
#[derive(Debug)]
pub struct SettlementEngine {
    venues: BTreeMap<VenueId, Venue>,
    instructions: BTreeMap<InstructionId, Instruction>,
    next_venue: VenueId,
    next_instruction: InstructionId,
    /// Block number → instructions settling at that block.
    scheduled: BTreeMap<u64, Vec<InstructionId>>,
    assets: BTreeMap<Ticker, AssetInfo>,
    book: PortfolioBook,
    supply: SupplyConservation,
    compliance: ComplianceRules,
    executed: IdempotencyGuard,
    block_number: u64,
}

impl Default for SettlementEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn settlement(event: SettlementEvent) -> ChainEvent {
    ChainEvent::Settlement(event)
}

fn ensure_custody(caller: IdentityId, portfolio: &PortfolioId) -> Result<()> {
    if portfolio.did == caller {
        Ok(())
    } else {
        Err(PolyloadError::UnauthorizedCustodian(*portfolio))
    }
}

fn ensure_leg_count(needed: usize, given: u32) -> Result<()> {
    if !u32::try_from(needed).is_ok_and(|n| n <= given) {
        return Err(PolyloadError::LegCountTooSmall { needed, given });
    }
    Ok(())
}

fn distinct(portfolios: &[PortfolioId]) -> Result<Vec<PortfolioId>> {
    if portfolios.is_empty() {
        return Err(PolyloadError::NotPermitted {
            reason: "no portfolios given".into(),
        });
    }
    Ok(portfolios
        .iter()
        .copied()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect())
}

impl SettlementEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            venues: BTreeMap::new(),
            instructions: BTreeMap::new(),
            next_venue: VenueId(FIRST_VENUE_ID),
            next_instruction: InstructionId(FIRST_INSTRUCTION_ID),
            scheduled: BTreeMap::new(),
            assets: BTreeMap::new(),
            book: PortfolioBook::new(),
            supply: SupplyConservation::new(),
            compliance: ComplianceRules::new(),
            executed: IdempotencyGuard::new(EXECUTED_CACHE_SIZE),
            block_number: 0,
        }
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    #[must_use]
    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    #[must_use]
    pub fn venue(&self, id: VenueId) -> Option<&Venue> {
        self.venues.get(&id)
    }

    #[must_use]
    pub fn instruction(&self, id: InstructionId) -> Option<&Instruction> {
        self.instructions.get(&id)
    }

    #[must_use]
    pub fn asset(&self, ticker: &Ticker) -> Option<&AssetInfo> {
        self.assets.get(ticker)
    }

    #[must_use]
    pub fn balance(&self, portfolio: &PortfolioId, ticker: &Ticker) -> PortfolioBalance {
        self.book.balance(portfolio, ticker)
    }

    /// Instructions waiting for a future block.
    #[must_use]
    pub fn scheduled_count(&self) -> usize {
        self.scheduled.values().map(Vec::len).sum()
    }

    /// Check that balances of `ticker` add up to its issuance.
    ///
    /// # Errors
    /// Returns `SupplyInvariantViolation` on mismatch.
    pub fn verify_supply(&self, ticker: &Ticker) -> Result<()> {
        self.supply.verify(ticker, self.book.total_supply(ticker))
    }

    // -----------------------------------------------------------------
    // Assets
    // -----------------------------------------------------------------

    /// Register a ticker owned by `owner`.
    ///
    /// # Errors
    /// Returns `TickerTaken` if the ticker exists.
    pub fn create_asset(
        &mut self,
        owner: IdentityId,
        name: &str,
        ticker: Ticker,
        divisible: bool,
    ) -> Result<Vec<ChainEvent>> {
        if self.assets.contains_key(&ticker) {
            return Err(PolyloadError::TickerTaken(ticker));
        }
        self.assets.insert(
            ticker,
            AssetInfo {
                ticker,
                name: name.to_string(),
                owner,
                divisible,
                total_supply: 0,
            },
        );
        debug!(%ticker, owner = %owner, "asset created");
        Ok(vec![ChainEvent::Asset(AssetEvent::AssetCreated {
            did: owner,
            ticker,
            divisible,
        })])
    }

    /// Mint `amount` into the owner's default portfolio.
    ///
    /// # Errors
    /// `UnknownAsset`, `NotPermitted` for a non-owner caller or supply
    /// overflow.
    pub fn issue(
        &mut self,
        caller: IdentityId,
        ticker: Ticker,
        amount: u128,
    ) -> Result<Vec<ChainEvent>> {
        let asset = self
            .assets
            .get_mut(&ticker)
            .ok_or(PolyloadError::UnknownAsset(ticker))?;
        if asset.owner != caller {
            return Err(PolyloadError::NotPermitted {
                reason: format!("{caller} does not own {ticker}"),
            });
        }
        self.supply.record_issuance(ticker, amount)?;
        asset.total_supply = asset.total_supply.saturating_add(amount);
        self.book
            .credit(PortfolioId::default_of(caller), ticker, amount)?;
        debug!(%ticker, amount, "issued");
        Ok(vec![ChainEvent::Asset(AssetEvent::Issued {
            did: caller,
            ticker,
            amount,
        })])
    }

    /// Add a transfer requirement for `ticker`. Only the owner may.
    ///
    /// # Errors
    /// `UnknownAsset`, or `NotPermitted` for a non-owner caller.
    pub fn add_compliance_requirement(
        &mut self,
        caller: IdentityId,
        ticker: Ticker,
        sender_conditions: Vec<Condition>,
        receiver_conditions: Vec<Condition>,
    ) -> Result<Emitted<u32>> {
        let asset = self
            .assets
            .get(&ticker)
            .ok_or(PolyloadError::UnknownAsset(ticker))?;
        if asset.owner != caller {
            return Err(PolyloadError::NotPermitted {
                reason: format!("{caller} does not own {ticker}"),
            });
        }
        let id = self
            .compliance
            .add_requirement(ticker, sender_conditions, receiver_conditions);
        debug!(%ticker, id, "compliance requirement added");
        let event = ChainEvent::ComplianceManager(
            ComplianceManagerEvent::ComplianceRequirementCreated { ticker, id },
        );
        Ok((id, vec![event]))
    }

    // -----------------------------------------------------------------
    // Portfolios
    // -----------------------------------------------------------------

    /// Create the next user portfolio of `owner`.
    ///
    /// # Errors
    /// Returns `PortfolioNameTaken` if `owner` already uses `name`.
    pub fn create_portfolio(
        &mut self,
        owner: IdentityId,
        name: &str,
    ) -> Result<Emitted<PortfolioId>> {
        let number = self.book.create(owner, name)?;
        let portfolio = PortfolioId::user(owner, number);
        debug!(%portfolio, name, "portfolio created");
        let event = ChainEvent::Portfolio(PortfolioEvent::PortfolioCreated {
            did: owner,
            number,
            name: name.to_string(),
        });
        Ok((portfolio, vec![event]))
    }

    #[must_use]
    pub fn portfolio_exists(&self, portfolio: &PortfolioId) -> bool {
        self.book.exists(portfolio)
    }

    /// Move `amount` of `ticker` between two portfolios held by `caller`.
    /// Only the available part of the source balance can move.
    ///
    /// # Errors
    /// - `SamePortfolio` when `from == to`;
    /// - `UnauthorizedCustodian` unless `caller` holds both sides;
    /// - `PortfolioNotFound` for a user portfolio never created;
    /// - `InsufficientBalance` if the unlocked balance is short.
    pub fn move_portfolio_funds(
        &mut self,
        caller: IdentityId,
        from: PortfolioId,
        to: PortfolioId,
        ticker: Ticker,
        amount: u128,
    ) -> Result<Vec<ChainEvent>> {
        if from == to {
            return Err(PolyloadError::SamePortfolio(from));
        }
        ensure_custody(caller, &from)?;
        ensure_custody(caller, &to)?;
        self.book.ensure_exists(&from)?;
        self.book.ensure_exists(&to)?;
        self.book.transfer(from, to, ticker, amount)?;
        debug!(%from, %to, %ticker, amount, "moved between portfolios");
        Ok(vec![ChainEvent::Portfolio(
            PortfolioEvent::MovedBetweenPortfolios {
                did: caller,
                from,
                to,
                ticker,
                amount,
            },
        )])
    }

    /// Make `claim` about `target` visible to compliance checks.
    pub fn record_claim(&mut self, target: IdentityId, claim: Claim) {
        self.compliance.record_claim(target, claim);
    }

    // -----------------------------------------------------------------
    // Venues and instructions
    // -----------------------------------------------------------------

    /// Create a venue owned by `creator`. Ids start at 1.
    pub fn create_venue(
        &mut self,
        creator: IdentityId,
        details: &str,
        venue_type: VenueType,
    ) -> Emitted<VenueId> {
        let id = self.next_venue;
        self.next_venue = id.next();
        self.venues.insert(
            id,
            Venue {
                id,
                creator,
                details: details.to_string(),
                venue_type,
                instructions: Vec::new(),
            },
        );
        info!(venue = %id, creator = %creator, "venue created");
        let event = settlement(SettlementEvent::VenueCreated {
            did: creator,
            venue_id: id,
            details: details.to_string(),
            venue_type,
        });
        (id, vec![event])
    }

    /// Create a pending instruction under a venue owned by `creator`.
    ///
    /// # Errors
    /// - `VenueNotFound` / `UnauthorizedVenueCreator`;
    /// - `InvalidInstruction` for no legs, too many legs, a leg sending to
    ///   itself, a zero amount, or a settlement block already passed;
    /// - `UnknownAsset` for an unregistered ticker;
    /// - `PortfolioNotFound` for a leg naming a user portfolio never created.
    pub fn add_instruction(
        &mut self,
        creator: IdentityId,
        request: InstructionRequest,
    ) -> Result<Emitted<InstructionId>> {
        let InstructionRequest {
            venue_id,
            settlement_type,
            valid_from,
            legs,
        } = request;
        let invalid = |reason: String| PolyloadError::InvalidInstruction { reason };

        if legs.is_empty() {
            return Err(invalid("instruction has no legs".into()));
        }
        if legs.len() > MAX_LEGS_PER_INSTRUCTION {
            return Err(invalid(format!(
                "{} legs exceed the limit of {MAX_LEGS_PER_INSTRUCTION}",
                legs.len()
            )));
        }
        let venue = self
            .venues
            .get(&venue_id)
            .ok_or(PolyloadError::VenueNotFound(venue_id))?;
        if venue.creator != creator {
            return Err(PolyloadError::UnauthorizedVenueCreator(venue_id));
        }
        for (i, leg) in legs.iter().enumerate() {
            if leg.from == leg.to {
                return Err(invalid(format!("leg {i} sends to its own portfolio")));
            }
            if leg.amount == 0 {
                return Err(invalid(format!("leg {i} moves nothing")));
            }
            if !self.assets.contains_key(&leg.asset) {
                return Err(PolyloadError::UnknownAsset(leg.asset));
            }
            self.book.ensure_exists(&leg.from)?;
            self.book.ensure_exists(&leg.to)?;
        }
        if let SettlementType::SettleOnBlock(block) = settlement_type {
            if block <= self.block_number {
                return Err(invalid(format!(
                    "settlement block {block} is not after current block {}",
                    self.block_number
                )));
            }
        }

        let id = self.next_instruction;
        self.next_instruction = id.next();
        let instruction = Instruction::new(
            id,
            venue_id,
            creator,
            settlement_type,
            valid_from,
            legs.clone(),
        );
        if let SettlementType::SettleOnBlock(block) = settlement_type {
            self.scheduled.entry(block).or_default().push(id);
        }
        if let Some(venue) = self.venues.get_mut(&venue_id) {
            venue.instructions.push(id);
        }
        info!(
            instruction = %id,
            venue = %venue_id,
            legs = instruction.legs.len(),
            parties = instruction.affirmations.len(),
            ?settlement_type,
            "instruction created"
        );
        self.instructions.insert(id, instruction);

        let event = settlement(SettlementEvent::InstructionCreated {
            did: creator,
            venue_id,
            instruction_id: id,
            settlement_type,
            valid_from,
            legs,
        });
        Ok((id, vec![event]))
    }

    /// Create an instruction and affirm it for `portfolios` in one step.
    /// Either both happen or neither does.
    ///
    /// # Errors
    /// Any error of [`Self::add_instruction`] or [`Self::affirm_instruction`].
    pub fn add_and_affirm_instruction(
        &mut self,
        creator: IdentityId,
        request: InstructionRequest,
        portfolios: &[PortfolioId],
    ) -> Result<Emitted<InstructionId>> {
        let max_legs = u32::try_from(request.legs.len()).unwrap_or(u32::MAX);
        let (id, mut events) = self.add_instruction(creator, request)?;
        match self.affirm_instruction(creator, id, portfolios, max_legs) {
            Ok(more) => {
                events.extend(more);
                Ok((id, events))
            }
            Err(e) => {
                self.discard(id);
                Err(e)
            }
        }
    }

    /// Undo a just-created instruction that nothing has touched yet.
    fn discard(&mut self, id: InstructionId) {
        if let Some(instruction) = self.instructions.remove(&id) {
            if let Some(venue) = self.venues.get_mut(&instruction.venue_id) {
                venue.instructions.retain(|i| *i != id);
            }
            if let SettlementType::SettleOnBlock(block) = instruction.settlement_type {
                if let Some(ids) = self.scheduled.get_mut(&block) {
                    ids.retain(|i| *i != id);
                }
            }
        }
        if self.next_instruction == id.next() {
            self.next_instruction = id;
        }
    }

    /// The instruction, if it exists and is still pending.
    fn pending(&self, id: InstructionId) -> Result<&Instruction> {
        let instruction = self
            .instructions
            .get(&id)
            .ok_or(PolyloadError::InstructionNotFound(id))?;
        if instruction.status != InstructionStatus::Pending {
            return Err(PolyloadError::InstructionNotPending {
                id,
                status: instruction.status,
            });
        }
        Ok(instruction)
    }

    /// Affirm `id` for `portfolios` held by `caller`, locking the funds of
    /// every leg they send. Executes immediately once every party affirmed
    /// a `SettleOnAffirmation` instruction.
    ///
    /// # Errors
    /// - `InstructionNotFound` / `InstructionNotPending`;
    /// - `NotPermitted` before `valid_from`;
    /// - `NotParty`, `UnexpectedAffirmationStatus`, `UnauthorizedCustodian`;
    /// - `LegCountTooSmall` if `max_legs_count` does not cover the legs;
    /// - `InsufficientBalance` if the funds cannot be locked (nothing is
    ///   locked in that case).
    pub fn affirm_instruction(
        &mut self,
        caller: IdentityId,
        id: InstructionId,
        portfolios: &[PortfolioId],
        max_legs_count: u32,
    ) -> Result<Vec<ChainEvent>> {
        let portfolios = distinct(portfolios)?;
        let instruction = self.pending(id)?;
        if let Some(valid_from) = instruction.valid_from {
            if self.block_number < valid_from {
                return Err(PolyloadError::NotPermitted {
                    reason: format!("{id} is not valid before block {valid_from}"),
                });
            }
        }
        for portfolio in &portfolios {
            match instruction.affirmation(portfolio) {
                AffirmationStatus::Pending => {}
                AffirmationStatus::Unknown => {
                    return Err(PolyloadError::NotParty {
                        id,
                        portfolio: *portfolio,
                    });
                }
                status => {
                    return Err(PolyloadError::UnexpectedAffirmationStatus {
                        portfolio: *portfolio,
                        status,
                    });
                }
            }
            ensure_custody(caller, portfolio)?;
        }
        let sent = instruction.legs_sent_from(&portfolios);
        ensure_leg_count(sent.len(), max_legs_count)?;
        let locks: Vec<_> = sent
            .iter()
            .map(|&i| {
                let leg = &instruction.legs[i];
                (leg.from, leg.asset, leg.amount)
            })
            .collect();

        self.book.ensure_lockable(&locks)?;
        for (portfolio, ticker, amount) in &locks {
            self.book.lock(*portfolio, *ticker, *amount)?;
        }

        let instruction = self
            .instructions
            .get_mut(&id)
            .ok_or(PolyloadError::InstructionNotFound(id))?;
        for &i in &sent {
            instruction.leg_status[i] = LegStatus::ExecutionPending;
        }
        let mut events = Vec::with_capacity(portfolios.len() + 2);
        for portfolio in &portfolios {
            instruction
                .affirmations
                .insert(*portfolio, AffirmationStatus::Affirmed);
            events.push(settlement(SettlementEvent::InstructionAffirmed {
                did: caller,
                portfolio: *portfolio,
                instruction_id: id,
            }));
        }
        instruction.affirms_pending = instruction
            .affirms_pending
            .saturating_sub(portfolios.len() as u64);
        debug!(
            instruction = %id,
            caller = %caller,
            portfolios = portfolios.len(),
            pending = instruction.affirms_pending,
            "affirmed"
        );

        let ready = instruction.all_affirmed()
            && instruction.settlement_type == SettlementType::SettleOnAffirmation;
        if ready {
            events.extend(self.execute(id)?);
        }
        Ok(events)
    }

    /// Withdraw `caller`'s affirmations for `portfolios`, unlocking their
    /// legs' funds.
    ///
    /// # Errors
    /// - `InstructionNotFound` / `InstructionNotPending`;
    /// - `NotParty`, `UnexpectedAffirmationStatus` (not affirmed),
    ///   `UnauthorizedCustodian`, `LegCountTooSmall`.
    pub fn withdraw_affirmation(
        &mut self,
        caller: IdentityId,
        id: InstructionId,
        portfolios: &[PortfolioId],
        max_legs_count: u32,
    ) -> Result<Vec<ChainEvent>> {
        let portfolios = distinct(portfolios)?;
        let instruction = self.pending(id)?;
        for portfolio in &portfolios {
            match instruction.affirmation(portfolio) {
                AffirmationStatus::Affirmed => {}
                AffirmationStatus::Unknown => {
                    return Err(PolyloadError::NotParty {
                        id,
                        portfolio: *portfolio,
                    });
                }
                status => {
                    return Err(PolyloadError::UnexpectedAffirmationStatus {
                        portfolio: *portfolio,
                        status,
                    });
                }
            }
            ensure_custody(caller, portfolio)?;
        }
        ensure_leg_count(
            instruction.legs_sent_from(&portfolios).len(),
            max_legs_count,
        )?;

        self.release_locks(id, Some(&portfolios))?;
        let instruction = self
            .instructions
            .get_mut(&id)
            .ok_or(PolyloadError::InstructionNotFound(id))?;
        let mut events = Vec::with_capacity(portfolios.len());
        for portfolio in &portfolios {
            instruction
                .affirmations
                .insert(*portfolio, AffirmationStatus::Pending);
            events.push(settlement(SettlementEvent::AffirmationWithdrawn {
                did: caller,
                portfolio: *portfolio,
                instruction_id: id,
            }));
        }
        instruction.affirms_pending = instruction
            .affirms_pending
            .saturating_add(portfolios.len() as u64);
        debug!(instruction = %id, caller = %caller, "affirmation withdrawn");
        Ok(events)
    }

    /// Reject `id` on behalf of `portfolio`. Terminal: every lock is
    /// released and no leg moves.
    ///
    /// # Errors
    /// - `InstructionNotFound` / `InstructionNotPending`;
    /// - `NotParty`, `UnauthorizedCustodian`;
    /// - `LegCountTooSmall` if `num_of_legs` is below the instruction's
    ///   leg count.
    pub fn reject_instruction(
        &mut self,
        caller: IdentityId,
        id: InstructionId,
        portfolio: PortfolioId,
        num_of_legs: u32,
    ) -> Result<Vec<ChainEvent>> {
        let instruction = self.pending(id)?;
        if instruction.affirmation(&portfolio) == AffirmationStatus::Unknown {
            return Err(PolyloadError::NotParty { id, portfolio });
        }
        ensure_custody(caller, &portfolio)?;
        ensure_leg_count(instruction.legs.len(), num_of_legs)?;

        self.release_locks(id, None)?;
        let instruction = self
            .instructions
            .get_mut(&id)
            .ok_or(PolyloadError::InstructionNotFound(id))?;
        instruction
            .affirmations
            .insert(portfolio, AffirmationStatus::Rejected);
        instruction.finish(InstructionStatus::Rejected)?;
        info!(instruction = %id, by = %portfolio, "instruction rejected");
        Ok(vec![settlement(SettlementEvent::InstructionRejected {
            did: caller,
            instruction_id: id,
        })])
    }

    /// Advance to block `number` and execute every instruction scheduled at
    /// or before it. Scheduled instructions lacking affirmations fail.
    ///
    /// # Errors
    /// Only invariant violations; protocol failures are events.
    pub fn on_block(&mut self, number: u64) -> Result<Vec<ChainEvent>> {
        self.block_number = number;
        let later = self.scheduled.split_off(&number.saturating_add(1));
        let due = std::mem::replace(&mut self.scheduled, later);
        let mut events = Vec::new();
        for id in due.into_values().flatten() {
            let pending = self
                .instructions
                .get(&id)
                .is_some_and(|i| i.status == InstructionStatus::Pending);
            if pending {
                events.extend(self.execute(id)?);
            }
        }
        Ok(events)
    }

    // -----------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------

    /// Unlock every locked leg, or only those sent from `only`.
    fn release_locks(&mut self, id: InstructionId, only: Option<&[PortfolioId]>) -> Result<()> {
        let instruction = self
            .instructions
            .get_mut(&id)
            .ok_or(PolyloadError::InstructionNotFound(id))?;
        for (leg, status) in instruction
            .legs
            .iter()
            .zip(instruction.leg_status.iter_mut())
        {
            let selected = only.is_none_or(|ps| ps.contains(&leg.from));
            if *status == LegStatus::ExecutionPending && selected {
                self.book.unlock(leg.from, leg.asset, leg.amount)?;
                *status = LegStatus::PendingTokenLock;
            }
        }
        Ok(())
    }

    /// Index of the first leg that is not compliant or could not be paid
    /// if all legs ran in order against current available balances.
    fn first_blocked_leg(&self, legs: &[Leg]) -> Option<usize> {
        let mut scratch: HashMap<(PortfolioId, Ticker), u128> = HashMap::new();
        for (i, leg) in legs.iter().enumerate() {
            if !self.compliance.allows(leg) {
                return Some(i);
            }
            let from = scratch
                .entry((leg.from, leg.asset))
                .or_insert_with(|| self.book.balance(&leg.from, &leg.asset).available);
            if *from < leg.amount {
                return Some(i);
            }
            *from -= leg.amount;
            let to = scratch
                .entry((leg.to, leg.asset))
                .or_insert_with(|| self.book.balance(&leg.to, &leg.asset).available);
            *to = to.saturating_add(leg.amount);
        }
        None
    }

    fn execute(&mut self, id: InstructionId) -> Result<Vec<ChainEvent>> {
        self.executed.mark_executed(id)?;
        let instruction = self.pending(id)?.clone();
        let affirmed = instruction.all_affirmed();
        self.release_locks(id, None)?;

        let mut events = Vec::new();
        let target = if !affirmed {
            warn!(
                instruction = %id,
                missing = instruction.affirms_pending,
                "scheduled instruction lacks affirmations"
            );
            InstructionStatus::Failed
        } else if let Some(leg_index) = self.first_blocked_leg(&instruction.legs) {
            warn!(instruction = %id, leg_index, "leg failed execution");
            events.push(settlement(SettlementEvent::LegFailedExecution {
                did: SETTLEMENT_DID,
                instruction_id: id,
                leg_index: leg_index as u64,
            }));
            InstructionStatus::Failed
        } else {
            for leg in &instruction.legs {
                self.book.transfer(leg.from, leg.to, leg.asset, leg.amount)?;
                events.push(ChainEvent::Asset(AssetEvent::Transfer {
                    ticker: leg.asset,
                    from: leg.from,
                    to: leg.to,
                    amount: leg.amount,
                }));
            }
            let tickers: BTreeSet<Ticker> = instruction.legs.iter().map(|l| l.asset).collect();
            for ticker in &tickers {
                self.verify_supply(ticker)?;
            }
            InstructionStatus::Executed
        };

        self.instructions
            .get_mut(&id)
            .ok_or(PolyloadError::InstructionNotFound(id))?
            .finish(target)?;
        let event = if target == InstructionStatus::Executed {
            info!(instruction = %id, legs = instruction.legs.len(), "instruction executed");
            SettlementEvent::InstructionExecuted {
                did: SETTLEMENT_DID,
                instruction_id: id,
            }
        } else {
            SettlementEvent::InstructionFailed {
                did: SETTLEMENT_DID,
                instruction_id: id,
            }
        };
        events.push(settlement(event));
        Ok(events)
    }
}
