//! Call execution for the development chain.
//!
//! [`Runtime`] owns all ledger state: free balances, account nonces,
//! identities and their keys, pending authorizations, staking bonds,
//! proposals, and the [`SettlementEngine`] that holds assets, portfolios
//! and instructions.
//!
//! Every call either applies completely and returns its events, or fails
//! with a [`DispatchError`] and leaves state untouched. Validation always
//! happens before the first write.

use std::collections::HashMap;

use polyload_settlement::{InstructionRequest, SettlementEngine};
use polyload_types::constants::pallet;
use polyload_types::{
    AccountId, AssetCall, AuthorizationData, BalancesCall, BalancesEvent, Call, ChainEvent,
    ComplianceManagerCall, DispatchError, IdentityCall, IdentityEvent, IdentityId, PipsCall,
    PipsEvent, PolyloadError, PortfolioCall, PortfolioId, Result, SettlementCall, Signatory, StakingCall,
    StakingEvent, Ticker,
};
use sha2::{Digest, Sha256};
use tracing::debug;

/// An identity and the keys acting for it.
#[derive(Debug, Clone)]
pub struct DidRecord {
    pub primary_key: AccountId,
    pub secondary_keys: Vec<AccountId>,
    /// May register new identities.
    pub cdd_provider: bool,
}

#[derive(Debug, Clone)]
struct Authorization {
    from: IdentityId,
    target: Signatory,
    data: AuthorizationData,
    expiry: Option<u64>,
}

#[derive(Debug, Clone)]
struct Proposal {
    deposit: u128,
    ayes: u128,
    nays: u128,
}

/// Ledger state and call dispatch.
#[derive(Debug, Default)]
pub struct Runtime {
    balances: HashMap<AccountId, u128>,
    /// Bonded or deposited funds, not spendable.
    reserved: HashMap<AccountId, u128>,
    nonces: HashMap<AccountId, u64>,
    key_to_did: HashMap<AccountId, IdentityId>,
    dids: HashMap<IdentityId, DidRecord>,
    authorizations: HashMap<u64, Authorization>,
    next_auth_id: u64,
    bonds: HashMap<AccountId, AccountId>,
    nominations: HashMap<AccountId, Vec<AccountId>>,
    proposals: Vec<Proposal>,
    settlement: SettlementEngine,
    /// Timestamp of the block being built, in milliseconds.
    now_ms: u64,
}

/// Deterministic identity id for the `index`-th registration of `account`.
#[must_use]
pub fn derive_did(account: &AccountId, index: u64) -> IdentityId {
    let mut hasher = Sha256::new();
    hasher.update(b"polyload/did");
    hasher.update(account.as_bytes());
    hasher.update(index.to_le_bytes());
    IdentityId(hasher.finalize().into())
}

fn not_permitted(reason: impl Into<String>) -> PolyloadError {
    PolyloadError::NotPermitted {
        reason: reason.into(),
    }
}

/// Error index and name reported for `err` raised by a pallet.
fn error_name(err: &PolyloadError) -> Option<(u8, &'static str)> {
    let entry = match err {
        PolyloadError::VenueNotFound(_) => (0, "InvalidVenue"),
        PolyloadError::UnauthorizedVenueCreator(_) => (1, "UnauthorizedVenue"),
        PolyloadError::InstructionNotFound(_) => (2, "UnknownInstruction"),
        PolyloadError::InvalidInstruction { .. } => (3, "InvalidInstruction"),
        PolyloadError::InstructionNotPending { .. } => (4, "InstructionNotPending"),
        PolyloadError::UnauthorizedCustodian(_) => (5, "UnauthorizedCustodian"),
        PolyloadError::NotParty { .. } => (6, "CallerIsNotAParty"),
        PolyloadError::UnexpectedAffirmationStatus { .. } => (7, "UnexpectedAffirmationStatus"),
        PolyloadError::LegCountTooSmall { .. } => (8, "LegCountTooSmall"),
        PolyloadError::InsufficientBalance { .. } => (9, "FailedToLockTokens"),
        PolyloadError::InstructionAlreadyExecuted(_) => (10, "InstructionAlreadyExecuted"),
        PolyloadError::SupplyInvariantViolation { .. } => (11, "SupplyInvariantViolation"),
        PolyloadError::UnknownAsset(_) => (12, "NoSuchAsset"),
        PolyloadError::TickerTaken(_) => (13, "TickerAlreadyRegistered"),
        PolyloadError::MissingIdentity(_) => (14, "MissingIdentity"),
        PolyloadError::InsufficientFunds { .. } => (15, "InsufficientBalance"),
        PolyloadError::NotPermitted { .. } => (16, "Unauthorized"),
        PolyloadError::PortfolioNotFound(_) => (17, "PortfolioDoesNotExist"),
        _ => return None,
    };
    Some(entry)
}

/// The portfolio pallet numbers its errors on its own.
fn portfolio_error_name(err: &PolyloadError) -> Option<(u8, &'static str)> {
    let entry = match err {
        PolyloadError::PortfolioNotFound(_) => (0, "PortfolioDoesNotExist"),
        PolyloadError::InsufficientBalance { .. } => (1, "InsufficientPortfolioBalance"),
        PolyloadError::SamePortfolio(_) => (2, "DestinationIsSamePortfolio"),
        PolyloadError::PortfolioNameTaken { .. } => (3, "PortfolioNameAlreadyInUse"),
        PolyloadError::UnauthorizedCustodian(_) => (4, "UnauthorizedCustodian"),
        PolyloadError::MissingIdentity(_) => (5, "MissingIdentity"),
        _ => return None,
    };
    Some(entry)
}

/// Map an error raised while executing `call` onto what the node reports.
#[must_use]
pub fn dispatch_error(call: &Call, err: &PolyloadError) -> DispatchError {
    let index = match call {
        Call::Timestamp(_) => pallet::TIMESTAMP,
        Call::Balances(_) => pallet::BALANCES,
        Call::Identity(_) => pallet::IDENTITY,
        Call::Staking(_) => pallet::STAKING,
        Call::Pips(_) => pallet::PIPS,
        Call::Asset(_) => pallet::ASSET,
        Call::Portfolio(_) => pallet::PORTFOLIO,
        Call::ComplianceManager(_) => pallet::COMPLIANCE_MANAGER,
        Call::Settlement(_) => pallet::SETTLEMENT,
    };
    let named = match call {
        Call::Portfolio(_) => portfolio_error_name(err),
        _ => error_name(err),
    };
    match named {
        Some((error, name)) => DispatchError::module(index, error, call.section(), name),
        None => DispatchError::Other(err.to_string()),
    }
}

impl Runtime {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_auth_id: 1,
            ..Self::default()
        }
    }

    // -----------------------------------------------------------------
    // Genesis and block hooks
    // -----------------------------------------------------------------

    /// Give `account` `amount` free balance.
    pub fn endow(&mut self, account: AccountId, amount: u128) {
        let balance = self.balances.entry(account).or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    /// Register `account` as the primary key of a new CDD-provider identity.
    pub fn register_cdd_provider(&mut self, account: AccountId) -> IdentityId {
        if let Some(did) = self.key_to_did.get(&account) {
            return *did;
        }
        let did = self.new_did(account, true);
        debug!(%did, %account, "genesis identity");
        did
    }

    fn new_did(&mut self, account: AccountId, cdd_provider: bool) -> IdentityId {
        let did = derive_did(&account, self.dids.len() as u64);
        self.dids.insert(
            did,
            DidRecord {
                primary_key: account,
                secondary_keys: Vec::new(),
                cdd_provider,
            },
        );
        self.key_to_did.insert(account, did);
        did
    }

    /// Start block `number`: run scheduled settlements.
    pub fn on_initialize(&mut self, number: u64, now_ms: u64) -> Result<Vec<ChainEvent>> {
        self.now_ms = now_ms;
        self.settlement.on_block(number)
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    #[must_use]
    pub fn nonce(&self, account: &AccountId) -> u64 {
        self.nonces.get(account).copied().unwrap_or(0)
    }

    /// Consume `account`'s current nonce.
    pub fn bump_nonce(&mut self, account: AccountId) {
        let nonce = self.nonces.entry(account).or_insert(0);
        *nonce = nonce.saturating_add(1);
    }

    #[must_use]
    pub fn free_balance(&self, account: &AccountId) -> u128 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn reserved_balance(&self, account: &AccountId) -> u128 {
        self.reserved.get(account).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn identity_of(&self, account: &AccountId) -> Option<IdentityId> {
        self.key_to_did.get(account).copied()
    }

    #[must_use]
    pub fn did_record(&self, did: &IdentityId) -> Option<&DidRecord> {
        self.dids.get(did)
    }

    #[must_use]
    pub fn settlement(&self) -> &SettlementEngine {
        &self.settlement
    }

    /// Asset balance (available plus locked) of `portfolio`.
    #[must_use]
    pub fn asset_balance(&self, portfolio: &PortfolioId, ticker: &Ticker) -> u128 {
        self.settlement.balance(portfolio, ticker).total()
    }

    // -----------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------

    /// Apply `call` signed by `signer`.
    ///
    /// # Errors
    /// The dispatch error the node would report in `System.ExtrinsicFailed`.
    pub fn dispatch(
        &mut self,
        signer: AccountId,
        call: &Call,
    ) -> std::result::Result<Vec<ChainEvent>, DispatchError> {
        let result = match call {
            Call::Timestamp(_) => return Err(DispatchError::BadOrigin),
            Call::Balances(BalancesCall::Transfer { dest, value }) => {
                self.transfer(signer, *dest, *value)
            }
            Call::Identity(c) => self.identity(signer, c),
            Call::Asset(c) => self.asset(signer, c),
            Call::Portfolio(c) => self.portfolio(signer, c),
            Call::ComplianceManager(c) => self.compliance(signer, c),
            Call::Settlement(c) => self.settle(signer, c),
            Call::Staking(c) => self.staking(signer, c),
            Call::Pips(c) => self.pips(signer, c),
        };
        result.map_err(|e| dispatch_error(call, &e))
    }

    fn did_of(&self, account: AccountId) -> Result<IdentityId> {
        self.identity_of(&account)
            .ok_or(PolyloadError::MissingIdentity(account))
    }

    fn ensure_free(&self, account: AccountId, needed: u128) -> Result<()> {
        let available = self.free_balance(&account);
        if available < needed {
            return Err(PolyloadError::InsufficientFunds {
                account,
                needed,
                available,
            });
        }
        Ok(())
    }

    fn reserve(&mut self, account: AccountId, amount: u128) -> Result<()> {
        self.ensure_free(account, amount)?;
        if let Some(free) = self.balances.get_mut(&account) {
            *free -= amount;
        }
        let reserved = self.reserved.entry(account).or_insert(0);
        *reserved = reserved.saturating_add(amount);
        Ok(())
    }

    fn transfer(&mut self, from: AccountId, to: AccountId, value: u128) -> Result<Vec<ChainEvent>> {
        self.ensure_free(from, value)?;
        if from != to {
            if let Some(free) = self.balances.get_mut(&from) {
                *free -= value;
            }
            self.endow(to, value);
        }
        Ok(vec![ChainEvent::Balances(BalancesEvent::Transfer {
            from,
            to,
            amount: value,
        })])
    }

    fn identity(&mut self, signer: AccountId, call: &IdentityCall) -> Result<Vec<ChainEvent>> {
        match call {
            IdentityCall::CddRegisterDid {
                target,
                secondary_keys,
            } => {
                let provider = self.did_of(signer)?;
                if !self.dids.get(&provider).is_some_and(|r| r.cdd_provider) {
                    return Err(not_permitted(format!("{provider} is not a CDD provider")));
                }
                if let Some(key) = std::iter::once(target)
                    .chain(secondary_keys)
                    .find(|k| self.key_to_did.contains_key(*k))
                {
                    return Err(not_permitted(format!("{key} is already linked to an identity")));
                }
                let did = self.new_did(*target, false);
                for key in secondary_keys {
                    self.key_to_did.insert(*key, did);
                }
                if let Some(record) = self.dids.get_mut(&did) {
                    record.secondary_keys.clone_from(secondary_keys);
                }
                Ok(vec![ChainEvent::Identity(IdentityEvent::DidCreated {
                    did,
                    account: *target,
                })])
            }
            IdentityCall::AddAuthorization {
                target,
                data,
                expiry,
            } => {
                let from = self.did_of(signer)?;
                let auth_id = self.next_auth_id;
                self.next_auth_id = auth_id.saturating_add(1);
                self.authorizations.insert(
                    auth_id,
                    Authorization {
                        from,
                        target: target.clone(),
                        data: data.clone(),
                        expiry: *expiry,
                    },
                );
                Ok(vec![ChainEvent::Identity(IdentityEvent::AuthorizationAdded {
                    from,
                    target: target.clone(),
                    auth_id,
                    data: data.clone(),
                })])
            }
            IdentityCall::JoinIdentityAsKey { auth_id } => {
                let auth = self
                    .authorizations
                    .get(auth_id)
                    .ok_or_else(|| not_permitted(format!("authorization {auth_id} does not exist")))?;
                if auth.target != Signatory::Account(signer) {
                    return Err(not_permitted(format!("authorization {auth_id} is not for {signer}")));
                }
                if auth.data != AuthorizationData::JoinIdentity {
                    return Err(not_permitted(format!("authorization {auth_id} does not grant joining")));
                }
                if auth.expiry.is_some_and(|t| t < self.now_ms) {
                    return Err(not_permitted(format!("authorization {auth_id} expired")));
                }
                if self.key_to_did.contains_key(&signer) {
                    return Err(not_permitted(format!("{signer} is already linked to an identity")));
                }
                let did = auth.from;
                self.authorizations.remove(auth_id);
                self.key_to_did.insert(signer, did);
                if let Some(record) = self.dids.get_mut(&did) {
                    record.secondary_keys.push(signer);
                }
                Ok(vec![ChainEvent::Identity(IdentityEvent::SecondaryKeyJoined {
                    did,
                    account: signer,
                })])
            }
            IdentityCall::AddClaim {
                target,
                claim,
                expiry,
            } => {
                self.did_of(signer)?;
                if !self.dids.contains_key(target) {
                    return Err(not_permitted(format!("{target} is not a registered identity")));
                }
                if expiry.is_some_and(|t| t < self.now_ms) {
                    return Err(not_permitted("claim already expired"));
                }
                self.settlement.record_claim(*target, *claim);
                Ok(vec![ChainEvent::Identity(IdentityEvent::ClaimAdded {
                    target: *target,
                    claim: *claim,
                })])
            }
        }
    }

    fn asset(&mut self, signer: AccountId, call: &AssetCall) -> Result<Vec<ChainEvent>> {
        let did = self.did_of(signer)?;
        match call {
            AssetCall::CreateAsset {
                name,
                ticker,
                divisible,
            } => self.settlement.create_asset(did, name, *ticker, *divisible),
            AssetCall::Issue { ticker, amount } => self.settlement.issue(did, *ticker, *amount),
        }
    }

    fn portfolio(&mut self, signer: AccountId, call: &PortfolioCall) -> Result<Vec<ChainEvent>> {
        let did = self.did_of(signer)?;
        match call {
            PortfolioCall::CreatePortfolio { name } => {
                Ok(self.settlement.create_portfolio(did, name)?.1)
            }
            PortfolioCall::MovePortfolioFunds {
                from,
                to,
                ticker,
                amount,
            } => self
                .settlement
                .move_portfolio_funds(did, *from, *to, *ticker, *amount),
        }
    }

    fn compliance(
        &mut self,
        signer: AccountId,
        call: &ComplianceManagerCall,
    ) -> Result<Vec<ChainEvent>> {
        let did = self.did_of(signer)?;
        let ComplianceManagerCall::AddComplianceRequirement {
            ticker,
            sender_conditions,
            receiver_conditions,
        } = call;
        let (_, events) = self.settlement.add_compliance_requirement(
            did,
            *ticker,
            sender_conditions.clone(),
            receiver_conditions.clone(),
        )?;
        Ok(events)
    }

    fn settle(&mut self, signer: AccountId, call: &SettlementCall) -> Result<Vec<ChainEvent>> {
        let did = self.did_of(signer)?;
        let engine = &mut self.settlement;
        match call {
            SettlementCall::CreateVenue {
                details,
                venue_type,
                ..
            } => Ok(engine.create_venue(did, details, *venue_type).1),
            SettlementCall::AddInstruction {
                venue_id,
                settlement_type,
                valid_from,
                legs,
            } => {
                let request = InstructionRequest {
                    venue_id: *venue_id,
                    settlement_type: *settlement_type,
                    valid_from: *valid_from,
                    legs: legs.clone(),
                };
                Ok(engine.add_instruction(did, request)?.1)
            }
            SettlementCall::AddAndAffirmInstruction {
                venue_id,
                settlement_type,
                valid_from,
                legs,
                portfolios,
            } => {
                let request = InstructionRequest {
                    venue_id: *venue_id,
                    settlement_type: *settlement_type,
                    valid_from: *valid_from,
                    legs: legs.clone(),
                };
                Ok(engine.add_and_affirm_instruction(did, request, portfolios)?.1)
            }
            SettlementCall::AffirmInstruction {
                instruction_id,
                portfolios,
                max_legs_count,
            } => engine.affirm_instruction(did, *instruction_id, portfolios, *max_legs_count),
            SettlementCall::WithdrawAffirmation {
                instruction_id,
                portfolios,
                max_legs_count,
            } => engine.withdraw_affirmation(did, *instruction_id, portfolios, *max_legs_count),
            SettlementCall::RejectInstruction {
                instruction_id,
                portfolio,
                num_of_legs,
            } => engine.reject_instruction(did, *instruction_id, *portfolio, *num_of_legs),
        }
    }

    fn staking(&mut self, signer: AccountId, call: &StakingCall) -> Result<Vec<ChainEvent>> {
        match call {
            StakingCall::Bond {
                controller, value, ..
            } => {
                if self.bonds.contains_key(&signer) {
                    return Err(not_permitted(format!("{signer} is already bonded")));
                }
                self.reserve(signer, *value)?;
                self.bonds.insert(signer, *controller);
                Ok(vec![ChainEvent::Staking(StakingEvent::Bonded {
                    stash: signer,
                    amount: *value,
                })])
            }
            StakingCall::Nominate { targets } => {
                if !self.bonds.contains_key(&signer) {
                    return Err(not_permitted(format!("{signer} is not bonded")));
                }
                if targets.is_empty() {
                    return Err(not_permitted("no nomination targets"));
                }
                self.nominations.insert(signer, targets.clone());
                Ok(vec![ChainEvent::Staking(StakingEvent::Nominated {
                    stash: signer,
                    targets: targets.clone(),
                })])
            }
        }
    }

    fn pips(&mut self, signer: AccountId, call: &PipsCall) -> Result<Vec<ChainEvent>> {
        match call {
            PipsCall::Propose { deposit, .. } => {
                self.reserve(signer, *deposit)?;
                let id = u32::try_from(self.proposals.len())
                    .map_err(|_| not_permitted("too many proposals"))?;
                self.proposals.push(Proposal {
                    deposit: *deposit,
                    ayes: *deposit,
                    nays: 0,
                });
                Ok(vec![ChainEvent::Pips(PipsEvent::ProposalCreated {
                    proposer: signer,
                    id,
                    deposit: *deposit,
                })])
            }
            PipsCall::Vote { id, aye, deposit } => {
                let index = *id as usize;
                if index >= self.proposals.len() {
                    return Err(not_permitted(format!("proposal {id} does not exist")));
                }
                self.reserve(signer, *deposit)?;
                let proposal = &mut self.proposals[index];
                if *aye {
                    proposal.ayes = proposal.ayes.saturating_add(*deposit);
                } else {
                    proposal.nays = proposal.nays.saturating_add(*deposit);
                }
                debug!(
                    proposal = id,
                    deposit = proposal.deposit,
                    ayes = proposal.ayes,
                    nays = proposal.nays,
                    "vote recorded"
                );
                Ok(vec![ChainEvent::Pips(PipsEvent::Voted {
                    voter: signer,
                    id: *id,
                    aye: *aye,
                    deposit: *deposit,
                })])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use polyload_types::{Claim, EventKind, Scope, SettlementType, VenueId, VenueType};

    use super::*;

    fn acct(b: u8) -> AccountId {
        AccountId([b; 32])
    }

    fn kinds(events: &[ChainEvent]) -> Vec<EventKind> {
        events.iter().map(ChainEvent::kind).collect()
    }

    fn with_provider() -> Runtime {
        let mut rt = Runtime::new();
        rt.register_cdd_provider(acct(1));
        rt.endow(acct(1), 1_000);
        rt
    }

    fn register(rt: &mut Runtime, who: AccountId) -> IdentityId {
        let events = rt
            .dispatch(
                acct(1),
                &Call::Identity(IdentityCall::CddRegisterDid {
                    target: who,
                    secondary_keys: vec![],
                }),
            )
            .unwrap();
        match &events[0] {
            ChainEvent::Identity(IdentityEvent::DidCreated { did, .. }) => *did,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn transfer_moves_free_balance() {
        let mut rt = with_provider();
        let events = rt.dispatch(acct(1), &Call::transfer(acct(2), 400)).unwrap();
        assert_eq!(kinds(&events), vec![EventKind::BalancesTransfer]);
        assert_eq!(rt.free_balance(&acct(1)), 600);
        assert_eq!(rt.free_balance(&acct(2)), 400);

        let err = rt.dispatch(acct(2), &Call::transfer(acct(1), 401)).unwrap_err();
        assert_eq!(err.module_name(), Some(("balances", "InsufficientBalance")));
        assert_eq!(rt.free_balance(&acct(2)), 400);
    }

    #[test]
    fn only_cdd_providers_register_identities() {
        let mut rt = with_provider();
        let did = register(&mut rt, acct(2));
        assert_eq!(rt.identity_of(&acct(2)), Some(did));

        let err = rt
            .dispatch(
                acct(2),
                &Call::Identity(IdentityCall::CddRegisterDid {
                    target: acct(3),
                    secondary_keys: vec![],
                }),
            )
            .unwrap_err();
        assert_eq!(err.module_name(), Some(("identity", "Unauthorized")));

        let err = rt
            .dispatch(
                acct(1),
                &Call::Identity(IdentityCall::CddRegisterDid {
                    target: acct(2),
                    secondary_keys: vec![],
                }),
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::Module(_)));
    }

    #[test]
    fn key_joins_identity_through_authorization() {
        let mut rt = with_provider();
        let did = register(&mut rt, acct(2));
        let events = rt
            .dispatch(
                acct(2),
                &Call::Identity(IdentityCall::AddAuthorization {
                    target: Signatory::Account(acct(3)),
                    data: AuthorizationData::JoinIdentity,
                    expiry: None,
                }),
            )
            .unwrap();
        let auth_id = match &events[0] {
            ChainEvent::Identity(IdentityEvent::AuthorizationAdded { auth_id, .. }) => *auth_id,
            other => panic!("unexpected {other:?}"),
        };

        let err = rt
            .dispatch(acct(4), &Call::Identity(IdentityCall::JoinIdentityAsKey { auth_id }))
            .unwrap_err();
        assert_eq!(err.module_name(), Some(("identity", "Unauthorized")));

        rt.dispatch(acct(3), &Call::Identity(IdentityCall::JoinIdentityAsKey { auth_id }))
            .unwrap();
        assert_eq!(rt.identity_of(&acct(3)), Some(did));
        assert_eq!(rt.did_record(&did).unwrap().secondary_keys, vec![acct(3)]);
    }

    #[test]
    fn settlement_requires_an_identity() {
        let mut rt = with_provider();
        let err = rt
            .dispatch(acct(9), &Call::create_venue("v", VenueType::Other))
            .unwrap_err();
        assert_eq!(err.module_name(), Some(("settlement", "MissingIdentity")));
    }

    #[test]
    fn asset_flow_through_dispatch() {
        let mut rt = with_provider();
        let alice = register(&mut rt, acct(2));
        let bob = register(&mut rt, acct(3));
        let ticker = Ticker::new("ACME").unwrap();
        rt.dispatch(
            acct(2),
            &Call::Asset(AssetCall::CreateAsset {
                name: "Acme".into(),
                ticker,
                divisible: true,
            }),
        )
        .unwrap();
        rt.dispatch(acct(2), &Call::Asset(AssetCall::Issue { ticker, amount: 1_000 }))
            .unwrap();
        rt.dispatch(acct(2), &Call::create_venue("v", VenueType::Other))
            .unwrap();
        let legs = vec![polyload_types::Leg::new(
            PortfolioId::default_of(alice),
            PortfolioId::default_of(bob),
            ticker,
            100,
        )];
        let events = rt
            .dispatch(
                acct(2),
                &Call::Settlement(SettlementCall::AddAndAffirmInstruction {
                    venue_id: VenueId(1),
                    settlement_type: SettlementType::SettleOnAffirmation,
                    valid_from: None,
                    legs,
                    portfolios: vec![PortfolioId::default_of(alice)],
                }),
            )
            .unwrap();
        assert_eq!(
            kinds(&events),
            vec![EventKind::InstructionCreated, EventKind::InstructionAffirmed]
        );
        let err = rt
            .dispatch(
                acct(3),
                &Call::Settlement(SettlementCall::RejectInstruction {
                    instruction_id: polyload_types::InstructionId(1),
                    portfolio: PortfolioId::default_of(alice),
                    num_of_legs: 1,
                }),
            )
            .unwrap_err();
        assert_eq!(err.module_name(), Some(("settlement", "UnauthorizedCustodian")));
        assert_eq!(
            err,
            DispatchError::module(pallet::SETTLEMENT, 5, "settlement", "UnauthorizedCustodian")
        );
    }

    #[test]
    fn portfolio_calls_through_dispatch() {
        let mut rt = with_provider();
        let alice = register(&mut rt, acct(2));
        let ticker = Ticker::new("ACME").unwrap();
        rt.dispatch(
            acct(2),
            &Call::Asset(AssetCall::CreateAsset {
                name: "Acme".into(),
                ticker,
                divisible: true,
            }),
        )
        .unwrap();
        rt.dispatch(acct(2), &Call::Asset(AssetCall::Issue { ticker, amount: 100 }))
            .unwrap();

        let events = rt.dispatch(acct(2), &Call::create_portfolio("cold")).unwrap();
        assert!(matches!(
            &events[..],
            [ChainEvent::Portfolio(polyload_types::PortfolioEvent::PortfolioCreated { number: 1, .. })]
        ));
        let err = rt.dispatch(acct(2), &Call::create_portfolio("cold")).unwrap_err();
        assert_eq!(err.module_name(), Some(("portfolio", "PortfolioNameAlreadyInUse")));

        let default = PortfolioId::default_of(alice);
        let cold = PortfolioId::user(alice, 1);
        let err = rt
            .dispatch(acct(2), &Call::move_portfolio_funds(default, cold, ticker, 101))
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::module(pallet::PORTFOLIO, 1, "portfolio", "InsufficientPortfolioBalance")
        );
        let err = rt
            .dispatch(
                acct(2),
                &Call::move_portfolio_funds(default, PortfolioId::user(alice, 2), ticker, 1),
            )
            .unwrap_err();
        assert_eq!(err.module_name(), Some(("portfolio", "PortfolioDoesNotExist")));

        let events = rt
            .dispatch(acct(2), &Call::move_portfolio_funds(default, cold, ticker, 60))
            .unwrap();
        assert_eq!(kinds(&events), vec![EventKind::MovedBetweenPortfolios]);
        assert_eq!(rt.asset_balance(&default, &ticker), 40);
        assert_eq!(rt.asset_balance(&cold, &ticker), 60);
    }

    #[test]
    fn claims_feed_compliance() {
        let mut rt = with_provider();
        let bob = register(&mut rt, acct(3));
        let claim = Claim::Accredited(Scope::Identity(bob));
        let events = rt
            .dispatch(
                acct(1),
                &Call::Identity(IdentityCall::AddClaim {
                    target: bob,
                    claim,
                    expiry: None,
                }),
            )
            .unwrap();
        assert_eq!(kinds(&events), vec![EventKind::ClaimAdded]);
    }

    #[test]
    fn staking_and_pips_reserve_funds() {
        let mut rt = with_provider();
        rt.dispatch(
            acct(1),
            &Call::Staking(StakingCall::Bond {
                controller: acct(1),
                value: 300,
                payee: polyload_types::RewardDestination::Staked,
            }),
        )
        .unwrap();
        assert_eq!(rt.free_balance(&acct(1)), 700);
        assert_eq!(rt.reserved_balance(&acct(1)), 300);
        let events = rt
            .dispatch(
                acct(1),
                &Call::Staking(StakingCall::Nominate {
                    targets: vec![acct(5)],
                }),
            )
            .unwrap();
        assert_eq!(kinds(&events), vec![EventKind::Nominated]);

        let events = rt
            .dispatch(
                acct(1),
                &Call::Pips(PipsCall::Propose {
                    proposal: Box::new(Call::transfer(acct(2), 1)),
                    deposit: 100,
                    url: None,
                }),
            )
            .unwrap();
        assert_eq!(kinds(&events), vec![EventKind::ProposalCreated]);
        let err = rt
            .dispatch(
                acct(1),
                &Call::Pips(PipsCall::Vote {
                    id: 0,
                    aye: true,
                    deposit: 601,
                }),
            )
            .unwrap_err();
        assert_eq!(err.module_name(), Some(("pips", "InsufficientBalance")));
    }

    #[test]
    fn signed_timestamp_is_bad_origin() {
        let mut rt = with_provider();
        assert_eq!(
            rt.dispatch(acct(1), &Call::timestamp(1)).unwrap_err(),
            DispatchError::BadOrigin
        );
    }
}
