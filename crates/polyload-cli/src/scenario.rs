//! # Scenario drivers
//!
//! Each scenario builds its own keys from development URIs, registers and
//! funds them through the CDD key `//Alice`, then runs its protocol steps.
//! Every operation is counted in the [`RunReport`]; a failed operation only
//! removes the work that depends on it, while a failed setup step aborts the
//! scenario with an error.
//!
//! | Scenario | Steps |
//! |---|---|
//! | transfer | fund `n` accounts |
//! | onboard | register identities, join signing keys, fund, add claims |
//! | settle | round trip Alice → Bob, then an instruction Charlie rejects |
//! | settle-group | one instruction across five parties and two assets |
//!
//! In fast mode, bulk steps broadcast without watching and wait on the
//! chain with a drain barrier instead.

use std::sync::Arc;

use futures_util::future::join_all;
use polyload_rpc::ChainApi;
use polyload_settlement::{InstructionOutcome, InstructionRequest, SettlementClient};
use polyload_submit::{ChainSyncWatcher, Signer, TransactionSubmitter};
use polyload_types::{
    AccountId, AssetCall, AuthorizationData, Call, ChainEvent, Claim, ClientConfig, IdentityCall,
    IdentityEvent, IdentityId, InstructionId, Leg, PolyloadError, PortfolioId, Result, Scope,
    SettlementType, Signatory, Ticker, Transaction, VenueType, constants,
};
use tokio::sync::Mutex;
use tracing::info;

use crate::args::Command;
use crate::report::RunReport;

/// URI of the key that registers identities and funds everyone.
pub const CDD_URI: &str = "//Alice";

/// Supply issued for every scenario asset.
pub const ISSUED: u128 = 1_000_000;

/// Amount moved by each settlement leg.
pub const LEG_AMOUNT: u128 = 100;

/// A key with a registered identity.
#[derive(Debug, Clone)]
pub struct Party {
    pub signer: Signer,
    pub did: IdentityId,
}

impl Party {
    #[must_use]
    pub fn portfolio(&self) -> PortfolioId {
        PortfolioId::default_of(self.did)
    }
}

/// What a settlement scenario set up and how its instructions ended.
#[derive(Debug, Clone)]
pub struct SettlementRun {
    pub parties: Vec<Party>,
    pub tickers: Vec<Ticker>,
    pub outcomes: Vec<(InstructionId, InstructionOutcome)>,
}

#[derive(Debug, Clone, Default)]
pub struct OnboardRun {
    pub identities: Vec<IdentityId>,
    pub joined_keys: usize,
    pub claims: usize,
}

fn did_created(tx: &Transaction) -> Option<IdentityId> {
    tx.events.iter().find_map(|e| match e {
        ChainEvent::Identity(IdentityEvent::DidCreated { did, .. }) => Some(*did),
        _ => None,
    })
}

fn authorization_added(tx: &Transaction) -> Option<u64> {
    tx.events.iter().find_map(|e| match e {
        ChainEvent::Identity(IdentityEvent::AuthorizationAdded { auth_id, .. }) => Some(*auth_id),
        _ => None,
    })
}

fn register(target: AccountId) -> Call {
    Call::Identity(IdentityCall::CddRegisterDid {
        target,
        secondary_keys: Vec::new(),
    })
}

pub struct Scenario {
    submitter: Arc<TransactionSubmitter>,
    settlement: SettlementClient,
    watcher: Mutex<ChainSyncWatcher>,
    fast: bool,
    prepend: String,
    cdd: Signer,
}

impl Scenario {
    #[must_use]
    pub fn new(chain: Arc<dyn ChainApi>, config: &ClientConfig, prepend: &str) -> Self {
        let submitter = Arc::new(TransactionSubmitter::new(
            Arc::clone(&chain),
            config.confirmation,
        ));
        Self {
            settlement: SettlementClient::new(Arc::clone(&submitter)),
            submitter,
            watcher: Mutex::new(ChainSyncWatcher::new(chain, config.drain.clone())),
            fast: config.fast,
            prepend: prepend.to_string(),
            cdd: Signer::dev(CDD_URI),
        }
    }

    #[must_use]
    pub fn submitter(&self) -> &Arc<TransactionSubmitter> {
        &self.submitter
    }

    #[must_use]
    pub fn settlement(&self) -> &SettlementClient {
        &self.settlement
    }

    fn uri(&self, name: &str) -> String {
        format!("//{}{name}", self.prepend)
    }

    fn ticker(&self, n: usize) -> Result<Ticker> {
        Ticker::new(&format!("TOKEN{}{n}", self.prepend))
    }

    /// Run `command`. Setup failures are counted under `aborted` rather
    /// than returned, so the report always covers what did run.
    pub async fn execute(&self, command: &Command, report: &mut RunReport) {
        let result = match command {
            Command::Transfer { accounts, amount } => {
                self.transfer(*accounts, *amount, report).await.map(drop)
            }
            Command::Onboard { accounts, claims } => {
                self.onboard(*accounts, *claims, report).await.map(drop)
            }
            Command::Settle => self.settle(report).await.map(drop),
            Command::SettleGroup => self.settle_group(report).await.map(drop),
        };
        if let Err(e) = result {
            report.error("aborted", &e);
        }
        report.set_submissions(self.submitter.stats().snapshot());
    }

    /// Submit and track every request concurrently.
    async fn tracked(
        &self,
        step: &str,
        requests: &[(Signer, Call)],
        report: &mut RunReport,
    ) -> Vec<Option<Transaction>> {
        if requests.is_empty() {
            return Vec::new();
        }
        info!(step, count = requests.len(), "submitting");
        self.submitter
            .submit_all(requests)
            .await
            .into_iter()
            .map(|r| report.keep(step, r))
            .collect()
    }

    /// Bulk work whose results nothing depends on. Tracked normally; in
    /// fast mode broadcast detached, then wait for the chain to drain.
    async fn broadcast(
        &self,
        step: &str,
        requests: &[(Signer, Call)],
        report: &mut RunReport,
    ) -> Result<()> {
        if !self.fast {
            self.tracked(step, requests, report).await;
            return Ok(());
        }
        if requests.is_empty() {
            return Ok(());
        }
        let mut watcher = self.watcher.lock().await;
        if let Err(e) = watcher.anchor().await {
            report.error("drain", &e);
            return Err(e);
        }

        info!(step, count = requests.len(), "broadcasting detached");
        let sent = join_all(
            requests
                .iter()
                .map(|(signer, call)| self.submitter.submit_detached(signer, call.clone())),
        )
        .await;
        let accepted = sent
            .into_iter()
            .filter_map(|r| report.keep(step, r))
            .count();
        if accepted == 0 {
            return Ok(());
        }
        let drained = report.record("drain", watcher.wait_for_drain().await)?;
        report.add_blocks(&drained);
        Ok(())
    }

    /// Fund `accounts` generated accounts with `amount` each.
    pub async fn transfer(
        &self,
        accounts: usize,
        amount: u128,
        report: &mut RunReport,
    ) -> Result<Vec<AccountId>> {
        let targets: Vec<AccountId> = Signer::dev_batch(&format!("{}user", self.prepend), accounts)
            .iter()
            .map(Signer::account)
            .collect();
        let requests: Vec<_> = targets
            .iter()
            .map(|to| (self.cdd.clone(), Call::transfer(*to, amount)))
            .collect();
        self.broadcast("transfer", &requests, report).await?;
        Ok(targets)
    }

    /// Register `names` as identities, then top them up.
    async fn parties(
        &self,
        scenario: &str,
        names: &[&str],
        report: &mut RunReport,
    ) -> Result<Vec<Party>> {
        let signers: Vec<Signer> = names
            .iter()
            .map(|n| Signer::dev(&self.uri(&format!("{scenario}_{n}"))))
            .collect();
        let registrations: Vec<_> = signers
            .iter()
            .map(|s| (self.cdd.clone(), register(s.account())))
            .collect();
        let txs = self.tracked("create identities", &registrations, report).await;
        let parties = signers
            .into_iter()
            .zip(txs)
            .map(|(signer, tx)| -> Result<Party> {
                let did = tx
                    .as_ref()
                    .and_then(did_created)
                    .ok_or_else(|| PolyloadError::MissingIdentity(signer.account()))?;
                info!(party = signer.name(), %did, "identity ready");
                Ok(Party { signer, did })
            })
            .collect::<Result<Vec<_>>>()?;

        let top_ups: Vec<_> = parties
            .iter()
            .map(|p| {
                (
                    self.cdd.clone(),
                    Call::transfer(p.signer.account(), constants::DEFAULT_IDENTITY_TOP_UP),
                )
            })
            .collect();
        self.broadcast("fund parties", &top_ups, report).await?;
        Ok(parties)
    }

    /// Create ticker number `n` owned by `owner` and issue [`ISSUED`].
    async fn asset(&self, owner: &Party, n: usize, report: &mut RunReport) -> Result<Ticker> {
        let ticker = report.record("create asset", self.ticker(n))?;
        let create = AssetCall::CreateAsset {
            name: format!("polyload asset {n}"),
            ticker,
            divisible: true,
        };
        report.record(
            "create asset",
            self.submitter.submit(&owner.signer, Call::Asset(create)).await,
        )?;
        let issue = AssetCall::Issue {
            ticker,
            amount: ISSUED,
        };
        report.record(
            "issue",
            self.submitter.submit(&owner.signer, Call::Asset(issue)).await,
        )?;
        Ok(ticker)
    }

    /// Identities with a joined signing key each, and `claims` claims on
    /// every identity from a dedicated issuer identity.
    pub async fn onboard(
        &self,
        accounts: usize,
        claims: usize,
        report: &mut RunReport,
    ) -> Result<OnboardRun> {
        let masters = Signer::dev_batch(&format!("{}master", self.prepend), accounts);
        let signing = Signer::dev_batch(&format!("{}signing", self.prepend), accounts);
        let issuers = Signer::dev_batch(&format!("{}claim", self.prepend), accounts);

        let registrations: Vec<_> = masters
            .iter()
            .chain(&issuers)
            .map(|s| (self.cdd.clone(), register(s.account())))
            .collect();
        let txs = self.tracked("create identities", &registrations, report).await;
        let dids: Vec<Option<IdentityId>> = txs
            .iter()
            .map(|tx| tx.as_ref().and_then(did_created))
            .collect();
        let (master_dids, issuer_dids) = dids.split_at(accounts);

        let funding: Vec<_> = masters
            .iter()
            .chain(&signing)
            .chain(&issuers)
            .map(|s| {
                (
                    self.cdd.clone(),
                    Call::transfer(s.account(), constants::DEFAULT_TRANSFER_AMOUNT),
                )
            })
            .collect();
        self.broadcast("fund keys", &funding, report).await?;

        // Each master authorizes its signing key, which then joins.
        let joinable: Vec<usize> = (0..accounts).filter(|i| master_dids[*i].is_some()).collect();
        let authorizations: Vec<_> = joinable
            .iter()
            .map(|i| {
                let call = Call::Identity(IdentityCall::AddAuthorization {
                    target: Signatory::Account(signing[*i].account()),
                    data: AuthorizationData::JoinIdentity,
                    expiry: None,
                });
                (masters[*i].clone(), call)
            })
            .collect();
        let auth_txs = self.tracked("add authorizations", &authorizations, report).await;
        let joins: Vec<_> = joinable
            .iter()
            .zip(&auth_txs)
            .filter_map(|(i, tx)| {
                let auth_id = tx.as_ref().and_then(authorization_added)?;
                let call = Call::Identity(IdentityCall::JoinIdentityAsKey { auth_id });
                Some((signing[*i].clone(), call))
            })
            .collect();
        let joined_keys = self
            .tracked("join identities", &joins, report)
            .await
            .iter()
            .filter(|tx| tx.is_some())
            .count();

        let mut claim_requests = Vec::new();
        for (i, master) in master_dids.iter().enumerate() {
            let (Some(target), Some(_)) = (master, issuer_dids[i]) else {
                continue;
            };
            for n in 0..claims {
                let call = Call::Identity(IdentityCall::AddClaim {
                    target: *target,
                    claim: Claim::nth(n, Scope::Identity(*target)),
                    expiry: None,
                });
                claim_requests.push((issuers[i].clone(), call));
            }
        }
        self.broadcast("add claims", &claim_requests, report).await?;

        Ok(OnboardRun {
            identities: master_dids.iter().flatten().copied().collect(),
            joined_keys,
            claims: claim_requests.len(),
        })
    }

    /// Alice sends [`LEG_AMOUNT`] to Bob once every party affirmed; a second
    /// instruction to Charlie is rejected by Charlie and must move nothing.
    pub async fn settle(&self, report: &mut RunReport) -> Result<SettlementRun> {
        let parties = self
            .parties("settle", &["Alice", "Bob", "Charlie"], report)
            .await?;
        let [alice, bob, charlie] = &parties[..] else {
            return Err(PolyloadError::Internal("expected three parties".into()));
        };
        let ticker = self.asset(alice, 0, report).await?;
        let venue = report.record(
            "create venue",
            self.settlement
                .create_venue(&alice.signer, "polyload settle", VenueType::Other)
                .await,
        )?;
        let mut outcomes = Vec::new();

        let request = InstructionRequest {
            venue_id: venue,
            settlement_type: SettlementType::SettleOnAffirmation,
            valid_from: None,
            legs: vec![Leg::new(alice.portfolio(), bob.portfolio(), ticker, LEG_AMOUNT)],
        };
        if let Some(id) = report.keep(
            "add instruction",
            self.settlement
                .add_and_affirm_instruction(&alice.signer, request, vec![alice.portfolio()])
                .await,
        ) {
            report.keep(
                "affirm instruction",
                self.settlement
                    .affirm_instruction(&bob.signer, id, vec![bob.portfolio()], 0)
                    .await,
            );
            if let Some(outcome) = report.keep("await outcome", self.settlement.await_outcome(id).await) {
                report.check("round trip", outcome.is_executed(), "instruction executed");
                outcomes.push((id, outcome));
            }
        }

        let request = InstructionRequest {
            venue_id: venue,
            settlement_type: SettlementType::SettleOnAffirmation,
            valid_from: None,
            legs: vec![Leg::new(alice.portfolio(), charlie.portfolio(), ticker, LEG_AMOUNT)],
        };
        if let Some(id) = report.keep(
            "add instruction",
            self.settlement
                .add_and_affirm_instruction(&alice.signer, request, vec![alice.portfolio()])
                .await,
        ) {
            report.keep(
                "reject instruction",
                self.settlement
                    .reject_instruction(&charlie.signer, id, charlie.portfolio(), 1)
                    .await,
            );
            if let Some(outcome) = report.keep("await outcome", self.settlement.await_outcome(id).await) {
                report.check(
                    "rejection",
                    outcome == InstructionOutcome::Rejected,
                    "instruction rejected",
                );
                outcomes.push((id, outcome));
            }
        }

        Ok(SettlementRun {
            parties,
            tickers: vec![ticker],
            outcomes,
        })
    }

    /// Alice sends [`LEG_AMOUNT`] of her asset to each of the other four
    /// and receives [`LEG_AMOUNT`] of Bob's asset, all in one instruction.
    pub async fn settle_group(&self, report: &mut RunReport) -> Result<SettlementRun> {
        let parties = self
            .parties("group", &["Alice", "Bob", "Charlie", "Dave", "Eve"], report)
            .await?;
        let [alice, bob, rest @ ..] = &parties[..] else {
            return Err(PolyloadError::Internal("expected five parties".into()));
        };
        let alpha = self.asset(alice, 1, report).await?;
        let omega = self.asset(bob, 2, report).await?;
        let venue = report.record(
            "create venue",
            self.settlement
                .create_venue(&alice.signer, "polyload group", VenueType::Exchange)
                .await,
        )?;

        let mut legs: Vec<Leg> = parties[1..]
            .iter()
            .map(|p| Leg::new(alice.portfolio(), p.portfolio(), alpha, LEG_AMOUNT))
            .collect();
        legs.push(Leg::new(bob.portfolio(), alice.portfolio(), omega, LEG_AMOUNT));
        let request = InstructionRequest {
            venue_id: venue,
            settlement_type: SettlementType::SettleOnAffirmation,
            valid_from: None,
            legs,
        };
        let id = report.record(
            "add instruction",
            self.settlement
                .add_and_affirm_instruction(&alice.signer, request, vec![alice.portfolio()])
                .await,
        )?;

        report.keep(
            "affirm instruction",
            self.settlement
                .affirm_instruction(&bob.signer, id, vec![bob.portfolio()], 1)
                .await,
        );
        let affirmations = join_all(rest.iter().map(|p| {
            self.settlement
                .affirm_instruction(&p.signer, id, vec![p.portfolio()], 0)
        }))
        .await;
        for result in affirmations {
            report.keep("affirm instruction", result);
        }

        let mut outcomes = Vec::new();
        if let Some(outcome) = report.keep("await outcome", self.settlement.await_outcome(id).await) {
            report.check("grouped settlement", outcome.is_executed(), "instruction executed");
            outcomes.push((id, outcome));
        }
        Ok(SettlementRun {
            parties,
            tickers: vec![alpha, omega],
            outcomes,
        })
    }
}
