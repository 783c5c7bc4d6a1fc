//! Client stack against the development chain.
//!
//! Each test starts a fresh chain whose genesis key `//Alice` is a CDD
//! provider, then drives it only through the public client components:
//! `TransactionSubmitter`, `ChainSyncWatcher` and `SettlementClient`.

use std::sync::Arc;
use std::time::Duration;

use polyload_devchain::{DevChain, DevChainConfig, HOUSEKEEPING_EXTRINSICS};
use polyload_rpc::ChainApi;
use polyload_settlement::{InstructionOutcome, InstructionRequest, SettlementClient};
use polyload_submit::{ChainSyncWatcher, Signer, TransactionSubmitter};
use polyload_types::{
    AssetCall, Call, ChainEvent, Confirmation, DrainConfig, EventKind, IdentityCall,
    IdentityEvent, IdentityId, InstructionStatus, Leg, PolyloadError, PortfolioId,
    SettlementType, Ticker, VenueType,
};
use rand::seq::SliceRandom;

const GENESIS_BALANCE: u128 = 1_000_000_000_000_000_000;
const ISSUED: u128 = 1_000_000;

struct Harness {
    chain: DevChain,
    submitter: Arc<TransactionSubmitter>,
    settlement: SettlementClient,
    alice: Signer,
}

impl Harness {
    fn start(config: DevChainConfig) -> Self {
        let alice = Signer::dev("//Alice");
        let chain = DevChain::start(config.with_cdd_provider(alice.account(), GENESIS_BALANCE));
        let api: Arc<dyn ChainApi> = Arc::new(chain.clone());
        let submitter = Arc::new(TransactionSubmitter::new(api, Confirmation::InBlock));
        let settlement = SettlementClient::new(Arc::clone(&submitter))
            .with_outcome_timeout(Duration::from_secs(10));
        Self {
            chain,
            submitter,
            settlement,
            alice,
        }
    }

    fn interval() -> Self {
        Self::start(DevChainConfig::every(Duration::from_millis(20)))
    }

    fn api(&self) -> Arc<dyn ChainApi> {
        Arc::clone(self.submitter.chain())
    }

    async fn alice_did(&self) -> IdentityId {
        self.chain.identity_of(&self.alice.account()).await.unwrap()
    }

    /// Register a fresh identity for each name, CDD'd by Alice.
    async fn register(&self, names: &[&str]) -> Vec<(Signer, IdentityId)> {
        let mut parties = Vec::new();
        for name in names {
            let signer = Signer::dev(&format!("//e2e/{name}"));
            let tx = self
                .submitter
                .submit(
                    &self.alice,
                    Call::Identity(IdentityCall::CddRegisterDid {
                        target: signer.account(),
                        secondary_keys: Vec::new(),
                    }),
                )
                .await
                .unwrap();
            let did = tx
                .events
                .iter()
                .find_map(|e| match e {
                    ChainEvent::Identity(IdentityEvent::DidCreated { did, .. }) => Some(*did),
                    _ => None,
                })
                .unwrap();
            parties.push((signer, did));
        }
        parties
    }

    async fn issue(&self, owner: &Signer, symbol: &str) -> Ticker {
        let ticker = Ticker::new(symbol).unwrap();
        self.submitter
            .submit(
                owner,
                Call::Asset(AssetCall::CreateAsset {
                    name: symbol.to_string(),
                    ticker,
                    divisible: true,
                }),
            )
            .await
            .unwrap();
        self.submitter
            .submit(
                owner,
                Call::Asset(AssetCall::Issue {
                    ticker,
                    amount: ISSUED,
                }),
            )
            .await
            .unwrap();
        ticker
    }
}

#[tokio::test]
async fn rejection_by_one_party_moves_nothing() {
    let h = Harness::interval();
    let alice_pf = PortfolioId::default_of(h.alice_did().await);
    let parties = h.register(&["bob", "charlie"]).await;
    let (bob, bob_did) = &parties[0];
    let (charlie, charlie_did) = &parties[1];
    let ticker = h.issue(&h.alice, "REJECT").await;
    let venue = h
        .settlement
        .create_venue(&h.alice, "otc", VenueType::Other)
        .await
        .unwrap();

    let request = InstructionRequest {
        venue_id: venue,
        settlement_type: SettlementType::SettleOnAffirmation,
        valid_from: None,
        legs: vec![
            Leg::new(alice_pf, PortfolioId::default_of(*bob_did), ticker, 100),
            Leg::new(alice_pf, PortfolioId::default_of(*charlie_did), ticker, 100),
        ],
    };
    let id = h
        .settlement
        .add_and_affirm_instruction(&h.alice, request, vec![alice_pf])
        .await
        .unwrap();
    h.settlement
        .affirm_instruction(bob, id, vec![PortfolioId::default_of(*bob_did)], 0)
        .await
        .unwrap();
    h.settlement
        .reject_instruction(charlie, id, PortfolioId::default_of(*charlie_did), 2)
        .await
        .unwrap();

    assert_eq!(
        h.settlement.await_outcome(id).await.unwrap(),
        InstructionOutcome::Rejected
    );
    assert_eq!(h.chain.asset_balance(&alice_pf, &ticker).await, ISSUED);
    assert_eq!(
        h.chain
            .asset_balance(&PortfolioId::default_of(*bob_did), &ticker)
            .await,
        0
    );
    let status = h
        .chain
        .inspect(|rt| rt.settlement().instruction(id).map(|i| i.status))
        .await;
    assert_eq!(status, Some(InstructionStatus::Rejected));

    // A rejected instruction cannot be affirmed again.
    let err = h
        .settlement
        .affirm_instruction(charlie, id, vec![PortfolioId::default_of(*charlie_did)], 0)
        .await
        .unwrap_err();
    assert!(matches!(err, PolyloadError::Dispatch { .. }), "{err}");
}

#[tokio::test]
async fn legs_from_a_user_portfolio_settle_and_keep_locks() {
    let h = Harness::interval();
    let alice_pf = PortfolioId::default_of(h.alice_did().await);
    let parties = h.register(&["dave"]).await;
    let (dave, dave_did) = &parties[0];
    let dave_pf = PortfolioId::default_of(*dave_did);
    let ticker = h.issue(&h.alice, "VAULT").await;

    let vault = h.settlement.create_portfolio(&h.alice, "vault").await.unwrap();
    assert_eq!(vault, PortfolioId::user(h.alice_did().await, 1));
    h.settlement
        .move_portfolio_funds(&h.alice, alice_pf, vault, ticker, 500)
        .await
        .unwrap();
    assert_eq!(h.chain.asset_balance(&vault, &ticker).await, 500);

    let venue = h
        .settlement
        .create_venue(&h.alice, "vault desk", VenueType::Other)
        .await
        .unwrap();
    let request = InstructionRequest {
        venue_id: venue,
        settlement_type: SettlementType::SettleOnAffirmation,
        valid_from: None,
        legs: vec![Leg::new(vault, dave_pf, ticker, 300)],
    };
    let id = h
        .settlement
        .add_and_affirm_instruction(&h.alice, request, vec![vault])
        .await
        .unwrap();

    // 300 of the vault's 500 are locked by the affirmation.
    let err = h
        .settlement
        .move_portfolio_funds(&h.alice, vault, alice_pf, ticker, 201)
        .await
        .unwrap_err();
    match &err {
        PolyloadError::Dispatch { error, .. } => assert_eq!(
            error.module_name(),
            Some(("portfolio", "InsufficientPortfolioBalance"))
        ),
        other => panic!("unexpected {other}"),
    }
    h.settlement
        .move_portfolio_funds(&h.alice, vault, alice_pf, ticker, 200)
        .await
        .unwrap();

    h.settlement
        .affirm_instruction(dave, id, vec![dave_pf], 0)
        .await
        .unwrap();
    assert_eq!(
        h.settlement.await_outcome(id).await.unwrap(),
        InstructionOutcome::Executed
    );
    assert_eq!(h.chain.asset_balance(&vault, &ticker).await, 0);
    assert_eq!(h.chain.asset_balance(&dave_pf, &ticker).await, 300);
    assert_eq!(h.chain.asset_balance(&alice_pf, &ticker).await, ISSUED - 300);
}

#[tokio::test]
async fn concurrent_submissions_use_distinct_consecutive_nonces() {
    let h = Harness::interval();
    let mut requests: Vec<(Signer, Call)> = Signer::dev_batch("e2e/user", 40)
        .iter()
        .map(|dest| (h.alice.clone(), Call::transfer(dest.account(), 1_000)))
        .collect();
    requests.shuffle(&mut rand::thread_rng());

    let results = h.submitter.submit_all(&requests).await;
    let mut nonces: Vec<u64> = results
        .iter()
        .map(|r| r.as_ref().map(|tx| tx.nonce).unwrap())
        .collect();
    nonces.sort_unstable();
    assert_eq!(nonces, (0..40).collect::<Vec<_>>());
    for (_, call) in &requests {
        let Call::Balances(polyload_types::BalancesCall::Transfer { dest, .. }) = call else {
            unreachable!()
        };
        assert_eq!(h.chain.free_balance(dest).await, 1_000);
    }

    // A failed dispatch still consumes its nonce.
    let err = h
        .submitter
        .submit(
            &h.alice,
            Call::transfer(Signer::dev("//e2e/sink").account(), GENESIS_BALANCE * 2),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PolyloadError::Dispatch { nonce: 40, .. }), "{err}");
    let tx = h
        .submitter
        .submit(&h.alice, Call::transfer(Signer::dev("//e2e/sink").account(), 1))
        .await
        .unwrap();
    assert_eq!(tx.nonce, 41);
    assert!(tx.find_event(EventKind::BalancesTransfer).is_some());

    let stats = h.submitter.stats().snapshot();
    assert_eq!(stats.succeeded, 41);
    assert_eq!(stats.dispatch_failed, 1);
}

#[tokio::test]
async fn stale_nonce_from_a_second_client_is_refused() {
    let h = Harness::interval();
    let other = TransactionSubmitter::new(h.api(), Confirmation::InBlock);
    let dest = Signer::dev("//e2e/dest").account();

    h.submitter
        .submit(&h.alice, Call::transfer(dest, 1))
        .await
        .unwrap();
    // The second client fetches its base after nonce 0 landed and takes 1,
    // which the first client's ledger still believes is free.
    let tx = other
        .submit(&h.alice, Call::transfer(dest, 1))
        .await
        .unwrap();
    assert_eq!(tx.nonce, 1);
    let err = h
        .submitter
        .submit(&h.alice, Call::transfer(dest, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, PolyloadError::StaleNonce { .. }), "{err}");
}

#[tokio::test]
async fn drain_does_not_return_on_an_idle_chain() {
    let h = Harness::start(DevChainConfig::every(Duration::from_millis(10)));
    let mut watcher = ChainSyncWatcher::new(
        h.api(),
        DrainConfig {
            housekeeping_extrinsics: HOUSEKEEPING_EXTRINSICS,
            timeout_ms: Some(200),
        },
    );
    let err = watcher.wait_for_drain().await.unwrap_err();
    assert!(matches!(err, PolyloadError::SyncTimeout { waited_ms: 200 }));
    assert!(watcher.last_processed().is_some(), "idle blocks were sampled");
}

#[tokio::test]
async fn drain_returns_after_a_busy_block_and_an_empty_pool() {
    let h = Harness::start(DevChainConfig::manual());
    let mut watcher = ChainSyncWatcher::new(
        h.api(),
        DrainConfig {
            housekeeping_extrinsics: HOUSEKEEPING_EXTRINSICS,
            timeout_ms: Some(5_000),
        },
    );
    let drain = tokio::spawn(async move { watcher.wait_for_drain().await });

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.chain.produce_block().await.unwrap();
    }
    assert!(!drain.is_finished(), "empty blocks are not useful work");

    let dest = Signer::dev("//e2e/dest").account();
    for _ in 0..3 {
        h.submitter
            .submit_detached(&h.alice, Call::transfer(dest, 5))
            .await
            .unwrap();
    }
    let busy = h.chain.produce_block().await.unwrap();
    assert_eq!(busy.extrinsics, 1 + 3);
    for _ in 0..500 {
        if drain.is_finished() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.chain.produce_block().await.unwrap();
    }

    let report = drain.await.unwrap().unwrap();
    assert_eq!(report.signed_extrinsics(), 3);
    assert_eq!(report.busy_blocks(HOUSEKEEPING_EXTRINSICS), 1);
    assert!(h.chain.pending_extrinsics().await.unwrap().is_empty());
    assert_eq!(h.chain.free_balance(&dest).await, 15);
}

#[tokio::test]
async fn scheduled_settlement_executes_at_its_block() {
    let h = Harness::start(DevChainConfig::manual());
    let producer = {
        let chain = h.chain.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
                chain.produce_block().await.unwrap();
            }
        })
    };
    let alice_pf = PortfolioId::default_of(h.alice_did().await);
    let parties = h.register(&["bob"]).await;
    let (bob, bob_did) = &parties[0];
    let bob_pf = PortfolioId::default_of(*bob_did);
    let ticker = h.issue(&h.alice, "LATER").await;
    let venue = h
        .settlement
        .create_venue(&h.alice, "desk", VenueType::Distribution)
        .await
        .unwrap();

    let at = h.chain.head_number().await + 50;
    let request = InstructionRequest {
        venue_id: venue,
        settlement_type: SettlementType::SettleOnBlock(at),
        valid_from: None,
        legs: vec![Leg::new(alice_pf, bob_pf, ticker, 100)],
    };
    let id = h
        .settlement
        .add_and_affirm_instruction(&h.alice, request, vec![alice_pf])
        .await
        .unwrap();
    h.settlement
        .affirm_instruction(bob, id, vec![bob_pf], 0)
        .await
        .unwrap();
    assert_eq!(h.chain.asset_balance(&bob_pf, &ticker).await, 0);

    assert!(h.settlement.await_outcome(id).await.unwrap().is_executed());
    producer.abort();
    assert!(h.chain.head_number().await >= at);
    assert_eq!(h.chain.asset_balance(&bob_pf, &ticker).await, 100);
    assert_eq!(h.chain.asset_balance(&alice_pf, &ticker).await, ISSUED - 100);
}
