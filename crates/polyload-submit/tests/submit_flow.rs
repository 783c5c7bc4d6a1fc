//! Submitter and sync watcher against a scripted chain.
//!
//! The script decides what the node does with each broadcast extrinsic
//! (include with events, drop, reject) and which heads it announces, so
//! every outcome path of the pipeline can be driven deterministically.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use polyload_rpc::{ChainApi, Subscription};
use polyload_submit::{ChainSyncWatcher, Signer, TransactionSubmitter};
use polyload_types::{
    AccountId, BalancesEvent, Block, BlockHash, Call, ChainEvent, Confirmation, DispatchError,
    DrainConfig, EventKind, EventRecord, Extrinsic, ExtrinsicHash, Header, Phase, PolyloadError,
    Result, SystemEvent, TransactionStatus, TxStatus,
};
use tokio::sync::mpsc;

const BLOCK: BlockHash = BlockHash([7; 32]);

#[derive(Clone)]
enum Fate {
    Include(Vec<ChainEvent>),
    /// Included, but the node cannot serve the block's events.
    Unreadable,
    Drop,
    Invalid,
    Reject,
}

struct ScriptedChain {
    fate: Mutex<Fate>,
    included: Mutex<Vec<String>>,
    unsubscribes: Arc<AtomicUsize>,
    /// Blocks announced by `subscribe_new_heads`, numbered from 1.
    heads: Mutex<Vec<Block>>,
    pending: Mutex<VecDeque<Vec<String>>>,
}

impl ScriptedChain {
    fn new(fate: Fate) -> Arc<Self> {
        Arc::new(Self {
            fate: Mutex::new(fate),
            included: Mutex::new(Vec::new()),
            unsubscribes: Arc::new(AtomicUsize::new(0)),
            heads: Mutex::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
        })
    }

    fn with_heads(blocks: Vec<Block>, pending: Vec<Vec<String>>) -> Arc<Self> {
        let chain = Self::new(Fate::Include(Vec::new()));
        *chain.heads.lock().unwrap() = blocks;
        *chain.pending.lock().unwrap() = pending.into();
        chain
    }

    fn subscription<T: Send + 'static>(&self, items: Vec<T>) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        for item in items {
            tx.send(Ok(item)).unwrap();
        }
        let counter = Arc::clone(&self.unsubscribes);
        Subscription::new(
            "scripted".into(),
            rx,
            Box::new(move || {
                Box::pin(async move {
                    drop(tx);
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
        )
    }

    fn body(&self) -> Vec<String> {
        let mut extrinsics = vec![Extrinsic::Inherent(Call::timestamp(6_000)).to_hex()];
        extrinsics.extend(self.included.lock().unwrap().iter().cloned());
        extrinsics
    }
}

fn block(number: u64, timestamp: u64, transfers: u64) -> Block {
    let alice = Signer::dev("//Alice");
    let mut extrinsics = vec![Extrinsic::Inherent(Call::timestamp(timestamp)).to_hex()];
    for nonce in 0..transfers {
        let call = Call::transfer(AccountId([2; 32]), 1);
        extrinsics.push(Extrinsic::Signed(alice.sign(call, nonce)).to_hex());
    }
    Block {
        header: Header {
            parent_hash: BlockHash([0; 32]),
            number,
            state_root: BlockHash([0; 32]),
            extrinsics_root: BlockHash([0; 32]),
        },
        extrinsics,
    }
}

fn number_hash(number: u64) -> BlockHash {
    let mut h = [0u8; 32];
    h[..8].copy_from_slice(&number.to_le_bytes());
    BlockHash(h)
}

#[async_trait]
impl ChainApi for ScriptedChain {
    async fn account_next_index(&self, _account: &AccountId) -> Result<u64> {
        Ok(0)
    }

    async fn submit_extrinsic(&self, extrinsic_hex: &str) -> Result<ExtrinsicHash> {
        Extrinsic::from_hex(extrinsic_hex).map(|xt| xt.hash())
    }

    async fn submit_and_watch(&self, extrinsic_hex: &str) -> Result<Subscription<TransactionStatus>> {
        let fate = self.fate.lock().unwrap().clone();
        let statuses = match fate {
            Fate::Reject => {
                return Err(PolyloadError::Submission {
                    reason: "1010: Invalid Transaction: Stale".into(),
                });
            }
            Fate::Drop => vec![TransactionStatus::Ready, TransactionStatus::Dropped],
            Fate::Invalid => vec![TransactionStatus::Invalid],
            Fate::Include(_) | Fate::Unreadable => {
                self.included.lock().unwrap().push(extrinsic_hex.to_string());
                vec![
                    TransactionStatus::Ready,
                    TransactionStatus::InBlock(BLOCK),
                    TransactionStatus::Finalized(BLOCK),
                ]
            }
        };
        Ok(self.subscription(statuses))
    }

    async fn subscribe_new_heads(&self) -> Result<Subscription<Header>> {
        let headers = self.heads.lock().unwrap().iter().map(|b| b.header.clone()).collect();
        Ok(self.subscription(headers))
    }

    async fn block_hash(&self, number: u64) -> Result<Option<BlockHash>> {
        let known = self.heads.lock().unwrap().iter().any(|b| b.number() == number);
        Ok(known.then(|| number_hash(number)))
    }

    async fn block(&self, hash: &BlockHash) -> Result<Option<Block>> {
        if *hash == BLOCK {
            let mut b = block(1, 6_000, 0);
            b.extrinsics = self.body();
            return Ok(Some(b));
        }
        Ok(self
            .heads
            .lock()
            .unwrap()
            .iter()
            .find(|b| number_hash(b.number()) == *hash)
            .cloned())
    }

    async fn block_events(&self, hash: &BlockHash) -> Result<Vec<EventRecord>> {
        assert_eq!(*hash, BLOCK);
        let events = match self.fate.lock().unwrap().clone() {
            Fate::Include(events) => events,
            Fate::Unreadable => {
                return Err(PolyloadError::Serialization(
                    "System.Events: expected value".into(),
                ));
            }
            _ => return Ok(Vec::new()),
        };
        let mut records = vec![EventRecord::applied(
            0,
            ChainEvent::System(SystemEvent::ExtrinsicSuccess),
        )];
        let count = self.included.lock().unwrap().len();
        for index in 1..=count {
            let index = u32::try_from(index).unwrap();
            for event in &events {
                records.push(EventRecord::applied(index, event.clone()));
            }
        }
        records.push(EventRecord {
            phase: Phase::Finalization,
            event: ChainEvent::System(SystemEvent::ExtrinsicSuccess),
        });
        Ok(records)
    }

    async fn pending_extrinsics(&self) -> Result<Vec<String>> {
        Ok(self.pending.lock().unwrap().pop_front().unwrap_or_default())
    }
}

fn transfer_events(amount: u128) -> Vec<ChainEvent> {
    vec![
        ChainEvent::Balances(BalancesEvent::Transfer {
            from: Signer::dev("//Alice").account(),
            to: Signer::dev("//Bob").account(),
            amount,
        }),
        ChainEvent::System(SystemEvent::ExtrinsicSuccess),
    ]
}

// ---------------------------------------------------------------------------
// Submitter
// ---------------------------------------------------------------------------

#[tokio::test]
async fn included_transaction_carries_its_events() {
    let chain = ScriptedChain::new(Fate::Include(transfer_events(100)));
    let submitter = TransactionSubmitter::new(chain.clone(), Confirmation::InBlock);
    let alice = Signer::dev("//Alice");

    let tx = submitter
        .submit(&alice, Call::transfer(Signer::dev("//Bob").account(), 100))
        .await
        .unwrap();

    assert_eq!(tx.status, TxStatus::InBlock(BLOCK));
    assert_eq!(tx.nonce, 0);
    assert_eq!(tx.extrinsic_index, Some(1));
    assert_eq!(tx.events.len(), 2);
    assert!(tx.find_event(EventKind::BalancesTransfer).is_some());
    assert_eq!(chain.unsubscribes.load(Ordering::SeqCst), 1);
    assert_eq!(submitter.stats().snapshot().succeeded, 1);
}

#[tokio::test]
async fn finalized_confirmation_waits_for_finality() {
    let chain = ScriptedChain::new(Fate::Include(transfer_events(5)));
    let submitter = TransactionSubmitter::new(chain.clone(), Confirmation::Finalized);
    let tx = submitter
        .submit(&Signer::dev("//Alice"), Call::transfer(AccountId([2; 32]), 5))
        .await
        .unwrap();
    assert_eq!(tx.status, TxStatus::Finalized(BLOCK));
}

#[tokio::test]
async fn dispatch_failure_is_typed_and_unsubscribes_once() {
    let error = DispatchError::module(36, 3, "settlement", "InstructionNotPending");
    let chain = ScriptedChain::new(Fate::Include(vec![ChainEvent::System(
        SystemEvent::ExtrinsicFailed {
            dispatch_error: error.clone(),
        },
    )]));
    let submitter = TransactionSubmitter::new(chain.clone(), Confirmation::InBlock);
    let alice = Signer::dev("//Alice");

    let err = submitter
        .submit(&alice, Call::transfer(AccountId([2; 32]), 1))
        .await
        .unwrap_err();

    match err {
        PolyloadError::Dispatch {
            signer,
            nonce,
            error: got,
        } => {
            assert_eq!(signer, alice.account());
            assert_eq!(nonce, 0);
            assert_eq!(got, error);
        }
        other => panic!("expected dispatch error, got {other:?}"),
    }
    assert_eq!(chain.unsubscribes.load(Ordering::SeqCst), 1);
    let snap = submitter.stats().snapshot();
    assert_eq!(snap.dispatch_failed, 1);
    assert!(!snap.all_succeeded());
}

#[tokio::test]
async fn unreadable_events_leave_the_outcome_unknown() {
    let chain = ScriptedChain::new(Fate::Unreadable);
    let submitter = TransactionSubmitter::new(chain.clone(), Confirmation::InBlock);
    let alice = Signer::dev("//Alice");

    let err = submitter
        .submit(&alice, Call::transfer(AccountId([2; 32]), 1))
        .await
        .unwrap_err();

    match err {
        PolyloadError::OutcomeUnknown {
            block,
            signer,
            nonce,
            source,
            ..
        } => {
            assert_eq!(block, BLOCK);
            assert_eq!(signer, alice.account());
            assert_eq!(nonce, 0);
            assert!(matches!(*source, PolyloadError::Serialization(_)));
        }
        other => panic!("expected unknown outcome, got {other:?}"),
    }
    assert_eq!(chain.included.lock().unwrap().len(), 1);
    assert_eq!(chain.unsubscribes.load(Ordering::SeqCst), 1);
    assert_eq!(submitter.nonces().peek(&alice.account()).await, Some(1));
    let snap = submitter.stats().snapshot();
    assert_eq!(snap.submitted, 1);
    assert_eq!(snap.outcome_unknown, 1);
    assert_eq!(snap.submission_errors, 0);
}

#[tokio::test]
async fn dropped_and_invalid_consume_the_nonce() {
    let chain = ScriptedChain::new(Fate::Drop);
    let submitter = TransactionSubmitter::new(chain.clone(), Confirmation::InBlock);
    let alice = Signer::dev("//Alice");

    let err = submitter
        .submit(&alice, Call::transfer(AccountId([2; 32]), 1))
        .await
        .unwrap_err();
    assert!(matches!(err, PolyloadError::TransactionDropped { .. }));

    *chain.fate.lock().unwrap() = Fate::Invalid;
    let err = submitter
        .submit(&alice, Call::transfer(AccountId([2; 32]), 1))
        .await
        .unwrap_err();
    assert!(matches!(err, PolyloadError::TransactionInvalid { .. }));

    assert_eq!(submitter.nonces().peek(&alice.account()).await, Some(2));
    assert_eq!(submitter.stats().snapshot().dropped, 2);
    assert_eq!(chain.unsubscribes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn pool_rejection_keeps_nonce_consumed() {
    let chain = ScriptedChain::new(Fate::Reject);
    let submitter = TransactionSubmitter::new(chain, Confirmation::InBlock);
    let alice = Signer::dev("//Alice");

    let err = submitter
        .submit(&alice, Call::transfer(AccountId([2; 32]), 1))
        .await
        .unwrap_err();
    assert!(matches!(err, PolyloadError::Submission { .. }));
    assert_eq!(submitter.nonces().peek(&alice.account()).await, Some(1));
    let snap = submitter.stats().snapshot();
    assert_eq!(snap.submitted, 0);
    assert_eq!(snap.submission_errors, 1);
}

#[tokio::test]
async fn detached_submission_returns_the_hash() {
    let chain = ScriptedChain::new(Fate::Include(Vec::new()));
    let submitter = TransactionSubmitter::new(chain, Confirmation::InBlock);
    let alice = Signer::dev("//Alice");
    let call = Call::transfer(AccountId([2; 32]), 9);

    let hash = submitter.submit_detached(&alice, call.clone()).await.unwrap();
    assert_eq!(hash, Extrinsic::Signed(alice.sign(call, 0)).hash());
    assert_eq!(submitter.stats().snapshot().submitted, 1);
}

#[tokio::test]
async fn batch_uses_distinct_nonces_per_signer() {
    let chain = ScriptedChain::new(Fate::Include(transfer_events(1)));
    let submitter = TransactionSubmitter::new(chain.clone(), Confirmation::InBlock);
    let alice = Signer::dev("//Alice");
    let requests: Vec<_> = (0..5)
        .map(|_| (alice.clone(), Call::transfer(AccountId([2; 32]), 1)))
        .collect();

    let results = submitter.submit_all(&requests).await;

    let mut nonces: Vec<u64> = results.into_iter().map(|r| r.unwrap().nonce).collect();
    nonces.sort_unstable();
    assert_eq!(nonces, vec![0, 1, 2, 3, 4]);
    assert_eq!(chain.unsubscribes.load(Ordering::SeqCst), 5);
    assert!(submitter.stats().snapshot().all_succeeded());
}

// ---------------------------------------------------------------------------
// Sync watcher
// ---------------------------------------------------------------------------

#[tokio::test]
async fn drain_waits_for_a_busy_block_and_an_empty_pool() {
    let chain = ScriptedChain::with_heads(
        vec![block(1, 6_000, 0), block(2, 12_000, 3), block(3, 18_000, 0)],
        vec![vec!["0x00".into()], Vec::new()],
    );
    let mut watcher = ChainSyncWatcher::new(chain.clone(), DrainConfig::default());

    let report = watcher.wait_for_drain().await.unwrap();

    // Block 2 did the work but the pool still held one extrinsic; block 3
    // found it empty.
    assert_eq!(report.blocks.len(), 3);
    assert_eq!(report.busy_blocks(2), 1);
    assert_eq!(report.signed_extrinsics(), 3);
    assert_eq!(report.blocks[1].block_time_ms, Some(6_000));
    assert_eq!(report.blocks[0].block_time_ms, None);
    assert_eq!(watcher.last_processed(), Some(3));
    assert_eq!(chain.unsubscribes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn anchored_wait_skips_earlier_blocks() {
    let chain = ScriptedChain::with_heads(
        vec![block(1, 6_000, 5), block(2, 12_000, 3), block(3, 18_000, 0)],
        Vec::new(),
    );
    let mut watcher = ChainSyncWatcher::new(chain.clone(), DrainConfig::default());

    assert_eq!(watcher.anchor().await.unwrap(), 1);
    let report = watcher.wait_for_drain().await.unwrap();

    // Block 1 was busy but predates the anchor.
    assert_eq!(report.blocks[0].number, 2);
    assert_eq!(report.signed_extrinsics(), 3);
    assert_eq!(report.blocks[0].block_time_ms, None);
    assert_eq!(chain.unsubscribes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn idle_chain_times_out() {
    let chain = ScriptedChain::with_heads(vec![block(1, 6_000, 0)], Vec::new());
    let mut watcher = ChainSyncWatcher::new(
        chain,
        DrainConfig {
            timeout_ms: Some(50),
            ..DrainConfig::default()
        },
    );

    // One idle head, then the stream stays open with nothing to announce.
    let err = watcher.wait_for_drain().await.unwrap_err();
    assert!(matches!(err, PolyloadError::SyncTimeout { waited_ms: 50 }));
}

#[tokio::test]
async fn expected_count_goal() {
    let chain = ScriptedChain::with_heads(
        vec![block(1, 6_000, 1), block(2, 12_000, 1)],
        Vec::new(),
    );
    let mut watcher = ChainSyncWatcher::new(chain, DrainConfig::default());

    let report = watcher.wait_for_extrinsics(2).await.unwrap();
    assert_eq!(report.signed_extrinsics(), 2);
    assert_eq!(report.busy_blocks(2), 0);
}
