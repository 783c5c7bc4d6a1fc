//! # The development chain
//!
//! A single-node ledger that speaks [`ChainApi`] in-process.
//!
//! ```text
//!  submit ──▶ decode + verify signature + nonce check ──▶ pool
//!                                                          │
//!  produce_block:                                          ▼
//!    timestamp inherent ─▶ scheduled settlements ─▶ ready extrinsics in
//!    nonce order ─▶ events per extrinsic ─▶ store block ─▶ notify watchers
//!    (inBlock, finalized) and head subscribers
//! ```
//!
//! Finality is instant: every block is final as soon as it is produced.
//! Extrinsics whose nonce is ahead of the account's stay in the pool until
//! the gap closes.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use polyload_rpc::{CancelFn, ChainApi, Subscription};
use polyload_types::{
    AccountId, Block, BlockHash, Call, ChainEvent, EventRecord, Extrinsic, ExtrinsicHash, Header,
    IdentityId, Phase, PolyloadError, PortfolioId, Result, SignedExtrinsic, SystemEvent, Ticker,
    TransactionStatus,
};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use crate::runtime::Runtime;

/// JSON-RPC error code a node uses for a transaction it refuses.
pub const INVALID_TRANSACTION_CODE: i64 = 1010;

/// Inherents per block: only `timestamp.set`. Drain watchers pointed at a
/// development chain use this as their idle threshold.
pub const HOUSEKEEPING_EXTRINSICS: usize = 1;

/// How blocks get produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockProduction {
    /// Only when [`DevChain::produce_block`] is called.
    Manual,
    /// Every interval, by a background task.
    Interval(Duration),
}

/// Genesis state and block production settings.
#[derive(Debug, Clone)]
pub struct DevChainConfig {
    pub production: BlockProduction,
    /// Accounts given an identity allowed to register others.
    pub cdd_providers: Vec<AccountId>,
    /// Initial free balances.
    pub endowed: Vec<(AccountId, u128)>,
    /// Added to the timestamp of each block.
    pub block_time_ms: u64,
}

impl Default for DevChainConfig {
    fn default() -> Self {
        Self {
            production: BlockProduction::Interval(Duration::from_millis(100)),
            cdd_providers: Vec::new(),
            endowed: Vec::new(),
            block_time_ms: 6_000,
        }
    }
}

impl DevChainConfig {
    #[must_use]
    pub fn manual() -> Self {
        Self {
            production: BlockProduction::Manual,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn every(interval: Duration) -> Self {
        Self {
            production: BlockProduction::Interval(interval),
            ..Self::default()
        }
    }

    /// Give `account` an identity with CDD rights and `balance` free funds.
    #[must_use]
    pub fn with_cdd_provider(mut self, account: AccountId, balance: u128) -> Self {
        self.cdd_providers.push(account);
        self.endowed.push((account, balance));
        self
    }

    #[must_use]
    pub fn with_endowment(mut self, account: AccountId, balance: u128) -> Self {
        self.endowed.push((account, balance));
        self
    }
}

struct PoolEntry {
    hex: String,
    hash: ExtrinsicHash,
    xt: SignedExtrinsic,
    watcher: Option<mpsc::UnboundedSender<Result<TransactionStatus>>>,
}

struct StoredBlock {
    hash: BlockHash,
    block: Block,
    events: Vec<EventRecord>,
}

struct ChainState {
    runtime: Runtime,
    blocks: Vec<StoredBlock>,
    by_hash: HashMap<BlockHash, usize>,
    pool: Vec<PoolEntry>,
    heads: HashMap<u64, mpsc::UnboundedSender<Result<Header>>>,
    next_subscription: u64,
    timestamp_ms: u64,
    block_time_ms: u64,
}

/// Summary of a produced block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducedBlock {
    pub number: u64,
    pub hash: BlockHash,
    /// Extrinsics including the timestamp inherent.
    pub extrinsics: usize,
}

/// In-process chain. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DevChain {
    state: Arc<Mutex<ChainState>>,
}

impl std::fmt::Debug for DevChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevChain").finish_non_exhaustive()
    }
}

fn block_hash_of(header: &Header) -> BlockHash {
    let mut hasher = Sha256::new();
    hasher.update(header.parent_hash.as_bytes());
    hasher.update(header.number.to_le_bytes());
    hasher.update(header.extrinsics_root.as_bytes());
    BlockHash(hasher.finalize().into())
}

fn extrinsics_root(extrinsics: &[String]) -> BlockHash {
    let mut hasher = Sha256::new();
    for xt in extrinsics {
        hasher.update(xt.as_bytes());
    }
    BlockHash(hasher.finalize().into())
}

fn refused(reason: impl Into<String>) -> PolyloadError {
    PolyloadError::Rpc {
        method: "author_submitExtrinsic".into(),
        code: INVALID_TRANSACTION_CODE,
        message: reason.into(),
    }
}

fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

impl ChainState {
    fn genesis(config: &DevChainConfig) -> Self {
        let mut runtime = Runtime::new();
        for (account, balance) in &config.endowed {
            runtime.endow(*account, *balance);
        }
        for account in &config.cdd_providers {
            runtime.register_cdd_provider(*account);
        }
        let header = Header {
            parent_hash: BlockHash([0; 32]),
            number: 0,
            state_root: BlockHash([0; 32]),
            extrinsics_root: extrinsics_root(&[]),
        };
        let hash = block_hash_of(&header);
        let mut by_hash = HashMap::new();
        by_hash.insert(hash, 0);
        Self {
            runtime,
            blocks: vec![StoredBlock {
                hash,
                block: Block {
                    header,
                    extrinsics: Vec::new(),
                },
                events: Vec::new(),
            }],
            by_hash,
            pool: Vec::new(),
            heads: HashMap::new(),
            next_subscription: 1,
            timestamp_ms: now_ms(),
            block_time_ms: config.block_time_ms,
        }
    }

    fn head(&self) -> &StoredBlock {
        // Genesis is always present.
        &self.blocks[self.blocks.len() - 1]
    }

    /// Next nonce for `account`, counting contiguous pool entries.
    fn next_index(&self, account: &AccountId) -> u64 {
        let mut next = self.runtime.nonce(account);
        while self
            .pool
            .iter()
            .any(|e| e.xt.signer == *account && e.xt.nonce == next)
        {
            next += 1;
        }
        next
    }

    fn admit(&mut self, hex: &str) -> Result<(ExtrinsicHash, SignedExtrinsic)> {
        let xt = Extrinsic::from_hex(hex).map_err(|e| refused(e.to_string()))?;
        let hash = xt.hash();
        let Extrinsic::Signed(signed) = xt else {
            return Err(refused("inherents cannot be submitted"));
        };
        if !signed.verify() {
            return Err(refused(format!("bad signature from {}", signed.signer)));
        }
        let expected = self.runtime.nonce(&signed.signer);
        let duplicate = self
            .pool
            .iter()
            .any(|e| e.xt.signer == signed.signer && e.xt.nonce == signed.nonce);
        if signed.nonce < expected || duplicate {
            return Err(PolyloadError::StaleNonce {
                account: signed.signer,
                nonce: signed.nonce,
                expected: self.next_index(&signed.signer),
            });
        }
        Ok((hash, signed))
    }

    fn pool_push(
        &mut self,
        hex: &str,
        watcher: Option<mpsc::UnboundedSender<Result<TransactionStatus>>>,
    ) -> Result<ExtrinsicHash> {
        let (hash, xt) = self.admit(hex)?;
        let ready = xt.nonce == self.next_index(&xt.signer);
        if let Some(w) = &watcher {
            let status = if ready {
                TransactionStatus::Ready
            } else {
                TransactionStatus::Future
            };
            let _ = w.send(Ok(status));
        }
        debug!(signer = %xt.signer, nonce = xt.nonce, ready, "extrinsic pooled");
        self.pool.push(PoolEntry {
            hex: hex.to_string(),
            hash,
            xt,
            watcher,
        });
        Ok(hash)
    }

    /// Take every pool entry whose nonce is due, in nonce order per signer.
    fn take_ready(&mut self) -> Vec<PoolEntry> {
        let mut expected: HashMap<AccountId, u64> = HashMap::new();
        let mut ready = Vec::new();
        loop {
            let position = self.pool.iter().position(|e| {
                let next = *expected
                    .entry(e.xt.signer)
                    .or_insert_with(|| self.runtime.nonce(&e.xt.signer));
                e.xt.nonce == next
            });
            let Some(position) = position else {
                break;
            };
            let entry = self.pool.remove(position);
            expected.insert(entry.xt.signer, entry.xt.nonce + 1);
            ready.push(entry);
        }
        ready
    }

    fn produce(&mut self) -> Result<ProducedBlock> {
        let parent = self.head();
        let parent_hash = parent.hash;
        let number = parent.block.number() + 1;
        self.timestamp_ms = self
            .timestamp_ms
            .saturating_add(self.block_time_ms)
            .max(now_ms());

        let mut events: Vec<EventRecord> = self
            .runtime
            .on_initialize(number, self.timestamp_ms)?
            .into_iter()
            .map(|event| EventRecord {
                phase: Phase::Initialization,
                event,
            })
            .collect();

        let mut extrinsics = vec![Extrinsic::Inherent(Call::timestamp(self.timestamp_ms)).to_hex()];
        events.push(EventRecord::applied(
            0,
            ChainEvent::System(SystemEvent::ExtrinsicSuccess),
        ));

        let included = self.take_ready();
        for entry in &included {
            let index = u32::try_from(extrinsics.len()).unwrap_or(u32::MAX);
            let signer = entry.xt.signer;
            self.runtime.bump_nonce(signer);
            match self.runtime.dispatch(signer, &entry.xt.call) {
                Ok(emitted) => {
                    events.extend(emitted.into_iter().map(|e| EventRecord::applied(index, e)));
                    events.push(EventRecord::applied(
                        index,
                        ChainEvent::System(SystemEvent::ExtrinsicSuccess),
                    ));
                }
                Err(dispatch_error) => {
                    warn!(
                        %signer,
                        nonce = entry.xt.nonce,
                        call = %entry.xt.call.label(),
                        error = %dispatch_error,
                        "dispatch failed"
                    );
                    events.push(EventRecord::applied(
                        index,
                        ChainEvent::System(SystemEvent::ExtrinsicFailed { dispatch_error }),
                    ));
                }
            }
            extrinsics.push(entry.hex.clone());
        }

        let header = Header {
            parent_hash,
            number,
            state_root: BlockHash([0; 32]),
            extrinsics_root: extrinsics_root(&extrinsics),
        };
        let hash = block_hash_of(&header);
        let produced = ProducedBlock {
            number,
            hash,
            extrinsics: extrinsics.len(),
        };
        self.by_hash.insert(hash, self.blocks.len());
        self.blocks.push(StoredBlock {
            hash,
            block: Block {
                header: header.clone(),
                extrinsics,
            },
            events,
        });

        for entry in included {
            if let Some(watcher) = entry.watcher {
                let _ = watcher.send(Ok(TransactionStatus::InBlock(hash)));
                let _ = watcher.send(Ok(TransactionStatus::Finalized(hash)));
            }
            debug!(hash = ?entry.hash, block = number, "extrinsic included");
        }
        self.heads
            .retain(|_, sub| sub.send(Ok(header.clone())).is_ok());
        Ok(produced)
    }
}

impl DevChain {
    /// Build the chain at genesis. With interval production a background
    /// task is spawned; it stops once every handle is dropped.
    #[must_use]
    pub fn start(config: DevChainConfig) -> Self {
        let chain = Self {
            state: Arc::new(Mutex::new(ChainState::genesis(&config))),
        };
        info!(
            providers = config.cdd_providers.len(),
            endowed = config.endowed.len(),
            production = ?config.production,
            "development chain started"
        );
        if let BlockProduction::Interval(period) = config.production {
            tokio::spawn(produce_every(Arc::downgrade(&chain.state), period));
        }
        chain
    }

    /// Seal a block from the ready part of the pool.
    pub async fn produce_block(&self) -> Result<ProducedBlock> {
        let produced = self.state.lock().await.produce()?;
        debug!(
            number = produced.number,
            extrinsics = produced.extrinsics,
            "block produced"
        );
        Ok(produced)
    }

    pub async fn head_number(&self) -> u64 {
        self.state.lock().await.head().block.number()
    }

    pub async fn pool_len(&self) -> usize {
        self.state.lock().await.pool.len()
    }

    pub async fn free_balance(&self, account: &AccountId) -> u128 {
        self.state.lock().await.runtime.free_balance(account)
    }

    pub async fn identity_of(&self, account: &AccountId) -> Option<IdentityId> {
        self.state.lock().await.runtime.identity_of(account)
    }

    pub async fn asset_balance(&self, portfolio: &PortfolioId, ticker: &Ticker) -> u128 {
        self.state.lock().await.runtime.asset_balance(portfolio, ticker)
    }

    /// Run `f` against the runtime state.
    pub async fn inspect<R>(&self, f: impl FnOnce(&Runtime) -> R) -> R {
        f(&self.state.lock().await.runtime)
    }

    async fn watch(&self, hex: &str) -> Result<Subscription<TransactionStatus>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().await;
        let hash = state.pool_push(hex, Some(tx))?;
        let id = state.next_subscription;
        state.next_subscription += 1;
        let cancel: CancelFn = Box::new(|| Box::pin(async { Ok(()) }));
        debug!(subscription = id, ?hash, "watching extrinsic");
        Ok(Subscription::new(id.to_string(), rx, cancel))
    }
}

async fn produce_every(state: Weak<Mutex<ChainState>>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(state) = state.upgrade() else {
            debug!("development chain dropped, block production stops");
            return;
        };
        let result = state.lock().await.produce();
        if let Err(e) = result {
            warn!(error = %e, "block production failed");
        }
    }
}

#[async_trait]
impl ChainApi for DevChain {
    async fn account_next_index(&self, account: &AccountId) -> Result<u64> {
        Ok(self.state.lock().await.next_index(account))
    }

    async fn submit_extrinsic(&self, extrinsic_hex: &str) -> Result<ExtrinsicHash> {
        self.state.lock().await.pool_push(extrinsic_hex, None)
    }

    async fn submit_and_watch(&self, extrinsic_hex: &str) -> Result<Subscription<TransactionStatus>> {
        self.watch(extrinsic_hex).await
    }

    async fn subscribe_new_heads(&self) -> Result<Subscription<Header>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().await;
        let id = state.next_subscription;
        state.next_subscription += 1;
        state.heads.insert(id, tx);
        let weak = Arc::downgrade(&self.state);
        let cancel: CancelFn = Box::new(move || {
            Box::pin(async move {
                if let Some(state) = weak.upgrade() {
                    state.lock().await.heads.remove(&id);
                }
                Ok(())
            })
        });
        Ok(Subscription::new(id.to_string(), rx, cancel))
    }

    async fn block_hash(&self, number: u64) -> Result<Option<BlockHash>> {
        let state = self.state.lock().await;
        Ok(usize::try_from(number)
            .ok()
            .and_then(|n| state.blocks.get(n))
            .map(|b| b.hash))
    }

    async fn block(&self, hash: &BlockHash) -> Result<Option<Block>> {
        let state = self.state.lock().await;
        Ok(state
            .by_hash
            .get(hash)
            .and_then(|n| state.blocks.get(*n))
            .map(|b| b.block.clone()))
    }

    async fn block_events(&self, hash: &BlockHash) -> Result<Vec<EventRecord>> {
        let state = self.state.lock().await;
        state
            .by_hash
            .get(hash)
            .and_then(|n| state.blocks.get(*n))
            .map(|b| b.events.clone())
            .ok_or_else(|| PolyloadError::Rpc {
                method: "state_getStorage".into(),
                code: -32000,
                message: format!("unknown block {hash}"),
            })
    }

    async fn pending_extrinsics(&self) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .await
            .pool
            .iter()
            .map(|e| e.hex.clone())
            .collect())
    }
}
