//! # Account nonce ledger
//!
//! Hands out nonces so that concurrent submissions from one account never
//! collide.
//!
//! ## Invariants
//!
//! - **Monotonic**: for a given account every reserved nonce is one more
//!   than the previous one. Nothing is ever handed out twice.
//! - **Irreversible**: a reserved nonce is consumed even if the
//!   transaction using it later fails or is dropped.
//! - **Fetched once**: the starting value comes from
//!   `system_accountNextIndex` the first time an account is seen and is
//!   cached for the life of the ledger.
//! - **Per-account locking**: each account has its own async mutex, held
//!   across the initial fetch, so first callers never double-fetch while
//!   unrelated accounts proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use polyload_rpc::ChainApi;
use polyload_types::{AccountId, PolyloadError, Result};
use tracing::debug;

type Slot = Arc<tokio::sync::Mutex<Option<u64>>>;

/// Next-nonce table keyed by account.
pub struct NonceLedger {
    chain: Arc<dyn ChainApi>,
    slots: Mutex<HashMap<AccountId, Slot>>,
}

impl NonceLedger {
    #[must_use]
    pub fn new(chain: Arc<dyn ChainApi>) -> Self {
        Self {
            chain,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, account: &AccountId) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(*account).or_default())
    }

    /// Reserve the next nonce for `account`.
    ///
    /// # Errors
    /// Propagates the chain error if the initial fetch fails (nothing is
    /// cached in that case). Returns `NonceExhausted` on counter overflow.
    pub async fn reserve(&self, account: &AccountId) -> Result<u64> {
        let slot = self.slot(account);
        let mut next = slot.lock().await;
        let current = match *next {
            Some(n) => n,
            None => {
                let fetched = self.chain.account_next_index(account).await?;
                debug!(account = %account, nonce = fetched, "fetched starting nonce");
                fetched
            }
        };
        let following = current
            .checked_add(1)
            .ok_or(PolyloadError::NonceExhausted { account: *account })?;
        *next = Some(following);
        Ok(current)
    }

    /// The nonce the next `reserve` would return, if the account is known.
    pub async fn peek(&self, account: &AccountId) -> Option<u64> {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.get(account).cloned()
        }?;
        *slot.lock().await
    }

    /// Number of accounts with a cached counter.
    #[must_use]
    pub fn tracked_accounts(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for NonceLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceLedger")
            .field("tracked_accounts", &self.tracked_accounts())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use polyload_rpc::Subscription;
    use polyload_types::{
        Block, BlockHash, EventRecord, ExtrinsicHash, Header, TransactionStatus,
    };

    use super::*;

    /// Chain stub that only answers `account_next_index`, slowly.
    struct IndexOnly {
        start: u64,
        fetches: AtomicUsize,
        fail: bool,
    }

    impl IndexOnly {
        fn new(start: u64) -> Arc<Self> {
            Arc::new(Self {
                start,
                fetches: AtomicUsize::new(0),
                fail: false,
            })
        }
    }

    #[async_trait]
    impl ChainApi for IndexOnly {
        async fn account_next_index(&self, _account: &AccountId) -> Result<u64> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            if self.fail {
                return Err(PolyloadError::RequestTimeout {
                    method: "system_accountNextIndex".into(),
                });
            }
            Ok(self.start)
        }
        async fn submit_extrinsic(&self, _: &str) -> Result<ExtrinsicHash> {
            unimplemented!()
        }
        async fn submit_and_watch(&self, _: &str) -> Result<Subscription<TransactionStatus>> {
            unimplemented!()
        }
        async fn subscribe_new_heads(&self) -> Result<Subscription<Header>> {
            unimplemented!()
        }
        async fn block_hash(&self, _: u64) -> Result<Option<BlockHash>> {
            unimplemented!()
        }
        async fn block(&self, _: &BlockHash) -> Result<Option<Block>> {
            unimplemented!()
        }
        async fn block_events(&self, _: &BlockHash) -> Result<Vec<EventRecord>> {
            unimplemented!()
        }
        async fn pending_extrinsics(&self) -> Result<Vec<String>> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn sequential_reserves_increment() {
        let chain = IndexOnly::new(4);
        let ledger = NonceLedger::new(chain.clone());
        let acct = AccountId([1; 32]);
        assert_eq!(ledger.peek(&acct).await, None);
        assert_eq!(ledger.reserve(&acct).await.unwrap(), 4);
        assert_eq!(ledger.reserve(&acct).await.unwrap(), 5);
        assert_eq!(ledger.peek(&acct).await, Some(6));
        assert_eq!(chain.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reserves_never_repeat() {
        let chain = IndexOnly::new(0);
        let ledger = Arc::new(NonceLedger::new(chain.clone()));
        let acct = AccountId([2; 32]);
        let n = 200;
        let handles: Vec<_> = (0..n)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move { ledger.reserve(&acct).await.unwrap() })
            })
            .collect();
        let mut seen = HashSet::new();
        for h in handles {
            assert!(seen.insert(h.await.unwrap()), "duplicate nonce");
        }
        assert_eq!(seen, (0..n).collect::<HashSet<u64>>());
        assert_eq!(chain.fetches.load(Ordering::SeqCst), 1, "double fetch");
    }

    #[tokio::test]
    async fn accounts_are_independent() {
        let chain = IndexOnly::new(10);
        let ledger = NonceLedger::new(chain.clone());
        let a = AccountId([1; 32]);
        let b = AccountId([2; 32]);
        assert_eq!(ledger.reserve(&a).await.unwrap(), 10);
        assert_eq!(ledger.reserve(&a).await.unwrap(), 11);
        assert_eq!(ledger.reserve(&b).await.unwrap(), 10);
        assert_eq!(ledger.tracked_accounts(), 2);
        assert_eq!(chain.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_fetch_is_not_cached() {
        let chain = Arc::new(IndexOnly {
            start: 0,
            fetches: AtomicUsize::new(0),
            fail: true,
        });
        let ledger = NonceLedger::new(chain.clone());
        let acct = AccountId([3; 32]);
        assert!(ledger.reserve(&acct).await.is_err());
        assert!(ledger.reserve(&acct).await.is_err());
        assert_eq!(ledger.peek(&acct).await, None);
        assert_eq!(chain.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn overflow_is_an_error() {
        let ledger = NonceLedger::new(IndexOnly::new(u64::MAX));
        let acct = AccountId([4; 32]);
        let err = ledger.reserve(&acct).await.unwrap_err();
        assert!(matches!(err, PolyloadError::NonceExhausted { .. }));
    }
}
