//! Per-portfolio asset balances with settlement locks.
//!
//! Each `(PortfolioId, Ticker)` entry has two components:
//! - **available**: can be locked or transferred;
//! - **locked**: reserved by an affirmed instruction leg.
//!
//! Lifecycle of a leg's funds:
//! 1. `credit`: issuance lands in the owner's portfolio
//! 2. `lock`: sender affirms, available → locked
//! 3. `unlock`: affirmation withdrawn or instruction ended, locked → available
//! 4. `transfer`: execution, sender available → receiver available
//!
//! Every identity has a default portfolio. User portfolios are numbered
//! from 1 per identity and must be created before they hold anything.

use std::collections::{BTreeMap, HashMap};

use polyload_types::{IdentityId, PolyloadError, PortfolioId, PortfolioKind, Result, Ticker};
use serde::Serialize;

/// Balance of one ticker in one portfolio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PortfolioBalance {
    pub available: u128,
    pub locked: u128,
}

impl PortfolioBalance {
    #[must_use]
    pub fn total(&self) -> u128 {
        self.available.saturating_add(self.locked)
    }
}

/// In-memory balance ledger for every portfolio and ticker.
#[derive(Debug, Default)]
pub struct PortfolioBook {
    balances: HashMap<(PortfolioId, Ticker), PortfolioBalance>,
    /// Identity → user portfolio number → name.
    user_portfolios: HashMap<IdentityId, BTreeMap<u64, String>>,
}

impl PortfolioBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user portfolio for `did` and return its number, one past
    /// the identity's last.
    ///
    /// # Errors
    /// Returns `PortfolioNameTaken` if `did` already has a portfolio called
    /// `name`.
    pub fn create(&mut self, did: IdentityId, name: &str) -> Result<u64> {
        let names = self.user_portfolios.entry(did).or_default();
        if names.values().any(|n| n == name) {
            return Err(PolyloadError::PortfolioNameTaken {
                did,
                name: name.to_string(),
            });
        }
        let number = names.last_key_value().map_or(1, |(n, _)| n + 1);
        names.insert(number, name.to_string());
        Ok(number)
    }

    /// Default portfolios always exist; user ones once created.
    #[must_use]
    pub fn exists(&self, portfolio: &PortfolioId) -> bool {
        match portfolio.kind {
            PortfolioKind::Default => true,
            PortfolioKind::User(n) => self
                .user_portfolios
                .get(&portfolio.did)
                .is_some_and(|names| names.contains_key(&n)),
        }
    }

    /// Name of a user portfolio. `None` for default or unknown ones.
    #[must_use]
    pub fn name(&self, portfolio: &PortfolioId) -> Option<&str> {
        match portfolio.kind {
            PortfolioKind::Default => None,
            PortfolioKind::User(n) => self
                .user_portfolios
                .get(&portfolio.did)?
                .get(&n)
                .map(String::as_str),
        }
    }

    /// # Errors
    /// Returns `PortfolioNotFound` for a user portfolio never created.
    pub fn ensure_exists(&self, portfolio: &PortfolioId) -> Result<()> {
        if self.exists(portfolio) {
            Ok(())
        } else {
            Err(PolyloadError::PortfolioNotFound(*portfolio))
        }
    }

    /// Zero if the portfolio never held the ticker.
    #[must_use]
    pub fn balance(&self, portfolio: &PortfolioId, ticker: &Ticker) -> PortfolioBalance {
        self.balances
            .get(&(*portfolio, *ticker))
            .copied()
            .unwrap_or_default()
    }

    fn entry(&mut self, portfolio: PortfolioId, ticker: Ticker) -> &mut PortfolioBalance {
        self.balances.entry((portfolio, ticker)).or_default()
    }

    fn shortfall(portfolio: PortfolioId, ticker: Ticker, needed: u128, available: u128) -> PolyloadError {
        PolyloadError::InsufficientBalance {
            portfolio,
            ticker,
            needed,
            available,
        }
    }

    /// Add freshly issued units to `available`.
    ///
    /// # Errors
    /// Returns `NotPermitted` on overflow.
    pub fn credit(&mut self, portfolio: PortfolioId, ticker: Ticker, amount: u128) -> Result<()> {
        let entry = self.entry(portfolio, ticker);
        entry.available =
            entry
                .available
                .checked_add(amount)
                .ok_or_else(|| PolyloadError::NotPermitted {
                    reason: format!("balance of {ticker} in {portfolio} would overflow"),
                })?;
        Ok(())
    }

    /// Can every `(portfolio, ticker, amount)` be locked at once?
    ///
    /// # Errors
    /// Returns `InsufficientBalance` for the first requirement that cannot be
    /// met, summing repeated entries.
    pub fn ensure_lockable(&self, requirements: &[(PortfolioId, Ticker, u128)]) -> Result<()> {
        let mut needed: HashMap<(PortfolioId, Ticker), u128> = HashMap::new();
        for (portfolio, ticker, amount) in requirements {
            let sum = needed.entry((*portfolio, *ticker)).or_insert(0);
            *sum = sum.saturating_add(*amount);
            let available = self.balance(portfolio, ticker).available;
            if *sum > available {
                return Err(Self::shortfall(*portfolio, *ticker, *sum, available));
            }
        }
        Ok(())
    }

    /// available → locked.
    ///
    /// # Errors
    /// Returns `InsufficientBalance` if not enough is available.
    pub fn lock(&mut self, portfolio: PortfolioId, ticker: Ticker, amount: u128) -> Result<()> {
        let entry = self.entry(portfolio, ticker);
        if entry.available < amount {
            return Err(Self::shortfall(portfolio, ticker, amount, entry.available));
        }
        entry.available -= amount;
        entry.locked += amount;
        Ok(())
    }

    /// locked → available.
    ///
    /// # Errors
    /// Returns `SupplyInvariantViolation` if less than `amount` is locked,
    /// which means the engine lost track of a lock.
    pub fn unlock(&mut self, portfolio: PortfolioId, ticker: Ticker, amount: u128) -> Result<()> {
        let entry = self.entry(portfolio, ticker);
        if entry.locked < amount {
            return Err(PolyloadError::SupplyInvariantViolation {
                reason: format!(
                    "unlocking {amount} {ticker} from {portfolio} with only {} locked",
                    entry.locked
                ),
            });
        }
        entry.locked -= amount;
        entry.available += amount;
        Ok(())
    }

    /// Move available funds between portfolios.
    ///
    /// # Errors
    /// Returns `InsufficientBalance` if the sender cannot cover `amount`.
    pub fn transfer(
        &mut self,
        from: PortfolioId,
        to: PortfolioId,
        ticker: Ticker,
        amount: u128,
    ) -> Result<()> {
        let sender = self.entry(from, ticker);
        if sender.available < amount {
            return Err(Self::shortfall(from, ticker, amount, sender.available));
        }
        sender.available -= amount;
        let receiver = self.entry(to, ticker);
        receiver.available = receiver.available.saturating_add(amount);
        Ok(())
    }

    /// Sum of every portfolio's total for `ticker`.
    #[must_use]
    pub fn total_supply(&self, ticker: &Ticker) -> u128 {
        self.balances
            .iter()
            .filter(|((_, t), _)| t == ticker)
            .fold(0u128, |acc, (_, b)| acc.saturating_add(b.total()))
    }
}
