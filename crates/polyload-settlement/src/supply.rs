//! Supply conservation invariant checker.
//!
//! ```text
//! ∀ ticker: Σ(available + locked over all portfolios) == Σ(issued)
//! ```
//!
//! Settlement only moves balances between portfolios, so any mismatch after
//! an execution is a bug in the engine, never a protocol outcome.

use std::collections::HashMap;

use polyload_types::{PolyloadError, Result, Ticker};

/// Per-ticker issuance totals.
#[derive(Debug, Default)]
pub struct SupplyConservation {
    issued: HashMap<Ticker, u128>,
}

impl SupplyConservation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record newly minted units.
    ///
    /// # Errors
    /// Returns `NotPermitted` if total issuance would overflow.
    pub fn record_issuance(&mut self, ticker: Ticker, amount: u128) -> Result<()> {
        let total = self.issued.entry(ticker).or_insert(0);
        *total = total
            .checked_add(amount)
            .ok_or_else(|| PolyloadError::NotPermitted {
                reason: format!("total supply of {ticker} would overflow"),
            })?;
        Ok(())
    }

    #[must_use]
    pub fn expected_supply(&self, ticker: &Ticker) -> u128 {
        self.issued.get(ticker).copied().unwrap_or(0)
    }

    /// Compare the actual sum of balances against issuance.
    ///
    /// # Errors
    /// Returns [`PolyloadError::SupplyInvariantViolation`] if they differ.
    pub fn verify(&self, ticker: &Ticker, actual_supply: u128) -> Result<()> {
        let expected = self.expected_supply(ticker);
        if actual_supply != expected {
            return Err(PolyloadError::SupplyInvariantViolation {
                reason: format!("{ticker}: actual supply {actual_supply} != issued {expected}"),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn tracked_tickers(&self) -> Vec<Ticker> {
        let mut tickers: Vec<_> = self.issued.keys().copied().collect();
        tickers.sort();
        tickers
    }
}
