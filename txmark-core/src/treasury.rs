//! Outbound value transfers.
//!
//! Markets never move value themselves: claims and liquidity withdrawals
//! commit their ledger changes first and then hand the payout to a
//! [`ValueSink`]. If the sink refuses, the market rolls its commit back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{error::Result, types::Address, MarketError};

/// Destination of payouts.
pub trait ValueSink {
    fn transfer(&mut self, to: &Address, amount: u64) -> Result<()>;
}

/// Simple credit ledger: every transfer is added to the recipient's balance.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Wallets {
    balances: BTreeMap<Address, u64>,
}

impl Wallets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, address: &Address) -> u64 {
        self.balances.get(address).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.balances.values().sum()
    }
}

impl ValueSink for Wallets {
    fn transfer(&mut self, to: &Address, amount: u64) -> Result<()> {
        let balance = self.balances.entry(to.clone()).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| MarketError::TransferFailed(format!("balance overflow for {to}")))?;
        Ok(())
    }
}
