//! Common test utilities for txmark-core tests.
//!
//! Shared identities, a fixed clock, and ready-made registry/market/oracle
//! fixtures so module tests read as scenarios.

use crate::{
    config::{MarketBounds, OracleSettings},
    error::Result,
    market::Market,
    oracle::Oracle,
    registry::{MarketParams, Registry},
    treasury::ValueSink,
    types::{Address, Timestamp},
    utils::derive_market_id,
    MarketError, UNITS_PER_COIN,
};

pub const COIN: u64 = UNITS_PER_COIN;

/// Fixed "now" for tests (2025-01-01 00:00:00 UTC)
pub const T0: Timestamp = 1_735_689_600;

pub const TEST_THRESHOLD: u64 = 1_000_000;

/// Betting window of test markets (1 day)
pub const TEST_DURATION: u64 = 86_400;

pub fn addr(raw: &str) -> Address {
    Address::new(raw).unwrap()
}

pub fn owner() -> Address {
    addr("0xowner")
}

pub fn creator() -> Address {
    addr("0xcreator")
}

pub fn oracle_id() -> Address {
    addr("0xoracle")
}

pub fn resolver() -> Address {
    addr("0xresolver")
}

pub fn alice() -> Address {
    addr("0xalice")
}

pub fn bob() -> Address {
    addr("0xbob")
}

pub fn carol() -> Address {
    addr("0xcarol")
}

pub fn dave() -> Address {
    addr("0xdave")
}

/// Standard parameters: threshold 1M, deadline one day after `T0`.
pub fn test_params() -> MarketParams {
    MarketParams::new(
        "Will the explorer report 1,000,000 transactions?",
        TEST_THRESHOLD,
        T0 + TEST_DURATION,
    )
}

/// Standalone market resolved by `oracle_id()`, created at `T0`.
pub fn create_test_market(initial_liquidity: u64) -> Market {
    let id = derive_market_id(&uuid::Uuid::nil(), &creator(), 0);
    Market::new(
        id,
        creator(),
        oracle_id(),
        "test market".to_string(),
        TEST_THRESHOLD,
        T0 + TEST_DURATION,
        initial_liquidity,
        T0,
    )
}

/// Empty registry owned by `owner()` with `oracle_id()` as default oracle.
pub fn create_test_registry() -> Registry {
    Registry::new(owner(), Some(oracle_id()), MarketBounds::default())
}

/// Oracle `oracle_id()` administered by `resolver()`.
pub fn create_test_oracle() -> Oracle {
    Oracle::new(oracle_id(), resolver(), OracleSettings::default())
}

/// Sink that refuses every transfer.
pub struct RefusingSink;

impl ValueSink for RefusingSink {
    fn transfer(&mut self, to: &Address, _amount: u64) -> Result<()> {
        Err(MarketError::TransferFailed(format!("{to} rejected the transfer")))
    }
}
