//! # Txmark Core
//!
//! Core Rust library for binary threshold prediction markets over an
//! externally observed counter (e.g. the total transaction count of a chain).
//!
//! Every market asks one question: will the observed count reach `threshold`
//! by `deadline`? Bettors back `Above` or `Below`, an oracle fed by an
//! external data source resolves the market once the deadline has passed,
//! and winners split the losing pool pro-rata.
//!
//! ## Features
//!
//! - **Registry**: validated market creation (single and atomic batch), lookup and statistics
//! - **Market Ledger**: wagers, deterministic resolution, claim-once payouts, seed withdrawal
//! - **Oracle**: resolver authorization, feed freshness, isolated batch resolution
//! - **Events**: every state transition is published to subscribers
//! - **Persistence**: the whole state round-trips through a JSON snapshot
//!
//! ## Examples
//!
//! ```rust
//! use txmark_core::{Address, MarketBounds, MarketParams, Oracle, OracleSettings, Registry, Side, Wallets};
//!
//! let owner = Address::new("0xowner")?;
//! let resolver = Address::new("0xresolver")?;
//! let oracle_id = Address::new("0xoracle")?;
//! let alice = Address::new("0xalice")?;
//!
//! let mut oracle = Oracle::new(oracle_id.clone(), resolver.clone(), OracleSettings::default());
//! let mut registry = Registry::new(owner, Some(oracle_id), MarketBounds::default());
//!
//! let now = 1_735_689_600;
//! let id = registry.create_market(
//!     &alice,
//!     MarketParams::new("Will the chain pass 2M transactions?", 2_000_000, now + 86_400),
//!     now,
//! )?;
//! registry.place_bet(&id, &alice, Side::Above, 50_000_000, now)?;
//!
//! let later = now + 86_400;
//! oracle.update_feed(&resolver, 2_100_000, later, later)?;
//! let outcome = oracle.close_all_expired_markets(&mut registry, &resolver, later)?;
//! assert_eq!(outcome.resolved, vec![(id.clone(), Side::Above)]);
//!
//! let mut wallets = Wallets::new();
//! registry.claim_winnings(&id, &alice, &mut wallets)?;
//! assert_eq!(wallets.balance(&alice), 50_000_000);
//! Ok::<(), txmark_core::MarketError>(())
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod market;
pub mod oracle;
pub mod registry;
pub mod state;
pub mod treasury;
pub mod types;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{MarketBounds, OracleSettings};
pub use error::{MarketError, Result};
pub use events::{Event, EventBus};
pub use market::{Market, MarketInfo, Resolution, Wager};
pub use oracle::{BatchResolution, FeedSnapshot, Oracle, OracleStats};
pub use registry::{MarketParams, Registry, RegistryStats};
pub use state::Snapshot;
pub use treasury::{ValueSink, Wallets};
pub use types::{Address, MarketId, MarketStatus, Side, Timestamp};
pub use utils::*;

/// Base units per coin
pub const UNITS_PER_COIN: u64 = 100_000_000;

/// Shortest betting window accepted at creation (1 hour)
pub const DEFAULT_MIN_DURATION: u64 = 3_600;

/// Longest betting window accepted at creation (365 days)
pub const DEFAULT_MAX_DURATION: u64 = 365 * 86_400;

pub const DEFAULT_MIN_THRESHOLD: u64 = 1;

pub const DEFAULT_MAX_THRESHOLD: u64 = 1_000_000_000;

/// Maximum feed age accepted for resolution (1 hour)
pub const DEFAULT_FRESHNESS_WINDOW: u64 = 3_600;
