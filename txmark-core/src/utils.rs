//! # Utility Functions
//!
//! Id derivation, unit conversion and timestamp helpers.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    error::Result,
    types::{Address, MarketId, Timestamp},
    MarketError, UNITS_PER_COIN,
};

/// Derive the id of the `nonce`-th market created by a registry.
pub fn derive_market_id(registry_id: &Uuid, creator: &Address, nonce: u64) -> MarketId {
    let mut hasher = Sha256::new();
    hasher.update(registry_id.as_bytes());
    hasher.update(creator.as_str().as_bytes());
    hasher.update(nonce.to_be_bytes());
    MarketId::from_digest(&hasher.finalize())
}

/// Current wall-clock time as a unix timestamp
pub fn unix_now() -> Timestamp {
    Utc::now().timestamp().max(0) as Timestamp
}

/// Convert base units to coins
pub fn units_to_coins(units: u64) -> f64 {
    units as f64 / UNITS_PER_COIN as f64
}

/// Convert coins to base units, rounding to the nearest unit.
///
/// Rejects negative, non-finite and out-of-range amounts instead of clamping.
pub fn coins_to_units(coins: f64) -> Result<u64> {
    let units = (coins * UNITS_PER_COIN as f64).round();
    if !units.is_finite() || units < 0.0 || units >= u64::MAX as f64 {
        return Err(MarketError::InvalidCoinAmount(coins.to_string()));
    }
    Ok(units as u64)
}

/// Format timestamp as human-readable string
pub fn format_timestamp(timestamp: Timestamp) -> String {
    let dt = DateTime::from_timestamp(timestamp as i64, 0).unwrap_or_default();
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Parse a timestamp given either as unix seconds or as RFC 3339.
///
/// Returns `None` for anything else, including instants before the epoch.
pub fn parse_timestamp(timestamp_str: &str) -> Option<Timestamp> {
    let trimmed = timestamp_str.trim();
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Some(secs);
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .and_then(|dt| u64::try_from(dt.timestamp()).ok())
}

/// Parse a metric published with thousands separators, e.g. `"2,500,000"`.
pub fn parse_count(raw: &str) -> Result<u64> {
    let digits: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '_' | ' '))
        .collect();
    if digits.starts_with('-') {
        return Err(MarketError::InvalidFeedValue(format!(
            "negative count: {raw}"
        )));
    }
    digits
        .parse::<u64>()
        .map_err(|_| MarketError::InvalidFeedValue(format!("not a count: {raw:?}")))
}
