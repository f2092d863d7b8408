//! # Shared Types
//!
//! Identities, sides and lifecycle states used across the registry, the
//! market ledger and the oracle.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{error::Result, MarketError};

/// Unix timestamp in seconds
pub type Timestamp = u64;

/// Opaque participant identity (creator, bettor, resolver, oracle, owner).
///
/// Stored trimmed and lower-cased so `0xABC` and `0xabc` are the same actor.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parse and normalise an identity.
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let normalised = raw.as_ref().trim().to_ascii_lowercase();
        if normalised.is_empty() {
            return Err(MarketError::InvalidAddress(raw.as_ref().to_string()));
        }
        Ok(Self(normalised))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Address {
    type Error = MarketError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

/// Market identifier: `0x` followed by 40 lower-case hex characters.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct MarketId(String);

impl MarketId {
    pub(crate) fn from_digest(digest: &[u8]) -> Self {
        Self(format!("0x{}", hex::encode(&digest[..20])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for MarketId {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        let valid = s.len() == 42
            && s.starts_with("0x")
            && s[2..].chars().all(|c| c.is_ascii_hexdigit());
        if !valid {
            return Err(MarketError::InvalidMarketId(s));
        }
        Ok(Self(s))
    }
}

impl TryFrom<String> for MarketId {
    type Error = MarketError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<MarketId> for String {
    fn from(id: MarketId) -> Self {
        id.0
    }
}

/// The outcome a wager backs.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    /// Observed count at or above the threshold
    Above,
    /// Observed count strictly below the threshold
    Below,
}

impl Side {
    /// Winning side for an observed count. Equality resolves to `Above`.
    pub fn for_observation(observed: u64, threshold: u64) -> Self {
        if observed >= threshold {
            Side::Above
        } else {
            Side::Below
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Side::Above => Side::Below,
            Side::Below => Side::Above,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Above => f.write_str("above"),
            Side::Below => f.write_str("below"),
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "above" | "a" | "0" => Ok(Side::Above),
            "below" | "b" | "1" => Ok(Side::Below),
            other => Err(format!("side must be 'above' or 'below', got {other:?}")),
        }
    }
}

/// Market lifecycle. Leaves `Active` at most once and never comes back.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketStatus {
    Active,
    Resolved,
    Cancelled,
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketStatus::Active => f.write_str("active"),
            MarketStatus::Resolved => f.write_str("resolved"),
            MarketStatus::Cancelled => f.write_str("cancelled"),
        }
    }
}

impl FromStr for MarketStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(MarketStatus::Active),
            "resolved" => Ok(MarketStatus::Resolved),
            "cancelled" | "canceled" => Ok(MarketStatus::Cancelled),
            other => Err(format!("unknown market status {other:?}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_normalisation() {
        let a = Address::new("  0xAbC  ").unwrap();
        assert_eq!(a.as_str(), "0xabc");
        assert_eq!(a, "0xabc".parse::<Address>().unwrap());
        assert!(matches!(
            Address::new("   "),
            Err(MarketError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_address_rejects_blank_when_deserialized() {
        let result: std::result::Result<Address, _> = serde_json::from_str("\"  \"");
        assert!(result.is_err());
    }

    #[test]
    fn test_side_tie_break_favors_above() {
        assert_eq!(Side::for_observation(100, 100), Side::Above);
        assert_eq!(Side::for_observation(101, 100), Side::Above);
        assert_eq!(Side::for_observation(99, 100), Side::Below);
        assert_eq!(Side::Above.opposite(), Side::Below);
    }

    #[test]
    fn test_side_parsing() {
        assert_eq!("Above".parse::<Side>().unwrap(), Side::Above);
        assert_eq!("b".parse::<Side>().unwrap(), Side::Below);
        assert!("sideways".parse::<Side>().is_err());
    }

    #[test]
    fn test_market_id_parsing() {
        let id: MarketId = "0x00112233445566778899AABBCCDDEEFF00112233".parse().unwrap();
        assert_eq!(id.as_str(), "0x00112233445566778899aabbccddeeff00112233");
        assert!("0x1234".parse::<MarketId>().is_err());
        assert!("zz112233445566778899aabbccddeeff0011223344".parse::<MarketId>().is_err());
    }

    #[test]
    fn test_market_id_validated_when_deserialized() {
        let json = "\"0x00112233445566778899aabbccddeeff00112233\"";
        let id: MarketId = serde_json::from_str(json).unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), json);

        let result: std::result::Result<MarketId, _> = serde_json::from_str("\"0x1234\"");
        assert!(result.is_err());
        let result: std::result::Result<MarketId, _> = serde_json::from_str("\"not-an-id\"");
        assert!(result.is_err());
    }
}
