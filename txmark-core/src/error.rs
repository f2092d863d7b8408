//! Error types for txmark-core

use thiserror::Error;

use crate::types::MarketId;

/// Result type alias for txmark operations
pub type Result<T> = std::result::Result<T, MarketError>;

/// Error types for registry, market and oracle operations.
///
/// Every failure is a distinct variant so callers can react to it, e.g. retry
/// after `StaleData` once the feed moves, but stop on `AlreadyClaimedWinnings`.
#[derive(Error, Debug)]
pub enum MarketError {
    // Validation
    /// Threshold outside the configured bounds
    #[error("Invalid threshold: {threshold} (allowed {min}..={max})")]
    InvalidThreshold { threshold: u64, min: u64, max: u64 },

    /// Deadline too close, too far, or in the past
    #[error("Invalid deadline: {0}")]
    InvalidDeadline(String),

    /// Market description is blank
    #[error("Market description cannot be empty")]
    EmptyDescription,

    /// Wager of zero
    #[error("Bet amount must be greater than zero")]
    InvalidBetAmount,

    /// Identity string is blank
    #[error("Invalid address: {0:?}")]
    InvalidAddress(String),

    /// Market id is not `0x` followed by 40 hex characters
    #[error("Invalid market id: {0:?}")]
    InvalidMarketId(String),

    /// Coin amount is negative, not a number, or does not fit in base units
    #[error("Invalid coin amount: {0}")]
    InvalidCoinAmount(String),

    /// Batch creation arrays have different lengths
    #[error("Batch length mismatch: {descriptions} descriptions, {thresholds} thresholds, {deadlines} deadlines")]
    BatchLengthMismatch {
        descriptions: usize,
        thresholds: usize,
        deadlines: usize,
    },

    /// Batch creation with nothing in it
    #[error("Batch is empty")]
    EmptyBatch,

    // Authorization
    /// Caller is not an authorized resolver of this oracle
    #[error("{0} is not an authorized resolver")]
    NotAuthorizedResolver(String),

    /// Caller is not the market creator
    #[error("Only the creator can withdraw initial liquidity")]
    OnlyCreatorCanWithdraw,

    /// Caller is not the market's assigned oracle
    #[error("Only the assigned oracle can resolve market {0}")]
    OnlyOracleCanResolve(MarketId),

    /// Caller is not the registry owner
    #[error("{0} is not the registry owner")]
    NotOwner(String),

    /// Caller is not the oracle admin
    #[error("{0} is not the oracle admin")]
    NotAdmin(String),

    // State
    /// No market with this id in the registry
    #[error("Market not found: {0}")]
    MarketNotFound(MarketId),

    /// Market has left the Active state
    #[error("Market {0} is not active")]
    MarketNotActive(MarketId),

    /// Deadline has passed, wagers are no longer accepted
    #[error("Betting closed for market {0}")]
    BettingClosed(MarketId),

    /// Market was already resolved
    #[error("Market {0} is already resolved")]
    MarketAlreadyResolved(MarketId),

    /// Deadline has not been reached yet
    #[error("Market {0} has not expired yet")]
    MarketNotExpired(MarketId),

    /// Claims require a terminal market
    #[error("Market {0} is not resolved")]
    MarketNotResolved(MarketId),

    /// Bettor has no claimable wager
    #[error("No winnings to claim")]
    NoWinningsToClaim,

    /// Every claimable wager of this bettor was already paid out
    #[error("Winnings already claimed")]
    AlreadyClaimedWinnings,

    /// Initial liquidity went back to the creator already
    #[error("Initial liquidity already withdrawn")]
    AlreadyWithdrawn,

    // Data
    /// Feed snapshot is missing or older than the freshness window
    #[error("Feed data is stale (observed at {observed_at}, now {now}, window {window}s)")]
    StaleData { observed_at: u64, now: u64, window: u64 },

    /// Feed push rejected
    #[error("Invalid feed value: {0}")]
    InvalidFeedValue(String),

    // Resolver set
    /// Resolver is already in the set
    #[error("Resolver already exists: {0}")]
    ResolverAlreadyExists(String),

    /// Resolver is not in the set
    #[error("Resolver not found: {0}")]
    ResolverNotFound(String),

    // Effects and persistence
    /// Outbound value transfer was refused; ledger state was rolled back
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// Serde JSON errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// The state file was written by someone else after this copy was loaded
    #[error("State file changed since it was loaded (loaded generation {loaded}, on disk {on_disk})")]
    StaleSnapshot { loaded: u64, on_disk: u64 },

    /// Another writer holds the state file lock
    #[error("State file is locked: {0}")]
    StateLocked(String),

    /// Filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MarketError {
    /// Whether retrying the same call later can succeed without any other
    /// state change than time passing or the feed advancing.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StaleData { .. }
                | Self::MarketNotExpired(_)
                | Self::TransferFailed(_)
                | Self::StateLocked(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        let id: MarketId = "0x00112233445566778899aabbccddeeff00112233".parse().unwrap();
        assert!(MarketError::StaleData {
            observed_at: 0,
            now: 1_000,
            window: 300
        }
        .is_retryable());
        assert!(MarketError::MarketNotExpired(id.clone()).is_retryable());
        assert!(MarketError::StateLocked("held".into()).is_retryable());

        assert!(!MarketError::AlreadyClaimedWinnings.is_retryable());
        assert!(!MarketError::MarketAlreadyResolved(id.clone()).is_retryable());
        assert!(!MarketError::MarketNotActive(id).is_retryable());
        assert!(!MarketError::StaleSnapshot {
            loaded: 1,
            on_disk: 2
        }
        .is_retryable());
    }
}
