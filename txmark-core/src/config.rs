//! Tunable bounds for market creation and oracle resolution.

use serde::{Deserialize, Serialize};

use crate::{
    types::Timestamp, DEFAULT_FRESHNESS_WINDOW, DEFAULT_MAX_DURATION, DEFAULT_MAX_THRESHOLD,
    DEFAULT_MIN_DURATION, DEFAULT_MIN_THRESHOLD,
};

/// Creation-time limits enforced by the registry.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct MarketBounds {
    /// Shortest allowed `deadline - now`, in seconds
    pub min_duration: u64,
    /// Longest allowed `deadline - now`, in seconds
    pub max_duration: u64,
    pub min_threshold: u64,
    pub max_threshold: u64,
}

impl Default for MarketBounds {
    fn default() -> Self {
        Self {
            min_duration: DEFAULT_MIN_DURATION,
            max_duration: DEFAULT_MAX_DURATION,
            min_threshold: DEFAULT_MIN_THRESHOLD,
            max_threshold: DEFAULT_MAX_THRESHOLD,
        }
    }
}

impl MarketBounds {
    pub fn threshold_allowed(&self, threshold: u64) -> bool {
        (self.min_threshold..=self.max_threshold).contains(&threshold)
    }

    /// `Some(duration)` when the deadline is in the future, `None` otherwise.
    pub fn duration_until(deadline: Timestamp, now: Timestamp) -> Option<u64> {
        deadline.checked_sub(now)
    }

    pub fn duration_allowed(&self, duration: u64) -> bool {
        (self.min_duration..=self.max_duration).contains(&duration)
    }
}

/// Oracle-side settings.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct OracleSettings {
    /// Maximum feed age, in seconds, accepted for resolution
    pub freshness_window: u64,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
        }
    }
}
