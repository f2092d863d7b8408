//! Operator settings, read from an optional JSON file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use txmark_core::{MarketBounds, OracleSettings};

use crate::feed::FeedSettings;

pub const DEFAULT_STATE_PATH: &str = "txmark-state.json";

/// Every field is optional in the file; missing ones take their defaults.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub state_path: PathBuf,
    pub bounds: MarketBounds,
    pub oracle: OracleSettings,
    pub feed: FeedSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            bounds: MarketBounds::default(),
            oracle: OracleSettings::default(),
            feed: FeedSettings::default(),
        }
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.state_path, PathBuf::from(DEFAULT_STATE_PATH));
    }

    #[test]
    fn test_partial_file() {
        let settings: Settings = serde_json::from_str(
            r#"{
                "state_path": "/tmp/markets.json",
                "oracle": { "freshness_window": 600 },
                "feed": { "retry_attempts": 5 }
            }"#,
        )
        .unwrap();
        assert_eq!(settings.state_path, PathBuf::from("/tmp/markets.json"));
        assert_eq!(settings.oracle.freshness_window, 600);
        assert_eq!(settings.feed.retry_attempts, 5);
        assert_eq!(settings.feed.poll_interval_secs, FeedSettings::default().poll_interval_secs);
        assert_eq!(settings.bounds, MarketBounds::default());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("missing.json"))).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("txmark.json");
        std::fs::write(&path, r#"{ "feed": { "url": "http://localhost:4000/api/v2/stats" } }"#)
            .unwrap();
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.feed.url, "http://localhost:4000/api/v2/stats");
        assert_eq!(settings.state_path, PathBuf::from(DEFAULT_STATE_PATH));
    }
}
