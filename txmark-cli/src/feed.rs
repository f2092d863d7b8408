//! # Data Feed Adapter
//!
//! Polls an explorer statistics endpoint for the total transaction count and
//! pushes it into the oracle, then resolves whatever has expired.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use txmark_core::{parse_count, unix_now, Address, BatchResolution, Snapshot, Timestamp};

pub const DEFAULT_STATS_URL: &str = "https://intuition-testnet.explorer.caldera.xyz/api/v2/stats";

/// JSON field holding the metric
pub const COUNT_FIELD: &str = "total_transactions";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct FeedSettings {
    pub url: String,
    pub poll_interval_secs: u64,
    pub retry_attempts: u32,
    /// Base delay between attempts, doubled after each failure
    pub retry_delay_ms: u64,
    /// Bound on a single request
    pub timeout_secs: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_STATS_URL.to_string(),
            poll_interval_secs: 300,
            retry_attempts: 3,
            retry_delay_ms: 5_000,
            timeout_secs: 15,
        }
    }
}

/// One observation of the metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeedSample {
    pub count: u64,
    pub observed_at: Timestamp,
}

/// Extract the count from a stats response body.
///
/// Explorers publish the value as a string with thousands separators
/// (`"2,500,000"`), some as a plain number.
pub fn parse_stats(body: &serde_json::Value) -> Result<u64> {
    match body.get(COUNT_FIELD) {
        Some(serde_json::Value::String(raw)) => Ok(parse_count(raw)?),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .ok_or_else(|| anyhow!("{COUNT_FIELD} is not a non-negative integer: {n}")),
        Some(other) => Err(anyhow!("unexpected {COUNT_FIELD} value: {other}")),
        None => Err(anyhow!("response has no {COUNT_FIELD} field")),
    }
}

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

pub struct StatsClient {
    http: Client,
    settings: FeedSettings,
}

impl StatsClient {
    pub fn new(settings: FeedSettings) -> Self {
        Self {
            http: Client::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &FeedSettings {
        &self.settings
    }

    /// Single request, no retry.
    pub async fn fetch(&self) -> Result<FeedSample> {
        debug!(url = %self.settings.url, "fetching stats");
        let response = self
            .http
            .get(&self.settings.url)
            .header("Accept", "application/json")
            .send()
            .await
            .with_context(|| format!("requesting {}", self.settings.url))?;

        if !response.status().is_success() {
            return Err(anyhow!("stats endpoint returned {}", response.status()));
        }

        let body: serde_json::Value = response.json().await.context("decoding stats body")?;
        let count = parse_stats(&body)?;
        Ok(FeedSample {
            count,
            observed_at: unix_now(),
        })
    }

    /// Up to `retry_attempts` attempts, each bounded by `timeout_secs`.
    pub async fn fetch_with_retry(&self) -> Result<FeedSample> {
        let attempts = self.settings.retry_attempts.max(1);
        let timeout = Duration::from_secs(self.settings.timeout_secs);
        let base = Duration::from_millis(self.settings.retry_delay_ms);

        let mut last_error = anyhow!("no attempt made");
        for attempt in 1..=attempts {
            let result = match tokio::time::timeout(timeout, self.fetch()).await {
                Ok(result) => result,
                Err(_) => Err(anyhow!("request timed out after {}s", timeout.as_secs())),
            };
            match result {
                Ok(sample) => return Ok(sample),
                Err(err) if attempt < attempts => {
                    let delay = backoff_delay(base, attempt);
                    warn!(
                        attempt,
                        max_attempts = attempts,
                        error = %err,
                        delay_ms = delay.as_millis(),
                        "stats fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    last_error = err;
                }
                Err(err) => last_error = err,
            }
        }

        Err(last_error.context(format!("stats fetch failed after {attempts} attempts")))
    }
}

/// Push one sample and resolve everything that has expired.
pub fn apply_sample(
    snapshot: &mut Snapshot,
    resolver: &Address,
    sample: FeedSample,
    now: Timestamp,
) -> Result<BatchResolution> {
    snapshot
        .oracle
        .update_feed(resolver, sample.count, sample.observed_at, now)?;
    let outcome = snapshot
        .oracle
        .close_all_expired_markets(&mut snapshot.registry, resolver, now)?;
    for (market, side) in &outcome.resolved {
        info!(%market, %side, "resolved by poller");
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use txmark_core::{
        MarketBounds, MarketParams, MarketStatus, Oracle, OracleSettings, Registry, Side,
    };

    const NOW: Timestamp = 1_735_689_600;

    fn addr(raw: &str) -> Address {
        Address::new(raw).unwrap()
    }

    #[test]
    fn test_parse_stats() {
        assert_eq!(
            parse_stats(&json!({ "total_transactions": "2,500,000" })).unwrap(),
            2_500_000
        );
        assert_eq!(parse_stats(&json!({ "total_transactions": 42 })).unwrap(), 42);
        assert!(parse_stats(&json!({ "total_transactions": -1 })).is_err());
        assert!(parse_stats(&json!({ "total_transactions": "-1" })).is_err());
        assert!(parse_stats(&json!({ "total_blocks": "10" })).is_err());
        assert!(parse_stats(&json!({ "total_transactions": null })).is_err());
    }

    #[test]
    fn test_backoff_delay() {
        let base = Duration::from_secs(5);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(5));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(10));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(20));
    }

    #[test]
    fn test_apply_sample_resolves_expired() {
        let resolver = addr("0xresolver");
        let registry = Registry::new(addr("0xowner"), Some(addr("0xoracle")), MarketBounds::default());
        let oracle = Oracle::new(addr("0xoracle"), resolver.clone(), OracleSettings::default());
        let mut snapshot = Snapshot::new(registry, oracle);
        let deadline = NOW + 7_200;
        let id = snapshot
            .registry
            .create_market(&addr("0xcreator"), MarketParams::new("q", 100, deadline), NOW)
            .unwrap();

        let early = apply_sample(
            &mut snapshot,
            &resolver,
            FeedSample { count: 150, observed_at: NOW + 60 },
            NOW + 60,
        )
        .unwrap();
        assert!(early.is_empty());

        let outcome = apply_sample(
            &mut snapshot,
            &resolver,
            FeedSample { count: 99, observed_at: deadline },
            deadline,
        )
        .unwrap();
        assert_eq!(outcome.resolved, vec![(id.clone(), Side::Below)]);
        assert_eq!(
            snapshot.registry.market(&id).unwrap().status(),
            MarketStatus::Resolved
        );
    }

    #[test]
    fn test_apply_sample_rejects_unknown_resolver() {
        let registry = Registry::new(addr("0xowner"), Some(addr("0xoracle")), MarketBounds::default());
        let oracle = Oracle::new(addr("0xoracle"), addr("0xresolver"), OracleSettings::default());
        let mut snapshot = Snapshot::new(registry, oracle);
        let sample = FeedSample { count: 1, observed_at: NOW };
        assert!(apply_sample(&mut snapshot, &addr("0xmallory"), sample, NOW).is_err());
        assert!(!snapshot.oracle.latest_feed().valid);
    }

    #[tokio::test]
    async fn test_fetch_with_retry_gives_up() {
        let client = StatsClient::new(FeedSettings {
            url: "http://127.0.0.1:9/api/v2/stats".to_string(),
            poll_interval_secs: 1,
            retry_attempts: 2,
            retry_delay_ms: 1,
            timeout_secs: 2,
        });
        let err = client.fetch_with_retry().await.unwrap_err();
        assert!(err.to_string().contains("after 2 attempts"), "{err:#}");
    }
}
