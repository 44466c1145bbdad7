//! Engine configuration.
//!
//! One structured object loaded at startup. Every level carries
//! `deny_unknown_fields`, so an unrecognized key fails loudly instead of
//! being silently ignored.

use crate::models::SourceKind;
use crate::sources::scraper::SelectorProfile;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_true() -> bool {
    true
}

fn default_interval_minutes() -> u64 {
    15
}

fn default_rate_limit_per_minute() -> u32 {
    30
}

/// Credentials for sources that need them. Which fields are required
/// depends on the network's auth style.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AuthConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub partner_id: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
}

/// One configured source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    /// Affiliate network id (`amazon`, `rakuten`, `cj`, `ebay`,
    /// `walmart`, `bestbuy`). Required for affiliate sources.
    #[serde(default)]
    pub network: Option<String>,
    /// Required for RSS sources.
    #[serde(default)]
    pub feed_url: Option<String>,
    /// Required for scraper sources.
    #[serde(default)]
    pub url: Option<String>,
    /// Category assigned to offers that don't carry their own.
    #[serde(default)]
    pub category: Option<String>,
    /// Merchant label for scraper sources.
    #[serde(default)]
    pub merchant: Option<String>,
    /// Selector profile for scraper sources.
    #[serde(default)]
    pub selectors: Option<SelectorProfile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScoreWeights {
    pub price_history: u32,
    pub discount: u32,
    pub quality: u32,
    pub freshness: u32,
    pub trust: u32,
    pub engagement: u32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            price_history: 30,
            discount: 20,
            quality: 20,
            freshness: 15,
            trust: 10,
            engagement: 5,
        }
    }
}

impl ScoreWeights {
    pub fn total(&self) -> u32 {
        self.price_history + self.discount + self.quality + self.freshness + self.trust
            + self.engagement
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VerdictThresholds {
    pub incredible: u8,
    pub great: u8,
    pub good: u8,
    pub fair: u8,
}

impl Default for VerdictThresholds {
    fn default() -> Self {
        Self {
            incredible: 85,
            great: 70,
            good: 55,
            fair: 40,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: ScoreWeights,
    #[serde(default)]
    pub verdict_thresholds: VerdictThresholds,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DedupConfig {
    #[serde(default = "DedupConfig::default_similarity_threshold")]
    pub similarity_threshold: f64,
}

impl DedupConfig {
    fn default_similarity_threshold() -> f64 {
        0.85
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: Self::default_similarity_threshold(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PriceHistoryConfig {
    #[serde(default = "PriceHistoryConfig::default_tolerance")]
    pub all_time_low_tolerance: f64,
    #[serde(default = "PriceHistoryConfig::default_horizon")]
    pub archival_horizon_days: u32,
}

impl PriceHistoryConfig {
    fn default_tolerance() -> f64 {
        1.02
    }

    fn default_horizon() -> u32 {
        365
    }
}

impl Default for PriceHistoryConfig {
    fn default() -> Self {
        Self {
            all_time_low_tolerance: Self::default_tolerance(),
            archival_horizon_days: Self::default_horizon(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SchedulerConfig {
    #[serde(default = "SchedulerConfig::default_tick")]
    pub tick_interval_seconds: u64,
}

impl SchedulerConfig {
    fn default_tick() -> u64 {
        60
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: Self::default_tick(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub price_history: PriceHistoryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl EngineConfig {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).context("Failed to parse engine configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        let total = self.scoring.weights.total();
        if total != 100 {
            bail!("scoring weights must sum to 100, got {total}");
        }
        let t = &self.scoring.verdict_thresholds;
        if !(t.incredible > t.great && t.great > t.good && t.good > t.fair) {
            bail!(
                "verdict thresholds must be strictly descending: {} / {} / {} / {}",
                t.incredible,
                t.great,
                t.good,
                t.fair
            );
        }
        if !(0.0..=1.0).contains(&self.dedup.similarity_threshold) {
            bail!(
                "dedup similarity threshold must be within [0, 1], got {}",
                self.dedup.similarity_threshold
            );
        }
        if self.price_history.all_time_low_tolerance < 1.0 {
            bail!(
                "all-time-low tolerance must be at least 1.0, got {}",
                self.price_history.all_time_low_tolerance
            );
        }
        if self.scheduler.tick_interval_seconds == 0 {
            bail!("scheduler tick interval must be positive");
        }
        for source in &self.sources {
            match source.kind {
                SourceKind::Affiliate if source.network.is_none() => {
                    bail!("affiliate source {:?} is missing `network`", source.name)
                }
                SourceKind::Rss if source.feed_url.is_none() => {
                    bail!("rss source {:?} is missing `feedUrl`", source.name)
                }
                SourceKind::Scraper if source.url.is_none() || source.selectors.is_none() => {
                    bail!(
                        "scraper source {:?} needs both `url` and `selectors`",
                        source.name
                    )
                }
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scoring.weights.total(), 100);
        assert_eq!(config.dedup.similarity_threshold, 0.85);
        assert_eq!(config.price_history.all_time_low_tolerance, 1.02);
        assert_eq!(config.scheduler.tick_interval_seconds, 60);
    }

    #[test]
    fn test_unknown_keys_fail_loudly() {
        let raw = r#"{"scheduler": {"tickIntervalSeconds": 30, "surprise": true}}"#;
        assert!(EngineConfig::from_json_str(raw).is_err());

        let raw = r#"{"totallyUnknown": 1}"#;
        assert!(EngineConfig::from_json_str(raw).is_err());
    }

    #[test]
    fn test_weights_must_sum_to_100() {
        let raw = r#"{"scoring": {"weights": {
            "priceHistory": 50, "discount": 20, "quality": 20,
            "freshness": 15, "trust": 10, "engagement": 5
        }}}"#;
        let err = EngineConfig::from_json_str(raw).unwrap_err();
        assert!(err.to_string().contains("sum to 100"));
    }

    #[test]
    fn test_source_requirements() {
        let raw = r#"{"sources": [
            {"kind": "affiliate", "name": "amazon-us"}
        ]}"#;
        let err = EngineConfig::from_json_str(raw).unwrap_err();
        assert!(err.to_string().contains("network"));

        let raw = r#"{"sources": [
            {"kind": "rss", "name": "slickdeals", "feedUrl": "https://x/rss"}
        ]}"#;
        let config = EngineConfig::from_json_str(raw).unwrap();
        assert_eq!(config.sources.len(), 1);
        assert!(config.sources[0].enabled);
        assert_eq!(config.sources[0].interval_minutes, 15);
    }

    #[test]
    fn test_full_source_parses() {
        let raw = r#"{"sources": [{
            "kind": "scraper",
            "name": "dealsite",
            "enabled": true,
            "intervalMinutes": 30,
            "rateLimitPerMinute": 10,
            "url": "https://deals.example.com/tech",
            "merchant": "deals.example.com",
            "category": "electronics",
            "selectors": {
                "container": ".card",
                "title": ".title",
                "price": ".price"
            }
        }]}"#;
        let config = EngineConfig::from_json_str(raw).unwrap();
        let selectors = config.sources[0].selectors.as_ref().unwrap();
        assert_eq!(selectors.container, ".card");
        assert!(selectors.in_stock.is_none());
    }
}
