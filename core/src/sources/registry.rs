//! Source adapter registry.
//!
//! Builds the concrete adapter set from configuration and provides
//! unified access by name or by source kind. The user-submission intake
//! is always registered; everything else comes from config.

use crate::config::EngineConfig;
use crate::models::SourceKind;
use crate::sources::affiliate::{AffiliateApiAdapter, AffiliateCredentials, AffiliateNetwork};
use crate::sources::rss::RssFeedAdapter;
use crate::sources::scraper::ScraperSiteAdapter;
use crate::sources::submissions::{SubmissionQueue, UserSubmissionAdapter};
use crate::sources::SourceAdapter;
use anyhow::{anyhow, bail, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const SUBMISSION_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub struct SourceRegistry {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Build the registry from configuration. Disabled sources are
    /// skipped; duplicate names are an error.
    pub fn from_config(config: &EngineConfig, submissions: Arc<SubmissionQueue>) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(UserSubmissionAdapter::new(
            submissions,
            SUBMISSION_POLL_INTERVAL,
        )));

        for source in &config.sources {
            if !source.enabled {
                info!("Source {} is disabled, skipping", source.name);
                continue;
            }
            if registry.adapters.contains_key(&source.name) {
                bail!("duplicate source name {:?}", source.name);
            }

            let poll_interval = Duration::from_secs(source.interval_minutes.max(1) * 60);
            let category = source.category.as_deref().unwrap_or("");

            let adapter: Arc<dyn SourceAdapter> = match source.kind {
                SourceKind::Affiliate => {
                    let network_name = source
                        .network
                        .as_deref()
                        .ok_or_else(|| anyhow!("affiliate source {:?} missing network", source.name))?;
                    let network = AffiliateNetwork::parse(network_name).ok_or_else(|| {
                        anyhow!(
                            "affiliate source {:?} has unknown network {:?}",
                            source.name,
                            network_name
                        )
                    })?;
                    let auth = source.auth.clone().unwrap_or_default();
                    Arc::new(AffiliateApiAdapter::new(
                        &source.name,
                        network,
                        AffiliateCredentials {
                            api_key: auth.api_key,
                            partner_id: auth.partner_id,
                            secret_key: auth.secret_key,
                        },
                        source.rate_limit_per_minute,
                        poll_interval,
                        category,
                    ))
                }
                SourceKind::Rss => {
                    let feed_url = source
                        .feed_url
                        .as_deref()
                        .ok_or_else(|| anyhow!("rss source {:?} missing feedUrl", source.name))?;
                    Arc::new(RssFeedAdapter::new(
                        &source.name,
                        feed_url,
                        category,
                        source.rate_limit_per_minute,
                        poll_interval,
                    ))
                }
                SourceKind::Scraper => {
                    let url = source
                        .url
                        .as_deref()
                        .ok_or_else(|| anyhow!("scraper source {:?} missing url", source.name))?;
                    let selectors = source.selectors.clone().ok_or_else(|| {
                        anyhow!("scraper source {:?} missing selectors", source.name)
                    })?;
                    let merchant = source.merchant.as_deref().unwrap_or(url);
                    Arc::new(ScraperSiteAdapter::new(
                        &source.name,
                        url,
                        selectors,
                        category,
                        merchant,
                        source.rate_limit_per_minute,
                        poll_interval,
                    ))
                }
                SourceKind::UserSubmission => {
                    bail!("user_submission sources are built in and cannot be configured")
                }
            };
            registry.register(adapter);
        }

        info!("SourceRegistry initialized with {} adapters", registry.len());
        Ok(registry)
    }

    /// Register an adapter, replacing any existing adapter with the same
    /// name.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(name).cloned()
    }

    /// All adapters of a kind, name-sorted for deterministic fan-out.
    pub fn of_kind(&self, kind: SourceKind) -> Vec<Arc<dyn SourceAdapter>> {
        let mut adapters: Vec<_> = self
            .adapters
            .values()
            .filter(|a| a.kind() == kind)
            .cloned()
            .collect();
        adapters.sort_by(|a, b| a.name().cmp(b.name()));
        adapters
    }

    /// The tightest polling period declared by adapters of a kind.
    pub fn min_poll_interval(&self, kind: SourceKind) -> Option<Duration> {
        self.adapters
            .values()
            .filter(|a| a.kind() == kind)
            .map(|a| a.poll_interval())
            .min()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
