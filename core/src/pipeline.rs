//! Aggregation pipeline.
//!
//! One run: fan out to every enabled adapter of a source kind, wait for
//! all of them (no fail-fast), normalize the survivors, collapse
//! duplicates, score each representative against its price history, and
//! commit to the index, the record store, and the history - in that
//! order. A cancelled run drops its batch before the commit phase; no
//! partial batch reaches the index.

use crate::config::EngineConfig;
use crate::dedup::Deduper;
use crate::history::PriceHistoryStore;
use crate::index::DealIndex;
use crate::models::{CanonicalOffer, PricePoint, RawOffer, SourceKind};
use crate::normalize::normalize;
use crate::scorer::DealScorer;
use crate::sources::{AdapterContext, CancelToken, SourceError, SourceRegistry};
use crate::store::{keys, RecordStore};
use anyhow::{bail, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::join_all;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Process-wide pipeline counters.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    fetched: AtomicU64,
    malformed_dropped: AtomicU64,
    duplicates_collapsed: AtomicU64,
    indexed: AtomicU64,
    store_write_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub fetched: u64,
    pub malformed_dropped: u64,
    pub duplicates_collapsed: u64,
    pub indexed: u64,
    pub store_write_errors: u64,
}

impl PipelineMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fetched: self.fetched.load(Ordering::Relaxed),
            malformed_dropped: self.malformed_dropped.load(Ordering::Relaxed),
            duplicates_collapsed: self.duplicates_collapsed.load(Ordering::Relaxed),
            indexed: self.indexed.load(Ordering::Relaxed),
            store_write_errors: self.store_write_errors.load(Ordering::Relaxed),
        }
    }
}

/// Per-source run accounting, kept across runs so operators can spot a
/// source that keeps failing while the job as a whole stays green.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRunStats {
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub offers_last_run: usize,
}

/// Result of one pipeline run, reported back to the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub sources_total: usize,
    pub sources_failed: usize,
    pub fetched: usize,
    pub malformed: usize,
    pub duplicates: usize,
    pub indexed: usize,
}

pub struct AggregationPipeline {
    registry: Arc<SourceRegistry>,
    deduper: Deduper,
    scorer: DealScorer,
    history: Arc<PriceHistoryStore>,
    index: Arc<DealIndex>,
    store: Arc<dyn RecordStore>,
    metrics: PipelineMetrics,
    source_stats: Mutex<FxHashMap<String, SourceRunStats>>,
    request_timeout: Duration,
    archival_horizon_days: u32,
}

impl AggregationPipeline {
    pub fn new(
        registry: Arc<SourceRegistry>,
        config: &EngineConfig,
        history: Arc<PriceHistoryStore>,
        index: Arc<DealIndex>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            registry,
            deduper: Deduper::new(config.dedup.similarity_threshold),
            scorer: DealScorer::new(&config.scoring),
            history,
            index,
            store,
            metrics: PipelineMetrics::default(),
            source_stats: Mutex::new(FxHashMap::default()),
            request_timeout: crate::sources::DEFAULT_REQUEST_TIMEOUT,
            archival_horizon_days: config.price_history.archival_horizon_days,
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn source_stats(&self, name: &str) -> Option<SourceRunStats> {
        self.source_stats.lock().get(name).cloned()
    }

    pub fn all_source_stats(&self) -> Vec<(String, SourceRunStats)> {
        let stats = self.source_stats.lock();
        let mut out: Vec<_> = stats.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Run the full pipeline for every enabled adapter of one kind.
    ///
    /// The run fails only when every adapter of the kind failed; a single
    /// healthy source keeps the job green, and each failure is still
    /// recorded in that source's stats.
    pub async fn run_sources(&self, kind: SourceKind, cancel: CancelToken) -> Result<RunSummary> {
        let run_id = Uuid::new_v4().to_string();
        let adapters = self.registry.of_kind(kind);
        let mut summary = RunSummary {
            run_id: run_id.clone(),
            sources_total: adapters.len(),
            ..RunSummary::default()
        };
        if adapters.is_empty() {
            debug!("Run {}: no {} adapters configured", run_id, kind.as_str());
            return Ok(summary);
        }

        let ctx = AdapterContext::new(cancel.clone(), self.request_timeout);
        let fetches = adapters.iter().map(|adapter| {
            let adapter = adapter.clone();
            let ctx = ctx.clone();
            async move {
                let result = tokio::select! {
                    result = adapter.fetch(&ctx) => result,
                    _ = ctx.cancel.cancelled() => Err(SourceError::cancelled()),
                };
                (adapter.name().to_string(), result)
            }
        });

        // No fail-fast: every adapter reports in before the batch moves on.
        let mut raw: Vec<RawOffer> = Vec::new();
        let mut any_ok = false;
        for (name, result) in join_all(fetches).await {
            let mut stats = self.source_stats.lock();
            let entry = stats.entry(name.clone()).or_default();
            match result {
                Ok(outcome) => {
                    any_ok = true;
                    entry.last_success = Some(Utc::now());
                    entry.consecutive_failures = 0;
                    entry.offers_last_run = outcome.offers.len();
                    debug!("Run {}: {} returned {} offers", run_id, name, outcome.offers.len());
                    raw.extend(outcome.offers);
                }
                Err(err) => {
                    summary.sources_failed += 1;
                    entry.consecutive_failures += 1;
                    entry.offers_last_run = 0;
                    entry.last_error = Some(err.to_string());
                    warn!("Run {}: {} failed: {}", run_id, name, err);
                }
            }
        }
        if !any_ok {
            bail!(
                "all {} {} sources failed",
                summary.sources_total,
                kind.as_str()
            );
        }

        summary.fetched = raw.len();
        self.metrics.fetched.fetch_add(raw.len() as u64, Ordering::Relaxed);

        // Stage 2: normalize, dropping malformed records with a counter.
        let mut canonical: Vec<CanonicalOffer> = Vec::with_capacity(raw.len());
        for offer in &raw {
            match normalize(offer) {
                Ok(c) => canonical.push(c),
                Err(err) => {
                    summary.malformed += 1;
                    debug!("Run {}: dropped malformed offer from {}: {}", run_id, offer.source, err);
                }
            }
        }
        self.metrics
            .malformed_dropped
            .fetch_add(summary.malformed as u64, Ordering::Relaxed);

        // Stage 3: collapse duplicates.
        let before = canonical.len();
        let representatives = self.deduper.dedupe(canonical);
        summary.duplicates = before - representatives.len();
        self.metrics
            .duplicates_collapsed
            .fetch_add(summary.duplicates as u64, Ordering::Relaxed);

        // A cancelled run commits nothing.
        if cancel.is_cancelled() {
            bail!("run {} cancelled before commit", run_id);
        }

        // Stage 4 and 5: score against pre-observation history, then
        // commit index -> store -> history per representative.
        summary.indexed = self.commit(&run_id, representatives).await;

        info!(
            "Run {} ({}): {} fetched, {} malformed, {} duplicates, {} indexed, {}/{} sources failed",
            run_id,
            kind.as_str(),
            summary.fetched,
            summary.malformed,
            summary.duplicates,
            summary.indexed,
            summary.sources_failed,
            summary.sources_total
        );
        Ok(summary)
    }

    /// Score and commit a deduped batch. Stats are derived from the
    /// history as it stood before this observation, otherwise every offer
    /// would trivially be its own all-time low.
    async fn commit(&self, run_id: &str, representatives: Vec<CanonicalOffer>) -> usize {
        let mut indexed = 0;
        for offer in representatives {
            let stats = self
                .history
                .stats_for(&offer.fingerprint, offer.current_price);
            let scored = self.scorer.score(&offer, Some(&stats));
            let point = PricePoint {
                fingerprint: offer.fingerprint.clone(),
                price: offer.current_price,
                observed_at: offer.fetched_at,
                source: offer.source.clone(),
            };

            self.index.insert(scored.clone());
            indexed += 1;
            self.metrics.indexed.fetch_add(1, Ordering::Relaxed);

            match serde_json::to_value(&scored) {
                Ok(record) => {
                    let key = keys::scored_offer(&scored.offer.fingerprint);
                    if let Err(err) = self.store.put(&key, &record).await {
                        // The in-memory index keeps the record either way.
                        self.metrics.store_write_errors.fetch_add(1, Ordering::Relaxed);
                        warn!("Run {}: store write for {} failed: {}", run_id, key, err);
                    }
                }
                Err(err) => {
                    self.metrics.store_write_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Run {}: could not serialize {}: {}", run_id, scored.offer.fingerprint, err);
                }
            }

            self.history.append(point);
        }
        indexed
    }

    /// Re-score everything in the index against the history as it stands.
    /// No network; the poll jobs own re-fetching.
    pub async fn verify_prices(&self, cancel: CancelToken) -> Result<usize> {
        let records = self.index.all();
        let mut rescored = 0;
        for record in records {
            if cancel.is_cancelled() {
                bail!("price verification cancelled after {rescored} offers");
            }
            let offer = record.offer.clone();
            let stats = self
                .history
                .stats_for(&offer.fingerprint, offer.current_price);
            let scored = self.scorer.score(&offer, Some(&stats));
            if scored.score != record.score {
                debug!(
                    "Price verification moved {} from {} to {}",
                    offer.fingerprint, record.score, scored.score
                );
            }
            self.index.insert(scored);
            rescored += 1;
        }
        info!("Price verification rescored {} offers", rescored);
        Ok(rescored)
    }

    /// Drop price history past the archival horizon. Stats for surviving
    /// fingerprints are unaffected.
    pub fn prune_history(&self) -> usize {
        let cutoff = Utc::now() - ChronoDuration::days(self.archival_horizon_days as i64);
        let removed = self.history.prune_before(cutoff);
        if removed > 0 {
            info!("Maintenance pruned {} price points older than {} days", removed, self.archival_horizon_days);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::models::RawOffer;
    use crate::sources::submissions::{SubmissionQueue, UserSubmissionAdapter};
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn pipeline_with(registry: SourceRegistry) -> AggregationPipeline {
        let config = EngineConfig::default();
        AggregationPipeline::new(
            Arc::new(registry),
            &config,
            Arc::new(PriceHistoryStore::new(
                config.price_history.all_time_low_tolerance,
            )),
            Arc::new(DealIndex::new()),
            Arc::new(MemoryStore::new()),
        )
    }

    #[tokio::test]
    async fn test_run_with_no_adapters_is_empty_success() {
        let pipeline = pipeline_with(SourceRegistry::new());
        let summary = pipeline
            .run_sources(SourceKind::Affiliate, CancelToken::detached())
            .await
            .unwrap();
        assert_eq!(summary.sources_total, 0);
        assert_eq!(summary.indexed, 0);
    }

    #[tokio::test]
    async fn test_submission_flow_reaches_index_and_history() {
        let queue = SubmissionQueue::new();
        let fetched_at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let mut offer = RawOffer::new(
            "user_submissions",
            "sub-1",
            "Sony WH-1000XM5 Wireless Headphones",
            299.0,
            "USD",
            "bestbuy.com",
            fetched_at,
        );
        offer.original_price = Some(399.0);
        queue.submit(offer);

        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(UserSubmissionAdapter::new(
            queue.clone(),
            Duration::from_secs(300),
        )));
        let pipeline = pipeline_with(registry);

        let summary = pipeline
            .run_sources(SourceKind::UserSubmission, CancelToken::detached())
            .await
            .unwrap();
        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.indexed, 1);
        assert!(queue.is_empty());

        let indexed = pipeline.index.all();
        assert_eq!(indexed.len(), 1);
        assert_eq!(indexed[0].offer.marketplace, "Best Buy");
        // First observation: empty history, so the price point lands after
        // scoring and the record reads as an all-time low.
        assert_eq!(
            pipeline
                .history
                .series_for(&indexed[0].offer.fingerprint, None)
                .len(),
            1
        );
        assert_eq!(
            indexed[0].recommendation,
            crate::models::Recommendation::BuyNow
        );
    }

    #[tokio::test]
    async fn test_verify_prices_rescores_index() {
        let queue = SubmissionQueue::new();
        let fetched_at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        queue.submit(RawOffer::new(
            "user_submissions",
            "sub-1",
            "Anker 737 Power Bank",
            149.0,
            "USD",
            "amazon.com",
            fetched_at,
        ));

        let mut registry = SourceRegistry::new();
        registry.register(Arc::new(UserSubmissionAdapter::new(
            queue,
            Duration::from_secs(300),
        )));
        let pipeline = pipeline_with(registry);
        pipeline
            .run_sources(SourceKind::UserSubmission, CancelToken::detached())
            .await
            .unwrap();

        let rescored = pipeline.verify_prices(CancelToken::detached()).await.unwrap();
        assert_eq!(rescored, 1);
        assert_eq!(pipeline.index.len(), 1);
    }
}
