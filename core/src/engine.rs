//! Top-level engine wiring.
//!
//! `Engine` builds every component from one `EngineConfig`, hands each
//! its collaborators explicitly, and registers the default jobs on the
//! scheduler. Nothing in the crate is process-global; a host embeds the
//! engine and drives it through this one value.

use crate::config::EngineConfig;
use crate::history::PriceHistoryStore;
use crate::index::DealIndex;
use crate::models::{ScoredOffer, SourceKind};
use crate::pipeline::{AggregationPipeline, MetricsSnapshot, SourceRunStats};
use crate::scheduler::{JobScheduler, JobSnapshot};
use crate::sources::submissions::SubmissionQueue;
use crate::sources::SourceRegistry;
use crate::store::{keys, MemoryStore, RecordStore};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const AFFILIATE_POLL_INTERVAL: Duration = Duration::from_secs(15 * 60);
const RSS_FETCH_INTERVAL: Duration = Duration::from_secs(10 * 60);
const SCRAPE_INTERVAL: Duration = Duration::from_secs(30 * 60);
const SUBMISSION_DRAIN_INTERVAL: Duration = Duration::from_secs(5 * 60);
const PRICE_VERIFICATION_INTERVAL: Duration = Duration::from_secs(60 * 60);
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct Engine {
    submissions: Arc<SubmissionQueue>,
    index: Arc<DealIndex>,
    pipeline: Arc<AggregationPipeline>,
    scheduler: JobScheduler,
}

impl Engine {
    /// Build an engine over the in-memory store.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    /// Build an engine over a caller-provided record store.
    pub fn with_store(config: EngineConfig, store: Arc<dyn RecordStore>) -> Result<Self> {
        config.validate().context("invalid engine configuration")?;

        let submissions = SubmissionQueue::new();
        let registry = Arc::new(
            SourceRegistry::from_config(&config, submissions.clone())
                .context("failed to build source registry")?,
        );
        let history = Arc::new(PriceHistoryStore::new(
            config.price_history.all_time_low_tolerance,
        ));
        let index = Arc::new(DealIndex::new());
        let pipeline = Arc::new(AggregationPipeline::new(
            registry.clone(),
            &config,
            history,
            index.clone(),
            store.clone(),
        ));
        let scheduler = JobScheduler::new(Duration::from_secs(
            config.scheduler.tick_interval_seconds,
        ));

        let engine = Self {
            submissions,
            index,
            pipeline,
            scheduler,
        };
        engine.register_default_jobs(&registry, store);
        Ok(engine)
    }

    /// The default job set. Poll jobs tighten their interval to the
    /// fastest polling period declared by that kind's enabled adapters.
    fn register_default_jobs(&self, registry: &SourceRegistry, store: Arc<dyn RecordStore>) {
        let poll_jobs = [
            ("affiliate_poll", SourceKind::Affiliate, AFFILIATE_POLL_INTERVAL),
            ("rss_fetch", SourceKind::Rss, RSS_FETCH_INTERVAL),
            ("scrape", SourceKind::Scraper, SCRAPE_INTERVAL),
            (
                "user_submissions",
                SourceKind::UserSubmission,
                SUBMISSION_DRAIN_INTERVAL,
            ),
        ];
        for (name, kind, default_interval) in poll_jobs {
            let interval = registry
                .min_poll_interval(kind)
                .map_or(default_interval, |declared| declared.min(default_interval));
            let pipeline = self.pipeline.clone();
            self.scheduler.register(name, interval, move |cancel| {
                let pipeline = pipeline.clone();
                async move { pipeline.run_sources(kind, cancel).await.map(|_| ()) }
            });
        }

        let pipeline = self.pipeline.clone();
        self.scheduler
            .register("price_verification", PRICE_VERIFICATION_INTERVAL, move |cancel| {
                let pipeline = pipeline.clone();
                async move { pipeline.verify_prices(cancel).await.map(|_| ()) }
            });

        let pipeline = self.pipeline.clone();
        let scheduler = self.scheduler.clone();
        self.scheduler
            .register("maintenance", MAINTENANCE_INTERVAL, move |_cancel| {
                let pipeline = pipeline.clone();
                let scheduler = scheduler.clone();
                let store = store.clone();
                async move {
                    pipeline.prune_history();
                    for snapshot in scheduler.snapshot() {
                        let key = keys::job_stats(&snapshot.name);
                        let record = serde_json::to_value(&snapshot.stats)?;
                        if let Err(err) = store.put(&key, &record).await {
                            warn!("Could not persist stats for {}: {}", snapshot.name, err);
                        }
                    }
                    Ok(())
                }
            });
    }

    /// Start the scheduler's tick loop. Idempotent.
    pub fn start(&self) {
        self.scheduler.start();
        info!("Engine started with jobs: {:?}", self.scheduler.job_names());
    }

    /// Stop scheduling and drain in-flight jobs cooperatively.
    pub async fn stop(&self) {
        self.scheduler.stop().await;
        info!("Engine stopped");
    }

    /// Queue a user-submitted offer for the next intake run.
    pub fn submissions(&self) -> &Arc<SubmissionQueue> {
        &self.submissions
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn pipeline(&self) -> &Arc<AggregationPipeline> {
        &self.pipeline
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.pipeline.metrics()
    }

    pub fn job_snapshots(&self) -> Vec<JobSnapshot> {
        self.scheduler.snapshot()
    }

    pub fn source_stats(&self) -> Vec<(String, SourceRunStats)> {
        self.pipeline.all_source_stats()
    }

    // ------------------------------------------------------------------
    // Query surface
    // ------------------------------------------------------------------

    pub fn search(&self, query: &str, category: Option<&str>) -> Vec<Arc<ScoredOffer>> {
        self.index.search(query, category)
    }

    pub fn top_n(&self, n: usize) -> Vec<Arc<ScoredOffer>> {
        self.index.top_n(n)
    }

    pub fn by_category(&self, prefix: &str) -> Vec<Arc<ScoredOffer>> {
        self.index.by_category(prefix)
    }

    pub fn by_fingerprint(&self, fingerprint: &str) -> Option<Arc<ScoredOffer>> {
        self.index.by_fingerprint(fingerprint)
    }
}
