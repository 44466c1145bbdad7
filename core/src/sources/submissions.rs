//! User-submission intake.
//!
//! Submitted offers accumulate in a shared in-memory queue; a source
//! adapter drains the queue on its polling schedule so submissions flow
//! through the same normalize/dedup/score path as every other source.

use crate::models::{RawOffer, SourceKind};
use crate::sources::{AdapterContext, FetchOutcome, SourceAdapter, SourceError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const SUBMISSIONS_SOURCE_NAME: &str = "user_submissions";

/// Shared queue of user-submitted offers awaiting ingestion.
#[derive(Debug, Default)]
pub struct SubmissionQueue {
    pending: Mutex<VecDeque<RawOffer>>,
}

impl SubmissionQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn submit(&self, offer: RawOffer) {
        self.pending.lock().push_back(offer);
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    fn drain(&self) -> Vec<RawOffer> {
        self.pending.lock().drain(..).collect()
    }
}

/// Adapter that drains the submission queue. No network, no pacing.
pub struct UserSubmissionAdapter {
    queue: Arc<SubmissionQueue>,
    poll_interval: Duration,
}

impl UserSubmissionAdapter {
    pub fn new(queue: Arc<SubmissionQueue>, poll_interval: Duration) -> Self {
        Self {
            queue,
            poll_interval,
        }
    }
}

#[async_trait]
impl SourceAdapter for UserSubmissionAdapter {
    fn name(&self) -> &str {
        SUBMISSIONS_SOURCE_NAME
    }

    fn kind(&self) -> SourceKind {
        SourceKind::UserSubmission
    }

    fn min_request_interval(&self) -> Duration {
        Duration::ZERO
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<FetchOutcome, SourceError> {
        ctx.ensure_active()?;
        let offers = self.queue.drain();
        if !offers.is_empty() {
            debug!("Drained {} user submissions", offers.len());
        }
        Ok(FetchOutcome::with_offers(offers))
    }

    async fn search(
        &self,
        ctx: &AdapterContext,
        query: &str,
        _category: Option<&str>,
    ) -> Result<FetchOutcome, SourceError> {
        // Searching the intake inspects pending submissions without
        // consuming them.
        ctx.ensure_active()?;
        let needle = query.to_lowercase();
        let offers = self
            .queue
            .pending
            .lock()
            .iter()
            .filter(|offer| offer.title.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        Ok(FetchOutcome::with_offers(offers))
    }
}
