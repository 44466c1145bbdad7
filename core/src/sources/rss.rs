//! RSS feed source adapters.
//!
//! One adapter per curated feed URL. The body is treated as XML only
//! loosely: `<item>` blocks are pulled out with regexes, matching the
//! tolerance of the upstream feeds themselves — a malformed document
//! yields whatever items still match instead of a hard parse failure.
//! Deal feeds embed the price in the title or description text, so items
//! without an extractable price are skipped. A per-feed seen-link set
//! (process lifetime) keeps repeated items from re-entering the pipeline;
//! this is intra-feed dedup, distinct from the global fingerprint dedup.

use crate::models::{RawOffer, SourceKind};
use crate::sources::rate_limit::RequestPacer;
use crate::sources::{
    parse_price_text, AdapterContext, FetchOutcome, SourceAdapter, SourceError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use reqwest::Client;
use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

const RSS_ACCEPT: &str = "application/rss+xml, application/xml, text/xml";

fn item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<item[^>]*>(.*?)</item>").expect("item regex"))
}

fn tag_re(tag: &str) -> Regex {
    Regex::new(&format!(r"(?s)<{tag}[^>]*>(.*?)</{tag}>")).expect("tag regex")
}

fn title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| tag_re("title"))
}

fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| tag_re("link"))
}

fn description_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| tag_re("description"))
}

fn pub_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| tag_re("pubDate"))
}

/// Unwrap a CDATA section and decode the handful of HTML entities feeds
/// actually use.
pub(crate) fn decode_xml_text(raw: &str) -> String {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix("<![CDATA[")
        .and_then(|s| s.strip_suffix("]]>"))
        .unwrap_or(trimmed);
    inner
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .trim()
        .to_string()
}

fn host_of(url: &str) -> Option<&str> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    rest.split('/').next().filter(|h| !h.is_empty())
}

pub struct RssFeedAdapter {
    name: String,
    feed_url: String,
    /// Category assigned to every item this feed emits.
    category: String,
    user_agent: String,
    client: Client,
    pacer: RequestPacer,
    poll_interval: Duration,
    seen_links: Mutex<HashSet<String>>,
}

impl RssFeedAdapter {
    pub fn new(
        name: &str,
        feed_url: &str,
        category: &str,
        rate_limit_per_minute: u32,
        poll_interval: Duration,
    ) -> Self {
        let client = Client::builder().build().expect("Failed to create HTTP client");
        Self {
            name: name.to_string(),
            feed_url: feed_url.to_string(),
            category: category.to_string(),
            user_agent: "dealhawk-rss/0.1".to_string(),
            client,
            pacer: RequestPacer::from_rate_per_minute(
                Duration::from_millis(500),
                rate_limit_per_minute,
            ),
            poll_interval,
            seen_links: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = user_agent.to_string();
        self
    }

    /// Extract offers from a feed body. Items already seen this process
    /// lifetime, and items without an extractable price, are skipped.
    pub fn parse_feed(&self, body: &str, fetched_at: DateTime<Utc>) -> Vec<RawOffer> {
        let mut offers = Vec::new();
        let mut skipped_priceless = 0usize;

        for item in item_re().captures_iter(body) {
            let block = &item[1];

            let Some(title) = title_re().captures(block).map(|c| decode_xml_text(&c[1]))
            else {
                continue;
            };
            let Some(link) = link_re().captures(block).map(|c| decode_xml_text(&c[1]))
            else {
                continue;
            };
            if title.is_empty() || link.is_empty() {
                continue;
            }

            {
                let mut seen = self.seen_links.lock();
                if !seen.insert(link.clone()) {
                    continue;
                }
            }

            let description = description_re()
                .captures(block)
                .map(|c| decode_xml_text(&c[1]))
                .filter(|d| !d.is_empty());

            let price = parse_price_text(&title)
                .or_else(|| description.as_deref().and_then(parse_price_text));
            let Some(price) = price else {
                skipped_priceless += 1;
                continue;
            };

            let listed_at = pub_date_re()
                .captures(block)
                .and_then(|c| DateTime::parse_from_rfc2822(decode_xml_text(&c[1]).as_str()).ok())
                .map(|dt| dt.with_timezone(&Utc));

            let merchant = host_of(&link)
                .or_else(|| host_of(&self.feed_url))
                .unwrap_or("unknown")
                .to_string();

            let mut offer =
                RawOffer::new(&self.name, &link, &title, price, "USD", &merchant, fetched_at);
            offer.description = description;
            offer.category = self.category.clone();
            offer.listed_at = listed_at;
            offers.push(offer);
        }

        if skipped_priceless > 0 {
            debug!(
                "{}: skipped {} feed items without an extractable price",
                self.name, skipped_priceless
            );
        }
        offers
    }

    async fn fetch_body(&self, ctx: &AdapterContext) -> Result<String, SourceError> {
        ctx.ensure_active()?;
        self.pacer.acquire().await;
        ctx.ensure_active()?;

        let response = self
            .client
            .get(&self.feed_url)
            .header("Accept", RSS_ACCEPT)
            .header("User-Agent", &self.user_agent)
            .timeout(ctx.timeout)
            .send()
            .await
            .map_err(SourceError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::from_status(status.as_u16(), &self.name));
        }
        response
            .text()
            .await
            .map_err(|e| SourceError::parse(format!("{}: {e}", self.name)))
    }
}

#[async_trait]
impl SourceAdapter for RssFeedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Rss
    }

    fn min_request_interval(&self) -> Duration {
        self.pacer.min_interval()
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<FetchOutcome, SourceError> {
        let body = self.fetch_body(ctx).await?;
        Ok(FetchOutcome::with_offers(self.parse_feed(&body, Utc::now())))
    }

    async fn search(
        &self,
        ctx: &AdapterContext,
        query: &str,
        _category: Option<&str>,
    ) -> Result<FetchOutcome, SourceError> {
        // Feeds have no search endpoint; filter the current batch instead.
        let mut outcome = self.fetch(ctx).await?;
        let needle = query.to_lowercase();
        outcome
            .offers
            .retain(|offer| offer.title.to_lowercase().contains(&needle));
        Ok(outcome)
    }
}
