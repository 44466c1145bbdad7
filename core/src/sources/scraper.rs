//! HTML scraper source adapters.
//!
//! Each scraped site gets a `SelectorProfile` mapping the fields we care
//! about to CSS selectors. Fetches rotate through a small fixed pool of
//! user agents. Stock status is detected with regexes over the whole
//! page, with a per-card selector override when the profile provides one.

use crate::models::{RawOffer, SourceKind, StockStatus};
use crate::sources::rate_limit::RequestPacer;
use crate::sources::{
    parse_price_text, AdapterContext, FetchOutcome, SourceAdapter, SourceError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use regex::Regex;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

static USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

fn out_of_stock_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(out of stock|sold out|unavailable)\b").expect("stock regex")
    })
}

fn low_stock_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(only\s+\d+\s+left|low stock)\b").expect("stock regex"))
}

/// Detect stock state from free text.
pub(crate) fn detect_stock(text: &str) -> StockStatus {
    if out_of_stock_re().is_match(text) {
        StockStatus::OutOfStock
    } else if low_stock_re().is_match(text) {
        StockStatus::LowStock
    } else {
        StockStatus::InStock
    }
}

/// CSS selectors describing where offer fields live on a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SelectorProfile {
    pub container: String,
    pub title: String,
    pub price: String,
    #[serde(default)]
    pub original_price: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub in_stock: Option<String>,
}

struct CompiledProfile {
    container: Selector,
    title: Selector,
    price: Selector,
    original_price: Option<Selector>,
    image: Option<Selector>,
    link: Option<Selector>,
    in_stock: Option<Selector>,
}

fn compile(selector: &str) -> Result<Selector, SourceError> {
    Selector::parse(selector)
        .map_err(|e| SourceError::parse(format!("invalid selector {selector:?}: {e}")))
}

impl SelectorProfile {
    fn compile(&self) -> Result<CompiledProfile, SourceError> {
        Ok(CompiledProfile {
            container: compile(&self.container)?,
            title: compile(&self.title)?,
            price: compile(&self.price)?,
            original_price: self.original_price.as_deref().map(compile).transpose()?,
            image: self.image.as_deref().map(compile).transpose()?,
            link: self.link.as_deref().map(compile).transpose()?,
            in_stock: self.in_stock.as_deref().map(compile).transpose()?,
        })
    }
}

fn first_text(el: &ElementRef, selector: &Selector) -> Option<String> {
    el.select(selector)
        .next()
        .map(|n| n.text().collect::<String>())
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
}

fn first_attr(el: &ElementRef, selector: &Selector, attr: &str) -> Option<String> {
    el.select(selector)
        .next()
        .and_then(|n| n.value().attr(attr))
        .map(str::to_string)
        .filter(|v| !v.is_empty())
}

pub struct ScraperSiteAdapter {
    name: String,
    url: String,
    profile: SelectorProfile,
    category: String,
    merchant: String,
    client: Client,
    pacer: RequestPacer,
    poll_interval: Duration,
}

impl ScraperSiteAdapter {
    pub fn new(
        name: &str,
        url: &str,
        profile: SelectorProfile,
        category: &str,
        merchant: &str,
        rate_limit_per_minute: u32,
        poll_interval: Duration,
    ) -> Self {
        let client = Client::builder().build().expect("Failed to create HTTP client");
        Self {
            name: name.to_string(),
            url: url.to_string(),
            profile,
            category: category.to_string(),
            merchant: merchant.to_string(),
            client,
            pacer: RequestPacer::from_rate_per_minute(
                // Scrapes stay polite regardless of configuration.
                Duration::from_secs(2),
                rate_limit_per_minute,
            ),
            poll_interval,
        }
    }

    fn origin(&self) -> String {
        let rest = self
            .url
            .strip_prefix("https://")
            .or_else(|| self.url.strip_prefix("http://"))
            .unwrap_or(&self.url);
        let host = rest.split('/').next().unwrap_or(rest);
        format!("https://{host}")
    }

    fn absolutize(&self, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            link.to_string()
        } else if link.starts_with('/') {
            format!("{}{}", self.origin(), link)
        } else {
            format!("{}/{}", self.origin(), link)
        }
    }

    /// Extract offers from a page. Zero container matches is an empty
    /// batch, not an error.
    pub fn parse_page(
        &self,
        html: &str,
        fetched_at: DateTime<Utc>,
    ) -> Result<Vec<RawOffer>, SourceError> {
        let compiled = self.profile.compile()?;
        let document = Html::parse_document(html);

        let page_stock = detect_stock(html);

        let mut offers = Vec::new();
        for (idx, card) in document.select(&compiled.container).enumerate() {
            let Some(title) = first_text(&card, &compiled.title) else {
                continue;
            };
            let Some(price) = first_text(&card, &compiled.price)
                .as_deref()
                .and_then(parse_price_text)
            else {
                continue;
            };

            let link = compiled
                .link
                .as_ref()
                .and_then(|sel| first_attr(&card, sel, "href"))
                .map(|href| self.absolutize(&href));
            let external_id = link
                .clone()
                .unwrap_or_else(|| format!("{}#{}", self.url, idx));

            let stock = compiled
                .in_stock
                .as_ref()
                .and_then(|sel| first_text(&card, sel))
                .map(|text| detect_stock(&text))
                .unwrap_or(page_stock);

            let mut offer = RawOffer::new(
                &self.name,
                &external_id,
                &title,
                price,
                "USD",
                &self.merchant,
                fetched_at,
            );
            offer.category = self.category.clone();
            offer.stock = stock;
            offer.original_price = compiled
                .original_price
                .as_ref()
                .and_then(|sel| first_text(&card, sel))
                .as_deref()
                .and_then(parse_price_text);
            offer.image_url = compiled
                .image
                .as_ref()
                .and_then(|sel| first_attr(&card, sel, "src"));
            offers.push(offer);
        }
        Ok(offers)
    }

    async fn fetch_body(&self, ctx: &AdapterContext) -> Result<String, SourceError> {
        ctx.ensure_active()?;
        self.pacer.acquire().await;
        ctx.ensure_active()?;

        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);

        debug!("Scraping {} with rotated user agent", self.name);

        let response = self
            .client
            .get(&self.url)
            .header("User-Agent", user_agent)
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
impl SourceAdapter for ScraperSiteAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Scraper
    }

    fn min_request_interval(&self) -> Duration {
        self.pacer.min_interval()
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<FetchOutcome, SourceError> {
        let body = self.fetch_body(ctx).await?;
        let offers = self.parse_page(&body, Utc::now())?;
        Ok(FetchOutcome::with_offers(offers))
    }

    async fn search(
        &self,
        ctx: &AdapterContext,
        query: &str,
        _category: Option<&str>,
    ) -> Result<FetchOutcome, SourceError> {
        // Scraped sites are fetched whole; filter the parsed batch.
        let mut outcome = self.fetch(ctx).await?;
        let needle = query.to_lowercase();
        outcome
            .offers
            .retain(|offer| offer.title.to_lowercase().contains(&needle));
        Ok(outcome)
    }
}
