// Shared models for Dealhawk services
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Offer Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    #[default]
    New,
    Used,
    Refurbished,
    LikeNew,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    #[default]
    InStock,
    LowStock,
    OutOfStock,
}

/// Kind of upstream a source adapter talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Affiliate,
    Rss,
    Scraper,
    UserSubmission,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Affiliate => "affiliate",
            SourceKind::Rss => "rss",
            SourceKind::Scraper => "scraper",
            SourceKind::UserSubmission => "user_submission",
        }
    }
}

// ============================================================================
// Raw Offer (adapter output)
// ============================================================================

/// An offer exactly as a source adapter emitted it, before normalization.
///
/// The only guarantees are a non-empty title, a price, and a currency tag;
/// everything else is best-effort from the upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawOffer {
    /// Identifier within the source (ASIN, SKU, item link, ...)
    pub external_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub current_price: f64,
    #[serde(default)]
    pub original_price: Option<f64>,
    pub currency: String,
    pub merchant: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub condition: Condition,
    #[serde(default)]
    pub stock: StockStatus,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub review_count: Option<u32>,
    #[serde(default)]
    pub seller_rating: Option<f64>,
    #[serde(default)]
    pub views: Option<u32>,
    #[serde(default)]
    pub saves: Option<u32>,
    /// When the listing first appeared upstream, if the source reports it.
    #[serde(default)]
    pub listed_at: Option<DateTime<Utc>>,
    /// Name of the source adapter that produced this offer.
    pub source: String,
    pub fetched_at: DateTime<Utc>,
}

impl RawOffer {
    /// Minimal constructor; optional fields start empty.
    pub fn new(
        source: &str,
        external_id: &str,
        title: &str,
        current_price: f64,
        currency: &str,
        merchant: &str,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            external_id: external_id.to_string(),
            title: title.to_string(),
            description: None,
            image_url: None,
            current_price,
            original_price: None,
            currency: currency.to_string(),
            merchant: merchant.to_string(),
            brand: None,
            category: String::new(),
            condition: Condition::New,
            stock: StockStatus::InStock,
            rating: None,
            review_count: None,
            seller_rating: None,
            views: None,
            saves: None,
            listed_at: None,
            source: source.to_string(),
            fetched_at,
        }
    }
}

// ============================================================================
// Canonical Offer (normalizer output)
// ============================================================================

/// A normalized offer: cleaned title, canonical brand/marketplace/category,
/// derived discount, and the product-identity fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalOffer {
    pub external_id: String,
    pub source: String,
    /// Cleaned, titlecased title.
    pub title: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub current_price: f64,
    /// Present only when strictly greater than `current_price`.
    pub original_price: Option<f64>,
    /// Three uppercase ASCII letters.
    pub currency: String,
    /// Raw merchant string from the source.
    pub merchant: String,
    /// Canonical retailer name from the marketplace map.
    pub marketplace: String,
    /// Canonical brand, or `Unknown`.
    pub brand: String,
    /// Canonical hierarchy, e.g. `Electronics > Computers > Laptops`.
    pub category: String,
    /// Model token extracted from the title, when one matched.
    pub model: Option<String>,
    /// `round(100 * (orig - curr) / orig)`, absent when there is no markdown.
    pub discount_percent: Option<u8>,
    pub condition: Condition,
    pub stock: StockStatus,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    pub seller_rating: Option<f64>,
    pub views: Option<u32>,
    pub saves: Option<u32>,
    pub listed_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    /// Deterministic product-identity key: `brand|model|tokens`.
    pub fingerprint: String,
}

impl CanonicalOffer {
    /// Days the listing has been on the market, relative to when it was
    /// fetched. Deterministic for a given offer.
    pub fn days_on_market(&self) -> Option<i64> {
        self.listed_at
            .map(|listed| (self.fetched_at - listed).num_days().max(0))
    }
}

// ============================================================================
// Price History
// ============================================================================

/// A single observed price for a fingerprint. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub fingerprint: String,
    pub price: f64,
    pub observed_at: DateTime<Utc>,
    pub source: String,
}

/// Derived statistics over a fingerprint's price history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceStats {
    pub current: f64,
    pub average_7d: f64,
    pub average_30d: f64,
    pub average_90d: f64,
    pub lowest: f64,
    pub lowest_at: DateTime<Utc>,
    pub highest: f64,
    pub highest_at: DateTime<Utc>,
    pub change_7d_percent: f64,
    pub change_30d_percent: f64,
    pub is_at_all_time_low: bool,
    /// Grows with sample count: `min(100, 20 + 5 * len)`.
    pub confidence: u8,
    pub sample_count: usize,
}

/// Predicted short-term price direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Down,
    Stable,
    Up,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePrediction {
    pub direction: TrendDirection,
    pub predicted_change_percent: f64,
    pub confidence: u8,
    /// Days until the next recognized sale event, when one forced the
    /// prediction.
    pub suggested_wait_days: Option<i64>,
    pub sample_count: usize,
}

impl PricePrediction {
    pub fn stable(confidence: u8, sample_count: usize) -> Self {
        Self {
            direction: TrendDirection::Stable,
            predicted_change_percent: 0.0,
            confidence,
            suggested_wait_days: None,
            sample_count,
        }
    }
}

// ============================================================================
// Scoring
// ============================================================================

/// The six weighted subscores, each in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub price_history: u8,
    pub discount: u8,
    pub quality: u8,
    pub freshness: u8,
    pub trust: u8,
    pub engagement: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Incredible,
    Great,
    Good,
    Fair,
    Poor,
}

impl Verdict {
    /// Higher rank is a better verdict.
    pub fn rank(&self) -> u8 {
        match self {
            Verdict::Poor => 0,
            Verdict::Fair => 1,
            Verdict::Good => 2,
            Verdict::Great => 3,
            Verdict::Incredible => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    BuyNow,
    Wait,
    Skip,
}

/// A canonical offer plus its score breakdown and verdict. Carries no
/// wall-clock fields, so rescoring the same inputs is byte-identical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredOffer {
    #[serde(flatten)]
    pub offer: CanonicalOffer,
    pub breakdown: ScoreBreakdown,
    /// Weighted total, integer in [0, 100].
    pub score: u8,
    pub verdict: Verdict,
    pub recommendation: Recommendation,
    /// Up to four human-readable takeaways.
    pub insights: Vec<String>,
}
