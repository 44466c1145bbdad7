//! Scored offer index and read-only query surface.
//!
//! The index owns the latest `ScoredOffer` per fingerprint. Writes are
//! last-writer-wins and exclusive; reads are cheap and always see whole
//! records (entries are swapped in as `Arc`s, never mutated in place).
//! Queries against an empty index return empty results, never errors.

use crate::models::ScoredOffer;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct DealIndex {
    entries: RwLock<FxHashMap<String, Arc<ScoredOffer>>>,
}

impl DealIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for the offer's fingerprint.
    /// Returns the replaced record, if any.
    pub fn insert(&self, offer: ScoredOffer) -> Option<Arc<ScoredOffer>> {
        let fingerprint = offer.offer.fingerprint.clone();
        self.entries.write().insert(fingerprint, Arc::new(offer))
    }

    pub fn by_fingerprint(&self, fingerprint: &str) -> Option<Arc<ScoredOffer>> {
        self.entries.read().get(fingerprint).cloned()
    }

    pub fn remove(&self, fingerprint: &str) -> Option<Arc<ScoredOffer>> {
        self.entries.write().remove(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Point-in-time snapshot of every record.
    pub fn all(&self) -> Vec<Arc<ScoredOffer>> {
        self.entries.read().values().cloned().collect()
    }

    /// Case-insensitive token match against normalized title, brand, and
    /// category. Every query token must match; results come back sorted
    /// by score descending (fingerprint as the deterministic tiebreak).
    pub fn search(&self, query: &str, category: Option<&str>) -> Vec<Arc<ScoredOffer>> {
        let tokens: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
        if tokens.is_empty() {
            return Vec::new();
        }
        let category_prefix = category.map(str::to_lowercase);

        let mut matches: Vec<Arc<ScoredOffer>> = self
            .entries
            .read()
            .values()
            .filter(|record| {
                let offer = &record.offer;
                if let Some(prefix) = &category_prefix {
                    if !offer.category.to_lowercase().starts_with(prefix) {
                        return false;
                    }
                }
                let haystack: Vec<String> = offer
                    .title
                    .split_whitespace()
                    .chain(offer.brand.split_whitespace())
                    .chain(offer.category.split(|c: char| c.is_whitespace() || c == '>'))
                    .map(str::to_lowercase)
                    .filter(|t| !t.is_empty())
                    .collect();
                tokens.iter().all(|token| haystack.iter().any(|h| h == token))
            })
            .cloned()
            .collect();

        sort_by_score(&mut matches);
        matches
    }

    /// Highest-scoring offers across all categories.
    pub fn top_n(&self, n: usize) -> Vec<Arc<ScoredOffer>> {
        let mut all = self.all();
        sort_by_score(&mut all);
        all.truncate(n);
        all
    }

    /// Offers whose canonical category begins with the given prefix,
    /// case-insensitive.
    pub fn by_category(&self, prefix: &str) -> Vec<Arc<ScoredOffer>> {
        let needle = prefix.to_lowercase();
        let mut matches: Vec<Arc<ScoredOffer>> = self
            .entries
            .read()
            .values()
            .filter(|record| record.offer.category.to_lowercase().starts_with(&needle))
            .cloned()
            .collect();
        sort_by_score(&mut matches);
        matches
    }
}

fn sort_by_score(records: &mut [Arc<ScoredOffer>]) {
    records.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.offer.fingerprint.cmp(&b.offer.fingerprint))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CanonicalOffer, Condition, Recommendation, ScoreBreakdown, StockStatus, Verdict,
    };
    use chrono::{TimeZone, Utc};

    fn scored(title: &str, brand: &str, category: &str, fingerprint: &str, score: u8) -> ScoredOffer {
        ScoredOffer {
            offer: CanonicalOffer {
                external_id: fingerprint.to_string(),
                source: "test".to_string(),
                title: title.to_string(),
                description: None,
                image_url: None,
                current_price: 100.0,
                original_price: None,
                currency: "USD".to_string(),
                merchant: "amazon.com".to_string(),
                marketplace: "Amazon".to_string(),
                brand: brand.to_string(),
                category: category.to_string(),
                model: None,
                discount_percent: None,
                condition: Condition::New,
                stock: StockStatus::InStock,
                rating: None,
                review_count: None,
                seller_rating: None,
                views: None,
                saves: None,
                listed_at: None,
                fetched_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
                fingerprint: fingerprint.to_string(),
            },
            breakdown: ScoreBreakdown {
                price_history: score,
                discount: score,
                quality: score,
                freshness: score,
                trust: score,
                engagement: score,
            },
            score,
            verdict: Verdict::Good,
            recommendation: Recommendation::Wait,
            insights: vec![],
        }
    }

    fn populated() -> DealIndex {
        let index = DealIndex::new();
        index.insert(scored(
            "Apple Macbook Pro 14",
            "Apple",
            "Electronics > Computers > Laptops",
            "fp-mac",
            88,
        ));
        index.insert(scored(
            "Dell XPS13 Laptop",
            "Dell",
            "Electronics > Computers > Laptops",
            "fp-xps",
            72,
        ));
        index.insert(scored(
            "Sony Bravia TV",
            "Sony",
            "Electronics > TVs",
            "fp-tv",
            95,
        ));
        index
    }

    #[test]
    fn test_insert_replaces_by_fingerprint() {
        let index = DealIndex::new();
        index.insert(scored("A", "Apple", "Electronics", "fp-1", 50));
        let replaced = index.insert(scored("A v2", "Apple", "Electronics", "fp-1", 60));
        assert!(replaced.is_some());
        assert_eq!(index.len(), 1);
        assert_eq!(index.by_fingerprint("fp-1").unwrap().score, 60);
    }

    #[test]
    fn test_search_token_match_sorted_by_score() {
        let index = populated();
        let hits = index.search("laptop", None);
        // Only the Dell title carries the literal token "laptop".
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].offer.fingerprint, "fp-xps");

        let hits = index.search("LAPTOPS", None);
        // Category tokens count too, so both laptops match.
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].offer.fingerprint, "fp-mac");
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn test_search_all_tokens_must_match() {
        let index = populated();
        assert_eq!(index.search("apple macbook", None).len(), 1);
        assert_eq!(index.search("apple bravia", None).len(), 0);
    }

    #[test]
    fn test_search_with_category_filter() {
        let index = populated();
        let hits = index.search("electronics", Some("electronics > tvs"));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].offer.fingerprint, "fp-tv");
    }

    #[test]
    fn test_search_empty_index_and_empty_query() {
        let empty = DealIndex::new();
        assert!(empty.search("anything", None).is_empty());
        let index = populated();
        assert!(index.search("   ", None).is_empty());
    }

    #[test]
    fn test_top_n() {
        let index = populated();
        let top = index.top_n(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].offer.fingerprint, "fp-tv");
        assert_eq!(top[1].offer.fingerprint, "fp-mac");

        assert_eq!(index.top_n(0).len(), 0);
        assert_eq!(index.top_n(100).len(), 3);
    }

    #[test]
    fn test_by_category_prefix() {
        let index = populated();
        assert_eq!(index.by_category("electronics").len(), 3);
        assert_eq!(index.by_category("Electronics > Computers").len(), 2);
        assert_eq!(index.by_category("fashion").len(), 0);
    }
}
