//! Deal scoring.
//!
//! Six weighted subscores fold into one 0-100 total, a verdict bucket,
//! and a buy/wait/skip recommendation. Scoring is total (it cannot fail)
//! and deterministic: the same offer and stats always produce the same
//! `ScoredOffer`, byte for byte.

use crate::catalog;
use crate::config::{ScoreWeights, ScoringConfig, VerdictThresholds};
use crate::models::{
    CanonicalOffer, PriceStats, Recommendation, ScoreBreakdown, ScoredOffer, StockStatus, Verdict,
};
use rayon::prelude::*;

fn clamp_score(score: i32) -> u8 {
    score.clamp(0, 100) as u8
}

pub struct DealScorer {
    weights: ScoreWeights,
    thresholds: VerdictThresholds,
}

impl DealScorer {
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            weights: config.weights,
            thresholds: config.verdict_thresholds,
        }
    }

    /// Score one offer against its price history.
    pub fn score(&self, offer: &CanonicalOffer, stats: Option<&PriceStats>) -> ScoredOffer {
        let breakdown = ScoreBreakdown {
            price_history: self.price_history_score(stats),
            discount: self.discount_score(offer),
            quality: self.quality_score(offer),
            freshness: self.freshness_score(offer),
            trust: self.trust_score(offer),
            engagement: self.engagement_score(offer),
        };
        let score = self.total(&breakdown);
        let verdict = self.verdict(score);
        let recommendation = self.recommendation(score, stats);
        let insights = self.insights(offer, stats, &breakdown);

        ScoredOffer {
            offer: offer.clone(),
            breakdown,
            score,
            verdict,
            recommendation,
            insights,
        }
    }

    /// Score a batch in parallel.
    pub fn score_batch(
        &self,
        batch: Vec<(CanonicalOffer, Option<PriceStats>)>,
    ) -> Vec<ScoredOffer> {
        batch
            .par_iter()
            .map(|(offer, stats)| self.score(offer, stats.as_ref()))
            .collect()
    }

    fn price_history_score(&self, stats: Option<&PriceStats>) -> u8 {
        let Some(stats) = stats else {
            return 50;
        };
        if stats.sample_count == 0 {
            return 50;
        }

        let mut score = 50i32;
        let average = stats.average_30d;

        if stats.is_at_all_time_low {
            score += 35;
        } else if stats.current <= stats.lowest * 1.05 {
            score += 25;
        } else if average > 0.0 && stats.current <= 0.9 * average {
            score += 15;
        }

        if average > 0.0 && stats.current > average {
            score -= (((stats.current / average - 1.0) * 100.0) as i32).min(30);
        }
        if stats.current >= 0.95 * stats.highest {
            score -= 20;
        }
        clamp_score(score)
    }

    fn discount_score(&self, offer: &CanonicalOffer) -> u8 {
        let thresholds = catalog::discount_thresholds(&offer.category);
        let discount = offer.discount_percent.unwrap_or(0) as f64;

        if discount <= 0.0 {
            20
        } else if discount >= thresholds.great * 1.5 {
            100
        } else if discount >= thresholds.great {
            85
        } else if discount >= thresholds.good {
            70
        } else if discount >= thresholds.good / 2.0 {
            50
        } else {
            35
        }
    }

    fn quality_score(&self, offer: &CanonicalOffer) -> u8 {
        let mut score = 50i32;
        if let Some(rating) = offer.rating {
            if rating >= 4.5 {
                score += 30;
            } else if rating >= 4.0 {
                score += 20;
            } else if rating >= 3.5 {
                score += 5;
            } else if rating < 3.0 {
                score -= 20;
            }
        }
        if let Some(reviews) = offer.review_count {
            if reviews >= 1000 {
                score += 15;
            } else if reviews >= 500 {
                score += 10;
            } else if reviews >= 100 {
                score += 5;
            } else if reviews < 10 {
                score -= 10;
            }
        }
        clamp_score(score)
    }

    fn freshness_score(&self, offer: &CanonicalOffer) -> u8 {
        let mut score = 50i32;
        if let Some(days) = offer.days_on_market() {
            if days <= 1 {
                score += 30;
            } else if days <= 3 {
                score += 20;
            } else if days <= 7 {
                score += 10;
            } else if days > 30 {
                score -= 15;
            }
        }
        match offer.stock {
            StockStatus::LowStock => score += 10,
            StockStatus::OutOfStock => score -= 40,
            StockStatus::InStock => {}
        }
        clamp_score(score)
    }

    fn trust_score(&self, offer: &CanonicalOffer) -> u8 {
        let mut score = catalog::retailer_trust(&offer.marketplace) as i32;
        if let Some(seller_rating) = offer.seller_rating {
            if seller_rating >= 4.5 {
                score += 5;
            } else if seller_rating < 3.5 {
                score -= 15;
            }
        }
        clamp_score(score)
    }

    fn engagement_score(&self, offer: &CanonicalOffer) -> u8 {
        let mut score = 50i32;
        if let Some(views) = offer.views {
            if views >= 1000 {
                score += 20;
            } else if views >= 500 {
                score += 10;
            }
        }
        if let Some(saves) = offer.saves {
            if saves >= 100 {
                score += 25;
            } else if saves >= 50 {
                score += 15;
            } else if saves >= 20 {
                score += 5;
            }
        }
        clamp_score(score)
    }

    fn total(&self, breakdown: &ScoreBreakdown) -> u8 {
        let weighted = breakdown.price_history as u32 * self.weights.price_history
            + breakdown.discount as u32 * self.weights.discount
            + breakdown.quality as u32 * self.weights.quality
            + breakdown.freshness as u32 * self.weights.freshness
            + breakdown.trust as u32 * self.weights.trust
            + breakdown.engagement as u32 * self.weights.engagement;
        ((weighted as f64 / 100.0).round() as i32).clamp(0, 100) as u8
    }

    pub fn verdict(&self, score: u8) -> Verdict {
        if score >= self.thresholds.incredible {
            Verdict::Incredible
        } else if score >= self.thresholds.great {
            Verdict::Great
        } else if score >= self.thresholds.good {
            Verdict::Good
        } else if score >= self.thresholds.fair {
            Verdict::Fair
        } else {
            Verdict::Poor
        }
    }

    fn recommendation(&self, score: u8, stats: Option<&PriceStats>) -> Recommendation {
        let at_low = stats.is_some_and(|s| s.is_at_all_time_low);
        if score >= 75 || at_low {
            Recommendation::BuyNow
        } else if score >= 50 {
            Recommendation::Wait
        } else {
            Recommendation::Skip
        }
    }

    fn insights(
        &self,
        offer: &CanonicalOffer,
        stats: Option<&PriceStats>,
        breakdown: &ScoreBreakdown,
    ) -> Vec<String> {
        let mut insights = Vec::new();

        if stats.is_some_and(|s| s.is_at_all_time_low && s.sample_count > 0) {
            insights.push("This is the lowest price we've ever tracked".to_string());
        } else if breakdown.price_history >= 75 {
            insights.push("Price is well below its recent average".to_string());
        }
        if breakdown.price_history <= 30 {
            insights.push(
                "Price is above the historical average - consider waiting".to_string(),
            );
        }
        if breakdown.discount >= 85 {
            if let Some(discount) = offer.discount_percent {
                insights.push(format!("{discount}% off the list price is a steep markdown"));
            }
        }
        if breakdown.quality >= 80 {
            insights.push("Highly rated with a deep review base".to_string());
        }
        match offer.stock {
            StockStatus::OutOfStock => {
                insights.push("Currently out of stock - the deal may not be obtainable".to_string())
            }
            StockStatus::LowStock => insights.push("Stock is running low".to_string()),
            StockStatus::InStock => {}
        }
        if breakdown.trust >= 85 {
            insights.push("Sold by a highly trusted retailer".to_string());
        }

        insights.truncate(4);
        insights
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Condition;
    use chrono::{DateTime, TimeZone, Utc};

    fn scorer() -> DealScorer {
        DealScorer::new(&ScoringConfig::default())
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn offer(price: f64) -> CanonicalOffer {
        CanonicalOffer {
            external_id: "x1".to_string(),
            source: "amazon-us".to_string(),
            title: "Apple Macbook Pro 14 M3".to_string(),
            description: None,
            image_url: None,
            current_price: price,
            original_price: None,
            currency: "USD".to_string(),
            merchant: "amazon.com".to_string(),
            marketplace: "Amazon".to_string(),
            brand: "Apple".to_string(),
            category: "Electronics > Computers > Laptops".to_string(),
            model: Some("512GB".to_string()),
            discount_percent: None,
            condition: Condition::New,
            stock: StockStatus::InStock,
            rating: None,
            review_count: None,
            seller_rating: None,
            views: None,
            saves: None,
            listed_at: None,
            fetched_at: t0(),
            fingerprint: "apple|512gb|512gb-apple-macbook".to_string(),
        }
    }

    fn stats(current: f64, lowest: f64, highest: f64, average: f64, samples: usize) -> PriceStats {
        PriceStats {
            current,
            average_7d: average,
            average_30d: average,
            average_90d: average,
            lowest,
            lowest_at: t0(),
            highest,
            highest_at: t0(),
            change_7d_percent: 0.0,
            change_30d_percent: 0.0,
            is_at_all_time_low: current <= lowest * 1.02,
            confidence: 40,
            sample_count: samples,
        }
    }

    #[test]
    fn test_price_history_no_history_is_50() {
        assert_eq!(scorer().price_history_score(None), 50);
        let empty = stats(99.0, 99.0, 99.0, 99.0, 0);
        assert_eq!(scorer().price_history_score(Some(&empty)), 50);
    }

    #[test]
    fn test_price_history_all_time_low() {
        // Scenario: history 1299/1249/1199/1149, current 1099.
        let s = stats(1099.0, 1149.0, 1299.0, 1224.0, 4);
        assert!(s.is_at_all_time_low);
        let sub = scorer().price_history_score(Some(&s));
        assert!(sub >= 85, "expected >= 85, got {sub}");
    }

    #[test]
    fn test_price_history_above_average_penalty() {
        // 20% above average: -20, plus near the high: -20 more.
        let s = stats(120.0, 90.0, 122.0, 100.0, 10);
        assert_eq!(scorer().price_history_score(Some(&s)), 10);
    }

    #[test]
    fn test_discount_score_thresholds() {
        let scorer = scorer();
        let mut o = offer(100.0);
        // Laptops: great = 20, good = 12.
        o.discount_percent = Some(30);
        assert_eq!(scorer.discount_score(&o), 100);
        o.discount_percent = Some(20);
        assert_eq!(scorer.discount_score(&o), 85);
        o.discount_percent = Some(12);
        assert_eq!(scorer.discount_score(&o), 70);
        o.discount_percent = Some(6);
        assert_eq!(scorer.discount_score(&o), 50);
        o.discount_percent = Some(3);
        assert_eq!(scorer.discount_score(&o), 35);
        o.discount_percent = None;
        assert_eq!(scorer.discount_score(&o), 20);
    }

    #[test]
    fn test_quality_score_branches() {
        let scorer = scorer();
        let mut o = offer(100.0);
        o.rating = Some(4.8);
        o.review_count = Some(1500);
        assert_eq!(scorer.quality_score(&o), 95);

        o.rating = Some(2.5);
        o.review_count = Some(5);
        assert_eq!(scorer.quality_score(&o), 20);

        o.rating = None;
        o.review_count = None;
        assert_eq!(scorer.quality_score(&o), 50);
    }

    #[test]
    fn test_freshness_score_branches() {
        let scorer = scorer();
        let mut o = offer(100.0);
        o.listed_at = Some(t0() - chrono::Duration::days(1));
        assert_eq!(scorer.freshness_score(&o), 80);

        o.listed_at = Some(t0() - chrono::Duration::days(45));
        assert_eq!(scorer.freshness_score(&o), 35);

        o.stock = StockStatus::OutOfStock;
        assert_eq!(scorer.freshness_score(&o), 0);

        o.listed_at = None;
        o.stock = StockStatus::LowStock;
        assert_eq!(scorer.freshness_score(&o), 60);
    }

    #[test]
    fn test_trust_score_uses_table_and_seller_rating() {
        let scorer = scorer();
        let mut o = offer(100.0);
        assert_eq!(scorer.trust_score(&o), 92);

        o.seller_rating = Some(4.9);
        assert_eq!(scorer.trust_score(&o), 97);

        o.marketplace = "Craigslist".to_string();
        o.seller_rating = Some(2.0);
        assert_eq!(scorer.trust_score(&o), 20);

        o.marketplace = "Some Web Shop".to_string();
        o.seller_rating = None;
        assert_eq!(scorer.trust_score(&o), 60);
    }

    #[test]
    fn test_engagement_score_branches() {
        let scorer = scorer();
        let mut o = offer(100.0);
        assert_eq!(scorer.engagement_score(&o), 50);
        o.views = Some(1200);
        o.saves = Some(120);
        assert_eq!(scorer.engagement_score(&o), 95);
        o.views = Some(600);
        o.saves = Some(25);
        assert_eq!(scorer.engagement_score(&o), 65);
    }

    #[test]
    fn test_total_is_weighted_round() {
        let scorer = scorer();
        let breakdown = ScoreBreakdown {
            price_history: 85,
            discount: 70,
            quality: 95,
            freshness: 80,
            trust: 92,
            engagement: 50,
        };
        // 85*30 + 70*20 + 95*20 + 80*15 + 92*10 + 50*5 = 8220 -> 82.
        assert_eq!(scorer.total(&breakdown), 82);
    }

    #[test]
    fn test_verdict_is_monotone_in_score() {
        let scorer = scorer();
        let mut prev = scorer.verdict(0).rank();
        for score in 1..=100u8 {
            let rank = scorer.verdict(score).rank();
            assert!(rank >= prev, "verdict regressed at score {score}");
            prev = rank;
        }
        assert_eq!(scorer.verdict(85), Verdict::Incredible);
        assert_eq!(scorer.verdict(84), Verdict::Great);
        assert_eq!(scorer.verdict(55), Verdict::Good);
        assert_eq!(scorer.verdict(40), Verdict::Fair);
        assert_eq!(scorer.verdict(39), Verdict::Poor);
    }

    #[test]
    fn test_all_time_low_forces_buy_now() {
        let scorer = scorer();
        // Deliberately weak offer: out of stock, bad ratings, no discount.
        let mut o = offer(100.0);
        o.stock = StockStatus::OutOfStock;
        o.rating = Some(2.0);
        o.review_count = Some(3);
        o.marketplace = "Craigslist".to_string();

        let s = stats(100.0, 100.0, 300.0, 200.0, 8);
        assert!(s.is_at_all_time_low);

        let scored = scorer.score(&o, Some(&s));
        assert!(scored.score < 75);
        assert_eq!(scored.recommendation, Recommendation::BuyNow);
    }

    #[test]
    fn test_scenario_all_time_low_insight_and_buy_now() {
        let scorer = scorer();
        let o = offer(1099.0);
        let s = stats(1099.0, 1149.0, 1299.0, 1224.0, 4);

        let scored = scorer.score(&o, Some(&s));
        assert!(scored.breakdown.price_history >= 85);
        assert_eq!(scored.recommendation, Recommendation::BuyNow);
        assert!(scored
            .insights
            .iter()
            .any(|i| i.contains("lowest price we've ever tracked")));
    }

    #[test]
    fn test_insights_capped_at_four() {
        let scorer = scorer();
        let mut o = offer(50.0);
        o.discount_percent = Some(40);
        o.rating = Some(4.9);
        o.review_count = Some(5000);
        o.stock = StockStatus::LowStock;
        let s = stats(50.0, 50.0, 120.0, 90.0, 12);

        let scored = scorer.score(&o, Some(&s));
        assert!(scored.insights.len() <= 4);
        assert!(!scored.insights.is_empty());
    }

    #[test]
    fn test_rescoring_is_byte_identical() {
        let scorer = scorer();
        let mut o = offer(899.0);
        o.discount_percent = Some(18);
        o.rating = Some(4.6);
        let s = stats(899.0, 880.0, 1200.0, 1000.0, 15);

        let a = scorer.score(&o, Some(&s));
        let b = scorer.score(&o, Some(&s));
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_score_batch_matches_single() {
        let scorer = scorer();
        let o = offer(899.0);
        let s = stats(899.0, 880.0, 1200.0, 1000.0, 15);

        let single = scorer.score(&o, Some(&s));
        let batch = scorer.score_batch(vec![(o, Some(s))]);
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0], single);
    }

    #[test]
    fn test_score_total_in_range() {
        let scorer = scorer();
        let mut o = offer(10.0);
        o.stock = StockStatus::OutOfStock;
        o.rating = Some(1.0);
        o.review_count = Some(1);
        o.marketplace = "Craigslist".to_string();
        let scored = scorer.score(&o, None);
        assert!(scored.score <= 100);
        assert_eq!(scored.recommendation, Recommendation::Skip);
    }
}
