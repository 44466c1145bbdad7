//! Duplicate collapsing across sources.
//!
//! Two offers are duplicates when they share a fingerprint, or when they
//! share a canonical brand and their normalized titles overlap strongly
//! (Jaccard over whitespace tokens). Exact fingerprint matches collapse
//! through a hash prefilter; the fuzzy pass is pairwise over what
//! remains. Candidates are processed in (fingerprint, source) order so
//! the surviving representative is identical across runs.

use crate::models::CanonicalOffer;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Jaccard similarity over lowercased whitespace-split token sets.
/// No stemming, no stopwords: deterministic by construction.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = a.split_whitespace().map(str::to_lowercase).collect();
    let set_b: HashSet<String> = b.split_whitespace().map(str::to_lowercase).collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.len() + set_b.len() - intersection;
    intersection as f64 / union as f64
}

/// Lexicographic winner priority: lower price, then having a rating,
/// then having a review count, then earlier fetch, then source name.
fn winner_order(a: &CanonicalOffer, b: &CanonicalOffer) -> Ordering {
    a.current_price
        .partial_cmp(&b.current_price)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.rating.is_some().cmp(&a.rating.is_some()))
        .then_with(|| b.review_count.is_some().cmp(&a.review_count.is_some()))
        .then_with(|| a.fetched_at.cmp(&b.fetched_at))
        .then_with(|| a.source.cmp(&b.source))
}

fn pick_winner(a: CanonicalOffer, b: CanonicalOffer) -> CanonicalOffer {
    match winner_order(&a, &b) {
        Ordering::Greater => b,
        _ => a,
    }
}

pub struct Deduper {
    similarity_threshold: f64,
}

impl Deduper {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            similarity_threshold,
        }
    }

    /// Collapse a batch into representatives. No two outputs share a
    /// fingerprint, and no two outputs with the same brand exceed the
    /// title-similarity threshold.
    pub fn dedupe(&self, mut offers: Vec<CanonicalOffer>) -> Vec<CanonicalOffer> {
        offers.sort_by(|a, b| {
            a.fingerprint
                .cmp(&b.fingerprint)
                .then_with(|| a.source.cmp(&b.source))
                .then_with(|| a.external_id.cmp(&b.external_id))
        });

        // Exact pass: hash prefilter on fingerprint.
        let mut by_fingerprint: FxHashMap<String, CanonicalOffer> = FxHashMap::default();
        let mut order: Vec<String> = Vec::new();
        for offer in offers {
            match by_fingerprint.remove(&offer.fingerprint) {
                Some(existing) => {
                    let winner = pick_winner(existing, offer);
                    by_fingerprint.insert(winner.fingerprint.clone(), winner);
                }
                None => {
                    order.push(offer.fingerprint.clone());
                    by_fingerprint.insert(offer.fingerprint.clone(), offer);
                }
            }
        }

        // Fuzzy pass: same brand + near-identical titles. O(n^2) worst
        // case over the collapsed batch.
        let mut representatives: Vec<CanonicalOffer> = Vec::with_capacity(order.len());
        for fingerprint in order {
            let Some(candidate) = by_fingerprint.remove(&fingerprint) else {
                continue;
            };
            let duplicate_of = representatives.iter().position(|rep| {
                rep.brand == candidate.brand
                    && jaccard_similarity(&rep.title, &candidate.title)
                        > self.similarity_threshold
            });
            match duplicate_of {
                Some(idx) => {
                    let existing = representatives[idx].clone();
                    representatives[idx] = pick_winner(existing, candidate);
                }
                None => representatives.push(candidate),
            }
        }
        representatives
    }
}
