//! Offer normalization.
//!
//! Maps a `RawOffer` into the canonical schema: cleaned title, canonical
//! brand/marketplace/category, derived discount, and the deterministic
//! product fingerprint used for dedup and price history.

use crate::catalog;
use crate::models::{CanonicalOffer, RawOffer};
use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;

/// A record that cannot be normalized. All variants are `malformed`: the
/// pipeline drops the record, bumps a counter, and moves on.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    #[error("title is empty after cleaning")]
    EmptyTitle,
    #[error("price is not a valid non-negative number: {0}")]
    InvalidPrice(f64),
    #[error("currency is not a three-letter code: {0:?}")]
    InvalidCurrency(String),
}

const PROMO_PREFIXES: &[&str] = &["NEW:", "SALE -", "HOT:", "LIMITED", "EXCLUSIVE"];

const PROMO_SUFFIX_WORDS: &[&str] = &["sale", "deal", "offer", "promo", "discount", "clearance"];

const PROMO_PAREN_HINTS: &[&str] = &[
    "sale", "deal", "off", "promo", "discount", "clearance", "save", "free ship", "limited",
];

fn brackets_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[[^\]]*\]").expect("bracket regex"))
}

fn parens_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(([^)]*)\)").expect("paren regex"))
}

fn model_regexes() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        vec![
            // Explicit "Model: X" wins over pattern guesses.
            Regex::new(r"(?i)\bmodel[:\s#]+([A-Za-z0-9][A-Za-z0-9-]*)").expect("model regex"),
            Regex::new(r"\b[A-Z]{1,3}[0-9]{2,5}[A-Z0-9-]*\b").expect("model regex"),
            Regex::new(r"\b[0-9]{3,5}[A-Z]{1,3}\b").expect("model regex"),
        ]
    })
}

fn is_promo_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    PROMO_PAREN_HINTS.iter().any(|hint| lower.contains(hint)) || lower.contains('%')
}

fn strip_promo_prefixes(title: &str) -> String {
    let mut t = title.trim_start().to_string();
    let mut changed = true;
    while changed {
        changed = false;
        for prefix in PROMO_PREFIXES {
            if let Some(head) = t.get(..prefix.len()) {
                if head.eq_ignore_ascii_case(prefix) {
                    t = t[prefix.len()..].trim_start().to_string();
                    changed = true;
                    break;
                }
            }
        }
    }
    t
}

fn strip_promo_suffixes(title: &str) -> String {
    let mut t = title.to_string();
    loop {
        let trimmed = t
            .trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '-' | '!' | '.' | ','))
            .to_string();
        let mut stripped = false;
        for word in PROMO_SUFFIX_WORDS {
            if trimmed.len() < word.len() {
                continue;
            }
            let cut = trimmed.len() - word.len();
            let Some(tail) = trimmed.get(cut..) else {
                continue;
            };
            if !tail.eq_ignore_ascii_case(word) {
                continue;
            }
            let at_word_boundary = trimmed
                .get(..cut)
                .and_then(|head| head.chars().last())
                .map_or(true, |c| !c.is_alphanumeric());
            if at_word_boundary {
                t = trimmed[..cut].to_string();
                stripped = true;
                break;
            }
        }
        if !stripped {
            return trimmed;
        }
    }
}

/// Titlecase one token: leading character uppercased when alphabetic,
/// everything after it lowercased. All-uppercase tokens of length <= 5
/// (SSD, 4K, OLED) are preserved as-is.
fn titlecase_token(token: &str) -> String {
    let has_lowercase = token.chars().any(|c| c.is_lowercase());
    let has_alphabetic = token.chars().any(|c| c.is_alphabetic());
    if !has_lowercase && has_alphabetic && token.chars().count() <= 5 {
        return token.to_string();
    }
    let mut chars = token.chars();
    let mut out = String::with_capacity(token.len());
    if let Some(first) = chars.next() {
        out.extend(first.to_uppercase());
    }
    for c in chars {
        out.extend(c.to_lowercase());
    }
    out
}

/// Clean a raw title: promo prefixes/suffixes, bracketed segments,
/// parenthesized promo copy, whitespace collapse, titlecasing.
pub fn clean_title(title: &str) -> String {
    let t = strip_promo_prefixes(title);
    let t = strip_promo_suffixes(&t);
    let t = brackets_re().replace_all(&t, " ");
    let t = parens_re().replace_all(&t, |caps: &regex::Captures| {
        if is_promo_text(&caps[1]) {
            " ".to_string()
        } else {
            caps[0].to_string()
        }
    });
    t.split_whitespace()
        .map(titlecase_token)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolve the canonical brand for an offer: the raw brand field first,
/// then each whitespace-or-hyphen-split title word, then an
/// uppercase-leading title token of at most 15 chars, else `Unknown`.
pub fn extract_brand(raw_brand: Option<&str>, cleaned_title: &str) -> String {
    if let Some(brand) = raw_brand {
        if let Some(canonical) = catalog::canonical_brand(brand) {
            return canonical.to_string();
        }
    }
    for word in cleaned_title.split(|c: char| c.is_whitespace() || c == '-') {
        if let Some(canonical) = catalog::canonical_brand(word) {
            return canonical.to_string();
        }
    }
    if let Some(first) = cleaned_title.split_whitespace().next() {
        let leads_uppercase = first.chars().next().is_some_and(|c| c.is_uppercase());
        if leads_uppercase && first.chars().count() <= 15 {
            return first.to_string();
        }
    }
    "Unknown".to_string()
}

/// Best-effort model token. Pattern order is significant: explicit
/// `Model:` prefix, then letter-digit codes, then digit-letter codes.
pub fn extract_model(title: &str) -> Option<String> {
    let regexes = model_regexes();
    if let Some(caps) = regexes[0].captures(title) {
        return Some(caps[1].to_string());
    }
    for re in &regexes[1..] {
        if let Some(m) = re.find(title) {
            return Some(m.as_str().to_string());
        }
    }
    None
}

/// Map the source's category to the standardized hierarchy, falling back
/// to a titlecased copy of the source string.
pub fn canonicalize_category(source_category: &str) -> String {
    if let Some(hierarchy) = catalog::canonical_category(source_category) {
        return hierarchy.to_string();
    }
    let fallback = source_category
        .trim()
        .split_whitespace()
        .map(titlecase_token)
        .collect::<Vec<_>>()
        .join(" ");
    if fallback.is_empty() {
        "Other".to_string()
    } else {
        fallback
    }
}

/// Discount percent from list vs current price. Absent unless the
/// original price is strictly greater than the current one.
pub fn discount_percent(current: f64, original: Option<f64>) -> Option<u8> {
    match original {
        Some(orig) if orig.is_finite() && orig > current && orig > 0.0 => {
            let pct = ((orig - current) / orig * 100.0).round();
            Some(pct.clamp(0.0, 100.0) as u8)
        }
        _ => None,
    }
}

/// Deterministic product-identity key: lowercase brand, model token, and
/// a sorted multiset of the title's significant tokens. Significant means
/// entirely alphanumeric and longer than 3 characters; at most 5 are kept.
pub fn fingerprint(brand: &str, model: Option<&str>, normalized_title: &str) -> String {
    let mut tokens: Vec<String> = normalized_title
        .split_whitespace()
        .filter(|t| t.chars().count() > 3 && t.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|t| t.to_lowercase())
        .collect();
    tokens.sort();
    tokens.truncate(5);
    format!(
        "{}|{}|{}",
        brand.to_lowercase(),
        model.map(|m| m.to_lowercase()).unwrap_or_default(),
        tokens.join("-")
    )
}

/// Normalize a raw offer into canonical form.
pub fn normalize(raw: &RawOffer) -> Result<CanonicalOffer, NormalizeError> {
    if !raw.current_price.is_finite() || raw.current_price < 0.0 {
        return Err(NormalizeError::InvalidPrice(raw.current_price));
    }

    let title = clean_title(&raw.title);
    if title.is_empty() {
        return Err(NormalizeError::EmptyTitle);
    }

    let currency = raw.currency.trim();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(NormalizeError::InvalidCurrency(raw.currency.clone()));
    }
    let currency = currency.to_ascii_uppercase();

    let original_price = raw
        .original_price
        .filter(|orig| orig.is_finite() && *orig > raw.current_price);

    let brand = extract_brand(raw.brand.as_deref(), &title);
    let model = extract_model(&title);
    let category = canonicalize_category(&raw.category);
    let marketplace = catalog::canonical_marketplace(&raw.merchant);
    let discount = discount_percent(raw.current_price, original_price);
    let fingerprint = fingerprint(&brand, model.as_deref(), &title);

    Ok(CanonicalOffer {
        external_id: raw.external_id.clone(),
        source: raw.source.clone(),
        title,
        description: raw.description.clone(),
        image_url: raw.image_url.clone(),
        current_price: raw.current_price,
        original_price,
        currency,
        merchant: raw.merchant.clone(),
        marketplace,
        brand,
        category,
        model,
        discount_percent: discount,
        condition: raw.condition,
        stock: raw.stock,
        rating: raw.rating,
        review_count: raw.review_count,
        seller_rating: raw.seller_rating,
        views: raw.views,
        saves: raw.saves,
        listed_at: raw.listed_at,
        fetched_at: raw.fetched_at,
        fingerprint,
    })
}
