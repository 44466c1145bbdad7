//! Curated lookup tables for normalization and scoring.
//!
//! This module provides:
//! - Brand alias map (canonical tech brands)
//! - Marketplace map (merchant substring -> canonical retailer)
//! - Category map (source category substring -> standardized hierarchy)
//! - Retailer trust scores
//! - Category discount thresholds
//! - Sale-event calendar

use std::collections::HashMap;
use std::sync::OnceLock;

// ============================================================================
// Brand Aliases
// ============================================================================

/// Canonical brand -> aliases (all matching is case-insensitive).
static BRAND_ALIASES: &[(&str, &[&str])] = &[
    ("Apple", &["apple inc", "apple inc.", "apple computer"]),
    ("Samsung", &["samsung electronics", "samsung elec"]),
    ("Sony", &["sony corporation", "sony corp"]),
    ("LG", &["lg electronics", "lg elec"]),
    ("Dell", &["dell technologies", "dell inc"]),
    ("HP", &["hewlett-packard", "hewlett packard", "hp inc"]),
    ("Lenovo", &["lenovo group"]),
    ("Asus", &["asustek", "asus computer"]),
    ("Acer", &["acer inc", "acer america"]),
    ("Microsoft", &["microsoft corporation", "msft"]),
    ("Google", &["google llc", "alphabet"]),
    ("Bose", &["bose corporation"]),
    ("JBL", &["jbl audio", "harman jbl"]),
    ("Logitech", &["logitech international", "logi"]),
    ("Anker", &["anker innovations", "ankerdirect"]),
    ("Nintendo", &["nintendo of america", "nintendo co"]),
];

type BrandMap = HashMap<String, &'static str>;

static BRAND_MAP: OnceLock<BrandMap> = OnceLock::new();

fn brand_map() -> &'static BrandMap {
    BRAND_MAP.get_or_init(|| {
        let mut map = HashMap::new();
        for (canonical, aliases) in BRAND_ALIASES {
            map.insert(canonical.to_lowercase(), *canonical);
            for alias in *aliases {
                map.insert(alias.to_lowercase(), *canonical);
            }
        }
        map
    })
}

/// Look up a canonical brand by name or alias. Case-insensitive.
pub fn canonical_brand(name: &str) -> Option<&'static str> {
    brand_map().get(name.trim().to_lowercase().as_str()).copied()
}

/// All canonical brand names.
pub fn canonical_brands() -> Vec<&'static str> {
    BRAND_ALIASES.iter().map(|(c, _)| *c).collect()
}

// ============================================================================
// Marketplaces
// ============================================================================

/// Merchant substring -> canonical retailer. First match wins, so more
/// specific needles come before generic ones.
static MARKETPLACES: &[(&str, &str)] = &[
    ("facebook", "Facebook Marketplace"),
    ("bestbuy", "Best Buy"),
    ("best buy", "Best Buy"),
    ("amazon", "Amazon"),
    ("walmart", "Walmart"),
    ("target", "Target"),
    ("costco", "Costco"),
    ("newegg", "Newegg"),
    ("bhphoto", "B&H Photo"),
    ("b&h", "B&H Photo"),
    ("apple", "Apple"),
    ("samsung", "Samsung"),
    ("dell", "Dell"),
    ("hp.com", "HP"),
    ("ebay", "eBay"),
    ("craigslist", "Craigslist"),
    ("offerup", "OfferUp"),
    ("swappa", "Swappa"),
    ("woot", "Woot"),
];

/// Map a raw merchant string to a canonical retailer name.
/// Falls back to the input, trimmed, when nothing matches.
pub fn canonical_marketplace(merchant: &str) -> String {
    let needle = merchant.trim().to_lowercase();
    for (substr, canonical) in MARKETPLACES {
        if needle.contains(substr) {
            return (*canonical).to_string();
        }
    }
    merchant.trim().to_string()
}

// ============================================================================
// Categories
// ============================================================================

/// Source category substring -> standardized hierarchy. First match wins.
static CATEGORIES: &[(&str, &str)] = &[
    ("laptop", "Electronics > Computers > Laptops"),
    ("notebook", "Electronics > Computers > Laptops"),
    ("desktop", "Electronics > Computers > Desktops"),
    ("monitor", "Electronics > Computers > Monitors"),
    ("tablet", "Electronics > Computers > Tablets"),
    ("smartphone", "Electronics > Phones > Smartphones"),
    ("cell phone", "Electronics > Phones > Smartphones"),
    ("phone", "Electronics > Phones > Smartphones"),
    ("headphone", "Electronics > Audio > Headphones"),
    ("earbud", "Electronics > Audio > Headphones"),
    ("speaker", "Electronics > Audio > Speakers"),
    ("audio", "Electronics > Audio"),
    ("television", "Electronics > TVs"),
    ("tv", "Electronics > TVs"),
    ("console", "Electronics > Gaming > Consoles"),
    ("video game", "Electronics > Gaming"),
    ("gaming", "Electronics > Gaming"),
    ("camera", "Electronics > Cameras"),
    ("smartwatch", "Electronics > Wearables"),
    ("wearable", "Electronics > Wearables"),
    ("refrigerator", "Home > Appliances"),
    ("washer", "Home > Appliances"),
    ("appliance", "Home > Appliances"),
    ("shoe", "Fashion > Shoes"),
    ("sneaker", "Fashion > Shoes"),
    ("clothing", "Fashion > Clothing"),
    ("apparel", "Fashion > Clothing"),
];

/// Map a source category string to the standardized hierarchy.
/// Returns `None` when nothing matches; the normalizer falls back to a
/// titlecased copy of the source string.
pub fn canonical_category(source_category: &str) -> Option<&'static str> {
    let needle = source_category.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    CATEGORIES
        .iter()
        .find(|(substr, _)| needle.contains(substr))
        .map(|(_, hierarchy)| *hierarchy)
}

// ============================================================================
// Retailer Trust
// ============================================================================

/// Trust score (1-100) per retailer, keyed lowercase.
static RETAILER_TRUST: &[(&str, u8)] = &[
    ("amazon", 92),
    ("bestbuy", 90),
    ("walmart", 85),
    ("target", 85),
    ("costco", 93),
    ("newegg", 82),
    ("bhphoto", 88),
    ("apple", 95),
    ("samsung", 88),
    ("dell", 84),
    ("hp", 82),
    ("ebay", 70),
    ("facebook marketplace", 45),
    ("craigslist", 35),
    ("offerup", 42),
    ("swappa", 75),
    ("woot", 78),
];

pub const DEFAULT_RETAILER_TRUST: u8 = 60;

/// Trust score for a retailer. Case-insensitive; non-alphanumeric
/// characters in the name are ignored so `Best Buy` hits `bestbuy`.
pub fn retailer_trust(marketplace: &str) -> u8 {
    let key = marketplace.trim().to_lowercase();
    let compact: String = key
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    RETAILER_TRUST
        .iter()
        .find(|(name, _)| *name == key || name.chars().filter(|c| c.is_ascii_alphanumeric()).collect::<String>() == compact)
        .map(|(_, score)| *score)
        .unwrap_or(DEFAULT_RETAILER_TRUST)
}

// ============================================================================
// Category Discount Thresholds
// ============================================================================

/// Discount percentages considered great / good per category.
#[derive(Debug, Clone, Copy)]
pub struct DiscountThresholds {
    pub great: f64,
    pub good: f64,
}

static CATEGORY_THRESHOLDS: &[(&str, DiscountThresholds)] = &[
    ("laptops", DiscountThresholds { great: 20.0, good: 12.0 }),
    ("smartphones", DiscountThresholds { great: 22.0, good: 15.0 }),
    ("audio", DiscountThresholds { great: 30.0, good: 20.0 }),
    ("appliances", DiscountThresholds { great: 25.0, good: 15.0 }),
    ("gaming", DiscountThresholds { great: 20.0, good: 12.0 }),
    ("tvs", DiscountThresholds { great: 30.0, good: 20.0 }),
    ("clothing", DiscountThresholds { great: 50.0, good: 30.0 }),
    ("shoes", DiscountThresholds { great: 40.0, good: 25.0 }),
    ("electronics", DiscountThresholds { great: 25.0, good: 15.0 }),
];

pub const DEFAULT_THRESHOLDS: DiscountThresholds = DiscountThresholds {
    great: 25.0,
    good: 15.0,
};

/// Thresholds for a canonical category path. The leaf segment of the
/// hierarchy is consulted first so `Electronics > TVs` resolves to the
/// `tvs` bucket rather than the broader `electronics` one; unmatched
/// categories use the default bucket.
pub fn discount_thresholds(category: &str) -> DiscountThresholds {
    let needle = category.trim().to_lowercase();
    let leaf = needle.rsplit('>').next().unwrap_or("").trim();
    for (key, thresholds) in CATEGORY_THRESHOLDS {
        if leaf.contains(key) {
            return *thresholds;
        }
    }
    for (key, thresholds) in CATEGORY_THRESHOLDS {
        if needle.contains(key) {
            return *thresholds;
        }
    }
    DEFAULT_THRESHOLDS
}

// ============================================================================
// Sale-Event Calendar
// ============================================================================

/// A recurring sale event. `month` is 0-indexed (10 = November), matching
/// the upstream submission format; do not confuse with chrono's 1-indexed
/// months.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SaleEvent {
    pub name: &'static str,
    pub month: u32,
    pub day: u32,
    /// Days before the event during which a price drop is predicted.
    pub window_days: i64,
    pub expected_discount_percent: f64,
}

pub static SALE_EVENTS: &[SaleEvent] = &[
    SaleEvent {
        name: "Black Friday",
        month: 10,
        day: 25,
        window_days: 10,
        expected_discount_percent: 25.0,
    },
    SaleEvent {
        name: "Cyber Monday",
        month: 10,
        day: 28,
        window_days: 5,
        expected_discount_percent: 20.0,
    },
    SaleEvent {
        name: "Prime Day",
        month: 6,
        day: 15,
        window_days: 7,
        expected_discount_percent: 20.0,
    },
    SaleEvent {
        name: "Memorial Day",
        month: 4,
        day: 25,
        window_days: 7,
        expected_discount_percent: 15.0,
    },
    SaleEvent {
        name: "Labor Day",
        month: 8,
        day: 1,
        window_days: 7,
        expected_discount_percent: 15.0,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_brand_aliases() {
        assert_eq!(canonical_brand("apple inc"), Some("Apple"));
        assert_eq!(canonical_brand("APPLE"), Some("Apple"));
        assert_eq!(canonical_brand("Hewlett-Packard"), Some("HP"));
        assert_eq!(canonical_brand("nokia"), None);
    }

    #[test]
    fn test_brand_count() {
        // The curated list covers 16 canonical tech brands.
        assert_eq!(canonical_brands().len(), 16);
    }

    #[test]
    fn test_canonical_marketplace() {
        assert_eq!(canonical_marketplace("amazon.com"), "Amazon");
        assert_eq!(canonical_marketplace("www.bestbuy.com"), "Best Buy");
        assert_eq!(
            canonical_marketplace("facebook marketplace seller"),
            "Facebook Marketplace"
        );
        assert_eq!(canonical_marketplace("corner-shop.biz"), "corner-shop.biz");
    }

    #[test]
    fn test_canonical_category() {
        assert_eq!(
            canonical_category("Laptops & Notebooks"),
            Some("Electronics > Computers > Laptops")
        );
        assert_eq!(
            canonical_category("cell phones"),
            Some("Electronics > Phones > Smartphones")
        );
        assert_eq!(canonical_category("garden gnomes"), None);
        assert_eq!(canonical_category(""), None);
    }

    #[test]
    fn test_retailer_trust() {
        assert_eq!(retailer_trust("Amazon"), 92);
        assert_eq!(retailer_trust("Best Buy"), 90);
        assert_eq!(retailer_trust("Craigslist"), 35);
        assert_eq!(retailer_trust("Unknown Shop"), DEFAULT_RETAILER_TRUST);
    }

    #[test]
    fn test_discount_thresholds() {
        let laptops = discount_thresholds("Electronics > Computers > Laptops");
        assert_eq!(laptops.great, 20.0);
        assert_eq!(laptops.good, 12.0);

        // "electronics" matches but the more specific "tvs" wins.
        let tvs = discount_thresholds("Electronics > TVs");
        assert_eq!(tvs.great, 30.0);

        let other = discount_thresholds("Garden > Gnomes");
        assert_eq!(other.great, DEFAULT_THRESHOLDS.great);
    }

    #[test]
    fn test_sale_events_table() {
        assert_eq!(SALE_EVENTS.len(), 5);
        let bf = SALE_EVENTS.iter().find(|e| e.name == "Black Friday").unwrap();
        // 0-indexed month: 10 = November.
        assert_eq!(bf.month, 10);
    }
}
