//! Affiliate API source adapters.
//!
//! One adapter struct covers every supported affiliate network. The
//! differences between networks are data, not code: a `ResponseMap` of
//! JSON pointers describing where offers live in the response, and an
//! `AuthStyle` describing how requests are authenticated (query api-key,
//! bearer token, vendor header, or HMAC-signed request).

use crate::models::{Condition, RawOffer, SourceKind};
use crate::sources::rate_limit::RequestPacer;
use crate::sources::{AdapterContext, FetchOutcome, SourceAdapter, SourceError};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use tracing::debug;

/// Supported affiliate networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AffiliateNetwork {
    Amazon,
    Rakuten,
    CommissionJunction,
    Ebay,
    Walmart,
    BestBuy,
}

/// How a network authenticates requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthStyle {
    /// API key as a query parameter.
    QueryKey(&'static str),
    /// `Authorization: Bearer <key>`.
    Bearer,
    /// API key in a vendor-specific header.
    Header(&'static str),
    /// HMAC-SHA256 signature over method/host/path/timestamp.
    HmacSigned,
}

/// Where offers live in a network's JSON response.
struct ResponseMap {
    items: &'static str,
    id: &'static str,
    title: &'static str,
    price: &'static str,
    original_price: Option<&'static str>,
    currency: Option<&'static str>,
    currency_default: &'static str,
    merchant: Option<&'static str>,
    merchant_default: &'static str,
    brand: Option<&'static str>,
    category: Option<&'static str>,
    image: Option<&'static str>,
    rating: Option<&'static str>,
    review_count: Option<&'static str>,
    condition: Option<&'static str>,
}

impl AffiliateNetwork {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "amazon" => Some(Self::Amazon),
            "rakuten" => Some(Self::Rakuten),
            "cj" | "commission_junction" | "commissionjunction" => {
                Some(Self::CommissionJunction)
            }
            "ebay" => Some(Self::Ebay),
            "walmart" => Some(Self::Walmart),
            "bestbuy" | "best_buy" => Some(Self::BestBuy),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amazon => "amazon",
            Self::Rakuten => "rakuten",
            Self::CommissionJunction => "cj",
            Self::Ebay => "ebay",
            Self::Walmart => "walmart",
            Self::BestBuy => "bestbuy",
        }
    }

    fn endpoint(&self) -> &'static str {
        match self {
            Self::Amazon => "https://webservices.amazon.com/paapi5/searchitems",
            Self::Rakuten => "https://api.rakutenmarketing.com/productsearch/1.0",
            Self::CommissionJunction => "https://product-search.api.cj.com/v2/product-search",
            Self::Ebay => "https://api.ebay.com/buy/browse/v1/item_summary/search",
            Self::Walmart => {
                "https://developer.api.walmart.com/api-proxy/service/affil/product/v2/search"
            }
            Self::BestBuy => "https://api.bestbuy.com/v1/products",
        }
    }

    fn search_param(&self) -> &'static str {
        match self {
            Self::Amazon => "Keywords",
            Self::Rakuten => "keyword",
            Self::CommissionJunction => "keywords",
            Self::Ebay => "q",
            Self::Walmart => "query",
            Self::BestBuy => "search",
        }
    }

    fn auth_style(&self) -> AuthStyle {
        match self {
            Self::Amazon => AuthStyle::HmacSigned,
            Self::Rakuten => AuthStyle::Bearer,
            Self::CommissionJunction => AuthStyle::Bearer,
            Self::Ebay => AuthStyle::Bearer,
            Self::Walmart => AuthStyle::Header("WM_SEC.KEY"),
            Self::BestBuy => AuthStyle::QueryKey("apiKey"),
        }
    }

    /// Per-network floor on request spacing.
    pub fn default_min_interval(&self) -> Duration {
        match self {
            // PA-API starts partners at one request per second.
            Self::Amazon => Duration::from_millis(1000),
            Self::Rakuten | Self::CommissionJunction => Duration::from_millis(500),
            Self::Ebay | Self::Walmart | Self::BestBuy => Duration::from_millis(250),
        }
    }

    fn response_map(&self) -> &'static ResponseMap {
        match self {
            Self::Amazon => &ResponseMap {
                items: "/ItemsResult/Items",
                id: "/ASIN",
                title: "/ItemInfo/Title/DisplayValue",
                price: "/Offers/Listings/0/Price/Amount",
                original_price: Some("/Offers/Listings/0/SavingBasis/Amount"),
                currency: Some("/Offers/Listings/0/Price/Currency"),
                currency_default: "USD",
                merchant: None,
                merchant_default: "amazon.com",
                brand: Some("/ItemInfo/ByLineInfo/Brand/DisplayValue"),
                category: Some("/ItemInfo/Classifications/ProductGroup/DisplayValue"),
                image: Some("/Images/Primary/Large/URL"),
                rating: None,
                review_count: None,
                condition: None,
            },
            Self::Rakuten => &ResponseMap {
                items: "/products",
                id: "/sku",
                title: "/productname",
                price: "/price",
                original_price: Some("/retailprice"),
                currency: Some("/currency"),
                currency_default: "USD",
                merchant: Some("/merchantname"),
                merchant_default: "rakuten.com",
                brand: Some("/brand"),
                category: Some("/category/primary"),
                image: Some("/imageurl"),
                rating: None,
                review_count: None,
                condition: None,
            },
            Self::CommissionJunction => &ResponseMap {
                items: "/products",
                id: "/sku",
                title: "/name",
                price: "/sale-price",
                original_price: Some("/price"),
                currency: Some("/currency"),
                currency_default: "USD",
                merchant: Some("/advertiser-name"),
                merchant_default: "cj.com",
                brand: Some("/manufacturer-name"),
                category: Some("/advertiser-category"),
                image: Some("/image-url"),
                rating: None,
                review_count: None,
                condition: None,
            },
            Self::Ebay => &ResponseMap {
                items: "/itemSummaries",
                id: "/itemId",
                title: "/title",
                price: "/price/value",
                original_price: Some("/marketingPrice/originalPrice/value"),
                currency: Some("/price/currency"),
                currency_default: "USD",
                merchant: None,
                merchant_default: "ebay.com",
                brand: None,
                category: Some("/categories/0/categoryName"),
                image: Some("/image/imageUrl"),
                rating: None,
                review_count: None,
                condition: Some("/condition"),
            },
            Self::Walmart => &ResponseMap {
                items: "/items",
                id: "/itemId",
                title: "/name",
                price: "/salePrice",
                original_price: Some("/msrp"),
                currency: None,
                currency_default: "USD",
                merchant: None,
                merchant_default: "walmart.com",
                brand: Some("/brandName"),
                category: Some("/categoryPath"),
                image: Some("/largeImage"),
                rating: Some("/customerRating"),
                review_count: Some("/numReviews"),
                condition: None,
            },
            Self::BestBuy => &ResponseMap {
                items: "/products",
                id: "/sku",
                title: "/name",
                price: "/salePrice",
                original_price: Some("/regularPrice"),
                currency: None,
                currency_default: "USD",
                merchant: None,
                merchant_default: "bestbuy.com",
                brand: Some("/manufacturer"),
                category: Some("/categoryPath/0/name"),
                image: Some("/image"),
                rating: Some("/customerReviewAverage"),
                review_count: Some("/customerReviewCount"),
                condition: None,
            },
        }
    }
}

/// Credentials for one affiliate network. Which fields matter depends on
/// the network's auth style.
#[derive(Debug, Clone, Default)]
pub struct AffiliateCredentials {
    pub api_key: Option<String>,
    pub partner_id: Option<String>,
    pub secret_key: Option<String>,
}

/// HMAC-SHA256 signature, base64-encoded.
pub(crate) fn hmac_signature(secret: &str, payload: &str) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

pub struct AffiliateApiAdapter {
    name: String,
    network: AffiliateNetwork,
    credentials: AffiliateCredentials,
    default_category: String,
    client: Client,
    pacer: RequestPacer,
    poll_interval: Duration,
}

impl AffiliateApiAdapter {
    pub fn new(
        name: &str,
        network: AffiliateNetwork,
        credentials: AffiliateCredentials,
        rate_limit_per_minute: u32,
        poll_interval: Duration,
        default_category: &str,
    ) -> Self {
        let client = Client::builder()
            .user_agent("dealhawk/0.1")
            .build()
            .expect("Failed to create HTTP client");
        Self {
            name: name.to_string(),
            network,
            credentials,
            default_category: default_category.to_string(),
            client,
            pacer: RequestPacer::from_rate_per_minute(
                network.default_min_interval(),
                rate_limit_per_minute,
            ),
            poll_interval,
        }
    }

    pub fn network(&self) -> AffiliateNetwork {
        self.network
    }

    async fn request(
        &self,
        ctx: &AdapterContext,
        query: Option<&str>,
        category: Option<&str>,
    ) -> Result<FetchOutcome, SourceError> {
        ctx.ensure_active()?;
        self.pacer.acquire().await;
        ctx.ensure_active()?;

        let mut req = self
            .client
            .get(self.network.endpoint())
            .timeout(ctx.timeout);

        if let Some(q) = query {
            req = req.query(&[(self.network.search_param(), q)]);
        }
        if let Some(cat) = category {
            req = req.query(&[("category", cat)]);
        }

        let key = self.credentials.api_key.as_deref().unwrap_or_default();
        match self.network.auth_style() {
            AuthStyle::QueryKey(param) => {
                req = req.query(&[(param, key)]);
            }
            AuthStyle::Bearer => {
                req = req.header("Authorization", format!("Bearer {key}"));
            }
            AuthStyle::Header(header) => {
                req = req.header(header, key);
            }
            AuthStyle::HmacSigned => {
                let timestamp = Utc::now().to_rfc3339();
                let secret = self.credentials.secret_key.as_deref().unwrap_or_default();
                let host_and_path = self
                    .network
                    .endpoint()
                    .trim_start_matches("https://")
                    .to_string();
                let payload = format!("GET\n{host_and_path}\n{timestamp}");
                let signature = hmac_signature(secret, &payload);
                req = req.query(&[
                    ("Timestamp", timestamp.as_str()),
                    ("Signature", signature.as_str()),
                ]);
                if let Some(partner) = &self.credentials.partner_id {
                    req = req.query(&[("PartnerTag", partner.as_str())]);
                }
            }
        }

        debug!("Fetching offers from {} ({})", self.name, self.network.as_str());

        let response = req.send().await.map_err(SourceError::from)?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::from_status(
                status.as_u16(),
                self.network.as_str(),
            ));
        }

        let rate_limit_remaining = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        let body: Value = response
            .json()
            .await
            .map_err(|e| SourceError::parse(format!("{}: {e}", self.network.as_str())))?;

        let offers = self.translate_items(&body, Utc::now());
        Ok(FetchOutcome {
            offers,
            rate_limit_remaining,
        })
    }

    fn translate_items(&self, body: &Value, fetched_at: DateTime<Utc>) -> Vec<RawOffer> {
        let map = self.network.response_map();
        let Some(items) = body.pointer(map.items).and_then(Value::as_array) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| self.translate_item(item, map, fetched_at))
            .collect()
    }

    fn translate_item(
        &self,
        item: &Value,
        map: &ResponseMap,
        fetched_at: DateTime<Utc>,
    ) -> Option<RawOffer> {
        let external_id = id_at(item, map.id)?;
        let title = str_at(item, map.title)?.to_string();
        let current_price = num_at(item, map.price)?;

        let currency = map
            .currency
            .and_then(|ptr| str_at(item, ptr))
            .unwrap_or(map.currency_default)
            .to_string();
        let merchant = map
            .merchant
            .and_then(|ptr| str_at(item, ptr))
            .unwrap_or(map.merchant_default)
            .to_string();
        let category = map
            .category
            .and_then(|ptr| str_at(item, ptr))
            .map(str::to_string)
            .unwrap_or_else(|| self.default_category.clone());

        let mut offer = RawOffer::new(
            &self.name,
            &external_id,
            &title,
            current_price,
            &currency,
            &merchant,
            fetched_at,
        );
        offer.category = category;
        offer.original_price = map.original_price.and_then(|ptr| num_at(item, ptr));
        offer.brand = map
            .brand
            .and_then(|ptr| str_at(item, ptr))
            .map(str::to_string);
        offer.image_url = map
            .image
            .and_then(|ptr| str_at(item, ptr))
            .map(str::to_string);
        offer.rating = map.rating.and_then(|ptr| num_at(item, ptr));
        offer.review_count = map
            .review_count
            .and_then(|ptr| num_at(item, ptr))
            .map(|n| n as u32);
        if let Some(condition) = map.condition.and_then(|ptr| str_at(item, ptr)) {
            offer.condition = parse_condition(condition);
        }
        Some(offer)
    }
}

#[async_trait]
impl SourceAdapter for AffiliateApiAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Affiliate
    }

    fn min_request_interval(&self) -> Duration {
        self.pacer.min_interval()
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<FetchOutcome, SourceError> {
        self.request(ctx, None, None).await
    }

    async fn search(
        &self,
        ctx: &AdapterContext,
        query: &str,
        category: Option<&str>,
    ) -> Result<FetchOutcome, SourceError> {
        self.request(ctx, Some(query), category).await
    }
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer)?.as_str()
}

/// Ids show up as strings or numbers depending on the network.
fn id_at(value: &Value, pointer: &str) -> Option<String> {
    let v = value.pointer(pointer)?;
    if let Some(s) = v.as_str() {
        return Some(s.to_string());
    }
    v.as_i64().map(|n| n.to_string())
}

/// Numbers show up as JSON numbers or quoted strings depending on the
/// network.
fn num_at(value: &Value, pointer: &str) -> Option<f64> {
    let v = value.pointer(pointer)?;
    v.as_f64().or_else(|| v.as_str()?.trim().parse().ok())
}

fn parse_condition(raw: &str) -> Condition {
    let lower = raw.to_lowercase();
    if lower.contains("refurb") {
        Condition::Refurbished
    } else if lower.contains("like new") || lower.contains("open box") {
        Condition::LikeNew
    } else if lower.contains("used") || lower.contains("pre-owned") {
        Condition::Used
    } else {
        Condition::New
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapter(network: AffiliateNetwork) -> AffiliateApiAdapter {
        AffiliateApiAdapter::new(
            network.as_str(),
            network,
            AffiliateCredentials::default(),
            60,
            Duration::from_secs(900),
            "electronics",
        )
    }

    #[test]
    fn test_network_parse() {
        assert_eq!(AffiliateNetwork::parse("Amazon"), Some(AffiliateNetwork::Amazon));
        assert_eq!(
            AffiliateNetwork::parse("cj"),
            Some(AffiliateNetwork::CommissionJunction)
        );
        assert_eq!(AffiliateNetwork::parse("best_buy"), Some(AffiliateNetwork::BestBuy));
        assert_eq!(AffiliateNetwork::parse("aliexpress"), None);
    }

    #[test]
    fn test_hmac_signature_deterministic() {
        let a = hmac_signature("secret", "GET\nexample.com/v1\n2025-06-01T00:00:00Z");
        let b = hmac_signature("secret", "GET\nexample.com/v1\n2025-06-01T00:00:00Z");
        assert_eq!(a, b);
        let c = hmac_signature("other-secret", "GET\nexample.com/v1\n2025-06-01T00:00:00Z");
        assert_ne!(a, c);
    }

    #[test]
    fn test_translate_bestbuy_items() {
        let body = json!({
            "products": [
                {
                    "sku": 6509631,
                    "name": "MacBook Pro 14 M3",
                    "salePrice": 1749.0,
                    "regularPrice": 1999.0,
                    "manufacturer": "Apple",
                    "customerReviewAverage": 4.8,
                    "customerReviewCount": 1243,
                    "categoryPath": [{"name": "Laptops"}],
                    "image": "https://img.bbystatic.com/x.jpg"
                },
                {
                    // Missing price: skipped.
                    "sku": 123,
                    "name": "Mystery Item"
                }
            ]
        });
        let offers = adapter(AffiliateNetwork::BestBuy).translate_items(&body, Utc::now());
        assert_eq!(offers.len(), 1);
        let offer = &offers[0];
        assert_eq!(offer.external_id, "6509631");
        assert_eq!(offer.current_price, 1749.0);
        assert_eq!(offer.original_price, Some(1999.0));
        assert_eq!(offer.brand.as_deref(), Some("Apple"));
        assert_eq!(offer.merchant, "bestbuy.com");
        assert_eq!(offer.category, "Laptops");
        assert_eq!(offer.review_count, Some(1243));
    }

    #[test]
    fn test_translate_walmart_string_prices() {
        let body = json!({
            "items": [{
                "itemId": 44321,
                "name": "65in TV",
                "salePrice": "498.00",
                "msrp": "698.00",
                "customerRating": "4.3",
                "numReviews": 211
            }]
        });
        let offers = adapter(AffiliateNetwork::Walmart).translate_items(&body, Utc::now());
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].current_price, 498.0);
        assert_eq!(offers[0].original_price, Some(698.0));
        assert_eq!(offers[0].rating, Some(4.3));
        assert_eq!(offers[0].currency, "USD");
    }

    #[test]
    fn test_translate_ebay_condition() {
        let body = json!({
            "itemSummaries": [{
                "itemId": "v1|1234|0",
                "title": "ThinkPad X1 Carbon",
                "price": {"value": "899.99", "currency": "USD"},
                "condition": "Certified Refurbished"
            }]
        });
        let offers = adapter(AffiliateNetwork::Ebay).translate_items(&body, Utc::now());
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].condition, Condition::Refurbished);
        assert_eq!(offers[0].merchant, "ebay.com");
    }

    #[test]
    fn test_translate_missing_items_array() {
        let body = json!({"unexpected": "shape"});
        let offers = adapter(AffiliateNetwork::Amazon).translate_items(&body, Utc::now());
        assert!(offers.is_empty());
    }

    #[test]
    fn test_default_category_applied() {
        let body = json!({
            "itemSummaries": [{
                "itemId": "v1|1|0",
                "title": "USB Cable",
                "price": {"value": 9.99}
            }]
        });
        let offers = adapter(AffiliateNetwork::Ebay).translate_items(&body, Utc::now());
        assert_eq!(offers[0].category, "electronics");
    }
}
