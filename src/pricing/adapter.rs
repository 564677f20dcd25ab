//! Market adapter seam and the HTTP-backed adapter implementations.
//!
//! Three feeds contribute comparables: a live-auction feed, a marketplace
//! API, and a historical-price service. Each adapter owns its wire format
//! and maps transport failures onto the shared error taxonomy; the agent
//! treats any adapter failure as an empty contribution.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{Error, Result};

use super::types::{CardQuery, Comparable, ConditionBand};

/// A source of comparable sales.
#[async_trait]
pub trait MarketAdapter: Send + Sync {
    /// Stable adapter identifier used in `sources` and configuration.
    fn id(&self) -> &str;

    /// Fetch comparables for the query. An empty vector is a valid answer.
    async fn fetch_comparables(&self, query: &CardQuery) -> Result<Vec<Comparable>>;
}

/// Shared configuration for the HTTP adapters.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl AdapterConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_client(&self) -> Result<Client> {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))
    }
}

fn map_send_error(service: &str, error: reqwest::Error, timeout: Duration) -> Error {
    if error.is_timeout() {
        Error::timeout(timeout.as_millis() as u64)
    } else {
        Error::TransientIo(format!("{} request failed: {}", service, error))
    }
}

fn check_status(service: &str, status: reqwest::StatusCode) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    if status.as_u16() == 429 {
        return Err(Error::throttled(service.to_string()));
    }
    Err(Error::upstream_status(service, status.as_u16()))
}

/// Live-auction feed: recently closed lots with hammer prices.
pub struct AuctionFeedAdapter {
    config: AdapterConfig,
    http: Client,
}

impl AuctionFeedAdapter {
    pub const ID: &'static str = "auction_feed";

    pub fn new(config: AdapterConfig) -> Result<Self> {
        let http = config.build_client()?;
        Ok(Self { config, http })
    }
}

#[derive(Debug, Deserialize)]
struct AuctionLotPage {
    lots: Vec<AuctionLot>,
}

#[derive(Debug, Deserialize)]
struct AuctionLot {
    hammer_price_cents: i64,
    currency: String,
    condition: Option<String>,
    closed_at: DateTime<Utc>,
}

#[async_trait]
impl MarketAdapter for AuctionFeedAdapter {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn fetch_comparables(&self, query: &CardQuery) -> Result<Vec<Comparable>> {
        let url = format!("{}/v1/lots/closed", self.config.base_url);
        let mut params = vec![("card", query.name.clone())];
        if let Some(set) = &query.set {
            params.push(("set", set.clone()));
        }
        if let Some(number) = &query.number {
            params.push(("number", number.clone()));
        }

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .query(&params)
            .send()
            .await
            .map_err(|e| map_send_error(Self::ID, e, self.config.timeout))?;

        check_status(Self::ID, response.status())?;

        let page: AuctionLotPage = response
            .json()
            .await
            .map_err(|e| Error::TransientIo(format!("auction feed returned junk: {}", e)))?;

        Ok(page
            .lots
            .into_iter()
            .map(|lot| Comparable {
                price_cents: lot.hammer_price_cents,
                currency: lot.currency,
                condition: lot.condition.as_deref().and_then(ConditionBand::parse),
                sold_at: lot.closed_at,
                source: Self::ID.to_string(),
            })
            .collect())
    }
}

/// Marketplace API: completed listings with sale prices.
pub struct MarketplaceAdapter {
    config: AdapterConfig,
    http: Client,
}

impl MarketplaceAdapter {
    pub const ID: &'static str = "marketplace";

    pub fn new(config: AdapterConfig) -> Result<Self> {
        let http = config.build_client()?;
        Ok(Self { config, http })
    }
}

#[derive(Debug, Deserialize)]
struct MarketplaceSearch {
    results: Vec<MarketplaceSale>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarketplaceSale {
    sold_price: f64,
    currency_code: String,
    item_condition: Option<String>,
    sold_date: DateTime<Utc>,
}

#[async_trait]
impl MarketAdapter for MarketplaceAdapter {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn fetch_comparables(&self, query: &CardQuery) -> Result<Vec<Comparable>> {
        let url = format!("{}/v2/sales/search", self.config.base_url);
        let mut terms = query.name.clone();
        if let Some(set) = &query.set {
            terms.push(' ');
            terms.push_str(set);
        }
        if let Some(rarity) = &query.rarity {
            terms.push(' ');
            terms.push_str(rarity);
        }

        let response = self
            .http
            .get(&url)
            .header("x-api-key", &self.config.api_key)
            .query(&[("q", terms.as_str()), ("status", "sold")])
            .send()
            .await
            .map_err(|e| map_send_error(Self::ID, e, self.config.timeout))?;

        check_status(Self::ID, response.status())?;

        let search: MarketplaceSearch = response
            .json()
            .await
            .map_err(|e| Error::TransientIo(format!("marketplace returned junk: {}", e)))?;

        Ok(search
            .results
            .into_iter()
            .map(|sale| Comparable {
                price_cents: (sale.sold_price * 100.0).round() as i64,
                currency: sale.currency_code,
                condition: sale.item_condition.as_deref().and_then(ConditionBand::parse),
                sold_at: sale.sold_date,
                source: Self::ID.to_string(),
            })
            .collect())
    }
}

/// Historical-price service: dated price points per card printing.
pub struct PriceHistoryAdapter {
    config: AdapterConfig,
    http: Client,
}

impl PriceHistoryAdapter {
    pub const ID: &'static str = "price_history";

    pub fn new(config: AdapterConfig) -> Result<Self> {
        let http = config.build_client()?;
        Ok(Self { config, http })
    }
}

#[derive(Debug, Deserialize)]
struct HistorySeries {
    points: Vec<HistoryPoint>,
}

#[derive(Debug, Deserialize)]
struct HistoryPoint {
    price_cents: i64,
    currency: String,
    recorded_at: DateTime<Utc>,
}

#[async_trait]
impl MarketAdapter for PriceHistoryAdapter {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn fetch_comparables(&self, query: &CardQuery) -> Result<Vec<Comparable>> {
        let url = format!("{}/v1/history", self.config.base_url);
        let set = query.set.as_deref().unwrap_or("");
        let number = query.number.as_deref().unwrap_or("");

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .query(&[
                ("name", query.name.as_str()),
                ("set", set),
                ("number", number),
            ])
            .send()
            .await
            .map_err(|e| map_send_error(Self::ID, e, self.config.timeout))?;

        check_status(Self::ID, response.status())?;

        let series: HistorySeries = response
            .json()
            .await
            .map_err(|e| Error::TransientIo(format!("price history returned junk: {}", e)))?;

        Ok(series
            .points
            .into_iter()
            .map(|point| Comparable {
                price_cents: point.price_cents,
                currency: point.currency,
                condition: None,
                sold_at: point.recorded_at,
                source: Self::ID.to_string(),
            })
            .collect())
    }
}
