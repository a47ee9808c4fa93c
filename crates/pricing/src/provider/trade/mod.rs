//! Per-query search pricing source.
//!
//! Issues one search cycle per query against a trade-site style API and
//! derives a price from the first page of listings. This is the slower,
//! on-demand "secondary" source: every lookup costs a network round trip,
//! so it always runs rate-limited and retried.
//!
//! # API Endpoints
//!
//! - Search: `POST {base}/search/{league}` with a name filter, returning
//!   result hashes and a total count
//! - Listings: `GET {base}/fetch/{hashes}?query={search_id}`, returning the
//!   listings for up to ten hashes
//!
//! Thin result sets are flagged low confidence rather than dropped - the
//! reconciler decides what to do with them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::client::RateLimitConfig;
use crate::errors::ProviderError;
use crate::models::{PriceQuery, ProviderConfidence, SourceQuote};
use crate::provider::PriceProvider;

const BASE_URL: &str = "https://www.pathofexile.com/api/trade";
const SOURCE_ID: &str = "trade";

/// Default HTTP request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// How many listings from the first page feed the price estimate.
const PRICE_SAMPLE: usize = 10;

/// Result totals below this are reported as low confidence.
const THIN_MARKET_RESULTS: u32 = 8;

/// Result totals at or above this are reported as high confidence.
const DEEP_MARKET_RESULTS: u32 = 50;

/// Search request body.
#[derive(Debug, Serialize)]
struct SearchRequest {
    query: SearchQuery,
}

#[derive(Debug, Serialize)]
struct SearchQuery {
    /// Item name filter
    term: String,
    /// Only online sellers
    status: &'static str,
}

impl SearchRequest {
    fn for_query(query: &PriceQuery) -> Self {
        Self {
            query: SearchQuery {
                term: query.display_name().to_string(),
                status: "online",
            },
        }
    }
}

/// Response from the search endpoint.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    /// Search id, echoed back when fetching listings
    id: String,
    /// Listing hashes, newest first
    #[serde(default)]
    result: Vec<String>,
    /// Total matching listings
    #[serde(default)]
    total: u32,
}

/// Response from the fetch endpoint.
#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    result: Vec<FetchedListing>,
}

#[derive(Debug, Deserialize)]
struct FetchedListing {
    listing: Listing,
}

#[derive(Debug, Deserialize)]
struct Listing {
    price: Option<ListedPrice>,
}

#[derive(Debug, Deserialize)]
struct ListedPrice {
    amount: f64,
    currency: String,
}

/// Search source deriving prices from live listings.
///
/// # Example
///
/// ```ignore
/// let provider = TradeProvider::new("Standard");
/// let quote = provider.fetch_quote(&query).await?;
/// ```
pub struct TradeProvider {
    client: Client,
    league: String,
}

impl TradeProvider {
    /// Create a provider for the given league.
    pub fn new(league: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            league: league.into(),
        }
    }

    fn search_url(&self) -> String {
        format!("{}/search/{}", BASE_URL, urlencoding::encode(&self.league))
    }

    fn fetch_url(hashes: &[String], search_id: &str) -> String {
        format!(
            "{}/fetch/{}?query={}",
            BASE_URL,
            hashes.join(","),
            urlencoding::encode(search_id)
        )
    }

    /// Median of the chaos-denominated listing prices.
    ///
    /// Listings priced in other currencies are skipped rather than
    /// converted - conversion is the currency collaborator's job, and mixing
    /// units here would corrupt the estimate.
    fn median_chaos(listings: &[FetchedListing]) -> Option<f64> {
        let mut prices: Vec<f64> = listings
            .iter()
            .filter_map(|entry| entry.listing.price.as_ref())
            .filter(|price| price.currency == "chaos")
            .map(|price| price.amount)
            .filter(|amount| amount.is_finite() && *amount >= 0.0)
            .collect();

        if prices.is_empty() {
            return None;
        }

        prices.sort_by(|a, b| a.total_cmp(b));
        let mid = prices.len() / 2;
        if prices.len() % 2 == 1 {
            Some(prices[mid])
        } else {
            Some((prices[mid - 1] + prices[mid]) / 2.0)
        }
    }

    /// Confidence signal derived from the total result count.
    fn confidence_for(total: u32) -> ProviderConfidence {
        if total < THIN_MARKET_RESULTS {
            ProviderConfidence::Low
        } else if total < DEEP_MARKET_RESULTS {
            ProviderConfidence::Medium
        } else {
            ProviderConfidence::High
        }
    }

    async fn search(&self, query: &PriceQuery) -> Result<SearchResponse, ProviderError> {
        let response = self
            .client
            .post(self.search_url())
            .json(&SearchRequest::for_query(query))
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST {
            return Err(ProviderError::BadRequest {
                source: SOURCE_ID.to_string(),
                message: format!("search rejected for '{}'", query.item_key),
            });
        }
        if !status.is_success() {
            return Err(ProviderError::from_status(SOURCE_ID, status));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse {
                source: SOURCE_ID.to_string(),
                message: e.to_string(),
            })
    }

    async fn fetch_listings(
        &self,
        hashes: &[String],
        search_id: &str,
    ) -> Result<Vec<FetchedListing>, ProviderError> {
        let response = self
            .client
            .get(Self::fetch_url(hashes, search_id))
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::from_status(SOURCE_ID, status));
        }

        let body: FetchResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::MalformedResponse {
                    source: SOURCE_ID.to_string(),
                    message: e.to_string(),
                })?;
        Ok(body.result)
    }
}

#[async_trait]
impl PriceProvider for TradeProvider {
    fn id(&self) -> &'static str {
        SOURCE_ID
    }

    fn rate_limit(&self) -> RateLimitConfig {
        // The trade API throttles aggressively; stay well inside its budget.
        RateLimitConfig {
            min_interval: Duration::from_millis(1500),
        }
    }

    async fn fetch_quote(
        &self,
        query: &PriceQuery,
    ) -> Result<Option<SourceQuote>, ProviderError> {
        let search = self.search(query).await?;
        if search.result.is_empty() {
            return Ok(None);
        }

        let sample: Vec<String> = search.result.into_iter().take(PRICE_SAMPLE).collect();
        let listings = self.fetch_listings(&sample, &search.id).await?;

        let Some(median) = Self::median_chaos(&listings) else {
            // Listings exist but none are chaos-priced; nothing usable.
            return Ok(None);
        };

        Ok(Some(
            SourceQuote::new(SOURCE_ID, median)
                .with_sample_count(search.total)
                .with_confidence(Self::confidence_for(search.total)),
        ))
    }
}

/// Map a reqwest send error onto the provider taxonomy.
fn map_send_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout {
            source: SOURCE_ID.to_string(),
        }
    } else {
        ProviderError::Network(error)
    }
}
