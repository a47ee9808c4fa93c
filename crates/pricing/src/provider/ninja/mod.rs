//! Bulk-table pricing source.
//!
//! Downloads the whole price table for an economy category in one request
//! and serves O(1) in-memory lookups until the table's TTL expires. This is
//! the fast-updating "primary" source: individual queries never hit the
//! network except at refresh time.
//!
//! # API Endpoints
//!
//! - Currency-shaped categories: `{base}/currencyoverview?league={league}&type={type}`
//! - Everything else: `{base}/itemoverview?league={league}&type={type}`
//!
//! # Response Format
//!
//! The API returns a `lines` array with one entry per priced item. Currency
//! lines carry `currencyTypeName`/`chaosEquivalent`, item lines carry
//! `name`/`chaosValue`, both carry an optional `listingCount`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};

use crate::client::RateLimitConfig;
use crate::errors::ProviderError;
use crate::models::{ItemCategory, PriceQuery, ProviderConfidence, SourceQuote};
use crate::provider::PriceProvider;

const BASE_URL: &str = "https://poe.ninja/api/data";
const SOURCE_ID: &str = "ninja";

/// Default HTTP request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a downloaded table serves lookups before it is refreshed.
const DEFAULT_TABLE_TTL: Duration = Duration::from_secs(600);

/// Listing counts below this are reported as low confidence.
const SPARSE_LISTING_COUNT: u32 = 10;

/// Listing counts at or above this are reported as high confidence.
const DEEP_LISTING_COUNT: u32 = 100;

/// One line of an overview response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OverviewLine {
    /// Item name (item overviews)
    name: Option<String>,
    /// Currency name (currency overviews)
    currency_type_name: Option<String>,
    /// Price in chaos (item overviews)
    chaos_value: Option<f64>,
    /// Price in chaos (currency overviews)
    chaos_equivalent: Option<f64>,
    /// Listings behind the price
    #[serde(default)]
    listing_count: Option<u32>,
}

/// Response from an overview endpoint.
#[derive(Debug, Deserialize)]
struct OverviewResponse {
    lines: Vec<OverviewLine>,
}

/// One priced row of an in-memory table.
#[derive(Clone, Debug)]
struct TableRow {
    chaos_value: f64,
    listing_count: u32,
}

/// A downloaded category table.
#[derive(Debug)]
struct Table {
    rows: HashMap<String, TableRow>,
    refreshed_at: Instant,
}

impl Table {
    fn is_stale(&self, ttl: Duration) -> bool {
        self.refreshed_at.elapsed() > ttl
    }
}

/// Bulk-table source serving whole-category price tables.
///
/// # Example
///
/// ```ignore
/// let provider = NinjaProvider::new("Standard");
/// let quote = provider.fetch_quote(&query).await?;
/// ```
pub struct NinjaProvider {
    client: Client,
    league: String,
    table_ttl: Duration,
    tables: RwLock<HashMap<ItemCategory, Table>>,
    /// Serializes refreshes so concurrent misses download a table once.
    refresh_gate: Mutex<()>,
}

impl NinjaProvider {
    /// Create a provider for the given league.
    pub fn new(league: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            league: league.into(),
            table_ttl: DEFAULT_TABLE_TTL,
            tables: RwLock::new(HashMap::new()),
            refresh_gate: Mutex::new(()),
        }
    }

    /// Override the table TTL.
    pub fn with_table_ttl(mut self, ttl: Duration) -> Self {
        self.table_ttl = ttl;
        self
    }

    /// Overview endpoint and type parameter for a category.
    fn overview_kind(category: ItemCategory) -> (&'static str, &'static str) {
        match category {
            ItemCategory::Currency => ("currencyoverview", "Currency"),
            ItemCategory::Fragment => ("currencyoverview", "Fragment"),
            ItemCategory::DivinationCard => ("itemoverview", "DivinationCard"),
            ItemCategory::SkillGem => ("itemoverview", "SkillGem"),
            ItemCategory::UniqueWeapon => ("itemoverview", "UniqueWeapon"),
            ItemCategory::UniqueArmour => ("itemoverview", "UniqueArmour"),
            ItemCategory::UniqueAccessory => ("itemoverview", "UniqueAccessory"),
            ItemCategory::UniqueFlask => ("itemoverview", "UniqueFlask"),
            ItemCategory::UniqueJewel => ("itemoverview", "UniqueJewel"),
            ItemCategory::UniqueMap => ("itemoverview", "UniqueMap"),
            ItemCategory::Essence => ("itemoverview", "Essence"),
            ItemCategory::Fossil => ("itemoverview", "Fossil"),
            ItemCategory::Oil => ("itemoverview", "Oil"),
            ItemCategory::Incubator => ("itemoverview", "Incubator"),
        }
    }

    fn overview_url(&self, category: ItemCategory) -> String {
        let (endpoint, overview_type) = Self::overview_kind(category);
        format!(
            "{}/{}?league={}&type={}",
            BASE_URL,
            endpoint,
            urlencoding::encode(&self.league),
            overview_type
        )
    }

    /// Normalize a line into a table row, skipping unpriceable lines.
    ///
    /// Lines sharing a name (e.g. link variants of the same unique) collapse
    /// onto the row with the deepest market.
    fn line_row(line: &OverviewLine) -> Option<(String, TableRow)> {
        let name = line
            .name
            .as_deref()
            .or(line.currency_type_name.as_deref())?;
        let chaos_value = line.chaos_value.or(line.chaos_equivalent)?;
        if !chaos_value.is_finite() || chaos_value < 0.0 {
            return None;
        }

        Some((
            name.to_lowercase(),
            TableRow {
                chaos_value,
                listing_count: line.listing_count.unwrap_or(0),
            },
        ))
    }

    /// Confidence signal derived from market depth.
    fn confidence_for(listing_count: u32) -> ProviderConfidence {
        if listing_count < SPARSE_LISTING_COUNT {
            ProviderConfidence::Low
        } else if listing_count < DEEP_LISTING_COUNT {
            ProviderConfidence::Medium
        } else {
            ProviderConfidence::High
        }
    }

    /// Whether the category's table is missing or past its TTL.
    async fn needs_refresh(&self, category: ItemCategory) -> bool {
        let tables = self.tables.read().await;
        tables
            .get(&category)
            .map(|table| table.is_stale(self.table_ttl))
            .unwrap_or(true)
    }

    /// Download and install a fresh table for the category.
    ///
    /// Single-flight: concurrent callers queue on the gate, and whoever
    /// enters after the winner finds a fresh table and returns immediately.
    async fn refresh_table(&self, category: ItemCategory) -> Result<(), ProviderError> {
        let _gate = self.refresh_gate.lock().await;
        if !self.needs_refresh(category).await {
            return Ok(());
        }

        let url = self.overview_url(category);
        let response = self.client.get(&url).send().await.map_err(map_send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::from_status(SOURCE_ID, status));
        }

        let body: OverviewResponse =
            response
                .json()
                .await
                .map_err(|e| ProviderError::MalformedResponse {
                    source: SOURCE_ID.to_string(),
                    message: e.to_string(),
                })?;

        let mut rows: HashMap<String, TableRow> = HashMap::with_capacity(body.lines.len());
        for line in &body.lines {
            if let Some((key, row)) = Self::line_row(line) {
                let deeper = rows
                    .get(&key)
                    .map(|existing| row.listing_count > existing.listing_count)
                    .unwrap_or(true);
                if deeper {
                    rows.insert(key, row);
                }
            }
        }
        let row_count = rows.len();

        {
            let mut tables = self.tables.write().await;
            tables.insert(
                category,
                Table {
                    rows,
                    refreshed_at: Instant::now(),
                },
            );
        }

        debug!(
            "{}: refreshed {:?} table with {} rows",
            SOURCE_ID, category, row_count
        );
        Ok(())
    }

    /// Serve a query from the in-memory table.
    async fn lookup(&self, query: &PriceQuery) -> Option<SourceQuote> {
        let tables = self.tables.read().await;
        let table = tables.get(&query.category)?;
        let row = table.rows.get(&query.display_name().to_lowercase())?;

        Some(
            SourceQuote::new(SOURCE_ID, row.chaos_value)
                .with_sample_count(row.listing_count)
                .with_confidence(Self::confidence_for(row.listing_count)),
        )
    }
}

#[async_trait]
impl PriceProvider for NinjaProvider {
    fn id(&self) -> &'static str {
        SOURCE_ID
    }

    fn rate_limit(&self) -> RateLimitConfig {
        // One table download covers a whole category, so refreshes are rare
        // and the interval can stay generous.
        RateLimitConfig {
            min_interval: Duration::from_millis(800),
        }
    }

    async fn fetch_quote(
        &self,
        query: &PriceQuery,
    ) -> Result<Option<SourceQuote>, ProviderError> {
        if self.needs_refresh(query.category).await {
            self.refresh_table(query.category).await?;
        }
        Ok(self.lookup(query).await)
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
