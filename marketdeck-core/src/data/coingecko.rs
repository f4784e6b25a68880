//! CoinGecko market-data provider.
//!
//! Fetches rank-ordered market pages from `/coins/markets` and free-text
//! candidates from `/search`. One HTTP request per call; the status and body
//! are classified into [`FetchError`] kinds so the retrying fetcher can pick
//! its backoff.
//!
//! Items whose `market_cap_rank` is null have no place in any window, so
//! market pages drop them but still report the raw entry count. Detail lookups
//! keep them with rank 0.

use super::provider::{FetchError, MarketProvider, Page, RankedItem};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Upstream per-request item cap.
pub const MAX_PER_PAGE: u32 = 250;

/// Connection parameters for the upstream API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub vs_currency: String,
    pub order: String,
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.coingecko.com/api/v3".to_string(),
            vs_currency: "usd".to_string(),
            order: "market_cap_desc".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    coins: Vec<SearchCoin>,
}

#[derive(Debug, Deserialize)]
struct SearchCoin {
    id: String,
}

/// CoinGecko data provider.
pub struct CoinGeckoProvider {
    client: reqwest::blocking::Client,
    config: UpstreamConfig,
}

impl CoinGeckoProvider {
    pub fn new(config: UpstreamConfig) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("marketdeck/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("failed to build HTTP client");

        Self { client, config }
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// Build the markets URL for one page.
    fn markets_url(&self, page: u32, per_page: u32) -> String {
        format!(
            "{}/coins/markets?vs_currency={}&order={}&per_page={}&page={page}\
             &sparkline=false&price_change_percentage=24h,7d,30d,1y",
            self.base(),
            self.config.vs_currency,
            self.config.order,
            per_page.min(MAX_PER_PAGE),
        )
    }

    fn ids_url(&self, ids: &[String]) -> String {
        format!(
            "{}/coins/markets?vs_currency={}&ids={}&order={}\
             &sparkline=false&price_change_percentage=24h,7d,30d,1y",
            self.base(),
            self.config.vs_currency,
            ids.join(","),
            self.config.order,
        )
    }

    fn search_url(&self, query: &str) -> Result<reqwest::Url, FetchError> {
        let mut url = reqwest::Url::parse(&format!("{}/search", self.base()))
            .map_err(|e| FetchError::Transport(format!("invalid base URL: {e}")))?;
        url.query_pairs_mut().append_pair("query", query);
        Ok(url)
    }

    /// Execute one GET and classify the outcome.
    fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        debug!(url, "GET");
        let resp = self
            .client
            .get(url)
            .send()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(FetchError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            return Err(FetchError::ServerError {
                status: status.as_u16(),
            });
        }

        resp.json::<Value>().map_err(|e| {
            if e.is_decode() {
                FetchError::Malformed(format!("invalid JSON: {e}"))
            } else {
                FetchError::Transport(e.to_string())
            }
        })
    }
}

/// Parse a markets page. Unranked entries are dropped from `items` but
/// counted in `upstream_len`.
pub fn parse_markets(body: Value) -> Result<Page, FetchError> {
    let entries = parse_entries(body)?;
    let upstream_len = entries.len();
    let items = entries.into_iter().filter(RankedItem::is_ranked).collect();
    Ok(Page {
        items,
        upstream_len,
    })
}

/// Parse a markets response into items, unranked ones with rank 0.
pub fn parse_entries(body: Value) -> Result<Vec<RankedItem>, FetchError> {
    let Value::Array(entries) = body else {
        return Err(FetchError::Malformed("markets response is not an array".into()));
    };

    entries
        .into_iter()
        .map(|mut entry| {
            if let Value::Object(fields) = &mut entry {
                let rank = fields.entry("market_cap_rank").or_insert(Value::Null);
                if rank.is_null() {
                    *rank = Value::from(0);
                }
            }
            serde_json::from_value(entry)
                .map_err(|e| FetchError::Malformed(format!("bad market entry: {e}")))
        })
        .collect()
}

impl MarketProvider for CoinGeckoProvider {
    fn name(&self) -> &str {
        "coingecko"
    }

    fn fetch_page(&self, page: u32, per_page: u32) -> Result<Page, FetchError> {
        let body = self.get_json(&self.markets_url(page, per_page))?;
        parse_markets(body)
    }

    fn search_ids(&self, query: &str) -> Result<Vec<String>, FetchError> {
        let body = self.get_json(self.search_url(query)?.as_str())?;
        let parsed: SearchResponse = serde_json::from_value(body)
            .map_err(|e| FetchError::Malformed(format!("bad search response: {e}")))?;
        Ok(parsed.coins.into_iter().map(|c| c.id).collect())
    }

    fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<RankedItem>, FetchError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let body = self.get_json(&self.ids_url(ids))?;
        parse_entries(body)
    }
}
