//! Upstream provider trait, ranked item type, and fetch-layer errors.
//!
//! The MarketProvider trait abstracts over the paginated market-data source so
//! the chunked fetch pipeline can run against the real HTTP API or a scripted
//! provider in tests. Providers perform exactly one request per call; retries
//! live in [`super::retry::RetryingFetcher`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// One entry of the rank-ordered upstream dataset.
///
/// Only `id`, `rank` and `last_updated` drive the engine. Everything else the
/// upstream returns is kept in `payload` so it round-trips through the cache.
/// Rank 0 marks an unranked item; those only appear in search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedItem {
    pub id: String,
    #[serde(rename = "market_cap_rank")]
    pub rank: u32,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl RankedItem {
    pub fn new(id: impl Into<String>, rank: u32) -> Self {
        Self {
            id: id.into(),
            rank,
            symbol: String::new(),
            name: String::new(),
            last_updated: None,
            payload: Map::new(),
        }
    }

    pub fn is_ranked(&self) -> bool {
        self.rank > 0
    }

    /// Numeric payload field, if present and finite.
    pub fn metric(&self, field: &str) -> Option<f64> {
        self.payload
            .get(field)
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite())
    }

    /// String payload field, if present.
    pub fn text(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>, name: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self.name = name.into();
        self
    }

    pub fn with_metric(mut self, field: &str, value: f64) -> Self {
        self.payload.insert(field.to_string(), Value::from(value));
        self
    }
}

/// One upstream page.
///
/// `upstream_len` counts every entry the upstream returned, including ones
/// dropped from `items` (unranked entries). Only a page whose `upstream_len`
/// is below the requested size marks the end of the dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<RankedItem>,
    pub upstream_len: usize,
}

impl Page {
    /// True when the upstream returned fewer entries than `per_page`.
    pub fn is_short(&self, per_page: u32) -> bool {
        self.upstream_len < per_page as usize
    }
}

impl From<Vec<RankedItem>> for Page {
    fn from(items: Vec<RankedItem>) -> Self {
        Self {
            upstream_len: items.len(),
            items,
        }
    }
}

/// Kind of a fetch failure. Drives the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    RateLimited,
    ServerError,
    Transport,
    Malformed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::RateLimited => "rate limited",
            FailureKind::ServerError => "server error",
            FailureKind::Transport => "transport",
            FailureKind::Malformed => "malformed response",
        };
        f.write_str(s)
    }
}

/// Structured fetch-layer errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("rate limited by upstream")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("upstream returned HTTP {status}")]
    ServerError { status: u16 },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::RateLimited { .. } => FailureKind::RateLimited,
            FetchError::ServerError { .. } => FailureKind::ServerError,
            FetchError::Transport(_) => FailureKind::Transport,
            FetchError::Malformed(_) => FailureKind::Malformed,
        }
    }
}

/// A paginated, rate-limited source of ranked items.
pub trait MarketProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch one upstream page (1-based) of at most `per_page` entries, ordered by rank.
    fn fetch_page(&self, page: u32, per_page: u32) -> Result<Page, FetchError>;

    /// Free-text search. Returns candidate ids in relevance order.
    fn search_ids(&self, query: &str) -> Result<Vec<String>, FetchError>;

    /// Batch detail lookup by id. Unranked items are included with rank 0.
    fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<RankedItem>, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_upstream_shape_and_keeps_payload() {
        let json = r#"{
            "id": "bitcoin",
            "symbol": "btc",
            "name": "Bitcoin",
            "market_cap_rank": 1,
            "current_price": 64000.5,
            "price_change_percentage_24h": -1.25,
            "last_updated": "2024-05-01T12:00:00.000Z"
        }"#;
        let item: RankedItem = serde_json::from_str(json).unwrap();

        assert_eq!(item.id, "bitcoin");
        assert_eq!(item.rank, 1);
        assert_eq!(item.symbol, "btc");
        assert!(item.last_updated.is_some());
        assert_eq!(item.metric("current_price"), Some(64000.5));
        assert_eq!(item.metric("price_change_percentage_24h"), Some(-1.25));
        assert!(!item.payload.contains_key("id"));

        let back = serde_json::to_value(&item).unwrap();
        assert_eq!(back["market_cap_rank"], 1);
        assert_eq!(back["current_price"], 64000.5);
    }

    #[test]
    fn metric_ignores_non_numeric() {
        let mut item = RankedItem::new("x", 3);
        item.payload.insert("roi".into(), Value::Null);
        item.payload.insert("image".into(), Value::from("https://img"));
        assert_eq!(item.metric("roi"), None);
        assert_eq!(item.metric("image"), None);
        assert_eq!(item.text("image"), Some("https://img"));
    }

    #[test]
    fn page_end_follows_upstream_count() {
        let filtered = Page {
            items: vec![RankedItem::new("a", 1)],
            upstream_len: 2,
        };
        assert!(!filtered.is_short(2));
        assert!(filtered.is_short(3));
        assert_eq!(Page::from(vec![RankedItem::new("a", 1)]).upstream_len, 1);
        assert!(!RankedItem::new("b", 0).is_ranked());
    }

    #[test]
    fn error_kinds() {
        assert_eq!(
            FetchError::RateLimited { retry_after_secs: None }.kind(),
            FailureKind::RateLimited
        );
        assert_eq!(FetchError::ServerError { status: 503 }.kind(), FailureKind::ServerError);
        assert_eq!(FetchError::Transport("reset".into()).kind(), FailureKind::Transport);
        assert_eq!(FetchError::Malformed("{}".into()).kind(), FailureKind::Malformed);
    }
}
