//! Deterministic test doubles shared by this crate's and downstream crates' tests.
//!
//! [`ScriptedProvider`] replays queued responses per upstream page and counts
//! every request, so tests can assert exactly how many network calls a code
//! path made.

use crate::data::provider::{FetchError, MarketProvider, Page, RankedItem};
use std::collections::{HashMap, VecDeque};
use std::ops::RangeInclusive;
use std::sync::Mutex;

type Scripted<T> = VecDeque<Result<T, FetchError>>;

#[derive(Default)]
struct Script {
    pages: HashMap<u32, Scripted<Page>>,
    searches: Scripted<Vec<String>>,
    details: Scripted<Vec<RankedItem>>,
    page_requests: HashMap<u32, usize>,
    search_requests: usize,
    detail_requests: Vec<Vec<String>>,
    dataset_size: Option<u32>,
    fail_all: Option<FetchError>,
}

/// Scripted upstream. Unscripted pages are served from an optional synthetic
/// dataset (`coin-<rank>` ids), otherwise as empty pages.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<Script>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve unscripted pages from a dataset of `size` items ranked `1..=size`.
    pub fn with_dataset(size: u32) -> Self {
        let provider = Self::default();
        provider.lock().dataset_size = Some(size);
        provider
    }

    /// Queue a response for `page`. Responses are consumed in order.
    pub fn push_page(&self, page: u32, response: Result<Vec<RankedItem>, FetchError>) {
        self.push_raw_page(page, response.map(Page::from));
    }

    /// Queue a page whose upstream entry count may differ from its items.
    pub fn push_raw_page(&self, page: u32, response: Result<Page, FetchError>) {
        self.lock().pages.entry(page).or_default().push_back(response);
    }

    pub fn push_search(&self, response: Result<Vec<String>, FetchError>) {
        self.lock().searches.push_back(response);
    }

    pub fn push_details(&self, response: Result<Vec<RankedItem>, FetchError>) {
        self.lock().details.push_back(response);
    }

    /// Fail every unscripted request with `err` (e.g. to simulate an outage).
    pub fn fail_all(&self, err: Option<FetchError>) {
        self.lock().fail_all = err;
    }

    pub fn page_requests(&self, page: u32) -> usize {
        self.lock().page_requests.get(&page).copied().unwrap_or(0)
    }

    pub fn total_page_requests(&self) -> usize {
        self.lock().page_requests.values().sum()
    }

    pub fn search_requests(&self) -> usize {
        self.lock().search_requests
    }

    /// Id lists passed to `fetch_by_ids`, in call order.
    pub fn detail_requests(&self) -> Vec<Vec<String>> {
        self.lock().detail_requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MarketProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch_page(&self, page: u32, per_page: u32) -> Result<Page, FetchError> {
        let mut script = self.lock();
        *script.page_requests.entry(page).or_default() += 1;
        if let Some(response) = script.pages.get_mut(&page).and_then(VecDeque::pop_front) {
            return response;
        }
        if let Some(err) = &script.fail_all {
            return Err(err.clone());
        }
        match script.dataset_size {
            Some(size) => {
                let first = (page - 1) * per_page + 1;
                let last = (page * per_page).min(size);
                if first > size {
                    Ok(Page::default())
                } else {
                    Ok(Page::from(items(first..=last)))
                }
            }
            None => Ok(Page::default()),
        }
    }

    fn search_ids(&self, _query: &str) -> Result<Vec<String>, FetchError> {
        let mut script = self.lock();
        script.search_requests += 1;
        script.searches.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    fn fetch_by_ids(&self, ids: &[String]) -> Result<Vec<RankedItem>, FetchError> {
        let mut script = self.lock();
        script.detail_requests.push(ids.to_vec());
        script.details.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Items `coin-<rank>` for every rank in `ranks`.
pub fn items(ranks: RangeInclusive<u32>) -> Vec<RankedItem> {
    ranks.map(item).collect()
}

/// A single item `coin-<rank>` at `rank`.
pub fn item(rank: u32) -> RankedItem {
    RankedItem::new(format!("coin-{rank}"), rank)
        .with_symbol(format!("c{rank}"), format!("Coin {rank}"))
}
