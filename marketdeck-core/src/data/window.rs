//! Window loading with cache-first, stale-if-error resolution.
//!
//! Given a window index, the loader implements this policy:
//! 1. Fresh cache entry → return it, no network access
//! 2. Otherwise plan the window's upstream chunks and fetch them one at a time
//! 3. Every chunk succeeded → cache the concatenated result and return it
//! 4. A chunk failed terminally → stop requesting further chunks, then
//!    return the stale cache entry if one exists, else the chunks fetched
//!    so far (uncached), else an empty result
//!
//! A short chunk (the upstream returned fewer entries than requested) marks the
//! end of the dataset: the window ends there and counts as complete. Entries the
//! provider filtered out still count toward the page length.
//!
//! `load` never returns an error. The outcome carries where the items came
//! from and the terminal failure kind, if any, so callers can report it.

use super::cache::{window_key, PersistentCache, WriteOutcome};
use super::chunk::plan_chunks;
use super::provider::{FailureKind, FetchError, RankedItem};
use super::retry::RetryingFetcher;
use crate::clock::Clock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Window geometry and cache TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub window_size: u32,
    pub page_cap: u32,
    pub ttl: Duration,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            window_size: 500,
            page_cap: 250,
            ttl: Duration::from_secs(300),
        }
    }
}

/// Where a window's items came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadSource {
    /// Fresh cache hit; no request was made.
    FreshCache,
    /// Every planned chunk was fetched; the result was cached.
    Live,
    /// Live fetch failed; the expired cache entry was returned.
    StaleCache,
    /// Live fetch failed part-way and no cache existed; the fetched prefix was returned.
    Partial,
    /// Nothing fetched and nothing cached.
    Empty,
}

/// Result of loading one window.
#[derive(Debug, Clone)]
pub struct WindowLoad {
    pub window_index: u32,
    pub items: Vec<RankedItem>,
    pub source: LoadSource,
    /// When the returned items were fetched from the upstream.
    pub fetched_at: Option<DateTime<Utc>>,
    /// Terminal failure of the live fetch, if it failed.
    pub failure: Option<FailureKind>,
    /// Set when a live result could not be persisted.
    pub cache_write: Option<WriteOutcome>,
    /// A live fetch hit a short upstream page: no data exists past this window.
    pub reached_end: bool,
}

impl WindowLoad {
    /// Stale, partial or empty: the live fetch failed.
    pub fn is_degraded(&self) -> bool {
        matches!(
            self.source,
            LoadSource::StaleCache | LoadSource::Partial | LoadSource::Empty
        )
    }
}

struct LiveWindow {
    items: Vec<RankedItem>,
    reached_end: bool,
}

struct ChunkFailure {
    fetched: Vec<RankedItem>,
    error: FetchError,
}

/// Loads windows through the cache and the retrying fetcher.
pub struct WindowLoader {
    fetcher: RetryingFetcher,
    cache: PersistentCache,
    clock: Arc<dyn Clock>,
    config: WindowConfig,
}

impl WindowLoader {
    pub fn new(
        fetcher: RetryingFetcher,
        cache: PersistentCache,
        clock: Arc<dyn Clock>,
        config: WindowConfig,
    ) -> Self {
        Self {
            fetcher,
            cache,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    pub fn cache(&self) -> &PersistentCache {
        &self.cache
    }

    pub fn fetcher_mut(&mut self) -> &mut RetryingFetcher {
        &mut self.fetcher
    }

    /// Cache key for a window under this loader's window size.
    pub fn cache_key(&self, window_index: u32) -> String {
        window_key(self.config.window_size, window_index)
    }

    /// Load a window cache-first.
    pub fn load(&mut self, window_index: u32) -> WindowLoad {
        let key = self.cache_key(window_index);
        let cached = self.cache.read(&key);

        if let Some(entry) = &cached {
            if entry.is_fresh(self.config.ttl, self.clock.now()) {
                info!(window_index, items = entry.data.len(), "window served from fresh cache");
                return WindowLoad {
                    window_index,
                    items: entry.data.clone(),
                    source: LoadSource::FreshCache,
                    fetched_at: Some(entry.fetched_at),
                    failure: None,
                    cache_write: None,
                    reached_end: false,
                };
            }
        }

        self.fetch_and_resolve(window_index, &key, cached.map(|e| (e.data, e.fetched_at)))
    }

    /// Load a window from the upstream even if the cache is fresh.
    /// Falls back to the cached entry on failure, like [`Self::load`].
    pub fn refresh(&mut self, window_index: u32) -> WindowLoad {
        let key = self.cache_key(window_index);
        let cached = self.cache.read(&key);
        self.fetch_and_resolve(window_index, &key, cached.map(|e| (e.data, e.fetched_at)))
    }

    fn fetch_and_resolve(
        &mut self,
        window_index: u32,
        key: &str,
        cached: Option<(Vec<RankedItem>, DateTime<Utc>)>,
    ) -> WindowLoad {
        match self.fetch_window(window_index) {
            Ok(LiveWindow { items, reached_end }) => {
                let fetched_at = self.clock.now();
                let outcome = self.cache.write(key, &items, fetched_at);
                info!(window_index, items = items.len(), reached_end, ?outcome, "window fetched live");
                WindowLoad {
                    window_index,
                    items,
                    source: LoadSource::Live,
                    fetched_at: Some(fetched_at),
                    failure: None,
                    cache_write: Some(outcome),
                    reached_end,
                }
            }
            Err(ChunkFailure { fetched, error }) => {
                let failure = Some(error.kind());
                if let Some((data, fetched_at)) = cached {
                    warn!(window_index, %error, "window fetch failed; serving stale cache");
                    return WindowLoad {
                        window_index,
                        items: data,
                        source: LoadSource::StaleCache,
                        fetched_at: Some(fetched_at),
                        failure,
                        cache_write: None,
                        reached_end: false,
                    };
                }
                let source = if fetched.is_empty() {
                    LoadSource::Empty
                } else {
                    LoadSource::Partial
                };
                warn!(window_index, %error, items = fetched.len(), ?source, "window fetch failed with no cache");
                WindowLoad {
                    window_index,
                    items: fetched,
                    source,
                    fetched_at: None,
                    failure,
                    cache_write: None,
                    reached_end: false,
                }
            }
        }
    }

    /// Fetch every chunk of a window sequentially.
    fn fetch_window(&mut self, window_index: u32) -> Result<LiveWindow, ChunkFailure> {
        let chunks = plan_chunks(window_index, self.config.window_size, self.config.page_cap);
        let mut fetched = Vec::new();

        for chunk in chunks {
            match self.fetcher.fetch_page(chunk.page, chunk.per_page) {
                Ok(page) => {
                    let short = page.is_short(chunk.per_page);
                    fetched.extend(page.items);
                    if short {
                        return Ok(LiveWindow {
                            items: fetched,
                            reached_end: true,
                        });
                    }
                }
                Err(error) => return Err(ChunkFailure { fetched, error }),
            }
        }

        Ok(LiveWindow {
            items: fetched,
            reached_end: false,
        })
    }
}
