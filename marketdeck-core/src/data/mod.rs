//! Data acquisition: upstream provider, chunk planning, retrying fetch,
//! local store, persistent cache, window loading and search.

pub mod cache;
pub mod chunk;
pub mod coingecko;
pub mod provider;
pub mod retry;
pub mod search;
pub mod store;
pub mod window;

pub use cache::{CacheEntry, CacheStatus, PersistentCache, WriteOutcome};
pub use chunk::{plan, plan_chunks, window_for_rank, window_span, Chunk};
pub use coingecko::{CoinGeckoProvider, UpstreamConfig};
pub use provider::{FailureKind, FetchError, MarketProvider, Page, RankedItem};
pub use retry::{FetchState, RetryPolicy, RetryingFetcher};
pub use search::{search, SearchError, DEFAULT_SEARCH_LIMIT};
pub use store::{FileStore, KvStore, MemoryStore, StoreError};
pub use window::{LoadSource, WindowConfig, WindowLoad, WindowLoader};
