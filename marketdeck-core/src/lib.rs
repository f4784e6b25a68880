//! MarketDeck Core — acquisition engine for a rank-ordered upstream dataset.
//!
//! This crate contains the fetch-and-cache pipeline:
//! - Ranked item type and the upstream provider trait (CoinGecko implementation)
//! - Window → upstream page planning under a per-request item cap
//! - Bounded-retry requests with kind-specific backoff and a politeness delay
//! - Quota-aware key/value store and a TTL cache with stale-if-error fallback
//! - Window loader combining the above, plus ad-hoc global search
//! - Injectable clock so every delay runs on virtual time in tests

pub mod clock;
pub mod data;
pub mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
