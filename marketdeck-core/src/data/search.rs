//! Ad-hoc search across the whole upstream dataset.
//!
//! Search bypasses windowing: one free-text request yields candidate ids, then
//! one batch detail lookup resolves the top candidates. Zero matches is a
//! normal, empty result. Only a request that fails after retries is an error,
//! and that error is the one failure surfaced to the user as retryable.

use super::provider::{FetchError, RankedItem};
use super::retry::RetryingFetcher;
use thiserror::Error;
use tracing::info;

/// Candidates resolved per search.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SearchError {
    #[error("search request failed: {0}")]
    SearchFailed(FetchError),

    #[error("detail lookup failed: {0}")]
    LookupFailed(FetchError),
}

/// Search `query` through `fetcher`, resolving at most `limit` candidates.
///
/// Results are sorted by rank, unranked items last.
pub fn search(
    fetcher: &mut RetryingFetcher,
    query: &str,
    limit: usize,
) -> Result<Vec<RankedItem>, SearchError> {
    let query = query.trim();
    if query.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let mut ids = fetcher.search_ids(query).map_err(SearchError::SearchFailed)?;
    ids.truncate(limit);
    if ids.is_empty() {
        info!(query, "search returned no candidates");
        return Ok(Vec::new());
    }

    let mut items = fetcher.fetch_by_ids(&ids).map_err(SearchError::LookupFailed)?;
    items.sort_by_key(|item| (!item.is_ranked(), item.rank));
    info!(query, results = items.len(), "search resolved");
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::data::retry::RetryPolicy;
    use crate::testing::{item, ScriptedProvider};
    use std::sync::Arc;

    fn fetcher(provider: Arc<ScriptedProvider>) -> RetryingFetcher {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_millis(0));
        RetryingFetcher::new(provider, clock, RetryPolicy::default())
    }

    #[test]
    fn empty_query_makes_no_request() {
        let provider = Arc::new(ScriptedProvider::new());
        let mut f = fetcher(provider.clone());

        assert_eq!(search(&mut f, "   ", 10).unwrap(), vec![]);
        assert_eq!(provider.search_requests(), 0);
    }

    #[test]
    fn no_candidates_is_empty_not_error() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_search(Ok(vec![]));
        let mut f = fetcher(provider.clone());

        assert!(search(&mut f, "zzzz", 10).unwrap().is_empty());
        assert!(provider.detail_requests().is_empty());
    }

    #[test]
    fn resolves_top_candidates_sorted_by_rank() {
        let provider = Arc::new(ScriptedProvider::new());
        let ids: Vec<String> = (1..=12).map(|i| format!("coin-{i}")).collect();
        provider.push_search(Ok(ids));
        provider.push_details(Ok(vec![item(40), item(2), item(17)]));
        let mut f = fetcher(provider.clone());

        let results = search(&mut f, "coin", 10).unwrap();

        assert_eq!(
            results.iter().map(|i| i.rank).collect::<Vec<_>>(),
            vec![2, 17, 40]
        );
        let requested = provider.detail_requests();
        assert_eq!(requested.len(), 1);
        assert_eq!(requested[0].len(), 10);
    }

    #[test]
    fn unranked_results_are_kept_after_ranked_ones() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_search(Ok(vec!["coin-9".into(), "fresh".into()]));
        provider.push_details(Ok(vec![RankedItem::new("fresh", 0), item(9)]));
        let mut f = fetcher(provider);

        let results = search(&mut f, "coin", 10).unwrap();

        let ids: Vec<&str> = results.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["coin-9", "fresh"]);
    }

    #[test]
    fn failed_request_is_an_error() {
        let provider = Arc::new(ScriptedProvider::new());
        for _ in 0..3 {
            provider.push_search(Err(FetchError::Transport("dns".into())));
        }
        let mut f = fetcher(provider.clone());

        let err = search(&mut f, "eth", 10).unwrap_err();
        assert!(matches!(err, SearchError::SearchFailed(FetchError::Transport(_))));
        assert_eq!(provider.search_requests(), 3);
    }
}
