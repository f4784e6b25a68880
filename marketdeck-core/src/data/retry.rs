//! Bounded-retry upstream requests.
//!
//! One call to [`RetryingFetcher::fetch_page`] drives a small state machine:
//!
//! ```text
//! Idle → Requesting(1) → Succeeded(1)
//!                      ↘ BackingOff(1) → Requesting(2) → … → Failed(n)
//! ```
//!
//! Backoff depends on the failure kind: rate limits wait
//! `rate_limit_delay * attempt`, server errors wait `server_error_delay * attempt`,
//! transport and malformed responses wait a fixed delay. After every success the
//! fetcher cools down for `politeness_delay` before it issues its next request,
//! which bounds the steady-state request rate regardless of retries.

use super::provider::{FailureKind, FetchError, MarketProvider, Page, RankedItem};
use crate::clock::Clock;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Retry and pacing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per request, including the first (at least 2).
    pub max_attempts: u32,
    pub rate_limit_delay: Duration,
    pub server_error_delay: Duration,
    /// Delay after transport failures and malformed responses.
    pub fixed_delay: Duration,
    pub politeness_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            rate_limit_delay: Duration::from_millis(2000),
            server_error_delay: Duration::from_millis(1000),
            fixed_delay: Duration::from_millis(3000),
            politeness_delay: Duration::from_millis(1500),
        }
    }
}

impl RetryPolicy {
    /// Wait before the attempt following failed attempt number `attempt` (1-based).
    pub fn backoff(&self, kind: FailureKind, attempt: u32) -> Duration {
        match kind {
            FailureKind::RateLimited => self.rate_limit_delay * attempt,
            FailureKind::ServerError => self.server_error_delay * attempt,
            FailureKind::Transport | FailureKind::Malformed => self.fixed_delay,
        }
    }
}

/// Request lifecycle of a single fetch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    Requesting { attempt: u32 },
    BackingOff {
        attempt: u32,
        kind: FailureKind,
        delay: Duration,
    },
    Succeeded { attempt: u32 },
    Failed { attempt: u32, kind: FailureKind },
}

/// Performs upstream requests under a [`RetryPolicy`].
///
/// Requests are strictly sequential: one fetcher serves one window at a time.
pub struct RetryingFetcher {
    provider: Arc<dyn MarketProvider>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    state: FetchState,
    trace: Vec<FetchState>,
    cooldown_until: Option<DateTime<Utc>>,
}

impl RetryingFetcher {
    pub fn new(provider: Arc<dyn MarketProvider>, clock: Arc<dyn Clock>, policy: RetryPolicy) -> Self {
        Self {
            provider,
            clock,
            policy,
            state: FetchState::Idle,
            trace: Vec::new(),
            cooldown_until: None,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn provider(&self) -> &Arc<dyn MarketProvider> {
        &self.provider
    }

    /// Current (or terminal) state of the most recent call.
    pub fn state(&self) -> &FetchState {
        &self.state
    }

    /// States visited by the most recent call, in order.
    pub fn trace(&self) -> &[FetchState] {
        &self.trace
    }

    /// Fetch one upstream page with retries.
    pub fn fetch_page(&mut self, page: u32, per_page: u32) -> Result<Page, FetchError> {
        let provider = Arc::clone(&self.provider);
        self.execute(&format!("page {page}"), || provider.fetch_page(page, per_page))
    }

    /// Run the free-text search request with retries.
    pub fn search_ids(&mut self, query: &str) -> Result<Vec<String>, FetchError> {
        let provider = Arc::clone(&self.provider);
        self.execute("search", || provider.search_ids(query))
    }

    /// Run the batch detail lookup with retries.
    pub fn fetch_by_ids(&mut self, ids: &[String]) -> Result<Vec<RankedItem>, FetchError> {
        let provider = Arc::clone(&self.provider);
        self.execute("detail lookup", || provider.fetch_by_ids(ids))
    }

    /// Run `request` until it succeeds or attempts are exhausted.
    pub fn execute<T>(
        &mut self,
        label: &str,
        mut request: impl FnMut() -> Result<T, FetchError>,
    ) -> Result<T, FetchError> {
        self.trace.clear();
        self.transition(FetchState::Idle);
        self.wait_for_cooldown();

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            self.transition(FetchState::Requesting { attempt });
            debug!(label, attempt, provider = self.provider.name(), "upstream request");

            match request() {
                Ok(value) => {
                    self.transition(FetchState::Succeeded { attempt });
                    self.cooldown_until =
                        Some(self.clock.now() + to_chrono(self.policy.politeness_delay));
                    return Ok(value);
                }
                Err(err) => {
                    let kind = err.kind();
                    if attempt >= max_attempts {
                        error!(label, attempt, %err, "giving up after final attempt");
                        self.transition(FetchState::Failed { attempt, kind });
                        return Err(err);
                    }
                    let delay = self.policy.backoff(kind, attempt);
                    if let FetchError::RateLimited {
                        retry_after_secs: Some(secs),
                    } = &err
                    {
                        debug!(label, retry_after_secs = secs, "upstream sent retry-after");
                    }
                    warn!(label, attempt, %err, delay_ms = delay.as_millis() as u64, "attempt failed, backing off");
                    self.transition(FetchState::BackingOff {
                        attempt,
                        kind,
                        delay,
                    });
                    self.clock.sleep(delay);
                    attempt += 1;
                }
            }
        }
    }

    fn wait_for_cooldown(&mut self) {
        if let Some(until) = self.cooldown_until.take() {
            let now = self.clock.now();
            if until > now {
                if let Ok(wait) = (until - now).to_std() {
                    self.clock.sleep(wait);
                }
            }
        }
    }

    fn transition(&mut self, next: FetchState) {
        self.state = next.clone();
        self.trace.push(next);
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::{items, ScriptedProvider};

    fn fetcher(provider: Arc<ScriptedProvider>, clock: &ManualClock) -> RetryingFetcher {
        RetryingFetcher::new(provider, Arc::new(clock.clone()), RetryPolicy::default())
    }

    fn rate_limited() -> FetchError {
        FetchError::RateLimited {
            retry_after_secs: None,
        }
    }

    #[test]
    fn succeeds_on_third_attempt_after_rate_limits() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_page(1, Err(rate_limited()));
        provider.push_page(1, Err(rate_limited()));
        provider.push_page(1, Ok(items(1..=3)));
        let clock = ManualClock::at_millis(0);
        let mut f = fetcher(provider.clone(), &clock);

        let got = f.fetch_page(1, 250).unwrap();

        assert_eq!(got.items.len(), 3);
        assert_eq!(provider.page_requests(1), 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(2000), Duration::from_millis(4000)]
        );
        assert_eq!(f.state(), &FetchState::Succeeded { attempt: 3 });
    }

    #[test]
    fn rate_limited_on_every_attempt_fails_with_rate_limited() {
        let provider = Arc::new(ScriptedProvider::new());
        for _ in 0..3 {
            provider.push_page(1, Err(rate_limited()));
        }
        let clock = ManualClock::at_millis(0);
        let mut f = fetcher(provider.clone(), &clock);

        let err = f.fetch_page(1, 250).unwrap_err();

        assert_eq!(err.kind(), FailureKind::RateLimited);
        assert_eq!(provider.page_requests(1), 3);
        assert_eq!(
            f.state(),
            &FetchState::Failed {
                attempt: 3,
                kind: FailureKind::RateLimited
            }
        );
    }

    #[test]
    fn server_error_uses_shorter_linear_backoff() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_page(2, Err(FetchError::ServerError { status: 502 }));
        provider.push_page(2, Err(FetchError::ServerError { status: 503 }));
        provider.push_page(2, Ok(items(251..=260)));
        let clock = ManualClock::at_millis(0);
        let mut f = fetcher(provider, &clock);

        f.fetch_page(2, 250).unwrap();

        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(1000), Duration::from_millis(2000)]
        );
    }

    #[test]
    fn transport_and_malformed_use_fixed_delay() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_page(1, Err(FetchError::Transport("reset".into())));
        provider.push_page(1, Err(FetchError::Malformed("not an array".into())));
        provider.push_page(1, Ok(items(1..=1)));
        let clock = ManualClock::at_millis(0);
        let mut f = fetcher(provider, &clock);

        f.fetch_page(1, 250).unwrap();

        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(3000), Duration::from_millis(3000)]
        );
    }

    #[test]
    fn terminal_kind_is_the_last_failure() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_page(1, Err(rate_limited()));
        provider.push_page(1, Err(rate_limited()));
        provider.push_page(1, Err(FetchError::Transport("refused".into())));
        let clock = ManualClock::at_millis(0);
        let mut f = fetcher(provider, &clock);

        let err = f.fetch_page(1, 250).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Transport);
    }

    #[test]
    fn politeness_delay_spaces_consecutive_successes() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_page(1, Ok(items(1..=2)));
        provider.push_page(2, Ok(items(3..=4)));
        let clock = ManualClock::at_millis(0);
        let mut f = fetcher(provider, &clock);

        f.fetch_page(1, 2).unwrap();
        assert!(clock.sleeps().is_empty());
        f.fetch_page(2, 2).unwrap();

        assert_eq!(clock.sleeps(), vec![Duration::from_millis(1500)]);
    }

    #[test]
    fn politeness_delay_already_elapsed_is_not_slept() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_page(1, Ok(items(1..=2)));
        provider.push_page(2, Ok(items(3..=4)));
        let clock = ManualClock::at_millis(0);
        let mut f = fetcher(provider, &clock);

        f.fetch_page(1, 2).unwrap();
        clock.advance(Duration::from_secs(10));
        f.fetch_page(2, 2).unwrap();

        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn trace_follows_state_machine() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_page(1, Err(FetchError::ServerError { status: 500 }));
        provider.push_page(1, Ok(items(1..=1)));
        let clock = ManualClock::at_millis(0);
        let mut f = fetcher(provider, &clock);

        f.fetch_page(1, 250).unwrap();

        assert_eq!(
            f.trace(),
            &[
                FetchState::Idle,
                FetchState::Requesting { attempt: 1 },
                FetchState::BackingOff {
                    attempt: 1,
                    kind: FailureKind::ServerError,
                    delay: Duration::from_millis(1000)
                },
                FetchState::Requesting { attempt: 2 },
                FetchState::Succeeded { attempt: 2 },
            ]
        );
    }
}
