//! The sync engine: one owned object holding the window loader, the
//! progressive controller and the config replicator.
//!
//! Nothing here runs on its own. [`SyncEngine::tick`] does whatever is due
//! at the clock's current time (a progressive load, a debounced config push)
//! and [`SyncEngine::run_ticks`] sleeps on the clock between ticks, so tests
//! drive it with a `ManualClock`.

use crate::app_config::{AppConfig, ConfigError};
use crate::chart::{ChartKind, ChartSpec};
use crate::controller::{ControllerConfig, ProgressiveSyncController, SyncPhase, TickOutcome};
use crate::remote::{RemoteConfigStore, RemoteError};
use crate::replicator::{ConfigReplicator, PullOutcome, SyncStatus};
use crate::settings::{EngineSettings, SettingsError};
use crate::view::{ViewFilter, ViewQuery};
use chrono::{DateTime, Utc};
use marketdeck_core::data::{
    search, window_for_rank, KvStore, MarketProvider, PersistentCache, RankedItem, RetryingFetcher,
    SearchError, WindowLoad, WindowLoader,
};
use marketdeck_core::Clock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of [`SyncEngine::start`].
#[derive(Debug, Clone, PartialEq)]
pub struct StartReport {
    pub pull: Result<PullOutcome, RemoteError>,
    pub bootstrap: TickOutcome,
}

/// What one call to [`SyncEngine::tick`] did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineTick {
    /// Set when the progressive timer was due.
    pub sync: Option<TickOutcome>,
    /// Set when a debounced config push fired.
    pub push: Option<Result<(), RemoteError>>,
}

pub struct SyncEngine {
    settings: EngineSettings,
    clock: Arc<dyn Clock>,
    loader: WindowLoader,
    controller: ProgressiveSyncController,
    replicator: ConfigReplicator,
    view: ViewFilter,
    running: bool,
    next_tick_at: Option<DateTime<Utc>>,
}

impl SyncEngine {
    pub fn new(
        settings: EngineSettings,
        provider: Arc<dyn MarketProvider>,
        store: Arc<dyn KvStore>,
        remote: Arc<dyn RemoteConfigStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SettingsError> {
        settings.validate()?;

        let fetcher = RetryingFetcher::new(provider, clock.clone(), settings.retry.policy());
        let cache = PersistentCache::new(store.clone());
        let loader = WindowLoader::new(fetcher, cache, clock.clone(), settings.window_config());
        let controller = ProgressiveSyncController::new(ControllerConfig {
            max_total_items: settings.max_total_items,
        });
        let replicator = ConfigReplicator::load(store, remote, clock.clone(), settings.debounce());
        let view = ViewFilter::new(settings.ignored_ids.iter().cloned());

        Ok(Self {
            settings,
            clock,
            loader,
            controller,
            replicator,
            view,
            running: false,
            next_tick_at: None,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn phase(&self) -> SyncPhase {
        self.controller.phase()
    }

    pub fn controller(&self) -> &ProgressiveSyncController {
        &self.controller
    }

    pub fn cache(&self) -> &PersistentCache {
        self.loader.cache()
    }

    /// Pull the remote config, then load window 1 and arm the progressive timer.
    pub fn start(&mut self) -> StartReport {
        let pull = self.replicator.pull();
        if let Err(e) = &pull {
            warn!(error = %e, "config pull failed; continuing with local config");
        }

        let bootstrap = self.controller.tick(&mut self.loader);
        self.running = true;
        self.next_tick_at = Some(self.after_interval());
        info!(?bootstrap, items = self.controller.working_set().len(), "engine started");

        StartReport { pull, bootstrap }
    }

    /// Run everything due now. A no-op once stopped.
    pub fn tick(&mut self) -> EngineTick {
        if !self.running {
            return EngineTick::default();
        }
        let now = self.clock.now();
        let mut out = EngineTick::default();

        if self.next_tick_at.is_some_and(|at| now >= at) {
            out.sync = Some(self.controller.tick(&mut self.loader));
            self.next_tick_at = Some(self.after_interval());
        }
        out.push = self.replicator.poll();
        out
    }

    /// Sleep until each progressive tick is due and run it, `count` times.
    /// Debounced pushes falling in between are flushed on the way.
    pub fn run_ticks(&mut self, count: usize) -> Vec<TickOutcome> {
        let mut outcomes = Vec::with_capacity(count);
        while self.running && outcomes.len() < count {
            if let Some(wake) = self.next_wakeup() {
                let now = self.clock.now();
                if wake > now {
                    self.clock.sleep((wake - now).to_std().unwrap_or_default());
                }
            }
            if let Some(outcome) = self.tick().sync {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    /// Earliest of the next progressive tick and the pending push deadline.
    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        match (self.next_tick_at, self.replicator.push_due()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Flush a pending config push and stop. Later ticks do nothing.
    pub fn stop(&mut self) -> Option<Result<(), RemoteError>> {
        self.running = false;
        self.next_tick_at = None;
        let flushed = self.replicator.flush();
        info!(status = ?self.replicator.status(), "engine stopped");
        flushed
    }

    fn after_interval(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        chrono::Duration::from_std(self.settings.tick_interval())
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now)
    }

    // ── Data ───────────────────────────────────────────────────────

    pub fn working_set(&self) -> Arc<[RankedItem]> {
        self.controller.working_set().snapshot()
    }

    /// The working set after hidden/ignored filtering, text query and sort.
    pub fn visible_items(&self, query: &ViewQuery<'_>) -> Vec<RankedItem> {
        let config = self.replicator.config();
        self.view
            .apply(self.controller.working_set().items(), &config, query)
    }

    /// Load one window on demand and merge it, returning the load itself.
    pub fn load_window(&mut self, window_index: u32) -> WindowLoad {
        self.controller.begin(window_index);
        let load = self.loader.load(window_index);
        self.controller.finish(&load);
        load
    }

    /// Search the whole upstream dataset. Suspends progressive loading until
    /// [`Self::leave_search`].
    pub fn search(&mut self, query: &str) -> Result<Vec<RankedItem>, SearchError> {
        self.controller.suspend();
        let limit = self.settings.upstream.search_limit;
        search(self.loader.fetcher_mut(), query, limit)
    }

    pub fn leave_search(&mut self) {
        self.controller.resume();
    }

    /// Load the window holding `rank` if needed and return the item there.
    pub fn jump_to_rank(&mut self, rank: u32) -> Option<RankedItem> {
        let window = window_for_rank(
            rank,
            self.settings.window_size,
            self.settings.upstream_page_cap,
        )?;
        self.controller.load_window(window, &mut self.loader);
        self.controller.working_set().by_rank(rank).cloned()
    }

    pub fn chart_spec(&self, id: &str, kind: ChartKind, visible: bool) -> Option<ChartSpec> {
        let item = self.controller.working_set().get(id)?;
        Some(ChartSpec::for_item(item, &self.replicator.config(), kind, visible))
    }

    // ── Config ─────────────────────────────────────────────────────

    pub fn config(&self) -> Arc<AppConfig> {
        self.replicator.config()
    }

    pub fn mutate_config<R>(
        &mut self,
        patch: impl FnOnce(&mut AppConfig) -> Result<R, ConfigError>,
    ) -> Result<R, ConfigError> {
        self.replicator.mutate(patch)
    }

    /// Hide an item: recorded in the config and dropped from the working set.
    pub fn hide_item(&mut self, id: &str) -> Result<(), ConfigError> {
        self.replicator.mutate(|c| {
            c.hide_item(id);
            Ok(())
        })?;
        let hidden: HashSet<String> = [id.to_string()].into_iter().collect();
        let trimmed = self.controller.working_set().without(&hidden);
        self.controller.replace_working_set(trimmed);
        Ok(())
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.replicator.status()
    }

    pub fn client_id(&self) -> &str {
        self.replicator.client_id()
    }

    pub fn pull_config(&mut self) -> Result<PullOutcome, RemoteError> {
        self.replicator.pull()
    }

    pub fn push_config(&mut self) -> Result<(), RemoteError> {
        self.replicator.push_now()
    }
}
