//! Progressive background loading of windows into the working set.
//!
//! ```text
//!  Bootstrapping ──(window 1 loaded)──► Steady ◄──(resume)── Suspended
//!                                         │                     ▲
//!                                         └──────(suspend)──────┘
//! ```
//!
//! Each [`ProgressiveSyncController::tick`] loads at most one window: window 1
//! while bootstrapping, then the lowest window not yet loaded this session,
//! until the working set holds `max_total_items`. Ticks observed while a load
//! is in flight, while suspended, or after the limit is reached are no-ops.
//!
//! The controller owns no timer. The caller decides when a tick is due.

use crate::working_set::WorkingSet;
use marketdeck_core::data::{LoadSource, WindowLoad, WindowLoader};
use std::collections::BTreeSet;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Bootstrapping,
    Steady,
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    pub max_total_items: u32,
}

/// What a tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// A window was loaded and merged.
    Loaded {
        window_index: u32,
        items: usize,
        source: LoadSource,
    },
    /// A window load is already in flight.
    Busy,
    Suspended,
    /// The working set reached its limit, or the dataset ended.
    Complete,
}

pub struct ProgressiveSyncController {
    config: ControllerConfig,
    phase: SyncPhase,
    /// Phase to return to when a suspension ends.
    resume_to: SyncPhase,
    working_set: WorkingSet,
    loaded: BTreeSet<u32>,
    in_flight: Option<u32>,
    exhausted: bool,
    windows_requested: usize,
}

impl ProgressiveSyncController {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            config,
            phase: SyncPhase::Bootstrapping,
            resume_to: SyncPhase::Bootstrapping,
            working_set: WorkingSet::new(),
            loaded: BTreeSet::new(),
            in_flight: None,
            exhausted: false,
            windows_requested: 0,
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn working_set(&self) -> &WorkingSet {
        &self.working_set
    }

    pub fn loaded_windows(&self) -> &BTreeSet<u32> {
        &self.loaded
    }

    /// Window loads started this session, including on-demand ones.
    pub fn windows_requested(&self) -> usize {
        self.windows_requested
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.exhausted || self.working_set.len() >= self.config.max_total_items as usize
    }

    /// The window the next tick would load.
    pub fn next_window(&self) -> Option<u32> {
        if self.phase == SyncPhase::Bootstrapping {
            return Some(1);
        }
        if self.is_complete() {
            return None;
        }
        (1..).find(|w| !self.loaded.contains(w))
    }

    /// Load the next window, if one is due.
    pub fn tick(&mut self, loader: &mut WindowLoader) -> TickOutcome {
        if self.in_flight.is_some() {
            debug!("tick while a window load is in flight; ignored");
            return TickOutcome::Busy;
        }
        if self.phase == SyncPhase::Suspended {
            return TickOutcome::Suspended;
        }
        let Some(window_index) = self.next_window() else {
            return TickOutcome::Complete;
        };
        self.run_load(window_index, loader)
    }

    /// Load a specific window on demand. Already-loaded windows are not reloaded.
    pub fn load_window(&mut self, window_index: u32, loader: &mut WindowLoader) -> TickOutcome {
        if self.in_flight.is_some() {
            return TickOutcome::Busy;
        }
        if self.loaded.contains(&window_index) {
            return TickOutcome::Complete;
        }
        self.run_load(window_index, loader)
    }

    fn run_load(&mut self, window_index: u32, loader: &mut WindowLoader) -> TickOutcome {
        self.begin(window_index);
        let load = loader.load(window_index);
        self.finish(&load)
    }

    /// Mark a load as in flight. Split from [`Self::finish`] so a caller
    /// driving the load itself still gets at-most-one-in-flight.
    pub fn begin(&mut self, window_index: u32) {
        self.in_flight = Some(window_index);
        self.windows_requested += 1;
    }

    /// Merge a finished load into the working set.
    ///
    /// A window counts as loaded only if its data is complete (live or from
    /// cache). Partial and empty results are merged but the window stays
    /// eligible so a later tick retries it.
    pub fn finish(&mut self, load: &WindowLoad) -> TickOutcome {
        self.in_flight = None;
        let window_index = load.window_index;
        let count = load.items.len();

        if !load.items.is_empty() {
            self.working_set = self.working_set.merged(&load.items);
        }

        let complete = matches!(
            load.source,
            LoadSource::FreshCache | LoadSource::Live | LoadSource::StaleCache
        );
        if complete {
            self.loaded.insert(window_index);
            if load.source == LoadSource::Live && load.reached_end {
                info!(window_index, items = count, "upstream dataset ended");
                self.exhausted = true;
            }
        }

        if self.phase == SyncPhase::Bootstrapping && window_index == 1 {
            info!(items = self.working_set.len(), "bootstrap window loaded; steady");
            self.phase = SyncPhase::Steady;
        } else if self.phase == SyncPhase::Suspended
            && self.resume_to == SyncPhase::Bootstrapping
            && window_index == 1
        {
            self.resume_to = SyncPhase::Steady;
        }

        info!(
            window_index,
            items = count,
            source = ?load.source,
            working_set = self.working_set.len(),
            "window merged"
        );
        TickOutcome::Loaded {
            window_index,
            items: count,
            source: load.source,
        }
    }

    /// Stop scheduling loads. A load already in flight is not aborted.
    pub fn suspend(&mut self) {
        if self.phase != SyncPhase::Suspended {
            info!(from = ?self.phase, "controller suspended");
            self.resume_to = self.phase;
            self.phase = SyncPhase::Suspended;
        }
    }

    pub fn resume(&mut self) {
        if self.phase == SyncPhase::Suspended {
            info!(to = ?self.resume_to, "controller resumed");
            self.phase = self.resume_to;
        }
    }

    /// Replace the working set (e.g. after a hide action).
    pub fn replace_working_set(&mut self, set: WorkingSet) {
        self.working_set = set;
    }
}
