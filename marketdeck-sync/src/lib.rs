//! MarketDeck Sync — progressive loading, config replication and the engine.
//!
//! This crate builds on `marketdeck-core` to provide:
//! - The rank-sorted, deduplicated working set
//! - The progressive sync controller (bootstrap, steady ticks, suspension)
//! - User configuration with last-write-wins local/remote replication
//! - View filtering and sorting, chart widget specs
//! - Engine settings (TOML) and the owned `SyncEngine` service

pub mod app_config;
pub mod chart;
pub mod controller;
pub mod engine;
pub mod remote;
pub mod replicator;
pub mod settings;
pub mod view;
pub mod working_set;

pub use app_config::{AppConfig, ConfigError, FavoriteList};
pub use chart::{ChartKind, ChartSpec};
pub use controller::{ControllerConfig, ProgressiveSyncController, SyncPhase, TickOutcome};
pub use engine::{EngineTick, StartReport, SyncEngine};
pub use remote::{MemoryRemote, NoRemote, RemoteConfigStore, RemoteError, RemoteRecord, RestConfigStore};
pub use replicator::{ConfigReplicator, MergeOutcome, PullOutcome, SyncStatus};
pub use settings::{EngineSettings, SettingsError};
pub use view::{SortMode, ViewFilter, ViewQuery};
pub use working_set::WorkingSet;
