//! Last-write-wins replication of [`AppConfig`] between the local store and
//! a remote store.
//!
//! - Every mutation advances the logical timestamp, replaces the in-memory
//!   config with a new copy, persists it locally right away and (re)arms a
//!   single push deadline `debounce` in the future.
//! - [`ConfigReplicator::poll`] pushes once the deadline has passed.
//! - Pulls replace local state only when the remote copy is strictly newer;
//!   on a tie local is kept.
//!
//! Remote failures never block local use. They show up in [`SyncStatus`].

use crate::app_config::{AppConfig, ConfigError};
use crate::remote::{RemoteConfigStore, RemoteError};
use chrono::{DateTime, Utc};
use marketdeck_core::data::KvStore;
use marketdeck_core::Clock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const SETTINGS_KEY: &str = "settings";
pub const CLIENT_ID_KEY: &str = "client_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// No remote reachable with the current credentials.
    Offline,
    /// Local changes not yet pushed.
    Pending,
    Synced,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    AppliedRemote,
    KeptLocal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    Merged(MergeOutcome),
    NoRemoteRecord,
}

/// Get the stored client id, creating and storing one on first use.
pub fn ensure_client_id(store: &dyn KvStore) -> String {
    if let Ok(Some(id)) = store.get(CLIENT_ID_KEY) {
        if !id.trim().is_empty() {
            return id;
        }
    }
    let id = format!("{:032x}", rand::random::<u128>());
    if let Err(e) = store.set(CLIENT_ID_KEY, &id) {
        warn!(error = %e, "could not persist client id; using it for this session only");
    }
    id
}

pub struct ConfigReplicator {
    config: Arc<AppConfig>,
    store: Arc<dyn KvStore>,
    remote: Arc<dyn RemoteConfigStore>,
    clock: Arc<dyn Clock>,
    client_id: String,
    debounce: Duration,
    push_due: Option<DateTime<Utc>>,
    status: SyncStatus,
    last_error: Option<RemoteError>,
}

impl ConfigReplicator {
    /// Load the local config (migrating old shapes) and the client id.
    pub fn load(
        store: Arc<dyn KvStore>,
        remote: Arc<dyn RemoteConfigStore>,
        clock: Arc<dyn Clock>,
        debounce: Duration,
    ) -> Self {
        let config = match store.get(SETTINGS_KEY) {
            Ok(Some(text)) => AppConfig::from_json(&text).unwrap_or_else(|e| {
                warn!(error = %e, "stored config unreadable; using defaults");
                AppConfig::default()
            }),
            Ok(None) => AppConfig::default(),
            Err(e) => {
                warn!(error = %e, "local store unreadable; using default config");
                AppConfig::default()
            }
        };
        let client_id = ensure_client_id(store.as_ref());

        Self {
            config: Arc::new(config),
            store,
            remote,
            clock,
            client_id,
            debounce,
            push_due: None,
            status: SyncStatus::Offline,
            last_error: None,
        }
    }

    /// Current config. Mutations never change a snapshot already handed out.
    pub fn config(&self) -> Arc<AppConfig> {
        Arc::clone(&self.config)
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&RemoteError> {
        self.last_error.as_ref()
    }

    /// When the pending push fires, if one is armed.
    pub fn push_due(&self) -> Option<DateTime<Utc>> {
        self.push_due
    }

    fn deadline(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        chrono::Duration::from_std(self.debounce)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now)
    }

    fn next_timestamp(&self) -> i64 {
        self.clock.now_ms().max(self.config.logical_timestamp + 1)
    }

    /// Apply `patch` to a copy of the config.
    ///
    /// The copy's logical timestamp is advanced before `patch` runs. If the
    /// patch fails, nothing changes.
    pub fn mutate<R>(
        &mut self,
        patch: impl FnOnce(&mut AppConfig) -> Result<R, ConfigError>,
    ) -> Result<R, ConfigError> {
        let mut next = (*self.config).clone();
        next.logical_timestamp = self.next_timestamp();
        let out = patch(&mut next)?;
        next.normalize();

        self.config = Arc::new(next);
        self.persist_local();
        self.push_due = Some(self.deadline());
        self.status = SyncStatus::Pending;
        Ok(out)
    }

    fn persist_local(&self) {
        let text = match serde_json::to_string(self.config.as_ref()) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "config serialization failed; not persisted");
                return;
            }
        };
        if let Err(e) = self.store.set(SETTINGS_KEY, &text) {
            warn!(error = %e, "config not persisted locally");
        }
    }

    /// Fetch the remote row and merge it.
    pub fn pull(&mut self) -> Result<PullOutcome, RemoteError> {
        match self.remote.fetch(&self.client_id) {
            Ok(Some(record)) => Ok(PullOutcome::Merged(self.merge(record.config))),
            Ok(None) => {
                info!(remote = self.remote.name(), "no remote config row");
                self.last_error = None;
                if self.push_due.is_none() {
                    self.status = SyncStatus::Synced;
                }
                Ok(PullOutcome::NoRemoteRecord)
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    /// Last-write-wins merge of `source` into local state.
    pub fn merge(&mut self, source: AppConfig) -> MergeOutcome {
        let local_ts = self.config.logical_timestamp;
        let remote_ts = source.logical_timestamp;
        self.last_error = None;

        if remote_ts > local_ts {
            info!(local_ts, remote_ts, "remote config newer; applied");
            let mut source = source;
            source.normalize();
            self.config = Arc::new(source);
            self.persist_local();
            self.push_due = None;
            self.status = SyncStatus::Synced;
            return MergeOutcome::AppliedRemote;
        }

        if local_ts > remote_ts {
            info!(local_ts, remote_ts, "local config newer; push scheduled");
            if self.push_due.is_none() {
                self.push_due = Some(self.deadline());
            }
            self.status = SyncStatus::Pending;
        } else if self.push_due.is_none() {
            self.status = SyncStatus::Synced;
        }
        MergeOutcome::KeptLocal
    }

    /// Push if the debounce deadline has passed.
    pub fn poll(&mut self) -> Option<Result<(), RemoteError>> {
        let due = self.push_due?;
        if self.clock.now() < due {
            return None;
        }
        Some(self.push_now())
    }

    /// Push a pending change immediately, ignoring the deadline.
    pub fn flush(&mut self) -> Option<Result<(), RemoteError>> {
        self.push_due?;
        Some(self.push_now())
    }

    /// Upsert the current config unconditionally.
    pub fn push_now(&mut self) -> Result<(), RemoteError> {
        self.push_due = None;
        match self.remote.upsert(&self.client_id, &self.config) {
            Ok(()) => {
                info!(
                    remote = self.remote.name(),
                    ts = self.config.logical_timestamp,
                    "config pushed"
                );
                self.last_error = None;
                self.status = SyncStatus::Synced;
                Ok(())
            }
            Err(e) => {
                self.record_failure(&e);
                Err(e)
            }
        }
    }

    fn record_failure(&mut self, e: &RemoteError) {
        self.status = match e {
            RemoteError::AuthRequired(_) => SyncStatus::Offline,
            _ => SyncStatus::Error,
        };
        warn!(error = %e, status = ?self.status, "config replication failed");
        self.last_error = Some(e.clone());
    }
}
