//! Remote config stores: one row per owner (client id), upsert semantics.

use crate::app_config::AppConfig;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote requires authentication: {0}")]
    AuthRequired(String),

    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("malformed remote response: {0}")]
    Malformed(String),
}

/// A config row read back from the remote.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRecord {
    pub owner: String,
    pub config: AppConfig,
}

pub trait RemoteConfigStore: Send + Sync {
    fn name(&self) -> &str;

    /// Read the owner's row. A missing row is `Ok(None)`.
    fn fetch(&self, owner: &str) -> Result<Option<RemoteRecord>, RemoteError>;

    /// Insert or replace the owner's row.
    fn upsert(&self, owner: &str, config: &AppConfig) -> Result<(), RemoteError>;
}

// ── No remote ────────────────────────────────────────────────────────

/// Used when no remote is configured. Every call reports `AuthRequired`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRemote;

impl RemoteConfigStore for NoRemote {
    fn name(&self) -> &str {
        "none"
    }

    fn fetch(&self, _owner: &str) -> Result<Option<RemoteRecord>, RemoteError> {
        Err(RemoteError::AuthRequired("no remote configured".into()))
    }

    fn upsert(&self, _owner: &str, _config: &AppConfig) -> Result<(), RemoteError> {
        Err(RemoteError::AuthRequired("no remote configured".into()))
    }
}

// ── PostgREST ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SettingsRow {
    #[serde(default)]
    settings: Value,
}

/// PostgREST table with columns `client_id` (unique) and `settings` (jsonb).
pub struct RestConfigStore {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: Option<String>,
    table: String,
}

impl RestConfigStore {
    pub fn new(base_url: &str, api_key: Option<String>, table: &str) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("marketdeck/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            table: table.to_string(),
        }
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn key(&self) -> Result<&str, RemoteError> {
        self.api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| RemoteError::AuthRequired("no API key configured".into()))
    }

    fn authorized(
        &self,
        req: reqwest::blocking::RequestBuilder,
    ) -> Result<reqwest::blocking::RequestBuilder, RemoteError> {
        let key = self.key()?;
        Ok(req.header("apikey", key).bearer_auth(key))
    }
}

fn classify(status: reqwest::StatusCode) -> Result<(), RemoteError> {
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(RemoteError::AuthRequired(format!("HTTP {status}")));
    }
    if !status.is_success() {
        return Err(RemoteError::RemoteUnavailable(format!("HTTP {status}")));
    }
    Ok(())
}

impl RemoteConfigStore for RestConfigStore {
    fn name(&self) -> &str {
        "postgrest"
    }

    fn fetch(&self, owner: &str) -> Result<Option<RemoteRecord>, RemoteError> {
        let url = self.table_url();
        debug!(url, owner, "GET remote config");
        let resp = self
            .authorized(self.client.get(&url))?
            .query(&[("client_id", format!("eq.{owner}")), ("select", "settings".into())])
            .send()
            .map_err(|e| RemoteError::RemoteUnavailable(e.to_string()))?;
        classify(resp.status())?;

        let rows: Vec<SettingsRow> = resp
            .json()
            .map_err(|e| RemoteError::Malformed(e.to_string()))?;
        Ok(rows.into_iter().next().map(|row| RemoteRecord {
            owner: owner.to_string(),
            config: AppConfig::from_value(&row.settings),
        }))
    }

    fn upsert(&self, owner: &str, config: &AppConfig) -> Result<(), RemoteError> {
        let url = self.table_url();
        debug!(url, owner, "upsert remote config");
        let body = json!([{ "client_id": owner, "settings": config }]);
        let resp = self
            .authorized(self.client.post(&url))?
            .query(&[("on_conflict", "client_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&body)
            .send()
            .map_err(|e| RemoteError::RemoteUnavailable(e.to_string()))?;
        classify(resp.status())
    }
}

// ── In-memory ────────────────────────────────────────────────────────

/// In-process remote. Rows are kept as JSON so reads go through the same
/// lenient parsing as the real remote.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    rows: Mutex<HashMap<String, Value>>,
    failure: Mutex<Option<RemoteError>>,
    fetches: AtomicUsize,
    upserts: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row directly.
    pub fn put(&self, owner: &str, config: &AppConfig) {
        if let Ok(value) = serde_json::to_value(config) {
            self.lock_rows().insert(owner.to_string(), value);
        }
    }

    pub fn get(&self, owner: &str) -> Option<AppConfig> {
        self.lock_rows().get(owner).map(AppConfig::from_value)
    }

    /// Make every subsequent call fail with `err` (or succeed again with `None`).
    pub fn fail_with(&self, err: Option<RemoteError>) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = err;
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn upserts(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    fn lock_rows(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.rows.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self) -> Result<(), RemoteError> {
        match &*self.failure.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

impl RemoteConfigStore for MemoryRemote {
    fn name(&self) -> &str {
        "memory"
    }

    fn fetch(&self, owner: &str) -> Result<Option<RemoteRecord>, RemoteError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.get(owner).map(|config| RemoteRecord {
            owner: owner.to_string(),
            config,
        }))
    }

    fn upsert(&self, owner: &str, config: &AppConfig) -> Result<(), RemoteError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.put(owner, config);
        Ok(())
    }
}
