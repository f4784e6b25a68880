//! Engine settings, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration:
//!
//! ```toml
//! window_size = 500
//! max_total_items = 10000
//! tick_interval_secs = 30
//!
//! [retry]
//! max_attempts = 3
//! politeness_delay_ms = 1500
//!
//! [remote]
//! url = "https://example.supabase.co"
//! api_key = "..."
//! ```

use marketdeck_core::data::{RetryPolicy, UpstreamConfig, WindowConfig, DEFAULT_SEARCH_LIMIT};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("read settings file {path}: {message}")]
    Read { path: String, message: String },

    #[error("parse settings TOML: {0}")]
    Parse(String),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Items per window. Fixed for the life of a session.
    pub window_size: u32,
    /// Upstream per-request item cap.
    pub upstream_page_cap: u32,
    /// The background loader stops once the working set reaches this size.
    pub max_total_items: u32,
    pub tick_interval_secs: u64,
    pub cache_ttl_secs: u64,
    pub debounce_ms: u64,
    pub retry: RetrySettings,
    pub upstream: UpstreamSettings,
    /// Ids excluded from every view unless explicitly restored.
    pub ignored_ids: Vec<String>,
    pub remote: Option<RemoteSettings>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            window_size: 500,
            upstream_page_cap: 250,
            max_total_items: 10_000,
            tick_interval_secs: 30,
            cache_ttl_secs: 300,
            debounce_ms: 1500,
            retry: RetrySettings::default(),
            upstream: UpstreamSettings::default(),
            ignored_ids: Vec::new(),
            remote: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub rate_limit_delay_ms: u64,
    pub server_error_delay_ms: u64,
    pub fixed_delay_ms: u64,
    pub politeness_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self::from(&RetryPolicy::default())
    }
}

impl From<&RetryPolicy> for RetrySettings {
    fn from(p: &RetryPolicy) -> Self {
        Self {
            max_attempts: p.max_attempts,
            rate_limit_delay_ms: p.rate_limit_delay.as_millis() as u64,
            server_error_delay_ms: p.server_error_delay.as_millis() as u64,
            fixed_delay_ms: p.fixed_delay.as_millis() as u64,
            politeness_delay_ms: p.politeness_delay.as_millis() as u64,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            rate_limit_delay: Duration::from_millis(self.rate_limit_delay_ms),
            server_error_delay: Duration::from_millis(self.server_error_delay_ms),
            fixed_delay: Duration::from_millis(self.fixed_delay_ms),
            politeness_delay: Duration::from_millis(self.politeness_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
    pub base_url: String,
    pub vs_currency: String,
    pub order: String,
    pub timeout_secs: u64,
    pub search_limit: usize,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        let upstream = UpstreamConfig::default();
        Self {
            base_url: upstream.base_url,
            vs_currency: upstream.vs_currency,
            order: upstream.order,
            timeout_secs: upstream.timeout_secs,
            search_limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

impl UpstreamSettings {
    pub fn config(&self) -> UpstreamConfig {
        UpstreamConfig {
            base_url: self.base_url.clone(),
            vs_currency: self.vs_currency.clone(),
            order: self.order.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

/// PostgREST-style remote table holding one settings row per client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSettings {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_table")]
    pub table: String,
}

fn default_table() -> String {
    "app_settings".to_string()
}

impl EngineSettings {
    /// Load settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|e| SettingsError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate settings from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let settings: Self =
            toml::from_str(content).map_err(|e| SettingsError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.window_size == 0 {
            return Err(SettingsError::Invalid("window_size must be > 0".into()));
        }
        if self.upstream_page_cap == 0 {
            return Err(SettingsError::Invalid("upstream_page_cap must be > 0".into()));
        }
        if self.max_total_items == 0 {
            return Err(SettingsError::Invalid("max_total_items must be > 0".into()));
        }
        if self.retry.max_attempts < 2 {
            return Err(SettingsError::Invalid(format!(
                "retry.max_attempts must be at least 2, got {}",
                self.retry.max_attempts
            )));
        }
        Ok(())
    }

    pub fn window_config(&self) -> WindowConfig {
        WindowConfig {
            window_size: self.window_size,
            page_cap: self.upstream_page_cap,
            ttl: Duration::from_secs(self.cache_ttl_secs),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
