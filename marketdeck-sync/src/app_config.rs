//! User configuration: favorite lists, hidden items, display preferences.
//!
//! The JSON shape is shared with exported files and the remote row, so field
//! names stay camelCase (`favoriteLists`, `hiddenCoins`, `lastUpdated`, ...).
//! Loading is lenient: unknown or malformed fields fall back to defaults, a
//! legacy flat `favorites` array is folded into the general list, and the
//! three permanent lists always exist afterwards.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use thiserror::Error;

pub const LIST_GENERAL: &str = "list_general";
pub const LIST_TO_ATH: &str = "list_to_ath";
pub const LIST_PERFORMANCE: &str = "list_performance";

/// Lists that can never be deleted, in display order.
pub const PERMANENT_LISTS: [(&str, &str); 3] = [
    (LIST_GENERAL, "General"),
    (LIST_TO_ATH, "To Ath"),
    (LIST_PERFORMANCE, "Performance"),
];

pub fn is_permanent(list_id: &str) -> bool {
    PERMANENT_LISTS.iter().any(|(id, _)| *id == list_id)
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("list {0} is permanent and cannot be deleted")]
    PermanentList(String),

    #[error("no list with id {0}")]
    UnknownList(String),

    #[error("list name must not be empty")]
    EmptyListName,

    #[error("grid columns must be 1-4, got {0}")]
    InvalidGridColumns(u8),

    #[error("invalid import: {0}")]
    InvalidImport(String),

    #[error("config serialization failed: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteList {
    pub id: String,
    pub name: String,
    #[serde(rename = "coinIds", default)]
    pub item_ids: Vec<String>,
}

impl FavoriteList {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            item_ids: Vec::new(),
        }
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.item_ids.iter().any(|id| id == item_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Grid,
    Table,
}

/// Chart interval, serialized as the widget's interval code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "15")]
    Min15,
    #[serde(rename = "60")]
    Hour1,
    #[serde(rename = "240")]
    Hour4,
    #[serde(rename = "D")]
    Day,
    #[serde(rename = "W")]
    Week,
    #[default]
    #[serde(rename = "M")]
    Month,
}

impl Timeframe {
    pub fn code(&self) -> &'static str {
        match self {
            Timeframe::Min15 => "15",
            Timeframe::Hour1 => "60",
            Timeframe::Hour4 => "240",
            Timeframe::Day => "D",
            Timeframe::Week => "W",
            Timeframe::Month => "M",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartScale {
    #[default]
    Log,
    Linear,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketType {
    #[default]
    Crypto,
    Stocks,
    Indices,
    Commodities,
    Nyse,
    Nasdaq,
    Eu,
    Hkex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub favorite_lists: Vec<FavoriteList>,
    pub active_list_id: String,
    #[serde(rename = "hiddenCoins")]
    pub hidden_ids: BTreeSet<String>,
    #[serde(rename = "restoredGlobalCoins")]
    pub restored_global_ids: BTreeSet<String>,
    pub grid_columns: u8,
    pub view_mode: ViewMode,
    pub theme: Theme,
    pub show_all_charts: bool,
    pub timeframe: Timeframe,
    pub chart_scale: ChartScale,
    pub market_type: MarketType,
    /// Unix millis of the last local mutation. Decides merge precedence.
    #[serde(rename = "lastUpdated")]
    pub logical_timestamp: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            favorite_lists: PERMANENT_LISTS
                .iter()
                .map(|(id, name)| FavoriteList::new(*id, *name))
                .collect(),
            active_list_id: LIST_GENERAL.to_string(),
            hidden_ids: BTreeSet::new(),
            restored_global_ids: BTreeSet::new(),
            grid_columns: 3,
            view_mode: ViewMode::Grid,
            theme: Theme::Light,
            show_all_charts: false,
            timeframe: Timeframe::Month,
            chart_scale: ChartScale::Log,
            market_type: MarketType::Crypto,
            logical_timestamp: 0,
        }
    }
}

fn field<T: DeserializeOwned>(obj: &Map<String, Value>, key: &str) -> Option<T> {
    obj.get(key)
        .filter(|v| !v.is_null())
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

impl AppConfig {
    /// Build a config from stored or received JSON, filling gaps with defaults.
    ///
    /// A missing `lastUpdated` reads as 0, so any timestamped copy wins a merge
    /// against it.
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::default();
        };
        let defaults = Self::default();

        let mut lists: Vec<FavoriteList> = field(obj, "favoriteLists").unwrap_or_default();
        if !lists.iter().any(|l| l.id == LIST_GENERAL) {
            if let Some(legacy) = field::<Vec<String>>(obj, "favorites") {
                let mut general = FavoriteList::new(LIST_GENERAL, "General");
                general.item_ids = legacy;
                lists.push(general);
            }
        }

        let mut config = Self {
            favorite_lists: lists,
            active_list_id: field(obj, "activeListId").unwrap_or(defaults.active_list_id),
            hidden_ids: field(obj, "hiddenCoins").unwrap_or_default(),
            restored_global_ids: field(obj, "restoredGlobalCoins").unwrap_or_default(),
            grid_columns: field(obj, "gridColumns").unwrap_or(defaults.grid_columns),
            view_mode: field(obj, "viewMode").unwrap_or_default(),
            theme: field(obj, "theme").unwrap_or_default(),
            show_all_charts: field(obj, "showAllCharts").unwrap_or(false),
            timeframe: field(obj, "timeframe").unwrap_or_default(),
            chart_scale: field(obj, "chartScale").unwrap_or_default(),
            market_type: field(obj, "marketType").unwrap_or_default(),
            logical_timestamp: field(obj, "lastUpdated").unwrap_or(0),
        };
        config.normalize();
        config
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ConfigError::Serialization(e.to_string()))?;
        Ok(Self::from_value(&value))
    }

    /// Restore the structural guarantees: permanent lists present (appended
    /// empty if missing), list ids unique, active list resolvable, grid
    /// columns in range.
    pub fn normalize(&mut self) {
        let mut seen = BTreeSet::new();
        self.favorite_lists.retain(|l| seen.insert(l.id.clone()));

        for (id, name) in PERMANENT_LISTS {
            if !self.favorite_lists.iter().any(|l| l.id == id) {
                self.favorite_lists.push(FavoriteList::new(id, name));
            }
        }
        if self.list(&self.active_list_id).is_none() {
            self.active_list_id = LIST_GENERAL.to_string();
        }
        if !(1..=4).contains(&self.grid_columns) {
            self.grid_columns = 3;
        }
    }

    pub fn list(&self, id: &str) -> Option<&FavoriteList> {
        self.favorite_lists.iter().find(|l| l.id == id)
    }

    fn list_mut(&mut self, id: &str) -> Result<&mut FavoriteList, ConfigError> {
        self.favorite_lists
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| ConfigError::UnknownList(id.to_string()))
    }

    pub fn active_list(&self) -> Option<&FavoriteList> {
        self.list(&self.active_list_id)
    }

    // ── Lists ──────────────────────────────────────────────────────

    /// Append a new empty list. Its id derives from the logical timestamp,
    /// which the replicator advances before applying a mutation.
    pub fn create_list(&mut self, name: &str) -> Result<String, ConfigError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::EmptyListName);
        }
        let mut id = self.logical_timestamp.to_string();
        while self.list(&id).is_some() {
            id.push('_');
        }
        self.favorite_lists.push(FavoriteList::new(id.clone(), name));
        Ok(id)
    }

    pub fn delete_list(&mut self, id: &str) -> Result<(), ConfigError> {
        if is_permanent(id) {
            return Err(ConfigError::PermanentList(id.to_string()));
        }
        let before = self.favorite_lists.len();
        self.favorite_lists.retain(|l| l.id != id);
        if self.favorite_lists.len() == before {
            return Err(ConfigError::UnknownList(id.to_string()));
        }
        if self.active_list_id == id {
            self.active_list_id = LIST_GENERAL.to_string();
        }
        Ok(())
    }

    /// Add or remove an item. Returns whether the item is now in the list.
    pub fn toggle_item_in_list(&mut self, list_id: &str, item_id: &str) -> Result<bool, ConfigError> {
        let list = self.list_mut(list_id)?;
        if list.contains(item_id) {
            list.item_ids.retain(|id| id != item_id);
            Ok(false)
        } else {
            list.item_ids.push(item_id.to_string());
            Ok(true)
        }
    }

    pub fn set_active_list(&mut self, id: &str) -> Result<(), ConfigError> {
        if self.list(id).is_none() {
            return Err(ConfigError::UnknownList(id.to_string()));
        }
        self.active_list_id = id.to_string();
        Ok(())
    }

    // ── Hidden and globally ignored items ──────────────────────────

    pub fn hide_item(&mut self, id: &str) {
        self.hidden_ids.insert(id.to_string());
    }

    pub fn unhide_item(&mut self, id: &str) {
        self.hidden_ids.remove(id);
    }

    pub fn clear_hidden(&mut self) {
        self.hidden_ids.clear();
    }

    /// Returns whether the id is now restored.
    pub fn toggle_restored_global(&mut self, id: &str) -> bool {
        if self.restored_global_ids.remove(id) {
            false
        } else {
            self.restored_global_ids.insert(id.to_string());
            true
        }
    }

    // ── Display preferences ────────────────────────────────────────

    pub fn set_grid_columns(&mut self, columns: u8) -> Result<(), ConfigError> {
        if !(1..=4).contains(&columns) {
            return Err(ConfigError::InvalidGridColumns(columns));
        }
        self.grid_columns = columns;
        Ok(())
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.theme = theme;
    }

    pub fn set_timeframe(&mut self, timeframe: Timeframe) {
        self.timeframe = timeframe;
    }

    pub fn set_chart_scale(&mut self, scale: ChartScale) {
        self.chart_scale = scale;
    }

    pub fn set_view_mode(&mut self, mode: ViewMode) {
        self.view_mode = mode;
    }

    pub fn set_show_all_charts(&mut self, show: bool) {
        self.show_all_charts = show;
    }

    pub fn set_market_type(&mut self, market: MarketType) {
        self.market_type = market;
    }

    // ── Import / export ────────────────────────────────────────────

    pub fn export_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialization(e.to_string()))
    }

    /// Overlay an imported payload on this config.
    ///
    /// The payload must carry `favoriteLists` or a legacy `favorites` array.
    /// Fields it carries replace the current ones; everything else is kept.
    /// The logical timestamp is left untouched so the surrounding mutation
    /// decides it.
    pub fn import_json(&mut self, text: &str) -> Result<(), ConfigError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ConfigError::InvalidImport(format!("not JSON: {e}")))?;
        let Value::Object(mut imported) = value else {
            return Err(ConfigError::InvalidImport("expected a JSON object".into()));
        };

        let has_lists = imported.get("favoriteLists").is_some_and(Value::is_array);
        let legacy = imported.get("favorites").is_some_and(Value::is_array);
        if !has_lists && !legacy {
            return Err(ConfigError::InvalidImport(
                "no favoriteLists or favorites found".into(),
            ));
        }
        if legacy && !has_lists {
            if let Some(favorites) = imported.remove("favorites") {
                imported.insert(
                    "favoriteLists".into(),
                    serde_json::json!([{ "id": LIST_GENERAL, "name": "General", "coinIds": favorites }]),
                );
            }
        }

        let timestamp = self.logical_timestamp;
        let Value::Object(mut merged) =
            serde_json::to_value(&*self).map_err(|e| ConfigError::Serialization(e.to_string()))?
        else {
            return Err(ConfigError::Serialization("config is not an object".into()));
        };
        merged.extend(imported);

        *self = Self::from_value(&Value::Object(merged));
        self.logical_timestamp = timestamp;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn list_ids(c: &AppConfig) -> Vec<&str> {
        c.favorite_lists.iter().map(|l| l.id.as_str()).collect()
    }

    #[test]
    fn default_has_permanent_lists() {
        let c = AppConfig::default();
        assert_eq!(list_ids(&c), vec![LIST_GENERAL, LIST_TO_ATH, LIST_PERFORMANCE]);
        assert_eq!(c.active_list_id, LIST_GENERAL);
        assert_eq!(c.grid_columns, 3);
        assert_eq!(c.timeframe, Timeframe::Month);
    }

    #[test]
    fn load_migrates_legacy_favorites() {
        let c = AppConfig::from_value(&json!({ "favorites": ["bitcoin", "ethereum"], "theme": "dark" }));

        assert_eq!(c.list(LIST_GENERAL).unwrap().item_ids, vec!["bitcoin", "ethereum"]);
        assert!(c.list(LIST_TO_ATH).unwrap().item_ids.is_empty());
        assert!(c.list(LIST_PERFORMANCE).unwrap().item_ids.is_empty());
        assert_eq!(c.theme, Theme::Dark);
        assert_eq!(c.logical_timestamp, 0);
    }

    #[test]
    fn load_tolerates_bad_fields() {
        let c = AppConfig::from_value(&json!({
            "activeListId": "gone",
            "gridColumns": 9,
            "timeframe": "fortnight",
            "hiddenCoins": "not-a-list",
            "lastUpdated": 42
        }));
        assert_eq!(c.active_list_id, LIST_GENERAL);
        assert_eq!(c.grid_columns, 3);
        assert_eq!(c.timeframe, Timeframe::Month);
        assert!(c.hidden_ids.is_empty());
        assert_eq!(c.logical_timestamp, 42);
    }

    #[test]
    fn load_restores_missing_permanent_lists() {
        let c = AppConfig::from_value(&json!({
            "favoriteLists": [{ "id": "99", "name": "Mine", "coinIds": ["sol"] }],
            "activeListId": "99"
        }));
        assert_eq!(list_ids(&c), vec!["99", LIST_GENERAL, LIST_TO_ATH, LIST_PERFORMANCE]);
        assert_eq!(c.active_list_id, "99");
    }

    #[test]
    fn json_shape_uses_camel_case() {
        let v = serde_json::to_value(AppConfig::default()).unwrap();
        assert!(v.get("favoriteLists").is_some());
        assert!(v.get("hiddenCoins").is_some());
        assert!(v.get("lastUpdated").is_some());
        assert_eq!(v["timeframe"], "M");
        assert_eq!(v["favoriteLists"][0]["coinIds"], json!([]));
    }

    #[test]
    fn permanent_lists_cannot_be_deleted() {
        let mut c = AppConfig::default();
        for (id, _) in PERMANENT_LISTS {
            assert_eq!(c.delete_list(id), Err(ConfigError::PermanentList(id.into())));
        }
        assert_eq!(c.favorite_lists.len(), 3);
    }

    #[test]
    fn create_toggle_delete_custom_list() {
        let mut c = AppConfig::default();
        c.logical_timestamp = 1_700_000_000_000;

        let id = c.create_list("  Memes ").unwrap();
        assert_eq!(id, "1700000000000");
        assert_eq!(c.list(&id).unwrap().name, "Memes");

        assert!(c.toggle_item_in_list(&id, "doge").unwrap());
        assert!(!c.toggle_item_in_list(&id, "doge").unwrap());
        assert!(c.toggle_item_in_list(&id, "pepe").unwrap());

        c.set_active_list(&id).unwrap();
        c.delete_list(&id).unwrap();
        assert_eq!(c.active_list_id, LIST_GENERAL);
        assert_eq!(c.delete_list(&id), Err(ConfigError::UnknownList(id)));
    }

    #[test]
    fn create_list_rejects_blank_name() {
        let mut c = AppConfig::default();
        assert_eq!(c.create_list("   "), Err(ConfigError::EmptyListName));
    }

    #[test]
    fn hide_and_restore() {
        let mut c = AppConfig::default();
        c.hide_item("a");
        c.hide_item("b");
        c.unhide_item("a");
        assert_eq!(c.hidden_ids.iter().collect::<Vec<_>>(), vec!["b"]);
        c.clear_hidden();
        assert!(c.hidden_ids.is_empty());

        assert!(c.toggle_restored_global("tether"));
        assert!(!c.toggle_restored_global("tether"));
    }

    #[test]
    fn grid_columns_validated() {
        let mut c = AppConfig::default();
        assert_eq!(c.set_grid_columns(0), Err(ConfigError::InvalidGridColumns(0)));
        c.set_grid_columns(4).unwrap();
        assert_eq!(c.grid_columns, 4);
    }

    #[test]
    fn import_legacy_payload_fills_general() {
        let mut c = AppConfig::default();
        c.logical_timestamp = 500;
        c.import_json(r#"{"favorites": ["btc", "eth", "sol"]}"#).unwrap();

        assert_eq!(c.list(LIST_GENERAL).unwrap().item_ids, vec!["btc", "eth", "sol"]);
        assert!(c.list(LIST_TO_ATH).unwrap().item_ids.is_empty());
        assert!(c.list(LIST_PERFORMANCE).unwrap().item_ids.is_empty());
        assert_eq!(c.logical_timestamp, 500);
    }

    #[test]
    fn import_keeps_fields_not_in_payload() {
        let mut c = AppConfig::default();
        c.theme = Theme::Dark;
        c.import_json(r#"{"favoriteLists": [], "gridColumns": 2}"#).unwrap();
        assert_eq!(c.theme, Theme::Dark);
        assert_eq!(c.grid_columns, 2);
        assert_eq!(c.favorite_lists.len(), 3);
    }

    #[test]
    fn import_rejects_unrelated_payload() {
        let mut c = AppConfig::default();
        assert!(matches!(c.import_json(r#"{"theme": "dark"}"#), Err(ConfigError::InvalidImport(_))));
        assert!(matches!(c.import_json("[1,2]"), Err(ConfigError::InvalidImport(_))));
        assert!(matches!(c.import_json("{oops"), Err(ConfigError::InvalidImport(_))));
        assert_eq!(c, AppConfig::default());
    }

    #[test]
    fn export_then_load_preserves_config() {
        let mut c = AppConfig::default();
        c.logical_timestamp = 7;
        c.hide_item("x");
        c.set_market_type(MarketType::Nasdaq);
        let text = c.export_json().unwrap();
        assert_eq!(AppConfig::from_json(&text).unwrap(), c);
    }
}
