//! Filtering and sorting of the working set for display.

use crate::app_config::AppConfig;
use marketdeck_core::data::RankedItem;
use std::cmp::Ordering;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortMode {
    #[default]
    Rank,
    /// 24h price change, largest first.
    Gainers,
    /// Distance from all-time high, deepest drop first.
    AthDrop,
}

#[derive(Debug, Clone, Default)]
pub struct ViewFilter {
    ignored: HashSet<String>,
}

/// What the user is currently looking at.
#[derive(Debug, Clone, Default)]
pub struct ViewQuery<'a> {
    pub text: &'a str,
    pub sort: SortMode,
    pub favorites_only: bool,
    /// Items come from a global search; the text already selected them.
    pub global_search: bool,
}

impl ViewFilter {
    pub fn new(ignored: impl IntoIterator<Item = String>) -> Self {
        Self {
            ignored: ignored.into_iter().collect(),
        }
    }

    pub fn is_ignored(&self, id: &str) -> bool {
        self.ignored.contains(id)
    }

    /// Ids visible under `config`'s hidden and restored sets.
    pub fn is_visible(&self, item: &RankedItem, config: &AppConfig) -> bool {
        if config.hidden_ids.contains(&item.id) {
            return false;
        }
        !self.is_ignored(&item.id) || config.restored_global_ids.contains(&item.id)
    }

    pub fn apply(&self, items: &[RankedItem], config: &AppConfig, query: &ViewQuery<'_>) -> Vec<RankedItem> {
        let text = query.text.trim().to_lowercase();
        let rank_query = text.parse::<u32>().ok();
        let active = config.active_list();

        let mut out: Vec<RankedItem> = items
            .iter()
            .filter(|item| self.is_visible(item, config))
            .filter(|item| match rank_query {
                Some(rank) => item.rank == rank,
                None if text.is_empty() || query.global_search => true,
                None => {
                    item.name.to_lowercase().contains(&text)
                        || item.symbol.to_lowercase().contains(&text)
                }
            })
            .filter(|item| {
                !query.favorites_only || active.is_some_and(|list| list.contains(&item.id))
            })
            .cloned()
            .collect();

        sort_items(&mut out, query.sort);
        out
    }
}

pub fn sort_items(items: &mut [RankedItem], mode: SortMode) {
    match mode {
        SortMode::Rank => items.sort_by_key(|item| item.rank),
        SortMode::Gainers => items.sort_by(|a, b| {
            let a = a.metric("price_change_percentage_24h").unwrap_or(f64::NEG_INFINITY);
            let b = b.metric("price_change_percentage_24h").unwrap_or(f64::NEG_INFINITY);
            b.partial_cmp(&a).unwrap_or(Ordering::Equal)
        }),
        SortMode::AthDrop => items.sort_by(|a, b| {
            let a = a.metric("ath_change_percentage").unwrap_or(0.0);
            let b = b.metric("ath_change_percentage").unwrap_or(0.0);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }),
    }
}
