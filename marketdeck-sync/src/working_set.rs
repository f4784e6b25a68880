//! The session's in-memory working set.
//!
//! A rank-sorted, id-deduplicated union of every window loaded so far. The set
//! is immutable: merging produces a new set behind a fresh `Arc`, so readers
//! holding an older snapshot never observe a half-merged state.

use marketdeck_core::data::RankedItem;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct WorkingSet {
    items: Arc<[RankedItem]>,
}

impl Default for WorkingSet {
    fn default() -> Self {
        Self {
            items: Arc::from(Vec::new()),
        }
    }
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from arbitrary items (deduplicated, last occurrence wins).
    pub fn from_items(items: Vec<RankedItem>) -> Self {
        Self::new().merged(&items)
    }

    pub fn items(&self) -> &[RankedItem] {
        &self.items
    }

    /// Shared handle to the current items.
    pub fn snapshot(&self) -> Arc<[RankedItem]> {
        Arc::clone(&self.items)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&RankedItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn by_rank(&self, rank: u32) -> Option<&RankedItem> {
        self.items
            .binary_search_by_key(&rank, |item| item.rank)
            .ok()
            .map(|idx| &self.items[idx])
    }

    /// Merge `incoming` into a new set.
    ///
    /// Any existing item with the same id is replaced by the incoming one, so
    /// an item re-ranked upstream appears exactly once at its newest rank.
    /// Within `incoming`, the last occurrence of an id wins.
    pub fn merged(&self, incoming: &[RankedItem]) -> WorkingSet {
        let mut by_id: HashMap<&str, &RankedItem> =
            HashMap::with_capacity(self.items.len() + incoming.len());
        for item in self.items.iter().chain(incoming) {
            by_id.insert(item.id.as_str(), item);
        }

        let mut merged: Vec<RankedItem> = by_id.into_values().cloned().collect();
        merged.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.id.cmp(&b.id)));
        WorkingSet {
            items: Arc::from(merged),
        }
    }

    /// A new set without the given ids.
    pub fn without(&self, ids: &HashSet<String>) -> WorkingSet {
        let kept: Vec<RankedItem> = self
            .items
            .iter()
            .filter(|item| !ids.contains(&item.id))
            .cloned()
            .collect();
        WorkingSet {
            items: Arc::from(kept),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketdeck_core::testing::{item, items};

    fn ranks(set: &WorkingSet) -> Vec<u32> {
        set.items().iter().map(|i| i.rank).collect()
    }

    #[test]
    fn merge_replaces_reranked_item() {
        let mut x = item(5);
        x.id = "x".into();
        let set = WorkingSet::from_items(vec![item(1), item(2), x.clone()]);

        let mut x_new = x;
        x_new.rank = 3;
        let merged = set.merged(&[x_new]);

        let xs: Vec<_> = merged.items().iter().filter(|i| i.id == "x").collect();
        assert_eq!(xs.len(), 1);
        assert_eq!(xs[0].rank, 3);
        assert_eq!(ranks(&merged), vec![1, 2, 3]);
    }

    #[test]
    fn merge_does_not_touch_original_snapshot() {
        let set = WorkingSet::from_items(items(1..=3));
        let snapshot = set.snapshot();

        let merged = set.merged(&items(4..=6));

        assert_eq!(snapshot.len(), 3);
        assert_eq!(set.len(), 3);
        assert_eq!(merged.len(), 6);
    }

    #[test]
    fn merge_sorts_out_of_order_windows() {
        let set = WorkingSet::from_items(items(501..=503));
        let merged = set.merged(&items(1..=2));
        assert_eq!(ranks(&merged), vec![1, 2, 501, 502, 503]);
    }

    #[test]
    fn lookup_by_rank_and_id() {
        let set = WorkingSet::from_items(items(1..=10));
        assert_eq!(set.by_rank(7).unwrap().id, "coin-7");
        assert!(set.by_rank(11).is_none());
        assert_eq!(set.get("coin-3").unwrap().rank, 3);
    }

    #[test]
    fn without_removes_hidden_ids() {
        let set = WorkingSet::from_items(items(1..=4));
        let hidden: HashSet<String> = ["coin-2".to_string()].into_iter().collect();
        assert_eq!(ranks(&set.without(&hidden)), vec![1, 3, 4]);
    }
}
