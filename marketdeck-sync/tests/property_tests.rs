//! Property tests for the working set and config merging.
//!
//! Uses proptest to verify:
//! 1. Merged working sets hold each id once, sorted by rank
//! 2. The newest rank for an id always wins
//! 3. Last-write-wins picks remote only when strictly newer

use marketdeck_core::data::{MemoryStore, RankedItem};
use marketdeck_core::ManualClock;
use marketdeck_sync::app_config::Theme;
use marketdeck_sync::{AppConfig, ConfigReplicator, MemoryRemote, MergeOutcome, WorkingSet};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn batch() -> impl Strategy<Value = Vec<RankedItem>> {
    prop::collection::vec((0u8..30, 1u32..500), 0..60).prop_map(|pairs| {
        pairs
            .into_iter()
            .map(|(id, rank)| RankedItem::new(format!("id-{id}"), rank))
            .collect()
    })
}

proptest! {
    #[test]
    fn merge_dedups_and_sorts(batches in prop::collection::vec(batch(), 1..6)) {
        let mut set = WorkingSet::new();
        for b in &batches {
            set = set.merged(b);
        }

        let mut seen = HashSet::new();
        for item in set.items() {
            prop_assert!(seen.insert(item.id.clone()), "{} appears twice", item.id);
        }
        for pair in set.items().windows(2) {
            prop_assert!(pair[0].rank <= pair[1].rank);
        }

        let all_ids: HashSet<String> = batches.iter().flatten().map(|i| i.id.clone()).collect();
        prop_assert_eq!(seen, all_ids);
    }

    #[test]
    fn newest_rank_wins(first in batch(), second in batch()) {
        let set = WorkingSet::new().merged(&first).merged(&second);

        for item in set.items() {
            let expected = second
                .iter()
                .rev()
                .chain(first.iter().rev())
                .find(|i| i.id == item.id)
                .map(|i| i.rank);
            prop_assert_eq!(Some(item.rank), expected);
        }
    }

    #[test]
    fn lww_prefers_remote_only_when_strictly_newer(t1 in 1i64..1_000, t2 in 1i64..1_000) {
        let clock = ManualClock::at_millis(0);
        let mut rep = ConfigReplicator::load(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryRemote::new()),
            Arc::new(clock),
            Duration::from_millis(1500),
        );
        rep.merge(AppConfig { logical_timestamp: t1, theme: Theme::Light, ..AppConfig::default() });

        let outcome = rep.merge(AppConfig { logical_timestamp: t2, theme: Theme::Dark, ..AppConfig::default() });

        if t2 > t1 {
            prop_assert_eq!(outcome, MergeOutcome::AppliedRemote);
            prop_assert_eq!(rep.config().theme, Theme::Dark);
        } else {
            prop_assert_eq!(outcome, MergeOutcome::KeptLocal);
            prop_assert_eq!(rep.config().theme, Theme::Light);
            prop_assert_eq!(rep.config().logical_timestamp, t1);
        }
    }
}
