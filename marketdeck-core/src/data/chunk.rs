//! Window → upstream page planning.
//!
//! A window is a contiguous slice of the rank-ordered dataset, addressed by a
//! 1-based index. The upstream caps each request at `page_cap` items, so a
//! window of `window_size` items needs `ceil(window_size / page_cap)` chunks.
//! Chunk `k` (0-based) of window `w` requests upstream page
//! `(w - 1) * chunks_per_window + k + 1`.

use serde::{Deserialize, Serialize};

/// One upstream request that fulfils part of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// 1-based upstream page number.
    pub page: u32,
    /// Items requested from the upstream for this page.
    pub per_page: u32,
}

/// Number of upstream chunks needed for one window.
pub fn chunks_per_window(window_size: u32, page_cap: u32) -> u32 {
    if window_size == 0 || page_cap == 0 {
        return 0;
    }
    window_size.div_ceil(page_cap)
}

/// Ordered upstream page numbers for a window.
///
/// Empty when any argument is zero. Pages are contiguous and ascending, and
/// distinct windows never share a page.
pub fn plan(window_index: u32, window_size: u32, page_cap: u32) -> Vec<u32> {
    plan_chunks(window_index, window_size, page_cap)
        .into_iter()
        .map(|c| c.page)
        .collect()
}

/// Like [`plan`], with the per-request item count for each chunk.
///
/// Every chunk requests the full `page_cap`: upstream pages are defined by
/// `per_page`, so a smaller final request would shift page boundaries. The
/// window simply ends wherever the upstream stops returning items.
pub fn plan_chunks(window_index: u32, window_size: u32, page_cap: u32) -> Vec<Chunk> {
    let per_window = chunks_per_window(window_size, page_cap);
    if window_index == 0 || per_window == 0 {
        return Vec::new();
    }
    let first = (window_index - 1) * per_window + 1;
    (first..first + per_window)
        .map(|page| Chunk {
            page,
            per_page: page_cap,
        })
        .collect()
}

/// Ranks a window covers: its chunks times the full page cap. Equal to
/// `window_size` only when the size is a multiple of the cap.
pub fn window_span(window_size: u32, page_cap: u32) -> u32 {
    chunks_per_window(window_size, page_cap) * page_cap
}

/// The window whose planned pages hold a given rank, or `None` for rank 0.
pub fn window_for_rank(rank: u32, window_size: u32, page_cap: u32) -> Option<u32> {
    let span = window_span(window_size, page_cap);
    if rank == 0 || span == 0 {
        return None;
    }
    Some((rank - 1) / span + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_chunks_per_window() {
        assert_eq!(plan(1, 500, 250), vec![1, 2]);
        assert_eq!(plan(2, 500, 250), vec![3, 4]);
    }

    #[test]
    fn thousand_item_windows() {
        assert_eq!(plan(1, 1000, 250), vec![1, 2, 3, 4]);
        assert_eq!(plan(2, 1000, 250), vec![5, 6, 7, 8]);
    }

    #[test]
    fn uneven_window_size_rounds_up() {
        assert_eq!(chunks_per_window(600, 250), 3);
        assert_eq!(plan(2, 600, 250), vec![4, 5, 6]);
    }

    #[test]
    fn window_smaller_than_cap() {
        assert_eq!(plan(1, 100, 250), vec![1]);
        assert_eq!(plan(3, 100, 250), vec![3]);
    }

    #[test]
    fn degenerate_inputs_plan_nothing() {
        assert!(plan(0, 500, 250).is_empty());
        assert!(plan(1, 0, 250).is_empty());
        assert!(plan(1, 500, 0).is_empty());
    }

    #[test]
    fn chunks_request_full_cap() {
        let chunks = plan_chunks(1, 300, 250);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.per_page == 250));
    }

    #[test]
    fn rank_to_window() {
        assert_eq!(window_for_rank(0, 500, 250), None);
        assert_eq!(window_for_rank(1, 500, 250), Some(1));
        assert_eq!(window_for_rank(500, 500, 250), Some(1));
        assert_eq!(window_for_rank(501, 500, 250), Some(2));
        assert_eq!(window_for_rank(1500, 1000, 250), Some(2));
    }

    #[test]
    fn uneven_window_rank_follows_planned_pages() {
        // 600 items at a 250 cap plan 3 pages, so each window spans 750 ranks.
        assert_eq!(window_span(600, 250), 750);
        assert_eq!(window_for_rank(750, 600, 250), Some(1));
        assert_eq!(window_for_rank(1400, 600, 250), Some(2));
        assert_eq!(plan(2, 600, 250), vec![4, 5, 6]);
        assert_eq!(window_for_rank(100, 100, 250), Some(1));
        assert_eq!(window_for_rank(251, 100, 250), Some(2));
    }
}
