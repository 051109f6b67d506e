//! LRU-with-bypass page cache for chapter index and record pages (spec
//! §4.5).
//!
//! Eviction is an approximate LRU: a linear scan of the slot array for
//! the minimum `last_used` ordinal, acceptable for the hundreds-to-low-
//! thousands of slots real configurations use. `get` never blocks or
//! evicts, so concurrent readers can probe the cache without contending
//! with a zone thread that is filling a slot.

use crate::uds::chapter_index::ChapterIndex;
use crate::uds::record::Record;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Sentinel physical-page value meaning "this slot holds nothing".
const ABSENT: i64 = -1;

/// A decoded page's contents, cached alongside the raw slot metadata so
/// readers can clone an `Arc` without re-parsing bytes off disk.
#[derive(Clone)]
pub enum Decoded {
    /// A chapter index page.
    Index(Arc<ChapterIndex>),
    /// A radix-sorted record page.
    Record(Arc<Vec<Record>>),
}

struct CachedPage {
    physical_page: AtomicI64,
    last_used: AtomicU64,
    busy: std::sync::atomic::AtomicBool,
    decoded: RwLock<Option<Decoded>>,
}

impl CachedPage {
    fn empty() -> Self {
        Self {
            physical_page: AtomicI64::new(ABSENT),
            last_used: AtomicU64::new(0),
            busy: std::sync::atomic::AtomicBool::new(false),
            decoded: RwLock::new(None),
        }
    }
}

/// Fixed-size page cache shared by all zones of one volume.
pub struct PageCache {
    slots: Vec<CachedPage>,
    index: parking_lot::Mutex<Vec<i64>>,
    last_used_counter: AtomicU64,
}

impl PageCache {
    /// Creates a cache with `slot_count` slots addressing up to
    /// `indexable_pages` physical pages.
    pub fn new(slot_count: usize, indexable_pages: usize) -> Self {
        Self {
            slots: (0..slot_count).map(|_| CachedPage::empty()).collect(),
            index: parking_lot::Mutex::new(vec![-1i64; indexable_pages]),
            last_used_counter: AtomicU64::new(0),
        }
    }

    /// Number of resident slots.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Looks up physical page `p`. Never blocks or evicts: if the slot
    /// `index[p]` designates no longer actually holds `p` (a race with a
    /// concurrent `put`/`invalidate`), this simply reports a miss.
    pub fn get(&self, p: u64) -> Option<Decoded> {
        let slot_idx = {
            let index = self.index.lock();
            let entry = *index.get(p as usize)?;
            if entry < 0 {
                return None;
            }
            entry as usize
        };
        let slot = &self.slots[slot_idx];
        if slot.physical_page.load(Ordering::Acquire) != p as i64 {
            return None;
        }
        let decoded = slot.decoded.read().clone();
        if decoded.is_some() {
            self.make_most_recent(slot_idx);
        }
        decoded
    }

    /// Bumps a slot's recency ordinal to the current highest value.
    pub fn make_most_recent(&self, slot_idx: usize) {
        let next = self.last_used_counter.fetch_add(1, Ordering::Relaxed) + 1;
        self.slots[slot_idx].last_used.store(next, Ordering::Relaxed);
    }

    /// Picks a non-busy slot with the minimal `last_used` ordinal (ties
    /// broken toward the lower index), marks it busy, clears its
    /// physical page, and returns its index. The caller must fill it via
    /// [`PageCache::put`].
    pub fn select_victim(&self) -> usize {
        let mut best: Option<(usize, u64)> = None;
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.busy.load(Ordering::Acquire) {
                continue;
            }
            let last_used = slot.last_used.load(Ordering::Relaxed);
            if best.map(|(_, b)| last_used < b).unwrap_or(true) {
                best = Some((i, last_used));
            }
        }
        let victim = best.expect("at least one slot is never permanently busy").0;
        let slot = &self.slots[victim];
        slot.busy.store(true, Ordering::Release);
        let old_page = slot.physical_page.swap(ABSENT, Ordering::AcqRel);
        if old_page >= 0 {
            let mut index = self.index.lock();
            if let Some(entry) = index.get_mut(old_page as usize) {
                if *entry == victim as i64 {
                    *entry = -1;
                }
            }
        }
        victim
    }

    /// Installs `decoded` for physical page `p` into `slot_idx` (normally
    /// a slot just returned by [`PageCache::select_victim`]), makes it
    /// most-recent, clears busy, and publishes it in the index.
    pub fn put(&self, p: u64, slot_idx: usize, decoded: Decoded) {
        let slot = &self.slots[slot_idx];
        *slot.decoded.write() = Some(decoded);
        slot.physical_page.store(p as i64, Ordering::Release);
        {
            let mut index = self.index.lock();
            if let Some(entry) = index.get_mut(p as usize) {
                *entry = slot_idx as i64;
            }
        }
        self.make_most_recent(slot_idx);
        slot.busy.store(false, Ordering::Release);
    }

    /// Evicts physical page `p` if resident.
    pub fn invalidate(&self, p: u64) {
        let slot_idx = {
            let mut index = self.index.lock();
            let Some(entry) = index.get_mut(p as usize) else {
                return;
            };
            if *entry < 0 {
                return;
            }
            std::mem::replace(entry, -1)
        };
        let slot = &self.slots[slot_idx as usize];
        if slot.physical_page.load(Ordering::Acquire) == p as i64 {
            slot.physical_page.store(ABSENT, Ordering::Release);
            *slot.decoded.write() = None;
        }
    }

    /// Evicts every physical page belonging to chapter `c` (spec §4.5: a
    /// chapter occupies `pages_per_chapter` consecutive physical pages
    /// starting at `c * pages_per_chapter`), e.g. when the circular
    /// volume is about to overwrite that chapter's slot.
    pub fn invalidate_chapter(&self, c: u64, pages_per_chapter: u64) {
        let start = c * pages_per_chapter;
        for p in start..start + pages_per_chapter {
            self.invalidate(p);
        }
    }

    /// Test/diagnostic helper: resident physical pages ordered most- to
    /// least-recently used.
    #[cfg(test)]
    fn recency_order(&self) -> Vec<u64> {
        let mut resident: Vec<(u64, u64)> = self
            .slots
            .iter()
            .filter_map(|s| {
                let p = s.physical_page.load(Ordering::Acquire);
                if p < 0 {
                    None
                } else {
                    Some((p as u64, s.last_used.load(Ordering::Relaxed)))
                }
            })
            .collect();
        resident.sort_by(|a, b| b.1.cmp(&a.1));
        resident.into_iter().map(|(p, _)| p).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(cache: &PageCache, p: u64) {
        let slot = cache.select_victim();
        cache.put(p, slot, Decoded::Record(Arc::new(Vec::new())));
    }

    #[test]
    fn recency_order_reflects_access_and_eviction() {
        let cache = PageCache::new(5, 16);
        for p in 0..5 {
            fill(&cache, p);
        }
        assert_eq!(cache.recency_order(), vec![4, 3, 2, 1, 0]);

        fill(&cache, 5);
        assert_eq!(cache.recency_order(), vec![5, 4, 3, 2, 1]);
        assert!(cache.get(0).is_none());
    }

    #[test]
    fn get_on_hit_makes_most_recent() {
        let cache = PageCache::new(3, 16);
        for p in 0..3 {
            fill(&cache, p);
        }
        assert_eq!(cache.recency_order(), vec![2, 1, 0]);
        assert!(cache.get(0).is_some());
        assert_eq!(cache.recency_order(), vec![0, 2, 1]);
    }

    #[test]
    fn invalidate_clears_slot_and_index() {
        let cache = PageCache::new(2, 16);
        fill(&cache, 7);
        assert!(cache.get(7).is_some());
        cache.invalidate(7);
        assert!(cache.get(7).is_none());
    }

    #[test]
    fn invalidate_chapter_clears_its_page_range() {
        let cache = PageCache::new(8, 16);
        for p in 4..8 {
            fill(&cache, p);
        }
        cache.invalidate_chapter(1, 4);
        for p in 4..8 {
            assert!(cache.get(p).is_none());
        }
    }

    #[test]
    fn get_on_absent_page_is_none() {
        let cache = PageCache::new(2, 16);
        assert!(cache.get(0).is_none());
    }
}
