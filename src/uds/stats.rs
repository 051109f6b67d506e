//! Index statistics returned by [`crate::uds::session::Session::get_index_stats`]
//! (spec §6 `get_index_stats`, §8.3 scenario 4's `posts_found`/
//! `posts_not_found`).

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-lifetime request counters for one open session. Updated from
/// the pipeline's completion callback; cleared only by closing and
/// reopening the session (these are not persisted across reopens).
#[derive(Default)]
pub struct StatsCounters {
    posts_found: AtomicU64,
    posts_not_found: AtomicU64,
    updates_found: AtomicU64,
    updates_not_found: AtomicU64,
    deletions_found: AtomicU64,
    deletions_not_found: AtomicU64,
    queries_found: AtomicU64,
    queries_not_found: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record(&self, kind: crate::uds::request::RequestKind, found: bool) {
        use crate::uds::request::RequestKind::*;
        let counter = match (kind, found) {
            (Post, true) => &self.posts_found,
            (Post, false) => &self.posts_not_found,
            (Update, true) => &self.updates_found,
            (Update, false) => &self.updates_not_found,
            (Query | QueryNoUpdate, true) => &self.queries_found,
            (Query | QueryNoUpdate, false) => &self.queries_not_found,
            (Delete, true) => &self.deletions_found,
            (Delete, false) => &self.deletions_not_found,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, entries_indexed: u64, chapters_written: u64) -> IndexStats {
        IndexStats {
            entries_indexed,
            chapters_written,
            posts_found: self.posts_found.load(Ordering::Relaxed),
            posts_not_found: self.posts_not_found.load(Ordering::Relaxed),
            updates_found: self.updates_found.load(Ordering::Relaxed),
            updates_not_found: self.updates_not_found.load(Ordering::Relaxed),
            deletions_found: self.deletions_found.load(Ordering::Relaxed),
            deletions_not_found: self.deletions_not_found.load(Ordering::Relaxed),
            queries_found: self.queries_found.load(Ordering::Relaxed),
            queries_not_found: self.queries_not_found.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of one session's request counters plus the
/// volume index's current size, returned by `get_index_stats` (spec §6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    /// Total distinct names currently tracked by the volume index.
    pub entries_indexed: u64,
    /// Chapters closed and written to the volume this session.
    pub chapters_written: u64,
    /// `POST`s that found an existing entry (and therefore failed with
    /// `UDS_DUPLICATE_NAME`).
    pub posts_found: u64,
    /// `POST`s that added a new entry.
    pub posts_not_found: u64,
    /// `UPDATE`s that replaced an existing entry's metadata.
    pub updates_found: u64,
    /// `UPDATE`s that added a new entry.
    pub updates_not_found: u64,
    /// `DELETE`s that removed an existing entry.
    pub deletions_found: u64,
    /// `DELETE`s for a name that was not present.
    pub deletions_not_found: u64,
    /// `QUERY`/`QUERY_NO_UPDATE`s that found an entry.
    pub queries_found: u64,
    /// `QUERY`/`QUERY_NO_UPDATE`s that found nothing.
    pub queries_not_found: u64,
}
