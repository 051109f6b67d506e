//! Slab journal lock accounting (spec §2 "Slab journal & slab summary",
//! §4.8.3).
//!
//! spec.md scopes the full slab journal (tail-block assembly, commit,
//! recovery-journal handoff) as a bridging layer outside the focal core,
//! specified only "at the level needed by the reference counter". What
//! `ref_counts::adjust` actually needs from it is the per-entry lock
//! reference count described in §4.8.3 Rule A:
//!
//! > If `block.is_dirty && block.slab_journal_lock > 0` when another
//! > journaled adjustment commits against it, release the per-entry lock
//! > for the incoming entry (`adjust_slab_journal_block_reference(entry_lock,
//! > -1)`).
//!
//! That is: every journal entry holds one "lock" on the sequence number
//! that recorded it, until the reference block covering its effect is
//! durably written. [`SlabJournal`] tracks how many entries still hold a
//! lock on each sequence number.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Tracks outstanding per-entry locks on slab-journal sequence numbers.
#[derive(Default)]
pub struct SlabJournal {
    locks: Mutex<FxHashMap<u64, i64>>,
}

impl SlabJournal {
    /// Creates an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adjusts the outstanding lock count on `sequence_number` by
    /// `delta`. A `sequence_number` of 0 means "no journal point was
    /// involved" and is a no-op, matching `ref_counts::adjust_for_rebuild`
    /// which records no journal point at all.
    pub fn adjust_block_reference(&self, sequence_number: u64, delta: i64) {
        if sequence_number == 0 {
            return;
        }
        let mut locks = self.locks.lock();
        let count = locks.entry(sequence_number).or_insert(0);
        *count += delta;
        assert!(
            *count >= 0,
            "slab journal lock count for sequence {sequence_number} went negative"
        );
        if *count == 0 {
            locks.remove(&sequence_number);
        }
    }

    /// Outstanding lock count on `sequence_number` (0 if none).
    pub fn lock_count(&self, sequence_number: u64) -> i64 {
        if sequence_number == 0 {
            return 0;
        }
        *self.locks.lock().get(&sequence_number).unwrap_or(&0)
    }

    /// `true` iff any sequence number still holds an outstanding lock.
    pub fn has_outstanding_locks(&self) -> bool {
        !self.locks.lock().is_empty()
    }
}
