//! Integration coverage for the per-slab reference-count engine's state
//! machine and invariants (spec §4.8.2, §4.8.4, §8.1, §8.2).

use std::sync::Arc;
use vdo_core::error::CoreError;
use vdo_core::vdo::journal_point::JournalPoint;
use vdo_core::vdo::pbn_lock::{LockType, PbnLock};
use vdo_core::vdo::ref_counts::{ReferenceOperation, ReferenceUpdater, RefCounts};
use vdo_core::vdo::slab_journal::SlabJournal;

fn increment(block_index: u32, lock: Option<Arc<PbnLock>>) -> ReferenceUpdater {
    ReferenceUpdater {
        block_index,
        increment: true,
        operation: ReferenceOperation::DataRemapping,
        lock,
    }
}

fn decrement(block_index: u32, lock: Option<Arc<PbnLock>>) -> ReferenceUpdater {
    ReferenceUpdater {
        block_index,
        increment: false,
        operation: ReferenceOperation::DataRemapping,
        lock,
    }
}

#[test]
fn free_blocks_matches_allocate_and_release_cycle() {
    let mut ref_counts = RefCounts::new(0, 16);
    assert_eq!(ref_counts.free_blocks(), 16);

    let block = ref_counts.allocate_unreferenced_block().unwrap().unwrap();
    assert_eq!(ref_counts.free_blocks(), 15);

    let slab_journal = SlabJournal::new();
    // Allocation leaves the counter PROVISIONAL; a real increment clears
    // the provisional marker without changing the free count again.
    let point = JournalPoint::new(1, 0);
    ref_counts.adjust(&increment(block, None), point, &slab_journal).unwrap();
    assert_eq!(ref_counts.free_blocks(), 15);

    let point = JournalPoint::new(1, 1);
    let outcome = ref_counts.adjust(&decrement(block, None), point, &slab_journal).unwrap();
    assert!(outcome.free_status_changed);
    assert_eq!(ref_counts.free_blocks(), 16);
}

#[test]
fn decrement_of_a_free_counter_is_rejected() {
    let mut ref_counts = RefCounts::new(0, 8);
    let slab_journal = SlabJournal::new();
    let err = ref_counts
        .adjust(&decrement(0, None), JournalPoint::new(1, 0), &slab_journal)
        .unwrap_err();
    assert!(matches!(err, CoreError::RefCountInvalid(_)));
}

#[test]
fn increment_past_the_maximum_reference_count_is_rejected() {
    let mut ref_counts = RefCounts::new(0, 8);
    let slab_journal = SlabJournal::new();
    let mut sequence = 1u64;
    let block = ref_counts.allocate_unreferenced_block().unwrap().unwrap();
    ref_counts
        .adjust(&increment(block, None), JournalPoint::new(sequence, 0), &slab_journal)
        .unwrap();
    sequence += 1;
    // MAXIMUM_REFERENCE_COUNT is 254; the counter is already at 1, so 253
    // more increments reach the ceiling.
    for entry in 0..253u32 {
        ref_counts
            .adjust(&increment(block, None), JournalPoint::new(sequence, entry), &slab_journal)
            .unwrap();
    }
    let err = ref_counts
        .adjust(&increment(block, None), JournalPoint::new(sequence, 253), &slab_journal)
        .unwrap_err();
    assert!(matches!(err, CoreError::RefCountInvalid(_)));
}

#[test]
fn a_read_lock_holder_decrementing_to_zero_becomes_provisional_not_free() {
    let mut ref_counts = RefCounts::new(0, 8);
    let slab_journal = SlabJournal::new();
    let block = ref_counts.allocate_unreferenced_block().unwrap().unwrap();
    ref_counts
        .adjust(&increment(block, None), JournalPoint::new(1, 0), &slab_journal)
        .unwrap();
    assert_eq!(ref_counts.free_blocks(), 7);

    let lock = Arc::new(PbnLock::new(LockType::Read));
    let outcome = ref_counts
        .adjust(&decrement(block, Some(Arc::clone(&lock))), JournalPoint::new(1, 1), &slab_journal)
        .unwrap();
    assert!(!outcome.free_status_changed, "a read-locked decrement to zero stays PROVISIONAL, not FREE");
    assert_eq!(ref_counts.free_blocks(), 7);
    assert!(lock.has_provisional_reference());
}

#[test]
fn allocate_unreferenced_block_exhausts_then_reports_no_space() {
    let mut ref_counts = RefCounts::new(0, 4);
    for _ in 0..4 {
        assert!(ref_counts.allocate_unreferenced_block().unwrap().is_some());
    }
    assert!(ref_counts.allocate_unreferenced_block().unwrap().is_none());
    assert_eq!(ref_counts.free_blocks(), 0);
}
