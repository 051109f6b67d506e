//! Physical-block-number lock (spec §3.10).
//!
//! Represents a read or provisional-write lock a zone holds on one
//! physical block while an increment/decrement is in flight. The only
//! piece `ref_counts::adjust` cares about is whether the lock carries a
//! provisional reference, and if so, clearing that flag is itself a
//! visible side effect of a successful decrement (spec §4.8.2).

use std::sync::atomic::{AtomicBool, Ordering};

/// Which kind of access the lock grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    /// A read lock: the holder is consulting the block's current state.
    Read,
    /// A provisional-write lock: the holder may be about to allocate this
    /// block.
    ProvisionalWrite,
}

/// A lock a VDO zone holds on one physical block number.
///
/// `has_provisional_reference` is an atomic bool rather than a plain field
/// because stats readers on other threads may observe it (spec §5 "Shared
/// resource policy": refcounts of kobject-like structures use
/// acquire/release atomics).
pub struct PbnLock {
    lock_type: LockType,
    has_provisional_reference: AtomicBool,
}

impl PbnLock {
    /// Creates a fresh lock of the given type, with no provisional
    /// reference assigned yet.
    pub fn new(lock_type: LockType) -> Self {
        Self {
            lock_type,
            has_provisional_reference: AtomicBool::new(false),
        }
    }

    /// The kind of access this lock grants.
    pub fn lock_type(&self) -> LockType {
        self.lock_type
    }

    /// `true` iff a caller holds a read lock for this pbn — the predicate
    /// `adjust`'s decrement transition checks before turning a SINGLE
    /// counter provisional instead of freeing it outright (spec §4.8.2).
    pub fn is_read_lock(&self) -> bool {
        self.lock_type == LockType::Read
    }

    /// `true` iff this lock currently carries a provisional reference.
    pub fn has_provisional_reference(&self) -> bool {
        self.has_provisional_reference.load(Ordering::Acquire)
    }

    /// Assigns a provisional reference to this lock (spec §4.8.4
    /// `provisionally_reference_block`, spec §4.8.2 decrement transitions).
    pub fn assign_provisional_reference(&self) {
        self.has_provisional_reference.store(true, Ordering::Release);
    }

    /// Clears the provisional-reference flag. Called when an increment
    /// commits the provisional allocation (PROVISIONAL -> SINGLE) or when
    /// a provisional decrement frees the block outright.
    pub fn unassign_provisional_reference(&self) -> bool {
        self.has_provisional_reference.swap(false, Ordering::AcqRel)
    }
}
