//! The VDO half of this crate: the per-slab reference-count engine (spec
//! §3.7, §4.8) that the session layer consults when it needs to know
//! whether a physical block is free, and to record dedup/remap decisions
//! durably.
//!
//! Everything under this module assumes a single allocator thread per
//! slab (spec §4.8.9); cross-thread coordination is the caller's job,
//! using the primitives in [`crate::primitives::concurrency`].

pub mod journal_point;
pub mod pbn_lock;
pub mod ref_counts;
pub mod reference_block;
pub mod slab;
pub mod slab_journal;
pub mod slab_summary;

pub use journal_point::JournalPoint;
pub use pbn_lock::{LockType, PbnLock};
pub use ref_counts::{AdjustOutcome, ReferenceOperation, ReferenceUpdater, RefCounts};
pub use reference_block::{ReferenceBlock, UnpackedReferenceBlock};
pub use slab::{AdminState, ReadOnlyNotifier, Slab};
pub use slab_journal::SlabJournal;
pub use slab_summary::{SlabSummary, SlabSummaryEntry};
