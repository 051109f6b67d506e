//! A slab: admin state machine, drain lifecycle, and read-only failure
//! mode (spec §3.7, §4.8.6, §4.8.7).
//!
//! `Slab` is the arena-style owner the DESIGN NOTES (§9 "Cyclic
//! ownership") call for: it owns its [`RefCounts`] and [`SlabJournal`] by
//! value, and the block range it covers is identified by a plain `origin`
//! offset rather than pointers. Everything here is meant to run on one
//! allocator thread per spec §4.8.9; the only cross-thread-visible state
//! is the read-only flag, which is why it alone is an atomic.

use crate::config::VDO_BLOCK_SIZE;
use crate::error::{CoreError, Result};
use crate::primitives::io::IoFactory;
use crate::vdo::journal_point::JournalPoint;
use crate::vdo::ref_counts::{AdjustOutcome, RefCounts, ReferenceUpdater};
use crate::vdo::slab_journal::SlabJournal;
use crate::vdo::slab_summary::{SlabSummary, SlabSummaryEntry};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, warn};

/// The slab admin-state machine (spec §3.7), extended with the two
/// transient drain reasons spec §4.8.6 names but that aren't steady
/// states a slab otherwise rests in (`SaveForScrubbing`, `Rebuilding`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminState {
    /// Just attached; reference counts have not yet been loaded or built.
    Unrecovered,
    /// A scrub (rebuild-from-journal) of this slab is in progress.
    Scrubbing,
    /// Drain requested while scrubbing, to save once scrubbed.
    SaveForScrubbing,
    /// Drain requested mid-rebuild.
    Rebuilding,
    /// Reference counts have been reconstructed and are consistent.
    Rebuilt,
    /// Normal operation: `adjust`/`allocate` are permitted.
    Open,
    /// Fully drained and idle.
    Closed,
    /// A save (flush dirty blocks to disk) is in progress.
    Saving,
    /// A suspend is in progress.
    Suspending,
    /// Recovery replay is in progress.
    Recovering,
}

/// Callback invoked when a slab's allocator-thread work transitions the
/// owning VDO into read-only mode (spec §4.8.7, §7).
pub trait ReadOnlyNotifier: Send + Sync {
    /// Enters read-only mode; `error` is the triggering failure.
    fn enter_read_only(&self, slab_number: u64, error: &CoreError);
}

/// A contiguous block range of the physical device, owned by one
/// allocator thread (spec §3.7).
pub struct Slab {
    slab_number: u64,
    origin: u64,
    block_count: u32,
    ref_counts: RefCounts,
    slab_journal: SlabJournal,
    admin_state: AdminState,
    read_only: AtomicBool,
    /// Whether this slab's reference counts are known fully built (used
    /// by the `Rebuilding` drain case, spec §4.8.6).
    fully_built: bool,
}

impl Slab {
    /// Creates a slab covering `block_count` physical blocks starting at
    /// `origin`, in the `Unrecovered` state.
    pub fn new(slab_number: u64, origin: u64, block_count: u32) -> Self {
        Self {
            slab_number,
            origin,
            block_count,
            ref_counts: RefCounts::new(slab_number, block_count),
            slab_journal: SlabJournal::new(),
            admin_state: AdminState::Unrecovered,
            read_only: AtomicBool::new(false),
            fully_built: false,
        }
    }

    /// This slab's number within its volume.
    pub fn slab_number(&self) -> u64 {
        self.slab_number
    }

    /// Current admin state.
    pub fn admin_state(&self) -> AdminState {
        self.admin_state
    }

    /// Forces the admin state; used by session/recovery code driving this
    /// slab through its lifecycle.
    pub fn set_admin_state(&mut self, state: AdminState) {
        self.admin_state = state;
    }

    /// `true` iff the owning VDO has entered read-only mode (spec §4.8.7).
    /// A relaxed load matches spec §5: read-only is observed with
    /// acquire/release semantics by other threads, not synchronized
    /// against every ref-count mutation.
    pub fn is_read_only(&self) -> bool {
        self.read_only.load(Ordering::Acquire)
    }

    fn set_read_only(&self) {
        self.read_only.store(true, Ordering::Release);
    }

    /// Read-only access to this slab's reference-count engine.
    pub fn ref_counts(&self) -> &RefCounts {
        &self.ref_counts
    }

    /// Mutable access to this slab's reference-count engine, for callers
    /// (session/session pipeline) that need direct access beyond
    /// `adjust_reference_count`.
    pub fn ref_counts_mut(&mut self) -> &mut RefCounts {
        &mut self.ref_counts
    }

    /// The slab journal's per-entry lock table.
    pub fn slab_journal(&self) -> &SlabJournal {
        &self.slab_journal
    }

    /// Absolute byte offset of reference block `block_index` within the
    /// backing device.
    fn reference_block_offset(&self, block_index: usize) -> u64 {
        (self.origin + block_index as u64) * VDO_BLOCK_SIZE as u64
    }

    /// §4.8.2 `adjust`, gated on admin state (`INVALID_ADMIN_STATE` unless
    /// `Open`) and read-only mode, and wired to the read-only notifier on
    /// a protocol violation (spec §4.8.7, §7).
    pub fn adjust_reference_count(
        &mut self,
        updater: &ReferenceUpdater,
        journal_point: JournalPoint,
        notifier: &dyn ReadOnlyNotifier,
    ) -> Result<AdjustOutcome> {
        if self.is_read_only() {
            return Err(CoreError::VdoReadOnly);
        }
        if self.admin_state != AdminState::Open {
            return Err(CoreError::InvalidAdminState(format!(
                "slab {} is not open (state {:?})",
                self.slab_number, self.admin_state
            )));
        }
        match self.ref_counts.adjust(updater, journal_point, &self.slab_journal) {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                error!(slab = self.slab_number, %err, "reference count adjustment failed");
                self.set_read_only();
                notifier.enter_read_only(self.slab_number, &err);
                Err(err)
            }
        }
    }

    /// §4.8.4 `allocate_unreferenced_block`.
    pub fn allocate_unreferenced_block(&mut self) -> Result<Option<u32>> {
        if self.is_read_only() {
            return Err(CoreError::VdoReadOnly);
        }
        if self.admin_state != AdminState::Open {
            return Err(CoreError::InvalidAdminState(format!(
                "slab {} is not open (state {:?})",
                self.slab_number, self.admin_state
            )));
        }
        self.ref_counts.allocate_unreferenced_block()
    }

    /// Loads every reference block for this slab from disk (spec §4.8.5
    /// "Reading a reference block").
    pub fn load_reference_blocks(&mut self, factory: &IoFactory) -> Result<()> {
        let block_array_len = self.ref_counts.block_array_len();
        for idx in 0..block_array_len {
            let offset = self.reference_block_offset(idx);
            let mut raw = vec![0u8; VDO_BLOCK_SIZE as usize];
            factory.read_at(offset, &mut raw)?;
            self.ref_counts.load_block(idx, &raw)?;
        }
        Ok(())
    }

    /// Writes every currently-dirty reference block (spec §4.8.5
    /// "Writing a reference block"). Synchronous here: per §4.8.9, all of
    /// this runs on the single allocator thread anyway, so a synchronous
    /// pack-flush-write-release sequence observes the same ordering a
    /// pooled-VIO async version would.
    fn flush_dirty_blocks(&mut self, factory: &IoFactory) -> Result<()> {
        let dirty = self.ref_counts.take_dirty_blocks_for_write();
        for (idx, packed, lock_to_release) in dirty {
            let offset = self.reference_block_offset(idx);
            // PREFLUSH: the slab-journal/recovery-journal entries backing
            // this block's counters must be durable first.
            factory.flush()?;
            if let Err(err) = factory.write_at(offset, &packed) {
                return Err(err);
            }
            self.ref_counts.complete_block_write(idx, lock_to_release, &self.slab_journal);
        }
        Ok(())
    }

    /// §4.8.6 "Save": flush every dirty reference block, then update the
    /// slab summary once everything is durable and nothing else is
    /// in-flight.
    fn save(&mut self, factory: &IoFactory, summary: &SlabSummary) -> Result<()> {
        if let Err(err) = self.flush_dirty_blocks(factory) {
            error!(slab = self.slab_number, %err, "reference block write failed");
            self.set_read_only();
            return Err(err);
        }
        if self.ref_counts.is_clean() && !self.slab_journal.has_outstanding_locks() {
            summary.update(
                self.slab_number as usize,
                SlabSummaryEntry {
                    clean: true,
                    load_ref_counts: true,
                    free_blocks: self.ref_counts.free_blocks(),
                    tail_block_offset: self.slab_journal_tail_offset(),
                },
            );
        }
        Ok(())
    }

    fn slab_journal_tail_offset(&self) -> u64 {
        self.ref_counts.slab_journal_point.sequence_number
    }

    /// §4.8.6 drain lifecycle, dispatched on the current admin state.
    /// `on_drained` runs once this slab has reached a known-durable idle
    /// state.
    pub fn drain(
        &mut self,
        factory: &IoFactory,
        summary: &SlabSummary,
        on_drained: impl FnOnce(),
    ) -> Result<()> {
        match self.admin_state {
            AdminState::Recovering | AdminState::Suspending => {
                on_drained();
                Ok(())
            }
            AdminState::Scrubbing => {
                let entry = summary.get(self.slab_number as usize);
                if entry.load_ref_counts {
                    self.load_reference_blocks(factory)?;
                    self.admin_state = AdminState::Rebuilt;
                }
                on_drained();
                Ok(())
            }
            AdminState::SaveForScrubbing => {
                let entry = summary.get(self.slab_number as usize);
                if !entry.clean {
                    self.ref_counts.dirty_all_blocks();
                }
                let result = self.save(factory, summary);
                on_drained();
                result
            }
            AdminState::Rebuilding => {
                if self.fully_built {
                    self.ref_counts.dirty_all_blocks();
                    let result = self.save(factory, summary);
                    on_drained();
                    return result;
                }
                on_drained();
                Ok(())
            }
            AdminState::Saving => {
                if self.admin_state == AdminState::Saving && self.is_rebuilt_enough() {
                    let result = self.save(factory, summary);
                    on_drained();
                    return result;
                }
                on_drained();
                Ok(())
            }
            _ => {
                on_drained();
                Ok(())
            }
        }
    }

    fn is_rebuilt_enough(&self) -> bool {
        // "Saving" drains iff the slab is REBUILT; Open counts too, since
        // a normally-operating slab is a strict superset of rebuilt.
        matches!(self.admin_state, AdminState::Saving) && self.fully_built
    }

    /// Marks this slab's reference counts as fully reconstructed (set by
    /// the scrubber/rebuild path once replay completes).
    pub fn mark_fully_built(&mut self) {
        self.fully_built = true;
    }

    /// §4.8.7: once read-only, pending block writers never issue — this
    /// drains the dirty queue by discarding rather than writing, then
    /// signals drained.
    pub fn discard_dirty_blocks_for_read_only_drain(&mut self) {
        while self.ref_counts.pop_dirty_block().is_some() {}
    }

    /// §4.8.8 `replay_change`, gated by admin state like every other
    /// mutator.
    pub fn replay_change(
        &mut self,
        updater: &ReferenceUpdater,
        entry_point: JournalPoint,
    ) -> Result<Option<AdjustOutcome>> {
        if self.admin_state == AdminState::Closed {
            return Err(CoreError::InvalidAdminState(format!(
                "slab {} is closed",
                self.slab_number
            )));
        }
        match self
            .ref_counts
            .replay_change(updater, entry_point, &self.slab_journal)
        {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                warn!(slab = self.slab_number, %err, "replay rejected an entry");
                Err(err)
            }
        }
    }

    /// Number of physical blocks this slab covers.
    pub fn block_count(&self) -> u32 {
        self.block_count
    }
}
