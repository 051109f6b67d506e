//! On-disk reference-block layout and runtime dirty-tracking state (spec
//! §3.7, §4.8.1, §4.8.3).
//!
//! A reference block is exactly one physical block (`VDO_BLOCK_SIZE`
//! bytes), divided into `VDO_SECTORS_PER_BLOCK` sectors. Each sector packs
//! one `JournalPoint` followed by `COUNTS_PER_SECTOR` one-byte counters.
//! This is a hand-specified bit-exact format (like the teacher's own
//! fixed-header page packing): it is packed with explicit byte-slice
//! copies, not through `serde`.

use crate::config::{COUNTS_PER_BLOCK, COUNTS_PER_SECTOR, VDO_BLOCK_SIZE, VDO_SECTORS_PER_BLOCK};
use crate::error::{CoreError, Result};
use crate::vdo::journal_point::JournalPoint;
use tracing::warn;

const SECTOR_SIZE: usize = (VDO_BLOCK_SIZE / VDO_SECTORS_PER_BLOCK) as usize;
const JOURNAL_POINT_SIZE: usize = 12;

/// The bytes decoded from one on-disk reference block, plus the derived
/// runtime `slab_journal_point` (spec §4.8.1: "the block's runtime
/// `slab_journal_point` takes the maximum" over sectors when they
/// disagree).
pub struct UnpackedReferenceBlock {
    /// One counter byte per block-local offset, `COUNTS_PER_BLOCK` long.
    pub counters: Vec<u8>,
    /// Maximum of the per-sector commit points.
    pub slab_journal_point: JournalPoint,
    /// `true` if the sectors disagreed on their commit point (a torn
    /// write was detected).
    pub torn: bool,
    /// Index of the sector with the maximal commit point, reported so
    /// callers can log which sector was torn (spec §8.3 scenario 6).
    pub max_sector: usize,
}

/// Packs `counters` (must be exactly `COUNTS_PER_BLOCK` long) and a single
/// shared `slab_journal_point` into one physical block's worth of bytes
/// (spec §4.8.1: "Sector journal points within a block are normally
/// equal").
pub fn pack_reference_block(counters: &[u8], slab_journal_point: JournalPoint) -> Vec<u8> {
    assert_eq!(
        counters.len(),
        COUNTS_PER_BLOCK as usize,
        "reference block must carry exactly COUNTS_PER_BLOCK counters"
    );
    let mut out = vec![0u8; VDO_BLOCK_SIZE as usize];
    for sector in 0..VDO_SECTORS_PER_BLOCK as usize {
        let sector_start = sector * SECTOR_SIZE;
        slab_journal_point.pack(&mut out[sector_start..sector_start + JOURNAL_POINT_SIZE]);
        let counters_start = sector * COUNTS_PER_SECTOR as usize;
        let counters_end = counters_start + COUNTS_PER_SECTOR as usize;
        let dst_start = sector_start + JOURNAL_POINT_SIZE;
        out[dst_start..dst_start + COUNTS_PER_SECTOR as usize]
            .copy_from_slice(&counters[counters_start..counters_end]);
    }
    out
}

/// Unpacks one physical block's bytes into counters plus the derived
/// runtime journal point (spec §4.8.5 "Reading a reference block").
pub fn unpack_reference_block(block: &[u8]) -> Result<UnpackedReferenceBlock> {
    if block.len() != VDO_BLOCK_SIZE as usize {
        return Err(CoreError::CorruptData);
    }
    let mut counters = vec![0u8; COUNTS_PER_BLOCK as usize];
    let mut points = [JournalPoint::ZERO; VDO_SECTORS_PER_BLOCK as usize];
    for sector in 0..VDO_SECTORS_PER_BLOCK as usize {
        let sector_start = sector * SECTOR_SIZE;
        points[sector] =
            JournalPoint::unpack(&block[sector_start..sector_start + JOURNAL_POINT_SIZE]);
        let src_start = sector_start + JOURNAL_POINT_SIZE;
        let counters_start = sector * COUNTS_PER_SECTOR as usize;
        let counters_end = counters_start + COUNTS_PER_SECTOR as usize;
        counters[counters_start..counters_end]
            .copy_from_slice(&block[src_start..src_start + COUNTS_PER_SECTOR as usize]);
    }

    let (max_sector, &max_point) = points
        .iter()
        .enumerate()
        .max_by_key(|(_, p)| **p)
        .expect("VDO_SECTORS_PER_BLOCK is nonzero");
    let torn = points.iter().any(|p| *p != max_point);
    if torn {
        warn!(sector = max_sector, "Torn write detected in sector {max_sector}");
    }

    Ok(UnpackedReferenceBlock {
        counters,
        slab_journal_point: max_point,
        torn,
        max_sector,
    })
}

/// Runtime state for one reference block: its counters plus the
/// bookkeeping spec §4.8.3 describes (dirty tracking and per-entry
/// locks).
pub struct ReferenceBlock {
    /// One counter byte per block-local offset.
    pub counters: Vec<u8>,
    /// Count of non-EMPTY entries in `counters` (spec §3.8 invariant).
    pub allocated_count: u32,
    /// `true` if this block has unwritten changes.
    pub is_dirty: bool,
    /// `true` if a write for this block is currently in flight.
    pub is_writing: bool,
    /// Sequence number of the oldest slab-journal entry whose effect is
    /// uncommitted for this block, or 0 if none (spec §4.8.3).
    pub slab_journal_lock: u64,
    /// Snapshot of `slab_journal_lock` taken when the in-flight write was
    /// launched (spec §4.8.5 step 3).
    pub slab_journal_lock_to_release: u64,
}

impl ReferenceBlock {
    /// Creates an all-free reference block with no dirty/lock state.
    pub fn new_empty() -> Self {
        Self {
            counters: vec![0u8; COUNTS_PER_BLOCK as usize],
            allocated_count: 0,
            is_dirty: false,
            is_writing: false,
            slab_journal_lock: 0,
            slab_journal_lock_to_release: 0,
        }
    }

    /// Recomputes `allocated_count` from `counters` — used right after
    /// loading a block from disk.
    pub fn recount_allocated(&mut self) {
        self.allocated_count = self.counters.iter().filter(|&&c| c != 0).count() as u32;
    }
}
