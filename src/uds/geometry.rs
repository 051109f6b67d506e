//! Chapter geometry derivation from a memory-size parameter and a sparse
//! flag (spec §2 "UDS configuration & geometry").
//!
//! The distilled spec leaves the exact numeric derivation unspecified
//! (it is not part of the on-disk bit-exact contract — only the
//! reference-block layout in §4.8.1 is called out as bit-exact). The
//! constants below are a documented, internally-consistent choice;
//! recorded as an Open Question resolution in DESIGN.md.

use crate::config::{MemorySize, UdsParameters};

/// Fixed physical page size chapters are laid out in (matches
/// `VDO_BLOCK_SIZE`, since both the UDS volume and the VDO slab region
/// share the same underlying block device).
pub const BYTES_PER_PAGE: u32 = 4096;
/// On-disk size of one record: a 16-byte name plus 16 bytes of opaque
/// metadata (spec §3.2).
pub const BYTES_PER_RECORD: u32 = 32;
/// Records held per (radix-sorted) record page.
pub const RECORDS_PER_PAGE: u32 = BYTES_PER_PAGE / BYTES_PER_RECORD;
/// Record pages written per chapter.
pub const RECORD_PAGES_PER_CHAPTER: u32 = 64;
/// A delta-compressed index page is assumed to pack roughly 16x as many
/// entries as a raw record page (delta-encoded offsets plus truncated
/// name bits, vs. a full 32-byte record).
const INDEX_PAGE_DENSITY_FACTOR: u32 = 16;
/// Approximate on-disk bytes the volume index's in-RAM entry for one
/// record costs to keep addressable at the configured memory size. This
/// is the single knob memory_size actually controls: how many chapters'
/// worth of records a volume index of that size can track.
const BYTES_PER_VOLUME_INDEX_ENTRY: u64 = 6;
/// Default ratio of dense to sparse chapters when `sparse` is set
/// (one sparse chapter per this many dense ones).
const DENSE_CHAPTERS_PER_SPARSE: u32 = 10;

/// Derived chapter geometry for one UDS index instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Records held per record page.
    pub records_per_page: u32,
    /// Record pages per chapter.
    pub record_pages_per_chapter: u32,
    /// Index pages per chapter.
    pub index_pages_per_chapter: u32,
    /// Records held per chapter (`records_per_page *
    /// record_pages_per_chapter`).
    pub records_per_chapter: u32,
    /// Total chapter slots on the circular volume.
    pub chapters_per_volume: u32,
    /// Of `chapters_per_volume`, how many are sparse (0 if not a sparse
    /// index).
    pub sparse_chapters_per_volume: u32,
    /// Whether this geometry belongs to a sparse index.
    pub sparse: bool,
}

impl Geometry {
    /// Derives a geometry from `memory_size` and `sparse` (spec §6
    /// Parameters).
    pub fn derive(memory_size: MemorySize, sparse: bool) -> Self {
        let records_per_chapter = RECORDS_PER_PAGE * RECORD_PAGES_PER_CHAPTER;
        let index_records_per_page = RECORDS_PER_PAGE * INDEX_PAGE_DENSITY_FACTOR;
        let index_pages_per_chapter =
            records_per_chapter.div_ceil(index_records_per_page).max(1);

        let total_addressable_records = memory_size.bytes() / BYTES_PER_VOLUME_INDEX_ENTRY;
        let chapters_per_volume = (total_addressable_records / records_per_chapter as u64)
            .max(2) as u32;
        let sparse_chapters_per_volume = if sparse {
            (chapters_per_volume / (DENSE_CHAPTERS_PER_SPARSE + 1)).max(1)
        } else {
            0
        };

        Self {
            records_per_page: RECORDS_PER_PAGE,
            record_pages_per_chapter: RECORD_PAGES_PER_CHAPTER,
            index_pages_per_chapter,
            records_per_chapter,
            chapters_per_volume,
            sparse_chapters_per_volume,
            sparse,
        }
    }

    /// Like [`Geometry::derive`], but honors
    /// `params.chapters_per_volume_override` when set, so a volume
    /// shrunk by `convert_to_lvm` re-derives the same reduced chapter
    /// count on every subsequent open rather than the original one
    /// `memory_size` alone would produce.
    pub fn derive_for(params: &UdsParameters) -> Self {
        let mut geometry = Self::derive(params.memory_size, params.sparse);
        if let Some(chapters_per_volume) = params.chapters_per_volume_override {
            geometry.chapters_per_volume = chapters_per_volume;
            geometry.sparse_chapters_per_volume = if geometry.sparse {
                (chapters_per_volume / (DENSE_CHAPTERS_PER_SPARSE + 1)).max(1)
            } else {
                0
            };
        }
        geometry
    }

    /// Pages occupied by one chapter (index pages followed by record
    /// pages, spec §3.3).
    pub fn pages_per_chapter(&self) -> u32 {
        self.index_pages_per_chapter + self.record_pages_per_chapter
    }

    /// Bytes occupied by one chapter.
    pub fn bytes_per_chapter(&self) -> u64 {
        self.pages_per_chapter() as u64 * BYTES_PER_PAGE as u64
    }

    /// Physical slot a virtual chapter number currently occupies (spec
    /// §3.3: "physical slot is `virtual mod chapters_per_volume`").
    pub fn physical_slot(&self, virtual_chapter: u64) -> u32 {
        (virtual_chapter % self.chapters_per_volume as u64) as u32
    }

    /// `true` iff the physical slot `physical_slot` is a sparse-chapter
    /// slot (spec §6: "sparse chapters exist at every `sparse_chapters`-th
    /// slot").
    pub fn is_sparse_slot(&self, physical_slot: u32) -> bool {
        self.sparse
            && self.sparse_chapters_per_volume > 0
            && physical_slot % (DENSE_CHAPTERS_PER_SPARSE + 1) == DENSE_CHAPTERS_PER_SPARSE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn larger_memory_size_yields_more_chapters() {
        let small = Geometry::derive(MemorySize::Mb256, false);
        let large = Geometry::derive(MemorySize::Gb(4), false);
        assert!(large.chapters_per_volume > small.chapters_per_volume);
    }

    #[test]
    fn sparse_geometry_reserves_sparse_chapters() {
        let dense = Geometry::derive(MemorySize::Gb(1), false);
        let sparse = Geometry::derive(MemorySize::Gb(1), true);
        assert_eq!(dense.sparse_chapters_per_volume, 0);
        assert!(sparse.sparse_chapters_per_volume > 0);
    }

    #[test]
    fn records_per_chapter_matches_page_layout() {
        let geometry = Geometry::derive(MemorySize::Mb256, false);
        assert_eq!(
            geometry.records_per_chapter,
            geometry.records_per_page * geometry.record_pages_per_chapter
        );
    }

    #[test]
    fn physical_slot_wraps_on_chapters_per_volume() {
        let geometry = Geometry::derive(MemorySize::Mb256, false);
        let wrapped = geometry.chapters_per_volume as u64 + 3;
        assert_eq!(geometry.physical_slot(wrapped), geometry.physical_slot(3));
    }
}
