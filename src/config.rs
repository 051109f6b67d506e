//! Configuration types for the UDS index and the VDO slab engine.
//!
//! Mirrors the teacher's `db::config::Config` pattern: plain serializable
//! data with a `Default` impl and a couple of named presets, no behavior.

use serde::{Deserialize, Serialize};

/// Memory-size presets from spec §6. The index geometry (§3, §4.6) is
/// derived from this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemorySize {
    /// 256 MiB index memory footprint.
    Mb256,
    /// 512 MiB index memory footprint.
    Mb512,
    /// 768 MiB index memory footprint.
    Mb768,
    /// N gigabytes of index memory footprint, N >= 1.
    Gb(u32),
}

impl MemorySize {
    /// Returns the nominal memory footprint in bytes used for geometry
    /// derivation.
    pub fn bytes(self) -> u64 {
        match self {
            MemorySize::Mb256 => 256 * 1024 * 1024,
            MemorySize::Mb512 => 512 * 1024 * 1024,
            MemorySize::Mb768 => 768 * 1024 * 1024,
            MemorySize::Gb(n) => (n as u64) * 1024 * 1024 * 1024,
        }
    }
}

impl Default for MemorySize {
    fn default() -> Self {
        MemorySize::Gb(1)
    }
}

/// Parameters supplied to `open_index` at `CREATE` time (spec §6). Saved
/// verbatim in the volume's configuration block so a later
/// `get_index_parameters` call can return them byte-for-byte (§8.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdsParameters {
    /// Index memory footprint, drives chapter geometry.
    pub memory_size: MemorySize,
    /// Whether a sparse (sampled) volume index is used.
    pub sparse: bool,
    /// Human-readable index name, stored in the configuration block.
    pub name: String,
    /// Random nonce distinguishing this index instance from a reused
    /// region that happens to share geometry.
    pub nonce: u64,
    /// Byte offset of the index region within the backing device. Must be
    /// a multiple of 4 KiB when present.
    pub offset: u64,
    /// Size in bytes of the index region. `0` means "whole device".
    pub size: u64,
    /// Overrides the chapter count `Geometry::derive` would otherwise
    /// compute from `memory_size`. `None` in the common case; set by
    /// `convert_to_lvm` when it shrinks a volume by one chapter, so the
    /// reduced geometry survives a later reopen (spec §6 `convert_to_lvm`
    /// "`*params` is updated to the new geometry").
    #[serde(default)]
    pub chapters_per_volume_override: Option<u32>,
}

impl Default for UdsParameters {
    fn default() -> Self {
        Self {
            memory_size: MemorySize::default(),
            sparse: false,
            name: String::new(),
            nonce: 0,
            offset: 0,
            size: 0,
            chapters_per_volume_override: None,
        }
    }
}

/// Admission mode for `open_index` (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Format the region from scratch.
    Create,
    /// Refuse to open unless the prior close was clean.
    NoRebuild,
    /// Rebuild from the volume if the prior close was not clean.
    Load,
}

/// Static configuration of one VDO slab: block range size and the derived
/// reference-counter geometry (spec §3.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VdoSlabConfig {
    /// Number of physical blocks covered by the slab.
    pub block_count: u32,
}

/// Physical block size in bytes (spec §4.8.1: one reference block is
/// exactly one physical block).
pub const VDO_BLOCK_SIZE: u32 = 4096;
/// Number of sectors that make up one reference block (spec §4.8.1).
pub const VDO_SECTORS_PER_BLOCK: u32 = 8;
/// Bytes occupied by one sector's packed `(sequence_number: u64,
/// entry_count: u32)` journal point.
pub const PACKED_JOURNAL_POINT_SIZE: u32 = 8 + 4;
/// Number of 1-byte counters stored in one sector, alongside its packed
/// journal point.
pub const COUNTS_PER_SECTOR: u32 =
    (VDO_BLOCK_SIZE / VDO_SECTORS_PER_BLOCK) - PACKED_JOURNAL_POINT_SIZE;
/// Number of 1-byte reference counters packed into one reference block.
pub const COUNTS_PER_BLOCK: u32 = COUNTS_PER_SECTOR * VDO_SECTORS_PER_BLOCK;
/// Semantic maximum for a shared reference count (spec §3.8).
pub const MAXIMUM_REFERENCE_COUNT: u8 = 254;
/// Sentinel counter value for an allocated-but-uncommitted reference.
pub const PROVISIONAL_REFERENCE_COUNT: u8 = 255;

impl Default for VdoSlabConfig {
    fn default() -> Self {
        Self {
            block_count: COUNTS_PER_BLOCK * VDO_SECTORS_PER_BLOCK,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_per_sector_divides_evenly() {
        assert_eq!(COUNTS_PER_BLOCK % VDO_SECTORS_PER_BLOCK, 0);
        assert_eq!(COUNTS_PER_SECTOR * VDO_SECTORS_PER_BLOCK, COUNTS_PER_BLOCK);
    }

    #[test]
    fn memory_size_bytes_orders_correctly() {
        assert!(MemorySize::Mb256.bytes() < MemorySize::Mb512.bytes());
        assert!(MemorySize::Mb768.bytes() < MemorySize::Gb(1).bytes());
    }
}
