//! Slab journal point (spec §3.9).
//!
//! `(sequence_number, entry_count)` in lexicographic total order: the
//! sequence number dominates, the entry count breaks ties within one
//! journal block. Every reference-block sector and every `ref_counts`
//! array carries one of these marking the most recent journal entry its
//! on-disk state reflects.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A total-ordered marker into the slab journal (spec §3.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct JournalPoint {
    /// Sequence number of the slab-journal block.
    pub sequence_number: u64,
    /// Index of the entry within that block.
    pub entry_count: u32,
}

impl JournalPoint {
    /// The point before any journal entry has been recorded.
    pub const ZERO: JournalPoint = JournalPoint {
        sequence_number: 0,
        entry_count: 0,
    };

    /// Constructs a journal point.
    pub fn new(sequence_number: u64, entry_count: u32) -> Self {
        Self {
            sequence_number,
            entry_count,
        }
    }

    /// `true` iff `self` strictly precedes `other` (spec §3.9: `before(a,
    /// b) iff a < b`).
    pub fn before(&self, other: &JournalPoint) -> bool {
        self < other
    }

    /// Packs this point into its 12-byte on-disk form (spec §4.8.1:
    /// `sequence_number: u64`, `entry_count: u32`, little-endian).
    pub fn pack(&self, dst: &mut [u8]) {
        debug_assert!(dst.len() >= 12, "journal point buffer too small");
        dst[0..8].copy_from_slice(&self.sequence_number.to_le_bytes());
        dst[8..12].copy_from_slice(&self.entry_count.to_le_bytes());
    }

    /// Unpacks a journal point from its 12-byte on-disk form.
    pub fn unpack(src: &[u8]) -> Self {
        debug_assert!(src.len() >= 12, "journal point buffer too small");
        let sequence_number = u64::from_le_bytes(src[0..8].try_into().unwrap());
        let entry_count = u32::from_le_bytes(src[8..12].try_into().unwrap());
        Self {
            sequence_number,
            entry_count,
        }
    }
}

impl fmt::Display for JournalPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.sequence_number, self.entry_count)
    }
}
