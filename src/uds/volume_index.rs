//! The volume index: a sharded, in-memory map from record name to the
//! virtual chapter last known to hold it (spec §3.5, §4.6).
//!
//! Sharded into zones the same way the request pipeline is (one zone per
//! worker thread, spec §4.7), so each zone's map can be mutated without a
//! cross-zone lock on the hot path. A sparse index additionally tracks
//! "hooks": a sampled subset of names that get an extra chance to be
//! resolved against sparse chapters even after their dense entry ages out
//! (spec §3.5).

use crate::uds::record::{RecordName, VirtualChapterNumber};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// One sampled record name in 2^20 is tracked as a sparse hook. Not
/// specified numerically by spec.md; recorded as an Open Question
/// resolution in DESIGN.md.
pub const SAMPLE_RATE: u64 = 1 << 20;

#[derive(Default)]
struct VolumeIndexZone {
    records: FxHashMap<RecordName, VirtualChapterNumber>,
    hooks: FxHashMap<RecordName, VirtualChapterNumber>,
}

/// Sharded fingerprint-to-chapter map.
pub struct VolumeIndex {
    zones: Vec<Mutex<VolumeIndexZone>>,
    zone_bits: u32,
    sparse: bool,
}

impl VolumeIndex {
    /// Creates a volume index with `zone_count` shards (a power of two;
    /// `zone_bits = log2(zone_count)` selects the shard via
    /// [`RecordName::zone`]).
    pub fn new(zone_count: usize, sparse: bool) -> Self {
        assert!(zone_count.is_power_of_two(), "zone_count must be a power of two");
        let zone_bits = zone_count.trailing_zeros();
        Self {
            zones: (0..zone_count).map(|_| Mutex::new(VolumeIndexZone::default())).collect(),
            zone_bits,
            sparse,
        }
    }

    /// The zone index `name` is sharded into.
    pub fn zone_for(&self, name: &RecordName) -> usize {
        name.zone(self.zone_bits) as usize % self.zones.len()
    }

    /// `true` iff `name` is sampled as a sparse hook (only meaningful
    /// when the index is sparse; a dense index never hooks).
    pub fn is_sample(&self, name: &RecordName) -> bool {
        self.sparse && name.sample_hook(0..8) % SAMPLE_RATE == 0
    }

    /// Looks up the most recently recorded chapter for `name`, checking
    /// the hook table first when sparse (spec §3.5: hooks take priority
    /// since they survive dense-chapter eviction longer).
    pub fn get_record(&self, name: &RecordName) -> Option<VirtualChapterNumber> {
        let zone = self.zones[self.zone_for(name)].lock();
        if self.sparse {
            if let Some(&chapter) = zone.hooks.get(name) {
                return Some(chapter);
            }
        }
        zone.records.get(name).copied()
    }

    /// Records (or updates) `name`'s chapter. Also updates the hook table
    /// when `name` is a sampled hook in a sparse index.
    pub fn put_record(&self, name: RecordName, chapter: VirtualChapterNumber) {
        let mut zone = self.zones[self.zone_for(&name)].lock();
        zone.records.insert(name, chapter);
        if self.is_sample(&name) {
            zone.hooks.insert(name, chapter);
        }
    }

    /// Removes `name` from both the dense and hook tables. Returns `true`
    /// if it was present in either.
    pub fn remove_record(&self, name: &RecordName) -> bool {
        let mut zone = self.zones[self.zone_for(name)].lock();
        let removed_record = zone.records.remove(name).is_some();
        let removed_hook = zone.hooks.remove(name).is_some();
        removed_record || removed_hook
    }

    /// Total records tracked across all zones (dense entries only, hooks
    /// are a subset and not double-counted).
    pub fn len(&self) -> usize {
        self.zones.iter().map(|z| z.lock().records.len()).sum()
    }

    /// `true` iff no zone holds any record.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of zones (shards).
    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    /// `true` iff this index was constructed with `sparse = true`.
    pub fn is_sparse(&self) -> bool {
        self.sparse
    }

    /// Dumps every dense `(name, chapter)` entry across all zones, for
    /// checkpointing on a clean close (spec §6 `close_index`). Hooks are
    /// not included; [`VolumeIndex::put_record`] re-derives hook
    /// membership from `is_sample` on restore.
    pub fn snapshot(&self) -> Vec<(RecordName, VirtualChapterNumber)> {
        self.zones
            .iter()
            .flat_map(|zone| {
                let zone = zone.lock();
                zone.records.iter().map(|(&name, &chapter)| (name, chapter)).collect::<Vec<_>>()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(byte: u8) -> RecordName {
        let mut bytes = [0u8; 16];
        bytes[0] = byte;
        RecordName(bytes)
    }

    #[test]
    fn put_then_get_round_trips_within_its_zone() {
        let index = VolumeIndex::new(4, false);
        let n = name(7);
        index.put_record(n, 42);
        assert_eq!(index.get_record(&n), Some(42));
    }

    #[test]
    fn remove_clears_both_tables() {
        let index = VolumeIndex::new(1, true);
        let n = RecordName([0u8; 16]);
        index.put_record(n, 1);
        assert!(index.remove_record(&n));
        assert_eq!(index.get_record(&n), None);
        assert!(!index.remove_record(&n));
    }

    #[test]
    fn dense_index_never_samples() {
        let index = VolumeIndex::new(1, false);
        let n = RecordName([0u8; 16]);
        assert!(!index.is_sample(&n));
    }

    #[test]
    fn len_sums_across_zones() {
        let index = VolumeIndex::new(2, false);
        index.put_record(name(1), 1);
        index.put_record(name(2), 2);
        assert_eq!(index.len(), 2);
    }
}
