//! The open (currently-filling) chapter: in-memory staging with
//! insertion order preserved, plus lookup by name (spec §3.4, §4.6).

use crate::uds::record::{Record, RecordName};
use rustc_hash::FxHashMap;

/// In-memory staging area for the chapter currently being filled.
/// Preserves insertion order (needed to lay out record pages
/// deterministically before radix sort, spec §4.6) and supports O(1)
/// lookup/update by name.
pub struct OpenChapter {
    capacity: usize,
    records: Vec<Record>,
    index: FxHashMap<RecordName, usize>,
}

impl OpenChapter {
    /// Creates an empty open chapter sized for `capacity` records (spec
    /// §3.3's `records_per_chapter`).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Vec::with_capacity(capacity),
            index: FxHashMap::default(),
        }
    }

    /// Number of records currently staged.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// `true` iff no records are staged.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `true` iff the chapter has reached its configured capacity.
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    /// Looks up a staged record by name.
    pub fn get(&self, name: &RecordName) -> Option<&Record> {
        self.index.get(name).map(|&i| &self.records[i])
    }

    /// Adds or updates a record. Returns `true` if the chapter accepted
    /// it (it was new, or an existing entry's metadata was updated in
    /// place); returns `false` if the chapter is full and `name` is not
    /// already present.
    pub fn put(&mut self, record: Record) -> bool {
        if let Some(&idx) = self.index.get(&record.name) {
            self.records[idx] = record;
            return true;
        }
        if self.is_full() {
            return false;
        }
        self.index.insert(record.name, self.records.len());
        self.records.push(record);
        true
    }

    /// Removes a staged record by name, if present.
    pub fn remove(&mut self, name: &RecordName) -> bool {
        let Some(idx) = self.index.remove(name) else {
            return false;
        };
        self.records.remove(idx);
        // Every index past `idx` shifted down by one.
        for v in self.index.values_mut() {
            if *v > idx {
                *v -= 1;
            }
        }
        true
    }

    /// All staged records in insertion order, for building record pages
    /// at chapter close (spec §4.6).
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Clears all staged records, ready to stage the next chapter.
    pub fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
    }
}
