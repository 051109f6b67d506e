//! Torn reference-block write detection (spec §4.8.1, §4.8.5, §8.3
//! scenario 6): when a crash leaves some sectors of a reference block
//! updated and others stale, the unpacked block must report it rather
//! than silently pick one sector's journal point.

use vdo_core::config::{COUNTS_PER_BLOCK, COUNTS_PER_SECTOR, VDO_BLOCK_SIZE, VDO_SECTORS_PER_BLOCK};
use vdo_core::vdo::journal_point::JournalPoint;
use vdo_core::vdo::reference_block::{pack_reference_block, unpack_reference_block};

#[test]
fn a_consistently_packed_block_round_trips_with_no_torn_flag() {
    let counters = vec![3u8; COUNTS_PER_BLOCK as usize];
    let point = JournalPoint::new(5, 2);
    let packed = pack_reference_block(&counters, point);
    assert_eq!(packed.len(), VDO_BLOCK_SIZE as usize);

    let unpacked = unpack_reference_block(&packed).unwrap();
    assert!(!unpacked.torn);
    assert_eq!(unpacked.slab_journal_point, point);
    assert_eq!(unpacked.counters, counters);
}

#[test]
fn a_block_with_one_stale_sector_is_reported_torn_with_the_max_journal_point() {
    let counters = vec![1u8; COUNTS_PER_BLOCK as usize];
    let fresh_point = JournalPoint::new(10, 0);
    let mut packed = pack_reference_block(&counters, fresh_point);

    // Simulate a crash mid-write: sector 3 never got its new journal
    // point or counters, so it still carries the old (lower) point.
    let sector_size = (VDO_BLOCK_SIZE / VDO_SECTORS_PER_BLOCK) as usize;
    let stale_point = JournalPoint::new(9, 3);
    let torn_sector = 3;
    let sector_start = torn_sector * sector_size;
    stale_point.pack(&mut packed[sector_start..sector_start + 12]);

    let unpacked = unpack_reference_block(&packed).unwrap();
    assert!(unpacked.torn);
    assert_eq!(unpacked.slab_journal_point, fresh_point, "the maximum sector point wins");
    assert_ne!(unpacked.max_sector, torn_sector);
}

#[test]
fn unpacking_a_wrong_sized_buffer_is_corrupt_data() {
    let too_short = vec![0u8; VDO_BLOCK_SIZE as usize - 1];
    assert!(unpack_reference_block(&too_short).is_err());
}

#[test]
fn counts_per_block_spans_exactly_the_sector_layout() {
    assert_eq!(COUNTS_PER_BLOCK, COUNTS_PER_SECTOR * VDO_SECTORS_PER_BLOCK);
}
