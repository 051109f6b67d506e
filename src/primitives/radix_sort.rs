//! MSD radix sort over fixed-length byte keys (spec §4.4, §8.2 "sort
//! laws").
//!
//! Open chapter flush and volume-index rebuild both need the same
//! operation: arrange a set of records into ascending fingerprint order
//! without relocating the records themselves. [`sort_indices`] sorts an
//! index array in place by most-significant byte first, recursing into
//! each byte-value bucket; it is explicitly non-stable (spec §4.4: ties
//! broken by fingerprint bytes alone, record order among equal keys is
//! unspecified) which is what lets it partition in place with no auxiliary
//! per-key storage beyond one count table per recursion level.

const RADIX: usize = 256;

/// Sorts `indices` in place so that `key_of(indices[i])` is
/// lexicographically non-decreasing across `indices`, comparing the first
/// `key_len` bytes of each key. Non-stable: relative order of indices
/// sharing an identical key is unspecified.
pub fn sort_indices<F>(indices: &mut [u32], key_len: usize, key_of: F)
where
    F: Fn(u32) -> [u8; 16] + Copy,
{
    if key_len == 0 {
        return;
    }
    msd_sort(indices, 0, key_len, key_of);
}

fn msd_sort<F>(indices: &mut [u32], byte_pos: usize, key_len: usize, key_of: F)
where
    F: Fn(u32) -> [u8; 16] + Copy,
{
    if indices.len() <= 1 || byte_pos >= key_len {
        return;
    }

    // Counting sort on byte_pos, producing bucket boundaries.
    let mut counts = [0u32; RADIX + 1];
    for &idx in indices.iter() {
        let b = key_of(idx)[byte_pos] as usize;
        counts[b + 1] += 1;
    }
    for b in 0..RADIX {
        counts[b + 1] += counts[b];
    }

    let mut sorted = vec![0u32; indices.len()];
    let mut cursor = counts;
    for &idx in indices.iter() {
        let b = key_of(idx)[byte_pos] as usize;
        sorted[cursor[b] as usize] = idx;
        cursor[b] += 1;
    }
    indices.copy_from_slice(&sorted);

    // Recurse into each non-empty, non-singleton bucket on the next byte.
    for b in 0..RADIX {
        let start = counts[b] as usize;
        let end = counts[b + 1] as usize;
        if end - start > 1 {
            msd_sort(&mut indices[start..end], byte_pos + 1, key_len, key_of);
        }
    }
}

/// Checks `indices` is sorted by `key_of` over the first `key_len` bytes —
/// used by property tests to validate [`sort_indices`] output without
/// re-deriving the sort.
pub fn is_sorted_by_key<F>(indices: &[u32], key_len: usize, key_of: F) -> bool
where
    F: Fn(u32) -> [u8; 16],
{
    indices
        .windows(2)
        .all(|w| key_of(w[0])[..key_len] <= key_of(w[1])[..key_len])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys_fixture() -> Vec<[u8; 16]> {
        vec![
            [0x05; 16],
            [0x01; 16],
            [0x05, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            [0xFF; 16],
            [0x00; 16],
            [0x01; 16],
        ]
    }

    #[test]
    fn sorts_ascending_by_full_key() {
        let keys = keys_fixture();
        let mut indices: Vec<u32> = (0..keys.len() as u32).collect();
        sort_indices(&mut indices, 16, |i| keys[i as usize]);
        assert!(is_sorted_by_key(&indices, 16, |i| keys[i as usize]));
    }

    #[test]
    fn preserves_multiset_of_indices() {
        let keys = keys_fixture();
        let mut indices: Vec<u32> = (0..keys.len() as u32).collect();
        let mut expected = indices.clone();
        sort_indices(&mut indices, 16, |i| keys[i as usize]);
        let mut actual = indices.clone();
        actual.sort_unstable();
        expected.sort_unstable();
        assert_eq!(actual, expected);
    }

    #[test]
    fn empty_and_singleton_are_noops() {
        let keys = keys_fixture();
        let mut empty: Vec<u32> = Vec::new();
        sort_indices(&mut empty, 16, |i| keys[i as usize]);
        assert!(empty.is_empty());

        let mut one = vec![3u32];
        sort_indices(&mut one, 16, |i| keys[i as usize]);
        assert_eq!(one, vec![3]);
    }

    #[test]
    fn partial_key_length_only_compares_prefix() {
        // Two keys differing only past byte 1 should compare equal under a
        // key_len of 1 and not panic at any recursion depth.
        let keys = vec![[0x02, 0xAA, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0], [
            0x02, 0xBB, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        ]];
        let mut indices: Vec<u32> = vec![0, 1];
        sort_indices(&mut indices, 1, |i| keys[i as usize]);
        assert!(is_sorted_by_key(&indices, 1, |i| keys[i as usize]));
    }
}
