// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Global row id packing.
//!
//! Every row has a dense 64-bit id: the owning partition's index in the
//! high bits, the row's position within that partition in the low 44.

/// Bits reserved for the local row id
pub const LOCAL_BITS: u32 = 44;

const LOCAL_MASK: u64 = (1 << LOCAL_BITS) - 1;

/// Packs a partition index and local row id into a global row id.
#[must_use]
pub fn to_row_id(partition_index: usize, local_row_id: u64) -> u64 {
    debug_assert!(local_row_id <= LOCAL_MASK);
    ((partition_index as u64) << LOCAL_BITS) | local_row_id
}

/// Extracts the partition index.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn partition_index(row_id: u64) -> usize {
    (row_id >> LOCAL_BITS) as usize
}

/// Extracts the local row id.
#[must_use]
pub fn local_row_id(row_id: u64) -> u64 {
    row_id & LOCAL_MASK
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn roundtrip() {
        for (partition, row) in [(0, 0), (1, 0), (0, 1), (7, 123_456), (1_000, LOCAL_MASK)] {
            let id = to_row_id(partition, row);
            assert_eq!(partition, partition_index(id));
            assert_eq!(row, local_row_id(id));
        }
    }
}
