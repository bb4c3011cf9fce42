//! Hashing utilities for tpckv
//!
//! A single deterministic 64-bit rolling hash drives both replica placement on
//! the ring and cache set selection. It is a placement function only and makes
//! no collision-resistance claims.

const HASH_SEED: u64 = 1125899906842597;

/// Rolling hash over the UTF-16 code units of `key`: `h = 31 * h + c`,
/// wrapping on overflow. The returned bits are the same as the two's-complement
/// signed result; callers treat them as an unsigned ring position.
pub fn hash64(key: &str) -> u64 {
    key.encode_utf16()
        .fold(HASH_SEED, |h, c| h.wrapping_mul(31).wrapping_add(u64::from(c)))
}

/// Set index for `key` in a cache with `num_sets` sets.
pub fn set_index(key: &str, num_sets: usize) -> usize {
    (hash64(key) % num_sets as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash64_empty_is_seed() {
        assert_eq!(hash64(""), HASH_SEED);
    }

    #[test]
    fn test_hash64_single_char() {
        assert_eq!(hash64("a"), HASH_SEED * 31 + 97);
    }

    #[test]
    fn test_hash64_matches_signed_arithmetic() {
        let key = "the quick brown fox jumps over the lazy dog";
        let mut h: i64 = 1125899906842597;
        for c in key.encode_utf16() {
            h = h.wrapping_mul(31).wrapping_add(c as i64);
        }
        assert_eq!(hash64(key), h as u64);
    }

    #[test]
    fn test_hash64_deterministic() {
        assert_eq!(hash64("test-key"), hash64("test-key"));
        assert_ne!(hash64("key1"), hash64("key2"));
    }

    #[test]
    fn test_set_index_in_range() {
        for i in 0..100 {
            let key = format!("key_{}", i);
            assert!(set_index(&key, 7) < 7);
            assert_eq!(set_index(&key, 7), set_index(&key, 7));
        }
    }
}
