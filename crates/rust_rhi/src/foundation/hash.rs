//! Stable FNV-1a hashing
//!
//! Used for vertex layout identities and descriptor set keys. `DefaultHasher`
//! leaves its algorithm unspecified between Rust releases; these values are
//! fixed, and integers are hashed as little-endian bytes on every target.

use std::hash::{BuildHasherDefault, Hasher};

const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a hasher
#[derive(Debug, Clone, Copy)]
pub struct Fnv1a(u64);

impl Default for Fnv1a {
    fn default() -> Self {
        Self(OFFSET_BASIS)
    }
}

impl Hasher for Fnv1a {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.0 ^= u64::from(byte);
            self.0 = self.0.wrapping_mul(PRIME);
        }
    }

    fn write_u64(&mut self, value: u64) {
        self.write(&value.to_le_bytes());
    }
}

/// `BuildHasher` for maps keyed by values that already carry a hash
pub type FnvBuildHasher = BuildHasherDefault<Fnv1a>;

/// Hash a sequence of 64-bit words
pub fn fnv1a_words(words: &[u64]) -> u64 {
    let mut hasher = Fnv1a::default();
    for word in words {
        hasher.write_u64(*word);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        let mut empty = Fnv1a::default();
        empty.write(b"");
        assert_eq!(empty.finish(), 0xcbf2_9ce4_8422_2325);

        let mut a = Fnv1a::default();
        a.write(b"a");
        assert_eq!(a.finish(), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn test_word_order_matters() {
        assert_ne!(fnv1a_words(&[1, 2]), fnv1a_words(&[2, 1]));
        assert_eq!(fnv1a_words(&[7, 9]), fnv1a_words(&[7, 9]));
    }

    #[test]
    fn test_words_hash_to_fixed_values() {
        assert_eq!(fnv1a_words(&[]), OFFSET_BASIS);
        assert_eq!(fnv1a_words(&[1, 2]), 0x7717_9803_63c8_e066);
    }
}
