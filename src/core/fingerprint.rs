use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

/// Seed the registries use for the normalized hash.
pub const MURMUR2_SEED: u32 = 1;

/// Tab, line feed, carriage return and space are dropped before the normalized hash.
const WHITESPACE: [u8; 4] = [0x09, 0x0a, 0x0d, 0x20];

/// Content identity of a mod file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// Hex SHA-1 of the raw bytes.
    pub sha1: String,
    /// MurmurHash2 of the bytes with whitespace control bytes stripped.
    pub murmur2: u32,
}

impl Fingerprint {
    pub fn compute(bytes: &[u8]) -> Self {
        Self {
            sha1: sha1_hex(bytes),
            murmur2: normalized_hash(bytes),
        }
    }

    /// Normalized hash in the decimal form registries store it in.
    pub fn murmur2_string(&self) -> String {
        self.murmur2.to_string()
    }

    /// True if either hash agrees. Comparison of hex digests ignores case.
    pub fn matches(&self, sha1: Option<&str>, murmur2: Option<&str>) -> bool {
        let exact = sha1.is_some_and(|h| h.eq_ignore_ascii_case(&self.sha1));
        let normalized = murmur2.is_some_and(|h| h.trim() == self.murmur2_string());
        exact || normalized
    }
}

pub fn sha1_hex(bytes: &[u8]) -> String {
    let hash = Sha1::digest(bytes);
    format!("{hash:x}")
}

pub fn normalized_hash(bytes: &[u8]) -> u32 {
    let filtered: Vec<u8> = bytes
        .iter()
        .copied()
        .filter(|b| !WHITESPACE.contains(b))
        .collect();
    murmur2(&filtered, MURMUR2_SEED)
}

/// 32-bit MurmurHash2 (Austin Appleby), little-endian block reads.
pub fn murmur2(data: &[u8], seed: u32) -> u32 {
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let mut h = seed ^ (data.len() as u32);
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() == 3 {
        h ^= u32::from(tail[2]) << 16;
    }
    if tail.len() >= 2 {
        h ^= u32::from(tail[1]) << 8;
    }
    if !tail.is_empty() {
        h ^= u32::from(tail[0]);
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}
