//! MinHash signatures for Jaccard-similarity estimation over integer sets.
//!
//! A seeded family of `h_i(x) = (a_i * x + b_i) mod P` hash functions maps a
//! set to the vector of per-function minima; the fraction of agreeing
//! positions between two signatures estimates the Jaccard similarity of the
//! underlying sets. Independent of the extendible-hash index.

use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::hash::Hasher;

use twox_hash::XxHash64;

/// Modulus of the hash family; the Mersenne prime 2^31 - 1.
const MERSENNE_PRIME: u64 = 2_147_483_647;

const TOKEN_HASH_SEED: u64 = 0x7c15_9e37;

/// Error type for signature construction and comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MinHashError {
    InvalidConfig(String),
    SignatureLengthMismatch { left: usize, right: usize },
}

impl fmt::Display for MinHashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(message) => write!(f, "invalid config: {message}"),
            Self::SignatureLengthMismatch { left, right } => {
                write!(f, "signature length mismatch: left={left}, right={right}")
            }
        }
    }
}

impl Error for MinHashError {}

/// A reproducible MinHash function family.
#[derive(Debug, Clone)]
pub struct MinHash {
    coeff_a: Vec<u64>,
    coeff_b: Vec<u64>,
}

impl MinHash {
    /// Draws `num_hashes` hash functions from the family, deterministically
    /// from `seed`. Common signature lengths are 64, 128 or 256.
    pub fn new(num_hashes: usize, seed: u64) -> Result<Self, MinHashError> {
        if num_hashes == 0 {
            return Err(MinHashError::InvalidConfig(
                "number of hash functions must be > 0".to_string(),
            ));
        }

        let mut state = seed;
        let mut coeff_a = Vec::with_capacity(num_hashes);
        let mut coeff_b = Vec::with_capacity(num_hashes);
        for _ in 0..num_hashes {
            // a_i in [1, P-1], b_i in [0, P-1].
            coeff_a.push(1 + splitmix64(&mut state) % (MERSENNE_PRIME - 1));
            coeff_b.push(splitmix64(&mut state) % MERSENNE_PRIME);
        }
        Ok(Self { coeff_a, coeff_b })
    }

    pub fn num_hashes(&self) -> usize {
        self.coeff_a.len()
    }

    /// Builds the signature of a set: the minimum of each hash function over
    /// all elements. An empty set yields a signature filled with the modulus
    /// sentinel, which no element can produce.
    pub fn signature<I>(&self, elements: I) -> Vec<u32>
    where
        I: IntoIterator<Item = u64>,
    {
        let mut signature = vec![MERSENNE_PRIME as u32; self.num_hashes()];
        for element in elements {
            let x = element % MERSENNE_PRIME;
            for (position, (a, b)) in self.coeff_a.iter().zip(&self.coeff_b).enumerate() {
                let hashed = (a * x + b) % MERSENNE_PRIME;
                if (hashed as u32) < signature[position] {
                    signature[position] = hashed as u32;
                }
            }
        }
        signature
    }
}

/// Estimates Jaccard similarity as the fraction of positions where two
/// signatures agree.
pub fn estimate_jaccard(left: &[u32], right: &[u32]) -> Result<f64, MinHashError> {
    if left.len() != right.len() {
        return Err(MinHashError::SignatureLengthMismatch {
            left: left.len(),
            right: right.len(),
        });
    }
    if left.is_empty() {
        return Err(MinHashError::InvalidConfig(
            "signatures must not be empty".to_string(),
        ));
    }

    let matching = left
        .iter()
        .zip(right)
        .filter(|(a, b)| a == b)
        .count();
    Ok(matching as f64 / left.len() as f64)
}

/// Hashes a token to a stable set element.
pub fn hash_token(token: &str) -> u64 {
    let mut hasher = XxHash64::with_seed(TOKEN_HASH_SEED);
    hasher.write(token.as_bytes());
    hasher.finish()
}

/// Character k-gram shingling: the set of hashed k-length windows of `text`.
pub fn shingles(text: &str, k: usize) -> Result<HashSet<u64>, MinHashError> {
    if k == 0 {
        return Err(MinHashError::InvalidConfig(
            "shingle length must be > 0".to_string(),
        ));
    }

    let chars: Vec<char> = text.chars().collect();
    let mut set = HashSet::new();
    for window in chars.windows(k) {
        let shingle: String = window.iter().collect();
        set.insert(hash_token(&shingle));
    }
    Ok(set)
}

/// SplitMix64 step, used to draw the hash-family coefficients.
pub(crate) fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests;
