//! Static perfect hashing for an immutable key set.
//!
//! Builds a collision-free table of `n^2` slots by searching seeds, the
//! classic FKS-style square-space construction. Built once, then read-only;
//! membership is one hash and one equality check. Independent of the
//! extendible-hash index.

use std::collections::HashSet;
use std::error::Error;
use std::fmt;
use std::hash::{Hash, Hasher};

use twox_hash::XxHash64;

use crate::minhash::splitmix64;

const SEED_SEARCH_STATE: u64 = 0x5eed_5eed_5eed_5eed;

/// With `n^2` slots a trial seed places `n` keys collision-free with
/// probability above one half, so this budget is never reached in practice.
const MAX_BUILD_ATTEMPTS: u32 = 64;

/// Error type for perfect-hash construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PerfectHashError {
    /// The key list contains a duplicate; the structure requires unique keys.
    DuplicateKey,
    /// The squared table size does not fit in memory addressing.
    TooManyKeys { count: usize },
    /// No trial seed placed all keys without collision within the budget.
    BuildFailed { attempts: u32 },
}

impl fmt::Display for PerfectHashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateKey => write!(f, "key list contains a duplicate"),
            Self::TooManyKeys { count } => {
                write!(f, "cannot square a table for {count} keys")
            }
            Self::BuildFailed { attempts } => {
                write!(f, "no collision-free seed found in {attempts} attempts")
            }
        }
    }
}

impl Error for PerfectHashError {}

/// A collision-free membership structure over a fixed key set.
#[derive(Debug, Clone)]
pub struct PerfectHashSet<K> {
    slots: Vec<Option<K>>,
    seed: u64,
    key_count: usize,
}

impl<K: Hash + Eq> PerfectHashSet<K> {
    /// Consumes an immutable, duplicate-free key list and searches for a seed
    /// that places every key in its own slot.
    pub fn build(keys: Vec<K>) -> Result<Self, PerfectHashError> {
        let unique: HashSet<&K> = keys.iter().collect();
        if unique.len() != keys.len() {
            return Err(PerfectHashError::DuplicateKey);
        }

        let key_count = keys.len();
        if key_count == 0 {
            return Ok(Self {
                slots: Vec::new(),
                seed: 0,
                key_count: 0,
            });
        }
        let table_len = key_count
            .checked_mul(key_count)
            .ok_or(PerfectHashError::TooManyKeys { count: key_count })?;

        let mut search_state = SEED_SEARCH_STATE;
        let mut pending = keys;
        for _ in 0..MAX_BUILD_ATTEMPTS {
            let seed = splitmix64(&mut search_state);
            match try_place(pending, seed, table_len) {
                Ok(slots) => {
                    return Ok(Self {
                        slots,
                        seed,
                        key_count,
                    })
                }
                Err(returned) => pending = returned,
            }
        }
        Err(PerfectHashError::BuildFailed {
            attempts: MAX_BUILD_ATTEMPTS,
        })
    }

    pub fn contains(&self, key: &K) -> bool {
        if self.slots.is_empty() {
            return false;
        }
        let slot = hash_with_seed(self.seed, key) as usize % self.slots.len();
        self.slots[slot].as_ref() == Some(key)
    }

    /// Number of keys the structure was built over.
    pub fn len(&self) -> usize {
        self.key_count
    }

    pub fn is_empty(&self) -> bool {
        self.key_count == 0
    }

    /// Slot count of the backing table, `len()^2`.
    pub fn table_len(&self) -> usize {
        self.slots.len()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

/// One placement attempt; hands the keys back on the first collision.
fn try_place<K: Hash + Eq>(
    keys: Vec<K>,
    seed: u64,
    table_len: usize,
) -> Result<Vec<Option<K>>, Vec<K>> {
    let mut slots: Vec<Option<K>> = Vec::new();
    slots.resize_with(table_len, || None);

    let mut remaining = keys.into_iter();
    while let Some(key) = remaining.next() {
        let slot = hash_with_seed(seed, &key) as usize % table_len;
        if slots[slot].is_some() {
            // Undo and return ownership for the next attempt.
            let mut returned: Vec<K> = slots.iter_mut().filter_map(Option::take).collect();
            returned.push(key);
            returned.extend(remaining);
            return Err(returned);
        }
        slots[slot] = Some(key);
    }
    Ok(slots)
}

fn hash_with_seed<K: Hash>(seed: u64, key: &K) -> u64 {
    let mut hasher = XxHash64::with_seed(seed);
    key.hash(&mut hasher);
    hasher.finish()
}
