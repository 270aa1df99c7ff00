#![forbid(unsafe_code)]
//! Core primitives for durahash.
//!
//! The centerpiece is a persistent extendible-hash table: a doubling directory
//! of fixed-capacity buckets, each backed by its own durable file written with
//! atomic temp-file-then-rename semantics, plus a metadata checkpoint that
//! rebuilds the directory's bucket aliasing in a fresh process. Standalone
//! MinHash and perfect-hash utilities live alongside it and share nothing with
//! the index.

pub mod bucket;
pub mod minhash;
pub mod perfect;
pub mod shared;
pub mod table;

mod metadata;
mod storage;

pub use bucket::Bucket;
pub use minhash::{estimate_jaccard, hash_token, shingles, MinHash, MinHashError};
pub use perfect::{PerfectHashError, PerfectHashSet};
pub use shared::SharedTable;
pub use storage::StorageError;
pub use table::{
    BucketStatus, DeterministicState, DurabilityPolicy, ExtendibleHashTable, TableConfig,
    TableError, TableStatus,
};
