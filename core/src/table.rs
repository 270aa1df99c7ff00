//! Persistent extendible-hash table.
//!
//! A directory of `2^global_depth` slots routes the low-order bits of a
//! deterministic key hash to buckets held in an id-indexed arena. Buckets
//! split on overflow; the directory doubles when a splitting bucket already
//! uses every addressing bit. Every mutation is made durable through the
//! storage layer before the call returns (or at the next checkpoint, depending
//! on the configured durability policy).

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::hash::{BuildHasher, Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use twox_hash::XxHash64;

use crate::metadata::{self, CheckpointRecord};
use crate::storage::{self, StorageError, StoredBucket};

/// Width of the directory hash; bounds the consecutive splits one insert may
/// trigger.
const MAX_SPLITS_PER_INSERT: u32 = u64::BITS;

const DIRECTORY_HASH_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// Builds the fixed-seed hasher used to address the directory.
///
/// Routing must be identical across processes for a saved table to load with
/// the same key placement, so the std randomized state is not an option here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeterministicState;

impl BuildHasher for DeterministicState {
    type Hasher = XxHash64;

    fn build_hasher(&self) -> XxHash64 {
        XxHash64::with_seed(DIRECTORY_HASH_SEED)
    }
}

/// When a mutated bucket is committed to disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DurabilityPolicy {
    /// Persist the touched bucket synchronously inside every mutating call.
    #[default]
    WriteThrough,
    /// Only mark buckets dirty; [`ExtendibleHashTable::save`] flushes them.
    /// A crash before the next save loses the un-flushed mutations.
    OnCheckpoint,
}

/// Validated construction parameters for a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableConfig {
    pub bucket_capacity: usize,
    pub initial_global_depth: u32,
    pub durability: DurabilityPolicy,
}

impl TableConfig {
    pub fn new(bucket_capacity: usize, initial_global_depth: u32) -> Result<Self, TableError> {
        if bucket_capacity == 0 {
            return Err(TableError::InvalidConfig(
                "bucket capacity must be > 0".to_string(),
            ));
        }
        if initial_global_depth == 0 {
            return Err(TableError::InvalidConfig(
                "initial global depth must be > 0".to_string(),
            ));
        }
        if initial_global_depth > 24 {
            return Err(TableError::InvalidConfig(
                "initial global depth must be <= 24".to_string(),
            ));
        }

        Ok(Self {
            bucket_capacity,
            initial_global_depth,
            durability: DurabilityPolicy::default(),
        })
    }

    pub fn with_durability(mut self, durability: DurabilityPolicy) -> Self {
        self.durability = durability;
        self
    }
}

/// Error type for table operations.
#[derive(Debug)]
pub enum TableError {
    /// Rejected at construction; no table is created.
    InvalidConfig(String),
    /// A bucket or metadata read/write failed. Fatal to the operation in
    /// progress; nothing is retried or rolled back.
    Storage(StorageError),
    /// An earlier durable write failed after its in-memory mutation was
    /// applied, so memory and disk diverge. The instance must be discarded;
    /// reads of the in-memory state remain available.
    Poisoned,
    /// A checkpoint names a missing or unreadable bucket file, or the
    /// reconstructed shape violates the depth/fan-in invariants.
    CorruptMetadata(String),
    /// An insert needed more consecutive splits than the hash width allows.
    CapacityExceeded { splits: u32 },
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(message) => write!(f, "invalid config: {message}"),
            Self::Storage(error) => write!(f, "storage error: {error}"),
            Self::Poisoned => write!(
                f,
                "table poisoned by an earlier failed write; discard this instance"
            ),
            Self::CorruptMetadata(message) => write!(f, "corrupt metadata: {message}"),
            Self::CapacityExceeded { splits } => write!(
                f,
                "insert exhausted the hash width after {splits} splits"
            ),
        }
    }
}

impl Error for TableError {}

impl From<StorageError> for TableError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

/// Opaque in-memory id of an arena bucket. Aliasing is expressed as several
/// directory slots holding the same id; the stable on-disk identity is the
/// bucket's file name, not this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct BucketId(u32);

impl BucketId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A persistent extendible-hash table over serde-serializable keys and values.
///
/// `S` supplies the directory hash and must be deterministic across processes;
/// the default is a fixed-seed XxHash64.
#[derive(Debug)]
pub struct ExtendibleHashTable<K, V, S = DeterministicState> {
    storage_root: PathBuf,
    bucket_capacity: usize,
    durability: DurabilityPolicy,
    global_depth: u32,
    directory: Vec<BucketId>,
    buckets: Vec<StoredBucket<K, V>>,
    next_bucket_id: u32,
    hasher: S,
    poisoned: bool,
}

impl<K, V, S> ExtendibleHashTable<K, V, S>
where
    K: Eq + Hash + Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
    S: BuildHasher + Default,
{
    /// Creates a fresh table under `storage_root`, with one depth-0 bucket
    /// occupying all `2^initial_global_depth` directory slots.
    pub fn create(
        storage_root: impl Into<PathBuf>,
        config: TableConfig,
    ) -> Result<Self, TableError> {
        let storage_root = storage_root.into();
        if storage_root.as_os_str().is_empty() {
            return Err(TableError::InvalidConfig(
                "storage root must not be empty".to_string(),
            ));
        }
        fs::create_dir_all(&storage_root).map_err(StorageError::Io)?;

        let mut table = Self {
            storage_root,
            bucket_capacity: config.bucket_capacity,
            durability: config.durability,
            global_depth: config.initial_global_depth,
            directory: Vec::new(),
            buckets: Vec::new(),
            next_bucket_id: 0,
            hasher: S::default(),
            poisoned: false,
        };

        let initial = table.mint_bucket(0)?;
        table.directory = vec![initial; 1 << config.initial_global_depth];
        Ok(table)
    }

    /// Reconstructs a table from a metadata checkpoint, re-opening every
    /// bucket file it names and merging duplicate names into shared buckets.
    pub fn load(meta_path: &Path) -> Result<Self, TableError> {
        Self::load_with_durability(meta_path, DurabilityPolicy::default())
    }

    pub fn load_with_durability(
        meta_path: &Path,
        durability: DurabilityPolicy,
    ) -> Result<Self, TableError> {
        let record = match metadata::read_checkpoint(meta_path) {
            Ok(record) => record,
            Err(StorageError::Corrupt(message)) => {
                return Err(TableError::CorruptMetadata(message))
            }
            Err(error) => return Err(TableError::Storage(error)),
        };

        let table = Self::restore(record, durability)?;
        tracing::debug!(
            path = %meta_path.display(),
            global_depth = table.global_depth,
            buckets = table.buckets.len(),
            "checkpoint loaded"
        );
        Ok(table)
    }

    fn restore(record: CheckpointRecord, durability: DurabilityPolicy) -> Result<Self, TableError> {
        if record.bucket_capacity == 0 {
            return Err(TableError::CorruptMetadata(
                "bucket capacity must be > 0".to_string(),
            ));
        }
        if record.global_depth == 0 {
            return Err(TableError::CorruptMetadata(
                "global depth must be > 0".to_string(),
            ));
        }
        let expected_len = 1_usize
            .checked_shl(record.global_depth)
            .ok_or_else(|| TableError::CorruptMetadata("global depth out of range".to_string()))?;
        if record.dir_file_names.len() != expected_len {
            return Err(TableError::CorruptMetadata(format!(
                "directory has {} slots, expected {expected_len}",
                record.dir_file_names.len()
            )));
        }
        let storage_root = PathBuf::from(&record.storage_root);
        if storage_root.as_os_str().is_empty() {
            return Err(TableError::CorruptMetadata(
                "storage root must not be empty".to_string(),
            ));
        }

        // Re-open each named file once; duplicate names share one bucket.
        let mut ids_by_name: BTreeMap<String, BucketId> = BTreeMap::new();
        let mut buckets: Vec<StoredBucket<K, V>> = Vec::new();
        let mut directory = Vec::with_capacity(expected_len);
        for name in &record.dir_file_names {
            let id = match ids_by_name.get(name) {
                Some(id) => *id,
                None => {
                    let stored =
                        StoredBucket::open(&storage_root, name.clone()).map_err(|error| {
                            TableError::CorruptMetadata(format!("bucket file {name}: {error}"))
                        })?;
                    if stored.bucket.capacity() != record.bucket_capacity as usize {
                        return Err(TableError::CorruptMetadata(format!(
                            "bucket file {name} has capacity {}, expected {}",
                            stored.bucket.capacity(),
                            record.bucket_capacity
                        )));
                    }
                    if stored.bucket.local_depth() > record.global_depth {
                        return Err(TableError::CorruptMetadata(format!(
                            "bucket file {name} has local depth {} above global depth {}",
                            stored.bucket.local_depth(),
                            record.global_depth
                        )));
                    }
                    if let Some(minted) = minted_bucket_id(name) {
                        if minted >= record.next_bucket_id {
                            return Err(TableError::CorruptMetadata(format!(
                                "next bucket id {} is behind live bucket file {name}",
                                record.next_bucket_id
                            )));
                        }
                    }
                    let id = BucketId(buckets.len() as u32);
                    buckets.push(stored);
                    ids_by_name.insert(name.clone(), id);
                    id
                }
            };
            directory.push(id);
        }

        validate_fan_in(record.global_depth, &directory, &buckets)?;

        Ok(Self {
            storage_root,
            bucket_capacity: record.bucket_capacity as usize,
            durability,
            global_depth: record.global_depth,
            directory,
            buckets,
            next_bucket_id: record.next_bucket_id,
            hasher: S::default(),
            poisoned: false,
        })
    }

    /// Inserts or updates a key, returning the previous value.
    ///
    /// A full target bucket is split (doubling the directory when needed) and
    /// the insert retried against the grown directory, until it lands or the
    /// hash width is exhausted.
    pub fn put(&mut self, key: K, value: V) -> Result<Option<V>, TableError> {
        self.guard()?;
        let hash = self.hash_key(&key);
        let mut pending = (key, value);
        let mut splits = 0_u32;

        loop {
            let slot = self.slot_for_hash(hash);
            let id = self.directory[slot];
            match self.buckets[id.index()].bucket.insert(pending.0, pending.1) {
                Ok(previous) => {
                    self.persist(id)?;
                    return Ok(previous);
                }
                Err(returned) => pending = returned,
            }

            // Full bucket, new key. Splitting is futile once every resident
            // key shares the incoming key's full hash.
            if splits >= MAX_SPLITS_PER_INSERT || self.splitting_is_futile(slot, hash) {
                return Err(TableError::CapacityExceeded { splits });
            }
            self.split(slot)?;
            splits += 1;
        }
    }

    /// Looks a key up. No mutation, no persistence.
    pub fn get(&self, key: &K) -> Option<&V> {
        let slot = self.slot_for_hash(self.hash_key(key));
        self.buckets[self.directory[slot].index()].bucket.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Removes a key, returning the previous value. The routed bucket is
    /// re-persisted even when the key was absent.
    pub fn remove(&mut self, key: &K) -> Result<Option<V>, TableError> {
        self.guard()?;
        let slot = self.slot_for_hash(self.hash_key(key));
        let id = self.directory[slot];
        let previous = self.buckets[id.index()].bucket.remove(key);
        self.persist(id)?;
        Ok(previous)
    }

    /// Total number of stored items, summed over unique buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|stored| stored.bucket.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|stored| stored.bucket.is_empty())
    }

    pub fn global_depth(&self) -> u32 {
        self.global_depth
    }

    pub fn directory_len(&self) -> usize {
        self.directory.len()
    }

    pub fn bucket_capacity(&self) -> usize {
        self.bucket_capacity
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Snapshot of the table shape for reporting.
    pub fn status(&self) -> TableStatus {
        let mut slots_by_id: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (slot, id) in self.directory.iter().enumerate() {
            slots_by_id.entry(id.0).or_default().push(slot);
        }

        let buckets = slots_by_id
            .into_iter()
            .map(|(id, slots)| {
                let stored = &self.buckets[id as usize];
                BucketStatus {
                    file_name: stored.file_name.clone(),
                    local_depth: stored.bucket.local_depth(),
                    items: stored.bucket.len(),
                    slots,
                }
            })
            .collect();

        TableStatus {
            global_depth: self.global_depth,
            directory_len: self.directory.len(),
            items: self.len(),
            buckets,
        }
    }

    /// Flushes dirty buckets, then atomically writes the metadata checkpoint.
    pub fn save(&mut self, meta_path: &Path) -> Result<(), TableError> {
        self.guard()?;
        for index in 0..self.buckets.len() {
            if self.buckets[index].dirty {
                if let Err(error) = self.buckets[index].flush(&self.storage_root) {
                    self.poison(&error);
                    return Err(TableError::Storage(error));
                }
            }
        }

        let record = CheckpointRecord {
            bucket_capacity: self.bucket_capacity as u32,
            global_depth: self.global_depth,
            storage_root: self.storage_root.to_string_lossy().into_owned(),
            dir_file_names: self
                .directory
                .iter()
                .map(|id| self.buckets[id.index()].file_name.clone())
                .collect(),
            next_bucket_id: self.next_bucket_id,
        };
        metadata::write_checkpoint(meta_path, &record)?;
        tracing::debug!(
            path = %meta_path.display(),
            global_depth = self.global_depth,
            buckets = self.buckets.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    /// Splits the bucket addressed by `slot`, doubling the directory first
    /// when the bucket already uses every addressing bit.
    fn split(&mut self, slot: usize) -> Result<(), TableError> {
        let old_id = self.directory[slot];
        let old_depth = self.buckets[old_id.index()].bucket.local_depth();

        if old_depth == self.global_depth {
            // Slot i and slot i + 2^old_depth now alias the same buckets,
            // preserving every fan-in while adding one addressing bit.
            self.directory.extend_from_within(..);
            self.global_depth += 1;
            tracing::debug!(
                global_depth = self.global_depth,
                directory_len = self.directory.len(),
                "directory doubled"
            );
        }

        let new_id = self.mint_bucket(old_depth + 1)?;
        self.buckets[old_id.index()]
            .bucket
            .set_local_depth(old_depth + 1);
        self.persist(old_id)?;

        // Slots whose bit `old_depth` is set move to the new bucket.
        let split_bit = 1_usize << old_depth;
        for index in 0..self.directory.len() {
            if self.directory[index] == old_id && index & split_bit != 0 {
                self.directory[index] = new_id;
            }
        }

        let redistributed = self.buckets[old_id.index()].bucket.drain_items();
        self.persist(old_id)?;
        for (key, value) in redistributed {
            let target_slot = self.slot_for_hash(self.hash_key(&key));
            let target_id = self.directory[target_slot];
            if self.buckets[target_id.index()]
                .bucket
                .insert(key, value)
                .is_err()
            {
                // Each side receives at most the source bucket's item count,
                // which never exceeded its capacity.
                unreachable!("split redistribution cannot overflow a bucket");
            }
            self.persist(target_id)?;
        }

        tracing::debug!(
            old_depth,
            new_depth = old_depth + 1,
            global_depth = self.global_depth,
            "bucket split"
        );
        Ok(())
    }

    fn mint_bucket(&mut self, local_depth: u32) -> Result<BucketId, TableError> {
        let file_name = storage::bucket_file_name(self.next_bucket_id);
        self.next_bucket_id += 1;
        // No divergence on failure here: the in-memory bucket is only adopted
        // once its file exists (or is marked dirty), so no poisoning.
        let stored = StoredBucket::create(
            &self.storage_root,
            file_name,
            local_depth,
            self.bucket_capacity,
            self.durability,
        )?;
        self.buckets.push(stored);
        Ok(BucketId((self.buckets.len() - 1) as u32))
    }

    fn persist(&mut self, id: BucketId) -> Result<(), TableError> {
        let durability = self.durability;
        match self.buckets[id.index()].mark_mutated(&self.storage_root, durability) {
            Ok(()) => Ok(()),
            Err(error) => {
                self.poison(&error);
                Err(TableError::Storage(error))
            }
        }
    }

    fn poison(&mut self, error: &StorageError) {
        self.poisoned = true;
        tracing::warn!(%error, "durable write failed after in-memory mutation; table poisoned");
    }

    fn guard(&self) -> Result<(), TableError> {
        if self.poisoned {
            return Err(TableError::Poisoned);
        }
        Ok(())
    }

    fn hash_key(&self, key: &K) -> u64 {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn slot_for_hash(&self, hash: u64) -> usize {
        (hash & self.directory_mask()) as usize
    }

    /// Low `global_depth` bits address the directory. The depth is at least 1
    /// at construction and only grows, so the shift below never reaches 64.
    fn directory_mask(&self) -> u64 {
        u64::MAX >> (64 - self.global_depth)
    }

    /// True when every key in the bucket at `slot` carries exactly `hash`: no
    /// further bit can separate them, so the hash width is effectively
    /// exhausted without growing the directory first.
    fn splitting_is_futile(&self, slot: usize, hash: u64) -> bool {
        let stored = &self.buckets[self.directory[slot].index()];
        stored
            .bucket
            .items()
            .iter()
            .all(|(key, _)| self.hash_key(key) == hash)
    }
}

/// Reconstructed fan-in of every bucket must match `2^(global - local)`, over
/// slots agreeing on the bucket's low address bits.
fn validate_fan_in<K, V>(
    global_depth: u32,
    directory: &[BucketId],
    buckets: &[StoredBucket<K, V>],
) -> Result<(), TableError> {
    let mut slots_by_id: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (slot, id) in directory.iter().enumerate() {
        slots_by_id.entry(id.0).or_default().push(slot);
    }

    for (id, slots) in &slots_by_id {
        let stored = &buckets[*id as usize];
        let local_depth = stored.bucket.local_depth();
        let expected = 1_usize << (global_depth - local_depth);
        if slots.len() != expected {
            return Err(TableError::CorruptMetadata(format!(
                "bucket file {} has fan-in {}, expected {expected}",
                stored.file_name,
                slots.len()
            )));
        }
        let low_bits_mask = if local_depth == 0 {
            0
        } else {
            usize::MAX >> (usize::BITS - local_depth)
        };
        let anchor = slots[0] & low_bits_mask;
        if slots.iter().any(|slot| slot & low_bits_mask != anchor) {
            return Err(TableError::CorruptMetadata(format!(
                "bucket file {} is aliased by slots that disagree on its {} address bits",
                stored.file_name, local_depth
            )));
        }
    }
    Ok(())
}

/// Parses the numeric id out of a minted `bucket_<id>.bin` name. Foreign names
/// are allowed and skipped by the counter check.
fn minted_bucket_id(name: &str) -> Option<u32> {
    name.strip_prefix("bucket_")?
        .strip_suffix(".bin")?
        .parse()
        .ok()
}

/// Shape report for one unique bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketStatus {
    pub file_name: String,
    pub local_depth: u32,
    pub items: usize,
    /// Directory slots addressing this bucket.
    pub slots: Vec<usize>,
}

/// Shape report for a whole table, as produced by
/// [`ExtendibleHashTable::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStatus {
    pub global_depth: u32,
    pub directory_len: usize,
    pub items: usize,
    pub buckets: Vec<BucketStatus>,
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "table global_depth={} directory_len={} items={} unique_buckets={}",
            self.global_depth,
            self.directory_len,
            self.items,
            self.buckets.len()
        )?;
        for bucket in &self.buckets {
            writeln!(
                f,
                "  bucket file={} local_depth={} items={} slots={:?}",
                bucket.file_name, bucket.local_depth, bucket.items, bucket.slots
            )?;
        }
        Ok(())
    }
}
