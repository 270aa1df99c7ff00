//! Durable per-bucket storage.
//!
//! Each bucket owns one file under the table's storage root, named by a stable
//! logical id (`bucket_<id>.bin`). Every write goes to a sibling temp file
//! first and is renamed over the canonical file, so a reader or a crashed
//! process only ever observes a fully committed version.

use std::error::Error;
use std::fmt;
use std::fs::{self, File};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::bucket::Bucket;
use crate::table::DurabilityPolicy;

use fsync::{ensure_parent_dir, sync_parent_dir};

pub(crate) mod codec;
mod fsync;

pub(crate) const BUCKET_MAGIC: [u8; 8] = *b"dhsh.bkt";
pub(crate) const BUCKET_FORMAT_VERSION: u16 = 1;

/// Error type for the storage layer.
#[derive(Debug)]
pub enum StorageError {
    Io(std::io::Error),
    Serde(serde_json::Error),
    /// Bad magic, unsupported version, CRC mismatch or truncated record.
    Corrupt(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(error) => write!(f, "io error: {error}"),
            Self::Serde(error) => write!(f, "serialization error: {error}"),
            Self::Corrupt(message) => write!(f, "corrupt record: {message}"),
        }
    }
}

impl Error for StorageError {}

impl From<std::io::Error> for StorageError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serde(value)
    }
}

/// Stable file name minted for bucket id `id`.
pub(crate) fn bucket_file_name(id: u32) -> String {
    format!("bucket_{id}.bin")
}

/// A bucket plus its on-disk identity.
///
/// The storage root is deliberately not stored here: callers supply it on
/// every filesystem operation, so bucket files stay portable across a moved
/// root.
#[derive(Debug, Clone)]
pub(crate) struct StoredBucket<K, V> {
    pub(crate) bucket: Bucket<K, V>,
    pub(crate) file_name: String,
    pub(crate) dirty: bool,
}

impl<K, V> StoredBucket<K, V>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    /// Creates an empty bucket. Under write-through the empty state is
    /// committed to disk immediately; under checkpointing it is only marked
    /// dirty.
    pub(crate) fn create(
        root: &Path,
        file_name: String,
        local_depth: u32,
        capacity: usize,
        durability: DurabilityPolicy,
    ) -> Result<Self, StorageError> {
        let mut stored = Self {
            bucket: Bucket::new(local_depth, capacity),
            file_name,
            dirty: false,
        };
        stored.mark_mutated(root, durability)?;
        Ok(stored)
    }

    /// Loads a bucket back from its canonical file under `root`.
    pub(crate) fn open(root: &Path, file_name: String) -> Result<Self, StorageError> {
        let bytes = fs::read(root.join(&file_name))?;
        let bucket = decode_bucket(&bytes)?;
        Ok(Self {
            bucket,
            file_name,
            dirty: false,
        })
    }

    /// Records that the in-memory bucket changed. Write-through persists the
    /// full state before returning; checkpointing defers to the next flush.
    pub(crate) fn mark_mutated(
        &mut self,
        root: &Path,
        durability: DurabilityPolicy,
    ) -> Result<(), StorageError> {
        match durability {
            DurabilityPolicy::WriteThrough => self.flush(root),
            DurabilityPolicy::OnCheckpoint => {
                self.dirty = true;
                Ok(())
            }
        }
    }

    /// Serializes the bucket's full current state and commits it atomically.
    pub(crate) fn flush(&mut self, root: &Path) -> Result<(), StorageError> {
        let bytes = encode_bucket(&self.bucket)?;
        write_atomic(&root.join(&self.file_name), &bytes)?;
        self.dirty = false;
        Ok(())
    }
}

/// Encodes a bucket into its versioned binary record.
///
/// Layout (little-endian): magic, version u16, local_depth u32, capacity u32,
/// item count u32, then per item a length-prefixed key payload and value
/// payload, and a trailing CRC32 over everything before it.
pub(crate) fn encode_bucket<K, V>(bucket: &Bucket<K, V>) -> Result<Vec<u8>, StorageError>
where
    K: Serialize,
    V: Serialize,
{
    let mut buffer = Vec::with_capacity(64);
    buffer.extend_from_slice(&BUCKET_MAGIC);
    buffer.extend_from_slice(&BUCKET_FORMAT_VERSION.to_le_bytes());
    buffer.extend_from_slice(&bucket.local_depth().to_le_bytes());
    buffer.extend_from_slice(&(bucket.capacity() as u32).to_le_bytes());
    buffer.extend_from_slice(&(bucket.len() as u32).to_le_bytes());
    for (key, value) in bucket.items() {
        codec::put_bytes(&mut buffer, &serde_json::to_vec(key)?);
        codec::put_bytes(&mut buffer, &serde_json::to_vec(value)?);
    }
    codec::append_crc32(&mut buffer);
    Ok(buffer)
}

/// Decodes a bucket record produced by [`encode_bucket`].
pub(crate) fn decode_bucket<K, V>(bytes: &[u8]) -> Result<Bucket<K, V>, StorageError>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    let body = codec::verify_crc32(bytes)?;
    let mut reader = codec::ByteReader::new(body);

    let magic = reader.read_array::<8>()?;
    if magic != BUCKET_MAGIC {
        return Err(StorageError::Corrupt("bad bucket magic".to_string()));
    }
    let version = reader.read_u16()?;
    if version != BUCKET_FORMAT_VERSION {
        return Err(StorageError::Corrupt(format!(
            "unsupported bucket format version {version}"
        )));
    }

    let local_depth = reader.read_u32()?;
    let capacity = reader.read_u32()? as usize;
    let item_count = reader.read_u32()? as usize;
    if item_count > capacity {
        return Err(StorageError::Corrupt(format!(
            "item count {item_count} exceeds capacity {capacity}"
        )));
    }

    let mut items = Vec::with_capacity(item_count);
    for _ in 0..item_count {
        let key = serde_json::from_slice(reader.read_bytes()?)?;
        let value = serde_json::from_slice(reader.read_bytes()?)?;
        items.push((key, value));
    }
    reader.finish()?;

    Ok(Bucket::from_parts(local_depth, capacity, items))
}

/// Commits `bytes` to `path` through a sibling temp file and an atomic rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    ensure_parent_dir(path)?;

    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, bytes)?;
    File::open(&temp_path)?.sync_all()?;
    fs::rename(&temp_path, path)?;
    sync_parent_dir(path)?;
    Ok(())
}

#[cfg(test)]
mod tests;
