//! The metadata checkpoint record.
//!
//! A checkpoint captures the table's shape: capacities, global depth, storage
//! root and the ordered per-slot bucket file names (duplicates encode shared
//! buckets). Together with the bucket files it names, it is sufficient to
//! reconstruct a table in a fresh process.

use std::fs;
use std::path::Path;

use crate::storage::{self, codec, StorageError};

pub(crate) const META_MAGIC: [u8; 8] = *b"dhsh.met";
pub(crate) const META_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CheckpointRecord {
    pub(crate) bucket_capacity: u32,
    pub(crate) global_depth: u32,
    pub(crate) storage_root: String,
    /// One file name per directory slot, `2^global_depth` entries.
    pub(crate) dir_file_names: Vec<String>,
    pub(crate) next_bucket_id: u32,
}

pub(crate) fn encode_checkpoint(record: &CheckpointRecord) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(64);
    buffer.extend_from_slice(&META_MAGIC);
    buffer.extend_from_slice(&META_FORMAT_VERSION.to_le_bytes());
    buffer.extend_from_slice(&record.bucket_capacity.to_le_bytes());
    buffer.extend_from_slice(&record.global_depth.to_le_bytes());
    codec::put_string(&mut buffer, &record.storage_root);
    buffer.extend_from_slice(&(record.dir_file_names.len() as u32).to_le_bytes());
    for name in &record.dir_file_names {
        codec::put_string(&mut buffer, name);
    }
    buffer.extend_from_slice(&record.next_bucket_id.to_le_bytes());
    codec::append_crc32(&mut buffer);
    buffer
}

pub(crate) fn decode_checkpoint(bytes: &[u8]) -> Result<CheckpointRecord, StorageError> {
    let body = codec::verify_crc32(bytes)?;
    let mut reader = codec::ByteReader::new(body);

    let magic = reader.read_array::<8>()?;
    if magic != META_MAGIC {
        return Err(StorageError::Corrupt("bad metadata magic".to_string()));
    }
    let version = reader.read_u16()?;
    if version != META_FORMAT_VERSION {
        return Err(StorageError::Corrupt(format!(
            "unsupported metadata format version {version}"
        )));
    }

    let bucket_capacity = reader.read_u32()?;
    let global_depth = reader.read_u32()?;
    let storage_root = reader.read_string()?;
    let slot_count = reader.read_u32()? as usize;
    let mut dir_file_names = Vec::with_capacity(slot_count.min(1 << 16));
    for _ in 0..slot_count {
        dir_file_names.push(reader.read_string()?);
    }
    let next_bucket_id = reader.read_u32()?;
    reader.finish()?;

    Ok(CheckpointRecord {
        bucket_capacity,
        global_depth,
        storage_root,
        dir_file_names,
        next_bucket_id,
    })
}

/// Atomically commits a checkpoint record to `path`.
pub(crate) fn write_checkpoint(path: &Path, record: &CheckpointRecord) -> Result<(), StorageError> {
    storage::write_atomic(path, &encode_checkpoint(record))
}

/// Reads and verifies a checkpoint record from `path`.
pub(crate) fn read_checkpoint(path: &Path) -> Result<CheckpointRecord, StorageError> {
    let bytes = fs::read(path)?;
    decode_checkpoint(&bytes)
}

#[cfg(test)]
mod tests;
