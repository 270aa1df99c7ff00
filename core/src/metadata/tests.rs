use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::storage::codec;
use crate::storage::StorageError;

use super::*;

fn test_root(prefix: &str) -> PathBuf {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock must be monotonic")
        .as_nanos();
    std::env::temp_dir().join(format!("durahash_{prefix}_{timestamp}"))
}

fn cleanup(root: &Path) {
    if root.exists() {
        fs::remove_dir_all(root).expect("temp directory should be removable");
    }
}

fn sample_record() -> CheckpointRecord {
    CheckpointRecord {
        bucket_capacity: 4,
        global_depth: 2,
        storage_root: "/tmp/durahash-data".to_string(),
        dir_file_names: vec![
            "bucket_0.bin".to_string(),
            "bucket_1.bin".to_string(),
            "bucket_0.bin".to_string(),
            "bucket_2.bin".to_string(),
        ],
        next_bucket_id: 3,
    }
}

#[test]
fn checkpoint_record_round_trip() {
    let record = sample_record();
    let bytes = encode_checkpoint(&record);
    let decoded = decode_checkpoint(&bytes).expect("decode must succeed");
    assert_eq!(decoded, record);
}

#[test]
fn checkpoint_file_round_trip() {
    let root = test_root("meta_file");
    let path = root.join("checkpoint.meta");

    let record = sample_record();
    write_checkpoint(&path, &record).expect("write must succeed");
    assert!(!root.join("checkpoint.tmp").exists());

    let reread = read_checkpoint(&path).expect("read must succeed");
    assert_eq!(reread, record);

    cleanup(&root);
}

#[test]
fn flipped_byte_fails_the_crc() {
    let mut bytes = encode_checkpoint(&sample_record());
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0xff;

    let error = decode_checkpoint(&bytes).expect_err("must fail");
    assert!(matches!(error, StorageError::Corrupt(_)));
}

#[test]
fn bad_magic_is_rejected() {
    let mut bytes = encode_checkpoint(&sample_record());
    bytes[0] = b'x';
    bytes.truncate(bytes.len() - 4);
    codec::append_crc32(&mut bytes);

    let error = decode_checkpoint(&bytes).expect_err("must fail");
    assert!(matches!(error, StorageError::Corrupt(message) if message.contains("magic")));
}

#[test]
fn unsupported_version_is_rejected() {
    let mut bytes = encode_checkpoint(&sample_record());
    bytes[8] = 0xfe;
    bytes.truncate(bytes.len() - 4);
    codec::append_crc32(&mut bytes);

    let error = decode_checkpoint(&bytes).expect_err("must fail");
    assert!(matches!(error, StorageError::Corrupt(message) if message.contains("version")));
}

#[test]
fn truncated_record_is_rejected() {
    let bytes = encode_checkpoint(&sample_record());
    let error = decode_checkpoint(&bytes[..bytes.len() - 9]).expect_err("must fail");
    assert!(matches!(error, StorageError::Corrupt(_)));
}
