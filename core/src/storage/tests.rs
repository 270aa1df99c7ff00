use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::bucket::Bucket;
use crate::table::DurabilityPolicy;

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

fn sample_bucket() -> Bucket<String, u32> {
    let mut bucket = Bucket::new(2, 4);
    bucket.insert("alpha".to_string(), 1).expect("must fit");
    bucket.insert("beta".to_string(), 2).expect("must fit");
    bucket
}

#[test]
fn bucket_record_round_trip() {
    let bucket = sample_bucket();
    let bytes = encode_bucket(&bucket).expect("encode must succeed");
    let decoded: Bucket<String, u32> = decode_bucket(&bytes).expect("decode must succeed");

    assert_eq!(decoded.local_depth(), 2);
    assert_eq!(decoded.capacity(), 4);
    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded.get(&"alpha".to_string()), Some(&1));
    assert_eq!(decoded.get(&"beta".to_string()), Some(&2));
}

#[test]
fn flipped_byte_fails_the_crc() {
    let bucket = sample_bucket();
    let mut bytes = encode_bucket(&bucket).expect("encode must succeed");
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0xff;

    let error = decode_bucket::<String, u32>(&bytes).expect_err("must fail");
    assert!(matches!(error, StorageError::Corrupt(_)));
}

#[test]
fn bad_magic_is_rejected() {
    let bucket = sample_bucket();
    let mut bytes = encode_bucket(&bucket).expect("encode must succeed");
    bytes[0] = b'x';
    // Re-seal so the magic check is reached, not the CRC check.
    bytes.truncate(bytes.len() - 4);
    codec::append_crc32(&mut bytes);

    let error = decode_bucket::<String, u32>(&bytes).expect_err("must fail");
    assert!(matches!(error, StorageError::Corrupt(message) if message.contains("magic")));
}

#[test]
fn unsupported_version_is_rejected() {
    let bucket = sample_bucket();
    let mut bytes = encode_bucket(&bucket).expect("encode must succeed");
    bytes[8] = 0xfe;
    bytes.truncate(bytes.len() - 4);
    codec::append_crc32(&mut bytes);

    let error = decode_bucket::<String, u32>(&bytes).expect_err("must fail");
    assert!(matches!(error, StorageError::Corrupt(message) if message.contains("version")));
}

#[test]
fn truncated_record_is_rejected() {
    let error = decode_bucket::<String, u32>(&[1, 2]).expect_err("must fail");
    assert!(matches!(error, StorageError::Corrupt(_)));
}

#[test]
fn write_through_create_persists_the_empty_bucket() {
    let root = test_root("create_wt");

    let stored: StoredBucket<String, u32> = StoredBucket::create(
        &root,
        "bucket_0.bin".to_string(),
        1,
        4,
        DurabilityPolicy::WriteThrough,
    )
    .expect("create must succeed");
    assert!(!stored.dirty);
    assert!(root.join("bucket_0.bin").exists());
    assert!(!root.join("bucket_0.tmp").exists());

    let reopened: StoredBucket<String, u32> =
        StoredBucket::open(&root, "bucket_0.bin".to_string()).expect("open must succeed");
    assert_eq!(reopened.bucket.local_depth(), 1);
    assert_eq!(reopened.bucket.capacity(), 4);
    assert!(reopened.bucket.is_empty());

    cleanup(&root);
}

#[test]
fn checkpoint_policy_defers_the_write_until_flush() {
    let root = test_root("create_ckpt");
    fs::create_dir_all(&root).expect("temp directory must be creatable");

    let mut stored: StoredBucket<String, u32> = StoredBucket::create(
        &root,
        "bucket_0.bin".to_string(),
        0,
        4,
        DurabilityPolicy::OnCheckpoint,
    )
    .expect("create must succeed");
    assert!(stored.dirty);
    assert!(!root.join("bucket_0.bin").exists());

    stored.flush(&root).expect("flush must succeed");
    assert!(!stored.dirty);
    assert!(root.join("bucket_0.bin").exists());

    cleanup(&root);
}

#[test]
fn atomic_overwrite_reads_back_the_latest_state() {
    let root = test_root("overwrite");

    let mut stored: StoredBucket<String, u32> = StoredBucket::create(
        &root,
        "bucket_0.bin".to_string(),
        0,
        4,
        DurabilityPolicy::WriteThrough,
    )
    .expect("create must succeed");

    stored
        .bucket
        .insert("alpha".to_string(), 1)
        .expect("must fit");
    stored
        .mark_mutated(&root, DurabilityPolicy::WriteThrough)
        .expect("persist must succeed");
    stored
        .bucket
        .insert("beta".to_string(), 2)
        .expect("must fit");
    stored
        .mark_mutated(&root, DurabilityPolicy::WriteThrough)
        .expect("persist must succeed");

    let reopened: StoredBucket<String, u32> =
        StoredBucket::open(&root, "bucket_0.bin".to_string()).expect("open must succeed");
    assert_eq!(reopened.bucket.len(), 2);
    assert_eq!(reopened.bucket.get(&"beta".to_string()), Some(&2));
    assert!(!root.join("bucket_0.tmp").exists());

    cleanup(&root);
}

#[test]
fn opening_a_missing_file_is_an_io_error() {
    let root = test_root("missing");
    fs::create_dir_all(&root).expect("temp directory must be creatable");

    let error = StoredBucket::<String, u32>::open(&root, "bucket_9.bin".to_string())
        .expect_err("must fail");
    assert!(matches!(error, StorageError::Io(_)));

    cleanup(&root);
}
