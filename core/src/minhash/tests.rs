use std::collections::HashSet;

use super::*;

fn int_set(range: std::ops::Range<u64>) -> HashSet<u64> {
    range.collect()
}

#[test]
fn rejects_zero_hash_functions() {
    let error = MinHash::new(0, 42).expect_err("must fail");
    assert!(matches!(error, MinHashError::InvalidConfig(_)));
}

#[test]
fn same_seed_is_reproducible() {
    let first = MinHash::new(64, 42).expect("must build");
    let second = MinHash::new(64, 42).expect("must build");
    let set = int_set(0..50);

    assert_eq!(
        first.signature(set.iter().copied()),
        second.signature(set.iter().copied())
    );
}

#[test]
fn different_seeds_give_different_signatures() {
    let first = MinHash::new(64, 1).expect("must build");
    let second = MinHash::new(64, 2).expect("must build");
    let set = int_set(0..50);

    assert_ne!(
        first.signature(set.iter().copied()),
        second.signature(set.iter().copied())
    );
}

#[test]
fn empty_set_signature_is_all_sentinel() {
    let minhash = MinHash::new(16, 7).expect("must build");
    let signature = minhash.signature(std::iter::empty());

    assert_eq!(signature.len(), 16);
    assert!(signature.iter().all(|&v| v == MERSENNE_PRIME as u32));
}

#[test]
fn identical_sets_estimate_one() {
    let minhash = MinHash::new(128, 7).expect("must build");
    let set = int_set(0..100);

    let left = minhash.signature(set.iter().copied());
    let right = minhash.signature(set.iter().copied());
    let estimate = estimate_jaccard(&left, &right).expect("must estimate");
    assert_eq!(estimate, 1.0);
}

#[test]
fn disjoint_sets_estimate_near_zero() {
    let minhash = MinHash::new(128, 7).expect("must build");
    let left = minhash.signature(int_set(0..200).into_iter());
    let right = minhash.signature(int_set(10_000..10_200).into_iter());

    let estimate = estimate_jaccard(&left, &right).expect("must estimate");
    assert!(estimate < 0.1, "estimate {estimate} too high for disjoint sets");
}

#[test]
fn overlapping_sets_estimate_their_jaccard_similarity() {
    // |A ∩ B| = 100, |A ∪ B| = 300: true similarity 1/3.
    let minhash = MinHash::new(256, 7).expect("must build");
    let left = minhash.signature(int_set(0..200).into_iter());
    let right = minhash.signature(int_set(100..300).into_iter());

    let estimate = estimate_jaccard(&left, &right).expect("must estimate");
    assert!(
        (estimate - 1.0 / 3.0).abs() < 0.15,
        "estimate {estimate} too far from 1/3"
    );
}

#[test]
fn mismatched_signature_lengths_are_rejected() {
    let error = estimate_jaccard(&[1, 2, 3], &[1, 2]).expect_err("must fail");
    assert!(matches!(
        error,
        MinHashError::SignatureLengthMismatch { left: 3, right: 2 }
    ));
}

#[test]
fn empty_signatures_are_rejected() {
    let error = estimate_jaccard(&[], &[]).expect_err("must fail");
    assert!(matches!(error, MinHashError::InvalidConfig(_)));
}

#[test]
fn hash_token_is_stable() {
    assert_eq!(hash_token("alpha"), hash_token("alpha"));
    assert_ne!(hash_token("alpha"), hash_token("beta"));
}

#[test]
fn shingles_are_distinct_character_windows() {
    let set = shingles("abcab", 2).expect("must shingle");
    // Windows ab, bc, ca, ab: three distinct.
    assert_eq!(set.len(), 3);
}

#[test]
fn shingles_reject_zero_length() {
    let error = shingles("abc", 0).expect_err("must fail");
    assert!(matches!(error, MinHashError::InvalidConfig(_)));
}

#[test]
fn text_shorter_than_the_window_has_no_shingles() {
    let set = shingles("ab", 3).expect("must shingle");
    assert!(set.is_empty());
}

#[test]
fn shingled_texts_rank_by_similarity() {
    let minhash = MinHash::new(128, 99).expect("must build");
    let base = shingles("the quick brown fox jumps over the lazy dog", 3).expect("must shingle");
    let near = shingles("the quick brown fox jumped over the lazy dog", 3).expect("must shingle");
    let far = shingles("entirely unrelated sentence content here", 3).expect("must shingle");

    let base_sig = minhash.signature(base.iter().copied());
    let near_sig = minhash.signature(near.iter().copied());
    let far_sig = minhash.signature(far.iter().copied());

    let near_estimate = estimate_jaccard(&base_sig, &near_sig).expect("must estimate");
    let far_estimate = estimate_jaccard(&base_sig, &far_sig).expect("must estimate");
    assert!(
        near_estimate > far_estimate,
        "near {near_estimate} must beat far {far_estimate}"
    );
}
