//! Acceptance threshold and candidate test.
//!
//! A label at index `i` qualifies when
//!
//! ```text
//! msb64(SHA-256(commitment || challenge || i_le || label)) <= u64::MAX * k1 / num_labels
//! ```
//!
//! so that on average `k1` labels of the dataset pass.  The threshold is
//! computed with integer arithmetic only, by splitting `u64::MAX` into
//! quotient and remainder modulo `num_labels`.

use sha2::{Digest as _, Sha256};

use crate::config::ConfigError;
use crate::label::{Challenge, Commitment, Digest};

/// Threshold `floor(u64::MAX * k1 / num_labels)`, saturating at `u64::MAX`
/// once `k1 >= num_labels` (every label passes).
///
/// `num_labels * k1` must fit in 64 bits; that bound keeps `y * k1` below
/// overflow as well, because `y < num_labels`.
pub fn proving_difficulty(num_labels: u64, k1: u64) -> Result<u64, ConfigError> {
    if num_labels == 0 {
        return Err(ConfigError::invalid("num_labels", "must be non-zero"));
    }
    if num_labels.checked_mul(k1).is_none() {
        return Err(ConfigError::DifficultyOverflow { num_labels, k1 });
    }
    if k1 >= num_labels {
        return Ok(u64::MAX);
    }
    let x = u64::MAX / num_labels;
    let y = u64::MAX % num_labels;
    Ok(x * k1 + (y * k1) / num_labels)
}

/// Hash a label is judged by for one `(commitment, challenge)` pair.
pub fn candidate_hash(
    commitment: &Commitment,
    challenge: &Challenge,
    index: u64,
    label: &[u8],
) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(commitment);
    hasher.update(challenge);
    hasher.update(index.to_le_bytes());
    hasher.update(label);
    hasher.finalize().into()
}

/// Leading 64 bits of a digest read as a big-endian integer.
pub fn msb64(digest: &Digest) -> u64 {
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// Returns `true` if the candidate digest is at or below the threshold.
pub fn passes(candidate: &Digest, difficulty: u64) -> bool {
    msb64(candidate) <= difficulty
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reference(num_labels: u64, k1: u64) -> u64 {
        let wide = u128::from(u64::MAX) * u128::from(k1) / u128::from(num_labels);
        wide.min(u128::from(u64::MAX)) as u64
    }

    #[test]
    fn known_values() {
        assert_eq!(proving_difficulty(1, 1).unwrap(), u64::MAX);
        assert_eq!(proving_difficulty(2, 1).unwrap(), u64::MAX / 2);
        assert_eq!(
            proving_difficulty(4_294_967_296, 2_000_000).unwrap(),
            reference(4_294_967_296, 2_000_000)
        );
        assert_eq!(proving_difficulty(10, 0).unwrap(), 0);
        assert_eq!(proving_difficulty(4, 8).unwrap(), u64::MAX);
    }

    #[test]
    fn overflow_and_empty_dataset_are_errors() {
        assert_eq!(
            proving_difficulty(1 << 40, 1 << 30),
            Err(ConfigError::DifficultyOverflow {
                num_labels: 1 << 40,
                k1: 1 << 30
            })
        );
        assert!(matches!(
            proving_difficulty(0, 1),
            Err(ConfigError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn msb64_is_big_endian() {
        let mut digest = [0u8; 32];
        digest[7] = 1;
        digest[8] = 0xff;
        assert_eq!(msb64(&digest), 1);
        assert!(passes(&digest, 1));
        assert!(!passes(&digest, 0));
    }

    #[test]
    fn candidate_binds_every_input() {
        let base = candidate_hash(&[0; 32], &[0; 32], 5, &[1, 2, 3]);
        assert_ne!(base, candidate_hash(&[1; 32], &[0; 32], 5, &[1, 2, 3]));
        assert_ne!(base, candidate_hash(&[0; 32], &[1; 32], 5, &[1, 2, 3]));
        assert_ne!(base, candidate_hash(&[0; 32], &[0; 32], 6, &[1, 2, 3]));
        assert_ne!(base, candidate_hash(&[0; 32], &[0; 32], 5, &[1, 2, 4]));
    }

    proptest! {
        #[test]
        fn matches_wide_reference(
            (num_labels, k1) in (1u64..).prop_flat_map(|n| (Just(n), 0..=u64::MAX / n))
        ) {
            prop_assert_eq!(proving_difficulty(num_labels, k1).unwrap(), reference(num_labels, k1));
        }

        #[test]
        fn matches_wide_reference_small_datasets(num_labels in 1u64..1 << 24, k1 in 0u64..1 << 32) {
            prop_assert_eq!(proving_difficulty(num_labels, k1).unwrap(), reference(num_labels, k1));
        }
    }
}
