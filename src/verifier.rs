//! Stateless proof verification.
//!
//! Verification needs only the proof, the metadata it claims, and the root
//! published at initialization.  It never touches label storage.

use thiserror::Error;

use crate::config::ConfigError;
use crate::difficulty::{candidate_hash, msb64, passes};
use crate::label::Digest;
use crate::merkle::verify_inclusion;
use crate::proof::{Proof, ProofMetadata};
use crate::shared::{pack_indices, packed_size};

/// Why a proof was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationFailure {
    /// The metadata describes an impossible configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The packed index field has the wrong length.
    #[error("packed indices hold {actual} bytes, expected {expected}")]
    IndicesLength {
        /// `ceil(k2 * index_bits / 8)`.
        expected: usize,
        /// Bytes supplied.
        actual: usize,
    },
    /// Padding bits after the last packed index are set.
    #[error("packed indices carry non-zero padding bits")]
    NonCanonicalIndices,
    /// The index is not below the dataset size.
    #[error("index lies outside a dataset of {num_labels} labels")]
    IndexOutOfRange {
        /// Dataset size.
        num_labels: u64,
    },
    /// The index does not strictly follow its predecessor.
    #[error("index does not follow previous index {previous}")]
    NotAscending {
        /// Preceding index.
        previous: u64,
    },
    /// Number of openings differs from `k2`.
    #[error("proof carries {actual} openings, expected {expected}")]
    OpeningCount {
        /// `k2`.
        expected: u64,
        /// Openings supplied.
        actual: u64,
    },
    /// The revealed label has the wrong width.
    #[error("label holds {actual} bytes, expected {expected}")]
    LabelWidth {
        /// Width implied by `bits_per_label`.
        expected: usize,
        /// Bytes supplied.
        actual: usize,
    },
    /// The candidate hash is above the threshold.
    #[error("candidate value {value:#018x} exceeds difficulty {difficulty:#018x}")]
    AboveDifficulty {
        /// Leading 64 bits of the candidate hash.
        value: u64,
        /// Threshold.
        difficulty: u64,
    },
    /// The path does not open the label at this index under the root.
    #[error("merkle path does not lead to the committed root")]
    InvalidPath,
}

/// A rejected proof, with the offending index when one is to blame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("proof rejected{}: {reason}", located(index))]
pub struct VerificationError {
    /// Index whose check failed, if the failure is index specific.
    pub index: Option<u64>,
    /// What failed.
    #[source]
    pub reason: VerificationFailure,
}

fn located(index: &Option<u64>) -> String {
    index.map(|index| format!(" at index {index}")).unwrap_or_default()
}

fn reject(index: Option<u64>, reason: impl Into<VerificationFailure>) -> VerificationError {
    VerificationError {
        index,
        reason: reason.into(),
    }
}

/// Checks `proof` against `metadata` and the published `root`.
///
/// Returns the first failure found, in index order.
pub fn verify(proof: &Proof, metadata: &ProofMetadata, root: &Digest) -> Result<(), VerificationError> {
    let params = metadata.params().map_err(|err| reject(None, err))?;
    let unpackable = || {
        reject(
            None,
            ConfigError::invalid(
                "k2",
                format!(
                    "{} indices of {} bits do not fit in memory",
                    params.k2, params.index_bits
                ),
            ),
        )
    };
    let k2 = usize::try_from(params.k2).map_err(|_| unpackable())?;
    let expected = packed_size(params.index_bits, params.k2).ok_or_else(unpackable)?;
    if proof.indices.len() != expected {
        return Err(reject(
            None,
            VerificationFailure::IndicesLength {
                expected,
                actual: proof.indices.len(),
            },
        ));
    }
    let indices = proof
        .unpack_indices(params.index_bits, k2)
        .ok_or_else(|| {
            reject(
                None,
                VerificationFailure::IndicesLength {
                    expected,
                    actual: proof.indices.len(),
                },
            )
        })?;
    if pack_indices(&indices, params.index_bits) != proof.indices {
        return Err(reject(None, VerificationFailure::NonCanonicalIndices));
    }

    let mut previous: Option<u64> = None;
    for &index in &indices {
        if index >= params.num_labels {
            return Err(reject(
                Some(index),
                VerificationFailure::IndexOutOfRange {
                    num_labels: params.num_labels,
                },
            ));
        }
        if let Some(previous) = previous.filter(|&previous| index <= previous) {
            return Err(reject(Some(index), VerificationFailure::NotAscending { previous }));
        }
        previous = Some(index);
    }

    if proof.openings.len() != k2 {
        return Err(reject(
            None,
            VerificationFailure::OpeningCount {
                expected: params.k2,
                actual: proof.openings.len() as u64,
            },
        ));
    }

    for (&index, opening) in indices.iter().zip(&proof.openings) {
        let label = opening.label.as_bytes();
        if label.len() != params.label_width {
            return Err(reject(
                Some(index),
                VerificationFailure::LabelWidth {
                    expected: params.label_width,
                    actual: label.len(),
                },
            ));
        }
        let candidate = candidate_hash(&metadata.commitment, &metadata.challenge, index, label);
        if !passes(&candidate, params.difficulty) {
            return Err(reject(
                Some(index),
                VerificationFailure::AboveDifficulty {
                    value: msb64(&candidate),
                    difficulty: params.difficulty,
                },
            ));
        }
        if !verify_inclusion(
            root,
            params.num_labels,
            index,
            &opening.label.content_hash(),
            &opening.path,
        ) {
            return Err(reject(Some(index), VerificationFailure::InvalidPath));
        }
    }
    Ok(())
}
