//! Proof container, its metadata, and assembly from selected openings.
//!
//! A proof carries the selected indices bit-packed LSB-first at
//! `ceil(log2(num_labels))` bits each, followed by one opening per index in
//! the same ascending order.  Both records serialise to JSON with byte
//! fields rendered as hex.

use serde::{Deserialize, Serialize};

use crate::config::{Config, ConfigError, ProvingParams};
use crate::label::{Challenge, Commitment, Label};
use crate::merkle::MerklePath;
use crate::shared::{pack_indices, unpack_indices};

/// Revealed label and its authentication path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafOpening {
    /// Label bytes stored at the index.
    pub label: Label,
    /// Siblings from the leaf up to the root.
    pub path: MerklePath,
}

/// Non-interactive proof that `k2` qualifying labels are held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    /// Ascending indices, bit-packed.
    #[serde(with = "crate::shared::hex_bytes")]
    pub indices: Vec<u8>,
    /// One opening per packed index, in index order.
    pub openings: Vec<LeafOpening>,
}

impl Proof {
    /// Unpacks the first `count` indices at `bits` bits each.
    pub fn unpack_indices(&self, bits: u32, count: usize) -> Option<Vec<u64>> {
        unpack_indices(&self.indices, bits, count)
    }

    /// JSON encoding of the proof.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses a proof from JSON.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Configuration a proof was produced under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofMetadata {
    /// Identity the dataset is bound to.
    #[serde(with = "crate::shared::hex_digest")]
    pub commitment: Commitment,
    /// Challenge the proof answers.
    #[serde(with = "crate::shared::hex_digest")]
    pub challenge: Challenge,
    /// Label width in bits.
    pub bits_per_label: u32,
    /// Labels per space unit.
    pub labels_per_unit: u64,
    /// Dataset size in units.
    pub num_units: u32,
    /// Difficulty knob.
    pub k1: u64,
    /// Number of revealed indices.
    pub k2: u64,
}

impl ProofMetadata {
    /// Metadata mirroring `config` for a dataset of `num_units` units.
    pub fn new(config: &Config, num_units: u32, commitment: Commitment, challenge: Challenge) -> Self {
        Self {
            commitment,
            challenge,
            bits_per_label: config.bits_per_label,
            labels_per_unit: config.labels_per_unit,
            num_units,
            k1: config.k1,
            k2: config.k2,
        }
    }

    /// Re-derives the proving parameters the metadata implies.
    pub fn params(&self) -> Result<ProvingParams, ConfigError> {
        ProvingParams::new(
            self.bits_per_label,
            self.labels_per_unit,
            self.num_units,
            self.k1,
            self.k2,
        )
    }

    /// JSON encoding of the metadata.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses metadata from JSON.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Builds a proof from `(index, opening)` pairs in any order.
pub fn assemble(params: &ProvingParams, mut selected: Vec<(u64, LeafOpening)>) -> Proof {
    selected.sort_unstable_by_key(|(index, _)| *index);
    let indices: Vec<u64> = selected.iter().map(|(index, _)| *index).collect();
    Proof {
        indices: pack_indices(&indices, params.index_bits),
        openings: selected.into_iter().map(|(_, opening)| opening).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkle::PathNode;
    use crate::shared::packed_size;

    fn params() -> ProvingParams {
        ProvingParams::new(64, 4096, 3, 200, 3).unwrap()
    }

    fn opening(counter: u64) -> LeafOpening {
        LeafOpening {
            label: Label::from_counter(counter),
            path: vec![PathNode {
                sibling: [counter as u8; 32],
                left: counter % 2 == 1,
            }],
        }
    }

    #[test]
    fn assembly_sorts_and_packs() {
        let params = params();
        let proof = assemble(
            &params,
            vec![(900, opening(900)), (7, opening(7)), (12000, opening(12000))],
        );
        assert_eq!(Some(proof.indices.len()), packed_size(14, 3));
        assert_eq!(proof.unpack_indices(14, 3), Some(vec![7, 900, 12000]));
        assert_eq!(proof.openings[0], opening(7));
        assert_eq!(proof.openings[2], opening(12000));
    }

    #[test]
    fn metadata_echoes_config() {
        let config = Config {
            labels_per_unit: 4096,
            ..Config::default()
        };
        let metadata = ProofMetadata::new(&config, 3, [1u8; 32], [2u8; 32]);
        assert_eq!(metadata.bits_per_label, config.bits_per_label);
        assert_eq!(metadata.labels_per_unit, 4096);
        assert_eq!(metadata.k1, config.k1);
        assert_eq!(metadata.k2, config.k2);
        assert_eq!(metadata.params().unwrap().num_labels, 3 * 4096);
    }

    #[test]
    fn json_uses_hex_fields() {
        let proof = assemble(&params(), vec![(1, opening(1))]);
        let text = proof.to_json().unwrap();
        assert!(text.contains("\"label\":\"0100000000000000\""), "{text}");
        assert_eq!(Proof::from_json(&text).unwrap(), proof);

        let metadata = ProofMetadata::new(&Config::default(), 1, [0xab; 32], [0xcd; 32]);
        let text = metadata.to_json().unwrap();
        assert!(text.contains(&"ab".repeat(32)));
        assert_eq!(ProofMetadata::from_json(&text).unwrap(), metadata);
        assert!(ProofMetadata::from_json(&text.replace(&"ab".repeat(32), "abcd")).is_err());
    }
}
