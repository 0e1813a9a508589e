//! Fixed-width labels: the leaf content of the commitment tree.
//!
//! A label is an opaque run of bytes produced once by the initializer and
//! read back verbatim by the prover.  Its Merkle leaf is the SHA-256 digest
//! of those bytes.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;

/// Width in bytes of a label built from a counter.
pub const LABEL_SIZE: usize = 8;

/// Size in bytes of every digest, commitment and challenge.
pub const DIGEST_SIZE: usize = 32;

/// SHA-256 output used for leaves, inner nodes and candidate hashes.
pub type Digest = [u8; DIGEST_SIZE];

/// Identity value every label of a dataset is bound to.
pub type Commitment = [u8; DIGEST_SIZE];

/// Per-proof nonce binding a proof to one request.
pub type Challenge = [u8; DIGEST_SIZE];

/// A single persisted label.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Label {
    bytes: Box<[u8]>,
}

impl Label {
    /// Builds an 8-byte label holding `cnt` in little-endian order.
    pub fn from_counter(cnt: u64) -> Self {
        Self {
            bytes: cnt.to_le_bytes().to_vec().into_boxed_slice(),
        }
    }

    /// Wraps raw label bytes read from storage.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec().into_boxed_slice(),
        }
    }

    /// Raw label bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Label width in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` for a zero-width label.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Merkle leaf for this label.
    pub fn content_hash(&self) -> Digest {
        content_hash(&self.bytes)
    }
}

/// SHA-256 of raw label bytes, shared with the batch scanners that never
/// materialise a [`Label`].
pub fn content_hash(bytes: &[u8]) -> Digest {
    Sha256::digest(bytes).into()
}

/// Number of bytes needed to store a label of `bits_per_label` bits.
pub fn label_width(bits_per_label: u32) -> usize {
    (bits_per_label as usize + 7) / 8
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = hex::encode(&self.bytes);
        f.write_str(&encoded[..encoded.len().min(5)])
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Label({})", hex::encode(&self.bytes))
    }
}

impl AsRef<[u8]> for Label {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.bytes))
    }
}

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(de::Error::custom)?;
        Ok(Self {
            bytes: bytes.into_boxed_slice(),
        })
    }
}

impl From<&[u8]> for Label {
    fn from(bytes: &[u8]) -> Self {
        Self::from_bytes(bytes)
    }
}
