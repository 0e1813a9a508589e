//! Bit-level index packing and hex helpers shared by the prover and verifier.

/// Minimal bit width able to address every index in `[0, value)`.
///
/// This is `ceil(log2(value))`; a single-label dataset needs no bits.
pub fn binary_representation_min_bits(value: u64) -> u32 {
    if value <= 1 {
        0
    } else {
        u64::BITS - (value - 1).leading_zeros()
    }
}

/// Bytes needed to pack `count` values of `bits` bits each, or `None` if
/// that does not fit in `usize`.
pub fn packed_size(bits: u32, count: u64) -> Option<usize> {
    let bytes = (u128::from(bits) * u128::from(count) + 7) / 8;
    usize::try_from(bytes).ok()
}

/// Packs `values` LSB-first into a contiguous bit stream of `bits`-wide
/// fields.  Bits of a value above `bits` are dropped.
pub fn pack_indices(values: &[u64], bits: u32) -> Vec<u8> {
    let bits = bits.min(u64::BITS);
    // At most eight bytes per value, so the size fits whenever `values` does.
    let size = packed_size(bits, values.len() as u64).unwrap_or(values.len() * 8);
    let mut out = vec![0u8; size];
    let mut position = 0usize;
    for &value in values {
        for bit in 0..bits {
            if (value >> bit) & 1 == 1 {
                out[position / 8] |= 1 << (position % 8);
            }
            position += 1;
        }
    }
    out
}

/// Reads `count` values of `bits` bits each from a stream produced by
/// [`pack_indices`].  Returns `None` if `bytes` is too short or `bits`
/// exceeds 64.
///
/// `count` may come from untrusted input; nothing is reserved up front
/// beyond what `bytes` can actually hold.
pub fn unpack_indices(bytes: &[u8], bits: u32, count: usize) -> Option<Vec<u64>> {
    if bits > u64::BITS || bytes.len() < packed_size(bits, count as u64)? {
        return None;
    }
    let reserve = match bits {
        0 => count.min(1),
        _ => count.min(bytes.len().saturating_mul(8) / bits as usize),
    };
    let mut values = Vec::with_capacity(reserve);
    let mut position = 0usize;
    for _ in 0..count {
        let mut value = 0u64;
        for bit in 0..bits {
            if (bytes[position / 8] >> (position % 8)) & 1 == 1 {
                value |= 1 << bit;
            }
            position += 1;
        }
        values.push(value);
    }
    Some(values)
}

/// Serde adapter rendering 32-byte digests as lowercase hex.
pub mod hex_digest {
    use crate::label::Digest;
    use serde::{de, Deserialize, Deserializer, Serializer};

    /// Serialises a digest as a hex string.
    pub fn serialize<S: Serializer>(digest: &Digest, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(digest))
    }

    /// Parses a hex string into a digest.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Digest, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| de::Error::invalid_length(bytes.len(), &"32 bytes"))
    }
}

/// Serde adapter rendering byte vectors as lowercase hex.
pub mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    /// Serialises bytes as a hex string.
    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    /// Parses a hex string into bytes.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(&text).map_err(de::Error::custom)
    }
}
