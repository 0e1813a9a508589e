//! Configuration records and the parameters derived from them.
//!
//! [`Config`] is what operators set; [`InitOpts`] describes one dataset on
//! disk.  Everything the scan and the verifier actually compute with lives in
//! [`ProvingParams`], which is built once through checked arithmetic so that
//! an impossible configuration is rejected before any label is read.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::difficulty::proving_difficulty;
use crate::label::label_width;
use crate::shared::binary_representation_min_bits;

/// Default label width in bits (8-byte labels).
pub const DEFAULT_BITS_PER_LABEL: u32 = 64;
/// Default number of labels per space unit.
pub const DEFAULT_LABELS_PER_UNIT: u64 = 1 << 20;
/// Widest supported label, in bits.
pub const MAX_BITS_PER_LABEL: u32 = 256;
/// Default expected number of qualifying labels per scan.
pub const DEFAULT_K1: u64 = 200;
/// Default number of indices revealed by a proof.
pub const DEFAULT_K2: u64 = 40;

/// Protocol configuration shared by initializer, prover and verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Width of every persisted label, in bits.
    pub bits_per_label: u32,
    /// Labels contributed by one space unit.
    pub labels_per_unit: u64,
    /// Smallest dataset, in units, the network accepts.
    pub min_num_units: u32,
    /// Largest dataset, in units, the network accepts.
    pub max_num_units: u32,
    /// Difficulty knob: expected number of labels passing the threshold.
    pub k1: u64,
    /// Number of qualifying indices a proof must reveal.
    pub k2: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bits_per_label: DEFAULT_BITS_PER_LABEL,
            labels_per_unit: DEFAULT_LABELS_PER_UNIT,
            min_num_units: 1,
            max_num_units: 10,
            k1: DEFAULT_K1,
            k2: DEFAULT_K2,
        }
    }
}

impl Config {
    /// Checks the parameters that do not depend on a dataset size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_bits_per_label(self.bits_per_label)?;
        if self.min_num_units == 0 {
            return Err(ConfigError::invalid("min_num_units", "must be non-zero"));
        }
        if self.min_num_units > self.max_num_units {
            return Err(ConfigError::invalid(
                "max_num_units",
                format!(
                    "{} is below min_num_units {}",
                    self.max_num_units, self.min_num_units
                ),
            ));
        }
        Ok(())
    }

    /// Derives proving parameters for a dataset of `num_units` units.
    pub fn params(&self, num_units: u32) -> Result<ProvingParams, ConfigError> {
        self.validate()?;
        if num_units < self.min_num_units || num_units > self.max_num_units {
            return Err(ConfigError::invalid(
                "num_units",
                format!(
                    "{num_units} is outside [{}, {}]",
                    self.min_num_units, self.max_num_units
                ),
            ));
        }
        ProvingParams::new(
            self.bits_per_label,
            self.labels_per_unit,
            num_units,
            self.k1,
            self.k2,
        )
    }
}

/// Options describing one dataset on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitOpts {
    /// Directory holding label files and metadata.
    pub data_dir: PathBuf,
    /// Dataset size in space units.
    pub num_units: u32,
    /// Number of files the label range is split across.
    pub num_files: u32,
}

impl Default for InitOpts {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("post_data"),
            num_units: 1,
            num_files: 1,
        }
    }
}

/// Validated, derived parameters of one proving or verification session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvingParams {
    /// Width of a label in bits.
    pub bits_per_label: u32,
    /// Width of a label in bytes.
    pub label_width: usize,
    /// Total number of labels, `labels_per_unit * num_units`.
    pub num_labels: u64,
    /// Acceptance threshold for candidate hashes.
    pub difficulty: u64,
    /// Bit width of one packed index.
    pub index_bits: u32,
    /// Difficulty knob the threshold was derived from.
    pub k1: u64,
    /// Number of indices a proof reveals.
    pub k2: u64,
}

impl ProvingParams {
    /// Builds parameters with checked arithmetic.
    pub fn new(
        bits_per_label: u32,
        labels_per_unit: u64,
        num_units: u32,
        k1: u64,
        k2: u64,
    ) -> Result<Self, ConfigError> {
        validate_bits_per_label(bits_per_label)?;
        if labels_per_unit == 0 {
            return Err(ConfigError::invalid("labels_per_unit", "must be non-zero"));
        }
        if num_units == 0 {
            return Err(ConfigError::invalid("num_units", "must be non-zero"));
        }
        if k1 == 0 {
            return Err(ConfigError::invalid("k1", "must be non-zero"));
        }
        if k2 == 0 {
            return Err(ConfigError::invalid("k2", "must be non-zero"));
        }
        let num_labels = labels_per_unit.checked_mul(u64::from(num_units)).ok_or(
            ConfigError::NumLabelsOverflow {
                labels_per_unit,
                num_units,
            },
        )?;
        if k2 > num_labels {
            return Err(ConfigError::invalid(
                "k2",
                format!("{k2} distinct indices cannot be drawn from {num_labels} labels"),
            ));
        }
        let difficulty = proving_difficulty(num_labels, k1)?;
        Ok(Self {
            bits_per_label,
            label_width: label_width(bits_per_label),
            num_labels,
            difficulty,
            index_bits: binary_representation_min_bits(num_labels),
            k1,
            k2,
        })
    }
}

fn validate_bits_per_label(bits_per_label: u32) -> Result<(), ConfigError> {
    if bits_per_label == 0 || bits_per_label > MAX_BITS_PER_LABEL {
        return Err(ConfigError::invalid(
            "bits_per_label",
            format!("{bits_per_label} is outside [1, {MAX_BITS_PER_LABEL}]"),
        ));
    }
    Ok(())
}

/// Configuration that can never produce or verify a proof.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The dataset size does not fit in 64 bits.
    #[error("labels_per_unit ({labels_per_unit}) * num_units ({num_units}) overflows u64")]
    NumLabelsOverflow {
        /// Configured labels per unit.
        labels_per_unit: u64,
        /// Configured number of units.
        num_units: u32,
    },
    /// `num_labels * k1` does not fit in 64 bits; k1 is too large.
    #[error("num_labels ({num_labels}) * k1 ({k1}) overflows u64")]
    DifficultyOverflow {
        /// Total label count.
        num_labels: u64,
        /// Configured k1.
        k1: u64,
    },
    /// A single parameter is out of its valid range.
    #[error("invalid {param}: {reason}")]
    InvalidParameter {
        /// Parameter name.
        param: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(param: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            param,
            reason: reason.into(),
        }
    }
}
