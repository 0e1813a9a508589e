//! Consistency check between a prover's settings and the persisted dataset.

use std::fmt;
use thiserror::Error;

use crate::config::Config;
use crate::label::Commitment;
use crate::storage::PostMetadata;

/// Parameter whose runtime value differs from the initialized dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigParam {
    /// Identity commitment.
    Commitment,
    /// Label width in bits.
    BitsPerLabel,
    /// Labels per space unit.
    LabelsPerUnit,
}

impl ConfigParam {
    /// Field name as recorded in configuration files.
    pub fn name(self) -> &'static str {
        match self {
            Self::Commitment => "Commitment",
            Self::BitsPerLabel => "BitsPerLabel",
            Self::LabelsPerUnit => "LabelsPerUnit",
        }
    }
}

impl fmt::Display for ConfigParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The dataset was initialized under a different value of `param`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{param}` mismatch: dataset was initialized with {expected}, prover supplied {actual}")]
pub struct ConfigMismatchError {
    /// Mismatched parameter.
    pub param: ConfigParam,
    /// Value recorded at initialization.
    pub expected: String,
    /// Value supplied to the prover.
    pub actual: String,
}

/// Compares the prover's commitment and configuration against `metadata`,
/// reporting the first mismatch in the order commitment, label width,
/// labels per unit.
pub fn check_config(
    config: &Config,
    commitment: &Commitment,
    metadata: &PostMetadata,
) -> Result<(), ConfigMismatchError> {
    if commitment != &metadata.commitment {
        return Err(ConfigMismatchError {
            param: ConfigParam::Commitment,
            expected: hex::encode(metadata.commitment),
            actual: hex::encode(commitment),
        });
    }
    if config.bits_per_label != metadata.bits_per_label {
        return Err(mismatch(
            ConfigParam::BitsPerLabel,
            metadata.bits_per_label,
            config.bits_per_label,
        ));
    }
    if config.labels_per_unit != metadata.labels_per_unit {
        return Err(mismatch(
            ConfigParam::LabelsPerUnit,
            metadata.labels_per_unit,
            config.labels_per_unit,
        ));
    }
    Ok(())
}

fn mismatch(param: ConfigParam, expected: impl ToString, actual: impl ToString) -> ConfigMismatchError {
    ConfigMismatchError {
        param,
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> PostMetadata {
        PostMetadata {
            commitment: [3u8; 32],
            bits_per_label: 64,
            labels_per_unit: 4096,
            num_units: 1,
            num_files: 1,
            root: [0u8; 32],
        }
    }

    fn config() -> Config {
        Config {
            labels_per_unit: 4096,
            ..Config::default()
        }
    }

    #[test]
    fn matching_settings_pass() {
        assert_eq!(check_config(&config(), &[3u8; 32], &metadata()), Ok(()));
    }

    #[test]
    fn unrelated_fields_are_ignored() {
        let mut cfg = config();
        cfg.k1 += 1;
        cfg.k2 += 1;
        cfg.max_num_units += 5;
        assert_eq!(check_config(&cfg, &[3u8; 32], &metadata()), Ok(()));
    }

    #[test]
    fn each_mismatch_is_named() {
        let err = check_config(&config(), &[4u8; 32], &metadata()).unwrap_err();
        assert_eq!(err.param, ConfigParam::Commitment);
        assert_eq!(err.expected, hex::encode([3u8; 32]));

        let mut cfg = config();
        cfg.bits_per_label += 1;
        let err = check_config(&cfg, &[3u8; 32], &metadata()).unwrap_err();
        assert_eq!(err.param, ConfigParam::BitsPerLabel);
        assert_eq!((err.expected.as_str(), err.actual.as_str()), ("64", "65"));

        let mut cfg = config();
        cfg.labels_per_unit += 1;
        let err = check_config(&cfg, &[3u8; 32], &metadata()).unwrap_err();
        assert_eq!(err.param, ConfigParam::LabelsPerUnit);
        assert!(err.to_string().contains("`LabelsPerUnit` mismatch"));
    }
}
