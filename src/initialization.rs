//! CPU bootstrap initializer.
//!
//! Writes a dataset the prover can read: label files, then the metadata
//! record carrying the Merkle root.  Labels are BLAKE2b-256 expansions of
//! `(commitment, index)`; this is a deterministic stand-in for the
//! memory-hard label function of a production network, used to bootstrap
//! local datasets and tests.
//!
//! The metadata record is written last, so an interrupted run never looks
//! like a finished dataset.  Rewriting a dataset with a different unit or
//! file count removes the old record first, along with label files the new
//! layout no longer uses.

use blake2::digest::{consts::U32, Digest};
use blake2::Blake2b;
#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;
use std::path::Path;
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::config::{Config, ConfigError, InitOpts, ProvingParams};
use crate::guard::{check_config, ConfigMismatchError};
use crate::label::Commitment;
use crate::logging::{self, SharedLogger};
use crate::merkle::{MerkleCommitment, MerkleError};
use crate::storage::{
    remove_label_files, LabelWriter, Layout, PostMetadata, StorageError, METADATA_FILE,
};

type Blake2b256 = Blake2b<U32>;

const LABEL_DOMAIN: &[u8] = b"post_core:v1:label";
const INIT_BATCH: u64 = 1 << 14;

/// Failures raised while writing a dataset.
#[derive(Debug, Error)]
pub enum InitError {
    /// Configuration or options cannot describe a dataset.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The directory already holds a dataset initialized differently.
    #[error(transparent)]
    ConfigMismatch(#[from] ConfigMismatchError),
    /// Reading or writing the directory failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The commitment tree could not be closed.
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    /// The caller cancelled initialization.
    #[error("initialization cancelled after {written} labels")]
    Cancelled {
        /// Labels written before the cancellation was observed.
        written: u64,
    },
}

/// Derives the label at `index` for `commitment`.
///
/// Output is `ceil(bits_per_label / 8)` bytes; unused high bits of the last
/// byte are cleared.  `bits_per_label` is at most 256.
pub fn derive_label(commitment: &Commitment, index: u64, bits_per_label: u32) -> Vec<u8> {
    let mut hasher = Blake2b256::new();
    hasher.update(LABEL_DOMAIN);
    hasher.update(commitment);
    hasher.update(index.to_le_bytes());
    let digest = hasher.finalize();
    let width = crate::label::label_width(bits_per_label).min(digest.len());
    let mut label = digest[..width].to_vec();
    let spare = (width as u32 * 8).saturating_sub(bits_per_label);
    if spare > 0 {
        if let Some(last) = label.last_mut() {
            *last &= 0xff >> spare;
        }
    }
    label
}

/// Writes the label set and metadata for one identity.
pub struct Initializer {
    config: Config,
    opts: InitOpts,
    commitment: Commitment,
    params: ProvingParams,
    layout: Layout,
    logger: SharedLogger,
}

impl Initializer {
    /// Validates `config` and `opts` for a dataset bound to `commitment`.
    pub fn new(config: Config, opts: InitOpts, commitment: Commitment) -> Result<Self, InitError> {
        let params = config.params(opts.num_units)?;
        let layout = Layout::new(config.bits_per_label, params.num_labels, opts.num_files)
            .ok_or_else(|| ConfigError::invalid("num_files", "must be non-zero"))?;
        Ok(Self {
            config,
            opts,
            commitment,
            params,
            layout,
            logger: logging::noop(),
        })
    }

    /// Replaces the logger.
    pub fn set_logger(&mut self, logger: SharedLogger) {
        self.logger = logger;
    }

    /// Directory the dataset is written to.
    pub fn data_dir(&self) -> &Path {
        &self.opts.data_dir
    }

    /// Writes every label and the metadata record.
    ///
    /// A directory already initialized with identical settings is left
    /// untouched and its metadata returned.
    pub fn initialize(&self, cancel: &CancelToken) -> Result<PostMetadata, InitError> {
        let dir = self.opts.data_dir.as_path();
        if let Some(previous) = self.previous_metadata()? {
            if previous.num_units == self.opts.num_units && previous.num_files == self.opts.num_files
            {
                self.layout.check_files(dir)?;
                self.logger.info(format_args!(
                    "dataset in {} already initialized, root {}",
                    dir.display(),
                    hex::encode(previous.root)
                ));
                return Ok(previous);
            }
            self.retire(dir, &previous)?;
        }

        self.logger.info(format_args!(
            "initializing {} labels across {} files in {}",
            self.params.num_labels,
            self.opts.num_files,
            dir.display()
        ));
        let mut writer = LabelWriter::create(dir, self.layout)?;
        let mut tree = MerkleCommitment::new();
        let mut start = 0u64;
        while start < self.params.num_labels {
            if cancel.is_cancelled() {
                return Err(InitError::Cancelled {
                    written: writer.written(),
                });
            }
            let end = (start + INIT_BATCH).min(self.params.num_labels);
            for label in self.generate_batch(start, end) {
                writer.write_label(&label)?;
                tree.append_leaf(crate::label::content_hash(&label));
            }
            self.logger.debug(format_args!("wrote labels [{start}, {end})"));
            start = end;
        }
        writer.finish()?;

        let metadata = PostMetadata {
            commitment: self.commitment,
            bits_per_label: self.config.bits_per_label,
            labels_per_unit: self.config.labels_per_unit,
            num_units: self.opts.num_units,
            num_files: self.opts.num_files,
            root: tree.root()?,
        };
        metadata.save(dir)?;
        self.logger.info(format_args!(
            "initialization complete, root {}",
            hex::encode(metadata.root)
        ));
        Ok(metadata)
    }

    /// Metadata of a dataset already in the directory, checked against
    /// this initializer's identity and label settings.
    fn previous_metadata(&self) -> Result<Option<PostMetadata>, InitError> {
        let dir = self.opts.data_dir.as_path();
        if !dir.join(METADATA_FILE).exists() {
            return Ok(None);
        }
        let previous = PostMetadata::load(dir)?;
        check_config(&self.config, &self.commitment, &previous)?;
        Ok(Some(previous))
    }

    /// Drops the old metadata record, then any label files the new layout
    /// no longer uses.
    fn retire(&self, dir: &Path, previous: &PostMetadata) -> Result<(), InitError> {
        self.logger.info(format_args!(
            "rewriting dataset in {}: {} units in {} files become {} units in {} files",
            dir.display(),
            previous.num_units,
            previous.num_files,
            self.opts.num_units,
            self.opts.num_files
        ));
        PostMetadata::discard(dir)?;
        remove_label_files(dir, self.opts.num_files, previous.num_files)?;
        Ok(())
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn generate_batch(&self, start: u64, end: u64) -> Vec<Vec<u8>> {
        (start..end)
            .into_par_iter()
            .map(|index| derive_label(&self.commitment, index, self.config.bits_per_label))
            .collect()
    }

    #[cfg(target_arch = "wasm32")]
    fn generate_batch(&self, start: u64, end: u64) -> Vec<Vec<u8>> {
        (start..end)
            .map(|index| derive_label(&self.commitment, index, self.config.bits_per_label))
            .collect()
    }
}
