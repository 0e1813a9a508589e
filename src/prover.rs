//! Proof generation over a persisted dataset.
//!
//! A [`Prover`] is bound to one dataset directory.  Construction loads the
//! metadata record, rejects a configuration or commitment that differs from
//! the one the dataset was initialized with, and validates the derived
//! parameters, all before any label is read.  Each proof then takes two
//! passes over the labels: the index scan, and a Merkle pass that rebuilds
//! the root while collecting paths for the selected indices.

#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::config::{Config, ConfigError, ProvingParams};
use crate::guard::{check_config, ConfigMismatchError};
use crate::label::{Challenge, Commitment, Digest, Label};
use crate::logging::{self, SharedLogger};
use crate::merkle::{Committed, MerkleCommitment, MerkleError};
use crate::proof::{assemble, LeafOpening, Proof, ProofMetadata};
use crate::selection::{select_indices, visit_labels, wave_width, ScanJob};
use crate::storage::{LabelReader, Layout, PostMetadata, StorageError};

/// Default number of labels per scan batch.
pub const DEFAULT_BATCH_LABELS: u64 = 1 << 16;

/// Tuning knobs that never affect the resulting proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProverOpts {
    /// Labels scanned by one worker per batch; also sizes Merkle chunks.
    pub batch_labels: u64,
}

impl Default for ProverOpts {
    fn default() -> Self {
        Self {
            batch_labels: DEFAULT_BATCH_LABELS,
        }
    }
}

/// Failures raised while constructing a prover or generating a proof.
#[derive(Debug, Error)]
pub enum ProvingError {
    /// The dataset was initialized under different settings.
    #[error(transparent)]
    ConfigMismatch(#[from] ConfigMismatchError),
    /// The configuration cannot produce a proof.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Fewer than `k2` labels pass the difficulty threshold.
    #[error("only {found} of {required} required indices qualify among {num_labels} labels")]
    InsufficientQualifyingIndices {
        /// Qualifying indices found.
        found: u64,
        /// Indices a proof needs.
        required: u64,
        /// Labels scanned.
        num_labels: u64,
    },
    /// Reading the dataset failed.
    #[error("{context}: {source}")]
    Io {
        /// File and label range being read.
        context: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The metadata record or the label files do not describe a dataset.
    #[error(transparent)]
    Metadata(StorageError),
    /// The labels on disk no longer hash to the persisted root.
    #[error(
        "labels hash to root {}, but the dataset was initialized with root {}",
        hex::encode(actual),
        hex::encode(expected)
    )]
    RootMismatch {
        /// Root recorded at initialization.
        expected: Digest,
        /// Root rebuilt from the labels.
        actual: Digest,
    },
    /// The Merkle pass could not be completed.
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    /// The caller cancelled proof generation.
    #[error("proof generation cancelled")]
    Cancelled,
}

impl From<StorageError> for ProvingError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io { context, source } => Self::Io { context, source },
            other => Self::Metadata(other),
        }
    }
}

/// Produces proofs for one initialized dataset.
pub struct Prover {
    config: Config,
    data_dir: PathBuf,
    commitment: Commitment,
    metadata: PostMetadata,
    params: ProvingParams,
    layout: Layout,
    opts: ProverOpts,
    logger: SharedLogger,
}

impl Prover {
    /// Binds a prover to the dataset in `data_dir`.
    pub fn new(
        config: Config,
        data_dir: impl Into<PathBuf>,
        commitment: Commitment,
    ) -> Result<Self, ProvingError> {
        let data_dir = data_dir.into();
        let metadata = PostMetadata::load(&data_dir)?;
        check_config(&config, &commitment, &metadata)?;
        let params = config.params(metadata.num_units)?;
        let layout = Layout::from_metadata(&data_dir, &metadata)?;
        layout.check_files(&data_dir)?;
        Ok(Self {
            config,
            data_dir,
            commitment,
            metadata,
            params,
            layout,
            opts: ProverOpts::default(),
            logger: logging::noop(),
        })
    }

    /// Replaces the tuning options.
    pub fn with_opts(mut self, opts: ProverOpts) -> Self {
        self.opts = opts;
        self
    }

    /// Replaces the logger.
    pub fn set_logger(&mut self, logger: SharedLogger) {
        self.logger = logger;
    }

    /// Metadata of the bound dataset.
    pub fn metadata(&self) -> &PostMetadata {
        &self.metadata
    }

    /// Parameters derived for the bound dataset.
    pub fn params(&self) -> &ProvingParams {
        &self.params
    }

    /// Dataset directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Generates a proof for `challenge`.
    pub fn generate_proof(&self, challenge: Challenge) -> Result<(Proof, ProofMetadata), ProvingError> {
        self.generate_proof_with_cancel(challenge, &CancelToken::new())
    }

    /// Generates a proof for `challenge`, stopping early if `cancel` fires.
    pub fn generate_proof_with_cancel(
        &self,
        challenge: Challenge,
        cancel: &CancelToken,
    ) -> Result<(Proof, ProofMetadata), ProvingError> {
        self.logger.info(format_args!(
            "proving {} labels for challenge {}",
            self.params.num_labels,
            hex::encode(challenge)
        ));
        let job = ScanJob {
            dir: &self.data_dir,
            layout: self.layout,
            params: &self.params,
            commitment: &self.commitment,
            challenge: &challenge,
        };
        let selected = select_indices(job, self.opts.batch_labels, cancel, self.logger.as_ref())?;
        self.logger.info(format_args!(
            "selected {} indices, last at {}",
            selected.len(),
            selected.last().copied().unwrap_or_default()
        ));

        let (mut committed, labels) = self.open_targets(&selected, cancel)?;
        if committed.root != self.metadata.root {
            return Err(ProvingError::RootMismatch {
                expected: self.metadata.root,
                actual: committed.root,
            });
        }
        let leaf_count = committed.leaf_count;
        let openings = labels
            .into_iter()
            .map(|(index, label)| -> Result<(u64, LeafOpening), ProvingError> {
                let path = committed
                    .paths
                    .remove(&index)
                    .ok_or(MerkleError::TargetOutOfRange { index, leaf_count })?;
                Ok((index, LeafOpening { label, path }))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let proof = assemble(&self.params, openings);
        let metadata = ProofMetadata::new(
            &self.config,
            self.metadata.num_units,
            self.commitment,
            challenge,
        );
        self.logger.info(format_args!(
            "proof ready: {} openings, {} packed index bytes",
            proof.openings.len(),
            proof.indices.len()
        ));
        Ok((proof, metadata))
    }

    /// Rebuilds the tree over every label, collecting paths and label bytes
    /// for `targets`.
    ///
    /// Chunks are built one wave at a time, one chunk per worker, and each
    /// wave is absorbed before the next starts, so at most a wave of partial
    /// trees is held at once.
    fn open_targets(
        &self,
        targets: &[u64],
        cancel: &CancelToken,
    ) -> Result<(Committed, BTreeMap<u64, Label>), ProvingError> {
        let num_labels = self.params.num_labels;
        let chunk_len = self
            .opts
            .batch_labels
            .max(1)
            .checked_next_power_of_two()
            .unwrap_or(1 << 63);
        let wave = wave_width();
        let build = |start: u64| {
            let end = start.saturating_add(chunk_len).min(num_labels);
            self.build_chunk(start, end, targets, cancel)
        };

        let mut tree = MerkleCommitment::with_targets(targets);
        let mut labels = BTreeMap::new();
        let mut next = 0u64;
        while next < num_labels {
            if cancel.is_cancelled() {
                return Err(ProvingError::Cancelled);
            }
            let first = next;
            let mut starts = Vec::with_capacity(wave);
            while starts.len() < wave && next < num_labels {
                starts.push(next);
                next = next.saturating_add(chunk_len).min(num_labels);
            }

            #[cfg(not(target_arch = "wasm32"))]
            let chunks = starts
                .into_par_iter()
                .map(&build)
                .collect::<Result<Vec<_>, ProvingError>>()?;
            #[cfg(target_arch = "wasm32")]
            let chunks = starts
                .into_iter()
                .map(&build)
                .collect::<Result<Vec<_>, ProvingError>>()?;

            let built = chunks.len();
            for (chunk, revealed) in chunks {
                tree.absorb(chunk)?;
                labels.extend(revealed);
            }
            self.logger.debug(format_args!(
                "merkle wave [{first}, {next}): {built} chunks absorbed"
            ));
        }
        let committed = tree.finish()?;
        self.logger.debug(format_args!(
            "rebuilt root {} over {} leaves",
            hex::encode(committed.root),
            committed.leaf_count
        ));
        Ok((committed, labels))
    }

    fn build_chunk(
        &self,
        start: u64,
        end: u64,
        targets: &[u64],
        cancel: &CancelToken,
    ) -> Result<(MerkleCommitment, Vec<(u64, Label)>), ProvingError> {
        let mut reader = LabelReader::new(&self.data_dir, self.layout);
        let mut tree = MerkleCommitment::starting_at(start, targets);
        let mut revealed = Vec::new();
        visit_labels(
            &mut reader,
            self.layout.label_width,
            start,
            end,
            cancel,
            |index, raw| {
                let label = Label::from_bytes(raw);
                tree.append(&label);
                if targets.binary_search(&index).is_ok() {
                    revealed.push((index, label));
                }
                true
            },
        )?;
        Ok((tree, revealed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InitOpts;
    use crate::guard::ConfigParam;
    use crate::initialization::Initializer;
    use crate::logging::testing::{CancelOnMessage, RecordingLogger};
    use crate::shared::{binary_representation_min_bits, packed_size};
    use crate::storage::label_file_name;
    use crate::verifier::verify;
    use std::sync::Arc;

    const COMMITMENT: Commitment = [0x11; 32];
    const CHALLENGE: Challenge = [0x22; 32];

    fn config() -> Config {
        Config {
            labels_per_unit: 4096,
            ..Config::default()
        }
    }

    fn init(dir: &Path, num_units: u32) -> PostMetadata {
        let opts = InitOpts {
            data_dir: dir.to_path_buf(),
            num_units,
            num_files: 2,
        };
        Initializer::new(config(), opts, COMMITMENT)
            .unwrap()
            .initialize(&CancelToken::new())
            .unwrap()
    }

    #[test]
    fn proofs_verify_for_one_to_five_units() {
        for num_units in 1..=5u32 {
            let dir = tempfile::tempdir().unwrap();
            let post = init(dir.path(), num_units);
            let prover = Prover::new(config(), dir.path(), COMMITMENT).unwrap();
            let (proof, metadata) = prover.generate_proof(CHALLENGE).unwrap();

            let num_labels = 4096 * u64::from(num_units);
            assert_eq!(
                Some(proof.indices.len()),
                packed_size(binary_representation_min_bits(num_labels), config().k2)
            );
            assert_eq!(proof.openings.len() as u64, config().k2);
            assert_eq!(metadata.commitment, COMMITMENT);
            assert_eq!(metadata.challenge, CHALLENGE);
            assert_eq!(metadata.num_units, num_units);
            assert_eq!(metadata.bits_per_label, config().bits_per_label);
            assert_eq!(metadata.labels_per_unit, config().labels_per_unit);
            assert_eq!(metadata.k1, config().k1);
            assert_eq!(metadata.k2, config().k2);
            verify(&proof, &metadata, &post.root).unwrap();
        }
    }

    #[test]
    fn mismatched_settings_are_rejected_before_scanning() {
        let dir = tempfile::tempdir().unwrap();
        init(dir.path(), 1);

        let err = Prover::new(config(), dir.path(), [0x12; 32]).err().unwrap();
        assert!(matches!(
            err,
            ProvingError::ConfigMismatch(ConfigMismatchError {
                param: ConfigParam::Commitment,
                ..
            })
        ));

        let mut cfg = config();
        cfg.bits_per_label = 32;
        let err = Prover::new(cfg, dir.path(), COMMITMENT).err().unwrap();
        assert!(err.to_string().contains("`BitsPerLabel` mismatch"), "{err}");

        let mut cfg = config();
        cfg.labels_per_unit = 8192;
        match Prover::new(cfg, dir.path(), COMMITMENT).err().unwrap() {
            ProvingError::ConfigMismatch(mismatch) => {
                assert_eq!(mismatch.param, ConfigParam::LabelsPerUnit);
                assert_eq!(mismatch.expected, "4096");
                assert_eq!(mismatch.actual, "8192");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn proofs_do_not_depend_on_partitioning() {
        let dir = tempfile::tempdir().unwrap();
        init(dir.path(), 2);
        let reference = Prover::new(config(), dir.path(), COMMITMENT)
            .unwrap()
            .generate_proof(CHALLENGE)
            .unwrap();
        for batch_labels in [3, 100, 1024, 1 << 20] {
            let prover = Prover::new(config(), dir.path(), COMMITMENT)
                .unwrap()
                .with_opts(ProverOpts { batch_labels });
            assert_eq!(prover.generate_proof(CHALLENGE).unwrap(), reference);
        }
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let single = pool.install(|| {
            Prover::new(config(), dir.path(), COMMITMENT)
                .unwrap()
                .with_opts(ProverOpts { batch_labels: 512 })
                .generate_proof(CHALLENGE)
                .unwrap()
        });
        assert_eq!(single, reference);
    }

    #[test]
    fn merkle_pass_absorbs_one_wave_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let post = init(dir.path(), 2);
        let logger = Arc::new(RecordingLogger::default());
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let proof = pool.install(|| {
            let mut prover = Prover::new(config(), dir.path(), COMMITMENT)
                .unwrap()
                .with_opts(ProverOpts { batch_labels: 512 });
            prover.set_logger(logger.clone());
            prover.generate_proof(CHALLENGE).unwrap()
        });
        verify(&proof.0, &proof.1, &post.root).unwrap();

        // 8192 labels in 512-label chunks, one chunk per wave on one thread.
        let lines = logger.lines.lock().unwrap();
        let waves: Vec<&String> = lines
            .iter()
            .filter(|line| line.starts_with("DEBUG merkle wave"))
            .collect();
        assert_eq!(waves.len(), 16);
        assert!(waves.iter().all(|line| line.ends_with(": 1 chunks absorbed")));
        assert_eq!(waves[0].as_str(), "DEBUG merkle wave [0, 512): 1 chunks absorbed");
        assert_eq!(
            waves[15].as_str(),
            "DEBUG merkle wave [7680, 8192): 1 chunks absorbed"
        );
    }

    #[test]
    fn cancellation_yields_no_proof() {
        let dir = tempfile::tempdir().unwrap();
        init(dir.path(), 1);
        let prover = Prover::new(config(), dir.path(), COMMITMENT).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            prover.generate_proof_with_cancel(CHALLENGE, &cancel),
            Err(ProvingError::Cancelled)
        ));
    }

    #[test]
    fn cancelling_after_selection_stops_the_merkle_pass() {
        let dir = tempfile::tempdir().unwrap();
        init(dir.path(), 1);
        let logger = Arc::new(CancelOnMessage {
            token: CancelToken::new(),
            needle: "selected 40 indices",
        });
        let mut prover = Prover::new(config(), dir.path(), COMMITMENT).unwrap();
        prover.set_logger(logger.clone());
        assert!(matches!(
            prover.generate_proof_with_cancel(CHALLENGE, &logger.token),
            Err(ProvingError::Cancelled)
        ));
        assert!(logger.token.is_cancelled());
    }

    #[test]
    fn altered_labels_are_caught_by_the_root() {
        let dir = tempfile::tempdir().unwrap();
        init(dir.path(), 1);
        let path = dir.path().join(label_file_name(1));
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();

        let prover = Prover::new(config(), dir.path(), COMMITMENT).unwrap();
        assert!(matches!(
            prover.generate_proof(CHALLENGE),
            Err(ProvingError::RootMismatch { .. })
        ));
    }

    #[test]
    fn missing_label_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        init(dir.path(), 1);
        std::fs::remove_file(dir.path().join(label_file_name(0))).unwrap();
        match Prover::new(config(), dir.path(), COMMITMENT).err().unwrap() {
            ProvingError::Io { context, .. } => assert!(context.contains("postdata_0.bin")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unreachable_k2_reports_insufficient_indices() {
        let dir = tempfile::tempdir().unwrap();
        init(dir.path(), 1);
        let cfg = Config {
            k1: 1,
            k2: 64,
            ..config()
        };
        assert!(matches!(
            Prover::new(cfg, dir.path(), COMMITMENT)
                .unwrap()
                .generate_proof(CHALLENGE),
            Err(ProvingError::InsufficientQualifyingIndices { required: 64, .. })
        ));
    }

    #[test]
    fn progress_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        init(dir.path(), 1);
        let logger = Arc::new(RecordingLogger::default());
        let mut prover = Prover::new(config(), dir.path(), COMMITMENT).unwrap();
        prover.set_logger(logger.clone());
        prover.generate_proof(CHALLENGE).unwrap();
        assert!(logger.contains("INFO selected 40 indices"));
        assert!(logger.contains("INFO proof ready: 40 openings"));
        assert!(logger.contains("DEBUG rebuilt root"));
    }
}
