#![deny(missing_docs)]

//! # post_core
//!
//! Proving and verification core of a Proof-of-Space-Time scheme.  A dataset
//! of fixed-width labels, each a deterministic function of an identity
//! commitment and its index, is committed to a binary SHA-256 Merkle root.
//! Given a challenge, the prover scans the labels for indices whose candidate
//! hash falls under a difficulty threshold, and reveals the first `k2` of
//! them with their Merkle paths.  A verifier holding only the root checks the
//! threshold and the inclusion of every revealed label.
//!
//! ## Pieces
//!
//! * [`Label`] values and their SHA-256 content hash.
//! * [`MerkleCommitment`], a streaming tree with `O(log n)` working memory
//!   that collects inclusion paths for targets known up front, and can be
//!   built in power-of-two aligned chunks that are absorbed in order.
//! * [`proving_difficulty`], the overflow-checked acceptance threshold.
//! * [`Prover`], which guards against a configuration that differs from the
//!   initialized dataset, scans in parallel batches, and assembles a
//!   [`Proof`] with its [`ProofMetadata`].
//! * [`verify`], a stateless check reporting the first failing index.
//! * [`Initializer`], a CPU bootstrap writer for local datasets.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use post_core::{verify, CancelToken, Config, InitOpts, Initializer, Prover};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config { labels_per_unit: 4096, ..Config::default() };
//! let commitment = [7u8; 32];
//! let opts = InitOpts { data_dir: "post_data".into(), num_units: 2, num_files: 2 };
//!
//! let post = Initializer::new(config, opts, commitment)?.initialize(&CancelToken::new())?;
//! let prover = Prover::new(config, "post_data", commitment)?;
//! let (proof, metadata) = prover.generate_proof([9u8; 32])?;
//! verify(&proof, &metadata, &post.root)?;
//! # Ok(())
//! # }
//! ```
//!
//! Progress is reported through an injectable [`Logger`]; the default is
//! silent and [`TracingLogger`] forwards to `tracing`.

pub mod cancel;
pub mod config;
pub mod difficulty;
pub mod guard;
pub mod initialization;
pub mod label;
pub mod logging;
pub mod merkle;
pub mod proof;
pub mod prover;
mod selection;
pub mod shared;
pub mod storage;
pub mod verifier;

pub use cancel::CancelToken;
pub use config::{Config, ConfigError, InitOpts, ProvingParams};
pub use difficulty::{candidate_hash, proving_difficulty};
pub use guard::{check_config, ConfigMismatchError, ConfigParam};
pub use initialization::{derive_label, InitError, Initializer};
pub use label::{Challenge, Commitment, Digest, Label};
pub use logging::{Logger, NoopLogger, SharedLogger, TracingLogger};
pub use merkle::{verify_inclusion, MerkleCommitment, MerkleError, MerklePath, PathNode};
pub use proof::{LeafOpening, Proof, ProofMetadata};
pub use prover::{Prover, ProverOpts, ProvingError};
pub use storage::{PostMetadata, StorageError};
pub use verifier::{verify, VerificationError, VerificationFailure};
