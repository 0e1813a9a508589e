use post_core::{
    verify, CancelToken, Config, ConfigParam, InitOpts, Initializer, PostMetadata, Proof,
    ProofMetadata, Prover, ProverOpts, ProvingError, TracingLogger,
};
use std::path::Path;
use std::sync::Arc;

const COMMITMENT: [u8; 32] = [0xa1; 32];

fn config() -> Config {
    Config {
        labels_per_unit: 4096,
        ..Config::default()
    }
}

fn initialize(dir: &Path, num_units: u32, num_files: u32) -> PostMetadata {
    let opts = InitOpts {
        data_dir: dir.to_path_buf(),
        num_units,
        num_files,
    };
    Initializer::new(config(), opts, COMMITMENT)
        .expect("valid options")
        .initialize(&CancelToken::new())
        .expect("initialize")
}

#[test]
fn proof_survives_json_transport() {
    let dir = tempfile::tempdir().unwrap();
    let post = initialize(dir.path(), 3, 5);
    let mut prover = Prover::new(config(), dir.path(), COMMITMENT).unwrap();
    prover.set_logger(Arc::new(TracingLogger));
    let (proof, metadata) = prover.generate_proof([0x01; 32]).unwrap();

    let proof = Proof::from_json(&proof.to_json().unwrap()).unwrap();
    let metadata = ProofMetadata::from_json(&metadata.to_json().unwrap()).unwrap();
    let root = PostMetadata::load(dir.path()).unwrap().root;
    assert_eq!(root, post.root);
    verify(&proof, &metadata, &root).unwrap();
}

#[test]
fn file_count_does_not_change_the_dataset() {
    let one = tempfile::tempdir().unwrap();
    let many = tempfile::tempdir().unwrap();
    let a = initialize(one.path(), 2, 1);
    let b = initialize(many.path(), 2, 7);
    assert_eq!(a.root, b.root);

    let challenge = [0x0f; 32];
    let from_one = Prover::new(config(), one.path(), COMMITMENT)
        .unwrap()
        .generate_proof(challenge)
        .unwrap();
    let from_many = Prover::new(config(), many.path(), COMMITMENT)
        .unwrap()
        .with_opts(ProverOpts { batch_labels: 777 })
        .generate_proof(challenge)
        .unwrap();
    assert_eq!(from_one, from_many);
}

#[test]
fn proof_is_bound_to_its_challenge() {
    let dir = tempfile::tempdir().unwrap();
    let post = initialize(dir.path(), 1, 2);
    let prover = Prover::new(config(), dir.path(), COMMITMENT).unwrap();
    let (first, first_meta) = prover.generate_proof([0x10; 32]).unwrap();
    let (second, _) = prover.generate_proof([0x20; 32]).unwrap();
    assert_ne!(first.indices, second.indices);

    let mut replayed = first_meta;
    replayed.challenge = [0x20; 32];
    let err = verify(&first, &replayed, &post.root).unwrap_err();
    assert!(err.index.is_some(), "{err}");
}

#[test]
fn prover_names_the_mismatched_field() {
    let dir = tempfile::tempdir().unwrap();
    initialize(dir.path(), 1, 1);
    let cases = [
        (config(), [0xa2; 32], ConfigParam::Commitment),
        (
            Config {
                bits_per_label: 128,
                ..config()
            },
            COMMITMENT,
            ConfigParam::BitsPerLabel,
        ),
        (
            Config {
                labels_per_unit: 2048,
                ..config()
            },
            COMMITMENT,
            ConfigParam::LabelsPerUnit,
        ),
    ];
    for (cfg, commitment, param) in cases {
        match Prover::new(cfg, dir.path(), commitment) {
            Err(ProvingError::ConfigMismatch(err)) => assert_eq!(err.param, param),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("{param} mismatch was accepted"),
        }
    }
}

#[test]
fn missing_dataset_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    match Prover::new(config(), dir.path().join("absent"), COMMITMENT) {
        Err(ProvingError::Io { context, .. }) => {
            assert!(context.contains("postdata_metadata.json"), "{context}")
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("prover bound to a missing dataset"),
    }
}
