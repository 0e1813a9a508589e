use post_core::{
    verify, CancelToken, Config, InitOpts, Initializer, Prover, ProverOpts, VerificationFailure,
};
use std::fs;
use std::time::Instant;

fn prepare_dir(path: &std::path::Path) {
    if path.exists() {
        let _ = fs::remove_dir_all(path);
    }
    fs::create_dir_all(path).expect("create data directory");
}

fn main() {
    let num_units: u32 = std::env::args()
        .nth(1)
        .map(|arg| arg.parse().expect("num_units must be an integer"))
        .unwrap_or(4);
    let data_dir = std::env::temp_dir().join("post_core_roundtrip");
    prepare_dir(&data_dir);

    let config = Config {
        labels_per_unit: 1 << 14,
        ..Config::default()
    };
    let commitment = [0x5au8; 32];
    let challenge = [0xc3u8; 32];
    let opts = InitOpts {
        data_dir: data_dir.clone(),
        num_units,
        num_files: 4,
    };

    let started = Instant::now();
    let post = Initializer::new(config, opts, commitment)
        .expect("valid init options")
        .initialize(&CancelToken::new())
        .expect("initialize dataset");
    println!(
        "Initialized {} units ({} labels) in {:.3} ms, root={}",
        post.num_units,
        u64::from(post.num_units) * post.labels_per_unit,
        started.elapsed().as_secs_f64() * 1e3,
        hex::encode(&post.root[..8])
    );

    let prover = Prover::new(config, &data_dir, commitment)
        .expect("prover matches dataset")
        .with_opts(ProverOpts { batch_labels: 4096 });
    let started = Instant::now();
    let (proof, metadata) = prover.generate_proof(challenge).expect("generate proof");
    println!(
        "Proof: {} openings, {} packed index bytes, {:.3} ms",
        proof.openings.len(),
        proof.indices.len(),
        started.elapsed().as_secs_f64() * 1e3
    );

    let encoded = proof.to_json().expect("encode proof");
    println!("Encoded proof: {} bytes of JSON", encoded.len());
    let decoded = post_core::Proof::from_json(&encoded).expect("decode proof");
    match verify(&decoded, &metadata, &post.root) {
        Ok(()) => println!("Verification: accepted"),
        Err(err) => println!("Verification: {err}"),
    }

    let mut forged = decoded;
    forged.openings[0].path[0].sibling[0] ^= 1;
    match verify(&forged, &metadata, &post.root) {
        Err(err) if err.reason == VerificationFailure::InvalidPath => {
            println!("Forged path: {err}")
        }
        other => println!("Forged path unexpectedly produced {other:?}"),
    }

    let _ = fs::remove_dir_all(&data_dir);
}
