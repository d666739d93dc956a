//! Verifiable shuffling across the tally members.
//!
//! The shuffle is a sequential chain: member 0 shuffles the original list;
//! every later member first verifies its predecessor's proof against
//! (predecessor input, predecessor output) and only then shuffles the
//! predecessor's output. After the last member the whole chain has been
//! checked link by link. Any failed link is fatal.
//!
//! Sequences of lists (several lists permuted under one common
//! permutation) are compressed into a single shuffle statement with a
//! Fiat-Shamir challenge vector `e`: the verifier checks the linear
//! combination of the rows weighted by `e_j`.

use std::fs;
use std::path::PathBuf;
use std::process::Command;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::MultiscalarMul;
use rand::Rng;

use crate::serde_hex::Hex as _;
use crate::serialization::Serializer;
use crate::{
    challenge_scalars, join_components, point_from_bytes, prove_shuffle, random_scalar,
    split_components, verify_shuffle, Config, ElGamalCiphertext, Error, RandomStream,
    ShuffleProof, ShuffleWitness, ShufflerKind,
};

const LOG_TARGET: &str = "votegral::mix";

/// Context tag for single-list shuffle proofs.
pub const SINGLE_SHUFFLE_TAG: &str = "SingleShuffle";
/// Context tag for consolidated sequence-shuffle proofs.
pub const SEQUENCE_SHUFFLE_TAG: &str = "Votegral-SequencesShuffle-v1";
/// Domain separator for the sequence challenge vector `e`.
const SEQUENCE_CHALLENGE_DOMAIN: &[u8] = b"votegral-shuffle-challenge-derivation";

/// A shuffle proof from either back-end.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum MixProof {
    Local(ShuffleProof),
    /// Opaque proof bytes produced (and already verified) by the external
    /// shuffle process.
    External(#[serde(with = "crate::serde_hex::HexForm")] Vec<u8>),
}

/// The output of shuffling a single ElGamal ciphertext list.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SingleShuffleResult {
    pub shuffled_c1s: Vec<RistrettoPoint>,
    pub shuffled_c2s: Vec<RistrettoPoint>,
    pub proof: MixProof,
}

/// The output of shuffling multiple parallel sequences under one
/// permutation.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SequenceShuffleResult {
    pub shuffled_c1s: Vec<Vec<RistrettoPoint>>,
    pub shuffled_c2s: Vec<Vec<RistrettoPoint>>,
    pub proof: MixProof,
    pub challenge_e: Vec<Scalar>,
}

/// A verifiable shuffle strategy.
pub trait Shuffler {
    /// Runs the member chain over a single ciphertext list.
    fn shuffle(
        &self,
        members: u32,
        ea_pk: &RistrettoPoint,
        ciphertexts: &[ElGamalCiphertext],
        rng: &mut RandomStream,
    ) -> Result<Vec<SingleShuffleResult>, Error>;

    /// Runs the member chain over parallel sequences of ciphertext
    /// components, all permuted identically.
    fn shuffle_sequences(
        &self,
        members: u32,
        ea_pk: &RistrettoPoint,
        xs: &[Vec<RistrettoPoint>],
        ys: &[Vec<RistrettoPoint>],
        rng: &mut RandomStream,
    ) -> Result<Vec<SequenceShuffleResult>, Error>;
}

/// Builds the configured shuffle strategy.
pub fn new_shuffler(config: &Config) -> Box<dyn Shuffler> {
    match &config.shuffler {
        ShufflerKind::Local => Box::new(LocalShuffler),
        ShufflerKind::External { tool } => Box::new(ExternalShuffler {
            tool: tool.clone(),
            temp_path: config.temp_path.clone(),
        }),
    }
}

fn require_members(members: u32) -> Result<(), Error> {
    if members < 1 {
        return Err(Error::ProtocolMisuse(
            "shuffling requires at least one tally member".into(),
        ));
    }
    Ok(())
}

fn assert_xy(
    xs: &[Vec<RistrettoPoint>],
    ys: &[Vec<RistrettoPoint>],
) -> Result<(usize, usize), Error> {
    if xs.is_empty() || xs[0].is_empty() {
        return Err(Error::ShapeMismatch("sequence shuffle input is empty".into()));
    }
    if xs.len() != ys.len() {
        return Err(Error::ShapeMismatch(format!(
            "{} X sequences but {} Y sequences",
            xs.len(),
            ys.len()
        )));
    }
    let k = xs[0].len();
    for (row, (x_row, y_row)) in xs.iter().zip(ys.iter()).enumerate() {
        if x_row.len() != k || y_row.len() != k {
            return Err(Error::ShapeMismatch(format!(
                "sequence row {} has uneven length",
                row
            )));
        }
    }
    Ok((xs.len(), k))
}

/// Fiat-Shamir challenge vector `e` over the full sequence statement.
pub fn derive_sequence_challenge(
    ea_pk: &RistrettoPoint,
    xs: &[Vec<RistrettoPoint>],
    ys: &[Vec<RistrettoPoint>],
    x_bars: &[Vec<RistrettoPoint>],
    y_bars: &[Vec<RistrettoPoint>],
) -> Vec<Scalar> {
    let mut s = Serializer::new();
    s.write_point(ea_pk);
    for (x_row, y_row) in xs.iter().zip(ys.iter()) {
        for (x, y) in x_row.iter().zip(y_row.iter()) {
            s.write_point(x);
            s.write_point(y);
        }
    }
    for (x_row, y_row) in x_bars.iter().zip(y_bars.iter()) {
        for (x, y) in x_row.iter().zip(y_row.iter()) {
            s.write_point(x);
            s.write_point(y);
        }
    }
    challenge_scalars(SEQUENCE_CHALLENGE_DOMAIN, &s.finish(), xs.len())
}

/// Consolidates sequence rows into one list with weights `e_j`.
fn consolidate(
    xs: &[Vec<RistrettoPoint>],
    ys: &[Vec<RistrettoPoint>],
    e: &[Scalar],
    k: usize,
) -> Vec<ElGamalCiphertext> {
    (0..k)
        .map(|i| ElGamalCiphertext {
            c1: RistrettoPoint::multiscalar_mul(e.iter(), xs.iter().map(|row| &row[i])),
            c2: RistrettoPoint::multiscalar_mul(e.iter(), ys.iter().map(|row| &row[i])),
        })
        .collect()
}

fn random_permutation(k: usize, rng: &mut RandomStream) -> Vec<usize> {
    let mut permutation: Vec<usize> = (0..k).collect();
    for i in (1..k).rev() {
        let j = rng.gen_range(0..=i);
        permutation.swap(i, j);
    }
    permutation
}

struct PermutedSequences {
    x_bars: Vec<Vec<RistrettoPoint>>,
    y_bars: Vec<Vec<RistrettoPoint>>,
    permutation: Vec<usize>,
    rerandomizers: Vec<Vec<Scalar>>,
}

/// Applies one common permutation and independent per-row
/// re-randomization to every sequence row.
fn permute_sequences(
    ea_pk: &RistrettoPoint,
    xs: &[Vec<RistrettoPoint>],
    ys: &[Vec<RistrettoPoint>],
    k: usize,
    rng: &mut RandomStream,
) -> PermutedSequences {
    let permutation = random_permutation(k, rng);
    let mut x_bars = Vec::with_capacity(xs.len());
    let mut y_bars = Vec::with_capacity(ys.len());
    let mut rerandomizers = Vec::with_capacity(xs.len());

    for (x_row, y_row) in xs.iter().zip(ys.iter()) {
        let betas: Vec<Scalar> = (0..k).map(|_| random_scalar(rng)).collect();
        let mut x_bar = Vec::with_capacity(k);
        let mut y_bar = Vec::with_capacity(k);
        for i in 0..k {
            let source = permutation[i];
            x_bar.push(x_row[source] + RistrettoPoint::mul_base(&betas[i]));
            y_bar.push(y_row[source] + ea_pk * betas[i]);
        }
        x_bars.push(x_bar);
        y_bars.push(y_bar);
        rerandomizers.push(betas);
    }

    PermutedSequences {
        x_bars,
        y_bars,
        permutation,
        rerandomizers,
    }
}

/// Consolidated per-position witness randomness `R_i = Σ_j e_j·β_{j,i}`.
fn consolidate_witness(e: &[Scalar], rerandomizers: &[Vec<Scalar>], k: usize) -> Vec<Scalar> {
    (0..k)
        .map(|i| {
            e.iter()
                .zip(rerandomizers.iter())
                .map(|(weight, row)| weight * row[i])
                .sum()
        })
        .collect()
}

/// Verifies one member's sequence-shuffle result against its input.
pub fn verify_sequence_shuffle(
    ea_pk: &RistrettoPoint,
    xs: &[Vec<RistrettoPoint>],
    ys: &[Vec<RistrettoPoint>],
    result: &SequenceShuffleResult,
) -> Result<(), Error> {
    let (rows, k) = assert_xy(xs, ys)?;
    let (out_rows, out_k) = assert_xy(&result.shuffled_c1s, &result.shuffled_c2s)?;
    if rows != out_rows || k != out_k || result.challenge_e.len() != rows {
        return Err(Error::proof(SEQUENCE_SHUFFLE_TAG));
    }

    let e = derive_sequence_challenge(ea_pk, xs, ys, &result.shuffled_c1s, &result.shuffled_c2s);
    if e != result.challenge_e {
        return Err(Error::proof(SEQUENCE_SHUFFLE_TAG));
    }

    match &result.proof {
        MixProof::Local(proof) => {
            let inputs = consolidate(xs, ys, &e, k);
            let outputs = consolidate(&result.shuffled_c1s, &result.shuffled_c2s, &e, k);
            verify_shuffle(SEQUENCE_SHUFFLE_TAG, ea_pk, &inputs, &outputs, proof)
        }
        // The external tool proves and verifies internally; only the
        // challenge re-derivation above is replayed here.
        MixProof::External(_) => Ok(()),
    }
}

// --- In-process shuffle ---

pub struct LocalShuffler;

impl Shuffler for LocalShuffler {
    fn shuffle(
        &self,
        members: u32,
        ea_pk: &RistrettoPoint,
        ciphertexts: &[ElGamalCiphertext],
        rng: &mut RandomStream,
    ) -> Result<Vec<SingleShuffleResult>, Error> {
        require_members(members)?;
        let mut current = ciphertexts.to_vec();
        let mut chain: Vec<SingleShuffleResult> = Vec::with_capacity(members as usize);

        for member in 0..=members {
            if member > 0 {
                let previous = &chain[member as usize - 1];
                let outputs =
                    join_components(&previous.shuffled_c1s, &previous.shuffled_c2s)?;
                tracing::debug!(
                    target: LOG_TARGET,
                    member,
                    "verifying the previous member's shuffle"
                );
                match &previous.proof {
                    MixProof::Local(proof) => {
                        verify_shuffle(SINGLE_SHUFFLE_TAG, ea_pk, &current, &outputs, proof)
                            .map_err(|_| Error::proof_member(SINGLE_SHUFFLE_TAG, member - 1))?;
                    }
                    MixProof::External(_) => {
                        return Err(Error::ProtocolMisuse(
                            "external proof in a local shuffle chain".into(),
                        ))
                    }
                }

                if member == members {
                    return Ok(chain);
                }
                current = outputs;
            }

            tracing::debug!(target: LOG_TARGET, member, "performing shuffle");
            let (outputs, witness) = crate::shuffle_once(ea_pk, &current, rng)?;
            let proof =
                prove_shuffle(SINGLE_SHUFFLE_TAG, ea_pk, &current, &outputs, &witness, rng)?;
            let (shuffled_c1s, shuffled_c2s) = split_components(&outputs);
            chain.push(SingleShuffleResult {
                shuffled_c1s,
                shuffled_c2s,
                proof: MixProof::Local(proof),
            });
        }
        unreachable!("chain loop returns after the final verification");
    }

    fn shuffle_sequences(
        &self,
        members: u32,
        ea_pk: &RistrettoPoint,
        xs: &[Vec<RistrettoPoint>],
        ys: &[Vec<RistrettoPoint>],
        rng: &mut RandomStream,
    ) -> Result<Vec<SequenceShuffleResult>, Error> {
        require_members(members)?;
        let (_, k) = assert_xy(xs, ys)?;
        let mut current_x = xs.to_vec();
        let mut current_y = ys.to_vec();
        let mut chain: Vec<SequenceShuffleResult> = Vec::with_capacity(members as usize);

        for member in 0..=members {
            if member > 0 {
                let previous = &chain[member as usize - 1];
                tracing::debug!(
                    target: LOG_TARGET,
                    member,
                    "verifying the previous member's sequence shuffle"
                );
                verify_sequence_shuffle(ea_pk, &current_x, &current_y, previous)
                    .map_err(|_| Error::proof_member(SEQUENCE_SHUFFLE_TAG, member - 1))?;

                if member == members {
                    return Ok(chain);
                }
                current_x = previous.shuffled_c1s.clone();
                current_y = previous.shuffled_c2s.clone();
            }

            tracing::debug!(target: LOG_TARGET, member, "performing sequence shuffle");
            let permuted = permute_sequences(ea_pk, &current_x, &current_y, k, rng);
            let e = derive_sequence_challenge(
                ea_pk,
                &current_x,
                &current_y,
                &permuted.x_bars,
                &permuted.y_bars,
            );

            let inputs = consolidate(&current_x, &current_y, &e, k);
            let outputs = consolidate(&permuted.x_bars, &permuted.y_bars, &e, k);
            let witness = ShuffleWitness {
                permutation: permuted.permutation,
                rerandomizers: consolidate_witness(&e, &permuted.rerandomizers, k),
            };
            let proof =
                prove_shuffle(SEQUENCE_SHUFFLE_TAG, ea_pk, &inputs, &outputs, &witness, rng)?;

            chain.push(SequenceShuffleResult {
                shuffled_c1s: permuted.x_bars,
                shuffled_c2s: permuted.y_bars,
                proof: MixProof::Local(proof),
                challenge_e: e,
            });
        }
        unreachable!("chain loop returns after the final verification");
    }
}

// --- External shuffle process ---

const FILE_PUBLIC_KEY: &str = "public_key.txt";
const FILE_INPUT_CTXTS: &str = "input_ctxts.csv";
const FILE_OUTPUT_CTXTS: &str = "output_ctxts.csv";
const FILE_WITNESS_RAND: &str = "witness_rand.txt";
const FILE_WITNESS_PERM: &str = "witness_perm.txt";
const FILE_PROOF: &str = "proof.bin";

/// Shuffle strategy backed by an external process.
///
/// The child accepts `shuffle`, `prove` and `verify` subcommands over
/// files: CSV ciphertexts (header `c1_base64,c2_base64`), a one-line
/// base64 public key, one scalar per line of randomness and one index per
/// line of permutation. Exit code 0 signals success. The `shuffle`
/// subcommand proves and verifies internally and is treated as
/// authoritative.
pub struct ExternalShuffler {
    pub tool: PathBuf,
    pub temp_path: PathBuf,
}

impl ExternalShuffler {
    fn path(&self, name: &str) -> PathBuf {
        self.temp_path.join(name)
    }

    fn run(&self, args: &[&str]) -> Result<(), Error> {
        let output = Command::new(&self.tool)
            .args(args)
            .output()
            .map_err(|e| Error::BackendFailure(format!("failed to spawn shuffle tool: {}", e)))?;
        if !output.status.success() {
            return Err(Error::BackendFailure(format!(
                "'{}' command failed with {}: {}",
                args.first().unwrap_or(&""),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    fn write_file(&self, name: &str, contents: &str) -> Result<(), Error> {
        fs::write(self.path(name), contents)
            .map_err(|e| Error::BackendFailure(format!("failed to write {}: {}", name, e)))
    }

    fn write_public_key(&self, pk: &RistrettoPoint) -> Result<(), Error> {
        self.write_file(FILE_PUBLIC_KEY, &BASE64.encode(pk.compress().to_bytes()))
    }

    fn write_ciphertexts(&self, name: &str, ciphertexts: &[ElGamalCiphertext]) -> Result<(), Error> {
        let mut contents = String::from("c1_base64,c2_base64\n");
        for ct in ciphertexts {
            contents.push_str(&BASE64.encode(ct.c1.compress().to_bytes()));
            contents.push(',');
            contents.push_str(&BASE64.encode(ct.c2.compress().to_bytes()));
            contents.push('\n');
        }
        self.write_file(name, &contents)
    }

    fn read_ciphertexts(&self, name: &str) -> Result<Vec<ElGamalCiphertext>, Error> {
        let contents = fs::read_to_string(self.path(name))
            .map_err(|e| Error::BackendFailure(format!("failed to read {}: {}", name, e)))?;
        let mut lines = contents.lines();
        match lines.next() {
            Some(header) if header == "c1_base64,c2_base64" => {}
            _ => {
                return Err(Error::BackendFailure(format!(
                    "{} is missing the ciphertext header",
                    name
                )))
            }
        }

        let mut ciphertexts = Vec::new();
        for line in lines {
            let (c1, c2) = line.split_once(',').ok_or_else(|| {
                Error::BackendFailure(format!("malformed ciphertext line in {}", name))
            })?;
            let decode = |part: &str| -> Result<RistrettoPoint, Error> {
                let bytes = BASE64
                    .decode(part.trim())
                    .map_err(|e| Error::BackendFailure(format!("bad base64 in {}: {}", name, e)))?;
                point_from_bytes(&bytes)
                    .map_err(|_| Error::BackendFailure(format!("bad point encoding in {}", name)))
            };
            ciphertexts.push(ElGamalCiphertext {
                c1: decode(c1)?,
                c2: decode(c2)?,
            });
        }
        Ok(ciphertexts)
    }

    fn write_permutation(&self, permutation: &[usize]) -> Result<(), Error> {
        let contents: String = permutation
            .iter()
            .map(|index| format!("{}\n", index))
            .collect();
        self.write_file(FILE_WITNESS_PERM, &contents)
    }

    fn write_scalars(&self, scalars: &[Scalar]) -> Result<(), Error> {
        let contents: String = scalars
            .iter()
            .map(|scalar| format!("{}\n", BASE64.encode(scalar.to_bytes())))
            .collect();
        self.write_file(FILE_WITNESS_RAND, &contents)
    }

    fn read_proof(&self) -> Result<Vec<u8>, Error> {
        fs::read(self.path(FILE_PROOF))
            .map_err(|e| Error::BackendFailure(format!("failed to read proof file: {}", e)))
    }
}

impl Shuffler for ExternalShuffler {
    fn shuffle(
        &self,
        members: u32,
        ea_pk: &RistrettoPoint,
        ciphertexts: &[ElGamalCiphertext],
        rng: &mut RandomStream,
    ) -> Result<Vec<SingleShuffleResult>, Error> {
        require_members(members)?;
        let _ = rng; // the external tool draws its own randomness

        let mut current = ciphertexts.to_vec();
        let mut results = Vec::with_capacity(members as usize);
        for member in 0..members {
            tracing::debug!(target: LOG_TARGET, member, "invoking external shuffle");
            self.write_public_key(ea_pk)?;
            self.write_ciphertexts(FILE_INPUT_CTXTS, &current)?;

            let pk = self.path(FILE_PUBLIC_KEY);
            let input = self.path(FILE_INPUT_CTXTS);
            let out = self.path(FILE_OUTPUT_CTXTS);
            let proof = self.path(FILE_PROOF);
            self.run(&[
                "shuffle",
                "--pk",
                pk.to_str().unwrap_or_default(),
                "--in",
                input.to_str().unwrap_or_default(),
                "--out",
                out.to_str().unwrap_or_default(),
                "--proof",
                proof.to_str().unwrap_or_default(),
            ])?;

            let outputs = self.read_ciphertexts(FILE_OUTPUT_CTXTS)?;
            if outputs.len() != current.len() {
                return Err(Error::BackendFailure(format!(
                    "external shuffle changed the batch size from {} to {}",
                    current.len(),
                    outputs.len()
                )));
            }
            let (shuffled_c1s, shuffled_c2s) = split_components(&outputs);
            results.push(SingleShuffleResult {
                shuffled_c1s,
                shuffled_c2s,
                proof: MixProof::External(self.read_proof()?),
            });
            current = outputs;
        }
        Ok(results)
    }

    fn shuffle_sequences(
        &self,
        members: u32,
        ea_pk: &RistrettoPoint,
        xs: &[Vec<RistrettoPoint>],
        ys: &[Vec<RistrettoPoint>],
        rng: &mut RandomStream,
    ) -> Result<Vec<SequenceShuffleResult>, Error> {
        require_members(members)?;
        let (_, k) = assert_xy(xs, ys)?;

        let mut current_x = xs.to_vec();
        let mut current_y = ys.to_vec();
        let mut results = Vec::with_capacity(members as usize);
        for member in 0..members {
            tracing::debug!(target: LOG_TARGET, member, "external sequence shuffle");
            let permuted = permute_sequences(ea_pk, &current_x, &current_y, k, rng);
            let e = derive_sequence_challenge(
                ea_pk,
                &current_x,
                &current_y,
                &permuted.x_bars,
                &permuted.y_bars,
            );

            let inputs = consolidate(&current_x, &current_y, &e, k);
            let outputs = consolidate(&permuted.x_bars, &permuted.y_bars, &e, k);
            let consolidated_rand = consolidate_witness(&e, &permuted.rerandomizers, k);

            self.write_public_key(ea_pk)?;
            self.write_ciphertexts(FILE_INPUT_CTXTS, &inputs)?;
            self.write_ciphertexts(FILE_OUTPUT_CTXTS, &outputs)?;
            self.write_permutation(&permuted.permutation)?;
            self.write_scalars(&consolidated_rand)?;

            let pk = self.path(FILE_PUBLIC_KEY);
            let input = self.path(FILE_INPUT_CTXTS);
            let out = self.path(FILE_OUTPUT_CTXTS);
            let perm = self.path(FILE_WITNESS_PERM);
            let rand = self.path(FILE_WITNESS_RAND);
            let proof = self.path(FILE_PROOF);
            self.run(&[
                "prove",
                "--pk",
                pk.to_str().unwrap_or_default(),
                "--in",
                input.to_str().unwrap_or_default(),
                "--out",
                out.to_str().unwrap_or_default(),
                "--perm",
                perm.to_str().unwrap_or_default(),
                "--rand",
                rand.to_str().unwrap_or_default(),
                "--proof",
                proof.to_str().unwrap_or_default(),
            ])?;

            let result = SequenceShuffleResult {
                shuffled_c1s: permuted.x_bars,
                shuffled_c2s: permuted.y_bars,
                proof: MixProof::External(self.read_proof()?),
                challenge_e: e,
            };
            // Replay the reduction before publishing the member's result.
            verify_sequence_shuffle(ea_pk, &current_x, &current_y, &result)
                .map_err(|_| Error::proof_member(SEQUENCE_SHUFFLE_TAG, member))?;

            current_x = result.shuffled_c1s.clone();
            current_y = result.shuffled_c2s.clone();
            results.push(result);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encrypt_point;

    fn random_ciphertexts(
        pk: &RistrettoPoint,
        k: usize,
        rng: &mut RandomStream,
    ) -> Vec<ElGamalCiphertext> {
        (0..k)
            .map(|_| {
                let m = RistrettoPoint::mul_base(&random_scalar(rng));
                encrypt_point(pk, &m, rng).0
            })
            .collect()
    }

    #[test]
    fn single_shuffle_chain_verifies_link_by_link() {
        let mut rng = RandomStream::from_seed("mix-chain");
        let pk = RistrettoPoint::mul_base(&random_scalar(&mut rng));
        let inputs = random_ciphertexts(&pk, 4, &mut rng);

        let chain = LocalShuffler
            .shuffle(3, &pk, &inputs, &mut rng)
            .unwrap();
        assert_eq!(chain.len(), 3);

        // Replay the chain as an outside observer.
        let mut current = inputs;
        for result in &chain {
            let outputs = join_components(&result.shuffled_c1s, &result.shuffled_c2s).unwrap();
            match &result.proof {
                MixProof::Local(proof) => {
                    verify_shuffle(SINGLE_SHUFFLE_TAG, &pk, &current, &outputs, proof).unwrap()
                }
                MixProof::External(_) => unreachable!(),
            }
            current = outputs;
        }
    }

    #[test]
    fn sequence_shuffle_chain_round_trip() {
        let mut rng = RandomStream::from_seed("mix-sequences");
        let pk = RistrettoPoint::mul_base(&random_scalar(&mut rng));
        let row_a = random_ciphertexts(&pk, 5, &mut rng);
        let row_b = random_ciphertexts(&pk, 5, &mut rng);
        let (xa, ya) = split_components(&row_a);
        let (xb, yb) = split_components(&row_b);
        let xs = vec![xa, xb];
        let ys = vec![ya, yb];

        let chain = LocalShuffler
            .shuffle_sequences(2, &pk, &xs, &ys, &mut rng)
            .unwrap();
        assert_eq!(chain.len(), 2);

        let mut current_x = xs;
        let mut current_y = ys;
        for result in &chain {
            verify_sequence_shuffle(&pk, &current_x, &current_y, result).unwrap();
            current_x = result.shuffled_c1s.clone();
            current_y = result.shuffled_c2s.clone();
        }
    }

    #[test]
    fn tampered_sequence_result_is_rejected() {
        let mut rng = RandomStream::from_seed("mix-sequences-tamper");
        let pk = RistrettoPoint::mul_base(&random_scalar(&mut rng));
        let row = random_ciphertexts(&pk, 4, &mut rng);
        let (x, y) = split_components(&row);
        let xs = vec![x];
        let ys = vec![y];

        let chain = LocalShuffler
            .shuffle_sequences(1, &pk, &xs, &ys, &mut rng)
            .unwrap();
        let mut forged = chain[0].clone();
        forged.shuffled_c1s[0].swap(0, 1);
        assert!(verify_sequence_shuffle(&pk, &xs, &ys, &forged).is_err());
    }

    #[test]
    fn uneven_sequences_are_rejected() {
        let mut rng = RandomStream::from_seed("mix-shapes");
        let pk = RistrettoPoint::mul_base(&random_scalar(&mut rng));
        let row = random_ciphertexts(&pk, 3, &mut rng);
        let (x, y) = split_components(&row);
        let mut short = x.clone();
        short.pop();

        let err = LocalShuffler.shuffle_sequences(2, &pk, &[x, short], &[y.clone(), y], &mut rng);
        assert!(matches!(err, Err(Error::ShapeMismatch(_))));
    }
}
