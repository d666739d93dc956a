//! The in-process verifiable-shuffle argument.
//!
//! Proves that output ciphertexts are a permuted re-randomization of input
//! ciphertexts under the election key: there exist a permutation `π` and
//! scalars `β_i` with `C̄_i = C_{π(i)} + β_i·(G, Pk)`.
//!
//! The argument commits to the permutation and to its challenge powers,
//! then reduces everything to `Rep`/`And` predicates of the Σ-protocol
//! framework:
//!
//! 1. Per-index Pedersen commitments `c_a[i]` to `a_i = π(i)+1`.
//! 2. Fiat-Shamir challenge `x`; commitments `c_b[i]` to `b_i = x^{a_i}`.
//! 3. Challenges `(y, z)`; both sides derive commitments `c_d[i]` to
//!    `d_i = y·a_i + b_i − z` homomorphically.
//! 4. A product-chain argument that `∏ d_i` equals the public
//!    `∏ (y·(i+1) + x^{i+1} − z)`. The two products agree exactly when
//!    the committed pairs `(a_i, b_i)` are a permutation of the pairs
//!    `(i+1, x^{i+1})`, which forces `a` to be a permutation and `b` to be
//!    its challenge powers.
//! 5. A combined opening proof tying the committed `b` to the ciphertexts:
//!    `Σ b_i·C̄_i = Σ x^{i+1}·C_i + ρ·(G, Pk)` for the aggregate
//!    re-randomizer `ρ`.
//!
//! Verification depends only on the public key, the two ciphertext lists
//! and the proof.

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::MultiscalarMul;
use rand::Rng;

use crate::proof::{self, PointMap, Predicate, SecretMap};
use crate::serde_hex::Hex as _;
use crate::serialization::Serializer;
use crate::{challenge_scalars, derive_base, generator, random_scalar, ElGamalCiphertext, Error,
    RandomStream};

const CHALLENGE_X_DOMAIN: &[u8] = b"votegral-shuffle-x";
const CHALLENGE_YZ_DOMAIN: &[u8] = b"votegral-shuffle-yz";

/// A verifiable-shuffle proof. Opaque to callers; serialize as a whole.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ShuffleProof {
    /// Pedersen commitments to the permutation entries `π(i)+1`.
    pub perm_commitments: Vec<RistrettoPoint>,
    /// Pedersen commitments to the challenge powers `x^{π(i)+1}`.
    pub power_commitments: Vec<RistrettoPoint>,
    /// Pedersen commitments to the running products of `d_i` (index ≥ 1).
    pub product_commitments: Vec<RistrettoPoint>,
    #[serde(with = "crate::serde_hex::HexForm")]
    pub opening_proof: Vec<u8>,
    pub link_proofs: Vec<Vec<u8>>,
    #[serde(with = "crate::serde_hex::HexForm")]
    pub product_proof: Vec<u8>,
}

/// The secret side of one shuffle step.
pub struct ShuffleWitness {
    /// `outputs[i] = inputs[permutation[i]] + rerandomizers[i]·(G, Pk)`.
    pub permutation: Vec<usize>,
    pub rerandomizers: Vec<Scalar>,
}

fn value_base() -> RistrettoPoint {
    derive_base(b"votegral-shuffle-commitment-value")
}

fn blinding_base() -> RistrettoPoint {
    derive_base(b"votegral-shuffle-commitment-blinding")
}

fn pedersen(value: &Scalar, blinding: &Scalar) -> RistrettoPoint {
    value_base() * value + blinding_base() * blinding
}

/// Applies a uniformly random permutation and fresh re-randomization.
pub fn shuffle_once(
    pk: &RistrettoPoint,
    inputs: &[ElGamalCiphertext],
    rng: &mut RandomStream,
) -> Result<(Vec<ElGamalCiphertext>, ShuffleWitness), Error> {
    let k = inputs.len();
    if k == 0 {
        return Err(Error::ShapeMismatch("cannot shuffle an empty list".into()));
    }

    let mut permutation: Vec<usize> = (0..k).collect();
    for i in (1..k).rev() {
        let j = rng.gen_range(0..=i);
        permutation.swap(i, j);
    }

    let mut outputs = Vec::with_capacity(k);
    let mut rerandomizers = Vec::with_capacity(k);
    for i in 0..k {
        let beta = random_scalar(rng);
        let source = &inputs[permutation[i]];
        outputs.push(ElGamalCiphertext {
            c1: source.c1 + RistrettoPoint::mul_base(&beta),
            c2: source.c2 + pk * beta,
        });
        rerandomizers.push(beta);
    }

    Ok((
        outputs,
        ShuffleWitness {
            permutation,
            rerandomizers,
        },
    ))
}

fn statement_payload(
    tag: &str,
    pk: &RistrettoPoint,
    inputs: &[ElGamalCiphertext],
    outputs: &[ElGamalCiphertext],
) -> Serializer {
    let mut s = Serializer::new();
    s.write_byte_slice(tag.as_bytes());
    s.write_point(pk);
    s.write_u64(inputs.len() as u64);
    for ct in inputs.iter().chain(outputs.iter()) {
        s.write_point(&ct.c1);
        s.write_point(&ct.c2);
    }
    s
}

fn challenge_x(
    tag: &str,
    pk: &RistrettoPoint,
    inputs: &[ElGamalCiphertext],
    outputs: &[ElGamalCiphertext],
    perm_commitments: &[RistrettoPoint],
) -> Scalar {
    let mut s = statement_payload(tag, pk, inputs, outputs);
    s.write_points(perm_commitments);
    challenge_scalars(CHALLENGE_X_DOMAIN, &s.finish(), 1)[0]
}

fn challenge_yz(
    tag: &str,
    pk: &RistrettoPoint,
    inputs: &[ElGamalCiphertext],
    outputs: &[ElGamalCiphertext],
    perm_commitments: &[RistrettoPoint],
    power_commitments: &[RistrettoPoint],
) -> (Scalar, Scalar) {
    let mut s = statement_payload(tag, pk, inputs, outputs);
    s.write_points(perm_commitments);
    s.write_points(power_commitments);
    let scalars = challenge_scalars(CHALLENGE_YZ_DOMAIN, &s.finish(), 2);
    (scalars[0], scalars[1])
}

/// `x^1, x^2, …, x^k`.
fn challenge_powers(x: Scalar, k: usize) -> Vec<Scalar> {
    let mut powers = Vec::with_capacity(k);
    let mut acc = x;
    for _ in 0..k {
        powers.push(acc);
        acc *= x;
    }
    powers
}

/// The consolidated statement points `T = Σ x^{i+1}·C_i`.
fn aggregators(
    powers: &[Scalar],
    inputs: &[ElGamalCiphertext],
) -> (RistrettoPoint, RistrettoPoint) {
    let tx = RistrettoPoint::multiscalar_mul(powers.iter(), inputs.iter().map(|ct| &ct.c1));
    let ty = RistrettoPoint::multiscalar_mul(powers.iter(), inputs.iter().map(|ct| &ct.c2));
    (tx, ty)
}

fn opening_statement(
    pk: &RistrettoPoint,
    outputs: &[ElGamalCiphertext],
    power_commitments: &[RistrettoPoint],
    first_d_commitment: &RistrettoPoint,
    tx: &RistrettoPoint,
    ty: &RistrettoPoint,
) -> (Predicate, PointMap) {
    let k = outputs.len();

    let mut conjuncts = Vec::with_capacity(k + 3);
    let mut map = PointMap::new();
    map.insert("G1".into(), value_base());
    map.insert("H0".into(), blinding_base());
    map.insert("G".into(), generator());
    map.insert("H".into(), *pk);
    map.insert("TX".into(), *tx);
    map.insert("TY".into(), *ty);
    map.insert("Cd0".into(), *first_d_commitment);

    let mut tx_terms: Vec<(String, String)> = Vec::with_capacity(k + 1);
    let mut ty_terms: Vec<(String, String)> = Vec::with_capacity(k + 1);
    for i in 0..k {
        let b = format!("b{}", i);
        map.insert(format!("Cb{}", i), power_commitments[i]);
        map.insert(format!("Xb{}", i), outputs[i].c1);
        map.insert(format!("Yb{}", i), outputs[i].c2);
        conjuncts.push(Predicate::Rep {
            target: format!("Cb{}", i),
            terms: vec![(b.clone(), "G1".into()), (format!("rb{}", i), "H0".into())],
        });
        tx_terms.push((b.clone(), format!("Xb{}", i)));
        ty_terms.push((b, format!("Yb{}", i)));
    }
    tx_terms.push(("rho".into(), "G".into()));
    ty_terms.push(("rho".into(), "H".into()));

    conjuncts.push(Predicate::rep("Cd0", &[("d0", "G1"), ("rd0", "H0")]));
    conjuncts.push(Predicate::Rep {
        target: "TX".into(),
        terms: tx_terms,
    });
    conjuncts.push(Predicate::Rep {
        target: "TY".into(),
        terms: ty_terms,
    });

    (Predicate::and(conjuncts), map)
}

fn link_statement(
    d_commitment: &RistrettoPoint,
    product_commitment: &RistrettoPoint,
    previous_product_commitment: &RistrettoPoint,
) -> (Predicate, PointMap) {
    let predicate = Predicate::and(vec![
        Predicate::rep("Cd", &[("d", "G1"), ("rd", "H0")]),
        Predicate::rep("Cp", &[("d", "CpPrev"), ("tau", "H0")]),
    ]);
    let points = proof::points(&[
        ("G1", value_base()),
        ("H0", blinding_base()),
        ("Cd", *d_commitment),
        ("Cp", *product_commitment),
        ("CpPrev", *previous_product_commitment),
    ]);
    (predicate, points)
}

/// The public product `∏ (y·(i+1) + x^{i+1} − z)`.
fn public_product(powers: &[Scalar], y: Scalar, z: Scalar) -> Scalar {
    powers
        .iter()
        .enumerate()
        .map(|(i, power)| y * Scalar::from(i as u64 + 1) + power - z)
        .product()
}

/// Proves that `outputs` is a correct shuffle of `inputs` under `pk`.
pub fn prove_shuffle(
    tag: &str,
    pk: &RistrettoPoint,
    inputs: &[ElGamalCiphertext],
    outputs: &[ElGamalCiphertext],
    witness: &ShuffleWitness,
    rng: &mut RandomStream,
) -> Result<ShuffleProof, Error> {
    let k = inputs.len();
    if k == 0 {
        return Err(Error::ShapeMismatch("cannot prove an empty shuffle".into()));
    }
    if outputs.len() != k || witness.permutation.len() != k || witness.rerandomizers.len() != k {
        return Err(Error::ShapeMismatch(format!(
            "shuffle statement and witness disagree on length {}",
            k
        )));
    }

    // Commit to a_i = π(i)+1.
    let a: Vec<Scalar> = witness
        .permutation
        .iter()
        .map(|&p| Scalar::from(p as u64 + 1))
        .collect();
    let ra: Vec<Scalar> = (0..k).map(|_| random_scalar(rng)).collect();
    let perm_commitments: Vec<RistrettoPoint> =
        a.iter().zip(ra.iter()).map(|(v, r)| pedersen(v, r)).collect();

    let x = challenge_x(tag, pk, inputs, outputs, &perm_commitments);
    let powers = challenge_powers(x, k);

    // Commit to b_i = x^{π(i)+1}.
    let b: Vec<Scalar> = witness.permutation.iter().map(|&p| powers[p]).collect();
    let rb: Vec<Scalar> = (0..k).map(|_| random_scalar(rng)).collect();
    let power_commitments: Vec<RistrettoPoint> =
        b.iter().zip(rb.iter()).map(|(v, r)| pedersen(v, r)).collect();

    let (y, z) = challenge_yz(tag, pk, inputs, outputs, &perm_commitments, &power_commitments);

    // d_i = y·a_i + b_i − z, with blinding y·ra_i + rb_i.
    let d: Vec<Scalar> = (0..k).map(|i| y * a[i] + b[i] - z).collect();
    let rd: Vec<Scalar> = (0..k).map(|i| y * ra[i] + rb[i]).collect();
    let d_commitments: Vec<RistrettoPoint> = (0..k)
        .map(|i| perm_commitments[i] * y + power_commitments[i] - value_base() * z)
        .collect();

    // Running products p_i = d_0·…·d_i; c_p[0] is c_d[0] itself.
    let mut p = Vec::with_capacity(k);
    let mut rp = Vec::with_capacity(k);
    let mut product_chain = Vec::with_capacity(k);
    p.push(d[0]);
    rp.push(rd[0]);
    product_chain.push(d_commitments[0]);
    for i in 1..k {
        p.push(p[i - 1] * d[i]);
        let blinding = random_scalar(rng);
        rp.push(blinding);
        product_chain.push(pedersen(&p[i], &blinding));
    }
    let product_commitments = product_chain[1..].to_vec();

    // Aggregate re-randomizer: Σ b_i·β_i telescopes the linkage equation.
    let rho: Scalar = -(0..k).map(|i| b[i] * witness.rerandomizers[i]).sum::<Scalar>();

    let (tx, ty) = aggregators(&powers, inputs);
    let (predicate, points) = opening_statement(
        pk,
        outputs,
        &power_commitments,
        &d_commitments[0],
        &tx,
        &ty,
    );
    let mut secrets = SecretMap::new();
    for i in 0..k {
        secrets.insert(format!("b{}", i), b[i]);
        secrets.insert(format!("rb{}", i), rb[i]);
    }
    secrets.insert("rho".into(), rho);
    secrets.insert("d0".into(), d[0]);
    secrets.insert("rd0".into(), rd[0]);
    let opening_proof = proof::prove_predicate(
        &format!("{}/opening", tag),
        &predicate,
        &points,
        &secrets,
        None,
        rng,
    )?;

    let mut link_proofs = Vec::with_capacity(k.saturating_sub(1));
    for i in 1..k {
        let (predicate, points) =
            link_statement(&d_commitments[i], &product_chain[i], &product_chain[i - 1]);
        let secrets = proof::secrets(&[
            ("d", d[i]),
            ("rd", rd[i]),
            ("tau", rp[i] - d[i] * rp[i - 1]),
        ]);
        link_proofs.push(proof::prove_predicate(
            &format!("{}/link{}", tag, i),
            &predicate,
            &points,
            &secrets,
            None,
            rng,
        )?);
    }

    // The last running product opens to the public product.
    let product = public_product(&powers, y, z);
    let final_opening = product_chain[k - 1] - value_base() * product;
    let predicate = Predicate::rep("Q", &[("rp", "H0")]);
    let points = proof::points(&[("Q", final_opening), ("H0", blinding_base())]);
    let secrets = proof::secrets(&[("rp", rp[k - 1])]);
    let product_proof = proof::prove_predicate(
        &format!("{}/product", tag),
        &predicate,
        &points,
        &secrets,
        None,
        rng,
    )?;

    Ok(ShuffleProof {
        perm_commitments,
        power_commitments,
        product_commitments,
        opening_proof,
        link_proofs,
        product_proof,
    })
}

/// Verifies a shuffle proof against `(pk, inputs, outputs)`.
pub fn verify_shuffle(
    tag: &str,
    pk: &RistrettoPoint,
    inputs: &[ElGamalCiphertext],
    outputs: &[ElGamalCiphertext],
    shuffle_proof: &ShuffleProof,
) -> Result<(), Error> {
    let k = inputs.len();
    if k == 0 || outputs.len() != k {
        return Err(Error::ShapeMismatch(format!(
            "shuffle statement has {} inputs and {} outputs",
            k,
            outputs.len()
        )));
    }
    if shuffle_proof.perm_commitments.len() != k
        || shuffle_proof.power_commitments.len() != k
        || shuffle_proof.product_commitments.len() != k - 1
        || shuffle_proof.link_proofs.len() != k - 1
    {
        return Err(Error::proof(tag));
    }

    let x = challenge_x(tag, pk, inputs, outputs, &shuffle_proof.perm_commitments);
    let powers = challenge_powers(x, k);
    let (y, z) = challenge_yz(
        tag,
        pk,
        inputs,
        outputs,
        &shuffle_proof.perm_commitments,
        &shuffle_proof.power_commitments,
    );

    let d_commitments: Vec<RistrettoPoint> = (0..k)
        .map(|i| {
            shuffle_proof.perm_commitments[i] * y + shuffle_proof.power_commitments[i]
                - value_base() * z
        })
        .collect();
    let mut product_chain = Vec::with_capacity(k);
    product_chain.push(d_commitments[0]);
    product_chain.extend(shuffle_proof.product_commitments.iter().copied());

    let (tx, ty) = aggregators(&powers, inputs);
    let (predicate, points) = opening_statement(
        pk,
        outputs,
        &shuffle_proof.power_commitments,
        &d_commitments[0],
        &tx,
        &ty,
    );
    proof::verify_predicate(
        &format!("{}/opening", tag),
        &predicate,
        &points,
        &shuffle_proof.opening_proof,
    )?;

    for i in 1..k {
        let (predicate, points) =
            link_statement(&d_commitments[i], &product_chain[i], &product_chain[i - 1]);
        proof::verify_predicate(
            &format!("{}/link{}", tag, i),
            &predicate,
            &points,
            &shuffle_proof.link_proofs[i - 1],
        )?;
    }

    let product = public_product(&powers, y, z);
    let final_opening = product_chain[k - 1] - value_base() * product;
    let predicate = Predicate::rep("Q", &[("rp", "H0")]);
    let points = proof::points(&[("Q", final_opening), ("H0", blinding_base())]);
    proof::verify_predicate(
        &format!("{}/product", tag),
        &predicate,
        &points,
        &shuffle_proof.product_proof,
    )
}
