//! Generic Σ-protocol predicates with a Fiat-Shamir transform.
//!
//! A [`Predicate`] is a statement of the form "I know scalars such that
//! these point equations hold", closed under conjunction and disjunction:
//!
//! - `Rep(P, {(s_j, B_j)})` proves knowledge of scalars `s_j` with
//!   `P = Σ s_j·B_j`,
//! - `And(p_1, …, p_n)` proves every conjunct, sharing secrets by name,
//! - `Or(p_1, …, p_n)` proves exactly one disjunct, simulating the others.
//!
//! Secrets and public points are looked up by name in explicit maps. The
//! prover derives the challenge from a domain-separated hash over the
//! context tag, the predicate shape, the point map and all commitments; the
//! verifier re-derives it and checks every linear relation. An `Or` node
//! splits its scope's challenge across branches, which must sum back to it.

use std::collections::{BTreeMap, BTreeSet};

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::MultiscalarMul;

use crate::serialization::{Deserializer, Serializer};
use crate::{hash_to_scalar, random_scalar, Error, RandomStream};

pub type PointMap = BTreeMap<String, RistrettoPoint>;
pub type SecretMap = BTreeMap<String, Scalar>;

/// Builds a point map from name/point pairs.
pub fn points(entries: &[(&str, RistrettoPoint)]) -> PointMap {
    entries
        .iter()
        .map(|(name, point)| (name.to_string(), *point))
        .collect()
}

/// Builds a secret map from name/scalar pairs.
pub fn secrets(entries: &[(&str, Scalar)]) -> SecretMap {
    entries
        .iter()
        .map(|(name, scalar)| (name.to_string(), *scalar))
        .collect()
}

#[derive(Debug, Clone)]
pub enum Predicate {
    /// Knowledge of a linear representation `target = Σ secret_j·base_j`.
    Rep {
        target: String,
        terms: Vec<(String, String)>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    /// `Rep` over (secret name, base name) pairs.
    pub fn rep(target: &str, terms: &[(&str, &str)]) -> Predicate {
        Predicate::Rep {
            target: target.to_string(),
            terms: terms
                .iter()
                .map(|(secret, base)| (secret.to_string(), base.to_string()))
                .collect(),
        }
    }

    pub fn and(children: Vec<Predicate>) -> Predicate {
        Predicate::And(children)
    }

    pub fn or(children: Vec<Predicate>) -> Predicate {
        Predicate::Or(children)
    }

    /// Canonical text form, bound into the Fiat-Shamir hash.
    pub fn describe(&self) -> String {
        match self {
            Predicate::Rep { target, terms } => {
                let body = terms
                    .iter()
                    .map(|(secret, base)| format!("{}*{}", secret, base))
                    .collect::<Vec<_>>()
                    .join("+");
                format!("{}={}", target, body)
            }
            Predicate::And(children) => {
                let body = children
                    .iter()
                    .map(Predicate::describe)
                    .collect::<Vec<_>>()
                    .join(",");
                format!("AND({})", body)
            }
            Predicate::Or(children) => {
                let body = children
                    .iter()
                    .map(Predicate::describe)
                    .collect::<Vec<_>>()
                    .join(",");
                format!("OR({})", body)
            }
        }
    }

    /// Secret names belonging to this predicate's challenge scope.
    ///
    /// An `Or` child runs under its own challenge, so collection stops at
    /// disjunctions.
    fn scope_secrets(&self, names: &mut BTreeSet<String>) {
        match self {
            Predicate::Rep { terms, .. } => {
                for (secret, _) in terms {
                    names.insert(secret.clone());
                }
            }
            Predicate::And(children) => {
                for child in children {
                    child.scope_secrets(names);
                }
            }
            Predicate::Or(_) => {}
        }
    }

    fn scope_secret_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.scope_secrets(&mut names);
        names
    }
}

// Prover-side transcript tree.
enum Commitments {
    Rep(RistrettoPoint),
    And(Vec<Commitments>),
    Or(Vec<Branch>),
}

struct Branch {
    challenge: Option<Scalar>,
    real: bool,
    nonces: BTreeMap<String, Scalar>,
    responses: BTreeMap<String, Scalar>,
    node: Commitments,
}

fn lookup<'a>(points: &'a PointMap, name: &str) -> Result<&'a RistrettoPoint, Error> {
    points
        .get(name)
        .ok_or_else(|| Error::ProtocolMisuse(format!("predicate references unknown point {:?}", name)))
}

fn commit_real(
    predicate: &Predicate,
    points: &PointMap,
    secrets: &SecretMap,
    choice: Option<usize>,
    rng: &mut RandomStream,
    nonces: &mut BTreeMap<String, Scalar>,
) -> Result<Commitments, Error> {
    match predicate {
        Predicate::Rep { terms, .. } => {
            let mut commitment = RistrettoPoint::mul_base(&Scalar::ZERO);
            for (secret, base) in terms {
                if !secrets.contains_key(secret) {
                    return Err(Error::ProtocolMisuse(format!(
                        "prover is missing secret {:?}",
                        secret
                    )));
                }
                let nonce = *nonces
                    .entry(secret.clone())
                    .or_insert_with(|| random_scalar(rng));
                commitment += lookup(points, base)? * nonce;
            }
            Ok(Commitments::Rep(commitment))
        }
        Predicate::And(children) => {
            let mut nodes = Vec::with_capacity(children.len());
            for child in children {
                nodes.push(commit_real(child, points, secrets, choice, rng, nonces)?);
            }
            Ok(Commitments::And(nodes))
        }
        Predicate::Or(children) => {
            let chosen = choice.ok_or_else(|| {
                Error::ProtocolMisuse("disjunction proof requires a branch choice".into())
            })?;
            if chosen >= children.len() {
                return Err(Error::ProtocolMisuse(format!(
                    "branch choice {} out of range for {} disjuncts",
                    chosen,
                    children.len()
                )));
            }
            let mut branches = Vec::with_capacity(children.len());
            for (index, child) in children.iter().enumerate() {
                if index == chosen {
                    let mut branch_nonces = BTreeMap::new();
                    let node =
                        commit_real(child, points, secrets, choice, rng, &mut branch_nonces)?;
                    branches.push(Branch {
                        challenge: None,
                        real: true,
                        nonces: branch_nonces,
                        responses: BTreeMap::new(),
                        node,
                    });
                } else {
                    let challenge = random_scalar(rng);
                    let mut responses = BTreeMap::new();
                    let node = commit_simulated(child, points, challenge, rng, &mut responses)?;
                    branches.push(Branch {
                        challenge: Some(challenge),
                        real: false,
                        nonces: BTreeMap::new(),
                        responses,
                        node,
                    });
                }
            }
            Ok(Commitments::Or(branches))
        }
    }
}

fn commit_simulated(
    predicate: &Predicate,
    points: &PointMap,
    challenge: Scalar,
    rng: &mut RandomStream,
    responses: &mut BTreeMap<String, Scalar>,
) -> Result<Commitments, Error> {
    match predicate {
        Predicate::Rep { target, terms } => {
            let mut commitment = lookup(points, target)? * challenge;
            for (secret, base) in terms {
                let response = *responses
                    .entry(secret.clone())
                    .or_insert_with(|| random_scalar(rng));
                commitment += lookup(points, base)? * response;
            }
            Ok(Commitments::Rep(commitment))
        }
        Predicate::And(children) => {
            let mut nodes = Vec::with_capacity(children.len());
            for child in children {
                nodes.push(commit_simulated(child, points, challenge, rng, responses)?);
            }
            Ok(Commitments::And(nodes))
        }
        Predicate::Or(children) => {
            let mut remaining = challenge;
            let mut branches = Vec::with_capacity(children.len());
            for (index, child) in children.iter().enumerate() {
                let branch_challenge = if index + 1 == children.len() {
                    remaining
                } else {
                    let c = random_scalar(rng);
                    remaining -= c;
                    c
                };
                let mut branch_responses = BTreeMap::new();
                let node =
                    commit_simulated(child, points, branch_challenge, rng, &mut branch_responses)?;
                branches.push(Branch {
                    challenge: Some(branch_challenge),
                    real: false,
                    nonces: BTreeMap::new(),
                    responses: branch_responses,
                    node,
                });
            }
            Ok(Commitments::Or(branches))
        }
    }
}

fn collect_commitments(node: &Commitments, out: &mut Vec<RistrettoPoint>) {
    match node {
        Commitments::Rep(commitment) => out.push(*commitment),
        Commitments::And(children) => {
            for child in children {
                collect_commitments(child, out);
            }
        }
        Commitments::Or(branches) => {
            for branch in branches {
                collect_commitments(&branch.node, out);
            }
        }
    }
}

fn respond(
    predicate: &Predicate,
    node: &mut Commitments,
    secrets: &SecretMap,
    challenge: Scalar,
    nonces: &BTreeMap<String, Scalar>,
    responses: &mut BTreeMap<String, Scalar>,
) -> Result<(), Error> {
    match (predicate, node) {
        (Predicate::Rep { terms, .. }, Commitments::Rep(_)) => {
            for (secret, _) in terms {
                if !responses.contains_key(secret) {
                    let nonce = nonces[secret];
                    let response = nonce - challenge * secrets[secret];
                    responses.insert(secret.clone(), response);
                }
            }
            Ok(())
        }
        (Predicate::And(children), Commitments::And(nodes)) => {
            for (child, child_node) in children.iter().zip(nodes.iter_mut()) {
                respond(child, child_node, secrets, challenge, nonces, responses)?;
            }
            Ok(())
        }
        (Predicate::Or(children), Commitments::Or(branches)) => {
            let simulated_sum: Scalar = branches
                .iter()
                .filter(|branch| !branch.real)
                .filter_map(|branch| branch.challenge)
                .sum();
            for (child, branch) in children.iter().zip(branches.iter_mut()) {
                if branch.real {
                    let real_challenge = challenge - simulated_sum;
                    branch.challenge = Some(real_challenge);
                    let nonces = std::mem::take(&mut branch.nonces);
                    let mut branch_responses = std::mem::take(&mut branch.responses);
                    respond(
                        child,
                        &mut branch.node,
                        secrets,
                        real_challenge,
                        &nonces,
                        &mut branch_responses,
                    )?;
                    branch.responses = branch_responses;
                }
            }
            Ok(())
        }
        _ => Err(Error::ProtocolMisuse("malformed proof transcript".into())),
    }
}

fn serialize_node(s: &mut Serializer, predicate: &Predicate, node: &Commitments) {
    match (predicate, node) {
        (Predicate::Rep { .. }, Commitments::Rep(commitment)) => {
            s.write_point(commitment);
        }
        (Predicate::And(children), Commitments::And(nodes)) => {
            for (child, child_node) in children.iter().zip(nodes.iter()) {
                serialize_node(s, child, child_node);
            }
        }
        (Predicate::Or(children), Commitments::Or(branches)) => {
            for (child, branch) in children.iter().zip(branches.iter()) {
                s.write_scalar(&branch.challenge.expect("branch challenge assigned"));
                serialize_node(s, child, &branch.node);
                for name in child.scope_secret_names() {
                    s.write_scalar(&branch.responses[&name]);
                }
            }
        }
        _ => unreachable!("transcript mirrors the predicate"),
    }
}

fn derive_challenge(
    tag: &str,
    predicate: &Predicate,
    points: &PointMap,
    commitments: &[RistrettoPoint],
) -> Scalar {
    let mut s = Serializer::new();
    s.write_byte_slice(tag.as_bytes());
    s.write_byte_slice(predicate.describe().as_bytes());
    for (name, point) in points {
        s.write_byte_slice(name.as_bytes());
        s.write_point(point);
    }
    s.write_points(commitments);
    hash_to_scalar(b"votegral-sigma-challenge", &s.finish())
}

/// Produces a non-interactive proof for `predicate` under the context `tag`.
///
/// `choice` selects the branch the prover actually holds a witness for; the
/// same index applies to each disjunction along the proven path.
pub fn prove_predicate(
    tag: &str,
    predicate: &Predicate,
    points: &PointMap,
    secrets: &SecretMap,
    choice: Option<usize>,
    rng: &mut RandomStream,
) -> Result<Vec<u8>, Error> {
    let mut root_nonces = BTreeMap::new();
    let mut node = commit_real(predicate, points, secrets, choice, rng, &mut root_nonces)?;

    let mut commitments = Vec::new();
    collect_commitments(&node, &mut commitments);
    let challenge = derive_challenge(tag, predicate, points, &commitments);

    let mut root_responses = BTreeMap::new();
    respond(
        predicate,
        &mut node,
        secrets,
        challenge,
        &root_nonces,
        &mut root_responses,
    )?;

    let mut s = Serializer::new();
    serialize_node(&mut s, predicate, &node);
    for name in predicate.scope_secret_names() {
        s.write_scalar(&root_responses[&name]);
    }
    Ok(s.finish())
}

// Verifier-side transcript tree.
enum Parsed {
    Rep {
        commitment: RistrettoPoint,
    },
    And(Vec<Parsed>),
    Or(Vec<(Scalar, Parsed, BTreeMap<String, Scalar>)>),
}

fn parse_node(predicate: &Predicate, d: &mut Deserializer) -> Result<Parsed, Error> {
    match predicate {
        Predicate::Rep { .. } => Ok(Parsed::Rep {
            commitment: d.read_point()?,
        }),
        Predicate::And(children) => {
            let mut nodes = Vec::with_capacity(children.len());
            for child in children {
                nodes.push(parse_node(child, d)?);
            }
            Ok(Parsed::And(nodes))
        }
        Predicate::Or(children) => {
            let mut branches = Vec::with_capacity(children.len());
            for child in children {
                let challenge = d.read_scalar()?;
                let node = parse_node(child, d)?;
                let mut responses = BTreeMap::new();
                for name in child.scope_secret_names() {
                    responses.insert(name, d.read_scalar()?);
                }
                branches.push((challenge, node, responses));
            }
            Ok(Parsed::Or(branches))
        }
    }
}

fn collect_parsed_commitments(node: &Parsed, out: &mut Vec<RistrettoPoint>) {
    match node {
        Parsed::Rep { commitment } => out.push(*commitment),
        Parsed::And(children) => {
            for child in children {
                collect_parsed_commitments(child, out);
            }
        }
        Parsed::Or(branches) => {
            for (_, child, _) in branches {
                collect_parsed_commitments(child, out);
            }
        }
    }
}

fn check(
    predicate: &Predicate,
    node: &Parsed,
    points: &PointMap,
    challenge: Scalar,
    responses: &BTreeMap<String, Scalar>,
) -> Result<(), ()> {
    match (predicate, node) {
        (Predicate::Rep { target, terms }, Parsed::Rep { commitment }) => {
            let mut scalars = Vec::with_capacity(terms.len() + 1);
            let mut bases = Vec::with_capacity(terms.len() + 1);
            for (secret, base) in terms {
                scalars.push(*responses.get(secret).ok_or(())?);
                bases.push(*points.get(base).ok_or(())?);
            }
            scalars.push(challenge);
            bases.push(*points.get(target).ok_or(())?);
            let expected = RistrettoPoint::multiscalar_mul(scalars.iter(), bases.iter());
            if expected == *commitment {
                Ok(())
            } else {
                Err(())
            }
        }
        (Predicate::And(children), Parsed::And(nodes)) => {
            for (child, child_node) in children.iter().zip(nodes.iter()) {
                check(child, child_node, points, challenge, responses)?;
            }
            Ok(())
        }
        (Predicate::Or(children), Parsed::Or(branches)) => {
            let sum: Scalar = branches.iter().map(|(c, _, _)| *c).sum();
            if sum != challenge {
                return Err(());
            }
            for (child, (branch_challenge, child_node, branch_responses)) in
                children.iter().zip(branches.iter())
            {
                check(child, child_node, points, *branch_challenge, branch_responses)?;
            }
            Ok(())
        }
        _ => Err(()),
    }
}

/// Verifies a proof produced by [`prove_predicate`].
pub fn verify_predicate(
    tag: &str,
    predicate: &Predicate,
    points: &PointMap,
    proof: &[u8],
) -> Result<(), Error> {
    let invalid = || Error::proof(tag);

    let mut d = Deserializer::new(proof);
    let node = parse_node(predicate, &mut d).map_err(|_| invalid())?;
    let mut root_responses = BTreeMap::new();
    for name in predicate.scope_secret_names() {
        root_responses.insert(name, d.read_scalar().map_err(|_| invalid())?);
    }
    if !d.finished() {
        return Err(invalid());
    }

    let mut commitments = Vec::new();
    collect_parsed_commitments(&node, &mut commitments);
    let challenge = derive_challenge(tag, predicate, points, &commitments);

    check(predicate, &node, points, challenge, &root_responses).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{generator, RandomStream};

    fn rng() -> RandomStream {
        RandomStream::from_seed("proof-tests")
    }

    #[test]
    fn rep_proof_round_trip() {
        let mut rng = rng();
        let x = random_scalar(&mut rng);
        let public = RistrettoPoint::mul_base(&x);

        let predicate = Predicate::rep("P", &[("x", "B")]);
        let points = points(&[("P", public), ("B", generator())]);
        let secrets = secrets(&[("x", x)]);

        let proof =
            prove_predicate("RepTest", &predicate, &points, &secrets, None, &mut rng).unwrap();
        verify_predicate("RepTest", &predicate, &points, &proof).unwrap();

        // A different context tag must fail the re-derivation.
        assert!(verify_predicate("OtherTag", &predicate, &points, &proof).is_err());
    }

    #[test]
    fn multi_term_rep_with_shared_secret() {
        let mut rng = rng();
        let s = random_scalar(&mut rng);
        let k = random_scalar(&mut rng);
        let base_a = generator();
        let base_b = RistrettoPoint::mul_base(&random_scalar(&mut rng));
        let target = base_a * s + base_b * k;
        let linked = base_b * s;

        // Both conjuncts use the same secret "s"; the responses must agree.
        let predicate = Predicate::and(vec![
            Predicate::rep("T", &[("s", "A"), ("k", "B")]),
            Predicate::rep("L", &[("s", "B")]),
        ]);
        let points = points(&[("T", target), ("L", linked), ("A", base_a), ("B", base_b)]);
        let secrets = secrets(&[("s", s), ("k", k)]);

        let proof =
            prove_predicate("AndTest", &predicate, &points, &secrets, None, &mut rng).unwrap();
        verify_predicate("AndTest", &predicate, &points, &proof).unwrap();

        // Breaking the link (different L) must fail.
        let mut bad = points.clone();
        bad.insert("L".into(), base_b * k);
        assert!(verify_predicate("AndTest", &predicate, &bad, &proof).is_err());
    }

    #[test]
    fn or_proof_hides_the_branch() {
        let mut rng = rng();
        let x = random_scalar(&mut rng);
        let left = RistrettoPoint::mul_base(&x);
        let right = RistrettoPoint::mul_base(&random_scalar(&mut rng));

        let predicate = Predicate::or(vec![
            Predicate::rep("L", &[("x", "B")]),
            Predicate::rep("R", &[("x", "B")]),
        ]);
        let points = points(&[("L", left), ("R", right), ("B", generator())]);
        let secrets = secrets(&[("x", x)]);

        // Knowledge of the left witness proves the disjunction.
        let proof =
            prove_predicate("OrTest", &predicate, &points, &secrets, Some(0), &mut rng).unwrap();
        verify_predicate("OrTest", &predicate, &points, &proof).unwrap();

        // Claiming the right branch with the left witness must not verify.
        let forged =
            prove_predicate("OrTest", &predicate, &points, &secrets, Some(1), &mut rng).unwrap();
        assert!(verify_predicate("OrTest", &predicate, &points, &forged).is_err());

        // A missing choice is a caller bug.
        let err = prove_predicate("OrTest", &predicate, &points, &secrets, None, &mut rng);
        assert!(matches!(err, Err(Error::ProtocolMisuse(_))));
    }

    #[test]
    fn bit_flips_invalidate_the_proof() {
        let mut rng = rng();
        let x = random_scalar(&mut rng);
        let public = RistrettoPoint::mul_base(&x);

        let predicate = Predicate::rep("P", &[("x", "B")]);
        let points = points(&[("P", public), ("B", generator())]);
        let secrets = secrets(&[("x", x)]);
        let proof =
            prove_predicate("FlipTest", &predicate, &points, &secrets, None, &mut rng).unwrap();

        for index in 0..proof.len() {
            let mut tampered = proof.clone();
            tampered[index] ^= 0x01;
            assert!(
                verify_predicate("FlipTest", &predicate, &points, &tampered).is_err(),
                "flip at byte {} was accepted",
                index
            );
        }
    }

    #[test]
    fn truncated_proofs_are_rejected() {
        let mut rng = rng();
        let x = random_scalar(&mut rng);
        let predicate = Predicate::rep("P", &[("x", "B")]);
        let points = points(&[("P", RistrettoPoint::mul_base(&x)), ("B", generator())]);
        let secrets = secrets(&[("x", x)]);
        let proof =
            prove_predicate("TruncTest", &predicate, &points, &secrets, None, &mut rng).unwrap();

        assert!(verify_predicate("TruncTest", &predicate, &points, &proof[..proof.len() - 1])
            .is_err());
        let mut extended = proof.clone();
        extended.push(0);
        assert!(verify_predicate("TruncTest", &predicate, &points, &extended).is_err());
    }
}
