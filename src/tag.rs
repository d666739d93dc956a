//! The distributed deterministic tag (DDT) protocol.
//!
//! Maps each ElGamal ciphertext `(C1, C2)` encrypting a credential `K` to
//! a public point `T(K)` such that equal plaintexts produce equal tags, no
//! proper subset of tally members can recover `K`, and every
//! transformation carries a zero-knowledge proof.
//!
//! Round 1 (additive blinding): each member publishes a commitment
//! `S_i = s_i·G` with a proof of knowledge of `s_i`; the canonical
//! semantics applies every blinding factor to `C2`:
//! `C2^{R1} = C2 + Σ S_i`. `C1` is unchanged.
//!
//! Round 2 (multiplicative re-masking with partial decryption): in strict
//! member order, each member transforms every ciphertext
//! `C1' = s_i·C1`, `C2' = s_i·(C2 − k_i·C1)` and publishes one combined
//! proof per ciphertext tying the transformation to the same `s_i` and its
//! long-term share `k_i`. After the final member, `C2` is the tag.
//!
//! Because each member reuses the same `s_i` and `k_i` for the whole
//! batch (and for every batch of one tally run), two ciphertexts
//! encrypting the same credential end at the same tag.

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;

use crate::proof::{self, PointMap, Predicate};
use crate::serde_hex::Hex as _;
use crate::{concurrency, generator, random_scalar, Error, KeyShare, RandomStream};

const LOG_TARGET: &str = "votegral::tag";

const ROUND1_TAG: &str = "Round1Knowledge";
const ROUND2_TAG: &str = "Round2Combined";

/// A single server in the distributed tagging protocol.
///
/// Holds the member's long-term key share and the one-time secret used
/// for both rounds of one tally run. The one-time secret must live for
/// the whole run: registration tags and vote tags are only comparable
/// because every batch is masked by the same secrets.
pub struct TallyMember {
    pub id: u32,
    secret_share: Scalar,
    public_key: RistrettoPoint,
    fresh_secret: Scalar,
    public_commitment: RistrettoPoint,
}

/// The public data a member publishes after Round 1.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Round1Bundle {
    pub member_id: u32,
    /// `S_i = s_i·G` for the member's one-time secret.
    pub public_commitment: RistrettoPoint,
    #[serde(with = "crate::serde_hex::HexForm")]
    pub proof: Vec<u8>,
}

/// The public data a member publishes after Round 2.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PartialTagBundle {
    pub member_id: u32,
    pub updated_c1s: Vec<RistrettoPoint>,
    pub updated_c2s: Vec<RistrettoPoint>,
    /// One combined proof per ciphertext transformation.
    pub proofs: Vec<Vec<u8>>,
}

/// The complete public transcript of a DDT run: a log of the work of all
/// members across both rounds, re-verifiable by any observer.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DeterministicTagProof {
    pub round1_bundles: Vec<Round1Bundle>,
    pub round2_bundles: Vec<PartialTagBundle>,
}

impl TallyMember {
    /// Creates a member from its key share and draws the one-time secret
    /// for this run.
    pub fn new(id: u32, share: &KeyShare, rng: &mut RandomStream) -> Self {
        let fresh_secret = random_scalar(rng);
        TallyMember {
            id,
            secret_share: share.sk,
            public_key: share.pk,
            fresh_secret,
            public_commitment: RistrettoPoint::mul_base(&fresh_secret),
        }
    }

    pub fn public_key(&self) -> RistrettoPoint {
        self.public_key
    }

    /// `S_i = s_i·G`.
    pub fn public_commitment(&self) -> RistrettoPoint {
        self.public_commitment
    }

    /// Publishes the Round 1 commitment and its proof of knowledge.
    fn perform_round1(&self, rng: &mut RandomStream) -> Result<Round1Bundle, Error> {
        let predicate = Predicate::rep("S", &[("s", "B")]);
        let points = proof::points(&[("S", self.public_commitment), ("B", generator())]);
        let secrets = proof::secrets(&[("s", self.fresh_secret)]);
        let proof = proof::prove_predicate(ROUND1_TAG, &predicate, &points, &secrets, None, rng)?;

        Ok(Round1Bundle {
            member_id: self.id,
            public_commitment: self.public_commitment,
            proof,
        })
    }

    fn remask(&self, c1: &RistrettoPoint, c2: &RistrettoPoint) -> (RistrettoPoint, RistrettoPoint) {
        let new_c1 = c1 * self.fresh_secret;
        let partial_dec = c1 * self.secret_share;
        let new_c2 = (c2 - partial_dec) * self.fresh_secret;
        (new_c1, new_c2)
    }

    /// The combined Round 2 proof: the same `s_i` links the Round 1
    /// commitment and both ciphertext components, the same `k_i` links the
    /// member's public key share, and `sk_i = s_i·k_i` carries the partial
    /// decryption.
    fn prove_round2(
        &self,
        c1_old: &RistrettoPoint,
        c2_old: &RistrettoPoint,
        c1_new: &RistrettoPoint,
        c2_new: &RistrettoPoint,
        rng: &mut RandomStream,
    ) -> Result<Vec<u8>, Error> {
        let predicate = round2_predicate();
        let points = round2_points(
            &self.public_commitment,
            &self.public_key,
            c1_old,
            c2_old,
            c1_new,
            c2_new,
        );
        let secrets = proof::secrets(&[
            ("s", self.fresh_secret),
            ("k", self.secret_share),
            ("sk", self.fresh_secret * self.secret_share),
        ]);
        proof::prove_predicate(ROUND2_TAG, &predicate, &points, &secrets, None, rng)
    }

    /// Re-masks every ciphertext and proves each transformation.
    fn perform_round2(
        &self,
        cores: usize,
        prev_c1s: &[RistrettoPoint],
        prev_c2s: &[RistrettoPoint],
        rng: &mut RandomStream,
    ) -> Result<PartialTagBundle, Error> {
        if prev_c1s.len() != prev_c2s.len() {
            return Err(Error::ShapeMismatch(format!(
                "{} C1 components but {} C2 components",
                prev_c1s.len(),
                prev_c2s.len()
            )));
        }

        // Fork one stream per ciphertext up front so the proofs are
        // identical no matter how the work is scheduled.
        let items: Vec<(usize, RandomStream)> =
            (0..prev_c1s.len()).map(|i| (i, rng.fork())).collect();

        let results = concurrency::map(cores, items, |(i, mut stream)| {
            let (new_c1, new_c2) = self.remask(&prev_c1s[i], &prev_c2s[i]);
            let proof = self.prove_round2(&prev_c1s[i], &prev_c2s[i], &new_c1, &new_c2, &mut stream)?;
            Ok((new_c1, new_c2, proof))
        })?;

        let mut bundle = PartialTagBundle {
            member_id: self.id,
            updated_c1s: Vec::with_capacity(results.len()),
            updated_c2s: Vec::with_capacity(results.len()),
            proofs: Vec::with_capacity(results.len()),
        };
        for (new_c1, new_c2, proof) in results {
            bundle.updated_c1s.push(new_c1);
            bundle.updated_c2s.push(new_c2);
            bundle.proofs.push(proof);
        }
        Ok(bundle)
    }
}

fn round2_predicate() -> Predicate {
    Predicate::and(vec![
        Predicate::rep("S", &[("s", "B")]),
        Predicate::rep("K", &[("k", "B")]),
        Predicate::rep("C1_new", &[("s", "C1_old")]),
        Predicate::rep("C2_new", &[("s", "C2_old"), ("sk", "C1_old_neg")]),
    ])
}

fn round2_points(
    public_commitment: &RistrettoPoint,
    member_pk: &RistrettoPoint,
    c1_old: &RistrettoPoint,
    c2_old: &RistrettoPoint,
    c1_new: &RistrettoPoint,
    c2_new: &RistrettoPoint,
) -> PointMap {
    proof::points(&[
        ("B", generator()),
        ("S", *public_commitment),
        ("K", *member_pk),
        ("C1_old", *c1_old),
        ("C2_old", *c2_old),
        ("C1_new", *c1_new),
        ("C2_new", *c2_new),
        ("C1_old_neg", -c1_old),
    ])
}

/// The blinded `C2` components after Round 1: `C2 + Σ S_i`.
fn round1_final_c2s(
    initial_c2s: &[RistrettoPoint],
    commitments: &[RistrettoPoint],
) -> Vec<RistrettoPoint> {
    let total: RistrettoPoint = commitments.iter().sum();
    initial_c2s.iter().map(|c2| c2 + total).collect()
}

/// Runs the full two-round DDT protocol over a batch of ciphertext
/// components, returning the final tags and the complete transcript.
pub fn generate_deterministic_tags(
    cores: usize,
    initial_c1s: &[RistrettoPoint],
    initial_c2s: &[RistrettoPoint],
    members: &[TallyMember],
    rng: &mut RandomStream,
) -> Result<(Vec<RistrettoPoint>, DeterministicTagProof), Error> {
    if initial_c1s.is_empty() {
        return Ok((Vec::new(), DeterministicTagProof::default()));
    }
    if initial_c1s.len() != initial_c2s.len() {
        return Err(Error::ShapeMismatch(format!(
            "{} C1 components but {} C2 components",
            initial_c1s.len(),
            initial_c2s.len()
        )));
    }
    if members.is_empty() {
        return Err(Error::ProtocolMisuse(
            "tagging requires at least one tally member".into(),
        ));
    }

    // Round 1: additive blinding.
    tracing::debug!(target: LOG_TARGET, batch = initial_c1s.len(), "DDT Round 1");
    let mut round1_bundles = Vec::with_capacity(members.len());
    for member in members {
        round1_bundles.push(member.perform_round1(rng)?);
    }
    let commitments: Vec<RistrettoPoint> = round1_bundles
        .iter()
        .map(|bundle| bundle.public_commitment)
        .collect();
    let mut current_c2s = round1_final_c2s(initial_c2s, &commitments);
    let mut current_c1s = initial_c1s.to_vec();

    // Round 2: multiplicative re-masking and partial decryption, in
    // strict member order.
    tracing::debug!(target: LOG_TARGET, "DDT Round 2");
    let mut round2_bundles = Vec::with_capacity(members.len());
    for member in members {
        let bundle = member.perform_round2(cores, &current_c1s, &current_c2s, rng)?;
        current_c1s = bundle.updated_c1s.clone();
        current_c2s = bundle.updated_c2s.clone();
        round2_bundles.push(bundle);
    }

    Ok((
        current_c2s,
        DeterministicTagProof {
            round1_bundles,
            round2_bundles,
        },
    ))
}

/// Replays a DDT transcript against the initial ciphertexts and the
/// members' public data, returning the recomputed tags.
pub fn verify_deterministic_tags(
    cores: usize,
    initial_c1s: &[RistrettoPoint],
    initial_c2s: &[RistrettoPoint],
    member_public_keys: &[RistrettoPoint],
    transcript: &DeterministicTagProof,
) -> Result<Vec<RistrettoPoint>, Error> {
    if initial_c1s.is_empty() && transcript.round1_bundles.is_empty() {
        return Ok(Vec::new());
    }
    if initial_c1s.len() != initial_c2s.len() {
        return Err(Error::ShapeMismatch(format!(
            "{} C1 components but {} C2 components",
            initial_c1s.len(),
            initial_c2s.len()
        )));
    }
    if transcript.round1_bundles.len() != member_public_keys.len()
        || transcript.round2_bundles.len() != member_public_keys.len()
    {
        return Err(Error::ProtocolMisuse(format!(
            "transcript covers {} members, expected {}",
            transcript.round1_bundles.len(),
            member_public_keys.len()
        )));
    }

    // Bundles must pair up, in order, one per distinct member.
    let mut seen = std::collections::HashSet::new();
    for (r1, r2) in transcript
        .round1_bundles
        .iter()
        .zip(transcript.round2_bundles.iter())
    {
        if r1.member_id != r2.member_id {
            return Err(Error::ProtocolMisuse(format!(
                "mismatched member ids between rounds: {} vs {}",
                r1.member_id, r2.member_id
            )));
        }
        if !seen.insert(r1.member_id) {
            return Err(Error::ProtocolMisuse(format!(
                "member {} appears twice in the transcript",
                r1.member_id
            )));
        }
    }

    // Round 1: each proof of knowledge, then the canonical blinding.
    let predicate = Predicate::rep("S", &[("s", "B")]);
    for bundle in &transcript.round1_bundles {
        let points = proof::points(&[("S", bundle.public_commitment), ("B", generator())]);
        proof::verify_predicate(ROUND1_TAG, &predicate, &points, &bundle.proof)
            .map_err(|_| Error::proof_member(ROUND1_TAG, bundle.member_id))?;
    }
    let commitments: Vec<RistrettoPoint> = transcript
        .round1_bundles
        .iter()
        .map(|bundle| bundle.public_commitment)
        .collect();
    let mut current_c2s = round1_final_c2s(initial_c2s, &commitments);
    let mut current_c1s = initial_c1s.to_vec();

    // Round 2: replay each member's transformation.
    let predicate = round2_predicate();
    for ((r1, bundle), member_pk) in transcript
        .round1_bundles
        .iter()
        .zip(transcript.round2_bundles.iter())
        .zip(member_public_keys.iter())
    {
        let n = current_c1s.len();
        if bundle.updated_c1s.len() != n
            || bundle.updated_c2s.len() != n
            || bundle.proofs.len() != n
        {
            return Err(Error::ShapeMismatch(format!(
                "member {} published a bundle of the wrong size",
                bundle.member_id
            )));
        }

        let indices: Vec<usize> = (0..n).collect();
        concurrency::for_each(cores, &indices, |_, &index| {
            let points = round2_points(
                &r1.public_commitment,
                member_pk,
                &current_c1s[index],
                &current_c2s[index],
                &bundle.updated_c1s[index],
                &bundle.updated_c2s[index],
            );
            proof::verify_predicate(ROUND2_TAG, &predicate, &points, &bundle.proofs[index])
                .map_err(|_| Error::proof_at(ROUND2_TAG, bundle.member_id, index))
        })?;

        current_c1s = bundle.updated_c1s.clone();
        current_c2s = bundle.updated_c2s.clone();
    }

    Ok(current_c2s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{encrypt_point, generate_key_shares, split_components};

    struct Setup {
        rng: RandomStream,
        members: Vec<TallyMember>,
        member_pks: Vec<RistrettoPoint>,
        ea_pk: RistrettoPoint,
    }

    fn setup(seed: &str, count: u32) -> Setup {
        let mut rng = RandomStream::from_seed(seed);
        let (shares, ea_pk) = generate_key_shares(count, &mut rng).unwrap();
        let members: Vec<TallyMember> = shares
            .iter()
            .enumerate()
            .map(|(i, share)| TallyMember::new(i as u32 + 1, share, &mut rng))
            .collect();
        let member_pks = members.iter().map(|m| m.public_key()).collect();
        Setup {
            rng,
            members,
            member_pks,
            ea_pk,
        }
    }

    #[test]
    fn equal_credentials_produce_equal_tags() {
        let mut s = setup("ddt-determinism", 3);
        let credential = RistrettoPoint::mul_base(&random_scalar(&mut s.rng));
        let other = RistrettoPoint::mul_base(&random_scalar(&mut s.rng));

        // Two independent encryptions of the same credential, one of a
        // different credential.
        let cts = vec![
            encrypt_point(&s.ea_pk, &credential, &mut s.rng).0,
            encrypt_point(&s.ea_pk, &credential, &mut s.rng).0,
            encrypt_point(&s.ea_pk, &other, &mut s.rng).0,
        ];
        let (c1s, c2s) = split_components(&cts);

        let (tags, _) =
            generate_deterministic_tags(1, &c1s, &c2s, &s.members, &mut s.rng).unwrap();
        assert_eq!(tags[0], tags[1]);
        assert_ne!(tags[0], tags[2]);
    }

    #[test]
    fn tags_are_deterministic_across_batches() {
        let mut s = setup("ddt-batches", 2);
        let credential = RistrettoPoint::mul_base(&random_scalar(&mut s.rng));

        let batch_a = vec![encrypt_point(&s.ea_pk, &credential, &mut s.rng).0];
        let batch_b = vec![encrypt_point(&s.ea_pk, &credential, &mut s.rng).0];
        let (a1, a2) = split_components(&batch_a);
        let (b1, b2) = split_components(&batch_b);

        // The same members (same one-time secrets) tag both batches.
        let (tags_a, _) =
            generate_deterministic_tags(1, &a1, &a2, &s.members, &mut s.rng).unwrap();
        let (tags_b, _) =
            generate_deterministic_tags(1, &b1, &b2, &s.members, &mut s.rng).unwrap();
        assert_eq!(tags_a[0], tags_b[0]);
    }

    #[test]
    fn honest_transcript_verifies_and_matches_tags() {
        let mut s = setup("ddt-verify", 4);
        let cts: Vec<_> = (0..3)
            .map(|_| {
                let m = RistrettoPoint::mul_base(&random_scalar(&mut s.rng));
                encrypt_point(&s.ea_pk, &m, &mut s.rng).0
            })
            .collect();
        let (c1s, c2s) = split_components(&cts);

        let (tags, transcript) =
            generate_deterministic_tags(1, &c1s, &c2s, &s.members, &mut s.rng).unwrap();
        let replayed =
            verify_deterministic_tags(1, &c1s, &c2s, &s.member_pks, &transcript).unwrap();
        assert_eq!(tags, replayed);
    }

    #[test]
    fn tampered_round1_commitment_is_rejected() {
        let mut s = setup("ddt-tamper-r1", 3);
        let ct = encrypt_point(&s.ea_pk, &generator(), &mut s.rng).0;
        let (c1s, c2s) = split_components(&[ct]);

        let (_, mut transcript) =
            generate_deterministic_tags(1, &c1s, &c2s, &s.members, &mut s.rng).unwrap();
        transcript.round1_bundles[1].public_commitment += generator();

        let err = verify_deterministic_tags(1, &c1s, &c2s, &s.member_pks, &transcript)
            .unwrap_err();
        assert!(matches!(err, Error::ProofInvalid { member: Some(2), .. }));
    }

    #[test]
    fn tampered_round2_proof_identifies_member_and_index() {
        let mut s = setup("ddt-tamper-r2", 3);
        let cts: Vec<_> = (0..2)
            .map(|_| encrypt_point(&s.ea_pk, &generator(), &mut s.rng).0)
            .collect();
        let (c1s, c2s) = split_components(&cts);

        let (_, mut transcript) =
            generate_deterministic_tags(1, &c1s, &c2s, &s.members, &mut s.rng).unwrap();
        transcript.round2_bundles[1].proofs[1][5] ^= 0x01;

        let err = verify_deterministic_tags(1, &c1s, &c2s, &s.member_pks, &transcript)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ProofInvalid {
                member: Some(2),
                index: Some(1),
                ..
            }
        ));
    }

    #[test]
    fn tampered_round2_point_is_rejected() {
        let mut s = setup("ddt-tamper-point", 2);
        let ct = encrypt_point(&s.ea_pk, &generator(), &mut s.rng).0;
        let (c1s, c2s) = split_components(&[ct]);

        let (_, mut transcript) =
            generate_deterministic_tags(1, &c1s, &c2s, &s.members, &mut s.rng).unwrap();
        transcript.round2_bundles[0].updated_c2s[0] += generator();

        assert!(verify_deterministic_tags(1, &c1s, &c2s, &s.member_pks, &transcript).is_err());
    }

    #[test]
    fn out_of_order_members_are_rejected() {
        let mut s = setup("ddt-order", 3);
        let ct = encrypt_point(&s.ea_pk, &generator(), &mut s.rng).0;
        let (c1s, c2s) = split_components(&[ct]);

        let (_, mut transcript) =
            generate_deterministic_tags(1, &c1s, &c2s, &s.members, &mut s.rng).unwrap();
        transcript.round2_bundles.swap(0, 1);

        let err = verify_deterministic_tags(1, &c1s, &c2s, &s.member_pks, &transcript)
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolMisuse(_)));
    }

    #[test]
    fn empty_batch_yields_no_tags() {
        let mut s = setup("ddt-empty", 2);
        let (tags, transcript) =
            generate_deterministic_tags(1, &[], &[], &s.members, &mut s.rng).unwrap();
        assert!(tags.is_empty());
        assert!(transcript.round1_bundles.is_empty());
    }
}
