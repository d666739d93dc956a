//! ElGamal encryption over the suite group, with threshold decryption.
//!
//! Plaintexts are group elements. Votes are encoded as `0 ↔ identity` and
//! `1 ↔ G`; any other plaintext surfacing at final decryption is fatal.

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;

use crate::proof::{points, secrets, prove_predicate, verify_predicate, Predicate};
use crate::serde_hex::Hex as _;
use crate::{generator, random_scalar, Error, KeyShare, RandomStream};

const DECRYPTION_TAG: &str = "ElGamalDecryption";

/// The public components of an ElGamal encryption.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElGamalCiphertext {
    /// Ephemeral part: `x·G`.
    pub c1: RistrettoPoint,
    /// Blinded message: `M + x·Pk`.
    pub c2: RistrettoPoint,
}

/// One member's contribution to a threshold decryption, with its proof of
/// equality of discrete logs binding `X = sk·C1` to `Pk = sk·G`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PartialDecryption {
    /// The recovered shared secret `sk_i·C1` removed from `C2`.
    pub shared_secret: RistrettoPoint,
    #[serde(with = "crate::serde_hex::HexForm")]
    pub proof: Vec<u8>,
}

/// Encrypts a group element under `pk`.
///
/// Also exposes the shared secret `X = x·Pk` and the ephemeral scalar `x`
/// for the proofs built on top of the encryption.
pub fn encrypt_point(
    pk: &RistrettoPoint,
    message: &RistrettoPoint,
    rng: &mut RandomStream,
) -> (ElGamalCiphertext, RistrettoPoint, Scalar) {
    let x = random_scalar(rng);
    let shared = pk * x;
    let ciphertext = ElGamalCiphertext {
        c1: RistrettoPoint::mul_base(&x),
        c2: message + shared,
    };
    (ciphertext, shared, x)
}

impl ElGamalCiphertext {
    /// Decrypts with a full private key.
    pub fn decrypt(&self, sk: &Scalar) -> RistrettoPoint {
        self.c2 - self.c1 * sk
    }

    /// Produces a partial decryption of `C2` together with a proof of
    /// correct decryption under the member's key share.
    pub fn decrypt_with_proof(
        &self,
        share: &KeyShare,
        rng: &mut RandomStream,
    ) -> Result<(RistrettoPoint, PartialDecryption), Error> {
        let shared = self.c1 * share.sk;
        let message = self.c2 - shared;

        let predicate = decryption_predicate();
        let points = points(&[
            ("X", shared),
            ("C1", self.c1),
            ("Pk", share.pk),
            ("G", generator()),
        ]);
        let secrets = secrets(&[("sk", share.sk)]);
        let proof = prove_predicate(DECRYPTION_TAG, &predicate, &points, &secrets, None, rng)?;

        Ok((
            message,
            PartialDecryption {
                shared_secret: shared,
                proof,
            },
        ))
    }
}

fn decryption_predicate() -> Predicate {
    Predicate::and(vec![
        Predicate::rep("X", &[("sk", "C1")]),
        Predicate::rep("Pk", &[("sk", "G")]),
    ])
}

/// Decrypts a ciphertext by iterating over all key shares.
///
/// Each member consumes the current `C2` and its own share, emitting a
/// proof; the final `C2` is the plaintext point. Shares never leave their
/// owner: only the partial decryptions and proofs are published.
pub fn threshold_decrypt(
    ciphertext: &ElGamalCiphertext,
    shares: &[KeyShare],
    rng: &mut RandomStream,
) -> Result<(RistrettoPoint, Vec<PartialDecryption>), Error> {
    if shares.is_empty() {
        return Err(Error::ProtocolMisuse(
            "threshold decryption requires at least one key share".into(),
        ));
    }

    let mut current = *ciphertext;
    let mut partials = Vec::with_capacity(shares.len());
    for share in shares {
        let (message, partial) = current.decrypt_with_proof(share, rng)?;
        current.c2 = message;
        partials.push(partial);
    }

    Ok((current.c2, partials))
}

/// Replays a threshold decryption from public data only.
pub fn verify_threshold_decryption(
    ciphertext: &ElGamalCiphertext,
    member_pks: &[RistrettoPoint],
    partials: &[PartialDecryption],
    plaintext: &RistrettoPoint,
) -> Result<(), Error> {
    if member_pks.len() != partials.len() {
        return Err(Error::ShapeMismatch(format!(
            "{} key shares but {} partial decryptions",
            member_pks.len(),
            partials.len()
        )));
    }

    let predicate = decryption_predicate();
    let mut c2 = ciphertext.c2;
    for (member, (pk, partial)) in member_pks.iter().zip(partials.iter()).enumerate() {
        let points = points(&[
            ("X", partial.shared_secret),
            ("C1", ciphertext.c1),
            ("Pk", *pk),
            ("G", generator()),
        ]);
        verify_predicate(DECRYPTION_TAG, &predicate, &points, &partial.proof)
            .map_err(|_| Error::proof_member(DECRYPTION_TAG, member as u32))?;
        c2 -= partial.shared_secret;
    }

    if c2 != *plaintext {
        return Err(Error::proof(DECRYPTION_TAG));
    }
    Ok(())
}

/// Encodes a two-option vote as a group element.
pub fn encode_plaintext(vote: u8) -> Result<RistrettoPoint, Error> {
    match vote {
        0 => Ok(RistrettoPoint::identity()),
        1 => Ok(generator()),
        other => Err(Error::ProtocolMisuse(format!(
            "vote must be 0 or 1, got {}",
            other
        ))),
    }
}

/// Decodes a decrypted plaintext back to a vote.
pub fn decode_plaintext(message: &RistrettoPoint, index: usize) -> Result<u8, Error> {
    if *message == RistrettoPoint::identity() {
        Ok(0)
    } else if *message == generator() {
        Ok(1)
    } else {
        Err(Error::DecryptionImpossible { index })
    }
}

/// Splits ciphertexts into parallel C1 and C2 component vectors.
pub fn split_components(
    ciphertexts: &[ElGamalCiphertext],
) -> (Vec<RistrettoPoint>, Vec<RistrettoPoint>) {
    let c1s = ciphertexts.iter().map(|ct| ct.c1).collect();
    let c2s = ciphertexts.iter().map(|ct| ct.c2).collect();
    (c1s, c2s)
}

/// Rebuilds ciphertexts from parallel component vectors.
pub fn join_components(
    c1s: &[RistrettoPoint],
    c2s: &[RistrettoPoint],
) -> Result<Vec<ElGamalCiphertext>, Error> {
    if c1s.len() != c2s.len() {
        return Err(Error::ShapeMismatch(format!(
            "{} C1 components but {} C2 components",
            c1s.len(),
            c2s.len()
        )));
    }
    Ok(c1s
        .iter()
        .zip(c2s.iter())
        .map(|(c1, c2)| ElGamalCiphertext { c1: *c1, c2: *c2 })
        .collect())
}
