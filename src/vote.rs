//! Ballot construction.
//!
//! A ballot carries a fresh encryption of the voter's credential public
//! key with a proof of correct encryption, an encrypted 0-or-1 vote with a
//! disjunctive proof that reveals nothing about the choice, and a Schnorr
//! signature under the credential key binding the two together.

use curve25519_dalek::ristretto::RistrettoPoint;

use crate::proof::{points, secrets, Predicate, PointMap};
use crate::{
    encode_plaintext, encrypt_point, generator, proof, Credential, ElGamalCiphertext, Error,
    RandomStream, SchnorrSignature, VotingEntry,
};

pub(crate) const CREDENTIAL_PROOF_TAG: &str = "CredentialEncryption";
pub(crate) const VOTE_PROOF_TAG: &str = "BallotEncryption";

/// Statement that `ciphertext` encrypts exactly `credential_pk` under the
/// election key: knowledge of `x` with `C1 = x·G` and `C2 − cred_pk = x·Pk`.
pub(crate) fn credential_encryption_points(
    ea_pk: &RistrettoPoint,
    ciphertext: &ElGamalCiphertext,
    credential_pk: &RistrettoPoint,
) -> (Predicate, PointMap) {
    let predicate = Predicate::and(vec![
        Predicate::rep("C1", &[("x", "G")]),
        Predicate::rep("X", &[("x", "eaPk")]),
    ]);
    let points = points(&[
        ("C1", ciphertext.c1),
        ("X", ciphertext.c2 - credential_pk),
        ("G", generator()),
        ("eaPk", *ea_pk),
    ]);
    (predicate, points)
}

/// Statement that `ciphertext` encrypts the identity (vote 0) or the
/// generator (vote 1), without revealing which.
pub(crate) fn vote_points(
    ea_pk: &RistrettoPoint,
    ciphertext: &ElGamalCiphertext,
) -> (Predicate, PointMap) {
    let proof_for_0 = Predicate::and(vec![
        Predicate::rep("C1", &[("x", "G")]),
        Predicate::rep("C2", &[("x", "eaPk")]),
    ]);
    let proof_for_1 = Predicate::and(vec![
        Predicate::rep("C1", &[("x", "G")]),
        Predicate::rep("C2Prime", &[("x", "eaPk")]),
    ]);
    let predicate = Predicate::or(vec![proof_for_0, proof_for_1]);

    let points = points(&[
        ("C1", ciphertext.c1),
        ("C2", ciphertext.c2),
        ("C2Prime", ciphertext.c2 - generator()),
        ("G", generator()),
        ("eaPk", *ea_pk),
    ]);
    (predicate, points)
}

/// Encrypts the credential public key and proves the ciphertext encrypts
/// exactly that point.
pub fn create_encrypted_credential(
    ea_pk: &RistrettoPoint,
    credential_pk: &RistrettoPoint,
    rng: &mut RandomStream,
) -> Result<(ElGamalCiphertext, Vec<u8>), Error> {
    let (ciphertext, _, x) = encrypt_point(ea_pk, credential_pk, rng);
    let (predicate, points) = credential_encryption_points(ea_pk, &ciphertext, credential_pk);
    let proof = proof::prove_predicate(
        CREDENTIAL_PROOF_TAG,
        &predicate,
        &points,
        &secrets(&[("x", x)]),
        None,
        rng,
    )?;
    Ok((ciphertext, proof))
}

/// Encrypts a 0-or-1 vote and proves it is one of the two, hiding which.
pub fn create_vote_with_proof(
    ea_pk: &RistrettoPoint,
    vote: u8,
    rng: &mut RandomStream,
) -> Result<(ElGamalCiphertext, Vec<u8>), Error> {
    let plaintext = encode_plaintext(vote)?;
    let (ciphertext, _, x) = encrypt_point(ea_pk, &plaintext, rng);

    let (predicate, points) = vote_points(ea_pk, &ciphertext);
    let proof = proof::prove_predicate(
        VOTE_PROOF_TAG,
        &predicate,
        &points,
        &secrets(&[("x", x)]),
        Some(vote as usize),
        rng,
    )?;
    Ok((ciphertext, proof))
}

/// Builds a complete, signed voting record for the given credential.
pub fn cast_vote(
    ea_pk: &RistrettoPoint,
    credential: &Credential,
    vote: u8,
    rng: &mut RandomStream,
) -> Result<VotingEntry, Error> {
    let (enc_credential_pk, enc_credential_proof) =
        create_encrypted_credential(ea_pk, &credential.public_key(), rng)?;
    let (enc_vote, enc_vote_proof) = create_vote_with_proof(ea_pk, vote, rng)?;

    let mut entry = VotingEntry {
        credential_pk: credential.public_key(),
        enc_credential_pk,
        enc_credential_proof,
        enc_vote,
        enc_vote_proof,
        // Placeholder until the payload exists to sign.
        ballot_sig: SchnorrSignature {
            r: generator(),
            s: curve25519_dalek::scalar::Scalar::ZERO,
        },
    };
    entry.ballot_sig = SchnorrSignature::sign(
        &credential.private_key(),
        &credential.public_key(),
        &entry.signing_payload(),
        rng,
    );
    Ok(entry)
}
