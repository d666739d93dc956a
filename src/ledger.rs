//! The append-only election ledger and its record invariants.
//!
//! Four sub-ledgers: registration records, envelope records, published
//! credentials, and cast votes. Writes happen during the registration and
//! voting phases; the tally operates over an immutable snapshot and never
//! touches the mutable ledger.

use std::collections::HashSet;

use curve25519_dalek::ristretto::RistrettoPoint;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use indexmap::IndexMap;
use sha2::{Digest, Sha256};

use crate::serde_hex::{EdPublicKeyHex, EdSignatureHex, Hex as _};
use crate::serialization::Serializer;
use crate::vote::{credential_encryption_points, vote_points, CREDENTIAL_PROOF_TAG, VOTE_PROOF_TAG};
use crate::{concurrency, proof, ElGamalCiphertext, Error, SchnorrSignature};

/// An Ed25519 signature by a device or authority, carried together with
/// the signing public key.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DeviceSignature {
    #[serde(with = "EdPublicKeyHex")]
    pub public_key: VerifyingKey,
    #[serde(with = "EdSignatureHex")]
    pub signature: Signature,
}

impl DeviceSignature {
    pub fn sign(key: &SigningKey, msg: &[u8]) -> Self {
        DeviceSignature {
            public_key: key.verifying_key(),
            signature: key.sign(msg),
        }
    }

    pub fn verify(&self, msg: &[u8]) -> bool {
        self.public_key.verify_strict(msg, &self.signature).is_ok()
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.signature.to_bytes()
    }
}

/// A voter's registration record: the encrypted real credential, signed by
/// the kiosk and counter-signed by the election official.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RegistrationEntry {
    pub voter_id: u64,
    pub enc_credential_pk: ElGamalCiphertext,
    pub kiosk_sig: DeviceSignature,
    pub official_sig: DeviceSignature,
}

/// The byte string the kiosk signs for a registration record.
pub fn registration_kiosk_payload(voter_id: u64, ciphertext: &ElGamalCiphertext) -> Vec<u8> {
    let mut s = Serializer::new();
    s.write_u64(voter_id);
    s.write_point(&ciphertext.c1);
    s.write_point(&ciphertext.c2);
    s.finish()
}

/// The byte string the official counter-signs. It covers the kiosk's
/// signature.
pub fn registration_official_payload(
    voter_id: u64,
    ciphertext: &ElGamalCiphertext,
    kiosk_sig: &[u8],
) -> Vec<u8> {
    let kiosk_msg = registration_kiosk_payload(voter_id, ciphertext);
    let mut s = Serializer::new();
    s.write_byte_slice(&kiosk_msg);
    s.write_byte_slice(kiosk_sig);
    s.finish()
}

impl RegistrationEntry {
    /// Validates both signatures over the canonical serializations.
    pub fn verify(&self) -> Result<(), Error> {
        let kiosk_msg = registration_kiosk_payload(self.voter_id, &self.enc_credential_pk);
        if !self.kiosk_sig.verify(&kiosk_msg) {
            return Err(Error::LedgerInvariant(format!(
                "kiosk signature failed for voter {}",
                self.voter_id
            )));
        }

        let official_msg = registration_official_payload(
            self.voter_id,
            &self.enc_credential_pk,
            &self.kiosk_sig.to_bytes(),
        );
        if !self.official_sig.verify(&official_msg) {
            return Err(Error::LedgerInvariant(format!(
                "official signature failed for voter {}",
                self.voter_id
            )));
        }

        Ok(())
    }
}

/// A pre-printed envelope record. `used` flips from false to true exactly
/// once, when the envelope's challenge is consumed during activation.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EnvelopeEntry {
    #[serde(with = "crate::serde_hex::HexForm")]
    pub challenge_bytes: Vec<u8>,
    pub printer_sig: DeviceSignature,
    pub used: bool,
}

/// A credential public key published by the election authority.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CredentialEntry {
    pub credential_pk: RistrettoPoint,
}

/// A cast ballot.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct VotingEntry {
    pub credential_pk: RistrettoPoint,
    pub enc_credential_pk: ElGamalCiphertext,
    #[serde(with = "crate::serde_hex::HexForm")]
    pub enc_credential_proof: Vec<u8>,
    pub enc_vote: ElGamalCiphertext,
    #[serde(with = "crate::serde_hex::HexForm")]
    pub enc_vote_proof: Vec<u8>,
    pub ballot_sig: SchnorrSignature,
}

impl VotingEntry {
    /// The byte string the ballot signature covers.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut s = Serializer::new();
        s.write_point(&self.credential_pk);
        s.write_point(&self.enc_credential_pk.c1);
        s.write_point(&self.enc_credential_pk.c2);
        s.write_byte_slice(&self.enc_credential_proof);
        s.write_point(&self.enc_vote.c1);
        s.write_point(&self.enc_vote.c2);
        s.write_byte_slice(&self.enc_vote_proof);
        s.finish()
    }

    /// Checks the ballot against the authorized credential list and its
    /// cryptographic proofs. All point maps are rebuilt from the entry's
    /// own fields.
    pub fn verify(
        &self,
        authorized: &HashSet<[u8; 32]>,
        ea_pk: &RistrettoPoint,
    ) -> Result<(), Error> {
        let credential_bytes = self.credential_pk.compress().to_bytes();
        if !authorized.contains(&credential_bytes) {
            return Err(Error::LedgerInvariant(format!(
                "ballot credential {} not on the public credential list",
                hex::encode(credential_bytes)
            )));
        }

        if !self.ballot_sig.verify(&self.credential_pk, &self.signing_payload()) {
            return Err(Error::LedgerInvariant(
                "ballot signature failed to verify".into(),
            ));
        }

        let (predicate, points) =
            credential_encryption_points(ea_pk, &self.enc_credential_pk, &self.credential_pk);
        proof::verify_predicate(
            CREDENTIAL_PROOF_TAG,
            &predicate,
            &points,
            &self.enc_credential_proof,
        )?;

        let (predicate, points) = vote_points(ea_pk, &self.enc_vote);
        proof::verify_predicate(VOTE_PROOF_TAG, &predicate, &points, &self.enc_vote_proof)?;

        Ok(())
    }
}

/// The shared election ledger. Mimics append-only storage.
#[derive(Default)]
pub struct Ledger {
    registration: IndexMap<u64, RegistrationEntry>,
    envelopes: IndexMap<[u8; 32], EnvelopeEntry>,
    credentials: Vec<CredentialEntry>,
    votes: Vec<VotingEntry>,
}

fn envelope_key(challenge_bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(challenge_bytes).into()
}

impl Ledger {
    pub fn new() -> Self {
        Ledger::default()
    }

    /// Adds a record for a voter's registration.
    pub fn append_registration_record(&mut self, entry: RegistrationEntry) {
        self.registration.insert(entry.voter_id, entry);
    }

    pub fn registration_record(&self, voter_id: u64) -> Option<&RegistrationEntry> {
        self.registration.get(&voter_id)
    }

    /// Adds a record for a printed envelope.
    pub fn append_envelope_record(&mut self, entry: EnvelopeEntry) {
        self.envelopes.insert(envelope_key(&entry.challenge_bytes), entry);
    }

    /// Checks that an envelope challenge exists and marks it used.
    pub fn mark_envelope_used(&mut self, challenge_bytes: &[u8]) -> Result<(), Error> {
        let entry = self
            .envelopes
            .get_mut(&envelope_key(challenge_bytes))
            .ok_or_else(|| {
                Error::LedgerInvariant("envelope challenge does not exist on the ledger".into())
            })?;
        if entry.used {
            return Err(Error::LedgerInvariant(
                "envelope challenge has already been used".into(),
            ));
        }
        entry.used = true;
        Ok(())
    }

    pub fn append_credential_record(&mut self, entry: CredentialEntry) {
        self.credentials.push(entry);
    }

    pub fn append_vote_record(&mut self, entry: VotingEntry) {
        self.votes.push(entry);
    }

    pub fn registration_records(&self) -> Vec<RegistrationEntry> {
        self.registration.values().cloned().collect()
    }

    pub fn credential_records(&self) -> &[CredentialEntry] {
        &self.credentials
    }

    pub fn voting_records(&self) -> &[VotingEntry] {
        &self.votes
    }

    /// An immutable snapshot of everything the tally consumes.
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            registration: self.registration_records(),
            credentials: self.credentials.clone(),
            votes: self.votes.clone(),
        }
    }
}

/// The tally's view of the ledger, frozen at tally start.
#[derive(Clone)]
pub struct LedgerSnapshot {
    pub registration: Vec<RegistrationEntry>,
    pub credentials: Vec<CredentialEntry>,
    pub votes: Vec<VotingEntry>,
}

/// Checks the integrity and cryptographic proofs of all registration and
/// voting records. Side-effect free; any failure is fatal to the tally.
pub fn verify_ledger(
    cores: usize,
    snapshot: &LedgerSnapshot,
    ea_pk: &RistrettoPoint,
) -> Result<(), Error> {
    concurrency::for_each(cores, &snapshot.registration, |_, entry| entry.verify())?;

    let authorized: HashSet<[u8; 32]> = snapshot
        .credentials
        .iter()
        .map(|entry| entry.credential_pk.compress().to_bytes())
        .collect();

    concurrency::for_each(cores, &snapshot.votes, |_, entry| {
        entry.verify(&authorized, ea_pk)
    })
}
