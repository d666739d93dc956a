//! In-person registration: the actors that produce ledger records.
//!
//! Voters obtain credentials at a kiosk. A real credential's public key is
//! encrypted under the election key and registered at check-out; fake
//! credentials (issued for coercion resistance) reuse the real ticket's
//! ciphertext and a simulated activation proof, so the two kinds of
//! material are indistinguishable to anyone but the voter.

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::SigningKey;

use crate::serialization::Serializer;
use crate::{
    encrypt_point, generate_key_shares, random_scalar, registration_kiosk_payload,
    registration_official_payload, CredentialEntry, DeviceSignature, ElGamalCiphertext,
    EnvelopeEntry, Error, KeyShare, Ledger, RandomStream, RegistrationEntry,
};

/// An asymmetric credential on the suite group, used to sign ballots.
#[derive(Debug, Clone)]
pub struct Credential {
    sk: Scalar,
    pk: RistrettoPoint,
}

impl Credential {
    pub fn new(rng: &mut RandomStream) -> Self {
        let sk = random_scalar(rng);
        Credential {
            sk,
            pk: RistrettoPoint::mul_base(&sk),
        }
    }

    pub fn private_key(&self) -> Scalar {
        self.sk
    }

    pub fn public_key(&self) -> RistrettoPoint {
        self.pk
    }
}

/// The members responsible for running the election infrastructure. Each
/// holds one share of the election decryption key.
pub struct ElectionAuthority {
    shares: Vec<KeyShare>,
    public_key: RistrettoPoint,
}

impl ElectionAuthority {
    pub fn new(members: u32, rng: &mut RandomStream) -> Result<Self, Error> {
        let (shares, public_key) = generate_key_shares(members, rng)?;
        Ok(ElectionAuthority { shares, public_key })
    }

    /// The collective election public key.
    pub fn public_key(&self) -> RistrettoPoint {
        self.public_key
    }

    pub fn key_shares(&self) -> &[KeyShare] {
        &self.shares
    }

    pub fn member_public_keys(&self) -> Vec<RistrettoPoint> {
        self.shares.iter().map(|share| share.pk).collect()
    }
}

/// The actor responsible for checking voters in and out.
pub struct ElectionOfficial {
    signing_key: SigningKey,
}

impl ElectionOfficial {
    pub fn new(rng: &mut RandomStream) -> Self {
        ElectionOfficial {
            signing_key: SigningKey::generate(rng),
        }
    }

    pub fn verifying_key(&self) -> ed25519_dalek::VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Verifies the kiosk's signature on a check-out ticket, counter-signs
    /// it, and appends the registration record.
    pub fn check_out(&self, ticket: &CheckOutTicket, ledger: &mut Ledger) -> Result<(), Error> {
        let kiosk_msg = registration_kiosk_payload(ticket.voter_id, &ticket.enc_credential_pk);
        if !ticket.kiosk_sig.verify(&kiosk_msg) {
            return Err(Error::LedgerInvariant(
                "check-out ticket was not signed by the kiosk".into(),
            ));
        }

        let official_msg = registration_official_payload(
            ticket.voter_id,
            &ticket.enc_credential_pk,
            &ticket.kiosk_sig.to_bytes(),
        );
        let official_sig = DeviceSignature::sign(&self.signing_key, &official_msg);

        ledger.append_registration_record(RegistrationEntry {
            voter_id: ticket.voter_id,
            enc_credential_pk: ticket.enc_credential_pk,
            kiosk_sig: ticket.kiosk_sig.clone(),
            official_sig,
        });
        Ok(())
    }
}

/// Pre-prints envelopes carrying a random challenge scalar.
pub struct EnvelopePrinter {
    signing_key: SigningKey,
}

/// A physical envelope's contents: the activation challenge.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub challenge: Scalar,
    pub printer_sig: DeviceSignature,
}

fn envelope_payload(challenge: &Scalar) -> Vec<u8> {
    let mut s = Serializer::new();
    s.write_scalar(challenge);
    s.finish()
}

impl EnvelopePrinter {
    pub fn new(rng: &mut RandomStream) -> Self {
        EnvelopePrinter {
            signing_key: SigningKey::generate(rng),
        }
    }

    /// Prints one envelope and records it on the envelope sub-ledger.
    pub fn issue_envelope(&self, ledger: &mut Ledger, rng: &mut RandomStream) -> Envelope {
        let challenge = random_scalar(rng);
        let printer_sig = DeviceSignature::sign(&self.signing_key, &envelope_payload(&challenge));

        ledger.append_envelope_record(EnvelopeEntry {
            challenge_bytes: challenge.to_bytes().to_vec(),
            printer_sig: printer_sig.clone(),
            used: false,
        });

        Envelope {
            challenge,
            printer_sig,
        }
    }
}

/// The public commitment of the activation Σ-protocol.
#[derive(Debug, Clone)]
pub struct ActivationCommitment {
    pub y1: RistrettoPoint,
    pub y2: RistrettoPoint,
}

/// The kiosk's signed statement binding a voter to an encrypted credential.
#[derive(Debug, Clone)]
pub struct CheckOutTicket {
    pub voter_id: u64,
    pub enc_credential_pk: ElGamalCiphertext,
    pub kiosk_sig: DeviceSignature,
}

/// Everything a voter leaves the kiosk with for one credential.
#[derive(Debug, Clone)]
pub struct VotingMaterial {
    pub voter_id: u64,
    pub credential: Credential,
    pub ticket: CheckOutTicket,
    pub commitment: ActivationCommitment,
    pub challenge: Scalar,
    pub response: Scalar,
}

/// The interactive registration kiosk.
pub struct Kiosk {
    signing_key: SigningKey,
}

impl Kiosk {
    pub fn new(rng: &mut RandomStream) -> Self {
        Kiosk {
            signing_key: SigningKey::generate(rng),
        }
    }

    pub fn verifying_key(&self) -> ed25519_dalek::VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Encrypts a credential public key under the election key and signs
    /// the resulting check-out statement.
    pub fn issue_check_out_ticket(
        &self,
        voter_id: u64,
        credential_pk: &RistrettoPoint,
        ea_pk: &RistrettoPoint,
        rng: &mut RandomStream,
    ) -> (CheckOutTicket, Scalar) {
        let (ciphertext, _, x) = encrypt_point(ea_pk, credential_pk, rng);
        let kiosk_sig = DeviceSignature::sign(
            &self.signing_key,
            &registration_kiosk_payload(voter_id, &ciphertext),
        );
        (
            CheckOutTicket {
                voter_id,
                enc_credential_pk: ciphertext,
                kiosk_sig,
            },
            x,
        )
    }

    /// Creates a real credential: a sound activation proof against the
    /// envelope challenge, over a fresh encryption of the credential.
    pub fn issue_real_credential(
        &self,
        voter_id: u64,
        ea_pk: &RistrettoPoint,
        envelope: &Envelope,
        ledger: &mut Ledger,
        rng: &mut RandomStream,
    ) -> Result<VotingMaterial, Error> {
        let credential = Credential::new(rng);
        let (ticket, x) =
            self.issue_check_out_ticket(voter_id, &credential.public_key(), ea_pk, rng);

        // Honest commit/respond for knowledge of the encryption randomness.
        let y = random_scalar(rng);
        let commitment = ActivationCommitment {
            y1: RistrettoPoint::mul_base(&y),
            y2: ea_pk * y,
        };
        let response = y - envelope.challenge * x;

        ledger.append_credential_record(CredentialEntry {
            credential_pk: credential.public_key(),
        });

        Ok(VotingMaterial {
            voter_id,
            credential,
            ticket,
            commitment,
            challenge: envelope.challenge,
            response,
        })
    }

    /// Creates a fake credential for coercion resistance.
    ///
    /// The material reuses the real ticket's ciphertext and a simulated
    /// activation proof, so it looks exactly like a real one. Its ballots
    /// are filtered out during the tally because the fake credential never
    /// appears on the registration ledger.
    pub fn issue_fake_credential(
        &self,
        voter_id: u64,
        real: &VotingMaterial,
        ea_pk: &RistrettoPoint,
        envelope: &Envelope,
        ledger: &mut Ledger,
        rng: &mut RandomStream,
    ) -> Result<VotingMaterial, Error> {
        let credential = Credential::new(rng);
        let ciphertext = real.ticket.enc_credential_pk;

        // Derive the shared secret the simulated proof must explain:
        // X = C2 - cred_pk for the *fake* credential.
        let derived_x = ciphertext.c2 - credential.public_key();

        // Simulated proof: pick the response first, then compute the
        // commitment that makes the verification equations hold.
        let e = envelope.challenge;
        let response = random_scalar(rng);
        let commitment = ActivationCommitment {
            y1: RistrettoPoint::mul_base(&response) + ciphertext.c1 * e,
            y2: ea_pk * response + derived_x * e,
        };

        let kiosk_sig = DeviceSignature::sign(
            &self.signing_key,
            &registration_kiosk_payload(voter_id, &ciphertext),
        );

        ledger.append_credential_record(CredentialEntry {
            credential_pk: credential.public_key(),
        });

        Ok(VotingMaterial {
            voter_id,
            credential,
            ticket: CheckOutTicket {
                voter_id,
                enc_credential_pk: ciphertext,
                kiosk_sig,
            },
            commitment,
            challenge: e,
            response,
        })
    }
}

/// Verifies a credential's activation proof against the registration
/// ledger and consumes the envelope challenge.
pub fn activate(
    ledger: &mut Ledger,
    ea_pk: &RistrettoPoint,
    material: &VotingMaterial,
) -> Result<(), Error> {
    let ciphertext = &material.ticket.enc_credential_pk;
    let e = material.challenge;
    let r = material.response;

    // X = C2 - cred_pk.
    let x = ciphertext.c2 - material.credential.public_key();

    // Y1 == r·G + e·C1 and Y2 == r·Pk + e·X.
    let y1_check = RistrettoPoint::mul_base(&r) + ciphertext.c1 * e;
    if material.commitment.y1 != y1_check {
        return Err(Error::proof("CredentialActivation"));
    }
    let y2_check = ea_pk * r + x * e;
    if material.commitment.y2 != y2_check {
        return Err(Error::proof("CredentialActivation"));
    }

    // The material must agree with what was registered at check-out.
    let entry = ledger
        .registration_record(material.voter_id)
        .ok_or_else(|| {
            Error::LedgerInvariant(format!(
                "voter {} not found in the registration ledger",
                material.voter_id
            ))
        })?;
    if entry.enc_credential_pk != *ciphertext {
        return Err(Error::LedgerInvariant(
            "credential ciphertext mismatch between materials and ledger".into(),
        ));
    }
    if entry.kiosk_sig.public_key != material.ticket.kiosk_sig.public_key {
        return Err(Error::LedgerInvariant(
            "kiosk public key mismatch between materials and ledger".into(),
        ));
    }

    ledger.mark_envelope_used(&e.to_bytes())
}
