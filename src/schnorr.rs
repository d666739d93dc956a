//! Schnorr signatures over the suite group.
//!
//! Ballots are signed under a credential public key, which is a suite
//! point, so the signature scheme lives on the same group as the rest of
//! the protocol: `R = r·G`, `c = H(R ‖ pk ‖ msg)`, `s = r + c·sk`.

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;

use crate::serialization::Serializer;
use crate::{hash_to_scalar, random_scalar, RandomStream};

const SCHNORR_DOMAIN: &[u8] = b"votegral-schnorr";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchnorrSignature {
    pub r: RistrettoPoint,
    pub s: Scalar,
}

fn challenge(r: &RistrettoPoint, pk: &RistrettoPoint, msg: &[u8]) -> Scalar {
    let mut payload = Serializer::new();
    payload.write_point(r);
    payload.write_point(pk);
    payload.write_byte_slice(msg);
    hash_to_scalar(SCHNORR_DOMAIN, &payload.finish())
}

impl SchnorrSignature {
    /// Signs a message under the key pair `(sk, pk = sk·G)`.
    pub fn sign(sk: &Scalar, pk: &RistrettoPoint, msg: &[u8], rng: &mut RandomStream) -> Self {
        let nonce = random_scalar(rng);
        let r = RistrettoPoint::mul_base(&nonce);
        let c = challenge(&r, pk, msg);
        SchnorrSignature {
            r,
            s: nonce + c * sk,
        }
    }

    /// Verifies the signature over `msg` under `pk`.
    pub fn verify(&self, pk: &RistrettoPoint, msg: &[u8]) -> bool {
        let c = challenge(&self.r, pk, msg);
        RistrettoPoint::mul_base(&self.s) == self.r + pk * c
    }
}
