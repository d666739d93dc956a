//! Distributed key generation for the election authority.
//!
//! Simulated trusted-dealer DKG: each member receives an additive share of
//! the election decryption key, and the election public key is the sum of
//! the share public keys. Decryption therefore requires every member.

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;

use crate::{random_scalar, Error, RandomStream};

/// One member's share of the election key.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct KeyShare {
    pub sk: Scalar,
    pub pk: RistrettoPoint,
}

/// Generates `members` key shares and the collective election public key
/// `Pk = Σ pk_i`.
pub fn generate_key_shares(
    members: u32,
    rng: &mut RandomStream,
) -> Result<(Vec<KeyShare>, RistrettoPoint), Error> {
    if members < 1 {
        return Err(Error::ProtocolMisuse(
            "key generation requires at least one member".into(),
        ));
    }

    let mut shares = Vec::with_capacity(members as usize);
    for _ in 0..members {
        let sk = random_scalar(rng);
        shares.push(KeyShare {
            sk,
            pk: RistrettoPoint::mul_base(&sk),
        });
    }
    let collective = shares.iter().map(|share| share.pk).sum();

    Ok((shares, collective))
}
