//! The elliptic-curve suite used by the entire protocol.
//!
//! All group elements live in the Ristretto group over Curve25519, a
//! prime-order group (order ≈ 2^252) with canonical 32-byte encodings for
//! both points and scalars.

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use rand::{CryptoRng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use sha2::{Digest, Sha256, Sha512};

use crate::Error;

/// The standard base point (generator) for the group.
pub fn generator() -> RistrettoPoint {
    RistrettoPoint::mul_base(&Scalar::ONE)
}

/// A deterministic, reproducible stream of randomness.
///
/// Every scalar pick in the protocol draws from an explicit `RandomStream`
/// handle threaded through the call sites; there is no ambient global RNG.
/// Seeded streams make benchmark runs and property tests reproducible.
pub struct RandomStream(ChaCha20Rng);

impl RandomStream {
    /// A stream derived deterministically from a seed string.
    pub fn from_seed(seed: &str) -> Self {
        let digest: [u8; 32] = Sha256::digest(seed.as_bytes()).into();
        RandomStream(ChaCha20Rng::from_seed(digest))
    }

    /// A stream seeded from the operating system.
    pub fn unseeded() -> Self {
        RandomStream(ChaCha20Rng::from_entropy())
    }

    /// Derives an independent child stream.
    ///
    /// Parallel regions hand each worker its own fork taken *before* the
    /// region starts, so results do not depend on worker count or
    /// scheduling order.
    pub fn fork(&mut self) -> Self {
        let mut seed = [0u8; 32];
        self.0.fill_bytes(&mut seed);
        RandomStream(ChaCha20Rng::from_seed(seed))
    }
}

impl RngCore for RandomStream {
    fn next_u32(&mut self) -> u32 {
        self.0.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.0.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.0.try_fill_bytes(dest)
    }
}

impl CryptoRng for RandomStream {}

/// Picks a uniformly random scalar from the stream.
pub fn random_scalar(rng: &mut RandomStream) -> Scalar {
    Scalar::random(rng)
}

/// Hashes a domain-separated payload to a scalar.
pub fn hash_to_scalar(domain: &[u8], payload: &[u8]) -> Scalar {
    let mut hasher = Sha512::new();
    hasher.update((domain.len() as u32).to_be_bytes());
    hasher.update(domain);
    hasher.update(payload);
    let digest: [u8; 64] = hasher.finalize().into();
    Scalar::from_bytes_mod_order_wide(&digest)
}

/// Derives a vector of `n` independent challenge scalars from one payload.
pub fn challenge_scalars(domain: &[u8], payload: &[u8], n: usize) -> Vec<Scalar> {
    (0..n as u64)
        .map(|counter| {
            let mut hasher = Sha512::new();
            hasher.update((domain.len() as u32).to_be_bytes());
            hasher.update(domain);
            hasher.update(counter.to_be_bytes());
            hasher.update(payload);
            let digest: [u8; 64] = hasher.finalize().into();
            Scalar::from_bytes_mod_order_wide(&digest)
        })
        .collect()
}

/// Derives a nothing-up-my-sleeve group element from a tag.
pub fn derive_base(tag: &[u8]) -> RistrettoPoint {
    let mut hasher = Sha512::new();
    hasher.update(b"votegral-base-derivation");
    hasher.update(tag);
    let digest: [u8; 64] = hasher.finalize().into();
    RistrettoPoint::from_uniform_bytes(&digest)
}

/// Canonical 32-byte encoding of a point.
pub fn point_bytes(point: &RistrettoPoint) -> [u8; 32] {
    point.compress().to_bytes()
}

/// Decodes a canonical 32-byte point encoding.
pub fn point_from_bytes(bytes: &[u8]) -> Result<RistrettoPoint, Error> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::ShapeMismatch("point encoding must be 32 bytes".into()))?;
    CompressedRistretto(arr)
        .decompress()
        .ok_or_else(|| Error::ShapeMismatch("invalid point encoding".into()))
}

/// Decodes a canonical 32-byte scalar encoding.
pub fn scalar_from_bytes(bytes: &[u8]) -> Result<Scalar, Error> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::ShapeMismatch("scalar encoding must be 32 bytes".into()))?;
    Option::<Scalar>::from(Scalar::from_canonical_bytes(arr))
        .ok_or_else(|| Error::ShapeMismatch("non-canonical scalar encoding".into()))
}
