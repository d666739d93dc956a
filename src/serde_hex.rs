use crate::Error;
use ed25519_dalek::{Signature, VerifyingKey};
use std::borrow::Cow;

pub use hex_buffer_serde::{Hex, HexForm};

// a single-purpose type for use in `#[serde(with)]`
pub enum EdPublicKeyHex {}

impl Hex<VerifyingKey> for EdPublicKeyHex {
    type Error = Error;

    fn create_bytes(public_key: &VerifyingKey) -> Cow<'_, [u8]> {
        public_key.as_bytes().to_vec().into()
    }

    fn from_bytes(bytes: &[u8]) -> Result<VerifyingKey, Error> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::ShapeMismatch("ed25519 public key must be 32 bytes".into()))?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|_| Error::ShapeMismatch("invalid ed25519 public key".into()))
    }
}

// a single-purpose type for use in `#[serde(with)]`
pub enum EdSignatureHex {}

impl Hex<Signature> for EdSignatureHex {
    type Error = Error;

    fn create_bytes(sig: &Signature) -> Cow<'_, [u8]> {
        sig.to_bytes().to_vec().into()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Signature, Error> {
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| Error::ShapeMismatch("ed25519 signature must be 64 bytes".into()))?;
        Ok(Signature::from_bytes(&bytes))
    }
}
