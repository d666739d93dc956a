//! Fixed-schema binary serialization.
//!
//! Messages that get signed or hashed are produced by this serializer:
//! fixed-width big-endian integers, length-prefixed byte slices (4-byte
//! length) and canonical point/scalar encodings, concatenated in declared
//! order. Verifiers rebuild the exact same byte string.

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;

use crate::{point_from_bytes, scalar_from_bytes, Error};

#[derive(Default)]
pub struct Serializer {
    buf: Vec<u8>,
}

impl Serializer {
    pub fn new() -> Self {
        Serializer { buf: Vec::new() }
    }

    /// Writes raw bytes with no framing.
    pub fn write(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    /// Writes a length-prefixed byte slice.
    pub fn write_byte_slice(&mut self, data: &[u8]) {
        self.write_u32(data.len() as u32);
        self.write(data);
    }

    pub fn write_point(&mut self, point: &RistrettoPoint) {
        self.buf.extend_from_slice(&point.compress().to_bytes());
    }

    pub fn write_points(&mut self, points: &[RistrettoPoint]) {
        for point in points {
            self.write_point(point);
        }
    }

    pub fn write_scalar(&mut self, scalar: &Scalar) {
        self.buf.extend_from_slice(scalar.as_bytes());
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a fixed-schema byte string.
pub struct Deserializer<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Deserializer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Deserializer { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.pos + n > self.data.len() {
            return Err(Error::ShapeMismatch("truncated byte string".into()));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u32(&mut self) -> Result<u32, Error> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(u32::from_be_bytes(bytes))
    }

    pub fn read_u64(&mut self) -> Result<u64, Error> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(u64::from_be_bytes(bytes))
    }

    pub fn read_byte_slice(&mut self) -> Result<&'a [u8], Error> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    pub fn read_point(&mut self) -> Result<RistrettoPoint, Error> {
        point_from_bytes(self.take(32)?)
    }

    pub fn read_scalar(&mut self) -> Result<Scalar, Error> {
        scalar_from_bytes(self.take(32)?)
    }

    /// True once every byte has been consumed.
    pub fn finished(&self) -> bool {
        self.pos == self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{random_scalar, RandomStream};

    #[test]
    fn round_trip() {
        let mut rng = RandomStream::from_seed("serialization");
        let scalar = random_scalar(&mut rng);
        let point = RistrettoPoint::mul_base(&scalar);

        let mut s = Serializer::new();
        s.write_u64(42);
        s.write_byte_slice(b"payload");
        s.write_point(&point);
        s.write_scalar(&scalar);
        let bytes = s.finish();

        let mut d = Deserializer::new(&bytes);
        assert_eq!(d.read_u64().unwrap(), 42);
        assert_eq!(d.read_byte_slice().unwrap(), b"payload");
        assert_eq!(d.read_point().unwrap(), point);
        assert_eq!(d.read_scalar().unwrap(), scalar);
        assert!(d.finished());
    }

    #[test]
    fn truncated_input_is_rejected() {
        let mut s = Serializer::new();
        s.write_byte_slice(b"abc");
        let mut bytes = s.finish();
        bytes.pop();

        let mut d = Deserializer::new(&bytes);
        assert!(d.read_byte_slice().is_err());
    }

    #[test]
    fn identical_inputs_serialize_identically() {
        let mut a = Serializer::new();
        let mut b = Serializer::new();
        for s in [&mut a, &mut b] {
            s.write_u64(7);
            s.write_byte_slice(&[1, 2, 3]);
        }
        assert_eq!(a.finish(), b.finish());
    }
}
