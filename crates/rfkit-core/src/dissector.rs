//! Generic packet dissector.
//!
//! Every protocol frame implements [`Dissect`], turning raw bytes into a typed
//! field structure and back. [`Packet`] wraps a dissected value together with
//! the bytes it came from, so a frame can be inspected field-by-field or
//! re-serialized after modification.

use std::fmt;
use std::ops::Range;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },

    #[error("Invalid preamble: expected 0x{expected:04X}, got 0x{actual:04X}")]
    InvalidPreamble { expected: u16, actual: u16 },

    #[error("Unknown {field}: 0x{value:02X}")]
    UnknownType { field: &'static str, value: u16 },

    #[error("CRC mismatch: frame carries 0x{expected:06X}, computed 0x{computed:06X}")]
    CrcMismatch { expected: u32, computed: u32 },

    #[error("Truncated frame")]
    Truncated,
}

impl DecodeError {
    /// Integrity failures are reported separately from structural ones.
    pub fn is_crc_mismatch(&self) -> bool {
        matches!(self, DecodeError::CrcMismatch { .. })
    }
}

impl From<std::io::Error> for DecodeError {
    fn from(_: std::io::Error) -> Self {
        DecodeError::Truncated
    }
}

/// Ensure `data` holds at least `expected` bytes.
pub fn require_len(data: &[u8], expected: usize) -> Result<(), DecodeError> {
    if data.len() < expected {
        return Err(DecodeError::BufferTooSmall {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Bidirectional codec between a byte buffer and a typed field structure.
///
/// `build` must be deterministic: calling it twice on the same value yields
/// the same bytes.
pub trait Dissect: Sized + Clone + PartialEq + fmt::Debug {
    /// Parse fields from raw bytes.
    fn dissect(data: &[u8]) -> Result<Self, DecodeError>;

    /// Serialize fields to raw bytes.
    fn build(&self) -> Vec<u8>;
}

/// A dissected frame.
///
/// Built either from bytes ([`Packet::from_bytes`]) or from fields
/// ([`Packet::from_fields`]). Serialization is performed on demand and always
/// reflects the current field values.
#[derive(Clone)]
pub struct Packet<T> {
    fields: T,
    /// Bytes the packet was dissected from, dropped on first mutation.
    origin: Option<Vec<u8>>,
}

impl<T: Dissect> Packet<T> {
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let fields = T::dissect(data)?;
        Ok(Self {
            fields,
            origin: Some(data.to_vec()),
        })
    }

    pub fn from_fields(fields: T) -> Self {
        Self {
            fields,
            origin: None,
        }
    }

    pub fn fields(&self) -> &T {
        &self.fields
    }

    /// Mutable field access. The next call to [`Packet::data`] re-serializes.
    pub fn fields_mut(&mut self) -> &mut T {
        self.origin = None;
        &mut self.fields
    }

    pub fn into_fields(self) -> T {
        self.fields
    }

    /// Canonical byte serialization.
    pub fn data(&self) -> Vec<u8> {
        match &self.origin {
            Some(origin) => origin.clone(),
            None => self.fields.build(),
        }
    }

    /// Raw byte-range view, `None` if the range falls outside the frame.
    pub fn bytes(&self, range: Range<usize>) -> Option<Vec<u8>> {
        self.data().get(range).map(|s| s.to_vec())
    }
}

/// Loose equality: two packets match when either their bytes or their
/// fields match.
impl<T: Dissect> PartialEq for Packet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.data() == other.data() || self.fields == other.fields
    }
}

impl<T: Dissect> fmt::Debug for Packet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("fields", &self.fields)
            .field("len", &self.data().len())
            .finish()
    }
}

impl<T: Dissect> From<T> for Packet<T> {
    fn from(fields: T) -> Self {
        Self::from_fields(fields)
    }
}

/// Hex dump helper used by log lines and the CLI.
pub fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Pair {
        kind: u8,
        value: u8,
    }

    impl Dissect for Pair {
        fn dissect(data: &[u8]) -> Result<Self, DecodeError> {
            require_len(data, 2)?;
            Ok(Self {
                kind: data[0],
                value: data[1],
            })
        }

        fn build(&self) -> Vec<u8> {
            vec![self.kind, self.value]
        }
    }

    #[test]
    fn test_from_bytes_keeps_origin() {
        let pkt = Packet::<Pair>::from_bytes(&[1, 2, 0xEE]).unwrap();
        assert_eq!(pkt.fields().value, 2);
        assert_eq!(pkt.data(), vec![1, 2, 0xEE]);
    }

    #[test]
    fn test_mutation_reserializes() {
        let mut pkt = Packet::<Pair>::from_bytes(&[1, 2, 0xEE]).unwrap();
        pkt.fields_mut().value = 9;
        assert_eq!(pkt.data(), vec![1, 9]);
        assert_eq!(pkt.bytes(1..2), Some(vec![9]));
        assert_eq!(pkt.bytes(1..5), None);
    }

    #[test]
    fn test_loose_equality() {
        // Same fields, different raw bytes (trailing padding).
        let padded = Packet::<Pair>::from_bytes(&[1, 2, 0, 0]).unwrap();
        let built = Packet::from_fields(Pair { kind: 1, value: 2 });
        assert_eq!(padded, built);

        let other = Packet::from_fields(Pair { kind: 1, value: 3 });
        assert_ne!(built, other);
    }

    #[test]
    fn test_short_buffer() {
        let err = Packet::<Pair>::from_bytes(&[1]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::BufferTooSmall {
                expected: 2,
                actual: 1
            }
        );
    }
}
