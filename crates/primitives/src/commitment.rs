//! Slab commitment identifiers.
//!
//! A [`CommitmentId`] is a compressed BLS12-381 G1 point. Only one byte string
//! decodes to a given point, so the lowercase hex of that string is the only key
//! ever used for directories and stores. Alternative textual encodings (upper
//! case, `0x` prefix) are accepted on input and collapse to the same identifier.

use core::{fmt, str::FromStr};

use bls12_381::G1Affine;

use crate::constants::COMMITMENT_SIZE;

/// Errors from commitment identifier parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    /// Wrong number of hex digits or raw bytes.
    #[error("invalid identifier length: expected {expected}, got {actual}")]
    Length {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Input is not hexadecimal.
    #[error("invalid identifier encoding: {0}")]
    Encoding(String),

    /// Bytes do not encode a canonical point in the prime-order subgroup.
    #[error("identifier is not a canonical curve point")]
    NotOnCurve,
}

/// Canonical 48-byte slab commitment identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommitmentId([u8; COMMITMENT_SIZE]);

impl CommitmentId {
    /// Number of hex digits in the textual form.
    pub const HEX_LEN: usize = COMMITMENT_SIZE * 2;

    /// Parse a textual identifier.
    ///
    /// Accepts an optional `0x`/`0X` prefix and hex digits in any case.
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        let trimmed = raw.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.len() != Self::HEX_LEN {
            return Err(IdentifierError::Length {
                expected: Self::HEX_LEN,
                actual: digits.len(),
            });
        }

        let mut bytes = [0u8; COMMITMENT_SIZE];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|e| IdentifierError::Encoding(e.to_string()))?;

        Self::from_bytes(&bytes)
    }

    /// Build an identifier from raw compressed bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentifierError> {
        let raw: [u8; COMMITMENT_SIZE] =
            bytes.try_into().map_err(|_| IdentifierError::Length {
                expected: COMMITMENT_SIZE,
                actual: bytes.len(),
            })?;

        let point: Option<G1Affine> = G1Affine::from_compressed(&raw).into();
        let point = point.ok_or(IdentifierError::NotOnCurve)?;

        Ok(Self(point.to_compressed()))
    }

    /// Raw compressed bytes.
    pub fn as_bytes(&self) -> &[u8; COMMITMENT_SIZE] {
        &self.0
    }

    /// Canonical storage key: lowercase hex, no prefix.
    pub fn storage_key(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns true if `name` is a textual encoding of this identifier.
    pub fn matches_name(&self, name: &str) -> bool {
        Self::parse(name).is_ok_and(|id| id == *self)
    }
}

impl FromStr for CommitmentId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<[u8]> for CommitmentId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for CommitmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.storage_key())
    }
}

impl fmt::Debug for CommitmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitmentId({self})")
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for CommitmentId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for CommitmentId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl serde::de::Visitor<'_> for Visitor {
            type Value = CommitmentId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 48-byte compressed G1 point")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                CommitmentId::parse(v).map_err(E::custom)
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                CommitmentId::from_bytes(v).map_err(E::custom)
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_str(Visitor)
        } else {
            deserializer.deserialize_bytes(Visitor)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use bls12_381::{G1Projective, Scalar};

    fn point(n: u64) -> CommitmentId {
        let p = G1Affine::from(G1Projective::generator() * Scalar::from(n));
        CommitmentId::from_bytes(&p.to_compressed()).unwrap()
    }

    #[test]
    fn test_parse_canonical() {
        let id = point(7);
        let parsed = CommitmentId::parse(&id.storage_key()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_alternate_encodings_collapse() {
        let id = point(42);
        let key = id.storage_key();

        let upper = key.to_uppercase();
        let prefixed = format!("0x{key}");
        let prefixed_upper = format!("0X{upper}");

        for raw in [upper, prefixed, prefixed_upper] {
            let parsed = CommitmentId::parse(&raw).unwrap();
            assert_eq!(parsed, id);
            assert_eq!(parsed.storage_key(), key);
            assert_eq!(
                CommitmentId::parse(&parsed.storage_key()).unwrap(),
                parsed
            );
        }
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert_matches!(
            CommitmentId::parse("abcd"),
            Err(IdentifierError::Length { expected: 96, actual: 4 })
        );
    }

    #[test]
    fn test_rejects_non_hex() {
        let raw = "zz".repeat(48);
        assert_matches!(CommitmentId::parse(&raw), Err(IdentifierError::Encoding(_)));
    }

    #[test]
    fn test_rejects_invalid_point() {
        // Compression flag set, x = 0xff..ff is larger than the field modulus.
        let raw = "f".repeat(96);
        assert_matches!(CommitmentId::parse(&raw), Err(IdentifierError::NotOnCurve));

        // Missing compression flag.
        let raw = "0".repeat(96);
        assert_matches!(CommitmentId::parse(&raw), Err(IdentifierError::NotOnCurve));
    }

    #[test]
    fn test_matches_name() {
        let id = point(3);
        assert!(id.matches_name(&format!("0x{}", id.storage_key().to_uppercase())));
        assert!(!id.matches_name(&point(4).storage_key()));
        assert!(!id.matches_name(".staging-abc"));
    }

    #[test]
    fn test_display() {
        let id = point(1);
        assert_eq!(id.to_string(), format!("0x{}", id.storage_key()));
    }
}
