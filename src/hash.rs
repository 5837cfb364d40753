//! MD4 content and client identifiers.
//!
//! Everything in the ed2k network is addressed by a 16-byte MD4 hash:
//! shared files, the client's own persistent identity, and the servers
//! themselves. This module provides the identifier type with its textual
//! round-trip; computing digests over file content is outside this crate.

use std::fmt;

use thiserror::Error;

/// Errors that can occur when parsing an MD4 hash from text.
#[derive(Debug, Error)]
pub enum HashError {
    /// The textual form is not 32 hexadecimal characters.
    #[error("invalid hash format")]
    Format,
}

/// A 16-byte MD4 identifier.
///
/// Equality and ordering are byte-wise. The textual form is 32 hex
/// characters: either case is accepted on parse, upper case is emitted.
///
/// # Examples
///
/// ```
/// use red2k::hash::Md4Hash;
///
/// let hash = Md4Hash::from_hex("31d6cfe0d16ae931b73c59d7e0c089c0").unwrap();
/// assert_eq!(hash.to_hex(), "31D6CFE0D16AE931B73C59D7E0C089C0");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Md4Hash(pub [u8; 16]);

impl Md4Hash {
    /// The all-zero sentinel: no identity assigned.
    pub const EMPTY: Md4Hash = Md4Hash([0u8; 16]);

    /// The all-ones sentinel: an explicitly invalid identity.
    pub const INVALID: Md4Hash = Md4Hash([0xFFu8; 16]);

    /// Creates a hash from raw bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Parses a hash from a 32-character hex string, either case.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::Format`] if the string is not exactly 32
    /// hex characters.
    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        if s.len() != 32 {
            return Err(HashError::Format);
        }
        let bytes = hex_decode(s).ok_or(HashError::Format)?;
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Returns the raw bytes of the hash.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Converts to an uppercase hexadecimal string.
    pub fn to_hex(&self) -> String {
        self.0
            .iter()
            .fold(String::with_capacity(32), |mut s, b| {
                use std::fmt::Write;
                let _ = write!(s, "{:02X}", b);
                s
            })
    }

    /// Returns `true` if this is the all-zero sentinel.
    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

impl fmt::Debug for Md4Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Md4Hash({})", self.to_hex())
    }
}

impl fmt::Display for Md4Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; 16]> for Md4Hash {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_round_trip() {
        let hash = Md4Hash::from_hex("31d6cfe0d16ae931b73c59d7e0c089c0").unwrap();
        assert_eq!(hash.to_hex(), "31D6CFE0D16AE931B73C59D7E0C089C0");

        let upper = Md4Hash::from_hex("31D6CFE0D16AE931B73C59D7E0C089C0").unwrap();
        assert_eq!(hash, upper);
    }

    #[test]
    fn test_malformed_text() {
        assert!(Md4Hash::from_hex("").is_err());
        assert!(Md4Hash::from_hex("31d6cfe0").is_err());
        assert!(Md4Hash::from_hex("zzd6cfe0d16ae931b73c59d7e0c089c0").is_err());
        assert!(Md4Hash::from_hex("31d6cfe0d16ae931b73c59d7e0c089c000").is_err());
    }

    #[test]
    fn test_sentinels() {
        assert!(Md4Hash::EMPTY.is_empty());
        assert!(!Md4Hash::INVALID.is_empty());
        assert_eq!(Md4Hash::EMPTY.to_hex(), "00000000000000000000000000000000");
        assert_eq!(Md4Hash::INVALID.to_hex(), "FFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF");
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let a = Md4Hash::from_bytes([0u8; 16]);
        let mut high = [0u8; 16];
        high[0] = 1;
        let b = Md4Hash::from_bytes(high);
        assert!(a < b);
    }
}
