use derive_more::{AsRef, Deref, Into};
use k256::sha2::{Digest, Sha256};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

/// A 32-byte value tagged with what it identifies.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    Deref,
    AsRef,
    Into,
)]
#[serde(transparent)]
pub struct Hash32<T> {
    #[deref]
    #[as_ref]
    #[into]
    #[serde(with = "hex")]
    bytes: [u8; 32],
    #[into(skip)]
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T> From<[u8; 32]> for Hash32<T> {
    fn from(bytes: [u8; 32]) -> Self {
        Self {
            bytes,
            _marker: PhantomData,
        }
    }
}

impl<T> Hash32<T> {
    /// Converts the hash to a hexadecimal string representation.
    pub fn as_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    pub fn sha256(data: &[u8]) -> Self {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&Sha256::digest(data));
        Self::from(bytes)
    }
}

impl<T> fmt::Display for Hash32<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_hex())
    }
}

impl<T> FromStr for Hash32<T> {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self::from(bytes))
    }
}

// Marker types
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Chain;
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Transaction;
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Signing;

/// Identifies a ledger network; mixed into every signing digest.
pub type ChainId = Hash32<Chain>;

/// SHA-256 of a transaction's canonical bytes.
pub type TransactionId = Hash32<Transaction>;

/// The exact 32 bytes a transaction signature commits to.
pub type SigningDigest = Hash32<Signing>;

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    struct TestMarker;
    type TestHash = Hash32<TestMarker>;

    #[test]
    fn test_from_bytes_array() {
        let bytes = [1u8; 32];
        let hash: TestHash = bytes.into();
        assert_eq!(*hash, bytes);
    }

    #[test]
    fn test_hex_round_trip() {
        let text = "aca376f206b8fc25a6ed44dbdc66547c36c6c33e3a119ffbeaef943642f0e906";
        let id: ChainId = text.parse().unwrap();
        assert_eq!(id.as_hex(), text);
        assert_eq!(id.to_string(), text);
        assert!("abcd".parse::<ChainId>().is_err());
    }

    #[test]
    fn test_serde_is_a_hex_string() {
        let id = TransactionId::from([0xab; 32]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        assert_eq!(serde_json::from_str::<TransactionId>(&json).unwrap(), id);
    }

    #[test]
    fn test_sha256() {
        assert_eq!(
            *TransactionId::sha256(b""),
            hex!("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
        );
    }
}
