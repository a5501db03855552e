//! secp256k1 keys and signatures in the chain's text and binary forms.
//!
//! Text forms are Base58 with a four byte RIPEMD-160 checksum. Modern forms
//! (`PUB_K1_`, `PVT_K1_`, `SIG_K1_`) hash the key type suffix into the
//! checksum; the legacy `EOS` public key form and WIF private keys do not.

use crate::binary::{BinaryError, Pack, Reader, Unpack, Writer};
use crate::hash::SigningDigest;
use k256::ecdsa::hazmat::SignPrimitive;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{RecoveryId, SigningKey, VerifyingKey};
use k256::sha2::{Digest, Sha256};
use rand::rngs::OsRng;
use ripemd::Ripemd160;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const LEGACY_PUBLIC_PREFIX: &str = "EOS";
const COMPRESSED_KEY_LEN: usize = 33;
const SIGNATURE_LEN: usize = 65;
/// Compact signatures carry `27 + 4 + recovery_id` in their first byte.
const COMPACT_HEADER_BASE: u8 = 31;
const MAX_SIGNING_ATTEMPTS: usize = 128;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("unrecognised key format: {0}")]
    UnknownFormat(String),
    #[error("invalid base58: {0}")]
    Base58(String),
    #[error("checksum mismatch")]
    Checksum,
    #[error("invalid key length {0}")]
    InvalidLength(usize),
    #[error("unsupported key type {0}")]
    UnsupportedKeyType(u8),
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("no canonical signature found after {0} attempts")]
    NoCanonicalSignature(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyType {
    K1,
    R1,
}

impl KeyType {
    fn suffix(self) -> &'static str {
        match self {
            KeyType::K1 => "K1",
            KeyType::R1 => "R1",
        }
    }

    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "K1" => Some(KeyType::K1),
            "R1" => Some(KeyType::R1),
            _ => None,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            KeyType::K1 => 0,
            KeyType::R1 => 1,
        }
    }

    fn from_u8(value: u8) -> Result<Self, KeyError> {
        match value {
            0 => Ok(KeyType::K1),
            1 => Ok(KeyType::R1),
            other => Err(KeyError::UnsupportedKeyType(other)),
        }
    }
}

fn ripemd160(parts: &[&[u8]]) -> [u8; 20] {
    let mut hasher = Ripemd160::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(Sha256::digest(data)));
    out
}

fn encode_checked(data: &[u8], key_type: Option<KeyType>) -> String {
    let suffix = key_type.map(KeyType::suffix).unwrap_or_default();
    let checksum = ripemd160(&[data, suffix.as_bytes()]);
    let mut payload = data.to_vec();
    payload.extend_from_slice(&checksum[..4]);
    bs58::encode(payload).into_string()
}

fn decode_checked<const N: usize>(
    text: &str,
    key_type: Option<KeyType>,
) -> Result<[u8; N], KeyError> {
    let payload = bs58::decode(text)
        .into_vec()
        .map_err(|e| KeyError::Base58(e.to_string()))?;
    if payload.len() != N + 4 {
        return Err(KeyError::InvalidLength(payload.len()));
    }
    let (data, checksum) = payload.split_at(N);
    let suffix = key_type.map(KeyType::suffix).unwrap_or_default();
    if ripemd160(&[data, suffix.as_bytes()])[..4] != *checksum {
        return Err(KeyError::Checksum);
    }
    let mut out = [0u8; N];
    out.copy_from_slice(data);
    Ok(out)
}

/// Splits `PUB_K1_xxx` style strings into their key type and payload.
fn split_modern<'a>(text: &'a str, prefix: &str) -> Option<(KeyType, &'a str)> {
    let rest = text.strip_prefix(prefix)?.strip_prefix('_')?;
    let (suffix, payload) = rest.split_once('_')?;
    Some((KeyType::from_suffix(suffix)?, payload))
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey {
    key_type: KeyType,
    data: [u8; COMPRESSED_KEY_LEN],
}

impl PublicKey {
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn as_bytes(&self) -> &[u8; COMPRESSED_KEY_LEN] {
        &self.data
    }

    fn from_verifying_key(key: &VerifyingKey) -> Self {
        let mut data = [0u8; COMPRESSED_KEY_LEN];
        data.copy_from_slice(key.to_encoded_point(true).as_bytes());
        PublicKey {
            key_type: KeyType::K1,
            data,
        }
    }

    fn verifying_key(&self) -> Result<VerifyingKey, KeyError> {
        if self.key_type != KeyType::K1 {
            return Err(KeyError::UnsupportedKeyType(self.key_type.to_u8()));
        }
        VerifyingKey::from_sec1_bytes(&self.data).map_err(|e| KeyError::InvalidKey(e.to_string()))
    }

    /// The pre-`PUB_K1_` text form, only defined for K1 keys.
    pub fn to_legacy_string(&self) -> Option<String> {
        (self.key_type == KeyType::K1)
            .then(|| format!("{LEGACY_PUBLIC_PREFIX}{}", encode_checked(&self.data, None)))
    }

    /// Checks `signature` over `digest` against this key.
    pub fn verify(&self, digest: &SigningDigest, signature: &Signature) -> Result<(), KeyError> {
        let key = self.verifying_key()?;
        let signature = signature.ecdsa_signature()?;
        key.verify_prehash(digest.as_bytes(), &signature)
            .map_err(|e| KeyError::InvalidSignature(e.to_string()))
    }
}

impl FromStr for PublicKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key_type, data) = if let Some((key_type, payload)) = split_modern(s, "PUB") {
            (key_type, decode_checked(payload, Some(key_type))?)
        } else if let Some(payload) = s.strip_prefix(LEGACY_PUBLIC_PREFIX) {
            (KeyType::K1, decode_checked(payload, None)?)
        } else {
            return Err(KeyError::UnknownFormat(s.to_string()));
        };
        let key = PublicKey { key_type, data };
        if key_type == KeyType::K1 {
            key.verifying_key()?;
        }
        Ok(key)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PUB_{}_{}",
            self.key_type.suffix(),
            encode_checked(&self.data, Some(self.key_type))
        )
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature {
    key_type: KeyType,
    data: [u8; SIGNATURE_LEN],
}

impl Signature {
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.data
    }

    fn ecdsa_signature(&self) -> Result<k256::ecdsa::Signature, KeyError> {
        if self.key_type != KeyType::K1 {
            return Err(KeyError::UnsupportedKeyType(self.key_type.to_u8()));
        }
        k256::ecdsa::Signature::from_slice(&self.data[1..])
            .map_err(|e| KeyError::InvalidSignature(e.to_string()))
    }

    fn recovery_id(&self) -> Result<RecoveryId, KeyError> {
        let header = self.data[0];
        // Both the compressed (31..=34) and uncompressed (27..=30) header
        // ranges occur in the wild.
        let id = match header {
            31..=34 => header - COMPACT_HEADER_BASE,
            27..=30 => header - 27,
            _ => {
                return Err(KeyError::InvalidSignature(format!(
                    "invalid recovery header {header}"
                )))
            }
        };
        RecoveryId::from_byte(id)
            .ok_or_else(|| KeyError::InvalidSignature(format!("invalid recovery id {id}")))
    }

    /// Recovers the public key that produced this signature over `digest`.
    pub fn recover(&self, digest: &SigningDigest) -> Result<PublicKey, KeyError> {
        let key = VerifyingKey::recover_from_prehash(
            digest.as_bytes(),
            &self.ecdsa_signature()?,
            self.recovery_id()?,
        )
        .map_err(|e| KeyError::InvalidSignature(e.to_string()))?;
        Ok(PublicKey::from_verifying_key(&key))
    }

    /// Whether the signature satisfies the chain's canonical form: neither
    /// `r` nor `s` may have the high bit set or a redundant leading zero.
    pub fn is_canonical(&self) -> bool {
        let d = &self.data;
        let component_ok =
            |first: u8, second: u8| first & 0x80 == 0 && !(first == 0 && second & 0x80 == 0);
        component_ok(d[1], d[2]) && component_ok(d[33], d[34])
    }
}

impl FromStr for Signature {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key_type, payload) =
            split_modern(s, "SIG").ok_or_else(|| KeyError::UnknownFormat(s.to_string()))?;
        let data = decode_checked(payload, Some(key_type))?;
        Ok(Signature { key_type, data })
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SIG_{}_{}",
            self.key_type.suffix(),
            encode_checked(&self.data, Some(self.key_type))
        )
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({self})")
    }
}

/// A K1 private key. Its `Debug` output never contains key material.
#[derive(Clone)]
pub struct PrivateKey {
    key: SigningKey,
}

impl PrivateKey {
    pub fn random() -> Self {
        PrivateKey {
            key: SigningKey::random(&mut OsRng),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_verifying_key(self.key.verifying_key())
    }

    /// Signs a 32-byte digest with an RFC6979 nonce. Non-canonical results
    /// are retried with an attempt counter as additional nonce data, so the
    /// same key and digest always give the same signature.
    pub fn sign_digest(&self, digest: &SigningDigest) -> Result<Signature, KeyError> {
        let scalar: &k256::Scalar = self.key.as_nonzero_scalar();
        let prehash = k256::FieldBytes::from(*digest.as_bytes());
        for attempt in 0..MAX_SIGNING_ATTEMPTS {
            let extra_data = if attempt == 0 {
                Vec::new()
            } else {
                (attempt as u64).to_be_bytes().to_vec()
            };
            let (signature, recovery_id) = scalar
                .try_sign_prehashed_rfc6979::<Sha256>(&prehash, &extra_data)
                .map_err(|e| KeyError::InvalidSignature(e.to_string()))?;
            let recovery_id = match recovery_id {
                Some(recovery_id) => recovery_id,
                None => RecoveryId::trial_recovery_from_prehash(
                    self.key.verifying_key(),
                    digest.as_bytes(),
                    &signature,
                )
                .map_err(|e| KeyError::InvalidSignature(e.to_string()))?,
            };

            let mut data = [0u8; SIGNATURE_LEN];
            data[0] = COMPACT_HEADER_BASE + recovery_id.to_byte();
            data[1..].copy_from_slice(&signature.to_bytes());
            let signature = Signature {
                key_type: KeyType::K1,
                data,
            };
            if signature.is_canonical() {
                return Ok(signature);
            }
        }
        Err(KeyError::NoCanonicalSignature(MAX_SIGNING_ATTEMPTS))
    }

    /// The legacy WIF text form.
    pub fn to_wif(&self) -> String {
        let mut payload = vec![0x80];
        payload.extend_from_slice(&self.key.to_bytes());
        let checksum = double_sha256(&payload);
        payload.extend_from_slice(&checksum[..4]);
        bs58::encode(payload).into_string()
    }
}

impl FromStr for PrivateKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let secret: [u8; 32] = if let Some((key_type, payload)) = split_modern(s, "PVT") {
            if key_type != KeyType::K1 {
                return Err(KeyError::UnsupportedKeyType(key_type.to_u8()));
            }
            decode_checked(payload, Some(key_type))?
        } else {
            let payload = bs58::decode(s)
                .into_vec()
                .map_err(|e| KeyError::Base58(e.to_string()))?;
            if payload.len() != 37 || payload[0] != 0x80 {
                return Err(KeyError::UnknownFormat("expected WIF or PVT_K1_ key".to_string()));
            }
            let (body, checksum) = payload.split_at(33);
            if double_sha256(body)[..4] != *checksum {
                return Err(KeyError::Checksum);
            }
            let mut secret = [0u8; 32];
            secret.copy_from_slice(&body[1..]);
            secret
        };
        let key =
            SigningKey::from_slice(&secret).map_err(|e| KeyError::InvalidKey(e.to_string()))?;
        Ok(PrivateKey { key })
    }
}

impl fmt::Display for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PVT_K1_{}", encode_checked(&self.key.to_bytes(), Some(KeyType::K1)))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey({})", self.public_key())
    }
}

impl serde::Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        crate::asset::text::deserialize(deserializer)
    }
}

impl serde::Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        crate::asset::text::deserialize(deserializer)
    }
}

impl Pack for PublicKey {
    fn pack(&self, writer: &mut Writer) -> Result<(), BinaryError> {
        writer.write_u8(self.key_type.to_u8());
        writer.write_bytes(&self.data);
        Ok(())
    }
}

impl Unpack for PublicKey {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, BinaryError> {
        let key_type = KeyType::from_u8(reader.read_u8()?)
            .map_err(|e| BinaryError::InvalidValue(e.to_string()))?;
        Ok(PublicKey {
            key_type,
            data: reader.read_array()?,
        })
    }
}

impl Pack for Signature {
    fn pack(&self, writer: &mut Writer) -> Result<(), BinaryError> {
        writer.write_u8(self.key_type.to_u8());
        writer.write_bytes(&self.data);
        Ok(())
    }
}

impl Unpack for Signature {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, BinaryError> {
        let key_type = KeyType::from_u8(reader.read_u8()?)
            .map_err(|e| BinaryError::InvalidValue(e.to_string()))?;
        Ok(Signature {
            key_type,
            data: reader.read_array()?,
        })
    }
}
