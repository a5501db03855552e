use crate::binary::{BinaryError, Pack, Reader, Unpack, Writer};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const CHARMAP: &[u8; 32] = b".12345abcdefghijklmnopqrstuvwxyz";
const MAX_LEN: usize = 13;

/// A 64-bit account, permission or action identifier.
///
/// The text form packs twelve 5-bit symbols followed by one 4-bit symbol,
/// most significant first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Name(u64);

/// Stands in for the actor of whoever ends up signing a request.
pub const PLACEHOLDER_ACTOR: Name = Name(1);
/// Stands in for the permission of whoever ends up signing a request.
pub const PLACEHOLDER_PERMISSION: Name = Name(2);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseNameError {
    #[error("name {0:?} is longer than 13 characters")]
    TooLong(String),
    #[error("name {name:?} contains invalid character {character:?}")]
    InvalidCharacter { name: String, character: char },
    #[error("thirteenth character of {0:?} must be one of .12345abcdefghij")]
    InvalidLastCharacter(String),
}

fn symbol_value(c: u8) -> Option<u64> {
    match c {
        b'.' => Some(0),
        b'1'..=b'5' => Some(u64::from(c - b'1') + 1),
        b'a'..=b'z' => Some(u64::from(c - b'a') + 6),
        _ => None,
    }
}

impl Name {
    pub const fn from_u64(value: u64) -> Self {
        Name(value)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether this is one of the two signer placeholders.
    pub fn is_placeholder(self) -> bool {
        self == PLACEHOLDER_ACTOR || self == PLACEHOLDER_PERMISSION
    }
}

impl FromStr for Name {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.len() > MAX_LEN {
            return Err(ParseNameError::TooLong(s.to_string()));
        }
        let mut value = 0u64;
        for (i, &c) in bytes.iter().enumerate() {
            let symbol = symbol_value(c).ok_or_else(|| ParseNameError::InvalidCharacter {
                name: s.to_string(),
                character: char::from(c),
            })?;
            if i < 12 {
                value |= symbol << (64 - 5 * (i + 1));
            } else {
                if symbol > 0x0f {
                    return Err(ParseNameError::InvalidLastCharacter(s.to_string()));
                }
                value |= symbol;
            }
        }
        Ok(Name(value))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = [b'.'; MAX_LEN];
        let mut tmp = self.0;
        for i in 0..MAX_LEN {
            let (mask, shift) = if i == 0 { (0x0f, 4) } else { (0x1f, 5) };
            out[MAX_LEN - 1 - i] = CHARMAP[(tmp & mask) as usize];
            tmp >>= shift;
        }
        let len = out.iter().rposition(|&c| c != b'.').map_or(0, |p| p + 1);
        // CHARMAP is ASCII.
        f.write_str(std::str::from_utf8(&out[..len]).map_err(|_| fmt::Error)?)
    }
}

impl From<Name> for u64 {
    fn from(name: Name) -> Self {
        name.0
    }
}

impl Serialize for Name {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Name {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl Pack for Name {
    fn pack(&self, writer: &mut Writer) -> Result<(), BinaryError> {
        writer.write_u64(self.0);
        Ok(())
    }
}

impl Unpack for Name {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, BinaryError> {
        Ok(Name(reader.read_u64()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;

    #[rstest]
    #[case("eosio", 0x5530ea0000000000)]
    #[case("eosio.token", 0x5530ea033482a600)]
    #[case("", 0)]
    #[case("............1", 1)]
    #[case("............2", 2)]
    #[case("zzzzzzzzzzzzj", u64::MAX)]
    fn test_name_values(#[case] text: &str, #[case] value: u64) {
        let name: Name = text.parse().unwrap();
        assert_eq!(name.as_u64(), value);
        assert_eq!(name.to_string(), text);
    }

    #[test]
    fn test_placeholders() {
        assert!("............1".parse::<Name>().unwrap().is_placeholder());
        assert_eq!("............2".parse::<Name>().unwrap(), PLACEHOLDER_PERMISSION);
        assert!(!"eosio".parse::<Name>().unwrap().is_placeholder());
    }

    #[test]
    fn test_every_value_survives_text_form() {
        for value in [3u64, 0x0f, 0x10, 0x8000_0000_0000_0001, 0xdead_beef_cafe_babe] {
            let name = Name::from_u64(value);
            assert_eq!(name.to_string().parse::<Name>().unwrap(), name);
        }
    }

    #[test]
    fn test_invalid_names() {
        assert_matches!("Eosio".parse::<Name>(), Err(ParseNameError::InvalidCharacter { .. }));
        assert_matches!("eosio6".parse::<Name>(), Err(ParseNameError::InvalidCharacter { .. }));
        assert_matches!("aaaaaaaaaaaaaa".parse::<Name>(), Err(ParseNameError::TooLong(_)));
        assert_matches!(
            "aaaaaaaaaaaaz".parse::<Name>(),
            Err(ParseNameError::InvalidLastCharacter(_))
        );
    }

    #[test]
    fn test_serde_uses_text_form() {
        let name: Name = "cosigner".parse().unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"cosigner\"");
        assert_eq!(serde_json::from_str::<Name>(&json).unwrap(), name);
    }
}
