//! Token symbols and quantities.

use crate::binary::{BinaryError, Pack, Reader, Unpack, Writer};
use crate::name::Name;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const MAX_PRECISION: u8 = 18;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseAssetError {
    #[error("invalid symbol code {0:?}")]
    InvalidSymbolCode(String),
    #[error("invalid symbol {0:?}, expected `<precision>,<code>`")]
    InvalidSymbol(String),
    #[error("precision {0} exceeds the maximum of 18")]
    PrecisionTooLarge(u8),
    #[error("invalid asset {0:?}, expected `<amount> <code>`")]
    InvalidAsset(String),
    #[error("amount of {0:?} is out of range")]
    AmountOutOfRange(String),
}

/// Up to seven upper-case letters packed into the low 56 bits, first
/// character in the lowest byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolCode(u64);

impl SymbolCode {
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub fn from_u64(value: u64) -> Result<Self, ParseAssetError> {
        let code = SymbolCode(value);
        // Reject anything that would not come back from its own text form.
        if value == 0 || code.to_string().parse::<SymbolCode>() != Ok(code) {
            return Err(ParseAssetError::InvalidSymbolCode(format!("{value:#x}")));
        }
        Ok(code)
    }
}

impl FromStr for SymbolCode {
    type Err = ParseAssetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > 7 || !s.bytes().all(|c| c.is_ascii_uppercase()) {
            return Err(ParseAssetError::InvalidSymbolCode(s.to_string()));
        }
        let value = s
            .bytes()
            .enumerate()
            .fold(0u64, |acc, (i, c)| acc | (u64::from(c) << (8 * i)));
        Ok(SymbolCode(value))
    }
}

impl fmt::Display for SymbolCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut value = self.0;
        while value & 0xff != 0 {
            write!(f, "{}", char::from((value & 0xff) as u8))?;
            value >>= 8;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol {
    precision: u8,
    code: SymbolCode,
}

impl Symbol {
    pub fn new(precision: u8, code: SymbolCode) -> Result<Self, ParseAssetError> {
        if precision > MAX_PRECISION {
            return Err(ParseAssetError::PrecisionTooLarge(precision));
        }
        Ok(Symbol { precision, code })
    }

    pub fn precision(&self) -> u8 {
        self.precision
    }

    pub fn code(&self) -> SymbolCode {
        self.code
    }

    pub fn as_u64(&self) -> u64 {
        u64::from(self.precision) | (self.code.as_u64() << 8)
    }

    pub fn from_u64(value: u64) -> Result<Self, ParseAssetError> {
        Symbol::new((value & 0xff) as u8, SymbolCode::from_u64(value >> 8)?)
    }
}

impl FromStr for Symbol {
    type Err = ParseAssetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (precision, code) = s
            .split_once(',')
            .ok_or_else(|| ParseAssetError::InvalidSymbol(s.to_string()))?;
        let precision = precision
            .parse::<u8>()
            .map_err(|_| ParseAssetError::InvalidSymbol(s.to_string()))?;
        Symbol::new(precision, code.parse()?)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.precision, self.code)
    }
}

/// A signed amount in the smallest unit of its symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Asset {
    pub amount: i64,
    pub symbol: Symbol,
}

impl FromStr for Asset {
    type Err = ParseAssetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseAssetError::InvalidAsset(s.to_string());
        let (amount, code) = s.trim().split_once(' ').ok_or_else(invalid)?;
        let (negative, digits) = match amount.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, amount),
        };
        let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() || !whole.bytes().chain(fraction.bytes()).all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }
        let precision = u8::try_from(fraction.len())
            .map_err(|_| ParseAssetError::PrecisionTooLarge(u8::MAX))?;
        let symbol = Symbol::new(precision, code.trim().parse()?)?;
        let magnitude = format!("{whole}{fraction}")
            .parse::<i128>()
            .map_err(|_| ParseAssetError::AmountOutOfRange(s.to_string()))?;
        let amount = i64::try_from(if negative { -magnitude } else { magnitude })
            .map_err(|_| ParseAssetError::AmountOutOfRange(s.to_string()))?;
        Ok(Asset { amount, symbol })
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let precision = usize::from(self.symbol.precision);
        let digits = format!(
            "{:0width$}",
            i128::from(self.amount).unsigned_abs(),
            width = precision + 1
        );
        let sign = if self.amount < 0 { "-" } else { "" };
        let (whole, fraction) = digits.split_at(digits.len() - precision);
        if precision == 0 {
            write!(f, "{sign}{whole} {}", self.symbol.code)
        } else {
            write!(f, "{sign}{whole}.{fraction} {}", self.symbol.code)
        }
    }
}

/// An asset qualified by the contract that issues it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtendedAsset {
    #[serde(with = "text")]
    pub quantity: Asset,
    pub contract: Name,
}

/// Serde adapter for types whose JSON form is their `Display` text.
pub mod text {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::fmt::Display;
    use std::str::FromStr;

    pub fn serialize<T: Display, S: Serializer>(value: &T, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(value)
    }

    pub fn deserialize<'de, T, D>(d: D) -> Result<T, D::Error>
    where
        T: FromStr,
        T::Err: Display,
        D: Deserializer<'de>,
    {
        String::deserialize(d)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

impl Pack for SymbolCode {
    fn pack(&self, writer: &mut Writer) -> Result<(), BinaryError> {
        writer.write_u64(self.0);
        Ok(())
    }
}

impl Unpack for SymbolCode {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, BinaryError> {
        SymbolCode::from_u64(reader.read_u64()?)
            .map_err(|e| BinaryError::InvalidValue(e.to_string()))
    }
}

impl Pack for Symbol {
    fn pack(&self, writer: &mut Writer) -> Result<(), BinaryError> {
        writer.write_u64(self.as_u64());
        Ok(())
    }
}

impl Unpack for Symbol {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, BinaryError> {
        Symbol::from_u64(reader.read_u64()?).map_err(|e| BinaryError::InvalidValue(e.to_string()))
    }
}

impl Pack for Asset {
    fn pack(&self, writer: &mut Writer) -> Result<(), BinaryError> {
        writer.write_u64(self.amount as u64);
        self.symbol.pack(writer)
    }
}

impl Unpack for Asset {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, BinaryError> {
        let amount = reader.read_u64()? as i64;
        let symbol = Symbol::unpack(reader)?;
        Ok(Asset { amount, symbol })
    }
}

impl Pack for ExtendedAsset {
    fn pack(&self, writer: &mut Writer) -> Result<(), BinaryError> {
        self.quantity.pack(writer)?;
        self.contract.pack(writer)
    }
}

impl Unpack for ExtendedAsset {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, BinaryError> {
        Ok(ExtendedAsset {
            quantity: Asset::unpack(reader)?,
            contract: Name::unpack(reader)?,
        })
    }
}
