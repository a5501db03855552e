//! Little-endian binary codec used by the chain's canonical serialization.
//!
//! Every integer is little-endian, lengths and counts are `varuint32`
//! (LEB128, at most five bytes), and strings are length-prefixed UTF-8.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BinaryError {
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },
    #[error("varuint32 does not fit in 32 bits")]
    VarintOverflow,
    #[error("invalid utf-8 in string")]
    InvalidUtf8,
    #[error("invalid boolean byte {0:#04x}")]
    InvalidBool(u8),
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

/// Cursor over a borrowed byte slice.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Fails unless every byte has been consumed.
    pub fn finish(&self) -> Result<(), BinaryError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(BinaryError::TrailingBytes(n)),
        }
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], BinaryError> {
        if self.remaining() < len {
            return Err(BinaryError::UnexpectedEof {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], BinaryError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, BinaryError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, BinaryError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, BinaryError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, BinaryError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_u128(&mut self) -> Result<u128, BinaryError> {
        Ok(u128::from_le_bytes(self.read_array()?))
    }

    pub fn read_bool(&mut self) -> Result<bool, BinaryError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(BinaryError::InvalidBool(other)),
        }
    }

    pub fn read_varuint32(&mut self) -> Result<u32, BinaryError> {
        let mut value: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift >= 35 {
                return Err(BinaryError::VarintOverflow);
            }
        }
        u32::try_from(value).map_err(|_| BinaryError::VarintOverflow)
    }

    /// Zigzag-encoded signed varint.
    pub fn read_varint32(&mut self) -> Result<i32, BinaryError> {
        let raw = self.read_varuint32()?;
        Ok(((raw >> 1) as i32) ^ -((raw & 1) as i32))
    }

    /// Reads a `varuint32` length followed by that many bytes.
    pub fn read_length_prefixed(&mut self) -> Result<&'a [u8], BinaryError> {
        let len = self.read_varuint32()? as usize;
        self.read_bytes(len)
    }

    pub fn read_string(&mut self) -> Result<String, BinaryError> {
        let bytes = self.read_length_prefixed()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| BinaryError::InvalidUtf8)
    }
}

/// Growable output buffer.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u128(&mut self, value: u128) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    pub fn write_varuint32(&mut self, mut value: u32) {
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.write_u8(byte);
                return;
            }
            self.write_u8(byte | 0x80);
        }
    }

    pub fn write_varint32(&mut self, value: i32) {
        self.write_varuint32(((value << 1) ^ (value >> 31)) as u32);
    }

    /// Writes a `varuint32` length followed by the bytes.
    pub fn write_length_prefixed(&mut self, bytes: &[u8]) -> Result<(), BinaryError> {
        let len = u32::try_from(bytes.len()).map_err(|_| BinaryError::VarintOverflow)?;
        self.write_varuint32(len);
        self.write_bytes(bytes);
        Ok(())
    }

    pub fn write_string(&mut self, value: &str) -> Result<(), BinaryError> {
        self.write_length_prefixed(value.as_bytes())
    }
}

/// Types with a fixed canonical binary form.
pub trait Pack {
    fn pack(&self, writer: &mut Writer) -> Result<(), BinaryError>;

    fn packed(&self) -> Result<Vec<u8>, BinaryError> {
        let mut writer = Writer::new();
        self.pack(&mut writer)?;
        Ok(writer.into_bytes())
    }
}

pub trait Unpack: Sized {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, BinaryError>;

    /// Decodes a value that must span the whole buffer.
    fn unpack_exact(bytes: &[u8]) -> Result<Self, BinaryError> {
        let mut reader = Reader::new(bytes);
        let value = Self::unpack(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

impl Pack for u8 {
    fn pack(&self, writer: &mut Writer) -> Result<(), BinaryError> {
        writer.write_u8(*self);
        Ok(())
    }
}

impl Unpack for u8 {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, BinaryError> {
        reader.read_u8()
    }
}

impl Pack for u16 {
    fn pack(&self, writer: &mut Writer) -> Result<(), BinaryError> {
        writer.write_u16(*self);
        Ok(())
    }
}

impl Unpack for u16 {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, BinaryError> {
        reader.read_u16()
    }
}

impl Pack for u32 {
    fn pack(&self, writer: &mut Writer) -> Result<(), BinaryError> {
        writer.write_u32(*self);
        Ok(())
    }
}

impl Unpack for u32 {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, BinaryError> {
        reader.read_u32()
    }
}

impl Pack for String {
    fn pack(&self, writer: &mut Writer) -> Result<(), BinaryError> {
        writer.write_string(self)
    }
}

impl Unpack for String {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, BinaryError> {
        reader.read_string()
    }
}

impl<T: Pack> Pack for Vec<T> {
    fn pack(&self, writer: &mut Writer) -> Result<(), BinaryError> {
        let len = u32::try_from(self.len()).map_err(|_| BinaryError::VarintOverflow)?;
        writer.write_varuint32(len);
        self.iter().try_for_each(|item| item.pack(writer))
    }
}

impl<T: Unpack> Unpack for Vec<T> {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, BinaryError> {
        let len = reader.read_varuint32()? as usize;
        // Every element occupies at least one byte, so a count larger than
        // the remaining input is malformed.
        if len > reader.remaining() {
            return Err(BinaryError::UnexpectedEof {
                needed: len,
                remaining: reader.remaining(),
            });
        }
        (0..len).map(|_| T::unpack(reader)).collect()
    }
}

impl<T: Pack> Pack for Option<T> {
    fn pack(&self, writer: &mut Writer) -> Result<(), BinaryError> {
        match self {
            None => {
                writer.write_u8(0);
                Ok(())
            }
            Some(value) => {
                writer.write_u8(1);
                value.pack(writer)
            }
        }
    }
}

impl<T: Unpack> Unpack for Option<T> {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, BinaryError> {
        if reader.read_bool()? {
            Ok(Some(T::unpack(reader)?))
        } else {
            Ok(None)
        }
    }
}

/// Length-prefixed opaque bytes (`bytes` in ABI terms).
pub fn pack_bytes(bytes: &[u8], writer: &mut Writer) -> Result<(), BinaryError> {
    writer.write_length_prefixed(bytes)
}

pub fn unpack_bytes(reader: &mut Reader<'_>) -> Result<Vec<u8>, BinaryError> {
    Ok(reader.read_length_prefixed()?.to_vec())
}
