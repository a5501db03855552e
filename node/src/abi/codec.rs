use super::{Abi, AbiError, StructDef};
use cosigner_primitives::asset::{Asset, ExtendedAsset, Symbol, SymbolCode};
use cosigner_primitives::binary::{Pack, Reader, Unpack, Writer};
use cosigner_primitives::crypto::{PublicKey, Signature};
use cosigner_primitives::timestamp;
use cosigner_primitives::Name;
use serde_json::{Map, Value};
use std::fmt::Display;
use std::str::FromStr;

/// Deepest nesting of arrays, structs, aliases and variants accepted in
/// either direction.
pub const MAX_DEPTH: usize = 32;

/// Most elements accepted in an array whose elements can pack to nothing,
/// where the remaining data does not bound the length.
pub const MAX_EMPTY_ELEMENTS: usize = 1 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Bool,
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Int128,
    Uint128,
    VarInt32,
    VarUint32,
    Float32,
    Float64,
    Float128,
    TimePoint,
    TimePointSec,
    BlockTimestamp,
    Name,
    Bytes,
    String,
    Checksum160,
    Checksum256,
    Checksum512,
    PublicKey,
    Signature,
    Symbol,
    SymbolCode,
    Asset,
    ExtendedAsset,
}

impl Builtin {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "bool" => Builtin::Bool,
            "int8" => Builtin::Int8,
            "uint8" => Builtin::Uint8,
            "int16" => Builtin::Int16,
            "uint16" => Builtin::Uint16,
            "int32" => Builtin::Int32,
            "uint32" => Builtin::Uint32,
            "int64" => Builtin::Int64,
            "uint64" => Builtin::Uint64,
            "int128" => Builtin::Int128,
            "uint128" => Builtin::Uint128,
            "varint32" => Builtin::VarInt32,
            "varuint32" => Builtin::VarUint32,
            "float32" => Builtin::Float32,
            "float64" => Builtin::Float64,
            "float128" => Builtin::Float128,
            "time_point" => Builtin::TimePoint,
            "time_point_sec" => Builtin::TimePointSec,
            "block_timestamp_type" => Builtin::BlockTimestamp,
            "name" => Builtin::Name,
            "bytes" => Builtin::Bytes,
            "string" => Builtin::String,
            "checksum160" => Builtin::Checksum160,
            "checksum256" => Builtin::Checksum256,
            "checksum512" => Builtin::Checksum512,
            "public_key" => Builtin::PublicKey,
            "signature" => Builtin::Signature,
            "symbol" => Builtin::Symbol,
            "symbol_code" => Builtin::SymbolCode,
            "asset" => Builtin::Asset,
            "extended_asset" => Builtin::ExtendedAsset,
            _ => return None,
        })
    }
}

/// How a type expression wraps its element type.
enum Shape<'a> {
    Array(&'a str),
    Optional(&'a str),
    Extension(&'a str),
    Plain(&'a str),
}

impl<'a> Shape<'a> {
    fn of(type_name: &'a str) -> Self {
        if let Some(inner) = type_name.strip_suffix("[]") {
            Shape::Array(inner)
        } else if let Some(inner) = type_name.strip_suffix('?') {
            Shape::Optional(inner)
        } else if let Some(inner) = type_name.strip_suffix('$') {
            Shape::Extension(inner)
        } else {
            Shape::Plain(type_name)
        }
    }
}

fn mismatch(type_name: &str, expected: &'static str) -> AbiError {
    AbiError::TypeMismatch {
        type_name: type_name.to_string(),
        expected,
    }
}

fn invalid(type_name: &str, reason: impl Display) -> AbiError {
    AbiError::InvalidValue {
        type_name: type_name.to_string(),
        reason: reason.to_string(),
    }
}

pub(super) fn encode(abi: &Abi, type_name: &str, value: &Value) -> Result<Vec<u8>, AbiError> {
    let mut encoder = Encoder {
        abi,
        writer: Writer::new(),
    };
    encoder.encode(type_name, value, 0)?;
    Ok(encoder.writer.into_bytes())
}

pub(super) fn decode(
    abi: &Abi,
    type_name: &str,
    data: &[u8],
    map_name: &dyn Fn(Name) -> Name,
) -> Result<Value, AbiError> {
    let mut decoder = Decoder {
        abi,
        reader: Reader::new(data),
        map_name,
    };
    let value = decoder.decode(type_name, 0)?;
    decoder.reader.finish()?;
    Ok(value)
}

struct Encoder<'a> {
    abi: &'a Abi,
    writer: Writer,
}

impl Encoder<'_> {
    fn encode(&mut self, type_name: &str, value: &Value, depth: usize) -> Result<(), AbiError> {
        if depth > MAX_DEPTH {
            return Err(AbiError::RecursionLimit);
        }
        let abi = self.abi;
        match Shape::of(type_name) {
            Shape::Array(inner) => {
                let items = value.as_array().ok_or_else(|| mismatch(type_name, "an array"))?;
                let len = u32::try_from(items.len()).map_err(|_| invalid(type_name, "too long"))?;
                self.writer.write_varuint32(len);
                for item in items {
                    self.encode(inner, item, depth + 1)?;
                }
                Ok(())
            }
            Shape::Optional(inner) => {
                if value.is_null() {
                    self.writer.write_u8(0);
                    Ok(())
                } else {
                    self.writer.write_u8(1);
                    self.encode(inner, value, depth + 1)
                }
            }
            Shape::Extension(inner) => self.encode(inner, value, depth + 1),
            Shape::Plain(name) => {
                if let Some(builtin) = Builtin::from_name(name) {
                    self.encode_builtin(builtin, name, value)
                } else if let Some(target) = abi.typedef(name) {
                    self.encode(target, value, depth + 1)
                } else if let Some(def) = abi.struct_def(name) {
                    let fields = value
                        .as_object()
                        .ok_or_else(|| mismatch(name, "an object"))?;
                    self.encode_struct(def, fields, depth + 1)
                } else if let Some(def) = abi.variant_def(name) {
                    let (case, inner) = match value.as_array().map(Vec::as_slice) {
                        Some([Value::String(case), inner]) => (case, inner),
                        _ => return Err(mismatch(name, "a [type, value] pair")),
                    };
                    let index = def
                        .types
                        .iter()
                        .position(|t| t == case)
                        .ok_or_else(|| invalid(name, format!("no case {case:?}")))?;
                    self.writer.write_varuint32(index as u32);
                    self.encode(case, inner, depth + 1)
                } else {
                    Err(AbiError::UnknownType(name.to_string()))
                }
            }
        }
    }

    fn encode_struct(
        &mut self,
        def: &StructDef,
        fields: &Map<String, Value>,
        depth: usize,
    ) -> Result<(), AbiError> {
        if depth > MAX_DEPTH {
            return Err(AbiError::RecursionLimit);
        }
        if !def.base.is_empty() {
            let base = resolve_struct(self.abi, &def.base, depth)?;
            self.encode_struct(base, fields, depth + 1)?;
        }
        let mut omitted_extension: Option<&str> = None;
        for field in &def.fields {
            match (fields.get(&field.name), omitted_extension) {
                (Some(_), Some(omitted)) => {
                    return Err(invalid(
                        &def.name,
                        format!("{:?} is set but extension {omitted:?} is not", field.name),
                    ));
                }
                (Some(value), None) => self.encode(&field.type_name, value, depth + 1)?,
                (None, _) if field.type_name.ends_with('$') => {
                    omitted_extension = Some(field.name.as_str());
                }
                (None, _) => {
                    return Err(AbiError::MissingField {
                        struct_name: def.name.clone(),
                        field: field.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn encode_builtin(
        &mut self,
        builtin: Builtin,
        type_name: &str,
        value: &Value,
    ) -> Result<(), AbiError> {
        let w = &mut self.writer;
        match builtin {
            Builtin::Bool => w.write_bool(value.as_bool().ok_or_else(|| mismatch(type_name, "a boolean"))?),
            Builtin::Int8 => w.write_u8(ranged::<i8>(type_name, value)? as u8),
            Builtin::Uint8 => w.write_u8(ranged(type_name, value)?),
            Builtin::Int16 => w.write_u16(ranged::<i16>(type_name, value)? as u16),
            Builtin::Uint16 => w.write_u16(ranged(type_name, value)?),
            Builtin::Int32 => w.write_u32(ranged::<i32>(type_name, value)? as u32),
            Builtin::Uint32 => w.write_u32(ranged(type_name, value)?),
            Builtin::Int64 => w.write_u64(ranged::<i64>(type_name, value)? as u64),
            Builtin::Uint64 => w.write_u64(ranged(type_name, value)?),
            Builtin::Int128 => w.write_u128(integer(type_name, value)? as u128),
            Builtin::Uint128 => w.write_u128(unsigned128(type_name, value)?),
            Builtin::VarInt32 => w.write_varint32(ranged(type_name, value)?),
            Builtin::VarUint32 => w.write_varuint32(ranged(type_name, value)?),
            Builtin::Float32 => w.write_u32((float(type_name, value)? as f32).to_bits()),
            Builtin::Float64 => w.write_u64(float(type_name, value)?.to_bits()),
            Builtin::Float128 => w.write_bytes(&fixed_hex::<16>(type_name, value)?),
            Builtin::TimePoint => {
                let micros = timestamp::parse_time_point(text(type_name, value)?)
                    .map_err(|e| invalid(type_name, e))?;
                w.write_u64(micros as u64)
            }
            Builtin::TimePointSec => w.write_u32(
                timestamp::parse_time_point_sec(text(type_name, value)?)
                    .map_err(|e| invalid(type_name, e))?,
            ),
            Builtin::BlockTimestamp => w.write_u32(
                timestamp::parse_block_timestamp(text(type_name, value)?)
                    .map_err(|e| invalid(type_name, e))?,
            ),
            Builtin::Name => parsed::<Name>(type_name, value)?.pack(w)?,
            Builtin::Bytes => {
                let bytes = hex::decode(text(type_name, value)?).map_err(|e| invalid(type_name, e))?;
                w.write_length_prefixed(&bytes)?
            }
            Builtin::String => w.write_string(text(type_name, value)?)?,
            Builtin::Checksum160 => w.write_bytes(&fixed_hex::<20>(type_name, value)?),
            Builtin::Checksum256 => w.write_bytes(&fixed_hex::<32>(type_name, value)?),
            Builtin::Checksum512 => w.write_bytes(&fixed_hex::<64>(type_name, value)?),
            Builtin::PublicKey => parsed::<PublicKey>(type_name, value)?.pack(w)?,
            Builtin::Signature => parsed::<Signature>(type_name, value)?.pack(w)?,
            Builtin::Symbol => parsed::<Symbol>(type_name, value)?.pack(w)?,
            Builtin::SymbolCode => parsed::<SymbolCode>(type_name, value)?.pack(w)?,
            Builtin::Asset => parsed::<Asset>(type_name, value)?.pack(w)?,
            Builtin::ExtendedAsset => {
                let asset: ExtendedAsset =
                    serde_json::from_value(value.clone()).map_err(|e| invalid(type_name, e))?;
                asset.pack(w)?
            }
        }
        Ok(())
    }
}

struct Decoder<'a> {
    abi: &'a Abi,
    reader: Reader<'a>,
    map_name: &'a dyn Fn(Name) -> Name,
}

impl Decoder<'_> {
    fn decode(&mut self, type_name: &str, depth: usize) -> Result<Value, AbiError> {
        if depth > MAX_DEPTH {
            return Err(AbiError::RecursionLimit);
        }
        let abi = self.abi;
        match Shape::of(type_name) {
            Shape::Array(inner) => {
                let len = self.reader.read_varuint32()? as usize;
                let bound = if may_pack_empty(abi, inner, depth + 1) {
                    MAX_EMPTY_ELEMENTS
                } else {
                    self.reader.remaining()
                };
                if len > bound {
                    return Err(invalid(type_name, format!("length {len} overruns the data")));
                }
                let items = (0..len)
                    .map(|_| self.decode(inner, depth + 1))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(items))
            }
            Shape::Optional(inner) => {
                if self.reader.read_bool()? {
                    self.decode(inner, depth + 1)
                } else {
                    Ok(Value::Null)
                }
            }
            Shape::Extension(inner) => self.decode(inner, depth + 1),
            Shape::Plain(name) => {
                if let Some(builtin) = Builtin::from_name(name) {
                    self.decode_builtin(builtin, name)
                } else if let Some(target) = abi.typedef(name) {
                    self.decode(target, depth + 1)
                } else if let Some(def) = abi.struct_def(name) {
                    let mut fields = Map::new();
                    self.decode_struct(def, &mut fields, depth + 1)?;
                    Ok(Value::Object(fields))
                } else if let Some(def) = abi.variant_def(name) {
                    let index = self.reader.read_varuint32()? as usize;
                    let case = def
                        .types
                        .get(index)
                        .ok_or_else(|| invalid(name, format!("no case at index {index}")))?;
                    let inner = self.decode(case, depth + 1)?;
                    Ok(Value::Array(vec![Value::String(case.clone()), inner]))
                } else {
                    Err(AbiError::UnknownType(name.to_string()))
                }
            }
        }
    }

    fn decode_struct(
        &mut self,
        def: &StructDef,
        fields: &mut Map<String, Value>,
        depth: usize,
    ) -> Result<(), AbiError> {
        if depth > MAX_DEPTH {
            return Err(AbiError::RecursionLimit);
        }
        if !def.base.is_empty() {
            let base = resolve_struct(self.abi, &def.base, depth)?;
            self.decode_struct(base, fields, depth + 1)?;
        }
        for field in &def.fields {
            if field.type_name.ends_with('$') && self.reader.is_empty() {
                break;
            }
            let value = self.decode(&field.type_name, depth + 1)?;
            fields.insert(field.name.clone(), value);
        }
        Ok(())
    }

    fn decode_builtin(&mut self, builtin: Builtin, type_name: &str) -> Result<Value, AbiError> {
        let r = &mut self.reader;
        Ok(match builtin {
            Builtin::Bool => Value::Bool(r.read_bool()?),
            Builtin::Int8 => Value::from(r.read_u8()? as i8),
            Builtin::Uint8 => Value::from(r.read_u8()?),
            Builtin::Int16 => Value::from(r.read_u16()? as i16),
            Builtin::Uint16 => Value::from(r.read_u16()?),
            Builtin::Int32 => Value::from(r.read_u32()? as i32),
            Builtin::Uint32 => Value::from(r.read_u32()?),
            Builtin::Int64 => Value::from(r.read_u64()? as i64),
            Builtin::Uint64 => Value::from(r.read_u64()?),
            Builtin::Int128 => Value::String((r.read_u128()? as i128).to_string()),
            Builtin::Uint128 => Value::String(r.read_u128()?.to_string()),
            Builtin::VarInt32 => Value::from(r.read_varint32()?),
            Builtin::VarUint32 => Value::from(r.read_varuint32()?),
            Builtin::Float32 => float_value(f64::from(f32::from_bits(r.read_u32()?))),
            Builtin::Float64 => float_value(f64::from_bits(r.read_u64()?)),
            Builtin::Float128 => Value::String(hex::encode(r.read_bytes(16)?)),
            Builtin::TimePoint => Value::String(
                timestamp::format_time_point(r.read_u64()? as i64)
                    .map_err(|e| invalid(type_name, e))?,
            ),
            Builtin::TimePointSec => Value::String(
                timestamp::format_time_point_sec(r.read_u32()?).map_err(|e| invalid(type_name, e))?,
            ),
            Builtin::BlockTimestamp => Value::String(
                timestamp::format_block_timestamp(r.read_u32()?)
                    .map_err(|e| invalid(type_name, e))?,
            ),
            Builtin::Name => Value::String((self.map_name)(Name::unpack(r)?).to_string()),
            Builtin::Bytes => Value::String(hex::encode(r.read_length_prefixed()?)),
            Builtin::String => Value::String(r.read_string()?),
            Builtin::Checksum160 => Value::String(hex::encode(r.read_bytes(20)?)),
            Builtin::Checksum256 => Value::String(hex::encode(r.read_bytes(32)?)),
            Builtin::Checksum512 => Value::String(hex::encode(r.read_bytes(64)?)),
            Builtin::PublicKey => Value::String(PublicKey::unpack(r)?.to_string()),
            Builtin::Signature => Value::String(Signature::unpack(r)?.to_string()),
            Builtin::Symbol => Value::String(Symbol::unpack(r)?.to_string()),
            Builtin::SymbolCode => Value::String(SymbolCode::unpack(r)?.to_string()),
            Builtin::Asset => Value::String(Asset::unpack(r)?.to_string()),
            Builtin::ExtendedAsset => {
                let asset = ExtendedAsset::unpack(r)?;
                serde_json::to_value(asset).map_err(|e| invalid(type_name, e))?
            }
        })
    }
}

/// Whether a value of `type_name` can take no bytes at all, as an empty
/// struct or one made only of binary extensions does.
fn may_pack_empty(abi: &Abi, type_name: &str, depth: usize) -> bool {
    if depth > MAX_DEPTH {
        return false;
    }
    match Shape::of(type_name) {
        Shape::Array(_) | Shape::Optional(_) => false,
        Shape::Extension(inner) => may_pack_empty(abi, inner, depth + 1),
        Shape::Plain(name) => {
            if Builtin::from_name(name).is_some() {
                false
            } else if let Some(target) = abi.typedef(name) {
                may_pack_empty(abi, target, depth + 1)
            } else if let Some(def) = abi.struct_def(name) {
                (def.base.is_empty() || may_pack_empty(abi, &def.base, depth + 1))
                    && def.fields.iter().all(|field| {
                        field.type_name.ends_with('$')
                            || may_pack_empty(abi, &field.type_name, depth + 1)
                    })
            } else {
                false
            }
        }
    }
}

/// Follows aliases from `name` to the struct it names.
fn resolve_struct<'a>(abi: &'a Abi, name: &str, depth: usize) -> Result<&'a StructDef, AbiError> {
    let mut current = name;
    for _ in depth..=MAX_DEPTH {
        if let Some(def) = abi.struct_def(current) {
            return Ok(def);
        }
        match abi.typedef(current) {
            Some(target) => current = target,
            None => return Err(AbiError::UnknownType(name.to_string())),
        }
    }
    Err(AbiError::RecursionLimit)
}

fn text<'v>(type_name: &str, value: &'v Value) -> Result<&'v str, AbiError> {
    value.as_str().ok_or_else(|| mismatch(type_name, "a string"))
}

fn parsed<T>(type_name: &str, value: &Value) -> Result<T, AbiError>
where
    T: FromStr,
    T::Err: Display,
{
    text(type_name, value)?
        .parse()
        .map_err(|e| invalid(type_name, e))
}

/// Integers are accepted as JSON numbers or as decimal strings, since 64-bit
/// values do not survive every JSON implementation as numbers.
fn integer(type_name: &str, value: &Value) -> Result<i128, AbiError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
            .ok_or_else(|| invalid(type_name, format!("{n} is not an integer"))),
        Value::String(s) => s.trim().parse().map_err(|e| invalid(type_name, e)),
        _ => Err(mismatch(type_name, "an integer")),
    }
}

fn ranged<T: TryFrom<i128>>(type_name: &str, value: &Value) -> Result<T, AbiError> {
    let wide = integer(type_name, value)?;
    T::try_from(wide).map_err(|_| invalid(type_name, format!("{wide} is out of range")))
}

fn unsigned128(type_name: &str, value: &Value) -> Result<u128, AbiError> {
    match value {
        Value::String(s) => s.trim().parse().map_err(|e| invalid(type_name, e)),
        _ => ranged(type_name, value),
    }
}

fn float(type_name: &str, value: &Value) -> Result<f64, AbiError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| invalid(type_name, format!("{n} is not a float"))),
        Value::String(s) => s.trim().parse().map_err(|e| invalid(type_name, e)),
        _ => Err(mismatch(type_name, "a number")),
    }
}

/// Non-finite values have no JSON number form and are rendered as text.
fn float_value(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(value.to_string()))
}

fn fixed_hex<const N: usize>(type_name: &str, value: &Value) -> Result<[u8; N], AbiError> {
    let mut bytes = [0u8; N];
    hex::decode_to_slice(text(type_name, value)?, &mut bytes).map_err(|e| invalid(type_name, e))?;
    Ok(bytes)
}
