//! Contract interfaces (ABIs) and conversion of action arguments between
//! their structured JSON form and the packed bytes carried on chain.

mod codec;

use cosigner_primitives::binary::BinaryError;
use cosigner_primitives::Name;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub use codec::MAX_DEPTH;

#[derive(Debug, Error)]
pub enum AbiError {
    #[error("interface has no action {0}")]
    UnknownAction(Name),
    #[error("unknown type {0:?}")]
    UnknownType(String),
    #[error("expected {expected} for type {type_name:?}")]
    TypeMismatch {
        type_name: String,
        expected: &'static str,
    },
    #[error("invalid value for type {type_name:?}: {reason}")]
    InvalidValue { type_name: String, reason: String },
    #[error("struct {struct_name:?} is missing field {field:?}")]
    MissingField { struct_name: String, field: String },
    #[error("type nesting exceeds {MAX_DEPTH} levels")]
    RecursionLimit,
    #[error("invalid interface: {0}")]
    InvalidInterface(String),
    #[error(transparent)]
    Binary(#[from] BinaryError),
}

/// The interface document returned by the chain's `get_abi` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiDef {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub types: Vec<TypeDef>,
    #[serde(default)]
    pub structs: Vec<StructDef>,
    #[serde(default)]
    pub actions: Vec<ActionDef>,
    #[serde(default)]
    pub variants: Vec<VariantDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDef {
    pub new_type_name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    #[serde(default)]
    pub base: String,
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDef {
    pub name: Name,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub ricardian_contract: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantDef {
    pub name: String,
    pub types: Vec<String>,
}

/// An interface indexed for lookups during encoding and decoding.
#[derive(Debug, Clone)]
pub struct Abi {
    typedefs: HashMap<String, String>,
    structs: HashMap<String, StructDef>,
    variants: HashMap<String, VariantDef>,
    actions: HashMap<Name, String>,
}

impl Abi {
    pub fn new(def: AbiDef) -> Result<Self, AbiError> {
        let mut typedefs = HashMap::new();
        for typedef in def.types {
            if typedef.new_type_name.is_empty() {
                return Err(AbiError::InvalidInterface("empty type alias".to_string()));
            }
            if typedefs
                .insert(typedef.new_type_name.clone(), typedef.type_name)
                .is_some()
            {
                return Err(AbiError::InvalidInterface(format!(
                    "type {:?} is defined twice",
                    typedef.new_type_name
                )));
            }
        }
        let mut structs = HashMap::new();
        for def in def.structs {
            if structs.insert(def.name.clone(), def.clone()).is_some() {
                return Err(AbiError::InvalidInterface(format!(
                    "struct {:?} is defined twice",
                    def.name
                )));
            }
        }
        let variants = def
            .variants
            .into_iter()
            .map(|variant| (variant.name.clone(), variant))
            .collect();
        let actions = def
            .actions
            .into_iter()
            .map(|action| (action.name, action.type_name))
            .collect();
        Ok(Abi {
            typedefs,
            structs,
            variants,
            actions,
        })
    }

    /// The argument type of `action`.
    pub fn action_type(&self, action: Name) -> Result<&str, AbiError> {
        self.actions
            .get(&action)
            .map(String::as_str)
            .ok_or(AbiError::UnknownAction(action))
    }

    /// Packs the structured arguments of `action`.
    pub fn encode_action(
        &self,
        action: Name,
        value: &serde_json::Value,
    ) -> Result<Vec<u8>, AbiError> {
        self.encode(self.action_type(action)?, value)
    }

    /// Unpacks the arguments of `action`, passing every `name` value through
    /// `map_name` on the way out.
    pub fn decode_action(
        &self,
        action: Name,
        data: &[u8],
        map_name: &dyn Fn(Name) -> Name,
    ) -> Result<serde_json::Value, AbiError> {
        codec::decode(self, self.action_type(action)?, data, map_name)
    }

    pub fn encode(&self, type_name: &str, value: &serde_json::Value) -> Result<Vec<u8>, AbiError> {
        codec::encode(self, type_name, value)
    }

    pub fn decode(&self, type_name: &str, data: &[u8]) -> Result<serde_json::Value, AbiError> {
        codec::decode(self, type_name, data, &|name| name)
    }

    fn typedef(&self, name: &str) -> Option<&str> {
        self.typedefs.get(name).map(String::as_str)
    }

    fn struct_def(&self, name: &str) -> Option<&StructDef> {
        self.structs.get(name)
    }

    fn variant_def(&self, name: &str) -> Option<&VariantDef> {
        self.variants.get(name)
    }
}
