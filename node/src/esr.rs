//! EOSIO signing requests: the compact, link-friendly encoding wallets and
//! dApps use to hand a transaction proposal around.

mod chains;

use crate::abi::AbiError;
use crate::interfaces::Interfaces;
use crate::serializer::{ActionData, ResolvedAction, ResolvedTransaction};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use cosigner_primitives::binary::{BinaryError, Pack, Reader, Unpack, Writer};
use cosigner_primitives::crypto::Signature;
use cosigner_primitives::name::{PLACEHOLDER_ACTOR, PLACEHOLDER_PERMISSION};
use cosigner_primitives::transaction::{Action, PermissionLevel, Transaction, TransactionHeader};
use cosigner_primitives::{ChainId, Name};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::Serialize;
use std::io::{Read, Write};
use thiserror::Error;

pub use chains::{alias_for_chain_id, chain_id_for_alias, chain_name};

pub const MIN_VERSION: u8 = 2;
pub const MAX_VERSION: u8 = 3;

/// Upper bound on an inflated request body.
pub const MAX_INFLATED_SIZE: usize = 1 << 20;

const COMPRESSED_FLAG: u8 = 1 << 7;
const SCHEMES: [&str; 3] = ["web+esr:", "esr://", "esr:"];

/// Accepts payloads with or without trailing `=` padding.
const BASE64_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &base64::alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is empty")]
    Empty,
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    #[error("failed to inflate payload: {0}")]
    Inflate(#[source] std::io::Error),
    #[error("inflated payload exceeds {MAX_INFLATED_SIZE} bytes")]
    TooLarge,
    #[error("unknown {kind} variant {index}")]
    UnknownVariant { kind: &'static str, index: u8 },
    #[error("invalid request body: {0}")]
    Body(#[from] BinaryError),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to pack request: {0}")]
    Binary(#[from] BinaryError),
    #[error("failed to deflate request: {0}")]
    Deflate(#[from] std::io::Error),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("unknown chain alias {0}")]
pub struct UnknownChain(pub u8);

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("identity requests carry no transaction")]
    IdentityRequest,
    #[error("no interface resolved for {0}")]
    MissingInterface(Name),
    #[error("cannot decode arguments of {account}::{action}: {source}")]
    Abi {
        account: Name,
        action: Name,
        #[source]
        source: AbiError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ChainIdVariant {
    Alias(u8),
    Id(ChainId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityRequest {
    /// Only present from protocol version 3 on.
    pub scope: Option<Name>,
    pub permission: Option<PermissionLevel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RequestPayload {
    Action(Action),
    Actions(Vec<Action>),
    Transaction(Transaction),
    Identity(IdentityRequest),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RequestFlags(pub u8);

impl RequestFlags {
    pub const BROADCAST: u8 = 1 << 0;
    pub const BACKGROUND: u8 = 1 << 1;

    pub fn broadcast(self) -> bool {
        self.0 & Self::BROADCAST != 0
    }

    pub fn background(self) -> bool {
        self.0 & Self::BACKGROUND != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InfoPair {
    pub key: String,
    #[serde(with = "hex")]
    pub value: Vec<u8>,
}

/// Signature of the party that issued the request, appended after the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestSignature {
    pub signer: Name,
    pub signature: Signature,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SigningRequest {
    pub version: u8,
    pub chain_id: ChainIdVariant,
    pub req: RequestPayload,
    pub flags: RequestFlags,
    pub callback: String,
    pub info: Vec<InfoPair>,
    pub signature: Option<RequestSignature>,
}

/// Parses a signing request in any of its accepted string forms.
pub fn decode(payload: &str) -> Result<SigningRequest, DecodeError> {
    let payload = payload.trim();
    let data = SCHEMES
        .iter()
        .find_map(|scheme| payload.strip_prefix(scheme))
        .unwrap_or(payload);
    let bytes = BASE64_LENIENT.decode(data)?;
    let (&header, body) = bytes.split_first().ok_or(DecodeError::Empty)?;
    let version = header & !COMPRESSED_FLAG;
    if !(MIN_VERSION..=MAX_VERSION).contains(&version) {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let inflated;
    let body = if header & COMPRESSED_FLAG != 0 {
        inflated = inflate(body)?;
        &inflated[..]
    } else {
        body
    };

    let mut reader = Reader::new(body);
    let mut request = SigningRequest::unpack_body(version, &mut reader)?;
    if !reader.is_empty() {
        request.signature = Some(RequestSignature {
            signer: Name::unpack(&mut reader)?,
            signature: Signature::unpack(&mut reader)?,
        });
    }
    reader.finish()?;
    Ok(request)
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut inflated = Vec::new();
    DeflateDecoder::new(data)
        .take(MAX_INFLATED_SIZE as u64 + 1)
        .read_to_end(&mut inflated)
        .map_err(DecodeError::Inflate)?;
    if inflated.len() > MAX_INFLATED_SIZE {
        return Err(DecodeError::TooLarge);
    }
    Ok(inflated)
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

impl SigningRequest {
    /// Renders the request as an `esr:` link. With `compress` set the body is
    /// deflated, unless that would make it longer.
    pub fn encode(&self, compress: bool) -> Result<String, EncodeError> {
        let mut writer = Writer::new();
        self.pack_body(&mut writer)?;
        if let Some(signature) = &self.signature {
            signature.signer.pack(&mut writer)?;
            signature.signature.pack(&mut writer)?;
        }
        let body = writer.into_bytes();

        let mut header = self.version;
        let mut payload = body;
        if compress {
            let deflated = deflate(&payload)?;
            if deflated.len() < payload.len() {
                header |= COMPRESSED_FLAG;
                payload = deflated;
            }
        }
        let mut bytes = Vec::with_capacity(payload.len() + 1);
        bytes.push(header);
        bytes.extend_from_slice(&payload);
        Ok(format!("esr:{}", URL_SAFE_NO_PAD.encode(bytes)))
    }

    /// The chain this request targets, with aliases expanded.
    pub fn extract_chain_id(&self) -> Result<ChainId, UnknownChain> {
        match self.chain_id {
            ChainIdVariant::Id(id) => Ok(id),
            ChainIdVariant::Alias(alias) => chain_id_for_alias(alias).ok_or(UnknownChain(alias)),
        }
    }

    /// Every action the request carries, context-free ones first.
    pub fn actions(&self) -> Vec<&Action> {
        match &self.req {
            RequestPayload::Action(action) => vec![action],
            RequestPayload::Actions(actions) => actions.iter().collect(),
            RequestPayload::Transaction(transaction) => transaction
                .context_free_actions
                .iter()
                .chain(&transaction.actions)
                .collect(),
            RequestPayload::Identity(_) => Vec::new(),
        }
    }

    /// Produces the concrete transaction `signer` is asked to sign.
    ///
    /// The placeholder actor stands for `signer.actor`; in authorizations the
    /// placeholder permission (or the placeholder actor used as a permission)
    /// stands for `signer.permission`. Inside action data every `name` value
    /// is substituted the same way, which needs each action's interface.
    pub fn resolve_placeholders(
        &self,
        signer: &PermissionLevel,
        interfaces: &Interfaces,
    ) -> Result<ResolvedTransaction, ResolveError> {
        let (header, context_free_actions, actions, extensions) = match &self.req {
            RequestPayload::Action(action) => (
                TransactionHeader::default(),
                &[][..],
                std::slice::from_ref(action),
                &[][..],
            ),
            RequestPayload::Actions(actions) => (
                TransactionHeader::default(),
                &[][..],
                &actions[..],
                &[][..],
            ),
            RequestPayload::Transaction(transaction) => (
                transaction.header,
                &transaction.context_free_actions[..],
                &transaction.actions[..],
                &transaction.transaction_extensions[..],
            ),
            RequestPayload::Identity(_) => return Err(ResolveError::IdentityRequest),
        };
        let resolve_all = |actions: &[Action]| {
            actions
                .iter()
                .map(|action| resolve_action(action, signer, interfaces))
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(ResolvedTransaction {
            header,
            context_free_actions: resolve_all(context_free_actions)?,
            actions: resolve_all(actions)?,
            transaction_extensions: extensions.to_vec(),
        })
    }

    fn pack_body(&self, writer: &mut Writer) -> Result<(), BinaryError> {
        match &self.chain_id {
            ChainIdVariant::Alias(alias) => {
                writer.write_u8(0);
                writer.write_u8(*alias);
            }
            ChainIdVariant::Id(id) => {
                writer.write_u8(1);
                writer.write_bytes(id.as_bytes());
            }
        }
        match &self.req {
            RequestPayload::Action(action) => {
                writer.write_u8(0);
                action.pack(writer)?;
            }
            RequestPayload::Actions(actions) => {
                writer.write_u8(1);
                actions.pack(writer)?;
            }
            RequestPayload::Transaction(transaction) => {
                writer.write_u8(2);
                transaction.pack(writer)?;
            }
            RequestPayload::Identity(identity) => {
                writer.write_u8(3);
                if self.version >= 3 {
                    identity.scope.unwrap_or_default().pack(writer)?;
                }
                identity.permission.pack(writer)?;
            }
        }
        writer.write_u8(self.flags.0);
        writer.write_string(&self.callback)?;
        writer.write_varuint32(self.info.len() as u32);
        for pair in &self.info {
            writer.write_string(&pair.key)?;
            writer.write_length_prefixed(&pair.value)?;
        }
        Ok(())
    }

    fn unpack_body(version: u8, reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let chain_id = match reader.read_u8()? {
            0 => ChainIdVariant::Alias(reader.read_u8()?),
            1 => ChainIdVariant::Id(ChainId::from(reader.read_array::<32>()?)),
            index => {
                return Err(DecodeError::UnknownVariant {
                    kind: "chain id",
                    index,
                })
            }
        };
        let req = match reader.read_u8()? {
            0 => RequestPayload::Action(Action::unpack(reader)?),
            1 => RequestPayload::Actions(Vec::unpack(reader)?),
            2 => RequestPayload::Transaction(Transaction::unpack(reader)?),
            3 => {
                let scope = if version >= 3 {
                    Some(Name::unpack(reader)?)
                } else {
                    None
                };
                RequestPayload::Identity(IdentityRequest {
                    scope,
                    permission: Option::unpack(reader)?,
                })
            }
            index => {
                return Err(DecodeError::UnknownVariant {
                    kind: "request",
                    index,
                })
            }
        };
        let flags = RequestFlags(reader.read_u8()?);
        let callback = reader.read_string()?;
        let info_len = reader.read_varuint32()?;
        let mut info = Vec::new();
        for _ in 0..info_len {
            info.push(InfoPair {
                key: reader.read_string()?,
                value: reader.read_length_prefixed()?.to_vec(),
            });
        }
        Ok(SigningRequest {
            version,
            chain_id,
            req,
            flags,
            callback,
            info,
            signature: None,
        })
    }
}

fn resolve_name(name: Name, signer: &PermissionLevel) -> Name {
    match name {
        PLACEHOLDER_ACTOR => signer.actor,
        PLACEHOLDER_PERMISSION => signer.permission,
        other => other,
    }
}

fn resolve_action(
    action: &Action,
    signer: &PermissionLevel,
    interfaces: &Interfaces,
) -> Result<ResolvedAction, ResolveError> {
    let authorization = action
        .authorization
        .iter()
        .map(|level| PermissionLevel {
            actor: if level.actor == PLACEHOLDER_ACTOR {
                signer.actor
            } else {
                level.actor
            },
            permission: if level.permission.is_placeholder() {
                signer.permission
            } else {
                level.permission
            },
        })
        .collect();
    let abi = interfaces
        .get(&action.account)
        .ok_or(ResolveError::MissingInterface(action.account))?;
    let data = abi
        .decode_action(action.name, &action.data, &|name| resolve_name(name, signer))
        .map_err(|source| ResolveError::Abi {
            account: action.account,
            action: action.name,
            source,
        })?;
    Ok(ResolvedAction {
        account: action.account,
        name: action.name,
        authorization,
        data: ActionData::Structured(data),
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn name(s: &str) -> Name {
        s.parse().unwrap()
    }

    pub fn placeholder_level() -> PermissionLevel {
        PermissionLevel {
            actor: PLACEHOLDER_ACTOR,
            permission: PLACEHOLDER_PERMISSION,
        }
    }

    /// Packed `eosio.token::transfer` arguments.
    pub fn transfer_data(from: &str, to: &str, quantity: &str, memo: &str) -> Vec<u8> {
        let mut writer = Writer::new();
        name(from).pack(&mut writer).unwrap();
        name(to).pack(&mut writer).unwrap();
        quantity
            .parse::<cosigner_primitives::asset::Asset>()
            .unwrap()
            .pack(&mut writer)
            .unwrap();
        writer.write_string(memo).unwrap();
        writer.into_bytes()
    }

    /// A request for a cosigner `noop` followed by a token transfer from
    /// `alice`; the noop is authorized by the placeholder signer.
    pub fn cosign_request(chain_id: ChainIdVariant) -> SigningRequest {
        SigningRequest {
            version: 2,
            chain_id,
            req: RequestPayload::Actions(vec![
                Action {
                    account: name("cosigner"),
                    name: name("noop"),
                    authorization: vec![placeholder_level()],
                    data: Vec::new(),
                },
                Action {
                    account: name("eosio.token"),
                    name: name("transfer"),
                    authorization: vec![PermissionLevel {
                        actor: name("alice"),
                        permission: name("active"),
                    }],
                    data: transfer_data("alice", "bob", "1.0000 EOS", "cosigned"),
                },
            ]),
            flags: RequestFlags(RequestFlags::BROADCAST),
            callback: String::new(),
            info: Vec::new(),
            signature: None,
        }
    }
}
