//! The chain's transaction structure and its canonical byte layout.

use crate::binary::{pack_bytes, unpack_bytes, BinaryError, Pack, Reader, Unpack, Writer};
use crate::hash::{ChainId, SigningDigest, TransactionId};
use crate::name::Name;
use k256::sha2::{Digest, Sha256};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermissionLevel {
    pub actor: Name,
    pub permission: Name,
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.actor, self.permission)
    }
}

/// An action whose argument data is already packed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub account: Name,
    pub name: Name,
    pub authorization: Vec<PermissionLevel>,
    #[serde(with = "hex")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHeader {
    /// Seconds since the Unix epoch.
    pub expiration: u32,
    pub ref_block_num: u16,
    pub ref_block_prefix: u32,
    pub max_net_usage_words: u32,
    pub max_cpu_usage_ms: u8,
    pub delay_sec: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionExtension {
    pub extension_type: u16,
    #[serde(with = "hex")]
    pub data: Vec<u8>,
}

/// A transaction ready for signing: every action's data is packed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(flatten)]
    pub header: TransactionHeader,
    pub context_free_actions: Vec<Action>,
    pub actions: Vec<Action>,
    pub transaction_extensions: Vec<TransactionExtension>,
}

/// Digest every transaction signature commits to:
/// `sha256(chain_id || packed_trx || context_free_data_digest)`.
///
/// `context_free_data` is `None` when the transaction carries none, in which
/// case 32 zero bytes stand in for its digest.
pub fn signing_digest(
    chain_id: &ChainId,
    packed_trx: &[u8],
    context_free_data: Option<&[u8]>,
) -> SigningDigest {
    let cfd_digest: [u8; 32] = match context_free_data {
        Some(data) => *TransactionId::sha256(data).as_bytes(),
        None => [0u8; 32],
    };
    let mut hasher = Sha256::new();
    hasher.update(chain_id.as_bytes());
    hasher.update(packed_trx);
    hasher.update(cfd_digest);
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    SigningDigest::from(bytes)
}

impl Pack for PermissionLevel {
    fn pack(&self, writer: &mut Writer) -> Result<(), BinaryError> {
        self.actor.pack(writer)?;
        self.permission.pack(writer)
    }
}

impl Unpack for PermissionLevel {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, BinaryError> {
        Ok(PermissionLevel {
            actor: Name::unpack(reader)?,
            permission: Name::unpack(reader)?,
        })
    }
}

impl Pack for Action {
    fn pack(&self, writer: &mut Writer) -> Result<(), BinaryError> {
        self.account.pack(writer)?;
        self.name.pack(writer)?;
        self.authorization.pack(writer)?;
        pack_bytes(&self.data, writer)
    }
}

impl Unpack for Action {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, BinaryError> {
        Ok(Action {
            account: Name::unpack(reader)?,
            name: Name::unpack(reader)?,
            authorization: Vec::unpack(reader)?,
            data: unpack_bytes(reader)?,
        })
    }
}

impl Pack for TransactionHeader {
    fn pack(&self, writer: &mut Writer) -> Result<(), BinaryError> {
        writer.write_u32(self.expiration);
        writer.write_u16(self.ref_block_num);
        writer.write_u32(self.ref_block_prefix);
        writer.write_varuint32(self.max_net_usage_words);
        writer.write_u8(self.max_cpu_usage_ms);
        writer.write_varuint32(self.delay_sec);
        Ok(())
    }
}

impl Unpack for TransactionHeader {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, BinaryError> {
        Ok(TransactionHeader {
            expiration: reader.read_u32()?,
            ref_block_num: reader.read_u16()?,
            ref_block_prefix: reader.read_u32()?,
            max_net_usage_words: reader.read_varuint32()?,
            max_cpu_usage_ms: reader.read_u8()?,
            delay_sec: reader.read_varuint32()?,
        })
    }
}

impl Pack for TransactionExtension {
    fn pack(&self, writer: &mut Writer) -> Result<(), BinaryError> {
        writer.write_u16(self.extension_type);
        pack_bytes(&self.data, writer)
    }
}

impl Unpack for TransactionExtension {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, BinaryError> {
        Ok(TransactionExtension {
            extension_type: reader.read_u16()?,
            data: unpack_bytes(reader)?,
        })
    }
}

impl Pack for Transaction {
    fn pack(&self, writer: &mut Writer) -> Result<(), BinaryError> {
        self.header.pack(writer)?;
        self.context_free_actions.pack(writer)?;
        self.actions.pack(writer)?;
        self.transaction_extensions.pack(writer)
    }
}

impl Unpack for Transaction {
    fn unpack(reader: &mut Reader<'_>) -> Result<Self, BinaryError> {
        Ok(Transaction {
            header: TransactionHeader::unpack(reader)?,
            context_free_actions: Vec::unpack(reader)?,
            actions: Vec::unpack(reader)?,
            transaction_extensions: Vec::unpack(reader)?,
        })
    }
}
