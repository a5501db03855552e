use crate::abi::AbiError;
use crate::interfaces::Interfaces;
use cosigner_primitives::binary::{BinaryError, Pack};
use cosigner_primitives::transaction::{
    signing_digest, Action, PermissionLevel, Transaction, TransactionExtension, TransactionHeader,
};
use cosigner_primitives::{ChainId, Name, SigningDigest, TransactionId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("no interface resolved for {0}")]
    MissingInterface(Name),
    #[error("cannot encode arguments of {account}::{action}: {source}")]
    Action {
        account: Name,
        action: Name,
        #[source]
        source: AbiError,
    },
    #[error(transparent)]
    Binary(#[from] BinaryError),
}

/// Arguments of an action, before or after packing.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionData {
    Structured(serde_json::Value),
    Packed(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAction {
    pub account: Name,
    pub name: Name,
    pub authorization: Vec<PermissionLevel>,
    pub data: ActionData,
}

/// A transaction with every placeholder replaced, in the order received.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTransaction {
    pub header: TransactionHeader,
    pub context_free_actions: Vec<ResolvedAction>,
    pub actions: Vec<ResolvedAction>,
    pub transaction_extensions: Vec<TransactionExtension>,
}

/// The packed form of a transaction; the only bytes that get signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalBytes(Vec<u8>);

impl CanonicalBytes {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn transaction_id(&self) -> TransactionId {
        TransactionId::sha256(&self.0)
    }

    /// This flow never carries context-free data.
    pub fn signing_digest(&self, chain_id: &ChainId) -> SigningDigest {
        signing_digest(chain_id, &self.0, None)
    }
}

/// Packs each action's structured arguments with its account's interface.
/// Already packed arguments pass through untouched.
pub fn serialize_actions(
    transaction: ResolvedTransaction,
    interfaces: &Interfaces,
) -> Result<Transaction, SerializationError> {
    let pack_all = |actions: Vec<ResolvedAction>| {
        actions
            .into_iter()
            .map(|action| serialize_action(action, interfaces))
            .collect::<Result<Vec<_>, _>>()
    };
    Ok(Transaction {
        header: transaction.header,
        context_free_actions: pack_all(transaction.context_free_actions)?,
        actions: pack_all(transaction.actions)?,
        transaction_extensions: transaction.transaction_extensions,
    })
}

fn serialize_action(
    action: ResolvedAction,
    interfaces: &Interfaces,
) -> Result<Action, SerializationError> {
    let data = match action.data {
        ActionData::Packed(data) => data,
        ActionData::Structured(value) => interfaces
            .get(&action.account)
            .ok_or(SerializationError::MissingInterface(action.account))?
            .encode_action(action.name, &value)
            .map_err(|source| SerializationError::Action {
                account: action.account,
                action: action.name,
                source,
            })?,
    };
    Ok(Action {
        account: action.account,
        name: action.name,
        authorization: action.authorization,
        data,
    })
}

pub fn serialize_transaction(transaction: &Transaction) -> Result<CanonicalBytes, SerializationError> {
    Ok(CanonicalBytes(transaction.packed()?))
}
