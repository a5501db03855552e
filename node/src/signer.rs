use cosigner_primitives::crypto::{KeyError, PrivateKey, PublicKey, Signature};
use cosigner_primitives::transaction::{signing_digest, PermissionLevel};
use cosigner_primitives::ChainId;
use serde::Serialize;
use std::collections::BTreeMap;

/// What a signature provider is asked to sign.
pub struct SignatureProviderArgs<'a> {
    pub chain_id: &'a ChainId,
    /// Keys whose signatures are wanted; keys the provider does not hold are
    /// skipped.
    pub required_keys: &'a [PublicKey],
    pub serialized_transaction: &'a [u8],
    pub context_free_data: Option<&'a [u8]>,
}

/// Signs with every held key that appears among the required keys.
pub struct KeySignatureProvider {
    keys: BTreeMap<PublicKey, PrivateKey>,
}

impl KeySignatureProvider {
    pub fn new(keys: impl IntoIterator<Item = PrivateKey>) -> Self {
        Self {
            keys: keys.into_iter().map(|key| (key.public_key(), key)).collect(),
        }
    }

    pub fn available_keys(&self) -> Vec<PublicKey> {
        self.keys.keys().copied().collect()
    }

    pub fn sign(&self, args: SignatureProviderArgs<'_>) -> Result<Vec<Signature>, KeyError> {
        let digest = signing_digest(
            args.chain_id,
            args.serialized_transaction,
            args.context_free_data,
        );
        args.required_keys
            .iter()
            .filter_map(|public_key| self.keys.get(public_key))
            .map(|key| key.sign_digest(&digest))
            .collect()
    }
}

/// The account, permission and key this service signs with. Built once at
/// start-up and shared read-only by every request.
pub struct CosignerIdentity {
    permission: PermissionLevel,
    public_key: PublicKey,
    provider: KeySignatureProvider,
}

impl CosignerIdentity {
    pub fn new(permission: PermissionLevel, key: PrivateKey) -> Self {
        Self {
            permission,
            public_key: key.public_key(),
            provider: KeySignatureProvider::new([key]),
        }
    }

    pub fn permission(&self) -> PermissionLevel {
        self.permission
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    pub fn provider(&self) -> &KeySignatureProvider {
        &self.provider
    }

    pub fn public_data(&self) -> PublicData {
        PublicData {
            account: self.permission.actor.to_string(),
            permission: self.permission.permission.to_string(),
            public_key: self.public_key,
            legacy_public_key: self.public_key.to_legacy_string(),
        }
    }
}

/// What the service discloses about its identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicData {
    pub account: String,
    pub permission: String,
    pub public_key: PublicKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legacy_public_key: Option<String>,
}
