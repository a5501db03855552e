//! The cosigning pipeline: decode, resolve, serialize, sign, combine and
//! broadcast one signing request.

use crate::chain::{ChainError, TransactionBroadcaster};
use crate::esr::{self, DecodeError, ResolveError, UnknownChain};
use crate::interfaces::{resolve_interfaces, AbiProvider, ResolutionError};
use crate::serializer::{
    serialize_actions, serialize_transaction, CanonicalBytes, SerializationError,
};
use crate::signer::{CosignerIdentity, SignatureProviderArgs};
use cosigner_primitives::crypto::{KeyError, Signature};
use cosigner_primitives::{ChainId, TransactionId};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// How far a request got through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Received,
    Decoded,
    Resolved,
    Serialized,
    Signed,
    Combined,
    Broadcast,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Decoded => "decoded",
            Stage::Resolved => "resolved",
            Stage::Serialized => "serialized",
            Stage::Signed => "signed",
            Stage::Combined => "combined",
            Stage::Broadcast => "broadcast",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedRequest,
    UnknownChain,
    InterfaceUnavailable,
    SerializationError,
    SigningError,
    BroadcastError,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::MalformedRequest => "malformed_request",
            ErrorKind::UnknownChain => "unknown_chain",
            ErrorKind::InterfaceUnavailable => "interface_unavailable",
            ErrorKind::SerializationError => "serialization_error",
            ErrorKind::SigningError => "signing_error",
            ErrorKind::BroadcastError => "broadcast_error",
            ErrorKind::InternalError => "internal_error",
        }
    }

    /// Whether the caller sent something unprocessable, as opposed to the
    /// service or the chain failing.
    pub fn is_client_error(self) -> bool {
        matches!(
            self,
            ErrorKind::MalformedRequest | ErrorKind::UnknownChain | ErrorKind::SerializationError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum CosignError {
    #[error("malformed signing request: {0}")]
    MalformedRequest(#[from] DecodeError),
    #[error("malformed caller signature: {0}")]
    MalformedSignature(#[source] KeyError),
    #[error("malformed transaction id {0:?}")]
    MalformedTransactionId(String),
    #[error("caller reported transaction {reported}, but the request resolves to {computed}")]
    TransactionIdMismatch {
        reported: TransactionId,
        computed: TransactionId,
    },
    #[error("identity requests carry no transaction")]
    NoTransaction,
    #[error(transparent)]
    UnknownChain(#[from] UnknownChain),
    #[error(transparent)]
    InterfaceUnavailable(#[from] ResolutionError),
    #[error("serialization failed: {0}")]
    Serialization(#[from] SerializationError),
    #[error("signing failed: {0}")]
    Signing(#[source] KeyError),
    #[error("broadcast failed: {0}")]
    Broadcast(#[from] ChainError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl CosignError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CosignError::MalformedRequest(_)
            | CosignError::MalformedSignature(_)
            | CosignError::MalformedTransactionId(_)
            | CosignError::TransactionIdMismatch { .. }
            | CosignError::NoTransaction => ErrorKind::MalformedRequest,
            CosignError::UnknownChain(_) => ErrorKind::UnknownChain,
            CosignError::InterfaceUnavailable(_) => ErrorKind::InterfaceUnavailable,
            CosignError::Serialization(_) => ErrorKind::SerializationError,
            CosignError::Signing(_) => ErrorKind::SigningError,
            CosignError::Broadcast(_) => ErrorKind::BroadcastError,
            CosignError::Internal(_) => ErrorKind::InternalError,
        }
    }
}

impl From<ResolveError> for CosignError {
    fn from(error: ResolveError) -> Self {
        match error {
            ResolveError::IdentityRequest => CosignError::NoTransaction,
            ResolveError::MissingInterface(account) => {
                SerializationError::MissingInterface(account).into()
            }
            ResolveError::Abi {
                account,
                action,
                source,
            } => SerializationError::Action {
                account,
                action,
                source,
            }
            .into(),
        }
    }
}

/// A failed request: the last stage it reached and why it stopped.
#[derive(Debug, Error)]
#[error("cosigning failed after the {reached} stage: {error}")]
pub struct PipelineFailure {
    pub reached: Stage,
    #[source]
    pub error: CosignError,
}

/// Canonical bytes with every signature the chain needs, ready to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CombinedTransaction {
    pub canonical: CanonicalBytes,
    pub signatures: Vec<Signature>,
}

/// Signs `canonical` for `chain_id` with the cosigner's key.
///
/// The provider signs for every held key listed as required. Only the
/// cosigner's own public key is listed, even though the transaction also
/// requires the caller's signature, so exactly one signature comes back.
/// Listing the full required signer set here would break that guarantee.
pub fn cosign(
    identity: &CosignerIdentity,
    canonical: &CanonicalBytes,
    chain_id: &ChainId,
) -> Result<Signature, CosignError> {
    let required_keys = [identity.public_key()];
    let signatures = identity
        .provider()
        .sign(SignatureProviderArgs {
            chain_id,
            required_keys: &required_keys,
            serialized_transaction: canonical.as_bytes(),
            context_free_data: None,
        })
        .map_err(CosignError::Signing)?;
    match signatures.as_slice() {
        [signature] => Ok(*signature),
        other => Err(CosignError::Internal(format!(
            "expected one cosigner signature, got {}",
            other.len()
        ))),
    }
}

/// Puts the caller's signature first and the cosigner's second.
///
/// The caller's signature is not checked here. The chain verifies every
/// signature against the declared authorizations when the transaction is
/// pushed, and rejects it if the caller's does not hold.
pub fn combine(
    canonical: CanonicalBytes,
    caller_signature: Signature,
    cosigner_signature: Signature,
) -> CombinedTransaction {
    CombinedTransaction {
        canonical,
        signatures: vec![caller_signature, cosigner_signature],
    }
}

/// One inbound cosigning request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CosignRequest {
    /// The encoded signing request.
    pub payload: String,
    pub caller_signature: String,
    /// Transaction id the caller computed, if it sent one.
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CosignOptions {
    /// Reject requests whose reported transaction id differs from the one
    /// computed locally, before signing.
    pub verify_transaction_id: bool,
}

impl Default for CosignOptions {
    fn default() -> Self {
        Self {
            verify_transaction_id: true,
        }
    }
}

pub struct Cosigner<A, B> {
    identity: Arc<CosignerIdentity>,
    abi_provider: A,
    broadcaster: Arc<B>,
    options: CosignOptions,
}

impl<A, B> Cosigner<A, B>
where
    A: AbiProvider + Sync,
    B: TransactionBroadcaster + Send + Sync + 'static,
{
    pub fn new(
        identity: Arc<CosignerIdentity>,
        abi_provider: A,
        broadcaster: B,
        options: CosignOptions,
    ) -> Self {
        Self {
            identity,
            abi_provider,
            broadcaster: Arc::new(broadcaster),
            options,
        }
    }

    pub fn identity(&self) -> &CosignerIdentity {
        &self.identity
    }

    /// Runs every stage up to and including `Combined`.
    pub async fn prepare(
        &self,
        request: &CosignRequest,
    ) -> Result<CombinedTransaction, PipelineFailure> {
        let mut reached = Stage::Received;
        match self.run_to_combined(request, &mut reached).await {
            Ok(combined) => Ok(combined),
            Err(error) => Err(PipelineFailure { reached, error }),
        }
    }

    /// Runs the whole pipeline and returns the id the chain accepted.
    ///
    /// Once the transaction is signed it is pushed from a separate task, so
    /// dropping this future (for example because the caller disconnected)
    /// does not stop the broadcast.
    pub async fn cosign_and_broadcast(
        &self,
        request: &CosignRequest,
    ) -> Result<TransactionId, PipelineFailure> {
        let combined = self.prepare(request).await?;
        let broadcaster = self.broadcaster.clone();
        let broadcast =
            tokio::spawn(async move { broadcaster.push_transaction(combined).await });
        let failed = |error: CosignError| PipelineFailure {
            reached: Stage::Combined,
            error,
        };
        let transaction_id = broadcast
            .await
            .map_err(|e| failed(CosignError::Internal(format!("broadcast task failed: {e}"))))?
            .map_err(|e| failed(e.into()))?;
        tracing::info!(
            target: "cosigner",
            stage = %Stage::Broadcast,
            %transaction_id,
            "transaction accepted by the chain"
        );
        Ok(transaction_id)
    }

    async fn run_to_combined(
        &self,
        request: &CosignRequest,
        reached: &mut Stage,
    ) -> Result<CombinedTransaction, CosignError> {
        let caller_signature: Signature = request
            .caller_signature
            .parse()
            .map_err(CosignError::MalformedSignature)?;
        let signing_request = esr::decode(&request.payload)?;
        let chain_id = signing_request.extract_chain_id()?;
        *reached = Stage::Decoded;
        tracing::debug!(
            target: "cosigner",
            stage = %reached,
            %chain_id,
            version = signing_request.version,
            "decoded signing request"
        );

        let interfaces =
            resolve_interfaces(&self.abi_provider, signing_request.actions()).await?;
        let transaction =
            signing_request.resolve_placeholders(&self.identity.permission(), &interfaces)?;
        *reached = Stage::Resolved;
        tracing::debug!(
            target: "cosigner",
            stage = %reached,
            accounts = interfaces.len(),
            actions = transaction.actions.len(),
            "resolved interfaces and placeholders"
        );

        let transaction = serialize_actions(transaction, &interfaces)?;
        let canonical = serialize_transaction(&transaction)?;
        let transaction_id = canonical.transaction_id();
        if self.options.verify_transaction_id {
            if let Some(reported) = &request.transaction_id {
                let reported: TransactionId = reported
                    .parse()
                    .map_err(|_| CosignError::MalformedTransactionId(reported.clone()))?;
                if reported != transaction_id {
                    return Err(CosignError::TransactionIdMismatch {
                        reported,
                        computed: transaction_id,
                    });
                }
            }
        }
        *reached = Stage::Serialized;
        tracing::debug!(target: "cosigner", stage = %reached, %transaction_id, "serialized transaction");

        let cosigner_signature = cosign(&self.identity, &canonical, &chain_id)?;
        *reached = Stage::Signed;

        let combined = combine(canonical, caller_signature, cosigner_signature);
        *reached = Stage::Combined;
        tracing::debug!(
            target: "cosigner",
            stage = %reached,
            signatures = combined.signatures.len(),
            "combined signatures"
        );
        Ok(combined)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use cosigner_primitives::crypto::PrivateKey;
    use cosigner_primitives::transaction::Transaction;

    pub fn combined_transaction() -> CombinedTransaction {
        let canonical = serialize_transaction(&Transaction::default()).unwrap();
        let digest = canonical.signing_digest(&ChainId::from([1; 32]));
        let sign = || PrivateKey::random().sign_digest(&digest).unwrap();
        combine(canonical, sign(), sign())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::testing::{noop_abi, token_abi};
    use crate::chain::MockTransactionBroadcaster;
    use crate::esr::testing::{cosign_request, name};
    use crate::esr::ChainIdVariant;
    use crate::interfaces::MockAbiProvider;
    use crate::signer::testing::cosigner_identity;
    use assert_matches::assert_matches;
    use cosigner_primitives::crypto::PrivateKey;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    const EOS: ChainIdVariant = ChainIdVariant::Alias(1);

    fn serving_provider() -> MockAbiProvider {
        let mut provider = MockAbiProvider::new();
        provider.expect_get_abi().returning(|account| {
            let abi = if account == name("eosio.token") {
                Some(token_abi())
            } else if account == name("cosigner") {
                Some(noop_abi())
            } else {
                None
            };
            Box::pin(async move { Ok(abi) })
        });
        provider
    }

    fn request(payload: String) -> CosignRequest {
        CosignRequest {
            payload,
            caller_signature: PrivateKey::random()
                .sign_digest(&cosigner_primitives::SigningDigest::sha256(b"caller"))
                .unwrap()
                .to_string(),
            transaction_id: None,
        }
    }

    fn cosigner<B: TransactionBroadcaster + Send + Sync + 'static>(
        broadcaster: B,
    ) -> Cosigner<MockAbiProvider, B> {
        Cosigner::new(
            Arc::new(cosigner_identity()),
            serving_provider(),
            broadcaster,
            CosignOptions::default(),
        )
    }

    #[test]
    fn test_cosign_signature_verifies() {
        let identity = cosigner_identity();
        let canonical = serialize_transaction(&Default::default()).unwrap();
        let chain_id = ChainId::from([0x42; 32]);
        let signature = cosign(&identity, &canonical, &chain_id).unwrap();
        assert!(signature.is_canonical());
        let digest = canonical.signing_digest(&chain_id);
        assert!(identity.public_key().verify(&digest, &signature).is_ok());
        assert_eq!(signature.recover(&digest).unwrap(), identity.public_key());
        // A different chain id yields a digest this signature does not cover.
        let other = canonical.signing_digest(&ChainId::from([0x43; 32]));
        assert!(identity.public_key().verify(&other, &signature).is_err());
    }

    #[test]
    fn test_combine_orders_caller_first() {
        let combined = testing::combined_transaction();
        let again = combine(
            combined.canonical.clone(),
            combined.signatures[0],
            combined.signatures[1],
        );
        assert_eq!(again, combined);
        assert_eq!(again.signatures.len(), 2);
    }

    #[tokio::test]
    async fn test_prepare_produces_two_signatures() {
        let cosigner = cosigner(MockTransactionBroadcaster::new());
        let request = request(cosign_request(EOS).encode(true).unwrap());
        let combined = cosigner.prepare(&request).await.unwrap();
        assert_eq!(combined.signatures.len(), 2);
        assert_eq!(
            combined.signatures[0].to_string(),
            request.caller_signature
        );
        let chain_id = cosign_request(EOS).extract_chain_id().unwrap();
        let digest = combined.canonical.signing_digest(&chain_id);
        assert_eq!(
            combined.signatures[1].recover(&digest).unwrap(),
            cosigner.identity().public_key()
        );
    }

    #[tokio::test]
    async fn test_reported_transaction_id_is_checked() {
        let cosigner = cosigner(MockTransactionBroadcaster::new());
        let mut request = request(cosign_request(EOS).encode(true).unwrap());
        let expected = cosigner
            .prepare(&request)
            .await
            .unwrap()
            .canonical
            .transaction_id();

        request.transaction_id = Some(expected.as_hex());
        assert!(cosigner.prepare(&request).await.is_ok());

        request.transaction_id = Some(TransactionId::from([0; 32]).as_hex());
        let failure = cosigner.prepare(&request).await.unwrap_err();
        assert_eq!(failure.reached, Stage::Resolved);
        assert_matches!(failure.error, CosignError::TransactionIdMismatch { computed, .. } if computed == expected);
        assert_eq!(failure.error.kind(), ErrorKind::MalformedRequest);

        request.transaction_id = Some("xyz".to_string());
        assert_matches!(
            cosigner.prepare(&request).await.unwrap_err().error,
            CosignError::MalformedTransactionId(_)
        );
    }

    #[tokio::test]
    async fn test_transaction_id_check_can_be_disabled() {
        let cosigner = Cosigner::new(
            Arc::new(cosigner_identity()),
            serving_provider(),
            MockTransactionBroadcaster::new(),
            CosignOptions {
                verify_transaction_id: false,
            },
        );
        let mut request = request(cosign_request(EOS).encode(true).unwrap());
        request.transaction_id = Some(TransactionId::from([0; 32]).as_hex());
        assert!(cosigner.prepare(&request).await.is_ok());
    }

    #[tokio::test]
    async fn test_failures_report_stage_and_kind() {
        let cosigner = cosigner(MockTransactionBroadcaster::new());

        let mut bad_signature = request(cosign_request(EOS).encode(true).unwrap());
        bad_signature.caller_signature = "SIG_K1_nope".to_string();
        let failure = cosigner.prepare(&bad_signature).await.unwrap_err();
        assert_eq!(failure.reached, Stage::Received);
        assert_eq!(failure.error.kind(), ErrorKind::MalformedRequest);

        let unknown_chain = request(
            cosign_request(ChainIdVariant::Alias(0))
                .encode(true)
                .unwrap(),
        );
        let failure = cosigner.prepare(&unknown_chain).await.unwrap_err();
        assert_eq!(failure.reached, Stage::Received);
        assert_eq!(failure.error.kind(), ErrorKind::UnknownChain);

        let mut unknown_account = cosign_request(EOS);
        if let esr::RequestPayload::Actions(actions) = &mut unknown_account.req {
            actions[1].account = name("nobody");
        }
        let failure = cosigner
            .prepare(&request(unknown_account.encode(true).unwrap()))
            .await
            .unwrap_err();
        assert_eq!(failure.reached, Stage::Decoded);
        assert_eq!(failure.error.kind(), ErrorKind::InterfaceUnavailable);
        assert!(!failure.error.kind().is_client_error());
    }

    #[tokio::test]
    async fn test_broadcast_failure_is_reported() {
        let mut broadcaster = MockTransactionBroadcaster::new();
        broadcaster.expect_push_transaction().times(1).returning(|_| {
            Box::pin(async {
                Err(ChainError::InvalidResponse {
                    endpoint: "v1/chain/push_transaction",
                    reason: "boom".to_string(),
                })
            })
        });
        let cosigner = cosigner(broadcaster);
        let failure = cosigner
            .cosign_and_broadcast(&request(cosign_request(EOS).encode(true).unwrap()))
            .await
            .unwrap_err();
        assert_eq!(failure.reached, Stage::Combined);
        assert_eq!(failure.error.kind(), ErrorKind::BroadcastError);
    }

    #[tokio::test]
    async fn test_broadcast_survives_dropped_caller() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let done = Arc::new(AtomicBool::new(false));
        let mut broadcaster = MockTransactionBroadcaster::new();
        {
            let (started, release, done) = (started.clone(), release.clone(), done.clone());
            broadcaster
                .expect_push_transaction()
                .times(1)
                .returning(move |transaction| {
                    let (started, release, done) =
                        (started.clone(), release.clone(), done.clone());
                    Box::pin(async move {
                        started.notify_one();
                        release.notified().await;
                        done.store(true, Ordering::SeqCst);
                        Ok(transaction.canonical.transaction_id())
                    })
                });
        }
        let cosigner = Arc::new(cosigner(broadcaster));
        let request = request(cosign_request(EOS).encode(true).unwrap());
        let caller = tokio::spawn({
            let cosigner = cosigner.clone();
            async move { cosigner.cosign_and_broadcast(&request).await }
        });

        started.notified().await;
        caller.abort();
        release.notify_one();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
