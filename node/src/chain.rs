//! HTTP client for a chain node's `/v1/chain` API.

use crate::abi::AbiDef;
use crate::config::ChainConfig;
use crate::cosign::CombinedTransaction;
use crate::interfaces::AbiProvider;
use cosigner_primitives::crypto::Signature;
use cosigner_primitives::{Name, TransactionId};
#[cfg(test)]
use mockall::automock;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

const GET_ABI: &str = "v1/chain/get_abi";
const PUSH_TRANSACTION: &str = "v1/chain/push_transaction";

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} rejected the request with status {status}: {error}")]
    Rejected {
        endpoint: &'static str,
        status: u16,
        error: NodeError,
    },
    #[error("unexpected response from {endpoint}: {reason}")]
    InvalidResponse {
        endpoint: &'static str,
        reason: String,
    },
}

/// Error body returned by the chain node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeError {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error: Option<NodeErrorDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeErrorDetail {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub what: String,
    #[serde(default)]
    pub details: Vec<NodeErrorMessage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeErrorMessage {
    pub message: String,
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(detail) => {
                write!(f, "{} ({}): {}", detail.name, detail.code, detail.what)?;
                for message in &detail.details {
                    write!(f, "; {}", message.message)?;
                }
                Ok(())
            }
            None => f.write_str(&self.message),
        }
    }
}

/// Submits fully signed transactions to the chain.
#[cfg_attr(test, automock)]
pub trait TransactionBroadcaster {
    fn push_transaction(
        &self,
        transaction: CombinedTransaction,
    ) -> impl Future<Output = Result<TransactionId, ChainError>> + Send;
}

#[derive(Debug, Serialize)]
struct GetAbiRequest {
    account_name: Name,
}

#[derive(Debug, Deserialize)]
struct GetAbiResponse {
    #[serde(default)]
    abi: Option<AbiDef>,
}

#[derive(Debug, Serialize)]
struct PushTransactionRequest<'a> {
    signatures: &'a [Signature],
    compression: &'static str,
    packed_context_free_data: &'static str,
    packed_trx: String,
}

#[derive(Debug, Deserialize)]
struct PushTransactionResponse {
    transaction_id: TransactionId,
}

/// Stateless, so one instance is shared by all requests.
#[derive(Clone)]
pub struct ChainRpcClient {
    client: Client,
    base_url: Url,
}

impl ChainRpcClient {
    pub fn new(config: &ChainConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_sec))
            .build()?;
        let mut base_url = Url::parse(&config.api_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self { client, base_url })
    }

    async fn call<Req, Resp>(&self, endpoint: &'static str, body: &Req) -> Result<Resp, ChainError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = self
            .base_url
            .join(endpoint)
            .map_err(|e| ChainError::InvalidResponse {
                endpoint,
                reason: e.to_string(),
            })?;
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|source| ChainError::Transport { endpoint, source })?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|source| ChainError::Transport { endpoint, source })?;
        if !status.is_success() {
            let error = serde_json::from_slice(&bytes).unwrap_or_else(|_| NodeError {
                code: status.as_u16(),
                message: String::from_utf8_lossy(&bytes).into_owned(),
                error: None,
            });
            return Err(ChainError::Rejected {
                endpoint,
                status: status.as_u16(),
                error,
            });
        }
        serde_json::from_slice(&bytes).map_err(|e| ChainError::InvalidResponse {
            endpoint,
            reason: e.to_string(),
        })
    }
}

impl AbiProvider for ChainRpcClient {
    async fn get_abi(&self, account: Name) -> Result<Option<AbiDef>, ChainError> {
        let response: GetAbiResponse = self
            .call(GET_ABI, &GetAbiRequest {
                account_name: account,
            })
            .await?;
        Ok(response.abi)
    }
}

impl TransactionBroadcaster for ChainRpcClient {
    async fn push_transaction(
        &self,
        transaction: CombinedTransaction,
    ) -> Result<TransactionId, ChainError> {
        let request = PushTransactionRequest {
            signatures: &transaction.signatures,
            compression: "none",
            packed_context_free_data: "",
            packed_trx: hex::encode(transaction.canonical.as_bytes()),
        };
        let response: PushTransactionResponse = self.call(PUSH_TRANSACTION, &request).await?;
        Ok(response.transaction_id)
    }
}
