use crate::chain::TransactionBroadcaster;
use crate::config::WebUIConfig;
use crate::cosign::{CosignRequest, Cosigner, ErrorKind, PipelineFailure};
use crate::interfaces::AbiProvider;
use crate::signer::PublicData;
use crate::tracing::request_span;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{serve, Json, Router};
use cosigner_primitives::TransactionId;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::Instrument;

/// Body of a cosigning request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosignBody {
    /// The encoded signing request.
    pub t: String,
    /// The caller's signature over the transaction.
    pub sig: String,
    /// Transaction id the caller computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx: Option<String>,
    /// Block number the caller resolved the request against; informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bn: Option<BlockNumHint>,
    /// Account the caller signed as; informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub a: Option<String>,
}

/// Wallets send the block number both as a number and as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockNumHint {
    Number(u64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CosignResponse {
    pub transaction_id: TransactionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Last pipeline stage the request reached, if it got that far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub message: String,
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::MalformedRequest | ErrorKind::UnknownChain | ErrorKind::SerializationError => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::InterfaceUnavailable | ErrorKind::BroadcastError => StatusCode::BAD_GATEWAY,
        ErrorKind::SigningError | ErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Anything a cosigning request can fail with, turned into a response.
pub(crate) enum ApiError {
    InvalidBody(serde_json::Error),
    Pipeline(PipelineFailure),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::InvalidBody(error) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: ErrorKind::MalformedRequest.to_string(),
                    stage: None,
                    message: error.to_string(),
                },
            ),
            ApiError::Pipeline(failure) => {
                let kind = failure.error.kind();
                (
                    status_for(kind),
                    ErrorResponse {
                        error: kind.to_string(),
                        stage: Some(failure.reached.to_string()),
                        message: failure.error.to_string(),
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

struct WebServerState<A, B> {
    cosigner: Arc<Cosigner<A, B>>,
    public_data: Arc<PublicData>,
}

impl<A, B> Clone for WebServerState<A, B> {
    fn clone(&self) -> Self {
        Self {
            cosigner: self.cosigner.clone(),
            public_data: self.public_data.clone(),
        }
    }
}

async fn handle_cosign<A, B>(
    State(state): State<WebServerState<A, B>>,
    body: Bytes,
) -> Result<Json<CosignResponse>, ApiError>
where
    A: AbiProvider + Send + Sync + 'static,
    B: TransactionBroadcaster + Send + Sync + 'static,
{
    async move {
        // Wallet callbacks often post JSON as text/plain, so the content
        // type is not checked.
        let body: CosignBody = serde_json::from_slice(&body).map_err(|error| {
            tracing::warn!(target: "cosigner", %error, "rejected request body");
            ApiError::InvalidBody(error)
        })?;
        tracing::info!(
            target: "cosigner",
            caller = body.a.as_deref().unwrap_or("-"),
            block_num = ?body.bn,
            "received cosigning request"
        );
        let request = CosignRequest {
            payload: body.t,
            caller_signature: body.sig,
            transaction_id: body.tx,
        };
        match state.cosigner.cosign_and_broadcast(&request).await {
            Ok(transaction_id) => Ok(Json(CosignResponse { transaction_id })),
            Err(failure) => {
                tracing::warn!(
                    target: "cosigner",
                    reached = %failure.reached,
                    kind = %failure.error.kind(),
                    error = %failure.error,
                    "cosigning request failed"
                );
                Err(ApiError::Pipeline(failure))
            }
        }
    }
    .instrument(request_span())
    .await
}

async fn get_public_data<A, B>(State(state): State<WebServerState<A, B>>) -> Json<PublicData> {
    Json(state.public_data.as_ref().clone())
}

pub fn router<A, B>(cosigner: Arc<Cosigner<A, B>>) -> Router
where
    A: AbiProvider + Send + Sync + 'static,
    B: TransactionBroadcaster + Send + Sync + 'static,
{
    let public_data = Arc::new(cosigner.identity().public_data());
    Router::new()
        .route("/", post(handle_cosign::<A, B>))
        .route("/health", get(|| async { "OK" }))
        .route("/public_data", get(get_public_data::<A, B>))
        .with_state(WebServerState {
            cosigner,
            public_data,
        })
}

/// Starts the web server. This is an async function that returns a future.
/// The function itself will return error if the server cannot be started.
///
/// The returned future is the one that actually serves. It will be
/// long-running, and is typically not expected to return. However, dropping
/// the returned future will stop the web server.
pub async fn start_web_server<A, B>(
    config: WebUIConfig,
    cosigner: Arc<Cosigner<A, B>>,
) -> anyhow::Result<BoxFuture<'static, anyhow::Result<()>>>
where
    A: AbiProvider + Send + Sync + 'static,
    B: TransactionBroadcaster + Send + Sync + 'static,
{
    use futures::FutureExt;

    let router = router(cosigner);
    let tcp_listener = TcpListener::bind(&format!("{}:{}", config.host, config.port)).await?;
    tracing::info!(
        target: "cosigner",
        address = %tcp_listener.local_addr()?,
        "listening for cosigning requests"
    );
    Ok(async move {
        serve(tcp_listener, router).await?;
        anyhow::Ok(())
    }
    .boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(ErrorKind::MalformedRequest, StatusCode::BAD_REQUEST)]
    #[case(ErrorKind::UnknownChain, StatusCode::BAD_REQUEST)]
    #[case(ErrorKind::SerializationError, StatusCode::BAD_REQUEST)]
    #[case(ErrorKind::InterfaceUnavailable, StatusCode::BAD_GATEWAY)]
    #[case(ErrorKind::BroadcastError, StatusCode::BAD_GATEWAY)]
    #[case(ErrorKind::SigningError, StatusCode::INTERNAL_SERVER_ERROR)]
    #[case(ErrorKind::InternalError, StatusCode::INTERNAL_SERVER_ERROR)]
    fn test_status_for_kind(#[case] kind: ErrorKind, #[case] status: StatusCode) {
        assert_eq!(status_for(kind), status);
        assert_eq!(kind.is_client_error(), status.is_client_error());
    }

    #[rstest]
    #[case(json!(12345), Some(BlockNumHint::Number(12345)))]
    #[case(json!("12345"), Some(BlockNumHint::Text("12345".to_string())))]
    #[case(json!(null), None)]
    fn test_block_num_hint(#[case] bn: serde_json::Value, #[case] expected: Option<BlockNumHint>) {
        let body: CosignBody =
            serde_json::from_value(json!({ "t": "esr:AA", "sig": "SIG_K1_x", "bn": bn })).unwrap();
        assert_eq!(body.bn, expected);
        assert_eq!(body.tx, None);
    }

    #[test]
    fn test_body_requires_payload_and_signature() {
        assert!(serde_json::from_value::<CosignBody>(json!({ "t": "esr:AA" })).is_err());
        assert!(serde_json::from_value::<CosignBody>(json!({ "sig": "SIG_K1_x" })).is_err());
    }
}
