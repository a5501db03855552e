use super::{caller_signature, chain_abis, TestServer};
use crate::abi::testing::token_abi;
use crate::chain::MockTransactionBroadcaster;
use crate::cosign::CombinedTransaction;
use crate::esr::testing::{cosign_request, name, placeholder_level, transfer_data};
use crate::esr::{ChainIdVariant, RequestPayload};
use crate::interfaces::MockAbiProvider;
use crate::serializer::serialize_transaction;
use crate::signer::testing::{cosigner_identity, COSIGNER_PUBLIC_KEY};
use cosigner_primitives::transaction::{Action, PermissionLevel, Transaction};
use cosigner_primitives::{ChainId, TransactionId};
use futures::future::join_all;
use mockall::predicate::eq;
use rstest::rstest;
use serde_json::json;
use std::sync::{Arc, Mutex};

const EOS: ChainIdVariant = ChainIdVariant::Alias(1);

/// Accepts every transaction and keeps what it was handed.
fn recording_broadcaster(
    times: usize,
) -> (MockTransactionBroadcaster, Arc<Mutex<Vec<CombinedTransaction>>>) {
    let pushed = Arc::new(Mutex::new(Vec::new()));
    let recorded = pushed.clone();
    let mut broadcaster = MockTransactionBroadcaster::new();
    broadcaster
        .expect_push_transaction()
        .times(times)
        .returning(move |transaction| {
            let id = transaction.canonical.transaction_id();
            recorded.lock().unwrap().push(transaction);
            Box::pin(async move { Ok(id) })
        });
    (broadcaster, pushed)
}

/// What the cosigner must end up signing for `cosign_request`.
fn expected_transaction() -> Transaction {
    Transaction {
        actions: vec![
            Action {
                account: name("cosigner"),
                name: name("noop"),
                authorization: vec![cosigner_identity().permission()],
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
        ],
        ..Default::default()
    }
}

fn eos_chain_id() -> ChainId {
    "aca376f206b8fc25a6ed44dbdc66547c36c6c33e3a119ffbeaef943642f0e906"
        .parse()
        .unwrap()
}

#[tokio::test]
async fn test_cosigned_transaction_is_broadcast() {
    let (broadcaster, pushed) = recording_broadcaster(1);
    let server = TestServer::start(chain_abis(), broadcaster).await;
    let caller = caller_signature();

    let (status, body) = server
        .cosign(json!({
            "t": cosign_request(EOS).encode(true).unwrap(),
            "sig": caller.to_string(),
            "bn": 123456,
            "a": "alice",
        }))
        .await;

    let expected = serialize_transaction(&expected_transaction()).unwrap();
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["transaction_id"], expected.transaction_id().as_hex());

    let pushed = pushed.lock().unwrap();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].canonical, expected);
    assert_eq!(pushed[0].signatures.len(), 2);
    assert_eq!(pushed[0].signatures[0], caller);
    let digest = expected.signing_digest(&eos_chain_id());
    assert_eq!(
        pushed[0].signatures[1].recover(&digest).unwrap().to_legacy_string().as_deref(),
        Some(COSIGNER_PUBLIC_KEY)
    );
}

#[tokio::test]
async fn test_single_action_request() {
    let mut request = cosign_request(EOS);
    let RequestPayload::Actions(actions) = &request.req else {
        panic!("expected actions");
    };
    request.req = RequestPayload::Action(actions[1].clone());

    let mut provider = MockAbiProvider::new();
    provider
        .expect_get_abi()
        .with(eq(name("eosio.token")))
        .times(1)
        .returning(|_| Box::pin(async { Ok(Some(token_abi())) }));
    let (broadcaster, pushed) = recording_broadcaster(1);
    let server = TestServer::start(provider, broadcaster).await;

    let (status, _) = server
        .cosign(json!({
            "t": request.encode(false).unwrap(),
            "sig": caller_signature().to_string(),
        }))
        .await;
    assert_eq!(status, 200);
    let pushed = pushed.lock().unwrap();
    let transaction = Transaction {
        actions: vec![expected_transaction().actions.remove(1)],
        ..Default::default()
    };
    assert_eq!(
        pushed[0].canonical,
        serialize_transaction(&transaction).unwrap()
    );
}

#[tokio::test]
async fn test_repeated_accounts_are_fetched_once() {
    let mut request = cosign_request(EOS);
    if let RequestPayload::Actions(actions) = &mut request.req {
        let transfer = actions[1].clone();
        actions.push(transfer.clone());
        actions.push(transfer);
    }
    let mut provider = MockAbiProvider::new();
    provider
        .expect_get_abi()
        .with(eq(name("eosio.token")))
        .times(1)
        .returning(|_| Box::pin(async { Ok(Some(token_abi())) }));
    provider
        .expect_get_abi()
        .with(eq(name("cosigner")))
        .times(1)
        .returning(|_| Box::pin(async { Ok(Some(crate::abi::testing::noop_abi())) }));
    let (broadcaster, pushed) = recording_broadcaster(1);
    let server = TestServer::start(provider, broadcaster).await;

    let (status, _) = server
        .cosign(json!({
            "t": request.encode(true).unwrap(),
            "sig": caller_signature().to_string(),
        }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(pushed.lock().unwrap()[0].signatures.len(), 2);
}

#[tokio::test]
async fn test_resubmission_is_deterministic() {
    let (broadcaster, pushed) = recording_broadcaster(2);
    let server = TestServer::start(chain_abis(), broadcaster).await;
    let body = json!({
        "t": cosign_request(EOS).encode(true).unwrap(),
        "sig": caller_signature().to_string(),
    });

    let (_, first) = server.cosign(body.clone()).await;
    let (_, second) = server.cosign(body).await;
    assert_eq!(first, second);
    let pushed = pushed.lock().unwrap();
    assert_eq!(pushed[0], pushed[1]);
}

#[rstest]
#[case::text_plain("text/plain;charset=UTF-8")]
#[case::form("application/x-www-form-urlencoded")]
#[tokio::test]
async fn test_body_is_parsed_whatever_the_content_type(#[case] content_type: &str) {
    let (broadcaster, _) = recording_broadcaster(1);
    let server = TestServer::start(chain_abis(), broadcaster).await;
    let body = json!({
        "t": cosign_request(EOS).encode(true).unwrap(),
        "sig": caller_signature().to_string(),
    });
    let response = reqwest::Client::new()
        .post(&server.url)
        .header("content-type", content_type)
        .body(body.to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    let expected = serialize_transaction(&expected_transaction()).unwrap();
    assert_eq!(body["transaction_id"], expected.transaction_id().as_hex());
}

#[tokio::test]
async fn test_concurrent_requests() {
    let (broadcaster, pushed) = recording_broadcaster(8);
    let server = TestServer::start(chain_abis(), broadcaster).await;
    let requests = (0..8).map(|i| {
        let mut request = cosign_request(EOS);
        if let RequestPayload::Actions(actions) = &mut request.req {
            actions[1].data = transfer_data("alice", "bob", "1.0000 EOS", &format!("memo {i}"));
        }
        server.cosign(json!({
            "t": request.encode(true).unwrap(),
            "sig": caller_signature().to_string(),
        }))
    });
    let responses = join_all(requests).await;
    assert!(responses.iter().all(|(status, _)| *status == 200));
    let mut ids: Vec<TransactionId> = pushed
        .lock()
        .unwrap()
        .iter()
        .map(|transaction| transaction.canonical.transaction_id())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);
}

#[tokio::test]
async fn test_matching_transaction_id_is_accepted() {
    let (broadcaster, _) = recording_broadcaster(1);
    let server = TestServer::start(chain_abis(), broadcaster).await;
    let id = serialize_transaction(&expected_transaction())
        .unwrap()
        .transaction_id();
    let (status, body) = server
        .cosign(json!({
            "t": cosign_request(EOS).encode(true).unwrap(),
            "sig": caller_signature().to_string(),
            "tx": id.as_hex(),
            "bn": "123456",
        }))
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["transaction_id"], id.as_hex());
}

#[tokio::test]
async fn test_placeholder_request_signer() {
    // A request that names the placeholder signer in both actions resolves
    // both to the cosigner.
    let mut request = cosign_request(EOS);
    if let RequestPayload::Actions(actions) = &mut request.req {
        actions[1].authorization = vec![placeholder_level()];
    }
    let (broadcaster, pushed) = recording_broadcaster(1);
    let server = TestServer::start(chain_abis(), broadcaster).await;
    let (status, _) = server
        .cosign(json!({
            "t": request.encode(true).unwrap(),
            "sig": caller_signature().to_string(),
        }))
        .await;
    assert_eq!(status, 200);
    let pushed = pushed.lock().unwrap();
    let mut expected = expected_transaction();
    expected.actions[1].authorization = vec![cosigner_identity().permission()];
    assert_eq!(pushed[0].canonical, serialize_transaction(&expected).unwrap());
}

#[tokio::test]
async fn test_health_and_public_data() {
    let server = TestServer::start(MockAbiProvider::new(), MockTransactionBroadcaster::new()).await;
    let health = server.get("health").await;
    assert_eq!(health.status().as_u16(), 200);
    assert_eq!(health.text().await.unwrap(), "OK");

    let data: serde_json::Value = server.get("public_data").await.json().await.unwrap();
    assert_eq!(data["account"], "cosigner");
    assert_eq!(data["permission"], "cosign");
    assert_eq!(data["legacy_public_key"], COSIGNER_PUBLIC_KEY);
    assert_eq!(
        data["public_key"],
        cosigner_identity().public_key().to_string()
    );
}
