mod common;

use common::{spawn_server, TEST_TOKEN};
use payment::{
    AuthorizationSecret, HttpSettlementClient, InMemoryCredentialStore, PaymentError, SettlementClient,
    SettlementOperation, TransferCredential,
};
use rust_decimal::Decimal;
use shared::SettlementConfig;
use std::sync::Arc;

fn config(base_url: &str) -> SettlementConfig {
    SettlementConfig {
        base_url: base_url.to_string(),
        request_timeout_secs: 5,
    }
}

async fn signed_in_client(base_url: &str) -> HttpSettlementClient {
    let store = InMemoryCredentialStore::with_token("+33 6 12 34 56 78", TEST_TOKEN).await;
    HttpSettlementClient::new(&config(base_url), Arc::new(store)).unwrap()
}

#[tokio::test]
async fn test_request_authorize_approve() {
    let server = spawn_server().await;
    let client = signed_in_client(&server.base_url).await;

    let request = client.create_request(Decimal::new(1250, 2), "EUR").await.unwrap();
    assert_eq!(request.request_id, "R1");
    assert_eq!(request.currency, "EUR");

    let recorded = server.request("R1").unwrap();
    assert_eq!(recorded.amount, 12.5);
    assert_eq!(recorded.currency, "EUR");

    let secret = client.authorize(&request.request_id).await.unwrap();
    assert_eq!(secret.expose(), "S1");

    let credential = TransferCredential::new(request.request_id, secret).unwrap();
    let settlement = client.approve(&credential).await.unwrap();
    assert_eq!(settlement.request_id, "R1");
    assert_eq!(settlement.body["status"], "APPROVED");
    assert!(server.request("R1").unwrap().approved);
}

#[tokio::test]
async fn test_second_approve_is_rejected() {
    let server = spawn_server().await;
    let client = signed_in_client(&server.base_url).await;

    let request = client.create_request(Decimal::from(5), "USD").await.unwrap();
    let secret = client.authorize(&request.request_id).await.unwrap();
    let credential = TransferCredential::new(request.request_id, secret).unwrap();

    client.approve(&credential).await.unwrap();
    let err = client.approve(&credential).await.unwrap_err();

    match &err {
        PaymentError::SettlementRejected {
            operation,
            status,
            code,
            message,
        } => {
            assert_eq!(*operation, SettlementOperation::Approve);
            assert_eq!(*status, 409);
            assert_eq!(code, "SECRET_CONSUMED");
            assert_eq!(message, "Secret already used");
        }
        other => panic!("expected settlement rejection, got {:?}", other),
    }
    assert_eq!(err.to_string(), "Secret already used (code: SECRET_CONSUMED)");
    assert!(!err.is_transport_failure());
}

#[tokio::test]
async fn test_wrong_secret_is_rejected() {
    let server = spawn_server().await;
    let client = signed_in_client(&server.base_url).await;

    let request = client.create_request(Decimal::from(5), "USD").await.unwrap();
    client.authorize(&request.request_id).await.unwrap();

    let forged = TransferCredential::new(request.request_id, AuthorizationSecret::new("guess")).unwrap();
    let err = client.approve(&forged).await.unwrap_err();
    assert!(matches!(err, PaymentError::SettlementRejected { status: 403, .. }));
}

#[tokio::test]
async fn test_missing_token_never_hits_the_wire() {
    let server = spawn_server().await;
    let client =
        HttpSettlementClient::new(&config(&server.base_url), Arc::new(InMemoryCredentialStore::new())).unwrap();

    let err = client.create_request(Decimal::from(5), "EUR").await.unwrap_err();
    assert!(matches!(err, PaymentError::MissingToken));
    assert_eq!(server.hits(), 0);
}

#[tokio::test]
async fn test_wrong_token_is_rejected() {
    let server = spawn_server().await;
    let store = InMemoryCredentialStore::with_token("+1 555 0100", "stale-token").await;
    let client = HttpSettlementClient::new(&config(&server.base_url), Arc::new(store)).unwrap();

    let err = client.create_request(Decimal::from(5), "EUR").await.unwrap_err();
    assert!(matches!(
        err,
        PaymentError::SettlementRejected { status: 401, ref code, .. } if code == "UNAUTHORIZED"
    ));
}

#[tokio::test]
async fn test_unknown_request_cannot_be_authorized() {
    let server = spawn_server().await;
    let client = signed_in_client(&server.base_url).await;

    let err = client.authorize("R404").await.unwrap_err();
    assert!(matches!(
        err,
        PaymentError::SettlementRejected {
            operation: SettlementOperation::Authorize,
            status: 404,
            ..
        }
    ));
}

#[tokio::test]
async fn test_plain_text_error_falls_back_to_status_code() {
    let server = spawn_server().await;
    server.set_maintenance(true);
    let client = signed_in_client(&server.base_url).await;

    let err = client.create_request(Decimal::from(5), "EUR").await.unwrap_err();
    match err {
        PaymentError::SettlementRejected { code, message, .. } => {
            assert_eq!(code, "HTTP_503");
            assert_eq!(message, "maintenance");
        }
        other => panic!("expected settlement rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_broken_response_body_is_http_error() {
    let server = spawn_server().await;
    server.set_truncate_bodies(true);
    let client = signed_in_client(&server.base_url).await;

    let err = client.create_request(Decimal::from(5), "EUR").await.unwrap_err();
    assert!(matches!(err, PaymentError::Http(_)), "got {:?}", err);
    assert!(!err.is_settlement_rejection());
}

#[tokio::test]
async fn test_unreachable_server_is_http_error() {
    // Nothing listens on the discard port
    let client = signed_in_client("http://127.0.0.1:9").await;

    let err = client.create_request(Decimal::from(5), "EUR").await.unwrap_err();
    assert!(matches!(err, PaymentError::Http(_)));
}

#[tokio::test]
async fn test_trailing_slash_in_base_url() {
    let server = spawn_server().await;
    let client = signed_in_client(&format!("{}/", server.base_url)).await;

    assert_eq!(client.base_url(), server.base_url);
    client.create_request(Decimal::from(1), "EUR").await.unwrap();
}
