mod common;

use common::{spawn_server, SettlementServer, TEST_TOKEN};
use payment::{HttpSettlementClient, InMemoryCredentialStore, PaymentError, TransferOrchestrator};
use proximity::{
    Credential, CredentialExchangeEngine, ExchangeConfig, MockTransport, PermissionStatus, ProximityError,
    RadioCapability, SenderState, SessionState, TransportCall, LOOPBACK_PEER,
};
use rust_decimal::Decimal;
use shared::SettlementConfig;
use std::sync::Arc;

async fn orchestrator(transport: &MockTransport, base_url: &str) -> TransferOrchestrator {
    let store = InMemoryCredentialStore::with_token("+33 6 12 34 56 78", TEST_TOKEN).await;
    let config = SettlementConfig {
        base_url: base_url.to_string(),
        request_timeout_secs: 5,
    };
    let client = HttpSettlementClient::new(&config, Arc::new(store)).unwrap();
    let engine = CredentialExchangeEngine::new(Arc::new(transport.clone()), ExchangeConfig::default());

    TransferOrchestrator::new(Arc::new(engine), Arc::new(client))
}

/// Two devices in range of each other, talking to one settlement server
async fn devices() -> (SettlementServer, MockTransport, TransferOrchestrator, TransferOrchestrator) {
    let server = spawn_server().await;
    let radio = MockTransport::new();
    let sender = orchestrator(&radio, &server.base_url).await;
    let receiver = orchestrator(&radio, &server.base_url).await;
    (server, radio, sender, receiver)
}

#[tokio::test]
async fn test_end_to_end_transfer_is_single_use() {
    let (server, radio, sender, receiver) = devices().await;

    let outgoing = sender.start_send(Decimal::new(1250, 2), "EUR").await.unwrap();
    assert_eq!(outgoing.request.request_id, "R1");
    assert_eq!(outgoing.session.state(), SessionState::Sender(SenderState::Advertising));
    assert_eq!(radio.advertised_payload(), Some(b"R1:S1".to_vec()));

    let settlement = receiver.receive().await.unwrap();
    assert_eq!(settlement.request_id, "R1");
    assert!(server.request("R1").unwrap().approved);
    assert_eq!(radio.count_calls(|c| *c == TransportCall::Connect(LOOPBACK_PEER.to_string())), 1);

    // Replaying the same credential is refused by the server, not the radio
    let replay = Credential::new("R1:S1").unwrap();
    let err = receiver.redeem(&replay).await.unwrap_err();
    assert!(err.is_settlement_rejection());
    assert!(!err.is_transport_failure());
    assert_eq!(err.to_string(), "Secret already used (code: SECRET_CONSUMED)");

    sender.stop_send().await;
    assert!(!radio.is_advertising());
}

#[tokio::test]
async fn test_start_then_complete_receive() {
    let (_server, _radio, sender, receiver) = devices().await;

    let session = receiver.start_receive().await.unwrap();
    sender.start_send(Decimal::from(3), "USD").await.unwrap();

    let settlement = receiver.complete(session).await.unwrap();
    assert_eq!(settlement.request_id, "R1");
}

#[tokio::test]
async fn test_invalid_amount_rejected_before_any_call() {
    let (server, radio, sender, _receiver) = devices().await;

    for amount in [Decimal::ZERO, Decimal::from(-4)] {
        let err = sender.start_send(amount, "EUR").await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidAmount(_)));
    }
    assert!(matches!(
        sender.start_send(Decimal::from(1), "  ").await,
        Err(PaymentError::InvalidAmount(_))
    ));

    assert_eq!(server.hits(), 0);
    assert!(radio.calls().is_empty());
}

#[tokio::test]
async fn test_garbled_credential_is_not_sent_for_approval() {
    let (server, _radio, _sender, receiver) = devices().await;

    let err = receiver
        .redeem(&Credential::new("no-separator").unwrap())
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::InvalidCredential(_)));
    assert_eq!(server.hits(), 0);
}

#[tokio::test]
async fn test_sender_without_advertise_permission() {
    let (_server, radio, sender, _receiver) = devices().await;
    radio
        .permissions()
        .set_permission(RadioCapability::Advertise, PermissionStatus::Denied)
        .await;

    let err = sender.start_send(Decimal::from(2), "EUR").await.unwrap_err();
    assert!(matches!(err, PaymentError::Exchange(ProximityError::PermissionDenied(_))));
    assert!(err.is_transport_failure());
    assert!(!radio.is_advertising());
}

#[tokio::test]
async fn test_cancelled_receive_redeems_nothing() {
    let (server, _radio, _sender, receiver) = devices().await;

    let session = receiver.start_receive().await.unwrap();
    receiver.cancel_receive().await;

    let err = receiver.complete(session).await.unwrap_err();
    assert!(matches!(err, PaymentError::Exchange(ProximityError::Cancelled)));
    assert_eq!(server.hits(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_discovery_timeout_is_transport_failure() {
    let radio = MockTransport::new();
    // Never contacted: discovery fails first
    let receiver = orchestrator(&radio, "http://127.0.0.1:9").await;

    let err = receiver.receive().await.unwrap_err();
    assert!(matches!(err, PaymentError::Exchange(ProximityError::DiscoveryTimeout(_))));
    assert!(err.is_transport_failure());
    assert!(!err.is_settlement_rejection());
}
