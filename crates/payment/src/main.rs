use anyhow::{Context, Result};
use payment::{CredentialStore, HttpSettlementClient, InMemoryCredentialStore, SessionToken, TransferOrchestrator};
use proximity::{BleTransport, CredentialExchangeEngine, ExchangeConfig, PermissionManager};
use shared::config::Config;
use std::sync::Arc;

/// Receive one tap-to-pay transfer over Bluetooth and approve it
#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    shared::logging::init(config.log_format);

    tracing::info!("Starting tap-to-pay receiver");

    let account = std::env::var("TILTPAY_ACCOUNT").context("TILTPAY_ACCOUNT must be set")?;
    let token = std::env::var("TILTPAY_SESSION_TOKEN").context("TILTPAY_SESSION_TOKEN must be set")?;
    let store = InMemoryCredentialStore::new();
    store.set_token(&account, SessionToken::new(token)).await?;

    let transport = Arc::new(BleTransport::new(PermissionManager::new()));
    let engine = Arc::new(CredentialExchangeEngine::new(
        transport,
        ExchangeConfig::from(&config.proximity),
    ));
    let client = HttpSettlementClient::new(&config.settlement, Arc::new(store))?;
    let orchestrator = TransferOrchestrator::new(engine, Arc::new(client));

    let session = orchestrator.start_receive().await?;
    tracing::info!(session_id = %session.id(), "Waiting for a nearby sender");

    let outcome = tokio::select! {
        outcome = orchestrator.complete(session) => Some(outcome),
        _ = tokio::signal::ctrl_c() => None,
    };

    let result = match outcome {
        Some(Ok(settlement)) => {
            tracing::info!(request_id = %settlement.request_id, "Transfer approved");
            println!("{}", settlement.body);
            Ok(())
        }
        Some(Err(e)) => {
            tracing::error!(error = %e, "Transfer failed");
            eprintln!("{}", e.user_message());
            Err(e.into())
        }
        None => {
            tracing::info!("Interrupted, cancelling");
            orchestrator.cancel_receive().await;
            Ok(())
        }
    };

    orchestrator.engine().shutdown().await;
    result
}
