// Transfer Orchestrator - ties the credential exchange to settlement

use crate::client::SettlementClient;
use crate::{PaymentError, Result, Settlement, TransferCredential, TransferRequest};
use proximity::{Credential, CredentialExchangeEngine, ReceiverSession, SenderSession};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

/// A transfer the sender is currently offering over the radio
#[derive(Debug)]
pub struct OutgoingTransfer {
    pub request: TransferRequest,
    pub session: SenderSession,
}

/// Runs the sender and receiver halves of a tap-to-pay transfer
///
/// Transport failures come back as `PaymentError::Exchange`; a server refusal
/// after a successful handshake is always `PaymentError::SettlementRejected`.
pub struct TransferOrchestrator {
    engine: Arc<CredentialExchangeEngine>,
    settlement: Arc<dyn SettlementClient>,
}

impl TransferOrchestrator {
    pub fn new(engine: Arc<CredentialExchangeEngine>, settlement: Arc<dyn SettlementClient>) -> Self {
        Self { engine, settlement }
    }

    pub fn engine(&self) -> &Arc<CredentialExchangeEngine> {
        &self.engine
    }

    /// Create a request, mint its secret and start advertising the credential
    pub async fn start_send(&self, amount: Decimal, currency: &str) -> Result<OutgoingTransfer> {
        if amount <= Decimal::ZERO {
            return Err(PaymentError::InvalidAmount(format!("{} must be positive", amount)));
        }
        let currency = currency.trim();
        if currency.is_empty() {
            return Err(PaymentError::InvalidAmount("currency is required".to_string()));
        }

        let request = self.settlement.create_request(amount, currency).await?;
        let secret = self.settlement.authorize(&request.request_id).await?;
        let credential = TransferCredential::new(request.request_id.clone(), secret)?.to_credential()?;

        let session = self.engine.start_sending(&credential).await?;
        info!(
            request_id = %request.request_id,
            session_id = %session.id(),
            "Offering transfer"
        );

        Ok(OutgoingTransfer { request, session })
    }

    pub async fn stop_send(&self) {
        self.engine.stop_sending().await;
    }

    /// Start looking for a sender; finish with [`TransferOrchestrator::complete`]
    pub async fn start_receive(&self) -> Result<ReceiverSession> {
        Ok(self.engine.start_receiving().await?)
    }

    /// Wait for the receiver session's credential and redeem it
    pub async fn complete(&self, session: ReceiverSession) -> Result<Settlement> {
        let credential = session.wait().await?;
        self.redeem(&credential).await
    }

    /// Receive a credential and redeem it in one call
    pub async fn receive(&self) -> Result<Settlement> {
        let session = self.start_receive().await?;
        self.complete(session).await
    }

    pub async fn cancel_receive(&self) {
        self.engine.cancel_receiving().await;
    }

    /// Approve the transfer a received credential refers to
    pub async fn redeem(&self, credential: &Credential) -> Result<Settlement> {
        let transfer = TransferCredential::parse(credential)?;

        match self.settlement.approve(&transfer).await {
            Ok(settlement) => Ok(settlement),
            Err(e) => {
                if e.is_settlement_rejection() {
                    warn!(request_id = %transfer.request_id, error = %e, "Settlement rejected");
                }
                Err(e)
            }
        }
    }
}
