// Settlement Client - the three tap-to-pay endpoints

use crate::models::{
    ApproveBody, AuthorizeBody, AuthorizeResponse, CreateRequestBody, CreateRequestResponse, ErrorBody,
    Settlement,
};
use crate::store::CredentialStore;
use crate::{
    AuthorizationSecret, PaymentError, Result, SettlementOperation, TransferCredential, TransferRequest,
};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::SettlementConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Server side of a transfer: request creation, secret issuance, approval
#[async_trait]
pub trait SettlementClient: Send + Sync {
    async fn create_request(&self, amount: Decimal, currency: &str) -> Result<TransferRequest>;

    /// Mint the one-time secret for a request
    async fn authorize(&self, request_id: &str) -> Result<AuthorizationSecret>;

    /// Redeem a credential; the server rejects a secret that was already used
    async fn approve(&self, credential: &TransferCredential) -> Result<Settlement>;
}

/// Bearer-authenticated HTTP settlement client
pub struct HttpSettlementClient {
    client: Client,
    base_url: String,
    store: Arc<dyn CredentialStore>,
}

impl HttpSettlementClient {
    pub fn new(config: &SettlementConfig, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PaymentError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            store,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B, T>(&self, operation: SettlementOperation, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        // No token, no request
        let token = self.store.token(None).await?.ok_or(PaymentError::MissingToken)?;

        let url = format!("{}{}", self.base_url, operation.path());
        debug!(%operation, %url, "Sending settlement request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(token.expose())
            .json(body)
            .send()
            .await
            .map_err(|e| PaymentError::Http(format!("Failed to send {} request: {}", operation, e)))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| PaymentError::Http(format!("Failed to read {} response: {}", operation, e)))?;

        if !status.is_success() {
            let parsed: ErrorBody = serde_json::from_str(&raw).unwrap_or_default();
            let message = parsed
                .message
                .or_else(|| (!raw.trim().is_empty()).then(|| raw.clone()))
                .or_else(|| status.canonical_reason().map(str::to_string))
                .unwrap_or_else(|| "Request failed".to_string());
            let code = parsed.code.unwrap_or_else(|| format!("HTTP_{}", status.as_u16()));

            warn!(%operation, status = status.as_u16(), %code, "Settlement request rejected");
            return Err(PaymentError::SettlementRejected {
                operation,
                status: status.as_u16(),
                code,
                message,
            });
        }

        let value = if raw.trim().is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_str(&raw).unwrap_or_else(|_| serde_json::json!({ "message": raw }))
        };

        serde_json::from_value(value).map_err(|e| {
            PaymentError::InvalidResponse(format!("Failed to parse {} response: {}", operation, e))
        })
    }
}

#[async_trait]
impl SettlementClient for HttpSettlementClient {
    async fn create_request(&self, amount: Decimal, currency: &str) -> Result<TransferRequest> {
        let response: CreateRequestResponse = self
            .post(
                SettlementOperation::CreateRequest,
                &CreateRequestBody { amount, currency },
            )
            .await?;

        info!(request_id = %response.request_id, %amount, currency, "Transfer request created");
        Ok(TransferRequest {
            request_id: response.request_id,
            amount,
            currency: currency.to_string(),
        })
    }

    async fn authorize(&self, request_id: &str) -> Result<AuthorizationSecret> {
        let response: AuthorizeResponse = self
            .post(SettlementOperation::Authorize, &AuthorizeBody { request_id })
            .await?;

        debug!(request_id, "Authorization secret issued");
        Ok(AuthorizationSecret::new(response.secret))
    }

    async fn approve(&self, credential: &TransferCredential) -> Result<Settlement> {
        let body: serde_json::Value = self
            .post(
                SettlementOperation::Approve,
                &ApproveBody {
                    request_id: &credential.request_id,
                    secret: credential.secret.expose(),
                },
            )
            .await?;

        info!(request_id = %credential.request_id, "Transfer approved");
        Ok(Settlement {
            request_id: credential.request_id.clone(),
            body,
        })
    }
}
