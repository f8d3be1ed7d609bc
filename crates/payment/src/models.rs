// Tap-to-pay models and their wire shapes

use crate::{PaymentError, Result};
use proximity::Credential;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Separates request id and secret inside a transfer credential
pub const CREDENTIAL_SEPARATOR: char = ':';

/// A pending transfer created by the sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub request_id: String,
    pub amount: Decimal,
    pub currency: String,
}

/// One-time secret bound to a request id
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AuthorizationSecret(String);

impl AuthorizationSecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AuthorizationSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AuthorizationSecret(<redacted>)")
    }
}

/// The {requestId, secret} pair carried over the radio as `"<requestId>:<secret>"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCredential {
    pub request_id: String,
    pub secret: AuthorizationSecret,
}

impl TransferCredential {
    /// Build a credential, refusing ids that would not split back unambiguously
    pub fn new(request_id: impl Into<String>, secret: AuthorizationSecret) -> Result<Self> {
        let request_id = request_id.into();
        if request_id.is_empty() {
            return Err(PaymentError::InvalidCredential("request id is empty".to_string()));
        }
        if request_id.contains(CREDENTIAL_SEPARATOR) {
            return Err(PaymentError::InvalidCredential(format!(
                "request id must not contain '{}'",
                CREDENTIAL_SEPARATOR
            )));
        }
        if secret.expose().is_empty() {
            return Err(PaymentError::InvalidCredential("secret is empty".to_string()));
        }

        Ok(Self { request_id, secret })
    }

    pub fn to_credential(&self) -> Result<Credential> {
        let value = format!("{}{}{}", self.request_id, CREDENTIAL_SEPARATOR, self.secret.expose());
        Ok(Credential::new(value)?)
    }

    /// Split at the first separator; the secret may itself contain separators
    pub fn parse(credential: &Credential) -> Result<Self> {
        let (request_id, secret) = credential
            .as_str()
            .split_once(CREDENTIAL_SEPARATOR)
            .ok_or_else(|| PaymentError::InvalidCredential("missing separator".to_string()))?;

        Self::new(request_id, AuthorizationSecret::new(secret))
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateRequestBody<'a> {
    pub amount: Decimal,
    pub currency: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateRequestResponse {
    pub request_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuthorizeBody<'a> {
    pub request_id: &'a str,
}

#[derive(Deserialize)]
pub(crate) struct AuthorizeResponse {
    pub secret: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApproveBody<'a> {
    pub request_id: &'a str,
    pub secret: &'a str,
}

/// Error body returned by the settlement service
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    pub message: Option<String>,
    pub code: Option<String>,
}

/// Settlement outcome of an approved request
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub request_id: String,
    /// Response body as returned by the server; may be null
    pub body: serde_json::Value,
}
