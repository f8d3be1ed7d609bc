use proximity::ProximityError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaymentError {
    /// The settlement service answered with a non-2xx status
    #[error("{message} (code: {code})")]
    SettlementRejected {
        operation: SettlementOperation,
        status: u16,
        code: String,
        message: String,
    },

    #[error("No session token stored for the current account")]
    MissingToken,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid settlement response: {0}")]
    InvalidResponse(String),

    #[error("Invalid transfer credential: {0}")]
    InvalidCredential(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error(transparent)]
    Exchange(#[from] ProximityError),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, PaymentError>;

/// The settlement endpoint a failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOperation {
    CreateRequest,
    Authorize,
    Approve,
}

impl SettlementOperation {
    pub fn path(&self) -> &'static str {
        match self {
            SettlementOperation::CreateRequest => "/wallet/tap-to-pay/request",
            SettlementOperation::Authorize => "/wallet/tap-to-pay/authorize",
            SettlementOperation::Approve => "/wallet/tap-to-pay/approve",
        }
    }
}

impl std::fmt::Display for SettlementOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettlementOperation::CreateRequest => write!(f, "create_request"),
            SettlementOperation::Authorize => write!(f, "authorize"),
            SettlementOperation::Approve => write!(f, "approve"),
        }
    }
}

impl PaymentError {
    /// True when the radio handshake itself failed, as opposed to settlement
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, PaymentError::Exchange(_))
    }

    /// True when money did not move because the server refused the request
    pub fn is_settlement_rejection(&self) -> bool {
        matches!(self, PaymentError::SettlementRejected { .. })
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::SettlementRejected { message, code, .. } => {
                format!("{} (code: {})", message, code)
            }
            PaymentError::MissingToken => "Your session has expired. Please sign in again.".to_string(),
            PaymentError::Http(_) => {
                "Could not reach the payment service. Check your connection and try again.".to_string()
            }
            PaymentError::InvalidResponse(_) => {
                "The payment service returned an unexpected response.".to_string()
            }
            PaymentError::InvalidCredential(_) => {
                "The payment token received from the other device is invalid.".to_string()
            }
            PaymentError::InvalidAmount(details) => format!("Invalid amount: {}", details),
            PaymentError::Exchange(e) => e.user_message(),
            PaymentError::ConfigError(_) => "The app is misconfigured. Please contact support.".to_string(),
        }
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(e: reqwest::Error) -> Self {
        PaymentError::Http(e.to_string())
    }
}
