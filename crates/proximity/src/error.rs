use crate::types::ExchangeRole;
use std::time::Duration;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ProximityError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("No matching peer discovered within {0:?}")]
    DiscoveryTimeout(Duration),

    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Connect error: {0}")]
    ConnectError(String),

    #[error("Connection to peer {peer_id} failed: {source}")]
    ConnectionFailed {
        peer_id: String,
        #[source]
        source: Box<ProximityError>,
    },

    #[error("Read error: {0}")]
    ReadError(String),

    #[error("Exchange cancelled")]
    Cancelled,

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("BLE error: {0}")]
    BleError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, ProximityError>;

impl ProximityError {
    /// Wrap a transport-level connect failure for the given peer
    pub fn connection_failed(peer_id: impl Into<String>, source: ProximityError) -> Self {
        ProximityError::ConnectionFailed {
            peer_id: peer_id.into(),
            source: Box::new(source),
        }
    }
}

/// Context for error logging
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub session_id: Option<Uuid>,
    pub role: Option<ExchangeRole>,
    pub peer_id: Option<String>,
    pub additional_info: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_id(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_role(mut self, role: ExchangeRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_peer_id(mut self, peer_id: String) -> Self {
        self.peer_id = Some(peer_id);
        self
    }

    pub fn with_info(mut self, info: String) -> Self {
        self.additional_info = Some(info);
        self
    }
}

impl ProximityError {
    /// Log error with structured context
    pub fn log_with_context(&self, context: &ErrorContext) {
        error!(
            error = %self,
            error_type = ?self,
            category = %self.category(),
            session_id = ?context.session_id,
            role = ?context.role,
            peer_id = ?context.peer_id,
            additional_info = ?context.additional_info,
            timestamp = %chrono::Utc::now(),
            "Credential exchange error occurred"
        );
    }

    /// Whether the caller may offer a fresh attempt
    ///
    /// Permission and radio errors need user action first; the engine itself
    /// never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProximityError::DiscoveryTimeout(_)
                | ProximityError::ConnectTimeout(_)
                | ProximityError::ConnectError(_)
                | ProximityError::ConnectionFailed { .. }
                | ProximityError::ReadError(_)
        )
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            ProximityError::PermissionDenied(permission) => {
                format!("Permission denied: {}. Please grant Bluetooth permissions in your device settings.", permission)
            }
            ProximityError::TransportUnavailable(details) => {
                format!("Bluetooth is unavailable: {}. Please turn Bluetooth on and try again.", details)
            }
            ProximityError::DiscoveryTimeout(timeout) => {
                format!(
                    "No device found after {} seconds. Make sure the sender is active and nearby.",
                    timeout.as_secs()
                )
            }
            ProximityError::ConnectTimeout(_) | ProximityError::ConnectError(_) => {
                "Could not connect to the nearby device. Please try again.".to_string()
            }
            ProximityError::ConnectionFailed { .. } => {
                "Connection to the nearby device failed. Please try again.".to_string()
            }
            ProximityError::ReadError(_) => {
                "The payment token could not be read from the nearby device. Please try again.".to_string()
            }
            ProximityError::Cancelled => "The exchange was cancelled.".to_string(),
            ProximityError::InvalidCredential(_) => {
                "The payment token is invalid. Ask the sender to start again.".to_string()
            }
            ProximityError::SessionNotFound(id) => {
                format!("Exchange session '{}' not found. It may have ended.", id)
            }
            ProximityError::InvalidStateTransition { .. } => {
                "The exchange is in an unexpected state. Please start again.".to_string()
            }
            ProximityError::BleError(details) => {
                format!("Bluetooth error: {}. Please check your Bluetooth settings.", details)
            }
            ProximityError::InternalError(details) => {
                format!("An internal error occurred: {}. Please try again or contact support.", details)
            }
        }
    }

    /// Get error category for metrics and monitoring
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProximityError::PermissionDenied(_) => ErrorCategory::Permission,
            ProximityError::TransportUnavailable(_) => ErrorCategory::Radio,
            ProximityError::DiscoveryTimeout(_) => ErrorCategory::Timeout,
            ProximityError::ConnectTimeout(_) => ErrorCategory::Timeout,
            ProximityError::ConnectError(_) => ErrorCategory::Connection,
            ProximityError::ConnectionFailed { .. } => ErrorCategory::Connection,
            ProximityError::ReadError(_) => ErrorCategory::Read,
            ProximityError::Cancelled => ErrorCategory::Cancelled,
            ProximityError::InvalidCredential(_) => ErrorCategory::Validation,
            ProximityError::SessionNotFound(_) => ErrorCategory::Session,
            ProximityError::InvalidStateTransition { .. } => ErrorCategory::Session,
            ProximityError::BleError(_) => ErrorCategory::Radio,
            ProximityError::InternalError(_) => ErrorCategory::Internal,
        }
    }
}

/// Error categories for monitoring and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Permission,
    Radio,
    Timeout,
    Connection,
    Read,
    Cancelled,
    Validation,
    Session,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Permission => write!(f, "permission"),
            ErrorCategory::Radio => write!(f, "radio"),
            ErrorCategory::Timeout => write!(f, "timeout"),
            ErrorCategory::Connection => write!(f, "connection"),
            ErrorCategory::Read => write!(f, "read"),
            ErrorCategory::Cancelled => write!(f, "cancelled"),
            ErrorCategory::Validation => write!(f, "validation"),
            ErrorCategory::Session => write!(f, "session"),
            ErrorCategory::Internal => write!(f, "internal"),
        }
    }
}
