pub mod types;
pub mod error;
pub mod credential;
pub mod transport;
pub mod permissions;
pub mod session;
pub mod discovery;
pub mod init;
pub mod engine;
pub mod receiver;
pub mod ble;
pub mod mock;

pub use types::*;
pub use error::{ProximityError, Result, ErrorContext, ErrorCategory};
pub use credential::{Credential, encode_credential, decode_credential};
pub use transport::{AdvertisementSpec, Channel, ProximityTransport, ScanFilter, ScanStream};
pub use permissions::{PermissionManager, PermissionStatus, RadioCapability};
pub use session::SessionManager;
pub use discovery::MatchLatch;
pub use engine::{CredentialExchangeEngine, ExchangeConfig, SenderSession, CHARACTERISTIC_UUID, SERVICE_UUID};
pub use receiver::ReceiverSession;
pub use ble::BleTransport;
pub use mock::{MockTransport, TransportCall, ConnectBehavior, LOOPBACK_PEER};
