pub mod error;
pub mod models;
pub mod store;
pub mod client;
pub mod orchestrator;

pub use error::{PaymentError, Result, SettlementOperation};
pub use models::{AuthorizationSecret, Settlement, TransferCredential, TransferRequest};
pub use store::{CredentialStore, InMemoryCredentialStore, SessionToken};
pub use client::{HttpSettlementClient, SettlementClient};
pub use orchestrator::{OutgoingTransfer, TransferOrchestrator};
