pub mod error;
pub mod config;
pub mod logging;

pub use config::{Config, LogFormat, ProximityConfig, SettlementConfig};
pub use error::{Error, Result};
