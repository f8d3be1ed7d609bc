use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use uuid::Uuid;

/// Well-known GATT service shared by sender and receiver builds
pub const DEFAULT_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000ffff_0000_1000_8000_00805f9b34fb);

/// Well-known characteristic carrying the credential bytes
pub const DEFAULT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x00001111_0000_1000_8000_00805f9b34fb);

pub const DEFAULT_NAME_HINT: &str = "tiltpay";
pub const DEFAULT_DEVICE_NAME: &str = "TiltPay-Sender";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub settlement: SettlementConfig,
    pub proximity: ProximityConfig,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProximityConfig {
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    /// Case-insensitive substring matched against advertised names
    pub name_hint: String,
    pub device_name: String,
    /// Receiver discovery deadline in seconds (default: 30)
    pub discovery_timeout_secs: u64,
    /// Receiver connect deadline in seconds (default: 15)
    pub connect_timeout_secs: u64,
    /// Pause after clearing a stale scan in milliseconds (default: 300)
    pub scan_settle_ms: u64,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            service_uuid: DEFAULT_SERVICE_UUID,
            characteristic_uuid: DEFAULT_CHARACTERISTIC_UUID,
            name_hint: DEFAULT_NAME_HINT.to_string(),
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            discovery_timeout_secs: 30,
            connect_timeout_secs: 15,
            scan_settle_ms: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(crate::Error::InvalidConfig {
                key: "LOG_FORMAT".to_string(),
                reason: format!("unknown format '{}'", other),
            }),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ProximityConfig::default();

        Ok(Config {
            settlement: SettlementConfig {
                base_url: lookup("SETTLEMENT_BASE_URL")
                    .ok_or_else(|| crate::Error::MissingConfig("SETTLEMENT_BASE_URL".to_string()))?
                    .trim_end_matches('/')
                    .to_string(),
                request_timeout_secs: parse_or(&lookup, "SETTLEMENT_REQUEST_TIMEOUT_SECS", 30)?,
            },
            proximity: ProximityConfig {
                service_uuid: parse_or(&lookup, "PROXIMITY_SERVICE_UUID", defaults.service_uuid)?,
                characteristic_uuid: parse_or(
                    &lookup,
                    "PROXIMITY_CHARACTERISTIC_UUID",
                    defaults.characteristic_uuid,
                )?,
                name_hint: lookup("PROXIMITY_NAME_HINT").unwrap_or(defaults.name_hint),
                device_name: lookup("PROXIMITY_DEVICE_NAME").unwrap_or(defaults.device_name),
                discovery_timeout_secs: parse_or(
                    &lookup,
                    "PROXIMITY_DISCOVERY_TIMEOUT_SECS",
                    defaults.discovery_timeout_secs,
                )?,
                connect_timeout_secs: parse_or(
                    &lookup,
                    "PROXIMITY_CONNECT_TIMEOUT_SECS",
                    defaults.connect_timeout_secs,
                )?,
                scan_settle_ms: parse_or(&lookup, "PROXIMITY_SCAN_SETTLE_MS", defaults.scan_settle_ms)?,
            },
            log_format: parse_or(&lookup, "LOG_FORMAT", LogFormat::Json)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Invalid value for {}", key)),
        None => Ok(default),
    }
}
