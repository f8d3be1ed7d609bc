// Permission handling for the proximity exchange
// Tracks the Bluetooth capabilities each exchange role needs, across platforms

use crate::{ExchangeRole, ProximityError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Radio capability that requires OS-level consent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RadioCapability {
    Scan,
    Connect,
    Advertise,
}

impl std::fmt::Display for RadioCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RadioCapability::Scan => write!(f, "Bluetooth scan"),
            RadioCapability::Connect => write!(f, "Bluetooth connect"),
            RadioCapability::Advertise => write!(f, "Bluetooth advertise"),
        }
    }
}

/// Permission status for a specific capability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    /// Permission has been granted
    Granted,
    /// Permission has been denied by the user
    Denied,
    /// Permission has not been requested yet
    NotRequested,
    /// Capability is not available on this platform
    NotApplicable,
}

/// Capabilities a role must hold before touching the radio
pub fn required_capabilities(role: ExchangeRole) -> &'static [RadioCapability] {
    match role {
        ExchangeRole::Sender => &[RadioCapability::Advertise],
        ExchangeRole::Receiver => &[RadioCapability::Scan, RadioCapability::Connect],
    }
}

/// Android manifest permissions backing the radio capabilities for an API level
pub fn android_permissions(api_level: u32) -> &'static [&'static str] {
    if api_level >= 31 {
        &[
            "android.permission.BLUETOOTH_ADVERTISE",
            "android.permission.BLUETOOTH_SCAN",
            "android.permission.BLUETOOTH_CONNECT",
            "android.permission.ACCESS_FINE_LOCATION",
        ]
    } else {
        &[
            "android.permission.BLUETOOTH",
            "android.permission.BLUETOOTH_ADMIN",
            "android.permission.ACCESS_FINE_LOCATION",
        ]
    }
}

/// Manages permissions for the radio capabilities
pub struct PermissionManager {
    statuses: Arc<RwLock<HashMap<RadioCapability, PermissionStatus>>>,
}

impl PermissionManager {
    pub fn new() -> Self {
        Self {
            statuses: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// A manager with every capability already granted
    pub fn granted() -> Self {
        let statuses = [
            RadioCapability::Scan,
            RadioCapability::Connect,
            RadioCapability::Advertise,
        ]
        .into_iter()
        .map(|c| (c, PermissionStatus::Granted))
        .collect();

        Self {
            statuses: Arc::new(RwLock::new(statuses)),
        }
    }

    /// Request permission for a capability; cached once answered
    pub async fn request_permission(&self, capability: RadioCapability) -> PermissionStatus {
        let current = self.check_permission(capability).await;
        if current != PermissionStatus::NotRequested {
            debug!("{} permission already resolved: {:?}", capability, current);
            return current;
        }

        info!("Requesting {} permission", capability);
        let status = Self::platform_request(capability);
        if status != PermissionStatus::NotRequested {
            self.statuses.write().await.insert(capability, status);
        }

        info!("{} permission status: {:?}", capability, status);
        status
    }

    pub async fn check_permission(&self, capability: RadioCapability) -> PermissionStatus {
        self.statuses
            .read()
            .await
            .get(&capability)
            .copied()
            .unwrap_or(PermissionStatus::NotRequested)
    }

    /// Verify every capability `role` needs, requesting unresolved ones first
    pub async fn verify_role(&self, role: ExchangeRole) -> Result<()> {
        for capability in required_capabilities(role) {
            let status = self.request_permission(*capability).await;

            match status {
                PermissionStatus::Granted => {}
                PermissionStatus::Denied => {
                    warn!(%role, "{} permission denied", capability);
                    return Err(ProximityError::PermissionDenied(format!(
                        "{} permission was denied",
                        capability
                    )));
                }
                PermissionStatus::NotRequested => {
                    return Err(ProximityError::PermissionDenied(format!(
                        "{} permission has not been granted yet",
                        capability
                    )));
                }
                PermissionStatus::NotApplicable => {
                    return Err(ProximityError::PermissionDenied(format!(
                        "{} is not available on this platform",
                        capability
                    )));
                }
            }
        }

        Ok(())
    }

    /// Record the answer to an OS permission prompt shown by the host app
    pub async fn set_permission(&self, capability: RadioCapability, status: PermissionStatus) {
        self.statuses.write().await.insert(capability, status);
    }

    #[cfg(target_arch = "wasm32")]
    fn platform_request(_capability: RadioCapability) -> PermissionStatus {
        debug!("Web platform: Bluetooth not supported");
        PermissionStatus::NotApplicable
    }

    // Mobile prompts are owned by the host app, which reports back via set_permission
    #[cfg(any(target_os = "ios", target_os = "android"))]
    fn platform_request(capability: RadioCapability) -> PermissionStatus {
        debug!("Mobile platform: waiting for host to report {} permission", capability);
        PermissionStatus::NotRequested
    }

    #[cfg(not(any(target_arch = "wasm32", target_os = "ios", target_os = "android")))]
    fn platform_request(_capability: RadioCapability) -> PermissionStatus {
        debug!("Desktop platform: Bluetooth permission not required");
        PermissionStatus::Granted
    }
}

impl Default for PermissionManager {
    fn default() -> Self {
        Self::new()
    }
}
