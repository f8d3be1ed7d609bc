// btleplug-backed proximity transport (central role)

use crate::transport::{suppress_duplicates, AdvertisementSpec, Channel, ProximityTransport, ScanFilter, ScanStream};
use crate::{
    AdapterState, AdvertiseHandle, ExchangeRole, PeerDescriptor, PeerId, PermissionManager,
    ProximityError, Result, ScanEvent,
};
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter as BleScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Proximity transport on top of the host Bluetooth stack
///
/// btleplug only implements the central role, so this backend can scan,
/// connect and read but cannot advertise.
pub struct BleTransport {
    adapter: RwLock<Option<Adapter>>,
    permissions: PermissionManager,
    known_peripherals: Arc<RwLock<HashMap<PeerId, Peripheral>>>,
    is_scanning: RwLock<bool>,
}

impl BleTransport {
    pub fn new(permissions: PermissionManager) -> Self {
        Self {
            adapter: RwLock::new(None),
            permissions,
            known_peripherals: Arc::new(RwLock::new(HashMap::new())),
            is_scanning: RwLock::new(false),
        }
    }

    pub fn permissions(&self) -> &PermissionManager {
        &self.permissions
    }

    async fn adapter(&self) -> Result<Adapter> {
        self.adapter
            .read()
            .await
            .clone()
            .ok_or_else(|| ProximityError::TransportUnavailable("BLE adapter not initialized".to_string()))
    }

    /// Build a descriptor for a peripheral once it has advertised something useful
    async fn describe(
        adapter: &Adapter,
        known: &Arc<RwLock<HashMap<PeerId, Peripheral>>>,
        id: &PeripheralId,
        service_id: Uuid,
    ) -> Option<PeerDescriptor> {
        let peripheral = match adapter.peripheral(id).await {
            Ok(p) => p,
            Err(e) => {
                debug!("Failed to resolve peripheral {:?}: {}", id, e);
                return None;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            // No properties available yet
            Ok(None) => return None,
            Err(e) => {
                debug!("Failed to get peripheral properties: {}", e);
                return None;
            }
        };

        if properties.local_name.is_none() && properties.services.is_empty() {
            return None;
        }

        let peer_id = format!("{:?}", peripheral.id());
        let descriptor = PeerDescriptor {
            peer_id: peer_id.clone(),
            advertised_name: properties.local_name.clone(),
            signal_strength: properties.rssi,
            service_match: properties.services.iter().any(|uuid| *uuid == service_id),
        };

        known.write().await.insert(peer_id, peripheral);
        Some(descriptor)
    }
}

#[async_trait]
impl ProximityTransport for BleTransport {
    async fn initialize(&self) -> Result<()> {
        let mut adapter_lock = self.adapter.write().await;
        if adapter_lock.is_some() {
            return Ok(());
        }

        debug!("Creating BLE manager and adapter");
        let manager = Manager::new().await.map_err(|e| {
            ProximityError::BleError(format!("Failed to create BLE manager: {}", e))
        })?;

        let adapters = manager.adapters().await.map_err(|e| {
            ProximityError::BleError(format!("Failed to get BLE adapters: {}", e))
        })?;

        let adapter = adapters.into_iter().next().ok_or_else(|| {
            ProximityError::TransportUnavailable("No BLE adapter found".to_string())
        })?;

        info!("BLE adapter initialized");
        *adapter_lock = Some(adapter);
        Ok(())
    }

    async fn adapter_state(&self) -> Result<AdapterState> {
        let adapter = match self.adapter.read().await.clone() {
            Some(adapter) => adapter,
            None => return Ok(AdapterState::Unsupported),
        };

        // No portable power state in btleplug; a responsive adapter counts as powered on
        match adapter.adapter_info().await {
            Ok(info) => {
                debug!("BLE adapter: {}", info);
                Ok(AdapterState::PoweredOn)
            }
            Err(e) => {
                warn!("BLE adapter not responding: {}", e);
                Ok(AdapterState::PoweredOff)
            }
        }
    }

    async fn ensure_permissions(&self, role: ExchangeRole) -> Result<()> {
        self.permissions.verify_role(role).await
    }

    async fn advertise(&self, spec: &AdvertisementSpec) -> Result<AdvertiseHandle> {
        warn!(
            device_name = %spec.device_name,
            "BLE advertising not supported by btleplug - platform peripheral implementation required"
        );
        Err(ProximityError::TransportUnavailable(
            "peripheral role is not supported by the btleplug backend".to_string(),
        ))
    }

    async fn stop_advertise(&self, _handle: Option<AdvertiseHandle>) -> Result<()> {
        // Never advertising, so always a no-op
        Ok(())
    }

    async fn scan(&self, filter: &ScanFilter) -> Result<ScanStream> {
        let adapter = self.adapter().await?;

        let events = adapter.events().await.map_err(|e| {
            ProximityError::BleError(format!("Failed to subscribe to BLE events: {}", e))
        })?;

        info!(service_id = %filter.service_id, "Starting BLE scan");

        // Unfiltered: name matching must still see peers whose services are hidden
        adapter
            .start_scan(BleScanFilter::default())
            .await
            .map_err(|e| ProximityError::TransportUnavailable(format!("Failed to start BLE scan: {}", e)))?;
        *self.is_scanning.write().await = true;

        let service_id = filter.service_id;
        let known = self.known_peripherals.clone();
        let described = events.filter_map(move |event| {
            let adapter = adapter.clone();
            let known = known.clone();
            async move {
                match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        Self::describe(&adapter, &known, &id, service_id).await
                    }
                    _ => None,
                }
            }
        });

        // An update that changes what matching sees is re-reported as a new sighting
        let mut last_seen: HashMap<PeerId, (Option<String>, bool)> = HashMap::new();
        let sightings = described.flat_map(move |peer| {
            let key = (peer.advertised_name.clone(), peer.service_match);
            let events = match last_seen.insert(peer.peer_id.clone(), key.clone()) {
                None => vec![ScanEvent::Discovered(peer)],
                Some(previous) if previous != key => {
                    vec![ScanEvent::Lost(peer.peer_id.clone()), ScanEvent::Discovered(peer)]
                }
                Some(_) => Vec::new(),
            };
            futures::stream::iter(events)
        });

        Ok(suppress_duplicates(sightings.boxed()))
    }

    async fn stop_scan(&self) -> Result<()> {
        let mut is_scanning = self.is_scanning.write().await;
        if !*is_scanning {
            return Ok(());
        }

        info!("Stopping BLE scan");
        *is_scanning = false;

        let adapter = self.adapter().await?;
        adapter
            .stop_scan()
            .await
            .map_err(|e| ProximityError::BleError(format!("Failed to stop BLE scan: {}", e)))
    }

    async fn connect(&self, peer: &PeerDescriptor, timeout: Duration) -> Result<Box<dyn Channel>> {
        let peripheral = self
            .known_peripherals
            .read()
            .await
            .get(&peer.peer_id)
            .cloned()
            .ok_or_else(|| ProximityError::ConnectError(format!("peer {} was never discovered", peer.peer_id)))?;

        info!(peer_id = %peer.peer_id, "Connecting to BLE peer");
        match tokio::time::timeout(timeout, peripheral.connect()).await {
            Err(_) => return Err(ProximityError::ConnectTimeout(timeout)),
            Ok(Err(e)) => return Err(ProximityError::ConnectError(e.to_string())),
            Ok(Ok(())) => {}
        }

        if let Err(e) = peripheral.discover_services().await {
            let _ = peripheral.disconnect().await;
            return Err(ProximityError::ConnectError(format!("Service discovery failed: {}", e)));
        }

        Ok(Box::new(BleChannel {
            peer_id: peer.peer_id.clone(),
            peripheral,
            closed: false,
        }))
    }

    fn backend_name(&self) -> &str {
        "btleplug"
    }
}

/// A connected GATT session with a sender
pub struct BleChannel {
    peer_id: PeerId,
    peripheral: Peripheral,
    closed: bool,
}

impl std::fmt::Debug for BleChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleChannel")
            .field("peer_id", &self.peer_id)
            .field("closed", &self.closed)
            .finish()
    }
}

#[async_trait]
impl Channel for BleChannel {
    fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    async fn read_value(&mut self, characteristic_id: Uuid) -> Result<Vec<u8>> {
        if self.closed {
            return Err(ProximityError::ReadError("channel already closed".to_string()));
        }

        let characteristic = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic_id)
            .ok_or_else(|| {
                ProximityError::ReadError(format!("characteristic {} not found", characteristic_id))
            })?;

        self.peripheral
            .read(&characteristic)
            .await
            .map_err(|e| ProximityError::ReadError(e.to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        self.peripheral
            .disconnect()
            .await
            .map_err(|e| ProximityError::BleError(format!("Disconnect failed: {}", e)))
    }
}
