// Scriptable in-memory transport
// Records every call in order so exchange behaviour can be asserted without a radio

use crate::transport::{suppress_duplicates, AdvertisementSpec, Channel, ProximityTransport, ScanFilter, ScanStream};
use crate::{
    AdapterState, AdvertiseHandle, ExchangeRole, PeerDescriptor, PeerId, PermissionManager,
    ProximityError, Result, ScanEvent,
};
use async_trait::async_trait;
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// A call the transport received
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Initialize,
    Advertise { device_name: String, payload: Vec<u8> },
    StopAdvertise,
    Scan,
    StopScan,
    Connect(PeerId),
    Read(PeerId, Uuid),
    Close(PeerId),
}

/// How `connect` behaves for a peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectBehavior {
    Succeed,
    Fail(String),
    /// Never completes; the connect timeout fires
    Hang,
}

struct MockState {
    calls: Vec<TransportCall>,
    adapter_state: AdapterState,
    init_failures_remaining: u32,
    init_delay: Duration,
    advertising: Option<(AdvertiseHandle, AdvertisementSpec)>,
    scripted_sightings: Vec<ScanEvent>,
    scan_tx: Option<mpsc::UnboundedSender<ScanEvent>>,
    allow_duplicates: bool,
    connect_behavior: HashMap<PeerId, ConnectBehavior>,
    values: HashMap<(PeerId, Uuid), Vec<u8>>,
    reads_hang: bool,
    close_delay: Duration,
    close_fails: bool,
}

/// Peer id under which an active advertisement is sighted by scans on the same mock
pub const LOOPBACK_PEER: &str = "loopback";

/// In-memory `ProximityTransport`
///
/// Clones share state, so a sender engine and a receiver engine built over
/// clones of one mock are "in range": an active advertisement is sighted as
/// [`LOOPBACK_PEER`] and its payload can be read from it.
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    permissions: Arc<PermissionManager>,
}

impl MockTransport {
    /// Powered-on radio with every permission granted
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                calls: Vec::new(),
                adapter_state: AdapterState::PoweredOn,
                init_failures_remaining: 0,
                init_delay: Duration::ZERO,
                advertising: None,
                scripted_sightings: Vec::new(),
                scan_tx: None,
                allow_duplicates: false,
                connect_behavior: HashMap::new(),
                values: HashMap::new(),
                reads_hang: false,
                close_delay: Duration::ZERO,
                close_fails: false,
            })),
            permissions: Arc::new(PermissionManager::granted()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: TransportCall) {
        self.lock().calls.push(call);
    }

    pub fn permissions(&self) -> &PermissionManager {
        &self.permissions
    }

    pub fn set_adapter_state(&self, state: AdapterState) {
        self.lock().adapter_state = state;
    }

    /// Make the next `times` initialisations fail
    pub fn fail_initialization(&self, times: u32) {
        self.lock().init_failures_remaining = times;
    }

    pub fn set_initialize_delay(&self, delay: Duration) {
        self.lock().init_delay = delay;
    }

    /// Events replayed at the start of every scan
    pub fn script_sightings(&self, events: Vec<ScanEvent>) {
        self.lock().scripted_sightings = events;
    }

    /// Deliver an event to the running scan; false if nothing is scanning
    pub fn emit(&self, event: ScanEvent) -> bool {
        match self.lock().scan_tx.as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Bypass duplicate suppression to exercise the engine's own guard
    pub fn allow_duplicates(&self, allow: bool) {
        self.lock().allow_duplicates = allow;
    }

    pub fn set_connect_behavior(&self, peer_id: &str, behavior: ConnectBehavior) {
        self.lock()
            .connect_behavior
            .insert(peer_id.to_string(), behavior);
    }

    /// Value a connected receiver reads from `peer_id`
    pub fn set_characteristic(&self, peer_id: &str, characteristic_id: Uuid, value: Vec<u8>) {
        self.lock()
            .values
            .insert((peer_id.to_string(), characteristic_id), value);
    }

    /// Make characteristic reads never complete
    pub fn hang_reads(&self, hang: bool) {
        self.lock().reads_hang = hang;
    }

    pub fn set_close_delay(&self, delay: Duration) {
        self.lock().close_delay = delay;
    }

    pub fn fail_close(&self, fails: bool) {
        self.lock().close_fails = fails;
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, predicate: impl Fn(&TransportCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    pub fn is_scanning(&self) -> bool {
        self.lock().scan_tx.is_some()
    }

    pub fn is_advertising(&self) -> bool {
        self.lock().advertising.is_some()
    }

    /// Bytes currently published on the credential characteristic
    pub fn advertised_payload(&self) -> Option<Vec<u8>> {
        self.lock()
            .advertising
            .as_ref()
            .map(|(_, spec)| spec.payload.clone())
    }

    async fn require_powered_on(&self) -> Result<()> {
        match self.lock().adapter_state {
            AdapterState::PoweredOn => Ok(()),
            other => Err(ProximityError::TransportUnavailable(format!(
                "radio is {:?}",
                other
            ))),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience sighting for scripts
pub fn sighting(peer_id: &str, name: Option<&str>, service_match: bool) -> ScanEvent {
    ScanEvent::Discovered(PeerDescriptor {
        peer_id: peer_id.to_string(),
        advertised_name: name.map(str::to_string),
        signal_strength: Some(-55),
        service_match,
    })
}

fn loopback_sighting(spec: &AdvertisementSpec) -> ScanEvent {
    ScanEvent::Discovered(PeerDescriptor {
        peer_id: LOOPBACK_PEER.to_string(),
        advertised_name: Some(spec.device_name.clone()),
        signal_strength: Some(-40),
        service_match: true,
    })
}

#[async_trait]
impl ProximityTransport for MockTransport {
    async fn initialize(&self) -> Result<()> {
        let delay = {
            let mut state = self.lock();
            state.calls.push(TransportCall::Initialize);
            state.init_delay
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if state.init_failures_remaining > 0 {
            state.init_failures_remaining -= 1;
            return Err(ProximityError::BleError("mock initialization failure".to_string()));
        }
        Ok(())
    }

    async fn adapter_state(&self) -> Result<AdapterState> {
        Ok(self.lock().adapter_state)
    }

    async fn ensure_permissions(&self, role: ExchangeRole) -> Result<()> {
        self.permissions.verify_role(role).await
    }

    async fn advertise(&self, spec: &AdvertisementSpec) -> Result<AdvertiseHandle> {
        self.record(TransportCall::Advertise {
            device_name: spec.device_name.clone(),
            payload: spec.payload.clone(),
        });

        self.permissions.verify_role(ExchangeRole::Sender).await?;
        self.require_powered_on().await?;

        let handle = AdvertiseHandle::new();
        let mut state = self.lock();
        if let Some(tx) = state.scan_tx.as_ref() {
            let _ = tx.send(loopback_sighting(spec));
        }
        state.advertising = Some((handle, spec.clone()));
        Ok(handle)
    }

    async fn stop_advertise(&self, _handle: Option<AdvertiseHandle>) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(TransportCall::StopAdvertise);
        state.advertising = None;
        Ok(())
    }

    async fn scan(&self, filter: &ScanFilter) -> Result<ScanStream> {
        self.record(TransportCall::Scan);
        self.require_powered_on().await?;

        debug!(service_id = %filter.service_id, "Mock scan started");
        let (tx, rx) = mpsc::unbounded_channel();
        let allow_duplicates = {
            let mut state = self.lock();
            for event in state.scripted_sightings.iter().cloned() {
                let _ = tx.send(event);
            }
            if let Some((_, spec)) = state.advertising.as_ref() {
                let _ = tx.send(loopback_sighting(spec));
            }
            state.scan_tx = Some(tx);
            state.allow_duplicates
        };

        let events = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed();

        if allow_duplicates {
            Ok(events)
        } else {
            Ok(suppress_duplicates(events))
        }
    }

    async fn stop_scan(&self) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(TransportCall::StopScan);
        // Dropping the sender ends the scan stream
        state.scan_tx = None;
        Ok(())
    }

    async fn connect(&self, peer: &PeerDescriptor, timeout: Duration) -> Result<Box<dyn Channel>> {
        let behavior = {
            let mut state = self.lock();
            state.calls.push(TransportCall::Connect(peer.peer_id.clone()));
            state
                .connect_behavior
                .get(&peer.peer_id)
                .cloned()
                .unwrap_or(ConnectBehavior::Succeed)
        };

        match behavior {
            ConnectBehavior::Succeed => Ok(Box::new(MockChannel {
                peer_id: peer.peer_id.clone(),
                transport: self.clone(),
                closed: false,
            })),
            ConnectBehavior::Fail(reason) => Err(ProximityError::ConnectError(reason)),
            ConnectBehavior::Hang => {
                let _ = tokio::time::timeout(timeout, futures::future::pending::<()>()).await;
                Err(ProximityError::ConnectTimeout(timeout))
            }
        }
    }

    fn backend_name(&self) -> &str {
        "mock"
    }
}

/// Channel handed out by `MockTransport::connect`
pub struct MockChannel {
    peer_id: PeerId,
    transport: MockTransport,
    closed: bool,
}

impl std::fmt::Debug for MockChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockChannel")
            .field("peer_id", &self.peer_id)
            .field("closed", &self.closed)
            .finish()
    }
}

#[async_trait]
impl Channel for MockChannel {
    fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    async fn read_value(&mut self, characteristic_id: Uuid) -> Result<Vec<u8>> {
        let hang = {
            let mut state = self.transport.lock();
            state
                .calls
                .push(TransportCall::Read(self.peer_id.clone(), characteristic_id));
            state.reads_hang
        };
        if hang {
            futures::future::pending::<()>().await;
        }

        let state = self.transport.lock();
        if self.closed {
            return Err(ProximityError::ReadError("channel closed".to_string()));
        }

        let advertised = state
            .advertising
            .as_ref()
            .filter(|(_, spec)| self.peer_id == LOOPBACK_PEER && spec.characteristic_id == characteristic_id)
            .map(|(_, spec)| spec.payload.clone());

        state
            .values
            .get(&(self.peer_id.clone(), characteristic_id))
            .cloned()
            .or(advertised)
            .ok_or_else(|| {
                ProximityError::ReadError(format!("characteristic {} not found", characteristic_id))
            })
    }

    async fn close(&mut self) -> Result<()> {
        let delay = {
            let mut state = self.transport.lock();
            state.calls.push(TransportCall::Close(self.peer_id.clone()));
            state.close_delay
        };
        self.closed = true;

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.transport.lock().close_fails {
            return Err(ProximityError::BleError("mock disconnect failure".to_string()));
        }
        Ok(())
    }
}
