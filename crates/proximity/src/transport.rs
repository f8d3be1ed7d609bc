// Proximity transport contract
// The hard boundary the exchange engine is built on: advertise, scan, connect, read.

use crate::{AdapterState, AdvertiseHandle, ExchangeRole, PeerDescriptor, PeerId, Result, ScanEvent};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashSet;
use std::fmt::Debug;
use std::time::Duration;
use uuid::Uuid;

/// Lazy, unordered, infinite-until-stopped sequence of scan events
pub type ScanStream = BoxStream<'static, ScanEvent>;

/// What a scan is looking for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFilter {
    pub service_id: Uuid,
    pub name_hint: String,
}

/// Everything needed to publish the credential characteristic
#[derive(Clone, PartialEq, Eq)]
pub struct AdvertisementSpec {
    pub service_id: Uuid,
    pub characteristic_id: Uuid,
    pub device_name: String,
    pub payload: Vec<u8>,
}

impl Debug for AdvertisementSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdvertisementSpec")
            .field("service_id", &self.service_id)
            .field("characteristic_id", &self.characteristic_id)
            .field("device_name", &self.device_name)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

/// Short-range radio primitive
///
/// Implementations must make `stop_advertise` and `stop_scan` idempotent:
/// calling them when nothing is active returns `Ok(())`.
#[async_trait]
pub trait ProximityTransport: Send + Sync {
    /// Acquire the underlying radio stack. Called once per engine lifetime.
    async fn initialize(&self) -> Result<()>;

    /// Report whether the radio is powered on
    async fn adapter_state(&self) -> Result<AdapterState>;

    /// Fail with `PermissionDenied` unless the OS has granted what `role` needs
    async fn ensure_permissions(&self, role: ExchangeRole) -> Result<()>;

    /// Begin broadcasting; the payload becomes readable by connecting peers
    async fn advertise(&self, spec: &AdvertisementSpec) -> Result<AdvertiseHandle>;

    async fn stop_advertise(&self, handle: Option<AdvertiseHandle>) -> Result<()>;

    /// Start discovery. Duplicate sightings must already be suppressed.
    async fn scan(&self, filter: &ScanFilter) -> Result<ScanStream>;

    async fn stop_scan(&self) -> Result<()>;

    /// Establish a point-to-point session, failing with `ConnectTimeout` or `ConnectError`
    async fn connect(&self, peer: &PeerDescriptor, timeout: Duration) -> Result<Box<dyn Channel>>;

    /// Backend name for logs
    fn backend_name(&self) -> &str;
}

/// A connected point-to-point session
#[async_trait]
pub trait Channel: Send + Sync + Debug {
    fn peer_id(&self) -> &PeerId;

    /// One-shot read of a characteristic; `ReadError` if the channel closed mid-read
    async fn read_value(&mut self, characteristic_id: Uuid) -> Result<Vec<u8>>;

    async fn close(&mut self) -> Result<()>;
}

/// Drop repeated sightings of a peer until that peer is reported lost
pub fn suppress_duplicates(events: ScanStream) -> ScanStream {
    let mut seen: HashSet<PeerId> = HashSet::new();

    events
        .filter(move |event| {
            let keep = match event {
                ScanEvent::Discovered(peer) => seen.insert(peer.peer_id.clone()),
                ScanEvent::Lost(peer_id) => seen.remove(peer_id),
                ScanEvent::Error(_) => true,
            };
            futures::future::ready(keep)
        })
        .boxed()
}
