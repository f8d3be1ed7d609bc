// Credential exchange engine
// Owns the transport, the init gate and one live session per role.

use crate::credential::encode_credential;
use crate::init::InitGate;
use crate::receiver::{ReceiverSession, ReceiverTask};
use crate::transport::{AdvertisementSpec, Channel, ProximityTransport, ScanFilter, ScanStream};
use crate::{
    AdapterState, AdvertiseHandle, Credential, ErrorContext, ExchangeRole, ExchangeSession, InitState,
    PeerDescriptor, ProximityError, ReceiverState, Result, SenderState, SessionManager, SessionState,
};
use shared::config::{ProximityConfig, DEFAULT_CHARACTERISTIC_UUID, DEFAULT_SERVICE_UUID};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const SERVICE_UUID: Uuid = DEFAULT_SERVICE_UUID;
pub const CHARACTERISTIC_UUID: Uuid = DEFAULT_CHARACTERISTIC_UUID;

/// Tunables for a credential exchange
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub service_id: Uuid,
    pub characteristic_id: Uuid,
    pub name_hint: String,
    pub device_name: String,
    pub discovery_timeout: Duration,
    pub connect_timeout: Duration,
    /// Pause between clearing a stale scan and starting a new one
    pub scan_settle_delay: Duration,
}

impl From<&ProximityConfig> for ExchangeConfig {
    fn from(config: &ProximityConfig) -> Self {
        Self {
            service_id: config.service_uuid,
            characteristic_id: config.characteristic_uuid,
            name_hint: config.name_hint.clone(),
            device_name: config.device_name.clone(),
            discovery_timeout: Duration::from_secs(config.discovery_timeout_secs),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            scan_settle_delay: Duration::from_millis(config.scan_settle_ms),
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self::from(&ProximityConfig::default())
    }
}

/// State shared between the engine and its receiver task
///
/// Every call into the transport goes through the wrappers below, which hold
/// `radio` for the duration of the call. Scan events are consumed without it.
pub(crate) struct EngineCore {
    transport: Arc<dyn ProximityTransport>,
    pub(crate) config: ExchangeConfig,
    pub(crate) sessions: SessionManager,
    init: InitGate,
    radio: Mutex<()>,
    /// Set while a scan we started has not been confirmed stopped
    scan_live: AtomicBool,
    /// Set while an advertisement we started has not been confirmed stopped
    advertise_live: AtomicBool,
}

impl EngineCore {
    pub(crate) async fn ensure_ready(&self) -> Result<()> {
        self.init
            .ensure_ready(|| async move {
                let _radio = self.radio.lock().await;
                info!(backend = self.transport.backend_name(), "Initializing proximity transport");
                self.transport.initialize().await
            })
            .await
    }

    /// Permission and radio checks shared by both roles; no radio activity happens on failure
    pub(crate) async fn check_preconditions(&self, role: ExchangeRole) -> Result<()> {
        let _radio = self.radio.lock().await;
        self.transport.ensure_permissions(role).await?;

        match self.transport.adapter_state().await? {
            AdapterState::PoweredOn => Ok(()),
            AdapterState::Unauthorized => Err(ProximityError::PermissionDenied(
                "Bluetooth access is not authorized".to_string(),
            )),
            other => Err(ProximityError::TransportUnavailable(format!(
                "Bluetooth adapter is {:?}",
                other
            ))),
        }
    }

    async fn advertise(&self, spec: &AdvertisementSpec) -> Result<AdvertiseHandle> {
        let _radio = self.radio.lock().await;
        let handle = self.transport.advertise(spec).await?;
        self.advertise_live.store(true, Ordering::Release);
        Ok(handle)
    }

    /// Start a scan; the returned stream is read without holding the radio
    pub(crate) async fn scan(&self, filter: &ScanFilter) -> Result<ScanStream> {
        let _radio = self.radio.lock().await;
        let events = self.transport.scan(filter).await?;
        self.scan_live.store(true, Ordering::Release);
        Ok(events)
    }

    pub(crate) async fn connect(&self, peer: &PeerDescriptor, timeout: Duration) -> Result<Box<dyn Channel>> {
        let _radio = self.radio.lock().await;
        self.transport.connect(peer, timeout).await
    }

    pub(crate) async fn read_value(&self, channel: &mut Box<dyn Channel>, characteristic_id: Uuid) -> Result<Vec<u8>> {
        let _radio = self.radio.lock().await;
        channel.read_value(characteristic_id).await
    }

    /// Best-effort close; failures are only logged
    pub(crate) async fn close(&self, mut channel: Box<dyn Channel>) {
        let _radio = self.radio.lock().await;
        if let Err(e) = channel.close().await {
            warn!(peer_id = %channel.peer_id(), error = %e, "Failed to close channel");
        }
    }

    /// Best-effort stop; a failure leaves the scan flagged as stale
    pub(crate) async fn stop_scan(&self) {
        let _radio = self.radio.lock().await;
        match self.transport.stop_scan().await {
            Ok(()) => self.scan_live.store(false, Ordering::Release),
            Err(e) => warn!(error = %e, "Failed to stop scan"),
        }
    }

    /// Clear a scan a previous session failed to stop, then let the radio settle
    pub(crate) async fn clear_stale_scan(&self) {
        if !self.scan_live.load(Ordering::Acquire) {
            return;
        }

        warn!("Clearing stale scan before starting a new one");
        self.stop_scan().await;
        tokio::time::sleep(self.config.scan_settle_delay).await;
    }

    async fn stop_advertise(&self, handle: Option<AdvertiseHandle>) {
        let _radio = self.radio.lock().await;
        match self.transport.stop_advertise(handle).await {
            Ok(()) => self.advertise_live.store(false, Ordering::Release),
            Err(e) => warn!(error = %e, "Failed to stop advertising"),
        }
    }

    /// Record the error on the session and move it to the role's Failed state
    pub(crate) async fn fail(&self, session: &ExchangeSession, error: &ProximityError, context: ErrorContext) {
        let failed = match session.role {
            ExchangeRole::Sender => SessionState::Sender(SenderState::Failed),
            ExchangeRole::Receiver => SessionState::Receiver(ReceiverState::Failed),
        };

        let _ = self.sessions.record_error(session.session_id, session.role, error).await;
        if let Err(e) = self.sessions.transition(session.session_id, failed).await {
            warn!(session_id = %session.session_id, error = %e, "Could not mark session failed");
        }

        error.log_with_context(&context.with_session_id(session.session_id).with_role(session.role));
    }
}

/// Handle to a live advertisement
#[derive(Debug)]
pub struct SenderSession {
    session_id: Uuid,
    state: watch::Receiver<SessionState>,
}

impl SenderSession {
    pub fn id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }
}

struct ActiveSender {
    session_id: Uuid,
    handle: AdvertiseHandle,
}

struct ActiveReceiver {
    session_id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Drives the sender and receiver state machines over a `ProximityTransport`
///
/// At most one session per role is live at a time. Starting a role again tears
/// the previous session of that role down first.
pub struct CredentialExchangeEngine {
    core: Arc<EngineCore>,
    sender: Mutex<Option<ActiveSender>>,
    receiver: Mutex<Option<ActiveReceiver>>,
}

impl CredentialExchangeEngine {
    pub fn new(transport: Arc<dyn ProximityTransport>, config: ExchangeConfig) -> Self {
        Self {
            core: Arc::new(EngineCore {
                transport,
                config,
                sessions: SessionManager::new(),
                init: InitGate::new(),
                radio: Mutex::new(()),
                scan_live: AtomicBool::new(false),
                advertise_live: AtomicBool::new(false),
            }),
            sender: Mutex::new(None),
            receiver: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.core.config
    }

    pub fn init_state(&self) -> InitState {
        self.core.init.state()
    }

    /// Initialize the transport ahead of the first exchange
    pub async fn initialize(&self) -> Result<()> {
        self.core.ensure_ready().await
    }

    /// Snapshot of the live session for a role
    pub async fn session(&self, role: ExchangeRole) -> Option<ExchangeSession> {
        self.core.sessions.get(role).await
    }

    /// Publish `credential` for nearby receivers to read
    ///
    /// Any previous advertisement is stopped first. Permission and radio
    /// failures move the session to Failed and are returned as-is; nothing is
    /// retried.
    pub async fn start_sending(&self, credential: &Credential) -> Result<SenderSession> {
        let mut slot = self.sender.lock().await;
        if let Some(previous) = slot.take() {
            self.teardown_sender(previous).await;
        } else if self.core.advertise_live.load(Ordering::Acquire) {
            warn!("Clearing stale advertisement before starting a new one");
            self.core.stop_advertise(None).await;
        }

        self.core.ensure_ready().await?;

        let (session, state) = self.core.sessions.begin(ExchangeRole::Sender).await;
        let session_id = session.session_id;
        self.core
            .sessions
            .transition(session_id, SessionState::Sender(SenderState::Preparing))
            .await?;

        let handle = match self.advertise(credential).await {
            Ok(handle) => handle,
            Err(e) => {
                self.core
                    .fail(&session, &e, ErrorContext::new().with_info("advertise".to_string()))
                    .await;
                return Err(e);
            }
        };

        self.core
            .sessions
            .transition(session_id, SessionState::Sender(SenderState::Advertising))
            .await?;

        info!(%session_id, device_name = %self.core.config.device_name, "Advertising credential");
        *slot = Some(ActiveSender { session_id, handle });
        Ok(SenderSession { session_id, state })
    }

    async fn advertise(&self, credential: &Credential) -> Result<AdvertiseHandle> {
        self.core.check_preconditions(ExchangeRole::Sender).await?;

        let spec = AdvertisementSpec {
            service_id: self.core.config.service_id,
            characteristic_id: self.core.config.characteristic_id,
            device_name: self.core.config.device_name.clone(),
            payload: encode_credential(credential),
        };
        self.core.advertise(&spec).await
    }

    /// Stop advertising. Always succeeds; transport errors are only logged.
    pub async fn stop_sending(&self) {
        let mut slot = self.sender.lock().await;
        match slot.take() {
            Some(active) => self.teardown_sender(active).await,
            None if self.core.advertise_live.load(Ordering::Acquire) => {
                self.core.stop_advertise(None).await;
            }
            None => debug!("stop_sending with no active advertisement"),
        }
    }

    async fn teardown_sender(&self, active: ActiveSender) {
        self.core.stop_advertise(Some(active.handle)).await;

        if let Err(e) = self
            .core
            .sessions
            .transition(active.session_id, SessionState::Sender(SenderState::Stopped))
            .await
        {
            debug!(session_id = %active.session_id, error = %e, "Sender session already gone");
        }
        info!(session_id = %active.session_id, "Stopped advertising");
    }

    /// Begin scanning for a sender and read its credential
    ///
    /// A previous receiver session is cancelled and fully torn down before the
    /// new scan starts. Permission and radio preconditions are checked up
    /// front; the outcome of the exchange is delivered once through the
    /// returned `ReceiverSession`.
    pub async fn start_receiving(&self) -> Result<ReceiverSession> {
        let mut slot = self.receiver.lock().await;
        if let Some(previous) = slot.take() {
            Self::join_receiver(previous).await;
        }
        self.core.clear_stale_scan().await;

        self.core.ensure_ready().await?;

        let (session, state) = self.core.sessions.begin(ExchangeRole::Receiver).await;
        let session_id = session.session_id;
        self.core
            .sessions
            .transition(session_id, SessionState::Receiver(ReceiverState::Preparing))
            .await?;

        if let Err(e) = self.core.check_preconditions(ExchangeRole::Receiver).await {
            self.core
                .fail(&session, &e, ErrorContext::new().with_info("preconditions".to_string()))
                .await;
            return Err(e);
        }

        let cancel = CancellationToken::new();
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let task = ReceiverTask::new(self.core.clone(), session, cancel.clone(), outcome_tx);
        let task = tokio::spawn(task.run());

        *slot = Some(ActiveReceiver {
            session_id,
            cancel: cancel.clone(),
            task,
        });

        Ok(ReceiverSession::new(session_id, state, cancel, outcome_rx))
    }

    /// Start receiving and wait for the outcome
    pub async fn receive(&self) -> Result<Credential> {
        self.start_receiving().await?.wait().await
    }

    /// Cancel the live receiver session and wait for its teardown
    ///
    /// No outcome is delivered for a cancelled session.
    pub async fn cancel_receiving(&self) {
        let mut slot = self.receiver.lock().await;
        if let Some(active) = slot.take() {
            Self::join_receiver(active).await;
        }
    }

    async fn join_receiver(active: ActiveReceiver) {
        debug!(session_id = %active.session_id, "Tearing down receiver session");
        active.cancel.cancel();
        if let Err(e) = active.task.await {
            warn!(session_id = %active.session_id, error = %e, "Receiver task ended abnormally");
        }
    }

    /// Tear down both roles, forget their sessions and release the transport
    pub async fn shutdown(&self) {
        info!("Shutting down credential exchange engine");
        self.cancel_receiving().await;
        self.stop_sending().await;

        for session in self.core.sessions.active_sessions().await {
            if let Err(e) = self.core.sessions.end(session.session_id, session.role).await {
                debug!(session_id = %session.session_id, error = %e, "Session already ended");
            }
        }
        self.core.init.reset();
    }
}
