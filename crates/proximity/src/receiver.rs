// Receiver session: scan -> first match -> connect -> read -> close

use crate::credential::decode_credential;
use crate::discovery::MatchLatch;
use crate::engine::EngineCore;
use crate::transport::{Channel, ScanFilter};
use crate::{
    Credential, ErrorContext, ExchangeSession, PeerDescriptor, ProximityError, ReceiverState, Result, ScanEvent,
    SessionState,
};
use futures::stream::StreamExt;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Caller's view of a running receiver session
///
/// The outcome is delivered exactly once. A cancelled session never delivers
/// one; `wait` then yields `ProximityError::Cancelled`.
#[derive(Debug)]
pub struct ReceiverSession {
    session_id: Uuid,
    state: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    outcome: oneshot::Receiver<Result<Credential>>,
}

impl ReceiverSession {
    pub(crate) fn new(
        session_id: Uuid,
        state: watch::Receiver<SessionState>,
        cancel: CancellationToken,
        outcome: oneshot::Receiver<Result<Credential>>,
    ) -> Self {
        Self {
            session_id,
            state,
            cancel,
            outcome,
        }
    }

    pub fn id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Request cancellation; teardown completes in the background
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn wait(self) -> Result<Credential> {
        self.outcome.await.unwrap_or(Err(ProximityError::Cancelled))
    }
}

/// Error that ended a receiver session, with where it happened
struct Failure {
    error: ProximityError,
    context: ErrorContext,
}

impl Failure {
    fn new(error: ProximityError, stage: &str) -> Self {
        Self {
            error,
            context: ErrorContext::new().with_info(stage.to_string()),
        }
    }

    fn at_peer(error: ProximityError, stage: &str, peer: &PeerDescriptor) -> Self {
        let mut failure = Self::new(error, stage);
        failure.context = failure.context.with_peer_id(peer.peer_id.clone());
        failure
    }
}

/// Background task driving one receiver session
pub(crate) struct ReceiverTask {
    core: Arc<EngineCore>,
    session: ExchangeSession,
    cancel: CancellationToken,
    outcome: oneshot::Sender<Result<Credential>>,
}

impl ReceiverTask {
    pub(crate) fn new(
        core: Arc<EngineCore>,
        session: ExchangeSession,
        cancel: CancellationToken,
        outcome: oneshot::Sender<Result<Credential>>,
    ) -> Self {
        Self {
            core,
            session,
            cancel,
            outcome,
        }
    }

    pub(crate) async fn run(self) {
        let session_id = self.session.session_id;
        let result = self.drive().await;

        if self.cancel.is_cancelled() {
            // Cancellation wins over any result computed concurrently
            self.enter(ReceiverState::Idle).await;
            info!(%session_id, "Receiver session cancelled");
            return;
        }

        match result {
            Ok(Some(credential)) => {
                self.enter(ReceiverState::Succeeded).await;
                if self.cancel.is_cancelled() {
                    info!(%session_id, "Receiver session cancelled after read, credential discarded");
                    return;
                }
                info!(%session_id, "Credential received");
                let _ = self.outcome.send(Ok(credential));
            }
            Ok(None) => {
                self.enter(ReceiverState::Idle).await;
            }
            Err(Failure { error, context }) => {
                self.core.fail(&self.session, &error, context).await;
                if self.cancel.is_cancelled() {
                    return;
                }
                let _ = self.outcome.send(Err(error));
            }
        }
    }

    async fn enter(&self, state: ReceiverState) {
        if let Err(e) = self
            .core
            .sessions
            .transition(self.session.session_id, SessionState::Receiver(state))
            .await
        {
            warn!(session_id = %self.session.session_id, error = %e, "Receiver state update rejected");
        }
    }

    /// Ok(None) means the session was cancelled and has already released the radio
    async fn drive(&self) -> std::result::Result<Option<Credential>, Failure> {
        let peer = match self.discover().await.map_err(|e| Failure::new(e, "discovery"))? {
            Some(peer) => peer,
            None => return Ok(None),
        };

        self.enter(ReceiverState::Connecting).await;
        let mut channel = match self
            .connect(&peer)
            .await
            .map_err(|e| Failure::at_peer(e, "connect", &peer))?
        {
            Some(channel) => channel,
            None => return Ok(None),
        };

        self.enter(ReceiverState::Reading).await;
        let characteristic_id = self.core.config.characteristic_id;
        let read = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            read = self.core.read_value(&mut channel, characteristic_id) => Some(read),
        };

        let decoded = read.map(|bytes| bytes.and_then(|bytes| decode_credential(&bytes)));
        self.core.close(channel).await;

        match decoded {
            None => Ok(None),
            Some(Ok(credential)) => Ok(Some(credential)),
            Some(Err(e @ ProximityError::ReadError(_))) => Err(Failure::at_peer(e, "read", &peer)),
            Some(Err(e)) => Err(Failure::at_peer(
                ProximityError::ReadError(e.to_string()),
                "read",
                &peer,
            )),
        }
    }

    /// Scan until the first qualifying sighting; the scan is stopped on every exit path
    async fn discover(&self) -> Result<Option<PeerDescriptor>> {
        let config = &self.core.config;
        let session_id = self.session.session_id;
        let role = self.session.role;
        let filter = ScanFilter {
            service_id: config.service_id,
            name_hint: config.name_hint.clone(),
        };

        let started = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            started = self.core.scan(&filter) => Some(started),
        };
        let mut events = match started {
            None => return Ok(None),
            Some(Ok(events)) => events,
            Some(Err(e)) => {
                self.core.stop_scan().await;
                return Err(match e {
                    ProximityError::PermissionDenied(_) | ProximityError::TransportUnavailable(_) => e,
                    other => ProximityError::TransportUnavailable(other.to_string()),
                });
            }
        };

        self.enter(ReceiverState::Scanning).await;
        let _ = self
            .core
            .sessions
            .set_deadline(session_id, role, config.discovery_timeout)
            .await;
        info!(%session_id, timeout = ?config.discovery_timeout, "Scanning for sender");

        let deadline = tokio::time::sleep(config.discovery_timeout);
        tokio::pin!(deadline);
        let latch = MatchLatch::new();

        let outcome = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break Ok(None),
                _ = &mut deadline => break Err(ProximityError::DiscoveryTimeout(config.discovery_timeout)),
                event = events.next() => match event {
                    Some(ScanEvent::Discovered(peer)) => {
                        if latch.claim(&peer, &config.name_hint) {
                            info!(
                                %session_id,
                                peer_id = %peer.peer_id,
                                name = ?peer.advertised_name,
                                rssi = ?peer.signal_strength,
                                "Matched sender"
                            );
                            break Ok(Some(peer));
                        }
                    }
                    Some(ScanEvent::Lost(peer_id)) => debug!(%session_id, %peer_id, "Peer lost"),
                    Some(ScanEvent::Error(reason)) => break Err(ProximityError::TransportUnavailable(reason)),
                    None => {
                        break Err(ProximityError::TransportUnavailable(
                            "scan ended before a sender was found".to_string(),
                        ))
                    }
                },
            }
        };

        // Later sightings are never looked at
        drop(events);
        let _ = self.core.sessions.clear_deadline(session_id, role).await;
        self.core.stop_scan().await;
        outcome
    }

    async fn connect(&self, peer: &PeerDescriptor) -> Result<Option<Box<dyn Channel>>> {
        let timeout = self.core.config.connect_timeout;
        info!(session_id = %self.session.session_id, peer_id = %peer.peer_id, "Connecting to sender");

        let attempt = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            attempt = tokio::time::timeout(timeout, self.core.connect(peer, timeout)) => Some(attempt),
        };

        match attempt {
            None => Ok(None),
            Some(Ok(Ok(channel))) => Ok(Some(channel)),
            Some(Ok(Err(e))) => Err(ProximityError::connection_failed(&peer.peer_id, e)),
            Some(Err(_)) => Err(ProximityError::connection_failed(
                &peer.peer_id,
                ProximityError::ConnectTimeout(timeout),
            )),
        }
    }
}
