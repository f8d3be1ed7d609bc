use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a peer as reported by the radio stack
pub type PeerId = String;

/// Which side of the exchange a session plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExchangeRole {
    Sender,
    Receiver,
}

impl std::fmt::Display for ExchangeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeRole::Sender => write!(f, "Sender"),
            ExchangeRole::Receiver => write!(f, "Receiver"),
        }
    }
}

/// A single sighting produced by a transport scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerDescriptor {
    pub peer_id: PeerId,
    pub advertised_name: Option<String>,
    pub signal_strength: Option<i16>,
    /// Whether the advertised service list contained our service id
    pub service_match: bool,
}

impl PeerDescriptor {
    /// Matching policy: service id match OR the advertised name contains the hint.
    ///
    /// Both checks are required; some platforms do not surface service UUIDs
    /// before a connection is made.
    pub fn qualifies(&self, name_hint: &str) -> bool {
        if self.service_match {
            return true;
        }

        let hint = name_hint.trim().to_lowercase();
        if hint.is_empty() {
            return false;
        }

        self.advertised_name
            .as_deref()
            .map(|name| name.to_lowercase().contains(&hint))
            .unwrap_or(false)
    }
}

/// Events delivered by a scan stream
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Discovered(PeerDescriptor),
    Lost(PeerId),
    /// The radio stack reported a scan failure
    Error(String),
}

/// Opaque handle for an active advertisement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdvertiseHandle(pub Uuid);

impl AdvertiseHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AdvertiseHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Power/authorization state of the local radio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterState {
    PoweredOn,
    PoweredOff,
    Unauthorized,
    Unsupported,
    Unknown,
}

/// Transport initialisation progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    Initializing,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SenderState {
    Idle,
    Preparing,
    Advertising,
    Stopped,
    Failed,
}

impl SenderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SenderState::Stopped | SenderState::Failed)
    }

    pub fn can_transition_to(&self, next: SenderState) -> bool {
        use SenderState::*;
        matches!(
            (self, next),
            (Idle, Preparing)
                | (Preparing, Advertising)
                | (Preparing, Failed)
                | (Preparing, Stopped)
                | (Advertising, Stopped)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiverState {
    Idle,
    Preparing,
    Scanning,
    Connecting,
    Reading,
    Succeeded,
    Failed,
}

impl ReceiverState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReceiverState::Succeeded | ReceiverState::Failed)
    }

    pub fn can_transition_to(&self, next: ReceiverState) -> bool {
        use ReceiverState::*;
        match (self, next) {
            (Idle, Preparing)
            | (Preparing, Scanning)
            | (Scanning, Connecting)
            | (Connecting, Reading)
            | (Reading, Succeeded) => true,
            // Any live state may fail or be cancelled back to Idle
            (Preparing | Scanning | Connecting | Reading, Failed | Idle) => true,
            _ => false,
        }
    }
}

/// State of an exchange session, per role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "state")]
pub enum SessionState {
    Sender(SenderState),
    Receiver(ReceiverState),
}

impl SessionState {
    pub fn role(&self) -> ExchangeRole {
        match self {
            SessionState::Sender(_) => ExchangeRole::Sender,
            SessionState::Receiver(_) => ExchangeRole::Receiver,
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            SessionState::Sender(s) => s.is_terminal(),
            SessionState::Receiver(s) => s.is_terminal(),
        }
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        match (self, next) {
            (SessionState::Sender(a), SessionState::Sender(b)) => a.can_transition_to(b),
            (SessionState::Receiver(a), SessionState::Receiver(b)) => a.can_transition_to(b),
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Sender(s) => write!(f, "Sender::{:?}", s),
            SessionState::Receiver(s) => write!(f, "Receiver::{:?}", s),
        }
    }
}

/// Per-attempt exchange state, owned by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSession {
    pub session_id: Uuid,
    pub role: ExchangeRole,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    /// Discovery deadline; senders have none
    pub deadline: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}
