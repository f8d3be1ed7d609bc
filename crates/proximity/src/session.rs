// Session Manager - tracks the single live exchange session of each role

use crate::{ExchangeRole, ExchangeSession, ProximityError, Result, SessionState};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::debug;
use uuid::Uuid;

struct SessionEntry {
    session: ExchangeSession,
    state_tx: watch::Sender<SessionState>,
}

/// Registry holding at most one session per role
///
/// Beginning a session for a role replaces whatever was registered for it;
/// callers are responsible for tearing the previous one down first.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<ExchangeRole, SessionEntry>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a fresh session in the role's Idle state
    pub async fn begin(&self, role: ExchangeRole) -> (ExchangeSession, watch::Receiver<SessionState>) {
        let initial = match role {
            ExchangeRole::Sender => SessionState::Sender(crate::SenderState::Idle),
            ExchangeRole::Receiver => SessionState::Receiver(crate::ReceiverState::Idle),
        };

        let session = ExchangeSession {
            session_id: Uuid::new_v4(),
            role,
            state: initial,
            started_at: Utc::now(),
            deadline: None,
            last_error: None,
        };

        let (state_tx, state_rx) = watch::channel(initial);
        let mut sessions = self.sessions.write().await;
        if let Some(previous) = sessions.insert(
            role,
            SessionEntry {
                session: session.clone(),
                state_tx,
            },
        ) {
            debug!(
                previous_session = %previous.session.session_id,
                %role,
                "Replacing previous exchange session"
            );
        }

        (session, state_rx)
    }

    /// Move a session to its next state, rejecting transitions the role's machine forbids
    pub async fn transition(&self, session_id: Uuid, next: SessionState) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let entry = Self::entry_mut(&mut sessions, next.role(), session_id)?;

        let current = entry.session.state;
        if current == next {
            return Ok(());
        }
        if !current.can_transition_to(next) {
            return Err(ProximityError::InvalidStateTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }

        debug!(%session_id, from = %current, to = %next, "Exchange state transition");
        entry.session.state = next;
        entry.state_tx.send_replace(next);
        Ok(())
    }

    /// Record the error that ended (or is ending) a session
    pub async fn record_error(&self, session_id: Uuid, role: ExchangeRole, error: &ProximityError) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let entry = Self::entry_mut(&mut sessions, role, session_id)?;
        entry.session.last_error = Some(error.to_string());
        Ok(())
    }

    /// Arm the session deadline relative to now
    pub async fn set_deadline(&self, session_id: Uuid, role: ExchangeRole, after: Duration) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let entry = Self::entry_mut(&mut sessions, role, session_id)?;
        let after = chrono::Duration::from_std(after)
            .map_err(|e| ProximityError::InternalError(format!("Invalid deadline: {}", e)))?;
        entry.session.deadline = Some(Utc::now() + after);
        Ok(())
    }

    pub async fn clear_deadline(&self, session_id: Uuid, role: ExchangeRole) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let entry = Self::entry_mut(&mut sessions, role, session_id)?;
        entry.session.deadline = None;
        Ok(())
    }

    /// Remove a session if it is still the registered one for its role
    pub async fn end(&self, session_id: Uuid, role: ExchangeRole) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        Self::entry_mut(&mut sessions, role, session_id)?;
        sessions.remove(&role);
        Ok(())
    }

    pub async fn get(&self, role: ExchangeRole) -> Option<ExchangeSession> {
        self.sessions
            .read()
            .await
            .get(&role)
            .map(|entry| entry.session.clone())
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<ExchangeSession> {
        self.sessions
            .read()
            .await
            .values()
            .find(|entry| entry.session.session_id == session_id)
            .map(|entry| entry.session.clone())
            .ok_or(ProximityError::SessionNotFound(session_id))
    }

    pub async fn active_sessions(&self) -> Vec<ExchangeSession> {
        self.sessions
            .read()
            .await
            .values()
            .map(|entry| entry.session.clone())
            .collect()
    }

    fn entry_mut(
        sessions: &mut HashMap<ExchangeRole, SessionEntry>,
        role: ExchangeRole,
        session_id: Uuid,
    ) -> Result<&mut SessionEntry> {
        sessions
            .get_mut(&role)
            .filter(|entry| entry.session.session_id == session_id)
            .ok_or(ProximityError::SessionNotFound(session_id))
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
