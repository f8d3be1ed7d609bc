use proximity::{
    ExchangeRole, ProximityError, ReceiverState, SenderState, SessionManager, SessionState,
};
use std::time::Duration;
use uuid::Uuid;

fn receiver(state: ReceiverState) -> SessionState {
    SessionState::Receiver(state)
}

#[tokio::test]
async fn test_begin_session_starts_idle() {
    let manager = SessionManager::new();

    let (session, state) = manager.begin(ExchangeRole::Receiver).await;

    assert_eq!(session.role, ExchangeRole::Receiver);
    assert_eq!(session.state, receiver(ReceiverState::Idle));
    assert_eq!(*state.borrow(), receiver(ReceiverState::Idle));
    assert!(session.deadline.is_none());
    assert!(session.last_error.is_none());
}

#[tokio::test]
async fn test_transitions_are_published() {
    let manager = SessionManager::new();
    let (session, mut state) = manager.begin(ExchangeRole::Receiver).await;

    manager
        .transition(session.session_id, receiver(ReceiverState::Preparing))
        .await
        .unwrap();
    manager
        .transition(session.session_id, receiver(ReceiverState::Scanning))
        .await
        .unwrap();

    assert!(state.has_changed().unwrap());
    assert_eq!(*state.borrow_and_update(), receiver(ReceiverState::Scanning));

    let stored = manager.get_session(session.session_id).await.unwrap();
    assert_eq!(stored.state, receiver(ReceiverState::Scanning));
}

#[tokio::test]
async fn test_invalid_transition_rejected() {
    let manager = SessionManager::new();
    let (session, _state) = manager.begin(ExchangeRole::Receiver).await;

    let result = manager
        .transition(session.session_id, receiver(ReceiverState::Reading))
        .await;

    match result {
        Err(ProximityError::InvalidStateTransition { from, to }) => {
            assert_eq!(from, "Receiver::Idle");
            assert_eq!(to, "Receiver::Reading");
        }
        other => panic!("expected invalid transition, got {:?}", other),
    }
}

#[tokio::test]
async fn test_terminal_states_are_final() {
    let manager = SessionManager::new();
    let (session, _state) = manager.begin(ExchangeRole::Sender).await;
    let id = session.session_id;

    manager
        .transition(id, SessionState::Sender(SenderState::Preparing))
        .await
        .unwrap();
    manager
        .transition(id, SessionState::Sender(SenderState::Failed))
        .await
        .unwrap();

    assert!(manager
        .transition(id, SessionState::Sender(SenderState::Advertising))
        .await
        .is_err());
    assert!(manager.get(ExchangeRole::Sender).await.unwrap().state.is_terminal());
}

#[tokio::test]
async fn test_same_state_transition_is_noop() {
    let manager = SessionManager::new();
    let (session, state) = manager.begin(ExchangeRole::Sender).await;

    manager
        .transition(session.session_id, SessionState::Sender(SenderState::Idle))
        .await
        .unwrap();
    assert!(!state.has_changed().unwrap());
}

#[tokio::test]
async fn test_new_session_replaces_old_for_role() {
    let manager = SessionManager::new();
    let (old, _) = manager.begin(ExchangeRole::Receiver).await;
    let (new, _) = manager.begin(ExchangeRole::Receiver).await;

    let result = manager
        .transition(old.session_id, receiver(ReceiverState::Preparing))
        .await;
    assert!(matches!(result, Err(ProximityError::SessionNotFound(id)) if id == old.session_id));

    assert_eq!(
        manager.get(ExchangeRole::Receiver).await.unwrap().session_id,
        new.session_id
    );
}

#[tokio::test]
async fn test_roles_are_independent() {
    let manager = SessionManager::new();
    manager.begin(ExchangeRole::Sender).await;
    manager.begin(ExchangeRole::Receiver).await;

    assert_eq!(manager.active_sessions().await.len(), 2);
}

#[tokio::test]
async fn test_deadline_and_error_recording() {
    let manager = SessionManager::new();
    let (session, _) = manager.begin(ExchangeRole::Receiver).await;
    let id = session.session_id;

    manager
        .set_deadline(id, ExchangeRole::Receiver, Duration::from_secs(30))
        .await
        .unwrap();
    let armed = manager.get_session(id).await.unwrap();
    let remaining = armed.deadline.unwrap() - armed.started_at;
    assert!((remaining.num_seconds() - 30).abs() <= 1);

    manager.clear_deadline(id, ExchangeRole::Receiver).await.unwrap();
    manager
        .record_error(id, ExchangeRole::Receiver, &ProximityError::DiscoveryTimeout(Duration::from_secs(30)))
        .await
        .unwrap();

    let stored = manager.get_session(id).await.unwrap();
    assert!(stored.deadline.is_none());
    assert!(stored.last_error.unwrap().contains("30s"));
}

#[tokio::test]
async fn test_end_session() {
    let manager = SessionManager::new();
    let (session, _) = manager.begin(ExchangeRole::Sender).await;

    manager.end(session.session_id, ExchangeRole::Sender).await.unwrap();
    assert!(manager.get(ExchangeRole::Sender).await.is_none());

    let missing = Uuid::new_v4();
    assert!(matches!(
        manager.end(missing, ExchangeRole::Sender).await,
        Err(ProximityError::SessionNotFound(_))
    ));
}
