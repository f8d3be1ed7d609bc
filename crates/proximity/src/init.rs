// Transport initialisation gate
// Explicit Uninitialized -> Initializing -> Ready state; concurrent callers queue
// behind the in-flight initialiser instead of starting their own.

use crate::{InitState, ProximityError, Result};
use std::future::Future;
use tokio::sync::watch;
use tracing::{debug, warn};

pub struct InitGate {
    state: watch::Sender<InitState>,
}

/// Puts the gate back to Uninitialized if the initialiser is dropped mid-flight
struct ResetOnDrop<'a> {
    state: &'a watch::Sender<InitState>,
    armed: bool,
}

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!("Transport initialisation abandoned, resetting");
            self.state.send_replace(InitState::Uninitialized);
        }
    }
}

impl InitGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(InitState::Uninitialized);
        Self { state }
    }

    pub fn state(&self) -> InitState {
        *self.state.borrow()
    }

    /// Run `init` unless the gate is already Ready
    ///
    /// A failed initialisation returns the gate to Uninitialized so the next
    /// caller (or a queued one) tries again.
    pub async fn ensure_ready<F, Fut>(&self, init: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut init = Some(init);
        let mut rx = self.state.subscribe();

        loop {
            let claimed = self.state.send_if_modified(|state| {
                if *state == InitState::Uninitialized {
                    *state = InitState::Initializing;
                    true
                } else {
                    false
                }
            });

            if claimed {
                let init = init.take().ok_or_else(|| {
                    ProximityError::InternalError("initialiser already consumed".to_string())
                })?;

                let mut guard = ResetOnDrop {
                    state: &self.state,
                    armed: true,
                };
                let result = init().await;
                guard.armed = false;

                let next = if result.is_ok() {
                    InitState::Ready
                } else {
                    InitState::Uninitialized
                };
                debug!(?next, "Transport initialisation finished");
                self.state.send_replace(next);
                return result;
            }

            let current = *rx.borrow_and_update();
            match current {
                InitState::Ready => return Ok(()),
                InitState::Initializing => {
                    rx.changed().await.map_err(|_| {
                        ProximityError::InternalError("initialisation gate dropped".to_string())
                    })?;
                }
                InitState::Uninitialized => continue,
            }
        }
    }

    pub fn reset(&self) {
        self.state.send_replace(InitState::Uninitialized);
    }
}

impl Default for InitGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_ready_after_success() {
        let gate = InitGate::new();
        assert_eq!(gate.state(), InitState::Uninitialized);

        gate.ensure_ready(|| async { Ok(()) }).await.unwrap();
        assert_eq!(gate.state(), InitState::Ready);

        // Already ready: initialiser is not invoked again
        gate.ensure_ready(|| async { Err(ProximityError::InternalError("ran twice".to_string())) })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failure_allows_retry() {
        let gate = InitGate::new();
        let result = gate
            .ensure_ready(|| async { Err(ProximityError::BleError("no adapter".to_string())) })
            .await;
        assert!(result.is_err());
        assert_eq!(gate.state(), InitState::Uninitialized);

        gate.ensure_ready(|| async { Ok(()) }).await.unwrap();
        assert_eq!(gate.state(), InitState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_initialisation() {
        let gate = Arc::new(InitGate::new());
        let runs = Arc::new(AtomicU32::new(0));

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let gate = gate.clone();
                let runs = runs.clone();
                tokio::spawn(async move {
                    gate.ensure_ready(|| async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(())
                    })
                    .await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(gate.state(), InitState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_initialiser_resets() {
        let gate = InitGate::new();
        let attempt = gate.ensure_ready(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });
        let _ = tokio::time::timeout(Duration::from_millis(10), attempt).await;
        assert_eq!(gate.state(), InitState::Uninitialized);
    }
}
