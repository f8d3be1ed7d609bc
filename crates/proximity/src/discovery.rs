// Discovery helpers - first-match latch and peer selection for receiver scans

use crate::PeerDescriptor;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// One-shot latch guarding the scan-to-connect cutover
///
/// Only the first qualifying sighting claims the latch; every later sighting,
/// including ones racing with the cutover, is ignored.
#[derive(Debug, Default)]
pub struct MatchLatch {
    fired: AtomicBool,
}

impl MatchLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the latch if `peer` qualifies under the matching policy
    pub fn claim(&self, peer: &PeerDescriptor, name_hint: &str) -> bool {
        if !peer.qualifies(name_hint) {
            debug!(
                peer_id = %peer.peer_id,
                name = ?peer.advertised_name,
                rssi = ?peer.signal_strength,
                "Ignoring non-matching peer"
            );
            return false;
        }

        self.fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str, name: &str, service_match: bool) -> PeerDescriptor {
        PeerDescriptor {
            peer_id: id.to_string(),
            advertised_name: Some(name.to_string()),
            signal_strength: Some(-70),
            service_match,
        }
    }

    #[test]
    fn test_non_matching_peer_leaves_latch_open() {
        let latch = MatchLatch::new();
        assert!(!latch.claim(&peer("a", "Speaker", false), "tiltpay"));
        assert!(latch.claim(&peer("b", "TiltPay-Sender", false), "tiltpay"));
    }

    #[test]
    fn test_first_match_wins() {
        let latch = MatchLatch::new();
        assert!(latch.claim(&peer("b", "TiltPay-Sender", false), "tiltpay"));
        assert!(!latch.claim(&peer("c", "other", true), "tiltpay"));
        assert!(!latch.claim(&peer("b", "TiltPay-Sender", false), "tiltpay"));
    }

    #[test]
    fn test_latch_claimed_once_across_threads() {
        let latch = std::sync::Arc::new(MatchLatch::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let latch = latch.clone();
                std::thread::spawn(move || latch.claim(&peer(&i.to_string(), "x", true), "tiltpay"))
            })
            .collect();

        let claimed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(claimed, 1);
    }
}
