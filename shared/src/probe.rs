use std::sync::atomic::{AtomicU64, Ordering};
use async_trait::async_trait;
use crate::types::{ConnectionCandidate, ReachabilityState, ServerRecord};

/// Why a probe classified a candidate as unreachable.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("expected server {expected}, found {found}")]
    IdentityMismatch { expected: String, found: String },

    #[error("invalid identity response: {0}")]
    InvalidResponse(String),
}

/// A bounded network round-trip to one candidate.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn probe(
        &self,
        candidate: &ConnectionCandidate,
        owner: &ServerRecord,
    ) -> Result<(), ProbeError>;
}

/// Tests are numbered when they start, so a slow result can be told apart
/// from one that began later.
static TEST_SEQUENCE: AtomicU64 = AtomicU64::new(1);

impl ConnectionCandidate {
    /// Probe this candidate and record the binary outcome. Only this
    /// candidate is touched; promoting it to active is up to the caller.
    pub async fn test_reachability(
        &mut self,
        owner: &ServerRecord,
        probe: &dyn ReachabilityProbe,
    ) -> ReachabilityState {
        let seq = TEST_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        self.state = match probe.probe(self, owner).await {
            Ok(()) => ReachabilityState::Reachable,
            Err(_) => ReachabilityState::Unreachable,
        };
        self.tested_seq = seq;
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConnectionOrigin;

    struct FixedProbe(bool);

    #[async_trait]
    impl ReachabilityProbe for FixedProbe {
        async fn probe(
            &self,
            _candidate: &ConnectionCandidate,
            _owner: &ServerRecord,
        ) -> Result<(), ProbeError> {
            if self.0 {
                Ok(())
            } else {
                Err(ProbeError::Status(503))
            }
        }
    }

    #[tokio::test]
    async fn test_reachability_is_recorded() {
        let owner = ServerRecord::new("srv1", "Server");
        let mut c = ConnectionCandidate::plain("10.0.0.2", 32400, ConnectionOrigin::Discovered);

        assert_eq!(
            c.test_reachability(&owner, &FixedProbe(true)).await,
            ReachabilityState::Reachable
        );
        assert!(c.is_reachable());

        assert_eq!(
            c.test_reachability(&owner, &FixedProbe(false)).await,
            ReachabilityState::Unreachable
        );
        assert_eq!(c.state(), ReachabilityState::Unreachable);
    }

    #[tokio::test]
    async fn test_later_tests_are_ordered_after_earlier_ones() {
        let owner = ServerRecord::new("srv1", "Server");
        let mut first = ConnectionCandidate::plain("10.0.0.2", 32400, ConnectionOrigin::Discovered);
        let mut second = first.clone();
        assert_eq!(first.tested_seq, 0);

        first.test_reachability(&owner, &FixedProbe(true)).await;
        second.test_reachability(&owner, &FixedProbe(false)).await;
        assert!(first.tested_seq > 0);
        assert!(second.tested_seq > first.tested_seq);
    }
}
