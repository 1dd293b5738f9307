//! Collaborators the browser reports to: the application-wide server
//! manager, the cloud directory and this device's own advertisement.

use std::sync::Arc;
use async_trait::async_trait;
use anyhow::Result;
use futures::future::join_all;
use tokio::sync::broadcast;
use shared::probe::ReachabilityProbe;
use shared::types::{ConnectionOrigin, ReachabilityState, ServerRecord};
use crate::registry_manager::RegistryHandle;

/// Receives everything discovery learns about servers.
#[async_trait]
pub trait ServerManager: Send + Sync {
    /// Merge one discovered or updated server.
    async fn update_from_discovery(&self, server: ServerRecord);

    /// Replace every server of `origin` with `servers`.
    async fn update_from_connection_type(&self, servers: Vec<ServerRecord>, origin: ConnectionOrigin);

    /// Re-test all known servers. With `force` unset only untested
    /// candidates are probed.
    async fn update_reachability(&self, force: bool);
}

#[async_trait]
pub trait CloudDirectory: Send + Sync {
    async fn refresh(&self);
}

#[async_trait]
pub trait DevicePublisher: Send + Sync {
    async fn publish_device(&self);
}

/// What downstream consumers see.
#[derive(Debug, Clone)]
pub enum ServerUpdate {
    Discovered(ServerRecord),
    Replaced {
        origin: ConnectionOrigin,
        servers: Vec<ServerRecord>,
    },
    ReachabilityChecked(Vec<ServerRecord>),
}

/// Server manager that fans updates out on a broadcast channel and runs
/// reachability sweeps against the registry.
pub struct BroadcastServerManager {
    registry: RegistryHandle,
    probe: Arc<dyn ReachabilityProbe>,
    tx: broadcast::Sender<ServerUpdate>,
}

impl BroadcastServerManager {
    pub fn new(registry: RegistryHandle, probe: Arc<dyn ReachabilityProbe>, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { registry, probe, tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerUpdate> {
        self.tx.subscribe()
    }

    fn send(&self, update: ServerUpdate) {
        // No subscribers is fine
        let _ = self.tx.send(update);
    }
}

#[async_trait]
impl ServerManager for BroadcastServerManager {
    async fn update_from_discovery(&self, server: ServerRecord) {
        self.send(ServerUpdate::Discovered(server));
    }

    async fn update_from_connection_type(&self, servers: Vec<ServerRecord>, origin: ConnectionOrigin) {
        self.send(ServerUpdate::Replaced { origin, servers });
    }

    async fn update_reachability(&self, force: bool) {
        let registry = self.registry.clone();
        let probe = Arc::clone(&self.probe);
        let tx = self.tx.clone();

        // Probing can take a full timeout per candidate; keep it off the
        // discovery context.
        tokio::spawn(async move {
            match recheck_reachability(&registry, probe.as_ref(), force).await {
                Ok(servers) => {
                    let _ = tx.send(ServerUpdate::ReachabilityChecked(servers));
                }
                Err(e) => tracing::error!("Reachability sweep failed: {}", e),
            }
        });
    }
}

/// Probe every candidate of every registered server, outside the registry,
/// then write the results back. Returns the registry afterwards.
pub async fn recheck_reachability(
    registry: &RegistryHandle,
    probe: &dyn ReachabilityProbe,
    force: bool,
) -> Result<Vec<ServerRecord>> {
    let servers = registry.snapshot().await?;

    let sweeps = servers.iter().map(move |server| async move {
        let pending = server
            .candidates()
            .iter()
            .filter(|c| force || c.state() == ReachabilityState::Unknown)
            .cloned()
            .map(move |mut candidate| async move {
                candidate.test_reachability(server, probe).await;
                candidate
            });
        (server.identity.clone(), join_all(pending).await)
    });

    let results = join_all(sweeps).await;
    let mut probed = 0usize;

    for (identity, tested) in results {
        if tested.is_empty() {
            continue;
        }
        probed += tested.len();
        if !registry.apply_probe(identity.clone(), tested).await? {
            tracing::debug!("Server {} left during reachability sweep", identity);
        }
    }

    tracing::debug!("Reachability sweep probed {} candidates", probed);
    registry.snapshot().await
}

/// Cloud directory stand-in used when no account is configured.
pub struct DisabledCloudDirectory;

#[async_trait]
impl CloudDirectory for DisabledCloudDirectory {
    async fn refresh(&self) {
        tracing::debug!("No cloud directory configured, skipping refresh");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::probe::ProbeError;
    use shared::types::ConnectionCandidate;
    use tokio::sync::{watch, Notify};

    /// Reachable only for hosts in the list
    struct HostProbe(Vec<&'static str>);

    #[async_trait]
    impl ReachabilityProbe for HostProbe {
        async fn probe(
            &self,
            candidate: &ConnectionCandidate,
            _owner: &ServerRecord,
        ) -> Result<(), ProbeError> {
            if self.0.iter().any(|h| *h == candidate.host()) {
                Ok(())
            } else {
                Err(ProbeError::Transport("refused".into()))
            }
        }
    }

    /// Holds every test open until released, then reports unreachable
    #[derive(Default)]
    struct HeldProbe {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ReachabilityProbe for HeldProbe {
        async fn probe(
            &self,
            _candidate: &ConnectionCandidate,
            _owner: &ServerRecord,
        ) -> Result<(), ProbeError> {
            self.entered.notify_one();
            self.release.notified().await;
            Err(ProbeError::Transport("timed out".into()))
        }
    }

    fn server(identity: &str, hosts: &[&str]) -> ServerRecord {
        let mut record = ServerRecord::new(identity, "Server");
        for host in hosts {
            record.add_candidate(ConnectionCandidate::plain(*host, 32400, ConnectionOrigin::Discovered));
        }
        record
    }

    #[tokio::test]
    async fn test_recheck_marks_candidates() {
        let (hash_tx, _hash_rx) = watch::channel(String::new());
        let registry = RegistryHandle::spawn(hash_tx);
        registry.upsert(server("srv1", &["10.0.0.1", "10.0.0.2"])).await.unwrap();
        registry.upsert(server("srv2", &["10.0.0.3"])).await.unwrap();

        let probe = HostProbe(vec!["10.0.0.2"]);
        let servers = recheck_reachability(&registry, &probe, true).await.unwrap();

        let srv1 = &servers[0];
        assert_eq!(srv1.candidates()[0].state(), ReachabilityState::Unreachable);
        assert_eq!(srv1.candidates()[1].state(), ReachabilityState::Reachable);
        assert_eq!(srv1.active_candidate().unwrap().host(), "10.0.0.2");

        let srv2 = &servers[1];
        assert_eq!(srv2.candidates()[0].state(), ReachabilityState::Unreachable);
        assert!(srv2.active_candidate().is_none());
    }

    #[tokio::test]
    async fn test_unforced_recheck_skips_tested_candidates() {
        let (hash_tx, _hash_rx) = watch::channel(String::new());
        let registry = RegistryHandle::spawn(hash_tx);
        registry.upsert(server("srv1", &["10.0.0.1"])).await.unwrap();

        recheck_reachability(&registry, &HostProbe(vec![]), true).await.unwrap();

        // would flip to reachable if it were probed again
        let servers = recheck_reachability(&registry, &HostProbe(vec!["10.0.0.1"]), false)
            .await
            .unwrap();
        assert_eq!(servers[0].candidates()[0].state(), ReachabilityState::Unreachable);
    }

    #[tokio::test]
    async fn test_broadcasts_updates() {
        let (hash_tx, _hash_rx) = watch::channel(String::new());
        let registry = RegistryHandle::spawn(hash_tx);
        let manager = BroadcastServerManager::new(registry, Arc::new(HostProbe(vec![])), 16);
        let mut rx = manager.subscribe();

        manager.update_from_discovery(server("srv1", &["10.0.0.1"])).await;
        manager
            .update_from_connection_type(vec![], ConnectionOrigin::Discovered)
            .await;

        assert!(matches!(rx.recv().await.unwrap(), ServerUpdate::Discovered(s) if s.identity == "srv1"));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerUpdate::Replaced { origin: ConnectionOrigin::Discovered, servers } if servers.is_empty()
        ));

        manager.update_reachability(true).await;
        assert!(matches!(rx.recv().await.unwrap(), ServerUpdate::ReachabilityChecked(_)));
    }

    #[tokio::test]
    async fn test_slow_sweep_does_not_override_newer_arrival() {
        let (hash_tx, _hash_rx) = watch::channel(String::new());
        let registry = RegistryHandle::spawn(hash_tx);
        registry.upsert(server("srv1", &["10.0.0.1"])).await.unwrap();

        let held = Arc::new(HeldProbe::default());
        let sweep = tokio::spawn({
            let registry = registry.clone();
            let held = held.clone();
            async move { recheck_reachability(&registry, held.as_ref(), true).await }
        });
        held.entered.notified().await;

        // the same endpoint re-arrives and tests reachable while the sweep waits
        let mut arrival = server("srv1", &[]);
        let mut candidate = ConnectionCandidate::plain("10.0.0.1", 32400, ConnectionOrigin::Discovered);
        candidate.test_reachability(&arrival, &HostProbe(vec!["10.0.0.1"])).await;
        let idx = arrival.add_candidate(candidate);
        assert!(arrival.set_active(idx));
        registry.upsert(arrival).await.unwrap();

        held.release.notify_one();
        let servers = sweep.await.unwrap().unwrap();

        let active = servers[0].active_candidate().unwrap();
        assert_eq!(active.host(), "10.0.0.1");
        assert_eq!(active.state(), ReachabilityState::Reachable);
    }
}
