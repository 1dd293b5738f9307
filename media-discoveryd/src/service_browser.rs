//! Turns discovery traffic into registry changes and server-manager updates.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use shared::probe::ReachabilityProbe;
use shared::protocol::{DEBOUNCE_MS, DEFAULT_SERVER_PORT, HEARTBEAT_MS, LOOPBACK_ADDRESS};
use shared::types::{
    AdvertisementRecord, ConnectionCandidate, ConnectionOrigin, ReachabilityState, ServerRecord,
};
use crate::config::DiscoveryConfig;
use crate::mdns::browser::TransportEvent;
use crate::netif::{has_valid_interface, NetworkInterface, NetworkInterfaces};
use crate::registry::table::UpsertOutcome;
use crate::registry_manager::RegistryHandle;
use crate::scheduler::{TimeoutHandler, TimerHandle};
use crate::server_manager::{CloudDirectory, DevicePublisher, ServerManager};

/// Transport-level reaction to network changes, run before the browser's own.
pub trait DiscoveryTransport: Send + Sync {
    fn handle_network_change(&self, interfaces: &[NetworkInterface]);
}

/// Everything outside discovery that the browser talks to
pub struct Collaborators {
    pub server_manager: Arc<dyn ServerManager>,
    pub cloud_directory: Arc<dyn CloudDirectory>,
    pub device_publisher: Arc<dyn DevicePublisher>,
    pub interfaces: Arc<dyn NetworkInterfaces>,
    pub transport: Arc<dyn DiscoveryTransport>,
    pub probe: Arc<dyn ReachabilityProbe>,
}

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub default_port: u16,
    pub debounce: Duration,
    pub heartbeat: Duration,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            default_port: DEFAULT_SERVER_PORT,
            debounce: Duration::from_millis(DEBOUNCE_MS),
            heartbeat: Duration::from_millis(HEARTBEAT_MS),
        }
    }
}

impl From<&DiscoveryConfig> for BrowserSettings {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            default_port: config.default_port,
            debounce: config.debounce(),
            heartbeat: config.heartbeat(),
        }
    }
}

pub struct ServiceBrowser {
    registry: RegistryHandle,
    collaborators: Collaborators,
    timer: TimerHandle,
    settings: BrowserSettings,
    cancel: CancellationToken,
}

impl ServiceBrowser {
    pub fn new(
        registry: RegistryHandle,
        collaborators: Collaborators,
        timer: TimerHandle,
        settings: BrowserSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            collaborators,
            timer,
            settings,
            cancel,
        }
    }

    pub async fn dispatch(&self, event: TransportEvent) {
        match event {
            TransportEvent::Arrival(record) => self.handle_arrival(record).await,
            TransportEvent::Departure(record) => self.handle_departure(record).await,
            TransportEvent::NetworkChange(interfaces) => self.handle_network_change(&interfaces).await,
        }
    }

    /// A server announced itself.
    pub async fn handle_arrival(&self, record: AdvertisementRecord) {
        let resolved = record.resolve_port_or(self.settings.default_port);
        if let Some(e) = &resolved.error {
            tracing::warn!(
                "Advertisement from {} has no usable port, using {}: {}",
                record.source_address,
                resolved.port,
                e
            );
        }
        let port = resolved.port;

        let address = record.source_address.as_str();
        if address != LOOPBACK_ADDRESS && self.collaborators.interfaces.is_local_address(address) {
            tracing::debug!("Won't add server {}, it is this machine", address);
            return;
        }

        let mut server = ServerRecord::new(record.identity.as_str(), record.declared_name.as_str());
        match record.version() {
            Some(Ok(version)) => server.version = Some(version),
            Some(Err(e)) => tracing::warn!("Ignoring version of {}: {}", record.identity, e),
            None => {}
        }

        let mut candidate = match record.host_header() {
            Some(host_header) => {
                let candidate = ConnectionCandidate::secure(
                    address,
                    host_header,
                    port,
                    ConnectionOrigin::Discovered,
                );
                tracing::debug!("Adding TLS connection {}", candidate.url());
                candidate
            }
            None => ConnectionCandidate::plain(address, port, ConnectionOrigin::Discovered),
        };

        let state = candidate
            .test_reachability(&server, self.collaborators.probe.as_ref())
            .await;
        let index = server.add_candidate(candidate);
        if state == ReachabilityState::Reachable {
            server.set_active(index);
        }

        self.collaborators
            .server_manager
            .update_from_discovery(server.clone())
            .await;

        if server.identity.is_empty() {
            return;
        }

        match self.registry.upsert(server).await {
            Ok(UpsertOutcome::Inserted) => tracing::debug!("{} arrived", address),
            Ok(_) => tracing::debug!("{} announced again", address),
            Err(e) => tracing::error!("Failed to record server from {}: {}", address, e),
        }
        self.timer.restart_timeout(self.settings.debounce);
    }

    /// A server said goodbye or timed out at the transport.
    pub async fn handle_departure(&self, record: AdvertisementRecord) {
        tracing::debug!(
            "{} departing, last seen {:.1}s ago",
            record.identity,
            record.time_since_last_seen().as_secs_f64()
        );

        match self.registry.remove_and_snapshot(record.identity).await {
            Ok((_, servers)) => {
                tracing::debug!("{} discovered servers remain", servers.len());
                self.collaborators
                    .server_manager
                    .update_from_connection_type(servers, ConnectionOrigin::Discovered)
                    .await;
            }
            Err(e) => tracing::error!("Failed to remove departed server: {}", e),
        }
        self.timer.restart_timeout(self.settings.debounce);
    }

    pub async fn handle_network_change(&self, interfaces: &[NetworkInterface]) {
        if self.cancel.is_cancelled() {
            return;
        }

        self.collaborators.transport.handle_network_change(interfaces);

        if has_valid_interface(interfaces) {
            self.collaborators.server_manager.update_reachability(true).await;
            self.collaborators.cloud_directory.refresh().await;
            self.collaborators.device_publisher.publish_device().await;
        } else {
            // No-op: nothing is reset when every interface is gone.
            tracing::info!("No usable network interface, keeping current server state");
        }

        self.timer.restart_timeout(self.settings.debounce);
    }

    /// Report the full discovered set.
    pub async fn report(&self) {
        match self.registry.snapshot().await {
            Ok(servers) => {
                tracing::debug!("Reporting {} discovered servers", servers.len());
                self.collaborators
                    .server_manager
                    .update_from_connection_type(servers, ConnectionOrigin::Discovered)
                    .await;
            }
            Err(e) => tracing::error!("Failed to snapshot registry: {}", e),
        }
    }
}

#[async_trait]
impl TimeoutHandler for ServiceBrowser {
    async fn on_timeout(&self) -> Option<Duration> {
        self.report().await;
        Some(self.settings.heartbeat)
    }
}

/// Feed transport events to the browser one at a time until cancelled.
pub async fn run(
    browser: Arc<ServiceBrowser>,
    mut rx: mpsc::Receiver<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                browser.dispatch(event).await;
            }
            _ = cancel.cancelled() => {
                tracing::info!("Service browser shutting down");
                break;
            }
        }
    }
}
