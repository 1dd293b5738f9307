use std::collections::HashMap;
use std::net::IpAddr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use anyhow::{Context, Result};
use shared::protocol::{PARAM_NAME, PARAM_PORT, PARAM_RESOURCE_IDENTIFIER};
use shared::types::AdvertisementRecord;
use crate::netif::NetworkInterface;
use crate::service_browser::DiscoveryTransport;

/// Everything the transport layer hands to the service browser
#[derive(Debug)]
pub enum TransportEvent {
    Arrival(AdvertisementRecord),
    Departure(AdvertisementRecord),
    NetworkChange(Vec<NetworkInterface>),
}

/// Browse `service_type` and forward arrivals and departures until cancelled.
pub async fn run_browser(
    daemon: ServiceDaemon,
    service_type: String,
    tx: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
) -> Result<()> {
    tracing::info!("Starting mDNS browser for {}", service_type);

    let receiver = daemon
        .browse(&service_type)
        .with_context(|| format!("Failed to browse {}", service_type))?;

    forward_events(receiver, tx, cancel).await;
    Ok(())
}

async fn forward_events(
    receiver: flume::Receiver<ServiceEvent>,
    tx: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
) {
    // Removals only carry the fullname, so remember what each name last announced.
    let mut seen: HashMap<String, AdvertisementRecord> = HashMap::new();

    loop {
        tokio::select! {
            event = receiver.recv_async() => {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::warn!("mDNS receiver disconnected: {}", e);
                        break;
                    }
                };

                let forward = match event {
                    ServiceEvent::ServiceResolved(info) => {
                        match convert_service_info(&info) {
                            Some(record) => {
                                tracing::debug!("Resolved server: {}", info.get_fullname());
                                seen.insert(info.get_fullname().to_string(), record.clone());
                                Some(TransportEvent::Arrival(record))
                            }
                            None => None,
                        }
                    }
                    ServiceEvent::ServiceRemoved(_typ, fullname) => {
                        match seen.remove(&fullname) {
                            Some(record) => {
                                tracing::debug!("Server removed: {}", fullname);
                                Some(TransportEvent::Departure(record))
                            }
                            None => {
                                tracing::debug!("Ignoring removal of unknown {}", fullname);
                                None
                            }
                        }
                    }
                    _ => None,
                };

                if let Some(event) = forward {
                    if let Err(e) = tx.send(event).await {
                        tracing::error!("Failed to forward transport event: {}", e);
                        break;
                    }
                }
            }

            _ = cancel.cancelled() => {
                tracing::info!("mDNS browser shutting down");
                break;
            }
        }
    }
}

/// Prefer IPv4; sets have no order, so take the smallest for stable results.
fn pick_address(info: &ServiceInfo) -> Option<IpAddr> {
    let addresses = info.get_addresses();
    addresses
        .iter()
        .filter(|addr| addr.is_ipv4())
        .min()
        .or_else(|| addresses.iter().min())
        .copied()
}

/// Convert an mdns-sd ServiceInfo to an AdvertisementRecord
fn convert_service_info(info: &ServiceInfo) -> Option<AdvertisementRecord> {
    let Some(address) = pick_address(info) else {
        tracing::debug!("Skipping service {} - no addresses", info.get_fullname());
        return None;
    };

    let mut params: HashMap<String, String> = info
        .get_properties()
        .iter()
        .map(|prop| (prop.key().to_string(), prop.val_str().to_string()))
        .collect();

    params
        .entry(PARAM_PORT.to_string())
        .or_insert_with(|| info.get_port().to_string());

    let identity = params
        .get(PARAM_RESOURCE_IDENTIFIER)
        .filter(|id| !id.is_empty())
        .cloned()
        .unwrap_or_else(|| info.get_fullname().to_string());

    let name = params
        .get(PARAM_NAME)
        .filter(|name| !name.is_empty())
        .cloned()
        .unwrap_or_else(|| info.get_hostname().trim_end_matches('.').trim_end_matches(".local").to_string());

    Some(AdvertisementRecord::new(identity, name, address.to_string(), params))
}

/// Transport-side reaction to interface changes
pub struct MdnsTransport {
    daemon: ServiceDaemon,
    interface: Option<String>,
}

impl MdnsTransport {
    pub fn new(daemon: ServiceDaemon, interface: Option<String>) -> Self {
        Self { daemon, interface }
    }
}

impl DiscoveryTransport for MdnsTransport {
    fn handle_network_change(&self, interfaces: &[NetworkInterface]) {
        // The daemon follows interfaces on its own; a pinned interface may
        // have been recreated and needs enabling again.
        let Some(name) = &self.interface else {
            tracing::debug!("Network changed, {} interfaces", interfaces.len());
            return;
        };

        if interfaces.iter().any(|iface| &iface.name == name) {
            if let Err(e) = self.daemon.enable_interface(name.as_str()) {
                tracing::warn!("Failed to re-enable interface {}: {}", name, e);
            }
        } else {
            tracing::warn!("Configured interface {} is gone", name);
        }
    }
}
